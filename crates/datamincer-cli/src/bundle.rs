use std::path::Path;

use datamincer_engine::BundleInfo;
use serde_json::{Map, Value, json};

use crate::CliError;

/// Bundle definition file inside a bundle directory.
pub const BUNDLE_FILE: &str = "bundle.yml";

/// Key listing the products of a multi-product bundle.
const PRODUCTS_KEY: &str = "products";

/// Per-product key holding `{dimension: {register: {domain: value}}}`.
const ORIGIN_KEY: &str = "origin";

/// A product config together with the data bag it starts with.
#[derive(Debug, Clone, PartialEq)]
pub struct ProductSource {
    pub config: Value,
    pub data: Value,
}

#[derive(Debug, Clone)]
pub struct Bundle {
    pub info: BundleInfo,
    pub products: Vec<ProductSource>,
}

impl Bundle {
    pub fn load(dir: &Path) -> Result<Self, CliError> {
        let path = dir.join(BUNDLE_FILE);
        let content = std::fs::read_to_string(&path).map_err(|err| {
            CliError::InvalidConfig(format!("cannot read {}: {err}", path.display()))
        })?;
        Self::parse(dir, &content)
    }

    pub fn parse(dir: &Path, content: &str) -> Result<Self, CliError> {
        let document: Value = serde_yaml::from_str(content)?;
        let name = document
            .get("name")
            .and_then(Value::as_str)
            .map(str::to_string)
            .or_else(|| dir_name(dir))
            .unwrap_or_else(|| "bundle".to_string());
        let info = BundleInfo {
            name,
            path: dir.to_path_buf(),
        };

        let configs = match document.get(PRODUCTS_KEY) {
            Some(Value::Array(products)) => products.clone(),
            Some(_) => {
                return Err(CliError::InvalidConfig(format!(
                    "{PRODUCTS_KEY} must be a sequence"
                )));
            }
            None => vec![document],
        };
        let products = configs
            .into_iter()
            .enumerate()
            .map(|(index, config)| product_source(&info, index, config))
            .collect();
        Ok(Self { info, products })
    }
}

fn dir_name(dir: &Path) -> Option<String> {
    let dir = dir.canonicalize().ok()?;
    dir.file_name().map(|name| name.to_string_lossy().into_owned())
}

fn product_source(info: &BundleInfo, index: usize, config: Value) -> ProductSource {
    let (config, origin) = match config {
        Value::Object(map) => {
            let mut origin = None;
            let mut rest = Map::new();
            for (key, value) in map {
                if key == ORIGIN_KEY {
                    origin = Some(value);
                } else {
                    rest.insert(key, value);
                }
            }
            (Value::Object(rest), origin)
        }
        other => (other, None),
    };
    let version = config
        .get("version")
        .cloned()
        .unwrap_or_else(|| json!(env!("CARGO_PKG_VERSION")));
    let data = json!({
        "origin": origin.as_ref().map(prepare_origin).unwrap_or_else(|| json!({})),
        "version": version,
        "bundle": {
            "name": info.name,
            "path": info.path.display().to_string(),
        },
        "product": index,
    });
    ProductSource { config, data }
}

/// Expands `{dimension: {register: {domain: value}}}` into
/// `{dimension: {register: {domain, value}}}`.
fn prepare_origin(origin: &Value) -> Value {
    let mut result = Map::new();
    let Value::Object(dimensions) = origin else {
        return Value::Object(result);
    };
    for (dimension, registers) in dimensions {
        let Value::Object(registers) = registers else {
            continue;
        };
        let mut expanded = Map::new();
        for (register, domains) in registers {
            let Value::Object(domains) = domains else {
                continue;
            };
            for (domain, value) in domains {
                expanded.insert(
                    register.clone(),
                    json!({"domain": domain, "value": value}),
                );
            }
        }
        result.insert(dimension.clone(), Value::Object(expanded));
    }
    Value::Object(result)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn single_document_is_one_product() {
        let bundle = Bundle::parse(
            Path::new("/bundles/shop"),
            "name: shop\ngenerators: {main: {workers: {rows: {worker: range, count: 1}}}}\n",
        )
        .expect("parse bundle");
        assert_eq!(bundle.info.name, "shop");
        assert_eq!(bundle.products.len(), 1);

        let product = &bundle.products[0];
        assert!(product.config.get("generators").is_some());
        assert_eq!(product.data["product"], json!(0));
        assert_eq!(product.data["bundle"]["name"], json!("shop"));
        assert_eq!(product.data["version"], json!(env!("CARGO_PKG_VERSION")));
    }

    #[test]
    fn products_carry_origin_and_version() {
        let bundle = Bundle::parse(
            Path::new("/bundles/shop"),
            r#"
name: shop
products:
  - version: "2"
    origin: {lang: {r0: {langs: en}}}
    generators: {}
  - generators: {}
"#,
        )
        .expect("parse bundle");
        assert_eq!(bundle.products.len(), 2);

        let first = &bundle.products[0];
        assert!(first.config.get("origin").is_none());
        assert_eq!(first.data["version"], json!("2"));
        assert_eq!(
            first.data["origin"],
            json!({"lang": {"r0": {"domain": "langs", "value": "en"}}})
        );
        assert_eq!(bundle.products[1].data["product"], json!(1));
        assert_eq!(bundle.products[1].data["origin"], json!({}));
    }

    #[test]
    fn products_must_be_a_sequence() {
        let err = Bundle::parse(Path::new("."), "products: {a: 1}").expect_err("invalid products");
        assert!(matches!(err, CliError::InvalidConfig(_)));
    }
}
