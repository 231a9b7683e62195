use std::path::{Path, PathBuf};

use crate::errors::StoreResult;

/// Filesystem roots a bundle's URIs resolve against.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FileRoots {
    pub bundle_name: String,
    pub bundle_path: PathBuf,
    pub build_path: PathBuf,
    pub temp_path: PathBuf,
    pub cache_path: PathBuf,
}

/// Maps `build://`, `bundle://`, `tmp://` and `cache://` URIs to local paths.
#[derive(Debug, Clone)]
pub struct FileManager {
    roots: FileRoots,
}

impl FileManager {
    pub fn new(roots: FileRoots) -> Self {
        Self { roots }
    }

    pub fn roots(&self) -> &FileRoots {
        &self.roots
    }

    /// Resolves a URI to a path; plain paths and unknown schemes pass through.
    pub fn resolve_uri(&self, uri: &str) -> PathBuf {
        let Some((scheme, rest)) = uri.split_once("://") else {
            return PathBuf::from(uri);
        };
        let base = match scheme {
            "build" => self.roots.build_path.join(&self.roots.bundle_name),
            "bundle" => self.roots.bundle_path.clone(),
            "tmp" => self.roots.temp_path.join(&self.roots.bundle_name),
            "cache" => self.roots.cache_path.join(&self.roots.bundle_name),
            _ => return PathBuf::from(uri),
        };
        base.join(rest.trim_start_matches('/'))
    }

    /// Whether `uri` points at the local filesystem.
    pub fn is_local(&self, uri: &str) -> bool {
        match uri.split_once("://") {
            Some((scheme, _)) => matches!(scheme, "build" | "bundle" | "tmp" | "cache" | "file"),
            None => true,
        }
    }

    /// Resolves `uri` and creates the directories leading to it.
    pub fn prepare_file(&self, uri: &str) -> StoreResult<PathBuf> {
        let path = self.resolve_uri(uri);
        if let Some(parent) = path.parent() {
            prepare_directory(parent)?;
        }
        Ok(path)
    }
}

pub fn prepare_directory(path: &Path) -> StoreResult<()> {
    if !path.as_os_str().is_empty() {
        std::fs::create_dir_all(path)?;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn manager() -> FileManager {
        FileManager::new(FileRoots {
            bundle_name: "shop".to_string(),
            bundle_path: PathBuf::from("/bundles/shop"),
            build_path: PathBuf::from("/out"),
            temp_path: PathBuf::from("/tmp/dm"),
            cache_path: PathBuf::from("/cache"),
        })
    }

    #[test]
    fn resolves_known_schemes() {
        let files = manager();
        assert_eq!(files.resolve_uri("build://orders.csv"), PathBuf::from("/out/shop/orders.csv"));
        assert_eq!(files.resolve_uri("bundle://data/a.yml"), PathBuf::from("/bundles/shop/data/a.yml"));
        assert_eq!(files.resolve_uri("tmp://x"), PathBuf::from("/tmp/dm/shop/x"));
        assert_eq!(files.resolve_uri("cache://y"), PathBuf::from("/cache/shop/y"));
    }

    #[test]
    fn passes_through_plain_paths_and_unknown_schemes() {
        let files = manager();
        assert_eq!(files.resolve_uri("out/a.json"), PathBuf::from("out/a.json"));
        assert_eq!(files.resolve_uri("s3://bucket/a"), PathBuf::from("s3://bucket/a"));
        assert!(!files.is_local("s3://bucket/a"));
        assert!(files.is_local("build://a"));
    }
}
