use std::cell::RefCell;

use serde_json::{Map, Value, json};
use tracing::info;

use datamincer_core::{SchemaChildren, SchemaNode, merge_missing, union};
use datamincer_store::write_json_atomic;

use crate::errors::EngineResult;
use crate::evaluate::{PathFilter, evaluate_children};
use crate::output::csv::write_records_csv;
use crate::plugin::{BufferingWorker, EvalContext, ItemStream, Plugin, Worker};
use crate::registry::{PluginDescriptor, plugin_config};
use crate::tree::{InstanceCore, Node};

const WORKER_TYPE: &str = "worker";
const DEFAULT_WINDOW: u64 = 10;

/// How a worker folds a produced row into the data it received.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MergeMode {
    /// Keep an existing `var` entry, otherwise set it.
    Source,
    /// Always overwrite `var`.
    Dest,
    /// Deep merge into an existing `var` entry, existing values winning.
    Merge,
}

impl MergeMode {
    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "source" => Some(Self::Source),
            "dest" => Some(Self::Dest),
            "merge" => Some(Self::Merge),
            _ => None,
        }
    }
}

/// Places `row` under `var` in `data` according to `mode`.
pub fn merge_result(row: Value, data: Value, var: &str, mode: MergeMode) -> Value {
    let mut data = match data {
        Value::Object(map) => map,
        _ => Map::new(),
    };
    match mode {
        MergeMode::Source => {
            data.entry(var.to_string()).or_insert(row);
            Value::Object(data)
        }
        MergeMode::Dest => {
            data.insert(var.to_string(), row);
            Value::Object(data)
        }
        MergeMode::Merge => match data.get_mut(var) {
            Some(existing) => {
                merge_missing(existing, &row);
                Value::Object(data)
            }
            None => {
                let mut placed = Map::new();
                placed.insert(var.to_string(), row);
                union(&Value::Object(placed), &Value::Object(data))
            }
        },
    }
}

/// `var`/`merge` settings read from an evaluated worker config. A null `var`
/// emits rows as they are.
struct RowPlacement {
    var: Option<String>,
    mode: MergeMode,
}

impl RowPlacement {
    fn from_config(ctx: &EvalContext<'_>, config: &Value) -> EngineResult<Self> {
        let var = config.get("var").and_then(Value::as_str).map(str::to_string);
        let mode = match config.get("merge") {
            None | Some(Value::Null) => MergeMode::Dest,
            Some(Value::String(mode)) => MergeMode::parse(mode)
                .ok_or_else(|| ctx.error(format!("unknown merge mode '{mode}'")))?,
            Some(other) => return Err(ctx.error(format!("invalid merge mode {other}"))),
        };
        Ok(Self { var, mode })
    }

    fn place(&self, row: Value, data: &Value) -> Value {
        match &self.var {
            Some(var) => merge_result(row, data.clone(), var, self.mode),
            None => row,
        }
    }
}

/// Schema keys shared by every worker: the selector, `var` and `merge`.
pub fn worker_children() -> SchemaChildren {
    let mut children = SchemaChildren::new();
    children.insert(WORKER_TYPE.to_string(), SchemaNode::text());
    children.insert("var".to_string(), SchemaNode::text().optional());
    children.insert(
        "merge".to_string(),
        SchemaNode::one_of(vec![json!("merge"), json!("source"), json!("dest")]).optional(),
    );
    children
}

fn worker_defaults(plugin_id: &str) -> Map<String, Value> {
    let mut config = plugin_config(WORKER_TYPE, plugin_id);
    config.insert("var".to_string(), json!("row"));
    config.insert("merge".to_string(), json!("dest"));
    config
}

fn with_children(extra: &[(&str, SchemaNode)]) -> SchemaChildren {
    let mut children = worker_children();
    for (name, node) in extra {
        children.insert(name.to_string(), node.clone());
    }
    children
}

/// Emits its input unchanged.
pub struct PassthroughDescriptor;

impl PluginDescriptor for PassthroughDescriptor {
    fn plugin_type(&self) -> &str {
        WORKER_TYPE
    }

    fn plugin_id(&self) -> &str {
        "passthrough"
    }

    fn is_default(&self) -> bool {
        true
    }

    fn default_config(&self, _arg: Option<&Value>) -> Map<String, Value> {
        worker_defaults(self.plugin_id())
    }

    fn schema_children(&self) -> SchemaChildren {
        worker_children()
    }

    fn create(&self, _core: &InstanceCore) -> EngineResult<Box<dyn Plugin>> {
        Ok(Box::new(Passthrough))
    }
}

pub struct Passthrough;

impl Plugin for Passthrough {
    fn as_worker(&self) -> Option<&dyn Worker> {
        Some(self)
    }
}

impl Worker for Passthrough {}

/// Emits one row per entry of `items`.
pub struct EachDescriptor;

impl PluginDescriptor for EachDescriptor {
    fn plugin_type(&self) -> &str {
        WORKER_TYPE
    }

    fn plugin_id(&self) -> &str {
        "each"
    }

    fn default_config(&self, _arg: Option<&Value>) -> Map<String, Value> {
        worker_defaults(self.plugin_id())
    }

    fn schema_children(&self) -> SchemaChildren {
        with_children(&[("items", SchemaNode::any())])
    }

    fn create(&self, _core: &InstanceCore) -> EngineResult<Box<dyn Plugin>> {
        Ok(Box::new(Each))
    }
}

pub struct Each;

impl Plugin for Each {
    fn as_worker(&self) -> Option<&dyn Worker> {
        Some(self)
    }
}

impl Worker for Each {
    fn process<'a>(
        &'a self,
        ctx: EvalContext<'a>,
        config: &'a Value,
        input: Value,
    ) -> EngineResult<ItemStream<'a>> {
        let placement = RowPlacement::from_config(&ctx, config)?;
        let items = match ctx.resolve_params(config.get("items").unwrap_or(&Value::Null), &input)? {
            Value::Array(items) => items,
            Value::Object(map) => map.into_iter().map(|(_, item)| item).collect(),
            Value::Null => Vec::new(),
            other => vec![other],
        };
        Ok(Box::new(
            items
                .into_iter()
                .map(move |item| Ok(placement.place(item, &input))),
        ))
    }
}

/// Emits `count` consecutive integers starting at `start`.
pub struct RangeDescriptor;

impl PluginDescriptor for RangeDescriptor {
    fn plugin_type(&self) -> &str {
        WORKER_TYPE
    }

    fn plugin_id(&self) -> &str {
        "range"
    }

    fn default_config(&self, _arg: Option<&Value>) -> Map<String, Value> {
        let mut config = worker_defaults(self.plugin_id());
        config.insert("start".to_string(), json!(0));
        config
    }

    fn schema_children(&self) -> SchemaChildren {
        with_children(&[
            ("count", SchemaNode::any()),
            ("start", SchemaNode::number().optional()),
        ])
    }

    fn create(&self, _core: &InstanceCore) -> EngineResult<Box<dyn Plugin>> {
        Ok(Box::new(Range))
    }
}

pub struct Range;

impl Plugin for Range {
    fn as_worker(&self) -> Option<&dyn Worker> {
        Some(self)
    }
}

impl Worker for Range {
    fn process<'a>(
        &'a self,
        ctx: EvalContext<'a>,
        config: &'a Value,
        input: Value,
    ) -> EngineResult<ItemStream<'a>> {
        let placement = RowPlacement::from_config(&ctx, config)?;
        let count = ctx.resolve_params(config.get("count").unwrap_or(&Value::Null), &input)?;
        let Some(count) = count.as_i64() else {
            return Err(ctx.error(format!("count must be an integer, got {count}")));
        };
        let start = config.get("start").and_then(Value::as_i64).unwrap_or(0);
        Ok(Box::new(
            (start..start + count.max(0)).map(move |index| Ok(placement.place(json!(index), &input))),
        ))
    }
}

/// Builds one record per input by evaluating its `fields` in order.
pub struct RecordDescriptor;

impl PluginDescriptor for RecordDescriptor {
    fn plugin_type(&self) -> &str {
        WORKER_TYPE
    }

    fn plugin_id(&self) -> &str {
        "record"
    }

    fn default_config(&self, _arg: Option<&Value>) -> Map<String, Value> {
        worker_defaults(self.plugin_id())
    }

    fn schema_children(&self) -> SchemaChildren {
        with_children(&[(
            "fields",
            SchemaNode::prototype(SchemaNode::partial("field")),
        )])
    }

    fn create(&self, _core: &InstanceCore) -> EngineResult<Box<dyn Plugin>> {
        Ok(Box::new(Record))
    }
}

pub struct Record;

impl Record {
    fn build(&self, ctx: &EvalContext<'_>, input: &Value) -> EngineResult<Value> {
        let mut record = Map::new();
        let Some(Node::Map(fields)) = ctx.core().get("fields") else {
            return Ok(Value::Object(record));
        };
        for (name, node) in fields {
            let ambient = union(&Value::Object(record.clone()), input);
            let value = ctx.resolve(node, &ambient)?;
            record.insert(name.clone(), value);
        }
        Ok(Value::Object(record))
    }
}

impl Plugin for Record {
    fn evaluate(&self, ctx: &EvalContext<'_>, data: &Value) -> EngineResult<Value> {
        evaluate_children(ctx, data, &PathFilter::excluding(&[&["fields"]]))
    }

    fn as_worker(&self) -> Option<&dyn Worker> {
        Some(self)
    }
}

impl Worker for Record {
    fn process<'a>(
        &'a self,
        ctx: EvalContext<'a>,
        config: &'a Value,
        input: Value,
    ) -> EngineResult<ItemStream<'a>> {
        let placement = RowPlacement::from_config(&ctx, config)?;
        let record = self.build(&ctx, &input)?;
        Ok(Box::new(std::iter::once(Ok(placement.place(record, &input)))))
    }
}

/// Groups items into batches of `size`.
pub struct WindowDescriptor;

impl PluginDescriptor for WindowDescriptor {
    fn plugin_type(&self) -> &str {
        WORKER_TYPE
    }

    fn plugin_id(&self) -> &str {
        "window"
    }

    fn default_config(&self, _arg: Option<&Value>) -> Map<String, Value> {
        let mut config = worker_defaults(self.plugin_id());
        config.insert("size".to_string(), json!(DEFAULT_WINDOW));
        config
    }

    fn schema_children(&self) -> SchemaChildren {
        with_children(&[("size", SchemaNode::number().optional())])
    }

    fn create(&self, core: &InstanceCore) -> EngineResult<Box<dyn Plugin>> {
        let size = match core.get_value("size") {
            None | Some(Value::Null) => DEFAULT_WINDOW,
            Some(value) => value
                .as_u64()
                .filter(|size| *size > 0)
                .ok_or_else(|| core.error(format!("size must be a positive integer, got {value}")))?,
        };
        Ok(Box::new(Window {
            size: size as usize,
            buffer: RefCell::new(Vec::new()),
        }))
    }
}

pub struct Window {
    size: usize,
    buffer: RefCell<Vec<Value>>,
}

impl Plugin for Window {
    fn as_worker(&self) -> Option<&dyn Worker> {
        Some(self)
    }
}

impl Worker for Window {
    fn buffering(&self) -> Option<&dyn BufferingWorker> {
        Some(self)
    }
}

impl BufferingWorker for Window {
    fn is_buffering(&self) -> bool {
        self.buffer.borrow().len() < self.size
    }

    fn is_buffer_empty(&self) -> bool {
        self.buffer.borrow().is_empty()
    }

    fn buffer_item(&self, item: Value) {
        self.buffer.borrow_mut().push(item);
    }

    fn process_buffer(&self) -> Value {
        Value::Array(std::mem::take(&mut *self.buffer.borrow_mut()))
    }

    fn clear_buffer(&self) {
        self.buffer.borrow_mut().clear();
    }
}

fn file_children() -> SchemaChildren {
    with_children(&[("path", SchemaNode::text())])
}

fn output_path(ctx: &EvalContext<'_>, config: &Value) -> EngineResult<std::path::PathBuf> {
    let uri = config
        .get("path")
        .and_then(Value::as_str)
        .ok_or_else(|| ctx.error("path is required"))?;
    Ok(ctx.files().prepare_file(uri)?)
}

/// Writes every item it saw to a JSON file once the chain is exhausted.
pub struct JsonFileDescriptor;

impl PluginDescriptor for JsonFileDescriptor {
    fn plugin_type(&self) -> &str {
        WORKER_TYPE
    }

    fn plugin_id(&self) -> &str {
        "json_file"
    }

    fn default_config(&self, _arg: Option<&Value>) -> Map<String, Value> {
        worker_defaults(self.plugin_id())
    }

    fn schema_children(&self) -> SchemaChildren {
        file_children()
    }

    fn create(&self, _core: &InstanceCore) -> EngineResult<Box<dyn Plugin>> {
        Ok(Box::new(JsonFile))
    }
}

pub struct JsonFile;

impl Plugin for JsonFile {
    fn as_worker(&self) -> Option<&dyn Worker> {
        Some(self)
    }
}

impl Worker for JsonFile {
    fn finalize(&self, ctx: &EvalContext<'_>, config: &Value, results: &[Value]) -> EngineResult<()> {
        let path = output_path(ctx, config)?;
        write_json_atomic(&path, &results)?;
        info!(path = %path.display(), items = results.len(), "json written");
        Ok(())
    }
}

/// Writes every record it saw to a CSV file once the chain is exhausted.
pub struct CsvFileDescriptor;

impl PluginDescriptor for CsvFileDescriptor {
    fn plugin_type(&self) -> &str {
        WORKER_TYPE
    }

    fn plugin_id(&self) -> &str {
        "csv_file"
    }

    fn default_config(&self, _arg: Option<&Value>) -> Map<String, Value> {
        worker_defaults(self.plugin_id())
    }

    fn schema_children(&self) -> SchemaChildren {
        file_children()
    }

    fn create(&self, _core: &InstanceCore) -> EngineResult<Box<dyn Plugin>> {
        Ok(Box::new(CsvFile))
    }
}

pub struct CsvFile;

impl Plugin for CsvFile {
    fn as_worker(&self) -> Option<&dyn Worker> {
        Some(self)
    }
}

impl Worker for CsvFile {
    fn finalize(&self, ctx: &EvalContext<'_>, config: &Value, results: &[Value]) -> EngineResult<()> {
        let path = output_path(ctx, config)?;
        let bytes = write_records_csv(&path, results)?;
        info!(path = %path.display(), rows = results.len(), bytes, "csv written");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn merge_modes_place_rows() {
        let data = json!({"row": {"a": 1, "b": 2}, "other": true});
        let row = json!({"a": 9, "c": 3});

        assert_eq!(
            merge_result(row.clone(), data.clone(), "row", MergeMode::Dest),
            json!({"row": {"a": 9, "c": 3}, "other": true})
        );
        assert_eq!(
            merge_result(row.clone(), data.clone(), "row", MergeMode::Source),
            data
        );
        assert_eq!(
            merge_result(row.clone(), data.clone(), "row", MergeMode::Merge),
            json!({"row": {"a": 1, "b": 2, "c": 3}, "other": true})
        );
        assert_eq!(
            merge_result(row.clone(), json!({"other": true}), "row", MergeMode::Merge),
            json!({"row": {"a": 9, "c": 3}, "other": true})
        );
    }

    #[test]
    fn window_drains_in_batches() {
        let window = Window {
            size: 2,
            buffer: RefCell::new(Vec::new()),
        };
        assert!(window.is_buffer_empty());
        window.buffer_item(json!(1));
        assert!(window.is_buffering());
        window.buffer_item(json!(2));
        assert!(!window.is_buffering());
        assert_eq!(window.process_buffer(), json!([1, 2]));
        assert!(window.is_buffer_empty());
    }
}
