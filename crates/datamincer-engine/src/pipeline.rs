use std::time::Instant;

use serde_json::Value;
use tracing::{debug, info};

use crate::errors::EngineResult;
use crate::plugin::{EvalContext, Worker, WorkerResults};
use crate::tree::{InstanceId, Node, PluginTree};

/// Config key listing the stages of a generator.
pub const WORKERS_KEY: &str = "workers";

/// One stage of a worker chain.
#[derive(Debug, Clone)]
pub struct Stage {
    pub key: String,
    pub worker: InstanceId,
    /// Worker config as evaluated by the owning generator.
    pub config: Value,
}

/// Concatenates the per-stage lists of `extra` onto `target`; stages missing
/// from `target` are appended after its own.
pub fn merge_worker_results(target: &mut WorkerResults, extra: WorkerResults) {
    for (key, items) in extra {
        target.entry(key).or_default().extend(items);
    }
}

/// Runs the worker chain of the generator behind `ctx`.
///
/// `data` is the generator's evaluated config, `global` the unit data fed to
/// the first stage.
pub fn run_workers(ctx: &EvalContext<'_>, data: &Value, global: &Value) -> EngineResult<WorkerResults> {
    let Some(Node::Map(workers)) = ctx.core().get(WORKERS_KEY) else {
        return Ok(WorkerResults::new());
    };
    let mut stages = Vec::with_capacity(workers.len());
    for (key, node) in workers {
        let Some(worker) = node.as_plugin() else {
            return Err(ctx.error(format!("stage '{key}' is not a worker")));
        };
        let config = data
            .get(WORKERS_KEY)
            .and_then(|workers| workers.get(key))
            .cloned()
            .unwrap_or(Value::Null);
        stages.push(Stage {
            key: key.clone(),
            worker,
            config,
        });
    }
    Pipeline::new(ctx.tree(), stages).run(global.clone())
}

/// A chain of worker stages driven depth-first, one item at a time.
pub struct Pipeline<'t> {
    tree: &'t PluginTree,
    stages: Vec<Stage>,
}

impl<'t> Pipeline<'t> {
    pub fn new(tree: &'t PluginTree, stages: Vec<Stage>) -> Self {
        Self { tree, stages }
    }

    /// Feeds `input` to the first stage, finalizes every stage, and returns the
    /// items that reached the end of the chain.
    pub fn run(&self, input: Value) -> EngineResult<WorkerResults> {
        let Some(last) = self.stages.last() else {
            return Ok(WorkerResults::new());
        };
        let start = Instant::now();
        self.reset_buffers()?;
        let mut results = self.process(0, input)?;
        self.finalize(&mut results)?;

        let terminal = results.shift_remove(&last.key).unwrap_or_default();
        info!(
            stages = self.stages.len(),
            items = terminal.len(),
            duration_ms = start.elapsed().as_millis() as u64,
            "worker chain finished"
        );
        let mut output = WorkerResults::new();
        output.insert(last.key.clone(), terminal);
        Ok(output)
    }

    fn reset_buffers(&self) -> EngineResult<()> {
        for stage in &self.stages {
            if let Some(buffer) = self.tree.context(stage.worker).worker()?.buffering() {
                buffer.clear_buffer();
            }
        }
        Ok(())
    }

    /// Drives stage `index` with one upstream item, recursing downstream for
    /// every item it lets through. Every stage records what it emits.
    fn process(&self, index: usize, input: Value) -> EngineResult<WorkerResults> {
        let mut results = WorkerResults::new();
        let Some(stage) = self.stages.get(index) else {
            return Ok(results);
        };
        let ctx = self.tree.context(stage.worker);
        let worker = ctx.worker()?;

        for item in worker.process(ctx, &stage.config, input)? {
            let item = item?;
            match worker.buffering() {
                Some(buffer) if buffer.is_buffering() => buffer.buffer_item(item),
                Some(buffer) if !buffer.is_buffer_empty() => {
                    let batch = buffer.process_buffer();
                    buffer.buffer_item(item);
                    self.forward(index, batch, &mut results)?;
                }
                // Never drop an item, even when nothing is waiting to flush.
                Some(buffer) => buffer.buffer_item(item),
                None => self.forward(index, item, &mut results)?,
            }
        }
        Ok(results)
    }

    fn forward(&self, index: usize, item: Value, results: &mut WorkerResults) -> EngineResult<()> {
        let stage = &self.stages[index];
        results
            .entry(stage.key.clone())
            .or_default()
            .push(item.clone());
        if index + 1 < self.stages.len() {
            let downstream = self.process(index + 1, item)?;
            merge_worker_results(results, downstream);
        }
        Ok(())
    }

    /// Flushes buffering stages and hands every other stage its recorded items,
    /// in chain order.
    fn finalize(&self, results: &mut WorkerResults) -> EngineResult<()> {
        for (index, stage) in self.stages.iter().enumerate() {
            let ctx = self.tree.context(stage.worker);
            let worker: &dyn Worker = ctx.worker()?;
            match worker.buffering() {
                Some(buffer) => {
                    if !buffer.is_buffer_empty() {
                        let batch = buffer.process_buffer();
                        debug!(stage = %stage.key, "flushing buffered items");
                        self.forward(index, batch, results)?;
                    }
                }
                None => {
                    let items = results.get(&stage.key).map(Vec::as_slice).unwrap_or(&[]);
                    worker.finalize(&ctx, &stage.config, items)?;
                }
            }
        }
        Ok(())
    }
}
