use datamincer_core::{SchemaChildren, SchemaNode};

use crate::errors::EngineResult;
use crate::pipeline::WORKERS_KEY;
use crate::plugin::{Generator, Plugin};
use crate::registry::PluginDescriptor;
use crate::tree::InstanceCore;

/// Descriptor of the default generator, which runs its workers as one chain.
pub struct DefaultGeneratorDescriptor;

impl PluginDescriptor for DefaultGeneratorDescriptor {
    fn plugin_type(&self) -> &str {
        "generator"
    }

    fn plugin_id(&self) -> &str {
        "default"
    }

    fn is_default(&self) -> bool {
        true
    }

    fn schema_children(&self) -> SchemaChildren {
        let mut children = SchemaChildren::new();
        children.insert(
            WORKERS_KEY.to_string(),
            SchemaNode::prototype(SchemaNode::partial("worker")).optional(),
        );
        children
    }

    fn create(&self, _core: &InstanceCore) -> EngineResult<Box<dyn Plugin>> {
        Ok(Box::new(DefaultGenerator))
    }
}

pub struct DefaultGenerator;

impl Plugin for DefaultGenerator {
    fn as_generator(&self) -> Option<&dyn Generator> {
        Some(self)
    }
}

impl Generator for DefaultGenerator {}
