//! Built-in plugins.

pub mod fields;
pub mod generator;
pub mod services;
pub mod unit;
pub mod workers;

use crate::registry::PluginRegistry;

/// Registers every built-in plugin descriptor.
pub fn register_builtins(registry: &mut PluginRegistry) {
    registry.register(Box::new(unit::DeckDescriptor));
    registry.register(Box::new(generator::DefaultGeneratorDescriptor));

    registry.register(Box::new(workers::PassthroughDescriptor));
    registry.register(Box::new(workers::EachDescriptor));
    registry.register(Box::new(workers::RangeDescriptor));
    registry.register(Box::new(workers::RecordDescriptor));
    registry.register(Box::new(workers::WindowDescriptor));
    registry.register(Box::new(workers::JsonFileDescriptor));
    registry.register(Box::new(workers::CsvFileDescriptor));

    registry.register(Box::new(fields::ValueDescriptor));
    registry.register(Box::new(fields::ConcatDescriptor));
    registry.register(Box::new(fields::HashDescriptor));
    registry.register(Box::new(fields::SequenceDescriptor));

    registry.register(Box::new(services::CounterDescriptor));
}
