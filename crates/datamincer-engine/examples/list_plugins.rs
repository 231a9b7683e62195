use datamincer_engine::PluginRegistry;

fn main() {
    let registry = PluginRegistry::with_builtins();
    for plugin_type in registry.types() {
        let default = registry
            .default_for(plugin_type)
            .map(|descriptor| descriptor.plugin_id().to_string());
        for id in registry.ids(plugin_type) {
            let marker = if default.as_deref() == Some(id) { " (default)" } else { "" };
            println!("{plugin_type}/{id}{marker}");
        }
    }
}
