mod bundle;
mod logging;
mod settings;

use std::path::{Path, PathBuf};
use std::time::Instant;

use bundle::Bundle;
use clap::{ArgAction, Args, Parser, Subcommand};
use datamincer_engine::plugins::unit::short_id;
use datamincer_engine::{Engine, EngineError, PluginRegistry, Product};
use thiserror::Error;
use tracing::{error, info, info_span, warn};

#[derive(Debug, Error)]
enum CliError {
    #[error("engine error: {0}")]
    Engine(#[from] EngineError),
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
    #[error("yaml error: {0}")]
    Yaml(#[from] serde_yaml::Error),
    #[error("json error: {0}")]
    Json(#[from] serde_json::Error),
    #[error("settings error: {0}")]
    Settings(#[from] toml::de::Error),
    #[error("invalid configuration: {0}")]
    InvalidConfig(String),
    #[error("logging error: {0}")]
    Logging(String),
    #[error("{failed} of {total} product(s) failed")]
    ProductsFailed { failed: usize, total: usize },
}

#[derive(Parser, Debug)]
#[command(name = "datamincer", version, about = "DataMincer CLI")]
struct Cli {
    #[command(flatten)]
    global: GlobalArgs,
    #[command(subcommand)]
    command: Command,
}

#[derive(Args, Debug)]
struct GlobalArgs {
    /// Engine settings file (TOML).
    #[arg(long, global = true, value_name = "PATH")]
    config: Option<PathBuf>,
    /// Attach config and schema fragments to configuration errors.
    #[arg(long, global = true, default_value_t = false)]
    debug: bool,
    /// Skip schema validation of compiled configuration.
    #[arg(long, global = true, default_value_t = false)]
    novalidate: bool,
    /// Append JSON logs to this file.
    #[arg(long, global = true, value_name = "PATH")]
    log_file: Option<PathBuf>,
    /// Raise log verbosity (repeatable).
    #[arg(short, long, global = true, action = ArgAction::Count)]
    verbose: u8,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Run the generate task of every product in a bundle.
    Generate(GenerateArgs),
    /// Run a task of every product in a bundle.
    Run(RunArgs),
    /// List the products of a bundle and the tasks they expose.
    Tasks(BundleArgs),
}

#[derive(Args, Debug)]
struct BundleArgs {
    /// Bundle directory holding bundle.yml.
    #[arg(long, default_value = ".")]
    bundle: PathBuf,
}

#[derive(Args, Debug)]
struct GenerateArgs {
    #[command(flatten)]
    bundle: BundleArgs,
    /// Only run these generators (repeatable).
    #[arg(long = "generator", value_name = "NAME")]
    generators: Vec<String>,
    /// Print each product's output as JSON.
    #[arg(long, default_value_t = false)]
    print: bool,
}

#[derive(Args, Debug)]
struct RunArgs {
    #[command(flatten)]
    bundle: BundleArgs,
    /// Task name.
    task: String,
    /// Task arguments.
    #[arg(trailing_var_arg = true)]
    args: Vec<String>,
}

fn main() -> Result<(), CliError> {
    let cli = Cli::parse();
    logging::init_logging(cli.global.verbose, cli.global.log_file.as_deref())?;

    let result = match cli.command {
        Command::Generate(args) => run_generate(&cli.global, args),
        Command::Run(args) => run_task(&cli.global, args),
        Command::Tasks(args) => list_tasks(&cli.global, args),
    };
    if let Err(err) = &result {
        error!(error = %err, "command failed");
    }
    result
}

fn run_generate(global: &GlobalArgs, args: GenerateArgs) -> Result<(), CliError> {
    for_each_product(global, &args.bundle.bundle, |index, product| {
        let output = product.run_task("generate", &args.generators)?;
        let id = product.id().unwrap_or_default();
        if args.print {
            println!("{}", serde_json::to_string_pretty(&output)?);
        } else {
            println!("product {index} [{}] generated", short_id(&id));
        }
        Ok(())
    })
}

fn run_task(global: &GlobalArgs, args: RunArgs) -> Result<(), CliError> {
    for_each_product(global, &args.bundle.bundle, |_, product| {
        let output = product.run_task(&args.task, &args.args)?;
        if !output.is_null() {
            println!("{}", serde_json::to_string_pretty(&output)?);
        }
        Ok(())
    })
}

fn list_tasks(global: &GlobalArgs, args: BundleArgs) -> Result<(), CliError> {
    for_each_product(global, &args.bundle, |index, product| {
        let id = product.id().unwrap_or_default();
        let summary = product.summary()?;
        println!("product {index} [{}] {summary}", short_id(&id));
        for task in product.tasks()? {
            println!("  {:<12} {}", task.name, task.help);
        }
        Ok(())
    })
}

/// Initializes every product of the bundle at `dir` and hands it to `action`.
/// A failing product is logged and skipped; the others still run.
fn for_each_product<F>(global: &GlobalArgs, dir: &Path, mut action: F) -> Result<(), CliError>
where
    F: FnMut(usize, &Product) -> Result<(), CliError>,
{
    let mut options = settings::load_options(global.config.as_deref())?;
    options.bundle_path = dir.to_path_buf();
    options.debug |= global.debug;
    options.novalidate |= global.novalidate;

    let bundle = Bundle::load(dir)?;
    let engine = Engine::new(PluginRegistry::with_builtins(), options);
    let start = Instant::now();
    let total = bundle.products.len();
    let mut failed = 0;

    for (index, source) in bundle.products.iter().enumerate() {
        let span = info_span!("product", bundle = %bundle.info.name, index);
        let _guard = span.enter();
        let outcome = engine
            .init_unit(&source.config, &bundle.info, &source.data)
            .map_err(CliError::from)
            .and_then(|product| action(index, &product));
        if let Err(err) = outcome {
            failed += 1;
            warn!(error = %err, "product failed");
        }
    }

    info!(
        bundle = %bundle.info.name,
        products = total,
        failed,
        duration_ms = start.elapsed().as_millis() as u64,
        "bundle finished"
    );
    if failed > 0 {
        return Err(CliError::ProductsFailed { failed, total });
    }
    Ok(())
}
