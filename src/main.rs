//! Plugin Composer - compose independently built plugins into a host.
//!
//! The binary runs a composition pass against the configured catalog and
//! reports what was registered, and offers a few inspection helpers for
//! plugin authors.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand, ValueEnum};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use plugin_composer::core::Config;
use plugin_composer::plugin::{
    discover_local, manifest, CompositionReport, LoadMode, Orchestrator, PluginRegistry,
};
use plugin_composer::store::Store;

/// Compose federated plugins into a host application
#[derive(Parser)]
#[command(name = "plugin-composer")]
#[command(author, version, about, long_about = None)]
#[command(propagate_version = true)]
struct Cli {
    /// Subcommand to run
    #[command(subcommand)]
    command: Commands,

    /// Enable verbose logging
    #[arg(short, long, global = true)]
    verbose: bool,
}

#[derive(Subcommand)]
enum Commands {
    /// Run a composition pass and report the result
    Compose {
        /// Load mode (overrides config and environment)
        #[arg(short, long)]
        mode: Option<LoadMode>,

        /// Local plugin checkout (local mode)
        #[arg(short, long)]
        root: Option<PathBuf>,

        /// Output format
        #[arg(short, long, value_enum, default_value_t = Format::Text)]
        format: Format,
    },

    /// Parse a plugin manifest and show its descriptors
    Inspect {
        /// Path to the manifest file
        manifest: PathBuf,

        /// Catalog path to attribute the descriptors to
        #[arg(short, long)]
        path: Option<String>,

        /// Output format
        #[arg(short, long, value_enum, default_value_t = Format::Text)]
        format: Format,
    },

    /// List plugins found in a local checkout
    Discover {
        /// Checkout root containing `plugins/`
        #[arg(default_value = ".")]
        root: PathBuf,
    },

    /// Show the effective configuration
    Config {
        /// Show the config file path instead
        #[arg(long)]
        path: bool,

        /// Write the effective configuration to the global config file
        #[arg(long, conflicts_with = "path")]
        save: bool,
    },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
enum Format {
    Text,
    Json,
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    // Setup logging. Logs go to stderr so JSON output stays parseable.
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| {
        if cli.verbose {
            EnvFilter::new("debug")
        } else {
            EnvFilter::new("warn")
        }
    });

    tracing_subscriber::registry()
        .with(fmt::layer().with_target(false).with_writer(std::io::stderr))
        .with(filter)
        .init();

    match cli.command {
        Commands::Compose { mode, root, format } => cmd_compose(mode, root, format),
        Commands::Inspect { manifest, path, format } => cmd_inspect(&manifest, path, format),
        Commands::Discover { root } => cmd_discover(&root),
        Commands::Config { path, save } => cmd_config(path, save),
    }
}

/// Run one composition pass.
fn cmd_compose(mode: Option<LoadMode>, root: Option<PathBuf>, format: Format) -> Result<()> {
    let mut config = Config::load()?;
    if let Some(mode) = mode {
        config.plugins.mode = mode;
    }
    if let Some(root) = root {
        config.plugins.mode = LoadMode::Local;
        config.plugins.local_root = root;
    }

    let registry = Arc::new(PluginRegistry::new());
    let store = Arc::new(Store::new());
    let (orchestrator, catalog) =
        Orchestrator::from_config_default(&config.plugins, Arc::clone(&registry), store.clone())?;

    // Create tokio runtime for async operations
    let rt = tokio::runtime::Runtime::new()?;
    let report = rt.block_on(orchestrator.initialize(catalog.as_ref()));

    match format {
        Format::Json => {
            let extensions: Vec<_> = registry
                .extension_points()
                .into_iter()
                .map(|point| {
                    let entries: Vec<_> = registry
                        .get(point.area, point.component_type)
                        .into_iter()
                        .map(|e| e.descriptor)
                        .collect();
                    serde_json::json!({ "area": point.area, "type": point.component_type, "entries": entries })
                })
                .collect();

            let json = serde_json::json!({
                "mode": orchestrator.mode(),
                "report": report,
                "extensions": extensions,
                "state": store.to_json(),
            });
            println!("{}", serde_json::to_string_pretty(&json)?);
        }
        Format::Text => print_report(&report, &registry, &store),
    }

    if let Some(error) = report.catalog_error {
        anyhow::bail!("Plugin catalog unavailable: {error}");
    }

    Ok(())
}

fn print_report(report: &CompositionReport, registry: &PluginRegistry, store: &Store) {
    for point in registry.extension_points() {
        println!("{point}:");
        for entry in registry.get(point.area, point.component_type) {
            println!("  - {} {} ({})", entry.descriptor.name, entry.descriptor.version, entry.module.source());
        }
    }

    let slices = store.slice_keys();
    if !slices.is_empty() {
        println!("\nState slices: {}", slices.join(", "));
    }

    for failure in &report.skipped {
        println!("\nskipped {}: {}", failure.plugin, failure.reason);
    }
    for failure in &report.failed {
        println!("\nfailed {}: {}", failure.plugin, failure.reason);
    }
    for name in &report.pruned {
        println!("\nremoved {name}");
    }

    println!("\nTotal: {} plugins registered", report.registered.len());
}

/// Parse a manifest file.
fn cmd_inspect(manifest_path: &Path, path: Option<String>, format: Format) -> Result<()> {
    let content = std::fs::read_to_string(manifest_path)
        .with_context(|| format!("Failed to read {}", manifest_path.display()))?;

    let source_path = path.unwrap_or_else(|| {
        manifest_path
            .parent()
            .and_then(Path::file_name)
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default()
    });

    let descriptors = manifest::parse(&content, &source_path)?;

    match format {
        Format::Json => println!("{}", serde_json::to_string_pretty(&descriptors)?),
        Format::Text => {
            for d in &descriptors {
                println!("{} {} -> {} ({})", d.name, d.version, d.extension_point(), d.module_path);
            }
            println!("\nTotal: {} components", descriptors.len());
        }
    }

    Ok(())
}

/// List plugins in a local checkout.
fn cmd_discover(root: &Path) -> Result<()> {
    let discovery = discover_local(root);

    println!("Discovered {} plugins in {}\n", discovery.plugins.len(), root.display());
    for plugin in &discovery.plugins {
        println!("  - {} ({})", plugin.name, plugin.dir.display());
    }

    for line in &discovery.diagnostics {
        eprintln!("warning: {line}");
    }

    Ok(())
}

/// Show or locate the configuration.
fn cmd_config(show_path: bool, save: bool) -> Result<()> {
    if show_path {
        match Config::active_path() {
            Some(path) => println!("{}", path.display()),
            None => {
                if let Some(dir) = Config::config_dir() {
                    println!("{}", dir.join("config.toml").display());
                }
            }
        }
        return Ok(());
    }

    let config = Config::load()?;

    if save {
        let path = config.save()?;
        println!("Saved configuration to {}", path.display());
        return Ok(());
    }

    let toml = toml::to_string_pretty(&config)?;
    println!("{toml}");

    Ok(())
}
