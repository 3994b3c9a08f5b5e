use anyhow::{Context, Result};
use blocklink::catalog::{CatalogEntries, CatalogRegistry};
use blocklink::config::Config;
use blocklink::generator::{CompileSession, DeviceCommand};
use blocklink::model::{DeviceModelId, ProgramDiagram};
use blocklink::notice::{LogNotifier, Notifier};
use blocklink::sandbox::{self, Sandbox};
use camino::{Utf8Path, Utf8PathBuf};
use clap::{Args, Parser, Subcommand};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[derive(Parser, Debug)]
#[command(author, version, about = "Compile robot block programs and preview them", long_about = None)]
struct Cli {
    /// Configuration file (TOML). Defaults apply if it does not exist.
    #[arg(long, value_name = "FILE", default_value = "blocklink.toml")]
    config: Utf8PathBuf,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// List the palette blocks a model's catalog provides
    Palette {
        #[command(flatten)]
        model: ModelArgs,
        /// Only show blocks matching this text
        #[arg(long)]
        query: Option<String>,
    },
    /// Compile a diagram and print the generated script
    Compile(ProgramArgs),
    /// Compile a diagram and run it in the sandbox without a robot
    Preview(ProgramArgs),
}

#[derive(Args, Debug)]
struct ModelArgs {
    /// Catalog JSON (actions, extended_actions, expressions, dances, skills)
    #[arg(long, value_name = "FILE")]
    catalog: Utf8PathBuf,
    /// Device model identifier
    #[arg(long)]
    model: String,
}

#[derive(Args, Debug)]
struct ProgramArgs {
    #[command(flatten)]
    model: ModelArgs,
    /// Diagram JSON
    #[arg(long, value_name = "FILE")]
    diagram: Utf8PathBuf,
    /// Robot serial written into generated commands
    #[arg(long, default_value = "")]
    serial: String,
}

fn main() -> Result<()> {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info".into()),
        )
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();

    let cli = Cli::parse();
    let config = Config::load(&cli.config)?;

    match cli.command {
        Command::Palette { model, query } => {
            let (registry, _) = load_registry(&model)?;
            match query {
                Some(q) => {
                    for def in registry.search(&q) {
                        println!("{}\t{}\t{}", def.category, def.block_type, def.display_name);
                    }
                }
                None => {
                    for category in registry.palette() {
                        println!("{}:", category.name);
                        for def in &category.entries {
                            println!("  {}\t{}", def.block_type, def.display_name);
                        }
                    }
                }
            }
        }
        Command::Compile(args) => {
            let (registry, model) = load_registry(&args.model)?;
            let diagram = read_diagram(&args.diagram)?;
            let mut session = CompileSession::new(Some(model), args.serial);
            let program = session.compile(&registry, &diagram)?;
            print!("{}", program.code);
        }
        Command::Preview(args) => {
            let (registry, model) = load_registry(&args.model)?;
            let diagram = read_diagram(&args.diagram)?;
            let mut session = CompileSession::new(Some(model), args.serial);
            let program = session.compile(&registry, &diagram)?;
            let runner = Sandbox::new(
                |cmd: &DeviceCommand| -> Result<(), String> {
                    tracing::info!(serial = %cmd.serial, kind = %cmd.kind, code = %cmd.code, "command");
                    Ok(())
                },
                config.sandbox.clone(),
            );
            let result = runner.run_program(&program);
            LogNotifier.notify(sandbox::outcome_notice(&result));
            if let Ok(report) = &result {
                for line in &report.log {
                    println!("log: {}", line);
                }
                println!("estimated duration: {:.1}s", report.estimated_seconds);
            }
            result?;
        }
    }
    Ok(())
}

fn load_registry(args: &ModelArgs) -> Result<(CatalogRegistry, DeviceModelId)> {
    let text = std::fs::read_to_string(&args.catalog)
        .with_context(|| format!("Failed to read {}", args.catalog))?;
    let entries = CatalogEntries::from_json_str(&text)
        .with_context(|| format!("Invalid catalog {}", args.catalog))?;
    let model = DeviceModelId::new(args.model.clone());
    let mut registry = CatalogRegistry::new();
    registry.register(model.clone(), &entries);
    Ok((registry, model))
}

fn read_diagram(path: &Utf8Path) -> Result<ProgramDiagram> {
    let text = std::fs::read_to_string(path).with_context(|| format!("Failed to read {}", path))?;
    serde_json::from_str(&text).with_context(|| format!("Invalid diagram {}", path))
}
