use clap::{Parser, Subcommand};
use colored::*;
use llmsetup::backend::Backend;
use llmsetup::config::SetupConfig;
use llmsetup::display;
use llmsetup::error::{Result, SetupError};
use llmsetup::hardware::{HardwareInfo, MIN_RAM_GB, detect_hardware};
use llmsetup::manifest::SetupManifest;
use llmsetup::models::ModelCatalog;
use llmsetup::recommend::recommend;
use llmsetup::runtime::{CliRuntime, ModelRuntime};
use llmsetup::server::LlamaServer;
use llmsetup::setup::{self, SetupOptions, SetupOutcome};
use llmsetup::tier::HardwareTier;
use llmsetup::uninstall::{self, UninstallPlan};

#[derive(Parser)]
#[command(name = "llmsetup")]
#[command(about = "Set up a local LLM backend sized to your hardware and wire it into Continue.dev", long_about = None)]
#[command(version)]
struct Cli {
    /// Enable verbose (debug) logging
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Show detected hardware, tier and usable RAM
    System {
        #[arg(short, long, value_enum)]
        backend: Option<Backend>,
    },

    /// Recommend chat, autocomplete and embedding models for this machine
    Recommend {
        #[arg(short, long, value_enum)]
        backend: Option<Backend>,

        /// Print the recommendation as JSON
        #[arg(long)]
        json: bool,
    },

    /// List the model catalog
    Catalog {
        #[arg(short, long, value_enum)]
        backend: Option<Backend>,

        /// Only models eligible for this tier (S, A, B or C)
        #[arg(short, long, value_parser = parse_tier)]
        tier: Option<HardwareTier>,
    },

    /// Check whether the backend CLI and server are available
    Status {
        #[arg(short, long, value_enum)]
        backend: Option<Backend>,
    },

    /// Pull the recommended models and write Continue.dev configuration
    Setup {
        #[arg(short, long, value_enum)]
        backend: Option<Backend>,

        /// Do not download models
        #[arg(long)]
        skip_models: bool,

        /// Do not write Continue.dev files
        #[arg(long)]
        skip_config: bool,
    },

    /// Remove models and files recorded in the setup manifest
    Uninstall {
        /// Show what would be removed without changing anything
        #[arg(long)]
        dry_run: bool,

        /// Remove configuration files but leave models installed
        #[arg(long)]
        keep_models: bool,
    },

    /// Stop the llama-server started by `restart`
    Stop,

    /// (Re)start llama-server with the recommended chat model
    Restart,

    /// Show the end of the llama-server log
    Logs {
        /// Number of lines to show
        #[arg(short = 'n', long, default_value_t = 50)]
        lines: usize,
    },
}

fn parse_tier(s: &str) -> std::result::Result<HardwareTier, String> {
    HardwareTier::parse(s).ok_or_else(|| format!("unknown tier '{s}' (expected S, A, B or C)"))
}

fn init_logging(verbose: bool) {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| {
        tracing_subscriber::EnvFilter::new(if verbose { "llmsetup=debug" } else { "warn" })
    });
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .without_time()
        .init();
}

fn run(command: Commands, config: &SetupConfig) -> Result<bool> {
    match command {
        Commands::System { backend } => {
            let backend = backend.unwrap_or(config.backend);
            let hw = HardwareInfo::probe();
            hw.display(backend);
            if !hw.meets_minimum() {
                println!(
                    "{}",
                    format!("Below the {MIN_RAM_GB:.0} GB minimum; setup will refuse to run.").red()
                );
            }
        }

        Commands::Recommend { backend, json } => {
            let backend = backend.unwrap_or(config.backend);
            let hw = detect_hardware()?;
            let rec = recommend(&hw, backend);
            if json {
                println!("{}", serde_json::to_string_pretty(&rec)?);
            } else {
                hw.display(backend);
                display::display_recommendation(&rec);
            }
            rec.require_primary()?;
        }

        Commands::Catalog { backend, tier } => {
            let backend = backend.unwrap_or(config.backend);
            let catalog = ModelCatalog::builtin();
            let entries = match tier {
                Some(tier) => catalog.models_for_tier(tier),
                None => catalog.entries().to_vec(),
            };
            display::display_catalog(&entries, backend);
        }

        Commands::Status { backend } => {
            let backend = backend.unwrap_or(config.backend);
            let runtime = CliRuntime::new(backend, config);
            let installed = runtime.is_installed();
            let running = runtime.is_running();
            let models = if installed {
                runtime.installed_models().unwrap_or_else(|e| {
                    tracing::warn!(error = %e, "could not list models");
                    Vec::new()
                })
            } else {
                Vec::new()
            };
            display::display_status(backend, installed, running, &models);
            return Ok(installed && running);
        }

        Commands::Setup {
            backend,
            skip_models,
            skip_config,
        } => {
            let backend = backend.unwrap_or(config.backend);
            let hw = detect_hardware()?;
            hw.display(backend);
            display::display_recommendation(&recommend(&hw, backend));

            let runtime = CliRuntime::new(backend, config);
            let options = SetupOptions {
                backend,
                skip_models,
                skip_config,
            };
            let report = setup::run_setup(config, options, &hw, &runtime)?;
            display::display_setup_report(&report);
            return Ok(report.outcome() != SetupOutcome::Failed);
        }

        Commands::Uninstall {
            dry_run,
            keep_models,
        } => {
            let manifest_path = config.manifest_path();
            let manifest = SetupManifest::load(&manifest_path)?;
            let plan = UninstallPlan::from_manifest(&manifest, keep_models);
            display::display_uninstall_plan(&plan);

            let runtime = CliRuntime::new(manifest.backend, config);
            let report = uninstall::execute(&plan, &runtime, &manifest_path, dry_run);
            display::display_uninstall_report(&report);
            return Ok(report.errors.is_empty());
        }

        Commands::Stop => {
            let server = LlamaServer::new(config);
            if server.stop()? {
                println!("{}", "llama-server stopped".green());
            } else {
                println!("llama-server is not running");
            }
        }

        Commands::Restart => {
            let hw = detect_hardware()?;
            let rec = recommend(&hw, Backend::LlamaCpp);
            let chat = rec.require_primary()?;

            let server = LlamaServer::new(config);
            let mut child = server.restart(&chat.model_id, chat.context_length(rec.tier))?;
            server.wait_ready(&mut child, config.pull_timeout)?;
            println!(
                "{} serving {} on port {} (pid {})",
                "llama-server".green().bold(),
                chat.model_id,
                server.port(),
                child.id()
            );
        }

        Commands::Logs { lines } => {
            let server = LlamaServer::new(config);
            let tail = server.tail_log(lines)?;
            if tail.is_empty() {
                println!("No log at {}", server.log_path().display());
            }
            for line in tail {
                println!("{}", line);
            }
        }
    }
    Ok(true)
}

fn report_error(err: &SetupError) {
    eprintln!("{} {}", "Error:".red().bold(), err);
    match err {
        SetupError::CommandNotFound(cli) if cli == "docker" => {
            eprintln!("Install Docker Desktop and enable Model Runner in Settings > AI.");
        }
        SetupError::DaemonNotRunning { .. } => {
            eprintln!("Start the backend (Docker Desktop, `ollama serve` or `llama-server`) and retry.");
        }
        _ => {}
    }
}

fn main() {
    let cli = Cli::parse();
    init_logging(cli.verbose);

    let outcome = SetupConfig::from_env().and_then(|config| run(cli.command, &config));
    match outcome {
        Ok(true) => {}
        Ok(false) => std::process::exit(1),
        Err(e) => {
            report_error(&e);
            std::process::exit(1);
        }
    }
}
