use std::path::PathBuf;
use std::process::ExitCode;

use anyhow::Result;
use clap::{Parser, Subcommand};
use provision_engine::EngineConfig;
use tracing_subscriber::EnvFilter;

mod commands;
mod render;

use crate::commands::{apply_profile, build_engine, history_lines, init_profile, list_lines};
use crate::render::{output_style, TerminalRenderer};

#[derive(Parser, Debug)]
#[command(name = "provision")]
#[command(about = "Transactional provisioning of installation profiles", long_about = None)]
struct Cli {
    /// Registry root holding profiles, snapshots and locks.
    #[arg(long)]
    root: PathBuf,
    /// Engine config file (TOML).
    #[arg(long)]
    config: Option<PathBuf>,
    #[arg(long, short)]
    verbose: bool,
    /// Disable colors and progress bars.
    #[arg(long)]
    plain: bool,
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    Init {
        profile: String,
        #[arg(long)]
        install_root: Option<PathBuf>,
    },
    Apply {
        profile: String,
        plan: PathBuf,
        #[arg(long, default_value = "default")]
        phase_set: String,
        #[arg(long)]
        dry_run: bool,
        #[arg(long)]
        install_root: Option<PathBuf>,
    },
    List {
        profile: String,
    },
    History {
        profile: String,
    },
}

fn init_tracing(verbose: bool) {
    let default_filter = if verbose { "debug" } else { "warn" };
    tracing_subscriber::fmt()
        .with_writer(std::io::stderr)
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_filter)),
        )
        .init();
}

fn run(cli: Cli) -> Result<bool> {
    let config = match &cli.config {
        Some(path) => EngineConfig::load(path)?,
        None => EngineConfig::default(),
    };
    let engine = build_engine(&cli.root, config)?;
    let renderer = TerminalRenderer::from_style(output_style(cli.plain));

    match cli.command {
        Commands::Init {
            profile,
            install_root,
        } => {
            let created = init_profile(&engine, &profile, install_root.as_deref())?;
            renderer.print_status(
                "ok",
                &format!("created profile '{}' at {}", created.id(), created.timestamp()),
            );
        }
        Commands::Apply {
            profile,
            plan,
            phase_set,
            dry_run,
            install_root,
        } => {
            let status = apply_profile(
                &engine,
                &profile,
                &plan,
                &phase_set,
                dry_run,
                install_root.as_deref(),
                renderer,
            )?;
            renderer.print_lines(&renderer.status_lines(&status));
            return Ok(!status.is_failure());
        }
        Commands::List { profile } => {
            renderer.print_lines(&list_lines(&engine, &profile)?);
        }
        Commands::History { profile } => {
            renderer.print_lines(&history_lines(&engine, &profile)?);
        }
    }
    Ok(true)
}

fn main() -> ExitCode {
    let cli = Cli::parse();
    init_tracing(cli.verbose);

    match run(cli) {
        Ok(true) => ExitCode::SUCCESS,
        Ok(false) => ExitCode::FAILURE,
        Err(err) => {
            eprintln!("error: {err:#}");
            ExitCode::FAILURE
        }
    }
}

#[cfg(test)]
mod tests;
