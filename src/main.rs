mod api;
mod cache;
mod commands;
mod config;
mod logging;

use clap::Parser;
use color_eyre::Result;
use std::path::PathBuf;
use std::process::ExitCode;

#[derive(Parser, Debug)]
#[command(name = "riverdale")]
#[command(about = "Client and offline resource cache for the Riverdale payroll site")]
#[command(version)]
struct Args {
  /// Path to config file (default: $XDG_CONFIG_HOME/riverdale/config.yaml)
  #[arg(short, long)]
  config: Option<PathBuf>,

  /// Site origin, e.g. https://payroll.example.com
  #[arg(long)]
  origin: Option<String>,

  #[command(subcommand)]
  command: commands::Command,
}

#[tokio::main]
async fn main() -> Result<ExitCode> {
  color_eyre::install()?;

  let args = Args::parse();
  let _log_guard = logging::init()?;

  let config = config::Config::load(args.config.as_deref())?;

  // Override origin if specified on command line
  let config = if let Some(origin) = args.origin {
    config::Config { origin, ..config }
  } else {
    config
  };

  let ok = commands::run(args.command, &config).await?;
  Ok(if ok {
    ExitCode::SUCCESS
  } else {
    ExitCode::FAILURE
  })
}
