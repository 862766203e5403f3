use anyhow::Result;
use clap::Parser;
use orchestrator_cli::args::{Cli, Command};
use orchestrator_cli::commands;
use tracing::info;

#[tokio::main]
async fn main() -> Result<()> {
    // Logs go to stderr; stdout carries the JSON result.
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info".into()),
        )
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    match cli.command {
        Command::Plan(args) => {
            let reports = commands::plan(&args)?;
            println!("{}", serde_json::to_string_pretty(&reports)?);
        }
        Command::Run(args) => {
            info!(
                registry = %args.task.registry.display(),
                capabilities = args.capabilities.len(),
                "Orchestrator starting"
            );
            let report = commands::run(&args).await?;
            println!("{}", serde_json::to_string_pretty(&report)?);
            let code = commands::exit_code(&report.tasks);
            if code != 0 {
                std::process::exit(code);
            }
        }
    }
    Ok(())
}
