use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use agentwatch::commands::{CommandProcessor, TaskBoardRepository};
use agentwatch::config;
use agentwatch::integrations::GitCli;
use agentwatch::monitor::MonitoringService;
use agentwatch::server::EventBroadcaster;
use std::sync::Arc;

#[derive(Parser, Debug)]
#[command(name = "agentwatch")]
#[command(about = "Monitor agent worktrees and coordinate their task board")]
#[command(version)]
struct Args {
    /// Path to config file
    #[arg(long, short, global = true)]
    config: Option<std::path::PathBuf>,

    #[command(subcommand)]
    command: Option<Command>,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Watch all configured agents and serve the dashboard endpoint (default)
    Run,
    /// Run one command against the task board
    Command {
        /// Free-text command, e.g. "create a task: Write docs"
        #[arg(required = true)]
        text: Vec<String>,
        /// Execute on behalf of this agent
        #[arg(long)]
        agent: Option<String>,
    },
    /// Write a starter config file
    Init {
        /// Overwrite an existing config
        #[arg(long)]
        force: bool,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive("agentwatch=info".parse()?),
        )
        .init();

    match args.command.unwrap_or(Command::Run) {
        Command::Init { force } => {
            let path = match args.config {
                Some(path) => path,
                None => config::default_config_path()?,
            };
            config::write_default(&path, force)?;
            println!("Wrote config to {}", path.display());
            Ok(())
        }
        Command::Command { text, agent } => {
            let config = config::load(args.config.as_deref())?;
            let repo = TaskBoardRepository::file(
                config.coordination.task_board_path(),
                config.coordination.actor.clone(),
            );
            let processor = CommandProcessor::new(Arc::new(repo));
            let input = text.join(" ");
            let response = match agent {
                Some(agent) => processor.route_to_agent(&input, &agent).await,
                None => processor.process_command(&input).await,
            };
            println!("{}", serde_json::to_string_pretty(&response)?);
            Ok(())
        }
        Command::Run => run(args.config.as_deref()).await,
    }
}

async fn run(config_path: Option<&std::path::Path>) -> Result<()> {
    let config = config::load(config_path)?;

    let broadcaster = EventBroadcaster::bind(&config.server.bind).await?;

    let service = MonitoringService::new(config, Arc::new(GitCli::new()))
        .with_broadcaster(broadcaster);
    service
        .initialize()
        .await
        .context("Failed to start monitoring")?;

    tokio::signal::ctrl_c()
        .await
        .context("Failed to listen for Ctrl-C")?;
    tracing::info!("Shutting down");
    service.stop().await;
    Ok(())
}
