use anyhow::Result;
use clap::{Parser, Subcommand};
use std::sync::Arc;
use tokio::signal;
use tracing::{error, info};

use edurisk::{Config, RiskService};

#[derive(Parser)]
#[command(name = "edurisk")]
#[command(about = "Student dropout-risk assessment and notification service")]
#[command(version)]
struct Cli {
    /// Configuration file path
    #[arg(short, long, default_value = "config.yaml", env = "EDURISK_CONFIG")]
    config: String,

    /// Enable debug logging
    #[arg(short, long)]
    debug: bool,

    #[command(subcommand)]
    command: Option<Command>,
}

#[derive(Subcommand)]
enum Command {
    /// Run the API and realtime server (default)
    Serve,
    /// Run one assessment and print it as JSON
    Assess {
        student_id: String,
        /// Academic period to tag the assessment with
        #[arg(long)]
        period: Option<String>,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let config = Config::load(&cli.config).await?;
    init_logging(cli.debug, &config.system.log_level)?;

    info!("🎓 {}", edurisk::BUILD_INFO);
    info!("✅ Configuration loaded from {}", cli.config);

    match cli.command.unwrap_or(Command::Serve) {
        Command::Serve => serve(config).await,
        Command::Assess { student_id, period } => assess(config, &student_id, period).await,
    }
}

async fn serve(config: Config) -> Result<()> {
    let service = Arc::new(RiskService::new(config).await?);
    service.start().await?;

    let state = service.get_state().await;
    info!(
        "🚀 edurisk fully operational (predictor reachable: {})",
        state.predictor_reachable
    );

    tokio::select! {
        _ = signal::ctrl_c() => {
            info!("📡 Received shutdown signal");
        }
        result = service.wait_for_completion() => {
            match result {
                Ok(_) => info!("✅ edurisk completed successfully"),
                Err(e) => error!("❌ edurisk error: {}", e),
            }
        }
    }

    info!("🔄 Initiating graceful shutdown...");
    service.shutdown().await?;
    info!("✅ edurisk shutdown complete");

    Ok(())
}

async fn assess(config: Config, student_id: &str, period: Option<String>) -> Result<()> {
    let service = RiskService::new(config).await?;
    service.start_components().await;

    let outcome = service.orchestrator().assess(student_id, period).await?;
    println!("{}", serde_json::to_string_pretty(&outcome)?);

    service.shutdown().await?;
    Ok(())
}

fn init_logging(debug: bool, level: &str) -> Result<()> {
    use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

    let filter = if debug {
        EnvFilter::new("edurisk=debug,info")
    } else {
        EnvFilter::try_from_default_env()
            .unwrap_or_else(|_| EnvFilter::new(format!("edurisk={},warn", level)))
    };

    tracing_subscriber::registry()
        .with(filter)
        .with(
            tracing_subscriber::fmt::layer()
                .with_target(true)
                .with_thread_ids(true)
                .with_file(true)
                .with_line_number(true),
        )
        .init();

    Ok(())
}
