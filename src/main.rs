//! # Quizcast — Campaign Scheduling & Bulk-Dispatch Engine
//!
//! Runs scheduled quiz/poll campaigns across chat groups, tracks answers,
//! and fans out bulk broadcasts under the Bot API's rate limits.
//!
//! Usage:
//!   quizcast                         # Start the engine with ~/.quizcast/config.toml
//!   quizcast --config ./config.toml  # Custom config path
//!   quizcast --verbose               # Debug logging

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result, bail};
use clap::Parser;
use futures::StreamExt;
use tracing_subscriber::EnvFilter;

use quizcast_core::QuizcastConfig;
use quizcast_core::traits::Transport;
use quizcast_engine::{CampaignDb, CampaignService};
use quizcast_transport::TelegramTransport;

#[derive(Parser)]
#[command(
    name = "quizcast",
    version,
    about = "Scheduled quiz/poll campaign engine for chat groups"
)]
struct Cli {
    /// Path to config file (default: ~/.quizcast/config.toml)
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Database path override
    #[arg(long)]
    db_path: Option<PathBuf>,

    /// Verbose logging
    #[arg(short, long)]
    verbose: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let filter = if cli.verbose {
        "quizcast=debug,quizcast_engine=debug,quizcast_transport=debug"
    } else {
        "quizcast=info,quizcast_engine=info,quizcast_transport=info"
    };
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(filter)),
        )
        .with_target(false)
        .init();

    let config = match &cli.config {
        Some(path) => QuizcastConfig::load_from(path)
            .with_context(|| format!("loading config from {}", path.display()))?,
        None => QuizcastConfig::load().context("loading default config")?,
    };

    if !config.telegram.enabled {
        bail!("telegram transport is disabled in config");
    }
    if config.telegram.bot_token.is_empty() {
        bail!("no bot token configured — set telegram.bot_token in config.toml");
    }

    let db_path = cli
        .db_path
        .unwrap_or_else(|| PathBuf::from(&config.storage.db_path));
    let db = Arc::new(CampaignDb::open(&db_path).context("opening campaign database")?);
    tracing::info!("Campaign database at {}", db_path.display());

    let transport = TelegramTransport::new(config.telegram.clone());
    match transport.get_me().await {
        Ok(me) => tracing::info!(
            "Bot connected: @{}",
            me.username.as_deref().unwrap_or("unknown")
        ),
        Err(e) => tracing::warn!("Bot connectivity check failed: {e}"),
    }

    let service = Arc::new(CampaignService::new(
        Arc::clone(&db),
        Arc::new(transport) as Arc<dyn Transport>,
        config.scoring.quiz_points,
    ));

    let restored = service.restore().await.context("restoring schedule")?;
    tracing::info!(
        "Schedule restored: {} jobs re-armed, {} missed their window",
        restored.restored,
        restored.missed
    );

    // Separate client for the long-polling loop; the sending transport
    // stays inside the service.
    let mut answers = TelegramTransport::new(config.telegram.clone()).start_polling();

    loop {
        tokio::select! {
            event = answers.next() => {
                match event {
                    Some(event) => {
                        let outcome = service
                            .record_answer(&event.campaign_id, &event.answerer, event.option_index)
                            .await;
                        if !outcome.matched {
                            tracing::debug!(
                                "Answer for {} matched no active campaign",
                                event.campaign_id
                            );
                        }
                    }
                    None => {
                        tracing::warn!("Answer stream closed");
                        break;
                    }
                }
            }
            _ = tokio::signal::ctrl_c() => {
                tracing::info!("Shutdown signal received");
                break;
            }
        }
    }

    service.shutdown().await;
    Ok(())
}
