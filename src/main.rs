use anyhow::{Context, Result};
use clap::{Parser, ValueEnum};
use smart_sampler::{
    analytics::TimeWindow,
    config::ConfigOverrides,
    protocol::{BatchStatus, Priority},
    Engine, EngineConfig, SyntheticMeetingSource,
};
use std::sync::Arc;
use std::time::Duration;
use tokio::signal;
use tokio::time::interval;
use tracing::{error, info, warn};

#[derive(Parser)]
#[command(name = "smart-sampler")]
#[command(about = "Smart sampling analysis engine for meeting recordings")]
#[command(version = env!("CARGO_PKG_VERSION"))]
pub struct Args {
    /// Sampling preset to analyze with
    #[arg(long, default_value = "BALANCED")]
    pub preset: String,

    /// Analyze with the CUSTOM configuration at this sampling ratio
    /// (0.0-1.0) instead of the preset
    #[arg(long)]
    pub sampling_ratio: Option<f64>,

    /// Number of synthetic meetings to analyze
    #[arg(long, default_value = "5")]
    pub meetings: usize,

    /// Duration of each synthetic meeting in seconds
    #[arg(long, default_value = "1800")]
    pub duration: f64,

    /// Number of concurrent analysis workers
    #[arg(long, default_value = "8")]
    pub workers: usize,

    /// User the analyses are attributed to
    #[arg(long, default_value = "demo-user")]
    pub user: String,

    /// Scheduling priority recorded on the runs
    #[arg(long, value_enum, default_value = "normal")]
    pub priority: PriorityArg,

    /// Log level
    #[arg(long, value_enum, default_value = "info")]
    pub log_level: LogLevel,
}

#[derive(Copy, Clone, PartialEq, Eq, PartialOrd, Ord, ValueEnum, Debug)]
pub enum LogLevel {
    Trace,
    Debug,
    Info,
    Warn,
    Error,
}

impl From<LogLevel> for tracing::Level {
    fn from(level: LogLevel) -> Self {
        match level {
            LogLevel::Trace => tracing::Level::TRACE,
            LogLevel::Debug => tracing::Level::DEBUG,
            LogLevel::Info => tracing::Level::INFO,
            LogLevel::Warn => tracing::Level::WARN,
            LogLevel::Error => tracing::Level::ERROR,
        }
    }
}

#[derive(Copy, Clone, PartialEq, Eq, ValueEnum, Debug)]
pub enum PriorityArg {
    Low,
    Normal,
    High,
}

impl From<PriorityArg> for Priority {
    fn from(priority: PriorityArg) -> Self {
        match priority {
            PriorityArg::Low => Priority::Low,
            PriorityArg::Normal => Priority::Normal,
            PriorityArg::High => Priority::High,
        }
    }
}

impl Args {
    /// Overrides only apply through the CUSTOM configuration.
    fn config_name(&self) -> &str {
        if self.sampling_ratio.is_some() {
            "CUSTOM"
        } else {
            &self.preset
        }
    }

    fn overrides(&self) -> Option<ConfigOverrides> {
        self.sampling_ratio.map(|ratio| ConfigOverrides {
            sampling_ratio: Some(ratio),
            ..Default::default()
        })
    }

    fn priority(&self) -> Option<Priority> {
        Some(self.priority.into())
    }
}

/// Forward analysis progress events to the log until the channel closes.
fn spawn_progress_logger(engine: &Engine) -> tokio::task::JoinHandle<()> {
    let mut rx = engine.subscribe_progress();
    tokio::spawn(async move {
        loop {
            match rx.recv().await {
                Ok(event) => info!(
                    analysis_id = %event.analysis_id,
                    meeting_id = %event.meeting_id,
                    progress = event.progress,
                    stage = %event.stage,
                    "{}",
                    event.message
                ),
                Err(tokio::sync::broadcast::error::RecvError::Lagged(skipped)) => {
                    warn!(skipped, "progress logger lagged behind");
                }
                Err(tokio::sync::broadcast::error::RecvError::Closed) => break,
            }
        }
    })
}

fn spawn_batch_logger(engine: &Engine) -> tokio::task::JoinHandle<()> {
    let mut rx = engine.subscribe_batch_progress();
    tokio::spawn(async move {
        while let Ok(event) = rx.recv().await {
            info!(
                batch_id = %event.batch_id,
                progress = event.progress,
                completed = event.completed_meetings,
                failed = event.failed_meetings,
                total = event.total_meetings,
                "{}",
                event.message
            );
        }
    })
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    // Initialize logging
    let log_level: tracing::Level = args.log_level.into();
    tracing_subscriber::fmt()
        .with_max_level(log_level)
        .with_target(false)
        .init();

    info!("Starting Smart Sampler v{}", env!("CARGO_PKG_VERSION"));
    info!("Configuration:");
    info!("  Preset: {}", args.preset);
    info!("  Meetings: {}", args.meetings);
    info!("  Duration: {:.0}s each", args.duration);
    info!("  Workers: {}", args.workers);
    info!("  Log level: {:?}", args.log_level);

    // Register the synthetic meetings the demo analyzes
    let source = Arc::new(SyntheticMeetingSource::new());
    let meeting_ids: Vec<String> = (0..args.meetings)
        .map(|i| format!("meeting-{i:03}"))
        .collect();
    for id in &meeting_ids {
        source.insert_meeting(id, args.duration);
    }

    let engine = Engine::new(
        source,
        EngineConfig {
            worker_pool_size: args.workers,
            ..EngineConfig::default()
        },
    );

    let progress_logger = spawn_progress_logger(&engine);
    let batch_logger = spawn_batch_logger(&engine);

    let batch = engine
        .start_batch(
            meeting_ids,
            &args.user,
            args.config_name(),
            args.overrides(),
            args.priority(),
        )
        .await
        .context("Failed to start batch")?;
    info!(
        batch_id = %batch.id,
        "Batch accepted: {} meetings, projected savings ${:.2} ({:.0}%)",
        batch.total_meetings,
        batch.cost_estimate.savings,
        batch.cost_estimate.savings_percentage
    );

    // Poll the batch record until it settles or we are interrupted
    let mut poll = interval(Duration::from_millis(200));
    let final_batch = loop {
        tokio::select! {
            _ = poll.tick() => {
                let snapshot = engine
                    .get_batch(batch.id, &args.user)
                    .await
                    .context("Batch disappeared from the registry")?;
                if matches!(snapshot.status, BatchStatus::Completed | BatchStatus::Failed) {
                    break snapshot;
                }
            }
            _ = signal::ctrl_c() => {
                info!("Received Ctrl+C signal, cancelling batch");
                break engine
                    .cancel_batch(batch.id, &args.user)
                    .await
                    .context("Failed to cancel batch")?;
            }
        }
    };

    info!(
        "Batch {:?}: {} completed, {} failed of {}",
        final_batch.status,
        final_batch.completed_meetings,
        final_batch.failed_meetings,
        final_batch.total_meetings
    );

    // Summarize what the sampled runs saved
    match engine
        .get_analytics(&args.user, &TimeWindow::last_days(1))
        .await
    {
        Ok(analytics) => {
            info!(
                "Analytics: {} analyses, ${:.2} saved, average quality {:.2}",
                analytics.total_analyses,
                analytics.total_cost_savings,
                analytics.average_quality_score
            );
            for insight in &analytics.top_insights {
                info!("  Insight: {}", insight);
            }
        }
        Err(e) => error!("Failed to gather analytics: {}", e),
    }

    progress_logger.abort();
    batch_logger.abort();
    Ok(())
}
