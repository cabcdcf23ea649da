//! Single-run analysis state machine.
//!
//! A run is created in `Processing` and advances through a fixed stage
//! sequence, each stage raising `progress` monotonically and publishing
//! an event. The final stage transitions the run to `Completed` with
//! results, or any stage error is captured into a terminal `Failed`
//! state. Stage progression is strictly sequential for one run; the
//! run's mutable fields are owned by its executing task.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::sync::{broadcast, RwLock};
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::config::SamplingConfig;
use crate::insights::{InsightDeriver, PmInsights};
use crate::protocol::{AnalysisStatus, CriticalMoment, Priority, ProgressEvent};
use crate::sampling::{ChunkSpan, Chunker, MomentScorer, ScoringPolicy};
use crate::signal::MeetingSource;
use crate::EngineError;

/// The ordered stages every run walks through.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PipelineStage {
    Initialization,
    ChunkProcessing,
    MomentDetection,
    PmAnalysis,
    Finalization,
}

impl PipelineStage {
    pub fn name(&self) -> &'static str {
        match self {
            PipelineStage::Initialization => "initialization",
            PipelineStage::ChunkProcessing => "chunk-processing",
            PipelineStage::MomentDetection => "moment-detection",
            PipelineStage::PmAnalysis => "pm-analysis",
            PipelineStage::Finalization => "finalization",
        }
    }

    /// Progress value reported when the stage begins. 100 is reserved
    /// for completion.
    pub fn progress(&self) -> u8 {
        match self {
            PipelineStage::Initialization => 10,
            PipelineStage::ChunkProcessing => 25,
            PipelineStage::MomentDetection => 50,
            PipelineStage::PmAnalysis => 75,
            PipelineStage::Finalization => 90,
        }
    }

    pub fn message(&self) -> &'static str {
        match self {
            PipelineStage::Initialization => "Initializing analysis...",
            PipelineStage::ChunkProcessing => "Processing audio chunks...",
            PipelineStage::MomentDetection => "Detecting critical moments...",
            PipelineStage::PmAnalysis => "Analyzing PM communication patterns...",
            PipelineStage::Finalization => "Finalizing results...",
        }
    }
}

/// Populated iff a run reaches `Completed`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AnalysisResults {
    /// Fraction of processing cost avoided, in [0, 1]
    pub cost_reduction: f64,
    /// Heuristic selection quality in [0, 1]
    pub quality_score: f64,
    /// Total seconds of recording actually analyzed
    pub analyzed_duration: f64,
    pub original_duration: f64,
    pub selected_moments: Vec<CriticalMoment>,
    pub pm_analysis: PmInsights,
}

/// One analysis attempt for a single meeting.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AnalysisRun {
    pub id: Uuid,
    pub meeting_id: String,
    pub user_id: String,
    pub status: AnalysisStatus,
    /// 0-100, monotonically increasing; exactly 100 only when completed
    pub progress: u8,
    pub config: SamplingConfig,
    pub priority: Priority,
    pub started_at: DateTime<Utc>,
    pub completed_at: Option<DateTime<Utc>>,
    pub results: Option<AnalysisResults>,
    pub error: Option<String>,
}

impl AnalysisRun {
    pub fn new(meeting_id: String, user_id: String, config: SamplingConfig) -> Self {
        Self {
            id: Uuid::new_v4(),
            meeting_id,
            user_id,
            status: AnalysisStatus::Processing,
            progress: 0,
            config,
            priority: Priority::default(),
            started_at: Utc::now(),
            completed_at: None,
            results: None,
            error: None,
        }
    }

    pub fn with_priority(mut self, priority: Priority) -> Self {
        self.priority = priority;
        self
    }
}

/// Shared handle to a run's mutable record.
pub type RunHandle = Arc<RwLock<AnalysisRun>>;

/// Cooperative cancellation flag checked at stage boundaries.
#[derive(Debug, Clone, Default)]
pub struct CancelFlag(Arc<AtomicBool>);

impl CancelFlag {
    pub fn cancel(&self) {
        self.0.store(true, Ordering::Relaxed);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::Relaxed)
    }
}

/// Fans progress events out to external subscribers.
///
/// Delivery is at-least-once over a broadcast channel; lagging
/// subscribers may drop old events but progress values for one run are
/// always monotonic.
#[derive(Clone)]
pub struct ProgressPublisher {
    tx: broadcast::Sender<ProgressEvent>,
}

impl ProgressPublisher {
    pub fn new(capacity: usize) -> Self {
        let (tx, _) = broadcast::channel(capacity);
        Self { tx }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<ProgressEvent> {
        self.tx.subscribe()
    }

    pub fn publish(&self, event: ProgressEvent) {
        debug!(
            analysis_id = %event.analysis_id,
            progress = event.progress,
            stage = %event.stage,
            "progress"
        );
        // No subscribers is fine; events are advisory
        let _ = self.tx.send(event);
    }
}

/// Executes the stage sequence for individual runs.
pub struct AnalysisPipeline {
    source: Arc<dyn MeetingSource>,
    deriver: InsightDeriver,
    policy: ScoringPolicy,
    publisher: ProgressPublisher,
}

impl AnalysisPipeline {
    pub fn new(
        source: Arc<dyn MeetingSource>,
        deriver: InsightDeriver,
        policy: ScoringPolicy,
        publisher: ProgressPublisher,
    ) -> Self {
        Self {
            source,
            deriver,
            policy,
            publisher,
        }
    }

    pub fn publisher(&self) -> &ProgressPublisher {
        &self.publisher
    }

    /// Drive one run to a terminal state. The handle's record is the
    /// single source of truth; this task is its only writer.
    pub async fn execute(&self, run: &RunHandle, cancel: &CancelFlag) {
        let (id, meeting_id) = {
            let r = run.read().await;
            (r.id, r.meeting_id.clone())
        };

        match self.run_stages(run, cancel, &meeting_id).await {
            Ok(results) => {
                let mut r = run.write().await;
                if r.status != AnalysisStatus::Processing {
                    return;
                }
                r.status = AnalysisStatus::Completed;
                r.progress = 100;
                r.completed_at = Some(Utc::now());
                r.results = Some(results);
                info!(analysis_id = %id, meeting_id = %meeting_id, "analysis completed");
                let mut event = ProgressEvent::new(
                    id,
                    meeting_id,
                    100,
                    "completed",
                    "Analysis complete",
                );
                event.moments_found =
                    r.results.as_ref().map(|res| res.selected_moments.len());
                event.cost_savings = r.results.as_ref().map(|res| res.cost_reduction);
                self.publisher.publish(event);
            }
            Err(EngineError::Cancelled) => {
                // cancel() already wrote the terminal state
                info!(analysis_id = %id, "analysis cancelled");
            }
            Err(err) => {
                warn!(analysis_id = %id, error = %err, "analysis failed");
                let mut r = run.write().await;
                if r.status == AnalysisStatus::Processing {
                    r.status = AnalysisStatus::Failed;
                    r.completed_at = Some(Utc::now());
                    r.error = Some(err.to_string());
                }
            }
        }
    }

    async fn run_stages(
        &self,
        run: &RunHandle,
        cancel: &CancelFlag,
        meeting_id: &str,
    ) -> Result<AnalysisResults, EngineError> {
        let config = run.read().await.config.clone();

        self.advance(run, cancel, PipelineStage::Initialization, None, None)
            .await?;
        let duration = self
            .source
            .duration(meeting_id)
            .map_err(|e| stage_failure(PipelineStage::Initialization, e))?;
        tokio::task::yield_now().await;

        self.advance(run, cancel, PipelineStage::ChunkProcessing, None, None)
            .await?;
        let chunks: Vec<ChunkSpan> = Chunker::new(duration, &config).collect();
        debug!(meeting_id, chunks = chunks.len(), "chunked timeline");
        tokio::task::yield_now().await;

        // Signal extraction is the external computation; the stage
        // suspends cooperatively while waiting on it.
        let windows = self
            .source
            .signals(meeting_id)
            .map_err(|e| stage_failure(PipelineStage::MomentDetection, e))?;
        let scorer = MomentScorer::new(config, self.policy.clone());
        let detected = scorer.detect(chunks.into_iter(), &windows);
        self.advance(
            run,
            cancel,
            PipelineStage::MomentDetection,
            Some(detected.len()),
            None,
        )
        .await?;

        let selected = scorer.select(&detected, duration);
        let analyzed_duration: f64 = selected.iter().map(|m| m.duration()).sum();
        let cost_reduction = if duration > 0.0 {
            (1.0 - analyzed_duration / duration).clamp(0.0, 1.0)
        } else {
            0.0
        };
        self.advance(
            run,
            cancel,
            PipelineStage::PmAnalysis,
            None,
            Some(cost_reduction),
        )
        .await?;
        let pm_analysis = self.deriver.derive(&selected);

        self.advance(run, cancel, PipelineStage::Finalization, None, None)
            .await?;
        let quality_score = scorer.quality_score(&selected, &detected, duration);

        Ok(AnalysisResults {
            cost_reduction,
            quality_score,
            analyzed_duration,
            original_duration: duration,
            selected_moments: selected,
            pm_analysis,
        })
    }

    /// Enter a stage: bail out if cancelled, raise progress (never
    /// lower it), publish the stage event.
    async fn advance(
        &self,
        run: &RunHandle,
        cancel: &CancelFlag,
        stage: PipelineStage,
        moments_found: Option<usize>,
        cost_savings: Option<f64>,
    ) -> Result<(), EngineError> {
        if cancel.is_cancelled() {
            return Err(EngineError::Cancelled);
        }
        let (id, meeting_id, progress) = {
            let mut r = run.write().await;
            if r.status != AnalysisStatus::Processing {
                return Err(EngineError::Cancelled);
            }
            r.progress = r.progress.max(stage.progress());
            (r.id, r.meeting_id.clone(), r.progress)
        };
        let mut event =
            ProgressEvent::new(id, meeting_id, progress, stage.name(), stage.message());
        event.moments_found = moments_found;
        event.cost_savings = cost_savings;
        self.publisher.publish(event);
        Ok(())
    }
}

fn stage_failure(stage: PipelineStage, err: EngineError) -> EngineError {
    EngineError::StageFailure {
        stage: stage.name().to_string(),
        message: err.to_string(),
    }
}
