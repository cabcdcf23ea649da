//! Public facade tying configuration, analysis, batching, analytics,
//! and export together behind one async API.
//!
//! The engine owns the run and batch registries. Every read is scoped
//! to the requesting user; a run belonging to someone else is
//! indistinguishable from one that does not exist.

use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::{broadcast, RwLock};
use tracing::info;
use uuid::Uuid;

use crate::analysis::{
    AnalysisPipeline, AnalysisRun, CancelFlag, ProgressPublisher, RunHandle,
};
use crate::analytics::{Analytics, AnalyticsAggregator, TimeWindow};
use crate::batch::{BatchHandle, BatchMember, BatchOrchestrator, BatchRun};
use crate::config::{ConfigOverrides, ConfigRegistry, SamplingConfig};
use crate::cost::{CostEstimator, DEFAULT_PER_MEETING_COST_USD};
use crate::export::{ExportArtifact, ExportOptions, Exporter};
use crate::insights::{InsightDeriver, PmInsights};
use crate::protocol::{
    AnalysisStatus, BatchProgressEvent, CommunicationType, CostEstimate, CriticalMoment,
    MomentReason, Priority, ProgressEvent,
};
use crate::sampling::ScoringPolicy;
use crate::signal::MeetingSource;
use crate::{EngineError, Result};

/// Tunables for an [`Engine`] instance.
#[derive(Debug, Clone)]
pub struct EngineConfig {
    /// Concurrent analyses across all batches
    pub worker_pool_size: usize,
    /// Broadcast channel capacity for progress events
    pub event_capacity: usize,
    /// Full-analysis cost per meeting used in estimates, USD
    pub per_meeting_base_cost: f64,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            worker_pool_size: 8,
            event_capacity: 1024,
            per_meeting_base_cost: DEFAULT_PER_MEETING_COST_USD,
        }
    }
}

/// Optional narrowing of a moments query.
#[derive(Debug, Clone, Default)]
pub struct MomentFilter {
    pub reason: Option<MomentReason>,
    pub communication_type: Option<CommunicationType>,
}

impl MomentFilter {
    fn matches(&self, moment: &CriticalMoment) -> bool {
        if let Some(reason) = self.reason {
            if moment.reason != reason {
                return false;
            }
        }
        if let Some(communication_type) = self.communication_type {
            match &moment.pm_specific {
                Some(pm) if pm.communication_type == communication_type => {}
                _ => return false,
            }
        }
        true
    }
}

/// Filtered view over a completed run's selected moments.
#[derive(Debug, Clone)]
pub struct CriticalMomentsView {
    pub moments: Vec<CriticalMoment>,
    pub total_moments: usize,
    pub total_duration: f64,
}

struct RunEntry {
    run: RunHandle,
    cancel: CancelFlag,
}

struct BatchEntry {
    batch: BatchHandle,
    members: Vec<BatchMember>,
}

/// The smart sampling engine.
pub struct Engine {
    source: Arc<dyn MeetingSource>,
    pipeline: Arc<AnalysisPipeline>,
    orchestrator: BatchOrchestrator,
    runs: RwLock<HashMap<Uuid, RunEntry>>,
    batches: RwLock<HashMap<Uuid, BatchEntry>>,
    per_meeting_base_cost: f64,
}

impl Engine {
    pub fn new(source: Arc<dyn MeetingSource>, config: EngineConfig) -> Self {
        let pipeline = Arc::new(AnalysisPipeline::new(
            Arc::clone(&source),
            InsightDeriver::default(),
            ScoringPolicy::default(),
            ProgressPublisher::new(config.event_capacity),
        ));
        let orchestrator = BatchOrchestrator::new(
            Arc::clone(&pipeline),
            Arc::clone(&source),
            config.worker_pool_size,
            config.per_meeting_base_cost,
            config.event_capacity,
        );
        Self {
            source,
            pipeline,
            orchestrator,
            runs: RwLock::new(HashMap::new()),
            batches: RwLock::new(HashMap::new()),
            per_meeting_base_cost: config.per_meeting_base_cost,
        }
    }

    /// The available sampling presets.
    pub fn list_configs(&self) -> &'static [SamplingConfig] {
        ConfigRegistry::list()
    }

    pub fn subscribe_progress(&self) -> broadcast::Receiver<ProgressEvent> {
        self.pipeline.publisher().subscribe()
    }

    pub fn subscribe_batch_progress(&self) -> broadcast::Receiver<BatchProgressEvent> {
        self.orchestrator.subscribe()
    }

    /// Start one analysis. Config and meeting are validated before any
    /// run record exists, so a failed start leaves no trace.
    pub async fn start_analysis(
        &self,
        meeting_id: &str,
        user_id: &str,
        config_name: &str,
        overrides: Option<ConfigOverrides>,
        priority: Option<Priority>,
    ) -> Result<(AnalysisRun, CostEstimate)> {
        let config = ConfigRegistry::resolve(config_name, overrides.as_ref())?;
        self.source.duration(meeting_id)?;
        let estimate = CostEstimator::estimate(
            1,
            self.per_meeting_base_cost,
            config.sampling_ratio,
        )?;

        let run: RunHandle = Arc::new(RwLock::new(
            AnalysisRun::new(meeting_id.to_string(), user_id.to_string(), config)
                .with_priority(priority.unwrap_or_default()),
        ));
        let cancel = CancelFlag::default();
        let snapshot = run.read().await.clone();
        self.runs.write().await.insert(
            snapshot.id,
            RunEntry {
                run: Arc::clone(&run),
                cancel: cancel.clone(),
            },
        );
        info!(
            analysis_id = %snapshot.id,
            meeting_id,
            config = %snapshot.config.name,
            "analysis started"
        );

        let pipeline = Arc::clone(&self.pipeline);
        tokio::spawn(async move {
            pipeline.execute(&run, &cancel).await;
        });
        Ok((snapshot, estimate))
    }

    /// Snapshot of a run, scoped to its owner.
    pub async fn get_analysis(&self, analysis_id: Uuid, user_id: &str) -> Result<AnalysisRun> {
        let runs = self.runs.read().await;
        let entry = runs
            .get(&analysis_id)
            .ok_or_else(|| EngineError::NotFound(format!("analysis {analysis_id}")))?;
        let run = entry.run.read().await;
        if run.user_id != user_id {
            return Err(EngineError::NotFound(format!("analysis {analysis_id}")));
        }
        Ok(run.clone())
    }

    /// Selected moments of a completed run, optionally filtered.
    pub async fn get_critical_moments(
        &self,
        analysis_id: Uuid,
        user_id: &str,
        filter: &MomentFilter,
    ) -> Result<CriticalMomentsView> {
        let run = self.get_analysis(analysis_id, user_id).await?;
        let results = run.results.ok_or_else(|| {
            EngineError::NotFound(format!("results for analysis {analysis_id}"))
        })?;
        let moments: Vec<CriticalMoment> = results
            .selected_moments
            .into_iter()
            .filter(|m| filter.matches(m))
            .collect();
        let total_duration = moments.iter().map(CriticalMoment::duration).sum();
        Ok(CriticalMomentsView {
            total_moments: moments.len(),
            total_duration,
            moments,
        })
    }

    pub async fn get_pm_insights(&self, analysis_id: Uuid, user_id: &str) -> Result<PmInsights> {
        let run = self.get_analysis(analysis_id, user_id).await?;
        run.results.map(|r| r.pm_analysis).ok_or_else(|| {
            EngineError::NotFound(format!("results for analysis {analysis_id}"))
        })
    }

    pub async fn export_analysis(
        &self,
        analysis_id: Uuid,
        user_id: &str,
        options: &ExportOptions,
    ) -> Result<ExportArtifact> {
        let run = self.get_analysis(analysis_id, user_id).await?;
        if run.results.is_none() {
            return Err(EngineError::NotFound(format!(
                "results for analysis {analysis_id}"
            )));
        }
        Exporter::export(&run, options)
    }

    /// Usage analytics over the user's completed runs in the window.
    pub async fn get_analytics(&self, user_id: &str, window: &TimeWindow) -> Result<Analytics> {
        let runs = self.runs.read().await;
        let mut owned = Vec::new();
        for entry in runs.values() {
            let run = entry.run.read().await;
            if run.user_id == user_id {
                owned.push(run.clone());
            }
        }
        let aggregator = AnalyticsAggregator::new(self.per_meeting_base_cost);
        Ok(aggregator.summarize(&owned, window))
    }

    /// Request cancellation of a run. Terminal runs are untouched;
    /// cancelling one is a no-op that returns the final snapshot.
    pub async fn cancel_analysis(&self, analysis_id: Uuid, user_id: &str) -> Result<AnalysisRun> {
        let runs = self.runs.read().await;
        let entry = runs
            .get(&analysis_id)
            .ok_or_else(|| EngineError::NotFound(format!("analysis {analysis_id}")))?;
        let mut run = entry.run.write().await;
        if run.user_id != user_id {
            return Err(EngineError::NotFound(format!("analysis {analysis_id}")));
        }
        if run.status == AnalysisStatus::Processing {
            entry.cancel.cancel();
            run.status = AnalysisStatus::Failed;
            run.completed_at = Some(chrono::Utc::now());
            run.error = Some(EngineError::Cancelled.to_string());
            info!(analysis_id = %analysis_id, "analysis cancelled");
        }
        Ok(run.clone())
    }

    /// Launch a batch of analyses sharing one config. Member runs are
    /// registered individually and can be queried like any other run.
    pub async fn start_batch(
        &self,
        meeting_ids: Vec<String>,
        user_id: &str,
        config_name: &str,
        overrides: Option<ConfigOverrides>,
        priority: Option<Priority>,
    ) -> Result<BatchRun> {
        let config = ConfigRegistry::resolve(config_name, overrides.as_ref())?;
        let (batch, members) = self
            .orchestrator
            .start(meeting_ids, user_id, config, priority.unwrap_or_default())
            .await?;

        {
            let mut runs = self.runs.write().await;
            for member in &members {
                let id = member.run.read().await.id;
                runs.insert(
                    id,
                    RunEntry {
                        run: Arc::clone(&member.run),
                        cancel: member.cancel.clone(),
                    },
                );
            }
        }
        let snapshot = batch.read().await.clone();
        self.batches
            .write()
            .await
            .insert(snapshot.id, BatchEntry { batch, members });
        Ok(snapshot)
    }

    pub async fn get_batch(&self, batch_id: Uuid, user_id: &str) -> Result<BatchRun> {
        let batches = self.batches.read().await;
        let entry = batches
            .get(&batch_id)
            .ok_or_else(|| EngineError::NotFound(format!("batch {batch_id}")))?;
        let batch = entry.batch.read().await;
        if batch.user_id != user_id {
            return Err(EngineError::NotFound(format!("batch {batch_id}")));
        }
        Ok(batch.clone())
    }

    /// Cancel every still-processing member of a batch.
    pub async fn cancel_batch(&self, batch_id: Uuid, user_id: &str) -> Result<BatchRun> {
        let batches = self.batches.read().await;
        let entry = batches
            .get(&batch_id)
            .ok_or_else(|| EngineError::NotFound(format!("batch {batch_id}")))?;
        {
            let batch = entry.batch.read().await;
            if batch.user_id != user_id {
                return Err(EngineError::NotFound(format!("batch {batch_id}")));
            }
        }
        BatchOrchestrator::cancel(&entry.batch, &entry.members).await;
        let snapshot = entry.batch.read().await.clone();
        Ok(snapshot)
    }

    /// Standalone cost projection, no run created.
    pub fn estimate_cost(
        &self,
        meeting_count: usize,
        config_name: &str,
        overrides: Option<ConfigOverrides>,
    ) -> Result<CostEstimate> {
        let config = ConfigRegistry::resolve(config_name, overrides.as_ref())?;
        CostEstimator::estimate(
            meeting_count,
            self.per_meeting_base_cost,
            config.sampling_ratio,
        )
    }
}
