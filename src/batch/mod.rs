//! Concurrent orchestration of many analyses as one batch.
//!
//! A batch fans its meetings out over a bounded worker pool. Members
//! are isolated from each other: one failing run never aborts its
//! siblings, it only shows up in the failure count. The batch record
//! aggregates member progress and is the single source of truth for
//! batch status.

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tokio::sync::{broadcast, RwLock, Semaphore};
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::analysis::{AnalysisPipeline, AnalysisRun, CancelFlag, RunHandle};
use crate::config::SamplingConfig;
use crate::cost::CostEstimator;
use crate::protocol::{AnalysisStatus, BatchProgressEvent, BatchStatus, CostEstimate, Priority};
use crate::signal::MeetingSource;
use crate::{EngineError, Result, MAX_BATCH_SIZE};

/// Rough per-meeting wall-clock allowance used for the completion
/// estimate handed back at submission time.
pub const ESTIMATED_MINUTES_PER_MEETING: i64 = 2;

/// One batch submission and its aggregate state.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BatchRun {
    pub id: Uuid,
    pub user_id: String,
    pub status: BatchStatus,
    /// Mean of member-run progress, 0-100
    pub progress: f64,
    pub total_meetings: usize,
    pub completed_meetings: usize,
    pub failed_meetings: usize,
    pub config: SamplingConfig,
    pub priority: Priority,
    pub cost_estimate: CostEstimate,
    pub created_at: DateTime<Utc>,
    pub started_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
    pub estimated_completion: DateTime<Utc>,
    /// Member analysis ids, in submission order (duplicate meeting ids
    /// produce distinct runs)
    pub analysis_ids: Vec<Uuid>,
}

/// Shared handle to a batch's mutable record.
pub type BatchHandle = Arc<RwLock<BatchRun>>;

/// One member run plus its cancellation flag.
#[derive(Debug, Clone)]
pub struct BatchMember {
    pub run: RunHandle,
    pub cancel: CancelFlag,
}

/// Fans batches out over a shared worker pool and keeps their records
/// current as members finish.
pub struct BatchOrchestrator {
    pipeline: Arc<AnalysisPipeline>,
    source: Arc<dyn MeetingSource>,
    workers: Arc<Semaphore>,
    batch_tx: broadcast::Sender<BatchProgressEvent>,
    per_meeting_base_cost: f64,
}

impl BatchOrchestrator {
    pub fn new(
        pipeline: Arc<AnalysisPipeline>,
        source: Arc<dyn MeetingSource>,
        worker_pool_size: usize,
        per_meeting_base_cost: f64,
        event_capacity: usize,
    ) -> Self {
        let (batch_tx, _) = broadcast::channel(event_capacity);
        Self {
            pipeline,
            source,
            workers: Arc::new(Semaphore::new(worker_pool_size.max(1))),
            batch_tx,
            per_meeting_base_cost,
        }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<BatchProgressEvent> {
        self.batch_tx.subscribe()
    }

    /// Validate and launch a batch. All meeting ids are checked before
    /// any state is created, so a bad id rejects the whole submission.
    pub async fn start(
        &self,
        meeting_ids: Vec<String>,
        user_id: &str,
        config: SamplingConfig,
        priority: Priority,
    ) -> Result<(BatchHandle, Vec<BatchMember>)> {
        if meeting_ids.is_empty() {
            return Err(EngineError::InvalidConfiguration(
                "batch must contain at least one meeting".to_string(),
            ));
        }
        if meeting_ids.len() > MAX_BATCH_SIZE {
            return Err(EngineError::BatchSizeExceeded(meeting_ids.len()));
        }
        for meeting_id in &meeting_ids {
            self.source.duration(meeting_id)?;
        }
        let cost_estimate = CostEstimator::estimate(
            meeting_ids.len(),
            self.per_meeting_base_cost,
            config.sampling_ratio,
        )?;

        let total = meeting_ids.len();
        let now = Utc::now();
        let members: Vec<BatchMember> = meeting_ids
            .into_iter()
            .map(|meeting_id| BatchMember {
                run: Arc::new(RwLock::new(
                    AnalysisRun::new(meeting_id, user_id.to_string(), config.clone())
                        .with_priority(priority),
                )),
                cancel: CancelFlag::default(),
            })
            .collect();

        let mut analysis_ids = Vec::with_capacity(total);
        for member in &members {
            analysis_ids.push(member.run.read().await.id);
        }

        let batch: BatchHandle = Arc::new(RwLock::new(BatchRun {
            id: Uuid::new_v4(),
            user_id: user_id.to_string(),
            status: BatchStatus::Queued,
            progress: 0.0,
            total_meetings: total,
            completed_meetings: 0,
            failed_meetings: 0,
            config,
            priority,
            cost_estimate,
            created_at: now,
            started_at: None,
            completed_at: None,
            estimated_completion: now
                + Duration::minutes(ESTIMATED_MINUTES_PER_MEETING * total as i64),
            analysis_ids,
        }));

        let batch_id = batch.read().await.id;
        info!(batch_id = %batch_id, meetings = total, "batch accepted");
        self.supervise(Arc::clone(&batch), members.clone());
        Ok((batch, members))
    }

    /// Cancel the members of a batch that are still processing.
    /// Already-terminal members keep their outcome.
    pub async fn cancel(batch: &BatchHandle, members: &[BatchMember]) {
        let batch_id = batch.read().await.id;
        let mut cancelled = 0usize;
        for member in members {
            let mut run = member.run.write().await;
            if run.status == AnalysisStatus::Processing {
                member.cancel.cancel();
                run.status = AnalysisStatus::Failed;
                run.completed_at = Some(Utc::now());
                run.error = Some(EngineError::Cancelled.to_string());
                cancelled += 1;
            }
        }
        info!(batch_id = %batch_id, cancelled, "batch cancellation requested");
    }

    /// Spawn the member tasks and one supervisor that finalizes the
    /// batch record once every member is terminal.
    fn supervise(&self, batch: BatchHandle, members: Vec<BatchMember>) {
        let runs: Arc<Vec<RunHandle>> =
            Arc::new(members.iter().map(|m| Arc::clone(&m.run)).collect());
        let mut tasks = Vec::with_capacity(members.len());
        for member in members {
            let pipeline = Arc::clone(&self.pipeline);
            let workers = Arc::clone(&self.workers);
            let batch = Arc::clone(&batch);
            let runs = Arc::clone(&runs);
            let batch_tx = self.batch_tx.clone();
            tasks.push(tokio::spawn(async move {
                // Closed semaphore means shutdown; the member just
                // stays in whatever state cancellation left it.
                let Ok(_permit) = workers.acquire_owned().await else {
                    return;
                };
                {
                    let mut b = batch.write().await;
                    if b.status == BatchStatus::Queued {
                        b.status = BatchStatus::Processing;
                        b.started_at = Some(Utc::now());
                    }
                }
                pipeline.execute(&member.run, &member.cancel).await;
                let succeeded =
                    member.run.read().await.status == AnalysisStatus::Completed;
                let mean = mean_progress(&runs).await;
                let event = {
                    let mut b = batch.write().await;
                    if succeeded {
                        b.completed_meetings += 1;
                    } else {
                        b.failed_meetings += 1;
                    }
                    b.progress = mean;
                    let done = b.completed_meetings + b.failed_meetings;
                    BatchProgressEvent {
                        batch_id: b.id,
                        progress: mean,
                        completed_meetings: b.completed_meetings,
                        failed_meetings: b.failed_meetings,
                        total_meetings: b.total_meetings,
                        estimated_completion: b.estimated_completion,
                        message: format!(
                            "Processed {done} of {} meetings",
                            b.total_meetings
                        ),
                        timestamp: Utc::now(),
                    }
                };
                let _ = batch_tx.send(event);
            }));
        }

        let batch_tx = self.batch_tx.clone();
        tokio::spawn(async move {
            for outcome in futures::future::join_all(tasks).await {
                if let Err(err) = outcome {
                    warn!(error = %err, "batch member task panicked");
                }
            }
            let mean = mean_progress(&runs).await;
            let event = {
                let mut b = batch.write().await;
                // Every member terminal means the batch itself finished;
                // member failures stay visible in the count.
                b.status = BatchStatus::Completed;
                b.progress = mean;
                b.completed_at = Some(Utc::now());
                debug!(
                    batch_id = %b.id,
                    completed = b.completed_meetings,
                    failed = b.failed_meetings,
                    "batch finalized"
                );
                BatchProgressEvent {
                    batch_id: b.id,
                    progress: mean,
                    completed_meetings: b.completed_meetings,
                    failed_meetings: b.failed_meetings,
                    total_meetings: b.total_meetings,
                    estimated_completion: b.estimated_completion,
                    message: "Batch complete".to_string(),
                    timestamp: Utc::now(),
                }
            };
            let _ = batch_tx.send(event);
        });
    }
}

async fn mean_progress(runs: &[RunHandle]) -> f64 {
    if runs.is_empty() {
        return 0.0;
    }
    let mut sum = 0.0;
    for run in runs {
        sum += f64::from(run.read().await.progress);
    }
    sum / runs.len() as f64
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::analysis::ProgressPublisher;
    use crate::config::ConfigRegistry;
    use crate::insights::InsightDeriver;
    use crate::sampling::ScoringPolicy;
    use crate::signal::{SignalWindow, SyntheticMeetingSource};
    use std::time::Duration as StdDuration;

    fn orchestrator(source: Arc<SyntheticMeetingSource>) -> BatchOrchestrator {
        let pipeline = Arc::new(AnalysisPipeline::new(
            source.clone(),
            InsightDeriver::default(),
            ScoringPolicy::default(),
            ProgressPublisher::new(1024),
        ));
        BatchOrchestrator::new(pipeline, source, 4, 15.0, 1024)
    }

    fn balanced() -> SamplingConfig {
        ConfigRegistry::resolve("BALANCED", None).unwrap()
    }

    async fn wait_terminal(batch: &BatchHandle) -> BatchRun {
        for _ in 0..500 {
            {
                let b = batch.read().await;
                if matches!(b.status, BatchStatus::Completed | BatchStatus::Failed) {
                    return b.clone();
                }
            }
            tokio::time::sleep(StdDuration::from_millis(10)).await;
        }
        panic!("batch never reached a terminal state");
    }

    #[tokio::test]
    async fn test_batch_over_limit_is_rejected() {
        let source = Arc::new(SyntheticMeetingSource::new());
        for i in 0..101 {
            source.insert_meeting(&format!("m-{i}"), 600.0);
        }
        let orchestrator = orchestrator(source);
        let ids: Vec<String> = (0..101).map(|i| format!("m-{i}")).collect();
        let err = orchestrator
            .start(ids, "user-1", balanced(), Priority::default())
            .await
            .unwrap_err();
        match err {
            EngineError::BatchSizeExceeded(n) => assert_eq!(n, 101),
            other => panic!("expected BatchSizeExceeded, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_batch_at_limit_is_accepted() {
        let source = Arc::new(SyntheticMeetingSource::new());
        for i in 0..100 {
            source.insert_meeting(&format!("m-{i}"), 60.0);
        }
        let orchestrator = orchestrator(source);
        let ids: Vec<String> = (0..100).map(|i| format!("m-{i}")).collect();
        let (batch, members) = orchestrator
            .start(ids, "user-1", balanced(), Priority::default())
            .await
            .unwrap();
        assert_eq!(members.len(), 100);
        assert_eq!(batch.read().await.total_meetings, 100);
    }

    #[tokio::test]
    async fn test_unknown_meeting_rejects_whole_batch() {
        let source = Arc::new(SyntheticMeetingSource::new());
        source.insert_meeting("known", 600.0);
        let orchestrator = orchestrator(source);
        let err = orchestrator
            .start(
                vec!["known".to_string(), "missing".to_string()],
                "user-1",
                balanced(),
                Priority::default(),
            )
            .await
            .unwrap_err();
        assert!(matches!(err, EngineError::NotFound(_)));
    }

    #[tokio::test]
    async fn test_empty_batch_is_rejected() {
        let source = Arc::new(SyntheticMeetingSource::new());
        let orchestrator = orchestrator(source);
        let err = orchestrator
            .start(Vec::new(), "user-1", balanced(), Priority::default())
            .await
            .unwrap_err();
        assert!(matches!(err, EngineError::InvalidConfiguration(_)));
    }

    #[tokio::test]
    async fn test_batch_runs_all_members_to_completion() {
        let source = Arc::new(SyntheticMeetingSource::new());
        for i in 0..5 {
            source.insert_meeting(&format!("m-{i}"), 300.0);
        }
        let orchestrator = orchestrator(source);
        let ids: Vec<String> = (0..5).map(|i| format!("m-{i}")).collect();
        let (batch, members) = orchestrator
            .start(ids, "user-1", balanced(), Priority::default())
            .await
            .unwrap();

        let finished = wait_terminal(&batch).await;
        assert_eq!(finished.status, BatchStatus::Completed);
        assert_eq!(finished.completed_meetings, 5);
        assert_eq!(finished.failed_meetings, 0);
        assert_eq!(finished.progress, 100.0);
        for member in &members {
            assert_eq!(member.run.read().await.status, AnalysisStatus::Completed);
        }
    }

    struct FailingSignals {
        inner: SyntheticMeetingSource,
    }

    impl MeetingSource for FailingSignals {
        fn duration(&self, meeting_id: &str) -> crate::Result<f64> {
            self.inner.duration(meeting_id)
        }

        fn signals(&self, _meeting_id: &str) -> crate::Result<Vec<SignalWindow>> {
            Err(EngineError::StageFailure {
                stage: "transcription".to_string(),
                message: "backend unavailable".to_string(),
            })
        }
    }

    #[tokio::test]
    async fn test_batch_with_all_failed_members_still_completes() {
        let inner = SyntheticMeetingSource::new();
        inner.insert_meeting("m-0", 300.0);
        inner.insert_meeting("m-1", 300.0);
        let source = Arc::new(FailingSignals { inner });
        let pipeline = Arc::new(AnalysisPipeline::new(
            source.clone(),
            InsightDeriver::default(),
            ScoringPolicy::default(),
            ProgressPublisher::new(1024),
        ));
        let orchestrator = BatchOrchestrator::new(pipeline, source, 4, 15.0, 1024);
        let (batch, members) = orchestrator
            .start(
                vec!["m-0".to_string(), "m-1".to_string()],
                "user-1",
                balanced(),
                Priority::default(),
            )
            .await
            .unwrap();

        let finished = wait_terminal(&batch).await;
        // The batch finished even though every member failed
        assert_eq!(finished.status, BatchStatus::Completed);
        assert_eq!(finished.completed_meetings, 0);
        assert_eq!(finished.failed_meetings, 2);
        assert_eq!(
            finished.completed_meetings + finished.failed_meetings,
            finished.total_meetings
        );
        // Failed members stopped partway, so the aggregate stays below 100
        assert!(finished.progress < 100.0);
        for member in &members {
            assert_eq!(member.run.read().await.status, AnalysisStatus::Failed);
        }
    }

    #[tokio::test]
    async fn test_duplicate_meeting_ids_each_get_a_run() {
        let source = Arc::new(SyntheticMeetingSource::new());
        source.insert_meeting("repeat", 120.0);
        let orchestrator = orchestrator(source);
        let ids = vec!["repeat".to_string(), "repeat".to_string()];
        let (batch, members) = orchestrator
            .start(ids, "user-1", balanced(), Priority::default())
            .await
            .unwrap();

        let b = batch.read().await;
        assert_eq!(b.total_meetings, 2);
        assert_eq!(b.analysis_ids.len(), 2);
        assert_ne!(b.analysis_ids[0], b.analysis_ids[1]);
        drop(b);
        let finished = wait_terminal(&batch).await;
        assert_eq!(finished.completed_meetings, 2);
        assert_eq!(members.len(), 2);
    }

    #[tokio::test]
    async fn test_batch_cost_estimate_uses_config_ratio() {
        let source = Arc::new(SyntheticMeetingSource::new());
        for i in 0..4 {
            source.insert_meeting(&format!("m-{i}"), 600.0);
        }
        let orchestrator = orchestrator(source);
        let ids: Vec<String> = (0..4).map(|i| format!("m-{i}")).collect();
        let config = ConfigRegistry::resolve("COST_OPTIMIZED", None).unwrap();
        let (batch, _) = orchestrator
            .start(ids, "user-1", config, Priority::High)
            .await
            .unwrap();

        let b = batch.read().await;
        assert_eq!(b.priority, Priority::High);
        let estimate = b.cost_estimate.clone();
        assert_eq!(estimate.original_cost, 60.0);
        assert_eq!(estimate.optimized_cost, 15.0);
        assert_eq!(estimate.savings_percentage, 75.0);
    }

    #[tokio::test]
    async fn test_batch_progress_events_account_for_every_member() {
        let source = Arc::new(SyntheticMeetingSource::new());
        for i in 0..3 {
            source.insert_meeting(&format!("m-{i}"), 120.0);
        }
        let orchestrator = orchestrator(source);
        let mut rx = orchestrator.subscribe();
        let ids: Vec<String> = (0..3).map(|i| format!("m-{i}")).collect();
        let (batch, _) = orchestrator
            .start(ids, "user-1", balanced(), Priority::default())
            .await
            .unwrap();
        wait_terminal(&batch).await;

        let mut last = None;
        while let Ok(event) = rx.try_recv() {
            assert!(event.completed_meetings + event.failed_meetings <= event.total_meetings);
            last = Some(event);
        }
        let last = last.expect("no batch events published");
        assert_eq!(
            last.completed_meetings + last.failed_meetings,
            last.total_meetings
        );
        assert_eq!(last.progress, 100.0);
    }

    #[tokio::test]
    async fn test_cancel_spares_terminal_members() {
        let source = Arc::new(SyntheticMeetingSource::new());
        source.insert_meeting("m-0", 120.0);
        source.insert_meeting("m-1", 120.0);
        let orchestrator = orchestrator(source);
        let ids = vec!["m-0".to_string(), "m-1".to_string()];
        let (batch, members) = orchestrator
            .start(ids, "user-1", balanced(), Priority::default())
            .await
            .unwrap();

        // Let the batch finish, then cancel: nothing should change.
        let finished = wait_terminal(&batch).await;
        BatchOrchestrator::cancel(&batch, &members).await;
        for member in &members {
            assert_eq!(member.run.read().await.status, AnalysisStatus::Completed);
        }
        assert_eq!(batch.read().await.status, finished.status);
    }
}
