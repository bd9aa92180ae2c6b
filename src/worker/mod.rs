use std::sync::Arc;

use async_trait::async_trait;
use chrono::Utc;
use kameo::actor::ActorRef;
use kameo::error::Infallible;
use kameo::message::{Context, Message};
use kameo::reply::{Reply, ReplyError};
use kameo::Actor;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::finance::FinancialCalculator;
use crate::integrations::ContractUploader;
use crate::metrics::Metrics;
use crate::store::OrderStore;
use crate::utils::{retry_with_backoff, RetryConfig, RetryResult};

mod dlq;

pub use dlq::{DeadLetter, DeadLetterQueue, DlqStats};

// ============================================================================
// Order Worker - Background jobs deferred out of the request path
// ============================================================================
//
// Responsibilities:
// - Recompute order totals when recompute is deferred
// - Upload contract documents when a contract number is set
// - Retry each job with exponential backoff
// - Hand exhausted jobs to the dead letter queue
//
// Jobs are safe to run more than once.
//
// ============================================================================

// ============================================================================
// Messages
// ============================================================================

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "job", rename_all = "snake_case")]
pub enum Job {
    RecomputeTotals { order_id: Uuid, force: bool },
    UploadContract { order_id: Uuid },
}

impl Job {
    pub fn order_id(&self) -> Uuid {
        match self {
            Job::RecomputeTotals { order_id, .. } | Job::UploadContract { order_id } => *order_id,
        }
    }

    pub fn kind(&self) -> &'static str {
        match self {
            Job::RecomputeTotals { .. } => "recompute_totals",
            Job::UploadContract { .. } => "upload_contract",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum JobOutcome {
    Completed,
    DeadLettered,
}

impl Reply for JobOutcome {
    type Ok = Self;
    type Error = Infallible;
    type Value = Self;

    fn to_result(self) -> Result<Self, Infallible> {
        Ok(self)
    }

    fn into_any_err(self) -> Option<Box<dyn ReplyError>> {
        None
    }

    fn into_value(self) -> Self::Value {
        self
    }
}

#[derive(Debug, thiserror::Error)]
pub enum DispatchError {
    #[error("background worker unavailable")]
    Unavailable,
}

/// Fire-and-forget hand-off of background jobs.
#[async_trait]
pub trait JobDispatcher: Send + Sync {
    async fn dispatch(&self, job: Job) -> Result<(), DispatchError>;
}

// ============================================================================
// Order Worker Actor
// ============================================================================

pub struct OrderWorker {
    store: Arc<dyn OrderStore>,
    calculator: Arc<FinancialCalculator>,
    uploader: Arc<dyn ContractUploader>,
    dlq: DeadLetterQueue,
    retry: RetryConfig,
    metrics: Arc<Metrics>,
}

impl OrderWorker {
    pub fn new(
        store: Arc<dyn OrderStore>,
        calculator: Arc<FinancialCalculator>,
        uploader: Arc<dyn ContractUploader>,
        dlq: DeadLetterQueue,
        retry: RetryConfig,
        metrics: Arc<Metrics>,
    ) -> Self {
        Self {
            store,
            calculator,
            uploader,
            dlq,
            retry,
            metrics,
        }
    }

    async fn run_once(&self, job: &Job) -> anyhow::Result<()> {
        match job {
            Job::RecomputeTotals { order_id, force } => {
                let outcome = self.calculator.recompute(*order_id, *force).await?;
                tracing::debug!(order_id = %order_id, ?outcome, "Deferred recompute finished");
            }
            Job::UploadContract { order_id } => {
                let order = self.store.require_order(*order_id).await?;
                let key = self.uploader.upload_contract(&order).await?;
                tracing::info!(order_id = %order_id, key = %key, "Contract uploaded");
            }
        }
        Ok(())
    }

    /// Run `job` with retries; exhausted jobs go to the dead letter queue.
    pub async fn process(&self, job: &Job) -> JobOutcome {
        let first_failed_at = Utc::now();
        let result = retry_with_backoff(&self.retry, job.kind(), |attempt| {
            if attempt > 1 {
                self.metrics.record_retry_attempt(job.kind(), attempt);
            }
            self.run_once(job)
        })
        .await;

        match result {
            RetryResult::Success(()) => JobOutcome::Completed,
            RetryResult::Failed(e) => {
                self.metrics.record_job_failed(job.kind());
                self.metrics.record_dlq_message(job.kind());
                self.dlq
                    .push(DeadLetter {
                        id: Uuid::new_v4(),
                        order_id: job.order_id(),
                        job_type: job.kind().to_string(),
                        payload: serde_json::to_string(job).unwrap_or_default(),
                        error_message: e.to_string(),
                        failure_count: self.retry.max_attempts,
                        first_failed_at,
                        last_failed_at: Utc::now(),
                    })
                    .await;
                JobOutcome::DeadLettered
            }
        }
    }
}

impl Actor for OrderWorker {
    type Args = Self;
    type Error = Infallible;

    async fn on_start(state: Self::Args, _actor_ref: ActorRef<Self>) -> Result<Self, Self::Error> {
        tracing::info!(max_attempts = state.retry.max_attempts, "OrderWorker started");
        Ok(state)
    }
}

impl Message<Job> for OrderWorker {
    type Reply = JobOutcome;

    async fn handle(&mut self, job: Job, _ctx: &mut Context<Self, Self::Reply>) -> Self::Reply {
        tracing::debug!(order_id = %job.order_id(), job = job.kind(), "Processing job");
        self.process(&job).await
    }
}

/// Start the worker actor.
pub fn spawn_worker(worker: OrderWorker) -> ActorRef<OrderWorker> {
    OrderWorker::spawn(worker)
}

/// Dispatches jobs to a running [`OrderWorker`].
#[derive(Clone)]
pub struct WorkerDispatcher {
    worker: ActorRef<OrderWorker>,
    metrics: Arc<Metrics>,
}

impl WorkerDispatcher {
    pub fn new(worker: ActorRef<OrderWorker>, metrics: Arc<Metrics>) -> Self {
        Self { worker, metrics }
    }
}

#[async_trait]
impl JobDispatcher for WorkerDispatcher {
    async fn dispatch(&self, job: Job) -> Result<(), DispatchError> {
        let kind = job.kind();
        let order_id = job.order_id();
        self.worker
            .tell(job)
            .await
            .map_err(|_| DispatchError::Unavailable)?;
        self.metrics.record_job_dispatched(kind);
        tracing::debug!(order_id = %order_id, job = kind, "Job dispatched");
        Ok(())
    }
}

// ============================================================================
// Unit Tests
// ============================================================================
