//! Guarded job status changes.
//!
//! Every method reads the job, validates the change and writes it back inside
//! one unit of work, so concurrent drivers acting on the same job serialise on
//! the transaction instead of overwriting each other.

use std::sync::Arc;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use crate::database::models::{JobDbModel, JobField};
use crate::database::repositories::Repository;
use crate::database::time::{elapsed_ms, now_ms};
use crate::database::{TxScope, UnitOfWork};
use crate::domain::{JobStatus, RetryPolicy};
use crate::{Error, Result};

use super::conversion::ensure_conversion_kept;

/// Artifacts produced by a pipeline stage. Unset fields leave the stored
/// value untouched.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct StageOutput {
    pub veo_video_url: Option<String>,
    pub veo_video_key: Option<String>,
    pub veo_duration: Option<i64>,
    pub que_job_id: Option<String>,
    pub que_job_status: Option<String>,
    pub final_video_url: Option<String>,
    pub final_video_key: Option<String>,
    pub final_video_duration: Option<i64>,
    pub final_video_size: Option<i64>,
    pub signed_url: Option<String>,
    pub signed_url_expiry: Option<i64>,
}

impl StageOutput {
    pub fn none() -> Self {
        Self::default()
    }

    fn apply(self, job: &mut JobDbModel) {
        fn set<T>(slot: &mut Option<T>, value: Option<T>) {
            if value.is_some() {
                *slot = value;
            }
        }

        set(&mut job.veo_video_url, self.veo_video_url);
        set(&mut job.veo_video_key, self.veo_video_key);
        set(&mut job.veo_duration, self.veo_duration);
        set(&mut job.que_job_id, self.que_job_id);
        set(&mut job.que_job_status, self.que_job_status);
        set(&mut job.final_video_url, self.final_video_url);
        set(&mut job.final_video_key, self.final_video_key);
        set(&mut job.final_video_duration, self.final_video_duration);
        set(&mut job.final_video_size, self.final_video_size);
        set(&mut job.signed_url, self.signed_url);
        set(&mut job.signed_url_expiry, self.signed_url_expiry);
    }
}

/// What became of a job after a stage failure was recorded.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StageFailureOutcome {
    /// The stage should be re-attempted after `delay`. `attempt` is the new
    /// `retry_count`.
    Retry { attempt: u32, delay: Duration },
    /// Retries are exhausted and the job is now `FAILED`.
    Failed,
}

/// Orchestrator-side guard for job status writes.
pub struct JobLifecycleService<R>
where
    R: Repository<Entity = JobDbModel, Field = JobField>,
{
    uow: UnitOfWork,
    jobs: Arc<R>,
}

impl<R> Clone for JobLifecycleService<R>
where
    R: Repository<Entity = JobDbModel, Field = JobField>,
{
    fn clone(&self) -> Self {
        Self {
            uow: self.uow.clone(),
            jobs: Arc::clone(&self.jobs),
        }
    }
}

impl<R> JobLifecycleService<R>
where
    R: Repository<Entity = JobDbModel, Field = JobField> + 'static,
{
    pub fn new(uow: UnitOfWork, jobs: Arc<R>) -> Self {
        Self { uow, jobs }
    }

    pub fn repository(&self) -> &Arc<R> {
        &self.jobs
    }

    /// Store a new submission as `RECEIVED` and return its id.
    pub async fn submit(&self, mut job: JobDbModel) -> Result<String> {
        let now = now_ms();
        job.set_status(JobStatus::Received);
        job.retry_count = 0;
        job.created_at = now;
        job.updated_at = now;

        let jobs = Arc::clone(&self.jobs);
        let id = self
            .uow
            .run_default(move |conn| {
                Box::pin(async move { jobs.create(&job, TxScope::from(&mut *conn)).await })
            })
            .await?;

        info!(job_id = %id, "Job submitted");
        Ok(id)
    }

    /// Move a job to `target`, recording the stage's artifacts.
    ///
    /// Entering `PROCESSING` stamps `started_at`; entering `COMPLETED` stamps
    /// `completed_at` and `total_processing_time`. Keeping the current status
    /// rewrites artifacts in place, except on a terminal job whose record is
    /// final. Illegal moves fail with [`Error::InvalidStateTransition`] and
    /// nothing is written.
    pub async fn advance(
        &self,
        job_id: &str,
        target: JobStatus,
        output: StageOutput,
    ) -> Result<JobDbModel> {
        let jobs = Arc::clone(&self.jobs);
        let job_id = job_id.to_string();

        let job = self
            .uow
            .run_default(move |conn| {
                Box::pin(async move {
                    let stored = jobs.find_by_id(&job_id, TxScope::from(&mut *conn)).await?;
                    let current = stored.status()?;
                    if current.is_terminal() && target == current {
                        return Err(Error::InvalidStateTransition {
                            from: current.as_str().to_string(),
                            to: target.as_str().to_string(),
                        });
                    }
                    current.transition_to(target)?;

                    let mut job = stored.clone();
                    output.apply(&mut job);

                    let now = now_ms();
                    if target != current {
                        match target {
                            JobStatus::Processing => {
                                job.started_at.get_or_insert(now);
                            }
                            JobStatus::Completed => {
                                job.completed_at = Some(now);
                                let started = job.started_at.unwrap_or(job.created_at);
                                job.total_processing_time = Some(elapsed_ms(started, now));
                            }
                            _ => {}
                        }
                    }
                    job.set_status(target);
                    ensure_conversion_kept(&stored, &job)?;

                    jobs.update(&job, TxScope::from(&mut *conn)).await?;
                    jobs.find_by_id(&job_id, TxScope::from(&mut *conn)).await
                })
            })
            .await?;

        info!(job_id = %job.id, status = %job.status, "Job advanced");
        Ok(job)
    }

    /// Record that the current stage of a job failed.
    ///
    /// While `policy` allows another attempt the job keeps its status and its
    /// `retry_count` grows by one; after that it becomes `FAILED`. The error
    /// detail is stored either way. Terminal jobs are rejected.
    pub async fn record_stage_failure(
        &self,
        job_id: &str,
        message: impl Into<String>,
        stack: Option<String>,
        policy: &RetryPolicy,
    ) -> Result<StageFailureOutcome> {
        let jobs = Arc::clone(&self.jobs);
        let id = job_id.to_string();
        let message = message.into();
        let policy = policy.clone();

        let outcome = self
            .uow
            .run_default(move |conn| {
                Box::pin(async move {
                    let mut job = jobs.find_by_id(&id, TxScope::from(&mut *conn)).await?;
                    let current = job.status()?;
                    if current.is_terminal() {
                        return Err(Error::InvalidStateTransition {
                            from: current.as_str().to_string(),
                            to: JobStatus::Failed.as_str().to_string(),
                        });
                    }

                    job.error_message = Some(message);
                    job.error_stack = stack;

                    let attempts = u32::try_from(job.retry_count).unwrap_or(u32::MAX);
                    let outcome = if policy.should_retry(attempts) {
                        job.retry_count += 1;
                        StageFailureOutcome::Retry {
                            attempt: attempts + 1,
                            delay: policy.delay_for_attempt(attempts),
                        }
                    } else {
                        job.set_status(current.transition_to(JobStatus::Failed)?);
                        StageFailureOutcome::Failed
                    };

                    jobs.update(&job, TxScope::from(&mut *conn)).await?;
                    Ok(outcome)
                })
            })
            .await?;

        match outcome {
            StageFailureOutcome::Retry { attempt, delay } => {
                info!(
                    job_id = %job_id,
                    attempt,
                    delay_ms = delay.as_millis() as u64,
                    "Stage failed, retry scheduled"
                );
            }
            StageFailureOutcome::Failed => {
                warn!(job_id = %job_id, "Stage failed, retries exhausted");
            }
        }
        Ok(outcome)
    }

    /// Cancel a job that has not reached a terminal status. Cancelling an
    /// already cancelled job is rejected.
    pub async fn cancel(&self, job_id: &str) -> Result<JobDbModel> {
        self.advance(job_id, JobStatus::Cancelled, StageOutput::none())
            .await
    }

    /// Record that the completion email went out. The first timestamp is kept
    /// when called again.
    pub async fn mark_notified(&self, job_id: &str) -> Result<JobDbModel> {
        let jobs = Arc::clone(&self.jobs);
        let job_id = job_id.to_string();

        self.uow
            .run_default(move |conn| {
                Box::pin(async move {
                    let mut job = jobs.find_by_id(&job_id, TxScope::from(&mut *conn)).await?;
                    if job.status()? != JobStatus::Completed {
                        return Err(Error::validation(format!(
                            "job {} is {} and cannot be notified",
                            job.id, job.status
                        )));
                    }
                    if job.email_sent {
                        return Ok(job);
                    }

                    job.email_sent = true;
                    job.email_sent_at = Some(now_ms());
                    jobs.update(&job, TxScope::from(&mut *conn)).await?;
                    jobs.find_by_id(&job_id, TxScope::from(&mut *conn)).await
                })
            })
            .await
    }
}
