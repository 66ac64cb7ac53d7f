//! Job state persistence.
//!
//! The [`JobStateStore`] trait tracks the lifecycle of timeline builds and
//! stores their results. Backends:
//!
//! | Backend | Provider | Serialization of writers |
//! |---------|----------|--------------------------|
//! | [`InMemoryJobStore`] | tests | single mutex |
//! | [`SqliteJobStore`] | `local` | `UPDATE … WHERE status = ?` |
//! | [`DynamoJobStore`] | `aws` | `ConditionExpression` on status |
//!
//! Every backend enforces the same transition rule
//! ([`JobStatus::can_transition_to`]) and performs the status check and the
//! write as one compare-and-swap, so two writers racing on the same job
//! cannot both succeed.

pub mod dynamo;
pub mod memory;
pub mod sqlite;

pub use dynamo::DynamoJobStore;
pub use memory::InMemoryJobStore;
pub use sqlite::SqliteJobStore;

use async_trait::async_trait;
use std::sync::Arc;

use crate::config::Config;
use crate::error::{ConfigurationError, JobStoreError};
use crate::models::{AsyncJob, JobStatus, Timeline};
use crate::provider::{Capability, CloudProvider};

/// A single status change, with the payload that must land atomically with it.
#[derive(Debug, Clone, Copy)]
pub struct Transition<'a> {
    pub to: JobStatus,
    pub timeline: Option<&'a Timeline>,
    pub error: Option<&'a str>,
}

/// Abstract persistence for [`AsyncJob`]s.
///
/// Backends implement [`create_job`](JobStateStore::create_job),
/// [`get_job`](JobStateStore::get_job) and the compare-and-swap primitive
/// [`apply_transition`](JobStateStore::apply_transition). The lifecycle
/// operations are provided on top of it.
///
/// A job that reaches COMPLETED always carries a timeline: completing via
/// [`update_job_status`](JobStateStore::update_job_status) attaches an
/// empty one.
#[async_trait]
pub trait JobStateStore: Send + Sync {
    /// Backend identifier (e.g. `"sqlite"`, `"dynamodb"`).
    fn backend(&self) -> &str;

    /// Persist a new PENDING job.
    async fn create_job(
        &self,
        document_id: &str,
        user_id: Option<&str>,
    ) -> Result<AsyncJob, JobStoreError>;

    async fn get_job(&self, job_id: &str) -> Result<Option<AsyncJob>, JobStoreError>;

    /// Move the job to `transition.to` if the rule allows it, writing the
    /// timeline and error in the same operation. Returns the updated job.
    async fn apply_transition(
        &self,
        job_id: &str,
        transition: Transition<'_>,
    ) -> Result<AsyncJob, JobStoreError>;

    async fn update_job_status(
        &self,
        job_id: &str,
        status: JobStatus,
    ) -> Result<AsyncJob, JobStoreError> {
        self.apply_transition(
            job_id,
            Transition {
                to: status,
                timeline: None,
                error: None,
            },
        )
        .await
    }

    /// Persist the result and set a terminal status in one logical write.
    ///
    /// A second call on an already-finished job, or a non-terminal
    /// `final_status`, fails with [`JobStoreError::InvalidTransition`] and
    /// leaves the record untouched.
    async fn store_timeline(
        &self,
        job_id: &str,
        timeline: &Timeline,
        final_status: JobStatus,
    ) -> Result<AsyncJob, JobStoreError> {
        if !final_status.is_terminal() {
            let current = self
                .get_job(job_id)
                .await?
                .ok_or_else(|| JobStoreError::NotFound(job_id.to_string()))?;
            return Err(JobStoreError::InvalidTransition {
                job_id: job_id.to_string(),
                from: current.status,
                to: final_status,
            });
        }
        self.apply_transition(
            job_id,
            Transition {
                to: final_status,
                timeline: Some(timeline),
                error: None,
            },
        )
        .await
    }

    /// Fail a RUNNING job, keeping an error summary and no timeline.
    async fn record_failure(&self, job_id: &str, error: &str) -> Result<AsyncJob, JobStoreError> {
        self.apply_transition(
            job_id,
            Transition {
                to: JobStatus::Failed,
                timeline: None,
                error: Some(error),
            },
        )
        .await
    }
}

/// Reject any move other than PENDING→RUNNING, RUNNING→COMPLETED, RUNNING→FAILED.
pub fn check_transition(job_id: &str, from: JobStatus, to: JobStatus) -> Result<(), JobStoreError> {
    if from.can_transition_to(to) {
        Ok(())
    } else {
        Err(JobStoreError::InvalidTransition {
            job_id: job_id.to_string(),
            from,
            to,
        })
    }
}

/// The timeline to persist for a transition, if any.
fn timeline_for(job: &AsyncJob, transition: &Transition<'_>) -> Option<Timeline> {
    match (transition.timeline, transition.to) {
        (Some(t), _) => Some(t.clone()),
        (None, JobStatus::Completed) => Some(Timeline::empty(&job.document_id)),
        (None, _) => None,
    }
}

/// Create the [`JobStateStore`] for the given provider.
///
/// Azure has no job store; asking for one fails with
/// [`ConfigurationError::NotImplemented`].
pub async fn create_job_store(
    provider: CloudProvider,
    config: &Config,
) -> Result<Arc<dyn JobStateStore>, ConfigurationError> {
    if !provider.supports(Capability::JobState) {
        return Err(ConfigurationError::NotImplemented {
            provider,
            capability: Capability::JobState,
        });
    }

    match provider {
        CloudProvider::Local => {
            let store = SqliteJobStore::connect(&config.local.db_path)
                .await
                .map_err(|e| ConfigurationError::Initialization {
                    capability: Capability::JobState,
                    message: e.to_string(),
                })?;
            Ok(Arc::new(store))
        }
        CloudProvider::Aws => Ok(Arc::new(DynamoJobStore::new(&config.aws))),
        CloudProvider::Azure => Err(ConfigurationError::NotImplemented {
            provider,
            capability: Capability::JobState,
        }),
    }
}
