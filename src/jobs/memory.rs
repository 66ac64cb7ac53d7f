//! In-memory [`JobStateStore`] for tests and dry runs.
//!
//! All jobs live in one `HashMap` behind a `std::sync::Mutex`; the status
//! check and the write happen under the same lock.

use std::collections::HashMap;
use std::sync::{Mutex, MutexGuard};

use async_trait::async_trait;
use chrono::Utc;

use super::{check_transition, timeline_for, JobStateStore, Transition};
use crate::error::JobStoreError;
use crate::models::AsyncJob;

pub struct InMemoryJobStore {
    jobs: Mutex<HashMap<String, AsyncJob>>,
}

impl InMemoryJobStore {
    pub fn new() -> Self {
        Self {
            jobs: Mutex::new(HashMap::new()),
        }
    }

    /// Number of job records held.
    pub fn job_count(&self) -> usize {
        self.lock().map(|jobs| jobs.len()).unwrap_or(0)
    }

    fn lock(&self) -> Result<MutexGuard<'_, HashMap<String, AsyncJob>>, JobStoreError> {
        self.jobs
            .lock()
            .map_err(|_| JobStoreError::Backend("job table lock poisoned".to_string()))
    }
}

impl Default for InMemoryJobStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl JobStateStore for InMemoryJobStore {
    fn backend(&self) -> &str {
        "memory"
    }

    async fn create_job(
        &self,
        document_id: &str,
        user_id: Option<&str>,
    ) -> Result<AsyncJob, JobStoreError> {
        let job = AsyncJob::new(document_id, user_id);
        self.lock()?.insert(job.job_id.clone(), job.clone());
        Ok(job)
    }

    async fn get_job(&self, job_id: &str) -> Result<Option<AsyncJob>, JobStoreError> {
        Ok(self.lock()?.get(job_id).cloned())
    }

    async fn apply_transition(
        &self,
        job_id: &str,
        transition: Transition<'_>,
    ) -> Result<AsyncJob, JobStoreError> {
        let mut jobs = self.lock()?;
        let job = jobs
            .get_mut(job_id)
            .ok_or_else(|| JobStoreError::NotFound(job_id.to_string()))?;

        check_transition(job_id, job.status, transition.to)?;

        if let Some(timeline) = timeline_for(job, &transition) {
            job.timeline = Some(timeline);
        }
        if let Some(error) = transition.error {
            job.error = Some(error.to_string());
        }
        job.status = transition.to;
        job.updated_at = Utc::now();

        Ok(job.clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{JobStatus, Timeline};

    #[tokio::test]
    async fn test_full_lifecycle() {
        let store = InMemoryJobStore::new();
        let job = store.create_job("doc-1", Some("u1")).await.unwrap();
        assert_eq!(job.status, JobStatus::Pending);

        let job = store
            .update_job_status(&job.job_id, JobStatus::Running)
            .await
            .unwrap();
        assert_eq!(job.status, JobStatus::Running);

        let timeline = Timeline::empty("doc-1");
        let job = store
            .store_timeline(&job.job_id, &timeline, JobStatus::Completed)
            .await
            .unwrap();
        assert_eq!(job.status, JobStatus::Completed);
        assert_eq!(job.timeline, Some(timeline));
        assert!(job.updated_at >= job.created_at);
    }

    #[tokio::test]
    async fn test_double_completion_rejected_without_duplicate() {
        let store = InMemoryJobStore::new();
        let job = store.create_job("doc-1", None).await.unwrap();
        store
            .update_job_status(&job.job_id, JobStatus::Running)
            .await
            .unwrap();
        let timeline = Timeline::empty("doc-1");
        store
            .store_timeline(&job.job_id, &timeline, JobStatus::Completed)
            .await
            .unwrap();

        let err = store
            .store_timeline(&job.job_id, &timeline, JobStatus::Completed)
            .await
            .unwrap_err();
        assert!(matches!(err, JobStoreError::InvalidTransition { .. }));
        assert_eq!(store.job_count(), 1);
    }

    #[tokio::test]
    async fn test_failed_is_terminal() {
        let store = InMemoryJobStore::new();
        let job = store.create_job("doc-1", None).await.unwrap();
        store
            .update_job_status(&job.job_id, JobStatus::Running)
            .await
            .unwrap();
        let failed = store.record_failure(&job.job_id, "provider down").await.unwrap();
        assert_eq!(failed.status, JobStatus::Failed);
        assert_eq!(failed.error.as_deref(), Some("provider down"));
        assert!(failed.timeline.is_none());

        for status in [JobStatus::Pending, JobStatus::Running, JobStatus::Completed] {
            assert!(store.update_job_status(&job.job_id, status).await.is_err());
        }
    }

    #[tokio::test]
    async fn test_skipping_running_is_rejected() {
        let store = InMemoryJobStore::new();
        let job = store.create_job("doc-1", None).await.unwrap();
        let err = store
            .store_timeline(&job.job_id, &Timeline::empty("doc-1"), JobStatus::Completed)
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            JobStoreError::InvalidTransition {
                from: JobStatus::Pending,
                to: JobStatus::Completed,
                ..
            }
        ));
    }

    #[tokio::test]
    async fn test_unknown_job() {
        let store = InMemoryJobStore::new();
        assert!(store.get_job("missing").await.unwrap().is_none());
        let err = store
            .update_job_status("missing", JobStatus::Running)
            .await
            .unwrap_err();
        assert!(matches!(err, JobStoreError::NotFound(_)));
    }
}
