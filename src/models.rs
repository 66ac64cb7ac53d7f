//! Core data models shared by the job stores, the LLM layer, and the
//! timeline builder.
//!
//! Everything that is persisted serializes as camelCase JSON so that a job
//! record round-trips identically through every backend.

use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

/// Lifecycle state of an [`AsyncJob`].
///
/// The only legal moves are `PENDING -> RUNNING`, `RUNNING -> COMPLETED`
/// and `RUNNING -> FAILED`. Both end states are terminal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum JobStatus {
    Pending,
    Running,
    Completed,
    Failed,
}

impl JobStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            JobStatus::Pending => "PENDING",
            JobStatus::Running => "RUNNING",
            JobStatus::Completed => "COMPLETED",
            JobStatus::Failed => "FAILED",
        }
    }

    pub fn is_terminal(self) -> bool {
        matches!(self, JobStatus::Completed | JobStatus::Failed)
    }

    pub fn can_transition_to(self, next: JobStatus) -> bool {
        matches!(
            (self, next),
            (JobStatus::Pending, JobStatus::Running)
                | (JobStatus::Running, JobStatus::Completed)
                | (JobStatus::Running, JobStatus::Failed)
        )
    }
}

impl fmt::Display for JobStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for JobStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "PENDING" => Ok(JobStatus::Pending),
            "RUNNING" => Ok(JobStatus::Running),
            "COMPLETED" => Ok(JobStatus::Completed),
            "FAILED" => Ok(JobStatus::Failed),
            other => Err(format!("unknown job status '{}'", other)),
        }
    }
}

/// One asynchronous timeline build, as persisted by a job store.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AsyncJob {
    pub job_id: String,
    pub document_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub user_id: Option<String>,
    pub status: JobStatus,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timeline: Option<Timeline>,
    /// Summary of the error that failed the job.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl AsyncJob {
    /// A fresh PENDING job with a random UUID.
    pub fn new(document_id: &str, user_id: Option<&str>) -> Self {
        let now = Utc::now();
        Self {
            job_id: uuid::Uuid::new_v4().to_string(),
            document_id: document_id.to_string(),
            user_id: user_id.map(str::to_string),
            status: JobStatus::Pending,
            created_at: now,
            updated_at: now,
            timeline: None,
            error: None,
        }
    }
}

/// A single revision of a document, as supplied by the document provider.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Revision {
    pub revision_id: String,
    pub timestamp: DateTime<Utc>,
    #[serde(default)]
    pub author: String,
    /// Full text or diff of the revision.
    pub content: String,
}

impl Revision {
    /// Hex SHA-256 of the revision content, used to detect no-op revisions.
    pub fn content_hash(&self) -> String {
        let mut hasher = Sha256::new();
        hasher.update(self.content.as_bytes());
        hex::encode(hasher.finalize())
    }
}

/// The per-revision structured history of a document.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Timeline {
    pub document_id: String,
    pub entries: Vec<TimelineEntry>,
}

impl Timeline {
    pub fn empty(document_id: &str) -> Self {
        Self {
            document_id: document_id.to_string(),
            entries: Vec::new(),
        }
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TimelineEntry {
    pub revision_id: String,
    pub timestamp: DateTime<Utc>,
    pub author: String,
    /// Reverse outline produced by the LLM for this revision.
    pub outline: serde_json::Value,
}

#[cfg(test)]
mod tests {
    use super::*;

    const ALL: [JobStatus; 4] = [
        JobStatus::Pending,
        JobStatus::Running,
        JobStatus::Completed,
        JobStatus::Failed,
    ];

    #[test]
    fn test_only_forward_transitions_are_legal() {
        let legal = [
            (JobStatus::Pending, JobStatus::Running),
            (JobStatus::Running, JobStatus::Completed),
            (JobStatus::Running, JobStatus::Failed),
        ];
        for from in ALL {
            for to in ALL {
                assert_eq!(
                    from.can_transition_to(to),
                    legal.contains(&(from, to)),
                    "{} -> {}",
                    from,
                    to
                );
            }
        }
    }

    #[test]
    fn test_status_string_roundtrip() {
        for status in ALL {
            assert_eq!(status.as_str().parse::<JobStatus>().unwrap(), status);
            let json = serde_json::to_string(&status).unwrap();
            assert_eq!(json, format!("\"{}\"", status.as_str()));
        }
        assert!("DONE".parse::<JobStatus>().is_err());
    }

    #[test]
    fn test_new_job_is_pending() {
        let job = AsyncJob::new("doc-1", Some("user-9"));
        assert_eq!(job.status, JobStatus::Pending);
        assert_eq!(job.document_id, "doc-1");
        assert_eq!(job.user_id.as_deref(), Some("user-9"));
        assert!(job.timeline.is_none());
        assert_eq!(job.created_at, job.updated_at);
    }

    #[test]
    fn test_job_serializes_camel_case() {
        let job = AsyncJob::new("doc-1", None);
        let json = serde_json::to_value(&job).unwrap();
        assert!(json.get("jobId").is_some());
        assert!(json.get("documentId").is_some());
        assert!(json.get("userId").is_none());
        assert_eq!(json["status"], "PENDING");
    }

    #[test]
    fn test_content_hash_tracks_content() {
        let a = Revision {
            revision_id: "1".into(),
            timestamp: Utc::now(),
            author: "ann".into(),
            content: "hello".into(),
        };
        let mut b = a.clone();
        b.revision_id = "2".into();
        assert_eq!(a.content_hash(), b.content_hash());
        b.content.push('!');
        assert_ne!(a.content_hash(), b.content_hash());
    }
}
