//! Revision sources.
//!
//! A [`RevisionSource`] supplies the revision history of a document. The
//! pipeline only consumes revisions; authenticating against the document
//! system is the source's concern.

use async_trait::async_trait;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};

use crate::models::Revision;

#[async_trait]
pub trait RevisionSource: Send + Sync {
    /// All revisions of `document_id`, in any order.
    async fn list_revisions(&self, document_id: &str) -> Result<Vec<Revision>>;
}

/// Reads revisions from a JSON array on disk:
///
/// ```json
/// [
///   { "revisionId": "r1", "timestamp": "2024-05-01T10:00:00Z", "author": "ann", "content": "…" }
/// ]
/// ```
///
/// The file holds one document's history, so `document_id` is not used to
/// filter.
pub struct JsonFileRevisionSource {
    path: PathBuf,
}

impl JsonFileRevisionSource {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

#[async_trait]
impl RevisionSource for JsonFileRevisionSource {
    async fn list_revisions(&self, document_id: &str) -> Result<Vec<Revision>> {
        let content = tokio::fs::read_to_string(&self.path)
            .await
            .with_context(|| format!("Failed to read revisions file: {}", self.path.display()))?;
        let revisions: Vec<Revision> = serde_json::from_str(&content)
            .with_context(|| format!("Failed to parse revisions file: {}", self.path.display()))?;
        tracing::debug!(
            document_id,
            count = revisions.len(),
            path = %self.path.display(),
            "Loaded revisions"
        );
        Ok(revisions)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[tokio::test]
    async fn test_reads_json_array() {
        let tmp = TempDir::new().unwrap();
        let path = tmp.path().join("revs.json");
        std::fs::write(
            &path,
            r#"[
                {"revisionId": "r2", "timestamp": "2024-05-02T10:00:00Z", "author": "bo", "content": "v2"},
                {"revisionId": "r1", "timestamp": "2024-05-01T10:00:00Z", "content": "v1"}
            ]"#,
        )
        .unwrap();

        let revisions = JsonFileRevisionSource::new(&path)
            .list_revisions("doc-1")
            .await
            .unwrap();
        assert_eq!(revisions.len(), 2);
        assert_eq!(revisions[0].revision_id, "r2");
        assert_eq!(revisions[1].author, "");
    }

    #[tokio::test]
    async fn test_missing_file_names_path() {
        let source = JsonFileRevisionSource::new("/nonexistent/revs.json");
        let err = source.list_revisions("doc-1").await.unwrap_err();
        assert!(format!("{:#}", err).contains("/nonexistent/revs.json"));
    }
}
