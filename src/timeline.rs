//! Timeline building.
//!
//! [`TimelineBuilder::build`] turns a document's revision history into a
//! [`Timeline`] of reverse outlines, one entry per revision, tracked as an
//! [`AsyncJob`]:
//!
//! ```text
//! revisions ──► check ids ──► build + validate requests ──► create job (PENDING)
//!                                                                │
//!                                                     RUNNING ◄──┘
//!                                                        │
//!                     sort by timestamp, skip no-ops, fan out LLM calls
//!                                                        │
//!                        ┌───────────────────────────────┴──────────────┐
//!                 all succeeded                                   any failed
//!           store_timeline(COMPLETED)                      record_failure(FAILED)
//! ```
//!
//! Duplicate revision ids and invalid requests are reported before any job
//! exists. After that, LLM failures never escape as errors: the job ends
//! FAILED with an error summary and is returned. A timeline is stored only
//! when every revision produced an outline.
//!
//! A revision whose content is identical to the one before it is a no-op
//! and gets no entry.
//!
//! # Retries
//!
//! | Failure | Handling |
//! |---------|----------|
//! | `LlmError::Provider`, `SecretError::Access` | exponential backoff, up to `retry.max_attempts` |
//! | `LlmError::SchemaValidation` | corrective re-prompt, up to `timeline.schema_retries` |
//! | anything else | fails the job immediately |
//! | `JobStoreError::Backend` on a transition | exponential backoff; a retry that finds the transition already applied succeeds |

use std::collections::{HashMap, HashSet};
use std::future::Future;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use futures::stream::{self, StreamExt, TryStreamExt};
use serde_json::{json, Value};

use crate::config::Config;
use crate::error::{BuildError, ConfigurationError, JobStoreError, LlmError};
use crate::jobs::JobStateStore;
use crate::llm::{self, LlmOutput, LlmRequest, LlmService, RawLlmRequest, RawPrompt};
use crate::models::{AsyncJob, JobStatus, Revision, Timeline, TimelineEntry};
use crate::provider::ProviderContext;
use crate::retry::RetryPolicy;

/// System role sent with every reverse-outline request.
pub const REVERSE_OUTLINE_ROLE: &str = "You write reverse outlines of document revisions. \
Given one revision of a document, summarize what the whole text says and list its sections \
in order, giving each section's heading and the purpose it serves. When changes since the \
previous revision are shown, describe them briefly in changeSummary. Respond only with JSON \
that matches the supplied schema.";

/// Schema every timeline entry's outline conforms to.
pub fn reverse_outline_schema() -> Value {
    json!({
        "type": "object",
        "properties": {
            "summary": { "type": "string" },
            "sections": {
                "type": "array",
                "items": {
                    "type": "object",
                    "properties": {
                        "heading": { "type": "string" },
                        "purpose": { "type": "string" }
                    },
                    "required": ["heading", "purpose"],
                    "additionalProperties": false
                }
            },
            "changeSummary": { "type": "string" }
        },
        "required": ["summary", "sections"],
        "additionalProperties": false
    })
}

#[derive(Debug, Clone)]
pub struct TimelineOptions {
    /// Maximum LLM calls in flight for one build.
    pub concurrency: usize,
    pub retry: RetryPolicy,
    /// Corrective re-prompts after a schema mismatch.
    pub schema_retries: u32,
    pub model: String,
}

impl Default for TimelineOptions {
    fn default() -> Self {
        Self::from_config(&Config::default())
    }
}

impl TimelineOptions {
    pub fn from_config(config: &Config) -> Self {
        Self {
            concurrency: config.timeline.concurrency.max(1),
            retry: RetryPolicy::from_config(&config.retry),
            schema_retries: config.timeline.schema_retries,
            model: config.timeline_model().to_string(),
        }
    }
}

/// One revision ready to send.
struct PlannedRevision {
    revision_id: String,
    timestamp: chrono::DateTime<chrono::Utc>,
    author: String,
    request: LlmRequest,
}

/// Why a revision could not be outlined.
struct RevisionFailure {
    revision_id: String,
    error: LlmError,
}

pub struct TimelineBuilder {
    jobs: Arc<dyn JobStateStore>,
    llm: Arc<dyn LlmService>,
    options: TimelineOptions,
}

impl TimelineBuilder {
    pub fn new(
        jobs: Arc<dyn JobStateStore>,
        llm: Arc<dyn LlmService>,
        options: TimelineOptions,
    ) -> Self {
        Self { jobs, llm, options }
    }

    /// Wire a builder from the active provider's stores and the configured
    /// LLM service.
    pub async fn from_context(ctx: &ProviderContext) -> Result<Self, ConfigurationError> {
        let secrets = ctx.secrets().await?;
        let jobs = ctx.job_store().await?;
        let llm = llm::create_llm_service(&ctx.config().llm, secrets)?;
        Ok(Self::new(jobs, llm, TimelineOptions::from_config(ctx.config())))
    }

    pub fn job_store(&self) -> &Arc<dyn JobStateStore> {
        &self.jobs
    }

    /// Build the timeline for `document_id` from `revisions`.
    ///
    /// Returns the job in its final state, COMPLETED or FAILED. Errors are
    /// returned only when the build cannot start (duplicate ids, invalid
    /// requests) or the job store itself fails.
    pub async fn build(
        &self,
        document_id: &str,
        user_id: Option<&str>,
        revisions: Vec<Revision>,
    ) -> Result<AsyncJob, BuildError> {
        let plan = self.plan(document_id, revisions)?;

        let job = self.jobs.create_job(document_id, user_id).await?;
        let job_id = job.job_id.as_str();
        tracing::info!(job_id, document_id, revisions = plan.len(), "Created timeline job");

        self.transition(
            "update_job_status",
            job_id,
            |job| job.status == JobStatus::Running,
            || self.jobs.update_job_status(job_id, JobStatus::Running),
        )
        .await?;

        let outcome = if plan.is_empty() {
            Ok(Vec::new())
        } else {
            self.outline_all(job_id, &plan).await
        };

        let finished = match outcome {
            Ok(entries) => {
                let timeline = Timeline {
                    document_id: document_id.to_string(),
                    entries,
                };
                let job = self
                    .transition(
                        "store_timeline",
                        job_id,
                        |job| {
                            job.status == JobStatus::Completed
                                && job.timeline.as_ref() == Some(&timeline)
                        },
                        || {
                            self.jobs
                                .store_timeline(job_id, &timeline, JobStatus::Completed)
                        },
                    )
                    .await?;
                tracing::info!(job_id, entries = timeline.len(), "Timeline job completed");
                job
            }
            Err(failure) => {
                let summary = format!("revision {}: {}", failure.revision_id, failure.error);
                let job = self
                    .transition(
                        "record_failure",
                        job_id,
                        |job| {
                            job.status == JobStatus::Failed
                                && job.error.as_deref() == Some(summary.as_str())
                        },
                        || self.jobs.record_failure(job_id, &summary),
                    )
                    .await?;
                tracing::error!(job_id, error = %summary, "Timeline job failed");
                job
            }
        };

        Ok(finished)
    }

    /// Check ids, order revisions, drop no-ops and build every request.
    /// Nothing is persisted here.
    fn plan(
        &self,
        document_id: &str,
        mut revisions: Vec<Revision>,
    ) -> Result<Vec<PlannedRevision>, BuildError> {
        let mut seen = HashSet::new();
        for revision in &revisions {
            if !seen.insert(revision.revision_id.as_str()) {
                return Err(BuildError::DuplicateRevision(revision.revision_id.clone()));
            }
        }

        // Stable: revisions sharing a timestamp keep their input order.
        revisions.sort_by_key(|r| r.timestamp);

        let mut plan = Vec::with_capacity(revisions.len());
        let mut previous: Option<&Revision> = None;
        let mut previous_hash = String::new();
        for revision in &revisions {
            let hash = revision.content_hash();
            if previous.is_some() && hash == previous_hash {
                tracing::debug!(
                    document_id,
                    revision_id = %revision.revision_id,
                    "Skipping revision with unchanged content"
                );
                continue;
            }

            let raw = RawLlmRequest {
                prompts: revision_prompts(document_id, revision, previous),
                target_ai_service_model: Some(self.options.model.clone()),
                output_data_type: Some("structured".to_string()),
                system_role: Some(REVERSE_OUTLINE_ROLE.to_string()),
                response_schema: Some(reverse_outline_schema()),
                response_format: Some("json_schema".to_string()),
            };
            let request = llm::validate(&raw, self.llm.known_models())?;

            plan.push(PlannedRevision {
                revision_id: revision.revision_id.clone(),
                timestamp: revision.timestamp,
                author: revision.author.clone(),
                request,
            });
            previous = Some(revision);
            previous_hash = hash;
        }
        Ok(plan)
    }

    /// Outline every planned revision with bounded concurrency. Stops at the
    /// first failure; entries come back in plan order.
    async fn outline_all(
        &self,
        job_id: &str,
        plan: &[PlannedRevision],
    ) -> Result<Vec<TimelineEntry>, RevisionFailure> {
        let mut outlined: Vec<(usize, TimelineEntry)> = stream::iter(plan.iter().enumerate())
            .map(|(index, planned)| async move {
                self.outline_revision(job_id, planned)
                    .await
                    .map(|entry| (index, entry))
            })
            .buffer_unordered(self.options.concurrency)
            .try_collect()
            .await?;

        outlined.sort_by_key(|(index, _)| *index);
        Ok(outlined.into_iter().map(|(_, entry)| entry).collect())
    }

    async fn outline_revision(
        &self,
        job_id: &str,
        planned: &PlannedRevision,
    ) -> Result<TimelineEntry, RevisionFailure> {
        let mut request = planned.request.clone();
        let mut corrections = 0;

        loop {
            let result = self
                .options
                .retry
                .run("complete_chat", LlmError::is_retryable, || {
                    self.llm.complete_chat(&request, None)
                })
                .await
                .and_then(|response| match response.output {
                    LlmOutput::Structured(outline) => Ok(outline),
                    LlmOutput::Text(raw_output) => Err(LlmError::SchemaValidation {
                        raw_output,
                        path: "$".to_string(),
                        message: "expected structured output".to_string(),
                    }),
                });

            match result {
                Ok(outline) => {
                    tracing::debug!(job_id, revision_id = %planned.revision_id, "Revision outlined");
                    return Ok(TimelineEntry {
                        revision_id: planned.revision_id.clone(),
                        timestamp: planned.timestamp,
                        author: planned.author.clone(),
                        outline,
                    });
                }
                Err(LlmError::SchemaValidation {
                    raw_output,
                    path,
                    message,
                }) if corrections < self.options.schema_retries => {
                    corrections += 1;
                    tracing::warn!(
                        job_id,
                        revision_id = %planned.revision_id,
                        path = %path,
                        message = %message,
                        "Outline did not match schema, re-prompting"
                    );
                    request = request.with_corrective_prompt(&raw_output, &path, &message);
                }
                Err(error) => {
                    return Err(RevisionFailure {
                        revision_id: planned.revision_id.clone(),
                        error,
                    })
                }
            }
        }
    }

    /// Run a job-state transition under the retry policy.
    ///
    /// A transition can commit while its acknowledgement is lost. The retry
    /// then fails the compare-and-swap with `InvalidTransition`, so after a
    /// backend failure the job is re-read and accepted when `committed`
    /// recognises it.
    async fn transition<F, Fut>(
        &self,
        operation: &str,
        job_id: &str,
        committed: impl Fn(&AsyncJob) -> bool,
        mut op: F,
    ) -> Result<AsyncJob, JobStoreError>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<AsyncJob, JobStoreError>>,
    {
        let backend_failed = AtomicBool::new(false);
        let flag = &backend_failed;
        let result = self
            .options
            .retry
            .run(operation, JobStoreError::is_retryable, || {
                let attempt = op();
                async move {
                    let result = attempt.await;
                    if let Err(JobStoreError::Backend(_)) = &result {
                        flag.store(true, Ordering::SeqCst);
                    }
                    result
                }
            })
            .await;

        if let Err(JobStoreError::InvalidTransition { .. }) = &result {
            if backend_failed.load(Ordering::SeqCst) {
                if let Some(job) = self.jobs.get_job(job_id).await? {
                    if committed(&job) {
                        tracing::warn!(
                            job_id,
                            operation,
                            status = %job.status,
                            "Transition committed before its acknowledgement was lost"
                        );
                        return Ok(job);
                    }
                }
            }
        }
        result
    }
}

/// Prompts for one revision: the full text, then what changed since the
/// previous revision when there is one.
fn revision_prompts(
    document_id: &str,
    revision: &Revision,
    previous: Option<&Revision>,
) -> Vec<RawPrompt> {
    let mut prompts = vec![RawPrompt::user(format!(
        "Document {} revision {} by {} at {}.\n\nFull text:\n{}",
        document_id,
        revision.revision_id,
        if revision.author.is_empty() {
            "unknown author"
        } else {
            revision.author.as_str()
        },
        revision.timestamp.to_rfc3339(),
        revision.content
    ))];

    if let Some(prev) = previous {
        let changes = line_changes(&prev.content, &revision.content);
        if !changes.is_empty() {
            prompts.push(RawPrompt::user(format!(
                "Changes since revision {}:\n{}",
                prev.revision_id, changes
            )));
        }
    }
    prompts
}

/// Lines removed (`- `) and added (`+ `) between two texts, compared as
/// multisets of lines.
fn line_changes(before: &str, after: &str) -> String {
    let mut remaining: HashMap<&str, usize> = HashMap::new();
    for line in before.lines() {
        *remaining.entry(line).or_default() += 1;
    }

    let mut added = Vec::new();
    for line in after.lines() {
        match remaining.get_mut(line) {
            Some(n) if *n > 0 => *n -= 1,
            _ => added.push(line),
        }
    }

    let mut out = String::new();
    for line in before.lines() {
        if let Some(n) = remaining.get_mut(line) {
            if *n > 0 {
                *n -= 1;
                out.push_str("- ");
                out.push_str(line);
                out.push('\n');
            }
        }
    }
    for line in added {
        out.push_str("+ ");
        out.push_str(line);
        out.push('\n');
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::llm::schema;

    #[test]
    fn test_outline_schema_is_well_formed() {
        assert!(schema::check_schema(&reverse_outline_schema()).is_empty());
        schema::validate(
            &json!({ "summary": "s", "sections": [{ "heading": "h", "purpose": "p" }] }),
            &reverse_outline_schema(),
        )
        .unwrap();
    }

    #[test]
    fn test_line_changes() {
        let changes = line_changes("a\nb\nc\n", "a\nc\nd\n");
        assert_eq!(changes, "- b\n+ d\n");
        assert_eq!(line_changes("same\n", "same\n"), "");
    }

    #[test]
    fn test_revision_prompts() {
        let r1 = Revision {
            revision_id: "r1".into(),
            timestamp: chrono::Utc::now(),
            author: String::new(),
            content: "Intro".into(),
        };
        let r2 = Revision {
            revision_id: "r2".into(),
            content: "Intro\nConclusion".into(),
            ..r1.clone()
        };
        let first = revision_prompts("doc", &r1, None);
        assert_eq!(first.len(), 1);
        assert!(first[0]
            .prompt_text
            .as_deref()
            .unwrap()
            .contains("unknown author"));

        let second = revision_prompts("doc", &r2, Some(&r1));
        assert_eq!(second.len(), 2);
        assert!(second[1]
            .prompt_text
            .as_deref()
            .unwrap()
            .contains("+ Conclusion"));
    }
}
