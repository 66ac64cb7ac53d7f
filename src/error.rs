//! Error taxonomy for the timeline pipeline.
//!
//! Each concern has its own `thiserror` enum so callers can tell a
//! deployment gap from a bad request from a transient provider hiccup:
//!
//! | Error | Meaning | Retried? |
//! |-------|---------|----------|
//! | [`ConfigurationError`] | unsupported provider, missing capability | never |
//! | [`ValidationError`] | malformed LLM request (all violations listed) | never |
//! | [`SecretError`] | secret missing or unreachable | `Access` only |
//! | [`JobStoreError`] | illegal transition, unknown job, backend failure | `Backend` only |
//! | [`LlmError`] | provider failure, schema mismatch, rejected request | `Provider`, `Secret(Access)` |
//! | [`BuildError`] | anything that stops a build before a job is finished | n/a |

use thiserror::Error;

use crate::models::JobStatus;
use crate::provider::{Capability, CloudProvider};

/// Misconfiguration detected while selecting or constructing a provider.
#[derive(Debug, Error)]
pub enum ConfigurationError {
    #[error("unsupported cloud provider '{0}' (expected aws, azure, or local)")]
    UnsupportedProvider(String),

    #[error("{capability} is not implemented for the {provider} provider")]
    NotImplemented {
        provider: CloudProvider,
        capability: Capability,
    },

    #[error("failed to initialize {capability}: {message}")]
    Initialization {
        capability: Capability,
        message: String,
    },

    #[error("invalid configuration: {0}")]
    Invalid(String),
}

/// A rejected LLM request. Carries every violated rule, not just the first.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("invalid LLM request: {}", violations.join("; "))]
pub struct ValidationError {
    pub violations: Vec<String>,
}

impl ValidationError {
    pub fn new(violations: Vec<String>) -> Self {
        Self { violations }
    }

    pub fn single(violation: impl Into<String>) -> Self {
        Self {
            violations: vec![violation.into()],
        }
    }
}

#[derive(Debug, Clone, Error)]
pub enum SecretError {
    #[error("secret '{name}' not found")]
    NotFound { name: String },

    #[error("failed to access secret '{name}': {message}")]
    Access { name: String, message: String },
}

impl SecretError {
    pub fn is_retryable(&self) -> bool {
        matches!(self, SecretError::Access { .. })
    }
}

#[derive(Debug, Clone, Error)]
pub enum JobStoreError {
    #[error("job {job_id}: illegal transition {from} -> {to}")]
    InvalidTransition {
        job_id: String,
        from: JobStatus,
        to: JobStatus,
    },

    #[error("job {0} not found")]
    NotFound(String),

    #[error("job store backend error: {0}")]
    Backend(String),
}

impl JobStoreError {
    pub fn is_retryable(&self) -> bool {
        matches!(self, JobStoreError::Backend(_))
    }
}

#[derive(Debug, Clone, Error)]
pub enum LlmError {
    #[error("model '{0}' is not known to the LLM service")]
    UnknownModel(String),

    /// The provider answered, but the output does not match the response schema.
    #[error("LLM output violates schema at {path}: {message}")]
    SchemaValidation {
        raw_output: String,
        path: String,
        message: String,
    },

    /// Rate limits, auth failures, server errors, and transport failures.
    #[error("{provider} provider error: {message}")]
    Provider { provider: String, message: String },

    /// The provider refused the request itself (4xx other than 401/403/429).
    #[error("{provider} rejected the request (HTTP {status}): {message}")]
    Rejected {
        provider: String,
        status: u16,
        message: String,
    },

    #[error(transparent)]
    Secret(#[from] SecretError),
}

impl LlmError {
    pub fn is_retryable(&self) -> bool {
        match self {
            LlmError::Provider { .. } => true,
            LlmError::Secret(e) => e.is_retryable(),
            _ => false,
        }
    }
}

/// Errors that abort [`TimelineBuilder::build`](crate::timeline::TimelineBuilder::build).
///
/// LLM failures are not listed here: they end the job as FAILED and the
/// build still returns the job.
#[derive(Debug, Error)]
pub enum BuildError {
    #[error("duplicate revision id '{0}'")]
    DuplicateRevision(String),

    #[error(transparent)]
    Validation(#[from] ValidationError),

    #[error(transparent)]
    Configuration(#[from] ConfigurationError),

    #[error(transparent)]
    Store(#[from] JobStoreError),
}
