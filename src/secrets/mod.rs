//! Secret retrieval.
//!
//! Defines the [`SecretStore`] trait and one implementation per cloud:
//! - **[`EnvSecretStore`]**: `local` provider; reads prefixed environment variables.
//! - **[`AwsSecretStore`]**: AWS Secrets Manager `GetSecretValue`.
//! - **[`AzureSecretStore`]**: Azure Key Vault `GET /secrets/{name}`.
//!
//! Values are never cached here. Every [`fetch_secret`](SecretStore::fetch_secret)
//! goes to the backing store so rotated credentials take effect immediately.

mod aws;
mod azure;
mod env;

pub use aws::AwsSecretStore;
pub use azure::AzureSecretStore;
pub use env::EnvSecretStore;

use async_trait::async_trait;
use std::fmt;
use std::sync::Arc;

use crate::config::Config;
use crate::error::{ConfigurationError, SecretError};
use crate::provider::{Capability, CloudProvider};

/// An opaque secret value. `Debug` and `Display` never print it.
#[derive(Clone, PartialEq, Eq)]
pub struct Secret(String);

impl Secret {
    pub fn new(value: impl Into<String>) -> Self {
        Self(value.into())
    }

    pub fn expose(&self) -> &str {
        &self.0
    }
}

impl fmt::Debug for Secret {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("Secret(***)")
    }
}

impl fmt::Display for Secret {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("***")
    }
}

/// Resolves named secrets from the active cloud.
///
/// # Errors
///
/// - [`SecretError::NotFound`]: the name is unknown to the backing store.
///   Callers treat this as fatal.
/// - [`SecretError::Access`]: transient or auth failure. Callers may retry
///   with backoff.
#[async_trait]
pub trait SecretStore: Send + Sync {
    /// Backend identifier (e.g. `"env"`, `"aws-secrets-manager"`).
    fn backend(&self) -> &str;

    async fn fetch_secret(&self, name: &str) -> Result<Secret, SecretError>;
}

/// Create the [`SecretStore`] for the given provider.
///
/// | Provider | Store |
/// |----------|-------|
/// | `local` | [`EnvSecretStore`] |
/// | `aws` | [`AwsSecretStore`] |
/// | `azure` | [`AzureSecretStore`] |
pub fn create_secret_store(
    provider: CloudProvider,
    config: &Config,
) -> Result<Arc<dyn SecretStore>, ConfigurationError> {
    if !provider.supports(Capability::Secrets) {
        return Err(ConfigurationError::NotImplemented {
            provider,
            capability: Capability::Secrets,
        });
    }

    match provider {
        CloudProvider::Local => Ok(Arc::new(EnvSecretStore::new(&config.local.secret_prefix))),
        CloudProvider::Aws => Ok(Arc::new(AwsSecretStore::new(&config.aws))),
        CloudProvider::Azure => Ok(Arc::new(AzureSecretStore::new(&config.azure)?)),
    }
}
