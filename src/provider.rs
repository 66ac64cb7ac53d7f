//! Cloud provider selection.
//!
//! The process picks one [`CloudProvider`] from configuration at startup
//! and builds a [`ProviderContext`] from it. The context is passed down
//! explicitly; there is no global state. Each capability is constructed
//! lazily on first use and the same instance is returned afterwards, even
//! when the first calls race.
//!
//! | Provider | Secrets | Job state |
//! |----------|---------|-----------|
//! | `local` | environment variables | SQLite |
//! | `aws` | Secrets Manager | DynamoDB |
//! | `azure` | Key Vault | not implemented |

use std::fmt;
use std::str::FromStr;
use std::sync::Arc;

use tokio::sync::OnceCell;

use crate::config::Config;
use crate::error::ConfigurationError;
use crate::jobs::{create_job_store, JobStateStore};
use crate::secrets::{create_secret_store, SecretStore};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CloudProvider {
    Aws,
    Azure,
    Local,
}

/// Something a provider may or may not be able to supply.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Capability {
    Secrets,
    JobState,
}

impl CloudProvider {
    pub fn as_str(self) -> &'static str {
        match self {
            CloudProvider::Aws => "aws",
            CloudProvider::Azure => "azure",
            CloudProvider::Local => "local",
        }
    }

    /// Capabilities this provider has an implementation for.
    pub fn capabilities(self) -> &'static [Capability] {
        match self {
            CloudProvider::Aws | CloudProvider::Local => {
                &[Capability::Secrets, Capability::JobState]
            }
            CloudProvider::Azure => &[Capability::Secrets],
        }
    }

    pub fn supports(self, capability: Capability) -> bool {
        self.capabilities().contains(&capability)
    }
}

impl fmt::Display for CloudProvider {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for CloudProvider {
    type Err = ConfigurationError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "aws" => Ok(CloudProvider::Aws),
            "azure" => Ok(CloudProvider::Azure),
            "local" => Ok(CloudProvider::Local),
            _ => Err(ConfigurationError::UnsupportedProvider(s.to_string())),
        }
    }
}

impl fmt::Display for Capability {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Capability::Secrets => f.write_str("secret store"),
            Capability::JobState => f.write_str("job state store"),
        }
    }
}

/// Construct-once holder for the active provider's implementations.
pub struct ProviderContext {
    provider: CloudProvider,
    config: Config,
    secrets: OnceCell<Arc<dyn SecretStore>>,
    jobs: OnceCell<Arc<dyn JobStateStore>>,
}

impl ProviderContext {
    /// Read the provider from configuration. Nothing is constructed yet.
    pub fn new(config: &Config) -> Result<Self, ConfigurationError> {
        let provider = config.cloud.provider.parse()?;
        Ok(Self {
            provider,
            config: config.clone(),
            secrets: OnceCell::new(),
            jobs: OnceCell::new(),
        })
    }

    /// A context whose stores are supplied by the caller (tests, embedding).
    pub fn with_stores(
        provider: CloudProvider,
        secrets: Arc<dyn SecretStore>,
        jobs: Arc<dyn JobStateStore>,
    ) -> Self {
        Self {
            provider,
            config: Config::default(),
            secrets: OnceCell::new_with(Some(secrets)),
            jobs: OnceCell::new_with(Some(jobs)),
        }
    }

    pub fn provider(&self) -> CloudProvider {
        self.provider
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    /// The secret store for the active provider.
    pub async fn secrets(&self) -> Result<Arc<dyn SecretStore>, ConfigurationError> {
        self.secrets
            .get_or_try_init(|| async {
                let store = create_secret_store(self.provider, &self.config)?;
                tracing::info!(
                    provider = %self.provider,
                    backend = store.backend(),
                    "Initialized secret store"
                );
                Ok(store)
            })
            .await
            .cloned()
    }

    /// The job state store for the active provider.
    pub async fn job_store(&self) -> Result<Arc<dyn JobStateStore>, ConfigurationError> {
        self.jobs
            .get_or_try_init(|| async {
                let store = create_job_store(self.provider, &self.config).await?;
                tracing::info!(
                    provider = %self.provider,
                    backend = store.backend(),
                    "Initialized job state store"
                );
                Ok(store)
            })
            .await
            .cloned()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn local_config(tmp: &TempDir) -> Config {
        let content = format!(
            "[cloud]\nprovider = \"local\"\n[local]\ndb_path = \"{}\"\n",
            tmp.path().join("jobs.sqlite").display()
        );
        toml::from_str(&content).unwrap()
    }

    #[test]
    fn test_parse_provider() {
        assert_eq!("AWS".parse::<CloudProvider>().unwrap(), CloudProvider::Aws);
        assert_eq!(" local ".parse::<CloudProvider>().unwrap(), CloudProvider::Local);
        let err = "gcp".parse::<CloudProvider>().unwrap_err();
        assert!(matches!(err, ConfigurationError::UnsupportedProvider(ref p) if p == "gcp"));
    }

    #[test]
    fn test_capability_table() {
        assert!(CloudProvider::Aws.supports(Capability::JobState));
        assert!(CloudProvider::Local.supports(Capability::Secrets));
        assert!(CloudProvider::Azure.supports(Capability::Secrets));
        assert!(!CloudProvider::Azure.supports(Capability::JobState));
    }

    #[tokio::test]
    async fn test_same_instance_on_repeated_calls() {
        let tmp = TempDir::new().unwrap();
        let ctx = ProviderContext::new(&local_config(&tmp)).unwrap();
        assert_eq!(ctx.provider(), CloudProvider::Local);

        let a = ctx.secrets().await.unwrap();
        let b = ctx.secrets().await.unwrap();
        assert!(Arc::ptr_eq(&a, &b));
        assert_eq!(a.backend(), "env");

        let j1 = ctx.job_store().await.unwrap();
        let j2 = ctx.job_store().await.unwrap();
        assert!(Arc::ptr_eq(&j1, &j2));
        assert_eq!(j1.backend(), "sqlite");
    }

    #[tokio::test]
    async fn test_concurrent_first_access_constructs_once() {
        let tmp = TempDir::new().unwrap();
        let ctx = ProviderContext::new(&local_config(&tmp)).unwrap();

        let stores = futures::future::join_all((0..8).map(|_| ctx.job_store())).await;
        let first = stores[0].as_ref().unwrap();
        for store in &stores {
            assert!(Arc::ptr_eq(first, store.as_ref().unwrap()));
        }
    }

    #[tokio::test]
    async fn test_azure_job_store_not_implemented() {
        let config: Config = toml::from_str(
            "[cloud]\nprovider = \"azure\"\n[azure]\nvault_url = \"https://v.vault.azure.net\"",
        )
        .unwrap();
        let ctx = ProviderContext::new(&config).unwrap();
        assert_eq!(ctx.secrets().await.unwrap().backend(), "azure-key-vault");
        let err = ctx.job_store().await.err().unwrap();
        assert!(matches!(err, ConfigurationError::NotImplemented { .. }));
    }

    #[test]
    fn test_unsupported_provider_in_config() {
        let config: Config = toml::from_str("[cloud]\nprovider = \"oracle\"").unwrap();
        assert!(matches!(
            ProviderContext::new(&config),
            Err(ConfigurationError::UnsupportedProvider(_))
        ));
    }
}
