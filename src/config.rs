//! TOML configuration.
//!
//! ```toml
//! [cloud]
//! provider = "local"            # aws | azure | local
//!
//! [local]
//! db_path = "./data/jobs.sqlite"
//! secret_prefix = "RTL_SECRET_"
//!
//! [llm]
//! provider = "openai"           # openai | ollama
//! api_key_secret = "openai-api-key"
//! models = ["gpt-4o-mini"]
//! default_model = "gpt-4o-mini"
//!
//! [retry]
//! max_attempts = 3
//! base_delay_ms = 500
//!
//! [timeline]
//! concurrency = 4
//! ```
//!
//! Every section is optional; missing values fall back to the defaults below.

use anyhow::{bail, Context, Result};
use serde::Deserialize;
use std::path::{Path, PathBuf};

use crate::provider::CloudProvider;

#[derive(Debug, Deserialize, Clone, Default)]
pub struct Config {
    #[serde(default)]
    pub cloud: CloudConfig,
    #[serde(default)]
    pub local: LocalConfig,
    #[serde(default)]
    pub aws: AwsConfig,
    #[serde(default)]
    pub azure: AzureConfig,
    #[serde(default)]
    pub llm: LlmConfig,
    #[serde(default)]
    pub retry: RetryConfig,
    #[serde(default)]
    pub timeline: TimelineConfig,
}

#[derive(Debug, Deserialize, Clone)]
pub struct CloudConfig {
    #[serde(default = "default_cloud_provider")]
    pub provider: String,
}

impl Default for CloudConfig {
    fn default() -> Self {
        Self {
            provider: default_cloud_provider(),
        }
    }
}

fn default_cloud_provider() -> String {
    "local".to_string()
}

#[derive(Debug, Deserialize, Clone)]
pub struct LocalConfig {
    #[serde(default = "default_db_path")]
    pub db_path: PathBuf,
    #[serde(default = "default_secret_prefix")]
    pub secret_prefix: String,
}

impl Default for LocalConfig {
    fn default() -> Self {
        Self {
            db_path: default_db_path(),
            secret_prefix: default_secret_prefix(),
        }
    }
}

fn default_db_path() -> PathBuf {
    PathBuf::from("./data/jobs.sqlite")
}
fn default_secret_prefix() -> String {
    "RTL_SECRET_".to_string()
}

#[derive(Debug, Deserialize, Clone)]
pub struct AwsConfig {
    #[serde(default = "default_aws_region")]
    pub region: String,
    #[serde(default = "default_job_table")]
    pub job_table: String,
    /// Custom endpoint for LocalStack and friends. Applies to every AWS service.
    #[serde(default)]
    pub endpoint_url: Option<String>,
}

impl Default for AwsConfig {
    fn default() -> Self {
        Self {
            region: default_aws_region(),
            job_table: default_job_table(),
            endpoint_url: None,
        }
    }
}

fn default_aws_region() -> String {
    "us-east-1".to_string()
}
fn default_job_table() -> String {
    "timeline-jobs".to_string()
}

#[derive(Debug, Deserialize, Clone, Default)]
pub struct AzureConfig {
    /// Key Vault URL, e.g. `https://my-vault.vault.azure.net`.
    #[serde(default)]
    pub vault_url: Option<String>,
    /// Managed identity token endpoint. Defaults to the instance metadata service.
    #[serde(default)]
    pub identity_endpoint: Option<String>,
}

#[derive(Debug, Deserialize, Clone)]
pub struct LlmConfig {
    #[serde(default = "default_llm_provider")]
    pub provider: String,
    #[serde(default)]
    pub url: Option<String>,
    /// Name of the secret holding the provider API key.
    #[serde(default = "default_api_key_secret")]
    pub api_key_secret: String,
    #[serde(default = "default_models")]
    pub models: Vec<String>,
    #[serde(default = "default_model")]
    pub default_model: String,
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
}

impl Default for LlmConfig {
    fn default() -> Self {
        Self {
            provider: default_llm_provider(),
            url: None,
            api_key_secret: default_api_key_secret(),
            models: default_models(),
            default_model: default_model(),
            timeout_secs: default_timeout_secs(),
        }
    }
}

fn default_llm_provider() -> String {
    "openai".to_string()
}
fn default_api_key_secret() -> String {
    "openai-api-key".to_string()
}
fn default_models() -> Vec<String> {
    vec!["gpt-4o-mini".to_string(), "gpt-4o".to_string()]
}
fn default_model() -> String {
    "gpt-4o-mini".to_string()
}
fn default_timeout_secs() -> u64 {
    60
}

#[derive(Debug, Deserialize, Clone)]
pub struct RetryConfig {
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,
    #[serde(default = "default_base_delay_ms")]
    pub base_delay_ms: u64,
    #[serde(default = "default_max_delay_ms")]
    pub max_delay_ms: u64,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: default_max_attempts(),
            base_delay_ms: default_base_delay_ms(),
            max_delay_ms: default_max_delay_ms(),
        }
    }
}

fn default_max_attempts() -> u32 {
    3
}
fn default_base_delay_ms() -> u64 {
    500
}
fn default_max_delay_ms() -> u64 {
    8_000
}

#[derive(Debug, Deserialize, Clone)]
pub struct TimelineConfig {
    #[serde(default = "default_concurrency")]
    pub concurrency: usize,
    /// Corrective re-prompts allowed after a schema mismatch.
    #[serde(default = "default_schema_retries")]
    pub schema_retries: u32,
    /// Model used for reverse outlines. Defaults to `llm.default_model`.
    #[serde(default)]
    pub model: Option<String>,
}

impl Default for TimelineConfig {
    fn default() -> Self {
        Self {
            concurrency: default_concurrency(),
            schema_retries: default_schema_retries(),
            model: None,
        }
    }
}

fn default_concurrency() -> usize {
    4
}
fn default_schema_retries() -> u32 {
    1
}

impl Config {
    /// Check cross-field constraints that serde defaults cannot express.
    pub fn validate(&self) -> Result<()> {
        let provider: CloudProvider = self.cloud.provider.parse()?;

        if provider == CloudProvider::Azure && self.azure.vault_url.is_none() {
            bail!("azure.vault_url must be set when cloud.provider is 'azure'");
        }

        if self.llm.models.is_empty() {
            bail!("llm.models must list at least one model");
        }
        if !self.llm.models.contains(&self.llm.default_model) {
            bail!(
                "llm.default_model '{}' is not listed in llm.models",
                self.llm.default_model
            );
        }
        if let Some(ref model) = self.timeline.model {
            if !self.llm.models.contains(model) {
                bail!("timeline.model '{}' is not listed in llm.models", model);
            }
        }

        match self.llm.provider.as_str() {
            "openai" | "ollama" => {}
            other => bail!(
                "Unknown LLM provider: '{}'. Must be openai or ollama.",
                other
            ),
        }

        if self.retry.max_attempts == 0 {
            bail!("retry.max_attempts must be >= 1");
        }
        if self.retry.base_delay_ms > self.retry.max_delay_ms {
            bail!("retry.base_delay_ms must not exceed retry.max_delay_ms");
        }
        if self.timeline.concurrency == 0 {
            bail!("timeline.concurrency must be >= 1");
        }

        Ok(())
    }

    /// Model used for reverse outlines.
    pub fn timeline_model(&self) -> &str {
        self.timeline
            .model
            .as_deref()
            .unwrap_or(&self.llm.default_model)
    }
}

pub fn load_config(path: &Path) -> Result<Config> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read config file: {}", path.display()))?;

    let config: Config = toml::from_str(&content).with_context(|| "Failed to parse config file")?;
    config.validate()?;

    tracing::debug!(
        path = %path.display(),
        provider = %config.cloud.provider,
        llm = %config.llm.provider,
        "Loaded configuration"
    );

    Ok(config)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_empty_config_uses_defaults() {
        let config: Config = toml::from_str("").unwrap();
        config.validate().unwrap();
        assert_eq!(config.cloud.provider, "local");
        assert_eq!(config.retry.max_attempts, 3);
        assert_eq!(config.timeline.concurrency, 4);
        assert_eq!(config.timeline_model(), "gpt-4o-mini");
    }

    #[test]
    fn test_unknown_cloud_provider_rejected() {
        let config: Config = toml::from_str("[cloud]\nprovider = \"gcp\"").unwrap();
        let err = config.validate().unwrap_err();
        assert!(err.to_string().contains("gcp"), "{}", err);
    }

    #[test]
    fn test_azure_requires_vault_url() {
        let config: Config = toml::from_str("[cloud]\nprovider = \"azure\"").unwrap();
        assert!(config.validate().is_err());

        let config: Config = toml::from_str(
            "[cloud]\nprovider = \"azure\"\n[azure]\nvault_url = \"https://v.vault.azure.net\"",
        )
        .unwrap();
        config.validate().unwrap();
    }

    #[test]
    fn test_default_model_must_be_listed() {
        let config: Config =
            toml::from_str("[llm]\nmodels = [\"llama3\"]\ndefault_model = \"gpt-4o\"").unwrap();
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_zero_attempts_rejected() {
        let config: Config = toml::from_str("[retry]\nmax_attempts = 0").unwrap();
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_load_config_from_file() {
        let tmp = tempfile::TempDir::new().unwrap();
        let path = tmp.path().join("rtl.toml");
        std::fs::write(
            &path,
            r#"
[llm]
provider = "ollama"
models = ["llama3"]
default_model = "llama3"

[timeline]
concurrency = 2
"#,
        )
        .unwrap();
        let config = load_config(&path).unwrap();
        assert_eq!(config.llm.provider, "ollama");
        assert_eq!(config.timeline.concurrency, 2);
        assert_eq!(config.timeline_model(), "llama3");
    }
}
