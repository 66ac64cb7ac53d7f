//! Azure Key Vault secrets for the `azure` provider.

use async_trait::async_trait;

use super::{Secret, SecretStore};
use crate::config::AzureConfig;
use crate::error::{ConfigurationError, SecretError};

const DEFAULT_IDENTITY_ENDPOINT: &str = "http://169.254.169.254/metadata/identity/oauth2/token";
const VAULT_RESOURCE: &str = "https://vault.azure.net";
const KEY_VAULT_API_VERSION: &str = "7.4";

/// Azure Key Vault backed [`SecretStore`].
///
/// Authenticates with `AZURE_ACCESS_TOKEN` when set, otherwise asks the
/// managed identity endpoint for a Key Vault token on each fetch.
pub struct AzureSecretStore {
    client: reqwest::Client,
    vault_url: String,
    identity_endpoint: String,
}

impl AzureSecretStore {
    pub fn new(config: &AzureConfig) -> Result<Self, ConfigurationError> {
        let vault_url = config
            .vault_url
            .clone()
            .ok_or_else(|| ConfigurationError::Invalid("azure.vault_url is required".into()))?;

        Ok(Self {
            client: reqwest::Client::new(),
            vault_url: vault_url.trim_end_matches('/').to_string(),
            identity_endpoint: config
                .identity_endpoint
                .clone()
                .unwrap_or_else(|| DEFAULT_IDENTITY_ENDPOINT.to_string()),
        })
    }

    async fn access_token(&self, name: &str) -> Result<String, SecretError> {
        if let Ok(token) = std::env::var("AZURE_ACCESS_TOKEN") {
            return Ok(token);
        }

        let access = |message: String| SecretError::Access {
            name: name.to_string(),
            message,
        };

        let resp = self
            .client
            .get(&self.identity_endpoint)
            .query(&[("api-version", "2018-02-01"), ("resource", VAULT_RESOURCE)])
            .header("Metadata", "true")
            .send()
            .await
            .map_err(|e| access(format!("managed identity request failed: {}", e)))?;

        if !resp.status().is_success() {
            return Err(access(format!(
                "managed identity endpoint returned HTTP {}",
                resp.status()
            )));
        }

        let json: serde_json::Value = resp
            .json()
            .await
            .map_err(|e| access(format!("invalid token response: {}", e)))?;

        json.get("access_token")
            .and_then(|t| t.as_str())
            .map(str::to_string)
            .ok_or_else(|| access("token response missing access_token".into()))
    }

    /// Key Vault secret names are 1-127 of `[0-9A-Za-z-]`; anything else
    /// cannot exist in a vault and never reaches the URL.
    fn secret_url(&self, name: &str) -> Result<String, SecretError> {
        let valid = !name.is_empty()
            && name.len() <= 127
            && name.chars().all(|c| c.is_ascii_alphanumeric() || c == '-');
        if !valid {
            tracing::warn!(name, "Rejected invalid Key Vault secret name");
            return Err(SecretError::NotFound {
                name: name.to_string(),
            });
        }
        Ok(format!(
            "{}/secrets/{}?api-version={}",
            self.vault_url, name, KEY_VAULT_API_VERSION
        ))
    }
}

#[async_trait]
impl SecretStore for AzureSecretStore {
    fn backend(&self) -> &str {
        "azure-key-vault"
    }

    async fn fetch_secret(&self, name: &str) -> Result<Secret, SecretError> {
        let url = self.secret_url(name)?;
        let token = self.access_token(name).await?;

        let resp = self
            .client
            .get(url)
            .bearer_auth(token)
            .send()
            .await
            .map_err(|e| SecretError::Access {
                name: name.to_string(),
                message: e.to_string(),
            })?;

        let status = resp.status();
        if status.as_u16() == 404 {
            return Err(SecretError::NotFound {
                name: name.to_string(),
            });
        }
        if !status.is_success() {
            let body = resp.text().await.unwrap_or_default();
            return Err(SecretError::Access {
                name: name.to_string(),
                message: format!(
                    "Key Vault returned HTTP {}: {}",
                    status,
                    body.chars().take(300).collect::<String>()
                ),
            });
        }

        let json: serde_json::Value = resp.json().await.map_err(|e| SecretError::Access {
            name: name.to_string(),
            message: format!("invalid Key Vault response: {}", e),
        })?;

        json.get("value")
            .and_then(|v| v.as_str())
            .map(Secret::new)
            .ok_or_else(|| SecretError::Access {
                name: name.to_string(),
                message: "Key Vault response missing value".to_string(),
            })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_secret_url() {
        let store = AzureSecretStore::new(&AzureConfig {
            vault_url: Some("https://docs-vault.vault.azure.net/".into()),
            identity_endpoint: None,
        })
        .unwrap();
        assert_eq!(
            store.secret_url("openai-api-key").unwrap(),
            "https://docs-vault.vault.azure.net/secrets/openai-api-key?api-version=7.4"
        );
        assert_eq!(store.identity_endpoint, DEFAULT_IDENTITY_ENDPOINT);
    }

    #[tokio::test]
    async fn test_invalid_secret_name_is_rejected_before_any_request() {
        // Unroutable endpoints: a request would fail with Access, not NotFound.
        let store = AzureSecretStore::new(&AzureConfig {
            vault_url: Some("http://127.0.0.1:9".into()),
            identity_endpoint: Some("http://127.0.0.1:9/token".into()),
        })
        .unwrap();

        for name in ["a/b?x", "key vault", "", "../admin", "caf\u{e9}"] {
            assert!(store.secret_url(name).is_err(), "{name}");
            let err = store.fetch_secret(name).await.unwrap_err();
            assert!(matches!(err, SecretError::NotFound { .. }), "{name}: {err}");
        }
        assert!(store.secret_url(&"k".repeat(127)).is_ok());
        assert!(store.secret_url(&"k".repeat(128)).is_err());
    }
}
