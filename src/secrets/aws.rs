//! AWS Secrets Manager secrets for the `aws` provider.

use async_trait::async_trait;
use serde_json::json;

use super::{Secret, SecretStore};
use crate::config::AwsConfig;
use crate::error::SecretError;
use crate::sigv4::{AwsCallError, AwsJsonClient};

/// AWS Secrets Manager backed [`SecretStore`].
///
/// Calls `GetSecretValue` with the secret name as `SecretId` and returns
/// its `SecretString`. Binary secrets are not supported.
pub struct AwsSecretStore {
    client: AwsJsonClient,
}

impl AwsSecretStore {
    pub fn new(config: &AwsConfig) -> Self {
        Self {
            client: AwsJsonClient::new(
                "secretsmanager",
                &config.region,
                "secretsmanager",
                "1.1",
                config.endpoint_url.clone(),
            ),
        }
    }
}

#[async_trait]
impl SecretStore for AwsSecretStore {
    fn backend(&self) -> &str {
        "aws-secrets-manager"
    }

    async fn fetch_secret(&self, name: &str) -> Result<Secret, SecretError> {
        let resp = self
            .client
            .call("GetSecretValue", &json!({ "SecretId": name }))
            .await
            .map_err(|e| map_call_error(name, e))?;

        secret_string(name, &resp)
    }
}

fn map_call_error(name: &str, err: AwsCallError) -> SecretError {
    match err.error_type() {
        Some("ResourceNotFoundException") => SecretError::NotFound {
            name: name.to_string(),
        },
        _ => SecretError::Access {
            name: name.to_string(),
            message: err.to_string(),
        },
    }
}

fn secret_string(name: &str, resp: &serde_json::Value) -> Result<Secret, SecretError> {
    resp.get("SecretString")
        .and_then(|s| s.as_str())
        .map(Secret::new)
        .ok_or_else(|| SecretError::Access {
            name: name.to_string(),
            message: "secret has no SecretString value".to_string(),
        })
}
