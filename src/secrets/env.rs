//! Environment-variable secrets for the `local` provider.

use async_trait::async_trait;

use super::{Secret, SecretStore};
use crate::error::SecretError;

/// Secret store for the `local` provider.
///
/// A secret named `openai-api-key` with prefix `RTL_SECRET_` is read from
/// `RTL_SECRET_OPENAI_API_KEY`.
pub struct EnvSecretStore {
    prefix: String,
}

impl EnvSecretStore {
    pub fn new(prefix: &str) -> Self {
        Self {
            prefix: prefix.to_string(),
        }
    }

    pub fn var_name(&self, name: &str) -> String {
        let normalized: String = name
            .chars()
            .map(|c| match c {
                '-' | '.' | '/' => '_',
                c => c.to_ascii_uppercase(),
            })
            .collect();
        format!("{}{}", self.prefix, normalized)
    }
}

#[async_trait]
impl SecretStore for EnvSecretStore {
    fn backend(&self) -> &str {
        "env"
    }

    async fn fetch_secret(&self, name: &str) -> Result<Secret, SecretError> {
        let var = self.var_name(name);
        match std::env::var(&var) {
            Ok(value) => Ok(Secret::new(value)),
            Err(std::env::VarError::NotPresent) => Err(SecretError::NotFound {
                name: name.to_string(),
            }),
            Err(std::env::VarError::NotUnicode(_)) => Err(SecretError::Access {
                name: name.to_string(),
                message: format!("{} is not valid unicode", var),
            }),
        }
    }
}
