//! Minimal AWS JSON-protocol client with Signature V4 signing.
//!
//! Secrets Manager and DynamoDB both speak the AWS JSON protocol: every
//! operation is a `POST /` whose action is named by the `X-Amz-Target`
//! header. [`AwsJsonClient`] signs those requests with pure-Rust
//! HMAC-SHA256 (`hmac` + `sha2`), so no C toolchain is needed.
//!
//! # Environment Variables
//!
//! - `AWS_ACCESS_KEY_ID`: required
//! - `AWS_SECRET_ACCESS_KEY`: required
//! - `AWS_SESSION_TOKEN`: optional (temporary credentials / IAM roles)

use chrono::Utc;
use hmac::{Hmac, Mac};
use sha2::{Digest, Sha256};
use thiserror::Error;

type HmacSha256 = Hmac<Sha256>;

#[derive(Debug, Error)]
pub enum AwsCallError {
    #[error("AWS credentials unavailable: {0}")]
    Credentials(String),

    #[error("AWS request failed: {0}")]
    Transport(String),

    /// The service answered with an error document.
    #[error("AWS {error_type} (HTTP {status}): {message}")]
    Service {
        status: u16,
        error_type: String,
        message: String,
    },
}

impl AwsCallError {
    /// Short exception name, e.g. `ResourceNotFoundException`.
    pub fn error_type(&self) -> Option<&str> {
        match self {
            AwsCallError::Service { error_type, .. } => Some(error_type),
            _ => None,
        }
    }
}

/// AWS credentials loaded from environment variables.
pub struct AwsCredentials {
    access_key_id: String,
    secret_access_key: String,
    session_token: Option<String>,
}

impl AwsCredentials {
    pub fn from_env() -> Result<Self, AwsCallError> {
        let access_key_id = std::env::var("AWS_ACCESS_KEY_ID").map_err(|_| {
            AwsCallError::Credentials("AWS_ACCESS_KEY_ID environment variable not set".into())
        })?;
        let secret_access_key = std::env::var("AWS_SECRET_ACCESS_KEY").map_err(|_| {
            AwsCallError::Credentials("AWS_SECRET_ACCESS_KEY environment variable not set".into())
        })?;
        let session_token = std::env::var("AWS_SESSION_TOKEN").ok();

        Ok(Self {
            access_key_id,
            secret_access_key,
            session_token,
        })
    }
}

/// A signed JSON-protocol client for one AWS service in one region.
pub struct AwsJsonClient {
    client: reqwest::Client,
    /// Signing name, e.g. `"secretsmanager"` or `"dynamodb"`.
    service: String,
    region: String,
    /// Target prefix, e.g. `"secretsmanager"` or `"DynamoDB_20120810"`.
    target_prefix: String,
    /// `application/x-amz-json-1.0` or `-1.1`.
    content_type: String,
    endpoint_url: Option<String>,
}

impl AwsJsonClient {
    pub fn new(
        service: &str,
        region: &str,
        target_prefix: &str,
        json_version: &str,
        endpoint_url: Option<String>,
    ) -> Self {
        Self {
            client: reqwest::Client::new(),
            service: service.to_string(),
            region: region.to_string(),
            target_prefix: target_prefix.to_string(),
            content_type: format!("application/x-amz-json-{}", json_version),
            endpoint_url,
        }
    }

    /// Compute the service hostname.
    ///
    /// A custom `endpoint_url` (LocalStack, etc.) wins over the standard
    /// `<service>.<region>.amazonaws.com`.
    fn host(&self) -> String {
        match self.endpoint_url {
            Some(ref endpoint) => endpoint
                .trim_start_matches("https://")
                .trim_start_matches("http://")
                .trim_end_matches('/')
                .to_string(),
            None => format!("{}.{}.amazonaws.com", self.service, self.region),
        }
    }

    fn url(&self) -> String {
        match self.endpoint_url {
            Some(ref endpoint) if endpoint.starts_with("http://") => {
                format!("http://{}/", self.host())
            }
            _ => format!("https://{}/", self.host()),
        }
    }

    /// Invoke `action` with a JSON body and return the decoded JSON response.
    ///
    /// Credentials are re-read on every call so rotated role credentials
    /// are picked up without a restart.
    pub async fn call(
        &self,
        action: &str,
        body: &serde_json::Value,
    ) -> Result<serde_json::Value, AwsCallError> {
        let creds = AwsCredentials::from_env()?;
        let payload = serde_json::to_vec(body)
            .map_err(|e| AwsCallError::Transport(format!("failed to encode request: {}", e)))?;

        let host = self.host();
        let target = format!("{}.{}", self.target_prefix, action);
        let now = Utc::now();
        let date_stamp = now.format("%Y%m%d").to_string();
        let amz_date = now.format("%Y%m%dT%H%M%SZ").to_string();

        let mut headers = vec![
            ("content-type".to_string(), self.content_type.clone()),
            ("host".to_string(), host),
            ("x-amz-date".to_string(), amz_date.clone()),
            ("x-amz-target".to_string(), target.clone()),
        ];
        if let Some(ref token) = creds.session_token {
            headers.push(("x-amz-security-token".to_string(), token.clone()));
        }

        let authorization = sign_request(
            &creds,
            &self.region,
            &self.service,
            &date_stamp,
            &amz_date,
            &mut headers,
            &payload,
        );

        let mut req_builder = self
            .client
            .post(self.url())
            .header("Authorization", &authorization)
            .header("Content-Type", &self.content_type)
            .header("X-Amz-Date", &amz_date)
            .header("X-Amz-Target", &target);

        if let Some(ref token) = creds.session_token {
            req_builder = req_builder.header("X-Amz-Security-Token", token);
        }

        let resp = req_builder
            .body(payload)
            .send()
            .await
            .map_err(|e| AwsCallError::Transport(format!("{} {}: {}", self.service, action, e)))?;

        let status = resp.status();
        let text = resp
            .text()
            .await
            .map_err(|e| AwsCallError::Transport(e.to_string()))?;

        if !status.is_success() {
            return Err(parse_error_document(status.as_u16(), &text));
        }

        if text.trim().is_empty() {
            return Ok(serde_json::json!({}));
        }
        serde_json::from_str(&text)
            .map_err(|e| AwsCallError::Transport(format!("invalid JSON from {}: {}", self.service, e)))
    }
}

/// Decode an AWS JSON error document.
///
/// `__type` looks like `com.amazonaws.dynamodb.v20120810#ConditionalCheckFailedException`;
/// only the part after `#` is kept.
fn parse_error_document(status: u16, body: &str) -> AwsCallError {
    let json: serde_json::Value = serde_json::from_str(body).unwrap_or_default();
    let error_type = json
        .get("__type")
        .and_then(|t| t.as_str())
        .map(|t| t.rsplit('#').next().unwrap_or(t).to_string())
        .unwrap_or_else(|| "UnknownError".to_string());
    let message = json
        .get("message")
        .or_else(|| json.get("Message"))
        .and_then(|m| m.as_str())
        .map(str::to_string)
        .unwrap_or_else(|| body.chars().take(500).collect());

    AwsCallError::Service {
        status,
        error_type,
        message,
    }
}

/// Build the SigV4 `Authorization` header for a `POST /` request.
///
/// `headers` must hold lowercase names; it is sorted in place.
fn sign_request(
    creds: &AwsCredentials,
    region: &str,
    service: &str,
    date_stamp: &str,
    amz_date: &str,
    headers: &mut [(String, String)],
    payload: &[u8],
) -> String {
    headers.sort_by(|a, b| a.0.cmp(&b.0));

    let signed_headers: String = headers
        .iter()
        .map(|(k, _)| k.as_str())
        .collect::<Vec<_>>()
        .join(";");

    let canonical_headers: String = headers
        .iter()
        .map(|(k, v)| format!("{}:{}\n", k, v.trim()))
        .collect();

    let payload_hash = hex_sha256(payload);
    let canonical_request = format!(
        "POST\n/\n\n{}\n{}\n{}",
        canonical_headers, signed_headers, payload_hash
    );

    let credential_scope = format!("{}/{}/{}/aws4_request", date_stamp, region, service);
    let string_to_sign = format!(
        "AWS4-HMAC-SHA256\n{}\n{}\n{}",
        amz_date,
        credential_scope,
        hex_sha256(canonical_request.as_bytes())
    );

    let signing_key = derive_signing_key(&creds.secret_access_key, date_stamp, region, service);
    let signature = hex::encode(hmac_sha256(&signing_key, string_to_sign.as_bytes()));

    format!(
        "AWS4-HMAC-SHA256 Credential={}/{}, SignedHeaders={}, Signature={}",
        creds.access_key_id, credential_scope, signed_headers, signature
    )
}

fn hex_sha256(data: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(data);
    hex::encode(hasher.finalize())
}

fn hmac_sha256(key: &[u8], data: &[u8]) -> Vec<u8> {
    let mut mac = HmacSha256::new_from_slice(key).expect("HMAC can take key of any size");
    mac.update(data);
    mac.finalize().into_bytes().to_vec()
}

/// Derive the AWS SigV4 signing key for a given date, region, and service.
///
/// ```text
/// kDate    = HMAC("AWS4" + secret, dateStamp)
/// kRegion  = HMAC(kDate, region)
/// kService = HMAC(kRegion, service)
/// kSigning = HMAC(kService, "aws4_request")
/// ```
fn derive_signing_key(secret_key: &str, date_stamp: &str, region: &str, service: &str) -> Vec<u8> {
    let k_date = hmac_sha256(
        format!("AWS4{}", secret_key).as_bytes(),
        date_stamp.as_bytes(),
    );
    let k_region = hmac_sha256(&k_date, region.as_bytes());
    let k_service = hmac_sha256(&k_region, service.as_bytes());
    hmac_sha256(&k_service, b"aws4_request")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_signing_key_matches_aws_reference() {
        // Reference values from the AWS SigV4 documentation.
        let key = derive_signing_key(
            "wJalrXUtnFEMI/K7MDENG+bPxRfiCYEXAMPLEKEY",
            "20120215",
            "us-east-1",
            "iam",
        );
        assert_eq!(
            hex::encode(key),
            "f4780e2d9f65fa895f9c67b32ce1baf0b0d8a43505a000a1a9e090d414db404d"
        );
    }

    #[test]
    fn test_sign_request_lists_sorted_headers() {
        let creds = AwsCredentials {
            access_key_id: "AKIDEXAMPLE".into(),
            secret_access_key: "secret".into(),
            session_token: None,
        };
        let mut headers = vec![
            ("x-amz-target".to_string(), "secretsmanager.GetSecretValue".to_string()),
            ("host".to_string(), "secretsmanager.us-east-1.amazonaws.com".to_string()),
            ("content-type".to_string(), "application/x-amz-json-1.1".to_string()),
            ("x-amz-date".to_string(), "20240101T000000Z".to_string()),
        ];
        let auth = sign_request(
            &creds,
            "us-east-1",
            "secretsmanager",
            "20240101",
            "20240101T000000Z",
            &mut headers,
            b"{}",
        );
        assert!(auth.starts_with(
            "AWS4-HMAC-SHA256 Credential=AKIDEXAMPLE/20240101/us-east-1/secretsmanager/aws4_request"
        ));
        assert!(auth.contains("SignedHeaders=content-type;host;x-amz-date;x-amz-target"));
        let signature = auth.rsplit("Signature=").next().unwrap();
        assert_eq!(signature.len(), 64);
    }

    #[test]
    fn test_parse_error_document_strips_namespace() {
        let err = parse_error_document(
            400,
            r#"{"__type":"com.amazonaws.dynamodb.v20120810#ConditionalCheckFailedException","message":"The conditional request failed"}"#,
        );
        assert_eq!(err.error_type(), Some("ConditionalCheckFailedException"));
        assert!(err.to_string().contains("conditional request failed"));
    }

    #[test]
    fn test_custom_endpoint_keeps_http_scheme() {
        let client = AwsJsonClient::new(
            "dynamodb",
            "us-east-1",
            "DynamoDB_20120810",
            "1.0",
            Some("http://localhost:4566/".into()),
        );
        assert_eq!(client.host(), "localhost:4566");
        assert_eq!(client.url(), "http://localhost:4566/");

        let client = AwsJsonClient::new("dynamodb", "eu-west-1", "DynamoDB_20120810", "1.0", None);
        assert_eq!(client.url(), "https://dynamodb.eu-west-1.amazonaws.com/");
    }
}
