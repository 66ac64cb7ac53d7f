//! DynamoDB-backed [`JobStateStore`] for the `aws` provider.
//!
//! Table layout (partition key `jobId`, string):
//!
//! | Attribute | Type | Notes |
//! |-----------|------|-------|
//! | `jobId` | S | partition key |
//! | `documentId` | S | |
//! | `userId` | S | optional |
//! | `status` | S | `PENDING`, `RUNNING`, … |
//! | `timeline` | S | JSON-encoded [`Timeline`], optional |
//! | `error` | S | optional |
//! | `createdAt`, `updatedAt` | N | Unix milliseconds |
//!
//! Writers are serialized by DynamoDB itself: creation uses
//! `attribute_not_exists(jobId)` and every transition is an `UpdateItem`
//! conditioned on the status read just before.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde_json::{json, Map, Value};
use std::str::FromStr;

use super::{check_transition, timeline_for, JobStateStore, Transition};
use crate::config::AwsConfig;
use crate::error::JobStoreError;
use crate::models::{AsyncJob, JobStatus, Timeline};
use crate::sigv4::{AwsCallError, AwsJsonClient};

pub struct DynamoJobStore {
    client: AwsJsonClient,
    table: String,
}

impl DynamoJobStore {
    pub fn new(config: &AwsConfig) -> Self {
        Self {
            client: AwsJsonClient::new(
                "dynamodb",
                &config.region,
                "DynamoDB_20120810",
                "1.0",
                config.endpoint_url.clone(),
            ),
            table: config.job_table.clone(),
        }
    }

    fn key(job_id: &str) -> Value {
        json!({ "jobId": { "S": job_id } })
    }
}

fn backend_err(e: AwsCallError) -> JobStoreError {
    JobStoreError::Backend(e.to_string())
}

fn string_attr(value: &str) -> Value {
    json!({ "S": value })
}

fn number_attr(value: i64) -> Value {
    json!({ "N": value.to_string() })
}

/// A fresh PENDING job with timestamps cut to the millisecond precision
/// the table keeps, so it equals what a later `get_job` returns.
fn new_job(document_id: &str, user_id: Option<&str>) -> AsyncJob {
    let mut job = AsyncJob::new(document_id, user_id);
    job.created_at = truncate_to_millis(job.created_at);
    job.updated_at = job.created_at;
    job
}

fn truncate_to_millis(t: DateTime<Utc>) -> DateTime<Utc> {
    DateTime::from_timestamp_millis(t.timestamp_millis()).unwrap_or(t)
}

/// Encode a job as a DynamoDB item.
fn job_to_item(job: &AsyncJob) -> Result<Value, JobStoreError> {
    let mut item = Map::new();
    item.insert("jobId".into(), string_attr(&job.job_id));
    item.insert("documentId".into(), string_attr(&job.document_id));
    if let Some(ref user_id) = job.user_id {
        item.insert("userId".into(), string_attr(user_id));
    }
    item.insert("status".into(), string_attr(job.status.as_str()));
    item.insert("createdAt".into(), number_attr(job.created_at.timestamp_millis()));
    item.insert("updatedAt".into(), number_attr(job.updated_at.timestamp_millis()));
    if let Some(ref timeline) = job.timeline {
        let encoded = serde_json::to_string(timeline)
            .map_err(|e| JobStoreError::Backend(e.to_string()))?;
        item.insert("timeline".into(), string_attr(&encoded));
    }
    if let Some(ref error) = job.error {
        item.insert("error".into(), string_attr(error));
    }
    Ok(Value::Object(item))
}

fn get_s<'a>(item: &'a Value, name: &str) -> Option<&'a str> {
    item.get(name)?.get("S")?.as_str()
}

fn get_n(item: &Value, name: &str) -> Option<i64> {
    item.get(name)?.get("N")?.as_str()?.parse().ok()
}

/// Decode a DynamoDB item into a job.
fn item_to_job(item: &Value) -> Result<AsyncJob, JobStoreError> {
    let missing = |attr: &str| JobStoreError::Backend(format!("job item missing '{}'", attr));

    let status = get_s(item, "status").ok_or_else(|| missing("status"))?;
    let timeline = match get_s(item, "timeline") {
        Some(json) => Some(
            serde_json::from_str::<Timeline>(json)
                .map_err(|e| JobStoreError::Backend(e.to_string()))?,
        ),
        None => None,
    };
    let millis = |attr: &str| -> Result<DateTime<Utc>, JobStoreError> {
        get_n(item, attr)
            .and_then(DateTime::from_timestamp_millis)
            .ok_or_else(|| missing(attr))
    };

    Ok(AsyncJob {
        job_id: get_s(item, "jobId").ok_or_else(|| missing("jobId"))?.to_string(),
        document_id: get_s(item, "documentId")
            .ok_or_else(|| missing("documentId"))?
            .to_string(),
        user_id: get_s(item, "userId").map(str::to_string),
        status: JobStatus::from_str(status).map_err(JobStoreError::Backend)?,
        created_at: millis("createdAt")?,
        updated_at: millis("updatedAt")?,
        timeline,
        error: get_s(item, "error").map(str::to_string),
    })
}

/// Build the conditional `UpdateItem` request for a transition.
fn update_request(
    table: &str,
    job_id: &str,
    from: JobStatus,
    to: JobStatus,
    timeline: Option<&Timeline>,
    error: Option<&str>,
    now: DateTime<Utc>,
) -> Result<Value, JobStoreError> {
    let mut sets = vec!["#status = :to", "#updatedAt = :now"];
    let mut names = Map::new();
    names.insert("#status".into(), json!("status"));
    names.insert("#updatedAt".into(), json!("updatedAt"));
    let mut values = Map::new();
    values.insert(":to".into(), string_attr(to.as_str()));
    values.insert(":from".into(), string_attr(from.as_str()));
    values.insert(":now".into(), number_attr(now.timestamp_millis()));

    if let Some(timeline) = timeline {
        let encoded = serde_json::to_string(timeline)
            .map_err(|e| JobStoreError::Backend(e.to_string()))?;
        sets.push("#timeline = :timeline");
        names.insert("#timeline".into(), json!("timeline"));
        values.insert(":timeline".into(), string_attr(&encoded));
    }
    if let Some(error) = error {
        sets.push("#error = :error");
        names.insert("#error".into(), json!("error"));
        values.insert(":error".into(), string_attr(error));
    }

    Ok(json!({
        "TableName": table,
        "Key": DynamoJobStore::key(job_id),
        "UpdateExpression": format!("SET {}", sets.join(", ")),
        "ConditionExpression": "#status = :from",
        "ExpressionAttributeNames": Value::Object(names),
        "ExpressionAttributeValues": Value::Object(values),
        "ReturnValues": "ALL_NEW",
    }))
}

#[async_trait]
impl JobStateStore for DynamoJobStore {
    fn backend(&self) -> &str {
        "dynamodb"
    }

    async fn create_job(
        &self,
        document_id: &str,
        user_id: Option<&str>,
    ) -> Result<AsyncJob, JobStoreError> {
        let job = new_job(document_id, user_id);
        let body = json!({
            "TableName": self.table,
            "Item": job_to_item(&job)?,
            "ConditionExpression": "attribute_not_exists(jobId)",
        });
        self.client
            .call("PutItem", &body)
            .await
            .map_err(backend_err)?;
        Ok(job)
    }

    async fn get_job(&self, job_id: &str) -> Result<Option<AsyncJob>, JobStoreError> {
        let body = json!({
            "TableName": self.table,
            "Key": Self::key(job_id),
            "ConsistentRead": true,
        });
        let resp = self.client.call("GetItem", &body).await.map_err(backend_err)?;
        resp.get("Item").map(item_to_job).transpose()
    }

    async fn apply_transition(
        &self,
        job_id: &str,
        transition: Transition<'_>,
    ) -> Result<AsyncJob, JobStoreError> {
        let current = self
            .get_job(job_id)
            .await?
            .ok_or_else(|| JobStoreError::NotFound(job_id.to_string()))?;

        check_transition(job_id, current.status, transition.to)?;

        let timeline = timeline_for(&current, &transition);
        let body = update_request(
            &self.table,
            job_id,
            current.status,
            transition.to,
            timeline.as_ref(),
            transition.error,
            Utc::now(),
        )?;

        match self.client.call("UpdateItem", &body).await {
            Ok(resp) => resp
                .get("Attributes")
                .map(item_to_job)
                .transpose()?
                .ok_or_else(|| JobStoreError::Backend("UpdateItem returned no attributes".into())),
            Err(e) if e.error_type() == Some("ConditionalCheckFailedException") => {
                // Another writer moved the job first.
                let actual = self
                    .get_job(job_id)
                    .await?
                    .ok_or_else(|| JobStoreError::NotFound(job_id.to_string()))?;
                Err(JobStoreError::InvalidTransition {
                    job_id: job_id.to_string(),
                    from: actual.status,
                    to: transition.to,
                })
            }
            Err(e) => Err(backend_err(e)),
        }
    }
}
