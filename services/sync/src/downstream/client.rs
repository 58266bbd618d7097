use std::time::Duration;

use async_trait::async_trait;
use chrono::NaiveDateTime;
use reqwest::{Client, StatusCode};
use serde::de::DeserializeOwned;

use punchsync_common::punch::{LogicalEvent, TIMESTAMP_FORMAT};
use punchsync_config::DownstreamConfig;

use super::models::{
    CheckinRecord, CreateOutcome, EmployeeRecord, EmployeeStatus, NewCheckin, ResourceDoc,
    ResourceList,
};

const EMPLOYEE_RESOURCE: &str = "/api/resource/Employee";
const CHECKIN_RESOURCE: &str = "/api/resource/Employee%20Checkin";

#[derive(Debug, thiserror::Error)]
pub enum DownstreamError {
    #[error("HTTP {status}: {body}")]
    HttpError { status: StatusCode, body: String },

    #[error("request failed: {0}")]
    RequestError(#[from] reqwest::Error),

    #[error("max retries exceeded after {attempts} attempts: {last_error}")]
    MaxRetriesExceeded { attempts: u32, last_error: String },
}

/// The HR system that owns employee checkins.
#[async_trait]
pub trait DownstreamClient: Send + Sync {
    async fn get_employee_status(&self, employee_id: &str)
        -> Result<EmployeeStatus, DownstreamError>;

    /// Whether a checkin for this employee at exactly this instant exists.
    async fn find_checkin(
        &self,
        employee_id: &str,
        occurred_at: NaiveDateTime,
    ) -> Result<bool, DownstreamError>;

    /// Single attempt. `Err` only for failures worth retrying in a later batch.
    async fn create_checkin(&self, event: &LogicalEvent)
        -> Result<CreateOutcome, DownstreamError>;
}

#[derive(Clone)]
pub struct ErpNextClient {
    client: Client,
    config: DownstreamConfig,
}

impl ErpNextClient {
    pub fn new(config: DownstreamConfig) -> Result<Self, reqwest::Error> {
        let client = Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()?;
        Ok(Self { client, config })
    }

    /// For testing: create a client pointing at a specific base URL (e.g., wiremock).
    #[cfg(test)]
    pub fn with_base_url(mut self, base_url: &str) -> Self {
        self.config.base_url = base_url.to_string();
        self
    }

    fn auth_header(&self) -> String {
        format!("token {}:{}", self.config.api_key, self.config.api_secret)
    }

    async fn get_with_retry<T: DeserializeOwned>(
        &self,
        resource: &str,
        query: &[(&str, String)],
    ) -> Result<T, DownstreamError> {
        let url = format!("{}{}", self.config.base_url, resource);
        let mut last_error = String::new();

        for attempt in 0..=self.config.max_retries {
            if attempt > 0 {
                let backoff_secs = std::cmp::min(1u64 << (attempt - 1), 30);
                tracing::warn!(attempt, backoff_secs, resource, "retrying after backoff");
                tokio::time::sleep(Duration::from_secs(backoff_secs)).await;
            }

            let response = match self
                .client
                .get(&url)
                .header("Authorization", self.auth_header())
                .header("Accept", "application/json")
                .query(query)
                .send()
                .await
            {
                Ok(resp) => resp,
                Err(e) => {
                    last_error = e.to_string();
                    if e.is_timeout() || e.is_connect() {
                        continue;
                    }
                    return Err(DownstreamError::RequestError(e));
                }
            };

            let status = response.status();

            if status.is_success() {
                return response.json::<T>().await.map_err(DownstreamError::RequestError);
            }

            if status == StatusCode::TOO_MANY_REQUESTS {
                if let Some(retry_after) = response
                    .headers()
                    .get("retry-after")
                    .and_then(|v| v.to_str().ok())
                    .and_then(|v| v.parse::<u64>().ok())
                {
                    let wait = std::cmp::min(retry_after, 60);
                    tracing::warn!(wait, "rate-limited, waiting Retry-After");
                    tokio::time::sleep(Duration::from_secs(wait)).await;
                }
                last_error = "429 Too Many Requests".to_string();
                continue;
            }

            if status.is_server_error() {
                let body = response.text().await.unwrap_or_default();
                last_error = format!("{status}: {body}");
                continue;
            }

            let body = response.text().await.unwrap_or_default();
            return Err(DownstreamError::HttpError { status, body });
        }

        Err(DownstreamError::MaxRetriesExceeded {
            attempts: self.config.max_retries + 1,
            last_error,
        })
    }
}

#[async_trait]
impl DownstreamClient for ErpNextClient {
    async fn get_employee_status(
        &self,
        employee_id: &str,
    ) -> Result<EmployeeStatus, DownstreamError> {
        let filters = serde_json::json!({ "employee": employee_id }).to_string();
        let list: ResourceList<EmployeeRecord> = self
            .get_with_retry(
                EMPLOYEE_RESOURCE,
                &[("filters", filters), ("fields", r#"["status"]"#.to_owned())],
            )
            .await?;

        Ok(match list.data.first() {
            None => EmployeeStatus::NotFound,
            Some(record) if record.status.as_deref() == Some("Active") => EmployeeStatus::Active,
            Some(_) => EmployeeStatus::Inactive,
        })
    }

    async fn find_checkin(
        &self,
        employee_id: &str,
        occurred_at: NaiveDateTime,
    ) -> Result<bool, DownstreamError> {
        let time = occurred_at.format(TIMESTAMP_FORMAT).to_string();
        let filters = serde_json::json!([
            ["employee", "=", employee_id],
            ["time", "=", time],
        ])
        .to_string();
        let list: ResourceList<CheckinRecord> = self
            .get_with_retry(
                CHECKIN_RESOURCE,
                &[
                    ("filters", filters),
                    ("fields", r#"["name"]"#.to_owned()),
                    ("limit_page_length", "1".to_owned()),
                ],
            )
            .await?;

        Ok(!list.data.is_empty())
    }

    async fn create_checkin(
        &self,
        event: &LogicalEvent,
    ) -> Result<CreateOutcome, DownstreamError> {
        let url = format!("{}{}", self.config.base_url, CHECKIN_RESOURCE);
        let response = self
            .client
            .post(&url)
            .header("Authorization", self.auth_header())
            .header("Accept", "application/json")
            .json(&NewCheckin::from(event))
            .send()
            .await?;

        let status = response.status();

        if status.is_success() {
            let name = response
                .json::<ResourceDoc<CheckinRecord>>()
                .await
                .map(|doc| doc.data.name)
                .unwrap_or_default();
            return Ok(CreateOutcome::Created { name });
        }

        let body = response.text().await.unwrap_or_default();

        if status == StatusCode::CONFLICT {
            return Ok(CreateOutcome::Duplicate);
        }
        if status == StatusCode::TOO_MANY_REQUESTS || status.is_server_error() {
            return Err(DownstreamError::HttpError { status, body });
        }
        Ok(CreateOutcome::Rejected {
            reason: format!("HTTP {status}: {body}"),
        })
    }
}
