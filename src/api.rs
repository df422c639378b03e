use async_trait::async_trait;
use reqwest::header::{CACHE_CONTROL, PRAGMA};
use reqwest::{Client, RequestBuilder, Response, StatusCode};
use serde::de::DeserializeOwned;
use serde_json::Value;
use tracing::debug;

use crate::config::Settings;
use crate::error::ApiError;
use crate::model::{AttemptSnapshot, SubmitPayload, SubmitReceipt, TestDefinition};

/// Server endpoints a test session talks to.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait AttemptApi: Send + Sync {
    async fn fetch_test(&self, test_id: u64) -> Result<TestDefinition, ApiError>;

    /// `Ok(None)` when the user has no attempt for the test.
    async fn attempt_status(&self, test_id: u64) -> Result<Option<AttemptSnapshot>, ApiError>;

    async fn start_attempt(&self, test_id: u64) -> Result<AttemptSnapshot, ApiError>;

    async fn submit_attempt(
        &self,
        test_id: u64,
        payload: &SubmitPayload,
    ) -> Result<SubmitReceipt, ApiError>;
}

#[derive(Debug, Clone)]
pub struct HttpAttemptApi {
    client: Client,
    base_url: String,
    token: Option<String>,
}

impl HttpAttemptApi {
    pub fn from_settings(settings: &Settings) -> Result<Self, ApiError> {
        let client = Client::builder()
            .timeout(settings.request_timeout)
            .build()?;
        Ok(Self {
            client,
            base_url: settings.api_url.clone(),
            token: settings.token.clone(),
        })
    }

    fn url(&self, path: &str) -> String {
        format!("{}/{}", self.base_url, path.trim_start_matches('/'))
    }

    fn authorized(&self, request: RequestBuilder) -> RequestBuilder {
        match &self.token {
            Some(token) => request.bearer_auth(token),
            None => request,
        }
    }
}

#[async_trait]
impl AttemptApi for HttpAttemptApi {
    async fn fetch_test(&self, test_id: u64) -> Result<TestDefinition, ApiError> {
        let response = self
            .authorized(self.client.get(self.url(&format!("tests/{}", test_id))))
            .send()
            .await?;
        decode(response).await
    }

    async fn attempt_status(&self, test_id: u64) -> Result<Option<AttemptSnapshot>, ApiError> {
        let response = self
            .authorized(self.client.get(self.url(&format!("tests/{}/status", test_id))))
            .header(CACHE_CONTROL, "no-cache")
            .header(PRAGMA, "no-cache")
            .send()
            .await?;

        match response.status() {
            StatusCode::NOT_FOUND => {
                debug!(test_id, "no attempt on record");
                Ok(None)
            }
            StatusCode::NOT_MODIFIED => Err(ApiError::NotModified),
            _ => decode(response).await.map(Some),
        }
    }

    async fn start_attempt(&self, test_id: u64) -> Result<AttemptSnapshot, ApiError> {
        let response = self
            .authorized(self.client.post(self.url(&format!("tests/{}/start", test_id))))
            .send()
            .await?;
        decode(response).await
    }

    async fn submit_attempt(
        &self,
        test_id: u64,
        payload: &SubmitPayload,
    ) -> Result<SubmitReceipt, ApiError> {
        let response = self
            .authorized(self.client.post(self.url(&format!("tests/{}/submit", test_id))))
            .json(payload)
            .send()
            .await?;
        decode(response).await
    }
}

async fn decode<T: DeserializeOwned>(response: Response) -> Result<T, ApiError> {
    let status = response.status();
    let raw_body = response.text().await?;

    if !status.is_success() {
        return Err(ApiError::Status {
            status: status.as_u16(),
            message: error_detail(&raw_body),
        });
    }

    serde_json::from_str(&raw_body)
        .map_err(|err| ApiError::Decode(format!("{} (status {})", err, status)))
}

/// The API reports failures as `{"detail": "..."}`; anything else is shown raw.
fn error_detail(raw_body: &str) -> String {
    let parsed: Option<Value> = serde_json::from_str(raw_body).ok();
    let detail = parsed.as_ref().and_then(|body| body.get("detail"));
    match detail {
        Some(Value::String(message)) => message.clone(),
        Some(other) => other.to_string(),
        None if raw_body.trim().is_empty() => "no details".to_string(),
        None => raw_body.trim().to_string(),
    }
}
