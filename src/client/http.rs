//! # HTTP Task Transport
//!
//! reqwest-based client for the Task Service REST surface:
//!
//! - `POST /tasks`
//! - `GET /tasks/{taskId}`
//! - `POST /tasks/{taskId}/cancel`
//! - `GET /health`

use async_trait::async_trait;
use reqwest::{Client, RequestBuilder, Url};
use serde::de::DeserializeOwned;
use std::time::Duration;
use tracing::{debug, warn};

use crate::client::TaskTransport;
use crate::config::BridgeConfig;
use crate::constants::endpoints;
use crate::error::{BridgeError, BridgeResult};
use crate::models::{
    CancelTaskResponse, HealthResponse, SubmitTaskRequest, SubmitTaskResponse, TaskStatusSnapshot,
};

/// HTTP client for the Task Service
///
/// # Examples
///
/// ```rust
/// use tasker_agent_bridge::client::HttpTaskTransport;
/// use tasker_agent_bridge::config::BridgeConfig;
///
/// let transport = HttpTaskTransport::new(&BridgeConfig::default()).unwrap();
/// assert_eq!(transport.base_url().as_str(), "http://localhost:8080/");
/// ```
#[derive(Clone)]
pub struct HttpTaskTransport {
    client: Client,
    base_url: Url,
    timeout: Duration,
}

impl std::fmt::Debug for HttpTaskTransport {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HttpTaskTransport")
            .field("base_url", &self.base_url.as_str())
            .field("timeout_ms", &(self.timeout.as_millis() as u64))
            .finish()
    }
}

impl HttpTaskTransport {
    /// Build a transport from the bridge configuration
    ///
    /// Fails with a configuration error for a malformed base URL.
    pub fn new(config: &BridgeConfig) -> BridgeResult<Self> {
        let base_url = config.base_url()?;
        if base_url.cannot_be_a_base() {
            return Err(BridgeError::configuration(format!(
                "Base URL cannot carry paths: {base_url}"
            )));
        }

        let timeout = config.request_timeout();
        let user_agent = config
            .user_agent
            .clone()
            .unwrap_or_else(|| format!("tasker-agent-bridge/{}", env!("CARGO_PKG_VERSION")));

        let client = Client::builder()
            .timeout(timeout)
            .user_agent(user_agent)
            .build()
            .map_err(|e| {
                BridgeError::configuration(format!("Failed to create HTTP client: {e}"))
            })?;

        debug!(
            base_url = %base_url,
            timeout_ms = timeout.as_millis() as u64,
            "Created HTTP task transport"
        );

        Ok(Self {
            client,
            base_url,
            timeout,
        })
    }

    pub fn base_url(&self) -> &Url {
        &self.base_url
    }

    /// Append path segments to the base URL, percent-encoding each one
    fn endpoint_url(&self, segments: &[&str]) -> BridgeResult<Url> {
        let mut url = self.base_url.clone();
        {
            let mut path = url.path_segments_mut().map_err(|()| {
                BridgeError::configuration("Base URL cannot carry paths".to_string())
            })?;
            path.pop_if_empty().extend(segments);
        }
        Ok(url)
    }

    async fn execute<T>(&self, request: RequestBuilder, operation: &str) -> BridgeResult<T>
    where
        T: DeserializeOwned,
    {
        let response = request.send().await.map_err(|e| {
            let error = BridgeError::from_reqwest(&e);
            debug!(operation = operation, error = %error, "Request did not complete");
            error
        })?;

        self.handle_response(response, operation).await
    }

    /// Handle HTTP response and deserialize JSON
    async fn handle_response<T>(&self, response: reqwest::Response, operation: &str) -> BridgeResult<T>
    where
        T: DeserializeOwned,
    {
        let status = response.status();
        if status.is_success() {
            let body = response
                .bytes()
                .await
                .map_err(|e| BridgeError::from_reqwest(&e))?;
            let result = serde_json::from_slice::<T>(&body).map_err(|e| {
                BridgeError::invalid_response(operation, format!("Failed to parse response: {e}"))
            })?;

            debug!("Successfully completed operation: {}", operation);
            Ok(result)
        } else {
            let error_text = response
                .text()
                .await
                .unwrap_or_else(|_| "Unknown error".to_string());
            warn!(status = %status, error = %error_text, "Failed operation: {}", operation);
            Err(BridgeError::http(status.as_u16(), error_text))
        }
    }
}

#[async_trait]
impl TaskTransport for HttpTaskTransport {
    fn transport_name(&self) -> &'static str {
        "http"
    }

    fn endpoint(&self) -> &str {
        self.base_url.as_str()
    }

    async fn submit(&self, request: &SubmitTaskRequest) -> BridgeResult<SubmitTaskResponse> {
        let url = self.endpoint_url(&[endpoints::TASKS])?;
        debug!(url = %url, agent_type = %request.agent_type, "Submitting task");

        self.execute(self.client.post(url).json(request), "submit_task")
            .await
    }

    async fn get_status(&self, task_id: &str) -> BridgeResult<TaskStatusSnapshot> {
        let url = self.endpoint_url(&[endpoints::TASKS, task_id])?;
        debug!(url = %url, task_id = %task_id, "Fetching task status");

        self.execute(self.client.get(url), "get_task_status").await
    }

    async fn cancel(&self, task_id: &str) -> BridgeResult<CancelTaskResponse> {
        let url = self.endpoint_url(&[endpoints::TASKS, task_id, endpoints::CANCEL])?;
        debug!(url = %url, task_id = %task_id, "Cancelling task");

        self.execute(self.client.post(url), "cancel_task").await
    }

    async fn health(&self) -> BridgeResult<HealthResponse> {
        let url = self.endpoint_url(&[endpoints::HEALTH])?;

        self.execute(self.client.get(url), "health_check").await
    }
}
