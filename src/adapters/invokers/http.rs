//! HTTP worker invoker.
//!
//! Posts `{context, options}` to `{base_url}/workers/{id}/invoke` and expects
//! `{output, metadata}` back.

use anyhow::{Context, Result};
use async_trait::async_trait;
use reqwest::{Client as ReqwestClient, StatusCode, Url};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::time::Duration;
use tracing::{debug, instrument, warn};

use crate::domain::errors::InvocationError;
use crate::domain::models::{InvocationOptions, InvokerConfig, WorkerContext, WorkerResponse};
use crate::domain::ports::WorkerInvoker;

/// Configuration for the HTTP worker invoker
#[derive(Debug, Clone)]
pub struct HttpInvokerConfig {
    pub base_url: String,
    pub timeout_secs: u64,
}

impl From<&InvokerConfig> for HttpInvokerConfig {
    fn from(config: &InvokerConfig) -> Self {
        Self {
            base_url: config.base_url.clone(),
            timeout_secs: config.request_timeout_secs,
        }
    }
}

pub struct HttpWorkerInvoker {
    http_client: ReqwestClient,
    base_url: Url,
    timeout_secs: u64,
}

#[derive(Serialize)]
struct InvokeRequest<'a> {
    context: &'a WorkerContext,
    options: &'a InvocationOptions,
}

#[derive(Deserialize)]
struct InvokeResponse {
    #[serde(default)]
    worker_id: Option<String>,
    output: String,
    #[serde(default)]
    metadata: Map<String, Value>,
}

impl HttpWorkerInvoker {
    pub fn new(config: HttpInvokerConfig) -> Result<Self> {
        let base_url = Url::parse(&config.base_url)
            .with_context(|| format!("Invalid invoker base URL: {}", config.base_url))?;
        if base_url.cannot_be_a_base() {
            anyhow::bail!("Invoker base URL cannot be a base: {}", config.base_url);
        }
        let http_client = ReqwestClient::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .pool_max_idle_per_host(10)
            .tcp_nodelay(true)
            .build()
            .context("Failed to build HTTP client")?;

        Ok(Self {
            http_client,
            base_url,
            timeout_secs: config.timeout_secs,
        })
    }

    fn endpoint(&self, worker_id: &str) -> Result<Url, InvocationError> {
        let mut url = self.base_url.clone();
        url.path_segments_mut()
            .map_err(|()| InvocationError::Provider(format!("invalid base URL {}", self.base_url)))?
            .pop_if_empty()
            .extend(["workers", worker_id, "invoke"]);
        Ok(url)
    }

    fn transport_error(&self, err: &reqwest::Error) -> InvocationError {
        if err.is_timeout() {
            InvocationError::Timeout(self.timeout_secs)
        } else {
            InvocationError::Provider(err.to_string())
        }
    }
}

#[async_trait]
impl WorkerInvoker for HttpWorkerInvoker {
    #[instrument(skip(self, context, options), fields(worker_id = %worker_id))]
    async fn invoke(
        &self,
        worker_id: &str,
        context: &WorkerContext,
        options: &InvocationOptions,
    ) -> Result<WorkerResponse, InvocationError> {
        let url = self.endpoint(worker_id)?;
        let response = self
            .http_client
            .post(url)
            .json(&InvokeRequest { context, options })
            .send()
            .await
            .map_err(|e| self.transport_error(&e))?;

        let status = response.status();
        if !status.is_success() {
            let body = response
                .text()
                .await
                .unwrap_or_else(|_| "Failed to read error response".to_string());
            warn!(status = %status, "worker invocation returned error status");
            return Err(match status {
                StatusCode::NOT_FOUND => InvocationError::UnknownWorker(worker_id.to_string()),
                StatusCode::REQUEST_TIMEOUT | StatusCode::TOO_MANY_REQUESTS => {
                    InvocationError::Provider(format!("{status}: {body}"))
                }
                s if s.is_server_error() => InvocationError::Provider(format!("{status}: {body}")),
                _ => InvocationError::InvalidResponse(format!("{status}: {body}")),
            });
        }

        let body: InvokeResponse = response.json().await.map_err(|e| {
            if e.is_timeout() {
                InvocationError::Timeout(self.timeout_secs)
            } else {
                InvocationError::InvalidResponse(e.to_string())
            }
        })?;
        debug!(output_len = body.output.len(), "worker invocation succeeded");

        Ok(WorkerResponse {
            worker_id: body.worker_id.unwrap_or_else(|| worker_id.to_string()),
            output: body.output,
            metadata: body.metadata,
        })
    }
}
