//! HTTP transport implementation using reqwest

use crate::config::ConnectionConfig;
use crate::error::ClientError;
use crate::http::{error::map_http_error, OutboundRequest, Payload, Transport};
use async_trait::async_trait;
use reqwest::header::CONTENT_TYPE;
use reqwest::{Client, ClientBuilder, Response};
use std::sync::Arc;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

/// Maximum response size (10MB)
const MAX_RESPONSE_SIZE: usize = 10 * 1024 * 1024;

/// Default user agent
const USER_AGENT: &str = concat!("skywatch/", env!("CARGO_PKG_VERSION"));

/// Shared HTTP transport with connection pooling
#[derive(Debug, Clone)]
pub struct HttpTransport {
    /// The underlying reqwest client
    client: Arc<Client>,

    /// Maximum response size to prevent OOM
    max_response_size: usize,
}

impl HttpTransport {
    /// Create a transport with default connection settings
    pub fn new() -> Result<Self, ClientError> {
        Self::with_config(&ConnectionConfig::default())
    }

    /// Create a transport from connection settings
    pub fn with_config(config: &ConnectionConfig) -> Result<Self, ClientError> {
        let client = ClientBuilder::new()
            .pool_max_idle_per_host(config.max_idle_per_host)
            .pool_idle_timeout(config.keepalive())
            .connect_timeout(config.connect_timeout())
            .timeout(config.request_timeout())
            .user_agent(USER_AGENT)
            .gzip(true)
            .build()
            .map_err(|e| ClientError::configuration(format!("Failed to create HTTP client: {}", e)))?;

        Ok(Self {
            client: Arc::new(client),
            max_response_size: MAX_RESPONSE_SIZE,
        })
    }

    /// Override the response size limit
    pub fn with_max_response_size(mut self, bytes: usize) -> Self {
        self.max_response_size = bytes;
        self
    }

    /// Check advertised response size to prevent OOM
    fn check_content_length(
        &self,
        provider: &str,
        response: &Response,
        request_id: Uuid,
    ) -> Result<(), ClientError> {
        if let Some(content_length) = response.content_length() {
            if content_length as usize > self.max_response_size {
                return Err(self.too_large(provider, content_length as usize, response.status().as_u16(), request_id));
            }
        }
        Ok(())
    }

    fn too_large(&self, provider: &str, size: usize, status: u16, request_id: Uuid) -> ClientError {
        warn!(
            "Response from {} too large: {} bytes [request_id: {}]",
            provider, size, request_id
        );
        ClientError::Validation {
            message: format!(
                "Response size {} exceeds maximum {} [request_id: {}]",
                size, self.max_response_size, request_id
            ),
            status: Some(status),
        }
    }
}

fn map_send_error(provider: &str, e: reqwest::Error, request_id: Uuid) -> ClientError {
    let message = if e.is_timeout() {
        warn!("Request timeout for {} [request_id: {}]", provider, request_id);
        format!("Request timed out [request_id: {}]", request_id)
    } else if e.is_connect() {
        error!("Connection error for {} [request_id: {}]: {}", provider, request_id, e);
        format!("Connection failed: {} [request_id: {}]", e, request_id)
    } else {
        error!("Request error for {} [request_id: {}]: {}", provider, request_id, e);
        format!("{} [request_id: {}]", e, request_id)
    };
    ClientError::transient(provider, message)
}

#[async_trait]
impl Transport for HttpTransport {
    async fn send(&self, request: OutboundRequest) -> Result<Payload, ClientError> {
        let shown_url = request.redacted_url();
        let OutboundRequest {
            request_id,
            provider,
            url,
            headers,
            timeout,
            secret_param: _,
        } = request;

        info!(
            "Executing HTTP request to {} [request_id: {}]",
            provider, request_id
        );
        debug!("Request URL: {}", shown_url);

        let mut req_builder = self
            .client
            .get(url)
            .timeout(timeout)
            .header("X-Request-ID", request_id.to_string());
        for (name, value) in &headers {
            req_builder = req_builder.header(name.as_str(), value.expose_secret());
        }

        let response = req_builder
            .send()
            .await
            .map_err(|e| map_send_error(&provider, e, request_id))?;

        let status = response.status();
        debug!("Response status: {} [request_id: {}]", status, request_id);

        if !status.is_success() {
            // Capture headers for retry-after parsing
            let headers = response.headers().clone();
            let body = response.text().await.ok();

            warn!(
                "Request failed with status {} for {} [request_id: {}]",
                status, provider, request_id
            );
            return Err(map_http_error(&provider, status, Some(&headers), body, request_id));
        }

        self.check_content_length(&provider, &response, request_id)?;

        let content_type = response
            .headers()
            .get(CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .map(str::to_string);

        let body = response.text().await.map_err(|e| ClientError::TransientNetwork {
            provider: provider.clone(),
            message: format!("Failed to read response body: {} [request_id: {}]", e, request_id),
            status: Some(status.as_u16()),
            retries: 0,
        })?;

        // Servers may omit or understate Content-Length
        if body.len() > self.max_response_size {
            return Err(self.too_large(&provider, body.len(), status.as_u16(), request_id));
        }

        info!(
            "Request completed successfully for {} [request_id: {}]",
            provider, request_id
        );

        Ok(Payload {
            status: status.as_u16(),
            content_type,
            body,
        })
    }
}
