//! HTTP provider adapters.
//!
//! Each adapter POSTs the camelCase JSON request to one endpoint and decodes
//! the camelCase JSON response. Status and transport failures are mapped onto
//! [`ProviderError`]; retrying is left to the stage executor.

use async_trait::async_trait;
use reqwest::{Client, StatusCode};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tracing::debug;

use super::{
    AnalyzeRequest, AnalyzeResponse, GenerateImageRequest, GenerateImageResponse, ImageAnalyzer,
    ImageGenerator, RewriteRequest, RewriteResponse, TextRewriter,
};
use crate::errors::ProviderError;

/// Endpoint configuration for one HTTP provider.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HttpProviderConfig {
    /// Full URL the request is POSTed to.
    pub endpoint: String,
    /// Environment variable holding a bearer token.
    #[serde(default)]
    pub api_key_env: Option<String>,
    /// Request timeout in milliseconds.
    #[serde(default = "default_request_timeout_ms")]
    pub timeout_ms: u64,
}

fn default_request_timeout_ms() -> u64 {
    120_000
}

impl HttpProviderConfig {
    /// Creates a config for an endpoint with the default timeout.
    #[must_use]
    pub fn new(endpoint: impl Into<String>) -> Self {
        Self {
            endpoint: endpoint.into(),
            api_key_env: None,
            timeout_ms: default_request_timeout_ms(),
        }
    }

    /// Sets the API key environment variable.
    #[must_use]
    pub fn with_api_key_env(mut self, var: impl Into<String>) -> Self {
        self.api_key_env = Some(var.into());
        self
    }

    /// Sets the request timeout.
    #[must_use]
    pub fn with_timeout_ms(mut self, timeout_ms: u64) -> Self {
        self.timeout_ms = timeout_ms;
        self
    }
}

#[derive(Debug, Clone)]
struct JsonEndpoint {
    client: Client,
    config: HttpProviderConfig,
    api_key: Option<String>,
}

impl JsonEndpoint {
    fn new(config: HttpProviderConfig) -> Result<Self, ProviderError> {
        let client = Client::builder()
            .timeout(Duration::from_millis(config.timeout_ms))
            .build()
            .map_err(|err| ProviderError::unavailable(err.to_string()))?;
        let api_key = config
            .api_key_env
            .as_deref()
            .and_then(|var| std::env::var(var).ok());

        Ok(Self {
            client,
            config,
            api_key,
        })
    }

    async fn post<Req, Resp>(&self, body: &Req) -> Result<Resp, ProviderError>
    where
        Req: Serialize + Sync,
        Resp: DeserializeOwned,
    {
        let mut request = self.client.post(&self.config.endpoint).json(body);
        if let Some(ref key) = self.api_key {
            request = request.bearer_auth(key);
        }

        let response = request.send().await.map_err(|err| self.transport_error(&err))?;
        let status = response.status();
        debug!(endpoint = %self.config.endpoint, status = status.as_u16(), "Provider responded");

        if status.is_server_error() || status == StatusCode::TOO_MANY_REQUESTS {
            return Err(ProviderError::unavailable(format!("HTTP {status}")));
        }
        if !status.is_success() {
            return Err(ProviderError::invalid_response(format!("HTTP {status}")));
        }

        let bytes = response.bytes().await.map_err(|err| self.transport_error(&err))?;
        if bytes.iter().all(u8::is_ascii_whitespace) {
            return Err(ProviderError::EmptyResponse);
        }
        serde_json::from_slice(&bytes).map_err(|err| ProviderError::invalid_response(err.to_string()))
    }

    fn transport_error(&self, err: &reqwest::Error) -> ProviderError {
        if err.is_timeout() {
            ProviderError::Timeout {
                timeout_ms: self.config.timeout_ms,
            }
        } else {
            ProviderError::unavailable(err.to_string())
        }
    }
}

/// Text rewriter over HTTP.
#[derive(Debug, Clone)]
pub struct HttpTextRewriter {
    endpoint: JsonEndpoint,
}

impl HttpTextRewriter {
    /// Creates the adapter.
    pub fn new(config: HttpProviderConfig) -> Result<Self, ProviderError> {
        Ok(Self {
            endpoint: JsonEndpoint::new(config)?,
        })
    }
}

#[async_trait]
impl TextRewriter for HttpTextRewriter {
    async fn rewrite(&self, request: RewriteRequest) -> Result<RewriteResponse, ProviderError> {
        self.endpoint.post(&request).await
    }
}

/// Image analyzer over HTTP.
#[derive(Debug, Clone)]
pub struct HttpImageAnalyzer {
    endpoint: JsonEndpoint,
}

impl HttpImageAnalyzer {
    /// Creates the adapter.
    pub fn new(config: HttpProviderConfig) -> Result<Self, ProviderError> {
        Ok(Self {
            endpoint: JsonEndpoint::new(config)?,
        })
    }
}

#[async_trait]
impl ImageAnalyzer for HttpImageAnalyzer {
    async fn analyze(&self, request: AnalyzeRequest) -> Result<AnalyzeResponse, ProviderError> {
        self.endpoint
            .post(&request)
            .await
            .map_err(|err| unreachable_on_client_error(err, &request.image_url))
    }
}

/// Image generator over HTTP.
#[derive(Debug, Clone)]
pub struct HttpImageGenerator {
    endpoint: JsonEndpoint,
}

impl HttpImageGenerator {
    /// Creates the adapter.
    pub fn new(config: HttpProviderConfig) -> Result<Self, ProviderError> {
        Ok(Self {
            endpoint: JsonEndpoint::new(config)?,
        })
    }
}

#[async_trait]
impl ImageGenerator for HttpImageGenerator {
    async fn generate(
        &self,
        request: GenerateImageRequest,
    ) -> Result<GenerateImageResponse, ProviderError> {
        self.endpoint
            .post(&request)
            .await
            .map_err(|err| unreachable_on_client_error(err, &request.reference_image_url))
    }
}

// Image providers answer 4xx when they cannot fetch the referenced image.
fn unreachable_on_client_error(err: ProviderError, url: &str) -> ProviderError {
    match err {
        ProviderError::InvalidResponse { ref message } if message.starts_with("HTTP 4") => {
            ProviderError::unreachable_image(url)
        }
        other => other,
    }
}
