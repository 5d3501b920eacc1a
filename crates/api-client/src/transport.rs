//! reqwest-backed transport

use std::time::Duration;

use common::Secret;
use reqwest::header::{ACCEPT, AUTHORIZATION, CONTENT_TYPE, HeaderMap, HeaderValue};
use tracing::{debug, error, instrument};

use crate::{ApiError, ApiRequest, ApiResponse, Result, Transport, TransportFuture};

/// Sends requests to the portal API over HTTPS.
pub struct ReqwestTransport {
    client: reqwest::Client,
    base_url: String,
    timeout: Duration,
}

impl ReqwestTransport {
    pub fn new(base_url: impl Into<String>, timeout: Duration) -> Result<Self> {
        let mut headers = HeaderMap::new();
        headers.insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));
        headers.insert(ACCEPT, HeaderValue::from_static("application/json"));

        let client = reqwest::Client::builder()
            .default_headers(headers)
            .build()
            .map_err(|e| ApiError::Config(format!("building HTTP client: {e}")))?;

        Ok(Self {
            client,
            base_url: base_url.into().trim_end_matches('/').to_string(),
            timeout,
        })
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    pub fn url_for(&self, path: &str) -> String {
        format!("{}/{}", self.base_url, path.trim_start_matches('/'))
    }

    #[instrument(skip_all, fields(request_id = %request.id, method = %request.method, path = %request.path))]
    async fn send(
        &self,
        request: &ApiRequest,
        bearer: Option<&Secret<String>>,
    ) -> Result<ApiResponse> {
        let mut builder = self
            .client
            .request(request.method.clone(), self.url_for(&request.path))
            .timeout(self.timeout);

        if !request.query.is_empty() {
            builder = builder.query(&request.query);
        }
        if let Some(body) = &request.body {
            builder = builder.json(body);
        }
        if let Some(token) = bearer {
            let value = HeaderValue::from_str(&format!("Bearer {}", token.expose()))
                .map_err(|e| ApiError::Config(format!("invalid bearer token: {e}")))?;
            builder = builder.header(AUTHORIZATION, value);
        }

        let response = builder.send().await.map_err(|e| {
            error!(error = %e, timeout = e.is_timeout(), "request failed");
            ApiError::Network(e.to_string())
        })?;

        let status = response.status().as_u16();
        let body = response.text().await.map_err(|e| {
            error!(error = %e, status, "failed to read response body");
            ApiError::Network(format!("reading response body: {e}"))
        })?;

        debug!(status, bytes = body.len(), "response received");
        Ok(ApiResponse { status, body })
    }
}

impl Transport for ReqwestTransport {
    fn execute<'a>(
        &'a self,
        request: &'a ApiRequest,
        bearer: Option<&'a Secret<String>>,
    ) -> TransportFuture<'a> {
        Box::pin(self.send(request, bearer))
    }
}
