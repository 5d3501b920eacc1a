//! Portal REST API client
//!
//! Requests go through [`AuthMiddleware`], which attaches the stored bearer
//! token and recovers from one expired access token per request by
//! refreshing it. The wire itself sits behind the [`Transport`] trait so the
//! middleware can be driven by [`ReqwestTransport`] in the binary and by
//! scripted fakes in tests.

pub mod middleware;
pub mod status;
pub mod transport;

pub use middleware::AuthMiddleware;
pub use status::{error_message, status_message};
pub use transport::ReqwestTransport;

use std::future::Future;
use std::pin::Pin;

use common::Secret;
use reqwest::Method;
use serde::de::DeserializeOwned;
use uuid::Uuid;

/// Errors from portal API calls.
#[derive(Debug, thiserror::Error)]
pub enum ApiError {
    /// Server answered with a non-2xx status.
    #[error("{message} (status {status})")]
    Status {
        status: u16,
        message: String,
        body: String,
    },

    /// No response: connect failure, timeout, broken body.
    #[error("network error: {0}")]
    Network(String),

    #[error("response decode error: {0}")]
    Decode(String),

    #[error("client configuration error: {0}")]
    Config(String),
}

impl ApiError {
    /// The session could not be kept alive: a 401 that survived (or could
    /// not attempt) a token refresh.
    pub fn is_session_expired(&self) -> bool {
        matches!(self, ApiError::Status { status: 401, .. })
    }

    pub fn status(&self) -> Option<u16> {
        match self {
            ApiError::Status { status, .. } => Some(*status),
            _ => None,
        }
    }
}

/// Result alias for API calls.
pub type Result<T> = std::result::Result<T, ApiError>;

/// One outbound API call.
#[derive(Debug, Clone)]
pub struct ApiRequest {
    /// Correlation id for logs.
    pub id: Uuid,
    pub method: Method,
    /// Path relative to the API base, e.g. `services/app/Equipment/GetAll`.
    pub path: String,
    pub query: Vec<(String, String)>,
    pub body: Option<serde_json::Value>,
    /// Never carries the bearer header and is never refreshed.
    pub public: bool,
    /// Set once the request has been re-issued after a refresh.
    pub retried: bool,
}

impl ApiRequest {
    pub fn new(method: Method, path: impl Into<String>) -> Self {
        Self {
            id: Uuid::new_v4(),
            method,
            path: path.into(),
            query: Vec::new(),
            body: None,
            public: false,
            retried: false,
        }
    }

    pub fn get(path: impl Into<String>) -> Self {
        Self::new(Method::GET, path)
    }

    pub fn post(path: impl Into<String>, body: serde_json::Value) -> Self {
        Self::new(Method::POST, path).with_body(body)
    }

    pub fn with_body(mut self, body: serde_json::Value) -> Self {
        self.body = Some(body);
        self
    }

    pub fn query(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.query.push((name.into(), value.into()));
        self
    }

    pub fn public(mut self) -> Self {
        self.public = true;
        self
    }
}

/// Status and body of a completed exchange.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ApiResponse {
    pub status: u16,
    pub body: String,
}

impl ApiResponse {
    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.status)
    }

    pub fn json<T: DeserializeOwned>(&self) -> Result<T> {
        serde_json::from_str(&self.body).map_err(|e| ApiError::Decode(e.to_string()))
    }

    /// Convert a non-2xx response into [`ApiError::Status`].
    pub fn error_for_status(self) -> Result<Self> {
        if self.is_success() {
            return Ok(self);
        }
        Err(ApiError::Status {
            status: self.status,
            message: error_message(self.status, &self.body),
            body: self.body,
        })
    }
}

/// Boxed future returned by [`Transport::execute`].
pub type TransportFuture<'a> = Pin<Box<dyn Future<Output = Result<ApiResponse>> + Send + 'a>>;

/// Sends one request and returns whatever the server answered.
///
/// A non-2xx status is a successful exchange; only failures to get a
/// response at all are errors. Uses `Pin<Box<dyn Future>>` return types so
/// the middleware can hold an `Arc<dyn Transport>`.
pub trait Transport: Send + Sync {
    fn execute<'a>(
        &'a self,
        request: &'a ApiRequest,
        bearer: Option<&'a Secret<String>>,
    ) -> TransportFuture<'a>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn builder_defaults() {
        let req = ApiRequest::get("services/app/Equipment/GetAll").query("page", "1");
        assert_eq!(req.method, Method::GET);
        assert!(!req.public);
        assert!(!req.retried);
        assert_eq!(req.query, vec![("page".to_string(), "1".to_string())]);

        let other = ApiRequest::get("x");
        assert_ne!(req.id, other.id);
    }

    #[test]
    fn error_for_status_maps_message() {
        let ok = ApiResponse {
            status: 204,
            body: String::new(),
        };
        assert!(ok.error_for_status().is_ok());

        let err = ApiResponse {
            status: 401,
            body: r#"{"error":{"message":"Current user did not login"}}"#.into(),
        }
        .error_for_status()
        .unwrap_err();
        assert!(err.is_session_expired());
        assert_eq!(err.status(), Some(401));
        assert!(err.to_string().contains("Current user did not login"));
    }

    #[test]
    fn json_decode_errors_are_typed() {
        let resp = ApiResponse {
            status: 200,
            body: "not json".into(),
        };
        let result: Result<serde_json::Value> = resp.json();
        assert!(matches!(result, Err(ApiError::Decode(_))));
    }
}
