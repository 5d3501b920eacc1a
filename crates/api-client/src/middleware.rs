//! Bearer injection and 401 recovery
//!
//! Every request reads the access token from the credential store and
//! attaches it. A 401 on a request that has not been retried yet triggers
//! exactly one refresh through the refresh endpoint and one re-issue of the
//! request with the new token. When the refresh fails the session is ended
//! through the [`SessionTerminator`] (one `AuthFailure` event) and the
//! caller gets the original 401.
//!
//! Concurrent 401s each refresh on their own. Termination is conditional on
//! the session epoch seen when the request started, so however many
//! refreshes fail together, the session ends once.

use std::sync::{Arc, Mutex};

use common::Secret;
use dealer_auth::{
    AuthEvent, CredentialKey, REFRESH_PATH, REFRESH_QUERY_PARAM, SessionTerminator,
    parse_refresh_response,
};
use reqwest::Method;
use serde::de::DeserializeOwned;
use tracing::{debug, info, instrument, warn};

use crate::{ApiError, ApiRequest, ApiResponse, Result, Transport};

/// Authenticating front for a [`Transport`].
pub struct AuthMiddleware {
    transport: Arc<dyn Transport>,
    terminator: Arc<SessionTerminator>,
    /// Token installed by the last successful refresh, tagged with the
    /// session epoch it belongs to. Used only when the store cannot be read.
    default_bearer: Mutex<Option<(u64, Secret<String>)>>,
}

impl AuthMiddleware {
    pub fn new(transport: Arc<dyn Transport>, terminator: Arc<SessionTerminator>) -> Self {
        Self {
            transport,
            terminator,
            default_bearer: Mutex::new(None),
        }
    }

    /// Send `request`, recovering from one expired access token.
    ///
    /// Non-2xx responses come back as [`ApiError::Status`]. A 401 returned
    /// after recovery failed satisfies [`ApiError::is_session_expired`].
    #[instrument(skip_all, fields(request_id = %request.id, method = %request.method, path = %request.path))]
    pub async fn send(&self, mut request: ApiRequest) -> Result<ApiResponse> {
        let epoch = self.terminator.epoch();
        let bearer = if request.public {
            None
        } else {
            self.bearer(epoch).await
        };
        debug!(authenticated = bearer.is_some(), "sending request");

        let response = self.transport.execute(&request, bearer.as_ref()).await?;

        if response.status != 401 || request.public || request.retried {
            return response.error_for_status();
        }

        // Mark before re-issuing so the retry can never refresh again
        request.retried = true;

        match self.refresh().await {
            Ok(token) => {
                if self.terminator.epoch() != epoch {
                    info!(epoch, "session ended during refresh, discarding new token");
                    metrics::counter!("auth_token_refresh_total", "outcome" => "discarded")
                        .increment(1);
                    return response.error_for_status();
                }
                metrics::counter!("auth_token_refresh_total", "outcome" => "success").increment(1);
                self.install(epoch, &token).await;

                info!(token = %token.fingerprint(), "access token refreshed, retrying request");
                metrics::counter!("auth_request_retries_total").increment(1);
                self.transport
                    .execute(&request, Some(&token))
                    .await?
                    .error_for_status()
            }
            Err(e) => {
                warn!(error = %e, "token refresh failed, ending session");
                metrics::counter!("auth_token_refresh_total", "outcome" => "failure").increment(1);
                self.terminator
                    .terminate_if_current(
                        epoch,
                        AuthEvent::auth_failure(format!("token refresh failed: {e}")),
                    )
                    .await;
                response.error_for_status()
            }
        }
    }

    pub async fn get<T: DeserializeOwned>(&self, path: &str) -> Result<T> {
        self.send(ApiRequest::get(path)).await?.json()
    }

    pub async fn post<T: DeserializeOwned>(&self, path: &str, body: serde_json::Value) -> Result<T> {
        self.send(ApiRequest::post(path, body)).await?.json()
    }

    pub async fn put<T: DeserializeOwned>(&self, path: &str, body: serde_json::Value) -> Result<T> {
        self.send(ApiRequest::new(Method::PUT, path).with_body(body))
            .await?
            .json()
    }

    pub async fn patch<T: DeserializeOwned>(
        &self,
        path: &str,
        body: serde_json::Value,
    ) -> Result<T> {
        self.send(ApiRequest::new(Method::PATCH, path).with_body(body))
            .await?
            .json()
    }

    pub async fn delete<T: DeserializeOwned>(&self, path: &str) -> Result<T> {
        self.send(ApiRequest::new(Method::DELETE, path))
            .await?
            .json()
    }

    /// GET without the bearer header (login-adjacent endpoints).
    pub async fn get_public<T: DeserializeOwned>(&self, path: &str) -> Result<T> {
        self.send(ApiRequest::get(path).public()).await?.json()
    }

    pub async fn post_public<T: DeserializeOwned>(
        &self,
        path: &str,
        body: serde_json::Value,
    ) -> Result<T> {
        self.send(ApiRequest::post(path, body).public())
            .await?
            .json()
    }

    /// Bearer for a request starting in session `epoch`: the stored access
    /// token, or the last refreshed one when the store is unreadable.
    async fn bearer(&self, epoch: u64) -> Option<Secret<String>> {
        match self.terminator.store().get(CredentialKey::AuthToken).await {
            Ok(Some(token)) if !token.trim().is_empty() => Some(Secret::new(token)),
            Ok(_) => None,
            Err(e) => {
                let fallback = self.default_bearer_for(epoch);
                warn!(
                    error = %e,
                    fallback = fallback.is_some(),
                    "reading access token failed"
                );
                fallback
            }
        }
    }

    fn default_bearer_for(&self, epoch: u64) -> Option<Secret<String>> {
        let guard = self
            .default_bearer
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        match guard.as_ref() {
            Some((tagged, token)) if *tagged == epoch => Some(token.clone()),
            _ => None,
        }
    }

    async fn install(&self, epoch: u64, token: &Secret<String>) {
        if let Err(e) = self
            .terminator
            .store()
            .set(CredentialKey::AuthToken, token.expose().clone())
            .await
        {
            warn!(error = %e, "storing refreshed access token failed");
        }
        *self
            .default_bearer
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner()) = Some((epoch, token.clone()));
    }

    async fn refresh(&self) -> dealer_auth::Result<Secret<String>> {
        let refresh_token = self
            .terminator
            .store()
            .get(CredentialKey::RefreshToken)
            .await?
            .filter(|t| !t.trim().is_empty())
            .ok_or(dealer_auth::Error::MissingRefreshToken)?;

        debug!(refresh_token = %common::fingerprint(&refresh_token), "refreshing access token");
        let request = ApiRequest::get(REFRESH_PATH)
            .query(REFRESH_QUERY_PARAM, refresh_token)
            .public();
        let response = self
            .transport
            .execute(&request, None)
            .await
            .map_err(|e| dealer_auth::Error::Network(e.to_string()))?;

        parse_refresh_response(response.status, &response.body)
    }
}
