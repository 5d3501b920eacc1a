//! Access-token refresh endpoint contract
//!
//! `GET <base>/services/app/EndCustomer/Token?refreshToken=<token>`
//! answers `{ "result": "<new access token>" }`. Any other shape, an empty
//! token, or a non-2xx status counts as a failed refresh. The HTTP call
//! itself is issued by the API middleware through its transport; this
//! module owns the path, query parameter and response interpretation.

use common::Secret;
use serde::Deserialize;

use crate::error::{Error, Result};

/// Refresh endpoint path, relative to the API base.
pub const REFRESH_PATH: &str = "services/app/EndCustomer/Token";

/// Query parameter carrying the refresh token.
pub const REFRESH_QUERY_PARAM: &str = "refreshToken";

#[derive(Debug, Deserialize)]
struct RefreshResponse {
    #[serde(default)]
    result: serde_json::Value,
}

/// Interpret a refresh endpoint response.
pub fn parse_refresh_response(status: u16, body: &str) -> Result<Secret<String>> {
    if !(200..300).contains(&status) {
        return Err(Error::RefreshRejected(format!(
            "refresh endpoint returned {status}"
        )));
    }

    let response: RefreshResponse = serde_json::from_str(body)
        .map_err(|e| Error::RefreshRejected(format!("invalid refresh response: {e}")))?;

    match response.result {
        serde_json::Value::String(token) if !token.trim().is_empty() => Ok(Secret::new(token)),
        serde_json::Value::String(_) | serde_json::Value::Null => Err(Error::RefreshRejected(
            "refresh response carried no token".into(),
        )),
        other => Err(Error::RefreshRejected(format!(
            "unexpected refresh result type: {}",
            json_kind(&other)
        ))),
    }
}

fn json_kind(value: &serde_json::Value) -> &'static str {
    match value {
        serde_json::Value::Null => "null",
        serde_json::Value::Bool(_) => "bool",
        serde_json::Value::Number(_) => "number",
        serde_json::Value::String(_) => "string",
        serde_json::Value::Array(_) => "array",
        serde_json::Value::Object(_) => "object",
    }
}
