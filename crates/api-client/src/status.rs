//! User-facing messages for failed API calls
//!
//! Well-known statuses get a fixed message. Anything else uses the
//! server's own `error.message` (ABP envelope) or top-level `message`, and
//! finally a generic line with the status code.

use serde_json::Value;

pub fn status_message(status: u16) -> Option<&'static str> {
    match status {
        400 => Some("bad request parameters"),
        403 => Some("no permission to access this resource"),
        404 => Some("requested resource not found"),
        500 => Some("internal server error"),
        502 => Some("bad gateway"),
        503 => Some("service temporarily unavailable"),
        _ => None,
    }
}

pub fn error_message(status: u16, body: &str) -> String {
    if let Some(message) = status_message(status) {
        return message.to_string();
    }
    server_message(body).unwrap_or_else(|| format!("request failed with status {status}"))
}

fn server_message(body: &str) -> Option<String> {
    let value: Value = serde_json::from_str(body).ok()?;
    let message = value
        .pointer("/error/message")
        .and_then(Value::as_str)
        .or_else(|| value.get("message").and_then(Value::as_str))?;
    let message = message.trim();
    (!message.is_empty()).then(|| message.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn mapped_statuses_win_over_server_text() {
        assert_eq!(
            error_message(404, r#"{"message":"no such equipment"}"#),
            "requested resource not found"
        );
        assert_eq!(error_message(503, ""), "service temporarily unavailable");
    }

    #[test]
    fn unmapped_status_uses_server_message() {
        let abp = r#"{"success":false,"error":{"code":0,"message":"Current user did not login"}}"#;
        assert_eq!(error_message(401, abp), "Current user did not login");
        assert_eq!(error_message(409, r#"{"message":"conflict"}"#), "conflict");
    }

    #[test]
    fn falls_back_to_generic_message() {
        assert_eq!(error_message(418, "<html>"), "request failed with status 418");
        assert_eq!(
            error_message(401, r#"{"error":{"message":"  "}}"#),
            "request failed with status 401"
        );
    }
}
