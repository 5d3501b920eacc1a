//! Identity-provider callback handling
//!
//! Login is browser-delegated: a web view walks through the identity
//! provider and lands on the portal's callback page. Script injection then
//! posts JSON messages `{ "type": ..., "value": ... }` back over the bridge:
//!
//! 1. `test` / `debug`: diagnostics, ignored by the session logic
//! 2. `action`: the page's action name; one ending in `Close` means the
//!    callback info is ready to be fetched
//! 3. `callBackinfo`: the [`CallbackInfo`] payload
//! 4. `error`: script failure inside the page
//!
//! The payload is held as the pending login until PIN setup finalizes it.

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

/// Login result delivered by the identity provider.
///
/// The portal sends PascalCase keys; camelCase is accepted as well.
#[derive(Clone, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct CallbackInfo {
    #[serde(alias = "userLoginName")]
    pub user_login_name: String,
    #[serde(alias = "token")]
    pub token: String,
    #[serde(alias = "refreshToken")]
    pub refresh_token: String,
    #[serde(alias = "tokenExpiration", default)]
    pub token_expiration: Option<String>,
    #[serde(alias = "refreshTokenExpiration", default)]
    pub refresh_token_expiration: Option<String>,
    #[serde(flatten)]
    pub profile: UserProfile,
}

/// Account attributes and permission flags carried alongside the tokens.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct UserProfile {
    #[serde(rename = "CWSID", default, skip_serializing_if = "Option::is_none")]
    pub cwsid: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub user_type: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub email: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub phone_number: Option<String>,
    #[serde(rename = "IsCNUser", default, skip_serializing_if = "Option::is_none")]
    pub is_cn_user: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub is_visitor: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub need_active: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub work_order_create: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub work_order_assign: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub work_order_execute: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub work_order_view: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub equipment_manage: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub equipment_bind: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub equipment_unbind: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub equipment_edit: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub warranty_card_management: Option<bool>,
}

impl CallbackInfo {
    /// Parse a bare payload and check it carries usable credentials.
    pub fn from_json(json: &str) -> Result<Self> {
        let info: CallbackInfo = serde_json::from_str(json)
            .map_err(|e| Error::Callback(format!("malformed payload: {e}")))?;
        info.validate()?;
        Ok(info)
    }

    /// Accept either a full bridge message of type `callBackinfo` or the
    /// bare payload object.
    pub fn from_bridge_or_payload(json: &str) -> Result<Self> {
        match BridgeMessage::parse(json) {
            Ok(BridgeMessage::CallbackInfo(info)) => Ok(*info),
            Ok(other) => Err(Error::Callback(format!(
                "expected a callBackinfo message, got {}",
                other.kind()
            ))),
            Err(_) => Self::from_json(json),
        }
    }

    pub fn validate(&self) -> Result<()> {
        if self.user_login_name.trim().is_empty() {
            return Err(Error::Callback("missing UserLoginName".into()));
        }
        if self.token.trim().is_empty() {
            return Err(Error::Callback("missing Token".into()));
        }
        if self.refresh_token.trim().is_empty() {
            return Err(Error::Callback("missing RefreshToken".into()));
        }
        Ok(())
    }

    pub fn to_json(&self) -> Result<String> {
        serde_json::to_string(self)
            .map_err(|e| Error::CredentialParse(format!("serializing pending login: {e}")))
    }
}

impl fmt::Debug for CallbackInfo {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CallbackInfo")
            .field("user_login_name", &self.user_login_name)
            .field("token", &common::fingerprint(&self.token))
            .field("refresh_token", &common::fingerprint(&self.refresh_token))
            .field("token_expiration", &self.token_expiration)
            .field("refresh_token_expiration", &self.refresh_token_expiration)
            .field("profile", &self.profile)
            .finish()
    }
}

/// A message posted by the login web view.
#[derive(Debug)]
pub enum BridgeMessage {
    Test(serde_json::Value),
    Debug(serde_json::Value),
    Action(Option<String>),
    CallbackInfo(Box<CallbackInfo>),
    Error(String),
}

#[derive(Deserialize)]
struct RawMessage {
    #[serde(rename = "type")]
    kind: String,
    #[serde(default)]
    value: serde_json::Value,
}

impl BridgeMessage {
    pub fn parse(json: &str) -> Result<Self> {
        let raw: RawMessage = serde_json::from_str(json)
            .map_err(|e| Error::Callback(format!("malformed bridge message: {e}")))?;

        match raw.kind.as_str() {
            "test" => Ok(BridgeMessage::Test(raw.value)),
            "debug" => Ok(BridgeMessage::Debug(raw.value)),
            "action" => Ok(BridgeMessage::Action(raw.value.as_str().map(str::to_owned))),
            "callBackinfo" => {
                if raw.value.is_null() {
                    return Err(Error::Callback("callBackinfo message without value".into()));
                }
                let info: CallbackInfo = serde_json::from_value(raw.value)
                    .map_err(|e| Error::Callback(format!("malformed payload: {e}")))?;
                info.validate()?;
                Ok(BridgeMessage::CallbackInfo(Box::new(info)))
            }
            "error" => Ok(BridgeMessage::Error(
                raw.value.as_str().unwrap_or("unknown script error").to_owned(),
            )),
            other => Err(Error::Callback(format!("unknown message type '{other}'"))),
        }
    }

    pub fn kind(&self) -> &'static str {
        match self {
            BridgeMessage::Test(_) => "test",
            BridgeMessage::Debug(_) => "debug",
            BridgeMessage::Action(_) => "action",
            BridgeMessage::CallbackInfo(_) => "callBackinfo",
            BridgeMessage::Error(_) => "error",
        }
    }

    /// An `action` message whose name ends in `Close`.
    pub fn is_close_action(&self) -> bool {
        matches!(self, BridgeMessage::Action(Some(action)) if action.ends_with("Close"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const PAYLOAD: &str = r#"{
        "UserLoginName": "dealer01",
        "Token": "at_abc",
        "RefreshToken": "rt_def",
        "TokenExpiration": "2026-10-20T08:00:00Z",
        "RefreshTokenExpiration": "2026-11-19T08:00:00Z",
        "CWSID": "CWS123",
        "RedirectURL": null,
        "WorkOrderCreate": true,
        "EquipmentManage": false,
        "UserType": "EndCustomer",
        "IsCNUser": true
    }"#;

    #[test]
    fn parses_portal_payload() {
        let info = CallbackInfo::from_json(PAYLOAD).unwrap();
        assert_eq!(info.user_login_name, "dealer01");
        assert_eq!(info.token, "at_abc");
        assert_eq!(info.refresh_token, "rt_def");
        assert_eq!(info.token_expiration.as_deref(), Some("2026-10-20T08:00:00Z"));
        assert_eq!(info.profile.cwsid.as_deref(), Some("CWS123"));
        assert_eq!(info.profile.work_order_create, Some(true));
        assert_eq!(info.profile.equipment_manage, Some(false));
        assert_eq!(info.profile.is_cn_user, Some(true));
    }

    #[test]
    fn accepts_camel_case_keys() {
        let json = r#"{"userLoginName":"d","token":"t","refreshToken":"r"}"#;
        let info = CallbackInfo::from_json(json).unwrap();
        assert_eq!(info.user_login_name, "d");
        assert!(info.token_expiration.is_none());
    }

    #[test]
    fn rejects_empty_token() {
        let json = r#"{"UserLoginName":"d","Token":"","RefreshToken":"r"}"#;
        let err = CallbackInfo::from_json(json).unwrap_err();
        assert!(err.to_string().contains("missing Token"), "got: {err}");
    }

    #[test]
    fn json_roundtrip_keeps_profile() {
        let info = CallbackInfo::from_json(PAYLOAD).unwrap();
        let again = CallbackInfo::from_json(&info.to_json().unwrap()).unwrap();
        assert_eq!(again.profile, info.profile);
        assert_eq!(again.refresh_token, "rt_def");
    }

    #[test]
    fn debug_does_not_leak_tokens() {
        let info = CallbackInfo::from_json(PAYLOAD).unwrap();
        let debug = format!("{info:?}");
        assert!(!debug.contains("at_abc"));
        assert!(!debug.contains("rt_def"));
        assert!(debug.contains("dealer01"));
    }

    #[test]
    fn close_action_detection() {
        let msg = BridgeMessage::parse(r#"{"type":"action","value":"LoginClose"}"#).unwrap();
        assert!(msg.is_close_action());

        let msg = BridgeMessage::parse(r#"{"type":"action","value":"LoginOpen"}"#).unwrap();
        assert!(!msg.is_close_action());

        let msg = BridgeMessage::parse(r#"{"type":"action"}"#).unwrap();
        assert!(!msg.is_close_action());
    }

    #[test]
    fn callback_message_without_value_is_rejected() {
        let err = BridgeMessage::parse(r#"{"type":"callBackinfo"}"#).unwrap_err();
        assert!(matches!(err, Error::Callback(_)));
    }

    #[test]
    fn diagnostics_and_errors_parse() {
        let msg = BridgeMessage::parse(r#"{"type":"debug","value":{"hasCallBackinfo":true}}"#)
            .unwrap();
        assert_eq!(msg.kind(), "debug");

        let msg = BridgeMessage::parse(r#"{"type":"error","value":"boom"}"#).unwrap();
        assert!(matches!(msg, BridgeMessage::Error(ref e) if e == "boom"));

        assert!(BridgeMessage::parse(r#"{"type":"telemetry"}"#).is_err());
    }

    #[test]
    fn bridge_or_payload_accepts_both_forms() {
        let wrapped = format!(r#"{{"type":"callBackinfo","value":{PAYLOAD}}}"#);
        let a = CallbackInfo::from_bridge_or_payload(&wrapped).unwrap();
        let b = CallbackInfo::from_bridge_or_payload(PAYLOAD).unwrap();
        assert_eq!(a.user_login_name, b.user_login_name);

        let err = CallbackInfo::from_bridge_or_payload(r#"{"type":"test","value":"x"}"#)
            .unwrap_err();
        assert!(err.to_string().contains("expected a callBackinfo"));
    }
}
