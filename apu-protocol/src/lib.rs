//! IPC protocol shared by apuctld and its clients
//!
//! One JSON object per line, UTF-8, newline-delimited. Requests carry a
//! client-chosen string `id` which is echoed by the matching response or
//! error envelope; the daemon may also push notification envelopes that
//! correlate with no request.

use serde::{Deserialize, Serialize};
use serde_json::Value;

mod framing;
mod model;

pub use framing::{encode_record, LineBuffer};
pub use model::*;

/// Maximum size of one record (64KB)
pub const MAX_MESSAGE_SIZE: usize = 64 * 1024;

/// Prefix of ids used by daemon-originated notifications
pub const EVENT_ID_PREFIX: &str = "evt-";

/// Method names understood by the dispatcher
pub mod methods {
    pub const PING: &str = "ping";
    pub const VERSION: &str = "version";
    pub const GET_STATUS: &str = "getStatus";
    pub const GET_HARDWARE_INFO: &str = "getHardwareInfo";
    pub const LIST_PROFILES: &str = "listProfiles";
    pub const GET_PROFILE: &str = "getProfile";
    pub const CREATE_PROFILE: &str = "createProfile";
    pub const UPDATE_PROFILE: &str = "updateProfile";
    pub const DELETE_PROFILE: &str = "deleteProfile";
    pub const APPLY_PROFILE: &str = "applyProfile";
    pub const GET_HARDWARE_LIMITS: &str = "getHardwareLimits";
    pub const SET_HARDWARE_LIMITS: &str = "setHardwareLimits";
    pub const GET_CONFIG: &str = "getConfig";
}

/// Notification method names pushed to every client
pub mod events {
    pub const PROFILE_APPLIED: &str = "event.profileApplied";
    pub const PROFILES_CHANGED: &str = "event.profilesChanged";
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Request {
    pub id: String,
    pub method: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub params: Option<Value>,
}

impl Request {
    pub fn new(id: impl Into<String>, method: impl Into<String>, params: Option<Value>) -> Self {
        Self {
            id: id.into(),
            method: method.into(),
            params,
        }
    }

    /// Whether this envelope is a daemon push rather than a client request
    pub fn is_event(&self) -> bool {
        self.id.starts_with(EVENT_ID_PREFIX)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Response {
    pub id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub result: Option<Value>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ErrorResponse {
    pub id: String,
    pub error: ErrorBody,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ErrorBody {
    pub code: ErrorCode,
    pub message: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ErrorCode {
    InvalidParams,
    InvalidRequest,
    ParseError,
    MethodNotFound,
    ProfileNotFound,
    ValidationError,
    CannotDeleteActive,
    CannotDeleteDefault,
    ApplyError,
    InternalError,
}

impl ErrorCode {
    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorCode::InvalidParams => "INVALID_PARAMS",
            ErrorCode::InvalidRequest => "INVALID_REQUEST",
            ErrorCode::ParseError => "PARSE_ERROR",
            ErrorCode::MethodNotFound => "METHOD_NOT_FOUND",
            ErrorCode::ProfileNotFound => "PROFILE_NOT_FOUND",
            ErrorCode::ValidationError => "VALIDATION_ERROR",
            ErrorCode::CannotDeleteActive => "CANNOT_DELETE_ACTIVE",
            ErrorCode::CannotDeleteDefault => "CANNOT_DELETE_DEFAULT",
            ErrorCode::ApplyError => "APPLY_ERROR",
            ErrorCode::InternalError => "INTERNAL_ERROR",
        }
    }
}

impl std::fmt::Display for ErrorCode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl ErrorResponse {
    pub fn new(id: impl Into<String>, code: ErrorCode, message: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            error: ErrorBody {
                code,
                message: message.into(),
            },
        }
    }
}

/// Any record that can travel over the socket.
///
/// Variant order matters for untagged decoding: an `error` member wins,
/// then a `method` member, then a bare `{id, result?}`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Envelope {
    Error(ErrorResponse),
    Request(Request),
    Response(Response),
}

impl Envelope {
    pub fn id(&self) -> &str {
        match self {
            Envelope::Error(e) => &e.id,
            Envelope::Request(r) => &r.id,
            Envelope::Response(r) => &r.id,
        }
    }
}

/// Parse one record; malformed records yield `None` and are dropped by callers
pub fn parse_envelope(record: &str) -> Option<Envelope> {
    match serde_json::from_str::<Envelope>(record.trim()) {
        Ok(envelope) => Some(envelope),
        Err(e) => {
            tracing::debug!("Dropping malformed record: {}", e);
            None
        }
    }
}

// ============================================================================
// Request parameters
// ============================================================================

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NameParams {
    pub name: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CreateProfileParams {
    pub profile: Profile,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UpdateProfileParams {
    pub name: String,
    pub profile: Profile,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SetHardwareLimitsParams {
    pub limits: HardwareLimits,
}

/// Result of `version`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VersionInfo {
    pub version: String,
    pub backend: String,
}

/// Payload of `event.profileApplied`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProfileAppliedEvent {
    pub name: String,
    pub activated_by: ActivatedBy,
    pub hw_info: Option<HardwareInfo>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_envelope_variants_decode() {
        let req = parse_envelope(r#"{"id":"1","method":"ping"}"#).unwrap();
        assert!(matches!(req, Envelope::Request(ref r) if r.method == "ping" && r.params.is_none()));

        let resp = parse_envelope(r#"{"id":"2","result":{"ok":true}}"#).unwrap();
        assert!(matches!(resp, Envelope::Response(ref r) if r.result == Some(json!({"ok": true}))));

        let err = parse_envelope(r#"{"id":"3","error":{"code":"PROFILE_NOT_FOUND","message":"nope"}}"#)
            .unwrap();
        match err {
            Envelope::Error(e) => assert_eq!(e.error.code, ErrorCode::ProfileNotFound),
            other => panic!("unexpected {:?}", other),
        }
    }

    #[test]
    fn test_malformed_records_are_dropped() {
        assert!(parse_envelope("not json").is_none());
        assert!(parse_envelope(r#"{"method":"ping"}"#).is_none());
        assert!(parse_envelope("[1,2,3]").is_none());
    }

    #[test]
    fn test_error_envelope_wire_shape() {
        let err = ErrorResponse::new("7", ErrorCode::CannotDeleteActive, "in use");
        let value = serde_json::to_value(&err).unwrap();
        assert_eq!(
            value,
            json!({"id": "7", "error": {"code": "CANNOT_DELETE_ACTIVE", "message": "in use"}})
        );
    }

    #[test]
    fn test_response_without_result_omits_field() {
        let resp = Response { id: "9".into(), result: None };
        assert_eq!(serde_json::to_string(&resp).unwrap(), r#"{"id":"9"}"#);
    }
}
