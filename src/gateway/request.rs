// Bastion — Gateway Wire Types
//
// JSON request/response envelope spoken over the UDS transport. Statuses
// mirror HTTP so a thin HTTP front can proxy envelopes verbatim.

use std::collections::HashMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

pub const STATUS_OK: u16 = 200;
pub const STATUS_BAD_REQUEST: u16 = 400;
pub const STATUS_UNAUTHORIZED: u16 = 401;
pub const STATUS_FORBIDDEN: u16 = 403;
pub const STATUS_TOO_MANY_REQUESTS: u16 = 429;
pub const STATUS_INTERNAL: u16 = 500;

/// An inbound request: a named operation plus transport metadata.
#[derive(Debug, Clone, Deserialize)]
pub struct ApiRequest {
    pub operation: String,
    #[serde(default)]
    pub headers: HashMap<String, String>,
    #[serde(default)]
    pub params: Value,
    #[serde(default)]
    pub remote_addr: Option<String>,
}

impl ApiRequest {
    pub fn new(operation: &str) -> Self {
        Self {
            operation: operation.to_string(),
            headers: HashMap::new(),
            params: Value::Null,
            remote_addr: None,
        }
    }

    pub fn with_header(mut self, name: &str, value: &str) -> Self {
        self.headers.insert(name.to_string(), value.to_string());
        self
    }

    pub fn with_params(mut self, params: Value) -> Self {
        self.params = params;
        self
    }

    /// Case-insensitive header lookup, HTTP-style.
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|(k, _)| k.eq_ignore_ascii_case(name))
            .map(|(_, v)| v.as_str())
    }
}

/// The response envelope: `{success, data|error, metadata}` plus a status
/// code and any response headers (CORS).
#[derive(Debug, Serialize)]
pub struct ApiResponse {
    pub status: u16,
    pub success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(skip_serializing_if = "HashMap::is_empty")]
    pub headers: HashMap<String, String>,
    pub metadata: ResponseMetadata,
}

#[derive(Debug, Serialize)]
pub struct ResponseMetadata {
    pub timestamp: DateTime<Utc>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub retry_after_secs: Option<u64>,
}

impl ApiResponse {
    pub fn ok(data: Value) -> Self {
        Self {
            status: STATUS_OK,
            success: true,
            data: Some(data),
            error: None,
            headers: HashMap::new(),
            metadata: ResponseMetadata {
                timestamp: Utc::now(),
                retry_after_secs: None,
            },
        }
    }

    pub fn error(status: u16, message: impl Into<String>) -> Self {
        Self {
            status,
            success: false,
            data: None,
            error: Some(message.into()),
            headers: HashMap::new(),
            metadata: ResponseMetadata {
                timestamp: Utc::now(),
                retry_after_secs: None,
            },
        }
    }

    pub fn rate_limited(retry_after_secs: u64) -> Self {
        let mut response = Self::error(STATUS_TOO_MANY_REQUESTS, "Rate limit exceeded");
        response.metadata.retry_after_secs = Some(retry_after_secs);
        response
    }

    pub fn with_header(mut self, name: &str, value: &str) -> Self {
        self.headers.insert(name.to_string(), value.to_string());
        self
    }
}

// ─── Tests ───────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_minimal_request() {
        let json = r#"{"operation":"vault.list_secrets"}"#;
        let req: ApiRequest = serde_json::from_str(json).unwrap();
        assert_eq!(req.operation, "vault.list_secrets");
        assert!(req.headers.is_empty());
        assert_eq!(req.params, Value::Null);
    }

    #[test]
    fn test_header_lookup_is_case_insensitive() {
        let req = ApiRequest::new("x").with_header("X-API-Key", "sk-1");
        assert_eq!(req.header("x-api-key"), Some("sk-1"));
        assert_eq!(req.header("X-API-KEY"), Some("sk-1"));
        assert_eq!(req.header("Origin"), None);
    }

    #[test]
    fn test_ok_envelope_shape() {
        let response = ApiResponse::ok(serde_json::json!({"n": 1}));
        let json = serde_json::to_string(&response).unwrap();
        assert!(json.contains("\"success\":true"));
        assert!(json.contains("\"data\""));
        assert!(!json.contains("\"error\""));
        assert!(json.contains("\"timestamp\""));
    }

    #[test]
    fn test_error_envelope_shape() {
        let response = ApiResponse::error(STATUS_UNAUTHORIZED, "Authentication failed");
        let json = serde_json::to_string(&response).unwrap();
        assert!(json.contains("\"status\":401"));
        assert!(json.contains("\"success\":false"));
        assert!(!json.contains("\"data\""));
    }

    #[test]
    fn test_rate_limited_carries_retry_hint() {
        let response = ApiResponse::rate_limited(42);
        assert_eq!(response.status, STATUS_TOO_MANY_REQUESTS);
        assert_eq!(response.metadata.retry_after_secs, Some(42));
    }
}
