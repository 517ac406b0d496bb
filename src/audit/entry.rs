// Bastion — Audit entry and query filter
//
// One entry per sensitive action. Entries are append-only: once written
// they are never edited, only dropped by an explicit retention sweep.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Severity values carried in entry metadata under the "severity" key.
pub const SEVERITY_INFO: &str = "info";
pub const SEVERITY_WARNING: &str = "warning";
pub const SEVERITY_CRITICAL: &str = "critical";

/// A single immutable audit record.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuditEntry {
    pub timestamp: DateTime<Utc>,
    pub actor: String,
    pub action: String,
    pub resource: String,
    pub success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub ip_address: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub metadata: Option<Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error_message: Option<String>,
}

impl AuditEntry {
    pub fn new(actor: &str, action: &str, resource: &str, success: bool) -> Self {
        Self {
            timestamp: Utc::now(),
            actor: actor.to_string(),
            action: action.to_string(),
            resource: resource.to_string(),
            success,
            ip_address: None,
            metadata: None,
            error_message: None,
        }
    }

    pub fn with_ip(mut self, ip: &str) -> Self {
        self.ip_address = Some(ip.to_string());
        self
    }

    pub fn with_error(mut self, message: &str) -> Self {
        self.error_message = Some(message.to_string());
        self
    }

    /// Tag the entry with a severity in its metadata map.
    pub fn with_severity(mut self, severity: &str) -> Self {
        let map = self
            .metadata
            .get_or_insert_with(|| Value::Object(serde_json::Map::new()));
        if let Value::Object(obj) = map {
            obj.insert("severity".to_string(), Value::String(severity.to_string()));
        }
        self
    }

    pub fn with_metadata(mut self, key: &str, value: Value) -> Self {
        let map = self
            .metadata
            .get_or_insert_with(|| Value::Object(serde_json::Map::new()));
        if let Value::Object(obj) = map {
            obj.insert(key.to_string(), value);
        }
        self
    }
}

/// Query filter. All criteria are ANDed; `None` matches everything.
#[derive(Debug, Clone, Default)]
pub struct AuditFilter {
    pub from: Option<DateTime<Utc>>,
    pub to: Option<DateTime<Utc>>,
    pub actor: Option<String>,
    pub resource: Option<String>,
    pub action: Option<String>,
    pub success: Option<bool>,
    pub offset: usize,
    pub limit: Option<usize>,
}

impl AuditFilter {
    pub fn matches(&self, entry: &AuditEntry) -> bool {
        if let Some(from) = self.from {
            if entry.timestamp < from {
                return false;
            }
        }
        if let Some(to) = self.to {
            if entry.timestamp > to {
                return false;
            }
        }
        if let Some(ref actor) = self.actor {
            if &entry.actor != actor {
                return false;
            }
        }
        if let Some(ref resource) = self.resource {
            if &entry.resource != resource {
                return false;
            }
        }
        if let Some(ref action) = self.action {
            if &entry.action != action {
                return false;
            }
        }
        if let Some(success) = self.success {
            if entry.success != success {
                return false;
            }
        }
        true
    }
}

// ─── Tests ───────────────────────────────────────────────────────────────────
