// Bastion — Backend Request Handler
//
// Dispatches gateway operations to the vault and the tool executor.
// Vault access goes through a mutex because the vault itself assumes
// single-writer discipline; the lock is never held across an await.
// Secret reads and writes produce their own audit entries on top of the
// gateway's per-request record.

use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use serde_json::{json, Value};
use uuid::Uuid;

use crate::audit::{AuditEntry, AuditFilter, AuditLog, SEVERITY_INFO};
use crate::executor::{ExecutorError, ToolExecutor};
use crate::gateway::{ApiRequest, HandlerError, RequestHandler};
use crate::vault::{VaultError, VaultStore};

pub struct BackendHandler {
    vault: Mutex<VaultStore>,
    executor: Arc<ToolExecutor>,
    audit: Arc<AuditLog>,
}

impl BackendHandler {
    pub fn new(vault: VaultStore, executor: Arc<ToolExecutor>, audit: Arc<AuditLog>) -> Self {
        Self {
            vault: Mutex::new(vault),
            executor,
            audit,
        }
    }

    fn record(&self, entry: AuditEntry) {
        if let Err(e) = self.audit.append(&entry) {
            tracing::error!(error = %e, "Failed to write audit entry");
        }
    }

    fn vault_status(&self) -> Result<Value, HandlerError> {
        let vault = self.lock_vault();
        if vault.is_sealed() {
            return Ok(json!({"sealed": true}));
        }
        let data = vault.data().map_err(vault_error)?;
        Ok(json!({
            "sealed": false,
            "version": data.version,
            "created_at": data.created_at,
            "last_modified": data.last_modified,
            "secret_count": data.secrets.len(),
        }))
    }

    fn list_secrets(&self) -> Result<Value, HandlerError> {
        let vault = self.lock_vault();
        let names = vault.secret_names().map_err(vault_error)?;
        Ok(json!({ "secrets": names }))
    }

    fn get_secret(&self, params: &Value, actor: &str) -> Result<Value, HandlerError> {
        let name = str_param(params, "name")?;
        let vault = self.lock_vault();
        let value = vault
            .get_secret(&name)
            .map_err(vault_error)?
            .map(str::to_string);
        drop(vault);

        match value {
            Some(value) => {
                self.record(
                    AuditEntry::new(actor, "secret_read", &format!("vault:secret:{}", name), true)
                        .with_severity(SEVERITY_INFO),
                );
                Ok(json!({ "name": name, "value": value }))
            }
            None => Err(HandlerError::NotFound(format!("secret '{}'", name))),
        }
    }

    fn set_secret(&self, params: &Value, actor: &str) -> Result<Value, HandlerError> {
        let name = str_param(params, "name")?;
        let value = str_param(params, "value")?;

        let mut vault = self.lock_vault();
        vault.set_secret(&name, &value).map_err(vault_error)?;
        drop(vault);

        self.record(
            AuditEntry::new(actor, "secret_write", &format!("vault:secret:{}", name), true)
                .with_severity(SEVERITY_INFO),
        );
        Ok(json!({ "name": name, "stored": true }))
    }

    fn delete_secret(&self, params: &Value, actor: &str) -> Result<Value, HandlerError> {
        let name = str_param(params, "name")?;

        let mut vault = self.lock_vault();
        let existed = vault.delete_secret(&name).map_err(vault_error)?;
        drop(vault);

        if !existed {
            return Err(HandlerError::NotFound(format!("secret '{}'", name)));
        }
        self.record(AuditEntry::new(
            actor,
            "secret_delete",
            &format!("vault:secret:{}", name),
            true,
        ));
        Ok(json!({ "name": name, "deleted": true }))
    }

    async fn execute_tool(&self, params: &Value, actor: &str) -> Result<Value, HandlerError> {
        let bridge_id = str_param(params, "bridge_id")?;
        let tool_name = str_param(params, "tool_name")?;
        let tool_params = params.get("parameters").cloned().unwrap_or(Value::Null);

        let outcome = self
            .executor
            .execute(&bridge_id, &tool_name, &tool_params, actor)
            .await
            .map_err(executor_error)?;

        serde_json::to_value(outcome)
            .map_err(|e| HandlerError::Internal(format!("outcome serialization failed: {}", e)))
    }

    fn job_status(&self, params: &Value) -> Result<Value, HandlerError> {
        let job_id = uuid_param(params, "job_id")?;
        let job = self.executor.get_status(&job_id).map_err(executor_error)?;
        serde_json::to_value(job)
            .map_err(|e| HandlerError::Internal(format!("job serialization failed: {}", e)))
    }

    fn cancel_job(&self, params: &Value, actor: &str) -> Result<Value, HandlerError> {
        let job_id = uuid_param(params, "job_id")?;
        self.executor.cancel(&job_id, actor).map_err(executor_error)?;
        Ok(json!({ "job_id": job_id, "cancelled": true }))
    }

    fn query_audit(&self, params: &Value) -> Result<Value, HandlerError> {
        let filter = AuditFilter {
            actor: opt_str(params, "actor"),
            action: opt_str(params, "action"),
            resource: opt_str(params, "resource"),
            success: params.get("success").and_then(Value::as_bool),
            offset: params.get("offset").and_then(Value::as_u64).unwrap_or(0) as usize,
            limit: Some(
                params
                    .get("limit")
                    .and_then(Value::as_u64)
                    .unwrap_or(100)
                    .min(1000) as usize,
            ),
            ..Default::default()
        };
        let entries = self
            .audit
            .query(&filter)
            .map_err(|e| HandlerError::Internal(format!("audit query failed: {}", e)))?;
        serde_json::to_value(entries)
            .map_err(|e| HandlerError::Internal(format!("audit serialization failed: {}", e)))
    }

    fn audit_stats(&self, params: &Value) -> Result<Value, HandlerError> {
        let window_days = params
            .get("window_days")
            .and_then(Value::as_u64)
            .unwrap_or(30) as u32;
        let stats = self
            .audit
            .stats(window_days)
            .map_err(|e| HandlerError::Internal(format!("audit stats failed: {}", e)))?;
        Ok(json!({
            "total_events": stats.total_events,
            "success_rate": stats.success_rate,
            "top_actors": stats.top_actors,
            "top_actions": stats.top_actions,
            "events_per_day": stats.events_per_day,
        }))
    }

    fn lock_vault(&self) -> std::sync::MutexGuard<'_, VaultStore> {
        self.vault.lock().expect("vault lock poisoned")
    }
}

#[async_trait]
impl RequestHandler for BackendHandler {
    async fn handle(&self, request: &ApiRequest, actor: &str) -> Result<Value, HandlerError> {
        let params = &request.params;
        match request.operation.as_str() {
            "vault.status" => self.vault_status(),
            "vault.list_secrets" => self.list_secrets(),
            "vault.get_secret" => self.get_secret(params, actor),
            "vault.set_secret" => self.set_secret(params, actor),
            "vault.delete_secret" => self.delete_secret(params, actor),
            "tools.execute" => self.execute_tool(params, actor).await,
            "tools.status" => self.job_status(params),
            "tools.cancel" => self.cancel_job(params, actor),
            "audit.query" => self.query_audit(params),
            "audit.stats" => self.audit_stats(params),
            other => Err(HandlerError::Validation(format!(
                "Unknown operation: {}",
                other
            ))),
        }
    }
}

// ─── Helpers ─────────────────────────────────────────────────────────────────

fn str_param(params: &Value, name: &str) -> Result<String, HandlerError> {
    params
        .get(name)
        .and_then(Value::as_str)
        .map(str::to_string)
        .ok_or_else(|| HandlerError::Validation(format!("Missing '{}' parameter", name)))
}

fn opt_str(params: &Value, name: &str) -> Option<String> {
    params.get(name).and_then(Value::as_str).map(str::to_string)
}

fn uuid_param(params: &Value, name: &str) -> Result<Uuid, HandlerError> {
    let raw = str_param(params, name)?;
    Uuid::parse_str(&raw).map_err(|e| HandlerError::Validation(format!("Invalid UUID: {}", e)))
}

fn vault_error(e: VaultError) -> HandlerError {
    match e {
        VaultError::InvalidState(message) => HandlerError::Validation(message.to_string()),
        other => HandlerError::Internal(other.to_string()),
    }
}

fn executor_error(e: ExecutorError) -> HandlerError {
    match e {
        ExecutorError::Validation(message) => HandlerError::Validation(message),
        ExecutorError::UnknownTool(name) => {
            HandlerError::Validation(format!("Unknown tool: {}", name))
        }
        ExecutorError::PathNotAllowed(path) => {
            HandlerError::Validation(format!("Path '{}' is outside the allowed directories", path))
        }
        ExecutorError::CapacityExceeded => {
            HandlerError::Validation("Tool executor at capacity — retry shortly".to_string())
        }
        ExecutorError::JobNotFound(id) => HandlerError::NotFound(format!("job {}", id)),
        ExecutorError::NotRunning(id) => {
            HandlerError::Validation(format!("Job {} is not running", id))
        }
        ExecutorError::Io(e) => HandlerError::Internal(e.to_string()),
    }
}

// ─── Tests ───────────────────────────────────────────────────────────────────
