// Bastion — Tool Executor
//
// Runs named bridged tool operations against validated, sandboxed
// parameters under a hard concurrency ceiling. Every execution is a
// tracked job; tool failures land in the job's Failed state with a
// sanitized message instead of propagating as errors. Client faults
// (unknown tool, bad parameters, escaped paths) are rejected before a
// job is ever admitted.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::{Duration, Instant};

use serde::Serialize;
use serde_json::{json, Value};
use uuid::Uuid;

use crate::audit::{AuditEntry, AuditLog, SEVERITY_INFO, SEVERITY_WARNING};
use crate::config::ExecutorConfig;

use super::job::{Job, JobState, JobTracker};
use super::params::{tool_spec, validate_params, validate_path, ToolSpec};
use super::runner::{CommandRunner, RunOptions};
use super::scanner;
use super::ExecutorError;

/// Result of one `execute` call, mirroring the final job snapshot.
#[derive(Debug, Serialize)]
pub struct ExecutionOutcome {
    pub success: bool,
    pub job_id: Uuid,
    pub execution_time_ms: u64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

#[derive(Clone, Copy)]
enum ToolKind {
    ScanSecrets,
    ScanVulnerabilities,
    ExternalScan,
}

/// A fully validated invocation, built before admission so that no
/// client fault can consume a concurrency slot.
struct Invocation {
    kind: ToolKind,
    path: PathBuf,
    max_depth: usize,
    max_file_kb: u64,
    args: Vec<String>,
}

pub struct ToolExecutor {
    config: ExecutorConfig,
    tracker: Arc<JobTracker>,
    audit: Arc<AuditLog>,
    runner: Arc<dyn CommandRunner>,
}

impl ToolExecutor {
    pub fn new(config: ExecutorConfig, audit: Arc<AuditLog>, runner: Arc<dyn CommandRunner>) -> Self {
        let tracker = Arc::new(JobTracker::new(config.max_concurrent_jobs));
        Self {
            config,
            tracker,
            audit,
            runner,
        }
    }

    /// Execute a tool as a tracked job and wait for its outcome.
    pub async fn execute(
        &self,
        bridge_id: &str,
        tool_name: &str,
        params: &Value,
        actor: &str,
    ) -> Result<ExecutionOutcome, ExecutorError> {
        let spec =
            tool_spec(tool_name).ok_or_else(|| ExecutorError::UnknownTool(tool_name.to_string()))?;

        validate_params(spec, params).map_err(|violations| {
            let joined = violations
                .iter()
                .map(ToString::to_string)
                .collect::<Vec<_>>()
                .join("; ");
            ExecutorError::Validation(joined)
        })?;

        let invocation = self.build_invocation(spec, params)?;

        // Admission: check-then-increment is atomic inside the tracker.
        // Overflow fails immediately; the caller retries.
        let job_id = self.tracker.admit(bridge_id, tool_name)?;
        let started = Instant::now();

        let runner = self.runner.clone();
        let command = self.config.external_scanner_cmd.clone();
        let tool_timeout = Duration::from_millis(self.config.tool_timeout_ms);
        let task = tokio::spawn(run_tool(invocation, runner, command, tool_timeout));
        let abort = task.abort_handle();
        self.tracker.register_abort(job_id, task.abort_handle());

        match tokio::time::timeout(tool_timeout, task).await {
            Err(_) => {
                abort.abort();
                self.tracker.fail(job_id, "Tool execution timed out");
            }
            Ok(Err(join_err)) if join_err.is_cancelled() => {
                // cancel() already moved the job to Cancelled; any late
                // result would have been discarded by the transition guard.
            }
            Ok(Err(join_err)) => {
                tracing::error!(%job_id, error = %join_err, "Tool task failed abnormally");
                self.tracker.fail(job_id, "Tool execution failed unexpectedly");
            }
            Ok(Ok(Ok(value))) => {
                self.tracker.complete(job_id, value);
            }
            Ok(Ok(Err(message))) => {
                self.tracker.fail(job_id, &message);
            }
        }

        let execution_time_ms = started.elapsed().as_millis() as u64;
        let job = self
            .tracker
            .snapshot(&job_id)
            .ok_or(ExecutorError::JobNotFound(job_id))?;
        let success = job.state == JobState::Completed;

        let mut entry =
            AuditEntry::new(actor, "tool_execute", &format!("tool:{}", tool_name), success)
                .with_metadata("job_id", json!(job_id.to_string()))
                .with_metadata("bridge_id", json!(bridge_id))
                .with_severity(if success { SEVERITY_INFO } else { SEVERITY_WARNING });
        if let Some(ref error) = job.error {
            entry = entry.with_error(error);
        }
        self.record(entry);

        self.schedule_eviction(job_id);

        Ok(ExecutionOutcome {
            success,
            job_id,
            execution_time_ms,
            data: job.result,
            error: job.error,
        })
    }

    /// Snapshot of a tracked job, or `JobNotFound` once evicted.
    pub fn get_status(&self, job_id: &Uuid) -> Result<Job, ExecutorError> {
        self.tracker
            .snapshot(job_id)
            .ok_or(ExecutorError::JobNotFound(*job_id))
    }

    pub fn list_jobs(&self) -> Vec<Job> {
        self.tracker.list()
    }

    pub fn running_count(&self) -> usize {
        self.tracker.running_count()
    }

    /// Cancel a running job: the underlying task is aborted and the job
    /// reports Cancelled regardless of what the tool does afterwards.
    pub fn cancel(&self, job_id: &Uuid, actor: &str) -> Result<(), ExecutorError> {
        self.tracker.cancel(*job_id)?;
        self.record(
            AuditEntry::new(actor, "tool_cancel", "executor", true)
                .with_metadata("job_id", json!(job_id.to_string()))
                .with_severity(SEVERITY_WARNING),
        );
        self.schedule_eviction(*job_id);
        Ok(())
    }

    fn build_invocation(
        &self,
        spec: &'static ToolSpec,
        params: &Value,
    ) -> Result<Invocation, ExecutorError> {
        let object = params
            .as_object()
            .ok_or_else(|| ExecutorError::Validation("parameters must be an object".to_string()))?;

        let raw_path = object
            .get("path")
            .and_then(Value::as_str)
            .ok_or_else(|| ExecutorError::Validation("path: must be a string".to_string()))?;
        let path = validate_path(raw_path, &self.config.allowed_paths)?;

        let max_depth = match object.get("max_depth") {
            None => 8,
            Some(value) => value.as_u64().ok_or_else(|| {
                ExecutorError::Validation("max_depth: must be a non-negative integer".to_string())
            })? as usize,
        };

        let max_file_kb = match object.get("max_file_kb") {
            None => 512,
            Some(value) => value.as_u64().ok_or_else(|| {
                ExecutorError::Validation("max_file_kb: must be a non-negative integer".to_string())
            })?,
        };

        let args = match object.get("args") {
            None => Vec::new(),
            Some(Value::Array(items)) => items
                .iter()
                .map(|item| {
                    item.as_str().map(str::to_string).ok_or_else(|| {
                        ExecutorError::Validation("args: must be an array of strings".to_string())
                    })
                })
                .collect::<Result<Vec<String>, ExecutorError>>()?,
            Some(_) => {
                return Err(ExecutorError::Validation(
                    "args: must be an array of strings".to_string(),
                ))
            }
        };

        let kind = match spec.name {
            "scan_secrets" => ToolKind::ScanSecrets,
            "scan_vulnerabilities" => ToolKind::ScanVulnerabilities,
            _ => ToolKind::ExternalScan,
        };

        Ok(Invocation {
            kind,
            path,
            max_depth,
            max_file_kb,
            args,
        })
    }

    fn schedule_eviction(&self, job_id: Uuid) {
        let tracker = self.tracker.clone();
        let retention = Duration::from_millis(self.config.job_retention_ms);
        tokio::spawn(async move {
            tokio::time::sleep(retention).await;
            if tracker.evict(job_id) {
                tracing::debug!(%job_id, "Evicted terminal job");
            }
        });
    }

    fn record(&self, entry: AuditEntry) {
        if let Err(e) = self.audit.append(&entry) {
            tracing::error!(error = %e, "Failed to write audit entry");
        }
    }
}

/// Drive one tool to completion. Errors are sanitized strings destined
/// for the job's Failed state — internal detail stays in the logs.
async fn run_tool(
    invocation: Invocation,
    runner: Arc<dyn CommandRunner>,
    command: String,
    timeout: Duration,
) -> Result<Value, String> {
    match invocation.kind {
        ToolKind::ScanSecrets => {
            let report =
                scanner::scan_for_secrets(&invocation.path, invocation.max_depth, invocation.max_file_kb)
                    .map_err(|e| {
                        tracing::error!(error = %e, "Secret scan failed");
                        "Secret scan failed".to_string()
                    })?;
            serde_json::to_value(report).map_err(|e| format!("Report serialization failed: {}", e))
        }
        ToolKind::ScanVulnerabilities => {
            let report = scanner::scan_for_vulnerabilities(
                &invocation.path,
                invocation.max_depth,
                invocation.max_file_kb,
            )
            .map_err(|e| {
                tracing::error!(error = %e, "Vulnerability scan failed");
                "Vulnerability scan failed".to_string()
            })?;
            serde_json::to_value(report).map_err(|e| format!("Report serialization failed: {}", e))
        }
        ToolKind::ExternalScan => {
            let options = RunOptions {
                cwd: Some(invocation.path),
                timeout,
            };
            let output = runner
                .run(&command, &invocation.args, &options)
                .await
                .map_err(|e| {
                    tracing::error!(error = %e, command = %command, "External scanner failed");
                    format!("External scanner failed: {}", e.kind())
                })?;
            Ok(json!({
                "stdout": output.stdout,
                "stderr": output.stderr,
                "exit_code": output.exit_code,
            }))
        }
    }
}

// ─── Tests ───────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use crate::audit::AuditFilter;
    use crate::executor::runner::mock::MockRunner;
    use crate::executor::runner::CommandOutput;

    fn executor_with(
        dir: &tempfile::TempDir,
        runner: Arc<dyn CommandRunner>,
        config: ExecutorConfig,
    ) -> (ToolExecutor, Arc<AuditLog>) {
        let audit = Arc::new(AuditLog::new(&dir.path().join("audit.log")));
        (ToolExecutor::new(config, audit.clone(), runner), audit)
    }

    fn default_config(dir: &tempfile::TempDir) -> ExecutorConfig {
        ExecutorConfig {
            max_concurrent_jobs: 2,
            allowed_paths: vec![dir.path().to_path_buf()],
            tool_timeout_ms: 10_000,
            job_retention_ms: 60_000,
            external_scanner_cmd: "scanner-bin".to_string(),
        }
    }

    fn scan_params(dir: &tempfile::TempDir) -> Value {
        json!({"path": dir.path().to_string_lossy()})
    }

    #[tokio::test]
    async fn test_unknown_tool_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let (executor, _) = executor_with(
            &dir,
            Arc::new(MockRunner::succeeding("ok")),
            default_config(&dir),
        );

        let result = executor
            .execute("bridge-1", "rm_rf", &scan_params(&dir), "tester")
            .await;
        assert!(matches!(result, Err(ExecutorError::UnknownTool(_))));
        assert!(executor.list_jobs().is_empty(), "No job may exist for a rejected call");
    }

    #[tokio::test]
    async fn test_unknown_parameter_rejected_before_admission() {
        let dir = tempfile::tempdir().unwrap();
        let (executor, _) = executor_with(
            &dir,
            Arc::new(MockRunner::succeeding("ok")),
            default_config(&dir),
        );

        let params = json!({"path": dir.path().to_string_lossy(), "shell": "/bin/sh"});
        let result = executor.execute("bridge-1", "scan_secrets", &params, "tester").await;

        match result {
            Err(ExecutorError::Validation(message)) => assert!(message.contains("shell")),
            other => panic!("Expected Validation error, got {:?}", other.map(|_| ())),
        }
        assert!(executor.list_jobs().is_empty());
    }

    #[tokio::test]
    async fn test_escaped_path_rejected_before_admission() {
        let dir = tempfile::tempdir().unwrap();
        let (executor, _) = executor_with(
            &dir,
            Arc::new(MockRunner::succeeding("ok")),
            default_config(&dir),
        );

        let params = json!({"path": "/etc"});
        let result = executor.execute("bridge-1", "scan_secrets", &params, "tester").await;
        assert!(matches!(result, Err(ExecutorError::PathNotAllowed(_))));
        assert!(executor.list_jobs().is_empty());
    }

    #[tokio::test]
    async fn test_scan_secrets_end_to_end() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(
            dir.path().join("deploy.env"),
            "AWS_KEY=AKIAZ9Y8X7W6V5U4T3S2\n",
        )
        .unwrap();
        let (executor, _) = executor_with(
            &dir,
            Arc::new(MockRunner::succeeding("ok")),
            default_config(&dir),
        );

        let outcome = executor
            .execute("bridge-1", "scan_secrets", &scan_params(&dir), "tester")
            .await
            .unwrap();

        assert!(outcome.success);
        let data = outcome.data.unwrap();
        assert_eq!(data["findings"].as_array().unwrap().len(), 1);
        assert_eq!(data["findings"][0]["rule_id"], "aws-access-key-id");

        let serialized = serde_json::to_string(&data).unwrap();
        assert!(
            !serialized.contains("AKIAZ9Y8X7W6V5U4T3S2"),
            "Outcome must never carry a full secret"
        );
    }

    #[tokio::test]
    async fn test_external_scan_uses_injected_runner() {
        let dir = tempfile::tempdir().unwrap();
        let mock = Arc::new(MockRunner::succeeding("scan clean"));
        let (executor, _) = executor_with(&dir, mock.clone(), default_config(&dir));

        let params = json!({
            "path": dir.path().to_string_lossy(),
            "args": ["--format", "json"],
        });
        let outcome = executor
            .execute("bridge-1", "external_scan", &params, "tester")
            .await
            .unwrap();

        assert!(outcome.success);
        assert_eq!(outcome.data.unwrap()["stdout"], "scan clean");
        assert_eq!(mock.call_count(), 1);

        let calls = mock.calls.lock().unwrap();
        assert_eq!(calls[0].0, "scanner-bin");
        assert_eq!(calls[0].1, vec!["--format".to_string(), "json".to_string()]);
    }

    #[tokio::test]
    async fn test_capacity_ceiling_rejects_overflow() {
        let dir = tempfile::tempdir().unwrap();
        let mock = Arc::new(
            MockRunner::succeeding("slow").with_delay(Duration::from_millis(300)),
        );
        let (executor, _) = executor_with(&dir, mock, default_config(&dir));
        let executor = Arc::new(executor);

        let params = json!({"path": dir.path().to_string_lossy()});
        let mut in_flight = Vec::new();
        for _ in 0..2 {
            let executor = executor.clone();
            let params = params.clone();
            in_flight.push(tokio::spawn(async move {
                executor.execute("bridge-1", "external_scan", &params, "tester").await
            }));
        }

        // Let both jobs claim their slots, then overflow.
        tokio::time::sleep(Duration::from_millis(100)).await;
        assert_eq!(executor.running_count(), 2);

        let overflow = executor
            .execute("bridge-1", "external_scan", &params, "tester")
            .await;
        assert!(matches!(overflow, Err(ExecutorError::CapacityExceeded)));

        for handle in in_flight {
            let outcome = handle.await.unwrap().unwrap();
            assert!(outcome.success);
        }
        assert_eq!(executor.running_count(), 0);
    }

    #[tokio::test]
    async fn test_timeout_forces_failed_state() {
        let dir = tempfile::tempdir().unwrap();
        let mock = Arc::new(MockRunner::succeeding("late").with_delay(Duration::from_secs(30)));
        let mut config = default_config(&dir);
        config.tool_timeout_ms = 100;
        let (executor, _) = executor_with(&dir, mock, config);

        let params = json!({"path": dir.path().to_string_lossy()});
        let outcome = executor
            .execute("bridge-1", "external_scan", &params, "tester")
            .await
            .unwrap();

        assert!(!outcome.success);
        assert!(outcome.error.unwrap().contains("timed out"));

        let job = executor.get_status(&outcome.job_id).unwrap();
        assert_eq!(job.state, JobState::Failed);
    }

    #[tokio::test]
    async fn test_cancel_running_job() {
        let dir = tempfile::tempdir().unwrap();
        let mock = Arc::new(MockRunner::succeeding("late").with_delay(Duration::from_secs(30)));
        let (executor, _) = executor_with(&dir, mock, default_config(&dir));
        let executor = Arc::new(executor);

        let params = json!({"path": dir.path().to_string_lossy()});
        let task = {
            let executor = executor.clone();
            tokio::spawn(async move {
                executor.execute("bridge-1", "external_scan", &params, "tester").await
            })
        };

        // Wait for the job to reach Running.
        let job_id = loop {
            if let Some(job) = executor.list_jobs().into_iter().find(|j| j.state == JobState::Running)
            {
                break job.job_id;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        };

        executor.cancel(&job_id, "operator").unwrap();

        let outcome = task.await.unwrap().unwrap();
        assert!(!outcome.success);
        assert_eq!(outcome.error.as_deref(), Some("Job was cancelled"));

        let job = executor.get_status(&job_id).unwrap();
        assert_eq!(job.state, JobState::Cancelled);
        assert!(job.result.is_none(), "A late result must be discarded");
        assert_eq!(executor.running_count(), 0);
    }

    #[tokio::test]
    async fn test_cancel_unknown_job() {
        let dir = tempfile::tempdir().unwrap();
        let (executor, _) = executor_with(
            &dir,
            Arc::new(MockRunner::succeeding("ok")),
            default_config(&dir),
        );

        let result = executor.cancel(&Uuid::new_v4(), "operator");
        assert!(matches!(result, Err(ExecutorError::JobNotFound(_))));
    }

    #[tokio::test]
    async fn test_terminal_job_evicted_after_retention() {
        let dir = tempfile::tempdir().unwrap();
        let mut config = default_config(&dir);
        config.job_retention_ms = 50;
        let (executor, _) = executor_with(&dir, Arc::new(MockRunner::succeeding("ok")), config);

        let outcome = executor
            .execute("bridge-1", "scan_secrets", &scan_params(&dir), "tester")
            .await
            .unwrap();

        // A brief post-completion poll still succeeds…
        assert!(executor.get_status(&outcome.job_id).is_ok());

        // …but after the retention window the job is gone.
        tokio::time::sleep(Duration::from_millis(200)).await;
        assert!(matches!(
            executor.get_status(&outcome.job_id),
            Err(ExecutorError::JobNotFound(_))
        ));
    }

    #[tokio::test]
    async fn test_execute_writes_audit_entries() {
        let dir = tempfile::tempdir().unwrap();
        let (executor, audit) = executor_with(
            &dir,
            Arc::new(MockRunner::succeeding("ok")),
            default_config(&dir),
        );

        executor
            .execute("bridge-1", "scan_secrets", &scan_params(&dir), "tester")
            .await
            .unwrap();

        let entries = audit
            .query(&AuditFilter {
                action: Some("tool_execute".to_string()),
                ..Default::default()
            })
            .unwrap();
        assert_eq!(entries.len(), 1);
        assert!(entries[0].success);
        assert_eq!(entries[0].resource, "tool:scan_secrets");
        assert_eq!(entries[0].actor, "tester");
    }

    #[tokio::test]
    async fn test_failed_execution_audited_at_warning_severity() {
        let dir = tempfile::tempdir().unwrap();
        let mock = Arc::new(MockRunner::succeeding("late").with_delay(Duration::from_secs(30)));
        let mut config = default_config(&dir);
        config.tool_timeout_ms = 50;
        let (executor, audit) = executor_with(&dir, mock, config);

        let params = json!({"path": dir.path().to_string_lossy()});
        executor
            .execute("bridge-1", "external_scan", &params, "tester")
            .await
            .unwrap();

        let entries = audit
            .query(&AuditFilter {
                action: Some("tool_execute".to_string()),
                ..Default::default()
            })
            .unwrap();
        assert_eq!(entries.len(), 1);
        assert!(!entries[0].success);
        assert_eq!(entries[0].metadata.as_ref().unwrap()["severity"], "warning");
    }
}
