// Bastion — Command Runner
//
// Injected process-spawning capability. Tools that shell out to external
// scanners go through this trait, so the executor core is testable
// without spawning real processes.

use std::path::PathBuf;
use std::time::Duration;

use async_trait::async_trait;

/// Captured output of a finished command.
#[derive(Debug, Clone)]
pub struct CommandOutput {
    pub stdout: String,
    pub stderr: String,
    pub exit_code: i32,
}

#[derive(Debug, Clone)]
pub struct RunOptions {
    pub cwd: Option<PathBuf>,
    pub timeout: Duration,
}

#[async_trait]
pub trait CommandRunner: Send + Sync {
    async fn run(
        &self,
        command: &str,
        args: &[String],
        options: &RunOptions,
    ) -> std::io::Result<CommandOutput>;
}

/// Production runner backed by `tokio::process::Command`. The child is
/// killed when the future is dropped, so an aborted or timed-out job does
/// not leak processes.
pub struct ProcessRunner;

#[async_trait]
impl CommandRunner for ProcessRunner {
    async fn run(
        &self,
        command: &str,
        args: &[String],
        options: &RunOptions,
    ) -> std::io::Result<CommandOutput> {
        let mut cmd = tokio::process::Command::new(command);
        cmd.args(args)
            .stdin(std::process::Stdio::null())
            .stdout(std::process::Stdio::piped())
            .stderr(std::process::Stdio::piped())
            .kill_on_drop(true);
        if let Some(ref cwd) = options.cwd {
            cmd.current_dir(cwd);
        }

        let child = cmd.spawn()?;
        let output = tokio::time::timeout(options.timeout, child.wait_with_output())
            .await
            .map_err(|_| {
                std::io::Error::new(std::io::ErrorKind::TimedOut, "command timed out")
            })??;

        Ok(CommandOutput {
            stdout: String::from_utf8_lossy(&output.stdout).into_owned(),
            stderr: String::from_utf8_lossy(&output.stderr).into_owned(),
            exit_code: output.status.code().unwrap_or(-1),
        })
    }
}

// ─── In-Memory Mock for Testing ──────────────────────────────────────────────


// ─── Tests ───────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_process_runner_captures_stdout_and_exit_code() {
        let runner = ProcessRunner;
        let output = runner
            .run(
                "sh",
                &["-c".to_string(), "echo out; echo err >&2; exit 3".to_string()],
                &RunOptions {
                    cwd: None,
                    timeout: Duration::from_secs(5),
                },
            )
            .await
            .unwrap();

        assert_eq!(output.stdout.trim(), "out");
        assert_eq!(output.stderr.trim(), "err");
        assert_eq!(output.exit_code, 3);
    }

    #[tokio::test]
    async fn test_process_runner_respects_cwd() {
        let dir = tempfile::tempdir().unwrap();
        let runner = ProcessRunner;
        let output = runner
            .run(
                "pwd",
                &[],
                &RunOptions {
                    cwd: Some(dir.path().to_path_buf()),
                    timeout: Duration::from_secs(5),
                },
            )
            .await
            .unwrap();

        assert_eq!(
            std::path::Path::new(output.stdout.trim()).file_name(),
            dir.path().file_name()
        );
    }

    #[tokio::test]
    async fn test_process_runner_times_out() {
        let runner = ProcessRunner;
        let result = runner
            .run(
                "sleep",
                &["5".to_string()],
                &RunOptions {
                    cwd: None,
                    timeout: Duration::from_millis(50),
                },
            )
            .await;

        let err = result.unwrap_err();
        assert_eq!(err.kind(), std::io::ErrorKind::TimedOut);
    }

    #[tokio::test]
    async fn test_mock_runner_records_calls() {
        let mock = mock::MockRunner::succeeding("ok");
        let output = mock
            .run(
                "scanner",
                &["--json".to_string()],
                &RunOptions {
                    cwd: None,
                    timeout: Duration::from_secs(1),
                },
            )
            .await
            .unwrap();

        assert_eq!(output.exit_code, 0);
        assert_eq!(mock.call_count(), 1);
        assert_eq!(mock.calls.lock().unwrap()[0].0, "scanner");
    }
}
