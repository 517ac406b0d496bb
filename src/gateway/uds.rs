// Bastion — Unix Domain Socket Server
//
// Listens on a Unix domain socket for newline-delimited JSON requests and
// feeds them through the gateway pipeline. Each connection is handled in
// a spawned tokio task. When the client does not supply a remote address,
// the peer's PID (via SO_PEERCRED) identifies it for rate limiting and
// audit records.

use std::path::PathBuf;
use std::sync::Arc;

use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::{UnixListener, UnixStream};

use super::request::{ApiRequest, ApiResponse, STATUS_BAD_REQUEST};
use super::service::RequestGateway;
use super::GatewayError;

/// Unix Domain Socket front for the request gateway.
pub struct UdsServer {
    gateway: Arc<RequestGateway>,
    socket_path: PathBuf,
}

impl UdsServer {
    pub fn new(gateway: Arc<RequestGateway>, socket_path: PathBuf) -> Self {
        Self {
            gateway,
            socket_path,
        }
    }

    /// Default socket path: `$XDG_RUNTIME_DIR/bastion/bastion.sock`,
    /// falling back to `/tmp/bastion/bastion.sock`.
    pub fn default_socket_path() -> PathBuf {
        let runtime_dir = std::env::var("XDG_RUNTIME_DIR")
            .map(PathBuf::from)
            .unwrap_or_else(|_| PathBuf::from("/tmp"));
        runtime_dir.join("bastion").join("bastion.sock")
    }

    /// Start the server. Runs until the process is terminated.
    pub async fn run(&self) -> Result<(), GatewayError> {
        if let Some(parent) = self.socket_path.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }

        // Remove a stale socket left by a previous run.
        if self.socket_path.exists() {
            tokio::fs::remove_file(&self.socket_path).await?;
        }

        let listener = UnixListener::bind(&self.socket_path)?;
        tracing::info!(
            socket = %self.socket_path.display(),
            "Bastion gateway listening"
        );

        // Owner-only socket permissions.
        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            let perms = std::fs::Permissions::from_mode(0o600);
            std::fs::set_permissions(&self.socket_path, perms)?;
        }

        loop {
            let (stream, _addr) = listener.accept().await?;
            let gateway = self.gateway.clone();

            tokio::spawn(async move {
                if let Err(e) = handle_connection(stream, gateway).await {
                    tracing::error!(error = %e, "Connection handler error");
                }
            });
        }
    }
}

/// Handle one client connection: read newline-delimited requests, write
/// one envelope per line.
async fn handle_connection(
    stream: UnixStream,
    gateway: Arc<RequestGateway>,
) -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
    let peer_label = {
        #[cfg(target_os = "linux")]
        {
            stream
                .peer_cred()
                .ok()
                .and_then(|cred| cred.pid())
                .map(|pid| format!("uds:pid:{}", pid))
        }
        #[cfg(not(target_os = "linux"))]
        {
            None::<String>
        }
    };

    let (reader, mut writer) = stream.into_split();
    let mut lines = BufReader::new(reader).lines();

    while let Ok(Some(line)) = lines.next_line().await {
        let response = process_line(&line, &gateway, peer_label.as_deref()).await;
        let mut json = serde_json::to_string(&response)?;
        json.push('\n');
        writer.write_all(json.as_bytes()).await?;
        writer.flush().await?;
    }

    Ok(())
}

/// Parse one request line and run it through the gateway.
async fn process_line(
    raw: &str,
    gateway: &RequestGateway,
    peer_label: Option<&str>,
) -> ApiResponse {
    match serde_json::from_str::<ApiRequest>(raw) {
        Ok(mut request) => {
            if request.remote_addr.is_none() {
                request.remote_addr = peer_label.map(str::to_string);
            }
            gateway.handle(&request).await
        }
        Err(e) => ApiResponse::error(STATUS_BAD_REQUEST, format!("Malformed request: {}", e)),
    }
}

// ─── Tests ───────────────────────────────────────────────────────────────────
