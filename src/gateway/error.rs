// Bastion — Gateway error types

use thiserror::Error;

/// Errors raised at the gateway boundary. Rejections carry exactly the
/// information that is safe to return to the caller.
#[derive(Debug, Error)]
pub enum GatewayError {
    #[error("Origin not allowed")]
    OriginRejected,

    #[error("Authentication failed")]
    Unauthorized,

    #[error("Rate limit exceeded — retry after {retry_after_secs}s")]
    RateLimited { retry_after_secs: u64 },

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Failures reported by the downstream handler. `Validation` and
/// `NotFound` are client faults (400); `Internal` is logged in full
/// server-side and masked in the response (500).
#[derive(Debug, Error)]
pub enum HandlerError {
    #[error("{0}")]
    Validation(String),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("{0}")]
    Internal(String),
}
