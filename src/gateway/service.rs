// Bastion — Request Gateway
//
// Sole entry point for inbound requests. Pipeline: origin check →
// authentication → rate limiting → forward to the downstream handler,
// each stage short-circuiting on failure. A rejected request never
// reaches the handler and produces no side effect beyond its own audit
// record. Raw API keys never appear in logs or audit entries — actors
// are identified by a SHA-256 fingerprint prefix of the presented key.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde_json::Value;
use sha2::{Digest, Sha256};
use subtle::ConstantTimeEq;

use crate::audit::{AuditEntry, AuditLog, SEVERITY_INFO, SEVERITY_WARNING};
use crate::config::GatewayConfig;

use super::error::HandlerError;
use super::ratelimit::FixedWindowLimiter;
use super::request::{
    ApiRequest, ApiResponse, STATUS_BAD_REQUEST, STATUS_FORBIDDEN, STATUS_INTERNAL,
    STATUS_UNAUTHORIZED,
};

/// Downstream handler invoked once a request clears every gate. The
/// actor is the gateway-established identity (a key fingerprint or
/// "anonymous"), for the handler's own audit records.
#[async_trait]
pub trait RequestHandler: Send + Sync {
    async fn handle(&self, request: &ApiRequest, actor: &str) -> Result<Value, HandlerError>;
}

/// The gateway: policy configuration, rate-limit state, audit sink, and
/// the downstream handler.
pub struct RequestGateway {
    config: GatewayConfig,
    limiter: FixedWindowLimiter,
    audit: Arc<AuditLog>,
    handler: Arc<dyn RequestHandler>,
}

impl RequestGateway {
    pub fn new(
        config: GatewayConfig,
        audit: Arc<AuditLog>,
        handler: Arc<dyn RequestHandler>,
    ) -> Self {
        let limiter =
            FixedWindowLimiter::new(config.max_requests, Duration::from_millis(config.window_ms));
        Self {
            config,
            limiter,
            audit,
            handler,
        }
    }

    /// Run one request through the full pipeline.
    pub async fn handle(&self, request: &ApiRequest) -> ApiResponse {
        let ip = request.remote_addr.clone();
        let origin = request.header("Origin").map(str::to_string);

        // Stage 1: origin policy.
        if self.config.origin_check_enabled {
            if let Some(ref origin) = origin {
                if !self.origin_allowed(origin) {
                    self.record(
                        with_ip(AuditEntry::new("anonymous", "origin_check", "gateway", false), &ip)
                            .with_error("origin not in allow-list")
                            .with_severity(SEVERITY_WARNING),
                    );
                    return ApiResponse::error(STATUS_FORBIDDEN, "Origin not allowed");
                }
            }
        }

        // Stage 2: authentication.
        let presented = request.header(&self.config.api_key_header);
        let mut actor = "anonymous".to_string();
        if self.config.auth_enabled {
            match presented {
                Some(key) if self.key_matches(key) => {
                    actor = key_fingerprint(key);
                    self.record(
                        with_ip(AuditEntry::new(&actor, "auth_attempt", "gateway", true), &ip)
                            .with_severity(SEVERITY_INFO),
                    );
                }
                Some(key) => {
                    let actor = key_fingerprint(key);
                    self.record(
                        with_ip(AuditEntry::new(&actor, "auth_attempt", "gateway", false), &ip)
                            .with_error("invalid API key")
                            .with_severity(SEVERITY_WARNING),
                    );
                    return ApiResponse::error(STATUS_UNAUTHORIZED, "Authentication failed");
                }
                None => {
                    self.record(
                        with_ip(AuditEntry::new("anonymous", "auth_attempt", "gateway", false), &ip)
                            .with_error("missing API key")
                            .with_severity(SEVERITY_WARNING),
                    );
                    return ApiResponse::error(STATUS_UNAUTHORIZED, "Authentication failed");
                }
            }
        } else if let Some(key) = presented {
            actor = key_fingerprint(key);
        }

        // Stage 3: rate limiting, keyed by authenticated identity when
        // available, else by remote address.
        if self.config.rate_limit_enabled {
            let client_key = if actor != "anonymous" {
                actor.clone()
            } else {
                ip.clone().unwrap_or_else(|| "anonymous".to_string())
            };

            if let Err(retry_after_secs) = self.limiter.try_acquire(&client_key) {
                self.record(
                    with_ip(AuditEntry::new(&actor, "rate_limited", "gateway", false), &ip)
                        .with_severity(SEVERITY_WARNING),
                );
                return ApiResponse::rate_limited(retry_after_secs);
            }
        }

        // Stage 4: forward.
        let result = self.handler.handle(request, &actor).await;

        let mut outcome = AuditEntry::new(&actor, &request.operation, "gateway", result.is_ok());
        outcome = with_ip(outcome, &ip);
        if let Err(ref e) = result {
            outcome = outcome.with_error(&e.to_string());
        }
        self.record(outcome);

        let mut response = match result {
            Ok(data) => ApiResponse::ok(data),
            Err(e @ (HandlerError::Validation(_) | HandlerError::NotFound(_))) => {
                ApiResponse::error(STATUS_BAD_REQUEST, e.to_string())
            }
            Err(HandlerError::Internal(detail)) => {
                // Full detail stays server-side; the caller gets a generic message.
                tracing::error!(operation = %request.operation, error = %detail, "Handler failure");
                ApiResponse::error(STATUS_INTERNAL, "Internal server error")
            }
        };

        if let Some(origin) = origin {
            response = response.with_header("Access-Control-Allow-Origin", &origin);
        }
        response
    }

    fn origin_allowed(&self, origin: &str) -> bool {
        self.config
            .allowed_origins
            .iter()
            .any(|allowed| allowed == "*" || allowed == origin)
    }

    /// Constant-time comparison against every configured key. The scan
    /// never breaks early, so timing does not reveal which key matched.
    fn key_matches(&self, presented: &str) -> bool {
        let presented = presented.as_bytes();
        let mut matched = false;
        for key in &self.config.api_keys {
            let key = key.as_bytes();
            if key.len() == presented.len() {
                matched |= bool::from(key.ct_eq(presented));
            }
        }
        matched
    }

    fn record(&self, entry: AuditEntry) {
        if let Err(e) = self.audit.append(&entry) {
            tracing::error!(error = %e, "Failed to write audit entry");
        }
    }
}

fn with_ip(entry: AuditEntry, ip: &Option<String>) -> AuditEntry {
    match ip {
        Some(ip) => entry.with_ip(ip),
        None => entry,
    }
}

/// Short SHA-256 fingerprint identifying an API key without revealing it.
fn key_fingerprint(key: &str) -> String {
    let digest = Sha256::digest(key.as_bytes());
    format!("key:{}", hex::encode(&digest[..6]))
}

// ─── Tests ───────────────────────────────────────────────────────────────────
