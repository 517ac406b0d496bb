// Bastion — Gateway Module
//
// Single entry point for inbound requests: origin policy, API-key
// authentication, fixed-window rate limiting, then dispatch to the
// downstream handler. Served over a Unix domain socket.

mod error;
mod ratelimit;
mod request;
mod service;
mod uds;

pub use error::{GatewayError, HandlerError};
pub use ratelimit::FixedWindowLimiter;
pub use request::{
    ApiRequest, ApiResponse, ResponseMetadata, STATUS_BAD_REQUEST, STATUS_FORBIDDEN,
    STATUS_INTERNAL, STATUS_OK, STATUS_TOO_MANY_REQUESTS, STATUS_UNAUTHORIZED,
};
pub use service::{RequestGateway, RequestHandler};
pub use uds::UdsServer;
