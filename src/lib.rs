//! Resilient paginated access to the GitHub REST API.
//!
//! [`http::RestClient`] authenticates requests, classifies and retries
//! failures, respects the server's per-pool rate-limit quota, and exposes
//! Link-header pagination as single pages, a lazy stream, or a bounded
//! collection.

pub mod cancel;
pub mod config;
pub mod http;
pub mod types;

pub use cancel::CancelToken;
pub use config::{Config, ConfigError};
pub use http::{ApiError, ErrorKind, ResponseEnvelope, RestClient};
pub use types::{Method, PageCursor, PaginationStyle, RequestSpec};
