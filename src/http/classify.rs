use reqwest::header::{HeaderMap, RETRY_AFTER};
use reqwest::StatusCode;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fmt;
use std::time::Duration;
use thiserror::Error;

use super::quota::{until_reset, QuotaHeaders};

const MAX_MESSAGE_LEN: usize = 500;

/// Closed set of failure identities produced by the access layer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ErrorKind {
    Auth,
    NotFound,
    Validation,
    RateLimited,
    ServerError,
    NetworkError,
    Timeout,
    Unknown,
}

impl ErrorKind {
    pub fn as_str(self) -> &'static str {
        match self {
            ErrorKind::Auth => "auth",
            ErrorKind::NotFound => "not_found",
            ErrorKind::Validation => "validation",
            ErrorKind::RateLimited => "rate_limited",
            ErrorKind::ServerError => "server_error",
            ErrorKind::NetworkError => "network_error",
            ErrorKind::Timeout => "timeout",
            ErrorKind::Unknown => "unknown",
        }
    }

    /// Kinds the retry policy may act on; the rest surface on first occurrence.
    pub fn is_transient(self) -> bool {
        matches!(
            self,
            ErrorKind::NetworkError
                | ErrorKind::Timeout
                | ErrorKind::ServerError
                | ErrorKind::RateLimited
        )
    }
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Transport-level failure, before any HTTP status exists.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransportFailure {
    /// Connection refused, DNS failure, reset or aborted exchange.
    Connect,
    /// The per-attempt timeout elapsed.
    Timeout,
    /// Anything else the client library reports (body read, redirect loop, ...).
    Other,
}

impl TransportFailure {
    pub fn from_reqwest(err: &reqwest::Error) -> Self {
        if err.is_timeout() {
            TransportFailure::Timeout
        } else if err.is_connect() {
            TransportFailure::Connect
        } else {
            TransportFailure::Other
        }
    }
}

/// Raw outcome of one attempt that did not succeed.
#[derive(Debug, Clone, Copy)]
pub enum Outcome<'a> {
    Transport(TransportFailure),
    Response {
        status: StatusCode,
        headers: &'a HeaderMap,
        body: &'a str,
    },
}

/// Map an outcome to its [`ErrorKind`]. Pure: same outcome, same kind.
pub fn classify(outcome: &Outcome<'_>) -> ErrorKind {
    match outcome {
        Outcome::Transport(TransportFailure::Timeout) => ErrorKind::Timeout,
        Outcome::Transport(_) => ErrorKind::NetworkError,
        Outcome::Response {
            status, headers, ..
        } => match *status {
            StatusCode::UNAUTHORIZED => ErrorKind::Auth,
            StatusCode::FORBIDDEN => {
                if QuotaHeaders::from_headers(headers).remaining == Some(0) {
                    ErrorKind::RateLimited
                } else {
                    // forbidden / insufficient scope
                    ErrorKind::Auth
                }
            }
            StatusCode::NOT_FOUND => ErrorKind::NotFound,
            StatusCode::UNPROCESSABLE_ENTITY => ErrorKind::Validation,
            StatusCode::TOO_MANY_REQUESTS => ErrorKind::RateLimited,
            s if s.is_server_error() => ErrorKind::ServerError,
            _ => ErrorKind::Unknown,
        },
    }
}

/// One entry of a 422 `errors` array.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct FieldError {
    #[serde(default)]
    pub resource: Option<String>,
    #[serde(default)]
    pub field: Option<String>,
    #[serde(default)]
    pub code: Option<String>,
    #[serde(default)]
    pub message: Option<String>,
}

impl fmt::Display for FieldError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let location = match (&self.resource, &self.field) {
            (Some(r), Some(fl)) => format!("{}.{}", r, fl),
            (None, Some(fl)) => fl.clone(),
            (Some(r), None) => r.clone(),
            (None, None) => "request".to_string(),
        };
        match (&self.code, &self.message) {
            (_, Some(m)) => write!(f, "{}: {}", location, m),
            (Some(c), None) => write!(f, "{}: {}", location, c),
            (None, None) => f.write_str(&location),
        }
    }
}

/// Classification plus the context a terminal error must preserve.
#[derive(Debug, Clone, PartialEq)]
pub struct Diagnosis {
    pub kind: ErrorKind,
    pub status: Option<u16>,
    pub message: String,
    pub field_errors: Vec<FieldError>,
    /// Epoch seconds at which the quota window resets (403/429 responses).
    pub reset_at: Option<i64>,
    /// Server-requested wait from `Retry-After`.
    pub retry_after: Option<Duration>,
}

pub fn diagnose(outcome: &Outcome<'_>) -> Diagnosis {
    let kind = classify(outcome);
    match outcome {
        Outcome::Transport(failure) => Diagnosis {
            kind,
            status: None,
            message: match failure {
                TransportFailure::Connect => "connection failed".to_string(),
                TransportFailure::Timeout => "request timed out".to_string(),
                TransportFailure::Other => "transport error".to_string(),
            },
            field_errors: Vec::new(),
            reset_at: None,
            retry_after: None,
        },
        Outcome::Response {
            status,
            headers,
            body,
        } => {
            let parsed: Option<Value> = serde_json::from_str(body).ok();
            let field_errors = if kind == ErrorKind::Validation {
                parsed.as_ref().map(field_errors_from_body).unwrap_or_default()
            } else {
                Vec::new()
            };
            let (reset_at, retry_after) = if kind == ErrorKind::RateLimited {
                (
                    QuotaHeaders::from_headers(headers).reset,
                    retry_after_from_headers(headers),
                )
            } else {
                (None, None)
            };
            Diagnosis {
                kind,
                status: Some(status.as_u16()),
                message: message_from_body(*status, parsed.as_ref(), body),
                field_errors,
                reset_at,
                retry_after,
            }
        }
    }
}

pub fn retry_after_from_headers(headers: &HeaderMap) -> Option<Duration> {
    headers
        .get(RETRY_AFTER)
        .and_then(|v| v.to_str().ok())
        .and_then(|s| s.trim().parse::<u64>().ok())
        .map(Duration::from_secs)
}

fn message_from_body(status: StatusCode, parsed: Option<&Value>, raw: &str) -> String {
    let detail = parsed
        .and_then(|v| v.get("message"))
        .and_then(|m| m.as_str())
        .map(str::to_string)
        .unwrap_or_else(|| {
            let trimmed = raw.trim();
            if trimmed.is_empty() {
                status.canonical_reason().unwrap_or("").to_string()
            } else {
                trimmed.chars().take(MAX_MESSAGE_LEN).collect()
            }
        });
    format!("HTTP {}: {}", status.as_u16(), detail)
}

fn field_errors_from_body(body: &Value) -> Vec<FieldError> {
    let Some(errors) = body.get("errors").and_then(|e| e.as_array()) else {
        return Vec::new();
    };
    errors
        .iter()
        .map(|e| match e {
            Value::String(s) => FieldError {
                message: Some(s.clone()),
                ..FieldError::default()
            },
            other => serde_json::from_value(other.clone()).unwrap_or_else(|_| FieldError {
                message: Some(other.to_string()),
                ..FieldError::default()
            }),
        })
        .collect()
}

/// Terminal failure of a logical call.
#[derive(Debug, Error)]
pub enum ApiError {
    #[error("{kind} error on {path}: {message}")]
    Failed {
        kind: ErrorKind,
        path: String,
        status: Option<u16>,
        message: String,
        field_errors: Vec<FieldError>,
        reset_at: Option<i64>,
        attempts: u32,
    },
    /// The caller's cancellation signal fired; never retried, never classified.
    #[error("request to {path} was cancelled")]
    Cancelled { path: String },
}

impl ApiError {
    pub fn from_diagnosis(path: &str, diagnosis: Diagnosis, attempts: u32) -> Self {
        ApiError::Failed {
            kind: diagnosis.kind,
            path: path.to_string(),
            status: diagnosis.status,
            message: diagnosis.message,
            field_errors: diagnosis.field_errors,
            reset_at: diagnosis.reset_at,
            attempts,
        }
    }

    /// Failure raised locally, before or after the network exchange.
    pub fn local(kind: ErrorKind, path: &str, message: impl Into<String>) -> Self {
        ApiError::Failed {
            kind,
            path: path.to_string(),
            status: None,
            message: message.into(),
            field_errors: Vec::new(),
            reset_at: None,
            attempts: 0,
        }
    }

    pub fn kind(&self) -> Option<ErrorKind> {
        match self {
            ApiError::Failed { kind, .. } => Some(*kind),
            ApiError::Cancelled { .. } => None,
        }
    }

    pub fn is_cancelled(&self) -> bool {
        matches!(self, ApiError::Cancelled { .. })
    }

    pub fn path(&self) -> &str {
        match self {
            ApiError::Failed { path, .. } | ApiError::Cancelled { path } => path,
        }
    }

    pub fn status(&self) -> Option<u16> {
        match self {
            ApiError::Failed { status, .. } => *status,
            ApiError::Cancelled { .. } => None,
        }
    }

    pub fn field_errors(&self) -> &[FieldError] {
        match self {
            ApiError::Failed { field_errors, .. } => field_errors,
            ApiError::Cancelled { .. } => &[],
        }
    }

    pub fn attempts(&self) -> u32 {
        match self {
            ApiError::Failed { attempts, .. } => *attempts,
            ApiError::Cancelled { .. } => 0,
        }
    }

    /// Time left until the quota resets, for `RateLimited` failures.
    pub fn rate_limit_wait(&self, now_epoch: i64) -> Option<Duration> {
        match self {
            ApiError::Failed {
                kind: ErrorKind::RateLimited,
                reset_at: Some(reset),
                ..
            } => until_reset(*reset, now_epoch.saturating_mul(1000)),
            _ => None,
        }
    }

    /// Process exit code for command-line front ends.
    pub fn exit_code(&self) -> i32 {
        match self.kind() {
            Some(ErrorKind::Auth) => 4,
            Some(ErrorKind::NotFound) => 44,
            Some(ErrorKind::RateLimited) => 75,
            Some(_) => 1,
            None => 130,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use reqwest::header::HeaderValue;

    fn response(status: u16, headers: &HeaderMap, body: &'static str) -> Diagnosis {
        diagnose(&Outcome::Response {
            status: StatusCode::from_u16(status).unwrap(),
            headers,
            body,
        })
    }

    fn kind_for(status: u16, headers: &HeaderMap) -> ErrorKind {
        classify(&Outcome::Response {
            status: StatusCode::from_u16(status).unwrap(),
            headers,
            body: "",
        })
    }

    #[test]
    fn classification_matrix() {
        let empty = HeaderMap::new();
        assert_eq!(
            classify(&Outcome::Transport(TransportFailure::Connect)),
            ErrorKind::NetworkError
        );
        assert_eq!(
            classify(&Outcome::Transport(TransportFailure::Other)),
            ErrorKind::NetworkError
        );
        assert_eq!(
            classify(&Outcome::Transport(TransportFailure::Timeout)),
            ErrorKind::Timeout
        );
        assert_eq!(kind_for(401, &empty), ErrorKind::Auth);
        assert_eq!(kind_for(403, &empty), ErrorKind::Auth);
        assert_eq!(kind_for(404, &empty), ErrorKind::NotFound);
        assert_eq!(kind_for(422, &empty), ErrorKind::Validation);
        assert_eq!(kind_for(429, &empty), ErrorKind::RateLimited);
        assert_eq!(kind_for(500, &empty), ErrorKind::ServerError);
        assert_eq!(kind_for(503, &empty), ErrorKind::ServerError);
        assert_eq!(kind_for(400, &empty), ErrorKind::Unknown);
        assert_eq!(kind_for(409, &empty), ErrorKind::Unknown);
        assert_eq!(kind_for(302, &empty), ErrorKind::Unknown);
    }

    #[test]
    fn forbidden_with_exhausted_quota_is_rate_limited() {
        let mut h = HeaderMap::new();
        h.insert("x-ratelimit-remaining", HeaderValue::from_static("0"));
        h.insert("x-ratelimit-reset", HeaderValue::from_static("1700000030"));
        let d = response(403, &h, r#"{"message":"API rate limit exceeded"}"#);
        assert_eq!(d.kind, ErrorKind::RateLimited);
        assert_eq!(d.reset_at, Some(1_700_000_030));
        assert_eq!(d.status, Some(403));

        h.insert("x-ratelimit-remaining", HeaderValue::from_static("12"));
        assert_eq!(kind_for(403, &h), ErrorKind::Auth);
    }

    #[test]
    fn classify_is_pure() {
        let mut h = HeaderMap::new();
        h.insert("x-ratelimit-remaining", HeaderValue::from_static("0"));
        let outcome = Outcome::Response {
            status: StatusCode::FORBIDDEN,
            headers: &h,
            body: "",
        };
        assert_eq!(classify(&outcome), classify(&outcome));
    }

    #[test]
    fn validation_keeps_field_errors() {
        let body = r#"{"message":"Validation Failed","errors":[{"resource":"Issue","field":"title","code":"missing_field"},"labels must be an array"]}"#;
        let d = response(422, &HeaderMap::new(), body);
        assert_eq!(d.kind, ErrorKind::Validation);
        assert_eq!(d.message, "HTTP 422: Validation Failed");
        assert_eq!(d.field_errors.len(), 2);
        assert_eq!(d.field_errors[0].field.as_deref(), Some("title"));
        assert_eq!(d.field_errors[0].to_string(), "Issue.title: missing_field");
        assert_eq!(
            d.field_errors[1].message.as_deref(),
            Some("labels must be an array")
        );
    }

    #[test]
    fn too_many_requests_reads_retry_after() {
        let mut h = HeaderMap::new();
        h.insert(RETRY_AFTER, HeaderValue::from_static("7"));
        let d = response(429, &h, "");
        assert_eq!(d.kind, ErrorKind::RateLimited);
        assert_eq!(d.retry_after, Some(Duration::from_secs(7)));
        assert_eq!(d.message, "HTTP 429: Too Many Requests");
    }

    #[test]
    fn exit_codes_follow_kind() {
        let not_found = ApiError::local(ErrorKind::NotFound, "/x", "missing");
        assert_eq!(not_found.exit_code(), 44);
        let auth = ApiError::local(ErrorKind::Auth, "/x", "nope");
        assert_eq!(auth.exit_code(), 4);
        let cancelled = ApiError::Cancelled { path: "/x".into() };
        assert_eq!(cancelled.exit_code(), 130);
        assert_eq!(cancelled.kind(), None);
        assert_eq!(
            ApiError::local(ErrorKind::ServerError, "/x", "boom").exit_code(),
            1
        );
    }

    #[test]
    fn rate_limit_wait_counts_down_to_reset() {
        let err = ApiError::Failed {
            kind: ErrorKind::RateLimited,
            path: "/x".into(),
            status: Some(403),
            message: String::new(),
            field_errors: Vec::new(),
            reset_at: Some(1_000),
            attempts: 1,
        };
        assert_eq!(err.rate_limit_wait(970), Some(Duration::from_secs(30)));
        assert_eq!(err.rate_limit_wait(2_000), Some(Duration::ZERO));
    }

    #[test]
    fn unusable_reset_gives_no_wait() {
        for reset in [-9_223_372_036_854_775_807, 0, i64::MAX] {
            let err = ApiError::Failed {
                kind: ErrorKind::RateLimited,
                path: "/x".into(),
                status: Some(429),
                message: String::new(),
                field_errors: Vec::new(),
                reset_at: Some(reset),
                attempts: 1,
            };
            assert_eq!(err.rate_limit_wait(1_700_000_000), None);
        }
    }
}
