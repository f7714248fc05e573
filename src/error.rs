//! Stable error taxonomy and the wire envelope.
//!
//! Every failure surfaced to a client is classified into one of the
//! `ErrorKind` variants. The numeric envelope code mirrors the HTTP
//! status, so clients can branch on either. Vendor-specific error
//! details never leak through this layer.

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde::{Deserialize, Serialize};

/// Classification of a failed operation. Stored with failed reports and
/// tasks, and mapped onto the wire envelope.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    /// Malformed or unacceptable client input.
    InputInvalid,
    /// Missing or invalid credentials for a protected endpoint.
    AuthRequired,
    /// Caller's daily analysis quota is exhausted, or a vendor refused
    /// on quota grounds.
    QuotaExceeded,
    /// Referenced task, report or blob does not exist.
    NotFound,
    /// Per-IP or per-endpoint rate limit tripped.
    RateLimited,
    /// Upstream vendor unreachable or persistently erroring.
    VendorUnavailable,
    /// Vendor responded but the payload failed schema validation.
    SchemaViolation,
    /// Work queue is full; the client should retry later.
    Overloaded,
    /// The analysis exceeded its build deadline.
    Timeout,
    /// Anything else. The envelope carries an error id for log
    /// correlation, never the underlying message.
    Internal,
}

impl ErrorKind {
    /// Get the kind as a string (stored in the database).
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::InputInvalid => "input_invalid",
            Self::AuthRequired => "auth_required",
            Self::QuotaExceeded => "quota_exceeded",
            Self::NotFound => "not_found",
            Self::RateLimited => "rate_limited",
            Self::VendorUnavailable => "vendor_unavailable",
            Self::SchemaViolation => "schema_violation",
            Self::Overloaded => "overloaded",
            Self::Timeout => "timeout",
            Self::Internal => "internal",
        }
    }

    /// Parse a kind from its string form.
    pub fn from_str(s: &str) -> Option<Self> {
        match s {
            "input_invalid" => Some(Self::InputInvalid),
            "auth_required" => Some(Self::AuthRequired),
            "quota_exceeded" => Some(Self::QuotaExceeded),
            "not_found" => Some(Self::NotFound),
            "rate_limited" => Some(Self::RateLimited),
            "vendor_unavailable" => Some(Self::VendorUnavailable),
            "schema_violation" => Some(Self::SchemaViolation),
            "overloaded" => Some(Self::Overloaded),
            "timeout" => Some(Self::Timeout),
            "internal" => Some(Self::Internal),
            _ => None,
        }
    }

    /// Envelope code for this kind. Mirrors the HTTP status.
    pub fn code(&self) -> u16 {
        match self {
            Self::InputInvalid => 400,
            Self::AuthRequired => 401,
            Self::QuotaExceeded => 403,
            Self::NotFound => 404,
            Self::RateLimited => 429,
            Self::VendorUnavailable | Self::SchemaViolation => 502,
            Self::Overloaded => 503,
            Self::Timeout => 504,
            Self::Internal => 500,
        }
    }

    fn status(&self) -> StatusCode {
        StatusCode::from_u16(self.code()).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR)
    }
}

/// Response envelope. `code = 0` means success; errors reuse the HTTP
/// status as the code.
#[derive(Debug, Serialize, Deserialize)]
pub struct Envelope<T> {
    pub code: u16,
    pub msg: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<T>,
}

impl<T: Serialize> Envelope<T> {
    /// Successful envelope wrapping `data`.
    pub fn ok(data: T) -> Json<Self> {
        Json(Self {
            code: 0,
            msg: "ok".to_string(),
            data: Some(data),
        })
    }
}

/// An error ready to be rendered as an HTTP response.
#[derive(Debug)]
pub struct ApiError {
    pub kind: ErrorKind,
    pub msg: String,
    /// Seconds the client should wait before retrying (Overloaded and
    /// RateLimited responses).
    pub retry_after_secs: Option<u64>,
}

impl ApiError {
    pub fn new(kind: ErrorKind, msg: impl Into<String>) -> Self {
        Self {
            kind,
            msg: msg.into(),
            retry_after_secs: None,
        }
    }

    pub fn invalid(msg: impl Into<String>) -> Self {
        Self::new(ErrorKind::InputInvalid, msg)
    }

    pub fn not_found(msg: impl Into<String>) -> Self {
        Self::new(ErrorKind::NotFound, msg)
    }

    pub fn auth_required() -> Self {
        Self::new(ErrorKind::AuthRequired, "missing or invalid admin key")
    }

    pub fn overloaded(retry_after_secs: u64) -> Self {
        Self {
            kind: ErrorKind::Overloaded,
            msg: "service busy, retry later".to_string(),
            retry_after_secs: Some(retry_after_secs),
        }
    }

    pub fn rate_limited(retry_after_secs: u64) -> Self {
        Self {
            kind: ErrorKind::RateLimited,
            msg: "too many requests".to_string(),
            retry_after_secs: Some(retry_after_secs),
        }
    }

    /// Wrap an unexpected error. The cause is logged under a fresh
    /// error id; only the id goes to the client.
    pub fn internal(err: impl std::fmt::Display) -> Self {
        let error_id = uuid::Uuid::new_v4().to_string();
        tracing::error!(error_id = %error_id, error = %err, "internal error");
        Self::new(ErrorKind::Internal, format!("internal error (id {error_id})"))
    }
}

impl std::fmt::Display for ApiError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}: {}", self.kind.as_str(), self.msg)
    }
}

impl std::error::Error for ApiError {}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let body = Json(Envelope::<serde_json::Value> {
            code: self.kind.code(),
            msg: self.msg,
            data: None,
        });
        let mut response = (self.kind.status(), body).into_response();
        if let Some(secs) = self.retry_after_secs {
            if let Ok(value) = secs.to_string().parse() {
                response.headers_mut().insert(axum::http::header::RETRY_AFTER, value);
            }
        }
        response
    }
}
