//! Vendor adapters.
//!
//! Each external service is wrapped behind a narrow trait with an HTTP
//! implementation and an in-memory fake, selected by configuration.
//! Adapters normalise wire responses into typed values, classify
//! failures into `VendorError`, rate limit themselves with a token
//! bucket, and never cache.

pub mod agent;
pub mod enterprise;
pub mod http;
pub mod judicial;
pub mod llm;
pub mod ocr;
pub mod token_bucket;

use std::sync::Arc;

use thiserror::Error;

use crate::error::ErrorKind;

pub use agent::{AgentVendor, FakeAgent, HttpAgent};
pub use enterprise::{EnterpriseRecord, EnterpriseVendor, FakeEnterprise, HttpEnterprise};
pub use http::{RetryPolicy, VendorHttpClient};
pub use judicial::{CaseRecord, FakeJudicial, HttpJudicial, JudicialVendor};
pub use llm::{FakeLlm, HttpLlm, LlmVendor};
pub use ocr::{FakeOcr, HttpOcr, OcrExtraction, OcrVendor};
pub use token_bucket::{BucketRegistry, TokenBucket};

/// The full set of configured adapters, shared across workers.
#[derive(Clone)]
pub struct VendorSet {
    pub ocr: Arc<dyn OcrVendor>,
    pub enterprise: Arc<dyn EnterpriseVendor>,
    pub judicial: Arc<dyn JudicialVendor>,
    pub llm: Arc<dyn LlmVendor>,
    pub agent_primary: Arc<dyn AgentVendor>,
    pub agent_supervisor: Arc<dyn AgentVendor>,
}

/// Failure classes adapters can produce.
#[derive(Debug, Error)]
pub enum VendorError {
    #[error("unsupported mime type: {0}")]
    UnsupportedMime(String),

    #[error("content too large: {size} bytes (limit {limit})")]
    ContentTooLarge { size: u64, limit: u64 },

    #[error("vendor unavailable: {0}")]
    VendorUnavailable(String),

    #[error("vendor credentials rejected")]
    AuthExpired,

    #[error("no registry record found")]
    NotFound,

    #[error("ambiguous company name: {0} strong matches")]
    AmbiguousName(usize),

    #[error("vendor quota exceeded")]
    QuotaExceeded,

    #[error("response failed schema validation: {0}")]
    SchemaViolation(String),

    #[error("input exceeds vendor context window")]
    ContextTooLong,

    #[error("agent returned no content")]
    AgentEmpty,
}

impl VendorError {
    /// Map onto the stable error taxonomy.
    pub fn error_kind(&self) -> ErrorKind {
        match self {
            Self::UnsupportedMime(_) | Self::ContentTooLarge { .. } | Self::AmbiguousName(_) => {
                ErrorKind::InputInvalid
            }
            Self::ContextTooLong => ErrorKind::InputInvalid,
            Self::NotFound => ErrorKind::NotFound,
            Self::QuotaExceeded => ErrorKind::QuotaExceeded,
            Self::SchemaViolation(_) => ErrorKind::SchemaViolation,
            // Vendor credential failures surface as an upstream outage,
            // never as an auth error to the caller.
            Self::AuthExpired | Self::VendorUnavailable(_) | Self::AgentEmpty => {
                ErrorKind::VendorUnavailable
            }
        }
    }

    /// Whether a retry against the same vendor could succeed.
    pub fn is_transient(&self) -> bool {
        matches!(self, Self::VendorUnavailable(_))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_kind_mapping() {
        assert_eq!(
            VendorError::UnsupportedMime("text/html".into()).error_kind(),
            ErrorKind::InputInvalid
        );
        assert_eq!(
            VendorError::QuotaExceeded.error_kind(),
            ErrorKind::QuotaExceeded
        );
        assert_eq!(
            VendorError::AuthExpired.error_kind(),
            ErrorKind::VendorUnavailable
        );
        assert_eq!(
            VendorError::SchemaViolation("bad".into()).error_kind(),
            ErrorKind::SchemaViolation
        );
    }

    #[test]
    fn test_only_unavailable_is_transient() {
        assert!(VendorError::VendorUnavailable("503".into()).is_transient());
        assert!(!VendorError::QuotaExceeded.is_transient());
        assert!(!VendorError::AgentEmpty.is_transient());
    }
}
