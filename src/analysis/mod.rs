//! Analysis strategies, one per submission kind.
//!
//! A strategy turns a validated subject into a `RiskReport` using the
//! configured vendors. Vendor failures are caught at this boundary and
//! converted into findings whenever the report remains useful; only
//! inputs that leave nothing to report produce a failed report.

pub mod acceptance;
mod audit;
pub mod company;
pub mod contract;
pub mod designer;
pub mod quote;
pub mod templates;

use std::sync::Arc;
use std::time::Duration;

use crate::blobs::BlobStore;
use crate::models::{RiskReport, Subject};
use crate::vendors::VendorSet;

/// Everything a strategy needs besides the subject itself.
#[derive(Clone)]
pub struct AnalysisContext {
    pub vendors: VendorSet,
    pub blobs: Arc<BlobStore>,
    /// Absolute URL prefix for signed blob links handed to vendors.
    pub public_base_url: String,
    /// Lifetime of those links. Vendors may process asynchronously, so
    /// this stays at 24 h or more.
    pub signed_url_ttl: Duration,
}

impl AnalysisContext {
    /// Absolute signed URL for a stored blob.
    pub fn signed_blob_url(&self, key: &str) -> String {
        let path = self
            .blobs
            .signed_url(key, self.signed_url_ttl.as_secs() as i64);
        format!("{}{}", self.public_base_url.trim_end_matches('/'), path)
    }
}

/// Run the strategy for `subject`. Always returns a report, completed
/// or failed; deadlines are the caller's business.
pub async fn run(subject: &Subject, fingerprint: &str, ctx: &AnalysisContext) -> RiskReport {
    match subject {
        Subject::Company { name, region } => {
            company::analyse(name, region.as_deref(), fingerprint, ctx).await
        }
        Subject::Quote {
            blob_key,
            total_price,
        } => quote::analyse(blob_key, *total_price, fingerprint, ctx).await,
        Subject::Contract { blob_key } => contract::analyse(blob_key, fingerprint, ctx).await,
        Subject::Acceptance { blob_key, stage } => {
            acceptance::analyse(blob_key, *stage, fingerprint, ctx).await
        }
        Subject::Designer {
            question,
            image_keys,
        } => designer::analyse(question, image_keys, fingerprint, ctx).await,
    }
}

#[cfg(test)]
pub(crate) mod test_support {
    use super::*;
    use crate::vendors::{FakeAgent, FakeEnterprise, FakeJudicial, FakeLlm, FakeOcr};

    /// A context wired entirely to fakes over a temp blob root.
    pub(crate) fn fake_context() -> (tempfile::TempDir, AnalysisContext) {
        let dir = tempfile::tempdir().expect("tempdir");
        let blobs = Arc::new(BlobStore::new(dir.path().join("blobs"), "test-secret"));
        let ctx = AnalysisContext {
            vendors: VendorSet {
                ocr: Arc::new(FakeOcr::new()),
                enterprise: Arc::new(FakeEnterprise::new()),
                judicial: Arc::new(FakeJudicial::new()),
                llm: Arc::new(FakeLlm::new()),
                agent_primary: Arc::new(FakeAgent::new("primary")),
                agent_supervisor: Arc::new(FakeAgent::new("supervisor")),
            },
            blobs,
            public_base_url: "http://127.0.0.1:8080".to_string(),
            signed_url_ttl: Duration::from_secs(86_400),
        };
        (dir, ctx)
    }

    /// Tiny valid PNG header, enough for mime sniffing.
    pub(crate) const PNG_BYTES: &[u8] = &[
        0x89, 0x50, 0x4E, 0x47, 0x0D, 0x0A, 0x1A, 0x0A, 0x00, 0x00, 0x00, 0x0D, 0x49, 0x48, 0x44,
        0x52, 0x00, 0x00, 0x00, 0x01, 0x00, 0x00, 0x00, 0x01, 0x08, 0x06, 0x00, 0x00, 0x00,
    ];
}
