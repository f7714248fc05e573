//! OCR vendor adapter.
//!
//! Extracts text from uploaded images and PDFs. Input is validated here
//! by magic-bytes sniffing and a hard size cap before any bytes travel;
//! transient vendor failures are retried with the standard backoff.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;

use async_trait::async_trait;
use base64::Engine;
use serde::Deserialize;
use serde_json::json;

use super::http::{RetryPolicy, VendorHttpClient};
use super::VendorError;
use crate::utils::{detect_mime, upload_category, UploadCategory};

/// Normalised OCR output.
#[derive(Debug, Clone)]
pub struct OcrExtraction {
    pub text: String,
    /// 0.0..=1.0.
    pub confidence: f32,
    pub regions: Option<Vec<OcrRegion>>,
}

/// A located text region, when the vendor reports layout.
#[derive(Debug, Clone, Deserialize)]
pub struct OcrRegion {
    pub text: String,
    /// x, y, width, height in source-image pixels.
    pub bbox: [u32; 4],
}

/// Text extraction from uploaded evidence.
#[async_trait]
pub trait OcrVendor: Send + Sync {
    /// Version tag included in cache fingerprints.
    fn version(&self) -> &str;

    async fn extract(&self, bytes: &[u8], declared_mime: Option<&str>) -> Result<OcrExtraction, VendorError>;
}

/// Shared input validation: sniffed MIME must be an image or PDF, and
/// the payload must be under the configured cap.
pub fn validate_input(bytes: &[u8], declared_mime: Option<&str>, max_bytes: u64) -> Result<String, VendorError> {
    if bytes.len() as u64 > max_bytes {
        return Err(VendorError::ContentTooLarge {
            size: bytes.len() as u64,
            limit: max_bytes,
        });
    }
    let mime = detect_mime(bytes, declared_mime);
    match upload_category(&mime) {
        UploadCategory::Image | UploadCategory::Pdf => Ok(mime),
        UploadCategory::Other => Err(VendorError::UnsupportedMime(mime)),
    }
}

#[derive(Debug, Deserialize)]
struct ExtractResponse {
    text: String,
    #[serde(default)]
    confidence: Option<f32>,
    #[serde(default)]
    regions: Option<Vec<OcrRegion>>,
}

/// HTTP implementation posting base64 payloads to the vendor.
pub struct HttpOcr {
    client: VendorHttpClient,
    version: String,
    max_bytes: u64,
}

impl HttpOcr {
    pub fn new(client: VendorHttpClient, version: String, max_bytes: u64) -> Self {
        Self {
            client,
            version,
            max_bytes,
        }
    }
}

#[async_trait]
impl OcrVendor for HttpOcr {
    fn version(&self) -> &str {
        &self.version
    }

    async fn extract(&self, bytes: &[u8], declared_mime: Option<&str>) -> Result<OcrExtraction, VendorError> {
        let mime = validate_input(bytes, declared_mime, self.max_bytes)?;

        let body = json!({
            "image": base64::engine::general_purpose::STANDARD.encode(bytes),
            "mime": mime,
        });
        let value = self
            .client
            .post_json_retry("/extract", &body, RetryPolicy::backoff())
            .await?;

        let parsed: ExtractResponse = serde_json::from_value(value)
            .map_err(|e| VendorError::SchemaViolation(format!("ocr response: {e}")))?;

        Ok(OcrExtraction {
            text: parsed.text,
            confidence: parsed.confidence.unwrap_or(0.0).clamp(0.0, 1.0),
            regions: parsed.regions,
        })
    }
}

/// In-memory fake for tests and `mode = "fake"` deployments. Responses
/// can be scripted per call; otherwise a canned extraction is returned.
pub struct FakeOcr {
    version: String,
    max_bytes: u64,
    default_text: String,
    scripted: Mutex<Vec<Result<OcrExtraction, VendorError>>>,
    calls: AtomicUsize,
}

impl FakeOcr {
    pub fn new() -> Self {
        Self {
            version: "fake-ocr-1".to_string(),
            max_bytes: 10 * 1024 * 1024,
            default_text: "装修报价单\n木地板 120平米 单价300元\n人工费 20000元".to_string(),
            scripted: Mutex::new(Vec::new()),
            calls: AtomicUsize::new(0),
        }
    }

    pub fn with_text(mut self, text: impl Into<String>) -> Self {
        self.default_text = text.into();
        self
    }

    pub fn with_max_bytes(mut self, max_bytes: u64) -> Self {
        self.max_bytes = max_bytes;
        self
    }

    /// Queue the next `extract` outcome; scripted outcomes are consumed
    /// in order before the default applies.
    pub fn script(&self, outcome: Result<OcrExtraction, VendorError>) {
        self.scripted.lock().unwrap_or_else(|e| e.into_inner()).push(outcome);
    }

    pub fn call_count(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

impl Default for FakeOcr {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl OcrVendor for FakeOcr {
    fn version(&self) -> &str {
        &self.version
    }

    async fn extract(&self, bytes: &[u8], declared_mime: Option<&str>) -> Result<OcrExtraction, VendorError> {
        validate_input(bytes, declared_mime, self.max_bytes)?;
        self.calls.fetch_add(1, Ordering::SeqCst);

        let mut scripted = self.scripted.lock().unwrap_or_else(|e| e.into_inner());
        if !scripted.is_empty() {
            return scripted.remove(0);
        }
        Ok(OcrExtraction {
            text: self.default_text.clone(),
            confidence: 0.93,
            regions: None,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const PNG_MAGIC: [u8; 12] = [0x89, 0x50, 0x4E, 0x47, 0x0D, 0x0A, 0x1A, 0x0A, 0, 0, 0, 0];

    #[test]
    fn test_validate_rejects_oversized() {
        let bytes = vec![0u8; 32];
        let err = validate_input(&bytes, Some("image/png"), 16).unwrap_err();
        assert!(matches!(err, VendorError::ContentTooLarge { size: 32, limit: 16 }));
    }

    #[test]
    fn test_validate_sniffs_not_trusts_declared() {
        // Declared PDF, but content is HTML: rejected.
        let err = validate_input(b"<html><body>x</body></html>", Some("application/pdf"), 1024).unwrap_err();
        assert!(matches!(err, VendorError::UnsupportedMime(_)));
        // Declared octet-stream, but content is PNG: accepted.
        assert_eq!(validate_input(&PNG_MAGIC, Some("application/octet-stream"), 1024).unwrap(), "image/png");
    }

    #[tokio::test]
    async fn test_fake_returns_default_and_counts() {
        let fake = FakeOcr::new().with_text("合同文本");
        let out = fake.extract(&PNG_MAGIC, None).await.unwrap();
        assert_eq!(out.text, "合同文本");
        assert_eq!(fake.call_count(), 1);
    }

    #[tokio::test]
    async fn test_fake_scripted_outcomes_consumed_in_order() {
        let fake = FakeOcr::new();
        fake.script(Err(VendorError::VendorUnavailable("down".into())));
        fake.script(Ok(OcrExtraction {
            text: "second".into(),
            confidence: 0.5,
            regions: None,
        }));

        assert!(fake.extract(&PNG_MAGIC, None).await.is_err());
        assert_eq!(fake.extract(&PNG_MAGIC, None).await.unwrap().text, "second");
        // Back to the default afterwards.
        assert!(fake.extract(&PNG_MAGIC, None).await.is_ok());
    }

    #[tokio::test]
    async fn test_fake_validates_before_scripted() {
        let fake = FakeOcr::new().with_max_bytes(4);
        let err = fake.extract(&PNG_MAGIC, None).await.unwrap_err();
        assert!(matches!(err, VendorError::ContentTooLarge { .. }));
        assert_eq!(fake.call_count(), 0);
    }
}
