//! Conversational design-agent adapter.
//!
//! Unlike the audit vendors this one returns free-form markdown, so
//! the only shape check is that the agent said anything at all.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;

use async_trait::async_trait;
use serde::Deserialize;
use serde_json::json;

use super::http::{RetryPolicy, VendorHttpClient};
use super::VendorError;

/// A design consultant behind the designer submissions.
#[async_trait]
pub trait AgentVendor: Send + Sync {
    fn version(&self) -> &str;

    /// Stable name identifying this agent in report payloads.
    fn name(&self) -> &str;

    /// Ask the agent a question, with optional reference image URLs.
    /// Returns the markdown answer.
    async fn consult(
        &self,
        session_id: &str,
        question: &str,
        image_urls: &[String],
    ) -> Result<String, VendorError>;
}

#[derive(Deserialize)]
struct ConsultEnvelope {
    code: i64,
    msg: Option<String>,
    data: Option<ConsultData>,
}

#[derive(Deserialize)]
struct ConsultData {
    answer: String,
}

/// Adapter for hosted agent APIs.
pub struct HttpAgent {
    client: VendorHttpClient,
    name: String,
    version: String,
}

impl HttpAgent {
    pub fn new(client: VendorHttpClient, name: impl Into<String>, version: impl Into<String>) -> Self {
        Self {
            client,
            name: name.into(),
            version: version.into(),
        }
    }
}

#[async_trait]
impl AgentVendor for HttpAgent {
    fn version(&self) -> &str {
        &self.version
    }

    fn name(&self) -> &str {
        &self.name
    }

    async fn consult(
        &self,
        session_id: &str,
        question: &str,
        image_urls: &[String],
    ) -> Result<String, VendorError> {
        let body = json!({
            "session_id": session_id,
            "question": question,
            "images": image_urls,
        });
        let raw = self
            .client
            .post_json_retry("/consult", &body, RetryPolicy::backoff())
            .await?;

        let envelope: ConsultEnvelope = serde_json::from_value(raw)
            .map_err(|e| VendorError::SchemaViolation(format!("agent response: {e}")))?;

        match envelope.code {
            0 => {
                let answer = envelope
                    .data
                    .map(|d| d.answer)
                    .ok_or_else(|| VendorError::SchemaViolation("agent response has no data".to_string()))?;
                if answer.trim().is_empty() {
                    return Err(VendorError::AgentEmpty);
                }
                Ok(answer)
            }
            42900 => Err(VendorError::QuotaExceeded),
            code => Err(VendorError::VendorUnavailable(format!(
                "agent error {code}: {}",
                envelope.msg.unwrap_or_default()
            ))),
        }
    }
}

const CANNED_ANSWER: &str = "## 设计建议\n\n小户型客厅建议浅色系搭配镜面元素放大空间感：\n\n- **墙面**：乳白色或浅灰\n- **收纳**：定制到顶柜体，减少视觉碎片\n- **照明**：无主灯设计，轨道射灯加灯带\n\n如需进一步分析户型，请补充户型图。";

/// Test double with scripted answers consumed in order.
pub struct FakeAgent {
    name: String,
    version: String,
    scripted: Mutex<Vec<Result<String, VendorError>>>,
    calls: AtomicUsize,
}

impl FakeAgent {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            version: "fake-agent-1".to_string(),
            scripted: Mutex::new(Vec::new()),
            calls: AtomicUsize::new(0),
        }
    }

    pub fn script(&self, answer: Result<String, VendorError>) {
        self.scripted
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .push(answer);
    }

    pub fn call_count(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl AgentVendor for FakeAgent {
    fn version(&self) -> &str {
        &self.version
    }

    fn name(&self) -> &str {
        &self.name
    }

    async fn consult(
        &self,
        _session_id: &str,
        _question: &str,
        _image_urls: &[String],
    ) -> Result<String, VendorError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        let mut scripted = self.scripted.lock().unwrap_or_else(|e| e.into_inner());
        if scripted.is_empty() {
            return Ok(CANNED_ANSWER.to_string());
        }
        let answer = scripted.remove(0)?;
        if answer.trim().is_empty() {
            return Err(VendorError::AgentEmpty);
        }
        Ok(answer)
    }
}
