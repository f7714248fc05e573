//! Chat-completion vendor adapter.
//!
//! Renders a prompt template, posts it to an OpenAI-style completion
//! endpoint and validates the reply against the template's output
//! schema. A reply that fails validation gets exactly one repair round
//! with a corrective suffix; a second bad reply fails the call.

use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;

use async_trait::async_trait;
use serde::Deserialize;
use serde_json::{json, Value};

use crate::analysis::templates::{self, Template, REPAIR_SUFFIX};

use super::http::{RetryPolicy, VendorHttpClient};
use super::VendorError;

/// Structured analysis over a prompt template.
#[async_trait]
pub trait LlmVendor: Send + Sync {
    fn version(&self) -> &str;

    /// Render `template_id` with `variables`, run the model and return
    /// the schema-validated JSON reply.
    async fn analyse(&self, template_id: &str, variables: &Value) -> Result<Value, VendorError>;
}

#[derive(Deserialize)]
struct ChatResponse {
    #[serde(default)]
    choices: Vec<ChatChoice>,
    error: Option<ChatError>,
}

#[derive(Deserialize)]
struct ChatChoice {
    message: ChatMessage,
}

#[derive(Deserialize)]
struct ChatMessage {
    content: String,
}

#[derive(Deserialize)]
struct ChatError {
    message: String,
}

/// Adapter for hosted chat-completion APIs.
pub struct HttpLlm {
    client: VendorHttpClient,
    model: String,
    max_context_chars: usize,
}

impl HttpLlm {
    pub fn new(client: VendorHttpClient, model: impl Into<String>, max_context_chars: usize) -> Self {
        Self {
            client,
            model: model.into(),
            max_context_chars,
        }
    }

    async fn complete(&self, prompt: &str) -> Result<String, VendorError> {
        let body = json!({
            "model": self.model,
            "messages": [{"role": "user", "content": prompt}],
            "temperature": 0.2,
        });
        let raw = self
            .client
            .post_json_retry("/chat/completions", &body, RetryPolicy::backoff())
            .await?;

        let response: ChatResponse = serde_json::from_value(raw)
            .map_err(|e| VendorError::SchemaViolation(format!("chat response: {e}")))?;

        if let Some(err) = response.error {
            return Err(classify_chat_error(&err.message));
        }
        response
            .choices
            .into_iter()
            .next()
            .map(|c| c.message.content)
            .ok_or_else(|| VendorError::SchemaViolation("chat response has no choices".to_string()))
    }
}

#[async_trait]
impl LlmVendor for HttpLlm {
    fn version(&self) -> &str {
        &self.model
    }

    async fn analyse(&self, template_id: &str, variables: &Value) -> Result<Value, VendorError> {
        let template = templates::template(template_id)
            .ok_or_else(|| VendorError::SchemaViolation(format!("unknown template: {template_id}")))?;
        let prompt = template.render(variables).map_err(VendorError::SchemaViolation)?;
        if prompt.chars().count() > self.max_context_chars {
            return Err(VendorError::ContextTooLong);
        }

        let reply = self.complete(&prompt).await?;
        match parse_and_validate(template, &reply) {
            Ok(value) => Ok(value),
            Err(reason) => {
                tracing::warn!(
                    vendor = %self.client.vendor(),
                    template = template_id,
                    reason = %reason,
                    "model reply failed validation, requesting repair"
                );
                let repair = self.complete(&format!("{prompt}{REPAIR_SUFFIX}")).await?;
                parse_and_validate(template, &repair).map_err(VendorError::SchemaViolation)
            }
        }
    }
}

/// Some providers report errors in-band with a 200 status.
fn classify_chat_error(message: &str) -> VendorError {
    let lower = message.to_lowercase();
    if lower.contains("context") || lower.contains("length") || lower.contains("too long") {
        VendorError::ContextTooLong
    } else if lower.contains("quota") || lower.contains("rate") || lower.contains("billing") {
        VendorError::QuotaExceeded
    } else {
        VendorError::VendorUnavailable(message.to_string())
    }
}

fn parse_and_validate(template: &Template, reply: &str) -> Result<Value, String> {
    let cleaned = strip_code_fences(reply);
    let value: Value = serde_json::from_str(cleaned).map_err(|e| format!("not valid JSON: {e}"))?;
    template.validate(&value)?;
    Ok(value)
}

/// Models wrap JSON in markdown fences often enough to handle it here.
fn strip_code_fences(reply: &str) -> &str {
    let mut text = reply.trim();
    if let Some(rest) = text.strip_prefix("```") {
        text = match rest.split_once('\n') {
            Some((_, body)) => body,
            None => rest,
        };
        if let Some(body) = text.trim_end().strip_suffix("```") {
            text = body;
        }
        text = text.trim();
    }
    text
}

/// Test double. Responses are scripted per template and consumed in
/// order; with nothing scripted it returns a valid canned reply. A
/// scripted reply that fails validation consumes the next scripted
/// value as its repair round, mirroring the real adapter.
pub struct FakeLlm {
    version: String,
    scripted: Mutex<HashMap<String, Vec<Result<Value, VendorError>>>>,
    delay: Mutex<Option<std::time::Duration>>,
    calls: AtomicUsize,
}

impl FakeLlm {
    pub fn new() -> Self {
        Self {
            version: "fake-llm-1".to_string(),
            scripted: Mutex::new(HashMap::new()),
            delay: Mutex::new(None),
            calls: AtomicUsize::new(0),
        }
    }

    /// Queue a reply for one template.
    pub fn script(&self, template_id: &str, reply: Result<Value, VendorError>) {
        self.scripted
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .entry(template_id.to_string())
            .or_default()
            .push(reply);
    }

    /// Make every call sleep first, for deadline tests.
    pub fn set_delay(&self, delay: std::time::Duration) {
        *self.delay.lock().unwrap_or_else(|e| e.into_inner()) = Some(delay);
    }

    /// Model invocations so far, repair rounds included.
    pub fn call_count(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    fn next_reply(&self, template_id: &str) -> Option<Result<Value, VendorError>> {
        let mut scripted = self.scripted.lock().unwrap_or_else(|e| e.into_inner());
        let queue = scripted.get_mut(template_id)?;
        if queue.is_empty() {
            None
        } else {
            Some(queue.remove(0))
        }
    }

    fn canned_reply(template_id: &str) -> Value {
        if template_id.starts_with("acceptance_") {
            json!({
                "overall_score": 86,
                "items": [
                    {"item": "工艺质量", "verdict": "pass"},
                    {"item": "细节处理", "verdict": "unclear", "note": "照片角度受限"}
                ]
            })
        } else if template_id == "contract_audit" {
            json!({
                "risk_score": 40,
                "high_risk_items": [
                    {"item": "增项条款", "reason": "未约定增项上限"}
                ],
                "warning_items": [],
                "missing_items": ["保修条款"],
                "unfair_terms": [
                    {"term": "逾期交付每日赔偿上限500元", "reason": "违约责任过轻"}
                ],
                "missing_terms": ["增项不得超过合同总价5%"],
                "suggested_modifications": [
                    {"term": "付款节点", "suggestion": "尾款应在竣工验收合格后支付"}
                ],
                "overpriced_items": [],
                "market_ref_price": "",
                "suggestions": ["补充书面保修条款"]
            })
        } else {
            json!({
                "risk_score": 35,
                "high_risk_items": [
                    {"item": "防水工程", "reason": "单价明显高于市场区间"}
                ],
                "warning_items": [
                    {"item": "拆除工程", "reason": "按项计价，工程量不明确"}
                ],
                "missing_items": ["垃圾清运"],
                "overpriced_items": [
                    {"item": "水电改造", "quoted": "120元/米", "market": "45-60元/米"}
                ],
                "market_ref_price": "9-11万",
                "suggestions": ["要求按实测工程量结算"]
            })
        }
    }
}

impl Default for FakeLlm {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl LlmVendor for FakeLlm {
    fn version(&self) -> &str {
        &self.version
    }

    async fn analyse(&self, template_id: &str, variables: &Value) -> Result<Value, VendorError> {
        let template = templates::template(template_id)
            .ok_or_else(|| VendorError::SchemaViolation(format!("unknown template: {template_id}")))?;
        template.render(variables).map_err(VendorError::SchemaViolation)?;

        let delay = *self.delay.lock().unwrap_or_else(|e| e.into_inner());
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }

        self.calls.fetch_add(1, Ordering::SeqCst);
        let reply = match self.next_reply(template_id) {
            Some(reply) => reply?,
            None => return Ok(Self::canned_reply(template_id)),
        };

        if template.validate(&reply).is_ok() {
            return Ok(reply);
        }

        // Repair round: one more consume, canned reply if the script
        // ran out.
        self.calls.fetch_add(1, Ordering::SeqCst);
        let repaired = match self.next_reply(template_id) {
            Some(reply) => reply?,
            None => return Ok(Self::canned_reply(template_id)),
        };
        template
            .validate(&repaired)
            .map_err(VendorError::SchemaViolation)?;
        Ok(repaired)
    }
}
