//! Acceptance photo check strategy.
//!
//! The vision model fetches the photo itself through a signed blob URL,
//! so there is no OCR pass here. Unlike the document audits there is no
//! degraded mode: without a model verdict the report would carry no
//! vendor data at all, so an LLM failure fails the build.

use serde_json::Value;

use crate::error::ErrorKind;
use crate::models::{AnalysisKind, Finding, RiskReport, Severity, Stage};

use super::templates::{acceptance_template_id, stage_checklist, ACCEPTANCE_PROMPT_VERSION};
use super::AnalysisContext;

pub async fn analyse(
    blob_key: &str,
    stage: Stage,
    fingerprint: &str,
    ctx: &AnalysisContext,
) -> RiskReport {
    if !ctx.blobs.exists(blob_key) {
        tracing::warn!(blob_key, "acceptance blob missing");
        return RiskReport::failed(
            fingerprint.to_string(),
            AnalysisKind::Acceptance,
            ErrorKind::NotFound,
        );
    }

    let image_url = ctx.signed_blob_url(blob_key);
    let variables = serde_json::json!({
        "stage_name": stage.name_zh(),
        "image_url": image_url,
        "checklist": stage_checklist(stage),
    });

    let llm = &ctx.vendors.llm;
    let template_id = acceptance_template_id(stage);

    let value = match llm.analyse(&template_id, &variables).await {
        Ok(value) => value,
        Err(err) => {
            tracing::warn!(stage = stage.code(), error = %err, "acceptance check failed");
            let mut report = RiskReport::failed(
                fingerprint.to_string(),
                AnalysisKind::Acceptance,
                err.error_kind(),
            );
            report
                .vendor_versions
                .insert("llm".to_string(), llm.version().to_string());
            return report;
        }
    };

    let mut findings = Vec::new();
    for item in value.get("items").and_then(Value::as_array).into_iter().flatten() {
        let name = item.get("item").and_then(Value::as_str).unwrap_or("检查项");
        let severity = match item.get("verdict").and_then(Value::as_str) {
            Some("pass") => Severity::Info,
            Some("fail") => Severity::Concern,
            _ => Severity::Attention,
        };
        let mut finding = Finding::new(severity, "acceptance", name);
        if let Some(note) = item.get("note").and_then(Value::as_str) {
            if !note.is_empty() {
                finding = finding.with_suggestion(note);
            }
        }
        findings.push(finding);
    }

    let score = value
        .get("overall_score")
        .and_then(Value::as_f64)
        .unwrap_or(0.0)
        .clamp(0.0, 100.0)
        .round() as u8;

    let mut report = RiskReport::completed(fingerprint.to_string(), AnalysisKind::Acceptance)
        .with_score(score)
        .with_findings(findings)
        .with_raw("llm", value);
    report
        .vendor_versions
        .insert("llm".to_string(), llm.version().to_string());
    report.vendor_versions.insert(
        "acceptance_prompt".to_string(),
        ACCEPTANCE_PROMPT_VERSION.to_string(),
    );
    report
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use super::*;
    use crate::analysis::test_support::{fake_context, PNG_BYTES};
    use crate::models::ReportStatus;
    use crate::vendors::{FakeLlm, VendorError};

    const FP: &str = "acce000000000000000000000000000000000000000000000000000000000000";

    fn check_value() -> Value {
        serde_json::json!({
            "overall_score": 82,
            "items": [
                {"item": "墙面平整无明显色差", "verdict": "pass"},
                {"item": "阴阳角顺直", "verdict": "unclear", "note": "照片角度无法判断，建议补拍"},
                {"item": "乳胶漆无流坠", "verdict": "fail", "note": "窗边可见流坠痕迹"}
            ]
        })
    }

    #[tokio::test]
    async fn test_verdicts_map_to_severities() {
        let (_dir, mut ctx) = fake_context();
        let blob = ctx.blobs.put(PNG_BYTES, Some("image/png")).unwrap();
        let llm = Arc::new(FakeLlm::new());
        llm.script("acceptance_S04", Ok(check_value()));
        ctx.vendors.llm = llm;

        let report = analyse(&blob.key, Stage::Painting, FP, &ctx).await;

        assert_eq!(report.status, ReportStatus::Completed);
        assert_eq!(report.risk_score, Some(82));
        assert_eq!(report.findings.len(), 3);
        assert_eq!(report.findings[0].severity, Severity::Info);
        assert_eq!(report.findings[1].severity, Severity::Attention);
        assert_eq!(report.findings[2].severity, Severity::Concern);
        assert_eq!(
            report.findings[2].suggestion.as_deref(),
            Some("窗边可见流坠痕迹")
        );
        assert_eq!(
            report.vendor_versions.get("acceptance_prompt").map(String::as_str),
            Some(ACCEPTANCE_PROMPT_VERSION)
        );
    }

    #[tokio::test]
    async fn test_llm_failure_fails_the_build() {
        let (_dir, mut ctx) = fake_context();
        let blob = ctx.blobs.put(PNG_BYTES, Some("image/png")).unwrap();
        let llm = Arc::new(FakeLlm::new());
        llm.script(
            "acceptance_S00",
            Err(VendorError::VendorUnavailable("vision down".to_string())),
        );
        ctx.vendors.llm = llm;

        let report = analyse(&blob.key, Stage::Material, FP, &ctx).await;

        assert_eq!(report.status, ReportStatus::Failed);
        assert_eq!(report.error_kind, Some(ErrorKind::VendorUnavailable));
    }

    #[tokio::test]
    async fn test_missing_blob_is_fatal() {
        let (_dir, ctx) = fake_context();

        let report = analyse("deadbeef.jpg", Stage::Plumbing, FP, &ctx).await;

        assert_eq!(report.status, ReportStatus::Failed);
        assert_eq!(report.error_kind, Some(ErrorKind::NotFound));
    }
}
