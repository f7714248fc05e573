//! Contract audit strategy.
//!
//! Same pipeline as the quote audit, with the `contract_audit` template
//! and the clause-level finding groups on top of the shared ones.

use serde_json::{json, Value};

use crate::error::ErrorKind;
use crate::models::{AnalysisKind, Finding, RiskReport, Severity};

use super::audit::{self, llm_unavailable_finding};
use super::AnalysisContext;

pub async fn analyse(blob_key: &str, fingerprint: &str, ctx: &AnalysisContext) -> RiskReport {
    let bytes = match ctx.blobs.read(blob_key) {
        Ok(bytes) => bytes,
        Err(err) => {
            tracing::warn!(blob_key, error = %err, "contract blob unreadable");
            return RiskReport::failed(
                fingerprint.to_string(),
                AnalysisKind::Contract,
                ErrorKind::NotFound,
            );
        }
    };

    let ocr = &ctx.vendors.ocr;
    let extraction = match ocr.extract(&bytes, None).await {
        Ok(extraction) => extraction,
        Err(err) => {
            tracing::warn!(blob_key, error = %err, "contract OCR failed");
            let mut report = RiskReport::failed(
                fingerprint.to_string(),
                AnalysisKind::Contract,
                err.error_kind(),
            );
            report
                .vendor_versions
                .insert("ocr".to_string(), ocr.version().to_string());
            return report;
        }
    };

    let variables = json!({ "text": extraction.text });

    let llm = &ctx.vendors.llm;
    let mut report = RiskReport::completed(fingerprint.to_string(), AnalysisKind::Contract);
    report
        .vendor_versions
        .insert("ocr".to_string(), ocr.version().to_string());
    report
        .vendor_versions
        .insert("llm".to_string(), llm.version().to_string());

    match llm.analyse("contract_audit", &variables).await {
        Ok(value) => {
            let mut findings = audit::map_common_findings(&value, "contract");
            for item in audit::array(&value, "missing_items") {
                if let Some(name) = item.as_str() {
                    findings.push(Finding::new(
                        Severity::Attention,
                        "contract",
                        format!("合同缺少常见条款：{name}"),
                    ));
                }
            }
            findings.extend(audit::map_contract_findings(&value));
            let score = value
                .get("risk_score")
                .and_then(Value::as_f64)
                .unwrap_or(0.0)
                .clamp(0.0, 100.0)
                .round() as u8;
            report = report
                .with_score(score)
                .with_findings(findings)
                .with_raw("llm", value);
        }
        Err(err) => {
            tracing::warn!(error = %err, "contract audit degraded, LLM unavailable");
            report = report.with_findings(vec![llm_unavailable_finding()]);
        }
    }

    report
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use super::*;
    use crate::analysis::test_support::{fake_context, PNG_BYTES};
    use crate::models::ReportStatus;
    use crate::vendors::{FakeLlm, VendorError};

    const FP: &str = "c0c0000000000000000000000000000000000000000000000000000000000000";

    fn audit_value() -> Value {
        json!({
            "risk_score": 70,
            "high_risk_items": [{"item": "付款节奏", "reason": "开工前支付80%"}],
            "warning_items": [],
            "missing_items": ["增项报价上限"],
            "overpriced_items": [],
            "suggestions": ["按进度分期付款"],
            "unfair_terms": [{"term": "逾期不赔付", "reason": "免除施工方违约责任"}],
            "missing_terms": ["保修期条款"],
            "suggested_modifications": [{"term": "付款节点", "suggestion": "验收合格后支付尾款"}]
        })
    }

    #[tokio::test]
    async fn test_contract_audit_maps_clause_findings() {
        let (_dir, mut ctx) = fake_context();
        let blob = ctx.blobs.put(PNG_BYTES, Some("image/png")).unwrap();
        let llm = Arc::new(FakeLlm::new());
        llm.script("contract_audit", Ok(audit_value()));
        ctx.vendors.llm = llm;

        let report = analyse(&blob.key, FP, &ctx).await;

        assert_eq!(report.status, ReportStatus::Completed);
        assert_eq!(report.risk_score, Some(70));
        assert!(report
            .findings
            .iter()
            .any(|f| f.severity == Severity::Concern && f.title.starts_with("不利条款")));
        assert!(report
            .findings
            .iter()
            .any(|f| f.title == "合同缺少常见条款：增项报价上限"));
        assert!(report
            .findings
            .iter()
            .any(|f| f.title == "建议补充条款：保修期条款"));
    }

    #[tokio::test]
    async fn test_llm_schema_violation_degrades() {
        let (_dir, mut ctx) = fake_context();
        let blob = ctx.blobs.put(PNG_BYTES, Some("image/png")).unwrap();
        let llm = Arc::new(FakeLlm::new());
        llm.script(
            "contract_audit",
            Err(VendorError::SchemaViolation("no json".to_string())),
        );
        ctx.vendors.llm = llm;

        let report = analyse(&blob.key, FP, &ctx).await;

        assert_eq!(report.status, ReportStatus::Completed);
        assert_eq!(report.risk_score, None);
        assert_eq!(report.findings[0].title, "智能审核暂不可用");
    }

    #[tokio::test]
    async fn test_missing_blob_is_fatal() {
        let (_dir, ctx) = fake_context();

        let report = analyse("deadbeef.pdf", FP, &ctx).await;

        assert_eq!(report.status, ReportStatus::Failed);
        assert_eq!(report.error_kind, Some(ErrorKind::NotFound));
    }
}
