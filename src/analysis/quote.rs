//! Quote audit strategy.
//!
//! OCR text plus the declared total price go through the `quote_audit`
//! template. A missing blob or an OCR failure is fatal; an LLM failure
//! degrades to a completed report that says the audit is unavailable.

use serde_json::{json, Value};

use crate::error::ErrorKind;
use crate::models::{AnalysisKind, Finding, RiskReport, Severity};

use super::audit::{self, llm_unavailable_finding};
use super::AnalysisContext;

pub async fn analyse(
    blob_key: &str,
    total_price: Option<f64>,
    fingerprint: &str,
    ctx: &AnalysisContext,
) -> RiskReport {
    let bytes = match ctx.blobs.read(blob_key) {
        Ok(bytes) => bytes,
        Err(err) => {
            tracing::warn!(blob_key, error = %err, "quote blob unreadable");
            return RiskReport::failed(
                fingerprint.to_string(),
                AnalysisKind::Quote,
                ErrorKind::NotFound,
            );
        }
    };

    let ocr = &ctx.vendors.ocr;
    let extraction = match ocr.extract(&bytes, None).await {
        Ok(extraction) => extraction,
        Err(err) => {
            tracing::warn!(blob_key, error = %err, "quote OCR failed");
            let mut report = RiskReport::failed(
                fingerprint.to_string(),
                AnalysisKind::Quote,
                err.error_kind(),
            );
            report
                .vendor_versions
                .insert("ocr".to_string(), ocr.version().to_string());
            return report;
        }
    };

    let price_label = match total_price {
        Some(price) => format!("{price}元"),
        None => "未提供".to_string(),
    };
    let variables = json!({
        "text": extraction.text,
        "total_price": price_label,
    });

    let llm = &ctx.vendors.llm;
    let mut report = RiskReport::completed(fingerprint.to_string(), AnalysisKind::Quote);
    report
        .vendor_versions
        .insert("ocr".to_string(), ocr.version().to_string());
    report
        .vendor_versions
        .insert("llm".to_string(), llm.version().to_string());

    match llm.analyse("quote_audit", &variables).await {
        Ok(value) => {
            let mut findings = audit::map_common_findings(&value, "quote");
            for item in audit::array(&value, "missing_items") {
                if let Some(name) = item.as_str() {
                    findings.push(Finding::new(
                        Severity::Attention,
                        "quote",
                        format!("报价缺少常见项目：{name}"),
                    ));
                }
            }
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
            tracing::warn!(error = %err, "quote audit degraded, LLM unavailable");
            report = report.with_findings(vec![llm_unavailable_finding()]);
        }
    }

    report
}
