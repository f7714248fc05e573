//! Designer Q&A strategy.
//!
//! The question goes to the primary agent; if that agent is down or
//! returns nothing, the supervisor agent gets one chance with the same
//! session. The user always gets a completed report, worst case an
//! apology, so a flaky agent never turns into a failed task.

use crate::models::{AnalysisKind, Finding, RiskReport, Severity};
use crate::vendors::VendorError;

use super::AnalysisContext;

const APOLOGY: &str = "抱歉，AI设计师服务暂时不可用，请稍后再试。";

pub async fn analyse(
    question: &str,
    image_keys: &[String],
    fingerprint: &str,
    ctx: &AnalysisContext,
) -> RiskReport {
    let mut image_urls = Vec::with_capacity(image_keys.len());
    for key in image_keys {
        if ctx.blobs.exists(key) {
            image_urls.push(ctx.signed_blob_url(key));
        } else {
            tracing::warn!(blob_key = %key, "designer image missing, skipped");
        }
    }

    let primary = &ctx.vendors.agent_primary;
    let mut report = RiskReport::completed(fingerprint.to_string(), AnalysisKind::Designer);
    report
        .vendor_versions
        .insert("agent".to_string(), primary.version().to_string());

    let answer = match primary.consult(fingerprint, question, &image_urls).await {
        Ok(answer) => Some(answer),
        Err(err @ (VendorError::AgentEmpty | VendorError::VendorUnavailable(_))) => {
            let supervisor = &ctx.vendors.agent_supervisor;
            tracing::warn!(
                agent = primary.name(),
                error = %err,
                "primary agent unavailable, consulting supervisor"
            );
            report.vendor_versions.insert(
                "agent_supervisor".to_string(),
                supervisor.version().to_string(),
            );
            match supervisor.consult(fingerprint, question, &image_urls).await {
                Ok(answer) => Some(answer),
                Err(err) => {
                    tracing::warn!(agent = supervisor.name(), error = %err, "supervisor agent unavailable");
                    None
                }
            }
        }
        Err(err) => {
            tracing::warn!(agent = primary.name(), error = %err, "agent consult failed");
            None
        }
    };

    let finding = Finding::new(Severity::Info, "designer", "设计师回复")
        .with_suggestion(answer.unwrap_or_else(|| APOLOGY.to_string()));
    report.with_findings(vec![finding])
}
