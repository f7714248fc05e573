//! Company vetting strategy.
//!
//! Registry and judicial lookups run in parallel. The report only ever
//! enumerates facts: registration fields as stated, litigation as
//! objective counts. No score, no grade vocabulary; a single vendor
//! outage degrades to an unavailability note instead of failing.

use serde_json::json;

use crate::models::{AnalysisKind, Finding, RiskReport, Severity};
use crate::vendors::VendorError;

use super::AnalysisContext;

pub async fn analyse(
    name: &str,
    region: Option<&str>,
    fingerprint: &str,
    ctx: &AnalysisContext,
) -> RiskReport {
    let enterprise = &ctx.vendors.enterprise;
    let judicial = &ctx.vendors.judicial;

    let (registry, cases) = tokio::join!(enterprise.lookup(name, region), judicial.cases(name));

    let mut report = RiskReport::completed(fingerprint.to_string(), AnalysisKind::Company);
    report
        .vendor_versions
        .insert("enterprise".to_string(), enterprise.version().to_string());
    report
        .vendor_versions
        .insert("judicial".to_string(), judicial.version().to_string());

    let mut findings = Vec::new();

    match registry {
        Ok(record) => {
            findings.push(Finding::new(
                Severity::Info,
                "registry",
                format!("登记状态：{}", record.status),
            ));
            if let Some(capital) = &record.registered_capital {
                findings.push(Finding::new(
                    Severity::Info,
                    "registry",
                    format!("注册资本：{capital}"),
                ));
            }
            if let Some(representative) = &record.legal_representative {
                findings.push(Finding::new(
                    Severity::Info,
                    "registry",
                    format!("法定代表人：{representative}"),
                ));
            }
            if let Some(established) = &record.established {
                findings.push(Finding::new(
                    Severity::Info,
                    "registry",
                    format!("成立日期：{established}"),
                ));
            }
            if record.change_count > 0 {
                findings.push(Finding::new(
                    Severity::Info,
                    "registry",
                    format!("工商变更记录{}条", record.change_count),
                ));
            }
            report = report.with_raw("enterprise", record.raw);
        }
        Err(VendorError::NotFound) => {
            findings.push(Finding::new(Severity::Info, "registry", "未查询到工商登记信息"));
        }
        Err(VendorError::AmbiguousName(_)) => {
            findings.push(Finding::new(
                Severity::Info,
                "registry",
                "存在多家同名企业，建议补充地区信息后重新查询",
            ));
        }
        Err(err) => {
            tracing::warn!(error = %err, "registry lookup degraded");
            findings.push(Finding::new(Severity::Info, "registry", "工商数据暂不可用"));
        }
    }

    match cases {
        Ok(cases) => {
            let total = cases.len();
            let as_defendant = cases.iter().filter(|c| c.role == "被告").count();
            let mut finding = Finding::new(
                Severity::Info,
                "judicial",
                format!("近5年涉诉记录{total}条"),
            );
            if as_defendant > 0 {
                finding = finding.with_suggestion(format!("其中作为被告{as_defendant}条"));
            }
            findings.push(finding);
            report = report.with_raw("judicial", json!({ "total": total, "cases": cases }));
        }
        Err(err) => {
            tracing::warn!(error = %err, "judicial lookup degraded");
            findings.push(Finding::new(Severity::Info, "judicial", "司法数据暂不可用"));
        }
    }

    report = report.with_findings(findings);
    report.apply_compliance();
    report
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use super::*;
    use crate::analysis::test_support::fake_context;
    use crate::models::ReportStatus;
    use crate::vendors::{FakeEnterprise, FakeJudicial};

    const FP: &str = "f0f0000000000000000000000000000000000000000000000000000000000000";

    #[tokio::test]
    async fn test_full_lookup_enumerates_facts() {
        let (_dir, mut ctx) = fake_context();
        let enterprise = Arc::new(FakeEnterprise::new());
        enterprise.insert("北京某某装饰工程有限公司", FakeEnterprise::sample_record("北京某某装饰工程有限公司"));
        let judicial = Arc::new(FakeJudicial::new());
        judicial.set_cases(vec![
            FakeJudicial::sample_case("装饰装修合同纠纷", "被告"),
            FakeJudicial::sample_case("买卖合同纠纷", "原告"),
        ]);
        ctx.vendors.enterprise = enterprise;
        ctx.vendors.judicial = judicial;

        let report = analyse("北京某某装饰工程有限公司", None, FP, &ctx).await;

        assert_eq!(report.status, ReportStatus::Completed);
        assert_eq!(report.risk_score, None);
        assert!(report.findings.iter().any(|f| f.title.starts_with("登记状态")));
        assert!(report
            .findings
            .iter()
            .any(|f| f.title == "近5年涉诉记录2条"));
        assert!(report.raw_vendor_payloads.contains_key("enterprise"));
        assert!(report.raw_vendor_payloads.contains_key("judicial"));
        assert_eq!(report.vendor_versions.len(), 2);
    }

    #[tokio::test]
    async fn test_judicial_outage_degrades_to_info() {
        let (_dir, mut ctx) = fake_context();
        let enterprise = Arc::new(FakeEnterprise::new());
        enterprise.insert("某公司", FakeEnterprise::sample_record("某公司"));
        let judicial = Arc::new(FakeJudicial::new());
        judicial.script_error(VendorError::VendorUnavailable("503".to_string()));
        ctx.vendors.enterprise = enterprise;
        ctx.vendors.judicial = judicial;

        let report = analyse("某公司", None, FP, &ctx).await;

        assert_eq!(report.status, ReportStatus::Completed);
        assert!(report.findings.iter().any(|f| f.title == "司法数据暂不可用"));
    }

    #[tokio::test]
    async fn test_unknown_company_still_completes() {
        let (_dir, ctx) = fake_context();

        let report = analyse("不存在的公司", None, FP, &ctx).await;

        assert_eq!(report.status, ReportStatus::Completed);
        assert!(report
            .findings
            .iter()
            .any(|f| f.title == "未查询到工商登记信息"));
    }

    #[tokio::test]
    async fn test_ambiguous_name_asks_for_region() {
        let (_dir, mut ctx) = fake_context();
        let enterprise = Arc::new(FakeEnterprise::new());
        enterprise.script_error(VendorError::AmbiguousName(4));
        ctx.vendors.enterprise = enterprise;

        let report = analyse("某装饰", None, FP, &ctx).await;

        assert_eq!(report.status, ReportStatus::Completed);
        assert!(report
            .findings
            .iter()
            .any(|f| f.title.contains("建议补充地区信息")));
    }

    #[tokio::test]
    async fn test_never_emits_grade_vocabulary_or_score() {
        let (_dir, mut ctx) = fake_context();
        let enterprise = Arc::new(FakeEnterprise::new());
        enterprise.insert("甲公司", FakeEnterprise::sample_record("甲公司"));
        ctx.vendors.enterprise = enterprise;

        let report = analyse("甲公司", None, FP, &ctx).await;

        assert_eq!(report.risk_score, None);
        for finding in &report.findings {
            let text = finding.title.to_lowercase();
            assert!(!text.contains("高风险"));
            assert!(!text.contains("high risk"));
        }
    }
}
