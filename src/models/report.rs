//! Risk report models.
//!
//! A report is the cached, typed outcome of one analysis. Terminal
//! reports are immutable; a re-analysis after vendor version bumps
//! produces a new row under the same fingerprint.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::ErrorKind;
use crate::models::AnalysisKind;

/// Severity of a single finding.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Severity {
    Info,
    Attention,
    Concern,
}

impl Severity {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Info => "info",
            Self::Attention => "attention",
            Self::Concern => "concern",
        }
    }

    pub fn from_str(s: &str) -> Option<Self> {
        match s {
            "info" => Some(Self::Info),
            "attention" => Some(Self::Attention),
            "concern" => Some(Self::Concern),
            _ => None,
        }
    }
}

/// One observation inside a report.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Finding {
    pub severity: Severity,
    /// Free-form grouping key, e.g. "registry", "judicial", "pricing".
    pub category: String,
    pub title: String,
    /// Pointer to the evidence: a blob key, an OCR region, or a case id.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub evidence_ref: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub suggestion: Option<String>,
}

impl Finding {
    pub fn new(severity: Severity, category: impl Into<String>, title: impl Into<String>) -> Self {
        Self {
            severity,
            category: category.into(),
            title: title.into(),
            evidence_ref: None,
            suggestion: None,
        }
    }

    pub fn with_suggestion(mut self, suggestion: impl Into<String>) -> Self {
        self.suggestion = Some(suggestion.into());
        self
    }

    pub fn with_evidence(mut self, evidence_ref: impl Into<String>) -> Self {
        self.evidence_ref = Some(evidence_ref.into());
        self
    }
}

/// Lifecycle status of a report row.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ReportStatus {
    Pending,
    Running,
    Completed,
    Failed,
}

impl ReportStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Running => "running",
            Self::Completed => "completed",
            Self::Failed => "failed",
        }
    }

    pub fn from_str(s: &str) -> Option<Self> {
        match s {
            "pending" => Some(Self::Pending),
            "running" => Some(Self::Running),
            "completed" => Some(Self::Completed),
            "failed" => Some(Self::Failed),
            _ => None,
        }
    }

    /// Terminal rows never change again.
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Completed | Self::Failed)
    }
}

/// Graded-risk vocabulary that must never appear in company reports.
/// Legal review requires company vetting to present objective facts only.
pub const BANNED_GRADE_PHRASES: &[&str] = &[
    "高风险",
    "中风险",
    "低风险",
    "high risk",
    "medium risk",
    "low risk",
];

fn contains_grade_phrase(text: &str) -> bool {
    let lower = text.to_lowercase();
    BANNED_GRADE_PHRASES.iter().any(|p| lower.contains(p))
}

/// The typed outcome of one analysis run.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RiskReport {
    /// Cache fingerprint this report answers.
    pub fingerprint: String,
    pub kind: AnalysisKind,
    pub status: ReportStatus,
    /// 0..=100 where applicable. Always `None` for company reports.
    pub risk_score: Option<u8>,
    pub findings: Vec<Finding>,
    /// Raw vendor responses by adapter name, retained for audit.
    pub raw_vendor_payloads: BTreeMap<String, serde_json::Value>,
    /// Adapter version vector the report was built with.
    pub vendor_versions: BTreeMap<String, String>,
    pub produced_at: DateTime<Utc>,
    /// `None` means the report never expires.
    pub expires_at: Option<DateTime<Utc>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error_kind: Option<ErrorKind>,
}

impl RiskReport {
    /// A completed report.
    pub fn completed(fingerprint: String, kind: AnalysisKind) -> Self {
        Self {
            fingerprint,
            kind,
            status: ReportStatus::Completed,
            risk_score: None,
            findings: Vec::new(),
            raw_vendor_payloads: BTreeMap::new(),
            vendor_versions: BTreeMap::new(),
            produced_at: Utc::now(),
            expires_at: None,
            error_kind: None,
        }
    }

    /// A failed report carrying the error classification.
    pub fn failed(fingerprint: String, kind: AnalysisKind, error_kind: ErrorKind) -> Self {
        Self {
            fingerprint,
            kind,
            status: ReportStatus::Failed,
            risk_score: None,
            findings: Vec::new(),
            raw_vendor_payloads: BTreeMap::new(),
            vendor_versions: BTreeMap::new(),
            produced_at: Utc::now(),
            expires_at: None,
            error_kind: Some(error_kind),
        }
    }

    pub fn with_score(mut self, score: u8) -> Self {
        self.risk_score = Some(score.min(100));
        self
    }

    pub fn with_findings(mut self, findings: Vec<Finding>) -> Self {
        self.findings = findings;
        self
    }

    pub fn with_raw(mut self, adapter: impl Into<String>, payload: serde_json::Value) -> Self {
        self.raw_vendor_payloads.insert(adapter.into(), payload);
        self
    }

    /// Whether the report is past its expiry.
    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        self.expires_at.is_some_and(|exp| exp <= now)
    }

    /// Enforce the legal-compliance rules for company reports: no risk
    /// score, no graded-risk vocabulary in findings. Returns how many
    /// findings were dropped. Applied at write time and again by every
    /// projection.
    pub fn apply_compliance(&mut self) -> usize {
        if self.kind != AnalysisKind::Company {
            return 0;
        }
        self.risk_score = None;
        let before = self.findings.len();
        self.findings.retain(|f| {
            let violates = contains_grade_phrase(&f.title)
                || f.suggestion.as_deref().is_some_and(contains_grade_phrase)
                || contains_grade_phrase(&f.category);
            if violates {
                tracing::warn!(
                    fingerprint = %self.fingerprint,
                    title = %f.title,
                    "dropping finding with graded-risk wording from company report"
                );
            }
            !violates
        });
        before - self.findings.len()
    }

    /// Count findings by severity, as (info, attention, concern).
    pub fn severity_counts(&self) -> (usize, usize, usize) {
        let mut counts = (0, 0, 0);
        for f in &self.findings {
            match f.severity {
                Severity::Info => counts.0 += 1,
                Severity::Attention => counts.1 += 1,
                Severity::Concern => counts.2 += 1,
            }
        }
        counts
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_severity_round_trip() {
        for s in [Severity::Info, Severity::Attention, Severity::Concern] {
            assert_eq!(Severity::from_str(s.as_str()), Some(s));
        }
    }

    #[test]
    fn test_status_terminal() {
        assert!(ReportStatus::Completed.is_terminal());
        assert!(ReportStatus::Failed.is_terminal());
        assert!(!ReportStatus::Pending.is_terminal());
        assert!(!ReportStatus::Running.is_terminal());
    }

    #[test]
    fn test_compliance_strips_score_and_graded_findings() {
        let mut report = RiskReport::completed("fp".to_string(), AnalysisKind::Company)
            .with_score(80)
            .with_findings(vec![
                Finding::new(Severity::Info, "registry", "注册资本 500万元"),
                Finding::new(Severity::Attention, "judicial", "该公司属于高风险企业"),
                Finding::new(Severity::Info, "judicial", "近5年涉诉记录3条"),
                Finding::new(Severity::Info, "registry", "ok").with_suggestion("High Risk vendor"),
            ]);

        let dropped = report.apply_compliance();
        assert_eq!(dropped, 2);
        assert_eq!(report.risk_score, None);
        assert_eq!(report.findings.len(), 2);
        assert!(report.findings.iter().all(|f| !f.title.contains("高风险")));
    }

    #[test]
    fn test_compliance_leaves_other_kinds_alone() {
        let mut report = RiskReport::completed("fp".to_string(), AnalysisKind::Quote)
            .with_score(55)
            .with_findings(vec![Finding::new(
                Severity::Concern,
                "pricing",
                "人工费单价存在高风险",
            )]);
        assert_eq!(report.apply_compliance(), 0);
        assert_eq!(report.risk_score, Some(55));
        assert_eq!(report.findings.len(), 1);
    }

    #[test]
    fn test_severity_counts() {
        let report = RiskReport::completed("fp".to_string(), AnalysisKind::Quote).with_findings(vec![
            Finding::new(Severity::Info, "a", "t1"),
            Finding::new(Severity::Concern, "b", "t2"),
            Finding::new(Severity::Concern, "c", "t3"),
        ]);
        assert_eq!(report.severity_counts(), (1, 0, 2));
    }

    #[test]
    fn test_expiry() {
        let mut report = RiskReport::completed("fp".to_string(), AnalysisKind::Company);
        assert!(!report.is_expired(Utc::now()));
        report.expires_at = Some(Utc::now() - chrono::Duration::seconds(1));
        assert!(report.is_expired(Utc::now()));
    }
}
