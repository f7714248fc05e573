//! Client-facing projections of a stored report.
//!
//! The canonical report keeps everything, raw vendor payloads included.
//! Clients only ever see one of three views, and company compliance is
//! re-applied on every projection so a report written by an older build
//! can never leak a score or graded wording.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::Serialize;

use crate::error::ErrorKind;
use crate::models::{AnalysisKind, Finding, ReportStatus, RiskReport, Severity};

/// Which projection a client asked for.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReportView {
    Preview,
    Full,
    Audit,
}

impl ReportView {
    pub fn from_str(s: &str) -> Option<Self> {
        match s {
            "preview" => Some(Self::Preview),
            "full" => Some(Self::Full),
            "audit" => Some(Self::Audit),
            _ => None,
        }
    }
}

/// List-friendly summary: enough to render a card, nothing sensitive.
#[derive(Debug, Clone, Serialize)]
pub struct ReportPreview {
    pub fingerprint: String,
    pub kind: AnalysisKind,
    pub status: ReportStatus,
    pub info_count: usize,
    pub attention_count: usize,
    pub concern_count: usize,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub headline: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error_kind: Option<ErrorKind>,
}

/// Everything a client may see: the report minus raw vendor payloads.
#[derive(Debug, Clone, Serialize)]
pub struct ReportFull {
    pub fingerprint: String,
    pub kind: AnalysisKind,
    pub status: ReportStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub risk_score: Option<u8>,
    pub findings: Vec<Finding>,
    pub vendor_versions: BTreeMap<String, String>,
    pub produced_at: DateTime<Utc>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub expires_at: Option<DateTime<Utc>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error_kind: Option<ErrorKind>,
    /// Designer reports carry the markdown answer here as well, so chat
    /// clients need not dig through findings.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub answer: Option<String>,
}

pub fn preview(report: &RiskReport) -> ReportPreview {
    let report = compliant(report);
    let (info_count, attention_count, concern_count) = report.severity_counts();
    let headline = report
        .findings
        .iter()
        .find(|f| f.severity == Severity::Info)
        .map(|f| f.title.clone());
    ReportPreview {
        fingerprint: report.fingerprint,
        kind: report.kind,
        status: report.status,
        info_count,
        attention_count,
        concern_count,
        headline,
        error_kind: report.error_kind,
    }
}

pub fn full(report: &RiskReport) -> ReportFull {
    let report = compliant(report);
    let answer = match report.kind {
        AnalysisKind::Designer => report
            .findings
            .iter()
            .find(|f| f.category == "designer")
            .and_then(|f| f.suggestion.clone()),
        _ => None,
    };
    ReportFull {
        fingerprint: report.fingerprint,
        kind: report.kind,
        status: report.status,
        risk_score: report.risk_score,
        findings: report.findings,
        vendor_versions: report.vendor_versions,
        produced_at: report.produced_at,
        expires_at: report.expires_at,
        error_kind: report.error_kind,
        answer,
    }
}

/// The untrimmed report, raw payloads included. Admin only.
pub fn audit(report: &RiskReport) -> RiskReport {
    compliant(report)
}

fn compliant(report: &RiskReport) -> RiskReport {
    let mut report = report.clone();
    report.apply_compliance();
    report
}
