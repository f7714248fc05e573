//! Cache fingerprints.
//!
//! A fingerprint is a SHA-256 digest over `(kind, normalised subject,
//! adapter version vector)`. Two submissions with equal fingerprints are
//! served the same report, so the normalisation here decides what counts
//! as "the same request". Bumping any adapter version in configuration
//! changes the digest and thereby invalidates dependent cache entries.

use std::collections::BTreeMap;

use sha2::{Digest, Sha256};

use crate::models::{AnalysisKind, Stage};
use crate::utils::{collapse_whitespace, normalise_subject};

/// Legal-entity suffixes stripped (once, from the end) when deduplicating
/// company names. The submission keeps the original string.
const LEGAL_SUFFIXES: &[&str] = &[
    "股份有限公司",
    "有限责任公司",
    "集团有限公司",
    "有限公司",
    "集团",
    "co., ltd.",
    "co.,ltd.",
    "co., ltd",
    "co.,ltd",
    "ltd.",
    "ltd",
    "inc.",
    "inc",
];

/// Canonical form of a company name for fingerprinting: normalised and
/// with at most one trailing legal suffix removed.
pub fn canonical_company_name(name: &str) -> String {
    let normalised = normalise_subject(name);
    for suffix in LEGAL_SUFFIXES {
        if let Some(stripped) = normalised.strip_suffix(suffix) {
            let stripped = stripped.trim_end();
            if !stripped.is_empty() {
                return stripped.to_string();
            }
        }
    }
    normalised
}

fn digest(kind: AnalysisKind, subject_lines: &[&str], versions: &BTreeMap<String, String>) -> String {
    let mut hasher = Sha256::new();
    hasher.update(kind.as_str().as_bytes());
    hasher.update(b"\n");
    for line in subject_lines {
        hasher.update(line.as_bytes());
        hasher.update(b"\n");
    }
    for (adapter, version) in versions {
        hasher.update(adapter.as_bytes());
        hasher.update(b"=");
        hasher.update(version.as_bytes());
        hasher.update(b"\n");
    }
    hex::encode(hasher.finalize())
}

/// Fingerprint for a company vetting request.
pub fn company(name: &str, region: Option<&str>, versions: &BTreeMap<String, String>) -> String {
    let name = canonical_company_name(name);
    let mut lines = vec![name.as_str()];
    let region = region.map(normalise_subject);
    if let Some(region) = region.as_deref() {
        if !region.is_empty() {
            lines.push(region);
        }
    }
    digest(AnalysisKind::Company, &lines, versions)
}

/// Fingerprint for a quote or contract document. `content_hash` is the
/// SHA-256 of the blob bytes, so the filename never matters.
pub fn document(kind: AnalysisKind, content_hash: &str, versions: &BTreeMap<String, String>) -> String {
    digest(kind, &[content_hash], versions)
}

/// Fingerprint for an acceptance photo at a construction stage. Legacy
/// stage aliases collapse because only the canonical code is hashed.
pub fn acceptance(content_hash: &str, stage: Stage, versions: &BTreeMap<String, String>) -> String {
    digest(AnalysisKind::Acceptance, &[content_hash, stage.code()], versions)
}

/// Fingerprint for a designer consultation: the canonicalised question
/// plus the content hashes of attached images, in upload order.
pub fn designer(question: &str, image_hashes: &[String], versions: &BTreeMap<String, String>) -> String {
    let question = collapse_whitespace(question);
    let mut lines = vec![question.as_str()];
    lines.extend(image_hashes.iter().map(|h| h.as_str()));
    digest(AnalysisKind::Designer, &lines, versions)
}
