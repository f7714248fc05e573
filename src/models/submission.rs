//! Submissions: what a user asked us to analyse.
//!
//! A submission is an immutable request record. The work it triggers is
//! tracked separately as a task, and the outcome as a report; several
//! submissions can share one report through the cache.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::models::Stage;

/// The five supported analysis kinds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AnalysisKind {
    Company,
    Quote,
    Contract,
    Acceptance,
    Designer,
}

impl AnalysisKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Company => "company",
            Self::Quote => "quote",
            Self::Contract => "contract",
            Self::Acceptance => "acceptance",
            Self::Designer => "designer",
        }
    }

    pub fn from_str(s: &str) -> Option<Self> {
        match s {
            "company" => Some(Self::Company),
            "quote" => Some(Self::Quote),
            "contract" => Some(Self::Contract),
            "acceptance" => Some(Self::Acceptance),
            "designer" => Some(Self::Designer),
            _ => None,
        }
    }

    pub fn all() -> &'static [AnalysisKind] {
        &[
            Self::Company,
            Self::Quote,
            Self::Contract,
            Self::Acceptance,
            Self::Designer,
        ]
    }
}

/// Kind-specific payload of a submission.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Subject {
    Company {
        /// Name exactly as the user typed it. Normalisation happens
        /// only when fingerprinting.
        name: String,
        #[serde(skip_serializing_if = "Option::is_none")]
        region: Option<String>,
    },
    Quote {
        blob_key: String,
        #[serde(skip_serializing_if = "Option::is_none")]
        total_price: Option<f64>,
    },
    Contract {
        blob_key: String,
    },
    Acceptance {
        blob_key: String,
        stage: Stage,
    },
    Designer {
        question: String,
        #[serde(default, skip_serializing_if = "Vec::is_empty")]
        image_keys: Vec<String>,
    },
}

impl Subject {
    pub fn kind(&self) -> AnalysisKind {
        match self {
            Self::Company { .. } => AnalysisKind::Company,
            Self::Quote { .. } => AnalysisKind::Quote,
            Self::Contract { .. } => AnalysisKind::Contract,
            Self::Acceptance { .. } => AnalysisKind::Acceptance,
            Self::Designer { .. } => AnalysisKind::Designer,
        }
    }
}

/// An immutable record of one analysis request.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Submission {
    pub id: String,
    /// From the `X-User-Id` header; "anonymous" when absent.
    pub user_id: String,
    pub kind: AnalysisKind,
    pub subject: Subject,
    pub created_at: DateTime<Utc>,
}

impl Submission {
    pub fn new(user_id: impl Into<String>, subject: Subject) -> Self {
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            user_id: user_id.into(),
            kind: subject.kind(),
            subject,
            created_at: Utc::now(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_kind_round_trip() {
        for kind in AnalysisKind::all() {
            assert_eq!(AnalysisKind::from_str(kind.as_str()), Some(*kind));
        }
        assert_eq!(AnalysisKind::from_str("unknown"), None);
    }

    #[test]
    fn test_subject_kind() {
        let subject = Subject::Acceptance {
            blob_key: "ab/abcd1234.jpg".to_string(),
            stage: Stage::Painting,
        };
        assert_eq!(subject.kind(), AnalysisKind::Acceptance);
    }

    #[test]
    fn test_subject_serialises_tagged() {
        let subject = Subject::Company {
            name: "北京某某装饰".to_string(),
            region: None,
        };
        let v = serde_json::to_value(&subject).unwrap();
        assert_eq!(v["type"], "company");
        assert_eq!(v["name"], "北京某某装饰");
        let back: Subject = serde_json::from_value(v).unwrap();
        assert_eq!(back.kind(), AnalysisKind::Company);
    }

    #[test]
    fn test_submission_new_derives_kind() {
        let s = Submission::new(
            "u1",
            Subject::Designer {
                question: "小户型如何扩大收纳？".to_string(),
                image_keys: vec![],
            },
        );
        assert_eq!(s.kind, AnalysisKind::Designer);
        assert_eq!(s.id.len(), 36);
    }
}
