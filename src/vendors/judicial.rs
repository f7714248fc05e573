//! Judicial records vendor adapter.
//!
//! Fetches litigation records for a company name. The vendor paginates;
//! this adapter drains pages internally and hands the caller a bounded
//! sequence, capped at 100 records.

use std::sync::Mutex;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::json;

use super::http::VendorHttpClient;
use super::VendorError;

/// Cap on records returned to strategies.
pub const CASE_CAP: usize = 100;

const PAGE_SIZE: usize = 50;

/// One litigation record.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CaseRecord {
    pub title: String,
    /// 民事 / 刑事 / 行政 / 执行.
    pub case_type: String,
    #[serde(default)]
    pub date: Option<String>,
    /// 原告 / 被告 / 第三人.
    pub role: String,
    #[serde(default)]
    pub excerpt: Option<String>,
}

/// Litigation history lookups.
#[async_trait]
pub trait JudicialVendor: Send + Sync {
    fn version(&self) -> &str;

    /// At most [`CASE_CAP`] records, newest first as the vendor orders them.
    async fn cases(&self, name: &str) -> Result<Vec<CaseRecord>, VendorError>;
}

#[derive(Debug, Deserialize)]
struct CasesEnvelope {
    code: i64,
    #[serde(default)]
    msg: Option<String>,
    #[serde(default)]
    data: Option<CasesPage>,
}

#[derive(Debug, Deserialize)]
struct CasesPage {
    #[serde(default)]
    total: usize,
    #[serde(default)]
    items: Vec<CaseRecord>,
}

pub struct HttpJudicial {
    client: VendorHttpClient,
    version: String,
}

impl HttpJudicial {
    pub fn new(client: VendorHttpClient, version: String) -> Self {
        Self { client, version }
    }
}

#[async_trait]
impl JudicialVendor for HttpJudicial {
    fn version(&self) -> &str {
        &self.version
    }

    async fn cases(&self, name: &str) -> Result<Vec<CaseRecord>, VendorError> {
        let mut collected = Vec::new();
        let mut page = 1usize;

        loop {
            let body = json!({ "name": name, "page": page, "page_size": PAGE_SIZE });
            let raw = self.client.post_json("/cases", &body).await?;
            let envelope: CasesEnvelope = serde_json::from_value(raw)
                .map_err(|e| VendorError::SchemaViolation(format!("judicial response: {e}")))?;

            if envelope.code != 0 {
                return Err(VendorError::VendorUnavailable(format!(
                    "judicial code {}: {}",
                    envelope.code,
                    envelope.msg.unwrap_or_default()
                )));
            }

            let data = envelope.data.unwrap_or(CasesPage { total: 0, items: Vec::new() });
            let batch = data.items.len();
            collected.extend(data.items);

            if collected.len() >= CASE_CAP || batch < PAGE_SIZE || collected.len() >= data.total {
                break;
            }
            page += 1;
        }

        collected.truncate(CASE_CAP);
        Ok(collected)
    }
}

/// In-memory fake returning a scripted case list.
pub struct FakeJudicial {
    version: String,
    cases: Mutex<Vec<CaseRecord>>,
    scripted: Mutex<Vec<VendorError>>,
}

impl FakeJudicial {
    pub fn new() -> Self {
        Self {
            version: "fake-judicial-1".to_string(),
            cases: Mutex::new(Vec::new()),
            scripted: Mutex::new(Vec::new()),
        }
    }

    pub fn set_cases(&self, cases: Vec<CaseRecord>) {
        *self.cases.lock().unwrap_or_else(|e| e.into_inner()) = cases;
    }

    pub fn script_error(&self, err: VendorError) {
        self.scripted.lock().unwrap_or_else(|e| e.into_inner()).push(err);
    }

    pub fn sample_case(title: &str, role: &str) -> CaseRecord {
        CaseRecord {
            title: title.to_string(),
            case_type: "民事".to_string(),
            date: Some("2023-04-11".to_string()),
            role: role.to_string(),
            excerpt: Some("装饰装修合同纠纷".to_string()),
        }
    }
}

impl Default for FakeJudicial {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl JudicialVendor for FakeJudicial {
    fn version(&self) -> &str {
        &self.version
    }

    async fn cases(&self, _name: &str) -> Result<Vec<CaseRecord>, VendorError> {
        {
            let mut scripted = self.scripted.lock().unwrap_or_else(|e| e.into_inner());
            if !scripted.is_empty() {
                return Err(scripted.remove(0));
            }
        }
        let mut cases = self.cases.lock().unwrap_or_else(|e| e.into_inner()).clone();
        cases.truncate(CASE_CAP);
        Ok(cases)
    }
}
