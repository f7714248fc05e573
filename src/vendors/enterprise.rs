//! Enterprise registry vendor adapter.
//!
//! Looks up business registration records by company name. The vendor
//! distinguishes "no match" from "several strong matches"; both are
//! surfaced as typed errors so the strategy can phrase the report.

use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;

use async_trait::async_trait;
use serde::Deserialize;
use serde_json::{json, Value};

use super::http::VendorHttpClient;
use super::VendorError;

/// A business registration record, normalised from the vendor payload.
/// `raw` keeps the untouched vendor document for the audit projection.
#[derive(Debug, Clone)]
pub struct EnterpriseRecord {
    pub legal_name: String,
    /// Registration status, e.g. 在业 / 注销 / 吊销.
    pub status: String,
    pub registered_capital: Option<String>,
    pub legal_representative: Option<String>,
    pub established: Option<String>,
    pub key_personnel: Vec<String>,
    /// Number of registry change records (name, capital, address...).
    pub change_count: u32,
    pub raw: Value,
}

/// Business registry lookups.
#[async_trait]
pub trait EnterpriseVendor: Send + Sync {
    fn version(&self) -> &str;

    async fn lookup(&self, name: &str, region: Option<&str>) -> Result<EnterpriseRecord, VendorError>;
}

#[derive(Debug, Deserialize)]
struct LookupEnvelope {
    code: i64,
    #[serde(default)]
    msg: Option<String>,
    #[serde(default)]
    match_count: Option<usize>,
    #[serde(default)]
    data: Option<WireRecord>,
}

#[derive(Debug, Deserialize)]
struct WireRecord {
    legal_name: String,
    status: String,
    #[serde(default)]
    registered_capital: Option<String>,
    #[serde(default)]
    legal_representative: Option<String>,
    #[serde(default)]
    established: Option<String>,
    #[serde(default)]
    key_personnel: Vec<String>,
    #[serde(default)]
    change_count: u32,
}

pub struct HttpEnterprise {
    client: VendorHttpClient,
    version: String,
}

impl HttpEnterprise {
    pub fn new(client: VendorHttpClient, version: String) -> Self {
        Self { client, version }
    }
}

#[async_trait]
impl EnterpriseVendor for HttpEnterprise {
    fn version(&self) -> &str {
        &self.version
    }

    async fn lookup(&self, name: &str, region: Option<&str>) -> Result<EnterpriseRecord, VendorError> {
        let body = json!({ "name": name, "region": region });
        let raw = self.client.post_json("/lookup", &body).await?;

        let envelope: LookupEnvelope = serde_json::from_value(raw.clone())
            .map_err(|e| VendorError::SchemaViolation(format!("registry response: {e}")))?;

        match envelope.code {
            0 => {
                let record = envelope.data.ok_or_else(|| {
                    VendorError::SchemaViolation("registry response missing data".to_string())
                })?;
                Ok(EnterpriseRecord {
                    legal_name: record.legal_name,
                    status: record.status,
                    registered_capital: record.registered_capital,
                    legal_representative: record.legal_representative,
                    established: record.established,
                    key_personnel: record.key_personnel,
                    change_count: record.change_count,
                    raw,
                })
            }
            40400 => Err(VendorError::NotFound),
            40900 => Err(VendorError::AmbiguousName(envelope.match_count.unwrap_or(2))),
            42900 => Err(VendorError::QuotaExceeded),
            code => Err(VendorError::VendorUnavailable(format!(
                "registry code {code}: {}",
                envelope.msg.unwrap_or_default()
            ))),
        }
    }
}

/// In-memory fake seeded with records keyed by exact trimmed name.
pub struct FakeEnterprise {
    version: String,
    records: Mutex<HashMap<String, EnterpriseRecord>>,
    scripted: Mutex<Vec<VendorError>>,
    calls: AtomicUsize,
}

impl FakeEnterprise {
    pub fn new() -> Self {
        Self {
            version: "fake-enterprise-1".to_string(),
            records: Mutex::new(HashMap::new()),
            scripted: Mutex::new(Vec::new()),
            calls: AtomicUsize::new(0),
        }
    }

    pub fn call_count(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    pub fn insert(&self, name: impl Into<String>, record: EnterpriseRecord) {
        self.records
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .insert(name.into(), record);
    }

    /// Queue an error for the next lookup regardless of the name.
    pub fn script_error(&self, err: VendorError) {
        self.scripted.lock().unwrap_or_else(|e| e.into_inner()).push(err);
    }

    /// A plausible active registration for seeding tests.
    pub fn sample_record(legal_name: &str) -> EnterpriseRecord {
        EnterpriseRecord {
            legal_name: legal_name.to_string(),
            status: "在业".to_string(),
            registered_capital: Some("500万元".to_string()),
            legal_representative: Some("张建国".to_string()),
            established: Some("2015-06-18".to_string()),
            key_personnel: vec!["张建国".to_string(), "李明".to_string()],
            change_count: 3,
            raw: json!({"legal_name": legal_name, "status": "在业"}),
        }
    }
}

impl Default for FakeEnterprise {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl EnterpriseVendor for FakeEnterprise {
    fn version(&self) -> &str {
        &self.version
    }

    async fn lookup(&self, name: &str, _region: Option<&str>) -> Result<EnterpriseRecord, VendorError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        {
            let mut scripted = self.scripted.lock().unwrap_or_else(|e| e.into_inner());
            if !scripted.is_empty() {
                return Err(scripted.remove(0));
            }
        }
        self.records
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .get(name.trim())
            .cloned()
            .ok_or(VendorError::NotFound)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_fake_lookup_hit_and_miss() {
        let fake = FakeEnterprise::new();
        fake.insert("北京某某装饰", FakeEnterprise::sample_record("北京某某装饰工程有限公司"));

        let record = fake.lookup("北京某某装饰", None).await.unwrap();
        assert_eq!(record.status, "在业");
        assert_eq!(record.change_count, 3);

        let err = fake.lookup("不存在的公司", None).await.unwrap_err();
        assert!(matches!(err, VendorError::NotFound));
    }

    #[tokio::test]
    async fn test_fake_scripted_error_fires_once() {
        let fake = FakeEnterprise::new();
        fake.insert("公司", FakeEnterprise::sample_record("公司"));
        fake.script_error(VendorError::VendorUnavailable("registry down".into()));

        assert!(matches!(
            fake.lookup("公司", None).await.unwrap_err(),
            VendorError::VendorUnavailable(_)
        ));
        assert!(fake.lookup("公司", None).await.is_ok());
    }

    #[test]
    fn test_envelope_code_mapping() {
        let envelope: LookupEnvelope =
            serde_json::from_value(json!({"code": 40900, "match_count": 4})).unwrap();
        assert_eq!(envelope.code, 40900);
        assert_eq!(envelope.match_count, Some(4));
    }
}
