//! Runtime configuration.
//!
//! Three layers, later wins: built-in defaults, an optional config file
//! (`renoguard.{toml,yaml,json}`), environment variables. Secrets
//! (vendor keys, the admin key, the blob signing secret) come from the
//! environment and are never serialised back out.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::orchestrator::OrchestratorOptions;
use crate::vendors::{
    FakeAgent, FakeEnterprise, FakeJudicial, FakeLlm, FakeOcr, HttpAgent, HttpEnterprise,
    HttpJudicial, HttpLlm, HttpOcr, TokenBucket, VendorHttpClient, VendorSet,
};

/// Database filename inside the data directory.
pub const DATABASE_FILENAME: &str = "renoguard.db";

/// Config filenames probed in the working directory, then the data dir.
const CONFIG_CANDIDATES: &[&str] = &[
    "renoguard.toml",
    "renoguard.yaml",
    "renoguard.yml",
    "renoguard.json",
];

/// How a vendor adapter is backed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum VendorMode {
    /// Real HTTP adapter against `endpoint`.
    Http,
    /// In-memory fake, for development and tests.
    Fake,
}

impl Default for VendorMode {
    fn default() -> Self {
        VendorMode::Fake
    }
}

/// Wiring for one vendor adapter.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct VendorSettings {
    pub mode: VendorMode,
    pub endpoint: String,
    /// Taken from `VENDOR_<NAME>_KEY`; never serialised.
    #[serde(skip_serializing)]
    pub api_key: Option<String>,
    /// Feeds document fingerprints. For the LLM this is the model id.
    pub version: String,
    /// Outbound budget for this vendor's token bucket.
    pub rate_per_minute: u32,
}

impl Default for VendorSettings {
    fn default() -> Self {
        Self {
            mode: VendorMode::default(),
            endpoint: String::new(),
            api_key: None,
            version: "v1".to_string(),
            rate_per_minute: 60,
        }
    }
}

impl VendorSettings {
    fn versioned(version: &str) -> Self {
        Self {
            version: version.to_string(),
            ..Self::default()
        }
    }

    /// Apply `VENDOR_<prefix>_{ENDPOINT,KEY,VERSION}`. A non-empty
    /// endpoint also switches the adapter to HTTP mode.
    fn apply_env(&mut self, prefix: &str) {
        if let Ok(val) = std::env::var(format!("VENDOR_{}_ENDPOINT", prefix)) {
            if !val.is_empty() {
                self.endpoint = val;
                self.mode = VendorMode::Http;
            }
        }
        if let Ok(val) = std::env::var(format!("VENDOR_{}_KEY", prefix)) {
            self.api_key = Some(val);
        }
        if let Ok(val) = std::env::var(format!("VENDOR_{}_VERSION", prefix)) {
            self.version = val;
        }
    }
}

/// Top-level runtime settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Settings {
    /// Root for the database and blob storage.
    pub data_dir: PathBuf,
    /// Origin prepended to signed blob paths handed to vendors.
    pub public_base_url: String,

    /// Completed company reports age out after this many seconds.
    pub report_ttl_company_secs: u64,
    /// Completed designer reports age out after this many seconds.
    pub report_ttl_designer_secs: u64,
    pub build_timeout_secs: u64,
    pub worker_count: usize,
    /// Concurrent blocking store calls allowed.
    pub blocking_pool_size: usize,
    pub queue_capacity: usize,

    /// Per-IP request budgets, per minute.
    pub rate_limit_global: u32,
    pub rate_limit_company: u32,
    pub rate_limit_upload: u32,
    pub rate_limit_contract: u32,

    pub max_upload_bytes: u64,
    pub allowed_mime_types: Vec<String>,
    /// Builds charged per user per UTC day. Cache hits are free.
    pub daily_analysis_quota: u32,

    /// Grants the audit view and admin endpoints. Unset means those
    /// endpoints always refuse.
    #[serde(skip_serializing)]
    pub admin_key: Option<String>,
    /// MAC secret for signed blob URLs. Empty means serve generates an
    /// ephemeral one, invalidating outstanding links on restart.
    #[serde(skip_serializing)]
    pub blob_signing_secret: String,
    pub signed_url_ttl_secs: u64,

    /// Timeout per outbound vendor request.
    pub request_timeout_secs: u64,
    /// Prompt budget before the LLM adapter refuses with ContextTooLong.
    pub llm_max_context_chars: usize,

    pub ocr: VendorSettings,
    pub enterprise: VendorSettings,
    pub judicial: VendorSettings,
    pub llm: VendorSettings,
    pub agent: VendorSettings,
    pub agent_supervisor: VendorSettings,

    /// Where this config was loaded from, if anywhere.
    #[serde(skip)]
    pub source_path: Option<PathBuf>,
}

impl Default for Settings {
    fn default() -> Self {
        let data_dir = dirs::data_local_dir()
            .or_else(dirs::home_dir)
            .unwrap_or_else(|| PathBuf::from("."))
            .join("renoguard");

        Self {
            data_dir,
            public_base_url: "http://127.0.0.1:8080".to_string(),
            report_ttl_company_secs: 30 * 24 * 60 * 60,
            report_ttl_designer_secs: 24 * 60 * 60,
            build_timeout_secs: 120,
            worker_count: 16,
            blocking_pool_size: 8,
            queue_capacity: 1024,
            rate_limit_global: 200,
            rate_limit_company: 10,
            rate_limit_upload: 5,
            rate_limit_contract: 5,
            max_upload_bytes: 10 * 1024 * 1024,
            allowed_mime_types: vec![
                "image/jpeg".to_string(),
                "image/png".to_string(),
                "image/webp".to_string(),
                "application/pdf".to_string(),
            ],
            daily_analysis_quota: 20,
            admin_key: None,
            blob_signing_secret: String::new(),
            signed_url_ttl_secs: 24 * 60 * 60,
            request_timeout_secs: 30,
            llm_max_context_chars: 30_000,
            ocr: VendorSettings::versioned("ocr-v1"),
            enterprise: VendorSettings::versioned("ent-v1"),
            judicial: VendorSettings::versioned("jud-v1"),
            llm: VendorSettings::versioned("qwen-vl-plus"),
            agent: VendorSettings::versioned("agent-v1"),
            agent_supervisor: VendorSettings::versioned("agent-v1"),
            source_path: None,
        }
    }
}

impl Settings {
    /// Load settings: defaults, an optional file, then env overrides.
    pub async fn load(explicit: Option<&Path>) -> Result<Self, String> {
        let settings = match explicit {
            Some(path) => Self::load_from_path(path).await?,
            None => match Self::discover().await {
                Some(settings) => settings,
                None => Self::default(),
            },
        };
        Ok(settings.with_env_overrides())
    }

    /// Probe standard locations for a config file.
    async fn discover() -> Option<Self> {
        let data_dir = Self::default().data_dir;
        for name in CONFIG_CANDIDATES {
            for dir in [Path::new("."), data_dir.as_path()] {
                let path = dir.join(name);
                if !path.is_file() {
                    continue;
                }
                match Self::load_from_path(&path).await {
                    Ok(settings) => return Some(settings),
                    Err(err) => {
                        tracing::warn!(
                            path = %path.display(),
                            error = %err,
                            "ignoring unreadable config file"
                        );
                    }
                }
            }
        }
        None
    }

    /// Load from a specific file. Format follows the extension.
    pub async fn load_from_path(path: &Path) -> Result<Self, String> {
        let contents = tokio::fs::read_to_string(path)
            .await
            .map_err(|e| format!("Failed to read config file: {}", e))?;

        let ext = path.extension().and_then(|e| e.to_str()).unwrap_or("json");

        let mut settings: Settings = match ext {
            "toml" => toml::from_str(&contents)
                .map_err(|e| format!("Failed to parse TOML config: {}", e))?,
            "yaml" | "yml" => serde_yaml::from_str(&contents)
                .map_err(|e| format!("Failed to parse YAML config: {}", e))?,
            _ => serde_json::from_str(&contents)
                .map_err(|e| format!("Failed to parse JSON config: {}", e))?,
        };

        settings.source_path = Some(path.to_path_buf());
        Ok(settings)
    }

    /// Apply environment overrides. Env always wins over file values;
    /// unparseable numbers are ignored rather than fatal.
    pub fn with_env_overrides(mut self) -> Self {
        if let Ok(val) = std::env::var("DATA_DIR") {
            if !val.is_empty() {
                self.data_dir = PathBuf::from(val);
            }
        }
        if let Ok(val) = std::env::var("REPORT_TTL_COMPANY") {
            if let Ok(parsed) = val.parse() {
                self.report_ttl_company_secs = parsed;
            }
        }
        if let Ok(val) = std::env::var("REPORT_TTL_DESIGNER") {
            if let Ok(parsed) = val.parse() {
                self.report_ttl_designer_secs = parsed;
            }
        }
        if let Ok(val) = std::env::var("BUILD_TIMEOUT") {
            if let Ok(parsed) = val.parse() {
                self.build_timeout_secs = parsed;
            }
        }
        if let Ok(val) = std::env::var("WORKER_COUNT") {
            if let Ok(parsed) = val.parse() {
                self.worker_count = parsed;
            }
        }
        if let Ok(val) = std::env::var("BLOCKING_POOL_SIZE") {
            if let Ok(parsed) = val.parse() {
                self.blocking_pool_size = parsed;
            }
        }
        if let Ok(val) = std::env::var("QUEUE_CAPACITY") {
            if let Ok(parsed) = val.parse() {
                self.queue_capacity = parsed;
            }
        }
        if let Ok(val) = std::env::var("RATE_LIMIT_GLOBAL") {
            if let Ok(parsed) = val.parse() {
                self.rate_limit_global = parsed;
            }
        }
        if let Ok(val) = std::env::var("RATE_LIMIT_COMPANY") {
            if let Ok(parsed) = val.parse() {
                self.rate_limit_company = parsed;
            }
        }
        if let Ok(val) = std::env::var("RATE_LIMIT_UPLOAD") {
            if let Ok(parsed) = val.parse() {
                self.rate_limit_upload = parsed;
            }
        }
        if let Ok(val) = std::env::var("RATE_LIMIT_CONTRACT") {
            if let Ok(parsed) = val.parse() {
                self.rate_limit_contract = parsed;
            }
        }
        if let Ok(val) = std::env::var("MAX_UPLOAD_BYTES") {
            if let Ok(parsed) = val.parse() {
                self.max_upload_bytes = parsed;
            }
        }
        if let Ok(val) = std::env::var("ALLOWED_MIME_TYPES") {
            let types: Vec<String> = val
                .split(',')
                .map(|s| s.trim().to_string())
                .filter(|s| !s.is_empty())
                .collect();
            if !types.is_empty() {
                self.allowed_mime_types = types;
            }
        }
        if let Ok(val) = std::env::var("DAILY_ANALYSIS_QUOTA") {
            if let Ok(parsed) = val.parse() {
                self.daily_analysis_quota = parsed;
            }
        }
        if let Ok(val) = std::env::var("ADMIN_KEY") {
            if !val.is_empty() {
                self.admin_key = Some(val);
            }
        }
        if let Ok(val) = std::env::var("BLOB_SIGNING_SECRET") {
            self.blob_signing_secret = val;
        }

        self.ocr.apply_env("OCR");
        self.enterprise.apply_env("ENTERPRISE");
        self.judicial.apply_env("JUDICIAL");
        self.llm.apply_env("LLM");
        self.agent.apply_env("AGENT");
        self.agent_supervisor.apply_env("AGENT_SUPERVISOR");

        self
    }

    /// Database file path inside the data directory.
    pub fn database_path(&self) -> PathBuf {
        self.data_dir.join(DATABASE_FILENAME)
    }

    /// Blob storage root inside the data directory.
    pub fn blobs_dir(&self) -> PathBuf {
        self.data_dir.join("blobs")
    }

    /// Create the data directories if missing.
    pub fn ensure_directories(&self) -> std::io::Result<()> {
        std::fs::create_dir_all(&self.data_dir)?;
        std::fs::create_dir_all(self.blobs_dir())?;
        Ok(())
    }

    pub fn build_timeout(&self) -> Duration {
        Duration::from_secs(self.build_timeout_secs)
    }

    pub fn signed_url_ttl(&self) -> Duration {
        Duration::from_secs(self.signed_url_ttl_secs)
    }

    /// Orchestrator knobs from these settings.
    pub fn orchestrator_options(&self) -> OrchestratorOptions {
        OrchestratorOptions {
            worker_count: self.worker_count,
            queue_capacity: self.queue_capacity,
            build_timeout: self.build_timeout(),
            daily_quota: self.daily_analysis_quota,
            ttl_company: Duration::from_secs(self.report_ttl_company_secs),
            ttl_designer: Duration::from_secs(self.report_ttl_designer_secs),
        }
    }

    /// Instantiate the configured vendor adapters.
    pub fn build_vendors(&self) -> VendorSet {
        VendorSet {
            ocr: match self.ocr.mode {
                VendorMode::Http => Arc::new(HttpOcr::new(
                    self.http_client("ocr", &self.ocr),
                    self.ocr.version.clone(),
                    self.max_upload_bytes,
                )),
                VendorMode::Fake => Arc::new(FakeOcr::new()),
            },
            enterprise: match self.enterprise.mode {
                VendorMode::Http => Arc::new(HttpEnterprise::new(
                    self.http_client("enterprise", &self.enterprise),
                    self.enterprise.version.clone(),
                )),
                VendorMode::Fake => Arc::new(FakeEnterprise::new()),
            },
            judicial: match self.judicial.mode {
                VendorMode::Http => Arc::new(HttpJudicial::new(
                    self.http_client("judicial", &self.judicial),
                    self.judicial.version.clone(),
                )),
                VendorMode::Fake => Arc::new(FakeJudicial::new()),
            },
            llm: match self.llm.mode {
                VendorMode::Http => Arc::new(HttpLlm::new(
                    self.http_client("llm", &self.llm),
                    self.llm.version.clone(),
                    self.llm_max_context_chars,
                )),
                VendorMode::Fake => Arc::new(FakeLlm::new()),
            },
            agent_primary: match self.agent.mode {
                VendorMode::Http => Arc::new(HttpAgent::new(
                    self.http_client("agent", &self.agent),
                    "primary",
                    self.agent.version.clone(),
                )),
                VendorMode::Fake => Arc::new(FakeAgent::new("primary")),
            },
            agent_supervisor: match self.agent_supervisor.mode {
                VendorMode::Http => Arc::new(HttpAgent::new(
                    self.http_client("agent_supervisor", &self.agent_supervisor),
                    "supervisor",
                    self.agent_supervisor.version.clone(),
                )),
                VendorMode::Fake => Arc::new(FakeAgent::new("supervisor")),
            },
        }
    }

    fn http_client(&self, vendor: &str, settings: &VendorSettings) -> VendorHttpClient {
        VendorHttpClient::new(
            vendor,
            settings.endpoint.clone(),
            settings.api_key.clone(),
            Arc::new(TokenBucket::per_minute(settings.rate_per_minute)),
            Duration::from_secs(self.request_timeout_secs),
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let settings = Settings::default();
        assert_eq!(settings.worker_count, 16);
        assert_eq!(settings.queue_capacity, 1024);
        assert_eq!(settings.daily_analysis_quota, 20);
        assert_eq!(settings.max_upload_bytes, 10 * 1024 * 1024);
        assert_eq!(settings.report_ttl_company_secs, 30 * 24 * 60 * 60);
        assert_eq!(settings.report_ttl_designer_secs, 24 * 60 * 60);
        assert_eq!(settings.ocr.mode, VendorMode::Fake);
        assert_eq!(settings.llm.version, "qwen-vl-plus");
        assert!(settings.admin_key.is_none());
        assert!(settings
            .allowed_mime_types
            .contains(&"application/pdf".to_string()));
    }

    #[tokio::test]
    async fn test_load_from_toml() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("renoguard.toml");
        std::fs::write(
            &path,
            r#"
worker_count = 4
daily_analysis_quota = 3

[llm]
mode = "http"
endpoint = "https://llm.example"
version = "qwen-vl-max"
rate_per_minute = 30
"#,
        )
        .unwrap();

        let settings = Settings::load_from_path(&path).await.unwrap();
        assert_eq!(settings.worker_count, 4);
        assert_eq!(settings.daily_analysis_quota, 3);
        assert_eq!(settings.llm.mode, VendorMode::Http);
        assert_eq!(settings.llm.endpoint, "https://llm.example");
        assert_eq!(settings.llm.version, "qwen-vl-max");
        assert_eq!(settings.queue_capacity, 1024);
        assert_eq!(settings.source_path.as_deref(), Some(path.as_path()));
    }

    #[tokio::test]
    async fn test_load_from_json() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("renoguard.json");
        std::fs::write(
            &path,
            r#"{"max_upload_bytes": 1024, "enterprise": {"mode": "http", "endpoint": "https://ent.example"}}"#,
        )
        .unwrap();

        let settings = Settings::load_from_path(&path).await.unwrap();
        assert_eq!(settings.max_upload_bytes, 1024);
        assert_eq!(settings.enterprise.mode, VendorMode::Http);
        assert_eq!(settings.enterprise.endpoint, "https://ent.example");
    }

    #[test]
    fn test_env_overrides_win() {
        std::env::set_var("WORKER_COUNT", "2");
        std::env::set_var("ALLOWED_MIME_TYPES", "image/png, image/webp");
        std::env::set_var("VENDOR_LLM_ENDPOINT", "https://llm.env.example");
        std::env::set_var("VENDOR_LLM_KEY", "sk-test");
        let settings = Settings::default().with_env_overrides();
        std::env::remove_var("WORKER_COUNT");
        std::env::remove_var("ALLOWED_MIME_TYPES");
        std::env::remove_var("VENDOR_LLM_ENDPOINT");
        std::env::remove_var("VENDOR_LLM_KEY");

        assert_eq!(settings.worker_count, 2);
        assert_eq!(settings.allowed_mime_types, vec!["image/png", "image/webp"]);
        assert_eq!(settings.llm.mode, VendorMode::Http);
        assert_eq!(settings.llm.endpoint, "https://llm.env.example");
        assert_eq!(settings.llm.api_key.as_deref(), Some("sk-test"));
    }

    #[test]
    fn test_unparseable_env_value_is_ignored() {
        std::env::set_var("QUEUE_CAPACITY", "not-a-number");
        let settings = Settings::default().with_env_overrides();
        std::env::remove_var("QUEUE_CAPACITY");
        assert_eq!(settings.queue_capacity, 1024);
    }

    #[test]
    fn test_secrets_never_serialised() {
        let mut settings = Settings::default();
        settings.admin_key = Some("super-secret".to_string());
        settings.blob_signing_secret = "mac-secret".to_string();
        settings.llm.api_key = Some("sk-live".to_string());

        let json = serde_json::to_string(&settings).unwrap();
        assert!(!json.contains("super-secret"));
        assert!(!json.contains("mac-secret"));
        assert!(!json.contains("sk-live"));
    }
}
