pub mod core;
pub mod error;
pub mod http;
pub mod service;
pub mod utils;

use std::collections::BTreeMap;
use std::path::Path;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

pub use crate::core::engine::TestRunner;
pub use crate::core::mutator::{CatalogOptions, MutationCatalog};
pub use crate::core::result_aggregator::ReportAggregator;
pub use crate::core::state::StatusStore;
pub use crate::core::throttle::ThrottleSettings;
pub use crate::core::{
    IntegrityCategory, Mutation, MutationType, Phase, Report, RunStatus, Severity, TestResult,
    TestStatus,
};
pub use crate::error::{EngineError, EngineResult};
pub use crate::http::{HttpClient, HttpMethod, HttpRequest, HttpResponse, RequestExecutor};
pub use crate::service::MutationTestService;
pub use crate::utils::classifier::{AnomalySettings, ResponseClassifier};
pub use crate::utils::read_lines;

pub const DEFAULT_TIMEOUT_MS: u64 = 5000;

fn default_timeout() -> u64 {
    DEFAULT_TIMEOUT_MS
}

/// Ingress payload: what a caller submits to start a test.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TestRequest {
    pub url: String,
    #[serde(default)]
    pub method: HttpMethod,
    #[serde(default)]
    pub headers: BTreeMap<String, String>,
    #[serde(default)]
    pub payload: Option<Value>,
    /// Per-request timeout in milliseconds.
    #[serde(default = "default_timeout")]
    pub timeout: u64,
}

impl TestRequest {
    pub fn new(url: impl Into<String>, method: HttpMethod) -> Self {
        Self {
            url: url.into(),
            method,
            headers: BTreeMap::new(),
            payload: None,
            timeout: DEFAULT_TIMEOUT_MS,
        }
    }

    pub fn with_header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.insert(name.into(), value.into());
        self
    }

    pub fn with_payload(mut self, payload: Value) -> Self {
        self.payload = Some(payload);
        self
    }

    pub fn with_timeout(mut self, timeout_ms: u64) -> Self {
        self.timeout = timeout_ms;
        self
    }

    pub fn from_file(path: impl AsRef<Path>) -> EngineResult<Self> {
        let data = std::fs::read_to_string(path)?;
        serde_json::from_str(&data)
            .map_err(|e| EngineError::Configuration(format!("malformed test request: {}", e)))
    }

    /// Stamps an id and creation time, producing the immutable run configuration.
    pub fn into_config(self) -> TestConfig {
        TestConfig {
            id: Uuid::new_v4().to_string(),
            url: self.url,
            method: self.method,
            headers: self.headers,
            payload: self.payload,
            timeout: self.timeout,
            created_at: Utc::now(),
        }
    }
}

/// A submitted test. Never modified once execution starts.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TestConfig {
    pub id: String,
    pub url: String,
    pub method: HttpMethod,
    pub headers: BTreeMap<String, String>,
    pub payload: Option<Value>,
    pub timeout: u64,
    pub created_at: DateTime<Utc>,
}

/// Engine-wide tuning shared by every run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct EngineConfig {
    /// Mutation requests in flight per run.
    pub concurrency: usize,
    pub min_timeout_ms: u64,
    pub max_timeout_ms: u64,
    pub max_retained_runs: usize,
    pub throttle: ThrottleSettings,
    pub proxy: Option<String>,
    pub accept_invalid_certs: bool,
    pub user_agent: String,
    pub catalog: CatalogOptions,
    pub anomaly: AnomalySettings,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            concurrency: 10,
            min_timeout_ms: 100,
            max_timeout_ms: 120_000,
            max_retained_runs: 1000,
            throttle: ThrottleSettings::default(),
            proxy: None,
            accept_invalid_certs: false,
            user_agent: format!("mutaprobe/{}", env!("CARGO_PKG_VERSION")),
            catalog: CatalogOptions::default(),
            anomaly: AnomalySettings::default(),
        }
    }
}

impl EngineConfig {
    pub fn from_file(path: impl AsRef<Path>) -> EngineResult<Self> {
        let data = std::fs::read_to_string(path)?;
        serde_json::from_str(&data)
            .map_err(|e| EngineError::Configuration(format!("malformed engine config: {}", e)))
    }
}

/// Splits `Key: Value` strings, dropping entries without a key.
pub fn parse_custom_headers(raw: &[String]) -> Vec<(String, String)> {
    raw.iter()
        .filter_map(|h| {
            let mut parts = h.splitn(2, ':');
            let key = parts.next()?.trim().to_string();
            let val = parts.next().unwrap_or("").trim().to_string();
            if key.is_empty() {
                return None;
            }
            Some((key, val))
        })
        .collect()
}

/// Output abstraction for a run. The CLI renders to the terminal; library
/// callers may ignore events and poll the status store instead.
pub trait RunEventSink: Send + Sync {
    fn on_log(&self, level: &str, message: &str);
    fn on_result(&self, test_id: &str, result: &TestResult);
    fn on_progress(&self, status: &TestStatus);
}

pub type SinkRef = Arc<dyn RunEventSink>;

/// Discards every event.
pub struct SilentSink;

impl SilentSink {
    pub fn new_ref() -> SinkRef {
        Arc::new(Self)
    }
}

impl RunEventSink for SilentSink {
    fn on_log(&self, _level: &str, _message: &str) {}
    fn on_result(&self, _test_id: &str, _result: &TestResult) {}
    fn on_progress(&self, _status: &TestStatus) {}
}

/// Terminal output sink: logs, flagged results and phase changes.
pub struct ConsoleSink;

impl ConsoleSink {
    pub fn new_ref() -> SinkRef {
        Arc::new(Self)
    }
}

impl RunEventSink for ConsoleSink {
    fn on_log(&self, level: &str, message: &str) {
        use colored::*;
        let colored = match level {
            "success" => message.green().to_string(),
            "error" => message.red().to_string(),
            "warn" => message.yellow().to_string(),
            "phase" => message.bright_cyan().bold().to_string(),
            _ => message.to_string(),
        };
        println!("{}", colored);
    }

    fn on_result(&self, test_id: &str, result: &TestResult) {
        use colored::*;
        if !result.vulnerability_detected && !result.integrity_issue {
            return;
        }
        let label = match (result.severity, result.integrity_category) {
            (Some(sev), _) => format!("{} vulnerability", sev).red().bold(),
            (None, Some(cat)) => cat.to_string().yellow().bold(),
            (None, None) => return,
        };
        let kind = result
            .mutation_type
            .map(|t| t.to_string())
            .unwrap_or_else(|| "happy path".to_string());
        println!("{} {} [{}]", "[+]".green().bold(), label, test_id.dimmed());
        println!("    Mutation: {}", kind.bright_yellow());
        println!(
            "    Info:     Status [{}] | Time [{}ms]{}",
            result.status_code.to_string().cyan(),
            result.response_time.to_string().dimmed(),
            result
                .error
                .as_deref()
                .map(|e| format!(" | Error [{}]", e))
                .unwrap_or_default()
        );
        if let Some(curl) = result.to_curl() {
            println!("    curl:     {}", curl.dimmed());
        }
    }

    fn on_progress(&self, status: &TestStatus) {
        use colored::*;
        let line = if status.total_mutations > 0 {
            format!(
                "[*] {} {} ({}/{}, {}%)",
                status.id, status.current_phase, status.completed_mutations,
                status.total_mutations, status.progress
            )
        } else {
            format!("[*] {} {}", status.id, status.current_phase)
        };
        println!("{}", line.bright_cyan());
    }
}
