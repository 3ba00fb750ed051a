use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::core::{IntegrityCategory, Mutation, MutationType, Severity};
use crate::http::HttpResponse;

/// Thresholds for the response-anomaly rule.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct AnomalySettings {
    /// A mutation slower than `latency_factor` times the happy path is anomalous...
    pub latency_factor: f64,
    /// ...provided it also took at least this long.
    pub min_latency_ms: u64,
}

impl Default for AnomalySettings {
    fn default() -> Self {
        Self {
            latency_factor: 5.0,
            min_latency_ms: 1000,
        }
    }
}

/// Classifier verdict. The stored booleans on a `TestResult` derive from it.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Classification {
    pub severity: Option<Severity>,
    pub integrity: Option<IntegrityCategory>,
}

impl Classification {
    pub fn vulnerability_detected(&self) -> bool {
        self.severity.is_some()
    }

    pub fn integrity_issue(&self) -> bool {
        self.integrity.is_some()
    }
}

/// Decides vulnerability and integrity flags for a request/response pair.
///
/// The only place classification happens: reports and the CLI render what this
/// returns. Deterministic for a given (mutation, response, baseline).
#[derive(Debug, Clone, Default)]
pub struct ResponseClassifier {
    anomaly: AnomalySettings,
}

impl ResponseClassifier {
    pub fn new(anomaly: AnomalySettings) -> Self {
        Self { anomaly }
    }

    /// Classifies a response. `mutation` is `None` for the happy path;
    /// `baseline` is the happy-path response, used only by the anomaly rule.
    pub fn classify(
        &self,
        mutation: Option<&Mutation>,
        response: &HttpResponse,
        baseline: Option<&HttpResponse>,
    ) -> Classification {
        let kind = mutation.map(|m| m.mutation_type);
        Classification {
            severity: kind.and_then(|k| vulnerability_severity(k, response)),
            integrity: self.integrity_category(kind, response, baseline),
        }
    }

    fn integrity_category(
        &self,
        kind: Option<MutationType>,
        response: &HttpResponse,
        baseline: Option<&HttpResponse>,
    ) -> Option<IntegrityCategory> {
        if let Some(error) = response.error.as_deref() {
            if is_timeout_error(error) {
                return Some(IntegrityCategory::TimeoutIssue);
            }
            return Some(IntegrityCategory::ServiceCrash);
        }

        if response.is_server_error() {
            return Some(IntegrityCategory::ServiceCrash);
        }

        // The remaining rules judge a mutation against the happy path.
        let kind = kind?;

        if response.is_success() && kind.expects_validation_failure() {
            return Some(IntegrityCategory::UnexpectedSuccess);
        }

        if let Some(baseline) = baseline {
            if self.is_anomalous(response, baseline) {
                return Some(IntegrityCategory::ResponseAnomaly);
            }
        }

        None
    }

    fn is_anomalous(&self, response: &HttpResponse, baseline: &HttpResponse) -> bool {
        if !(200..300).contains(&response.status_code) {
            return false;
        }

        if response.body == Value::Null && baseline.body != Value::Null {
            return true;
        }

        let threshold = (baseline.response_time as f64 * self.anomaly.latency_factor)
            .max(self.anomaly.min_latency_ms as f64);
        response.response_time as f64 > threshold
    }
}

/// Severity of a vulnerability finding, or `None` when the response is benign.
/// Requires an actual HTTP response: transport failures are integrity issues only.
pub fn vulnerability_severity(kind: MutationType, response: &HttpResponse) -> Option<Severity> {
    if response.error.is_some() {
        return None;
    }

    let accepted = response.is_success();
    let server_error = response.is_server_error();

    match kind {
        MutationType::MaliciousString if accepted || server_error => Some(Severity::Critical),
        MutationType::InvalidType
        | MutationType::MissingField
        | MutationType::NullValue
        | MutationType::UndefinedValue
            if accepted =>
        {
            Some(Severity::High)
        }
        MutationType::BooleanType
        | MutationType::ArrayType
        | MutationType::LargeNumber
        | MutationType::SpecialCharacters
            if accepted =>
        {
            Some(Severity::Medium)
        }
        MutationType::LongString | MutationType::UnicodeCharacters if server_error => {
            Some(Severity::Low)
        }
        _ => None,
    }
}

fn is_timeout_error(error: &str) -> bool {
    let lower = error.to_lowercase();
    lower.contains("timeout") || lower.contains("timed out")
}
