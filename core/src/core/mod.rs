pub mod engine;
pub mod mutator;
pub mod result_aggregator;
pub mod state;
pub mod throttle;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

use crate::http::{HttpRequest, HttpResponse};
use crate::utils::classifier::Classification;

/// The fifteen kinds of corruption the catalog can apply to a field.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MutationType {
    EmptyString,
    LongString,
    MaliciousString,
    BooleanType,
    ArrayType,
    NullValue,
    UndefinedValue,
    LargeNumber,
    NegativeNumber,
    ZeroValue,
    SpecialCharacters,
    UnicodeCharacters,
    MissingField,
    ExtraField,
    InvalidType,
}

impl MutationType {
    /// Catalog order: every field walks the kinds in this sequence.
    pub const ALL: [MutationType; 15] = [
        MutationType::EmptyString,
        MutationType::LongString,
        MutationType::MaliciousString,
        MutationType::BooleanType,
        MutationType::ArrayType,
        MutationType::NullValue,
        MutationType::UndefinedValue,
        MutationType::LargeNumber,
        MutationType::NegativeNumber,
        MutationType::ZeroValue,
        MutationType::SpecialCharacters,
        MutationType::UnicodeCharacters,
        MutationType::MissingField,
        MutationType::ExtraField,
        MutationType::InvalidType,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            MutationType::EmptyString => "empty_string",
            MutationType::LongString => "long_string",
            MutationType::MaliciousString => "malicious_string",
            MutationType::BooleanType => "boolean_type",
            MutationType::ArrayType => "array_type",
            MutationType::NullValue => "null_value",
            MutationType::UndefinedValue => "undefined_value",
            MutationType::LargeNumber => "large_number",
            MutationType::NegativeNumber => "negative_number",
            MutationType::ZeroValue => "zero_value",
            MutationType::SpecialCharacters => "special_characters",
            MutationType::UnicodeCharacters => "unicode_characters",
            MutationType::MissingField => "missing_field",
            MutationType::ExtraField => "extra_field",
            MutationType::InvalidType => "invalid_type",
        }
    }

    /// Input a well-behaved target must refuse outright.
    pub fn must_be_rejected(&self) -> bool {
        matches!(
            self,
            MutationType::MaliciousString
                | MutationType::InvalidType
                | MutationType::MissingField
                | MutationType::NullValue
                | MutationType::UndefinedValue
        )
    }

    /// Empty, missing or wrongly typed data that validation is expected to fail.
    pub fn expects_validation_failure(&self) -> bool {
        matches!(
            self,
            MutationType::EmptyString
                | MutationType::MissingField
                | MutationType::NullValue
                | MutationType::UndefinedValue
                | MutationType::InvalidType
                | MutationType::BooleanType
                | MutationType::ArrayType
        )
    }
}

impl std::fmt::Display for MutationType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// How a mutation alters the base request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MutationStrategy {
    ReplaceValue,
    TypeConfusion,
    BoundaryValue,
    RemoveField,
    AddField,
}

impl std::fmt::Display for MutationStrategy {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            MutationStrategy::ReplaceValue => "replace_value",
            MutationStrategy::TypeConfusion => "type_confusion",
            MutationStrategy::BoundaryValue => "boundary_value",
            MutationStrategy::RemoveField => "remove_field",
            MutationStrategy::AddField => "add_field",
        };
        f.write_str(s)
    }
}

/// A corrupted variant of the happy-path request. Immutable once generated.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Mutation {
    pub id: String,
    #[serde(rename = "type")]
    pub mutation_type: MutationType,
    pub description: String,
    pub request: HttpRequest,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub field: Option<String>,
    pub strategy: MutationStrategy,
}

/// Derived severity of a vulnerability finding.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    Low,
    Medium,
    High,
    Critical,
}

impl std::fmt::Display for Severity {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Severity::Low => "low",
            Severity::Medium => "medium",
            Severity::High => "high",
            Severity::Critical => "critical",
        };
        f.write_str(s)
    }
}

/// Reporting label behind an `integrity_issue` flag.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum IntegrityCategory {
    ServiceCrash,
    TimeoutIssue,
    UnexpectedSuccess,
    ResponseAnomaly,
}

impl std::fmt::Display for IntegrityCategory {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            IntegrityCategory::ServiceCrash => "service crash",
            IntegrityCategory::TimeoutIssue => "timeout issue",
            IntegrityCategory::UnexpectedSuccess => "unexpected success",
            IntegrityCategory::ResponseAnomaly => "response anomaly",
        };
        f.write_str(s)
    }
}

/// Outcome of one executed request. `mutation_id` is set iff `is_happy_path` is false.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TestResult {
    pub id: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub mutation_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub mutation_type: Option<MutationType>,
    pub is_happy_path: bool,
    pub status_code: u16,
    pub response_time: u64,
    pub response_body: Value,
    pub headers: std::collections::BTreeMap<String, String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    pub vulnerability_detected: bool,
    pub integrity_issue: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub severity: Option<Severity>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub integrity_category: Option<IntegrityCategory>,
    pub timestamp: DateTime<Utc>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub request: Option<HttpRequest>,
}

impl TestResult {
    pub fn happy_path(
        request: &HttpRequest,
        response: HttpResponse,
        classification: &Classification,
    ) -> Self {
        Self::build(None, request, response, classification)
    }

    pub fn for_mutation(
        mutation: &Mutation,
        response: HttpResponse,
        classification: &Classification,
    ) -> Self {
        Self::build(Some(mutation), &mutation.request, response, classification)
    }

    fn build(
        mutation: Option<&Mutation>,
        request: &HttpRequest,
        response: HttpResponse,
        classification: &Classification,
    ) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            mutation_id: mutation.map(|m| m.id.clone()),
            mutation_type: mutation.map(|m| m.mutation_type),
            is_happy_path: mutation.is_none(),
            status_code: response.status_code,
            response_time: response.response_time,
            response_body: response.body,
            headers: response.headers,
            error: response.error,
            vulnerability_detected: classification.vulnerability_detected(),
            integrity_issue: classification.integrity_issue(),
            severity: classification.severity,
            integrity_category: classification.integrity,
            timestamp: Utc::now(),
            request: Some(request.clone()),
        }
    }

    /// Counted as successful: a response arrived with status below 400.
    pub fn is_success(&self) -> bool {
        self.error.is_none() && self.status_code > 0 && self.status_code < 400
    }

    /// Builds a curl command that reproduces this request. Every argument is
    /// single-quoted for a POSIX shell.
    pub fn to_curl(&self) -> Option<String> {
        let req = self.request.as_ref()?;
        let mut parts = vec![format!("curl -X {} {}", req.method, shell_quote(&req.url))];
        for (k, v) in &req.headers {
            parts.push(format!("-H {}", shell_quote(&format!("{}: {}", k, v))));
        }
        if let Some(payload) = &req.payload {
            parts.push("-H 'Content-Type: application/json'".to_string());
            parts.push(format!("-d {}", shell_quote(&payload.to_string())));
        }
        parts.push(format!("--max-time {:.3}", req.timeout as f64 / 1000.0));
        Some(parts.join(" "))
    }
}

/// Wraps `raw` in single quotes, closing and escaping any embedded quote.
fn shell_quote(raw: &str) -> String {
    format!("'{}'", raw.replace('\'', r"'\''"))
}

/// Coarse lifecycle state exposed to pollers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RunStatus {
    Pending,
    Running,
    Completed,
    Failed,
}

/// States of the per-run phase machine.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Phase {
    Pending,
    Validating,
    HappyPath,
    Mutating,
    Reporting,
    Completed,
    Failed,
}

impl Phase {
    pub fn is_terminal(&self) -> bool {
        matches!(self, Phase::Completed | Phase::Failed)
    }

    pub fn run_status(&self) -> RunStatus {
        match self {
            Phase::Pending => RunStatus::Pending,
            Phase::Completed => RunStatus::Completed,
            Phase::Failed => RunStatus::Failed,
            _ => RunStatus::Running,
        }
    }

    /// Whether the machine may move from `self` to `next`.
    pub fn can_transition_to(&self, next: Phase) -> bool {
        use Phase::*;
        match (self, next) {
            (Pending, Validating) => true,
            (Validating, HappyPath) => true,
            (HappyPath, Mutating) => true,
            (Mutating, Reporting) => true,
            (Reporting, Completed) => true,
            (from, Failed) => !from.is_terminal(),
            _ => false,
        }
    }
}

impl std::fmt::Display for Phase {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Phase::Pending => "pending",
            Phase::Validating => "validating",
            Phase::HappyPath => "happy_path",
            Phase::Mutating => "mutating",
            Phase::Reporting => "reporting",
            Phase::Completed => "completed",
            Phase::Failed => "failed",
        };
        f.write_str(s)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TestStatus {
    pub id: String,
    pub status: RunStatus,
    /// 0..=100, non-decreasing within a run.
    pub progress: u8,
    pub current_phase: Phase,
    pub total_mutations: usize,
    pub completed_mutations: usize,
    pub start_time: DateTime<Utc>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub end_time: Option<DateTime<Utc>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl TestStatus {
    pub fn pending(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            status: RunStatus::Pending,
            progress: 0,
            current_phase: Phase::Pending,
            total_mutations: 0,
            completed_mutations: 0,
            start_time: Utc::now(),
            end_time: None,
            error: None,
        }
    }

    pub fn is_terminal(&self) -> bool {
        self.current_phase.is_terminal()
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ReportSummary {
    pub total_tests: usize,
    pub successful_tests: usize,
    pub failed_tests: usize,
    pub vulnerabilities_found: usize,
    pub integrity_issues: usize,
    /// Mean over every result, happy path included, in milliseconds.
    pub average_response_time: f64,
}

/// Per-severity and per-category counts over mutation results.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FindingBreakdown {
    pub critical: usize,
    pub high: usize,
    pub medium: usize,
    pub low: usize,
    pub service_crash: usize,
    pub timeout_issue: usize,
    pub unexpected_success: usize,
    pub response_anomaly: usize,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ReportMetadata {
    pub target_url: String,
    pub execution_date: DateTime<Utc>,
    /// Wall-clock run duration in milliseconds.
    pub total_duration: u64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Report {
    pub id: String,
    pub test_id: String,
    pub summary: ReportSummary,
    pub findings: FindingBreakdown,
    pub happy_path_result: TestResult,
    /// Ordered by catalog generation order, not completion order.
    pub mutation_results: Vec<TestResult>,
    pub metadata: ReportMetadata,
}
