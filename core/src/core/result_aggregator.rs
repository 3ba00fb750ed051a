use uuid::Uuid;

use crate::core::{
    FindingBreakdown, IntegrityCategory, Report, ReportMetadata, ReportSummary, Severity,
    TestResult,
};
use crate::SinkRef;

/// Folds the results of a run into its report.
pub struct ReportAggregator;

impl ReportAggregator {
    /// Builds the final report. `mutation_results` must already be in catalog order.
    pub fn aggregate(
        test_id: &str,
        happy_path: TestResult,
        mutation_results: Vec<TestResult>,
        metadata: ReportMetadata,
    ) -> Report {
        let summary = Self::summarize(&happy_path, &mutation_results);
        let findings = Self::breakdown(&mutation_results);

        Report {
            id: Uuid::new_v4().to_string(),
            test_id: test_id.to_string(),
            summary,
            findings,
            happy_path_result: happy_path,
            mutation_results,
            metadata,
        }
    }

    pub fn summarize(happy_path: &TestResult, mutation_results: &[TestResult]) -> ReportSummary {
        // The happy path guarantees at least one result.
        let total_tests = 1 + mutation_results.len();
        let all = || std::iter::once(happy_path).chain(mutation_results.iter());

        let successful_tests = all().filter(|r| r.is_success()).count();
        let total_time: u64 = all().map(|r| r.response_time).sum();

        ReportSummary {
            total_tests,
            successful_tests,
            failed_tests: total_tests - successful_tests,
            vulnerabilities_found: mutation_results
                .iter()
                .filter(|r| r.vulnerability_detected)
                .count(),
            integrity_issues: mutation_results.iter().filter(|r| r.integrity_issue).count(),
            average_response_time: total_time as f64 / total_tests as f64,
        }
    }

    pub fn breakdown(mutation_results: &[TestResult]) -> FindingBreakdown {
        let mut findings = FindingBreakdown::default();
        for result in mutation_results {
            match result.severity {
                Some(Severity::Critical) => findings.critical += 1,
                Some(Severity::High) => findings.high += 1,
                Some(Severity::Medium) => findings.medium += 1,
                Some(Severity::Low) => findings.low += 1,
                None => {}
            }
            match result.integrity_category {
                Some(IntegrityCategory::ServiceCrash) => findings.service_crash += 1,
                Some(IntegrityCategory::TimeoutIssue) => findings.timeout_issue += 1,
                Some(IntegrityCategory::UnexpectedSuccess) => findings.unexpected_success += 1,
                Some(IntegrityCategory::ResponseAnomaly) => findings.response_anomaly += 1,
                None => {}
            }
        }
        findings
    }

    /// Writes a human-readable summary of a report to the sink.
    pub fn report_summary(report: &Report, sink: &SinkRef) {
        let s = &report.summary;
        sink.on_log(
            "info",
            &format!(
                "[*] {} test(s): {} succeeded, {} failed, avg {:.1}ms",
                s.total_tests, s.successful_tests, s.failed_tests, s.average_response_time
            ),
        );

        if s.vulnerabilities_found == 0 && s.integrity_issues == 0 {
            sink.on_log("success", "[+] No vulnerabilities or integrity issues found.");
            return;
        }

        let f = &report.findings;
        sink.on_log(
            "warn",
            &format!(
                "[+] {} vulnerability(ies): {} critical, {} high, {} medium, {} low",
                s.vulnerabilities_found, f.critical, f.high, f.medium, f.low
            ),
        );
        sink.on_log(
            "warn",
            &format!(
                "[+] {} integrity issue(s): {} crash, {} timeout, {} unexpected success, {} anomaly",
                s.integrity_issues,
                f.service_crash,
                f.timeout_issue,
                f.unexpected_success,
                f.response_anomaly
            ),
        );

        let flagged = report
            .mutation_results
            .iter()
            .filter(|r| r.vulnerability_detected);
        for (i, r) in flagged.enumerate() {
            sink.on_log(
                "error",
                &format!(
                    "  #{} [{}] {} -> status {}",
                    i + 1,
                    r.severity.map(|s| s.to_string()).unwrap_or_default(),
                    r.mutation_type.map(|t| t.to_string()).unwrap_or_default(),
                    r.status_code
                ),
            );
        }
    }
}
