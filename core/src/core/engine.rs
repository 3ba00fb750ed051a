use std::sync::Arc;
use std::time::Instant;

use chrono::Utc;
use futures::{stream, FutureExt, StreamExt};
use log::{debug, info, warn};
use reqwest::header::{HeaderName, HeaderValue};
use url::Url;

use crate::core::mutator::MutationCatalog;
use crate::core::result_aggregator::ReportAggregator;
use crate::core::state::StatusStore;
use crate::core::throttle::{ThrottleController, ThrottleSettings};
use crate::core::{Mutation, Phase, Report, ReportMetadata, TestResult};
use crate::error::{EngineError, EngineResult};
use crate::http::{HttpRequest, HttpResponse, RequestExecutor};
use crate::utils::classifier::ResponseClassifier;
use crate::{EngineConfig, SinkRef, TestConfig};

/// Drives one test through its phases:
///
/// 1. Validates the configuration (no network on failure)
/// 2. Sends the unmodified happy-path request
/// 3. Expands the catalog and sends every mutation with bounded concurrency
/// 4. Aggregates the report and completes the run
///
/// The runner is the only writer of its test's status-store record.
pub struct TestRunner {
    executor: Arc<dyn RequestExecutor>,
    catalog: MutationCatalog,
    classifier: ResponseClassifier,
    store: StatusStore,
    sink: SinkRef,
    concurrency_limit: usize,
    timeout_range: (u64, u64),
    throttle: ThrottleSettings,
}

impl TestRunner {
    pub fn new(
        config: &EngineConfig,
        executor: Arc<dyn RequestExecutor>,
        store: StatusStore,
        sink: SinkRef,
    ) -> Self {
        Self {
            executor,
            catalog: MutationCatalog::new(config.catalog.clone()),
            classifier: ResponseClassifier::new(config.anomaly.clone()),
            store,
            sink,
            concurrency_limit: config.concurrency.max(1),
            timeout_range: (config.min_timeout_ms, config.max_timeout_ms),
            throttle: config.throttle.clone(),
        }
    }

    pub fn catalog(&self) -> &MutationCatalog {
        &self.catalog
    }

    /// Runs a registered test to a terminal state. On error the run is marked
    /// `failed` with whatever results it had already produced.
    pub async fn run(&self, config: &TestConfig) -> EngineResult<Report> {
        match self.drive(config).await {
            Ok(report) => {
                info!("test {} completed", config.id);
                self.sink.on_log("success", &format!("[+] Test {} completed.", config.id));
                self.emit_progress(&config.id);
                Ok(report)
            }
            Err(e) => {
                if e.is_pre_run() {
                    info!("test {} rejected: {}", config.id, e);
                } else {
                    warn!("test {} failed: {}", config.id, e);
                }
                self.store.fail(&config.id, e.to_string());
                self.sink.on_log("error", &format!("[!] Test {} failed: {}", config.id, e));
                self.emit_progress(&config.id);
                Err(e)
            }
        }
    }

    async fn drive(&self, config: &TestConfig) -> EngineResult<Report> {
        let id = config.id.as_str();
        let started = Instant::now();
        let execution_date = Utc::now();

        self.enter(id, Phase::Validating)?;
        validate_config(config, self.timeout_range)?;

        self.enter(id, Phase::HappyPath)?;
        let base = HttpRequest::from_config(config);
        let baseline = self.executor.execute(&base).await;
        if let Some(error) = &baseline.error {
            return Err(EngineError::Connectivity(error.clone()));
        }
        let classification = self.classifier.classify(None, &baseline, None);
        let happy_path = TestResult::happy_path(&base, baseline.clone(), &classification);
        self.store.record_result(id, happy_path.clone());
        self.sink.on_result(id, &happy_path);

        self.enter(id, Phase::Mutating)?;
        let mutations = self.catalog.generate(&base);
        self.store.set_total_mutations(id, mutations.len());
        self.sink.on_log(
            "info",
            &format!("[*] {} mutation(s) generated for {} {}", mutations.len(), config.method, config.url),
        );
        let mutation_results = self.run_mutations(id, &mutations, &baseline).await?;

        self.enter(id, Phase::Reporting)?;
        let metadata = ReportMetadata {
            target_url: config.url.clone(),
            execution_date,
            total_duration: started.elapsed().as_millis() as u64,
        };
        let report = ReportAggregator::aggregate(id, happy_path, mutation_results, metadata);
        ReportAggregator::report_summary(&report, &self.sink);

        if !self.store.complete(id, report.clone()) {
            return Err(EngineError::Internal(format!(
                "test {} could not be marked completed",
                id
            )));
        }
        Ok(report)
    }

    /// Executes and classifies every mutation. Completion order is arbitrary;
    /// the returned results follow catalog order.
    async fn run_mutations(
        &self,
        id: &str,
        mutations: &[Mutation],
        baseline: &HttpResponse,
    ) -> EngineResult<Vec<TestResult>> {
        let throttle = Arc::new(ThrottleController::new(self.throttle.clone()));
        let mut slots: Vec<Option<TestResult>> = vec![None; mutations.len()];
        let mut last_progress = 0;

        // Each request future owns its inputs so the run stays spawnable.
        let requests: Vec<_> = mutations
            .iter()
            .enumerate()
            .map(|(index, mutation)| {
                let executor = Arc::clone(&self.executor);
                let throttle = Arc::clone(&throttle);
                let request = mutation.request.clone();
                async move {
                    throttle.wait().await;
                    let response = executor.execute(&request).await;
                    throttle.observe(&response);
                    (index, response)
                }
                .boxed()
            })
            .collect();
        let mut completions = stream::iter(requests).buffer_unordered(self.concurrency_limit);

        while let Some((index, response)) = completions.next().await {
            let mutation = &mutations[index];
            let classification = self
                .classifier
                .classify(Some(mutation), &response, Some(baseline));
            let result = TestResult::for_mutation(mutation, response, &classification);
            debug!(
                "{} {} [{}] -> {} (vuln={}, integrity={})",
                mutation.id,
                mutation.mutation_type,
                mutation.field.as_deref().unwrap_or("-"),
                result.status_code,
                result.vulnerability_detected,
                result.integrity_issue
            );

            self.store.record_result(id, result.clone());
            self.sink.on_result(id, &result);
            slots[index] = Some(result);

            if let Some(status) = self.store.status(id) {
                if status.progress != last_progress {
                    last_progress = status.progress;
                    self.sink.on_progress(&status);
                }
            }
        }

        let throttled = throttle.total_throttled();
        if throttled > 0 {
            warn!("test {}: target throttled {} request(s)", id, throttled);
            self.sink.on_log(
                "warn",
                &format!("[!] Target pushed back on {} request(s); backoff applied.", throttled),
            );
        }

        slots
            .into_iter()
            .zip(mutations)
            .map(|(slot, mutation)| {
                slot.ok_or_else(|| {
                    EngineError::Internal(format!("mutation {} produced no result", mutation.id))
                })
            })
            .collect()
    }

    fn enter(&self, id: &str, phase: Phase) -> EngineResult<()> {
        if !self.store.transition(id, phase) {
            return Err(EngineError::Internal(format!(
                "test {} cannot enter phase {}",
                id, phase
            )));
        }
        info!("test {} entered {}", id, phase);
        self.emit_progress(id);
        Ok(())
    }

    fn emit_progress(&self, id: &str) {
        if let Some(status) = self.store.status(id) {
            self.sink.on_progress(&status);
        }
    }
}

/// Checks scheme, host, timeout range and header syntax. The method is
/// already constrained by `HttpMethod`.
pub fn validate_config(config: &TestConfig, timeout_range: (u64, u64)) -> EngineResult<()> {
    let url = Url::parse(&config.url)
        .map_err(|e| EngineError::Configuration(format!("invalid URL '{}': {}", config.url, e)))?;

    match url.scheme() {
        "http" | "https" => {}
        other => {
            return Err(EngineError::Configuration(format!(
                "unsupported URL scheme '{}', expected http or https",
                other
            )))
        }
    }

    if url.host_str().map_or(true, str::is_empty) {
        return Err(EngineError::Configuration(format!(
            "URL '{}' has no host",
            config.url
        )));
    }

    let (min, max) = timeout_range;
    if !(min..=max).contains(&config.timeout) {
        return Err(EngineError::Configuration(format!(
            "timeout {}ms outside accepted range {}..={}ms",
            config.timeout, min, max
        )));
    }

    for (key, val) in &config.headers {
        HeaderName::from_bytes(key.as_bytes())
            .map_err(|_| EngineError::Configuration(format!("invalid header name '{}'", key)))?;
        HeaderValue::from_str(val).map_err(|_| {
            EngineError::Configuration(format!("invalid value for header '{}'", key))
        })?;
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::{MutationType, RunStatus};
    use crate::http::HttpMethod;
    use crate::{SilentSink, TestRequest};
    use async_trait::async_trait;
    use serde_json::{json, Value};
    use std::collections::BTreeMap;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    /// Target stub: 201 for the happy path, 400 for anything else, with a
    /// small delay that reverses completion order.
    struct StrictTarget {
        base: Value,
        calls: AtomicUsize,
    }

    #[async_trait]
    impl RequestExecutor for StrictTarget {
        async fn execute(&self, request: &HttpRequest) -> HttpResponse {
            let n = self.calls.fetch_add(1, Ordering::SeqCst);
            tokio::time::sleep(Duration::from_millis(20u64.saturating_sub(n as u64))).await;
            let status = if request.payload.as_ref() == Some(&self.base) { 201 } else { 400 };
            HttpResponse {
                status_code: status,
                response_time: 5,
                body: json!({"status": status}),
                headers: BTreeMap::new(),
                error: None,
            }
        }
    }

    struct DeadTarget;

    #[async_trait]
    impl RequestExecutor for DeadTarget {
        async fn execute(&self, _request: &HttpRequest) -> HttpResponse {
            HttpResponse::failure("Connection error: connection refused", 1)
        }
    }

    fn runner(executor: Arc<dyn RequestExecutor>, store: &StatusStore) -> TestRunner {
        TestRunner::new(&EngineConfig::default(), executor, store.clone(), SilentSink::new_ref())
    }

    fn registered(store: &StatusStore, req: TestRequest) -> TestConfig {
        let config = req.into_config();
        store.register(config.clone());
        config
    }

    #[test]
    fn test_runner_creation() {
        let store = StatusStore::new(4);
        let r = runner(Arc::new(DeadTarget), &store);
        assert_eq!(r.concurrency_limit, 10);
        assert_eq!(r.timeout_range, (100, 120_000));
    }

    #[test]
    fn test_validate_rejects_bad_scheme_and_timeout() {
        let ftp = TestRequest::new("ftp://files.test/x", HttpMethod::Get).into_config();
        assert!(matches!(
            validate_config(&ftp, (100, 1000)),
            Err(EngineError::Configuration(_))
        ));

        let slow = TestRequest::new("https://a.test", HttpMethod::Get)
            .with_timeout(5000)
            .into_config();
        assert!(validate_config(&slow, (100, 1000)).is_err());
        assert!(validate_config(&slow, (100, 5000)).is_ok());

        let bad_header = TestRequest::new("https://a.test", HttpMethod::Get)
            .with_header("bad header", "x")
            .into_config();
        assert!(validate_config(&bad_header, (100, 10_000)).is_err());
    }

    #[tokio::test]
    async fn test_invalid_scheme_fails_without_requests() {
        let store = StatusStore::new(4);
        let target = Arc::new(StrictTarget { base: json!({}), calls: AtomicUsize::new(0) });
        let r = runner(target.clone(), &store);
        let config = registered(&store, TestRequest::new("file:///etc/passwd", HttpMethod::Get));

        let err = r.run(&config).await.unwrap_err();
        assert!(matches!(err, EngineError::Configuration(_)));
        assert_eq!(target.calls.load(Ordering::SeqCst), 0);

        let status = store.status(&config.id).unwrap();
        assert_eq!(status.status, RunStatus::Failed);
        assert_eq!(status.current_phase, Phase::Failed);
        assert!(store.results(&config.id).unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_unreachable_target_fails_run() {
        let store = StatusStore::new(4);
        let r = runner(Arc::new(DeadTarget), &store);
        let config = registered(
            &store,
            TestRequest::new("http://127.0.0.1:1/items", HttpMethod::Post).with_payload(json!({"a": 1})),
        );

        let err = r.run(&config).await.unwrap_err();
        assert!(matches!(err, EngineError::Connectivity(_)));
        let status = store.status(&config.id).unwrap();
        assert_eq!(status.status, RunStatus::Failed);
        assert!(status.progress < 100);
        assert!(store.results(&config.id).unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_results_follow_catalog_order() {
        let store = StatusStore::new(4);
        let payload = json!({"name": "x", "qty": 2});
        let target = Arc::new(StrictTarget { base: payload.clone(), calls: AtomicUsize::new(0) });
        let r = runner(target, &store);
        let config = registered(
            &store,
            TestRequest::new("https://good.example/items", HttpMethod::Post).with_payload(payload),
        );

        let report = r.run(&config).await.unwrap();
        let expected: Vec<String> = r
            .catalog()
            .generate(&HttpRequest::from_config(&config))
            .into_iter()
            .map(|m| m.id)
            .collect();
        let actual: Vec<String> = report
            .mutation_results
            .iter()
            .filter_map(|m| m.mutation_id.clone())
            .collect();
        assert_eq!(actual, expected);

        assert_eq!(report.summary.total_tests, 1 + report.mutation_results.len());
        assert_eq!(report.summary.vulnerabilities_found, 0);
        assert_eq!(report.happy_path_result.status_code, 201);
        assert!(report.happy_path_result.mutation_id.is_none());
        assert!(report.mutation_results.iter().all(|m| m.mutation_id.is_some()));

        let status = store.status(&config.id).unwrap();
        assert_eq!(status.status, RunStatus::Completed);
        assert_eq!(status.progress, 100);
        assert_eq!(status.completed_mutations, status.total_mutations);
        assert!(status.end_time.is_some());
        assert!(store.record(&config.id).unwrap().report.is_some());
    }

    #[tokio::test]
    async fn test_no_mutations_still_completes() {
        let store = StatusStore::new(4);
        let target = Arc::new(StrictTarget { base: json!(null), calls: AtomicUsize::new(0) });
        let r = runner(target, &store);
        let config = registered(&store, TestRequest::new("https://good.example/health", HttpMethod::Get));

        let report = r.run(&config).await.unwrap();
        assert!(report.mutation_results.is_empty());
        assert_eq!(report.summary.total_tests, 1);
        let status = store.status(&config.id).unwrap();
        assert_eq!(status.total_mutations, 0);
        assert_eq!(status.progress, 100);
    }

    #[tokio::test]
    async fn test_run_completes_on_spawned_task() {
        let store = StatusStore::new(4);
        let payload = json!({"name": "x"});
        let target = Arc::new(StrictTarget { base: payload.clone(), calls: AtomicUsize::new(0) });
        let r = Arc::new(runner(target, &store));
        let config = registered(
            &store,
            TestRequest::new("https://good.example/items", HttpMethod::Post).with_payload(payload),
        );

        let task = {
            let r = Arc::clone(&r);
            let config = config.clone();
            tokio::spawn(async move { r.run(&config).await })
        };
        let report = task.await.unwrap().unwrap();
        assert!(!report.mutation_results.is_empty());
        assert_eq!(store.status(&config.id).unwrap().status, RunStatus::Completed);
    }

    #[tokio::test]
    async fn test_missing_field_success_is_flagged() {
        struct LenientTarget;

        #[async_trait]
        impl RequestExecutor for LenientTarget {
            async fn execute(&self, request: &HttpRequest) -> HttpResponse {
                let accepted = request.payload.as_ref().map_or(true, |p| p.get("name").map_or(true, Value::is_string));
                HttpResponse {
                    status_code: if accepted { 200 } else { 400 },
                    response_time: 3,
                    body: json!({}),
                    headers: BTreeMap::new(),
                    error: None,
                }
            }
        }

        let store = StatusStore::new(4);
        let r = runner(Arc::new(LenientTarget), &store);
        let config = registered(
            &store,
            TestRequest::new("https://good.example/items", HttpMethod::Post)
                .with_payload(json!({"name": "x"})),
        );

        let report = r.run(&config).await.unwrap();
        let missing = report
            .mutation_results
            .iter()
            .find(|m| m.mutation_type == Some(MutationType::MissingField))
            .unwrap();
        assert!(missing.vulnerability_detected);
        assert!(report.summary.vulnerabilities_found >= 1);
    }
}
