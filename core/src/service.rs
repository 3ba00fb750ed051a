//! Boundary consumed by front ends: ingress, status polling, results and
//! report retrieval, and export.

use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use log::error;
use url::Url;

use crate::core::engine::TestRunner;
use crate::core::state::StatusStore;
use crate::core::{Report, RunStatus, TestResult, TestStatus};
use crate::error::{EngineError, EngineResult};
use crate::http::{HttpClient, RequestExecutor};
use crate::utils::write_atomic;
use crate::{EngineConfig, SinkRef, TestRequest};

/// Accepts tests, runs each on its own task, and answers queries about them.
///
/// Runs are independent: each gets a fresh id and its own runner invocation.
/// `submit` must be called from within a tokio runtime.
pub struct MutationTestService {
    runner: Arc<TestRunner>,
    store: StatusStore,
}

impl MutationTestService {
    pub fn new(config: EngineConfig, sink: SinkRef) -> EngineResult<Self> {
        let client = HttpClient::new(&config)?;
        Ok(Self::with_executor(config, Arc::new(client), sink))
    }

    pub fn with_executor(
        config: EngineConfig,
        executor: Arc<dyn RequestExecutor>,
        sink: SinkRef,
    ) -> Self {
        let store = StatusStore::new(config.max_retained_runs);
        let runner = TestRunner::new(&config, executor, store.clone(), sink);
        Self {
            runner: Arc::new(runner),
            store,
        }
    }

    pub fn store(&self) -> &StatusStore {
        &self.store
    }

    pub fn runner(&self) -> &TestRunner {
        &self.runner
    }

    /// Registers a test and starts it in the background, returning its id.
    /// Requests whose URL cannot be parsed are rejected before a run exists.
    pub fn submit(&self, request: TestRequest) -> EngineResult<String> {
        check_ingress(&request)?;

        let config = request.into_config();
        let id = config.id.clone();
        self.store.register(config.clone());

        let runner = Arc::clone(&self.runner);
        let handle = tokio::spawn(async move {
            // Failures are recorded on the status record by the runner.
            let _ = runner.run(&config).await;
        });

        // A panicking run must still end in a terminal state.
        let store = self.store.clone();
        let watched = id.clone();
        tokio::spawn(async move {
            if let Err(e) = handle.await {
                error!("test {} aborted: {}", watched, e);
                store.fail(&watched, format!("Internal error: run aborted: {}", e));
            }
        });

        Ok(id)
    }

    /// Parses a JSON ingress payload and submits it.
    pub fn submit_json(&self, body: &str) -> EngineResult<String> {
        let request: TestRequest = serde_json::from_str(body)
            .map_err(|e| EngineError::Configuration(format!("malformed test request: {}", e)))?;
        self.submit(request)
    }

    /// Registers and runs a test on the current task.
    pub async fn run(&self, request: TestRequest) -> EngineResult<Report> {
        check_ingress(&request)?;
        let config = request.into_config();
        self.store.register(config.clone());
        self.runner.run(&config).await
    }

    pub fn status(&self, id: &str) -> EngineResult<TestStatus> {
        self.store
            .status(id)
            .ok_or_else(|| EngineError::NotFound(id.to_string()))
    }

    /// Results produced so far: partial while running or after a failure.
    pub fn results(&self, id: &str) -> EngineResult<Vec<TestResult>> {
        self.store
            .results(id)
            .ok_or_else(|| EngineError::NotFound(id.to_string()))
    }

    /// The final report, available once the test has completed.
    pub fn report(&self, id: &str) -> EngineResult<Report> {
        let record = self
            .store
            .record(id)
            .ok_or_else(|| EngineError::NotFound(id.to_string()))?;
        record
            .report
            .ok_or_else(|| EngineError::NotReady(id.to_string()))
    }

    /// The report as a downloadable JSON document.
    pub fn export_report(&self, id: &str) -> EngineResult<String> {
        let report = self.report(id)?;
        Ok(serde_json::to_string_pretty(&report)?)
    }

    pub fn write_report(&self, id: &str, path: impl AsRef<Path>) -> EngineResult<()> {
        let json = self.export_report(id)?;
        write_atomic(path, &json)?;
        Ok(())
    }

    /// Polls until the test reaches `completed` or `failed`.
    pub async fn wait_for(&self, id: &str, poll_interval: Duration) -> EngineResult<TestStatus> {
        loop {
            let status = self.status(id)?;
            if matches!(status.status, RunStatus::Completed | RunStatus::Failed) {
                return Ok(status);
            }
            tokio::time::sleep(poll_interval).await;
        }
    }

    /// Discards a finished test's record.
    pub fn remove(&self, id: &str) -> EngineResult<()> {
        let status = self.status(id)?;
        if !status.is_terminal() {
            return Err(EngineError::Configuration(format!(
                "test {} is still {}",
                id, status.current_phase
            )));
        }
        self.store.remove(id);
        Ok(())
    }
}

/// Shape check at the door: the URL must at least parse.
fn check_ingress(request: &TestRequest) -> EngineResult<()> {
    if request.url.trim().is_empty() {
        return Err(EngineError::Configuration("url is required".to_string()));
    }
    Url::parse(&request.url)
        .map_err(|e| EngineError::Configuration(format!("invalid URL '{}': {}", request.url, e)))?;
    Ok(())
}
