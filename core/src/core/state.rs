//! In-memory run records keyed by test id.
//!
//! Each record is written only by the runner that owns the test id; pollers
//! read clones. Every mutation happens under the store lock, so readers never
//! observe a half-updated status. Terminal records are final.

use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard};

use chrono::Utc;
use log::{debug, warn};

use crate::core::{Phase, Report, TestResult, TestStatus};
use crate::TestConfig;

#[derive(Debug, Clone)]
pub struct RunRecord {
    pub config: TestConfig,
    pub status: TestStatus,
    /// Results in completion order, happy path first.
    pub results: Vec<TestResult>,
    pub report: Option<Report>,
}

#[derive(Default)]
struct StoreInner {
    records: HashMap<String, RunRecord>,
    /// Insertion order, oldest first, for eviction.
    order: VecDeque<String>,
}

#[derive(Clone)]
pub struct StatusStore {
    inner: Arc<RwLock<StoreInner>>,
    max_entries: usize,
}

impl StatusStore {
    pub fn new(max_entries: usize) -> Self {
        Self {
            inner: Arc::new(RwLock::new(StoreInner::default())),
            max_entries: max_entries.max(1),
        }
    }

    fn read(&self) -> RwLockReadGuard<'_, StoreInner> {
        self.inner.read().unwrap_or_else(PoisonError::into_inner)
    }

    fn write(&self) -> RwLockWriteGuard<'_, StoreInner> {
        self.inner.write().unwrap_or_else(PoisonError::into_inner)
    }

    /// Creates the `pending` record for a new test, evicting the oldest
    /// terminal records if the store is full.
    pub fn register(&self, config: TestConfig) -> TestStatus {
        let mut inner = self.write();

        while inner.records.len() >= self.max_entries {
            let victim = inner
                .order
                .iter()
                .position(|id| inner.records.get(id).is_some_and(|r| r.status.is_terminal()));
            match victim.and_then(|pos| inner.order.remove(pos)) {
                Some(id) => {
                    debug!("evicting finished test {}", id);
                    inner.records.remove(&id);
                }
                None => {
                    warn!(
                        "status store holds {} active tests, exceeding its bound of {}",
                        inner.records.len(),
                        self.max_entries
                    );
                    break;
                }
            }
        }

        let status = TestStatus::pending(config.id.clone());
        inner.order.push_back(config.id.clone());
        inner.records.insert(
            config.id.clone(),
            RunRecord {
                config,
                status: status.clone(),
                results: Vec::new(),
                report: None,
            },
        );
        status
    }

    pub fn status(&self, id: &str) -> Option<TestStatus> {
        self.read().records.get(id).map(|r| r.status.clone())
    }

    pub fn results(&self, id: &str) -> Option<Vec<TestResult>> {
        self.read().records.get(id).map(|r| r.results.clone())
    }

    pub fn record(&self, id: &str) -> Option<RunRecord> {
        self.read().records.get(id).cloned()
    }

    pub fn ids(&self) -> Vec<String> {
        self.read().order.iter().cloned().collect()
    }

    pub fn len(&self) -> usize {
        self.read().records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Discards a record. Returns it if it existed.
    pub fn remove(&self, id: &str) -> Option<RunRecord> {
        let mut inner = self.write();
        inner.order.retain(|k| k != id);
        inner.records.remove(id)
    }

    /// Applies `f` to a live record. Returns false for unknown or terminal records.
    fn update_live(&self, id: &str, f: impl FnOnce(&mut RunRecord)) -> bool {
        let mut inner = self.write();
        match inner.records.get_mut(id) {
            Some(record) if !record.status.is_terminal() => {
                f(record);
                true
            }
            _ => false,
        }
    }

    /// Moves a run to `next` if the phase machine allows it.
    /// `Completed` is reached only through [`StatusStore::complete`].
    pub fn transition(&self, id: &str, next: Phase) -> bool {
        if next == Phase::Completed {
            return false;
        }
        let mut allowed = false;
        self.update_live(id, |record| {
            if record.status.current_phase.can_transition_to(next) {
                allowed = true;
                set_phase(&mut record.status, next);
            }
        });
        allowed
    }

    pub fn set_total_mutations(&self, id: &str, total: usize) -> bool {
        self.update_live(id, |record| {
            record.status.total_mutations = total;
        })
    }

    /// Appends a result. Mutation results also advance the progress counter.
    pub fn record_result(&self, id: &str, result: TestResult) -> bool {
        self.update_live(id, |record| {
            if !result.is_happy_path {
                let status = &mut record.status;
                status.completed_mutations =
                    (status.completed_mutations + 1).min(status.total_mutations);
                let progress = mutation_progress(status.completed_mutations, status.total_mutations);
                status.progress = status.progress.max(progress);
            }
            record.results.push(result);
        })
    }

    /// Stores the report and finishes the run in one step.
    pub fn complete(&self, id: &str, report: Report) -> bool {
        let mut allowed = false;
        self.update_live(id, |record| {
            if record.status.current_phase.can_transition_to(Phase::Completed) {
                allowed = true;
                record.report = Some(report);
                set_phase(&mut record.status, Phase::Completed);
            }
        });
        allowed
    }

    /// Fails a live run, keeping its partial results.
    pub fn fail(&self, id: &str, error: impl Into<String>) -> bool {
        let error = error.into();
        self.update_live(id, |record| {
            record.status.error = Some(error);
            set_phase(&mut record.status, Phase::Failed);
        })
    }
}

fn set_phase(status: &mut TestStatus, phase: Phase) {
    status.current_phase = phase;
    status.status = phase.run_status();
    if phase == Phase::Completed {
        status.progress = 100;
    }
    if phase.is_terminal() {
        status.end_time = Some(Utc::now());
    }
}

/// `round(completed / total * 100)`, held below 100 until the run completes.
pub fn mutation_progress(completed: usize, total: usize) -> u8 {
    if total == 0 {
        return 0;
    }
    let pct = (completed as f64 / total as f64 * 100.0).round();
    pct.clamp(0.0, 99.0) as u8
}
