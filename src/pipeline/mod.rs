//! Batch scan orchestrator: ties series store → classifier together.
//!
//! ## Flow
//!
//! `BatchScanner::run()`:
//!   1. Select the execution backend once (process, falling back to threads).
//!   2. Spawn one task per unit, bounded by a semaphore of `parallelism` permits.
//!   3. Collect outcomes in completion order, mapping each task id back to its
//!      unit, and update the counters + progress observer after every one.
//!   Unit-level failures never abort the batch; only backend selection can.

pub mod runner;
pub mod worker;

pub use runner::{scan_unit, Backend};

use crate::errors::ErrorKind;
use crate::models::{ScanOutcome, ScanUnit};
use crate::platform::PlatformClassifier;
use crate::storage::SeriesStore;
use runner::{join_failure, select_runner};
use serde::Serialize;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::Semaphore;
use tokio::task::{Id, JoinSet};
use tracing::{error, info, warn};

// ── Progress ──────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
pub struct Progress {
    pub completed: usize,
    pub total: usize,
    pub success_count: usize,
    pub error_count: usize,
    pub platform_found_count: usize,
}

/// Informational sink called by the coordinator after every unit.
pub trait ProgressObserver {
    fn on_progress(&mut self, progress: &Progress);
}

impl<F: FnMut(&Progress)> ProgressObserver for F {
    fn on_progress(&mut self, progress: &Progress) {
        self(progress)
    }
}

/// Logs a progress line every `every` units and at the end.
pub struct LogProgress {
    every: usize,
}

impl LogProgress {
    pub fn new(every: usize) -> Self {
        Self { every: every.max(1) }
    }
}

impl ProgressObserver for LogProgress {
    fn on_progress(&mut self, p: &Progress) {
        if p.completed % self.every == 0 || p.completed == p.total {
            info!(
                "{}/{} scanned | ok {} | errors {} | with platform {}",
                p.completed, p.total, p.success_count, p.error_count, p.platform_found_count
            );
        }
    }
}

// ── Scanner ───────────────────────────────────────────────────────────────────

#[derive(Debug, Clone)]
pub struct ScanOptions {
    pub parallelism: usize,
    pub backend: Backend,
}

pub fn default_parallelism() -> usize {
    std::thread::available_parallelism().map(|n| n.get()).unwrap_or(8)
}

impl Default for ScanOptions {
    fn default() -> Self {
        Self { parallelism: default_parallelism(), backend: Backend::Process }
    }
}

#[derive(Debug, Serialize)]
pub struct BatchSummary {
    pub backend: Backend,
    pub total: usize,
    pub success_count: usize,
    pub error_count: usize,
    pub platform_found_count: usize,
    /// Completion order, one per input unit.
    #[serde(skip)]
    pub outcomes: Vec<ScanOutcome>,
}

impl BatchSummary {
    pub fn failures(&self) -> impl Iterator<Item = (ScanUnit, &ErrorKind)> + '_ {
        self.outcomes.iter().filter_map(|o| match o {
            ScanOutcome::Failure { unit, error } => Some((unit.clone(), error)),
            ScanOutcome::Success(_) => None,
        })
    }
}

pub struct BatchScanner {
    classifier: Arc<PlatformClassifier>,
    options: ScanOptions,
}

impl BatchScanner {
    pub fn new(classifier: Arc<PlatformClassifier>, options: ScanOptions) -> Self {
        Self { classifier, options }
    }

    pub async fn run(
        &self,
        units: Vec<ScanUnit>,
        store: Arc<dyn SeriesStore>,
        mut observer: Option<&mut dyn ProgressObserver>,
    ) -> Result<BatchSummary, ErrorKind> {
        let parallelism = self.options.parallelism;
        let runner = select_runner(
            self.options.backend,
            Arc::clone(&store),
            Arc::clone(&self.classifier),
            parallelism,
        )
        .await?;
        let backend = runner.backend();

        let total = units.len();
        info!("=== Scanning {} units on {} backend ({} workers) ===", total, backend, parallelism);

        let sem = Arc::new(Semaphore::new(parallelism));
        let mut tasks = JoinSet::new();
        let mut pending: HashMap<Id, ScanUnit> = HashMap::with_capacity(total);

        for unit in units {
            let runner = Arc::clone(&runner);
            let sem = Arc::clone(&sem);
            let task_unit = unit.clone();

            let handle = tasks.spawn(async move {
                let _permit = sem.acquire().await;
                runner.execute(task_unit).await
            });
            pending.insert(handle.id(), unit);
        }

        let mut progress = Progress { total, ..Progress::default() };
        let mut outcomes = Vec::with_capacity(total);

        while let Some(joined) = tasks.join_next_with_id().await {
            let (id, outcome) = match joined {
                Ok((id, outcome)) => (id, Ok(outcome)),
                Err(e) => (e.id(), Err(e)),
            };
            let Some(unit) = pending.remove(&id) else {
                error!("Completed task {} has no unit mapping", id);
                continue;
            };
            let outcome = outcome.unwrap_or_else(|e| join_failure(&unit, e));

            progress.completed += 1;
            match &outcome {
                ScanOutcome::Success(r) => {
                    progress.success_count += 1;
                    if r.platform_days > 0 {
                        progress.platform_found_count += 1;
                    }
                }
                ScanOutcome::Failure { error, .. } => {
                    progress.error_count += 1;
                    warn!("{}: {}", unit, error);
                }
            }

            if let Some(obs) = observer.as_mut() {
                obs.on_progress(&progress);
            }
            outcomes.push(outcome);
        }

        info!(
            "=== Done: {} units | {} ok | {} errors | {} with platform ===",
            total, progress.success_count, progress.error_count, progress.platform_found_count
        );

        Ok(BatchSummary {
            backend,
            total,
            success_count: progress.success_count,
            error_count: progress.error_count,
            platform_found_count: progress.platform_found_count,
            outcomes,
        })
    }
}
