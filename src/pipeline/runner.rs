//! Task execution strategies. One runner is chosen per batch; every unit is
//! then executed through it.

use super::worker::WorkerRequest;
use crate::errors::ErrorKind;
use crate::models::{ScanOutcome, ScanUnit};
use crate::platform::{PlatformClassifier, PlatformConfig};
use crate::storage::{SeriesStore, StoreSource};
use anyhow::{bail, Context, Result};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::process::Stdio;
use std::sync::Arc;
use tokio::io::AsyncWriteExt;
use tokio::process::Command;
use tokio::task::JoinError;
use tracing::{debug, info, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, clap::ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum Backend {
    /// One child process per unit.
    Process,
    /// Blocking-thread pool inside this process.
    Thread,
}

impl std::fmt::Display for Backend {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Process => f.write_str("process"),
            Self::Thread => f.write_str("thread"),
        }
    }
}

/// Fetch, extract, classify and summarize one unit in the current thread.
///
/// Both runners end up here, and so does `inspect`.
pub fn scan_unit(store: &dyn SeriesStore, classifier: &PlatformClassifier, unit: &ScanUnit) -> ScanOutcome {
    match store.fetch(&unit.symbol, unit.start_date, unit.end_date) {
        Ok(series) => {
            let result = classifier.summarize(unit, &series);
            debug!("{}: {}/{} platform days", unit, result.platform_days, result.total_days);
            ScanOutcome::Success(result)
        }
        Err(e) => ScanOutcome::failure(unit, e),
    }
}

/// Runs one unit to completion. Never fails: errors become `Failure`.
#[async_trait]
pub trait TaskRunner: Send + Sync {
    fn backend(&self) -> Backend;
    async fn execute(&self, unit: ScanUnit) -> ScanOutcome;
}

fn panic_message(err: JoinError) -> String {
    if err.is_cancelled() {
        return "task cancelled".to_string();
    }
    let payload = err.into_panic();
    if let Some(s) = payload.downcast_ref::<&str>() {
        format!("panic: {}", s)
    } else if let Some(s) = payload.downcast_ref::<String>() {
        format!("panic: {}", s)
    } else {
        "panic with non-string payload".to_string()
    }
}

pub(crate) fn join_failure(unit: &ScanUnit, err: JoinError) -> ScanOutcome {
    ScanOutcome::failure(unit, ErrorKind::ComputationError(panic_message(err)))
}

// ── Thread runner ─────────────────────────────────────────────────────────────

pub struct ThreadRunner {
    store: Arc<dyn SeriesStore>,
    classifier: Arc<PlatformClassifier>,
}

impl ThreadRunner {
    pub fn probe(
        store: Arc<dyn SeriesStore>,
        classifier: Arc<PlatformClassifier>,
        parallelism: usize,
    ) -> Result<Self, ErrorKind> {
        if parallelism == 0 {
            return Err(ErrorKind::ParallelBackendUnavailable("parallelism is 0".into()));
        }
        tokio::runtime::Handle::try_current()
            .map_err(|e| ErrorKind::ParallelBackendUnavailable(format!("no tokio runtime: {}", e)))?;
        Ok(Self { store, classifier })
    }
}

#[async_trait]
impl TaskRunner for ThreadRunner {
    fn backend(&self) -> Backend {
        Backend::Thread
    }

    async fn execute(&self, unit: ScanUnit) -> ScanOutcome {
        let store = Arc::clone(&self.store);
        let classifier = Arc::clone(&self.classifier);
        let task_unit = unit.clone();

        tokio::task::spawn_blocking(move || scan_unit(store.as_ref(), &classifier, &task_unit))
            .await
            .unwrap_or_else(|e| join_failure(&unit, e))
    }
}

// ── Process runner ────────────────────────────────────────────────────────────

/// Runs one worker command per unit. `probe` points it at the current
/// executable's `worker` subcommand.
pub struct ProcessRunner {
    exe: PathBuf,
    args: Vec<String>,
    source: StoreSource,
    config: PlatformConfig,
}

impl ProcessRunner {
    /// `exe args…` must read a `WorkerRequest` on stdin and answer with one
    /// `ScanOutcome` on stdout.
    pub fn new(exe: impl Into<PathBuf>, args: Vec<String>, source: StoreSource, config: PlatformConfig) -> Self {
        Self { exe: exe.into(), args, source, config }
    }

    /// Succeeds only when a child can rebuild the same store and classifier
    /// and the executable answers `--version`.
    pub async fn probe(
        store: &dyn SeriesStore,
        classifier: &PlatformClassifier,
        parallelism: usize,
    ) -> Result<Self, ErrorKind> {
        let unavailable = ErrorKind::ParallelBackendUnavailable;

        if parallelism == 0 {
            return Err(unavailable("parallelism is 0".into()));
        }
        if !classifier.is_portable() {
            return Err(unavailable("classifier has in-process predicates".into()));
        }
        let source = store
            .source()
            .ok_or_else(|| unavailable("store cannot be reopened by a child process".into()))?;
        let exe = std::env::current_exe()
            .map_err(|e| unavailable(format!("cannot resolve current executable: {}", e)))?;

        let status = Command::new(&exe)
            .arg("--version")
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .status()
            .await
            .map_err(|e| unavailable(format!("cannot spawn {:?}: {}", exe, e)))?;
        if !status.success() {
            return Err(unavailable(format!("{:?} --version exited with {}", exe, status)));
        }

        Ok(Self::new(exe, vec!["worker".into()], source, classifier.config().clone()))
    }

    async fn spawn(&self, unit: &ScanUnit) -> Result<ScanOutcome> {
        let request = WorkerRequest {
            unit: unit.clone(),
            source: self.source.clone(),
            config: self.config.clone(),
        };
        let payload = serde_json::to_vec(&request)?;

        let mut child = Command::new(&self.exe)
            .args(&self.args)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::inherit())
            .kill_on_drop(true)
            .spawn()
            .with_context(|| format!("spawn worker {:?} for {}", self.exe, unit))?;

        if let Some(mut stdin) = child.stdin.take() {
            stdin.write_all(&payload).await.context("write worker request")?;
        }

        let output = child.wait_with_output().await.context("wait for worker")?;
        if !output.status.success() {
            bail!("worker exited with {}", output.status);
        }

        let outcome: ScanOutcome =
            serde_json::from_slice(&output.stdout).context("unparseable worker output")?;
        if outcome.unit() != *unit {
            bail!("worker answered for {} instead", outcome.unit());
        }
        Ok(outcome)
    }
}

#[async_trait]
impl TaskRunner for ProcessRunner {
    fn backend(&self) -> Backend {
        Backend::Process
    }

    async fn execute(&self, unit: ScanUnit) -> ScanOutcome {
        match self.spawn(&unit).await {
            Ok(outcome) => outcome,
            Err(e) => ScanOutcome::failure(&unit, ErrorKind::ComputationError(format!("{:#}", e))),
        }
    }
}

// ── Selection ─────────────────────────────────────────────────────────────────

/// Pick the runner for a whole batch. A failed process probe falls back to
/// threads once; a failed thread probe is fatal.
pub async fn select_runner(
    preferred: Backend,
    store: Arc<dyn SeriesStore>,
    classifier: Arc<PlatformClassifier>,
    parallelism: usize,
) -> Result<Arc<dyn TaskRunner>, ErrorKind> {
    if preferred == Backend::Process {
        match ProcessRunner::probe(store.as_ref(), &classifier, parallelism).await {
            Ok(runner) => {
                info!("Using process backend ({} workers)", parallelism);
                return Ok(Arc::new(runner));
            }
            Err(e) => warn!("{}; falling back to thread backend", e),
        }
    }

    let runner = ThreadRunner::probe(store, classifier, parallelism)?;
    info!("Using thread backend ({} workers)", parallelism);
    Ok(Arc::new(runner))
}
