//! Child side of the process backend: one JSON request on stdin, one JSON
//! `ScanOutcome` on stdout.

use super::runner::scan_unit;
use crate::errors::ErrorKind;
use crate::models::{ScanOutcome, ScanUnit};
use crate::platform::{PlatformClassifier, PlatformConfig};
use crate::storage::StoreSource;
use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::io::{Read, Write};
use tracing::debug;

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct WorkerRequest {
    pub unit: ScanUnit,
    pub source: StoreSource,
    pub config: PlatformConfig,
}

/// Rebuild store and classifier from the request and scan its unit.
pub fn handle_request(request: WorkerRequest) -> ScanOutcome {
    let WorkerRequest { unit, source, config } = request;

    let store = match source.open() {
        Ok(store) => store,
        Err(e) => return ScanOutcome::failure(&unit, ErrorKind::DataUnavailable(format!("{:#}", e))),
    };
    let classifier = match PlatformClassifier::new(config) {
        Ok(c) => c,
        Err(e) => return ScanOutcome::failure(&unit, ErrorKind::ComputationError(format!("{:#}", e))),
    };

    scan_unit(store.as_ref(), &classifier, &unit)
}

pub fn run_worker(input: impl Read, mut output: impl Write) -> Result<()> {
    let request: WorkerRequest = serde_json::from_reader(input).context("Invalid worker request")?;
    debug!("worker: scanning {}", request.unit);

    let outcome = handle_request(request);
    serde_json::to_writer(&mut output, &outcome).context("Failed to write worker outcome")?;
    output.write_all(b"\n")?;
    output.flush()?;
    Ok(())
}
