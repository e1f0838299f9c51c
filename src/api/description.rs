use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::util::payload_checksum;

pub type JobId = u32;

/// Which application runs this job.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Application {
    Sat,
    Dummy,
}

/// Outcome of one solve attempt, wire-compatible with the SAT convention
/// (0 = unknown, 10 = satisfiable, 20 = unsatisfiable).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum SatResult {
    Unknown,
    Sat,
    Unsat,
}

impl SatResult {
    pub fn code(self) -> i32 {
        match self {
            SatResult::Unknown => 0,
            SatResult::Sat => 10,
            SatResult::Unsat => 20,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            SatResult::Unknown => "UNKNOWN",
            SatResult::Sat => "SAT",
            SatResult::Unsat => "UNSAT",
        }
    }
}

impl std::fmt::Display for SatResult {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Canonical in-memory representation of a submitted job.
///
/// Immutable after sealing except through revisions: an incremental job
/// gains one payload per revision, and `revision` tracks the latest one.
/// The internal id is minted at first sight and never reused.
#[derive(Debug, Clone)]
pub struct JobDescription {
    pub id: JobId,
    pub priority: f64,
    pub arrival: f64,
    /// Wallclock limit in seconds; 0 = none.
    pub wallclock_limit: f64,
    /// CPU-seconds limit; 0 = none.
    pub cpu_limit: f64,
    /// Per-job demand cap; 0 = unbounded.
    pub max_demand: usize,
    pub application: Application,
    pub incremental: bool,
    pub revision: u32,
    /// One zero-terminated literal stream per revision.
    payloads: Vec<Arc<Vec<i32>>>,
    /// Checksum per revision payload, computed when checksumming is on.
    checksums: Vec<u64>,
}

impl JobDescription {
    pub fn new(id: JobId, priority: f64, incremental: bool) -> Self {
        Self {
            id,
            priority,
            arrival: 0.0,
            wallclock_limit: 0.0,
            cpu_limit: 0.0,
            max_demand: 0,
            application: Application::Sat,
            incremental,
            revision: 0,
            payloads: Vec::new(),
            checksums: Vec::new(),
        }
    }

    /// Append the payload for the next revision.
    ///
    /// Revisions are strictly monotonic starting at 0: the payload for
    /// revision r lands at index r.
    pub fn push_payload(&mut self, payload: Vec<i32>) {
        self.checksums.push(payload_checksum(&payload));
        self.payloads.push(Arc::new(payload));
        self.revision = (self.payloads.len() - 1) as u32;
    }

    /// Swap the latest revision's payload for an equivalent copy that took
    /// a different transfer path (shared-memory staging).
    pub fn replace_latest_payload(&mut self, payload: Vec<i32>) {
        if self.payloads.is_empty() {
            self.push_payload(payload);
            return;
        }
        *self.checksums.last_mut().unwrap() = payload_checksum(&payload);
        *self.payloads.last_mut().unwrap() = Arc::new(payload);
    }

    pub fn payload(&self, revision: u32) -> Option<&Arc<Vec<i32>>> {
        self.payloads.get(revision as usize)
    }

    pub fn latest_payload(&self) -> Option<&Arc<Vec<i32>>> {
        self.payloads.last()
    }

    pub fn num_revisions(&self) -> usize {
        self.payloads.len()
    }

    /// Literal count of the latest revision, used against the per-process
    /// size budget.
    pub fn num_formula_literals(&self) -> usize {
        self.latest_payload().map(|p| p.len()).unwrap_or(0)
    }

    /// Verify the stored checksum for a revision against its payload.
    pub fn verify_checksum(&self, revision: u32) -> bool {
        match (
            self.payloads.get(revision as usize),
            self.checksums.get(revision as usize),
        ) {
            (Some(p), Some(c)) => payload_checksum(p) == *c,
            _ => false,
        }
    }
}

/// A finished (or timed-out) job as reported back through the adapter.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JobResult {
    pub id: JobId,
    pub revision: u32,
    pub result: SatResult,
    pub solution: Vec<i32>,
}

impl JobResult {
    pub fn unknown(id: JobId, revision: u32) -> Self {
        Self {
            id,
            revision,
            result: SatResult::Unknown,
            solution: Vec::new(),
        }
    }
}

/// What the adapter delivers for each ingested job file.
#[derive(Debug, Clone)]
pub struct JobMetadata {
    pub description: JobDescription,
    /// Formula file path, or "NONE".
    pub file: String,
    /// Internal ids this job depends on (forward-declared if unseen).
    pub dependencies: Vec<JobId>,
    /// True for the synthesized terminator of an incremental job.
    pub done: bool,
}
