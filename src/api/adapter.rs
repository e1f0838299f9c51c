//! Filesystem job API.
//!
//! Users drop JSON job files into `<api>/new/`; the adapter validates them
//! against `<api>/../users/<user>.json`, assigns internal ids and revisions,
//! moves the file to `pending/` (mirroring it to `introduced/`), and hands a
//! [`JobMetadata`] to the scheduler. Finished jobs travel the other way:
//! the pending file is merged with a `result` object and lands in `done/`.
//!
//! Ingestion is serialized under a single mutex. The adapter never takes the
//! process down over user input: every failure class warns and skips.

use std::path::{Path, PathBuf};

use parking_lot::Mutex;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use serde_json::{json, Value};
use tokio::sync::mpsc;

use crate::api::description::{Application, JobDescription, JobMetadata, JobResult};
use crate::api::registry::{JobImage, JobRegistry};
use crate::config::ProcessConfig;
use crate::error::IngestError;
use crate::terminator::Terminator;
use crate::util::durations::parse_duration;
use crate::util::timer;

/// Which API subdirectory a job file currently lives in.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Status {
    New,
    Pending,
    Introduced,
    Done,
}

impl Status {
    fn dir(self) -> &'static str {
        match self {
            Status::New => "new",
            Status::Pending => "pending",
            Status::Introduced => "introduced",
            Status::Done => "done",
        }
    }
}

struct Inner {
    registry: JobRegistry,
    jitter_rng: StdRng,
}

pub struct JobFileAdapter {
    base_path: PathBuf,
    config: ProcessConfig,
    inner: Mutex<Inner>,
    new_job_tx: mpsc::UnboundedSender<JobMetadata>,
    terminator: Terminator,
}

impl JobFileAdapter {
    pub fn new(
        config: ProcessConfig,
        terminator: Terminator,
    ) -> (Self, mpsc::UnboundedReceiver<JobMetadata>) {
        let (tx, rx) = mpsc::unbounded_channel();
        let base_path = config.api_dir.clone();
        for status in [Status::New, Status::Pending, Status::Introduced, Status::Done] {
            let _ = std::fs::create_dir_all(base_path.join(status.dir()));
        }
        let jitter_rng = match config.jitter_seed {
            Some(seed) => StdRng::seed_from_u64(seed),
            None => StdRng::from_entropy(),
        };
        let adapter = Self {
            base_path,
            config,
            inner: Mutex::new(Inner {
                registry: JobRegistry::new(),
                jitter_rng,
            }),
            new_job_tx: tx,
            terminator,
        };
        (adapter, rx)
    }

    /// A file appeared in `new/`.
    pub fn handle_new_job(&self, file_name: &str) {
        if self.terminator.is_set() {
            return;
        }
        tracing::debug!(file = file_name, "New job file event");
        match self.ingest(file_name) {
            Ok(Some(metadata)) => {
                let _ = self.new_job_tx.send(metadata);
            }
            Ok(None) => {}
            Err(e) => {
                tracing::warn!(file = file_name, error = %e, "Ignoring job file");
            }
        }
    }

    fn ingest(&self, file_name: &str) -> Result<Option<JobMetadata>, IngestError> {
        let mut inner = self.inner.lock();

        let event_file = self.file_path(Status::New, file_name);
        if !event_file.is_file() {
            // File vanished between the event and the read.
            tracing::debug!(file = %event_file.display(), "Job file does not exist (any more)");
            return Ok(None);
        }
        let content = std::fs::read_to_string(&event_file)
            .map_err(|e| IngestError::NotFound(e.to_string()))?;
        let j: Value = serde_json::from_str(&content)?;

        let user = required_str(&j, "user")?;
        let name = required_str(&j, "name")?;
        let job_name = format!("{user}.{name}.json");

        // Cross-check the user definition.
        let user_file = self.user_file_path(&user);
        let user_json: Value = std::fs::read_to_string(&user_file)
            .map_err(|_| IngestError::NotFound(format!("unknown user '{user}'")))
            .and_then(|c| serde_json::from_str(&c).map_err(IngestError::Parse))?;
        let user_id = required_str(&user_json, "id")?;
        if user_id != user {
            return Err(IngestError::Validation(format!(
                "user file {} has inconsistent user id",
                user_file.display()
            )));
        }
        let user_prio = user_json
            .get("priority")
            .and_then(Value::as_f64)
            .ok_or_else(|| IngestError::Validation("user file has no numeric priority".into()))?;

        let arrival = j
            .get("arrival")
            .and_then(Value::as_f64)
            .unwrap_or_else(timer::elapsed_seconds);
        let incremental = j.get("incremental").and_then(Value::as_bool).unwrap_or(false);

        let (id, revision) = if incremental && j.get("precursor").is_some() {
            // A new increment of a former job: inherit its internal id.
            let precursor_name = format!("{}.json", required_str(&j, "precursor")?);
            let Some((id, rev)) = inner.registry.lookup(&precursor_name) else {
                return Err(IngestError::NotFound(format!(
                    "unknown precursor job '{precursor_name}'"
                )));
            };

            if j.get("done").and_then(Value::as_bool).unwrap_or(false) {
                // The incremental job is reported done: tear down its
                // registry entries and deliver a terminator description.
                tracing::info!(id, "Incremental job is done");
                inner.registry.erase_job(&precursor_name, id);
                let metadata = JobMetadata {
                    description: JobDescription::new(id, 0.0, true),
                    file: String::new(),
                    dependencies: Vec::new(),
                    done: true,
                };
                let _ = std::fs::remove_file(&event_file);
                return Ok(Some(metadata));
            }

            let next = rev + 1;
            inner.registry.bump_revision(&job_name, id, next);
            inner.registry.insert_image(
                next,
                JobImage {
                    id,
                    user_qualified_name: job_name.clone(),
                    arrival,
                    incremental: true,
                },
            );
            (id, next)
        } else {
            let id = inner.registry.resolve_or_mint(&job_name);
            if inner.registry.has_image(id, 0) {
                return Err(IngestError::Validation(format!(
                    "job '{job_name}' was already ingested"
                )));
            }
            inner.registry.insert_image(
                0,
                JobImage {
                    id,
                    user_qualified_name: job_name.clone(),
                    arrival,
                    incremental,
                },
            );
            (id, 0)
        };

        // Move the original to pending/ and mirror it to introduced/.
        self.write_json_atomic(&self.job_file_path(Status::Pending, &job_name), &j)
            .map_err(|e| IngestError::Validation(e.to_string()))?;
        self.write_json_atomic(&self.job_file_path(Status::Introduced, &job_name), &j)
            .map_err(|e| IngestError::Validation(e.to_string()))?;
        let _ = std::fs::remove_file(&event_file);

        // Seal the description.
        let mut priority = user_prio * j.get("priority").and_then(Value::as_f64).unwrap_or(1.0);
        if self.config.jitter_priorities {
            priority *= 0.99 + 0.01 * inner.jitter_rng.gen::<f64>();
        }
        let mut desc = JobDescription::new(id, priority, incremental);
        desc.revision = revision;
        desc.arrival = arrival;
        if let Some(limit) = j.get("wallclock-limit").and_then(parse_duration) {
            desc.wallclock_limit = limit;
            tracing::debug!(id, limit, "Wallclock limit");
        }
        if let Some(limit) = j.get("cpu-limit").and_then(parse_duration) {
            desc.cpu_limit = limit;
            tracing::debug!(id, limit, "CPU limit");
        }
        if let Some(max_demand) = j.get("max-demand").and_then(Value::as_u64) {
            desc.max_demand = max_demand as usize;
        }
        if let Some(app) = j.get("application").and_then(Value::as_str) {
            desc.application = if app == "SAT" {
                Application::Sat
            } else {
                Application::Dummy
            };
        }

        let file = j
            .get("file")
            .and_then(Value::as_str)
            .unwrap_or("NONE")
            .to_string();

        // Translate named dependencies to (forward-declared) internal ids.
        let mut dependencies = Vec::new();
        if let Some(deps) = j.get("dependencies").and_then(Value::as_array) {
            for dep in deps.iter().filter_map(Value::as_str) {
                let dep_name = format!("{dep}.json");
                dependencies.push(inner.registry.resolve_or_mint(&dep_name));
            }
        }

        tracing::info!(id, revision, name = %job_name, priority, "Ingested job file");
        Ok(Some(JobMetadata {
            description: desc,
            file,
            dependencies,
            done: false,
        }))
    }

    /// A job finished: merge the result into its pending file and move it
    /// to `done/`.
    pub fn handle_job_done(&self, result: &JobResult) {
        if self.terminator.is_set() {
            return;
        }
        let inner = self.inner.lock();

        let Some(image) = inner.registry.image(result.id, result.revision).cloned() else {
            tracing::warn!(id = result.id, revision = result.revision, "Done event for unknown job");
            return;
        };
        drop(inner);

        let pending = self
            .base_path
            .join(Status::Pending.dir())
            .join(&image.user_qualified_name);
        tracing::info!(id = result.id, revision = result.revision, file = %pending.display(),
            "Job done event");
        if !pending.is_file() {
            tracing::warn!(file = %pending.display(), "Pending job file gone");
            return;
        }
        let mut j: Value = match std::fs::read_to_string(&pending)
            .map_err(|e| e.to_string())
            .and_then(|c| serde_json::from_str(&c).map_err(|e| e.to_string()))
        {
            Ok(v) => v,
            Err(e) => {
                tracing::warn!(file = %pending.display(), error = %e, "Parse error on pending file");
                return;
            }
        };

        j["result"] = json!({
            "resultcode": result.result.code(),
            "resultstring": result.result.as_str(),
            "revision": result.revision,
            "solution": result.solution,
            "responsetime": timer::elapsed_seconds() - image.arrival,
        });

        let done = self
            .base_path
            .join(Status::Done.dir())
            .join(&image.user_qualified_name);
        if let Err(e) = self.write_json_atomic(&done, &j) {
            tracing::warn!(file = %done.display(), error = %e, "Failed to write done file");
            return;
        }
        let _ = std::fs::remove_file(&pending);
    }

    /// A result file in `done/` was deleted by its consumer.
    pub fn handle_result_deleted(&self, file_name: &str) {
        if self.terminator.is_set() {
            return;
        }
        let mut inner = self.inner.lock();

        let job_name = file_name.trim_end_matches('\0');
        let Some((id, rev)) = inner.registry.lookup(job_name) else {
            tracing::warn!(name = job_name, "Cannot clean up job: not known");
            return;
        };
        if inner
            .registry
            .image(id, rev)
            .map(|img| img.incremental)
            .unwrap_or(false)
        {
            return; // incremental jobs stay registered until their done-notification
        }
        inner.registry.erase_revision(job_name);
        tracing::debug!(name = job_name, "Cleaned up job entry");
    }

    /// Internal id and latest revision for a user-qualified name, if known.
    pub fn lookup(&self, job_name: &str) -> Option<(u32, u32)> {
        self.inner.lock().registry.lookup(job_name)
    }

    /// Cross-check a written `done/` file against the in-memory result.
    pub fn verify_done_file(&self, result: &JobResult) -> bool {
        let inner = self.inner.lock();
        let Some(image) = inner.registry.image(result.id, result.revision) else {
            return false;
        };
        let done = self
            .base_path
            .join(Status::Done.dir())
            .join(&image.user_qualified_name);
        drop(inner);
        let Ok(content) = std::fs::read_to_string(&done) else {
            return false;
        };
        let Ok(j) = serde_json::from_str::<Value>(&content) else {
            return false;
        };
        j.get("result")
            .and_then(|r| r.get("resultcode"))
            .and_then(Value::as_i64)
            == Some(result.result.code() as i64)
    }

    fn file_path(&self, status: Status, file_name: &str) -> PathBuf {
        self.base_path.join(status.dir()).join(file_name)
    }

    fn job_file_path(&self, status: Status, user_qualified_name: &str) -> PathBuf {
        self.base_path.join(status.dir()).join(user_qualified_name)
    }

    fn user_file_path(&self, user: &str) -> PathBuf {
        self.base_path.join("..").join("users").join(format!("{user}.json"))
    }

    /// Temp-then-rename so readers never observe a partial file.
    fn write_json_atomic(&self, path: &Path, value: &Value) -> std::io::Result<()> {
        let tmp = path.with_extension("tmp");
        std::fs::write(&tmp, serde_json::to_string_pretty(value)?)?;
        std::fs::rename(&tmp, path)
    }
}

fn required_str(j: &Value, field: &str) -> Result<String, IngestError> {
    j.get(field)
        .and_then(Value::as_str)
        .map(str::to_string)
        .ok_or_else(|| IngestError::Validation(format!("missing essential field '{field}'")))
}
