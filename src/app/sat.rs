//! The SAT application: cube-and-conquer over the job tree.
//!
//! At tree index 0 the job hosts the cube root (generator manager) plus
//! local workers; every other node hosts workers only. Failed cubes flow
//! up to the root; their blocking clauses flow back down through the
//! clause exchange buffer so workers can skip doomed cubes.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::JoinHandle;

use parking_lot::Mutex;

use crate::api::description::{JobId, SatResult};
use crate::app::AppJob;
use crate::comm::message::{JobMessage, MessageTag, Rank};
use crate::config::ProcessConfig;
use crate::cube::root::CubeRoot;
use crate::cube::worker::{CubeWorker, WorkerRequest, WorkerState};
use crate::cube::{deserialize_cubes, serialize_cubes, Cube, SharedResult};
use crate::job::tree::JobTree;
use crate::solver::clauses::{ClauseBuffer, ClauseBufferReader};
use crate::solver::create_solver;

/// Budget in integers for one clause-exchange selection.
const CLAUSE_EXCHANGE_BUDGET: usize = 1000;

struct SatCore {
    root: Option<CubeRoot>,
    workers: Vec<CubeWorker>,
}

pub struct SatJob {
    job_id: JobId,
    config: ProcessConfig,
    is_root: bool,
    result: SharedResult,
    core: Arc<Mutex<Option<SatCore>>>,
    initialized: Arc<AtomicBool>,
    abort_before_init: Arc<AtomicBool>,
    destructible: Arc<AtomicBool>,
    init_thread: Option<JoinHandle<()>>,
    cleanup_thread: Option<JoinHandle<()>>,
    clause_buffer: Arc<ClauseBuffer>,
    /// Ranks whose cube requests could not be served yet (root only).
    pending_remote_requests: VecDeque<Rank>,
    /// Local worker indices waiting for cubes (root only).
    pending_local_requests: VecDeque<usize>,
    reported: bool,
}

impl SatJob {
    pub fn new(job_id: JobId, config: ProcessConfig, is_root: bool) -> Self {
        Self {
            job_id,
            config,
            is_root,
            result: SharedResult::new(),
            core: Arc::new(Mutex::new(None)),
            initialized: Arc::new(AtomicBool::new(false)),
            abort_before_init: Arc::new(AtomicBool::new(false)),
            destructible: Arc::new(AtomicBool::new(false)),
            init_thread: None,
            cleanup_thread: None,
            clause_buffer: Arc::new(ClauseBuffer::new()),
            pending_remote_requests: VecDeque::new(),
            pending_local_requests: VecDeque::new(),
            reported: false,
        }
    }

    /// Initialization runs on its own thread so a large formula never
    /// stalls the scheduler loop. An interrupt arriving before the thread
    /// finishes sets `abort_before_init`; the initializer observes it and
    /// tears straight down.
    fn spawn_init(&mut self, payload: Arc<Vec<i32>>, threads: usize) {
        let job_id = self.job_id;
        let config = self.config.clone();
        let is_root = self.is_root;
        let result = self.result.clone();
        let core = self.core.clone();
        let initialized = self.initialized.clone();
        let abort = self.abort_before_init.clone();
        let destructible = self.destructible.clone();

        self.init_thread = Some(std::thread::spawn(move || {
            if abort.load(Ordering::Acquire) {
                destructible.store(true, Ordering::Release);
                return;
            }

            let root = is_root.then(|| CubeRoot::start(&config, payload.clone(), result.clone()));

            let mut workers = Vec::with_capacity(threads);
            for slot in 0..threads {
                let mut worker = CubeWorker::new(result.clone());
                worker.start(payload.clone(), create_solver(&config.satsolver, slot));
                workers.push(worker);
            }

            let mut built = SatCore { root, workers };
            if abort.load(Ordering::Acquire) {
                // Aborted while we were building: tear down immediately.
                tear_down(&mut built);
                destructible.store(true, Ordering::Release);
                return;
            }

            *core.lock() = Some(built);
            initialized.store(true, Ordering::Release);
            tracing::debug!(job_id, threads, is_root, "SAT application initialized");
        }));
    }

    /// Serve queued cube requests once the frontier has cubes again.
    fn drain_pending_requests(
        &mut self,
        core: &mut SatCore,
        out: &mut Vec<(Rank, JobMessage)>,
    ) {
        let Some(root) = core.root.as_ref() else {
            return;
        };
        while let Some(&worker_idx) = self.pending_local_requests.front() {
            let cubes = root.take_cubes(self.config.cubes_per_request);
            if cubes.is_empty() {
                return;
            }
            self.pending_local_requests.pop_front();
            if let Some(worker) = core.workers.get(worker_idx) {
                worker.digest_send_cubes(cubes);
            }
        }
        while let Some(&rank) = self.pending_remote_requests.front() {
            let cubes = root.take_cubes(self.config.cubes_per_request);
            if cubes.is_empty() {
                return;
            }
            self.pending_remote_requests.pop_front();
            out.push((
                rank,
                JobMessage {
                    job_id: self.job_id,
                    tag: MessageTag::SendCubes,
                    payload: serialize_cubes(&cubes),
                },
            ));
        }
    }

    /// Failed cubes reached the root: retire them and remember their
    /// blocking clauses for downward export.
    fn digest_failed_at_root(&mut self, core: &mut SatCore, cubes: Vec<Cube>) {
        for cube in &cubes {
            let clause = cube.to_blocking_clause();
            // Strip the terminating 0 for the exchange buffer.
            self.clause_buffer.add_clause(&clause[..clause.len() - 1]);
        }
        if let Some(root) = core.root.as_ref() {
            root.digest_failed_cubes(cubes);
        }
    }

    /// Spread received failed-cube clauses to local workers and queue them
    /// for the next hop down the tree.
    fn import_clauses(&mut self, core: &mut SatCore, block: &[i32]) {
        let mut reader = ClauseBufferReader::new(block);
        let mut clause = Vec::new();
        let mut failed = Vec::new();
        while reader.next_clause(&mut clause) {
            failed.push(Cube::new(clause.iter().map(|l| -l).collect()));
            self.clause_buffer.add_clause(&clause);
        }
        for worker in &core.workers {
            worker.add_known_failed(failed.clone());
        }
    }

    fn message(&self, tag: MessageTag, payload: Vec<i32>) -> JobMessage {
        JobMessage {
            job_id: self.job_id,
            tag,
            payload,
        }
    }
}

fn tear_down(core: &mut SatCore) {
    if let Some(root) = core.root.as_ref() {
        root.interrupt();
    }
    for worker in &core.workers {
        worker.interrupt();
    }
    if let Some(root) = core.root.as_mut() {
        root.join();
    }
    for worker in &mut core.workers {
        worker.join();
    }
}

impl AppJob for SatJob {
    fn appl_start(&mut self, payload: Arc<Vec<i32>>, threads: usize) {
        self.spawn_init(payload, threads);
    }

    fn appl_suspend(&mut self) {
        if let Some(core) = self.core.lock().as_ref() {
            if let Some(root) = core.root.as_ref() {
                root.suspend();
            }
            for worker in &core.workers {
                worker.suspend();
            }
        }
    }

    fn appl_resume(&mut self) {
        if let Some(core) = self.core.lock().as_ref() {
            if let Some(root) = core.root.as_ref() {
                root.resume();
            }
            for worker in &core.workers {
                worker.resume();
            }
        }
    }

    fn appl_interrupt(&mut self) {
        if self.initialized.load(Ordering::Acquire) {
            if let Some(core) = self.core.lock().as_ref() {
                if let Some(root) = core.root.as_ref() {
                    root.interrupt();
                }
                for worker in &core.workers {
                    worker.interrupt();
                }
            }
        } else {
            // Initialization still pending (or never requested): make the
            // initializer bail out.
            self.abort_before_init.store(true, Ordering::Release);
        }
    }

    fn appl_restart(&mut self, payload: Arc<Vec<i32>>, threads: usize) {
        self.appl_interrupt();
        if let Some(handle) = self.init_thread.take() {
            let _ = handle.join();
        }
        if let Some(mut core) = self.core.lock().take() {
            tear_down(&mut core);
        }
        self.initialized.store(false, Ordering::Release);
        self.abort_before_init.store(false, Ordering::Release);
        self.destructible.store(false, Ordering::Release);
        self.result = SharedResult::new();
        self.reported = false;
        self.pending_local_requests.clear();
        self.pending_remote_requests.clear();
        self.spawn_init(payload, threads);
    }

    fn appl_terminate(&mut self) {
        self.appl_interrupt();
        let core = self.core.clone();
        let destructible = self.destructible.clone();
        let init_thread = self.init_thread.take();
        self.cleanup_thread = Some(std::thread::spawn(move || {
            if let Some(handle) = init_thread {
                let _ = handle.join();
            }
            if let Some(mut built) = core.lock().take() {
                tear_down(&mut built);
            }
            destructible.store(true, Ordering::Release);
        }));
    }

    fn appl_wants_to_communicate(&self) -> bool {
        if !self.initialized.load(Ordering::Acquire) {
            return false;
        }
        if !self.pending_local_requests.is_empty() || !self.pending_remote_requests.is_empty() {
            return true;
        }
        self.core
            .lock()
            .as_ref()
            .map(|core| core.workers.iter().any(|w| w.wants_to_communicate()))
            .unwrap_or(false)
    }

    fn appl_begin_communication(&mut self, tree: &JobTree) -> Vec<(Rank, JobMessage)> {
        let mut out = Vec::new();
        let core = self.core.clone();
        let mut guard = core.lock();
        let Some(core) = guard.as_mut() else {
            return out;
        };

        for idx in 0..core.workers.len() {
            let Some(request) = core.workers[idx].begin_communication() else {
                continue;
            };
            match request {
                WorkerRequest::RequestCubes => {
                    if self.is_root {
                        self.pending_local_requests.push_back(idx);
                    } else {
                        out.push((
                            tree.root_rank(),
                            self.message(MessageTag::RequestCubes, Vec::new()),
                        ));
                    }
                }
                WorkerRequest::ReturnFailedCubes(cubes) => {
                    if self.is_root {
                        self.digest_failed_at_root(core, cubes);
                        core.workers[idx].digest_received_failed_cubes();
                    } else {
                        out.push((
                            tree.root_rank(),
                            self.message(MessageTag::ReturnFailedCubes, serialize_cubes(&cubes)),
                        ));
                    }
                }
            }
        }

        if self.is_root {
            // Let the frontier track the audience it feeds: local workers
            // plus whatever remote nodes are currently asking.
            if let Some(root) = core.root.as_ref() {
                let audience = core.workers.len() + self.pending_remote_requests.len() + 1;
                root.set_target_frontier(2 * audience * self.config.cubes_per_request);
            }
            self.drain_pending_requests(core, &mut out);
        }

        // Periodically push learned blocking clauses toward the children.
        // The selection is destructive, so only take one when somebody is
        // there to receive it.
        let children: Vec<Rank> = tree.child_ranks().collect();
        if !children.is_empty() && self.clause_buffer.bucketed_literals() > 0 {
            let (block, count) = self.clause_buffer.give_selection(CLAUSE_EXCHANGE_BUDGET);
            if count > 0 {
                for child in children {
                    out.push((child, self.message(MessageTag::ExportClauses, block.clone())));
                }
            }
        }

        out
    }

    fn appl_communicate(
        &mut self,
        source: Rank,
        msg: JobMessage,
        _tree: &JobTree,
    ) -> Vec<(Rank, JobMessage)> {
        let mut out = Vec::new();
        let core = self.core.clone();
        let mut guard = core.lock();
        let Some(core) = guard.as_mut() else {
            return out;
        };

        match msg.tag {
            MessageTag::RequestCubes => {
                if !self.is_root {
                    tracing::warn!(job_id = self.job_id, source, "Cube request at non-root node");
                    return out;
                }
                self.pending_remote_requests.push_back(source);
                self.drain_pending_requests(core, &mut out);
            }
            MessageTag::SendCubes => {
                let cubes = deserialize_cubes(&msg.payload);
                if let Some(worker) = core
                    .workers
                    .iter()
                    .find(|w| w.state() == WorkerState::Requesting)
                {
                    worker.digest_send_cubes(cubes);
                }
            }
            MessageTag::ReturnFailedCubes => {
                if !self.is_root {
                    tracing::warn!(job_id = self.job_id, source, "Failed cubes at non-root node");
                    return out;
                }
                let cubes = deserialize_cubes(&msg.payload);
                tracing::debug!(job_id = self.job_id, count = cubes.len(), source,
                    "Root received failed cubes");
                self.digest_failed_at_root(core, cubes);
                out.push((source, self.message(MessageTag::ReceivedFailedCubes, Vec::new())));
            }
            MessageTag::ReceivedFailedCubes => {
                if let Some(worker) = core
                    .workers
                    .iter()
                    .find(|w| w.state() == WorkerState::Returning)
                {
                    worker.digest_received_failed_cubes();
                }
            }
            MessageTag::ExportClauses => {
                self.import_clauses(core, &msg.payload);
            }
        }
        out
    }

    fn appl_solve_loop(&mut self) -> Option<(SatResult, Vec<i32>)> {
        if self.reported || !self.initialized.load(Ordering::Acquire) {
            return None;
        }
        let (result, solution) = self.result.get()?;
        self.reported = true;
        Some((result, solution))
    }

    fn appl_is_destructible(&self) -> bool {
        self.destructible.load(Ordering::Acquire)
    }
}
