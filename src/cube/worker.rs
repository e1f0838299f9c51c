//! Cube worker: solves assigned cubes, collects failed ones.
//!
//! One worker per solver thread at every tree node (the root included). The
//! worker thread sleeps on a condvar until cubes arrive, works through
//! them, then hands its failed cubes back to the root through the job's
//! communication path.

use std::sync::Arc;
use std::thread::JoinHandle;

use parking_lot::{Condvar, Mutex};

use crate::api::description::SatResult;
use crate::cube::{Cube, SharedResult};
use crate::solver::{SolverAdapter, Suspender};
use crate::terminator::Terminator;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WorkerState {
    Idling,
    Waiting,
    Requesting,
    Working,
    Failed,
    Returning,
    Solved,
}

/// What the worker wants sent on the next communication opportunity.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WorkerRequest {
    RequestCubes,
    ReturnFailedCubes(Vec<Cube>),
}

struct Inner {
    state: WorkerState,
    local_cubes: Vec<Cube>,
    /// Failed cubes found here, pending return to the root.
    failed_cubes: Vec<Cube>,
    /// Failed cubes learned from elsewhere in the tree; skip-check only.
    known_failed: Vec<Cube>,
}

struct Shared {
    inner: Mutex<Inner>,
    cond: Condvar,
}

pub struct CubeWorker {
    shared: Arc<Shared>,
    terminator: Terminator,
    suspender: Suspender,
    result: SharedResult,
    thread: Option<JoinHandle<()>>,
}

impl CubeWorker {
    pub fn new(result: SharedResult) -> Self {
        Self {
            shared: Arc::new(Shared {
                inner: Mutex::new(Inner {
                    state: WorkerState::Idling,
                    local_cubes: Vec::new(),
                    failed_cubes: Vec::new(),
                    known_failed: Vec::new(),
                }),
                cond: Condvar::new(),
            }),
            terminator: Terminator::new(),
            suspender: Suspender::new(),
            result,
            thread: None,
        }
    }

    /// Feed the formula into the solver and start the worker thread.
    pub fn start(&mut self, formula: Arc<Vec<i32>>, mut solver: Box<dyn SolverAdapter>) {
        solver.set_terminator(self.terminator.clone());
        solver.set_suspender(self.suspender.clone());
        for &lit in formula.iter() {
            solver.add_literal(lit);
        }

        let shared = self.shared.clone();
        let terminator = self.terminator.clone();
        let result = self.result.clone();
        self.thread = Some(std::thread::spawn(move || {
            main_loop(shared, terminator, result, solver);
        }));
    }

    pub fn state(&self) -> WorkerState {
        self.shared.inner.lock().state
    }

    /// True while the worker waits to request cubes or to return failures.
    pub fn wants_to_communicate(&self) -> bool {
        matches!(self.state(), WorkerState::Waiting | WorkerState::Failed)
    }

    /// Claim the pending communication, advancing the state machine.
    ///
    /// `wants_to_communicate` may report true repeatedly; the transition
    /// happens exactly once per message here.
    pub fn begin_communication(&self) -> Option<WorkerRequest> {
        let mut inner = self.shared.inner.lock();
        match inner.state {
            WorkerState::Waiting => {
                inner.state = WorkerState::Requesting;
                Some(WorkerRequest::RequestCubes)
            }
            WorkerState::Failed => {
                inner.state = WorkerState::Returning;
                Some(WorkerRequest::ReturnFailedCubes(inner.failed_cubes.clone()))
            }
            _ => None,
        }
    }

    /// Cubes arrived from the root.
    pub fn digest_send_cubes(&self, cubes: Vec<Cube>) {
        let mut inner = self.shared.inner.lock();
        if inner.state != WorkerState::Requesting {
            tracing::warn!(state = ?inner.state, "Dropping cubes in unexpected worker state");
            return;
        }
        inner.local_cubes = cubes;
        inner.state = WorkerState::Working;
        self.shared.cond.notify_all();
    }

    /// Failed cubes learned from the tree: future local cubes that
    /// include any of them are skipped without a solve.
    pub fn add_known_failed(&self, cubes: Vec<Cube>) {
        let mut inner = self.shared.inner.lock();
        inner.known_failed.extend(cubes);
    }

    /// The root acknowledged our failed cubes.
    pub fn digest_received_failed_cubes(&self) {
        let mut inner = self.shared.inner.lock();
        if inner.state != WorkerState::Returning {
            return;
        }
        inner.failed_cubes.clear();
        inner.state = WorkerState::Waiting;
    }

    /// Interrupt the worker: wakes the thread wherever it sleeps or solves.
    pub fn interrupt(&self) {
        self.terminator.set();
        self.suspender.resume();
        self.shared.cond.notify_all();
    }

    pub fn suspend(&self) {
        self.suspender.suspend();
    }

    pub fn resume(&self) {
        self.suspender.resume();
    }

    pub fn join(&mut self) {
        if let Some(handle) = self.thread.take() {
            let _ = handle.join();
        }
    }
}

fn main_loop(
    shared: Arc<Shared>,
    terminator: Terminator,
    result: SharedResult,
    mut solver: Box<dyn SolverAdapter>,
) {
    let mut inner = shared.inner.lock();
    debug_assert_eq!(inner.state, WorkerState::Idling);
    inner.state = WorkerState::Waiting;

    loop {
        while inner.state != WorkerState::Working && !terminator.is_set() {
            shared.cond.wait(&mut inner);
        }
        if terminator.is_set() {
            tracing::debug!("Cube worker leaves main loop on interrupt");
            return;
        }

        let cubes = std::mem::take(&mut inner.local_cubes);
        let mut known_failed = inner.failed_cubes.clone();
        known_failed.extend(inner.known_failed.iter().cloned());
        drop(inner);

        let outcome = solve_cubes(&mut solver, &cubes, &known_failed, &result);

        inner = shared.inner.lock();
        match outcome {
            CubeOutcome::Solved => {
                inner.state = WorkerState::Solved;
                tracing::debug!("Cube worker leaves main loop: solution found");
                return;
            }
            CubeOutcome::Interrupted => {
                return;
            }
            CubeOutcome::AllFailed(mut failed) => {
                inner.failed_cubes.append(&mut failed);
                inner.state = WorkerState::Failed;
            }
        }
    }
}

enum CubeOutcome {
    Solved,
    Interrupted,
    AllFailed(Vec<Cube>),
}

fn solve_cubes(
    solver: &mut Box<dyn SolverAdapter>,
    cubes: &[Cube],
    known_failed: &[Cube],
    result: &SharedResult,
) -> CubeOutcome {
    let mut new_failed = Vec::new();
    for cube in cubes {
        let skip = known_failed
            .iter()
            .chain(new_failed.iter())
            .any(|failed| cube.includes(failed));
        if skip {
            tracing::trace!("Skipped cube including a failed cube");
            continue;
        }

        for &lit in cube.path() {
            solver.assume(lit);
        }
        match solver.solve() {
            SatResult::Sat => {
                result.report(SatResult::Sat, solver.solution());
                return CubeOutcome::Solved;
            }
            SatResult::Unknown => {
                return CubeOutcome::Interrupted;
            }
            SatResult::Unsat => {
                let failed = solver.failed_assumptions();
                if failed.is_empty() {
                    // The refutation needs no assumption: globally UNSAT.
                    result.report(SatResult::Unsat, Vec::new());
                    return CubeOutcome::Solved;
                }
                new_failed.push(Cube::new(failed));
            }
        }
    }
    CubeOutcome::AllFailed(new_failed)
}
