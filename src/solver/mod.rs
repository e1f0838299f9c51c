//! The narrow seam to SAT solver cores.
//!
//! The platform does not prescribe a SAT algorithm; everything above this
//! module talks to solvers exclusively through [`SolverAdapter`]. Cooperative
//! cancellation runs through a [`Terminator`](crate::terminator::Terminator)
//! handle queried by the solver between decisions, suspension through a
//! [`Suspender`] parked on a condvar.

pub mod clauses;
pub mod dpll;

use std::sync::Arc;

use parking_lot::{Condvar, Mutex};

use crate::api::description::SatResult;
use crate::terminator::Terminator;

/// Parks solver threads while their job is preempted.
#[derive(Clone, Default)]
pub struct Suspender {
    inner: Arc<(Mutex<bool>, Condvar)>,
}

impl Suspender {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn suspend(&self) {
        let (lock, _) = &*self.inner;
        *lock.lock() = true;
    }

    pub fn resume(&self) {
        let (lock, cvar) = &*self.inner;
        *lock.lock() = false;
        cvar.notify_all();
    }

    pub fn is_suspended(&self) -> bool {
        *self.inner.0.lock()
    }

    /// Block the calling solver thread until resumed. Returns immediately
    /// when not suspended.
    pub fn block_while_suspended(&self) {
        let (lock, cvar) = &*self.inner;
        let mut suspended = lock.lock();
        while *suspended {
            cvar.wait(&mut suspended);
        }
    }
}

/// Capability set every attached solver core must provide.
pub trait SolverAdapter: Send {
    /// Append one literal of the input formula; 0 terminates a clause.
    fn add_literal(&mut self, lit: i32);

    /// Register an assumption for the next `solve` or `lookahead` call.
    fn assume(&mut self, lit: i32);

    /// Solve under the registered assumptions. Consumes the assumptions.
    /// Returns `Unknown` iff interrupted.
    fn solve(&mut self) -> SatResult;

    /// Pick a split literal under the registered assumptions. Returns 0
    /// when the formula is already decided under them (or on interrupt);
    /// callers then `solve` for the definitive result.
    fn lookahead(&mut self) -> i32;

    /// Assumptions of the last UNSAT `solve` that participate in the
    /// refutation. Empty means the formula is unsatisfiable outright.
    fn failed_assumptions(&self) -> Vec<i32>;

    /// Satisfying assignment of the last SAT `solve`.
    fn solution(&self) -> Vec<i32>;

    fn set_terminator(&mut self, terminator: Terminator);
    fn set_suspender(&mut self, suspender: Suspender);

    fn interrupt(&self);
    fn suspend(&self);
    fn resume(&self);

    fn add_clause(&mut self, lits: &[i32]) {
        for &lit in lits {
            self.add_literal(lit);
        }
        self.add_literal(0);
    }
}

/// Instantiate a solver for one portfolio slot.
///
/// The portfolio spec assigns one character per slot; unknown characters
/// fall back to the default engine.
pub fn create_solver(spec: &str, slot: usize) -> Box<dyn SolverAdapter> {
    let kind = spec.chars().cycle().nth(slot).unwrap_or('d');
    match kind {
        'd' => Box::new(dpll::DpllSolver::new()),
        other => {
            tracing::debug!(slot, solver = %other, "Unknown portfolio char; using default engine");
            Box::new(dpll::DpllSolver::new())
        }
    }
}
