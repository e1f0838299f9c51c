//! Cube generator thread.
//!
//! Generators live at the tree root. Each one repeatedly takes a cube from
//! the manager, validates it against the learned failed cubes, and uses the
//! solver's lookahead to pick a split literal, producing two child cubes.
//! Interruption at any solver call causes prompt return.

use std::sync::Arc;
use std::thread::JoinHandle;

use crate::api::description::SatResult;
use crate::cube::{Cube, SharedResult};
use crate::solver::{SolverAdapter, Suspender};
use crate::terminator::Terminator;

/// Outcome of one expansion attempt, reported back to the manager.
#[derive(Debug, Default)]
pub struct Expansion {
    /// Cube plus chosen split literal; the manager derives both children.
    pub split: Option<(Cube, i32)>,
    /// Failed cube (non-empty core) discovered instead of a split.
    pub failed: Option<Cube>,
}

/// The root side the generator talks to.
pub trait CubeManager: Send + Sync {
    /// Deliver the previous expansion and block for the next cube.
    /// `None` ends the generator (interrupt or global result).
    fn exchange(&self, generator_id: usize, expansion: Expansion) -> Option<Cube>;

    /// Blocking clauses of failed cubes digested since the last call,
    /// as a zero-terminated literal stream.
    fn take_failed_clauses(&self, generator_id: usize) -> Vec<i32>;
}

pub struct CubeGenerator {
    terminator: Terminator,
    suspender: Suspender,
    thread: Option<JoinHandle<()>>,
}

impl CubeGenerator {
    pub fn start(
        generator_id: usize,
        manager: Arc<dyn CubeManager>,
        formula: Arc<Vec<i32>>,
        result: SharedResult,
        mut solver: Box<dyn SolverAdapter>,
        mut checker: Box<dyn SolverAdapter>,
    ) -> Self {
        let terminator = Terminator::new();
        let suspender = Suspender::new();

        solver.set_terminator(terminator.clone());
        solver.set_suspender(suspender.clone());
        // The checker holds only failed-cube clauses, never the formula.
        checker.set_terminator(terminator.clone());
        checker.set_suspender(suspender.clone());
        for &lit in formula.iter() {
            solver.add_literal(lit);
        }

        let thread_terminator = terminator.clone();
        let thread = std::thread::spawn(move || {
            run(
                generator_id,
                manager,
                result,
                thread_terminator,
                solver,
                checker,
            );
        });

        Self {
            terminator,
            suspender,
            thread: Some(thread),
        }
    }

    pub fn interrupt(&self) {
        self.terminator.set();
        self.suspender.resume();
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

fn run(
    generator_id: usize,
    manager: Arc<dyn CubeManager>,
    result: SharedResult,
    terminator: Terminator,
    mut solver: Box<dyn SolverAdapter>,
    mut checker: Box<dyn SolverAdapter>,
) {
    let mut expansion = Expansion::default();

    while !terminator.is_set() {
        let Some(cube) = manager.exchange(generator_id, std::mem::take(&mut expansion)) else {
            break;
        };

        // Absorb failed cubes learned since the last round into both the
        // expansion solver and the checker.
        let clauses = manager.take_failed_clauses(generator_id);
        if !clauses.is_empty() {
            tracing::trace!(generator_id, lits = clauses.len(), "Adding failed-cube clauses");
            for &lit in &clauses {
                solver.add_literal(lit);
                checker.add_literal(lit);
            }
        }

        expansion = generate(&cube, &result, &terminator, &mut solver, &mut checker);

        if result.is_set() {
            break;
        }
    }
    tracing::debug!(generator_id, "Cube generator leaves main loop");
}

fn generate(
    cube: &Cube,
    result: &SharedResult,
    terminator: &Terminator,
    solver: &mut Box<dyn SolverAdapter>,
    checker: &mut Box<dyn SolverAdapter>,
) -> Expansion {
    // Check the cube against the learned failed cubes first.
    for &lit in cube.path() {
        checker.assume(lit);
    }
    match checker.solve() {
        SatResult::Unknown => return Expansion::default(),
        SatResult::Unsat => {
            let core = checker.failed_assumptions();
            if core.is_empty() {
                // The failed cubes alone are contradictory.
                result.report(SatResult::Unsat, Vec::new());
                return Expansion::default();
            }
            return Expansion {
                split: None,
                failed: Some(Cube::new(core)),
            };
        }
        SatResult::Sat => {}
    }

    // The cube is viable: pick a split literal.
    for &lit in cube.path() {
        solver.assume(lit);
    }
    let split_literal = solver.lookahead();

    if split_literal == 0 {
        if terminator.is_set() {
            return Expansion::default();
        }
        // Nothing left to split: the formula is decided under this cube.
        for &lit in cube.path() {
            solver.assume(lit);
        }
        match solver.solve() {
            SatResult::Sat => {
                result.report(SatResult::Sat, solver.solution());
            }
            SatResult::Unsat => {
                let core = solver.failed_assumptions();
                if core.is_empty() {
                    result.report(SatResult::Unsat, Vec::new());
                } else {
                    return Expansion {
                        split: None,
                        failed: Some(Cube::new(core)),
                    };
                }
            }
            SatResult::Unknown => {}
        }
        return Expansion::default();
    }

    Expansion {
        split: Some((cube.clone(), split_literal)),
        failed: None,
    }
}
