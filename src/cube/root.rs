//! Cube root: the per-job cube generator manager at tree index 0.
//!
//! Maintains the frontier of open cubes and the set of failed cubes. Hands
//! cubes to requesting workers, feeds generator threads cubes to expand,
//! digests failed-cube reports, and declares global UNSAT when the empty
//! cube fails.

use std::collections::VecDeque;
use std::sync::Arc;

use parking_lot::{Condvar, Mutex};

use crate::api::description::SatResult;
use crate::config::ProcessConfig;
use crate::cube::generator::{CubeGenerator, CubeManager, Expansion};
use crate::cube::{Cube, SharedResult};
use crate::solver::create_solver;
use crate::terminator::Terminator;

struct Inner {
    frontier: VecDeque<Cube>,
    failed: Vec<Cube>,
    /// Blocking-clause streams pending per generator.
    pending_clauses: Vec<Vec<i32>>,
    /// Generators stop expanding once the frontier reaches this size.
    target_frontier: usize,
}

struct Core {
    inner: Mutex<Inner>,
    cond: Condvar,
    result: SharedResult,
    terminator: Terminator,
}

impl Core {
    fn register_failed(&self, inner: &mut Inner, cube: Cube) {
        if cube.is_empty() {
            // The empty cube failed: the formula is unsatisfiable.
            self.result.report(SatResult::Unsat, Vec::new());
            self.cond.notify_all();
            return;
        }
        // Retire every open cube subsumed by the failed one.
        inner.frontier.retain(|open| !open.includes(&cube));
        let clause = cube.to_blocking_clause();
        for pending in &mut inner.pending_clauses {
            pending.extend_from_slice(&clause);
        }
        inner.failed.push(cube);
    }
}

impl CubeManager for Core {
    fn exchange(&self, _generator_id: usize, expansion: Expansion) -> Option<Cube> {
        let mut inner = self.inner.lock();

        if let Some((cube, split)) = expansion.split {
            inner.frontier.push_back(cube.extended(split));
            inner.frontier.push_back(cube.extended(-split));
            self.cond.notify_all();
        }
        if let Some(failed) = expansion.failed {
            self.register_failed(&mut inner, failed);
        }

        loop {
            if self.terminator.is_set() || self.result.is_set() {
                return None;
            }
            if inner.frontier.len() < inner.target_frontier {
                if let Some(cube) = inner.frontier.pop_front() {
                    return Some(cube);
                }
            }
            // Bounded wait: a result reported by a worker does not signal
            // this condvar.
            self.cond
                .wait_for(&mut inner, std::time::Duration::from_millis(50));
        }
    }

    fn take_failed_clauses(&self, generator_id: usize) -> Vec<i32> {
        let mut inner = self.inner.lock();
        std::mem::take(&mut inner.pending_clauses[generator_id])
    }
}

pub struct CubeRoot {
    core: Arc<Core>,
    generators: Vec<CubeGenerator>,
}

impl CubeRoot {
    /// Seed the frontier with the empty cube and start generator threads.
    pub fn start(config: &ProcessConfig, formula: Arc<Vec<i32>>, result: SharedResult) -> Self {
        let num_generators = config.generator_threads.max(1);
        let core = Arc::new(Core {
            inner: Mutex::new(Inner {
                frontier: VecDeque::from([Cube::empty()]),
                failed: Vec::new(),
                pending_clauses: vec![Vec::new(); num_generators],
                target_frontier: (config.cubes_per_request * 4).max(8),
            }),
            cond: Condvar::new(),
            result: result.clone(),
            terminator: Terminator::new(),
        });

        let generators = (0..num_generators)
            .map(|id| {
                CubeGenerator::start(
                    id,
                    core.clone() as Arc<dyn CubeManager>,
                    formula.clone(),
                    result.clone(),
                    create_solver(&config.satsolver, id),
                    create_solver(&config.satsolver, id),
                )
            })
            .collect();

        Self { core, generators }
    }

    /// Let the frontier track the size of the audience it feeds.
    pub fn set_target_frontier(&self, target: usize) {
        let mut inner = self.core.inner.lock();
        inner.target_frontier = target.max(8);
        self.core.cond.notify_all();
    }

    /// Hand out up to `max` cubes for a requesting worker. May return
    /// fewer (or none) when the frontier is momentarily dry; callers
    /// retry on the next communication tick.
    pub fn take_cubes(&self, max: usize) -> Vec<Cube> {
        let mut inner = self.core.inner.lock();
        let n = max.min(inner.frontier.len());
        let cubes: Vec<Cube> = inner.frontier.drain(..n).collect();
        if !cubes.is_empty() {
            // Room freed: wake generators to refill.
            self.core.cond.notify_all();
        }
        cubes
    }

    /// Digest failed cubes returned by a worker.
    pub fn digest_failed_cubes(&self, cubes: Vec<Cube>) {
        let mut inner = self.core.inner.lock();
        for cube in cubes {
            self.core.register_failed(&mut inner, cube);
        }
        self.core.cond.notify_all();
    }

    pub fn num_failed_cubes(&self) -> usize {
        self.core.inner.lock().failed.len()
    }

    pub fn interrupt(&self) {
        self.core.terminator.set();
        for generator in &self.generators {
            generator.interrupt();
        }
        self.core.cond.notify_all();
    }

    pub fn suspend(&self) {
        for generator in &self.generators {
            generator.suspend();
        }
    }

    pub fn resume(&self) {
        for generator in &self.generators {
            generator.resume();
        }
    }

    pub fn join(&mut self) {
        for generator in &mut self.generators {
            generator.join();
        }
    }
}
