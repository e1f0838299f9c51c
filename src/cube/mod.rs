//! Cube-and-conquer coordination.
//!
//! One job's search is partitioned into cubes (assumption paths). The tree
//! root generates and distributes cubes; workers at every node solve them
//! and feed failed cubes back.

pub mod generator;
pub mod root;
pub mod worker;

use std::sync::Arc;

use parking_lot::Mutex;

use crate::api::description::SatResult;

/// An ordered list of assumption literals specializing the formula for one
/// partial search.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct Cube {
    path: Vec<i32>,
}

impl Cube {
    pub fn new(path: Vec<i32>) -> Self {
        Self { path }
    }

    /// The root cube: no assumptions.
    pub fn empty() -> Self {
        Self::default()
    }

    pub fn path(&self) -> &[i32] {
        &self.path
    }

    pub fn is_empty(&self) -> bool {
        self.path.is_empty()
    }

    /// Child cube with one more assumption.
    pub fn extended(&self, lit: i32) -> Self {
        let mut path = self.path.clone();
        path.push(lit);
        Self { path }
    }

    /// A includes B iff B's literal set is a subset of A's.
    pub fn includes(&self, other: &Cube) -> bool {
        other.path.iter().all(|lit| self.path.contains(lit))
    }

    /// Clause asserting this cube must not be searched again: the negation
    /// of its path, zero-terminated.
    pub fn to_blocking_clause(&self) -> Vec<i32> {
        let mut clause: Vec<i32> = self.path.iter().map(|l| -l).collect();
        clause.push(0);
        clause
    }
}

/// Zero-separated wire form: each cube's literals followed by a 0.
pub fn serialize_cubes(cubes: &[Cube]) -> Vec<i32> {
    let mut out = Vec::new();
    for cube in cubes {
        out.extend_from_slice(&cube.path);
        out.push(0);
    }
    out
}

pub fn deserialize_cubes(data: &[i32]) -> Vec<Cube> {
    let mut cubes = Vec::new();
    let mut path = Vec::new();
    for &lit in data {
        if lit == 0 {
            cubes.push(Cube::new(std::mem::take(&mut path)));
        } else {
            path.push(lit);
        }
    }
    cubes
}

/// Write-once global result of one job.
///
/// The first definitive report wins; later reports are ignored (soundness
/// of the solver and the cube algebra make contradictions impossible).
#[derive(Clone, Default)]
pub struct SharedResult {
    inner: Arc<Mutex<Option<(SatResult, Vec<i32>)>>>,
}

impl SharedResult {
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns true if this call set the result.
    pub fn report(&self, result: SatResult, solution: Vec<i32>) -> bool {
        let mut inner = self.inner.lock();
        if inner.is_some() {
            return false;
        }
        *inner = Some((result, solution));
        true
    }

    pub fn get(&self) -> Option<(SatResult, Vec<i32>)> {
        self.inner.lock().clone()
    }

    pub fn is_set(&self) -> bool {
        self.inner.lock().is_some()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cube_inclusion() {
        let a = Cube::new(vec![1, -2, 3]);
        let b = Cube::new(vec![1, 3]);
        assert!(a.includes(&b));
        assert!(!b.includes(&a));
        assert!(a.includes(&Cube::empty()));
    }

    #[test]
    fn serialization_round_trip() {
        let cubes = vec![Cube::new(vec![1, -2]), Cube::empty(), Cube::new(vec![3])];
        let wire = serialize_cubes(&cubes);
        assert_eq!(deserialize_cubes(&wire), cubes);
    }

    #[test]
    fn first_result_wins() {
        let result = SharedResult::new();
        assert!(result.report(SatResult::Sat, vec![1]));
        assert!(!result.report(SatResult::Unsat, vec![]));
        assert_eq!(result.get().unwrap().0, SatResult::Sat);
    }
}
