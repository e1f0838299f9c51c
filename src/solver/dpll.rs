//! Assumption-capable DPLL engine.
//!
//! The default in-tree solver core: unit propagation, recursive search with
//! occurrence-count branching, deletion-minimized failed-assumption cores,
//! and an occurrence-based `lookahead`. The engine checks its terminator
//! between decisions, so interrupts take effect within one propagation
//! round.

use crate::api::description::SatResult;
use crate::solver::{SolverAdapter, Suspender};
use crate::terminator::Terminator;

const UNASSIGNED: i8 = 0;

pub struct DpllSolver {
    clauses: Vec<Vec<i32>>,
    current_clause: Vec<i32>,
    assumptions: Vec<i32>,
    failed: Vec<i32>,
    model: Vec<i32>,
    num_vars: usize,
    terminator: Terminator,
    suspender: Suspender,
}

impl Default for DpllSolver {
    fn default() -> Self {
        Self::new()
    }
}

impl DpllSolver {
    pub fn new() -> Self {
        Self {
            clauses: Vec::new(),
            current_clause: Vec::new(),
            assumptions: Vec::new(),
            failed: Vec::new(),
            model: Vec::new(),
            num_vars: 0,
            terminator: Terminator::new(),
            suspender: Suspender::new(),
        }
    }

    fn note_var(&mut self, lit: i32) {
        self.num_vars = self.num_vars.max(lit.unsigned_abs() as usize);
    }

    /// Assign assumption literals, then search. `Unknown` only on interrupt.
    fn solve_under(&self, assumptions: &[i32]) -> (SatResult, Vec<i32>) {
        let mut assign = vec![UNASSIGNED; self.num_vars + 1];
        for &lit in assumptions {
            let var = lit.unsigned_abs() as usize;
            let sign = if lit > 0 { 1 } else { -1 };
            if assign[var] == -sign {
                // Contradictory assumptions.
                return (SatResult::Unsat, Vec::new());
            }
            assign[var] = sign;
        }
        let result = self.search(&mut assign);
        let model = if result == SatResult::Sat {
            (1..=self.num_vars)
                .map(|v| if assign[v] >= 0 { v as i32 } else { -(v as i32) })
                .collect()
        } else {
            Vec::new()
        };
        (result, model)
    }

    fn search(&self, assign: &mut [i8]) -> SatResult {
        if self.terminator.is_set() {
            return SatResult::Unknown;
        }
        self.suspender.block_while_suspended();

        // Unit propagation to fixpoint.
        let mut trail = Vec::new();
        loop {
            let mut changed = false;
            for clause in &self.clauses {
                let mut unassigned = None;
                let mut num_unassigned = 0;
                let mut satisfied = false;
                for &lit in clause {
                    match lit_value(assign, lit) {
                        1 => {
                            satisfied = true;
                            break;
                        }
                        0 => {
                            num_unassigned += 1;
                            unassigned = Some(lit);
                        }
                        _ => {}
                    }
                }
                if satisfied {
                    continue;
                }
                match num_unassigned {
                    0 => {
                        // Conflict: undo propagation before returning.
                        for &var in &trail {
                            assign[var] = UNASSIGNED;
                        }
                        return SatResult::Unsat;
                    }
                    1 => {
                        let lit = unassigned.unwrap();
                        let var = lit.unsigned_abs() as usize;
                        assign[var] = if lit > 0 { 1 } else { -1 };
                        trail.push(var);
                        changed = true;
                    }
                    _ => {}
                }
            }
            if !changed {
                break;
            }
        }

        // Branch on the most frequent unassigned literal.
        match self.pick_branch_literal(assign) {
            None => SatResult::Sat,
            Some(lit) => {
                for &phase in &[lit, -lit] {
                    let var = phase.unsigned_abs() as usize;
                    assign[var] = if phase > 0 { 1 } else { -1 };
                    match self.search(assign) {
                        SatResult::Sat => return SatResult::Sat,
                        SatResult::Unknown => {
                            assign[var] = UNASSIGNED;
                            for &var in &trail {
                                assign[var] = UNASSIGNED;
                            }
                            return SatResult::Unknown;
                        }
                        SatResult::Unsat => assign[var] = UNASSIGNED,
                    }
                }
                for &var in &trail {
                    assign[var] = UNASSIGNED;
                }
                SatResult::Unsat
            }
        }
    }

    /// Literal with the highest occurrence count among unresolved clauses.
    fn pick_branch_literal(&self, assign: &[i8]) -> Option<i32> {
        let mut counts = vec![0usize; 2 * (self.num_vars + 1)];
        for clause in &self.clauses {
            if clause.iter().any(|&l| lit_value(assign, l) == 1) {
                continue;
            }
            for &lit in clause {
                if lit_value(assign, lit) == 0 {
                    counts[lit_index(lit)] += 1;
                }
            }
        }
        counts
            .iter()
            .enumerate()
            .filter(|&(_, &c)| c > 0)
            .max_by_key(|&(_, &c)| c)
            .map(|(idx, _)| index_lit(idx))
    }

    /// Deletion-based core minimization: drop each assumption that is not
    /// needed to preserve unsatisfiability.
    fn shrink_core(&self, assumptions: &[i32]) -> Vec<i32> {
        let mut core: Vec<i32> = assumptions.to_vec();
        let mut i = 0;
        while i < core.len() {
            if self.terminator.is_set() {
                break;
            }
            let mut candidate = core.clone();
            candidate.remove(i);
            if self.solve_under(&candidate).0 == SatResult::Unsat {
                core = candidate;
            } else {
                i += 1;
            }
        }
        core
    }
}

fn lit_value(assign: &[i8], lit: i32) -> i8 {
    let v = assign[lit.unsigned_abs() as usize];
    if lit > 0 {
        v
    } else {
        -v
    }
}

fn lit_index(lit: i32) -> usize {
    let var = lit.unsigned_abs() as usize;
    2 * var + usize::from(lit < 0)
}

fn index_lit(idx: usize) -> i32 {
    let var = (idx / 2) as i32;
    if idx % 2 == 0 {
        var
    } else {
        -var
    }
}

impl SolverAdapter for DpllSolver {
    fn add_literal(&mut self, lit: i32) {
        if lit == 0 {
            let clause = std::mem::take(&mut self.current_clause);
            self.clauses.push(clause);
        } else {
            self.note_var(lit);
            self.current_clause.push(lit);
        }
    }

    fn assume(&mut self, lit: i32) {
        self.note_var(lit);
        self.assumptions.push(lit);
    }

    fn solve(&mut self) -> SatResult {
        let assumptions = std::mem::take(&mut self.assumptions);
        self.failed.clear();
        self.model.clear();
        let (result, model) = self.solve_under(&assumptions);
        match result {
            SatResult::Sat => self.model = model,
            SatResult::Unsat => self.failed = self.shrink_core(&assumptions),
            SatResult::Unknown => {}
        }
        result
    }

    fn lookahead(&mut self) -> i32 {
        let assumptions = std::mem::take(&mut self.assumptions);
        if self.terminator.is_set() {
            return 0;
        }
        let mut assign = vec![UNASSIGNED; self.num_vars + 1];
        for &lit in &assumptions {
            let var = lit.unsigned_abs() as usize;
            let sign = if lit > 0 { 1 } else { -1 };
            if assign[var] == -sign {
                return 0; // already refuted under the cube
            }
            assign[var] = sign;
        }
        self.pick_branch_literal(&assign).unwrap_or(0)
    }

    fn failed_assumptions(&self) -> Vec<i32> {
        self.failed.clone()
    }

    fn solution(&self) -> Vec<i32> {
        self.model.clone()
    }

    fn set_terminator(&mut self, terminator: Terminator) {
        self.terminator = terminator;
    }

    fn set_suspender(&mut self, suspender: Suspender) {
        self.suspender = suspender;
    }

    fn interrupt(&self) {
        self.terminator.set();
    }

    fn suspend(&self) {
        self.suspender.suspend();
    }

    fn resume(&self) {
        self.suspender.resume();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn solver_with(clauses: &[&[i32]]) -> DpllSolver {
        let mut s = DpllSolver::new();
        for c in clauses {
            s.add_clause(c);
        }
        s
    }

    #[test]
    fn solves_satisfiable_formula() {
        let mut s = solver_with(&[&[1, 2], &[-1, 2], &[1, -2]]);
        assert_eq!(s.solve(), SatResult::Sat);
        let model = s.solution();
        assert!(model.contains(&1) || model.contains(&2));
    }

    #[test]
    fn detects_unsatisfiable_formula() {
        let mut s = solver_with(&[&[1], &[-1]]);
        assert_eq!(s.solve(), SatResult::Unsat);
        assert!(s.failed_assumptions().is_empty());
    }

    #[test]
    fn failed_assumptions_form_a_core() {
        // Formula is satisfiable, but assumptions 1 and 2 conflict with it.
        let mut s = solver_with(&[&[-1, -2], &[3]]);
        s.assume(1);
        s.assume(2);
        s.assume(3);
        assert_eq!(s.solve(), SatResult::Unsat);
        let core = s.failed_assumptions();
        assert!(!core.is_empty());
        assert!(!core.contains(&3), "literal 3 is not part of the conflict");
    }

    #[test]
    fn lookahead_returns_zero_when_decided() {
        let mut s = solver_with(&[&[1]]);
        s.assume(1);
        // Under the assumption everything is satisfied: nothing to split.
        assert_eq!(s.lookahead(), 0);
    }

    #[test]
    fn interrupt_yields_unknown() {
        let mut s = solver_with(&[&[1, 2], &[-1, -2]]);
        let term = Terminator::new();
        s.set_terminator(term.clone());
        term.set();
        assert_eq!(s.solve(), SatResult::Unknown);
    }
}
