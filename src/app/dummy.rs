//! The DUMMY application: no computation, completes immediately.

use std::sync::Arc;

use crate::api::description::SatResult;
use crate::app::AppJob;
use crate::comm::message::{JobMessage, Rank};
use crate::job::tree::JobTree;

#[derive(Default)]
pub struct DummyJob {
    started: bool,
    reported: bool,
}

impl DummyJob {
    pub fn new() -> Self {
        Self::default()
    }
}

impl AppJob for DummyJob {
    fn appl_start(&mut self, _payload: Arc<Vec<i32>>, _threads: usize) {
        self.started = true;
    }

    fn appl_suspend(&mut self) {}
    fn appl_resume(&mut self) {}
    fn appl_interrupt(&mut self) {}

    fn appl_restart(&mut self, _payload: Arc<Vec<i32>>, _threads: usize) {
        self.reported = false;
    }

    fn appl_terminate(&mut self) {}

    fn appl_wants_to_communicate(&self) -> bool {
        false
    }

    fn appl_begin_communication(&mut self, _tree: &JobTree) -> Vec<(Rank, JobMessage)> {
        Vec::new()
    }

    fn appl_communicate(
        &mut self,
        _source: Rank,
        _msg: JobMessage,
        _tree: &JobTree,
    ) -> Vec<(Rank, JobMessage)> {
        Vec::new()
    }

    fn appl_solve_loop(&mut self) -> Option<(SatResult, Vec<i32>)> {
        if self.started && !self.reported {
            self.reported = true;
            return Some((SatResult::Unknown, Vec::new()));
        }
        None
    }

    fn appl_is_destructible(&self) -> bool {
        true
    }
}
