//! Application dispatch.
//!
//! A job's computation is run by an application behind the `appl_*` hook
//! set; the scheduler core only ever calls these hooks. SAT jobs run the
//! cube-and-conquer coordinator, DUMMY jobs complete trivially (used to
//! exercise scheduling without solver work).

pub mod dummy;
pub mod sat;

use std::sync::Arc;

use crate::api::description::{Application, JobId, SatResult};
use crate::comm::message::{JobMessage, Rank};
use crate::config::ProcessConfig;
use crate::job::tree::JobTree;

/// Hook set every application implements.
///
/// Hooks are invoked from the scheduler loop only; implementations may
/// spawn threads but must never block the caller beyond brief critical
/// sections.
pub trait AppJob: Send {
    fn appl_start(&mut self, payload: Arc<Vec<i32>>, threads: usize);
    fn appl_suspend(&mut self);
    fn appl_resume(&mut self);
    fn appl_interrupt(&mut self);
    fn appl_restart(&mut self, payload: Arc<Vec<i32>>, threads: usize);
    fn appl_terminate(&mut self);

    /// True when the application has traffic for its tree neighbors.
    fn appl_wants_to_communicate(&self) -> bool;

    /// Collect outgoing messages for this communication opportunity.
    fn appl_begin_communication(&mut self, tree: &JobTree) -> Vec<(Rank, JobMessage)>;

    /// Handle one incoming job-scoped message, possibly replying.
    fn appl_communicate(
        &mut self,
        source: Rank,
        msg: JobMessage,
        tree: &JobTree,
    ) -> Vec<(Rank, JobMessage)>;

    /// Poll for a definitive result; reports each result exactly once.
    fn appl_solve_loop(&mut self) -> Option<(SatResult, Vec<i32>)>;

    /// True once all application threads have exited and resources are
    /// released.
    fn appl_is_destructible(&self) -> bool;
}

/// Instantiate the application for a job.
pub fn create_app(
    application: Application,
    job_id: JobId,
    config: &ProcessConfig,
    is_root: bool,
) -> Box<dyn AppJob> {
    match application {
        Application::Sat => Box::new(sat::SatJob::new(job_id, config.clone(), is_root)),
        Application::Dummy => Box::new(dummy::DummyJob::new()),
    }
}
