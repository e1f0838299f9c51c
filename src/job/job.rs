//! One job's local lifecycle on one process.
//!
//! Mis-sequenced transitions are programmer errors and panic; every
//! entry point asserts its predecessor state.

use crate::api::description::{JobDescription, JobId, SatResult};
use crate::app::{create_app, AppJob};
use crate::comm::message::{JobMessage, JobRequest, Rank};
use crate::config::ProcessConfig;
use crate::job::demand::{GrowthPolicy, Temperature};
use crate::job::state::JobState;
use crate::job::tree::JobTree;
use crate::util::timer;

pub struct Job {
    id: JobId,
    name: String,
    config: ProcessConfig,
    state: JobState,
    commitment: Option<(JobRequest, f64)>,
    description: Option<JobDescription>,
    app: Option<Box<dyn AppJob>>,
    tree: JobTree,
    volume: usize,
    priority: f64,
    growth: GrowthPolicy,
    temperature: Temperature,
    threads_per_job: usize,
    time_of_activation: f64,
    time_of_last_limit_check: f64,
    time_of_abort: f64,
    used_cpu_seconds: f64,
}

impl Job {
    pub fn new(config: &ProcessConfig, comm_size: usize, world_rank: Rank, job_id: JobId) -> Self {
        let growth = GrowthPolicy {
            growth_period: config.growth_period,
            continuous: config.continuous_growth,
            max_demand: config.max_demand,
        };
        Self {
            id: job_id,
            name: format!("#{job_id}"),
            config: config.clone(),
            state: JobState::Inactive,
            commitment: None,
            description: None,
            app: None,
            tree: JobTree::new(comm_size, world_rank),
            volume: 0,
            priority: 0.0,
            growth,
            temperature: Temperature::new(),
            threads_per_job: config.threads_per_process,
            time_of_activation: 0.0,
            time_of_last_limit_check: 0.0,
            time_of_abort: 0.0,
            used_cpu_seconds: 0.0,
        }
    }

    pub fn id(&self) -> JobId {
        self.id
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn state(&self) -> JobState {
        self.state
    }

    pub fn volume(&self) -> usize {
        self.volume
    }

    pub fn priority(&self) -> f64 {
        self.priority
    }

    pub fn tree(&self) -> &JobTree {
        &self.tree
    }

    pub fn tree_mut(&mut self) -> &mut JobTree {
        &mut self.tree
    }

    pub fn threads_per_job(&self) -> usize {
        self.threads_per_job
    }

    pub fn description(&self) -> Option<&JobDescription> {
        self.description.as_ref()
    }

    pub fn revision(&self) -> u32 {
        self.description.as_ref().map(|d| d.revision).unwrap_or(0)
    }

    fn assert_state(&self, expected: JobState) {
        assert!(
            self.state == expected,
            "{} : expected state {expected}, was {}",
            self.name,
            self.state
        );
    }

    /// Take on a (new) position in the job's tree.
    pub fn update_tree(&mut self, index: usize, root_rank: Rank, parent_rank: Option<Rank>) {
        self.name = format!("#{}:{index}", self.id);
        self.tree.update(index, root_rank, parent_rank);
    }

    /// Store a pending join ticket. At most one commitment per job.
    pub fn commit(&mut self, request: JobRequest) {
        assert!(self.state != JobState::Active && self.state != JobState::Past);
        assert!(self.commitment.is_none(), "{} : double commitment", self.name);
        self.update_tree(
            request.requested_node_index,
            request.root_rank,
            Some(request.requesting_rank),
        );
        self.commitment = Some((request, timer::elapsed_seconds()));
    }

    pub fn uncommit(&mut self) {
        assert!(self.state != JobState::Active);
        self.commitment = None;
    }

    pub fn commitment(&self) -> Option<&JobRequest> {
        self.commitment.as_ref().map(|(req, _)| req)
    }

    /// Seconds since the commitment was stored, if one is pending.
    pub fn commitment_age(&self, elapsed: f64) -> Option<f64> {
        self.commitment.as_ref().map(|(_, t)| elapsed - t)
    }

    /// INACTIVE -> ACTIVE: deserialize the description and spin up the
    /// application.
    pub fn start(&mut self, description: JobDescription) {
        self.assert_state(JobState::Inactive);
        self.commitment = None;

        if self.time_of_activation <= 0.0 {
            self.time_of_activation = timer::elapsed_seconds();
        }
        self.time_of_last_limit_check = timer::elapsed_seconds();
        self.volume = 1;
        self.priority = description.priority;

        // The more restrictive demand cap wins between the global and the
        // job-internal limit.
        if description.max_demand > 0 {
            self.growth.max_demand = if self.growth.max_demand == 0 {
                description.max_demand
            } else {
                self.growth.max_demand.min(description.max_demand)
            };
        }

        self.apply_size_limit(&description);

        let is_root = self.tree.is_root();
        let mut app = create_app(description.application, self.id, &self.config, is_root);
        if let Some(payload) = description.latest_payload() {
            app.appl_start(payload.clone(), self.threads_per_job);
        }
        self.app = Some(app);
        self.description = Some(description);
        self.state = JobState::Active;
        tracing::info!(job = %self.name, threads = self.threads_per_job, "Job started");
    }

    /// Cut the thread count when the formula would blow the per-process
    /// literal budget.
    fn apply_size_limit(&mut self, description: &JobDescription) {
        let literals = description.num_formula_literals();
        let limit = self.config.size_limit_per_process;
        if limit > 0 && literals > 0 && self.threads_per_job * literals > limit {
            self.threads_per_job = (limit / literals).max(1);
            tracing::info!(
                job = %self.name,
                threads = self.threads_per_job,
                "Literal threshold exceeded - cut down thread count"
            );
        }
    }

    /// ACTIVE -> SUSPENDED: quiesce the application.
    pub fn suspend(&mut self) {
        self.assert_state(JobState::Active);
        self.state = JobState::Suspended;
        if let Some(app) = self.app.as_mut() {
            app.appl_suspend();
        }
        self.volume = 0;
        tracing::debug!(job = %self.name, "Suspended solver");
    }

    /// SUSPENDED -> ACTIVE.
    pub fn resume(&mut self) {
        self.assert_state(JobState::Suspended);
        self.state = JobState::Active;
        if let Some(app) = self.app.as_mut() {
            app.appl_resume();
        }
        tracing::debug!(job = %self.name, "Resumed solving threads");
    }

    /// ACTIVE -> STANDBY: stop workers, detach children, clear the result.
    pub fn interrupt(&mut self) {
        self.assert_state(JobState::Active);
        self.state = JobState::Standby;
        if let Some(app) = self.app.as_mut() {
            app.appl_interrupt();
        }
        self.tree.unset_children();
        tracing::debug!(job = %self.name, "Interrupted solver");
    }

    /// STANDBY -> ACTIVE with the next revision.
    pub fn restart(&mut self, description: JobDescription) {
        self.assert_state(JobState::Standby);
        self.time_of_activation = timer::elapsed_seconds();
        self.time_of_last_limit_check = self.time_of_activation;
        self.volume = 1;
        self.priority = description.priority;
        if let (Some(app), Some(payload)) = (self.app.as_mut(), description.latest_payload()) {
            app.appl_restart(payload.clone(), self.threads_per_job);
        }
        self.description = Some(description);
        self.state = JobState::Active;
        tracing::debug!(job = %self.name, "Restarted solver");
    }

    /// Any non-terminal state -> PAST. Terminal.
    pub fn terminate(&mut self) {
        assert!(
            self.state != JobState::Past,
            "{} : terminate on PAST job",
            self.name
        );
        self.state = JobState::Past;
        self.volume = 0;
        self.commitment = None;
        if let Some(app) = self.app.as_mut() {
            app.appl_terminate();
        }
        self.tree.unset_children();
        self.time_of_abort = timer::elapsed_seconds();
        tracing::debug!(job = %self.name, "Terminated");
    }

    /// Volume bound derived from the growth curve, or the frozen previous
    /// volume for non-active states.
    pub fn get_demand(&self, elapsed: f64) -> usize {
        self.growth.demand(
            self.state == JobState::Active,
            self.tree.comm_size(),
            self.volume,
            self.time_of_activation,
            elapsed,
        )
    }

    pub fn get_temperature(&mut self, elapsed: f64) -> f64 {
        let age = (elapsed - self.time_of_activation).max(0.0);
        self.temperature.at_age(age)
    }

    pub fn update_volume(&mut self, volume: usize) {
        self.volume = volume;
    }

    pub fn wants_to_communicate(&self) -> bool {
        self.state == JobState::Active
            && self.app.as_ref().map(|a| a.appl_wants_to_communicate()).unwrap_or(false)
    }

    pub fn begin_communication(&mut self) -> Vec<(Rank, JobMessage)> {
        let Some(app) = self.app.as_mut() else {
            return Vec::new();
        };
        app.appl_begin_communication(&self.tree)
    }

    pub fn communicate(&mut self, source: Rank, msg: JobMessage) -> Vec<(Rank, JobMessage)> {
        let Some(app) = self.app.as_mut() else {
            return Vec::new();
        };
        app.appl_communicate(source, msg, &self.tree)
    }

    /// Poll the application for a definitive result.
    pub fn solve_loop(&mut self) -> Option<(SatResult, Vec<i32>)> {
        if self.state != JobState::Active {
            return None;
        }
        self.app.as_mut()?.appl_solve_loop()
    }

    /// Check wallclock and CPU limits; returns true when a limit tripped.
    /// Call at least once per second while the job is active.
    pub fn check_resource_limits(&mut self, elapsed: f64) -> bool {
        if self.state != JobState::Active {
            return false;
        }
        let Some(desc) = self.description.as_ref() else {
            return false;
        };
        let dt = elapsed - self.time_of_last_limit_check;
        self.time_of_last_limit_check = elapsed;
        // CPU use approximated from this tree's current extent.
        self.used_cpu_seconds += dt * (self.volume.max(1) * self.threads_per_job) as f64;

        if desc.wallclock_limit > 0.0 && elapsed - self.time_of_activation > desc.wallclock_limit {
            tracing::info!(job = %self.name, limit = desc.wallclock_limit, "Wallclock limit reached");
            return true;
        }
        if desc.cpu_limit > 0.0 && self.used_cpu_seconds > desc.cpu_limit {
            tracing::info!(job = %self.name, limit = desc.cpu_limit, "CPU limit reached");
            return true;
        }
        false
    }

    /// A PAST job whose application released all resources may be dropped.
    pub fn is_destructible(&self) -> bool {
        self.state == JobState::Past
            && self.app.as_ref().map(|a| a.appl_is_destructible()).unwrap_or(true)
    }
}
