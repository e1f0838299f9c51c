use std::path::PathBuf;

/// Which application runs a job's computation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AppMode {
    /// Solvers run as threads inside this process.
    Thread,
    /// Payloads are staged through shared memory as for forked solver
    /// subprocesses; solver threads still live in-process.
    Fork,
}

/// Per-process configuration shared by every component.
#[derive(Debug, Clone)]
pub struct ProcessConfig {
    /// Solver threads per process (`-t`).
    pub threads_per_process: usize,
    /// Expected number of jobs, used for sizing (`-J`).
    pub expected_jobs: usize,
    /// Load-balancing cadence factor (`-lbc`): balancing runs every
    /// `lbc × base_period`.
    pub balance_cadence_factor: u32,
    /// Base balancing period in milliseconds.
    pub balance_period_ms: u64,
    /// Main loop polling quantum in milliseconds.
    pub poll_quantum_ms: u64,
    /// Job tree growth period in seconds; <= 0 means immediate growth.
    pub growth_period: f64,
    /// Continuous (vs. discrete periodic) growth.
    pub continuous_growth: bool,
    /// Global max demand per job; 0 = unbounded.
    pub max_demand: usize,
    /// Per-process literal budget; 0 = none.
    pub size_limit_per_process: usize,
    /// Jitter job priorities by up to 1%.
    pub jitter_priorities: bool,
    /// Seed for the priority jitter RNG; tests pin this for reproducibility.
    pub jitter_seed: Option<u64>,
    /// Solver portfolio spec, one char per diversification slot (`-satsolver`).
    pub satsolver: String,
    pub appmode: AppMode,
    /// API root directory containing `new/`, `pending/`, `introduced/`, `done/`.
    pub api_dir: PathBuf,
    /// Cross-check results against `done/` files after a run.
    pub check_json_results: bool,
    /// Enable payload checksumming on transfer.
    pub checksums: bool,
    /// Number of cubes handed to a worker per request.
    pub cubes_per_request: usize,
    /// Number of cube generator threads at the root.
    pub generator_threads: usize,
}

impl Default for ProcessConfig {
    fn default() -> Self {
        Self {
            threads_per_process: 1,
            expected_jobs: 1,
            balance_cadence_factor: 1,
            balance_period_ms: 100,
            poll_quantum_ms: 10,
            growth_period: 0.0,
            continuous_growth: false,
            max_demand: 0,
            size_limit_per_process: 0,
            jitter_priorities: false,
            jitter_seed: None,
            satsolver: "d".to_string(),
            appmode: AppMode::Thread,
            api_dir: PathBuf::from(".api/jobs.0"),
            check_json_results: false,
            checksums: false,
            cubes_per_request: 4,
            generator_threads: 1,
        }
    }
}

impl ProcessConfig {
    pub fn with_threads(mut self, threads: usize) -> Self {
        self.threads_per_process = threads.max(1);
        self
    }

    pub fn with_api_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.api_dir = dir.into();
        self
    }

    pub fn with_growth(mut self, period: f64, continuous: bool) -> Self {
        self.growth_period = period;
        self.continuous_growth = continuous;
        self
    }

    /// Milliseconds between two balancing rounds.
    pub fn balance_interval_ms(&self) -> u64 {
        self.balance_period_ms * self.balance_cadence_factor.max(1) as u64
    }
}
