use std::path::PathBuf;
use std::sync::Arc;

use clap::Parser;
use tokio::sync::{mpsc, watch};
use tracing_subscriber::EnvFilter;

use mallob_lite::api::adapter::JobFileAdapter;
use mallob_lite::api::description::{Application, JobDescription, JobMetadata, SatResult};
use mallob_lite::api::watcher::ApiDirWatcher;
use mallob_lite::comm::transport::{LocalFabric, Transport};
use mallob_lite::config::{AppMode, ProcessConfig};
use mallob_lite::node::Node;
use mallob_lite::terminator::{install_shutdown_handler, Terminator};
use mallob_lite::util::{dimacs, timer};

#[derive(Parser, Debug)]
#[command(name = "mallob-lite")]
#[command(about = "A distributed job scheduler for massively parallel SAT solving")]
struct Args {
    /// Solve a single CNF formula and exit (bypasses the job API)
    #[arg(long)]
    mono: Option<PathBuf>,

    /// Solver threads per process
    #[arg(short = 't', long = "threads", default_value = "1")]
    threads: usize,

    /// Expected number of jobs, used for sizing
    #[arg(short = 'J', long = "jobs", default_value = "1")]
    jobs: usize,

    /// Load-balancing cadence factor
    #[arg(long, default_value = "1")]
    lbc: u32,

    /// Logging verbosity (0 = error .. 4 = trace)
    #[arg(short = 'l', long = "log-level", default_value = "2")]
    log_level: u32,

    /// Solver portfolio spec, one character per diversification slot
    #[arg(long, default_value = "d")]
    satsolver: String,

    /// Whether solvers run in-process or stage payloads like subprocesses
    #[arg(long, value_parser = parse_appmode, default_value = "thread")]
    appmode: AppMode,

    /// Abort with a nonzero exit unless the mono result matches
    #[arg(long, value_parser = parse_expected_result)]
    assert_result: Option<SatResult>,

    /// Cross-check results against the done/ files after the run
    #[arg(long, default_value_t = false)]
    check_json_results: bool,

    /// Enable integrity checksums on payload transfer
    #[arg(long, default_value_t = false)]
    checksums: bool,

    /// Job API root directory
    #[arg(long, default_value = ".api/jobs.0")]
    api_dir: PathBuf,

    /// Number of scheduler processes in the local fabric
    #[arg(long, default_value = "1")]
    processes: usize,

    /// Job tree growth period in seconds (0 = grow immediately)
    #[arg(long, default_value = "0")]
    growth_period: f64,

    /// Grow job trees continuously instead of in discrete steps
    #[arg(long, default_value_t = false)]
    continuous_growth: bool,

    /// Per-process literal budget (0 = none)
    #[arg(long, default_value = "0")]
    size_limit_per_process: usize,

    /// Jitter job priorities by up to one percent
    #[arg(long, default_value_t = false)]
    jitter_priorities: bool,
}

fn parse_appmode(s: &str) -> Result<AppMode, String> {
    match s {
        "thread" => Ok(AppMode::Thread),
        "fork" => Ok(AppMode::Fork),
        other => Err(format!("unknown appmode '{other}'")),
    }
}

fn parse_expected_result(s: &str) -> Result<SatResult, String> {
    match s {
        "SAT" => Ok(SatResult::Sat),
        "UNSAT" => Ok(SatResult::Unsat),
        other => Err(format!("unknown result '{other}'")),
    }
}

fn verbosity_filter(level: u32) -> &'static str {
    match level {
        0 => "error",
        1 => "warn",
        2 => "info",
        3 => "debug",
        _ => "trace",
    }
}

#[tokio::main]
async fn main() -> std::process::ExitCode {
    let args = Args::parse();

    // Transport compatibility for forked solver subprocesses.
    std::env::set_var("RDMAV_FORK_SAFE", "1");
    timer::init();

    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new(verbosity_filter(args.log_level))),
        )
        .init();

    let config = ProcessConfig {
        threads_per_process: args.threads.max(1),
        expected_jobs: args.jobs,
        balance_cadence_factor: args.lbc.max(1),
        satsolver: args.satsolver.clone(),
        appmode: args.appmode,
        api_dir: args.api_dir.clone(),
        check_json_results: args.check_json_results,
        checksums: args.checksums,
        growth_period: args.growth_period,
        continuous_growth: args.continuous_growth,
        size_limit_per_process: args.size_limit_per_process,
        jitter_priorities: args.jitter_priorities,
        ..ProcessConfig::default()
    };

    let terminator = Terminator::new();
    let cancel = install_shutdown_handler(terminator.clone());

    let endpoints = LocalFabric::build(args.processes.max(1));
    let (result_tx, mut result_rx) = watch::channel(None);

    // Keep the adapter (and with it the watcher callbacks) alive for the
    // whole run.
    let mut _adapter_keepalive = None;
    let mut _watcher = None;
    let mut mono_tx = None;

    let mut handles = Vec::new();
    for endpoint in endpoints {
        let rank = endpoint.rank();
        let mut node = Node::new(config.clone(), Arc::new(endpoint), terminator.clone());

        if rank == 0 {
            node.set_result_watch(result_tx.clone());
            if args.mono.is_some() {
                let (tx, rx) = mpsc::unbounded_channel();
                node.set_intake(rx);
                mono_tx = Some(tx);
            } else {
                let (adapter, rx) = JobFileAdapter::new(config.clone(), terminator.clone());
                let adapter = Arc::new(adapter);
                match ApiDirWatcher::start(config.api_dir.clone(), adapter.clone()) {
                    Ok(watcher) => _watcher = Some(watcher),
                    Err(e) => {
                        tracing::error!(error = %e, "Failed to start API watcher");
                        return std::process::ExitCode::from(1);
                    }
                }
                node.set_adapter(adapter.clone(), rx);
                _adapter_keepalive = Some(adapter);
            }
        }

        let cancel = cancel.clone();
        handles.push(tokio::spawn(async move {
            node.run(cancel).await;
        }));
    }

    let mut exit = std::process::ExitCode::SUCCESS;

    if let Some(cnf) = args.mono {
        // Mono mode: one SAT job, result, exit.
        let formula = match dimacs::read_dimacs_file(&cnf) {
            Ok(f) => f,
            Err(e) => {
                tracing::error!(file = %cnf.display(), error = %e, "Cannot read formula");
                return std::process::ExitCode::from(1);
            }
        };
        let mut description = JobDescription::new(0, 1.0, false);
        description.application = Application::Sat;
        description.arrival = timer::elapsed_seconds();
        description.push_payload(formula.literals);
        let metadata = JobMetadata {
            description,
            file: "NONE".to_string(),
            dependencies: Vec::new(),
            done: false,
        };
        mono_tx
            .expect("mono intake must exist on rank 0")
            .send(metadata)
            .expect("rank 0 node must be running");

        let result = loop {
            if result_rx.changed().await.is_err() {
                break None;
            }
            let current = result_rx.borrow().clone();
            if current.is_some() {
                break current;
            }
        };

        if let Some(result) = result {
            println!("found result {}", result.result.as_str());
            if let Some(expected) = args.assert_result {
                if result.result != expected {
                    tracing::error!(
                        expected = expected.as_str(),
                        actual = result.result.as_str(),
                        "Result assertion failed"
                    );
                    exit = std::process::ExitCode::from(2);
                }
            }
        } else {
            exit = std::process::ExitCode::from(1);
        }
        cancel.cancel();
        terminator.set();
    } else {
        // API mode: serve jobs until a signal arrives.
        cancel.cancelled().await;
    }

    futures::future::join_all(handles).await;
    exit
}
