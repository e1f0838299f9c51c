mod test_harness;

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{mpsc, watch};
use tokio_util::sync::CancellationToken;

use mallob_lite::api::adapter::JobFileAdapter;
use mallob_lite::api::description::{
    Application, JobDescription, JobMetadata, JobResult, SatResult,
};
use mallob_lite::comm::transport::{LocalFabric, Transport};
use mallob_lite::config::{AppMode, ProcessConfig};
use mallob_lite::node::Node;
use mallob_lite::terminator::Terminator;
use mallob_lite::util::{shmem, timer};
use test_harness::{sat_formula, unsat_formula, wait_until_async, ApiDirs, SAT_CNF, UNSAT_CNF};

struct Cluster {
    cancel: CancellationToken,
    terminator: Terminator,
    handles: Vec<tokio::task::JoinHandle<()>>,
    result_rx: watch::Receiver<Option<JobResult>>,
    intake: Option<mpsc::UnboundedSender<JobMetadata>>,
    adapter: Option<Arc<JobFileAdapter>>,
}

impl Cluster {
    /// Spin up `processes` nodes over a local fabric. With an API
    /// directory the client rank runs the file adapter, otherwise jobs are
    /// injected directly.
    fn start(config: ProcessConfig, processes: usize, with_adapter: bool) -> Self {
        timer::init();
        let terminator = Terminator::new();
        let cancel = CancellationToken::new();
        let endpoints = LocalFabric::build(processes);
        let (result_tx, result_rx) = watch::channel(None);

        let mut intake = None;
        let mut adapter_handle = None;
        let mut handles = Vec::new();
        for endpoint in endpoints {
            let rank = endpoint.rank();
            let mut node = Node::new(config.clone(), Arc::new(endpoint), terminator.clone());
            if rank == 0 {
                node.set_result_watch(result_tx.clone());
                if with_adapter {
                    let (adapter, rx) = JobFileAdapter::new(config.clone(), terminator.clone());
                    let adapter = Arc::new(adapter);
                    node.set_adapter(adapter.clone(), rx);
                    adapter_handle = Some(adapter);
                } else {
                    let (tx, rx) = mpsc::unbounded_channel();
                    node.set_intake(rx);
                    intake = Some(tx);
                }
            }
            let cancel = cancel.clone();
            handles.push(tokio::spawn(async move { node.run(cancel).await }));
        }

        Self {
            cancel,
            terminator,
            handles,
            result_rx,
            intake,
            adapter: adapter_handle,
        }
    }

    fn submit(&self, description: JobDescription) {
        self.intake
            .as_ref()
            .expect("direct intake")
            .send(JobMetadata {
                description,
                file: "NONE".to_string(),
                dependencies: Vec::new(),
                done: false,
            })
            .unwrap();
    }

    async fn await_result(&mut self, timeout: Duration) -> Option<JobResult> {
        let deadline = tokio::time::timeout(timeout, async {
            loop {
                if let Some(result) = self.result_rx.borrow().clone() {
                    return result;
                }
                if self.result_rx.changed().await.is_err() {
                    panic!("result channel closed");
                }
            }
        });
        deadline.await.ok()
    }

    async fn shut_down(self) {
        self.terminator.set();
        self.cancel.cancel();
        for handle in self.handles {
            let _ = handle.await;
        }
    }
}

fn sat_job(id: u32) -> JobDescription {
    let mut desc = JobDescription::new(id, 1.0, false);
    desc.application = Application::Sat;
    desc.arrival = timer::elapsed_seconds();
    desc.push_payload(sat_formula());
    desc
}

fn unsat_job(id: u32) -> JobDescription {
    let mut desc = JobDescription::new(id, 1.0, false);
    desc.application = Application::Sat;
    desc.arrival = timer::elapsed_seconds();
    desc.push_payload(unsat_formula());
    desc
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn mono_sat_single_process() {
    let mut cluster = Cluster::start(ProcessConfig::default(), 1, false);
    cluster.submit(sat_job(0));
    let result = cluster.await_result(Duration::from_secs(20)).await.unwrap();
    assert_eq!(result.result, SatResult::Sat);
    assert_eq!(result.id, 0);
    cluster.shut_down().await;
}

#[tokio::test(flavor = "multi_thread", worker_threads = 8)]
async fn mono_unsat_multi_process() {
    let config = ProcessConfig {
        threads_per_process: 2,
        ..ProcessConfig::default()
    };
    let mut cluster = Cluster::start(config, 4, false);
    cluster.submit(unsat_job(0));
    let result = cluster.await_result(Duration::from_secs(20)).await.unwrap();
    assert_eq!(result.result, SatResult::Unsat);
    cluster.shut_down().await;
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn fork_appmode_cleans_up_shared_memory() {
    let config = ProcessConfig {
        appmode: AppMode::Fork,
        ..ProcessConfig::default()
    };
    let mut cluster = Cluster::start(config, 1, false);
    cluster.submit(sat_job(0));
    let result = cluster.await_result(Duration::from_secs(20)).await.unwrap();
    assert_eq!(result.result, SatResult::Sat);
    cluster.shut_down().await;
    assert!(
        shmem::remaining_segments().is_empty(),
        "no shared-memory segment may survive termination"
    );
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn scheduling_mix_through_the_file_api() {
    let dirs = ApiDirs::create("alice", 1.0);
    let sat_path = dirs.write_cnf("mix_sat.cnf", SAT_CNF);
    let unsat_path = dirs.write_cnf("mix_unsat.cnf", UNSAT_CNF);

    let config = ProcessConfig::default().with_api_dir(dirs.api_dir.clone());
    let cluster = Cluster::start(config, 2, true);
    let adapter = cluster.adapter.clone().unwrap();

    for (name, path, expected) in [
        ("sat1", &sat_path, "SAT"),
        ("unsat1", &unsat_path, "UNSAT"),
        ("sat2", &sat_path, "SAT"),
        ("unsat2", &unsat_path, "UNSAT"),
    ] {
        dirs.submit(
            &format!("alice.{name}.json"),
            &format!(
                r#"{{ "user": "alice", "name": "{name}", "file": "{}" }}"#,
                path.display()
            ),
        );
        adapter.handle_new_job(&format!("alice.{name}.json"));
        let done = dirs.done_file(&format!("alice.{name}.json"));
        assert!(
            wait_until_async(Duration::from_secs(30), || done.is_file()).await,
            "done file for {name} must appear"
        );
        let result = test_harness::read_result(&done);
        assert_eq!(result["resultstring"], expected, "job {name}");
    }
    cluster.shut_down().await;
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn incremental_job_keeps_its_id_across_revisions() {
    let dirs = ApiDirs::create("alice", 1.0);
    let sat_path = dirs.write_cnf("base.cnf", SAT_CNF);
    // Revision 1 adds clauses forcing unsatisfiability.
    let unsat_path = dirs.write_cnf(
        "tighter.cnf",
        "p cnf 3 8\n1 2 0\n-1 3 0\n-2 3 0\n1 -3 0\n-3 0\n3 1 0\n-1 0\n1 2 0\n",
    );

    let config = ProcessConfig::default().with_api_dir(dirs.api_dir.clone());
    let cluster = Cluster::start(config, 1, true);
    let adapter = cluster.adapter.clone().unwrap();

    dirs.submit(
        "alice.base.json",
        &format!(
            r#"{{ "user": "alice", "name": "base", "file": "{}", "incremental": true }}"#,
            sat_path.display()
        ),
    );
    adapter.handle_new_job("alice.base.json");
    let done0 = dirs.done_file("alice.base.json");
    assert!(wait_until_async(Duration::from_secs(30), || done0.is_file()).await);
    let result0 = test_harness::read_result(&done0);
    assert_eq!(result0["resultstring"], "SAT");
    assert_eq!(result0["revision"], 0);

    dirs.submit(
        "alice.rev1.json",
        &format!(
            r#"{{ "user": "alice", "name": "rev1", "file": "{}", "incremental": true,
                 "precursor": "alice.base" }}"#,
            unsat_path.display()
        ),
    );
    adapter.handle_new_job("alice.rev1.json");
    let done1 = dirs.done_file("alice.rev1.json");
    assert!(wait_until_async(Duration::from_secs(30), || done1.is_file()).await);
    let result1 = test_harness::read_result(&done1);
    assert_eq!(result1["resultstring"], "UNSAT");
    assert_eq!(result1["revision"], 1);

    // The terminator revision removes the job from the registry.
    dirs.submit(
        "alice.fin.json",
        r#"{ "user": "alice", "name": "fin", "file": "NONE", "incremental": true,
             "precursor": "alice.rev1", "done": true }"#,
    );
    adapter.handle_new_job("alice.fin.json");
    assert!(
        wait_until_async(Duration::from_secs(10), || {
            adapter.lookup("alice.rev1.json").is_none()
        })
        .await
    );
    cluster.shut_down().await;
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn dependencies_gate_admission() {
    let dirs = ApiDirs::create("alice", 1.0);
    let sat_path = dirs.write_cnf("dep.cnf", SAT_CNF);

    let config = ProcessConfig::default().with_api_dir(dirs.api_dir.clone());
    let cluster = Cluster::start(config, 1, true);
    let adapter = cluster.adapter.clone().unwrap();

    // The dependent arrives first and must wait for its dependency.
    dirs.submit(
        "alice.second.json",
        &format!(
            r#"{{ "user": "alice", "name": "second", "file": "{}",
                 "dependencies": ["alice.first"] }}"#,
            sat_path.display()
        ),
    );
    adapter.handle_new_job("alice.second.json");

    let done_second = dirs.done_file("alice.second.json");
    tokio::time::sleep(Duration::from_millis(300)).await;
    assert!(!done_second.is_file(), "gated job must not run yet");

    dirs.submit(
        "alice.first.json",
        &format!(
            r#"{{ "user": "alice", "name": "first", "file": "{}" }}"#,
            sat_path.display()
        ),
    );
    adapter.handle_new_job("alice.first.json");

    assert!(wait_until_async(Duration::from_secs(30), || done_second.is_file()).await);
    cluster.shut_down().await;
}
