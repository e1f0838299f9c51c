mod test_harness;

use std::sync::Arc;

use mallob_lite::api::adapter::JobFileAdapter;
use mallob_lite::api::description::{JobResult, SatResult};
use mallob_lite::config::ProcessConfig;
use mallob_lite::terminator::Terminator;
use test_harness::ApiDirs;

fn adapter_for(dirs: &ApiDirs) -> (Arc<JobFileAdapter>, tokio::sync::mpsc::UnboundedReceiver<mallob_lite::api::description::JobMetadata>) {
    let config = ProcessConfig::default().with_api_dir(dirs.api_dir.clone());
    let (adapter, rx) = JobFileAdapter::new(config, Terminator::new());
    (Arc::new(adapter), rx)
}

#[test]
fn ingests_valid_job_file() {
    let dirs = ApiDirs::create("alice", 1.0);
    let (adapter, mut rx) = adapter_for(&dirs);

    dirs.submit(
        "alice.job1.json",
        r#"{ "user": "alice", "name": "job1", "file": "NONE", "priority": 0.5,
             "wallclock-limit": "10s", "max-demand": 4 }"#,
    );
    adapter.handle_new_job("alice.job1.json");

    let metadata = rx.try_recv().expect("job delivered");
    assert_eq!(metadata.description.id, 0);
    assert_eq!(metadata.description.revision, 0);
    assert!((metadata.description.priority - 0.5).abs() < 1e-9);
    assert!((metadata.description.wallclock_limit - 10.0).abs() < 1e-9);
    assert_eq!(metadata.description.max_demand, 4);
    assert!(!metadata.done);

    // The original moved to pending/ and mirrored to introduced/.
    assert!(dirs.pending_file("alice.job1.json").is_file());
    assert!(dirs.api_dir.join("introduced").join("alice.job1.json").is_file());
    assert!(!dirs.api_dir.join("new").join("alice.job1.json").exists());
}

#[test]
fn ids_are_stable_and_dense() {
    let dirs = ApiDirs::create("alice", 1.0);
    let (adapter, mut rx) = adapter_for(&dirs);

    for name in ["a", "b"] {
        dirs.submit(
            &format!("alice.{name}.json"),
            &format!(r#"{{ "user": "alice", "name": "{name}", "file": "NONE" }}"#),
        );
        adapter.handle_new_job(&format!("alice.{name}.json"));
    }
    let first = rx.try_recv().unwrap();
    let second = rx.try_recv().unwrap();
    assert_eq!(first.description.id, 0);
    assert_eq!(second.description.id, 1);
}

#[test]
fn rejects_missing_essential_fields() {
    let dirs = ApiDirs::create("alice", 1.0);
    let (adapter, mut rx) = adapter_for(&dirs);

    dirs.submit("broken.json", r#"{ "user": "alice" }"#);
    adapter.handle_new_job("broken.json");
    assert!(rx.try_recv().is_err(), "file without name must be ignored");
}

#[test]
fn rejects_unknown_user() {
    let dirs = ApiDirs::create("alice", 1.0);
    let (adapter, mut rx) = adapter_for(&dirs);

    dirs.submit(
        "mallory.j.json",
        r#"{ "user": "mallory", "name": "j", "file": "NONE" }"#,
    );
    adapter.handle_new_job("mallory.j.json");
    assert!(rx.try_recv().is_err());
}

#[test]
fn rejects_malformed_json() {
    let dirs = ApiDirs::create("alice", 1.0);
    let (adapter, mut rx) = adapter_for(&dirs);

    dirs.submit("bad.json", "{ not json at all");
    adapter.handle_new_job("bad.json");
    assert!(rx.try_recv().is_err());
}

#[test]
fn duplicate_ingest_is_ignored() {
    let dirs = ApiDirs::create("alice", 1.0);
    let (adapter, mut rx) = adapter_for(&dirs);

    let json = r#"{ "user": "alice", "name": "dup", "file": "NONE" }"#;
    dirs.submit("alice.dup.json", json);
    adapter.handle_new_job("alice.dup.json");
    assert!(rx.try_recv().is_ok());

    dirs.submit("alice.dup.json", json);
    adapter.handle_new_job("alice.dup.json");
    assert!(rx.try_recv().is_err(), "second ingest of same (id, rev) is dropped");
}

#[test]
fn incremental_revisions_share_the_id() {
    let dirs = ApiDirs::create("alice", 1.0);
    let (adapter, mut rx) = adapter_for(&dirs);

    dirs.submit(
        "alice.base.json",
        r#"{ "user": "alice", "name": "base", "file": "NONE", "incremental": true }"#,
    );
    adapter.handle_new_job("alice.base.json");
    let base = rx.try_recv().unwrap();
    assert_eq!(base.description.revision, 0);

    dirs.submit(
        "alice.inc1.json",
        r#"{ "user": "alice", "name": "inc1", "file": "NONE", "incremental": true,
             "precursor": "alice.base" }"#,
    );
    adapter.handle_new_job("alice.inc1.json");
    let inc = rx.try_recv().unwrap();
    assert_eq!(inc.description.id, base.description.id);
    assert_eq!(inc.description.revision, 1);

    // A done-notification ends the job and delivers a terminator.
    dirs.submit(
        "alice.fin.json",
        r#"{ "user": "alice", "name": "fin", "file": "NONE", "incremental": true,
             "precursor": "alice.inc1", "done": true }"#,
    );
    adapter.handle_new_job("alice.fin.json");
    let done = rx.try_recv().unwrap();
    assert!(done.done);
    assert_eq!(done.description.id, base.description.id);
}

#[test]
fn unknown_precursor_is_skipped() {
    let dirs = ApiDirs::create("alice", 1.0);
    let (adapter, mut rx) = adapter_for(&dirs);

    dirs.submit(
        "alice.orphan.json",
        r#"{ "user": "alice", "name": "orphan", "file": "NONE", "incremental": true,
             "precursor": "alice.ghost" }"#,
    );
    adapter.handle_new_job("alice.orphan.json");
    assert!(rx.try_recv().is_err());
}

#[test]
fn dependencies_resolve_to_forward_declared_ids() {
    let dirs = ApiDirs::create("alice", 1.0);
    let (adapter, mut rx) = adapter_for(&dirs);

    dirs.submit(
        "alice.dependent.json",
        r#"{ "user": "alice", "name": "dependent", "file": "NONE",
             "dependencies": ["alice.base"] }"#,
    );
    adapter.handle_new_job("alice.dependent.json");
    let dependent = rx.try_recv().unwrap();
    assert_eq!(dependent.dependencies.len(), 1);
    let forward_id = dependent.dependencies[0];

    // The dependency arrives later and must get the pre-assigned id.
    dirs.submit(
        "alice.base.json",
        r#"{ "user": "alice", "name": "base", "file": "NONE" }"#,
    );
    adapter.handle_new_job("alice.base.json");
    let base = rx.try_recv().unwrap();
    assert_eq!(base.description.id, forward_id);
}

#[test]
fn job_done_merges_result_into_done_file() {
    let dirs = ApiDirs::create("alice", 1.0);
    let (adapter, mut rx) = adapter_for(&dirs);

    dirs.submit(
        "alice.solve.json",
        r#"{ "user": "alice", "name": "solve", "file": "NONE" }"#,
    );
    adapter.handle_new_job("alice.solve.json");
    let metadata = rx.try_recv().unwrap();

    adapter.handle_job_done(&JobResult {
        id: metadata.description.id,
        revision: 0,
        result: SatResult::Sat,
        solution: vec![1, -2, 3],
    });

    let result = test_harness::read_result(&dirs.done_file("alice.solve.json"));
    assert_eq!(result["resultcode"], 10);
    assert_eq!(result["resultstring"], "SAT");
    assert_eq!(result["revision"], 0);
    assert_eq!(result["solution"], serde_json::json!([1, -2, 3]));
    assert!(result["responsetime"].as_f64().unwrap() >= 0.0);
    assert!(!dirs.pending_file("alice.solve.json").exists());
}

#[test]
fn priority_jitter_is_reproducible_under_a_seed() {
    let json = r#"{ "user": "alice", "name": "jit", "file": "NONE", "priority": 1.0 }"#;
    let mut priorities = Vec::new();
    for _ in 0..2 {
        let dirs = ApiDirs::create("alice", 1.0);
        let config = ProcessConfig {
            jitter_priorities: true,
            jitter_seed: Some(42),
            ..ProcessConfig::default()
        }
        .with_api_dir(dirs.api_dir.clone());
        let (adapter, mut rx) = JobFileAdapter::new(config, Terminator::new());
        dirs.submit("alice.jit.json", json);
        adapter.handle_new_job("alice.jit.json");
        priorities.push(rx.try_recv().unwrap().description.priority);
    }
    assert_eq!(priorities[0], priorities[1]);
    // Jitter stays within one percent of the nominal priority.
    assert!(priorities[0] >= 0.99 && priorities[0] < 1.0);
}

#[test]
fn result_deletion_cleans_up_non_incremental_jobs() {
    let dirs = ApiDirs::create("alice", 1.0);
    let (adapter, mut rx) = adapter_for(&dirs);

    dirs.submit(
        "alice.gone.json",
        r#"{ "user": "alice", "name": "gone", "file": "NONE" }"#,
    );
    adapter.handle_new_job("alice.gone.json");
    let _ = rx.try_recv().unwrap();

    assert!(adapter.lookup("alice.gone.json").is_some());
    adapter.handle_result_deleted("alice.gone.json");
    assert!(adapter.lookup("alice.gone.json").is_none());
}
