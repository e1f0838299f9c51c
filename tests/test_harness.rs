//! Shared utilities for integration tests: API directory scaffolding,
//! tiny CNF fixtures, and polling helpers.
#![allow(dead_code)]

use std::path::{Path, PathBuf};
use std::time::{Duration, Instant};

use tempfile::TempDir;

/// A satisfiable 3-variable formula.
pub const SAT_CNF: &str = "p cnf 3 4\n1 2 0\n-1 3 0\n-2 3 0\n1 -3 0\n";

/// An unsatisfiable formula (all sign combinations over two variables).
pub const UNSAT_CNF: &str = "p cnf 2 4\n1 2 0\n1 -2 0\n-1 2 0\n-1 -2 0\n";

pub fn sat_formula() -> Vec<i32> {
    parse(SAT_CNF)
}

pub fn unsat_formula() -> Vec<i32> {
    parse(UNSAT_CNF)
}

fn parse(cnf: &str) -> Vec<i32> {
    cnf.lines()
        .filter(|l| !l.starts_with('p') && !l.starts_with('c') && !l.trim().is_empty())
        .flat_map(|l| l.split_whitespace().map(|t| t.parse::<i32>().unwrap()))
        .collect()
}

/// Scaffolding for one client's API root plus its users directory.
pub struct ApiDirs {
    pub root: TempDir,
    pub api_dir: PathBuf,
}

impl ApiDirs {
    /// Lay out `<root>/jobs.0/{new,pending,introduced,done}` and
    /// `<root>/users/<user>.json` with the given priority.
    pub fn create(user: &str, user_priority: f64) -> Self {
        let root = TempDir::new().expect("tempdir");
        let api_dir = root.path().join("jobs.0");
        for sub in ["new", "pending", "introduced", "done"] {
            std::fs::create_dir_all(api_dir.join(sub)).unwrap();
        }
        let users = root.path().join("users");
        std::fs::create_dir_all(&users).unwrap();
        std::fs::write(
            users.join(format!("{user}.json")),
            format!(r#"{{ "id": "{user}", "priority": {user_priority} }}"#),
        )
        .unwrap();
        Self { root, api_dir }
    }

    /// Drop a job JSON into `new/` and return its file name.
    pub fn submit(&self, file_name: &str, json: &str) -> String {
        std::fs::write(self.api_dir.join("new").join(file_name), json).unwrap();
        file_name.to_string()
    }

    /// Write a CNF fixture next to the API root and return its path.
    pub fn write_cnf(&self, name: &str, content: &str) -> PathBuf {
        let path = self.root.path().join(name);
        std::fs::write(&path, content).unwrap();
        path
    }

    pub fn pending_file(&self, user_qualified: &str) -> PathBuf {
        self.api_dir.join("pending").join(user_qualified)
    }

    pub fn done_file(&self, user_qualified: &str) -> PathBuf {
        self.api_dir.join("done").join(user_qualified)
    }
}

/// Poll `cond` until it holds or `timeout` expires.
pub fn wait_until(timeout: Duration, mut cond: impl FnMut() -> bool) -> bool {
    let deadline = Instant::now() + timeout;
    while Instant::now() < deadline {
        if cond() {
            return true;
        }
        std::thread::sleep(Duration::from_millis(10));
    }
    cond()
}

/// Async variant of [`wait_until`] that yields to the runtime.
pub async fn wait_until_async(timeout: Duration, mut cond: impl FnMut() -> bool) -> bool {
    let deadline = Instant::now() + timeout;
    while Instant::now() < deadline {
        if cond() {
            return true;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    cond()
}

/// Read a `done/` file and return its `result` object.
pub fn read_result(path: &Path) -> serde_json::Value {
    let content = std::fs::read_to_string(path).expect("done file readable");
    let json: serde_json::Value = serde_json::from_str(&content).expect("done file is JSON");
    json.get("result").cloned().expect("result object present")
}
