//! API directory watcher.
//!
//! Bridges filesystem events to adapter calls: file creations under `new/`
//! trigger ingestion, deletions under `done/` trigger registry cleanup.

use std::path::PathBuf;
use std::sync::Arc;

use notify::{Event, EventKind, RecommendedWatcher, RecursiveMode, Watcher};

use crate::api::adapter::JobFileAdapter;
use crate::error::Result;

pub struct ApiDirWatcher {
    // Dropping the watcher stops event delivery.
    _watcher: RecommendedWatcher,
}

impl ApiDirWatcher {
    /// Start watching the adapter's API root.
    ///
    /// Events are handled on notify's own thread; the adapter serializes
    /// them internally.
    pub fn start(api_dir: PathBuf, adapter: Arc<JobFileAdapter>) -> Result<Self> {
        let new_dir = api_dir.join("new");
        let done_dir = api_dir.join("done");

        let mut watcher = notify::recommended_watcher(move |res: notify::Result<Event>| {
            let event = match res {
                Ok(event) => event,
                Err(e) => {
                    tracing::warn!(error = %e, "File watcher error");
                    return;
                }
            };
            for path in &event.paths {
                let Some(name) = path.file_name().and_then(|n| n.to_str()) else {
                    continue;
                };
                if name.ends_with(".tmp") {
                    continue;
                }
                let in_new = path.parent().map(|p| p.ends_with("new")).unwrap_or(false);
                let in_done = path.parent().map(|p| p.ends_with("done")).unwrap_or(false);
                match event.kind {
                    EventKind::Create(_) | EventKind::Modify(_) if in_new => {
                        adapter.handle_new_job(name);
                    }
                    EventKind::Remove(_) if in_done => {
                        adapter.handle_result_deleted(name);
                    }
                    _ => {}
                }
            }
        })?;

        watcher.watch(&new_dir, RecursiveMode::NonRecursive)?;
        watcher.watch(&done_dir, RecursiveMode::NonRecursive)?;
        tracing::info!(api_dir = %api_dir.display(), "Watching job API directory");

        Ok(Self { _watcher: watcher })
    }
}
