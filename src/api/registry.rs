use std::collections::HashMap;

use crate::api::description::JobId;

/// Bookkeeping for one ingested job file.
#[derive(Debug, Clone)]
pub struct JobImage {
    pub id: JobId,
    /// `user.name.json`, the file name used in `pending/` and `done/`.
    pub user_qualified_name: String,
    pub arrival: f64,
    pub incremental: bool,
}

/// Maps between user-facing job names and internal ids/revisions.
///
/// Ids are dense, minted from a running counter, and never reused; a name
/// referenced before its job file arrives (as a dependency) gets its id
/// forward-declared at revision 0.
#[derive(Debug, Default)]
pub struct JobRegistry {
    name_to_id_rev: HashMap<String, (JobId, u32)>,
    id_to_latest_rev: HashMap<JobId, u32>,
    images: HashMap<(JobId, u32), JobImage>,
    running_id: JobId,
}

impl JobRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Look up the `(id, revision)` currently associated with a name.
    pub fn lookup(&self, name: &str) -> Option<(JobId, u32)> {
        self.name_to_id_rev.get(name).copied()
    }

    /// Resolve a name to its id, minting a fresh one at first sight.
    pub fn resolve_or_mint(&mut self, name: &str) -> JobId {
        if let Some((id, _)) = self.name_to_id_rev.get(name) {
            return *id;
        }
        let id = self.mint_id();
        self.name_to_id_rev.insert(name.to_string(), (id, 0));
        tracing::debug!(name, id, "Mapped job to internal id");
        id
    }

    fn mint_id(&mut self) -> JobId {
        let id = self.running_id;
        self.running_id += 1;
        id
    }

    /// Advance a name to the next revision of an existing id.
    pub fn bump_revision(&mut self, name: &str, id: JobId, revision: u32) {
        self.name_to_id_rev.insert(name.to_string(), (id, revision));
        self.id_to_latest_rev.insert(id, revision);
    }

    pub fn latest_revision(&self, id: JobId) -> Option<u32> {
        self.id_to_latest_rev.get(&id).copied()
    }

    pub fn insert_image(&mut self, revision: u32, image: JobImage) {
        self.id_to_latest_rev.insert(image.id, revision);
        self.images.insert((image.id, revision), image);
    }

    pub fn image(&self, id: JobId, revision: u32) -> Option<&JobImage> {
        self.images.get(&(id, revision))
    }

    pub fn has_image(&self, id: JobId, revision: u32) -> bool {
        self.images.contains_key(&(id, revision))
    }

    /// Drop every trace of an id (incremental job reported done).
    pub fn erase_job(&mut self, name: &str, id: JobId) {
        self.name_to_id_rev.remove(name);
        if let Some(latest) = self.id_to_latest_rev.remove(&id) {
            for rev in 0..=latest {
                self.images.remove(&(id, rev));
            }
        }
    }

    /// Drop the entry for a single `(name, id, rev)` triple, used when a
    /// result file is deleted by the consumer.
    pub fn erase_revision(&mut self, name: &str) -> Option<(JobId, u32)> {
        let (id, rev) = self.name_to_id_rev.remove(name)?;
        self.images.remove(&(id, rev));
        Some((id, rev))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ids_are_dense_and_stable() {
        let mut reg = JobRegistry::new();
        let a = reg.resolve_or_mint("alice.j1.json");
        let b = reg.resolve_or_mint("alice.j2.json");
        assert_eq!(a, 0);
        assert_eq!(b, 1);
        // Same name resolves to the same id forever.
        assert_eq!(reg.resolve_or_mint("alice.j1.json"), a);
    }

    #[test]
    fn forward_declared_dependency_keeps_its_id() {
        let mut reg = JobRegistry::new();
        let dep = reg.resolve_or_mint("bob.base.json");
        // Job file for the dependency arrives later and gets the same id.
        assert_eq!(reg.resolve_or_mint("bob.base.json"), dep);
    }
}
