//! Shared-memory payload staging.
//!
//! In fork appmode, job payloads cross the process boundary through files
//! under `/dev/shm` named with the platform prefix. The prefix is the sole
//! cleanup key: `cleanup_all` removes every segment this process created,
//! and the test suite asserts none remain after termination.

use std::path::PathBuf;

use crate::error::Result;

/// Global shared-memory name prefix, kept compatible with the platform's
/// historical constant.
pub const SHMEM_PREFIX: &str = "edu.kit.iti.mallob";

fn shm_dir() -> PathBuf {
    PathBuf::from("/dev/shm")
}

fn segment_path(name: &str) -> PathBuf {
    shm_dir().join(format!("{}.{}.{}", SHMEM_PREFIX, std::process::id(), name))
}

/// Write a payload segment and return its path.
pub fn create_segment(name: &str, payload: &[i32]) -> Result<PathBuf> {
    let path = segment_path(name);
    let mut bytes = Vec::with_capacity(payload.len() * 4);
    for lit in payload {
        bytes.extend_from_slice(&lit.to_le_bytes());
    }
    let tmp = path.with_extension("tmp");
    std::fs::write(&tmp, &bytes)?;
    std::fs::rename(&tmp, &path)?;
    Ok(path)
}

/// Read a payload segment back into a literal stream.
pub fn read_segment(name: &str) -> Result<Vec<i32>> {
    let bytes = std::fs::read(segment_path(name))?;
    let mut out = Vec::with_capacity(bytes.len() / 4);
    for chunk in bytes.chunks_exact(4) {
        out.push(i32::from_le_bytes([chunk[0], chunk[1], chunk[2], chunk[3]]));
    }
    Ok(out)
}

/// Unlink one segment. Missing segments are not an error.
pub fn destroy_segment(name: &str) {
    let path = segment_path(name);
    if let Err(e) = std::fs::remove_file(&path) {
        if e.kind() != std::io::ErrorKind::NotFound {
            tracing::warn!(path = %path.display(), error = %e, "Failed to unlink shmem segment");
        }
    }
}

/// Remove every segment created by this process. Returns how many were removed.
pub fn cleanup_all() -> usize {
    let marker = format!("{}.{}.", SHMEM_PREFIX, std::process::id());
    let mut removed = 0;
    let Ok(entries) = std::fs::read_dir(shm_dir()) else {
        return 0;
    };
    for entry in entries.flatten() {
        let name = entry.file_name();
        if name.to_string_lossy().starts_with(&marker) && std::fs::remove_file(entry.path()).is_ok()
        {
            removed += 1;
        }
    }
    removed
}

/// Names of segments belonging to this process that still exist.
pub fn remaining_segments() -> Vec<String> {
    let marker = format!("{}.{}.", SHMEM_PREFIX, std::process::id());
    let Ok(entries) = std::fs::read_dir(shm_dir()) else {
        return Vec::new();
    };
    entries
        .flatten()
        .filter_map(|e| {
            let name = e.file_name().to_string_lossy().into_owned();
            name.starts_with(&marker).then_some(name)
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn round_trip_and_cleanup() {
        let payload = vec![1, -2, 0, 3, 0];
        create_segment("testseg", &payload).unwrap();
        assert_eq!(read_segment("testseg").unwrap(), payload);
        destroy_segment("testseg");
        assert!(remaining_segments().iter().all(|n| !n.ends_with("testseg")));
    }
}
