//! Job message router.
//!
//! Job-scoped traffic is delivered to the local instance of the addressed
//! job. Messages for absent or PAST jobs are dropped silently (the sender
//! may legitimately lag behind a termination); only ACTIVE jobs receive
//! deliveries.

use std::collections::HashMap;

use crate::api::description::JobId;
use crate::comm::message::{JobMessage, Rank};
use crate::job::{Job, JobState};

/// Route one message; returns the replies the job wants sent.
pub fn route(
    jobs: &mut HashMap<JobId, Job>,
    source: Rank,
    msg: JobMessage,
) -> Vec<(Rank, JobMessage)> {
    let Some(job) = jobs.get_mut(&msg.job_id) else {
        tracing::trace!(job_id = msg.job_id, "Dropping message for unknown job");
        return Vec::new();
    };
    match job.state() {
        JobState::Active => job.communicate(source, msg),
        JobState::Past => {
            tracing::trace!(job_id = msg.job_id, "Dropping message for past job");
            Vec::new()
        }
        state => {
            tracing::trace!(job_id = msg.job_id, %state, "Dropping message for non-active job");
            Vec::new()
        }
    }
}
