use crate::api::description::{Application, JobDescription, JobId, JobResult};
use crate::balance::LoadEntry;
use crate::util::payload_checksum;

pub type Rank = u32;

/// Tags for job-scoped traffic delivered to a job's `communicate` entry
/// point.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MessageTag {
    RequestCubes,
    SendCubes,
    ReturnFailedCubes,
    ReceivedFailedCubes,
    ExportClauses,
}

/// A job-scoped message: cube and clause traffic between tree neighbors.
#[derive(Debug, Clone)]
pub struct JobMessage {
    pub job_id: JobId,
    pub tag: MessageTag,
    pub payload: Vec<i32>,
}

/// A request to adopt one node index of a job's tree.
#[derive(Debug, Clone)]
pub struct JobRequest {
    pub job_id: JobId,
    pub application: Application,
    pub requested_node_index: usize,
    pub root_rank: Rank,
    pub requesting_rank: Rank,
    pub epoch: u32,
    pub num_hops: u32,
    pub priority: f64,
    pub arrival: f64,
}

/// Everything a process needs to start hosting one revision of a job.
#[derive(Debug, Clone)]
pub struct JobSignature {
    pub id: JobId,
    pub revision: u32,
    pub priority: f64,
    pub arrival: f64,
    pub wallclock_limit: f64,
    pub cpu_limit: f64,
    pub max_demand: usize,
    pub application: Application,
    pub incremental: bool,
    pub payload: Vec<i32>,
    /// Present when payload checksumming is enabled.
    pub checksum: Option<u64>,
}

impl JobSignature {
    pub fn from_description(desc: &JobDescription, with_checksum: bool) -> Self {
        let payload = desc
            .latest_payload()
            .map(|p| p.as_ref().clone())
            .unwrap_or_default();
        let checksum = with_checksum.then(|| payload_checksum(&payload));
        Self {
            id: desc.id,
            revision: desc.revision,
            priority: desc.priority,
            arrival: desc.arrival,
            wallclock_limit: desc.wallclock_limit,
            cpu_limit: desc.cpu_limit,
            max_demand: desc.max_demand,
            application: desc.application,
            incremental: desc.incremental,
            payload,
            checksum,
        }
    }

    pub fn verify_checksum(&self) -> bool {
        match self.checksum {
            Some(expected) => payload_checksum(&self.payload) == expected,
            None => true,
        }
    }

    pub fn into_description(self) -> JobDescription {
        let mut desc = JobDescription::new(self.id, self.priority, self.incremental);
        desc.arrival = self.arrival;
        desc.wallclock_limit = self.wallclock_limit;
        desc.cpu_limit = self.cpu_limit;
        desc.max_demand = self.max_demand;
        desc.application = self.application;
        desc.push_payload(self.payload);
        desc.revision = self.revision;
        desc
    }
}

/// Point-to-point fabric messages.
#[derive(Debug, Clone)]
pub enum Message {
    /// Job-scoped traffic for the router.
    Job(JobMessage),
    /// Ask the destination to adopt a tree node.
    JoinRequest(JobRequest),
    /// The destination committed to the request; the payload follows in
    /// `StartJob`.
    JoinAccept(JobRequest),
    JoinReject(JobRequest),
    /// Deliver the description for a committed node and activate it.
    StartJob {
        index: usize,
        volume: usize,
        signature: JobSignature,
    },
    /// A leaf outside the new volume released itself.
    ChildReleased { job_id: JobId, index: usize },
    /// New target volume for one job, propagated down its tree.
    VolumeUpdate { job_id: JobId, volume: usize, epoch: u32 },
    /// Load-tree reduction toward rank 0.
    ReduceLoad { epoch: u32, entries: Vec<LoadEntry> },
    /// Volume broadcast down the load tree.
    BroadcastVolumes {
        epoch: u32,
        volumes: Vec<(JobId, usize)>,
    },
    /// A node reports a definitive result toward the job root / client.
    ResultReport(JobResult),
    /// Tear down the job subtree rooted at the destination.
    Terminate { job_id: JobId },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn signature_checksum_round_trip() {
        let mut desc = JobDescription::new(3, 1.0, false);
        desc.push_payload(vec![1, -2, 0, 2, 0]);
        let signature = JobSignature::from_description(&desc, true);
        assert!(signature.verify_checksum());

        let mut tampered = signature.clone();
        tampered.payload[0] = 7;
        assert!(!tampered.verify_checksum());
    }

    #[test]
    fn signature_without_checksum_always_verifies() {
        let mut desc = JobDescription::new(3, 1.0, false);
        desc.push_payload(vec![1, 0]);
        let signature = JobSignature::from_description(&desc, false);
        assert!(signature.checksum.is_none());
        assert!(signature.verify_checksum());
    }

    #[test]
    fn signature_restores_the_description() {
        let mut desc = JobDescription::new(5, 2.5, true);
        desc.wallclock_limit = 30.0;
        desc.max_demand = 6;
        desc.push_payload(vec![1, 2, 0]);
        desc.revision = 2;

        let restored = JobSignature::from_description(&desc, false).into_description();
        assert_eq!(restored.id, 5);
        assert_eq!(restored.revision, 2);
        assert_eq!(restored.max_demand, 6);
        assert!(restored.incremental);
        assert_eq!(restored.latest_payload().unwrap().as_slice(), &[1, 2, 0]);
    }
}
