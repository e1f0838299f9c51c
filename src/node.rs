//! Per-process main loop.
//!
//! One cooperative scheduler task per rank drives everything: adapter
//! intake (rank 0 is the client), transport polling and routing, the
//! balancing cadence, tree growth and shrinkage, resource-limit checks,
//! and result plumbing back to the API.

use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::Arc;

use tokio::sync::{mpsc, watch};
use tokio_util::sync::CancellationToken;

use crate::api::adapter::JobFileAdapter;
use crate::api::description::{Application, JobDescription, JobId, JobMetadata, JobResult};
use crate::balance::{BalanceAction, Balancer, LoadEntry};
use crate::comm::message::{JobRequest, JobSignature, Message, Rank};
use crate::comm::router;
use crate::comm::transport::Transport;
use crate::config::{AppMode, ProcessConfig};
use crate::job::{Job, JobState};
use crate::terminator::Terminator;
use crate::util::dimacs;
use crate::util::{shmem, timer};

/// A job waiting for its dependencies to be admitted.
struct GatedJob {
    description: JobDescription,
    dependencies: Vec<JobId>,
}

pub struct Node {
    rank: Rank,
    config: ProcessConfig,
    transport: Arc<dyn Transport>,
    terminator: Terminator,
    jobs: HashMap<JobId, Job>,
    balancer: Balancer,

    // Client-side state (rank 0 only).
    adapter: Option<Arc<JobFileAdapter>>,
    adapter_rx: Option<mpsc::UnboundedReceiver<JobMetadata>>,
    descriptions: HashMap<JobId, JobDescription>,
    admitted: HashSet<JobId>,
    gated: VecDeque<GatedJob>,
    handled_results: HashSet<(JobId, u32)>,
    result_watch: Option<watch::Sender<Option<JobResult>>>,

    // Join bookkeeping on the requesting side: (job, child index) -> time.
    outstanding_joins: HashMap<(JobId, usize), f64>,
    join_attempts: HashMap<(JobId, usize), u32>,

    /// Non-root nodes that released themselves, kept on standby for a
    /// while in case the tree regrows this way.
    standby_since: HashMap<JobId, f64>,

    last_balance: f64,
}

impl Node {
    pub fn new(config: ProcessConfig, transport: Arc<dyn Transport>, terminator: Terminator) -> Self {
        let rank = transport.rank();
        let size = transport.size();
        let expected_jobs = config.expected_jobs;
        Self {
            rank,
            config,
            transport,
            terminator,
            jobs: HashMap::with_capacity(expected_jobs),
            balancer: Balancer::new(rank, size),
            adapter: None,
            adapter_rx: None,
            descriptions: HashMap::with_capacity(expected_jobs),
            admitted: HashSet::new(),
            gated: VecDeque::new(),
            handled_results: HashSet::new(),
            result_watch: None,
            outstanding_joins: HashMap::new(),
            join_attempts: HashMap::new(),
            standby_since: HashMap::new(),
            last_balance: 0.0,
        }
    }

    /// Attach the job-file adapter intake (the client role, rank 0).
    pub fn set_adapter(
        &mut self,
        adapter: Arc<JobFileAdapter>,
        rx: mpsc::UnboundedReceiver<JobMetadata>,
    ) {
        self.adapter = Some(adapter);
        self.adapter_rx = Some(rx);
    }

    /// Attach a direct intake channel without an adapter (mono mode).
    pub fn set_intake(&mut self, rx: mpsc::UnboundedReceiver<JobMetadata>) {
        self.adapter_rx = Some(rx);
    }

    /// Final results are published here (mono mode and tests).
    pub fn set_result_watch(&mut self, tx: watch::Sender<Option<JobResult>>) {
        self.result_watch = Some(tx);
    }

    /// Run the scheduler loop until cancelled.
    pub async fn run(mut self, cancel: CancellationToken) {
        let mut interval =
            tokio::time::interval(tokio::time::Duration::from_millis(self.config.poll_quantum_ms));
        tracing::info!(rank = self.rank, "Node starts");
        loop {
            tokio::select! {
                _ = interval.tick() => {
                    self.tick();
                    if self.terminator.is_set() {
                        break;
                    }
                }
                _ = cancel.cancelled() => break,
            }
        }
        self.shutdown();
    }

    fn shutdown(&mut self) {
        let ids: Vec<JobId> = self.jobs.keys().copied().collect();
        for id in ids {
            self.terminate_job(id);
        }
        // Give application threads a moment to observe their flags, then
        // reap whatever is destructible.
        for _ in 0..100 {
            self.jobs.retain(|_, job| !job.is_destructible());
            if self.jobs.is_empty() {
                break;
            }
            std::thread::sleep(std::time::Duration::from_millis(10));
        }
        let removed = shmem::cleanup_all();
        if removed > 0 {
            tracing::warn!(rank = self.rank, removed, "Removed leftover shmem segments");
        }
        tracing::info!(rank = self.rank, "Node exits");
    }

    fn tick(&mut self) {
        let now = timer::elapsed_seconds();
        self.drain_intake();
        self.poll_transport();
        self.communicate_jobs();
        self.poll_results();
        self.balance_if_due(now);
        self.check_limits(now);
        self.revert_stale_commitments(now);
        self.resume_suspended_if_idle();
        self.expire_standby_orphans(now);
        self.reap_destructible();
    }

    /// A preempted job gets its process back once nothing else is active
    /// or committed here.
    fn resume_suspended_if_idle(&mut self) {
        let busy = self.jobs.values().any(|j| {
            j.state() == JobState::Active
                || (j.state() == JobState::Inactive && j.commitment().is_some())
        });
        if busy {
            return;
        }
        let candidate = self
            .jobs
            .values()
            .filter(|j| j.state() == JobState::Suspended)
            .max_by(|a, b| a.priority().total_cmp(&b.priority()))
            .map(|j| j.id());
        if let Some(id) = candidate {
            self.jobs.get_mut(&id).unwrap().resume();
        }
    }

    /// Released tree nodes linger on standby for possible re-adoption;
    /// after a grace period they are torn down for good.
    fn expire_standby_orphans(&mut self, now: f64) {
        let grace = 10.0 * self.config.balance_interval_ms() as f64 / 1000.0;
        let expired: Vec<JobId> = self
            .standby_since
            .iter()
            .filter(|&(_, t)| now - t > grace)
            .map(|(&id, _)| id)
            .collect();
        for id in expired {
            self.standby_since.remove(&id);
            let orphaned = self
                .jobs
                .get(&id)
                .map(|j| j.state() == JobState::Standby && j.commitment().is_none())
                .unwrap_or(false);
            if orphaned {
                self.terminate_job(id);
            }
        }
    }

    // ------------------------------------------------------------------
    // Intake and admission (client role)

    fn drain_intake(&mut self) {
        let Some(rx) = self.adapter_rx.as_mut() else {
            return;
        };
        let mut incoming = Vec::new();
        while let Ok(metadata) = rx.try_recv() {
            incoming.push(metadata);
        }
        for metadata in incoming {
            self.handle_metadata(metadata);
        }
        // Dependencies may have been satisfied by the batch above.
        let mut still_gated = VecDeque::new();
        while let Some(gated) = self.gated.pop_front() {
            if gated.dependencies.iter().all(|d| self.admitted.contains(d)) {
                self.admit(gated.description);
            } else {
                still_gated.push_back(gated);
            }
        }
        self.gated = still_gated;
    }

    fn handle_metadata(&mut self, metadata: JobMetadata) {
        let id = metadata.description.id;
        if metadata.done {
            // Terminator notification of an incremental job.
            tracing::info!(id, "Incremental job concluded");
            self.terminate_job(id);
            self.descriptions.remove(&id);
            self.admitted.remove(&id);
            return;
        }

        let mut description = metadata.description;
        if description.num_revisions() == 0 {
            // The adapter assigned the revision; loading the payload must
            // not clobber it.
            let revision = description.revision;
            match self.load_payload(&metadata.file) {
                Some(payload) => description.push_payload(payload),
                // DUMMY jobs carry no formula.
                None if description.application == Application::Dummy => {
                    description.push_payload(Vec::new());
                }
                None => {
                    tracing::warn!(id, file = %metadata.file, "Cannot load job payload");
                    return;
                }
            }
            description.revision = revision;
        }

        if self.config.appmode == AppMode::Fork {
            // The payload crosses its shared-memory segment and is read
            // back out, exactly as a forked solver would consume it.
            if let Some(payload) = description.latest_payload().map(|p| p.as_ref().clone()) {
                let staged = self.stage_through_shmem(id, description.revision, payload);
                description.replace_latest_payload(staged);
            }
        }

        if !metadata.dependencies.iter().all(|d| self.admitted.contains(d)) {
            tracing::info!(id, deps = ?metadata.dependencies, "Holding job until dependencies admitted");
            self.gated.push_back(GatedJob {
                description,
                dependencies: metadata.dependencies,
            });
            return;
        }
        self.admit(description);
    }

    /// Round-trip a payload through its shared-memory segment. Falls back
    /// to the in-process copy when staging fails.
    fn stage_through_shmem(&self, id: JobId, revision: u32, payload: Vec<i32>) -> Vec<i32> {
        let name = format!("job.{id}.{revision}");
        match shmem::create_segment(&name, &payload).and_then(|_| shmem::read_segment(&name)) {
            Ok(staged) => staged,
            Err(e) => {
                tracing::warn!(id, error = %e, "Shared-memory staging failed; keeping payload in process");
                payload
            }
        }
    }

    fn load_payload(&self, file: &str) -> Option<Vec<i32>> {
        if file == "NONE" || file.is_empty() {
            return None;
        }
        match dimacs::read_dimacs_file(std::path::Path::new(file)) {
            Ok(formula) => Some(formula.literals),
            Err(e) => {
                tracing::warn!(file, error = %e, "DIMACS parse failure");
                None
            }
        }
    }

    /// Start hosting the root node of a (revision of a) job on this rank.
    fn admit(&mut self, description: JobDescription) {
        let id = description.id;
        let revision = description.revision;
        self.admitted.insert(id);

        match self.jobs.get_mut(&id) {
            None => {
                let mut job = Job::new(&self.config, self.transport.size(), self.rank, id);
                job.update_tree(0, self.rank, None);
                job.start(description.clone());
                self.jobs.insert(id, job);
                tracing::info!(id, revision, "Admitted job");
            }
            Some(job) => match job.state() {
                JobState::Standby => {
                    job.restart(description.clone());
                    tracing::info!(id, revision, "Restarted job with new revision");
                }
                JobState::Active => {
                    tracing::warn!(id, revision, "New revision for active job; interrupting first");
                    job.interrupt();
                    job.restart(description.clone());
                }
                state => {
                    tracing::warn!(id, %state, "Cannot apply revision in this state");
                    return;
                }
            },
        }
        self.descriptions.insert(id, description);
    }

    // ------------------------------------------------------------------
    // Transport

    fn poll_transport(&mut self) {
        // Bounded drain so one chatty peer cannot starve the tick.
        for _ in 0..1024 {
            let Some((source, msg)) = self.transport.try_recv() else {
                return;
            };
            self.dispatch(source, msg);
        }
    }

    fn dispatch(&mut self, source: Rank, msg: Message) {
        match msg {
            Message::Job(job_msg) => {
                let replies = router::route(&mut self.jobs, source, job_msg);
                for (dest, reply) in replies {
                    self.send(dest, Message::Job(reply));
                }
            }
            Message::JoinRequest(request) => self.handle_join_request(source, request),
            Message::JoinAccept(request) => self.handle_join_accept(source, request),
            Message::JoinReject(request) => self.handle_join_reject(request),
            Message::StartJob {
                index,
                volume,
                signature,
            } => self.handle_start_job(index, volume, signature),
            Message::ChildReleased { job_id, index } => {
                self.outstanding_joins.remove(&(job_id, index));
                if let Some(job) = self.jobs.get_mut(&job_id) {
                    job.tree_mut().unset_child_rank(index);
                }
            }
            Message::VolumeUpdate { job_id, volume, .. } => {
                self.apply_volume(job_id, volume);
            }
            Message::ReduceLoad { epoch, entries } => {
                let action = self.balancer.digest_reduction(epoch, entries);
                self.perform_balance_action(action);
            }
            Message::BroadcastVolumes { epoch, volumes } => {
                let children = self.balancer.broadcast_targets();
                for child in children {
                    self.send(
                        child,
                        Message::BroadcastVolumes {
                            epoch,
                            volumes: volumes.clone(),
                        },
                    );
                }
                for (job_id, volume) in volumes {
                    self.apply_volume(job_id, volume);
                }
            }
            Message::ResultReport(result) => self.handle_result(result),
            Message::Terminate { job_id } => self.terminate_job(job_id),
        }
    }

    fn send(&self, dest: Rank, msg: Message) {
        if let Err(e) = self.transport.send(dest, msg) {
            tracing::warn!(dest, error = %e, "Send failed");
        }
    }

    // ------------------------------------------------------------------
    // Join protocol

    fn handle_join_request(&mut self, source: Rank, request: JobRequest) {
        if self.terminator.is_set() {
            self.send(source, Message::JoinReject(request));
            return;
        }
        let job_id = request.job_id;

        if let Some(job) = self.jobs.get_mut(&job_id) {
            // Already hosting this job: only a standby node may rejoin.
            if job.state() == JobState::Standby && job.commitment().is_none() {
                job.commit(request.clone());
                self.send(source, Message::JoinAccept(request));
            } else {
                self.send(source, Message::JoinReject(request));
            }
            return;
        }

        // Busy processes may preempt a strictly lower-priority active job;
        // temperature breaks ties among equals.
        let elapsed = timer::elapsed_seconds();
        let active_ids: Vec<JobId> = self
            .jobs
            .values()
            .filter(|j| j.state() == JobState::Active)
            .map(|j| j.id())
            .collect();
        if !active_ids.is_empty() {
            let mut victim: Option<(JobId, f64, f64)> = None;
            for id in active_ids {
                let job = self.jobs.get_mut(&id).unwrap();
                let (priority, temperature) = (job.priority(), job.get_temperature(elapsed));
                let colder = victim
                    .map(|(_, p, t)| (priority, temperature) < (p, t))
                    .unwrap_or(true);
                if colder {
                    victim = Some((id, priority, temperature));
                }
            }
            let (victim_id, priority, _) = victim.unwrap();
            if request.priority <= priority {
                self.send(source, Message::JoinReject(request));
                return;
            }
            tracing::info!(job_id, victim = victim_id, "Preempting job for hotter request");
            self.jobs.get_mut(&victim_id).unwrap().suspend();
        }

        let mut job = Job::new(&self.config, self.transport.size(), self.rank, job_id);
        job.commit(request.clone());
        self.jobs.insert(job_id, job);
        self.send(source, Message::JoinAccept(request));
    }

    fn handle_join_accept(&mut self, source: Rank, request: JobRequest) {
        let key = (request.job_id, request.requested_node_index);
        self.outstanding_joins.remove(&key);
        self.join_attempts.remove(&key);

        let Some(job) = self.jobs.get_mut(&request.job_id) else {
            // The job ended while the join was in flight; release the peer.
            self.send(source, Message::Terminate { job_id: request.job_id });
            return;
        };
        if job.state() != JobState::Active {
            self.send(source, Message::Terminate { job_id: request.job_id });
            return;
        }
        let Some(description) = job.description() else {
            return;
        };
        let signature = JobSignature::from_description(description, self.config.checksums);
        let volume = job.volume();
        job.tree_mut().set_child_rank(request.requested_node_index, source);
        self.send(
            source,
            Message::StartJob {
                index: request.requested_node_index,
                volume,
                signature,
            },
        );
    }

    fn handle_join_reject(&mut self, request: JobRequest) {
        let key = (request.job_id, request.requested_node_index);
        self.outstanding_joins.remove(&key);
        *self.join_attempts.entry(key).or_insert(0) += 1;
    }

    fn handle_start_job(&mut self, index: usize, volume: usize, signature: JobSignature) {
        if !signature.verify_checksum() {
            tracing::warn!(job_id = signature.id, "Payload checksum mismatch; dropping start");
            if let Some(job) = self.jobs.get_mut(&signature.id) {
                job.uncommit();
            }
            return;
        }
        let Some(job) = self.jobs.get_mut(&signature.id) else {
            return;
        };
        if job.commitment().is_none() {
            tracing::warn!(job_id = signature.id, "Start without commitment; dropping");
            return;
        }
        let description = signature.into_description();
        match job.state() {
            JobState::Inactive => job.start(description),
            JobState::Standby => {
                // The commitment already moved the tree position.
                job.uncommit();
                job.restart(description);
            }
            state => {
                tracing::warn!(job_id = job.id(), %state, "Unexpected state on start");
                return;
            }
        }
        job.update_volume(volume);
        tracing::debug!(job_id = job.id(), index, volume, "Joined job tree");
    }

    // ------------------------------------------------------------------
    // Communication and results

    fn communicate_jobs(&mut self) {
        let mut outgoing = Vec::new();
        for job in self.jobs.values_mut() {
            if job.wants_to_communicate() {
                for (dest, msg) in job.begin_communication() {
                    outgoing.push((dest, Message::Job(msg)));
                }
            }
        }
        for (dest, msg) in outgoing {
            self.send(dest, msg);
        }
    }

    fn poll_results(&mut self) {
        let mut reports = Vec::new();
        for job in self.jobs.values_mut() {
            if let Some((result, solution)) = job.solve_loop() {
                tracing::info!("{} : found result {}", job.name(), result);
                reports.push((
                    job.tree().is_root(),
                    job.tree().root_rank(),
                    JobResult {
                        id: job.id(),
                        revision: job.revision(),
                        result,
                        solution,
                    },
                ));
            }
        }
        for (is_root, root_rank, result) in reports {
            if is_root {
                self.handle_result(result);
            } else {
                self.send(root_rank, Message::ResultReport(result));
            }
        }
    }

    /// A definitive result reached the job's root (or the client).
    fn handle_result(&mut self, result: JobResult) {
        let key = (result.id, result.revision);
        if !self.handled_results.insert(key) {
            return;
        }

        let is_client = self.rank == 0;
        if !is_client {
            // Forward toward the client.
            self.send(0, Message::ResultReport(result));
            return;
        }

        tracing::info!(
            id = result.id,
            revision = result.revision,
            result = %result.result,
            "Job concluded"
        );
        if let Some(adapter) = self.adapter.as_ref() {
            adapter.handle_job_done(&result);
            if self.config.check_json_results && !adapter.verify_done_file(&result) {
                tracing::warn!(id = result.id, "done/ file does not match the reported result");
            }
        }

        let incremental = self
            .descriptions
            .get(&result.id)
            .map(|d| d.incremental)
            .unwrap_or(false);
        if incremental {
            // Keep the root on standby for the next revision; release the
            // rest of the tree.
            if let Some(job) = self.jobs.get_mut(&result.id) {
                let children: Vec<Rank> = job.tree().child_ranks().collect();
                if job.state() == JobState::Active {
                    job.interrupt();
                }
                for child in children {
                    self.send(child, Message::Terminate { job_id: result.id });
                }
            }
        } else {
            self.terminate_job(result.id);
        }

        if let Some(tx) = self.result_watch.as_ref() {
            let _ = tx.send(Some(result));
        }
    }

    /// Tear down the local instance and forward the teardown to children.
    fn terminate_job(&mut self, job_id: JobId) {
        let Some(job) = self.jobs.get_mut(&job_id) else {
            return;
        };
        if job.state() == JobState::Past {
            return;
        }
        let children: Vec<Rank> = job.tree().child_ranks().collect();
        job.terminate();
        for child in children {
            self.send(child, Message::Terminate { job_id });
        }
        self.outstanding_joins.retain(|(id, _), _| *id != job_id);
        self.join_attempts.retain(|(id, _), _| *id != job_id);
        self.standby_since.remove(&job_id);
        if self.rank == 0 && self.config.appmode == AppMode::Fork {
            if let Some(desc) = self.descriptions.get(&job_id) {
                for rev in 0..=desc.revision {
                    shmem::destroy_segment(&format!("job.{job_id}.{rev}"));
                }
            }
        }
    }

    fn reap_destructible(&mut self) {
        self.jobs.retain(|_, job| !job.is_destructible());
    }

    // ------------------------------------------------------------------
    // Balancing and tree reorganization

    fn balance_if_due(&mut self, now: f64) {
        let interval = self.config.balance_interval_ms() as f64 / 1000.0;
        if now - self.last_balance < interval {
            return;
        }
        self.last_balance = now;

        let entries: Vec<LoadEntry> = self
            .jobs
            .values()
            .filter(|j| j.state() == JobState::Active && j.tree().is_root())
            .map(|j| LoadEntry {
                job_id: j.id(),
                priority: j.priority(),
                demand: j.get_demand(now),
                arrival: j.description().map(|d| d.arrival).unwrap_or(0.0),
            })
            .collect();
        let action = self.balancer.begin_epoch(entries);
        self.perform_balance_action(action);
    }

    fn perform_balance_action(&mut self, action: Option<BalanceAction>) {
        match action {
            Some(BalanceAction::SendUp {
                parent,
                epoch,
                entries,
            }) => {
                self.send(parent, Message::ReduceLoad { epoch, entries });
            }
            Some(BalanceAction::Broadcast { epoch, volumes }) => {
                let children = self.balancer.broadcast_targets();
                for child in children {
                    self.send(
                        child,
                        Message::BroadcastVolumes {
                            epoch,
                            volumes: volumes.clone(),
                        },
                    );
                }
                for (job_id, volume) in volumes {
                    self.apply_volume(job_id, volume);
                }
            }
            None => {}
        }
    }

    /// Reorganize the local node of one job toward its new volume.
    fn apply_volume(&mut self, job_id: JobId, volume: usize) {
        let Some(job) = self.jobs.get_mut(&job_id) else {
            return;
        };
        if job.state() != JobState::Active {
            return;
        }

        let index = job.tree().index();
        if volume == 0 && job.tree().is_root() {
            // The job lost its share entirely this round.
            job.suspend();
            return;
        }
        if index >= volume && !job.tree().is_root() {
            // This leaf falls outside the new tree: release toward the
            // parent and go dormant.
            let parent = job.tree().parent_rank();
            job.interrupt();
            self.standby_since.insert(job_id, timer::elapsed_seconds());
            if let Some(parent) = parent {
                self.send(parent, Message::ChildReleased { job_id, index });
            }
            return;
        }

        job.update_volume(volume);
        let epoch = self.balancer.epoch();
        let open = job.tree().open_child_slots(volume);
        let priority = job.priority();
        let (application, arrival) = job
            .description()
            .map(|d| (d.application, d.arrival))
            .unwrap_or((Application::Sat, 0.0));
        let root_rank = job.tree().root_rank();
        let children: Vec<Rank> = job.tree().child_ranks().collect();

        let mut to_send = Vec::new();
        for child_index in open {
            let key = (job_id, child_index);
            if self.outstanding_joins.contains_key(&key) {
                continue;
            }
            let attempt = self.join_attempts.get(&key).copied().unwrap_or(0);
            let Some(candidate) = self.pick_join_candidate(root_rank, child_index, attempt) else {
                continue;
            };
            self.outstanding_joins.insert(key, timer::elapsed_seconds());
            to_send.push((
                candidate,
                Message::JoinRequest(JobRequest {
                    job_id,
                    application,
                    requested_node_index: child_index,
                    root_rank,
                    requesting_rank: self.rank,
                    epoch,
                    num_hops: attempt,
                    priority,
                    arrival,
                }),
            ));
        }
        // Children learn the new volume immediately; the global broadcast
        // will confirm it.
        for child in children {
            to_send.push((
                child,
                Message::VolumeUpdate {
                    job_id,
                    volume,
                    epoch,
                },
            ));
        }
        for (dest, msg) in to_send {
            self.send(dest, msg);
        }
    }

    /// Deterministic candidate walk over the rank space, avoiding self and
    /// the root rank, advancing with each rejected attempt.
    fn pick_join_candidate(&self, root_rank: Rank, child_index: usize, attempt: u32) -> Option<Rank> {
        let size = self.transport.size() as u32;
        if size <= 1 {
            return None;
        }
        let base = root_rank + child_index as u32 + attempt;
        for probe in 0..size {
            let candidate = (base + probe) % size;
            if candidate != self.rank && candidate != root_rank {
                return Some(candidate);
            }
        }
        None
    }

    // ------------------------------------------------------------------
    // Limits, timeouts, hygiene

    fn check_limits(&mut self, now: f64) {
        let mut expired = Vec::new();
        for job in self.jobs.values_mut() {
            if job.tree().is_root() && job.check_resource_limits(now) {
                expired.push((job.id(), job.revision()));
            }
        }
        for (id, revision) in expired {
            // Limits tripping is a result, not an error.
            self.handle_result(JobResult::unknown(id, revision));
        }
    }

    /// A commitment unanswered for one balancing period reverts.
    fn revert_stale_commitments(&mut self, now: f64) {
        let timeout = self.config.balance_interval_ms() as f64 / 1000.0;
        let mut stale = Vec::new();
        for job in self.jobs.values() {
            if job.state() != JobState::Active {
                if let Some(age) = job.commitment_age(now) {
                    if age > timeout {
                        stale.push(job.id());
                    }
                }
            }
        }
        for id in stale {
            let remove = {
                let job = self.jobs.get_mut(&id).unwrap();
                tracing::debug!(job = %job.name(), "Reverting stale commitment");
                job.uncommit();
                // A never-started placeholder has nothing left to host.
                job.state() == JobState::Inactive && job.description().is_none()
            };
            if remove {
                self.jobs.remove(&id);
            }
        }
        // Outstanding join requests age out the same way.
        self.outstanding_joins.retain(|key, t| {
            let keep = now - *t <= timeout;
            if !keep {
                tracing::debug!(job_id = key.0, index = key.1, "Join request timed out");
            }
            keep
        });
    }
}
