//! Dynamic load balancing.
//!
//! Each balancing round aggregates every job's `(priority, demand)` pair
//! along a binary tree of ranks (the load tree) toward rank 0, computes
//! priority-proportional fair-share volumes there, and broadcasts the
//! result back down. Job trees then reorganize toward their new volumes.

use std::collections::HashMap;

use crate::api::description::JobId;
use crate::comm::message::Rank;

/// One job's contribution to a balancing round, supplied by its root node.
#[derive(Debug, Clone, PartialEq)]
pub struct LoadEntry {
    pub job_id: JobId,
    pub priority: f64,
    pub demand: usize,
    pub arrival: f64,
}

/// What the caller must send after feeding an event into the balancer.
#[derive(Debug, Clone, PartialEq)]
pub enum BalanceAction {
    /// Forward merged entries to the parent rank in the load tree.
    SendUp {
        parent: Rank,
        epoch: u32,
        entries: Vec<LoadEntry>,
    },
    /// Rank 0 finished the epoch: broadcast these volumes down.
    Broadcast {
        epoch: u32,
        volumes: Vec<(JobId, usize)>,
    },
}

struct EpochState {
    entries: Vec<LoadEntry>,
    reports_missing: usize,
}

/// Per-rank balancing state machine.
pub struct Balancer {
    rank: Rank,
    size: usize,
    epoch: u32,
    pending: HashMap<u32, EpochState>,
}

impl Balancer {
    pub fn new(rank: Rank, size: usize) -> Self {
        Self {
            rank,
            size,
            epoch: 0,
            pending: HashMap::new(),
        }
    }

    pub fn epoch(&self) -> u32 {
        self.epoch
    }

    fn load_tree_children(&self) -> Vec<Rank> {
        let r = self.rank as usize;
        [2 * r + 1, 2 * r + 2]
            .into_iter()
            .filter(|&c| c < self.size)
            .map(|c| c as Rank)
            .collect()
    }

    fn load_tree_parent(&self) -> Option<Rank> {
        (self.rank > 0).then(|| (self.rank - 1) / 2)
    }

    fn epoch_state(&mut self, epoch: u32) -> &mut EpochState {
        // Every epoch expects one report per load-tree child plus this
        // rank's own contribution; whichever arrives first opens it.
        let missing = self.load_tree_children().len() + 1;
        self.pending.entry(epoch).or_insert_with(|| EpochState {
            entries: Vec::new(),
            reports_missing: missing,
        })
    }

    /// Contribute this rank's local entries to a new epoch.
    pub fn begin_epoch(&mut self, mut local: Vec<LoadEntry>) -> Option<BalanceAction> {
        self.epoch += 1;
        let epoch = self.epoch;
        let state = self.epoch_state(epoch);
        state.entries.append(&mut local);
        state.reports_missing -= 1;
        self.try_close_epoch(epoch)
    }

    /// A child rank's merged contributions arrived.
    pub fn digest_reduction(
        &mut self,
        epoch: u32,
        mut entries: Vec<LoadEntry>,
    ) -> Option<BalanceAction> {
        let state = self.epoch_state(epoch);
        state.entries.append(&mut entries);
        state.reports_missing = state.reports_missing.saturating_sub(1);
        self.try_close_epoch(epoch)
    }

    fn try_close_epoch(&mut self, epoch: u32) -> Option<BalanceAction> {
        let ready = self
            .pending
            .get(&epoch)
            .map(|s| s.reports_missing == 0)
            .unwrap_or(false);
        if !ready {
            return None;
        }
        let state = self.pending.remove(&epoch)?;
        match self.load_tree_parent() {
            Some(parent) => Some(BalanceAction::SendUp {
                parent,
                epoch,
                entries: state.entries,
            }),
            None => {
                let volumes = compute_volumes(&state.entries, self.size);
                Some(BalanceAction::Broadcast { epoch, volumes })
            }
        }
    }

    /// Ranks a volume broadcast must be forwarded to from here.
    pub fn broadcast_targets(&self) -> Vec<Rank> {
        self.load_tree_children()
    }
}

/// Priority-proportional fair shares, capped by per-job demand, summing to
/// at most `total_processes`.
///
/// Every job gets a floor of one process; when even the floors do not fit,
/// admission order (lower id, then earlier arrival) wins. Remaining
/// capacity is split proportionally to priority; saturated jobs shed their
/// slack to the rest until the assignment is stable.
pub fn compute_volumes(entries: &[LoadEntry], total_processes: usize) -> Vec<(JobId, usize)> {
    let mut jobs: Vec<LoadEntry> = entries.to_vec();
    jobs.sort_by(|a, b| {
        a.job_id
            .cmp(&b.job_id)
            .then(a.arrival.partial_cmp(&b.arrival).unwrap_or(std::cmp::Ordering::Equal))
    });
    jobs.dedup_by_key(|e| e.job_id);

    let mut volumes: HashMap<JobId, usize> = HashMap::new();
    let mut remaining = total_processes;

    // Floors in admission order.
    let mut floored = Vec::new();
    for job in &jobs {
        if remaining == 0 {
            volumes.insert(job.job_id, 0);
            continue;
        }
        volumes.insert(job.job_id, 1);
        remaining -= 1;
        floored.push(job.clone());
    }

    // Proportional redistribution until stable.
    loop {
        let open: Vec<&LoadEntry> = floored
            .iter()
            .filter(|j| volumes[&j.job_id] < j.demand.max(1))
            .collect();
        if open.is_empty() || remaining == 0 {
            break;
        }
        let total_priority: f64 = open.iter().map(|j| j.priority).sum();
        let mut granted_any = false;
        let budget = remaining;
        for job in &open {
            let cap = job.demand.max(1);
            let current = volumes[&job.job_id];
            let share = ((budget as f64) * job.priority / total_priority).floor() as usize;
            let grant = share.min(cap - current).min(remaining);
            if grant > 0 {
                volumes.insert(job.job_id, current + grant);
                remaining -= grant;
                granted_any = true;
            }
        }
        if !granted_any {
            // Shares rounded down to zero: hand out single units in
            // admission order.
            for job in &open {
                if remaining == 0 {
                    break;
                }
                let cap = job.demand.max(1);
                let current = volumes[&job.job_id];
                if current < cap {
                    volumes.insert(job.job_id, current + 1);
                    remaining -= 1;
                    granted_any = true;
                }
            }
        }
        if !granted_any {
            break;
        }
    }

    jobs.iter().map(|j| (j.job_id, volumes[&j.job_id])).collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn entry(job_id: JobId, priority: f64, demand: usize, arrival: f64) -> LoadEntry {
        LoadEntry {
            job_id,
            priority,
            demand,
            arrival,
        }
    }

    #[test]
    fn volumes_sum_within_process_count() {
        let entries = vec![
            entry(0, 1.0, 100, 0.0),
            entry(1, 1.0, 100, 1.0),
            entry(2, 2.0, 100, 2.0),
        ];
        let volumes = compute_volumes(&entries, 10);
        let total: usize = volumes.iter().map(|(_, v)| v).sum();
        assert!(total <= 10);
        // Higher priority gets at least as much as lower at equal demand.
        let get = |id: JobId| volumes.iter().find(|(j, _)| *j == id).unwrap().1;
        assert!(get(2) >= get(0));
    }

    #[test]
    fn demand_caps_are_respected() {
        let entries = vec![entry(0, 10.0, 2, 0.0), entry(1, 1.0, 100, 1.0)];
        let volumes = compute_volumes(&entries, 10);
        let get = |id: JobId| volumes.iter().find(|(j, _)| *j == id).unwrap().1;
        assert_eq!(get(0), 2, "saturated job stays at its demand");
        assert!(get(1) >= 7, "slack flows to the unsaturated job");
    }

    #[test]
    fn floors_follow_admission_order_under_pressure() {
        let entries = vec![
            entry(3, 5.0, 10, 3.0),
            entry(1, 1.0, 10, 1.0),
            entry(2, 1.0, 10, 2.0),
        ];
        let volumes = compute_volumes(&entries, 2);
        let get = |id: JobId| volumes.iter().find(|(j, _)| *j == id).unwrap().1;
        // Only two floors fit: lower ids win regardless of priority.
        assert_eq!(get(1), 1);
        assert_eq!(get(2), 1);
        assert_eq!(get(3), 0);
    }

    #[test]
    fn single_rank_round_completes_immediately() {
        let mut balancer = Balancer::new(0, 1);
        let action = balancer.begin_epoch(vec![entry(0, 1.0, 4, 0.0)]);
        match action {
            Some(BalanceAction::Broadcast { volumes, .. }) => {
                assert_eq!(volumes, vec![(0, 1)]);
            }
            other => panic!("expected broadcast, got {other:?}"),
        }
    }

    #[test]
    fn reduction_waits_for_all_children() {
        // Rank 0 in a 3-rank fabric has children 1 and 2.
        let mut balancer = Balancer::new(0, 3);
        assert!(balancer.begin_epoch(vec![entry(0, 1.0, 8, 0.0)]).is_none());
        assert!(balancer.digest_reduction(1, vec![entry(1, 1.0, 8, 1.0)]).is_none());
        let action = balancer.digest_reduction(1, vec![]);
        match action {
            Some(BalanceAction::Broadcast { volumes, .. }) => {
                let total: usize = volumes.iter().map(|(_, v)| v).sum();
                assert!(total <= 3);
            }
            other => panic!("expected broadcast, got {other:?}"),
        }
    }
}
