//! Message-passing fabric.
//!
//! The platform's processes talk point-to-point with FIFO ordering per
//! channel. The fabric itself is an external collaborator; [`Transport`]
//! is the seam. [`LocalFabric`] is the in-tree implementation hosting all
//! ranks inside one OS process, used by mono mode and the test harness.

use std::sync::Arc;

use tokio::sync::mpsc;

use crate::comm::message::{Message, Rank};
use crate::error::{MallobError, Result};

pub trait Transport: Send + Sync {
    fn rank(&self) -> Rank;
    fn size(&self) -> usize;

    /// Enqueue a message toward `dest`. Never blocks.
    fn send(&self, dest: Rank, msg: Message) -> Result<()>;

    /// Poll for the next incoming message. Never blocks.
    fn try_recv(&self) -> Option<(Rank, Message)>;
}

/// All-to-all channel fabric for `size` ranks in one process.
pub struct LocalFabric;

impl LocalFabric {
    /// Build the fabric and hand out one endpoint per rank.
    pub fn build(size: usize) -> Vec<LocalEndpoint> {
        let mut senders = Vec::with_capacity(size);
        let mut receivers = Vec::with_capacity(size);
        for _ in 0..size {
            let (tx, rx) = mpsc::unbounded_channel();
            senders.push(tx);
            receivers.push(rx);
        }
        let senders = Arc::new(senders);
        receivers
            .into_iter()
            .enumerate()
            .map(|(rank, rx)| LocalEndpoint {
                rank: rank as Rank,
                size,
                peers: senders.clone(),
                incoming: parking_lot::Mutex::new(rx),
            })
            .collect()
    }
}

pub struct LocalEndpoint {
    rank: Rank,
    size: usize,
    peers: Arc<Vec<mpsc::UnboundedSender<(Rank, Message)>>>,
    incoming: parking_lot::Mutex<mpsc::UnboundedReceiver<(Rank, Message)>>,
}

impl Transport for LocalEndpoint {
    fn rank(&self) -> Rank {
        self.rank
    }

    fn size(&self) -> usize {
        self.size
    }

    fn send(&self, dest: Rank, msg: Message) -> Result<()> {
        let sender = self
            .peers
            .get(dest as usize)
            .ok_or_else(|| MallobError::Transport(format!("no such rank {dest}")))?;
        sender
            .send((self.rank, msg))
            .map_err(|_| MallobError::Transport(format!("rank {dest} is gone")))
    }

    fn try_recv(&self) -> Option<(Rank, Message)> {
        self.incoming.lock().try_recv().ok()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::comm::message::Message;

    #[test]
    fn fifo_per_channel() {
        let endpoints = LocalFabric::build(2);
        let (a, b) = (&endpoints[0], &endpoints[1]);
        for job_id in 0..4 {
            a.send(1, Message::Terminate { job_id }).unwrap();
        }
        for expected in 0..4 {
            let (source, msg) = b.try_recv().unwrap();
            assert_eq!(source, 0);
            match msg {
                Message::Terminate { job_id } => assert_eq!(job_id, expected),
                other => panic!("unexpected message {other:?}"),
            }
        }
        assert!(b.try_recv().is_none());
    }

    #[test]
    fn unknown_rank_is_an_error() {
        let endpoints = LocalFabric::build(1);
        assert!(endpoints[0].send(3, Message::Terminate { job_id: 0 }).is_err());
    }
}
