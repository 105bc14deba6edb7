//! Point-to-point messaging between the coordinator and worker ranks.
//!
//! Workers pull work: they announce readiness on a shared inbox and then wait
//! on their own reply channel for either a task or the stop sentinel.

use crate::error::{Result, SweepError};
use crate::task::Task;
use async_trait::async_trait;
use std::collections::BTreeMap;
use tokio::sync::mpsc;

/// Reply to a readiness announcement.
#[derive(Debug, Clone, PartialEq)]
pub enum Assignment {
    Task(Box<Task>),
    /// No more work; the worker should exit.
    Stop,
}

/// Coordinator side of the mesh.
#[async_trait]
pub trait CoordinatorEndpoint: Send {
    /// Ranks of every worker reachable from this endpoint.
    fn worker_ranks(&self) -> Vec<usize>;

    /// Wait for any worker to announce readiness. `None` once no worker can
    /// announce anything again.
    async fn recv_ready(&mut self) -> Result<Option<usize>>;

    async fn send(&self, rank: usize, assignment: Assignment) -> Result<()>;
}

/// Worker side of the mesh.
#[async_trait]
pub trait WorkerEndpoint: Send {
    fn rank(&self) -> usize;

    async fn announce_ready(&self) -> Result<()>;

    async fn recv_assignment(&mut self) -> Result<Assignment>;
}

/// In-process coordinator endpoint backed by tokio channels.
#[derive(Debug)]
pub struct LocalCoordinator {
    ready_rx: mpsc::Receiver<usize>,
    replies: BTreeMap<usize, mpsc::Sender<Assignment>>,
}

/// In-process worker endpoint backed by tokio channels.
#[derive(Debug)]
pub struct LocalWorker {
    rank: usize,
    ready_tx: mpsc::Sender<usize>,
    reply_rx: mpsc::Receiver<Assignment>,
}

/// Build a mesh for `ranks` ranks: rank 0 is the coordinator, ranks
/// `1..ranks` are workers.
pub fn local_mesh(ranks: usize) -> (LocalCoordinator, Vec<LocalWorker>) {
    let (ready_tx, ready_rx) = mpsc::channel(ranks.max(1));
    let mut replies = BTreeMap::new();
    let mut workers = Vec::with_capacity(ranks.saturating_sub(1));

    for rank in 1..ranks {
        let (reply_tx, reply_rx) = mpsc::channel(1);
        replies.insert(rank, reply_tx);
        workers.push(LocalWorker {
            rank,
            ready_tx: ready_tx.clone(),
            reply_rx,
        });
    }

    (LocalCoordinator { ready_rx, replies }, workers)
}

#[async_trait]
impl CoordinatorEndpoint for LocalCoordinator {
    fn worker_ranks(&self) -> Vec<usize> {
        self.replies.keys().copied().collect()
    }

    async fn recv_ready(&mut self) -> Result<Option<usize>> {
        Ok(self.ready_rx.recv().await)
    }

    async fn send(&self, rank: usize, assignment: Assignment) -> Result<()> {
        let tx = self
            .replies
            .get(&rank)
            .ok_or_else(|| SweepError::transport(format!("unknown rank {rank}")))?;
        tx.send(assignment)
            .await
            .map_err(|_| SweepError::transport(format!("rank {rank} is no longer listening")))
    }
}

#[async_trait]
impl WorkerEndpoint for LocalWorker {
    fn rank(&self) -> usize {
        self.rank
    }

    async fn announce_ready(&self) -> Result<()> {
        self.ready_tx
            .send(self.rank)
            .await
            .map_err(|_| SweepError::transport("coordinator inbox closed"))
    }

    async fn recv_assignment(&mut self) -> Result<Assignment> {
        self.reply_rx
            .recv()
            .await
            .ok_or_else(|| SweepError::transport("coordinator hung up"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_mesh_round_trip() {
        let (mut coordinator, mut workers) = local_mesh(3);
        assert_eq!(coordinator.worker_ranks(), vec![1, 2]);

        let mut worker = workers.remove(1);
        assert_eq!(worker.rank(), 2);
        worker.announce_ready().await.unwrap();
        assert_eq!(coordinator.recv_ready().await.unwrap(), Some(2));

        coordinator.send(2, Assignment::Stop).await.unwrap();
        assert_eq!(worker.recv_assignment().await.unwrap(), Assignment::Stop);
    }

    #[tokio::test]
    async fn test_inbox_closes_when_workers_drop() {
        let (mut coordinator, workers) = local_mesh(3);
        drop(workers);
        assert_eq!(coordinator.recv_ready().await.unwrap(), None);
        assert!(coordinator.send(1, Assignment::Stop).await.is_err());
    }

    #[tokio::test]
    async fn test_worker_sees_coordinator_hang_up() {
        let (coordinator, mut workers) = local_mesh(2);
        drop(coordinator);
        assert!(workers[0].announce_ready().await.is_err());
        assert!(workers[0].recv_assignment().await.is_err());
    }
}
