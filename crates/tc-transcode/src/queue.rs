//! The bounded FIFO queue between the service and the workers.
//!
//! Enqueueing never waits: a full queue is reported as
//! [`Error::QueueFull`] so the caller sees backpressure immediately.

use std::path::PathBuf;
use std::sync::Arc;

use tc_core::{Error, RenditionKey, Result, TranscodeJobId};
use tc_db::models::TranscodeJob;
use tokio::sync::{mpsc, Mutex};

/// Work descriptor for one pending job.
///
/// The job row stays authoritative: a worker re-reads it when claiming, and
/// a ticket whose job is no longer pending is dropped.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Ticket {
    pub job_id: TranscodeJobId,
    pub key: RenditionKey,
    pub source: PathBuf,
    pub dest: PathBuf,
}

impl Ticket {
    pub fn for_job(job: &TranscodeJob) -> Self {
        Self {
            job_id: job.id,
            key: job.key(),
            source: PathBuf::from(&job.source_path),
            dest: PathBuf::from(&job.output_path),
        }
    }
}

/// Receiving half shared by all workers; whoever holds the lock is next in
/// line for a ticket.
pub(crate) type SharedReceiver = Arc<Mutex<mpsc::Receiver<Ticket>>>;

/// Sending half of the queue.
#[derive(Debug, Clone)]
pub(crate) struct JobQueue {
    tx: mpsc::Sender<Ticket>,
    capacity: usize,
}

/// Create a queue holding at most `capacity` tickets.
pub(crate) fn bounded(capacity: usize) -> Result<(JobQueue, SharedReceiver)> {
    if capacity == 0 {
        return Err(Error::Validation(
            "queue capacity must be at least 1".into(),
        ));
    }
    let (tx, rx) = mpsc::channel(capacity);
    Ok((JobQueue { tx, capacity }, Arc::new(Mutex::new(rx))))
}

impl JobQueue {
    /// Enqueue without waiting.
    pub(crate) fn push(&self, ticket: Ticket) -> Result<()> {
        self.tx.try_send(ticket).map_err(|e| match e {
            mpsc::error::TrySendError::Full(_) => Error::QueueFull {
                capacity: self.capacity,
            },
            mpsc::error::TrySendError::Closed(_) => {
                Error::Cancelled("worker pool has stopped".into())
            }
        })
    }

    /// Enqueue, waiting for a free slot.
    pub(crate) async fn push_wait(&self, ticket: Ticket) -> Result<()> {
        self.tx
            .send(ticket)
            .await
            .map_err(|_| Error::Cancelled("worker pool has stopped".into()))
    }

    pub(crate) fn capacity(&self) -> usize {
        self.capacity
    }

    /// Number of tickets waiting to be picked up.
    pub(crate) fn len(&self) -> usize {
        self.capacity - self.tx.capacity()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tc_core::VideoId;

    fn ticket(video: i64, quality: &str) -> Ticket {
        let key = RenditionKey::new(VideoId::new(video), quality);
        Ticket {
            job_id: TranscodeJobId::new(),
            dest: PathBuf::from("/out").join(key.file_name()),
            key,
            source: PathBuf::from("/uploads/src.mp4"),
        }
    }

    #[test]
    fn zero_capacity_rejected() {
        assert!(bounded(0).is_err());
    }

    #[tokio::test]
    async fn fifo_order() {
        let (queue, rx) = bounded(4).unwrap();
        let a = ticket(1, "240p");
        let b = ticket(1, "720p");
        queue.push(a.clone()).unwrap();
        queue.push(b.clone()).unwrap();
        assert_eq!(queue.len(), 2);

        let mut rx = rx.lock().await;
        assert_eq!(rx.recv().await.unwrap(), a);
        assert_eq!(rx.recv().await.unwrap(), b);
    }

    #[tokio::test]
    async fn full_queue_is_backpressure() {
        let (queue, _rx) = bounded(1).unwrap();
        queue.push(ticket(1, "240p")).unwrap();

        let err = queue.push(ticket(1, "360p")).unwrap_err();
        assert!(matches!(err, Error::QueueFull { capacity: 1 }), "got {err:?}");
    }

    #[tokio::test]
    async fn closed_queue_reports_cancelled() {
        let (queue, rx) = bounded(1).unwrap();
        drop(rx);
        assert!(queue.push(ticket(1, "240p")).unwrap_err().is_cancelled());
        assert!(queue.push_wait(ticket(1, "240p")).await.unwrap_err().is_cancelled());
    }
}
