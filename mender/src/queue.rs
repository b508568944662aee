//! Single-flight job queue for long-running synthesis work.
//!
//! One FIFO, one worker task, and a dedup set: while an id is in flight (or
//! queued), re-enqueueing it is a no-op. After the task resolves — success
//! or failure — the id becomes enqueueable again. Task errors are logged
//! and never stop the worker. The queue is in-process only; nothing is
//! persisted.

use crate::error::MenderResult;
use futures::future::BoxFuture;
use std::collections::HashSet;
use std::sync::{Arc, Mutex};
use tokio::sync::mpsc;

struct Job {
    id: String,
    task: BoxFuture<'static, MenderResult<()>>,
}

/// Deduplicated FIFO task runner.
pub struct JobQueue {
    sender: mpsc::UnboundedSender<Job>,
    in_flight: Arc<Mutex<HashSet<String>>>,
}

impl JobQueue {
    /// Create the queue and spawn its worker on the current runtime.
    pub fn new() -> Self {
        let (sender, mut receiver) = mpsc::unbounded_channel::<Job>();
        let in_flight: Arc<Mutex<HashSet<String>>> = Arc::new(Mutex::new(HashSet::new()));

        let worker_set = Arc::clone(&in_flight);
        tokio::spawn(async move {
            while let Some(job) = receiver.recv().await {
                let id = job.id.clone();
                log::debug!("queue: running job '{}'", id);
                if let Err(e) = job.task.await {
                    log::error!("queue: job '{}' failed: {}", id, e);
                }
                worker_set.lock().unwrap().remove(&id);
            }
        });

        Self { sender, in_flight }
    }

    /// Enqueue `task` under `id`. Returns false (and drops the task) when the
    /// id is already queued or running.
    pub fn enqueue(&self, id: impl Into<String>, task: BoxFuture<'static, MenderResult<()>>) -> bool {
        let id = id.into();
        {
            let mut set = self.in_flight.lock().unwrap();
            if !set.insert(id.clone()) {
                log::debug!("queue: job '{}' already in flight, skipping", id);
                return false;
            }
        }
        if self.sender.send(Job { id: id.clone(), task }).is_err() {
            // Worker is gone; don't leave the id stuck in the set.
            self.in_flight.lock().unwrap().remove(&id);
            return false;
        }
        true
    }

    /// Number of ids currently queued or running.
    pub fn in_flight_count(&self) -> usize {
        self.in_flight.lock().unwrap().len()
    }
}

impl Default for JobQueue {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;
    use tokio::sync::Notify;

    #[tokio::test]
    async fn test_duplicate_ids_run_once_then_become_enqueueable() {
        let queue = JobQueue::new();
        let runs = Arc::new(AtomicUsize::new(0));
        let gate = Arc::new(Notify::new());

        let (runs1, gate1) = (Arc::clone(&runs), Arc::clone(&gate));
        assert!(queue.enqueue(
            "j1",
            Box::pin(async move {
                gate1.notified().await;
                runs1.fetch_add(1, Ordering::SeqCst);
                Ok(())
            })
        ));

        // Second enqueue while the first is pending: no-op.
        let runs2 = Arc::clone(&runs);
        assert!(!queue.enqueue(
            "j1",
            Box::pin(async move {
                runs2.fetch_add(1, Ordering::SeqCst);
                Ok(())
            })
        ));

        gate.notify_one();
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert_eq!(runs.load(Ordering::SeqCst), 1);
        assert_eq!(queue.in_flight_count(), 0);

        // After completion the same id executes normally.
        let runs3 = Arc::clone(&runs);
        assert!(queue.enqueue(
            "j1",
            Box::pin(async move {
                runs3.fetch_add(1, Ordering::SeqCst);
                Ok(())
            })
        ));
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert_eq!(runs.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_jobs_run_sequentially_in_fifo_order() {
        let queue = JobQueue::new();
        let order = Arc::new(Mutex::new(Vec::new()));
        for i in 0..5 {
            let order = Arc::clone(&order);
            queue.enqueue(
                format!("job-{}", i),
                Box::pin(async move {
                    // A later job finishing first would expose concurrency.
                    tokio::time::sleep(Duration::from_millis(10 - i as u64)).await;
                    order.lock().unwrap().push(i);
                    Ok(())
                }),
            );
        }
        tokio::time::sleep(Duration::from_millis(200)).await;
        assert_eq!(*order.lock().unwrap(), vec![0, 1, 2, 3, 4]);
    }

    #[tokio::test]
    async fn test_task_errors_do_not_stop_the_worker() {
        let queue = JobQueue::new();
        let ran = Arc::new(AtomicUsize::new(0));
        queue.enqueue(
            "failing",
            Box::pin(async { Err(crate::error::MenderError::Configuration("boom".into())) }),
        );
        let ran2 = Arc::clone(&ran);
        queue.enqueue(
            "after",
            Box::pin(async move {
                ran2.fetch_add(1, Ordering::SeqCst);
                Ok(())
            }),
        );
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert_eq!(ran.load(Ordering::SeqCst), 1);
    }
}
