//! Serialized work queues.
//!
//! A [`SerialQueue`] accepts async jobs and runs them on a single worker
//! task, strictly one at a time in submission order. Many jobs may be
//! queued; at most one is in flight. The importer uses two of these to
//! decouple download pacing from store-write pacing while keeping each
//! side sequential.

use std::pin::Pin;

use tokio::sync::mpsc;
use tokio::task::JoinHandle;

use crate::ImportError;

type Job = Pin<Box<dyn Future<Output = Result<(), ImportError>> + Send + 'static>>;

/// Cloneable submission side of a [`SerialQueue`].
#[derive(Clone)]
pub struct QueueHandle {
    tx: mpsc::Sender<Job>,
}

impl QueueHandle {
    /// Enqueues a job, waiting for queue capacity.
    ///
    /// # Errors
    ///
    /// Returns [`ImportError::QueueClosed`] if the worker has shut down
    /// (it stops on the first failed job; the failure surfaces from
    /// [`SerialQueue::join`]).
    pub async fn push<F>(&self, job: F) -> Result<(), ImportError>
    where
        F: Future<Output = Result<(), ImportError>> + Send + 'static,
    {
        self.tx
            .send(Box::pin(job))
            .await
            .map_err(|_| ImportError::QueueClosed)
    }
}

/// A bounded queue of async jobs executed sequentially by one worker task.
pub struct SerialQueue {
    handle: QueueHandle,
    worker: JoinHandle<Result<(), ImportError>>,
}

impl SerialQueue {
    /// Spawns a queue with room for `capacity` pending jobs.
    #[must_use]
    pub fn spawn(capacity: usize) -> Self {
        let (tx, mut rx) = mpsc::channel::<Job>(capacity);
        let worker = tokio::spawn(async move {
            while let Some(job) = rx.recv().await {
                job.await?;
            }
            Ok(())
        });
        Self {
            handle: QueueHandle { tx },
            worker,
        }
    }

    /// A cloneable handle for submitting jobs (usable from within jobs on
    /// other queues).
    #[must_use]
    pub fn handle(&self) -> QueueHandle {
        self.handle.clone()
    }

    /// Enqueues a job, waiting for queue capacity.
    ///
    /// # Errors
    ///
    /// Returns [`ImportError::QueueClosed`] if the worker has shut down.
    pub async fn push<F>(&self, job: F) -> Result<(), ImportError>
    where
        F: Future<Output = Result<(), ImportError>> + Send + 'static,
    {
        self.handle.push(job).await
    }

    /// Closes the queue and waits for every queued job to finish.
    ///
    /// Other live [`QueueHandle`] clones keep the queue open until they are
    /// dropped; callers must drop them (or let their owning jobs finish)
    /// before joining.
    ///
    /// # Errors
    ///
    /// Returns the first job failure, or [`ImportError::QueueWorker`] if
    /// the worker task panicked.
    pub async fn join(self) -> Result<(), ImportError> {
        drop(self.handle);
        self.worker.await.map_err(|_| ImportError::QueueWorker)?
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;
    use std::sync::atomic::{AtomicUsize, Ordering};

    use super::*;

    #[tokio::test(flavor = "multi_thread")]
    async fn runs_jobs_in_submission_order() {
        let order = Arc::new(std::sync::Mutex::new(Vec::new()));
        let queue = SerialQueue::spawn(16);

        for i in 0..5 {
            let order = Arc::clone(&order);
            queue
                .push(async move {
                    order.lock().unwrap().push(i);
                    Ok(())
                })
                .await
                .unwrap();
        }

        queue.join().await.unwrap();
        assert_eq!(*order.lock().unwrap(), vec![0, 1, 2, 3, 4]);
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn at_most_one_job_in_flight() {
        let in_flight = Arc::new(AtomicUsize::new(0));
        let max_seen = Arc::new(AtomicUsize::new(0));
        let queue = SerialQueue::spawn(16);

        for _ in 0..8 {
            let in_flight = Arc::clone(&in_flight);
            let max_seen = Arc::clone(&max_seen);
            queue
                .push(async move {
                    let now = in_flight.fetch_add(1, Ordering::SeqCst) + 1;
                    max_seen.fetch_max(now, Ordering::SeqCst);
                    tokio::task::yield_now().await;
                    in_flight.fetch_sub(1, Ordering::SeqCst);
                    Ok(())
                })
                .await
                .unwrap();
        }

        queue.join().await.unwrap();
        assert_eq!(max_seen.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn first_failure_surfaces_from_join() {
        let queue = SerialQueue::spawn(16);
        queue.push(async { Ok(()) }).await.unwrap();
        queue
            .push(async { Err(ImportError::QueueClosed) })
            .await
            .unwrap();

        let result = queue.join().await;
        assert!(matches!(result, Err(ImportError::QueueClosed)));
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn handle_can_push_from_another_queue_job() {
        let counter = Arc::new(AtomicUsize::new(0));
        let save = SerialQueue::spawn(16);
        let fetch = SerialQueue::spawn(16);

        let save_handle = save.handle();
        let counter_clone = Arc::clone(&counter);
        fetch
            .push(async move {
                let counter = Arc::clone(&counter_clone);
                save_handle
                    .push(async move {
                        counter.fetch_add(1, Ordering::SeqCst);
                        Ok(())
                    })
                    .await
            })
            .await
            .unwrap();

        fetch.join().await.unwrap();
        save.join().await.unwrap();
        assert_eq!(counter.load(Ordering::SeqCst), 1);
    }
}
