//! Dispatch queue for compute devices.
//!
//! Each non-host device owns one worker thread consuming tasks from a
//! channel, standing in for the driver-side command queue. `finish()`
//! implements the wait-for-completion contract: a flush marker is enqueued
//! and the caller blocks until the worker acknowledges it, which guarantees
//! every previously dispatched task has run.

use crate::error::{MediFlowError, Result};
use crossbeam_channel::{unbounded, Sender};
use std::thread::JoinHandle;

/// A unit of device work.
pub type DeviceTask = Box<dyn FnOnce() + Send + 'static>;

enum QueueCommand {
    Task(DeviceTask),
    Flush(Sender<()>),
}

/// Worker-thread-backed command queue. Tasks run in dispatch order.
pub struct DispatchQueue {
    tx: Sender<QueueCommand>,
    worker: Option<JoinHandle<()>>,
}

impl DispatchQueue {
    /// Spawn the queue worker for the named device.
    pub fn new(device_name: &str) -> Result<Self> {
        let (tx, rx) = unbounded::<QueueCommand>();
        let name = device_name.to_string();
        let worker = std::thread::Builder::new()
            .name(format!("{}-queue", device_name))
            .spawn(move || {
                tracing::debug!("Dispatch queue for {} started", name);
                while let Ok(cmd) = rx.recv() {
                    match cmd {
                        QueueCommand::Task(task) => task(),
                        QueueCommand::Flush(ack) => {
                            let _ = ack.send(());
                        }
                    }
                }
                tracing::debug!("Dispatch queue for {} exiting", name);
            })
            .map_err(|e| {
                MediFlowError::Device(format!("failed to spawn device queue thread: {}", e))
            })?;

        Ok(Self {
            tx,
            worker: Some(worker),
        })
    }

    /// Enqueue a task. Returns immediately; the task runs asynchronously
    /// on the queue worker.
    pub fn dispatch(&self, task: DeviceTask) -> Result<()> {
        self.tx
            .send(QueueCommand::Task(task))
            .map_err(|_| MediFlowError::Device("device queue is shut down".to_string()))
    }

    /// Block until every task dispatched before this call has completed.
    pub fn finish(&self) -> Result<()> {
        let (ack_tx, ack_rx) = crossbeam_channel::bounded(1);
        self.tx
            .send(QueueCommand::Flush(ack_tx))
            .map_err(|_| MediFlowError::Device("device queue is shut down".to_string()))?;
        ack_rx
            .recv()
            .map_err(|_| MediFlowError::Device("device queue worker died".to_string()))
    }
}

impl Drop for DispatchQueue {
    fn drop(&mut self) {
        // Closing the sender ends the worker's recv loop.
        let (closed_tx, _) = unbounded();
        drop(std::mem::replace(&mut self.tx, closed_tx));
        if let Some(worker) = self.worker.take() {
            let _ = worker.join();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    #[test]
    fn test_tasks_run_in_order() {
        let queue = DispatchQueue::new("test").unwrap();
        let log = Arc::new(std::sync::Mutex::new(Vec::new()));
        for i in 0..5 {
            let log = log.clone();
            queue
                .dispatch(Box::new(move || log.lock().unwrap().push(i)))
                .unwrap();
        }
        queue.finish().unwrap();
        assert_eq!(*log.lock().unwrap(), vec![0, 1, 2, 3, 4]);
    }

    #[test]
    fn test_finish_waits_for_pending_work() {
        let queue = DispatchQueue::new("test").unwrap();
        let counter = Arc::new(AtomicUsize::new(0));
        for _ in 0..10 {
            let counter = counter.clone();
            queue
                .dispatch(Box::new(move || {
                    std::thread::sleep(std::time::Duration::from_millis(1));
                    counter.fetch_add(1, Ordering::SeqCst);
                }))
                .unwrap();
        }
        queue.finish().unwrap();
        assert_eq!(counter.load(Ordering::SeqCst), 10);
    }

    #[test]
    fn test_drop_joins_worker() {
        let queue = DispatchQueue::new("test").unwrap();
        queue.dispatch(Box::new(|| {})).unwrap();
        drop(queue);
    }
}
