//! Serialized command queue shared by the call coordinators.
//!
//! Every intent, inbound signal, engine callback and async completion is a
//! command on one unbounded queue, handled by a single task in arrival order.
//! Work that has to await runs in spawned tasks that post their result back
//! as another command.

use std::future::Future;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use tokio::sync::mpsc;

/// Sending half of a coordinator's queue.
pub struct WorkerHandle<C> {
    tx: mpsc::UnboundedSender<C>,
    disposed: Arc<AtomicBool>,
}

impl<C> Clone for WorkerHandle<C> {
    fn clone(&self) -> Self {
        Self {
            tx: self.tx.clone(),
            disposed: self.disposed.clone(),
        }
    }
}

impl<C: Send + 'static> WorkerHandle<C> {
    /// Queue a command. Returns `false` once the worker is gone.
    pub fn post(&self, command: C) -> bool {
        if self.is_disposed() {
            return false;
        }
        self.tx.send(command).is_ok()
    }

    pub fn is_disposed(&self) -> bool {
        self.disposed.load(Ordering::Acquire) || self.tx.is_closed()
    }

    pub fn dispose(&self) {
        self.disposed.store(true, Ordering::Release);
    }

    /// Run `work` off the queue and post `complete(output)` when it finishes.
    pub fn spawn_completion<F, T>(&self, work: F, complete: impl FnOnce(T) -> C + Send + 'static)
    where
        F: Future<Output = T> + Send + 'static,
        T: Send + 'static,
    {
        let handle = self.clone();
        tokio::spawn(async move {
            let output = work.await;
            if !handle.post(complete(output)) {
                log::debug!("Dropping completion for disposed worker");
            }
        });
    }
}

/// Create a queue and its handle.
pub fn queue<C>() -> (WorkerHandle<C>, mpsc::UnboundedReceiver<C>) {
    let (tx, rx) = mpsc::unbounded_channel();
    (
        WorkerHandle {
            tx,
            disposed: Arc::new(AtomicBool::new(false)),
        },
        rx,
    )
}
