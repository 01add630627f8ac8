use std::sync::mpsc;
use std::thread;
use std::time::Duration;

use crate::error::{ChannelError, Result};

/// Completion handle for an operation running on a worker thread.
///
/// The worker owns whatever state the operation needs and sends the
/// outcome exactly once. Dropping the handle detaches the worker; the
/// operation still runs to completion.
#[derive(Debug)]
pub struct OperationHandle<T> {
    rx: mpsc::Receiver<Result<T>>,
}

impl<T: Send + 'static> OperationHandle<T> {
    /// Run `op` on a fresh worker thread.
    pub fn spawn<F>(name: &str, op: F) -> Self
    where
        F: FnOnce() -> Result<T> + Send + 'static,
    {
        let (tx, rx) = mpsc::channel();
        let builder = thread::Builder::new().name(format!("wirechan-{name}"));
        let spawned = builder.spawn(move || {
            let outcome = op();
            // Receiver gone means nobody is waiting; that is fine.
            let _ = tx.send(outcome);
        });
        if let Err(err) = spawned {
            let (tx, failed_rx) = mpsc::channel();
            let _ = tx.send(Err(ChannelError::Communication(format!(
                "failed to spawn operation worker: {err}"
            ))));
            return Self { rx: failed_rx };
        }
        Self { rx }
    }

    /// Block until the operation completes.
    pub fn wait(self) -> Result<T> {
        match self.rx.recv() {
            Ok(outcome) => outcome,
            Err(_) => Err(ChannelError::Communication(
                "operation worker terminated without a result".into(),
            )),
        }
    }

    /// Block until completion or `timeout`, whichever comes first. The
    /// operation itself keeps running after a timeout here.
    pub fn wait_timeout(self, timeout: Duration) -> Result<T> {
        match self.rx.recv_timeout(timeout) {
            Ok(outcome) => outcome,
            Err(mpsc::RecvTimeoutError::Timeout) => {
                Err(ChannelError::Timeout("waiting for operation".into()))
            }
            Err(mpsc::RecvTimeoutError::Disconnected) => Err(ChannelError::Communication(
                "operation worker terminated without a result".into(),
            )),
        }
    }

    /// Non-blocking poll; `None` while the operation is still running.
    pub fn try_wait(&mut self) -> Option<Result<T>> {
        match self.rx.try_recv() {
            Ok(outcome) => Some(outcome),
            Err(mpsc::TryRecvError::Empty) => None,
            Err(mpsc::TryRecvError::Disconnected) => Some(Err(ChannelError::Communication(
                "operation worker terminated without a result".into(),
            ))),
        }
    }
}
