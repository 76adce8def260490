//! Completion handles for work scheduled on the store's worker pool.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use crossbeam_channel::{bounded, Receiver, RecvTimeoutError, Sender, TryRecvError};

use crate::error::{Result, VariantStoreError};

/// Cooperative cancellation flag shared between a submitter and a worker.
#[derive(Debug, Clone, Default)]
pub struct CancelToken(Arc<AtomicBool>);

impl CancelToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::Release);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::Acquire)
    }
}

/// Handle to an asynchronous store operation.
///
/// The worker sends exactly one result. If the worker goes away without
/// sending, waiting yields [`VariantStoreError::TaskAbandoned`].
#[derive(Debug)]
pub struct Task<T> {
    individual_id: String,
    rx: Receiver<Result<T>>,
    result: Option<Result<T>>,
}

/// Sending half held by the worker.
#[derive(Debug)]
pub struct Completer<T>(Sender<Result<T>>);

impl<T> Completer<T> {
    pub fn complete(self, result: Result<T>) {
        // the submitter may have dropped its handle; the result is simply discarded.
        let _ = self.0.send(result);
    }
}

impl<T> Task<T> {
    pub fn new(individual_id: impl Into<String>) -> (Task<T>, Completer<T>) {
        let (tx, rx) = bounded(1);
        (
            Task {
                individual_id: individual_id.into(),
                rx,
                result: None,
            },
            Completer(tx),
        )
    }

    /// Block until the operation finishes.
    pub fn wait(mut self) -> Result<T> {
        if let Some(result) = self.result.take() {
            return result;
        }
        self.rx
            .recv()
            .unwrap_or_else(|_| Err(VariantStoreError::TaskAbandoned(self.individual_id.clone())))
    }

    /// Block for at most `timeout`; gives the handle back if still running.
    pub fn wait_timeout(mut self, timeout: Duration) -> std::result::Result<Result<T>, Task<T>> {
        if let Some(result) = self.result.take() {
            return Ok(result);
        }
        match self.rx.recv_timeout(timeout) {
            Ok(result) => Ok(result),
            Err(RecvTimeoutError::Timeout) => Err(self),
            Err(RecvTimeoutError::Disconnected) => Ok(Err(VariantStoreError::TaskAbandoned(
                self.individual_id.clone(),
            ))),
        }
    }

    /// Poll without blocking. Returns true once a result is available.
    pub fn is_finished(&mut self) -> bool {
        if self.result.is_some() {
            return true;
        }
        match self.rx.try_recv() {
            Ok(result) => {
                self.result = Some(result);
                true
            }
            Err(TryRecvError::Empty) => false,
            Err(TryRecvError::Disconnected) => {
                self.result = Some(Err(VariantStoreError::TaskAbandoned(
                    self.individual_id.clone(),
                )));
                true
            }
        }
    }

    /// Take the result if the operation has finished.
    pub fn try_result(&mut self) -> Option<Result<T>> {
        if self.is_finished() {
            self.result.take()
        } else {
            None
        }
    }
}
