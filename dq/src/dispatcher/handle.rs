//! Result handle for a submission

use std::future::Future;
use std::pin::Pin;
use std::task::{Context, Poll};

use tokio::sync::oneshot;

use crate::error::DispatchError;

/// Settles once the submission completes, fails, or is cancelled
///
/// Dropping the handle does not cancel the task; use the submission's
/// cancellation token for that.
#[derive(Debug)]
pub struct DispatchHandle<T> {
    rx: oneshot::Receiver<Result<T, DispatchError>>,
}

impl<T> DispatchHandle<T> {
    pub(crate) fn new(rx: oneshot::Receiver<Result<T, DispatchError>>) -> Self {
        Self { rx }
    }

    /// Build a handle already settled with `result`
    pub(crate) fn settled(result: Result<T, DispatchError>) -> Self {
        let (tx, rx) = oneshot::channel();
        let _ = tx.send(result);
        Self { rx }
    }
}

impl<T> Future for DispatchHandle<T> {
    type Output = Result<T, DispatchError>;

    fn poll(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        let this = self.get_mut();
        match Pin::new(&mut this.rx).poll(cx) {
            Poll::Ready(Ok(result)) => Poll::Ready(result),
            Poll::Ready(Err(_)) => Poll::Ready(Err(DispatchError::HandleDropped)),
            Poll::Pending => Poll::Pending,
        }
    }
}
