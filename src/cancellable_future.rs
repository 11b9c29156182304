use std::future::Future;
use std::pin::Pin;
use std::task::{Context, Poll};

use pin_project::pin_project;

use crate::cancellation::{CancelToken, Cancelled};

/// Marker error: the token fired before the wrapped future
/// completed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
#[error("wait cancelled")]
pub struct WaitCancelled;

/// A wrapper that races a `Future` against a
/// [`CancelToken`]. The token is polled first, so a token
/// that already fired always wins, even if the inner future
/// is ready too.
///
/// Dropping the wrapper drops the inner future; nothing
/// that has already been handed out (a permit, a message)
/// is lost.
#[pin_project]
pub struct CancellableFuture<'a, F> {
    cancelled: Cancelled<'a>,
    #[pin]
    fut: F,
}

impl<'a, F: Future> CancellableFuture<'a, F> {
    pub fn new(token: &'a CancelToken, fut: F) -> Self {
        CancellableFuture { cancelled: token.cancelled(), fut }
    }
}

impl<F: Future> Future for CancellableFuture<'_, F> {
    type Output = Result<F::Output, WaitCancelled>;

    fn poll(self: Pin<&mut Self>, cx: &mut Context) -> Poll<Self::Output> {
        let this = self.project();
        if Pin::new(this.cancelled).poll(cx).is_ready() {
            return Poll::Ready(Err(WaitCancelled));
        }
        this.fut.poll(cx).map(Ok)
    }
}
