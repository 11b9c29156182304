use std::future::Future;
use std::pin::Pin;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::task::{Context, Poll, Waker};

use parking_lot::Mutex;
use slab::Slab;

struct Cancellation {
    flag: AtomicBool,
    read_wakers: Mutex<Slab<Waker>>,
}

/// A cloneable signal that unblocks waiters without
/// interrupting work already in progress.
///
/// Every clone observes the same flag: cancelling one
/// cancels all of them. Waiting on capacity in
/// [`Executor::submit`](crate::Executor::submit) and on a
/// result in [`Future::get`](crate::Future::get) both
/// watch a token.
#[derive(Clone)]
pub struct CancelToken {
    inner: Arc<Cancellation>,
}

impl CancelToken {
    pub fn new() -> Self {
        CancelToken {
            inner: Arc::new(Cancellation {
                flag: AtomicBool::new(false),
                read_wakers: Mutex::new(Slab::new()),
            }),
        }
    }

    /// Trigger cancellation: set the flag and wake all
    /// futures registered with us. Idempotent.
    pub fn cancel(&self) {
        // The flag is flipped under the waker lock so no
        // waiter can register after the drain below.
        let mut list = self.inner.read_wakers.lock();
        if self.inner.flag.swap(true, Ordering::SeqCst) {
            return;
        }
        log::debug!("cancel token fired, waking {} waiters", list.len());
        for w in list.drain() {
            w.wake();
        }
    }

    pub fn is_cancelled(&self) -> bool {
        self.inner.flag.load(Ordering::SeqCst)
    }

    /// A future that resolves once the token is cancelled.
    pub fn cancelled(&self) -> Cancelled<'_> {
        Cancelled { token: self, key: None }
    }

    /// Registers (or refreshes) the waker under `key`.
    /// Returns `None` if the token has already fired.
    fn register(&self, key: Option<usize>, waker: &Waker) -> Option<usize> {
        let mut map = self.inner.read_wakers.lock();
        if self.is_cancelled() {
            if let Some(id) = key {
                map.try_remove(id);
            }
            return None;
        }
        match key.and_then(|id| map.get_mut(id).map(|slot| (id, slot))) {
            Some((id, slot)) => {
                if !slot.will_wake(waker) {
                    *slot = waker.clone();
                }
                Some(id)
            }
            None => Some(map.insert(waker.clone())),
        }
    }

    fn unregister(&self, key: usize) {
        self.inner.read_wakers.lock().try_remove(key);
    }
}

impl Default for CancelToken {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for CancelToken {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CancelToken")
            .field("cancelled", &self.is_cancelled())
            .finish()
    }
}

/// Future returned by [`CancelToken::cancelled`].
pub struct Cancelled<'a> {
    token: &'a CancelToken,
    key: Option<usize>,
}

impl Future for Cancelled<'_> {
    type Output = ();

    fn poll(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<()> {
        let key = self.key.take();
        match self.token.register(key, cx.waker()) {
            None => Poll::Ready(()),
            Some(id) => {
                self.key = Some(id);
                Poll::Pending
            }
        }
    }
}

impl Drop for Cancelled<'_> {
    fn drop(&mut self) {
        if let Some(id) = self.key.take() {
            self.token.unregister(id);
        }
    }
}
