//! Single-assignment result handles.
//!
//! A [`Future`] is written once by the task that produced
//! it, through a one-shot channel, and read by any number
//! of consumers. Exactly one consumer drains the channel;
//! it does so while holding the retrieval gate, then caches
//! the outcome so every other read is a plain load.
use std::ops::Deref;
use std::sync::atomic::{AtomicU8, Ordering};
use std::sync::Arc;

use futures::channel::oneshot;
use futures::lock::Mutex;
use once_cell::sync::OnceCell;

use crate::cancellable_future::{CancellableFuture, WaitCancelled};
use crate::cancellation::CancelToken;
use crate::result::{Error, Results, TaskResult};

/// Lifecycle of a [`Future`]. States only ever move
/// forward.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[repr(u8)]
pub enum FutureState {
    /// Submitted, waiting for a capacity slot.
    AwaitingExecution = 0,
    /// Holding a slot, the work function is running.
    Executing = 1,
    /// Finished and handed off, not yet read by anyone.
    ResultReady = 2,
    /// Read at least once; further reads hit the cache.
    ResultStored = 3,
}

impl FutureState {
    fn from_u8(raw: u8) -> Self {
        match raw {
            0 => FutureState::AwaitingExecution,
            1 => FutureState::Executing,
            2 => FutureState::ResultReady,
            _ => FutureState::ResultStored,
        }
    }
}

struct Shared<T, E> {
    state: Arc<AtomicU8>,
    result: OnceCell<TaskResult<T, E>>,
    // The gate owns the handoff: whoever holds the lock is
    // the only one allowed to receive from it.
    result_fetch: Mutex<Option<oneshot::Receiver<TaskResult<T, E>>>>,
}

fn advance(state: &AtomicU8, to: FutureState) {
    state.fetch_max(to as u8, Ordering::AcqRel);
}

/// Creates a connected producer/consumer pair.
pub(crate) fn pair<T, E>() -> (Promise<T, E>, Future<T, E>) {
    let (sender, receiver) = oneshot::channel();
    let state = Arc::new(AtomicU8::new(FutureState::AwaitingExecution as u8));
    let shared = Arc::new(Shared {
        state: state.clone(),
        result: OnceCell::new(),
        result_fetch: Mutex::new(Some(receiver)),
    });
    (Promise { sender, state }, Future { shared })
}

/// The producing side, owned by the task. Dropping it
/// without delivering resolves the future as abandoned.
pub(crate) struct Promise<T, E> {
    sender: oneshot::Sender<TaskResult<T, E>>,
    state: Arc<AtomicU8>,
}

impl<T, E> Promise<T, E> {
    pub(crate) fn set_state(&self, state: FutureState) {
        advance(&self.state, state);
    }

    pub(crate) fn deliver(self, result: TaskResult<T, E>) {
        // Nobody holding the future is fine: the result is
        // simply discarded.
        let _ = self.sender.send(result);
        advance(&self.state, FutureState::ResultReady);
    }
}

/// Handle to the eventual outcome of a submitted task.
///
/// Cheap to clone; all clones observe the same result.
pub struct Future<T, E> {
    shared: Arc<Shared<T, E>>,
}

impl<T: Clone, E> Future<T, E> {
    /// Blocks the calling thread until the result is
    /// available or `token` fires.
    ///
    /// A cancelled wait returns [`Error::Cancelled`] without
    /// consuming the real result; a later call can still
    /// retrieve it. Avoid calling this from an async
    /// context, use [`get_async`](Self::get_async) there: on a
    /// single-threaded runtime the task it waits for could
    /// never be polled.
    pub fn get(&self, token: &CancelToken) -> TaskResult<T, E> {
        futures::executor::block_on(self.get_async(token))
    }

    /// Awaitable form of [`get`](Self::get).
    pub async fn get_async(&self, token: &CancelToken) -> TaskResult<T, E> {
        if let Some(result) = self.shared.result.get() {
            return result.clone();
        }

        let mut gate = match CancellableFuture::new(token, self.shared.result_fetch.lock()).await {
            Ok(gate) => gate,
            Err(WaitCancelled) => return Err(Error::Cancelled),
        };

        // Another consumer may have filled the cache while we
        // were waiting for the gate.
        if let Some(result) = self.shared.result.get() {
            return result.clone();
        }

        let received = match gate.as_mut() {
            Some(receiver) => match CancellableFuture::new(token, receiver).await {
                Ok(received) => received,
                Err(WaitCancelled) => {
                    log::trace!("future wait cancelled before result arrived");
                    return Err(Error::Cancelled);
                }
            },
            None => Err(oneshot::Canceled),
        };
        *gate = None;
        self.store(received.unwrap_or(Err(Error::Abandoned)))
    }

    /// Non-blocking poll. `None` means no result yet, which
    /// includes another consumer being mid-retrieval.
    pub fn get_no_block(&self) -> Option<TaskResult<T, E>> {
        if let Some(result) = self.shared.result.get() {
            return Some(result.clone());
        }

        let mut gate = self.shared.result_fetch.try_lock()?;
        if let Some(result) = self.shared.result.get() {
            return Some(result.clone());
        }

        let received = match gate.as_mut()?.try_recv() {
            Ok(None) => return None,
            Ok(Some(result)) => result,
            Err(oneshot::Canceled) => Err(Error::Abandoned),
        };
        *gate = None;
        Some(self.store(received))
    }

    fn store(&self, result: TaskResult<T, E>) -> TaskResult<T, E> {
        let stored = self.shared.result.get_or_init(|| result).clone();
        advance(&self.shared.state, FutureState::ResultStored);
        stored
    }
}

impl<T, E> Future<T, E> {
    pub fn state(&self) -> FutureState {
        FutureState::from_u8(self.shared.state.load(Ordering::Acquire))
    }

    pub fn is_done(&self) -> bool {
        self.state() >= FutureState::ResultReady
    }
}

impl<T, E> Clone for Future<T, E> {
    fn clone(&self) -> Self {
        Future { shared: self.shared.clone() }
    }
}

impl<T, E> std::fmt::Debug for Future<T, E> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Future").field("state", &self.state()).finish()
    }
}

/// An ordered batch of futures.
pub struct Futures<T, E>(Vec<Future<T, E>>);

impl<T, E> Futures<T, E> {
    pub fn new() -> Self {
        Futures(Vec::new())
    }

    pub fn push(&mut self, future: Future<T, E>) {
        self.0.push(future);
    }

    pub fn into_inner(self) -> Vec<Future<T, E>> {
        self.0
    }
}

impl<T: Clone, E> Futures<T, E> {
    /// Blocks on each future in order.
    pub fn get(&self, token: &CancelToken) -> Results<T, E> {
        crate::collect::collect_futures(token, &self.0)
    }

    pub async fn get_async(&self, token: &CancelToken) -> Results<T, E> {
        let mut results = Vec::with_capacity(self.0.len());
        for future in &self.0 {
            results.push(future.get_async(token).await);
        }
        results.into()
    }
}

impl<T, E> Default for Futures<T, E> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T, E> Deref for Futures<T, E> {
    type Target = [Future<T, E>];

    fn deref(&self) -> &Self::Target {
        &self.0
    }
}

impl<T, E> FromIterator<Future<T, E>> for Futures<T, E> {
    fn from_iter<I: IntoIterator<Item = Future<T, E>>>(iter: I) -> Self {
        Futures(iter.into_iter().collect())
    }
}

impl<T, E> IntoIterator for Futures<T, E> {
    type Item = Future<T, E>;
    type IntoIter = std::vec::IntoIter<Future<T, E>>;

    fn into_iter(self) -> Self::IntoIter {
        self.0.into_iter()
    }
}
