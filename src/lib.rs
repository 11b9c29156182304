//! Bounded-parallelism execution of independent units of
//! work, with single-assignment futures and order-preserving
//! result collection.
//!
//! ## Motivation
//!
//! Fanning a batch of blocking computations out over a
//! thread-pool is easy; keeping it to at most `P` running at
//! once, collecting every outcome (value or error) in input
//! order, and being able to give up waiting without tearing
//! down work already started takes some care. This crate
//! packages that as three pieces:
//!
//! 1. [`Executor`] gates every submitted function behind a
//!    counting semaphore of capacity `P`. Submission never
//!    blocks; tasks queue on the semaphore.
//!
//! 2. [`Future`] is the handle for one task's outcome. It is
//!    written once by the task and may be read by any number
//!    of threads; exactly one reader drains the handoff and
//!    every other read hits a cache.
//!
//! 3. [`Results`] and [`ResultsMap`] hold a batch of
//!    outcomes and answer aggregate questions: which failed,
//!    how many, and one combined error.
//!
//! The [`collect`] family ties them together:
//!
//! ``` rust
//! use bounded_collect::{collect, CancelToken};
//!
//! let results = collect(&CancelToken::new(), 4, &[(); 100][..], |i| {
//!     if i % 10 == 0 {
//!         Err(format!("error {}", i))
//!     } else {
//!         Ok(i)
//!     }
//! });
//! assert_eq!(results.len(), 100);
//! assert_eq!(results.stats(), (90, 10));
//! ```
//!
//! ## Cancellation
//!
//! A [`CancelToken`] only ever governs *waiting*: a task
//! waiting for a capacity slot gives up and reports
//! [`Error::Cancelled`], as does a caller blocked in
//! [`Future::get`]. A function that has already started runs
//! to completion, and a cancelled `get` does not consume the
//! result, so a later call still sees it.
//!
//! ## Runtimes
//!
//! A task waiting for a capacity slot is a plain async task
//! on the selected runtime; once it holds a slot its
//! synchronous work function moves to the runtime's blocking
//! pool. Enable `use-tokio` (the default) or `use-async-std`;
//! the `collect*` helpers that create their own executor use
//! [`DefaultSpawner`]. With tokio, the ambient runtime is
//! used when there is one, otherwise every executor shares
//! one runtime started on first use.
#![forbid(unsafe_code)]

#[macro_use]
mod utils;

mod cancellable_future;
mod cancellation;
mod collect;
mod executor;
mod future;
mod result;
pub mod spawner;

pub use cancellable_future::{CancellableFuture, WaitCancelled};
pub use cancellation::{CancelToken, Cancelled};
pub use collect::{
    collect_e, collect_futures, collect_futures_map, collect_map_e, collect_map_replace_e,
    Sequence,
};
pub use executor::Executor;
pub use future::{Future, FutureState, Futures};
pub use result::{Error, ResultExt, Results, ResultsError, ResultsMap, TaskResult};
pub use spawner::Spawner;

cfg_any_spawner! {
    pub use collect::{collect, collect_map, collect_map_replace};
    pub use executor::DefaultExecutor;
    pub use spawner::DefaultSpawner;
}

cfg_tokio! {
    pub use executor::TokioExecutor;
    pub use spawner::use_tokio::TokioSpawner;
}

cfg_async_std! {
    pub use executor::AsyncStdExecutor;
    pub use spawner::use_async_std::AsyncStdSpawner;
}

#[cfg(test)]
fn init_test_logging() {
    static INIT: std::sync::Once = std::sync::Once::new();
    INIT.call_once(|| femme::with_level(log::LevelFilter::Debug));
}
