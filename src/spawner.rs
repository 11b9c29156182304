//! Runtime glue for launching tasks.
//!
//! A submitted task first waits for a capacity slot as a
//! plain async task, which costs no thread. Only once it
//! holds a slot is the synchronous work function handed to
//! the runtime's blocking pool.
use std::future::Future;

pub trait Spawner: Send + Sync + 'static {
    /// Runs `fut` detached on the runtime's async workers.
    fn spawn<F: Future<Output = ()> + Send + 'static>(&self, fut: F);

    /// Runs `f` detached on the blocking pool of the runtime
    /// driving the caller. Only called from inside a future
    /// launched by [`spawn`](Self::spawn).
    fn spawn_func<F: FnOnce() + Send + 'static>(f: F);
}

cfg_async_std! {
    pub mod use_async_std {
        use super::*;
        use async_std::task::{spawn, spawn_blocking};

        #[derive(Default, Debug, Clone, Copy)]
        pub struct AsyncStdSpawner;

        impl Spawner for AsyncStdSpawner {
            fn spawn<F: Future<Output = ()> + Send + 'static>(&self, fut: F) {
                // Dropping the handle detaches the task.
                drop(spawn(fut));
            }

            fn spawn_func<F: FnOnce() + Send + 'static>(f: F) {
                drop(spawn_blocking(f));
            }
        }
    }
}

cfg_tokio! {
    pub mod use_tokio {
        use super::*;
        use once_cell::sync::OnceCell;
        use tokio::runtime::{Handle, Runtime};

        /// Shared by every spawner created outside of a runtime.
        static FALLBACK: OnceCell<Runtime> = OnceCell::new();

        const RUNTIME_BUILD_ERR: &str = "failed to build the fallback tokio runtime";

        fn fallback_handle() -> Handle {
            FALLBACK
                .get_or_init(|| {
                    log::debug!("no ambient tokio runtime, starting the shared fallback");
                    tokio::runtime::Builder::new_multi_thread()
                        .worker_threads(1)
                        .thread_name("bounded-collect")
                        .build()
                        .expect(RUNTIME_BUILD_ERR)
                })
                .handle()
                .clone()
        }

        /// Spawns onto a tokio runtime, referred to by handle.
        #[derive(Debug, Clone)]
        pub struct TokioSpawner(Handle);

        impl TokioSpawner {
            pub fn new(rt_handle: Handle) -> Self {
                Self(rt_handle)
            }

            pub fn handle(&self) -> &Handle {
                &self.0
            }
        }

        // By default, `TokioSpawner` operates on globally available runtime.
        // Outside of one, every spawner shares a single lazily built runtime
        // that lives for the rest of the process.
        impl Default for TokioSpawner {
            fn default() -> Self {
                match Handle::try_current() {
                    Ok(handle) => Self(handle),
                    Err(_) => Self(fallback_handle()),
                }
            }
        }

        impl Spawner for TokioSpawner {
            fn spawn<F: Future<Output = ()> + Send + 'static>(&self, fut: F) {
                drop(self.0.spawn(fut));
            }

            fn spawn_func<F: FnOnce() + Send + 'static>(f: F) {
                drop(tokio::task::spawn_blocking(f));
            }
        }
    }
}

cfg_async_std! {
    /// Spawner used by the `collect*` helpers that create
    /// their own executor.
    pub type DefaultSpawner = use_async_std::AsyncStdSpawner;
}

cfg_async_std_or_else! {
    /// Spawner used by the `collect*` helpers that create
    /// their own executor.
    pub type DefaultSpawner = use_tokio::TokioSpawner;
}
