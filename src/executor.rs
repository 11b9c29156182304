use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use tokio::sync::{Notify, OwnedSemaphorePermit, Semaphore};

use crate::cancellable_future::{CancellableFuture, WaitCancelled};
use crate::cancellation::CancelToken;
use crate::collect::Sequence;
use crate::future::{self, Future, FutureState, Futures, Promise};
use crate::result::{Error, TaskResult};
use crate::spawner::Spawner;
use crate::utils::panic_message;

struct Shared {
    max_parallelism: usize,
    semaphore: Arc<Semaphore>,
    submitted: AtomicUsize,
    launched: AtomicUsize,
    in_flight: AtomicUsize,
    done: AtomicUsize,
    idle: Notify,
}

impl Shared {
    fn run<T, E, F>(&self, id: usize, permit: OwnedSemaphorePermit, promise: Promise<T, E>, f: F)
    where
        F: FnOnce() -> Result<T, E>,
    {
        // Critical section start
        self.in_flight.fetch_add(1, Ordering::SeqCst);
        promise.set_state(FutureState::Executing);
        log::trace!("task {} executing", id);

        let outcome = catch_unwind(AssertUnwindSafe(f));

        // Critical section stop, let the next one in
        self.in_flight.fetch_sub(1, Ordering::SeqCst);
        drop(permit);

        let result: TaskResult<T, E> = match outcome {
            Ok(Ok(value)) => Ok(value),
            Ok(Err(err)) => Err(Error::work(err)),
            Err(payload) => {
                let msg = panic_message(payload);
                log::warn!("task {} panicked: {}", id, msg);
                Err(Error::Panicked(msg))
            }
        };
        promise.deliver(result);
    }
}

/// Counts a task as done when dropped, whether or not the
/// spawner ever ran it.
struct DoneGuard {
    shared: Arc<Shared>,
}

impl Drop for DoneGuard {
    fn drop(&mut self) {
        let done = self.shared.done.fetch_add(1, Ordering::SeqCst) + 1;
        if done == self.shared.launched.load(Ordering::SeqCst) {
            self.shared.idle.notify_waiters();
        }
    }
}

/// Runs submitted work with at most `max_parallelism`
/// functions executing at once.
///
/// Submission never blocks: every task is launched right
/// away as an async task queued on the capacity semaphore,
/// and only a task holding a slot occupies a thread. Safe to
/// share between threads and to reuse for any number of
/// batches.
pub struct Executor<Sp: Spawner> {
    shared: Arc<Shared>,
    spawner: Sp,
}

impl<Sp: Spawner + Default> Executor<Sp> {
    /// `max_parallelism == 0` means one slot per available
    /// CPU, resolved here once.
    pub fn new(max_parallelism: usize) -> Self {
        Self::with_spawner(max_parallelism, Sp::default())
    }
}

impl<Sp: Spawner> Executor<Sp> {
    pub fn with_spawner(max_parallelism: usize, spawner: Sp) -> Self {
        let max_parallelism = match max_parallelism {
            0 => num_cpus::get().max(1),
            n => n,
        };
        log::debug!("executor created with max parallelism {}", max_parallelism);
        Executor {
            shared: Arc::new(Shared {
                max_parallelism,
                semaphore: Arc::new(Semaphore::new(max_parallelism)),
                submitted: AtomicUsize::new(0),
                launched: AtomicUsize::new(0),
                in_flight: AtomicUsize::new(0),
                done: AtomicUsize::new(0),
                idle: Notify::new(),
            }),
            spawner,
        }
    }

    /// Launches `f` and returns its future immediately.
    ///
    /// The task waits for a capacity slot; if `token` fires
    /// first, `f` never runs and the future resolves to
    /// [`Error::Cancelled`]. Once `f` starts it always runs
    /// to completion.
    pub fn submit<T, E, F>(&self, token: &CancelToken, f: F) -> Future<T, E>
    where
        T: Send + 'static,
        E: Send + Sync + 'static,
        F: FnOnce() -> Result<T, E> + Send + 'static,
    {
        let (promise, future) = future::pair();
        let id = self.shared.submitted.fetch_add(1, Ordering::SeqCst);
        self.shared.launched.fetch_add(1, Ordering::SeqCst);
        log::trace!("task {} submitted", id);

        let guard = DoneGuard { shared: self.shared.clone() };
        let semaphore = self.shared.semaphore.clone();
        let token = token.clone();
        self.spawner.spawn(async move {
            match CancellableFuture::new(&token, semaphore.acquire_owned()).await {
                Err(WaitCancelled) => {
                    log::debug!("task {} cancelled while waiting for capacity", id);
                    promise.deliver(Err(Error::Cancelled));
                }
                // The semaphore is never closed, but a closed one
                // means nobody will ever run us.
                Ok(Err(_)) => promise.deliver(Err(Error::Abandoned)),
                Ok(Ok(permit)) => Sp::spawn_func(move || {
                    guard.shared.run(id, permit, promise, f);
                    drop(guard);
                }),
            }
        });
        future
    }

    /// Submits one task per position of `sequence`; `f`
    /// receives the index.
    pub fn submit_all<S, T, E, F>(&self, token: &CancelToken, sequence: &S, f: F) -> Futures<T, E>
    where
        S: Sequence + ?Sized,
        T: Send + 'static,
        E: Send + Sync + 'static,
        F: Fn(usize) -> Result<T, E> + Send + Sync + 'static,
    {
        let f = Arc::new(f);
        (0..sequence.seq_len())
            .map(|i| {
                let f = f.clone();
                self.submit(token, move || f(i))
            })
            .collect()
    }

    pub fn max_parallelism(&self) -> usize {
        self.shared.max_parallelism
    }

    pub fn submitted(&self) -> usize {
        self.shared.submitted.load(Ordering::SeqCst)
    }

    pub fn launched(&self) -> usize {
        self.shared.launched.load(Ordering::SeqCst)
    }

    /// Tasks holding a capacity slot right now.
    pub fn in_flight(&self) -> usize {
        self.shared.in_flight.load(Ordering::SeqCst)
    }

    pub fn done(&self) -> usize {
        self.shared.done.load(Ordering::SeqCst)
    }

    /// Launched but not yet done.
    pub fn pending(&self) -> usize {
        let done = self.done();
        self.launched().saturating_sub(done)
    }

    pub fn is_active(&self) -> bool {
        self.in_flight() > 0 || self.pending() > 0
    }

    /// Blocks until every launched task is done, or `token`
    /// fires.
    pub fn wait_idle(&self, token: &CancelToken) -> Result<(), WaitCancelled> {
        futures::executor::block_on(self.wait_idle_async(token))
    }

    pub async fn wait_idle_async(&self, token: &CancelToken) -> Result<(), WaitCancelled> {
        loop {
            // Registered before the check so a completion
            // between the two still wakes us.
            let notified = self.shared.idle.notified();
            if self.pending() == 0 {
                return Ok(());
            }
            CancellableFuture::new(token, notified).await?;
        }
    }
}

impl<Sp: Spawner> std::fmt::Debug for Executor<Sp> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Executor")
            .field("max_parallelism", &self.max_parallelism())
            .field("launched", &self.launched())
            .field("in_flight", &self.in_flight())
            .field("done", &self.done())
            .finish()
    }
}

cfg_any_spawner! {
    /// Executor on the crate's default runtime.
    pub type DefaultExecutor = Executor<crate::spawner::DefaultSpawner>;
}

cfg_tokio! {
    pub type TokioExecutor = Executor<crate::spawner::use_tokio::TokioSpawner>;
}

cfg_async_std! {
    pub type AsyncStdExecutor = Executor<crate::spawner::use_async_std::AsyncStdSpawner>;
}

#[cfg(all(test, any(feature = "use-async-std", feature = "use-tokio")))]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicBool;
    use std::time::{Duration, Instant};

    fn wait_until(what: &str, cond: impl Fn() -> bool) {
        let start = Instant::now();
        while !cond() {
            if start.elapsed() > Duration::from_secs(5) {
                panic!("timeout while waiting for {}", what);
            }
            std::thread::sleep(Duration::from_millis(1));
        }
    }

    #[test]
    fn never_exceeds_max_parallelism() {
        crate::init_test_logging();
        let parallelism = 5;
        let length = 60;
        let e = DefaultExecutor::new(parallelism);
        let token = CancelToken::new();

        let current = Arc::new(AtomicUsize::new(0));
        let max_seen = Arc::new(AtomicUsize::new(0));
        let release = Arc::new(AtomicBool::new(false));

        let futures: Vec<Future<usize, String>> = (0..length)
            .map(|i| {
                let (current, max_seen, release) =
                    (current.clone(), max_seen.clone(), release.clone());
                e.submit(&token, move || {
                    let now = current.fetch_add(1, Ordering::SeqCst) + 1;
                    max_seen.fetch_max(now, Ordering::SeqCst);
                    while !release.load(Ordering::SeqCst) {
                        std::thread::sleep(Duration::from_millis(1));
                    }
                    current.fetch_sub(1, Ordering::SeqCst);
                    Ok(i)
                })
            })
            .collect();

        assert_eq!(e.launched(), length);
        assert_eq!(e.submitted(), length);
        let executing = || futures.iter().filter(|f| f.state() == FutureState::Executing).count();
        wait_until("the first batch to start", || executing() == parallelism);

        assert_eq!(e.in_flight(), parallelism);
        assert_eq!(e.done(), 0);
        assert!(e.is_active());
        for f in futures.iter().filter(|f| f.state() == FutureState::AwaitingExecution) {
            assert!(!f.is_done());
            assert_eq!(f.get_no_block(), None);
        }

        release.store(true, Ordering::SeqCst);
        wait_until("all tasks to finish", || e.done() == length);

        for (i, f) in futures.iter().enumerate() {
            assert!(f.is_done());
            let r = f.get(&token);
            assert_eq!(f.state(), FutureState::ResultStored);
            assert_eq!(r, Ok(i));
            assert_eq!(f.get_no_block(), Some(r.clone()));
            assert_eq!(f.get(&token), r);
        }

        assert_eq!(max_seen.load(Ordering::SeqCst), parallelism);
        assert_eq!(current.load(Ordering::SeqCst), 0);
        assert_eq!(e.in_flight(), 0);
        assert!(!e.is_active());
    }

    #[test]
    fn zero_means_available_parallelism() {
        let e = DefaultExecutor::new(0);
        assert_eq!(e.max_parallelism(), num_cpus::get().max(1));
        assert!(e.max_parallelism() > 0);
    }

    #[test]
    fn each_submit_runs_once() {
        let e = DefaultExecutor::new(4);
        let token = CancelToken::new();
        let calls = Arc::new(AtomicUsize::new(0));
        let futures: Vec<Future<u8, String>> = (0..20)
            .map(|_| {
                let calls = calls.clone();
                e.submit(&token, move || {
                    calls.fetch_add(1, Ordering::SeqCst);
                    Ok(1)
                })
            })
            .collect();
        for f in &futures {
            for _ in 0..3 {
                assert_eq!(f.get(&token), Ok(1));
            }
        }
        assert_eq!(calls.load(Ordering::SeqCst), 20);
    }

    #[test]
    fn cancelled_before_capacity_never_runs() {
        let e = DefaultExecutor::new(2);
        let token = CancelToken::new();
        token.cancel();
        let ran = Arc::new(AtomicUsize::new(0));

        let futures: Vec<Future<(), String>> = (0..10)
            .map(|_| {
                let ran = ran.clone();
                e.submit(&token, move || {
                    ran.fetch_add(1, Ordering::SeqCst);
                    Ok(())
                })
            })
            .collect();

        assert_eq!(e.launched(), 10);
        for f in &futures {
            assert_eq!(f.get(&CancelToken::new()), Err(Error::Cancelled));
        }
        wait_until("all tasks to be done", || e.done() == 10);
        assert_eq!(ran.load(Ordering::SeqCst), 0);
        assert_eq!(e.in_flight(), 0);
    }

    #[test]
    fn cancel_does_not_preempt_running_work() {
        let e = DefaultExecutor::new(1);
        let token = CancelToken::new();
        let release = Arc::new(AtomicBool::new(false));

        let running = {
            let release = release.clone();
            e.submit(&token, move || {
                while !release.load(Ordering::SeqCst) {
                    std::thread::sleep(Duration::from_millis(1));
                }
                Ok::<_, String>("finished")
            })
        };
        wait_until("the first task to start", || running.state() == FutureState::Executing);
        let queued = e.submit(&token, || Ok::<_, String>("never"));

        token.cancel();
        assert_eq!(queued.get(&CancelToken::new()), Err(Error::Cancelled));
        assert_eq!(running.get(&token), Err(Error::Cancelled));

        release.store(true, Ordering::SeqCst);
        assert_eq!(running.get(&CancelToken::new()), Ok("finished"));
    }

    #[test]
    fn panics_are_captured_and_release_capacity() {
        let e = DefaultExecutor::new(1);
        let token = CancelToken::new();
        let bad: Future<u8, String> = e.submit(&token, || panic!("bad input"));
        let good: Future<u8, String> = e.submit(&token, || Ok(2));

        assert_eq!(bad.get(&token), Err(Error::Panicked("bad input".into())));
        assert_eq!(good.get(&token), Ok(2));
        e.wait_idle(&token).unwrap();
        assert_eq!(e.done(), 2);
    }

    #[test]
    fn work_errors_do_not_stop_siblings() {
        let e = DefaultExecutor::new(3);
        let token = CancelToken::new();
        let futures: Futures<usize, String> = e.submit_all(&token, &[(); 9][..], |i| {
            if i % 3 == 0 {
                Err(format!("bad {}", i))
            } else {
                Ok(i)
            }
        });
        let results = futures.get(&token);
        assert_eq!(results.stats(), (6, 3));
        assert_eq!(results[3], Err(Error::work("bad 3".to_string())));
        assert_eq!(results[4], Ok(4));
    }

    #[test]
    fn wait_idle_blocks_until_drained() {
        let e = DefaultExecutor::new(2);
        let token = CancelToken::new();
        assert_eq!(e.wait_idle(&token), Ok(()));

        let finished = Arc::new(AtomicUsize::new(0));
        for _ in 0..8 {
            let finished = finished.clone();
            let _: Future<(), String> = e.submit(&token, move || {
                std::thread::sleep(Duration::from_millis(5));
                finished.fetch_add(1, Ordering::SeqCst);
                Ok(())
            });
        }
        e.wait_idle(&token).unwrap();
        assert_eq!(finished.load(Ordering::SeqCst), 8);
        assert_eq!(e.pending(), 0);
        assert!(!e.is_active());
    }

    #[test]
    fn wait_idle_is_cancellable() {
        let e = DefaultExecutor::new(1);
        let release = Arc::new(AtomicBool::new(false));
        let blocker = {
            let release = release.clone();
            e.submit(&CancelToken::new(), move || {
                while !release.load(Ordering::SeqCst) {
                    std::thread::sleep(Duration::from_millis(1));
                }
                Ok::<_, String>(())
            })
        };
        let token = CancelToken::new();
        token.cancel();
        assert_eq!(e.wait_idle(&token), Err(WaitCancelled));

        release.store(true, Ordering::SeqCst);
        assert_eq!(blocker.get(&CancelToken::new()), Ok(()));
    }

    cfg_tokio! {
        #[tokio::test(flavor = "multi_thread")]
        async fn shares_ambient_tokio_runtime() {
            let e = TokioExecutor::new(2);
            let token = CancelToken::new();
            let futures: Vec<Future<u64, String>> =
                (0..10u64).map(|i| e.submit(&token, move || Ok(i * i))).collect();
            let mut total = 0;
            for f in &futures {
                total += f.get_async(&token).await.unwrap();
            }
            assert_eq!(total, 285);
            e.wait_idle_async(&token).await.unwrap();
        }

        fn small_blocking_pool() -> tokio::runtime::Runtime {
            tokio::runtime::Builder::new_multi_thread()
                .worker_threads(2)
                .max_blocking_threads(4)
                .build()
                .unwrap()
        }

        #[test]
        fn queued_tasks_leave_blocking_pool_free() {
            let rt = small_blocking_pool();
            let e = TokioExecutor::with_spawner(
                1,
                crate::spawner::use_tokio::TokioSpawner::new(rt.handle().clone()),
            );
            let token = CancelToken::new();
            let release = Arc::new(AtomicBool::new(false));

            let futures: Vec<Future<usize, String>> = (0..50)
                .map(|i| {
                    let release = release.clone();
                    e.submit(&token, move || {
                        while !release.load(Ordering::SeqCst) {
                            std::thread::sleep(Duration::from_millis(1));
                        }
                        Ok(i)
                    })
                })
                .collect();
            wait_until("the first task to start", || e.in_flight() == 1);

            // 49 tasks are queued, yet unrelated blocking work
            // still finds a thread.
            let (tx, rx) = std::sync::mpsc::channel();
            drop(rt.spawn_blocking(move || tx.send("unrelated").unwrap()));
            assert_eq!(rx.recv_timeout(Duration::from_secs(10)), Ok("unrelated"));

            release.store(true, Ordering::SeqCst);
            for (i, f) in futures.iter().enumerate() {
                assert_eq!(f.get(&token), Ok(i));
            }
            e.wait_idle(&token).unwrap();
        }

        #[test]
        fn nested_collect_completes_on_small_blocking_pool() {
            let rt = small_blocking_pool();
            let handle = rt.handle().clone();
            let (tx, rx) = std::sync::mpsc::channel();

            std::thread::spawn(move || {
                let _entered = handle.enter();
                let e = TokioExecutor::new(2);
                let outer = crate::collect_e(&CancelToken::new(), &e, &[(); 100][..], |i| {
                    let inner = crate::collect(&CancelToken::new(), 1, &[()][..], move |_| {
                        Ok::<_, String>(i * 2)
                    });
                    match inner.error() {
                        Some(err) => Err(err.to_string()),
                        None => Ok(inner.values_only()[0]),
                    }
                });
                tx.send(outer).unwrap();
            });

            let outer = rx
                .recv_timeout(Duration::from_secs(20))
                .expect("nested collect did not finish");
            assert_eq!(outer.stats(), (100, 0));
            assert_eq!(outer[7], Ok(14));
        }
    }

    cfg_async_std! {
        #[async_std::test]
        async fn runs_on_async_std() {
            let e = AsyncStdExecutor::new(2);
            let token = CancelToken::new();
            let f: Future<&str, String> = e.submit(&token, || Ok("done"));
            assert_eq!(f.get_async(&token).await, Ok("done"));
        }
    }
}
