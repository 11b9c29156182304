//! Fan-out/fan-in helpers: submit one task per item, then
//! gather the futures back in input order (or by key).
use std::collections::{HashMap, VecDeque};
use std::hash::Hash;
use std::sync::Arc;

use crate::cancellation::CancelToken;
use crate::executor::Executor;
use crate::future::Future;
use crate::result::{Results, ResultsMap, TaskResult};
use crate::spawner::Spawner;

/// An ordered, indexable input. The collect helpers only
/// need its length; the work function is handed indices.
///
/// `Option<S>` stands for an absent input and behaves like
/// an empty one.
pub trait Sequence {
    fn seq_len(&self) -> usize;
}

impl<T> Sequence for [T] {
    fn seq_len(&self) -> usize {
        self.len()
    }
}

impl<T, const N: usize> Sequence for [T; N] {
    fn seq_len(&self) -> usize {
        N
    }
}

impl<T> Sequence for Vec<T> {
    fn seq_len(&self) -> usize {
        self.len()
    }
}

impl<T> Sequence for VecDeque<T> {
    fn seq_len(&self) -> usize {
        self.len()
    }
}

impl<S: Sequence + ?Sized> Sequence for &S {
    fn seq_len(&self) -> usize {
        (**self).seq_len()
    }
}

impl<S: Sequence> Sequence for Option<S> {
    fn seq_len(&self) -> usize {
        self.as_ref().map_or(0, Sequence::seq_len)
    }
}

cfg_any_spawner! {
    use crate::spawner::DefaultSpawner;

    /// Applies `f` to every index of `sequence` with at most
    /// `max_parallelism` calls running at once. Position `i`
    /// of the output holds the outcome of `f(i)`.
    ///
    /// ```
    /// use bounded_collect::{collect, CancelToken};
    /// use std::sync::Arc;
    ///
    /// let inputs = Arc::new(vec![100, 200, 300]);
    /// let data = inputs.clone();
    /// let results = collect(&CancelToken::new(), 0, &*inputs, move |i| {
    ///     Ok::<_, String>(data[i] + 10)
    /// });
    /// assert_eq!(results.values_only(), vec![110, 210, 310]);
    /// ```
    pub fn collect<S, T, E, F>(
        token: &CancelToken,
        max_parallelism: usize,
        sequence: &S,
        f: F,
    ) -> Results<T, E>
    where
        S: Sequence + ?Sized,
        T: Clone + Send + 'static,
        E: Send + Sync + 'static,
        F: Fn(usize) -> Result<T, E> + Send + Sync + 'static,
    {
        collect_e(token, &Executor::<DefaultSpawner>::new(max_parallelism), sequence, f)
    }

    /// Applies `f` to every key, returning a map of key to
    /// outcome. Duplicate keys collapse into one entry.
    pub fn collect_map<K, T, E, F>(
        token: &CancelToken,
        max_parallelism: usize,
        keys: impl IntoIterator<Item = K>,
        f: F,
    ) -> ResultsMap<K, T, E>
    where
        K: Eq + Hash + Clone + Send + 'static,
        T: Clone + Send + 'static,
        E: Send + Sync + 'static,
        F: Fn(K) -> Result<T, E> + Send + Sync + 'static,
    {
        collect_map_e(token, &Executor::<DefaultSpawner>::new(max_parallelism), keys, f)
    }

    /// Runs `f` for every key already present in `map` and
    /// writes the outcome back in place. The key set is left
    /// untouched.
    pub fn collect_map_replace<K, T, E, F>(
        token: &CancelToken,
        max_parallelism: usize,
        map: &mut HashMap<K, Option<TaskResult<T, E>>>,
        f: F,
    ) where
        K: Eq + Hash + Clone + Send + 'static,
        T: Clone + Send + 'static,
        E: Send + Sync + 'static,
        F: Fn(K) -> Result<T, E> + Send + Sync + 'static,
    {
        collect_map_replace_e(token, &Executor::<DefaultSpawner>::new(max_parallelism), map, f)
    }
}

/// Same as [`collect`], on a caller-owned executor so
/// several batches can share its capacity.
pub fn collect_e<Sp, S, T, E, F>(
    token: &CancelToken,
    executor: &Executor<Sp>,
    sequence: &S,
    f: F,
) -> Results<T, E>
where
    Sp: Spawner,
    S: Sequence + ?Sized,
    T: Clone + Send + 'static,
    E: Send + Sync + 'static,
    F: Fn(usize) -> Result<T, E> + Send + Sync + 'static,
{
    let futures = executor.submit_all(token, sequence, f);
    log::trace!("collecting {} futures", futures.len());
    collect_futures(token, &futures)
}

pub fn collect_map_e<Sp, K, T, E, F>(
    token: &CancelToken,
    executor: &Executor<Sp>,
    keys: impl IntoIterator<Item = K>,
    f: F,
) -> ResultsMap<K, T, E>
where
    Sp: Spawner,
    K: Eq + Hash + Clone + Send + 'static,
    T: Clone + Send + 'static,
    E: Send + Sync + 'static,
    F: Fn(K) -> Result<T, E> + Send + Sync + 'static,
{
    let mut map: HashMap<K, Option<TaskResult<T, E>>> =
        keys.into_iter().map(|key| (key, None)).collect();
    collect_map_replace_e(token, executor, &mut map, f);
    map.into_iter()
        .filter_map(|(key, result)| result.map(|r| (key, r)))
        .collect()
}

pub fn collect_map_replace_e<Sp, K, T, E, F>(
    token: &CancelToken,
    executor: &Executor<Sp>,
    map: &mut HashMap<K, Option<TaskResult<T, E>>>,
    f: F,
) where
    Sp: Spawner,
    K: Eq + Hash + Clone + Send + 'static,
    T: Clone + Send + 'static,
    E: Send + Sync + 'static,
    F: Fn(K) -> Result<T, E> + Send + Sync + 'static,
{
    let f = Arc::new(f);
    let futures: Vec<(K, Future<T, E>)> = map
        .keys()
        .map(|key| {
            let (f, k) = (f.clone(), key.clone());
            (key.clone(), executor.submit(token, move || f(k)))
        })
        .collect();
    for (key, future) in futures {
        let result = future.get(token);
        if let Some(slot) = map.get_mut(&key) {
            *slot = Some(result);
        }
    }
}

/// Blocks on each future in order and assembles their
/// outcomes.
pub fn collect_futures<T: Clone, E>(token: &CancelToken, futures: &[Future<T, E>]) -> Results<T, E> {
    futures.iter().map(|f| f.get(token)).collect()
}

/// Keyed form of [`collect_futures`]; futures are waited on
/// in no particular order.
pub fn collect_futures_map<K, T, E>(
    token: &CancelToken,
    futures: &HashMap<K, Future<T, E>>,
) -> ResultsMap<K, T, E>
where
    K: Eq + Hash + Clone,
    T: Clone,
{
    futures
        .iter()
        .map(|(key, f)| (key.clone(), f.get(token)))
        .collect()
}
