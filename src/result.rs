//! Per-task outcomes and their ordered and keyed
//! collections.
use std::collections::HashMap;
use std::fmt;
use std::hash::Hash;
use std::ops::Deref;
use std::sync::Arc;

/// Why a task did not produce a value.
#[derive(Debug, thiserror::Error)]
pub enum Error<E> {
    /// A wait for capacity or for the result was abandoned
    /// because the cancel token fired.
    #[error("operation cancelled")]
    Cancelled,
    /// The producing task was dropped before it delivered a
    /// result, e.g. its runtime shut down.
    #[error("task dropped before delivering its result")]
    Abandoned,
    /// The work function panicked.
    #[error("task panicked: {0}")]
    Panicked(String),
    /// The work function returned an error.
    #[error("{0}")]
    Work(Arc<E>),
}

impl<E> Error<E> {
    pub fn work(err: E) -> Self {
        Error::Work(Arc::new(err))
    }

    pub fn is_cancelled(&self) -> bool {
        matches!(self, Error::Cancelled)
    }

    /// The work function's own error, if that is what this is.
    pub fn as_work(&self) -> Option<&E> {
        match self {
            Error::Work(err) => Some(err.as_ref()),
            _ => None,
        }
    }
}

impl<E> Clone for Error<E> {
    fn clone(&self) -> Self {
        match self {
            Error::Cancelled => Error::Cancelled,
            Error::Abandoned => Error::Abandoned,
            Error::Panicked(msg) => Error::Panicked(msg.clone()),
            Error::Work(err) => Error::Work(err.clone()),
        }
    }
}

impl<E: PartialEq> PartialEq for Error<E> {
    fn eq(&self, other: &Self) -> bool {
        match (self, other) {
            (Error::Cancelled, Error::Cancelled) => true,
            (Error::Abandoned, Error::Abandoned) => true,
            (Error::Panicked(a), Error::Panicked(b)) => a == b,
            (Error::Work(a), Error::Work(b)) => Arc::ptr_eq(a, b) || **a == **b,
            _ => false,
        }
    }
}

/// The outcome of one task: a value, or the reason there is
/// none.
pub type TaskResult<T, E> = Result<T, Error<E>>;

/// Accessors mirroring the "value plus optional error" view
/// of a [`TaskResult`].
pub trait ResultExt<T, E> {
    /// Returns the value, panicking with the error's message
    /// if there is none. Only for callers that have already
    /// decided an error is a bug.
    fn must(self) -> T;

    /// Splits into `(value, error)`, substituting
    /// `T::default()` for the value of a failed task.
    fn into_parts(self) -> (T, Option<E>)
    where
        T: Default;
}

impl<T, E: fmt::Display> ResultExt<T, E> for Result<T, E> {
    #[track_caller]
    fn must(self) -> T {
        match self {
            Ok(value) => value,
            Err(err) => panic!("{}", err),
        }
    }

    fn into_parts(self) -> (T, Option<E>)
    where
        T: Default,
    {
        match self {
            Ok(value) => (value, None),
            Err(err) => (T::default(), Some(err)),
        }
    }
}

/// Aggregate of every error in a batch.
#[derive(Debug, Clone)]
pub struct ResultsError<E> {
    pub errors: Vec<Error<E>>,
}

impl<E: fmt::Display> fmt::Display for ResultsError<E> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.errors.as_slice() {
            [] => Ok(()),
            [only] => write!(f, "error occurred: {}", only),
            many => {
                write!(f, "multiple errors occurred ({}): [", many.len())?;
                for (i, err) in many.iter().enumerate() {
                    if i > 0 {
                        f.write_str(", ")?;
                    }
                    write!(f, "{}", err)?;
                }
                f.write_str("]")
            }
        }
    }
}

impl<E: fmt::Debug + fmt::Display> std::error::Error for ResultsError<E> {}

/// Results of a batch, position `i` holding the outcome for
/// input `i`.
#[derive(Debug, Clone, PartialEq)]
pub struct Results<T, E>(Vec<TaskResult<T, E>>);

impl<T, E> Results<T, E> {
    pub fn new() -> Self {
        Results(Vec::new())
    }

    pub fn into_inner(self) -> Vec<TaskResult<T, E>> {
        self.0
    }

    /// Every value in order, `T::default()` where the task
    /// failed.
    pub fn values(&self) -> Vec<T>
    where
        T: Clone + Default,
    {
        self.0
            .iter()
            .map(|r| r.as_ref().map(T::clone).unwrap_or_default())
            .collect()
    }

    /// One slot per entry, `None` where the task succeeded.
    pub fn errors(&self) -> Vec<Option<Error<E>>> {
        self.0.iter().map(|r| r.as_ref().err().cloned()).collect()
    }

    pub fn values_only(&self) -> Vec<T>
    where
        T: Clone,
    {
        self.0.iter().filter_map(|r| r.as_ref().ok().cloned()).collect()
    }

    pub fn errors_only(&self) -> Vec<Error<E>> {
        self.0.iter().filter_map(|r| r.as_ref().err().cloned()).collect()
    }

    /// `(successes, errors)`.
    pub fn stats(&self) -> (usize, usize) {
        let errors = self.0.iter().filter(|r| r.is_err()).count();
        (self.0.len() - errors, errors)
    }

    pub fn has_error(&self) -> bool {
        self.0.iter().any(Result::is_err)
    }

    /// A single error wrapping every failure, or `None` if
    /// the whole batch succeeded.
    pub fn error(&self) -> Option<ResultsError<E>> {
        let errors = self.errors_only();
        if errors.is_empty() {
            return None;
        }
        Some(ResultsError { errors })
    }
}

impl<T, E> Default for Results<T, E> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T, E> Deref for Results<T, E> {
    type Target = [TaskResult<T, E>];

    fn deref(&self) -> &Self::Target {
        &self.0
    }
}

impl<T, E> From<Vec<TaskResult<T, E>>> for Results<T, E> {
    fn from(results: Vec<TaskResult<T, E>>) -> Self {
        Results(results)
    }
}

impl<T, E> FromIterator<TaskResult<T, E>> for Results<T, E> {
    fn from_iter<I: IntoIterator<Item = TaskResult<T, E>>>(iter: I) -> Self {
        Results(iter.into_iter().collect())
    }
}

impl<T, E> IntoIterator for Results<T, E> {
    type Item = TaskResult<T, E>;
    type IntoIter = std::vec::IntoIter<TaskResult<T, E>>;

    fn into_iter(self) -> Self::IntoIter {
        self.0.into_iter()
    }
}

impl<'a, T, E> IntoIterator for &'a Results<T, E> {
    type Item = &'a TaskResult<T, E>;
    type IntoIter = std::slice::Iter<'a, TaskResult<T, E>>;

    fn into_iter(self) -> Self::IntoIter {
        self.0.iter()
    }
}

/// Results keyed by the input they were computed from.
#[derive(Debug, Clone)]
pub struct ResultsMap<K, T, E>(HashMap<K, TaskResult<T, E>>);

impl<K: Eq + Hash, T, E> ResultsMap<K, T, E> {
    pub fn new() -> Self {
        ResultsMap(HashMap::new())
    }

    pub fn into_inner(self) -> HashMap<K, TaskResult<T, E>> {
        self.0
    }

    pub fn insert(&mut self, key: K, result: TaskResult<T, E>) -> Option<TaskResult<T, E>> {
        self.0.insert(key, result)
    }

    pub fn values(&self) -> HashMap<K, T>
    where
        K: Clone,
        T: Clone + Default,
    {
        self.0
            .iter()
            .map(|(k, r)| (k.clone(), r.as_ref().map(T::clone).unwrap_or_default()))
            .collect()
    }

    pub fn errors(&self) -> HashMap<K, Option<Error<E>>>
    where
        K: Clone,
    {
        self.0
            .iter()
            .map(|(k, r)| (k.clone(), r.as_ref().err().cloned()))
            .collect()
    }

    pub fn values_only(&self) -> HashMap<K, T>
    where
        K: Clone,
        T: Clone,
    {
        self.0
            .iter()
            .filter_map(|(k, r)| r.as_ref().ok().map(|v| (k.clone(), v.clone())))
            .collect()
    }

    pub fn errors_only(&self) -> HashMap<K, Error<E>>
    where
        K: Clone,
    {
        self.0
            .iter()
            .filter_map(|(k, r)| r.as_ref().err().map(|e| (k.clone(), e.clone())))
            .collect()
    }

    pub fn stats(&self) -> (usize, usize) {
        let errors = self.0.values().filter(|r| r.is_err()).count();
        (self.0.len() - errors, errors)
    }

    pub fn has_error(&self) -> bool {
        self.0.values().any(Result::is_err)
    }

    /// A single error wrapping every failure, in no
    /// particular order, or `None` if none failed.
    pub fn error(&self) -> Option<ResultsError<E>> {
        let errors: Vec<_> = self
            .0
            .values()
            .filter_map(|r| r.as_ref().err().cloned())
            .collect();
        if errors.is_empty() {
            return None;
        }
        Some(ResultsError { errors })
    }
}

impl<K: Eq + Hash, T: PartialEq, E: PartialEq> PartialEq for ResultsMap<K, T, E> {
    fn eq(&self, other: &Self) -> bool {
        self.0 == other.0
    }
}

impl<K: Eq + Hash, T, E> Default for ResultsMap<K, T, E> {
    fn default() -> Self {
        Self::new()
    }
}

impl<K, T, E> Deref for ResultsMap<K, T, E> {
    type Target = HashMap<K, TaskResult<T, E>>;

    fn deref(&self) -> &Self::Target {
        &self.0
    }
}

impl<K: Eq + Hash, T, E> From<HashMap<K, TaskResult<T, E>>> for ResultsMap<K, T, E> {
    fn from(results: HashMap<K, TaskResult<T, E>>) -> Self {
        ResultsMap(results)
    }
}

impl<K: Eq + Hash, T, E> FromIterator<(K, TaskResult<T, E>)> for ResultsMap<K, T, E> {
    fn from_iter<I: IntoIterator<Item = (K, TaskResult<T, E>)>>(iter: I) -> Self {
        ResultsMap(iter.into_iter().collect())
    }
}

impl<K, T, E> IntoIterator for ResultsMap<K, T, E> {
    type Item = (K, TaskResult<T, E>);
    type IntoIter = std::collections::hash_map::IntoIter<K, TaskResult<T, E>>;

    fn into_iter(self) -> Self::IntoIter {
        self.0.into_iter()
    }
}
