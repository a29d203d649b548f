use crate::error::Error;
use core::borrow::Borrow;
use derive_more::{Deref, Display};
use indexmap::{IndexMap as _IndexMap, IndexSet as _IndexSet};
use rustc_hash::FxBuildHasher;
use std::sync::Arc;

/// Unique name of a task within one invocation.
///
/// Cheap to clone and borrowable as `&str`, so lookups never allocate.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Deref, Display)]
#[deref(forward)]
#[repr(transparent)]
pub struct TaskName(Arc<str>);

impl TaskName {
    /// The name as a string slice.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl Borrow<str> for TaskName {
    fn borrow(&self) -> &str {
        &self.0
    }
}

impl From<&str> for TaskName {
    fn from(name: &str) -> Self {
        Self(Arc::from(name))
    }
}

impl From<String> for TaskName {
    fn from(name: String) -> Self {
        Self(Arc::from(name))
    }
}

impl From<&TaskName> for TaskName {
    fn from(name: &TaskName) -> Self {
        name.clone()
    }
}

/// Settled state of a single task as reported by `run_settled`.
#[derive(Debug, Clone, PartialEq)]
pub enum Outcome<T, E> {
    /// The task produced a value.
    Fulfilled(T),
    /// The task failed, either on its own or by propagating a dependency's error.
    Rejected(Error<E>),
}

impl<T, E> Outcome<T, E> {
    /// `true` if the task produced a value.
    #[must_use]
    pub fn is_fulfilled(&self) -> bool {
        matches!(self, Self::Fulfilled(_))
    }

    /// `true` if the task failed.
    #[must_use]
    pub fn is_rejected(&self) -> bool {
        matches!(self, Self::Rejected(_))
    }

    /// Converts the outcome back into the `Result` the task returned.
    pub fn into_result(self) -> Result<T, Error<E>> {
        match self {
            Self::Fulfilled(value) => Ok(value),
            Self::Rejected(error) => Err(error),
        }
    }
}

impl<T, E> From<Result<T, Error<E>>> for Outcome<T, E> {
    fn from(result: Result<T, Error<E>>) -> Self {
        match result {
            Ok(value) => Self::Fulfilled(value),
            Err(error) => Self::Rejected(error),
        }
    }
}

/// `IndexMap` type with fast hasher.
pub type IndexMap<K, V> = _IndexMap<K, V, FxBuildHasher>;
/// `IndexSet` type with fast hasher.
pub type IndexSet<T> = _IndexSet<T, FxBuildHasher>;
