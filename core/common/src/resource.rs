//! Resource state: the value every synchronized stream carries.

use serde::{Deserialize, Serialize};

/// Status of a resource.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Status {
    /// A fetch is in progress; `data` is the best currently known value.
    Loading,
    /// `data` is the current value.
    Success,
    /// The remote fetch failed; `data` is the retained cached value.
    Error,
    /// Nothing to do. Carries neither data nor message.
    None,
}

/// A value together with its synchronization status.
///
/// Instances are immutable; layers create new states rather than
/// mutating the one they received.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Resource<T> {
    pub status: Status,
    pub data: Option<T>,
    pub message: Option<String>,
}

impl<T> Resource<T> {
    /// A successful state.
    pub fn success(data: Option<T>) -> Self {
        Self {
            status: Status::Success,
            data,
            message: None,
        }
    }

    /// A failed state retaining whatever data was known.
    pub fn error(message: impl Into<String>, data: Option<T>) -> Self {
        Self {
            status: Status::Error,
            data,
            message: Some(message.into()),
        }
    }

    /// A loading state carrying the best known data.
    pub fn loading(data: Option<T>) -> Self {
        Self {
            status: Status::Loading,
            data,
            message: None,
        }
    }

    /// The "nothing to do" state.
    pub fn none() -> Self {
        Self {
            status: Status::None,
            data: None,
            message: None,
        }
    }

    /// Whether this state ends a fetch cycle (success or error).
    pub fn is_terminal(&self) -> bool {
        matches!(self.status, Status::Success | Status::Error)
    }

    /// Map the carried data, keeping status and message.
    pub fn map<U>(self, f: impl FnOnce(T) -> U) -> Resource<U> {
        Resource {
            status: self.status,
            data: self.data.map(f),
            message: self.message,
        }
    }
}
