//! Common types shared across the reposync crates.
//!
//! This module provides the resource state threaded through every layer,
//! the cached entity model and the shared error type.

pub mod error;
pub mod resource;
pub mod types;

pub use error::{Error, Result};
pub use resource::{Resource, Status};
pub use types::{
    Contributor, Owner, Repo, RepoKey, RepoSearchResponse, RepoSearchResult, User, UNKNOWN_REPO_ID,
};
