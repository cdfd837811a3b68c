//! Reposync synchronization core
//!
//! This module keeps locally cached GitHub entities in step with the remote:
//! - A cache-then-network engine exposing resource state streams
//! - Entity repositories for repositories, contributors, users and search
//! - Next-page merging of search results and its coordinator
//! - Key-driven stream switching over a conflated channel
//! - Consumer sessions tying the above together

pub mod config;
pub mod engine;
pub mod next_page;
pub mod pagination;
pub mod rate_limiter;
pub mod repository;
pub mod session;
pub mod switcher;

// Re-export main types
pub use config::SyncConfig;
pub use engine::{as_stream, NetworkBoundResource, ResourceStream};
pub use next_page::{LoadMoreState, NextPageCoordinator, NextPageFetcher};
pub use pagination::merge_next_page;
pub use rate_limiter::RateLimiter;
pub use repository::{RepoRepository, UserRepository};
pub use session::{RepoFeeds, RepoSession, SearchSession, UserFeeds, UserSession};
pub use switcher::{conflated, ConflatedReceiver, ConflatedSender, KeyedSwitcher, SwitchingSource};
