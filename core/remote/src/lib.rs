//! Remote source abstraction for reposync.
//!
//! The sync core talks to GitHub through [`RemoteClient`]. Responses are
//! classified into [`ApiResponse`] values so that remote failures never
//! surface as errors, only as data the engine can report.

pub mod client;
pub mod config;
pub mod link;
pub mod mock;
pub mod response;

pub use client::{HttpClient, RemoteClient};
pub use config::ClientConfig;
pub use mock::{Gate, MockRemote, Request};
pub use response::ApiResponse;
