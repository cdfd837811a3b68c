//! Remote client configuration.

use serde::{Deserialize, Serialize};

/// GitHub REST API root.
pub const DEFAULT_BASE_URL: &str = "https://api.github.com/";

const DEFAULT_USER_AGENT: &str = "reposync/0.1";
const DEFAULT_TIMEOUT_SECS: u64 = 30;

/// Settings for [`crate::HttpClient`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ClientConfig {
    #[serde(default = "default_base_url")]
    pub base_url: String,
    #[serde(default = "default_user_agent")]
    pub user_agent: String,
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
    /// Personal access token, sent as a bearer token when present.
    #[serde(default)]
    pub token: Option<String>,
}

fn default_base_url() -> String {
    DEFAULT_BASE_URL.to_string()
}

fn default_user_agent() -> String {
    DEFAULT_USER_AGENT.to_string()
}

fn default_timeout_secs() -> u64 {
    DEFAULT_TIMEOUT_SECS
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            base_url: default_base_url(),
            user_agent: default_user_agent(),
            timeout_secs: default_timeout_secs(),
            token: None,
        }
    }
}
