//! Cached entity model.
//!
//! Entities are upserted wholesale on every successful fetch; there is no
//! field-level merge. Field names follow the GitHub REST payloads so the
//! same types decode remote bodies and travel into the local store.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Id given to placeholder repositories created before their details are known.
pub const UNKNOWN_REPO_ID: i64 = -1;

/// Owner of a repository.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Owner {
    pub login: String,
    #[serde(default)]
    pub url: Option<String>,
}

/// A GitHub repository. Natural key: owner login + name.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Repo {
    pub id: i64,
    pub name: String,
    pub full_name: String,
    #[serde(default)]
    pub description: Option<String>,
    pub owner: Owner,
    #[serde(rename = "stargazers_count", default)]
    pub stars: i64,
}

impl Repo {
    /// Placeholder row used when contributors arrive before the repository.
    pub fn placeholder(owner: &str, name: &str) -> Self {
        Self {
            id: UNKNOWN_REPO_ID,
            name: name.to_string(),
            full_name: format!("{}/{}", owner, name),
            description: Some(String::new()),
            owner: Owner {
                login: owner.to_string(),
                url: None,
            },
            stars: 0,
        }
    }

    /// Natural key of this repository.
    pub fn key(&self) -> RepoKey {
        RepoKey::new(self.owner.login.clone(), self.name.clone())
    }
}

/// Natural key of a repository.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct RepoKey {
    pub owner: String,
    pub name: String,
}

impl RepoKey {
    pub fn new(owner: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            owner: owner.into(),
            name: name.into(),
        }
    }

    /// Returns the key only when both parts are non-blank.
    pub fn if_exists(&self) -> Option<&Self> {
        if self.owner.trim().is_empty() || self.name.trim().is_empty() {
            None
        } else {
            Some(self)
        }
    }
}

impl fmt::Display for RepoKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.owner, self.name)
    }
}

/// A GitHub user. Natural key: login.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct User {
    pub login: String,
    #[serde(default)]
    pub avatar_url: Option<String>,
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub company: Option<String>,
    #[serde(default)]
    pub repos_url: Option<String>,
    #[serde(default)]
    pub blog: Option<String>,
}

/// A contributor of one repository. Natural key: repo owner + repo name + login.
///
/// The remote payload does not name the repository; `repo_owner` and
/// `repo_name` are stamped in before persisting.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Contributor {
    pub login: String,
    pub contributions: i64,
    #[serde(default)]
    pub avatar_url: Option<String>,
    #[serde(default)]
    pub repo_owner: String,
    #[serde(default)]
    pub repo_name: String,
}

/// Persisted outcome of a search query.
///
/// `repo_ids` is in relevance order and only ever grows by appending a
/// page. The row is always replaced as a whole so that the ids, the
/// total and the next page stay consistent with each other.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RepoSearchResult {
    pub query: String,
    pub repo_ids: Vec<i64>,
    pub total_count: i64,
    pub next_page: Option<u32>,
}

/// One page of search results as returned by the remote.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RepoSearchResponse {
    #[serde(rename = "total_count", default)]
    pub total: i64,
    #[serde(default)]
    pub items: Vec<Repo>,
}

impl RepoSearchResponse {
    /// Ids of the repositories on this page, in order.
    pub fn repo_ids(&self) -> Vec<i64> {
        self.items.iter().map(|repo| repo.id).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_repo_decodes_github_payload() {
        let json = r#"{
            "id": 42,
            "name": "tokio",
            "full_name": "tokio-rs/tokio",
            "description": null,
            "owner": {"login": "tokio-rs", "url": "https://api.github.com/users/tokio-rs"},
            "stargazers_count": 25000,
            "forks": 1
        }"#;

        let repo: Repo = serde_json::from_str(json).unwrap();
        assert_eq!(repo.id, 42);
        assert_eq!(repo.stars, 25000);
        assert_eq!(repo.key(), RepoKey::new("tokio-rs", "tokio"));
        assert!(repo.description.is_none());
    }

    #[test]
    fn test_placeholder_repo() {
        let repo = Repo::placeholder("foo", "bar");
        assert_eq!(repo.id, UNKNOWN_REPO_ID);
        assert_eq!(repo.full_name, "foo/bar");
        assert_eq!(repo.stars, 0);
    }

    #[test]
    fn test_repo_key_if_exists() {
        assert!(RepoKey::new("foo", "bar").if_exists().is_some());
        assert!(RepoKey::new("", "bar").if_exists().is_none());
        assert!(RepoKey::new("foo", "  ").if_exists().is_none());
    }

    #[test]
    fn test_search_response_ids() {
        let json = r#"{"total_count": 2, "items": [
            {"id": 3, "name": "a", "full_name": "o/a", "owner": {"login": "o"}},
            {"id": 9, "name": "b", "full_name": "o/b", "owner": {"login": "o"}}
        ]}"#;

        let response: RepoSearchResponse = serde_json::from_str(json).unwrap();
        assert_eq!(response.total, 2);
        assert_eq!(response.repo_ids(), vec![3, 9]);
    }
}
