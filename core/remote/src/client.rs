//! GitHub REST API client.

use async_trait::async_trait;
use reqwest::{header, Client};
use serde::de::DeserializeOwned;
use std::time::Duration;
use tracing::{debug, warn};
use url::Url;

use reposync_common::{Contributor, Error, Repo, RepoSearchResponse, Result, User};

use crate::config::ClientConfig;
use crate::response::ApiResponse;

const GITHUB_JSON: &str = "application/vnd.github+json";

/// Remote source of entities.
///
/// Every call resolves to an [`ApiResponse`]; dropping the returned future
/// abandons the request.
#[async_trait]
pub trait RemoteClient: Send + Sync {
    async fn get_user(&self, login: &str) -> ApiResponse<User>;

    /// Repositories owned by `owner`.
    async fn get_repos(&self, owner: &str) -> ApiResponse<Vec<Repo>>;

    async fn get_repo(&self, owner: &str, name: &str) -> ApiResponse<Repo>;

    async fn get_contributors(&self, owner: &str, name: &str) -> ApiResponse<Vec<Contributor>>;

    /// One page of repository search results. `None` requests the first page.
    async fn search_repos(&self, query: &str, page: Option<u32>)
        -> ApiResponse<RepoSearchResponse>;
}

/// [`RemoteClient`] over HTTPS.
pub struct HttpClient {
    http: Client,
    base_url: Url,
    token: Option<String>,
}

impl HttpClient {
    /// Create a new client.
    ///
    /// # Errors
    /// - `base_url` is not an absolute http(s) URL
    /// - the HTTP client cannot be built
    pub fn new(config: &ClientConfig) -> Result<Self> {
        let base_url = Url::parse(&config.base_url)
            .map_err(|e| Error::InvalidInput(format!("Invalid base URL: {}", e)))?;
        if base_url.cannot_be_a_base() {
            return Err(Error::InvalidInput(format!(
                "Base URL cannot hold paths: {}",
                base_url
            )));
        }

        let http = Client::builder()
            .user_agent(config.user_agent.clone())
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()
            .map_err(|e| Error::Network(format!("Failed to create HTTP client: {}", e)))?;

        Ok(Self {
            http,
            base_url,
            token: config.token.clone(),
        })
    }

    /// Base URL with `segments` appended, each percent-encoded.
    fn endpoint(&self, segments: &[&str]) -> Option<Url> {
        let mut url = self.base_url.clone();
        url.path_segments_mut()
            .ok()?
            .pop_if_empty()
            .extend(segments);
        Some(url)
    }

    async fn get<T: DeserializeOwned>(
        &self,
        segments: &[&str],
        query: &[(&str, String)],
    ) -> ApiResponse<T> {
        let Some(url) = self.endpoint(segments) else {
            return ApiResponse::error(format!("Cannot build URL for {}", segments.join("/")));
        };
        debug!("GET {}", url);

        let mut request = self.http.get(url).header(header::ACCEPT, GITHUB_JSON);
        if !query.is_empty() {
            request = request.query(query);
        }
        if let Some(token) = &self.token {
            request = request.bearer_auth(token);
        }

        let response = match request.send().await {
            Ok(response) => response,
            Err(e) => {
                warn!("Request failed: {}", e);
                return ApiResponse::from_transport_error(Some(e.to_string()));
            }
        };

        let status = response.status();
        let link = response
            .headers()
            .get(header::LINK)
            .and_then(|value| value.to_str().ok())
            .map(str::to_string);
        let body = match response.text().await {
            Ok(body) => body,
            Err(e) => return ApiResponse::from_transport_error(Some(e.to_string())),
        };

        ApiResponse::from_http(
            status.as_u16(),
            status.canonical_reason(),
            &body,
            link.as_deref(),
        )
    }
}

#[async_trait]
impl RemoteClient for HttpClient {
    async fn get_user(&self, login: &str) -> ApiResponse<User> {
        self.get(&["users", login], &[]).await
    }

    async fn get_repos(&self, owner: &str) -> ApiResponse<Vec<Repo>> {
        self.get(&["users", owner, "repos"], &[]).await
    }

    async fn get_repo(&self, owner: &str, name: &str) -> ApiResponse<Repo> {
        self.get(&["repos", owner, name], &[]).await
    }

    async fn get_contributors(&self, owner: &str, name: &str) -> ApiResponse<Vec<Contributor>> {
        self.get(&["repos", owner, name, "contributors"], &[]).await
    }

    async fn search_repos(
        &self,
        query: &str,
        page: Option<u32>,
    ) -> ApiResponse<RepoSearchResponse> {
        let mut params = vec![("q", query.to_string())];
        if let Some(page) = page {
            params.push(("page", page.to_string()));
        }
        self.get(&["search", "repositories"], &params).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn client(base_url: &str) -> HttpClient {
        HttpClient::new(&ClientConfig {
            base_url: base_url.to_string(),
            ..ClientConfig::default()
        })
        .unwrap()
    }

    #[test]
    fn test_endpoint_joins_segments() {
        let client = client("https://api.github.com/");
        let url = client.endpoint(&["repos", "foo", "bar", "contributors"]).unwrap();
        assert_eq!(url.as_str(), "https://api.github.com/repos/foo/bar/contributors");
    }

    #[test]
    fn test_endpoint_keeps_base_path() {
        let client = client("https://ghe.example.com/api/v3");
        let url = client.endpoint(&["users", "octocat"]).unwrap();
        assert_eq!(url.as_str(), "https://ghe.example.com/api/v3/users/octocat");
    }

    #[test]
    fn test_endpoint_escapes_segments() {
        let client = client("https://api.github.com/");
        let url = client.endpoint(&["users", "a/b"]).unwrap();
        assert_eq!(url.as_str(), "https://api.github.com/users/a%2Fb");
    }

    #[test]
    fn test_rejects_invalid_base_url() {
        let result = HttpClient::new(&ClientConfig {
            base_url: "not a url".to_string(),
            ..ClientConfig::default()
        });
        assert!(matches!(result, Err(Error::InvalidInput(_))));
    }

    #[tokio::test]
    async fn test_transport_failure_is_error_response() {
        // Nothing listens on port 9 of the loopback interface.
        let client = client("http://127.0.0.1:9/");
        let response = client.get_user("octocat").await;
        assert!(matches!(response, ApiResponse::Error { .. }));
    }
}
