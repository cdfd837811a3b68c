//! Entity repositories: one engine instantiation per entity kind.

use async_trait::async_trait;
use futures::StreamExt;
use std::sync::Arc;
use tracing::debug;

use reposync_common::{
    Contributor, Repo, RepoKey, RepoSearchResponse, RepoSearchResult, Resource, Result, User,
};
use reposync_remote::{ApiResponse, RemoteClient};
use reposync_storage::{LocalStore, Watch, WriteBatch};

use crate::config::SyncConfig;
use crate::engine::{as_stream, NetworkBoundResource, ResourceStream};
use crate::pagination::merge_next_page;
use crate::rate_limiter::RateLimiter;

/// Repositories, their contributors and search results.
pub struct RepoRepository {
    store: Arc<dyn LocalStore>,
    remote: Arc<dyn RemoteClient>,
    repo_list_limiter: Arc<RateLimiter<String>>,
    capacity: usize,
}

impl RepoRepository {
    pub fn new(
        store: Arc<dyn LocalStore>,
        remote: Arc<dyn RemoteClient>,
        config: &SyncConfig,
    ) -> Self {
        Self {
            store,
            remote,
            repo_list_limiter: Arc::new(RateLimiter::new(config.repo_list_freshness())),
            capacity: config.channel_capacity,
        }
    }

    /// Repositories of `owner`, most starred first.
    ///
    /// A non-empty cached list is refetched once its freshness window
    /// expires. A failed fetch reopens the window.
    pub fn load_repos(&self, owner: &str) -> ResourceStream<Vec<Repo>> {
        as_stream(
            RepoList {
                owner: owner.to_string(),
                store: self.store.clone(),
                remote: self.remote.clone(),
                limiter: self.repo_list_limiter.clone(),
            },
            self.capacity,
        )
    }

    pub fn load_repo(&self, owner: &str, name: &str) -> ResourceStream<Repo> {
        as_stream(
            SingleRepo {
                key: RepoKey::new(owner, name),
                store: self.store.clone(),
                remote: self.remote.clone(),
            },
            self.capacity,
        )
    }

    /// Contributors of a repository, most contributions first.
    pub fn load_contributors(&self, owner: &str, name: &str) -> ResourceStream<Vec<Contributor>> {
        as_stream(
            Contributors {
                key: RepoKey::new(owner, name),
                store: self.store.clone(),
                remote: self.remote.clone(),
            },
            self.capacity,
        )
    }

    /// First page of results for `query`, in relevance order.
    ///
    /// Only fetched when nothing was persisted for the query yet; later
    /// pages come from [`RepoRepository::search_next_page`].
    pub fn search(&self, query: &str) -> ResourceStream<Vec<Repo>> {
        as_stream(
            Search {
                query: query.to_string(),
                store: self.store.clone(),
                remote: self.remote.clone(),
            },
            self.capacity,
        )
    }

    /// Append the next page of `query` to its persisted result.
    pub async fn search_next_page(&self, query: &str) -> Result<Resource<bool>> {
        merge_next_page(self.store.as_ref(), self.remote.as_ref(), query).await
    }
}

/// Users.
pub struct UserRepository {
    store: Arc<dyn LocalStore>,
    remote: Arc<dyn RemoteClient>,
    capacity: usize,
}

impl UserRepository {
    pub fn new(
        store: Arc<dyn LocalStore>,
        remote: Arc<dyn RemoteClient>,
        config: &SyncConfig,
    ) -> Self {
        Self {
            store,
            remote,
            capacity: config.channel_capacity,
        }
    }

    pub fn load_user(&self, login: &str) -> ResourceStream<User> {
        as_stream(
            SingleUser {
                login: login.to_string(),
                store: self.store.clone(),
                remote: self.remote.clone(),
            },
            self.capacity,
        )
    }
}

struct RepoList {
    owner: String,
    store: Arc<dyn LocalStore>,
    remote: Arc<dyn RemoteClient>,
    limiter: Arc<RateLimiter<String>>,
}

#[async_trait]
impl NetworkBoundResource for RepoList {
    type Value = Vec<Repo>;
    type Payload = Vec<Repo>;

    fn should_fetch(&self, cached: Option<&Vec<Repo>>) -> bool {
        match cached {
            None => true,
            Some(repos) if repos.is_empty() => true,
            Some(_) => self.limiter.should_fetch(self.owner.clone()),
        }
    }

    fn load_local(&self) -> Watch<Option<Vec<Repo>>> {
        self.store
            .watch_repos_by_owner(&self.owner)
            .map(|repos| repos.map(Some))
            .boxed()
    }

    async fn fetch_remote(&self) -> ApiResponse<Vec<Repo>> {
        self.remote.get_repos(&self.owner).await
    }

    async fn persist(&self, repos: Vec<Repo>, _next_page: Option<u32>) -> Result<()> {
        self.store.upsert_repos(repos).await
    }

    fn on_fetch_failed(&self) {
        self.limiter.reset(&self.owner);
    }
}

struct SingleRepo {
    key: RepoKey,
    store: Arc<dyn LocalStore>,
    remote: Arc<dyn RemoteClient>,
}

#[async_trait]
impl NetworkBoundResource for SingleRepo {
    type Value = Repo;
    type Payload = Repo;

    fn should_fetch(&self, cached: Option<&Repo>) -> bool {
        cached.is_none()
    }

    fn load_local(&self) -> Watch<Option<Repo>> {
        self.store.watch_repo(&self.key)
    }

    async fn fetch_remote(&self) -> ApiResponse<Repo> {
        self.remote.get_repo(&self.key.owner, &self.key.name).await
    }

    async fn persist(&self, repo: Repo, _next_page: Option<u32>) -> Result<()> {
        self.store.upsert_repo(repo).await
    }
}

struct Contributors {
    key: RepoKey,
    store: Arc<dyn LocalStore>,
    remote: Arc<dyn RemoteClient>,
}

#[async_trait]
impl NetworkBoundResource for Contributors {
    type Value = Vec<Contributor>;
    type Payload = Vec<Contributor>;

    fn should_fetch(&self, cached: Option<&Vec<Contributor>>) -> bool {
        cached.map_or(true, |contributors| contributors.is_empty())
    }

    fn load_local(&self) -> Watch<Option<Vec<Contributor>>> {
        self.store
            .watch_contributors(&self.key)
            .map(|contributors| contributors.map(Some))
            .boxed()
    }

    async fn fetch_remote(&self) -> ApiResponse<Vec<Contributor>> {
        self.remote
            .get_contributors(&self.key.owner, &self.key.name)
            .await
    }

    async fn persist(&self, mut contributors: Vec<Contributor>, _next_page: Option<u32>) -> Result<()> {
        for contributor in &mut contributors {
            contributor.repo_owner = self.key.owner.clone();
            contributor.repo_name = self.key.name.clone();
        }
        debug!("Persisting {} contributors of {}", contributors.len(), self.key);

        // The placeholder keeps contributors attached to a repository row
        // even when the repository itself was never fetched.
        let batch = WriteBatch::new()
            .create_repo_if_absent(Repo::placeholder(&self.key.owner, &self.key.name))
            .upsert_contributors(contributors);
        self.store.commit(batch).await
    }
}

struct SingleUser {
    login: String,
    store: Arc<dyn LocalStore>,
    remote: Arc<dyn RemoteClient>,
}

#[async_trait]
impl NetworkBoundResource for SingleUser {
    type Value = User;
    type Payload = User;

    fn should_fetch(&self, cached: Option<&User>) -> bool {
        cached.is_none()
    }

    fn load_local(&self) -> Watch<Option<User>> {
        self.store.watch_user(&self.login)
    }

    async fn fetch_remote(&self) -> ApiResponse<User> {
        self.remote.get_user(&self.login).await
    }

    async fn persist(&self, user: User, _next_page: Option<u32>) -> Result<()> {
        self.store.upsert_user(user).await
    }
}

struct Search {
    query: String,
    store: Arc<dyn LocalStore>,
    remote: Arc<dyn RemoteClient>,
}

#[async_trait]
impl NetworkBoundResource for Search {
    type Value = Vec<Repo>;
    type Payload = RepoSearchResponse;

    fn should_fetch(&self, cached: Option<&Vec<Repo>>) -> bool {
        cached.is_none()
    }

    fn load_local(&self) -> Watch<Option<Vec<Repo>>> {
        let store = self.store.clone();
        self.store
            .watch_search_result(&self.query)
            .then(move |result| {
                let store = store.clone();
                async move {
                    match result? {
                        Some(result) => store.load_by_ids(&result.repo_ids).await.map(Some),
                        None => Ok(None),
                    }
                }
            })
            .boxed()
    }

    async fn fetch_remote(&self) -> ApiResponse<RepoSearchResponse> {
        self.remote.search_repos(&self.query, None).await
    }

    async fn persist(&self, response: RepoSearchResponse, next_page: Option<u32>) -> Result<()> {
        let result = RepoSearchResult {
            query: self.query.clone(),
            repo_ids: response.repo_ids(),
            total_count: response.total,
            next_page,
        };
        debug!(
            "Persisting {} results for {:?}, next page {:?}",
            result.repo_ids.len(),
            self.query,
            next_page
        );

        let batch = WriteBatch::new()
            .upsert_repos(response.items)
            .put_search_result(result);
        self.store.commit(batch).await
    }
}
