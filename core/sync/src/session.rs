//! Consumer-side controllers that own the observed key.
//!
//! A session lives as long as its consumer: it is created when the
//! consumer starts observing and dropping it cancels every upstream and
//! next-page job it started.

use futures::stream::{self, BoxStream};
use futures::StreamExt;
use std::sync::Arc;
use tokio::sync::watch;
use tracing::debug;

use reposync_common::{Contributor, Repo, RepoKey, Resource, Result, User};

use crate::next_page::{LoadMoreState, NextPageCoordinator};
use crate::repository::{RepoRepository, UserRepository};
use crate::switcher::{ConflatedReceiver, KeyedSwitcher};

fn single<T: Send + 'static>(resource: Resource<T>) -> BoxStream<'static, Result<Resource<T>>> {
    stream::once(async move { Ok(resource) }).boxed()
}

/// Search results for a query typed by the user, with paging.
pub struct SearchSession {
    results: KeyedSwitcher<String, Resource<Vec<Repo>>>,
    next_page: NextPageCoordinator,
}

impl SearchSession {
    pub fn new(repository: Arc<RepoRepository>) -> (Self, ConflatedReceiver<Resource<Vec<Repo>>>) {
        let next_page = NextPageCoordinator::new(repository.clone());
        let (results, receiver) = KeyedSwitcher::new(move |query: &String| {
            if query.is_empty() {
                single(Resource::success(Some(Vec::new())))
            } else {
                repository.search(query).boxed()
            }
        });
        (Self { results, next_page }, receiver)
    }

    /// Observe results for `input`, lower-cased and trimmed.
    ///
    /// An unchanged query is ignored. A blank query yields an empty list.
    pub fn set_query(&self, input: &str) {
        let query = input.trim().to_lowercase();
        if self.results.set_key(query.clone()) {
            debug!("Search query changed to {:?}", query);
            self.next_page.reset();
        }
    }

    pub fn query(&self) -> Option<String> {
        self.results.key()
    }

    /// Load the page after the current results.
    pub fn load_next_page(&self) {
        if let Some(query) = self.results.key() {
            if !query.is_empty() {
                self.next_page.query_next_page(&query);
            }
        }
    }

    /// Observe the current query again from scratch.
    pub fn refresh(&self) {
        self.results.retry();
    }

    pub fn load_more_state(&self) -> watch::Receiver<LoadMoreState> {
        self.next_page.subscribe()
    }

    /// Read and clear the last next-page failure.
    pub fn take_load_more_error(&self) -> Option<String> {
        self.next_page.take_error()
    }
}

/// Streams opened by a [`RepoSession`].
pub struct RepoFeeds {
    pub repo: ConflatedReceiver<Resource<Repo>>,
    pub contributors: ConflatedReceiver<Resource<Vec<Contributor>>>,
}

/// One repository and its contributors.
pub struct RepoSession {
    repo: KeyedSwitcher<RepoKey, Resource<Repo>>,
    contributors: KeyedSwitcher<RepoKey, Resource<Vec<Contributor>>>,
}

impl RepoSession {
    pub fn new(repository: Arc<RepoRepository>) -> (Self, RepoFeeds) {
        let repos = repository.clone();
        let (repo, repo_rx) = KeyedSwitcher::new(move |key: &RepoKey| match key.if_exists() {
            Some(key) => repos.load_repo(&key.owner, &key.name).boxed(),
            None => single(Resource::none()),
        });
        let (contributors, contributors_rx) =
            KeyedSwitcher::new(move |key: &RepoKey| match key.if_exists() {
                Some(key) => repository.load_contributors(&key.owner, &key.name).boxed(),
                None => single(Resource::none()),
            });

        let feeds = RepoFeeds {
            repo: repo_rx,
            contributors: contributors_rx,
        };
        (Self { repo, contributors }, feeds)
    }

    /// Observe `owner/name`. A blank part yields a single `None` state.
    pub fn set_id(&self, owner: &str, name: &str) {
        let key = RepoKey::new(owner, name);
        self.repo.set_key(key.clone());
        self.contributors.set_key(key);
    }

    pub fn retry(&self) {
        self.repo.retry();
        self.contributors.retry();
    }
}

/// Streams opened by a [`UserSession`].
pub struct UserFeeds {
    pub user: ConflatedReceiver<Resource<User>>,
    pub repos: ConflatedReceiver<Resource<Vec<Repo>>>,
}

/// One user and the repositories they own.
pub struct UserSession {
    user: KeyedSwitcher<String, Resource<User>>,
    repos: KeyedSwitcher<String, Resource<Vec<Repo>>>,
}

impl UserSession {
    pub fn new(users: Arc<UserRepository>, repositories: Arc<RepoRepository>) -> (Self, UserFeeds) {
        let (user, user_rx) = KeyedSwitcher::new(move |login: &String| {
            if login.trim().is_empty() {
                single(Resource::none())
            } else {
                users.load_user(login).boxed()
            }
        });
        let (repos, repos_rx) = KeyedSwitcher::new(move |login: &String| {
            if login.trim().is_empty() {
                single(Resource::none())
            } else {
                repositories.load_repos(login).boxed()
            }
        });

        let feeds = UserFeeds {
            user: user_rx,
            repos: repos_rx,
        };
        (Self { user, repos }, feeds)
    }

    pub fn set_login(&self, login: &str) {
        self.user.set_key(login.to_string());
        self.repos.set_key(login.to_string());
    }

    pub fn retry(&self) {
        self.user.retry();
        self.repos.retry();
    }
}
