//! In-memory local store.

use async_trait::async_trait;
use parking_lot::RwLock;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tracing::debug;

use reposync_common::{Contributor, Error, Repo, RepoKey, RepoSearchResult, Result, User};

use crate::store::{order_by_ids, LocalStore, Table, Watch, WriteBatch, WriteOp};
use crate::tracker::InvalidationTracker;

#[derive(Debug, Default)]
struct Tables {
    repos: HashMap<RepoKey, Repo>,
    /// Keyed by (repo owner, repo name, login).
    contributors: HashMap<(String, String, String), Contributor>,
    users: HashMap<String, User>,
    search_results: HashMap<String, RepoSearchResult>,
}

impl Tables {
    fn apply(&mut self, op: WriteOp) {
        match op {
            WriteOp::UpsertRepos(repos) => {
                for repo in repos {
                    self.repos.insert(repo.key(), repo);
                }
            }
            WriteOp::CreateRepoIfAbsent(repo) => {
                self.repos.entry(repo.key()).or_insert(repo);
            }
            WriteOp::UpsertContributors(contributors) => {
                for contributor in contributors {
                    let key = (
                        contributor.repo_owner.clone(),
                        contributor.repo_name.clone(),
                        contributor.login.clone(),
                    );
                    self.contributors.insert(key, contributor);
                }
            }
            WriteOp::UpsertUser(user) => {
                self.users.insert(user.login.clone(), user);
            }
            WriteOp::PutSearchResult(result) => {
                self.search_results.insert(result.query.clone(), result);
            }
        }
    }
}

/// In-memory local store.
///
/// Useful for testing and for running without a database file. All data
/// is lost on drop. Cloning yields another handle to the same tables.
#[derive(Debug, Clone, Default)]
pub struct MemoryStore {
    tables: Arc<RwLock<Tables>>,
    tracker: InvalidationTracker,
    reject_commits: Arc<AtomicBool>,
}

impl MemoryStore {
    /// Create a new empty store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Make every subsequent commit fail with a storage error.
    ///
    /// Lets tests exercise local store failure paths.
    pub fn reject_commits(&self, reject: bool) {
        self.reject_commits.store(reject, Ordering::SeqCst);
    }

    fn observe<T, F>(&self, tables: &[Table], read: F) -> Watch<T>
    where
        T: Send + 'static,
        F: Fn(&Tables) -> T + Send + Sync + 'static,
    {
        let store = self.tables.clone();
        let read = Arc::new(read);
        self.tracker.observe(tables, move || {
            let store = store.clone();
            let read = read.clone();
            async move {
                let tables = store.read();
                let value = read(&*tables);
                drop(tables);
                Ok(value)
            }
        })
    }
}

#[async_trait]
impl LocalStore for MemoryStore {
    fn name(&self) -> &str {
        "memory"
    }

    fn watch_repo(&self, key: &RepoKey) -> Watch<Option<Repo>> {
        let key = key.clone();
        self.observe(&[Table::Repo], move |tables| tables.repos.get(&key).cloned())
    }

    fn watch_repos_by_owner(&self, owner: &str) -> Watch<Vec<Repo>> {
        let owner = owner.to_string();
        self.observe(&[Table::Repo], move |tables| {
            let mut repos: Vec<Repo> = tables
                .repos
                .values()
                .filter(|repo| repo.owner.login == owner)
                .cloned()
                .collect();
            repos.sort_by(|a, b| b.stars.cmp(&a.stars).then_with(|| a.name.cmp(&b.name)));
            repos
        })
    }

    fn watch_contributors(&self, key: &RepoKey) -> Watch<Vec<Contributor>> {
        let key = key.clone();
        self.observe(&[Table::Contributor], move |tables| {
            let mut contributors: Vec<Contributor> = tables
                .contributors
                .values()
                .filter(|c| c.repo_owner == key.owner && c.repo_name == key.name)
                .cloned()
                .collect();
            contributors.sort_by(|a, b| {
                b.contributions
                    .cmp(&a.contributions)
                    .then_with(|| a.login.cmp(&b.login))
            });
            contributors
        })
    }

    fn watch_user(&self, login: &str) -> Watch<Option<User>> {
        let login = login.to_string();
        self.observe(&[Table::User], move |tables| tables.users.get(&login).cloned())
    }

    fn watch_search_result(&self, query: &str) -> Watch<Option<RepoSearchResult>> {
        let query = query.to_string();
        self.observe(&[Table::SearchResult], move |tables| {
            tables.search_results.get(&query).cloned()
        })
    }

    async fn find_search_result(&self, query: &str) -> Result<Option<RepoSearchResult>> {
        Ok(self.tables.read().search_results.get(query).cloned())
    }

    async fn load_by_ids(&self, ids: &[i64]) -> Result<Vec<Repo>> {
        let repos: Vec<Repo> = {
            let tables = self.tables.read();
            tables
                .repos
                .values()
                .filter(|repo| ids.contains(&repo.id))
                .cloned()
                .collect()
        };
        Ok(order_by_ids(ids, repos))
    }

    async fn commit(&self, batch: WriteBatch) -> Result<()> {
        if self.reject_commits.load(Ordering::SeqCst) {
            return Err(Error::Storage("commit rejected".to_string()));
        }

        let tables = batch.tables();
        let count = batch.ops().len();
        {
            let mut store = self.tables.write();
            for op in batch.into_ops() {
                store.apply(op);
            }
        }
        self.tracker.invalidate(&tables);

        debug!("Committed {} writes touching {:?}", count, tables);
        Ok(())
    }
}
