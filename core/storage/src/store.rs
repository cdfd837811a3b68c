//! Local store trait definition.

use async_trait::async_trait;
use futures::Stream;
use std::collections::HashMap;
use std::pin::Pin;

use reposync_common::{Contributor, Repo, RepoKey, RepoSearchResult, Result, User};

/// Reactive read: yields the current value, then a fresh value after every
/// commit that touches the underlying table.
pub type Watch<T> = Pin<Box<dyn Stream<Item = Result<T>> + Send>>;

/// Tables a commit can touch.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Table {
    Repo,
    Contributor,
    User,
    SearchResult,
}

impl Table {
    pub(crate) const COUNT: usize = 4;

    pub(crate) fn index(self) -> usize {
        match self {
            Table::Repo => 0,
            Table::Contributor => 1,
            Table::User => 2,
            Table::SearchResult => 3,
        }
    }
}

/// A single write inside a batch.
#[derive(Debug, Clone, PartialEq)]
pub enum WriteOp {
    /// Insert or replace repositories (keyed by owner + name).
    UpsertRepos(Vec<Repo>),
    /// Insert a repository only if no row with its key exists.
    CreateRepoIfAbsent(Repo),
    /// Insert or replace contributors.
    UpsertContributors(Vec<Contributor>),
    /// Insert or replace a user.
    UpsertUser(User),
    /// Replace the search result row for its query.
    PutSearchResult(RepoSearchResult),
}

impl WriteOp {
    fn table(&self) -> Table {
        match self {
            WriteOp::UpsertRepos(_) | WriteOp::CreateRepoIfAbsent(_) => Table::Repo,
            WriteOp::UpsertContributors(_) => Table::Contributor,
            WriteOp::UpsertUser(_) => Table::User,
            WriteOp::PutSearchResult(_) => Table::SearchResult,
        }
    }
}

/// A group of writes committed atomically.
///
/// No reader observes a state where only part of the batch is applied.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct WriteBatch {
    ops: Vec<WriteOp>,
}

impl WriteBatch {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn upsert_repo(self, repo: Repo) -> Self {
        self.upsert_repos(vec![repo])
    }

    pub fn upsert_repos(mut self, repos: Vec<Repo>) -> Self {
        self.ops.push(WriteOp::UpsertRepos(repos));
        self
    }

    pub fn create_repo_if_absent(mut self, repo: Repo) -> Self {
        self.ops.push(WriteOp::CreateRepoIfAbsent(repo));
        self
    }

    pub fn upsert_contributors(mut self, contributors: Vec<Contributor>) -> Self {
        self.ops.push(WriteOp::UpsertContributors(contributors));
        self
    }

    pub fn upsert_user(mut self, user: User) -> Self {
        self.ops.push(WriteOp::UpsertUser(user));
        self
    }

    pub fn put_search_result(mut self, result: RepoSearchResult) -> Self {
        self.ops.push(WriteOp::PutSearchResult(result));
        self
    }

    pub fn ops(&self) -> &[WriteOp] {
        &self.ops
    }

    pub fn into_ops(self) -> Vec<WriteOp> {
        self.ops
    }

    pub fn is_empty(&self) -> bool {
        self.ops.is_empty()
    }

    /// Distinct tables touched by this batch.
    pub fn tables(&self) -> Vec<Table> {
        let mut tables = Vec::new();
        for op in &self.ops {
            let table = op.table();
            if !tables.contains(&table) {
                tables.push(table);
            }
        }
        tables
    }
}

/// Local persistent cache of entities and search results.
///
/// The schema behind an implementation is its own business; callers only
/// rely on the reactive reads, the point lookups and atomic batch commits.
#[async_trait]
pub trait LocalStore: Send + Sync {
    /// Store name (e.g., "memory", "sqlite").
    fn name(&self) -> &str;

    /// Watch one repository by natural key.
    fn watch_repo(&self, key: &RepoKey) -> Watch<Option<Repo>>;

    /// Watch all repositories of an owner, most starred first.
    fn watch_repos_by_owner(&self, owner: &str) -> Watch<Vec<Repo>>;

    /// Watch the contributors of a repository, most contributions first.
    fn watch_contributors(&self, key: &RepoKey) -> Watch<Vec<Contributor>>;

    /// Watch one user by login.
    fn watch_user(&self, login: &str) -> Watch<Option<User>>;

    /// Watch the persisted search result of a query.
    fn watch_search_result(&self, query: &str) -> Watch<Option<RepoSearchResult>>;

    /// Non-reactive lookup of the persisted search result of a query.
    async fn find_search_result(&self, query: &str) -> Result<Option<RepoSearchResult>>;

    /// Load repositories by id, in exactly the order of `ids`.
    ///
    /// Ids without a row are skipped.
    async fn load_by_ids(&self, ids: &[i64]) -> Result<Vec<Repo>>;

    /// Apply every write of the batch atomically.
    async fn commit(&self, batch: WriteBatch) -> Result<()>;

    async fn upsert_repo(&self, repo: Repo) -> Result<()> {
        self.commit(WriteBatch::new().upsert_repo(repo)).await
    }

    async fn upsert_repos(&self, repos: Vec<Repo>) -> Result<()> {
        self.commit(WriteBatch::new().upsert_repos(repos)).await
    }

    async fn upsert_user(&self, user: User) -> Result<()> {
        self.commit(WriteBatch::new().upsert_user(user)).await
    }
}

/// Sort rows into the order their ids appear in `ids`.
///
/// Storage engines do not preserve argument order for `IN` lookups.
pub(crate) fn order_by_ids(ids: &[i64], mut repos: Vec<Repo>) -> Vec<Repo> {
    // Reversed so the first position of a repeated id wins.
    let position: HashMap<i64, usize> = ids
        .iter()
        .enumerate()
        .rev()
        .map(|(index, id)| (*id, index))
        .collect();

    repos.retain(|repo| position.contains_key(&repo.id));
    repos.sort_by_key(|repo| position[&repo.id]);
    repos
}
