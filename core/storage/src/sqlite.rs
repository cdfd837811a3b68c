//! SQLite-backed local store.
//!
//! Persists cached entities so they survive restarts and are available
//! offline. Blocking SQLite calls run on tokio's blocking pool.

use async_trait::async_trait;
use parking_lot::Mutex;
use rusqlite::types::Type;
use rusqlite::{params, params_from_iter, Connection, OptionalExtension, Row, Transaction};
use std::path::Path;
use std::sync::Arc;
use tracing::{debug, info};

use reposync_common::{
    Contributor, Error, Owner, Repo, RepoKey, RepoSearchResult, Result, User,
};

use crate::store::{order_by_ids, LocalStore, Table, Watch, WriteBatch, WriteOp};
use crate::tracker::InvalidationTracker;

const SCHEMA: &str = r#"
    CREATE TABLE IF NOT EXISTS repo (
        id INTEGER NOT NULL,
        name TEXT NOT NULL,
        full_name TEXT NOT NULL,
        description TEXT,
        owner_login TEXT NOT NULL,
        owner_url TEXT,
        stars INTEGER NOT NULL,
        PRIMARY KEY (name, owner_login)
    );

    CREATE INDEX IF NOT EXISTS idx_repo_id ON repo(id);

    CREATE TABLE IF NOT EXISTS contributor (
        repo_name TEXT NOT NULL,
        repo_owner TEXT NOT NULL,
        login TEXT NOT NULL,
        avatar_url TEXT,
        contributions INTEGER NOT NULL,
        PRIMARY KEY (repo_name, repo_owner, login)
    );

    CREATE TABLE IF NOT EXISTS github_user (
        login TEXT PRIMARY KEY,
        avatar_url TEXT,
        name TEXT,
        company TEXT,
        repos_url TEXT,
        blog TEXT
    );

    CREATE TABLE IF NOT EXISTS repo_search_result (
        query TEXT PRIMARY KEY,
        repo_ids TEXT NOT NULL,
        total_count INTEGER NOT NULL,
        next_page INTEGER
    );
"#;

const REPO_COLUMNS: &str = "id, name, full_name, description, owner_login, owner_url, stars";

/// SQLite local store.
///
/// Cloning yields another handle to the same connection.
#[derive(Clone)]
pub struct SqliteStore {
    conn: Arc<Mutex<Connection>>,
    tracker: InvalidationTracker,
}

impl SqliteStore {
    /// Create or open a store database.
    ///
    /// Missing parent directories are created.
    ///
    /// # Errors
    /// - Parent directory creation failure
    /// - Database creation or schema setup failure
    pub fn open(db_path: impl AsRef<Path>) -> Result<Self> {
        if let Some(parent) = db_path.as_ref().parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)?;
            }
        }
        let conn = Connection::open(db_path.as_ref()).map_err(storage_error)?;
        let store = Self::with_connection(conn)?;
        info!("SQLite store opened at {}", db_path.as_ref().display());
        Ok(store)
    }

    /// Create an in-memory database (for testing).
    pub fn in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory().map_err(storage_error)?;
        Self::with_connection(conn)
    }

    fn with_connection(conn: Connection) -> Result<Self> {
        conn.execute_batch(SCHEMA).map_err(storage_error)?;
        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
            tracker: InvalidationTracker::new(),
        })
    }

    /// Run `f` against the connection on the blocking pool.
    async fn with_conn<T, F>(&self, f: F) -> Result<T>
    where
        T: Send + 'static,
        F: FnOnce(&mut Connection) -> rusqlite::Result<T> + Send + 'static,
    {
        run_blocking(self.conn.clone(), f).await
    }

    fn observe<T, F>(&self, tables: &[Table], read: F) -> Watch<T>
    where
        T: Send + 'static,
        F: Fn(&Connection) -> rusqlite::Result<T> + Send + Sync + 'static,
    {
        let conn = self.conn.clone();
        let read = Arc::new(read);
        self.tracker.observe(tables, move || {
            let conn = conn.clone();
            let read = read.clone();
            async move { run_blocking(conn, move |conn| read(conn)).await }
        })
    }
}

async fn run_blocking<T, F>(conn: Arc<Mutex<Connection>>, f: F) -> Result<T>
where
    T: Send + 'static,
    F: FnOnce(&mut Connection) -> rusqlite::Result<T> + Send + 'static,
{
    tokio::task::spawn_blocking(move || {
        let mut conn = conn.lock();
        f(&mut conn)
    })
    .await
    .map_err(|e| Error::Storage(format!("Store task failed: {}", e)))?
    .map_err(storage_error)
}

fn storage_error(err: rusqlite::Error) -> Error {
    match err {
        rusqlite::Error::FromSqlConversionFailure(_, _, e)
        | rusqlite::Error::ToSqlConversionFailure(e) => Error::Serialization(e.to_string()),
        e => Error::Storage(e.to_string()),
    }
}

fn repo_from_row(row: &Row<'_>) -> rusqlite::Result<Repo> {
    Ok(Repo {
        id: row.get(0)?,
        name: row.get(1)?,
        full_name: row.get(2)?,
        description: row.get(3)?,
        owner: Owner {
            login: row.get(4)?,
            url: row.get(5)?,
        },
        stars: row.get(6)?,
    })
}

fn contributor_from_row(row: &Row<'_>) -> rusqlite::Result<Contributor> {
    Ok(Contributor {
        repo_name: row.get(0)?,
        repo_owner: row.get(1)?,
        login: row.get(2)?,
        avatar_url: row.get(3)?,
        contributions: row.get(4)?,
    })
}

fn user_from_row(row: &Row<'_>) -> rusqlite::Result<User> {
    Ok(User {
        login: row.get(0)?,
        avatar_url: row.get(1)?,
        name: row.get(2)?,
        company: row.get(3)?,
        repos_url: row.get(4)?,
        blog: row.get(5)?,
    })
}

fn search_result_from_row(row: &Row<'_>) -> rusqlite::Result<RepoSearchResult> {
    let ids: String = row.get(1)?;
    let repo_ids = serde_json::from_str(&ids)
        .map_err(|e| rusqlite::Error::FromSqlConversionFailure(1, Type::Text, Box::new(e)))?;
    Ok(RepoSearchResult {
        query: row.get(0)?,
        repo_ids,
        total_count: row.get(2)?,
        next_page: row.get(3)?,
    })
}

fn select_search_result(conn: &Connection, query: &str) -> rusqlite::Result<Option<RepoSearchResult>> {
    conn.query_row(
        "SELECT query, repo_ids, total_count, next_page FROM repo_search_result WHERE query = ?1",
        [query],
        search_result_from_row,
    )
    .optional()
}

fn insert_repo(tx: &Transaction<'_>, verb: &str, repo: &Repo) -> rusqlite::Result<()> {
    tx.execute(
        &format!(
            "{} INTO repo ({}) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
            verb, REPO_COLUMNS
        ),
        params![
            repo.id,
            repo.name,
            repo.full_name,
            repo.description,
            repo.owner.login,
            repo.owner.url,
            repo.stars,
        ],
    )?;
    Ok(())
}

fn apply(tx: &Transaction<'_>, op: &WriteOp) -> rusqlite::Result<()> {
    match op {
        WriteOp::UpsertRepos(repos) => {
            for repo in repos {
                insert_repo(tx, "INSERT OR REPLACE", repo)?;
            }
        }
        WriteOp::CreateRepoIfAbsent(repo) => {
            insert_repo(tx, "INSERT OR IGNORE", repo)?;
        }
        WriteOp::UpsertContributors(contributors) => {
            for c in contributors {
                tx.execute(
                    r#"
                    INSERT OR REPLACE INTO contributor
                    (repo_name, repo_owner, login, avatar_url, contributions)
                    VALUES (?1, ?2, ?3, ?4, ?5)
                    "#,
                    params![c.repo_name, c.repo_owner, c.login, c.avatar_url, c.contributions],
                )?;
            }
        }
        WriteOp::UpsertUser(user) => {
            tx.execute(
                r#"
                INSERT OR REPLACE INTO github_user
                (login, avatar_url, name, company, repos_url, blog)
                VALUES (?1, ?2, ?3, ?4, ?5, ?6)
                "#,
                params![
                    user.login,
                    user.avatar_url,
                    user.name,
                    user.company,
                    user.repos_url,
                    user.blog,
                ],
            )?;
        }
        WriteOp::PutSearchResult(result) => {
            let ids = serde_json::to_string(&result.repo_ids)
                .map_err(|e| rusqlite::Error::ToSqlConversionFailure(Box::new(e)))?;
            tx.execute(
                r#"
                INSERT OR REPLACE INTO repo_search_result
                (query, repo_ids, total_count, next_page)
                VALUES (?1, ?2, ?3, ?4)
                "#,
                params![result.query, ids, result.total_count, result.next_page],
            )?;
        }
    }
    Ok(())
}

#[async_trait]
impl LocalStore for SqliteStore {
    fn name(&self) -> &str {
        "sqlite"
    }

    fn watch_repo(&self, key: &RepoKey) -> Watch<Option<Repo>> {
        let key = key.clone();
        self.observe(&[Table::Repo], move |conn| {
            conn.query_row(
                &format!(
                    "SELECT {} FROM repo WHERE owner_login = ?1 AND name = ?2",
                    REPO_COLUMNS
                ),
                params![key.owner, key.name],
                repo_from_row,
            )
            .optional()
        })
    }

    fn watch_repos_by_owner(&self, owner: &str) -> Watch<Vec<Repo>> {
        let owner = owner.to_string();
        self.observe(&[Table::Repo], move |conn| {
            let mut stmt = conn.prepare(&format!(
                "SELECT {} FROM repo WHERE owner_login = ?1 ORDER BY stars DESC, name ASC",
                REPO_COLUMNS
            ))?;
            let repos = stmt.query_map([&owner], repo_from_row)?;
            repos.collect()
        })
    }

    fn watch_contributors(&self, key: &RepoKey) -> Watch<Vec<Contributor>> {
        let key = key.clone();
        self.observe(&[Table::Contributor], move |conn| {
            let mut stmt = conn.prepare(
                r#"
                SELECT repo_name, repo_owner, login, avatar_url, contributions
                FROM contributor
                WHERE repo_name = ?1 AND repo_owner = ?2
                ORDER BY contributions DESC, login ASC
                "#,
            )?;
            let contributors = stmt.query_map(params![key.name, key.owner], contributor_from_row)?;
            contributors.collect()
        })
    }

    fn watch_user(&self, login: &str) -> Watch<Option<User>> {
        let login = login.to_string();
        self.observe(&[Table::User], move |conn| {
            conn.query_row(
                r#"
                SELECT login, avatar_url, name, company, repos_url, blog
                FROM github_user WHERE login = ?1
                "#,
                [&login],
                user_from_row,
            )
            .optional()
        })
    }

    fn watch_search_result(&self, query: &str) -> Watch<Option<RepoSearchResult>> {
        let query = query.to_string();
        self.observe(&[Table::SearchResult], move |conn| {
            select_search_result(conn, &query)
        })
    }

    async fn find_search_result(&self, query: &str) -> Result<Option<RepoSearchResult>> {
        let query = query.to_string();
        self.with_conn(move |conn| select_search_result(conn, &query))
            .await
    }

    async fn load_by_ids(&self, ids: &[i64]) -> Result<Vec<Repo>> {
        if ids.is_empty() {
            return Ok(Vec::new());
        }

        let requested = ids.to_vec();
        let repos = self
            .with_conn(move |conn| {
                let placeholders = vec!["?"; requested.len()].join(", ");
                let mut stmt = conn.prepare(&format!(
                    "SELECT {} FROM repo WHERE id IN ({})",
                    REPO_COLUMNS, placeholders
                ))?;
                let rows = stmt.query_map(params_from_iter(requested.iter()), repo_from_row)?;
                rows.collect::<rusqlite::Result<Vec<Repo>>>()
            })
            .await?;

        Ok(order_by_ids(ids, repos))
    }

    async fn commit(&self, batch: WriteBatch) -> Result<()> {
        if batch.is_empty() {
            return Ok(());
        }

        let tables = batch.tables();
        let ops = batch.into_ops();
        let count = ops.len();

        // Invalidate on the blocking thread: the write lands even if the
        // caller stops waiting for it, and watchers must still hear of it.
        let tracker = self.tracker.clone();
        let touched = tables.clone();
        self.with_conn(move |conn| {
            let tx = conn.transaction()?;
            for op in &ops {
                apply(&tx, op)?;
            }
            tx.commit()?;
            tracker.invalidate(&touched);
            Ok(())
        })
        .await?;

        debug!("Committed {} writes touching {:?}", count, tables);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use futures::StreamExt;
    use tempfile::TempDir;

    fn repo(id: i64, owner: &str, name: &str, stars: i64) -> Repo {
        Repo {
            id,
            name: name.to_string(),
            full_name: format!("{}/{}", owner, name),
            description: Some("desc".to_string()),
            owner: Owner {
                login: owner.to_string(),
                url: None,
            },
            stars,
        }
    }

    #[tokio::test]
    async fn test_watch_repo_emits_on_commit() {
        let store = SqliteStore::in_memory().unwrap();
        let key = RepoKey::new("foo", "bar");
        let mut watch = store.watch_repo(&key);

        assert_eq!(watch.next().await.unwrap().unwrap(), None);

        let stored = repo(1, "foo", "bar", 3);
        store.upsert_repo(stored.clone()).await.unwrap();
        assert_eq!(watch.next().await.unwrap().unwrap(), Some(stored));
    }

    #[tokio::test]
    async fn test_load_by_ids_preserves_requested_order() {
        let store = SqliteStore::in_memory().unwrap();
        store
            .upsert_repos(vec![
                repo(3, "o", "three", 0),
                repo(8, "o", "eight", 0),
                repo(5, "o", "five", 0),
            ])
            .await
            .unwrap();

        let ids: Vec<i64> = store
            .load_by_ids(&[5, 3, 8])
            .await
            .unwrap()
            .iter()
            .map(|r| r.id)
            .collect();
        assert_eq!(ids, vec![5, 3, 8]);
        assert!(store.load_by_ids(&[]).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_search_result_round_trip() {
        let store = SqliteStore::in_memory().unwrap();
        let result = RepoSearchResult {
            query: "rust".to_string(),
            repo_ids: vec![4, 1, 9],
            total_count: 120,
            next_page: Some(2),
        };

        store
            .commit(WriteBatch::new().put_search_result(result.clone()))
            .await
            .unwrap();

        assert_eq!(store.find_search_result("rust").await.unwrap(), Some(result));
        assert_eq!(store.find_search_result("go").await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_failed_batch_is_rolled_back() {
        let store = SqliteStore::in_memory().unwrap();
        store
            .conn
            .lock()
            .execute_batch("CREATE TRIGGER no_users BEFORE INSERT ON github_user BEGIN SELECT RAISE(ABORT, 'nope'); END;")
            .unwrap();

        let batch = WriteBatch::new()
            .upsert_repo(repo(1, "foo", "bar", 0))
            .upsert_user(User {
                login: "foo".to_string(),
                avatar_url: None,
                name: None,
                company: None,
                repos_url: None,
                blog: None,
            });

        assert!(matches!(store.commit(batch).await, Err(Error::Storage(_))));
        assert!(store.load_by_ids(&[1]).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_contributors_and_placeholder() {
        let store = SqliteStore::in_memory().unwrap();
        let contributor = Contributor {
            login: "octocat".to_string(),
            contributions: 12,
            avatar_url: None,
            repo_owner: "foo".to_string(),
            repo_name: "bar".to_string(),
        };

        store
            .commit(
                WriteBatch::new()
                    .create_repo_if_absent(Repo::placeholder("foo", "bar"))
                    .upsert_contributors(vec![contributor.clone()]),
            )
            .await
            .unwrap();

        let key = RepoKey::new("foo", "bar");
        let mut contributors = store.watch_contributors(&key);
        assert_eq!(contributors.next().await.unwrap().unwrap(), vec![contributor]);

        let mut repo_watch = store.watch_repo(&key);
        let placeholder = repo_watch.next().await.unwrap().unwrap().unwrap();
        assert_eq!(placeholder.full_name, "foo/bar");
    }

    #[tokio::test]
    async fn test_persists_across_reopen() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("cache.db");

        {
            let store = SqliteStore::open(&path).unwrap();
            store.upsert_repo(repo(1, "foo", "bar", 5)).await.unwrap();
        }

        let store = SqliteStore::open(&path).unwrap();
        let mut watch = store.watch_repos_by_owner("foo");
        assert_eq!(watch.next().await.unwrap().unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_open_creates_parent_directories() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("nested").join("cache.db");
        SqliteStore::open(&path).unwrap();
        assert!(path.exists());
    }

    #[test]
    fn test_open_under_file_is_io_error() {
        let dir = TempDir::new().unwrap();
        let file = dir.path().join("plain");
        std::fs::write(&file, "x").unwrap();
        let result = SqliteStore::open(file.join("cache.db"));
        assert!(matches!(result, Err(Error::Io(_))));
    }

    #[tokio::test]
    async fn test_corrupt_search_ids_are_serialization_error() {
        let store = SqliteStore::in_memory().unwrap();
        store
            .conn
            .lock()
            .execute(
                "INSERT INTO repo_search_result (query, repo_ids, total_count, next_page) \
                 VALUES ('q', 'not json', 0, NULL)",
                [],
            )
            .unwrap();

        let result = store.find_search_result("q").await;
        assert!(matches!(result, Err(Error::Serialization(_))));
    }
}
