//! Reposync CLI - Command line driver for the sync core.
//!
//! This tool wires a local store and the GitHub client to the entity
//! repositories and prints the settled resource states as JSON.

mod config;

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use futures::{Stream, StreamExt};
use serde::Serialize;
use std::path::PathBuf;
use std::sync::Arc;
use tracing::{debug, info, warn, Level};
use tracing_subscriber::{EnvFilter, FmtSubscriber};

use reposync_common::{Resource, Status};
use reposync_remote::HttpClient;
use reposync_storage::open_store;
use reposync_sync::{RepoRepository, UserRepository};

use crate::config::Config;

#[derive(Parser)]
#[command(name = "reposync")]
#[command(about = "Reposync - Offline-first GitHub cache")]
#[command(version)]
struct Cli {
    /// Enable verbose logging.
    #[arg(short, long)]
    verbose: bool,

    /// JSON configuration file.
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// SQLite cache file (default: in-memory).
    #[arg(long)]
    db: Option<PathBuf>,

    /// API base URL.
    #[arg(long)]
    base_url: Option<String>,

    /// Personal access token.
    #[arg(long)]
    token: Option<String>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Show a user and the repositories they own.
    User {
        /// User login.
        login: String,
    },

    /// List the repositories of an owner.
    Repos {
        /// Owner login.
        owner: String,
    },

    /// Show a repository and its contributors.
    Repo {
        /// Owner login.
        owner: String,
        /// Repository name.
        name: String,
    },

    /// List the contributors of a repository.
    Contributors {
        /// Owner login.
        owner: String,
        /// Repository name.
        name: String,
    },

    /// Search repositories.
    Search {
        /// Search query.
        query: String,

        /// Number of result pages to load.
        #[arg(short, long, default_value_t = 1)]
        pages: u32,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // Setup logging
    let level = if cli.verbose {
        Level::DEBUG
    } else {
        Level::INFO
    };
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(level.as_str().to_lowercase()));

    let subscriber = FmtSubscriber::builder()
        .with_env_filter(filter)
        .with_target(false)
        .with_writer(std::io::stderr)
        .compact()
        .finish();
    tracing::subscriber::set_global_default(subscriber)?;

    let config = Config::load(cli.config.as_deref())?.with_overrides(
        cli.db,
        cli.base_url,
        cli.token,
    );
    let app = App::new(&config)?;

    match cli.command {
        Commands::User { login } => app.cmd_user(&login).await,
        Commands::Repos { owner } => app.cmd_repos(&owner).await,
        Commands::Repo { owner, name } => app.cmd_repo(&owner, &name).await,
        Commands::Contributors { owner, name } => app.cmd_contributors(&owner, &name).await,
        Commands::Search { query, pages } => app.cmd_search(&query, pages).await,
    }
}

struct App {
    repos: RepoRepository,
    users: UserRepository,
}

impl App {
    fn new(config: &Config) -> Result<Self> {
        let store = open_store(&config.store).context("Failed to open local store")?;
        let remote = Arc::new(HttpClient::new(&config.client).context("Failed to create client")?);
        info!("Using {} store against {}", store.name(), config.client.base_url);

        Ok(Self {
            repos: RepoRepository::new(store.clone(), remote.clone(), &config.sync),
            users: UserRepository::new(store, remote, &config.sync),
        })
    }

    async fn cmd_user(&self, login: &str) -> Result<()> {
        let user = settle(self.users.load_user(login)).await?;
        print_json(&user)?;
        let repos = settle(self.repos.load_repos(login)).await?;
        print_json(&repos)
    }

    async fn cmd_repos(&self, owner: &str) -> Result<()> {
        let repos = settle(self.repos.load_repos(owner)).await?;
        print_json(&repos)
    }

    async fn cmd_repo(&self, owner: &str, name: &str) -> Result<()> {
        let repo = settle(self.repos.load_repo(owner, name)).await?;
        print_json(&repo)?;
        self.cmd_contributors(owner, name).await
    }

    async fn cmd_contributors(&self, owner: &str, name: &str) -> Result<()> {
        let contributors = settle(self.repos.load_contributors(owner, name)).await?;
        print_json(&contributors)
    }

    async fn cmd_search(&self, query: &str, pages: u32) -> Result<()> {
        let query = query.trim().to_lowercase();
        if query.is_empty() {
            bail!("Search query cannot be empty");
        }

        let first = settle(self.repos.search(&query)).await?;
        if first.status == Status::Error {
            return print_json(&first);
        }

        for page in 2..=pages {
            let merged = self
                .repos
                .search_next_page(&query)
                .await
                .context("Failed to store next page")?;
            match merged.status {
                Status::Success if merged.data == Some(true) => continue,
                Status::Success | Status::None => {
                    info!("No results after page {}", page - 1);
                    break;
                }
                Status::Error => {
                    warn!(
                        "Failed to load page {}: {}",
                        page,
                        merged.message.unwrap_or_default()
                    );
                    break;
                }
                Status::Loading => {}
            }
        }

        let results = settle(self.repos.search(&query)).await?;
        print_json(&results)
    }
}

/// Wait for the first state that is not `Loading`.
async fn settle<T, S>(mut stream: S) -> Result<Resource<T>>
where
    S: Stream<Item = reposync_common::Result<Resource<T>>> + Unpin,
{
    while let Some(state) = stream.next().await {
        let state = state.context("Local store failed")?;
        if state.status == Status::Loading {
            debug!("Loading...");
            continue;
        }
        return Ok(state);
    }
    bail!("Resource stream ended without a result")
}

fn print_json<T: Serialize>(value: &T) -> Result<()> {
    let json = serde_json::to_string_pretty(value)?;
    println!("{}", json);
    Ok(())
}
