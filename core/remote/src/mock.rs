//! Scripted in-process remote for tests.

use async_trait::async_trait;
use parking_lot::Mutex;
use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::Value;
use std::collections::{HashMap, VecDeque};
use std::sync::Arc;
use tokio::sync::watch;

use reposync_common::{Contributor, Repo, RepoKey, RepoSearchResponse, User};

use crate::client::RemoteClient;
use crate::response::ApiResponse;

/// A call made against a [`MockRemote`].
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Request {
    User(String),
    Repos(String),
    Repo(RepoKey),
    Contributors(RepoKey),
    Search { query: String, page: Option<u32> },
}

impl Request {
    pub fn user(login: &str) -> Self {
        Self::User(login.to_string())
    }

    pub fn repos(owner: &str) -> Self {
        Self::Repos(owner.to_string())
    }

    pub fn repo(owner: &str, name: &str) -> Self {
        Self::Repo(RepoKey::new(owner, name))
    }

    pub fn contributors(owner: &str, name: &str) -> Self {
        Self::Contributors(RepoKey::new(owner, name))
    }

    pub fn search(query: &str, page: Option<u32>) -> Self {
        Self::Search {
            query: query.to_string(),
            page,
        }
    }
}

/// Holds a gated reply back until opened.
pub struct Gate {
    tx: watch::Sender<bool>,
}

impl Gate {
    pub fn open(&self) {
        self.tx.send_replace(true);
    }
}

#[derive(Clone)]
struct Scripted {
    response: ApiResponse<Value>,
    gate: Option<watch::Receiver<bool>>,
}

#[derive(Default)]
struct MockState {
    replies: HashMap<Request, VecDeque<Scripted>>,
    calls: Vec<Request>,
    completed: Vec<Request>,
}

/// [`RemoteClient`] answering from scripted replies.
///
/// Replies queue up per request and are consumed in order; the last one
/// keeps answering once the queue is down to it. Calls without any
/// scripted reply resolve to an error response. Every call is recorded,
/// and calls whose reply was actually delivered are recorded separately,
/// so a test can tell a cancelled call from a finished one.
#[derive(Clone, Default)]
pub struct MockRemote {
    state: Arc<Mutex<MockState>>,
}

impl MockRemote {
    pub fn new() -> Self {
        Self::default()
    }

    /// Queue a reply for `request`.
    pub fn reply<T: Serialize>(&self, request: Request, response: ApiResponse<T>) {
        self.push(request, response, None);
    }

    /// Queue a reply for `request` that is withheld until the gate opens.
    pub fn reply_gated<T: Serialize>(&self, request: Request, response: ApiResponse<T>) -> Gate {
        let (tx, rx) = watch::channel(false);
        self.push(request, response, Some(rx));
        Gate { tx }
    }

    fn push<T: Serialize>(
        &self,
        request: Request,
        response: ApiResponse<T>,
        gate: Option<watch::Receiver<bool>>,
    ) {
        let response = match response {
            ApiResponse::Success { body, next_page } => match serde_json::to_value(body) {
                Ok(body) => ApiResponse::Success { body, next_page },
                Err(e) => ApiResponse::error(e.to_string()),
            },
            ApiResponse::Empty => ApiResponse::Empty,
            ApiResponse::Error { message } => ApiResponse::Error { message },
        };
        self.state
            .lock()
            .replies
            .entry(request)
            .or_default()
            .push_back(Scripted { response, gate });
    }

    /// Every call made so far, in order.
    pub fn calls(&self) -> Vec<Request> {
        self.state.lock().calls.clone()
    }

    /// Calls whose reply was delivered, in order.
    pub fn completed(&self) -> Vec<Request> {
        self.state.lock().completed.clone()
    }

    pub fn call_count(&self, request: &Request) -> usize {
        self.state
            .lock()
            .calls
            .iter()
            .filter(|call| *call == request)
            .count()
    }

    async fn respond<T: DeserializeOwned>(&self, request: Request) -> ApiResponse<T> {
        let scripted = {
            let mut state = self.state.lock();
            state.calls.push(request.clone());
            match state.replies.get_mut(&request) {
                Some(queue) if queue.len() > 1 => queue.pop_front(),
                Some(queue) => queue.front().cloned(),
                None => None,
            }
        };

        let Some(scripted) = scripted else {
            return ApiResponse::error(format!("no reply scripted for {:?}", request));
        };

        if let Some(mut gate) = scripted.gate {
            let opened = gate.wait_for(|open| *open).await.is_ok();
            if !opened {
                return ApiResponse::error("gate dropped");
            }
        }
        self.state.lock().completed.push(request);

        match scripted.response {
            ApiResponse::Success { body, next_page } => match serde_json::from_value(body) {
                Ok(body) => ApiResponse::Success { body, next_page },
                Err(e) => ApiResponse::error(e.to_string()),
            },
            ApiResponse::Empty => ApiResponse::Empty,
            ApiResponse::Error { message } => ApiResponse::Error { message },
        }
    }
}

#[async_trait]
impl RemoteClient for MockRemote {
    async fn get_user(&self, login: &str) -> ApiResponse<User> {
        self.respond(Request::user(login)).await
    }

    async fn get_repos(&self, owner: &str) -> ApiResponse<Vec<Repo>> {
        self.respond(Request::repos(owner)).await
    }

    async fn get_repo(&self, owner: &str, name: &str) -> ApiResponse<Repo> {
        self.respond(Request::repo(owner, name)).await
    }

    async fn get_contributors(&self, owner: &str, name: &str) -> ApiResponse<Vec<Contributor>> {
        self.respond(Request::contributors(owner, name)).await
    }

    async fn search_repos(
        &self,
        query: &str,
        page: Option<u32>,
    ) -> ApiResponse<RepoSearchResponse> {
        self.respond(Request::search(query, page)).await
    }
}
