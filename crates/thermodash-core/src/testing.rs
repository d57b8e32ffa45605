//! Scripted transport for exercising the session and API client without a server.

use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use reqwest::{Method, StatusCode};
use tokio::sync::Notify;

use crate::api::{ApiRequest, ApiResponse, Transport, TransportError};
use crate::auth::{MemoryStore, SessionManager};

#[derive(Clone)]
enum Reply {
    Respond(ApiResponse),
    Unreachable,
}

type Route = (Method, String);

/// Replies are queued per route. Once a route's queue runs dry, the last
/// reply it handed out keeps being returned; unscripted routes answer 404.
#[derive(Default)]
pub(crate) struct ScriptedTransport {
    replies: Mutex<HashMap<Route, VecDeque<Reply>>>,
    sticky: Mutex<HashMap<Route, Reply>>,
    holds: Mutex<HashMap<Route, Arc<Notify>>>,
    log: Mutex<Vec<ApiRequest>>,
}

impl ScriptedTransport {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn reply(&self, method: Method, path: &str, status: u16, body: &str) {
        let status = StatusCode::from_u16(status).expect("valid status code");
        self.push(method, path, Reply::Respond(ApiResponse::new(status, body)));
    }

    pub fn unreachable(&self, method: Method, path: &str) {
        self.push(method, path, Reply::Unreachable);
    }

    /// Requests to this route wait until the returned `Notify` fires.
    pub fn hold(&self, method: Method, path: &str) -> Arc<Notify> {
        let notify = Arc::new(Notify::new());
        self.holds
            .lock()
            .unwrap()
            .insert((method, path.to_string()), notify.clone());
        notify
    }

    pub fn requests(&self) -> Vec<ApiRequest> {
        self.log.lock().unwrap().clone()
    }

    pub fn count(&self, method: Method, path: &str) -> usize {
        self.log
            .lock()
            .unwrap()
            .iter()
            .filter(|r| r.method == method && r.path == path)
            .count()
    }

    pub fn last(&self, method: Method, path: &str) -> Option<ApiRequest> {
        self.log
            .lock()
            .unwrap()
            .iter()
            .rev()
            .find(|r| r.method == method && r.path == path)
            .cloned()
    }

    fn push(&self, method: Method, path: &str, reply: Reply) {
        self.replies
            .lock()
            .unwrap()
            .entry((method, path.to_string()))
            .or_default()
            .push_back(reply);
    }

    fn next_reply(&self, route: &Route) -> Option<Reply> {
        let queued = self
            .replies
            .lock()
            .unwrap()
            .get_mut(route)
            .and_then(|queue| queue.pop_front());
        let mut sticky = self.sticky.lock().unwrap();
        match queued {
            Some(reply) => {
                sticky.insert(route.clone(), reply.clone());
                Some(reply)
            }
            None => sticky.get(route).cloned(),
        }
    }
}

#[async_trait]
impl Transport for ScriptedTransport {
    async fn send(&self, request: &ApiRequest) -> Result<ApiResponse, TransportError> {
        self.log.lock().unwrap().push(request.clone());
        let route = (request.method.clone(), request.path.clone());

        let hold = self.holds.lock().unwrap().get(&route).cloned();
        if let Some(notify) = hold {
            notify.notified().await;
        }

        match self.next_reply(&route) {
            Some(Reply::Respond(response)) => Ok(response),
            Some(Reply::Unreachable) => Err(TransportError::Unreachable("connection refused".into())),
            None => Ok(ApiResponse::new(StatusCode::NOT_FOUND, "")),
        }
    }
}

/// A session manager over a scripted transport and two in-memory stores.
pub(crate) struct Harness {
    pub transport: Arc<ScriptedTransport>,
    pub persistent: Arc<MemoryStore>,
    pub session_store: Arc<MemoryStore>,
    pub manager: Arc<SessionManager>,
}

impl Harness {
    pub fn new() -> Self {
        let transport = ScriptedTransport::new();
        let persistent = Arc::new(MemoryStore::new());
        let session_store = Arc::new(MemoryStore::new());
        let manager = Self::manager_over(&transport, &persistent, &session_store);
        Self {
            transport,
            persistent,
            session_store,
            manager,
        }
    }

    /// A fresh manager over the same stores, as after an application restart.
    pub fn reload(&self) -> Self {
        let transport = ScriptedTransport::new();
        let manager = Self::manager_over(&transport, &self.persistent, &self.session_store);
        Self {
            transport,
            persistent: self.persistent.clone(),
            session_store: self.session_store.clone(),
            manager,
        }
    }

    fn manager_over(
        transport: &Arc<ScriptedTransport>,
        persistent: &Arc<MemoryStore>,
        session_store: &Arc<MemoryStore>,
    ) -> Arc<SessionManager> {
        Arc::new(SessionManager::with_session_store(
            transport.clone(),
            persistent.clone(),
            session_store.clone(),
        ))
    }
}

pub(crate) const PROFILE_JSON: &str =
    r#"{"id": 42, "email": "pat@example.com", "firstName": "Pat", "lastName": "Lee"}"#;
