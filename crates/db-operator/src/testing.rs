//! Test doubles for the resource store and the database client

use crate::crd::DatabaseStatus;
use crate::error::{OperatorError, Result};
use crate::sql_client::{ConnectTarget, SqlConnector, SqlSession};
use crate::store::ResourceStore;
use crate::watcher::ResourceMeta;
use async_trait::async_trait;
use parking_lot::Mutex;
use serde_json::Value;
use std::collections::HashMap;
use std::sync::Arc;

// ============================================================================
// Mock database server
// ============================================================================

#[derive(Default)]
struct ServerState {
    connect_targets: Vec<ConnectTarget>,
    statements: Vec<String>,
    closes: usize,
    connect_error: Option<String>,
    statement_errors: Vec<(String, String)>,
    close_error: Option<String>,
}

/// Connector that records every call instead of talking to a server
#[derive(Clone, Default)]
pub struct MockConnector {
    state: Arc<Mutex<ServerState>>,
}

impl MockConnector {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make every connection attempt fail
    pub fn fail_connect(self, message: &str) -> Self {
        self.state.lock().connect_error = Some(message.to_string());
        self
    }

    /// Make statements starting with `prefix` fail
    pub fn fail_statement(self, prefix: &str, message: &str) -> Self {
        self.state
            .lock()
            .statement_errors
            .push((prefix.to_string(), message.to_string()));
        self
    }

    /// Make closing a session fail
    pub fn fail_close(self, message: &str) -> Self {
        self.state.lock().close_error = Some(message.to_string());
        self
    }

    pub fn connect_targets(&self) -> Vec<ConnectTarget> {
        self.state.lock().connect_targets.clone()
    }

    pub fn statements(&self) -> Vec<String> {
        self.state.lock().statements.clone()
    }

    pub fn closes(&self) -> usize {
        self.state.lock().closes
    }
}

#[async_trait]
impl SqlConnector for MockConnector {
    async fn connect(&self, target: &ConnectTarget) -> Result<Box<dyn SqlSession>> {
        let mut state = self.state.lock();
        state.connect_targets.push(target.clone());
        if let Some(message) = &state.connect_error {
            return Err(OperatorError::ConnectionFailed(message.clone()));
        }
        Ok(Box::new(MockSession {
            state: self.state.clone(),
            closed: false,
        }))
    }
}

struct MockSession {
    state: Arc<Mutex<ServerState>>,
    closed: bool,
}

#[async_trait]
impl SqlSession for MockSession {
    async fn execute(&self, statement: &str) -> Result<()> {
        let mut state = self.state.lock();
        state.statements.push(statement.to_string());
        let failure = state
            .statement_errors
            .iter()
            .find(|(prefix, _)| statement.starts_with(prefix.as_str()))
            .map(|(_, message)| message.clone());
        match failure {
            Some(message) => Err(OperatorError::QueryFailed(message)),
            None => Ok(()),
        }
    }

    async fn close(&mut self) -> Result<()> {
        if self.closed {
            return Ok(());
        }
        self.closed = true;
        let mut state = self.state.lock();
        state.closes += 1;
        match &state.close_error {
            Some(message) => Err(OperatorError::ConnectionFailed(message.clone())),
            None => Ok(()),
        }
    }
}

// ============================================================================
// Mock resource store
// ============================================================================

#[derive(Default)]
struct StoreState {
    objects: HashMap<(String, String, String), Value>,
    gets: Vec<(String, String, String)>,
    statuses: Vec<(ResourceMeta, DatabaseStatus)>,
    get_error: Option<String>,
    reject_status: bool,
    status_target_gone: bool,
}

/// In-memory resource store recording every call
#[derive(Clone, Default)]
pub struct MockStore {
    state: Arc<Mutex<StoreState>>,
}

impl MockStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a resource document
    pub fn with_object(self, namespace: &str, plural: &str, name: &str, object: Value) -> Self {
        self.state.lock().objects.insert(
            (namespace.to_string(), plural.to_string(), name.to_string()),
            object,
        );
        self
    }

    /// Make every lookup fail with an internal error
    pub fn fail_get(self, message: &str) -> Self {
        self.state.lock().get_error = Some(message.to_string());
        self
    }

    /// Reject every status write, like a conflicting concurrent update would
    pub fn reject_status(self) -> Self {
        self.state.lock().reject_status = true;
        self
    }

    /// Answer every status write as if the Database had been deleted
    pub fn status_target_gone(self) -> Self {
        self.state.lock().status_target_gone = true;
        self
    }

    pub fn gets(&self) -> Vec<(String, String, String)> {
        self.state.lock().gets.clone()
    }

    pub fn statuses(&self) -> Vec<(ResourceMeta, DatabaseStatus)> {
        self.state.lock().statuses.clone()
    }
}

#[async_trait]
impl ResourceStore for MockStore {
    async fn get(&self, namespace: &str, plural: &str, name: &str) -> Result<Value> {
        let mut state = self.state.lock();
        let key = (namespace.to_string(), plural.to_string(), name.to_string());
        state.gets.push(key.clone());

        if let Some(message) = &state.get_error {
            return Err(OperatorError::Internal(message.clone()));
        }

        state
            .objects
            .get(&key)
            .cloned()
            .ok_or_else(|| OperatorError::NotFound {
                kind: plural.to_string(),
                name: name.to_string(),
                namespace: namespace.to_string(),
            })
    }

    async fn set_status(&self, meta: &ResourceMeta, status: &DatabaseStatus) -> Result<()> {
        let mut state = self.state.lock();
        state.statuses.push((meta.clone(), status.clone()));
        if state.status_target_gone {
            return Err(OperatorError::NotFound {
                kind: "databases".to_string(),
                name: meta.name.clone(),
                namespace: meta.namespace.clone().unwrap_or_default(),
            });
        }
        if state.reject_status {
            return Err(OperatorError::Internal(
                "the object has been modified".to_string(),
            ));
        }
        Ok(())
    }
}
