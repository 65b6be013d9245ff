//! Database handlers
//!
//! A handler carries out the state transition for one Database event against
//! one kind of database server. Handlers are looked up by the server's
//! `dbType` in a [`HandlerRegistry`]; supporting another server type means
//! registering another [`HandlerFactory`], the controller stays unchanged.
//!
//! Transitions, evaluated against the last persisted status:
//!
//! | Event    | Action                              | Resulting status                  |
//! |----------|-------------------------------------|-----------------------------------|
//! | any      | declared name differs from created  | unchanged + `CannotModifyName`    |
//! | Added    | `CREATE DATABASE` (failure ignored) | `createdName = name`, `error: {}` |
//! | Modified | nothing                             | `error: {}`                       |
//! | Deleted  | `DROP DATABASE`                     | `createdName = ""`, `error: {}`   |

use crate::credentials::ResolvedServer;
use crate::crd::{DatabaseSpec, DatabaseStatus};
use crate::error::{OperatorError, Result};
use crate::sql_client::{quote_identifier, ConnectTarget, SqlConnector, SqlSession};
use crate::watcher::EventKind;
use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::Arc;
use tracing::{error, info, warn};

/// Error code recorded when the declared name no longer matches the created one
pub const CANNOT_MODIFY_NAME: &str = "CannotModifyName";

/// `dbType` of PostgreSQL servers
pub const POSTGRES: &str = "postgres";

/// Everything a handler needs to reconcile one Database
#[derive(Debug, Clone)]
pub struct HandlerProps {
    /// Desired state
    pub database: DatabaseSpec,
    /// Last persisted status
    pub status: DatabaseStatus,
    /// Server the database lives on
    pub server: ResolvedServer,
}

/// Executes Database transitions against one server type
#[async_trait]
pub trait DatabaseHandler: Send {
    /// Open a session on the server's administrative database
    async fn connect(&mut self) -> Result<()>;

    /// Apply the transition for `event` and return the new status
    async fn apply(&mut self, event: EventKind) -> Result<DatabaseStatus>;

    /// Release the session
    async fn cleanup(&mut self) -> Result<()>;
}

/// Builds handlers for one server type
pub trait HandlerFactory: Send + Sync {
    /// Build a handler. Must not perform I/O.
    fn create(&self, props: HandlerProps) -> Box<dyn DatabaseHandler>;
}

/// Handler factories keyed by `dbType`
#[derive(Default)]
pub struct HandlerRegistry {
    factories: HashMap<String, Arc<dyn HandlerFactory>>,
}

impl HandlerRegistry {
    /// Create an empty registry
    pub fn new() -> Self {
        Self::default()
    }

    /// Registry with every built-in server type
    pub fn with_defaults(connector: Arc<dyn SqlConnector>) -> Self {
        let mut registry = Self::new();
        registry.register(POSTGRES, PgHandlerFactory::new(connector));
        registry
    }

    /// Register (or replace) the factory for `db_type`
    pub fn register(
        &mut self,
        db_type: impl Into<String>,
        factory: impl HandlerFactory + 'static,
    ) -> &mut Self {
        self.factories.insert(db_type.into(), Arc::new(factory));
        self
    }

    /// Registered server types, sorted
    pub fn db_types(&self) -> Vec<&str> {
        let mut types: Vec<&str> = self.factories.keys().map(String::as_str).collect();
        types.sort_unstable();
        types
    }

    /// Build the handler for the server's `dbType`
    pub fn for_db_type(&self, props: HandlerProps) -> Result<Box<dyn DatabaseHandler>> {
        let factory = self
            .factories
            .get(&props.server.db_type)
            .ok_or_else(|| OperatorError::UnsupportedServerType(props.server.db_type.clone()))?;

        Ok(factory.create(props))
    }
}

/// Status to report when `database` tries to rename an already created database
///
/// Returns `None` when the declared name is acceptable.
pub fn rename_conflict(database: &DatabaseSpec, status: &DatabaseStatus) -> Option<DatabaseStatus> {
    let created = status.created_name()?;
    if created == database.name {
        return None;
    }

    error!(
        created_with_name = %created,
        requested_name = %database.name,
        "Database already created with a different name"
    );

    Some(status.with_error(
        CANNOT_MODIFY_NAME,
        format!("Database already created with name {}.", created),
    ))
}

/// Factory for [`PgDatabaseHandler`]
pub struct PgHandlerFactory {
    connector: Arc<dyn SqlConnector>,
}

impl PgHandlerFactory {
    pub fn new(connector: Arc<dyn SqlConnector>) -> Self {
        Self { connector }
    }
}

impl HandlerFactory for PgHandlerFactory {
    fn create(&self, props: HandlerProps) -> Box<dyn DatabaseHandler> {
        Box::new(PgDatabaseHandler::new(props, self.connector.clone()))
    }
}

/// PostgreSQL database handler
pub struct PgDatabaseHandler {
    database: DatabaseSpec,
    status: DatabaseStatus,
    target: ConnectTarget,
    connector: Arc<dyn SqlConnector>,
    session: Option<Box<dyn SqlSession>>,
}

impl PgDatabaseHandler {
    pub fn new(props: HandlerProps, connector: Arc<dyn SqlConnector>) -> Self {
        Self {
            target: ConnectTarget::from(&props.server),
            database: props.database,
            status: props.status,
            connector,
            session: None,
        }
    }

    fn session(&self) -> Result<&dyn SqlSession> {
        self.session
            .as_deref()
            .ok_or_else(|| OperatorError::ConnectionFailed("handler is not connected".to_string()))
    }

    async fn added(&self) -> Result<()> {
        info!(database = %self.database.name, "Added");
        let statement = format!("CREATE DATABASE {}", quote_identifier(&self.database.name));

        // Replayed Added events hit databases that already exist
        if let Err(e) = self.session()?.execute(&statement).await {
            warn!(
                database = %self.database.name,
                error = %e,
                "Failed to create database, continuing"
            );
        }
        Ok(())
    }

    fn modified(&self) {
        // Changes other than the name are never applied to the live server
        info!(database = %self.database.name, "Modified");
    }

    async fn deleted(&self) -> Result<()> {
        info!(database = %self.database.name, "Deleted");
        let statement = format!("DROP DATABASE {}", quote_identifier(&self.database.name));
        self.session()?.execute(&statement).await
    }
}

#[async_trait]
impl DatabaseHandler for PgDatabaseHandler {
    async fn connect(&mut self) -> Result<()> {
        self.session = Some(self.connector.connect(&self.target).await?);
        Ok(())
    }

    async fn apply(&mut self, event: EventKind) -> Result<DatabaseStatus> {
        if let Some(status) = rename_conflict(&self.database, &self.status) {
            return Ok(status);
        }

        info!(
            event = %event,
            database = %self.database.name,
            created_name = self.status.created_name().unwrap_or(""),
            "Apply PgDatabaseHandler"
        );

        match event {
            EventKind::Added => {
                self.added().await?;
                Ok(DatabaseStatus::created(&self.database.name))
            }
            EventKind::Modified => {
                self.modified();
                Ok(self.status.without_error())
            }
            EventKind::Deleted => {
                self.deleted().await?;
                Ok(DatabaseStatus::dropped())
            }
        }
    }

    async fn cleanup(&mut self) -> Result<()> {
        match self.session.take() {
            Some(mut session) => session.close().await,
            None => Ok(()),
        }
    }
}
