//! Database server client
//!
//! This module wraps the wire-level PostgreSQL client behind a small session
//! abstraction. Handlers only ever open an administrative session, run single
//! statements on it and close it again, so that is all the traits expose.

use crate::credentials::ResolvedServer;
use crate::error::{OperatorError, Result};
use async_trait::async_trait;
use std::fmt;
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio::time::timeout;
use tracing::{debug, info, warn};

/// Default connection timeout for server sessions
const DEFAULT_CONNECTION_TIMEOUT: Duration = Duration::from_secs(10);

/// Default timeout for a single statement
const DEFAULT_STATEMENT_TIMEOUT: Duration = Duration::from_secs(30);

/// Database the administrative session connects to
pub const DEFAULT_ADMIN_DATABASE: &str = "postgres";

/// Where and as whom to connect
#[derive(Clone, PartialEq, Eq)]
pub struct ConnectTarget {
    pub host: String,
    pub port: u16,
    pub username: String,
    pub password: String,
}

impl From<&ResolvedServer> for ConnectTarget {
    fn from(server: &ResolvedServer) -> Self {
        Self {
            host: server.host.clone(),
            port: server.port,
            username: server.root_username.clone(),
            password: server.root_password.clone(),
        }
    }
}

impl fmt::Debug for ConnectTarget {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ConnectTarget")
            .field("host", &self.host)
            .field("port", &self.port)
            .field("username", &self.username)
            .field("password", &"****")
            .finish()
    }
}

/// Configuration for server sessions
#[derive(Debug, Clone)]
pub struct SqlClientConfig {
    /// Connection timeout
    pub connection_timeout: Duration,
    /// Timeout for a single statement
    pub statement_timeout: Duration,
    /// Administrative database to connect to
    pub admin_database: String,
}

impl Default for SqlClientConfig {
    fn default() -> Self {
        Self {
            connection_timeout: DEFAULT_CONNECTION_TIMEOUT,
            statement_timeout: DEFAULT_STATEMENT_TIMEOUT,
            admin_database: DEFAULT_ADMIN_DATABASE.to_string(),
        }
    }
}

/// Opens sessions against a database server
#[async_trait]
pub trait SqlConnector: Send + Sync {
    /// Open an administrative session
    async fn connect(&self, target: &ConnectTarget) -> Result<Box<dyn SqlSession>>;
}

/// An open session on a database server
#[async_trait]
pub trait SqlSession: Send + Sync {
    /// Execute one statement
    async fn execute(&self, statement: &str) -> Result<()>;

    /// Close the session. Closing twice is a no-op.
    async fn close(&mut self) -> Result<()>;
}

/// Quote an SQL identifier, doubling embedded quotes
pub fn quote_identifier(name: &str) -> String {
    format!("\"{}\"", name.replace('"', "\"\""))
}

/// PostgreSQL connector backed by tokio-postgres
pub struct PgConnector {
    config: SqlClientConfig,
}

impl PgConnector {
    /// Create a connector with default configuration
    pub fn new() -> Self {
        Self {
            config: SqlClientConfig::default(),
        }
    }

    /// Create a connector with custom configuration
    pub fn with_config(config: SqlClientConfig) -> Self {
        Self { config }
    }

    fn pg_config(&self, target: &ConnectTarget) -> tokio_postgres::Config {
        let mut pg_config = tokio_postgres::Config::new();
        pg_config
            .host(&target.host)
            .port(target.port)
            .user(&target.username)
            .password(&target.password)
            .dbname(&self.config.admin_database)
            .application_name("db-operator")
            .connect_timeout(self.config.connection_timeout);
        pg_config
    }
}

impl Default for PgConnector {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl SqlConnector for PgConnector {
    async fn connect(&self, target: &ConnectTarget) -> Result<Box<dyn SqlSession>> {
        debug!(host = %target.host, port = target.port, "Connecting to database server");

        let pg_config = self.pg_config(target);
        let (client, connection) = timeout(
            self.config.connection_timeout,
            pg_config.connect(tokio_postgres::NoTls),
        )
        .await
        .map_err(|_| {
            OperatorError::Timeout(format!(
                "connecting to {}:{} timed out",
                target.host, target.port
            ))
        })?
        .map_err(|e| OperatorError::ConnectionFailed(describe_pg_error(&e)))?;

        // The connection future drives the socket until every client handle is dropped
        let driver = tokio::spawn(async move {
            if let Err(e) = connection.await {
                warn!(error = %e, "Database connection closed with error");
            }
        });

        info!(
            host = %target.host,
            port = target.port,
            database = %self.config.admin_database,
            "Connected to database server"
        );

        Ok(Box::new(PgSession {
            client: Some(client),
            driver: Some(driver),
            statement_timeout: self.config.statement_timeout,
        }))
    }
}

/// Session on a PostgreSQL server
struct PgSession {
    client: Option<tokio_postgres::Client>,
    driver: Option<JoinHandle<()>>,
    statement_timeout: Duration,
}

#[async_trait]
impl SqlSession for PgSession {
    async fn execute(&self, statement: &str) -> Result<()> {
        let client = self
            .client
            .as_ref()
            .ok_or_else(|| OperatorError::ConnectionFailed("session is closed".to_string()))?;

        debug!(statement = %statement, "Executing statement");

        // Simple query protocol: CREATE/DROP DATABASE cannot run inside a transaction block
        timeout(self.statement_timeout, client.batch_execute(statement))
            .await
            .map_err(|_| OperatorError::Timeout(format!("statement timed out: {}", statement)))?
            .map_err(|e| OperatorError::QueryFailed(describe_pg_error(&e)))
    }

    async fn close(&mut self) -> Result<()> {
        drop(self.client.take());

        let Some(mut driver) = self.driver.take() else {
            return Ok(());
        };

        match timeout(self.statement_timeout, &mut driver).await {
            Ok(Ok(())) => {
                debug!("Database session closed");
                Ok(())
            }
            Ok(Err(e)) => Err(OperatorError::Internal(format!(
                "connection task failed: {}",
                e
            ))),
            Err(_) => {
                driver.abort();
                Err(OperatorError::Timeout(
                    "closing database session timed out".to_string(),
                ))
            }
        }
    }
}

fn describe_pg_error(error: &tokio_postgres::Error) -> String {
    match error.as_db_error() {
        Some(db_error) => format!("{} ({})", db_error.message(), db_error.code().code()),
        None => error.to_string(),
    }
}
