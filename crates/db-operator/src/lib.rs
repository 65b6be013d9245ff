//! # db-operator
//!
//! Kubernetes operator that manages databases on existing database servers.
//!
//! Two custom resources drive it: a `ServerConfig` describes how to reach a
//! database server with administrative credentials, and a `Database` asks for
//! one database to exist on a referenced server. The operator watches
//! `Database` resources and creates or drops the database in response,
//! recording the outcome in the resource's status.
//!
//! ## Quick Start
//!
//! ```rust,ignore
//! use db_operator::prelude::*;
//! use kube::Client;
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let client = Client::try_default().await?;
//!     let ctx = ControllerContext::new(client.clone(), SqlClientConfig::default());
//!     let events = watch_databases(client, None);
//!
//!     let shutdown = async {
//!         let _ = tokio::signal::ctrl_c().await;
//!     };
//!
//!     run_controller(&ctx, events, shutdown).await;
//!     Ok(())
//! }
//! ```
//!
//! ## Architecture
//!
//! 1. **Watch**: Database events arrive as Added, Modified or Deleted
//! 2. **Resolve**: The referenced ServerConfig is fetched and its credentials resolved
//! 3. **Apply**: The handler for the server's `dbType` creates or drops the database
//! 4. **Status**: The resulting status is written back to the Database
//!
//! Events are processed one at a time. A failed event is dropped without a
//! status write; the next event for the resource starts from scratch.
//!
//! ## Modules
//!
//! - [`crd`] - Custom Resource Definition types and document decoding
//! - [`credentials`] - Resolution of referenced attributes
//! - [`sql_client`] - Administrative sessions on database servers
//! - [`handler`] - Per-server-type handlers and their registry
//! - [`store`] - Resource lookups and status write-back
//! - [`watcher`] - Database watch stream
//! - [`controller`] - Reconciliation engine
//! - [`error`] - Error types for operator operations
//!
//! ## Custom Resource Definitions
//!
//! ### ServerConfig
//!
//! ```yaml
//! apiVersion: db-operator.plumdog.co.uk/v1
//! kind: ServerConfig
//! metadata:
//!   name: main-postgres
//!   namespace: databases
//! spec:
//!   dbType: postgres
//!   host: postgres.databases.svc
//!   port: 5432
//!   rootUsername:
//!     value: postgres
//!   rootPassword:
//!     value: changeme
//! ```
//!
//! ### Database
//!
//! ```yaml
//! apiVersion: db-operator.plumdog.co.uk/v1
//! kind: Database
//! metadata:
//!   name: orders
//!   namespace: shop
//! spec:
//!   name: orders
//!   server:
//!     name: main-postgres
//!     namespace: databases
//! ```
//!
//! Once created, a database keeps its name: changing `spec.name` afterwards
//! is refused with a `CannotModifyName` error in the status.
//!
//! ## Metrics
//!
//! The operator exposes Prometheus metrics:
//!
//! - `db_operator_reconciliations_total` - Processed events
//! - `db_operator_reconciliation_errors_total` - Events that failed
//! - `db_operator_dropped_events_total` - Events dropped without a status write
//! - `db_operator_reconciliation_duration_seconds` - Reconciliation latency

pub mod controller;
pub mod credentials;
pub mod crd;
pub mod error;
pub mod handler;
pub mod sql_client;
pub mod store;
pub mod watcher;

#[cfg(test)]
mod testing;

pub mod prelude {
    //! Re-exports for convenient usage
    pub use crate::controller::{
        fetch_server, handle_event, reconcile_database, run_controller, ControllerContext,
        ControllerMetrics, ReconcileOutcome,
    };
    pub use crate::credentials::{resolve_server, AttributeResolver, LiteralResolver, ResolvedServer};
    pub use crate::crd::{
        Database, DatabaseSpec, DatabaseStatus, ReferencedAttribute, ServerConfig,
        ServerConfigSpec, ServerReference, StatusError,
    };
    pub use crate::error::{OperatorError, Result};
    pub use crate::handler::{
        DatabaseHandler, HandlerFactory, HandlerProps, HandlerRegistry, PgDatabaseHandler,
        PgHandlerFactory,
    };
    pub use crate::sql_client::{PgConnector, SqlClientConfig, SqlConnector, SqlSession};
    pub use crate::store::{KubeResourceStore, ResourceStore};
    pub use crate::watcher::{watch_databases, EventKind, ResourceEvent, ResourceMeta};
}
