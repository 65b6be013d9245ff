//! Database Controller
//!
//! This module implements the reconciliation engine for Database custom
//! resources. Watch events are processed strictly one at a time: the
//! referenced ServerConfig is fetched and its credentials resolved, the
//! handler for the server's `dbType` applies the event, and the resulting
//! status is written back to the Database.
//!
//! Nothing but the persisted status carries over between events. Failures
//! drop the event without writing status and rely on the watch delivering a
//! fresh event later; only a refused rename is surfaced in the status.

use crate::credentials::{resolve_server, AttributeResolver, LiteralResolver, ResolvedServer};
use crate::crd::{
    decode_database_spec, decode_database_status, decode_server_spec, DatabaseSpec,
    DatabaseStatus, SERVER_CONFIG_PLURAL,
};
use crate::error::{OperatorError, Result};
use crate::handler::{DatabaseHandler, HandlerProps, HandlerRegistry};
use crate::sql_client::{PgConnector, SqlClientConfig};
use crate::store::{KubeResourceStore, ResourceStore};
use crate::watcher::{EventKind, ResourceEvent};
use futures::{Stream, StreamExt};
use kube::Client;
use serde_json::Value;
use std::future::Future;
use std::sync::Arc;
use std::time::Instant;
use tracing::{debug, error, info, instrument, warn};

/// Context passed to the controller
pub struct ControllerContext {
    /// Resource lookups and status write-back
    pub store: Arc<dyn ResourceStore>,
    /// Resolver for ServerConfig credentials
    pub resolver: Arc<dyn AttributeResolver>,
    /// Handlers by server type
    pub handlers: HandlerRegistry,
    /// Metrics recorder (optional)
    pub metrics: Option<ControllerMetrics>,
}

impl ControllerContext {
    /// Context talking to the Kubernetes API and to PostgreSQL servers
    pub fn new(client: Client, sql_config: SqlClientConfig) -> Self {
        Self {
            store: Arc::new(KubeResourceStore::new(client)),
            resolver: Arc::new(LiteralResolver),
            handlers: HandlerRegistry::with_defaults(Arc::new(PgConnector::with_config(
                sql_config,
            ))),
            metrics: Some(ControllerMetrics::new()),
        }
    }
}

/// Metrics for the controller
#[derive(Clone)]
pub struct ControllerMetrics {
    /// Counter for processed events
    pub reconciliations: metrics::Counter,
    /// Counter for events that failed with an error
    pub errors: metrics::Counter,
    /// Counter for events dropped without a status write
    pub dropped: metrics::Counter,
    /// Histogram for reconciliation duration
    pub duration: metrics::Histogram,
}

impl ControllerMetrics {
    /// Create new controller metrics
    pub fn new() -> Self {
        Self {
            reconciliations: metrics::counter!("db_operator_reconciliations_total"),
            errors: metrics::counter!("db_operator_reconciliation_errors_total"),
            dropped: metrics::counter!("db_operator_dropped_events_total"),
            duration: metrics::histogram!("db_operator_reconciliation_duration_seconds"),
        }
    }
}

impl Default for ControllerMetrics {
    fn default() -> Self {
        Self::new()
    }
}

/// How a single event ended when it did not fail
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ReconcileOutcome {
    /// Handler applied and the new status was written
    Applied(DatabaseStatus),
    /// Handler applied but the status write was rejected
    StatusRejected(DatabaseStatus),
    /// Handler applied but the Database no longer exists to hold the status
    ResourceGone(DatabaseStatus),
    /// The referenced ServerConfig does not exist (yet)
    ServerNotFound { namespace: String, name: String },
    /// No namespace to look the ServerConfig up in
    NoSourceNamespace,
    /// No handler for the server's `dbType`
    UnsupportedServerType(String),
}

/// Process events until the stream ends or `shutdown` completes
///
/// Shutdown is only checked between events, so the event in flight always
/// runs to completion.
pub async fn run_controller<S, F>(ctx: &ControllerContext, mut events: S, shutdown: F)
where
    S: Stream<Item = ResourceEvent> + Unpin,
    F: Future<Output = ()>,
{
    tokio::pin!(shutdown);

    info!(
        db_types = ?ctx.handlers.db_types(),
        "Starting Database controller"
    );

    loop {
        let event = tokio::select! {
            biased;
            _ = &mut shutdown => {
                info!("Shutdown requested, no longer accepting events");
                break;
            }
            event = events.next() => event,
        };

        match event {
            Some(event) => handle_event(event, ctx).await,
            None => {
                warn!("Database watch ended");
                break;
            }
        }
    }

    info!("Database controller stopped");
}

/// Reconcile one event, logging instead of failing
#[instrument(
    skip(event, ctx),
    fields(
        kind = %event.kind,
        name = %event.meta.name,
        namespace = event.meta.namespace.as_deref().unwrap_or("")
    )
)]
pub async fn handle_event(event: ResourceEvent, ctx: &ControllerContext) {
    let start = Instant::now();

    if let Some(ref metrics) = ctx.metrics {
        metrics.reconciliations.increment(1);
    }

    let result = reconcile_database(&event, ctx).await;

    if let Some(ref metrics) = ctx.metrics {
        metrics.duration.record(start.elapsed().as_secs_f64());
    }

    match result {
        Ok(ReconcileOutcome::Applied(_) | ReconcileOutcome::ResourceGone(_)) => {
            debug!("Database reconciliation completed");
        }
        Ok(outcome) => {
            debug!(?outcome, "Database event dropped");
            if let Some(ref metrics) = ctx.metrics {
                metrics.dropped.increment(1);
            }
        }
        Err(e) => {
            error!(error = %e, reason = e.reason(), "Unable to apply");
            if let Some(ref metrics) = ctx.metrics {
                metrics.errors.increment(1);
            }
        }
    }
}

/// Reconcile one Database watch event
pub async fn reconcile_database(
    event: &ResourceEvent,
    ctx: &ControllerContext,
) -> Result<ReconcileOutcome> {
    let spec = decode_database_spec(&event.object)?;
    let status = decode_database_status(&event.object)?;

    let Some(namespace) = source_namespace(&spec, event) else {
        warn!(name = %event.meta.name, "Unable to determine source namespace");
        return Ok(ReconcileOutcome::NoSourceNamespace);
    };

    let Some(server) = fetch_server(ctx, &namespace, &spec.server.name).await? else {
        info!(
            namespace = %namespace,
            server = %spec.server.name,
            "Server not found, nothing to do"
        );
        return Ok(ReconcileOutcome::ServerNotFound {
            namespace,
            name: spec.server.name,
        });
    };

    info!(server = ?server, "Got resolved server");

    let props = HandlerProps {
        database: spec,
        status: status.clone(),
        server,
    };

    let mut handler = match ctx.handlers.for_db_type(props) {
        Ok(handler) => handler,
        Err(OperatorError::UnsupportedServerType(db_type)) => {
            warn!(db_type = %db_type, "Unknown dbType");
            return Ok(ReconcileOutcome::UnsupportedServerType(db_type));
        }
        Err(e) => return Err(e),
    };

    let new_status = apply_handler(handler.as_mut(), event.kind).await?;

    info!(?status, ?new_status, "Resulting status");

    match ctx.store.set_status(&event.meta, &new_status).await {
        Ok(()) => {
            info!("Status set");
            Ok(ReconcileOutcome::Applied(new_status))
        }
        Err(OperatorError::NotFound { .. }) => {
            // Deleted Databases are usually gone before their status can be written
            debug!(kind = %event.kind, "Database no longer exists, status not set");
            Ok(ReconcileOutcome::ResourceGone(new_status))
        }
        Err(e) => {
            warn!(error = %e, "Failed to set status");
            Ok(ReconcileOutcome::StatusRejected(new_status))
        }
    }
}

/// Connect, apply and always clean up
///
/// A cleanup failure is logged; it never replaces the result of `apply`.
async fn apply_handler<H>(handler: &mut H, event: EventKind) -> Result<DatabaseStatus>
where
    H: DatabaseHandler + ?Sized,
{
    handler.connect().await?;

    let applied = handler.apply(event).await;

    if let Err(e) = handler.cleanup().await {
        warn!(error = %e, "Failed to release database session");
    }

    applied
}

/// Namespace the referenced ServerConfig lives in
///
/// Explicit `spec.server.namespace`, then the Database's own namespace, then
/// the namespace carried by the event.
fn source_namespace(spec: &DatabaseSpec, event: &ResourceEvent) -> Option<String> {
    spec.server
        .namespace
        .clone()
        .or_else(|| {
            event
                .object
                .get("metadata")
                .and_then(|metadata| metadata.get("namespace"))
                .and_then(Value::as_str)
                .map(str::to_string)
        })
        .or_else(|| event.meta.namespace.clone())
}

/// Fetch a ServerConfig and resolve its credentials
///
/// Returns `None` when the ServerConfig does not exist.
pub async fn fetch_server(
    ctx: &ControllerContext,
    namespace: &str,
    name: &str,
) -> Result<Option<ResolvedServer>> {
    info!(namespace = %namespace, name = %name, "Fetching ServerConfig");

    let object = match ctx.store.get(namespace, SERVER_CONFIG_PLURAL, name).await {
        Ok(object) => object,
        Err(OperatorError::NotFound { .. }) => {
            info!(namespace = %namespace, name = %name, "ServerConfig not found");
            return Ok(None);
        }
        Err(e) => {
            error!(namespace = %namespace, name = %name, error = %e, "Failed to fetch ServerConfig");
            return Err(e);
        }
    };

    let spec = decode_server_spec(&object).inspect_err(|e| {
        error!(namespace = %namespace, name = %name, error = %e, "ServerConfig is malformed");
    })?;

    debug!(namespace = %namespace, name = %name, "Resolving server spec");

    resolve_server(&spec, ctx.resolver.as_ref()).await.map(Some)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::crd::StatusError;
    use crate::handler::CANNOT_MODIFY_NAME;
    use crate::testing::{MockConnector, MockStore};
    use crate::watcher::ResourceMeta;
    use serde_json::json;

    fn server_doc() -> Value {
        json!({
            "spec": {
                "dbType": "postgres",
                "host": "myserverhost",
                "port": 5432,
                "rootUsername": { "value": "myrootusername" },
                "rootPassword": { "value": "myrootpassword" }
            }
        })
    }

    fn database_spec() -> Value {
        json!({ "name": "mydatabase", "server": { "name": "myservername" } })
    }

    fn meta() -> ResourceMeta {
        ResourceMeta {
            name: "mydatabase".to_string(),
            namespace: Some("mynamespace".to_string()),
            resource_version: Some("v1".to_string()),
            uid: Some("db1234".to_string()),
            api_version: "db-operator.plumdog.co.uk/v1".to_string(),
            kind: "Database".to_string(),
        }
    }

    fn event(kind: EventKind, spec: Value, status: Option<Value>) -> ResourceEvent {
        let mut object = json!({
            "metadata": { "name": "mydatabase", "namespace": "mynamespace" },
            "spec": spec,
        });
        if let Some(status) = status {
            object["status"] = status;
        }
        ResourceEvent {
            kind,
            object,
            meta: meta(),
        }
    }

    fn context(store: MockStore, connector: MockConnector) -> ControllerContext {
        ControllerContext {
            store: Arc::new(store),
            resolver: Arc::new(LiteralResolver),
            handlers: HandlerRegistry::with_defaults(Arc::new(connector)),
            metrics: None,
        }
    }

    fn store_with_server() -> MockStore {
        MockStore::new().with_object("mynamespace", SERVER_CONFIG_PLURAL, "myservername", server_doc())
    }

    #[tokio::test]
    async fn test_added_creates_database_and_sets_status() {
        let store = store_with_server();
        let connector = MockConnector::new();
        let ctx = context(store.clone(), connector.clone());

        let outcome = reconcile_database(&event(EventKind::Added, database_spec(), None), &ctx)
            .await
            .unwrap();

        let expected = DatabaseStatus {
            created_name: Some("mydatabase".to_string()),
            error: Some(StatusError::default()),
        };
        assert_eq!(outcome, ReconcileOutcome::Applied(expected.clone()));
        assert_eq!(
            connector.statements(),
            vec!["CREATE DATABASE \"mydatabase\"".to_string()]
        );
        assert_eq!(connector.closes(), 1);
        assert_eq!(
            store.gets(),
            vec![(
                "mynamespace".to_string(),
                SERVER_CONFIG_PLURAL.to_string(),
                "myservername".to_string()
            )]
        );
        assert_eq!(store.statuses(), vec![(meta(), expected)]);
    }

    #[tokio::test]
    async fn test_rename_records_error_without_executing() {
        let store = store_with_server();
        let connector = MockConnector::new();
        let ctx = context(store.clone(), connector.clone());

        let spec = json!({ "name": "d", "server": { "name": "myservername" } });
        let outcome = reconcile_database(
            &event(EventKind::Added, spec, Some(json!({ "createdName": "other" }))),
            &ctx,
        )
        .await
        .unwrap();

        let expected = DatabaseStatus {
            created_name: Some("other".to_string()),
            error: Some(StatusError {
                code: Some(CANNOT_MODIFY_NAME.to_string()),
                message: Some("Database already created with name other.".to_string()),
            }),
        };
        assert_eq!(outcome, ReconcileOutcome::Applied(expected.clone()));
        assert!(connector.statements().is_empty());
        assert_eq!(store.statuses()[0].1, expected);
    }

    #[tokio::test]
    async fn test_modified_writes_cleared_error() {
        let store = store_with_server();
        let connector = MockConnector::new();
        let ctx = context(store.clone(), connector.clone());

        let status = json!({
            "createdName": "mydatabase",
            "error": { "code": "Old", "message": "old" }
        });
        let outcome = reconcile_database(
            &event(EventKind::Modified, database_spec(), Some(status)),
            &ctx,
        )
        .await
        .unwrap();

        assert_eq!(
            outcome,
            ReconcileOutcome::Applied(DatabaseStatus::created("mydatabase"))
        );
        assert!(connector.statements().is_empty());
    }

    #[tokio::test]
    async fn test_deleted_drops_database_and_clears_status() {
        let store = store_with_server();
        let connector = MockConnector::new();
        let ctx = context(store.clone(), connector.clone());

        let outcome = reconcile_database(
            &event(
                EventKind::Deleted,
                database_spec(),
                Some(json!({ "createdName": "mydatabase" })),
            ),
            &ctx,
        )
        .await
        .unwrap();

        assert_eq!(outcome, ReconcileOutcome::Applied(DatabaseStatus::dropped()));
        assert_eq!(
            connector.statements(),
            vec!["DROP DATABASE \"mydatabase\"".to_string()]
        );
    }

    #[tokio::test]
    async fn test_drop_failure_fails_event_without_status() {
        let store = store_with_server();
        let connector = MockConnector::new().fail_statement("DROP DATABASE", "database is in use");
        let ctx = context(store.clone(), connector.clone());

        let err = reconcile_database(&event(EventKind::Deleted, database_spec(), None), &ctx)
            .await
            .unwrap_err();

        assert!(matches!(err, OperatorError::QueryFailed(_)));
        assert_eq!(connector.closes(), 1);
        assert!(store.statuses().is_empty());
    }

    #[tokio::test]
    async fn test_create_failure_still_sets_status() {
        let store = store_with_server();
        let connector = MockConnector::new().fail_statement("CREATE DATABASE", "already exists");
        let ctx = context(store.clone(), connector.clone());

        let outcome = reconcile_database(&event(EventKind::Added, database_spec(), None), &ctx)
            .await
            .unwrap();

        assert_eq!(
            outcome,
            ReconcileOutcome::Applied(DatabaseStatus::created("mydatabase"))
        );
    }

    #[tokio::test]
    async fn test_missing_name_is_malformed() {
        let store = store_with_server();
        let connector = MockConnector::new();
        let ctx = context(store.clone(), connector.clone());

        let spec = json!({ "server": { "name": "myservername" } });
        let err = reconcile_database(&event(EventKind::Added, spec, None), &ctx)
            .await
            .unwrap_err();

        assert!(matches!(err, OperatorError::MalformedResource(_)));
        assert!(store.gets().is_empty());
        assert!(connector.connect_targets().is_empty());
    }

    #[tokio::test]
    async fn test_missing_server_name_is_malformed() {
        let store = store_with_server();
        let connector = MockConnector::new();
        let ctx = context(store.clone(), connector.clone());

        let spec = json!({ "name": "mydatabase", "server": { "namespace": "mynamespace" } });
        let err = reconcile_database(&event(EventKind::Added, spec, None), &ctx)
            .await
            .unwrap_err();

        assert!(matches!(err, OperatorError::MalformedResource(_)));
        assert!(store.gets().is_empty());
        assert!(store.statuses().is_empty());
    }

    #[tokio::test]
    async fn test_malformed_status_is_malformed() {
        let store = store_with_server();
        let ctx = context(store.clone(), MockConnector::new());

        let err = reconcile_database(
            &event(EventKind::Added, database_spec(), Some(json!({ "createdName": 1 }))),
            &ctx,
        )
        .await
        .unwrap_err();

        assert!(matches!(err, OperatorError::MalformedResource(_)));
        assert!(store.statuses().is_empty());
    }

    #[tokio::test]
    async fn test_server_reference_namespace_wins() {
        let store = MockStore::new().with_object(
            "databases",
            SERVER_CONFIG_PLURAL,
            "myservername",
            server_doc(),
        );
        let ctx = context(store.clone(), MockConnector::new());

        let spec = json!({
            "name": "mydatabase",
            "server": { "name": "myservername", "namespace": "databases" }
        });
        let outcome = reconcile_database(&event(EventKind::Added, spec, None), &ctx)
            .await
            .unwrap();

        assert!(matches!(outcome, ReconcileOutcome::Applied(_)));
        assert_eq!(store.gets()[0].0, "databases");
    }

    #[tokio::test]
    async fn test_event_namespace_is_last_fallback() {
        let store = MockStore::new().with_object(
            "from-event",
            SERVER_CONFIG_PLURAL,
            "myservername",
            server_doc(),
        );
        let ctx = context(store.clone(), MockConnector::new());

        let mut event = event(EventKind::Added, database_spec(), None);
        event.object["metadata"] = json!({ "name": "mydatabase" });
        event.meta.namespace = Some("from-event".to_string());

        let outcome = reconcile_database(&event, &ctx).await.unwrap();
        assert!(matches!(outcome, ReconcileOutcome::Applied(_)));
        assert_eq!(store.gets()[0].0, "from-event");
    }

    #[tokio::test]
    async fn test_no_source_namespace() {
        let store = store_with_server();
        let ctx = context(store.clone(), MockConnector::new());

        let mut event = event(EventKind::Added, database_spec(), None);
        event.object["metadata"] = json!({ "name": "mydatabase" });
        event.meta.namespace = None;

        let outcome = reconcile_database(&event, &ctx).await.unwrap();
        assert_eq!(outcome, ReconcileOutcome::NoSourceNamespace);
        assert!(store.gets().is_empty());
        assert!(store.statuses().is_empty());
    }

    #[tokio::test]
    async fn test_server_not_found_writes_nothing() {
        let store = MockStore::new();
        let connector = MockConnector::new();
        let ctx = context(store.clone(), connector.clone());

        let outcome = reconcile_database(&event(EventKind::Added, database_spec(), None), &ctx)
            .await
            .unwrap();

        assert_eq!(
            outcome,
            ReconcileOutcome::ServerNotFound {
                namespace: "mynamespace".to_string(),
                name: "myservername".to_string(),
            }
        );
        assert!(connector.connect_targets().is_empty());
        assert!(store.statuses().is_empty());
    }

    #[tokio::test]
    async fn test_server_fetch_failure_propagates() {
        let store = store_with_server().fail_get("connection refused");
        let ctx = context(store.clone(), MockConnector::new());

        let err = reconcile_database(&event(EventKind::Added, database_spec(), None), &ctx)
            .await
            .unwrap_err();

        assert!(matches!(err, OperatorError::Internal(_)));
        assert!(store.statuses().is_empty());
    }

    #[tokio::test]
    async fn test_malformed_server_is_dropped() {
        let store = MockStore::new().with_object(
            "mynamespace",
            SERVER_CONFIG_PLURAL,
            "myservername",
            json!({ "spec": { "thisSpecIs": "malformed" } }),
        );
        let ctx = context(store.clone(), MockConnector::new());

        let err = reconcile_database(&event(EventKind::Added, database_spec(), None), &ctx)
            .await
            .unwrap_err();

        assert!(matches!(err, OperatorError::MalformedResource(_)));
        assert!(store.statuses().is_empty());
    }

    #[tokio::test]
    async fn test_unresolvable_credentials_are_dropped() {
        let mut server = server_doc();
        server["spec"]["rootPassword"] = json!({});
        let store = MockStore::new().with_object(
            "mynamespace",
            SERVER_CONFIG_PLURAL,
            "myservername",
            server,
        );
        let connector = MockConnector::new();
        let ctx = context(store.clone(), connector.clone());

        let err = reconcile_database(&event(EventKind::Added, database_spec(), None), &ctx)
            .await
            .unwrap_err();

        assert!(err.to_string().contains("rootPassword"));
        assert!(matches!(err, OperatorError::ReferenceResolution(_)));
        assert!(connector.connect_targets().is_empty());
        assert!(store.statuses().is_empty());
    }

    #[tokio::test]
    async fn test_unknown_db_type_is_dropped_without_io() {
        let mut server = server_doc();
        server["spec"]["dbType"] = json!("unknown");
        let store = MockStore::new().with_object(
            "mynamespace",
            SERVER_CONFIG_PLURAL,
            "myservername",
            server,
        );
        let connector = MockConnector::new();
        let ctx = context(store.clone(), connector.clone());

        let outcome = reconcile_database(&event(EventKind::Added, database_spec(), None), &ctx)
            .await
            .unwrap();

        assert_eq!(
            outcome,
            ReconcileOutcome::UnsupportedServerType("unknown".to_string())
        );
        assert!(connector.connect_targets().is_empty());
        assert!(store.statuses().is_empty());
    }

    #[tokio::test]
    async fn test_connect_failure_fails_event() {
        let store = store_with_server();
        let connector = MockConnector::new().fail_connect("connection refused");
        let ctx = context(store.clone(), connector.clone());

        let err = reconcile_database(&event(EventKind::Added, database_spec(), None), &ctx)
            .await
            .unwrap_err();

        assert!(matches!(err, OperatorError::ConnectionFailed(_)));
        assert!(connector.statements().is_empty());
        assert!(store.statuses().is_empty());
    }

    #[tokio::test]
    async fn test_cleanup_failure_does_not_discard_status() {
        let store = store_with_server();
        let connector = MockConnector::new().fail_close("broken pipe");
        let ctx = context(store.clone(), connector.clone());

        let outcome = reconcile_database(&event(EventKind::Added, database_spec(), None), &ctx)
            .await
            .unwrap();

        assert!(matches!(outcome, ReconcileOutcome::Applied(_)));
        assert_eq!(store.statuses().len(), 1);
    }

    #[tokio::test]
    async fn test_cleanup_failure_does_not_mask_apply_failure() {
        let store = store_with_server();
        let connector = MockConnector::new()
            .fail_statement("DROP DATABASE", "database is in use")
            .fail_close("broken pipe");
        let ctx = context(store.clone(), connector.clone());

        let err = reconcile_database(&event(EventKind::Deleted, database_spec(), None), &ctx)
            .await
            .unwrap_err();

        assert!(matches!(err, OperatorError::QueryFailed(_)));
    }

    #[tokio::test]
    async fn test_rejected_status_write_is_dropped() {
        let store = store_with_server().reject_status();
        let ctx = context(store.clone(), MockConnector::new());

        let outcome = reconcile_database(&event(EventKind::Added, database_spec(), None), &ctx)
            .await
            .unwrap();

        assert_eq!(
            outcome,
            ReconcileOutcome::StatusRejected(DatabaseStatus::created("mydatabase"))
        );
        assert_eq!(store.statuses().len(), 1);
    }

    #[tokio::test]
    async fn test_deleted_database_already_gone() {
        let store = store_with_server().status_target_gone();
        let connector = MockConnector::new();
        let ctx = context(store.clone(), connector.clone());

        let outcome = reconcile_database(
            &event(
                EventKind::Deleted,
                database_spec(),
                Some(json!({ "createdName": "mydatabase" })),
            ),
            &ctx,
        )
        .await
        .unwrap();

        assert_eq!(
            outcome,
            ReconcileOutcome::ResourceGone(DatabaseStatus::dropped())
        );
        assert_eq!(
            connector.statements(),
            vec!["DROP DATABASE \"mydatabase\"".to_string()]
        );
        assert_eq!(store.statuses().len(), 1);
    }

    #[tokio::test]
    async fn test_run_controller_survives_failures() {
        let store = store_with_server();
        let connector = MockConnector::new();
        let ctx = context(store.clone(), connector.clone());

        let events = futures::stream::iter(vec![
            event(EventKind::Added, json!({ "bogus": true }), None),
            event(EventKind::Added, database_spec(), None),
            event(EventKind::Modified, database_spec(), Some(json!({ "createdName": "mydatabase" }))),
        ]);

        run_controller(&ctx, events, std::future::pending::<()>()).await;

        assert_eq!(store.statuses().len(), 2);
        assert_eq!(connector.statements().len(), 1);
    }

    #[tokio::test]
    async fn test_run_controller_stops_on_shutdown() {
        let store = store_with_server();
        let ctx = context(store.clone(), MockConnector::new());

        let events = futures::stream::iter(vec![event(EventKind::Added, database_spec(), None)]);

        run_controller(&ctx, events, std::future::ready(())).await;

        assert!(store.gets().is_empty());
    }

    #[tokio::test]
    async fn test_fetch_server_resolves_credentials() {
        let ctx = context(store_with_server(), MockConnector::new());

        let server = fetch_server(&ctx, "mynamespace", "myservername")
            .await
            .unwrap()
            .unwrap();

        assert_eq!(
            server,
            ResolvedServer {
                db_type: "postgres".to_string(),
                host: "myserverhost".to_string(),
                port: 5432,
                root_username: "myrootusername".to_string(),
                root_password: "myrootpassword".to_string(),
            }
        );
    }

    #[tokio::test]
    async fn test_fetch_server_not_found() {
        let ctx = context(MockStore::new(), MockConnector::new());
        let server = fetch_server(&ctx, "mynamespace", "missing").await.unwrap();
        assert!(server.is_none());
    }
}
