//! Database resource watcher
//!
//! Turns the Kubernetes watch API into a stream of [`ResourceEvent`]s that
//! keep the Added/Modified/Deleted distinction the handlers depend on. The
//! watch starts at resourceVersion `0`, so every existing Database arrives as
//! an Added event first. When the server ends the watch it is resumed from the
//! last seen resourceVersion; after `410 Gone` it starts over from `0`.
//! Failed watches are reopened after a capped exponential backoff.

use crate::crd::{Database, API_GROUP, API_VERSION};
use futures::stream::BoxStream;
use futures::StreamExt;
use kube::api::{Api, ApiResource, DynamicObject, WatchEvent, WatchParams};
use kube::{Client, ResourceExt};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fmt;
use std::time::Duration;
use tokio::time::Instant;
use tracing::{debug, info, warn};

/// Server-side watch timeout, kept below the client's read timeout so the
/// API server closes idle watches before the client gives up on them
const WATCH_TIMEOUT_SECS: u32 = 290;

/// First pause before re-establishing a failed watch
const INITIAL_RETRY_DELAY_MS: u64 = 1_000;

/// Ceiling for the pause between failed watches
const MAX_RETRY_DELAY_MS: u64 = 60_000;

/// A watch that ends sooner than this without delivering anything is
/// treated as failed
const MIN_HEALTHY_WATCH: Duration = Duration::from_secs(1);

/// HTTP status the API server uses for an expired resourceVersion
const GONE: u16 = 410;

/// Kind of change a watch event reports
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum EventKind {
    Added,
    Modified,
    Deleted,
}

impl fmt::Display for EventKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            EventKind::Added => "ADDED",
            EventKind::Modified => "MODIFIED",
            EventKind::Deleted => "DELETED",
        };
        f.write_str(s)
    }
}

/// Addressing metadata of the resource an event is about
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ResourceMeta {
    pub name: String,
    pub namespace: Option<String>,
    pub resource_version: Option<String>,
    pub uid: Option<String>,
    pub api_version: String,
    pub kind: String,
}

impl ResourceMeta {
    /// Metadata of `object`, using `fallback_namespace` when the object has none
    pub fn from_object(object: &DynamicObject, fallback_namespace: Option<&str>) -> Self {
        let types = object.types.as_ref();
        Self {
            name: object.name_any(),
            namespace: object
                .namespace()
                .or_else(|| fallback_namespace.map(str::to_string)),
            resource_version: object.resource_version(),
            uid: object.uid(),
            api_version: types
                .map(|t| t.api_version.clone())
                .unwrap_or_else(|| format!("{}/{}", API_GROUP, API_VERSION)),
            kind: types
                .map(|t| t.kind.clone())
                .unwrap_or_else(|| "Database".to_string()),
        }
    }
}

/// One Database watch event
#[derive(Debug, Clone)]
pub struct ResourceEvent {
    /// What happened
    pub kind: EventKind,
    /// The resource document as delivered, undecoded
    pub object: Value,
    /// Addressing metadata
    pub meta: ResourceMeta,
}

impl ResourceEvent {
    fn from_object(kind: EventKind, object: DynamicObject, namespace: Option<&str>) -> Self {
        let meta = ResourceMeta::from_object(&object, namespace);
        // DynamicObject serialization cannot fail: it is already a JSON document
        let object = serde_json::to_value(&object).unwrap_or(Value::Null);
        Self { kind, object, meta }
    }
}

/// What the watch loop does after one watch event
#[derive(Debug)]
enum WatchStep {
    /// Hand the event to the consumer
    Emit(ResourceEvent),
    /// Keep reading the current watch
    Continue,
    /// Drop the current watch and open a new one, pausing first when set
    Restart { pause: bool },
}

/// Position of the watch and its failure count
#[derive(Debug)]
struct WatchCursor {
    namespace: Option<String>,
    resource_version: String,
    failures: u32,
    received: bool,
}

impl WatchCursor {
    fn new(namespace: Option<String>) -> Self {
        Self {
            namespace,
            resource_version: "0".to_string(),
            failures: 0,
            received: false,
        }
    }

    fn on_watch_started(&mut self) {
        self.received = false;
    }

    fn on_watch_event(&mut self, event: WatchEvent<DynamicObject>) -> WatchStep {
        match event {
            WatchEvent::Added(object) => self.emit(EventKind::Added, object),
            WatchEvent::Modified(object) => self.emit(EventKind::Modified, object),
            WatchEvent::Deleted(object) => self.emit(EventKind::Deleted, object),
            WatchEvent::Bookmark(bookmark) => {
                self.resource_version = bookmark.metadata.resource_version;
                self.received = true;
                self.failures = 0;
                WatchStep::Continue
            }
            WatchEvent::Error(e) if e.code == GONE && self.resource_version != "0" => {
                debug!("Resource version expired, restarting watch from scratch");
                self.resource_version = "0".to_string();
                WatchStep::Restart { pause: false }
            }
            WatchEvent::Error(e) => {
                warn!(code = e.code, message = %e.message, "Watch returned an error");
                WatchStep::Restart { pause: true }
            }
        }
    }

    /// The server closed the watch after `elapsed`
    fn on_stream_end(&mut self, elapsed: Duration) -> WatchStep {
        if self.received || elapsed >= MIN_HEALTHY_WATCH {
            debug!("Watch stream ended, resuming");
            self.failures = 0;
            WatchStep::Restart { pause: false }
        } else {
            warn!("Watch stream ended without delivering events");
            WatchStep::Restart { pause: true }
        }
    }

    /// Pause before the next attempt, growing with consecutive failures
    fn retry_delay(&mut self) -> Duration {
        self.failures = self.failures.saturating_add(1);
        calculate_backoff(self.failures, INITIAL_RETRY_DELAY_MS, MAX_RETRY_DELAY_MS)
    }

    fn emit(&mut self, kind: EventKind, object: DynamicObject) -> WatchStep {
        if let Some(version) = object.resource_version() {
            self.resource_version = version;
        }
        self.received = true;
        self.failures = 0;
        WatchStep::Emit(ResourceEvent::from_object(
            kind,
            object,
            self.namespace.as_deref(),
        ))
    }
}

/// Exponential backoff `initial_ms * 2^(attempt-1)`, capped at `max_ms`
fn calculate_backoff(attempt: u32, initial_ms: u64, max_ms: u64) -> Duration {
    let backoff_ms = initial_ms.saturating_mul(2u64.saturating_pow(attempt.saturating_sub(1)));
    Duration::from_millis(backoff_ms.min(max_ms))
}

struct WatchState {
    api: Api<DynamicObject>,
    cursor: WatchCursor,
    stream: Option<BoxStream<'static, kube::Result<WatchEvent<DynamicObject>>>>,
    opened_at: Instant,
}

/// Watch Database resources in `namespace`, or cluster-wide when `None`
///
/// The stream never ends on its own; watch failures are logged and retried
/// with a capped exponential backoff.
pub fn watch_databases(client: Client, namespace: Option<String>) -> BoxStream<'static, ResourceEvent> {
    let resource = ApiResource::erase::<Database>(&());
    let api: Api<DynamicObject> = match &namespace {
        Some(ns) => Api::namespaced_with(client, ns, &resource),
        None => Api::all_with(client, &resource),
    };

    info!(
        namespace = namespace.as_deref().unwrap_or("all"),
        "Watching Database resources"
    );

    let state = WatchState {
        api,
        cursor: WatchCursor::new(namespace),
        stream: None,
        opened_at: Instant::now(),
    };

    futures::stream::unfold(state, next_event).boxed()
}

async fn next_event(mut state: WatchState) -> Option<(ResourceEvent, WatchState)> {
    loop {
        let Some(stream) = state.stream.as_mut() else {
            let params = WatchParams::default().timeout(WATCH_TIMEOUT_SECS);
            match state.api.watch(&params, &state.cursor.resource_version).await {
                Ok(stream) => {
                    debug!(resource_version = %state.cursor.resource_version, "Watch started");
                    state.cursor.on_watch_started();
                    state.opened_at = Instant::now();
                    state.stream = Some(stream.boxed());
                }
                Err(e) => {
                    let delay = state.cursor.retry_delay();
                    warn!(error = %e, delay_ms = delay.as_millis() as u64, "Failed to start watch, retrying");
                    tokio::time::sleep(delay).await;
                }
            }
            continue;
        };

        let step = match stream.next().await {
            Some(Ok(event)) => state.cursor.on_watch_event(event),
            Some(Err(e)) => {
                warn!(error = %e, "Watch stream failed, retrying");
                WatchStep::Restart { pause: true }
            }
            None => state.cursor.on_stream_end(state.opened_at.elapsed()),
        };

        match step {
            WatchStep::Emit(event) => return Some((event, state)),
            WatchStep::Continue => {}
            WatchStep::Restart { pause } => {
                state.stream = None;
                if pause {
                    let delay = state.cursor.retry_delay();
                    debug!(delay_ms = delay.as_millis() as u64, "Pausing before next watch");
                    tokio::time::sleep(delay).await;
                }
            }
        }
    }
}
