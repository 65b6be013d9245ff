//! Custom Resource Definitions for the db-operator
//!
//! `ServerConfig` describes a database server the operator may administer and
//! `Database` declares a single database on one of those servers. The
//! operator only ever writes the `status` of `Database` resources.

use crate::error::{OperatorError, Result};
use kube::CustomResource;
use regex::Regex;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::sync::LazyLock;
use validator::{Validate, ValidationError, ValidationErrors};

/// API group shared by all db-operator resources
pub const API_GROUP: &str = "db-operator.plumdog.co.uk";

/// API version shared by all db-operator resources
pub const API_VERSION: &str = "v1";

/// Plural name of the `Database` resource
pub const DATABASE_PLURAL: &str = "databases";

/// Plural name of the `ServerConfig` resource
pub const SERVER_CONFIG_PLURAL: &str = "serverconfigs";

/// PostgreSQL truncates identifiers longer than this
const MAX_DATABASE_NAME_LEN: usize = 63;

/// Regex for validating Kubernetes names (RFC 1123 subdomain)
static NAME_REGEX: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^[a-z0-9]([-a-z0-9]*[a-z0-9])?$").unwrap());

/// Validate a Kubernetes name (RFC 1123 subdomain)
fn validate_k8s_name(value: &str) -> std::result::Result<(), ValidationError> {
    if value.is_empty() {
        return Err(ValidationError::new("empty_name").with_message("name is required".into()));
    }
    if value.len() > 253 {
        return Err(ValidationError::new("name_too_long")
            .with_message("name exceeds 253 characters".into()));
    }
    if !value.split('.').all(|segment| NAME_REGEX.is_match(segment)) {
        return Err(ValidationError::new("invalid_name").with_message(
            format!("'{}' is not a valid Kubernetes name (RFC 1123)", value).into(),
        ));
    }
    Ok(())
}

/// Validate the name a database is created under
fn validate_database_name(value: &str) -> std::result::Result<(), ValidationError> {
    if value.is_empty() {
        return Err(ValidationError::new("empty_name")
            .with_message("database name is required".into()));
    }
    if value.len() > MAX_DATABASE_NAME_LEN {
        return Err(ValidationError::new("name_too_long").with_message(
            format!(
                "database name exceeds {} characters",
                MAX_DATABASE_NAME_LEN
            )
            .into(),
        ));
    }
    if value.contains('\0') {
        return Err(ValidationError::new("invalid_name")
            .with_message("database name must not contain NUL".into()));
    }
    Ok(())
}

/// Database custom resource
///
/// Declares a database that should exist on the referenced server.
///
/// ```yaml
/// apiVersion: db-operator.plumdog.co.uk/v1
/// kind: Database
/// metadata:
///   name: orders
///   namespace: shop
/// spec:
///   name: orders
///   server:
///     name: main-postgres
/// ```
#[derive(CustomResource, Debug, Clone, PartialEq, Deserialize, Serialize, JsonSchema, Validate)]
#[kube(
    group = "db-operator.plumdog.co.uk",
    version = "v1",
    kind = "Database",
    plural = "databases",
    shortname = "db",
    namespaced,
    status = "DatabaseStatus",
    printcolumn = r#"{"name":"Database","type":"string","jsonPath":".spec.name"}"#,
    printcolumn = r#"{"name":"Server","type":"string","jsonPath":".spec.server.name"}"#,
    printcolumn = r#"{"name":"Created","type":"string","jsonPath":".status.createdName"}"#,
    printcolumn = r#"{"name":"Error","type":"string","jsonPath":".status.error.code"}"#,
    printcolumn = r#"{"name":"Age","type":"date","jsonPath":".metadata.creationTimestamp"}"#
)]
#[serde(rename_all = "camelCase")]
pub struct DatabaseSpec {
    /// Name of the database on the server. Cannot be changed once created.
    #[validate(custom(function = "validate_database_name"))]
    pub name: String,

    /// The ServerConfig this database lives on
    #[validate(nested)]
    pub server: ServerReference,
}

/// Reference to a ServerConfig resource
#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize, JsonSchema, Validate)]
#[serde(rename_all = "camelCase")]
pub struct ServerReference {
    /// Name of the ServerConfig
    #[validate(custom(function = "validate_k8s_name"))]
    pub name: String,

    /// Namespace of the ServerConfig (defaults to the Database's namespace)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub namespace: Option<String>,
}

/// Status of the Database resource
///
/// Every field is optional and unknown fields are ignored, so a status
/// written by an older or newer operator still decodes.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize, Serialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct DatabaseStatus {
    /// Name the database was actually created under
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub created_name: Option<String>,

    /// Error from the last reconciliation; `{}` when it succeeded
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<StatusError>,
}

/// Error recorded into a Database status
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize, Serialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct StatusError {
    /// Machine-readable error code
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub code: Option<String>,

    /// Human-readable message
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
}

impl DatabaseStatus {
    /// Name the database was created under, if it has been created
    pub fn created_name(&self) -> Option<&str> {
        self.created_name.as_deref().filter(|name| !name.is_empty())
    }

    /// Copy of this status with the error cleared to `{}`
    pub fn without_error(&self) -> Self {
        Self {
            created_name: self.created_name.clone(),
            error: Some(StatusError::default()),
        }
    }

    /// Copy of this status carrying the given error
    pub fn with_error(&self, code: &str, message: impl Into<String>) -> Self {
        Self {
            created_name: self.created_name.clone(),
            error: Some(StatusError {
                code: Some(code.to_string()),
                message: Some(message.into()),
            }),
        }
    }

    /// Status of a database that was created under `name`
    pub fn created(name: &str) -> Self {
        Self {
            created_name: Some(name.to_string()),
            error: Some(StatusError::default()),
        }
    }

    /// Status of a database that has been dropped
    pub fn dropped() -> Self {
        Self::created("")
    }
}

/// ServerConfig custom resource
///
/// Connection details for a database server. Credentials are referenced
/// attributes that the operator resolves before connecting.
///
/// ```yaml
/// apiVersion: db-operator.plumdog.co.uk/v1
/// kind: ServerConfig
/// metadata:
///   name: main-postgres
/// spec:
///   dbType: postgres
///   host: postgres.databases.svc
///   port: 5432
///   rootUsername:
///     value: postgres
///   rootPassword:
///     value: hunter2
/// ```
#[derive(CustomResource, Debug, Clone, PartialEq, Deserialize, Serialize, JsonSchema, Validate)]
#[kube(
    group = "db-operator.plumdog.co.uk",
    version = "v1",
    kind = "ServerConfig",
    plural = "serverconfigs",
    shortname = "dbserver",
    namespaced,
    printcolumn = r#"{"name":"Type","type":"string","jsonPath":".spec.dbType"}"#,
    printcolumn = r#"{"name":"Host","type":"string","jsonPath":".spec.host"}"#,
    printcolumn = r#"{"name":"Port","type":"integer","jsonPath":".spec.port"}"#,
    printcolumn = r#"{"name":"Age","type":"date","jsonPath":".metadata.creationTimestamp"}"#
)]
#[serde(rename_all = "camelCase")]
pub struct ServerConfigSpec {
    /// Server type, selects the handler (e.g. `postgres`)
    #[validate(length(min = 1, message = "dbType must not be empty"))]
    pub db_type: String,

    /// Hostname of the server
    #[validate(length(min = 1, message = "host must not be empty"))]
    pub host: String,

    /// Port of the server
    pub port: u16,

    /// Administrative username
    pub root_username: ReferencedAttribute,

    /// Administrative password
    pub root_password: ReferencedAttribute,
}

/// A value that is resolved at reconcile time
///
/// Only inline literals are supported today.
#[derive(Clone, Default, PartialEq, Eq, Deserialize, Serialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct ReferencedAttribute {
    /// Inline literal value
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub value: Option<String>,
}

impl std::fmt::Debug for ReferencedAttribute {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ReferencedAttribute")
            .field("value", &self.value.as_ref().map(|_| "****"))
            .finish()
    }
}

/// Decode the spec of an untyped Database document
pub fn decode_database_spec(object: &Value) -> Result<DatabaseSpec> {
    let spec = object
        .get("spec")
        .ok_or_else(|| OperatorError::MalformedResource("resource has no spec".to_string()))?;

    let spec = DatabaseSpec::deserialize(spec)
        .map_err(|e| OperatorError::MalformedResource(format!("database spec: {}", e)))?;

    spec.validate()
        .map_err(|e| OperatorError::MalformedResource(validation_message("database spec", &e)))?;

    Ok(spec)
}

/// Decode the status of an untyped Database document
///
/// A missing status decodes as the empty status.
pub fn decode_database_status(object: &Value) -> Result<DatabaseStatus> {
    match object.get("status") {
        None | Some(Value::Null) => Ok(DatabaseStatus::default()),
        Some(status) => DatabaseStatus::deserialize(status)
            .map_err(|e| OperatorError::MalformedResource(format!("database status: {}", e))),
    }
}

/// Decode the spec of an untyped ServerConfig document
pub fn decode_server_spec(object: &Value) -> Result<ServerConfigSpec> {
    let spec = object
        .get("spec")
        .ok_or_else(|| OperatorError::MalformedResource("resource has no spec".to_string()))?;

    let spec = ServerConfigSpec::deserialize(spec)
        .map_err(|e| OperatorError::MalformedResource(format!("server spec: {}", e)))?;

    spec.validate()
        .map_err(|e| OperatorError::MalformedResource(validation_message("server spec", &e)))?;

    Ok(spec)
}

fn validation_message(what: &str, errors: &ValidationErrors) -> String {
    format!("{}: {}", what, errors).replace('\n', "; ")
}
