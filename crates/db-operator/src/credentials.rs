//! Credential resolution
//!
//! A `ServerConfig` carries its root credentials as referenced attributes.
//! Before the operator can connect, each attribute is turned into a concrete
//! value by an [`AttributeResolver`]. The only strategy today is the inline
//! literal; other sources (e.g. Secrets) plug in as further implementations.

use crate::crd::{ReferencedAttribute, ServerConfigSpec};
use crate::error::{OperatorError, Result};
use async_trait::async_trait;
use std::fmt;

/// Strategy that resolves a referenced attribute to its concrete value
#[async_trait]
pub trait AttributeResolver: Send + Sync {
    /// Resolve one attribute
    async fn resolve(&self, attribute: &ReferencedAttribute) -> Result<String>;
}

/// Resolves attributes that carry an inline `value`
#[derive(Debug, Clone, Default)]
pub struct LiteralResolver;

#[async_trait]
impl AttributeResolver for LiteralResolver {
    async fn resolve(&self, attribute: &ReferencedAttribute) -> Result<String> {
        attribute
            .value
            .clone()
            .ok_or_else(|| OperatorError::ReferenceResolution("No target set".to_string()))
    }
}

/// Connection details of a server with all credentials resolved
#[derive(Clone, PartialEq, Eq)]
pub struct ResolvedServer {
    pub db_type: String,
    pub host: String,
    pub port: u16,
    pub root_username: String,
    pub root_password: String,
}

impl fmt::Debug for ResolvedServer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ResolvedServer")
            .field("db_type", &self.db_type)
            .field("host", &self.host)
            .field("port", &self.port)
            .field("root_username", &self.root_username)
            .field("root_password", &"****")
            .finish()
    }
}

/// Resolve every referenced attribute of a server spec
pub async fn resolve_server(
    spec: &ServerConfigSpec,
    resolver: &dyn AttributeResolver,
) -> Result<ResolvedServer> {
    let root_username = resolve_field("rootUsername", &spec.root_username, resolver).await?;
    let root_password = resolve_field("rootPassword", &spec.root_password, resolver).await?;

    Ok(ResolvedServer {
        db_type: spec.db_type.clone(),
        host: spec.host.clone(),
        port: spec.port,
        root_username,
        root_password,
    })
}

async fn resolve_field(
    field: &str,
    attribute: &ReferencedAttribute,
    resolver: &dyn AttributeResolver,
) -> Result<String> {
    resolver.resolve(attribute).await.map_err(|e| match e {
        OperatorError::ReferenceResolution(reason) => OperatorError::ReferenceResolution(format!(
            "Unable to resolve referenced value for {}: {}",
            field, reason
        )),
        other => other,
    })
}
