//! Catalog store capability.
//!
//! The store persisting final records is an external collaborator; the
//! pipeline consumes it through this trait only.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::error::CatalogError;
use crate::events::ResourcePayload;

/// A catalog record describing one discovered component version.
///
/// `name` is `sanitize_with_hash(component + "-" + version)` and is unique
/// within a namespace.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CatalogRecord {
    pub name: String,
    pub component: String,
    pub version: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub payload: Option<ResourcePayload>,
}

/// Operations the pipeline needs from the catalog store.
#[async_trait]
pub trait CatalogStore: Send + Sync {
    /// Fetch a record by namespace and name.
    ///
    /// # Errors
    /// Returns [`CatalogError::NotFound`] when no such record exists;
    /// other variants signal store failures.
    async fn get(&self, namespace: &str, name: &str) -> Result<CatalogRecord, CatalogError>;

    /// Create a new record.
    ///
    /// # Errors
    /// Returns [`CatalogError::Conflict`] when the name is already taken.
    async fn create(&self, namespace: &str, record: CatalogRecord) -> Result<(), CatalogError>;

    /// Replace an existing record.
    ///
    /// # Errors
    /// Returns [`CatalogError::NotFound`] when the record does not exist.
    async fn update(&self, namespace: &str, record: CatalogRecord) -> Result<(), CatalogError>;
}
