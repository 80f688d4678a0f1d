//! In-memory catalog store backed by `DashMap`.
//!
//! Used by tests and by deployments without an external catalog.

use async_trait::async_trait;
use dashmap::DashMap;

use discovery_sdk::catalog::{CatalogRecord, CatalogStore};
use discovery_sdk::error::CatalogError;

#[derive(Default)]
pub struct MemoryCatalog {
    /// (namespace, name) -> record.
    records: DashMap<(String, String), CatalogRecord>,
}

impl MemoryCatalog {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of records across all namespaces.
    #[must_use]
    pub fn len(&self) -> usize {
        self.records.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }
}

#[async_trait]
impl CatalogStore for MemoryCatalog {
    async fn get(&self, namespace: &str, name: &str) -> Result<CatalogRecord, CatalogError> {
        self.records
            .get(&(namespace.to_owned(), name.to_owned()))
            .map(|record| record.clone())
            .ok_or(CatalogError::NotFound)
    }

    async fn create(&self, namespace: &str, record: CatalogRecord) -> Result<(), CatalogError> {
        let key = (namespace.to_owned(), record.name.clone());
        if self.records.contains_key(&key) {
            return Err(CatalogError::Conflict(record.name));
        }
        self.records.insert(key, record);
        Ok(())
    }

    async fn update(&self, namespace: &str, record: CatalogRecord) -> Result<(), CatalogError> {
        let key = (namespace.to_owned(), record.name.clone());
        if !self.records.contains_key(&key) {
            return Err(CatalogError::NotFound);
        }
        self.records.insert(key, record);
        Ok(())
    }
}
