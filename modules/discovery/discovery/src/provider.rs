//! Registry provider: the uniquely-keyed, shared-read registry of
//! configured registries.

use std::collections::HashMap;
use std::path::Path;

use anyhow::{Context, Result};
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};

use discovery_sdk::registry::Registry;

use crate::config::RegistryConfig;

#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum ProviderError {
    /// A registry with the same name is already registered.
    #[error("duplicate registry name: {0}")]
    DuplicateName(String),
}

/// On-disk shape of a registries file: `{ registries: [...] }`.
#[derive(Debug, Default, Serialize, Deserialize)]
struct RegistriesFile {
    #[serde(default)]
    registries: Vec<RegistryConfig>,
}

/// Concurrent map of registries keyed by name.
///
/// Registration holds the write lock; lookups hold the read lock. Records
/// are immutable once registered.
#[derive(Default)]
pub struct RegistryProvider {
    registries: RwLock<HashMap<String, Registry>>,
}

impl RegistryProvider {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Register one or more registries atomically.
    ///
    /// # Errors
    /// Returns [`ProviderError::DuplicateName`] when any name is already
    /// present (or repeated within the batch); no registry is added in that
    /// case.
    pub fn register(
        &self,
        registries: impl IntoIterator<Item = Registry>,
    ) -> Result<(), ProviderError> {
        let batch: Vec<Registry> = registries.into_iter().collect();
        let mut map = self.registries.write();

        {
            let mut seen: Vec<&str> = Vec::with_capacity(batch.len());
            for registry in &batch {
                if map.contains_key(&registry.name) || seen.contains(&registry.name.as_str()) {
                    return Err(ProviderError::DuplicateName(registry.name.clone()));
                }
                seen.push(&registry.name);
            }
        }

        for registry in batch {
            tracing::debug!(registry = %registry.name, hostname = %registry.hostname, "registered registry");
            map.insert(registry.name.clone(), registry);
        }
        Ok(())
    }

    /// Look up a registry by name.
    #[must_use]
    pub fn get(&self, name: &str) -> Option<Registry> {
        self.registries.read().get(name).cloned()
    }

    /// Snapshot of all registered registries, ordered by name.
    #[must_use]
    pub fn get_all(&self) -> Vec<Registry> {
        let mut all: Vec<Registry> = self.registries.read().values().cloned().collect();
        all.sort_by(|a, b| a.name.cmp(&b.name));
        all
    }

    /// Load a `{ registries: [...] }` YAML file and register every entry.
    ///
    /// Decode-time defaults apply per entry (scan interval, hostname scheme
    /// trimming). Returns the number of registries added.
    ///
    /// # Errors
    /// Returns an error when the file cannot be read or decoded, when a
    /// required field is missing, or on a duplicate name.
    pub fn load_from_yaml(&self, path: &Path) -> Result<usize> {
        let raw = std::fs::read_to_string(path)
            .with_context(|| format!("failed to read registries file {}", path.display()))?;
        let file: RegistriesFile = serde_saphyr::from_str(&raw)
            .with_context(|| format!("failed to decode registries file {}", path.display()))?;

        let mut registries = Vec::with_capacity(file.registries.len());
        for entry in file.registries {
            let name = entry.name.clone();
            let registry = entry
                .into_registry()
                .with_context(|| format!("invalid registry entry {name:?}"))?;
            registries.push(registry);
        }

        let count = registries.len();
        self.register(registries)
            .with_context(|| format!("failed to register registries from {}", path.display()))?;
        Ok(count)
    }

    /// Serialize the registered registries as a `{ registries: [...] }`
    /// YAML document - the inverse of [`Self::load_from_yaml`] modulo
    /// defaults and ordering.
    ///
    /// # Errors
    /// Returns an error when serialization fails.
    pub fn to_yaml(&self) -> Result<String> {
        let file = RegistriesFile {
            registries: self.get_all().iter().map(RegistryConfig::from).collect(),
        };
        serde_saphyr::to_string(&file).context("failed to serialize registries to YAML")
    }
}
