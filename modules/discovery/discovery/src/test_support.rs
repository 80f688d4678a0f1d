//! Shared test doubles and fixture builders.
//!
//! Available to this crate's own tests and, via the `test-utils` feature,
//! to integration tests.

use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicU32, Ordering};

use async_trait::async_trait;
use bytes::Bytes;
use flate2::Compression;
use flate2::write::GzEncoder;

use discovery_sdk::catalog::{CatalogRecord, CatalogStore};
use discovery_sdk::error::{CatalogError, OcmError};
use discovery_sdk::ocm::{
    ComponentVersion, OciCatalog, OcmClient, OcmRepository, Resource,
};
use discovery_sdk::registry::Registry;

/// In-memory OCM fixture: components, versions, resources, and blobs.
///
/// Also answers catalog listings so one mock can feed a whole pipeline.
#[derive(Default, Clone)]
pub struct MockOcm {
    repositories: Vec<String>,
    versions: HashMap<String, Vec<String>>,
    component_versions: HashMap<(String, String), Vec<Resource>>,
    blobs: HashMap<String, Bytes>,
    remaining_lookup_failures: Arc<AtomicU32>,
    failure_message: String,
}

impl MockOcm {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Repositories returned by the catalog listing.
    #[must_use]
    pub fn with_repositories(mut self, repositories: &[&str]) -> Self {
        self.repositories = repositories.iter().map(|s| (*s).to_owned()).collect();
        self
    }

    /// Known versions of a component.
    #[must_use]
    pub fn with_versions(mut self, component: &str, versions: &[&str]) -> Self {
        self.versions.insert(
            component.to_owned(),
            versions.iter().map(|s| (*s).to_owned()).collect(),
        );
        self
    }

    /// A resolvable component version with its resources. The version is
    /// also added to the component's version list.
    #[must_use]
    pub fn with_component_version(
        mut self,
        component: &str,
        version: &str,
        resources: Vec<Resource>,
    ) -> Self {
        self.versions
            .entry(component.to_owned())
            .or_default()
            .push(version.to_owned());
        self.component_versions
            .insert((component.to_owned(), version.to_owned()), resources);
        self
    }

    /// A downloadable blob keyed by its reference.
    #[must_use]
    pub fn with_blob(mut self, reference: &str, blob: impl Into<Bytes>) -> Self {
        self.blobs.insert(reference.to_owned(), blob.into());
        self
    }

    /// Make the next `count` version lookups fail with `message`.
    #[must_use]
    pub fn failing_lookups(self, count: u32, message: &str) -> Self {
        self.remaining_lookup_failures.store(count, Ordering::SeqCst);
        Self {
            failure_message: message.to_owned(),
            ..self
        }
    }
}

#[async_trait]
impl OciCatalog for MockOcm {
    async fn list_repositories(&self, _registry: &Registry) -> Result<Vec<String>, OcmError> {
        Ok(self.repositories.clone())
    }
}

#[async_trait]
impl OcmClient for MockOcm {
    async fn open(
        &self,
        _registry: &Registry,
        _namespace: &str,
    ) -> Result<Box<dyn OcmRepository>, OcmError> {
        Ok(Box::new(self.clone()))
    }
}

#[async_trait]
impl OcmRepository for MockOcm {
    async fn list_versions(&self, component: &str) -> Result<Vec<String>, OcmError> {
        self.versions
            .get(component)
            .cloned()
            .ok_or_else(|| OcmError::NotFound {
                reference: component.to_owned(),
            })
    }

    async fn lookup_version(
        &self,
        component: &str,
        version: &str,
    ) -> Result<ComponentVersion, OcmError> {
        let remaining = self.remaining_lookup_failures.load(Ordering::SeqCst);
        if remaining > 0 {
            self.remaining_lookup_failures
                .store(remaining.saturating_sub(1), Ordering::SeqCst);
            return Err(OcmError::Other(self.failure_message.clone()));
        }

        self.component_versions
            .get(&(component.to_owned(), version.to_owned()))
            .map(|resources| ComponentVersion {
                name: component.to_owned(),
                version: version.to_owned(),
                resources: resources.clone(),
            })
            .ok_or_else(|| OcmError::NotFound {
                reference: format!("{component}:{version}"),
            })
    }

    async fn download_resource(
        &self,
        _component: &str,
        resource: &Resource,
    ) -> Result<Bytes, OcmError> {
        let reference = resource
            .local_reference
            .as_deref()
            .or(resource.digest.as_deref())
            .unwrap_or_default();
        self.blobs
            .get(reference)
            .cloned()
            .ok_or_else(|| OcmError::NotFound {
                reference: reference.to_owned(),
            })
    }
}

/// Catalog store whose every operation fails with `Unavailable`.
pub struct FailingCatalogStore;

#[async_trait]
impl CatalogStore for FailingCatalogStore {
    async fn get(&self, _namespace: &str, _name: &str) -> Result<CatalogRecord, CatalogError> {
        Err(CatalogError::Unavailable("catalog offline".into()))
    }

    async fn create(&self, _namespace: &str, _record: CatalogRecord) -> Result<(), CatalogError> {
        Err(CatalogError::Unavailable("catalog offline".into()))
    }

    async fn update(&self, _namespace: &str, _record: CatalogRecord) -> Result<(), CatalogError> {
        Err(CatalogError::Unavailable("catalog offline".into()))
    }
}

fn tgz(files: &[(String, &[u8])]) -> Bytes {
    let mut builder = tar::Builder::new(GzEncoder::new(Vec::new(), Compression::default()));
    for (path, content) in files {
        let mut header = tar::Header::new_gnu();
        header.set_size(content.len() as u64);
        header.set_mode(0o644);
        header.set_cksum();
        builder.append_data(&mut header, path, *content).unwrap();
    }
    Bytes::from(builder.into_inner().unwrap().finish().unwrap())
}

/// Build a minimal helm chart `.tgz` in memory.
#[must_use]
pub fn chart_archive(
    name: &str,
    version: &str,
    app_version: Option<&str>,
    values: Option<serde_json::Value>,
) -> Bytes {
    let mut chart_yaml = format!("apiVersion: v2\nname: {name}\nversion: {version}\n");
    if let Some(app_version) = app_version {
        chart_yaml.push_str(&format!("appVersion: {app_version:?}\n"));
    }
    chart_yaml.push_str("description: test fixture chart\n");

    let mut files: Vec<(String, Vec<u8>)> = vec![(
        format!("{name}/Chart.yaml"),
        chart_yaml.into_bytes(),
    )];
    if let Some(values) = values {
        // JSON is valid YAML, so values.yaml can carry it verbatim.
        files.push((format!("{name}/values.yaml"), values.to_string().into_bytes()));
    }

    let borrowed: Vec<(String, &[u8])> = files
        .iter()
        .map(|(path, content)| (path.clone(), content.as_slice()))
        .collect();
    tgz(&borrowed)
}

/// Build a gzipped descriptor tar with a `component-descriptor.yaml` member.
#[must_use]
pub fn descriptor_tgz(descriptor_yaml: &str) -> Bytes {
    tgz(&[(
        "component-descriptor.yaml".to_owned(),
        descriptor_yaml.as_bytes(),
    )])
}
