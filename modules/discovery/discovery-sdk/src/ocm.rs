//! Capability traits for OCI catalog enumeration and OCM repository access.
//!
//! The pipeline core depends only on these operations; implementations may
//! target the OCI distribution API directly or wrap a full OCM toolchain.

use async_trait::async_trait;
use bytes::Bytes;

use crate::error::OcmError;
use crate::registry::Registry;

/// Path segment separating the OCM namespace from the component name in a
/// repository path.
pub const COMPONENT_DESCRIPTOR_SEPARATOR: &str = "/component-descriptors/";

/// Resource type identifying a helm chart inside a component descriptor.
pub const RESOURCE_TYPE_HELM_CHART: &str = "helmChart";

/// Lists the repositories of a registry's catalog.
#[async_trait]
pub trait OciCatalog: Send + Sync {
    /// Enumerate all repository names in the registry.
    ///
    /// Implementations apply the registry's credentials and plain-HTTP flag
    /// and page through the catalog internally.
    ///
    /// # Errors
    /// Returns [`OcmError`] when the registry cannot be reached or answers
    /// with an error status.
    async fn list_repositories(&self, registry: &Registry) -> Result<Vec<String>, OcmError>;
}

/// Opens OCM repositories below a registry namespace.
#[async_trait]
pub trait OcmClient: Send + Sync {
    /// Open the OCM repository at `<registry url>/<namespace>`.
    ///
    /// The returned handle closes deterministically when dropped.
    ///
    /// # Errors
    /// Returns [`OcmError`] when the repository cannot be opened.
    async fn open(
        &self,
        registry: &Registry,
        namespace: &str,
    ) -> Result<Box<dyn OcmRepository>, OcmError>;
}

/// A handle on one OCM repository.
#[async_trait]
pub trait OcmRepository: Send + Sync {
    /// List all versions of a component.
    ///
    /// # Errors
    /// Returns [`OcmError::NotFound`] for unknown components.
    async fn list_versions(&self, component: &str) -> Result<Vec<String>, OcmError>;

    /// Look up one component version and its descriptor.
    ///
    /// # Errors
    /// Returns [`OcmError::NotFound`] for unknown component versions.
    async fn lookup_version(
        &self,
        component: &str,
        version: &str,
    ) -> Result<ComponentVersion, OcmError>;

    /// Download a resource blob of a component version into memory.
    ///
    /// # Errors
    /// Returns [`OcmError`] when the blob cannot be fetched.
    async fn download_resource(
        &self,
        component: &str,
        resource: &Resource,
    ) -> Result<Bytes, OcmError>;
}

/// A resolved component version with its descriptor's resource list.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ComponentVersion {
    pub name: String,
    pub version: String,
    pub resources: Vec<Resource>,
}

impl ComponentVersion {
    /// Resources of the given type, in descriptor order.
    pub fn resources_of_type<'a>(
        &'a self,
        resource_type: &'a str,
    ) -> impl Iterator<Item = &'a Resource> {
        self.resources
            .iter()
            .filter(move |r| r.resource_type == resource_type)
    }
}

/// One resource entry of a component descriptor.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Resource {
    pub name: String,
    pub resource_type: String,
    pub version: Option<String>,
    /// Digest recorded in the descriptor, if any.
    pub digest: Option<String>,
    /// Local-blob reference used to fetch the resource content.
    pub local_reference: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn resources_of_type_filters_and_preserves_order() {
        let version = ComponentVersion {
            name: "acme/app".into(),
            version: "1.0.0".into(),
            resources: vec![
                Resource {
                    name: "image".into(),
                    resource_type: "ociImage".into(),
                    ..Resource::default()
                },
                Resource {
                    name: "chart".into(),
                    resource_type: RESOURCE_TYPE_HELM_CHART.into(),
                    ..Resource::default()
                },
            ],
        };

        let charts: Vec<_> = version.resources_of_type(RESOURCE_TYPE_HELM_CHART).collect();
        assert_eq!(charts.len(), 1);
        assert_eq!(charts[0].name, "chart");
    }
}
