//! Arsenal discovery SDK - contract layer for the discovery pipeline.
//!
//! This crate defines everything the pipeline core and its collaborators
//! agree on, and nothing else:
//!
//! - the typed event records flowing between pipeline stages,
//! - the [`Registry`] model describing a configured OCI registry,
//! - the capability traits for external collaborators (OCI catalog
//!   enumeration, OCM repository access, the catalog store),
//! - the error types those capabilities surface,
//! - the naming helpers that turn component coordinates into valid
//!   catalog record names.
//!
//! No I/O happens here; implementations live with the pipeline core or in
//! the consuming application.

#![forbid(unsafe_code)]

pub mod catalog;
pub mod error;
pub mod events;
pub mod naming;
pub mod ocm;
pub mod registry;

pub use catalog::{CatalogRecord, CatalogStore};
pub use error::{CatalogError, OcmError};
pub use events::{
    ComponentVersionEvent, ErrorEvent, EventType, HelmResource, RepositoryEvent, ResourcePayload,
    WriteResourceEvent,
};
pub use ocm::{
    COMPONENT_DESCRIPTOR_SEPARATOR, ComponentVersion, OciCatalog, OcmClient, OcmRepository,
    RESOURCE_TYPE_HELM_CHART, Resource,
};
pub use registry::{Credentials, Registry, WebhookConfig};
