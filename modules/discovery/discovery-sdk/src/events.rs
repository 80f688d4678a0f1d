//! Event records passed between pipeline stages.
//!
//! Events are value-copied across channels; none of them borrow.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// What happened to the repository or manifest that produced an event.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EventType {
    Created,
    Updated,
    Deleted,
}

/// Atomic output of the scanner and the webhook router.
///
/// `registry` must resolve in the registry provider by the time the
/// qualifier sees the event.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RepositoryEvent {
    /// Name of the registry the repository lives in.
    pub registry: String,
    /// Full repository path inside the registry.
    pub repository: String,
    /// Pinned tag; `None` means "all versions".
    pub version: Option<String>,
    #[serde(rename = "type")]
    pub event_type: EventType,
    pub timestamp: DateTime<Utc>,
}

/// Output of the qualifier, input of the filter and handler stages.
///
/// `source.version` is non-empty after the qualifier unless
/// `source.event_type` is [`EventType::Deleted`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ComponentVersionEvent {
    pub source: RepositoryEvent,
    /// Repository path segment preceding `/component-descriptors/`.
    pub namespace: String,
    /// Component name, the segment following `/component-descriptors/`.
    pub component: String,
}

impl ComponentVersionEvent {
    /// The pinned version, or `""` for deleted events without one.
    #[must_use]
    pub fn version(&self) -> &str {
        self.source.version.as_deref().unwrap_or_default()
    }
}

/// Output of the handler stage: a catalog-ready record.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WriteResourceEvent {
    pub source: ComponentVersionEvent,
    pub timestamp: DateTime<Utc>,
    /// Classifier-specific payload; `None` for deleted component versions.
    pub payload: Option<ResourcePayload>,
}

/// Classifier-specific payload of a [`WriteResourceEvent`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase", tag = "kind")]
pub enum ResourcePayload {
    Helm(HelmResource),
}

/// Metadata extracted from a helm chart resource.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct HelmResource {
    pub name: String,
    pub version: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub app_version: Option<String>,
    /// Parsed default values (`values.yaml`).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub default_values: Option<serde_json::Value>,
    /// JSON schema for values (`values.schema.json`).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub schema: Option<serde_json::Value>,
    /// Digest of the chart resource as recorded in the descriptor.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub digest: Option<String>,
}

/// Error surfaced by any stage, observed separately from the data path.
///
/// Error events are always published non-blockingly and dropped when the
/// error channel is saturated.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ErrorEvent {
    pub error: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
    pub timestamp: DateTime<Utc>,
}

impl ErrorEvent {
    /// Wrap an error, stamped with the current time.
    pub fn new(error: impl std::fmt::Display) -> Self {
        Self {
            error: error.to_string(),
            message: None,
            timestamp: Utc::now(),
        }
    }

    /// Attach a contextual message.
    #[must_use]
    pub fn with_message(mut self, message: impl Into<String>) -> Self {
        self.message = Some(message.into());
        self
    }
}
