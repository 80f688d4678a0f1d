//! Webhook decoder for the zot registry's CloudEvents notifications.

use std::sync::Arc;

use async_trait::async_trait;
use axum::Json;
use axum::body::Bytes;
use axum::response::{IntoResponse, Response};
use chrono::{DateTime, Utc};
use http::StatusCode;
use serde::Deserialize;
use serde_json::json;
use tokio::sync::mpsc;

use discovery_sdk::events::{EventType, RepositoryEvent};
use discovery_sdk::registry::Registry;

use super::WebhookHandler;
use crate::runner::try_publish;

/// Flavor identifier selecting this decoder.
pub const FLAVOR: &str = "zot";

const EVENT_IMAGE_UPDATED: &str = "zotregistry.image.updated";
const EVENT_IMAGE_DELETED: &str = "zotregistry.image.deleted";
const EVENT_IMAGE_LINT_FAILED: &str = "zotregistry.image.lint_failed";
const EVENT_REPOSITORY_CREATED: &str = "zotregistry.repository.created";

/// CloudEvents 1.0 envelope, reduced to the attributes this decoder reads.
#[derive(Debug, Deserialize)]
struct CloudEvent {
    #[serde(rename = "type")]
    event_type: String,
    #[serde(default)]
    time: Option<DateTime<Utc>>,
    #[serde(default)]
    data: Option<serde_json::Value>,
}

/// Manifest-change body zot puts into the CloudEvent `data` attribute.
#[derive(Debug, Deserialize)]
struct ManifestBody {
    name: String,
    #[serde(default)]
    reference: Option<String>,
}

pub(super) fn handler_factory(
    registry: Registry,
    out: mpsc::Sender<RepositoryEvent>,
) -> Arc<dyn WebhookHandler> {
    Arc::new(ZotWebhook {
        registry: registry.name,
        out,
    })
}

/// Decodes zot notifications for one configured registry.
struct ZotWebhook {
    registry: String,
    out: mpsc::Sender<RepositoryEvent>,
}

#[async_trait]
impl WebhookHandler for ZotWebhook {
    async fn handle(&self, body: Bytes) -> Response {
        let envelope: CloudEvent = match serde_json::from_slice(&body) {
            Ok(envelope) => envelope,
            Err(err) => {
                tracing::debug!(registry = %self.registry, error = %err, "malformed cloud event envelope");
                return bad_request("malformed cloud event envelope");
            }
        };

        let event_type = match envelope.event_type.as_str() {
            EVENT_IMAGE_UPDATED => EventType::Updated,
            EVENT_IMAGE_DELETED => EventType::Deleted,
            EVENT_REPOSITORY_CREATED => EventType::Created,
            EVENT_IMAGE_LINT_FAILED => {
                tracing::debug!(registry = %self.registry, "ignoring lint_failed notification");
                return ignored();
            }
            other => {
                tracing::info!(registry = %self.registry, event_type = other, "ignoring unknown cloud event type");
                return ignored();
            }
        };

        let Some(data) = envelope.data else {
            return bad_request("cloud event has no data attribute");
        };
        let manifest: ManifestBody = match serde_json::from_value(data) {
            Ok(manifest) => manifest,
            Err(err) => {
                tracing::debug!(registry = %self.registry, error = %err, "malformed manifest body");
                return bad_request("malformed manifest body");
            }
        };

        let event = RepositoryEvent {
            registry: self.registry.clone(),
            repository: manifest.name.clone(),
            version: manifest.reference.clone(),
            event_type,
            timestamp: envelope.time.unwrap_or_else(Utc::now),
        };
        tracing::debug!(
            registry = %self.registry,
            repository = %event.repository,
            reference = event.version.as_deref().unwrap_or(""),
            ?event_type,
            "webhook notification accepted"
        );
        try_publish(&self.out, event, "webhook", "output");

        (
            StatusCode::OK,
            Json(json!({
                "status": "ok",
                "repository": manifest.name,
                "reference": manifest.reference,
            })),
        )
            .into_response()
    }
}

fn bad_request(message: &str) -> Response {
    (StatusCode::BAD_REQUEST, Json(json!({ "error": message }))).into_response()
}

fn ignored() -> Response {
    (StatusCode::OK, Json(json!({ "status": "ignored" }))).into_response()
}
