//! Webhook intake: an axum router dispatching `POST /webhook/<path>` to
//! provider-specific decoders.

pub mod zot;

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use axum::Router;
use axum::body::Bytes;
use axum::extract::{Path, State};
use axum::response::{IntoResponse, Response};
use axum::routing::post;
use http::StatusCode;
use parking_lot::RwLock;
use tokio::sync::mpsc;

use discovery_sdk::events::RepositoryEvent;
use discovery_sdk::registry::Registry;

/// Decodes one provider's notification bodies for one registry.
#[async_trait]
pub trait WebhookHandler: Send + Sync {
    async fn handle(&self, body: Bytes) -> Response;
}

/// Builds the handler for a registry once its path is registered.
pub type WebhookHandlerFactory =
    fn(Registry, mpsc::Sender<RepositoryEvent>) -> Arc<dyn WebhookHandler>;

#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum WebhookError {
    /// The registry has no webhook configuration.
    #[error("registry {0:?} has no webhook configuration")]
    NotConfigured(String),

    /// No decoder is registered for the requested flavor.
    #[error("unknown webhook flavor: {0}")]
    UnknownFlavor(String),

    /// Another registry already claimed the path on this router.
    #[error("webhook path already in use: {0}")]
    PathInUse(String),
}

/// The decoder table with all built-in flavors.
#[must_use]
pub fn builtin_factories() -> HashMap<String, WebhookHandlerFactory> {
    let mut factories: HashMap<String, WebhookHandlerFactory> = HashMap::new();
    factories.insert(zot::FLAVOR.to_owned(), zot::handler_factory);
    factories
}

/// Demultiplexes webhook POSTs onto per-registry provider handlers.
pub struct WebhookRouter {
    factories: HashMap<String, WebhookHandlerFactory>,
    paths: RwLock<HashMap<String, Arc<dyn WebhookHandler>>>,
    out: mpsc::Sender<RepositoryEvent>,
}

impl WebhookRouter {
    /// Router with the built-in decoder table.
    #[must_use]
    pub fn new(out: mpsc::Sender<RepositoryEvent>) -> Self {
        Self::with_factories(out, builtin_factories())
    }

    /// Router with an explicit decoder table.
    #[must_use]
    pub fn with_factories(
        out: mpsc::Sender<RepositoryEvent>,
        factories: HashMap<String, WebhookHandlerFactory>,
    ) -> Self {
        Self {
            factories,
            paths: RwLock::new(HashMap::new()),
            out,
        }
    }

    /// Claim the registry's webhook path and install its decoder.
    ///
    /// # Errors
    /// Returns [`WebhookError`] when the registry carries no webhook
    /// configuration, the flavor is unknown, or the path is already taken.
    pub fn register_path(&self, registry: &Registry) -> Result<(), WebhookError> {
        let webhook = registry
            .webhook
            .as_ref()
            .ok_or_else(|| WebhookError::NotConfigured(registry.name.clone()))?;

        let factory = self
            .factories
            .get(&webhook.flavor)
            .ok_or_else(|| WebhookError::UnknownFlavor(webhook.flavor.clone()))?;

        let path = webhook.path.trim_start_matches('/').to_owned();
        let mut paths = self.paths.write();
        if paths.contains_key(&path) {
            return Err(WebhookError::PathInUse(path));
        }

        let handler = factory(registry.clone(), self.out.clone());
        paths.insert(path.clone(), handler);
        tracing::info!(
            registry = %registry.name,
            flavor = %webhook.flavor,
            path = %format!("/webhook/{path}"),
            "webhook path registered"
        );
        Ok(())
    }

    /// The axum router serving `POST /webhook/<path>`.
    ///
    /// Unknown paths answer 404; non-POST methods answer 405.
    #[must_use]
    pub fn router(self: &Arc<Self>) -> Router {
        Router::new()
            .route("/webhook/{*path}", post(dispatch))
            .with_state(Arc::clone(self))
    }
}

async fn dispatch(
    State(router): State<Arc<WebhookRouter>>,
    Path(path): Path<String>,
    body: Bytes,
) -> Response {
    let handler = router.paths.read().get(&path).cloned();
    match handler {
        Some(handler) => handler.handle(body).await,
        None => (
            StatusCode::NOT_FOUND,
            axum::Json(serde_json::json!({ "error": "unknown webhook path" })),
        )
            .into_response(),
    }
}

#[cfg(test)]
mod tests {
    use discovery_sdk::registry::{DEFAULT_SCAN_INTERVAL, WebhookConfig};

    use super::*;

    fn registry(name: &str, path: &str, flavor: &str) -> Registry {
        Registry {
            name: name.into(),
            hostname: "127.0.0.1:5000".into(),
            plain_http: true,
            credentials: None,
            webhook: Some(WebhookConfig {
                path: path.into(),
                flavor: flavor.into(),
            }),
            scan_interval: DEFAULT_SCAN_INTERVAL,
        }
    }

    #[tokio::test]
    async fn register_path_requires_webhook_config() {
        let (out, _rx) = mpsc::channel(4);
        let router = WebhookRouter::new(out);
        let mut plain = registry("bare", "zot", zot::FLAVOR);
        plain.webhook = None;

        assert_eq!(
            router.register_path(&plain),
            Err(WebhookError::NotConfigured("bare".into()))
        );
    }

    #[tokio::test]
    async fn register_path_rejects_unknown_flavor() {
        let (out, _rx) = mpsc::channel(4);
        let router = WebhookRouter::new(out);

        assert_eq!(
            router.register_path(&registry("r", "hook", "harbor")),
            Err(WebhookError::UnknownFlavor("harbor".into()))
        );
    }

    #[tokio::test]
    async fn register_path_rejects_duplicate_path() {
        let (out, _rx) = mpsc::channel(4);
        let router = WebhookRouter::new(out);

        router.register_path(&registry("a", "zot", zot::FLAVOR)).unwrap();
        assert_eq!(
            router.register_path(&registry("b", "/zot", zot::FLAVOR)),
            Err(WebhookError::PathInUse("zot".into()))
        );
    }
}
