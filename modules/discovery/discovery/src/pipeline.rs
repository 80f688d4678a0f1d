//! Pipeline assembly: channel wiring, lifecycle, and the catalog sink.

use std::sync::Arc;

use anyhow::{Context, Result};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use discovery_sdk::catalog::{CatalogRecord, CatalogStore};
use discovery_sdk::error::CatalogError;
use discovery_sdk::events::{ErrorEvent, EventType, WriteResourceEvent};
use discovery_sdk::ocm::{OciCatalog, OcmClient};

use crate::config::AppConfig;
use crate::provider::RegistryProvider;
use crate::runner::{StageOptions, StageRunner};
use crate::scanner::Scanner;
use crate::stages::{Filter, Handler, Qualifier, builtin_sub_handlers};
use crate::webhook::WebhookRouter;

/// External capabilities the pipeline is wired against.
pub struct PipelineDeps {
    pub oci: Arc<dyn OciCatalog>,
    pub ocm: Arc<dyn OcmClient>,
    pub catalog: Arc<dyn CatalogStore>,
}

/// The assembled discovery pipeline.
///
/// Owns one scanner per registry, the webhook router, the three stage
/// runners, the error observer, and the catalog record sink.
pub struct Pipeline {
    webhook: Arc<WebhookRouter>,
    scanners: Vec<Scanner>,
    qualifier: StageRunner<Qualifier>,
    filter: StageRunner<Filter>,
    handler: StageRunner<Handler>,
    records: parking_lot::Mutex<Option<mpsc::Receiver<WriteResourceEvent>>>,
    errors: parking_lot::Mutex<Option<mpsc::Receiver<ErrorEvent>>>,
    catalog: Arc<dyn CatalogStore>,
    namespace: String,
    stop: CancellationToken,
    tasks: tokio::sync::Mutex<Vec<JoinHandle<()>>>,
}

impl Pipeline {
    /// Wire channels, stages, scanners, and webhook paths from the
    /// configuration.
    ///
    /// # Errors
    /// Returns an error when a webhook path cannot be registered (unknown
    /// flavor, duplicate path) - a configuration failure that aborts
    /// startup.
    pub fn build(
        config: &AppConfig,
        provider: Arc<RegistryProvider>,
        deps: PipelineDeps,
    ) -> Result<Self> {
        let capacity = config.pipeline.channel_capacity.max(1);
        let (repo_tx, repo_rx) = mpsc::channel(capacity);
        let (version_tx, version_rx) = mpsc::channel(capacity);
        let (filtered_tx, filtered_rx) = mpsc::channel(capacity);
        let (record_tx, record_rx) = mpsc::channel(capacity);
        let (error_tx, error_rx) = mpsc::channel(capacity);

        let options = StageOptions {
            rate_limit: config.pipeline.rate_limit.as_ref().map(Into::into),
            backoff: config.pipeline.backoff.as_ref().map(Into::into),
        };

        let webhook = Arc::new(WebhookRouter::new(repo_tx.clone()));
        for registry in provider.get_all() {
            if registry.webhook.is_some() {
                webhook.register_path(&registry).with_context(|| {
                    format!("failed to register webhook for registry {:?}", registry.name)
                })?;
            }
        }

        let scanners = provider
            .get_all()
            .into_iter()
            .map(|registry| {
                let interval = registry.scan_interval;
                Scanner::new(
                    registry,
                    Arc::clone(&deps.oci),
                    repo_tx.clone(),
                    error_tx.clone(),
                )
                .with_scan_interval(interval)
            })
            .collect();

        let qualifier = StageRunner::new(
            Qualifier::new(Arc::clone(&provider), Arc::clone(&deps.ocm)),
            repo_rx,
            version_tx,
            error_tx.clone(),
            options,
        );
        let filter = StageRunner::new(
            Filter::new(Arc::clone(&deps.catalog), &config.catalog.namespace),
            version_rx,
            filtered_tx,
            error_tx.clone(),
            options,
        );
        let handler = StageRunner::new(
            Handler::new(provider, Arc::clone(&deps.ocm), builtin_sub_handlers()),
            filtered_rx,
            record_tx,
            error_tx,
            options,
        );

        Ok(Self {
            webhook,
            scanners,
            qualifier,
            filter,
            handler,
            records: parking_lot::Mutex::new(Some(record_rx)),
            errors: parking_lot::Mutex::new(Some(error_rx)),
            catalog: deps.catalog,
            namespace: config.catalog.namespace.clone(),
            stop: CancellationToken::new(),
            tasks: tokio::sync::Mutex::new(Vec::new()),
        })
    }

    /// The HTTP router exposing `POST /webhook/<path>`.
    #[must_use]
    pub fn webhook_router(&self) -> axum::Router {
        self.webhook.router()
    }

    /// Start every worker: sink and error observer first, then the stages
    /// downstream-to-upstream, then the scanners.
    pub async fn start(&self, cancel: &CancellationToken) {
        let mut tasks = self.tasks.lock().await;
        if let Some(errors) = self.errors.lock().take() {
            tasks.push(tokio::spawn(observe_errors(
                errors,
                cancel.clone(),
                self.stop.clone(),
            )));
        }
        if let Some(records) = self.records.lock().take() {
            tasks.push(tokio::spawn(sink_records(
                records,
                Arc::clone(&self.catalog),
                self.namespace.clone(),
                cancel.clone(),
                self.stop.clone(),
            )));
        }
        drop(tasks);

        self.handler.start(cancel).await;
        self.filter.start(cancel).await;
        self.qualifier.start(cancel).await;
        for scanner in &self.scanners {
            scanner.start(cancel).await;
        }
        tracing::info!(scanners = self.scanners.len(), "pipeline started");
    }

    /// Stop everything in reverse start order. Idempotent.
    pub async fn stop(&self) {
        for scanner in &self.scanners {
            scanner.stop().await;
        }
        self.qualifier.stop().await;
        self.filter.stop().await;
        self.handler.stop().await;

        self.stop.cancel();
        let tasks = std::mem::take(&mut *self.tasks.lock().await);
        for task in tasks {
            if let Err(err) = task.await {
                tracing::warn!(error = %err, "pipeline task failed");
            }
        }
        tracing::info!("pipeline stopped");
    }

    /// Run until the token is cancelled, then shut down gracefully.
    pub async fn run(&self, cancel: CancellationToken) {
        self.start(&cancel).await;
        cancel.cancelled().await;
        self.stop().await;
    }
}

/// Logs every error event the stages publish.
async fn observe_errors(
    mut errors: mpsc::Receiver<ErrorEvent>,
    cancel: CancellationToken,
    stop: CancellationToken,
) {
    loop {
        let event = tokio::select! {
            () = cancel.cancelled() => break,
            () = stop.cancelled() => break,
            event = errors.recv() => match event {
                Some(event) => event,
                None => break,
            },
        };
        tracing::warn!(
            error = %event.error,
            message = event.message.as_deref().unwrap_or(""),
            timestamp = %event.timestamp,
            "pipeline error event"
        );
    }
}

/// Upserts one catalog record per handled component version.
async fn sink_records(
    mut records: mpsc::Receiver<WriteResourceEvent>,
    catalog: Arc<dyn CatalogStore>,
    namespace: String,
    cancel: CancellationToken,
    stop: CancellationToken,
) {
    loop {
        let event = tokio::select! {
            () = cancel.cancelled() => break,
            () = stop.cancelled() => break,
            event = records.recv() => match event {
                Some(event) => event,
                None => break,
            },
        };

        // The catalog capability has no delete; garbage collection is out
        // of scope, so deletions are only observed.
        if event.source.source.event_type == EventType::Deleted {
            tracing::debug!(
                component = %event.source.component,
                version = event.source.version(),
                "component version deleted upstream, record kept"
            );
            continue;
        }

        let name = Filter::record_name(&event.source);
        let record = CatalogRecord {
            name: name.clone(),
            component: event.source.component.clone(),
            version: event.source.version().to_owned(),
            payload: event.payload.clone(),
        };

        let result = match catalog.get(&namespace, &name).await {
            Ok(_) => catalog.update(&namespace, record).await,
            Err(CatalogError::NotFound) => catalog.create(&namespace, record).await,
            Err(err) => Err(err),
        };
        match result {
            Ok(()) => tracing::info!(
                record = %name,
                component = %event.source.component,
                version = event.source.version(),
                "catalog record written"
            ),
            Err(err) => tracing::warn!(record = %name, error = %err, "catalog write failed"),
        }
    }
}
