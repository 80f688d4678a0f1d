//! Periodic registry catalog scanner.

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use discovery_sdk::events::{ErrorEvent, EventType, RepositoryEvent};
use discovery_sdk::naming::split_repository;
use discovery_sdk::ocm::{COMPONENT_DESCRIPTOR_SEPARATOR, OciCatalog};
use discovery_sdk::registry::Registry;

use crate::runner::try_publish;

/// Default interval between two scans when none is configured.
pub const DEFAULT_SCAN_INTERVAL: Duration = Duration::from_secs(30);

/// Periodically enumerates one registry's repository catalog and publishes
/// a `Created` event for every OCM component repository it finds.
pub struct Scanner {
    registry: Registry,
    catalog: Arc<dyn OciCatalog>,
    out: mpsc::Sender<RepositoryEvent>,
    errors: mpsc::Sender<ErrorEvent>,
    interval: Duration,
    scan_lock: Arc<tokio::sync::Mutex<()>>,
    stop: CancellationToken,
    worker: tokio::sync::Mutex<Option<JoinHandle<()>>>,
}

impl Scanner {
    pub fn new(
        registry: Registry,
        catalog: Arc<dyn OciCatalog>,
        out: mpsc::Sender<RepositoryEvent>,
        errors: mpsc::Sender<ErrorEvent>,
    ) -> Self {
        Self {
            registry,
            catalog,
            out,
            errors,
            interval: DEFAULT_SCAN_INTERVAL,
            scan_lock: Arc::new(tokio::sync::Mutex::new(())),
            stop: CancellationToken::new(),
            worker: tokio::sync::Mutex::new(None),
        }
    }

    /// Override the scan interval (defaults to [`DEFAULT_SCAN_INTERVAL`]).
    #[must_use]
    pub fn with_scan_interval(mut self, interval: Duration) -> Self {
        self.interval = interval;
        self
    }

    /// Launch the scan loop: one scan immediately, then one per interval.
    ///
    /// Scans never overlap for the same registry - a tick arriving while a
    /// scan is still in flight is skipped, not queued. Starting twice is a
    /// no-op.
    pub async fn start(&self, cancel: &CancellationToken) {
        let mut worker = self.worker.lock().await;
        if worker.is_some() {
            tracing::warn!(registry = %self.registry.name, "scanner already started");
            return;
        }

        let registry = self.registry.clone();
        let catalog = Arc::clone(&self.catalog);
        let out = self.out.clone();
        let errors = self.errors.clone();
        let interval = self.interval;
        let scan_lock = Arc::clone(&self.scan_lock);
        let cancel = cancel.clone();
        let stop = self.stop.clone();

        *worker = Some(tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

            loop {
                tokio::select! {
                    () = cancel.cancelled() => break,
                    () = stop.cancelled() => break,
                    // The first tick fires immediately.
                    _ = ticker.tick() => {
                        trigger_scan(&registry, &catalog, &out, &errors, &scan_lock, &cancel);
                    }
                }
            }
            tracing::debug!(registry = %registry.name, "scanner loop exited");
        }));
        tracing::info!(registry = %self.registry.name, interval = ?self.interval, "scanner started");
    }

    /// Signal the loop and wait for it to return. Idempotent; calling stop
    /// without start (or after cancellation) is a no-op.
    pub async fn stop(&self) {
        self.stop.cancel();
        let handle = self.worker.lock().await.take();
        match handle {
            Some(handle) => {
                if let Err(err) = handle.await {
                    tracing::warn!(registry = %self.registry.name, error = %err, "scanner worker failed");
                }
                tracing::info!(registry = %self.registry.name, "stopped");
            }
            None => tracing::debug!(registry = %self.registry.name, "stop without running scanner"),
        }
    }
}

/// Begin a scan unless one is already running for this registry.
fn trigger_scan(
    registry: &Registry,
    catalog: &Arc<dyn OciCatalog>,
    out: &mpsc::Sender<RepositoryEvent>,
    errors: &mpsc::Sender<ErrorEvent>,
    scan_lock: &Arc<tokio::sync::Mutex<()>>,
    cancel: &CancellationToken,
) {
    let Ok(guard) = Arc::clone(scan_lock).try_lock_owned() else {
        tracing::debug!(registry = %registry.name, "scan already in progress, skipping tick");
        return;
    };

    let registry = registry.clone();
    let catalog = Arc::clone(catalog);
    let out = out.clone();
    let errors = errors.clone();
    let cancel = cancel.clone();

    tokio::spawn(async move {
        tokio::select! {
            () = cancel.cancelled() => {
                tracing::debug!(registry = %registry.name, "scan cancelled");
            }
            () = scan(&registry, catalog.as_ref(), &out, &errors) => {}
        }
        drop(guard);
    });
}

/// One catalog enumeration pass.
async fn scan(
    registry: &Registry,
    catalog: &dyn OciCatalog,
    out: &mpsc::Sender<RepositoryEvent>,
    errors: &mpsc::Sender<ErrorEvent>,
) {
    tracing::debug!(registry = %registry.name, "scanning repository catalog");

    let repositories = match catalog.list_repositories(registry).await {
        Ok(repositories) => repositories,
        Err(err) => {
            tracing::warn!(registry = %registry.name, error = %err, "catalog listing failed");
            try_publish(
                errors,
                ErrorEvent::new(err)
                    .with_message(format!("failed to list repositories of {}", registry.name)),
                "scanner",
                "errors",
            );
            return;
        }
    };

    let mut published = 0usize;
    for repository in repositories {
        if split_repository(&repository, COMPONENT_DESCRIPTOR_SEPARATOR).is_err() {
            tracing::debug!(registry = %registry.name, repository = %repository, "not a component repository, skipping");
            continue;
        }
        try_publish(
            out,
            RepositoryEvent {
                registry: registry.name.clone(),
                repository,
                version: None,
                event_type: EventType::Created,
                timestamp: Utc::now(),
            },
            "scanner",
            "output",
        );
        published += 1;
    }
    tracing::debug!(registry = %registry.name, published, "scan finished");
}
