//! Filter stage: drops component versions the catalog already knows.

use std::sync::Arc;

use anyhow::Context;
use async_trait::async_trait;

use discovery_sdk::catalog::CatalogStore;
use discovery_sdk::error::CatalogError;
use discovery_sdk::events::ComponentVersionEvent;
use discovery_sdk::naming::sanitize_with_hash;

use crate::runner::{Processor, StageContext};

pub struct Filter {
    catalog: Arc<dyn CatalogStore>,
    namespace: String,
}

impl Filter {
    pub fn new(catalog: Arc<dyn CatalogStore>, namespace: impl Into<String>) -> Self {
        Self {
            catalog,
            namespace: namespace.into(),
        }
    }

    /// Record name a component version is keyed by in the catalog.
    #[must_use]
    pub fn record_name(event: &ComponentVersionEvent) -> String {
        sanitize_with_hash(&format!("{}-{}", event.component, event.version()))
    }
}

#[async_trait]
impl Processor for Filter {
    type Input = ComponentVersionEvent;
    type Output = ComponentVersionEvent;

    const NAME: &'static str = "filter";

    async fn process(
        &self,
        _cx: &StageContext,
        event: ComponentVersionEvent,
    ) -> anyhow::Result<Option<Vec<ComponentVersionEvent>>> {
        let name = Self::record_name(&event);
        match self.catalog.get(&self.namespace, &name).await {
            Ok(_) => {
                tracing::debug!(record = %name, "catalog record exists, dropping event");
                Ok(None)
            }
            Err(CatalogError::NotFound) => Ok(Some(vec![event])),
            Err(err) => Err(err).with_context(|| format!("catalog lookup for {name:?} failed")),
        }
    }
}

#[cfg(test)]
mod tests {
    use chrono::Utc;
    use tokio_util::sync::CancellationToken;

    use discovery_sdk::catalog::CatalogRecord;
    use discovery_sdk::events::{EventType, RepositoryEvent};

    use crate::infra::memory_catalog::MemoryCatalog;
    use crate::test_support::FailingCatalogStore;

    use super::*;

    fn cx() -> StageContext {
        StageContext {
            cancel: CancellationToken::new(),
            backoff: None,
        }
    }

    fn event(component: &str, version: &str) -> ComponentVersionEvent {
        ComponentVersionEvent {
            source: RepositoryEvent {
                registry: "test".into(),
                repository: format!("test/component-descriptors/{component}"),
                version: Some(version.into()),
                event_type: EventType::Created,
                timestamp: Utc::now(),
            },
            namespace: "test".into(),
            component: component.into(),
        }
    }

    #[tokio::test]
    async fn known_version_is_dropped() {
        let catalog = Arc::new(MemoryCatalog::new());
        let event = event("ocm.software/toi/demo/helmdemo", "0.12.0");
        let name = Filter::record_name(&event);
        assert_eq!(name, "ocm-software-toi-demo-helmdemo-0-12-0");

        catalog
            .create(
                "default",
                CatalogRecord {
                    name,
                    component: event.component.clone(),
                    version: "0.12.0".into(),
                    payload: None,
                },
            )
            .await
            .unwrap();

        let filter = Filter::new(catalog, "default");
        assert!(filter.process(&cx(), event).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn unknown_version_passes_through_unchanged() {
        let filter = Filter::new(Arc::new(MemoryCatalog::new()), "default");
        let input = event("acme/app", "1.0.0");

        let outputs = filter.process(&cx(), input.clone()).await.unwrap().unwrap();
        assert_eq!(outputs, vec![input]);
    }

    #[tokio::test]
    async fn store_failure_becomes_stage_error() {
        let filter = Filter::new(Arc::new(FailingCatalogStore), "default");

        let err = filter
            .process(&cx(), event("acme/app", "1.0.0"))
            .await
            .unwrap_err();
        assert!(format!("{err:#}").contains("catalog lookup"));
    }
}
