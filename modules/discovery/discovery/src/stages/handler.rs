//! Handler stage: fetches the component descriptor, classifies the
//! component, and dispatches to the matching typed sub-handler.

use std::collections::HashMap;
use std::sync::Arc;

use anyhow::{Context, bail};
use async_trait::async_trait;
use chrono::Utc;

use discovery_sdk::events::{ComponentVersionEvent, EventType, WriteResourceEvent};
use discovery_sdk::ocm::{
    ComponentVersion, OcmClient, OcmRepository, RESOURCE_TYPE_HELM_CHART,
};

use crate::provider::RegistryProvider;
use crate::retry::retry_with_backoff;
use crate::runner::{Processor, StageContext};
use crate::stages::helm;

/// Builds a sub-handler instance on first use.
pub type SubHandlerFactory = fn() -> Arc<dyn SubHandler>;

/// A typed sub-handler producing the catalog-ready record for one class of
/// component.
#[async_trait]
pub trait SubHandler: Send + Sync {
    async fn process(
        &self,
        cx: &StageContext,
        event: &ComponentVersionEvent,
        version: &ComponentVersion,
        repository: &dyn OcmRepository,
    ) -> anyhow::Result<WriteResourceEvent>;
}

/// The sub-handler table with all built-in classifiers.
#[must_use]
pub fn builtin_sub_handlers() -> HashMap<&'static str, SubHandlerFactory> {
    let mut handlers: HashMap<&'static str, SubHandlerFactory> = HashMap::new();
    handlers.insert(helm::HANDLER_TYPE, helm::new_sub_handler);
    handlers
}

pub struct Handler {
    provider: Arc<RegistryProvider>,
    ocm: Arc<dyn OcmClient>,
    factories: HashMap<&'static str, SubHandlerFactory>,
    /// One lazily built instance per handler type.
    instances: parking_lot::Mutex<HashMap<&'static str, Arc<dyn SubHandler>>>,
}

impl Handler {
    pub fn new(
        provider: Arc<RegistryProvider>,
        ocm: Arc<dyn OcmClient>,
        factories: HashMap<&'static str, SubHandlerFactory>,
    ) -> Self {
        Self {
            provider,
            ocm,
            factories,
            instances: parking_lot::Mutex::new(HashMap::new()),
        }
    }

    fn sub_handler(&self, handler_type: &'static str) -> Option<Arc<dyn SubHandler>> {
        let mut instances = self.instances.lock();
        if let Some(handler) = instances.get(handler_type) {
            return Some(Arc::clone(handler));
        }
        let factory = self.factories.get(handler_type)?;
        let handler = factory();
        instances.insert(handler_type, Arc::clone(&handler));
        tracing::debug!(handler_type, "sub-handler materialized");
        Some(handler)
    }
}

#[async_trait]
impl Processor for Handler {
    type Input = ComponentVersionEvent;
    type Output = WriteResourceEvent;

    const NAME: &'static str = "handler";

    async fn process(
        &self,
        cx: &StageContext,
        event: ComponentVersionEvent,
    ) -> anyhow::Result<Option<Vec<WriteResourceEvent>>> {
        // Deletions carry no payload and need no remote access.
        if event.source.event_type == EventType::Deleted {
            return Ok(Some(vec![WriteResourceEvent {
                source: event,
                timestamp: Utc::now(),
                payload: None,
            }]));
        }

        let registry = self
            .provider
            .get(&event.source.registry)
            .with_context(|| format!("registry {:?} is not registered", event.source.registry))?;

        let repository = self
            .ocm
            .open(&registry, &event.namespace)
            .await
            .with_context(|| format!("failed to open OCM repository {:?}", event.namespace))?;

        let version = event.version().to_owned();
        let mut lookup = || repository.lookup_version(&event.component, &version);
        let component_version = match cx.backoff {
            Some(policy) => retry_with_backoff(policy, &cx.cancel, lookup).await,
            None => lookup().await,
        }
        .with_context(|| format!("failed to look up {}:{version}", event.component))?;

        let chart_count = component_version
            .resources_of_type(RESOURCE_TYPE_HELM_CHART)
            .count();
        if chart_count != 1 {
            bail!(
                "no handler found for event: {}:{version} has {chart_count} helm chart resources",
                event.component
            );
        }

        let sub_handler = self
            .sub_handler(helm::HANDLER_TYPE)
            .context("helm sub-handler is not registered")?;
        let record = sub_handler
            .process(cx, &event, &component_version, repository.as_ref())
            .await?;
        Ok(Some(vec![record]))
    }
}

#[cfg(test)]
mod tests {
    use chrono::Utc;
    use tokio_util::sync::CancellationToken;

    use discovery_sdk::events::{RepositoryEvent, ResourcePayload};
    use discovery_sdk::ocm::Resource;
    use discovery_sdk::registry::{DEFAULT_SCAN_INTERVAL, Registry};

    use crate::test_support::{MockOcm, chart_archive};

    use super::*;

    fn provider() -> Arc<RegistryProvider> {
        let provider = RegistryProvider::new();
        provider
            .register([Registry {
                name: "test".into(),
                hostname: "127.0.0.1:5000".into(),
                plain_http: true,
                credentials: None,
                webhook: None,
                scan_interval: DEFAULT_SCAN_INTERVAL,
            }])
            .unwrap();
        Arc::new(provider)
    }

    fn cx() -> StageContext {
        StageContext {
            cancel: CancellationToken::new(),
            backoff: None,
        }
    }

    fn event(component: &str, version: &str, event_type: EventType) -> ComponentVersionEvent {
        ComponentVersionEvent {
            source: RepositoryEvent {
                registry: "test".into(),
                repository: format!("test/component-descriptors/{component}"),
                version: Some(version.into()),
                event_type,
                timestamp: Utc::now(),
            },
            namespace: "test".into(),
            component: component.into(),
        }
    }

    fn chart_resource(name: &str) -> Resource {
        Resource {
            name: name.into(),
            resource_type: RESOURCE_TYPE_HELM_CHART.into(),
            version: Some("0.1.0".into()),
            digest: Some("sha256:cafe".into()),
            local_reference: Some("sha256:cafe".into()),
        }
    }

    #[tokio::test]
    async fn deleted_event_short_circuits() {
        // No versions, no blobs: any remote access would fail loudly.
        let handler = Handler::new(provider(), Arc::new(MockOcm::new()), builtin_sub_handlers());

        let outputs = handler
            .process(&cx(), event("acme/app", "1.0.0", EventType::Deleted))
            .await
            .unwrap()
            .unwrap();

        assert_eq!(outputs.len(), 1);
        assert!(outputs[0].payload.is_none());
    }

    #[tokio::test]
    async fn single_chart_component_gets_helm_payload() {
        let chart = chart_archive("echoserver", "0.1.0", Some("1.10"), None);
        let ocm = MockOcm::new()
            .with_component_version(
                "acme/app",
                "1.0.0",
                vec![chart_resource("chart")],
            )
            .with_blob("sha256:cafe", chart);
        let handler = Handler::new(provider(), Arc::new(ocm), builtin_sub_handlers());

        let outputs = handler
            .process(&cx(), event("acme/app", "1.0.0", EventType::Created))
            .await
            .unwrap()
            .unwrap();

        assert_eq!(outputs.len(), 1);
        let Some(ResourcePayload::Helm(helm)) = &outputs[0].payload else {
            panic!("expected helm payload, got {:?}", outputs[0].payload);
        };
        assert_eq!(helm.name, "echoserver");
        assert_eq!(helm.version, "0.1.0");
        assert_eq!(helm.digest.as_deref(), Some("sha256:cafe"));
    }

    #[tokio::test]
    async fn component_without_chart_has_no_handler() {
        let ocm = MockOcm::new().with_component_version(
            "acme/app",
            "1.0.0",
            vec![Resource {
                name: "image".into(),
                resource_type: "ociImage".into(),
                ..Resource::default()
            }],
        );
        let handler = Handler::new(provider(), Arc::new(ocm), builtin_sub_handlers());

        let err = handler
            .process(&cx(), event("acme/app", "1.0.0", EventType::Created))
            .await
            .unwrap_err();
        assert!(format!("{err:#}").contains("no handler found for event"));
    }

    #[tokio::test]
    async fn component_with_two_charts_has_no_handler() {
        let ocm = MockOcm::new().with_component_version(
            "acme/app",
            "1.0.0",
            vec![chart_resource("chart-a"), chart_resource("chart-b")],
        );
        let handler = Handler::new(provider(), Arc::new(ocm), builtin_sub_handlers());

        let err = handler
            .process(&cx(), event("acme/app", "1.0.0", EventType::Created))
            .await
            .unwrap_err();
        assert!(format!("{err:#}").contains("no handler found for event"));
    }

    #[tokio::test]
    async fn transient_lookup_errors_are_retried_under_backoff() {
        let chart = chart_archive("echoserver", "0.1.0", None, None);
        let ocm = MockOcm::new()
            .with_component_version("acme/app", "1.0.0", vec![chart_resource("chart")])
            .with_blob("sha256:cafe", chart)
            .failing_lookups(2, "connection refused");
        let handler = Handler::new(provider(), Arc::new(ocm), builtin_sub_handlers());

        let cx = StageContext {
            cancel: CancellationToken::new(),
            backoff: Some(crate::retry::BackoffPolicy {
                initial_interval: std::time::Duration::from_millis(1),
                max_interval: std::time::Duration::from_millis(5),
                max_elapsed_time: std::time::Duration::from_secs(5),
            }),
        };

        let outputs = handler
            .process(&cx, event("acme/app", "1.0.0", EventType::Created))
            .await
            .unwrap()
            .unwrap();
        assert_eq!(outputs.len(), 1);
    }

    #[tokio::test]
    async fn permanent_lookup_errors_are_not_retried() {
        let ocm = MockOcm::new().failing_lookups(u32::MAX, "unauthorized");
        let handler = Handler::new(provider(), Arc::new(ocm), builtin_sub_handlers());

        let cx = StageContext {
            cancel: CancellationToken::new(),
            backoff: Some(crate::retry::BackoffPolicy::default()),
        };

        let err = handler
            .process(&cx, event("acme/app", "1.0.0", EventType::Created))
            .await
            .unwrap_err();
        assert!(format!("{err:#}").contains("failed to look up"));
    }
}
