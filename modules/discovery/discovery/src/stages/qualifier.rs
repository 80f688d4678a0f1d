//! Qualifier stage: expands a repository-level event into component
//! version events.

use std::sync::Arc;

use anyhow::Context;
use async_trait::async_trait;

use discovery_sdk::events::{ComponentVersionEvent, EventType, RepositoryEvent};
use discovery_sdk::naming::split_repository;
use discovery_sdk::ocm::{COMPONENT_DESCRIPTOR_SEPARATOR, OcmClient};

use crate::provider::RegistryProvider;
use crate::runner::{Processor, StageContext};

pub struct Qualifier {
    provider: Arc<RegistryProvider>,
    ocm: Arc<dyn OcmClient>,
}

impl Qualifier {
    pub fn new(provider: Arc<RegistryProvider>, ocm: Arc<dyn OcmClient>) -> Self {
        Self { provider, ocm }
    }
}

#[async_trait]
impl Processor for Qualifier {
    type Input = RepositoryEvent;
    type Output = ComponentVersionEvent;

    const NAME: &'static str = "qualifier";

    async fn process(
        &self,
        _cx: &StageContext,
        event: RepositoryEvent,
    ) -> anyhow::Result<Option<Vec<ComponentVersionEvent>>> {
        let (namespace, component) =
            split_repository(&event.repository, COMPONENT_DESCRIPTOR_SEPARATOR)?;
        let namespace = namespace.to_owned();
        let component = component.to_owned();

        // Deletions and pinned versions pass through as a single event; only
        // bare repository events require a version listing.
        if event.event_type == EventType::Deleted
            || event.version.as_deref().is_some_and(|v| !v.is_empty())
        {
            return Ok(Some(vec![ComponentVersionEvent {
                source: event,
                namespace,
                component,
            }]));
        }

        let registry = self
            .provider
            .get(&event.registry)
            .with_context(|| format!("registry {:?} is not registered", event.registry))?;

        let repository = self
            .ocm
            .open(&registry, &namespace)
            .await
            .with_context(|| format!("failed to open OCM repository {:?}", namespace))?;
        let versions = repository
            .list_versions(&component)
            .await
            .with_context(|| format!("failed to list versions of {component:?}"))?;

        tracing::debug!(
            component = %component,
            versions = versions.len(),
            "expanded bare repository event"
        );

        Ok(Some(
            versions
                .into_iter()
                .map(|version| ComponentVersionEvent {
                    source: RepositoryEvent {
                        version: Some(version),
                        ..event.clone()
                    },
                    namespace: namespace.clone(),
                    component: component.clone(),
                })
                .collect(),
        ))
    }
}
