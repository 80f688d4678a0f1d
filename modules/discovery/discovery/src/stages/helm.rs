//! Helm sub-handler: extracts chart metadata from the component's helm
//! chart resource.

use std::io::Read;
use std::sync::Arc;

use anyhow::{Context, Result, bail};
use async_trait::async_trait;
use chrono::Utc;
use flate2::read::GzDecoder;
use serde::Deserialize;
use tar::Archive;

use discovery_sdk::events::{
    ComponentVersionEvent, HelmResource, ResourcePayload, WriteResourceEvent,
};
use discovery_sdk::ocm::{ComponentVersion, OcmRepository, RESOURCE_TYPE_HELM_CHART};

use crate::runner::StageContext;
use crate::stages::handler::SubHandler;

/// Handler type key in the sub-handler table.
pub const HANDLER_TYPE: &str = "helm";

pub(crate) fn new_sub_handler() -> Arc<dyn SubHandler> {
    Arc::new(HelmSubHandler)
}

struct HelmSubHandler;

#[async_trait]
impl SubHandler for HelmSubHandler {
    async fn process(
        &self,
        _cx: &StageContext,
        event: &ComponentVersionEvent,
        version: &ComponentVersion,
        repository: &dyn OcmRepository,
    ) -> Result<WriteResourceEvent> {
        let resource = version
            .resources_of_type(RESOURCE_TYPE_HELM_CHART)
            .next()
            .with_context(|| {
                format!("component version {}:{} has no helm chart resource", version.name, version.version)
            })?;

        let blob = repository
            .download_resource(&event.component, resource)
            .await
            .with_context(|| format!("failed to download chart resource {:?}", resource.name))?;

        let chart = ChartArchive::parse(&blob)
            .with_context(|| format!("failed to load helm chart archive {:?}", resource.name))?;

        tracing::debug!(
            chart = %chart.metadata.name,
            chart_version = %chart.metadata.version,
            component = %event.component,
            "extracted helm chart metadata"
        );

        Ok(WriteResourceEvent {
            source: event.clone(),
            timestamp: Utc::now(),
            payload: Some(ResourcePayload::Helm(HelmResource {
                name: chart.metadata.name,
                version: chart.metadata.version,
                description: chart.metadata.description,
                app_version: chart.metadata.app_version,
                default_values: chart.values,
                schema: chart.schema,
                digest: resource.digest.clone(),
            })),
        })
    }
}

/// `Chart.yaml` fields the catalog record carries.
#[derive(Debug, Deserialize)]
struct ChartMetadata {
    name: String,
    version: String,
    #[serde(default)]
    description: Option<String>,
    #[serde(default, rename = "appVersion")]
    app_version: Option<String>,
}

/// An in-memory helm chart archive (`<chart>/Chart.yaml` inside a gzipped
/// tar).
#[derive(Debug)]
struct ChartArchive {
    metadata: ChartMetadata,
    values: Option<serde_json::Value>,
    schema: Option<serde_json::Value>,
}

impl ChartArchive {
    fn parse(blob: &[u8]) -> Result<Self> {
        let mut archive = Archive::new(GzDecoder::new(blob));

        let mut metadata: Option<ChartMetadata> = None;
        let mut values: Option<serde_json::Value> = None;
        let mut schema: Option<serde_json::Value> = None;

        for entry in archive.entries().context("failed to read chart archive")? {
            let mut entry = entry.context("failed to read chart archive entry")?;
            let path = entry.path().context("invalid path in chart archive")?;

            // Chart files live directly below the top-level chart directory.
            let mut components = path.components();
            let (Some(_chart_dir), Some(file), None) =
                (components.next(), components.next(), components.next())
            else {
                continue;
            };

            match file.as_os_str().to_str() {
                Some("Chart.yaml") => {
                    let mut raw = String::new();
                    entry.read_to_string(&mut raw)?;
                    metadata = Some(
                        serde_saphyr::from_str(&raw).context("failed to parse Chart.yaml")?,
                    );
                }
                Some("values.yaml") => {
                    let mut raw = String::new();
                    entry.read_to_string(&mut raw)?;
                    if !raw.trim().is_empty() {
                        values = Some(
                            serde_saphyr::from_str(&raw).context("failed to parse values.yaml")?,
                        );
                    }
                }
                Some("values.schema.json") => {
                    let mut raw = Vec::new();
                    entry.read_to_end(&mut raw)?;
                    schema = Some(
                        serde_json::from_slice(&raw)
                            .context("failed to parse values.schema.json")?,
                    );
                }
                _ => {}
            }
        }

        let Some(metadata) = metadata else {
            bail!("Chart.yaml not found in archive");
        };
        Ok(Self {
            metadata,
            values,
            schema,
        })
    }
}

#[cfg(test)]
mod tests {
    use crate::test_support::chart_archive;

    use super::*;

    #[test]
    fn parses_chart_metadata_and_values() {
        let blob = chart_archive(
            "echoserver",
            "0.1.0",
            Some("1.10"),
            Some(serde_json::json!({ "replicaCount": 2 })),
        );

        let chart = ChartArchive::parse(&blob).unwrap();
        assert_eq!(chart.metadata.name, "echoserver");
        assert_eq!(chart.metadata.version, "0.1.0");
        assert_eq!(chart.metadata.app_version.as_deref(), Some("1.10"));
        assert_eq!(chart.values.unwrap()["replicaCount"], 2);
        assert!(chart.schema.is_none());
    }

    #[test]
    fn archive_without_chart_yaml_is_rejected() {
        use flate2::Compression;
        use flate2::write::GzEncoder;

        let mut builder = tar::Builder::new(GzEncoder::new(Vec::new(), Compression::default()));
        let content = b"just some file";
        let mut header = tar::Header::new_gnu();
        header.set_size(content.len() as u64);
        header.set_mode(0o644);
        header.set_cksum();
        builder
            .append_data(&mut header, "mychart/README.md", content.as_slice())
            .unwrap();
        let blob = builder.into_inner().unwrap().finish().unwrap();

        let err = ChartArchive::parse(&blob).unwrap_err();
        assert!(err.to_string().contains("Chart.yaml not found"));
    }

    #[test]
    fn garbage_blob_is_rejected() {
        assert!(ChartArchive::parse(b"definitely not a tgz").is_err());
    }
}
