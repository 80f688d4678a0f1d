//! OCM repository access over the OCI distribution API.
//!
//! Component versions are tags on `<namespace>/component-descriptors/<name>`;
//! the descriptor itself travels as a manifest layer holding (possibly
//! gzipped) tar content with a `component-descriptor.yaml` member.

use std::io::Read;
use std::sync::Arc;

use async_trait::async_trait;
use bytes::Bytes;
use flate2::read::GzDecoder;
use serde::Deserialize;
use tar::Archive;

use discovery_sdk::error::OcmError;
use discovery_sdk::ocm::{
    COMPONENT_DESCRIPTOR_SEPARATOR, ComponentVersion, OcmClient, OcmRepository, Resource,
};
use discovery_sdk::registry::Registry;

use super::oci::OciClient;

const DESCRIPTOR_MEDIA_HINT: &str = "component-descriptor";
const DESCRIPTOR_FILE_NAME: &str = "component-descriptor.yaml";

/// [`OcmClient`] implementation resolving descriptors straight from the
/// registry's distribution API.
pub struct OciOcmClient {
    oci: Arc<OciClient>,
}

impl OciOcmClient {
    #[must_use]
    pub fn new(oci: Arc<OciClient>) -> Self {
        Self { oci }
    }
}

#[async_trait]
impl OcmClient for OciOcmClient {
    async fn open(
        &self,
        registry: &Registry,
        namespace: &str,
    ) -> Result<Box<dyn OcmRepository>, OcmError> {
        Ok(Box::new(OciOcmRepository {
            oci: Arc::clone(&self.oci),
            registry: registry.clone(),
            namespace: namespace.to_owned(),
        }))
    }
}

struct OciOcmRepository {
    oci: Arc<OciClient>,
    registry: Registry,
    namespace: String,
}

impl OciOcmRepository {
    fn component_repository(&self, component: &str) -> String {
        format!(
            "{}{COMPONENT_DESCRIPTOR_SEPARATOR}{component}",
            self.namespace
        )
    }
}

#[async_trait]
impl OcmRepository for OciOcmRepository {
    async fn list_versions(&self, component: &str) -> Result<Vec<String>, OcmError> {
        self.oci
            .list_tags(&self.registry, &self.component_repository(component))
            .await
    }

    async fn lookup_version(
        &self,
        component: &str,
        version: &str,
    ) -> Result<ComponentVersion, OcmError> {
        let repository = self.component_repository(component);
        let manifest = self
            .oci
            .get_manifest(&self.registry, &repository, version)
            .await?;

        let layer = manifest
            .layers
            .iter()
            .find(|layer| layer.media_type.contains(DESCRIPTOR_MEDIA_HINT))
            .ok_or_else(|| {
                OcmError::Decode(format!(
                    "manifest of {component}:{version} has no component descriptor layer"
                ))
            })?;

        let blob = self
            .oci
            .get_blob(&self.registry, &repository, &layer.digest)
            .await?;
        let descriptor = decode_descriptor(&blob)?;

        Ok(ComponentVersion {
            name: descriptor.component.name,
            version: descriptor.component.version,
            resources: descriptor
                .component
                .resources
                .into_iter()
                .map(ResourceDoc::into_resource)
                .collect(),
        })
    }

    async fn download_resource(
        &self,
        component: &str,
        resource: &Resource,
    ) -> Result<Bytes, OcmError> {
        let reference = resource
            .local_reference
            .as_deref()
            .or(resource.digest.as_deref())
            .ok_or_else(|| {
                OcmError::Decode(format!(
                    "resource {:?} has no downloadable reference",
                    resource.name
                ))
            })?;
        self.oci
            .get_blob(
                &self.registry,
                &self.component_repository(component),
                reference,
            )
            .await
    }
}

// ---- descriptor document ----

#[derive(Debug, Deserialize)]
struct ComponentDescriptorDoc {
    component: ComponentDoc,
}

#[derive(Debug, Deserialize)]
struct ComponentDoc {
    name: String,
    version: String,
    #[serde(default)]
    resources: Vec<ResourceDoc>,
}

#[derive(Debug, Deserialize)]
struct ResourceDoc {
    name: String,
    #[serde(rename = "type")]
    resource_type: String,
    #[serde(default)]
    version: Option<String>,
    #[serde(default)]
    digest: Option<DigestDoc>,
    #[serde(default)]
    access: Option<AccessDoc>,
}

#[derive(Debug, Deserialize)]
struct DigestDoc {
    value: String,
}

#[derive(Debug, Deserialize)]
struct AccessDoc {
    #[serde(default, rename = "localReference")]
    local_reference: Option<String>,
}

impl ResourceDoc {
    fn into_resource(self) -> Resource {
        let local_reference = self.access.and_then(|access| access.local_reference);
        Resource {
            name: self.name,
            resource_type: self.resource_type,
            version: self.version,
            digest: self
                .digest
                .map(|digest| digest.value)
                .or_else(|| local_reference.clone()),
            local_reference,
        }
    }
}

fn decode_descriptor(blob: &[u8]) -> Result<ComponentDescriptorDoc, OcmError> {
    if blob.starts_with(&[0x1f, 0x8b]) {
        return descriptor_from_tar(GzDecoder::new(blob));
    }
    if looks_like_tar(blob) {
        return descriptor_from_tar(blob);
    }
    let raw = std::str::from_utf8(blob)
        .map_err(|err| OcmError::Decode(format!("descriptor is not UTF-8: {err}")))?;
    parse_descriptor_text(raw)
}

fn looks_like_tar(blob: &[u8]) -> bool {
    blob.len() > 262 && &blob[257..262] == b"ustar"
}

fn descriptor_from_tar<R: Read>(reader: R) -> Result<ComponentDescriptorDoc, OcmError> {
    let mut archive = Archive::new(reader);
    let entries = archive
        .entries()
        .map_err(|err| OcmError::Decode(format!("invalid descriptor archive: {err}")))?;

    for entry in entries {
        let mut entry =
            entry.map_err(|err| OcmError::Decode(format!("invalid descriptor archive: {err}")))?;
        let is_descriptor = entry
            .path()
            .ok()
            .and_then(|path| path.file_name().map(|name| name == DESCRIPTOR_FILE_NAME))
            .unwrap_or(false);
        if !is_descriptor {
            continue;
        }
        let mut raw = String::new();
        entry
            .read_to_string(&mut raw)
            .map_err(|err| OcmError::Decode(format!("unreadable descriptor entry: {err}")))?;
        return parse_descriptor_text(&raw);
    }
    Err(OcmError::Decode(format!(
        "{DESCRIPTOR_FILE_NAME} not found in descriptor archive"
    )))
}

fn parse_descriptor_text(raw: &str) -> Result<ComponentDescriptorDoc, OcmError> {
    if raw.trim_start().starts_with('{') {
        serde_json::from_str(raw)
            .map_err(|err| OcmError::Decode(format!("invalid descriptor JSON: {err}")))
    } else {
        serde_saphyr::from_str(raw)
            .map_err(|err| OcmError::Decode(format!("invalid descriptor YAML: {err}")))
    }
}

#[cfg(test)]
mod tests {
    use crate::test_support::descriptor_tgz;

    use super::*;

    const DESCRIPTOR_YAML: &str = r#"
meta:
  schemaVersion: v2
component:
  name: ocm.software/toi/demo/helmdemo
  version: 0.12.0
  resources:
    - name: chart
      type: helmChart
      version: 0.12.0
      digest:
        hashAlgorithm: SHA-256
        value: abc123
      access:
        type: localBlob
        localReference: sha256:cafe
    - name: image
      type: ociImage
      access:
        type: ociArtifact
"#;

    #[test]
    fn parses_plain_yaml_descriptor() {
        let doc = decode_descriptor(DESCRIPTOR_YAML.as_bytes()).unwrap();
        assert_eq!(doc.component.name, "ocm.software/toi/demo/helmdemo");
        assert_eq!(doc.component.version, "0.12.0");
        assert_eq!(doc.component.resources.len(), 2);

        let chart = doc.component.resources.into_iter().next().unwrap().into_resource();
        assert_eq!(chart.resource_type, "helmChart");
        assert_eq!(chart.digest.as_deref(), Some("abc123"));
        assert_eq!(chart.local_reference.as_deref(), Some("sha256:cafe"));
    }

    #[test]
    fn parses_gzipped_tar_descriptor() {
        let blob = descriptor_tgz(DESCRIPTOR_YAML);
        let doc = decode_descriptor(&blob).unwrap();
        assert_eq!(doc.component.version, "0.12.0");
    }

    #[test]
    fn parses_json_descriptor() {
        let json = serde_json::json!({
            "component": {
                "name": "acme/app",
                "version": "1.0.0",
                "resources": []
            }
        })
        .to_string();
        let doc = decode_descriptor(json.as_bytes()).unwrap();
        assert_eq!(doc.component.name, "acme/app");
    }

    #[test]
    fn missing_descriptor_member_is_an_error() {
        use flate2::Compression;
        use flate2::write::GzEncoder;

        let mut builder = tar::Builder::new(GzEncoder::new(Vec::new(), Compression::default()));
        let content = b"{}";
        let mut header = tar::Header::new_gnu();
        header.set_size(content.len() as u64);
        header.set_mode(0o644);
        header.set_cksum();
        builder
            .append_data(&mut header, "something-else.yaml", content.as_slice())
            .unwrap();
        let blob = builder.into_inner().unwrap().finish().unwrap();

        let err = decode_descriptor(&blob).unwrap_err();
        assert!(err.to_string().contains("not found"));
    }

    #[test]
    fn namespace_and_component_form_the_repository_path() {
        let repo = OciOcmRepository {
            oci: Arc::new(OciClient::new().unwrap()),
            registry: Registry {
                name: "test".into(),
                hostname: "127.0.0.1:5000".into(),
                plain_http: true,
                credentials: None,
                webhook: None,
                scan_interval: std::time::Duration::from_secs(60),
            },
            namespace: "test".into(),
        };
        assert_eq!(
            repo.component_repository("ocm.software/toi/demo/helmdemo"),
            "test/component-descriptors/ocm.software/toi/demo/helmdemo"
        );
    }
}
