//! Minimal OCI distribution client backing the discovery capabilities.

use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use serde::Deserialize;

use discovery_sdk::error::OcmError;
use discovery_sdk::ocm::OciCatalog;
use discovery_sdk::registry::Registry;

/// Repositories fetched per catalog page.
const CATALOG_PAGE_SIZE: usize = 100;

const MANIFEST_ACCEPT: &str = "application/vnd.oci.image.manifest.v1+json, \
     application/vnd.docker.distribution.manifest.v2+json";

/// HTTP client for the OCI distribution API (v2).
///
/// Credentials and the plain-HTTP flag come from the [`Registry`] record on
/// every call; one client serves all configured registries.
pub struct OciClient {
    http: reqwest::Client,
}

#[derive(Debug, Deserialize)]
struct CatalogPage {
    #[serde(default)]
    repositories: Vec<String>,
}

#[derive(Debug, Deserialize)]
struct TagList {
    #[serde(default)]
    tags: Option<Vec<String>>,
}

/// OCI image manifest, reduced to what descriptor resolution needs.
#[derive(Debug, Deserialize)]
pub struct ImageManifest {
    #[serde(default)]
    pub layers: Vec<OciDescriptor>,
}

#[derive(Debug, Deserialize)]
pub struct OciDescriptor {
    #[serde(rename = "mediaType")]
    pub media_type: String,
    pub digest: String,
}

impl OciClient {
    /// Build the shared HTTP client.
    ///
    /// # Errors
    /// Returns [`OcmError`] when the underlying client cannot be built.
    pub fn new() -> Result<Self, OcmError> {
        let http = reqwest::Client::builder()
            .connect_timeout(Duration::from_secs(5))
            .build()
            .map_err(|err| OcmError::Other(format!("failed to build HTTP client: {err}")))?;
        Ok(Self { http })
    }

    async fn get(&self, registry: &Registry, url: &str) -> Result<reqwest::Response, OcmError> {
        let mut request = self.http.get(url);
        if let Some(credentials) = &registry.credentials {
            request = request.basic_auth(&credentials.username, Some(&credentials.password));
        }

        let response = request
            .send()
            .await
            .map_err(|err| map_reqwest_error(&err, url))?;

        let status = response.status();
        if status == reqwest::StatusCode::NOT_FOUND {
            return Err(OcmError::NotFound {
                reference: url.to_owned(),
            });
        }
        if !status.is_success() {
            return Err(OcmError::Http {
                status: status.as_u16(),
                url: url.to_owned(),
            });
        }
        Ok(response)
    }

    async fn get_json<T: serde::de::DeserializeOwned>(
        &self,
        registry: &Registry,
        url: &str,
    ) -> Result<T, OcmError> {
        self.get(registry, url)
            .await?
            .json()
            .await
            .map_err(|err| OcmError::Decode(format!("invalid response from {url}: {err}")))
    }

    /// List all tags of a repository.
    ///
    /// # Errors
    /// Returns [`OcmError::NotFound`] for unknown repositories.
    pub async fn list_tags(
        &self,
        registry: &Registry,
        repository: &str,
    ) -> Result<Vec<String>, OcmError> {
        let url = format!("{}/v2/{repository}/tags/list", registry.url());
        let list: TagList = self.get_json(registry, &url).await?;
        Ok(list.tags.unwrap_or_default())
    }

    /// Fetch a manifest by tag or digest.
    ///
    /// # Errors
    /// Returns [`OcmError`] on missing manifests or decode failures.
    pub async fn get_manifest(
        &self,
        registry: &Registry,
        repository: &str,
        reference: &str,
    ) -> Result<ImageManifest, OcmError> {
        let url = format!("{}/v2/{repository}/manifests/{reference}", registry.url());
        let mut request = self.http.get(&url).header("accept", MANIFEST_ACCEPT);
        if let Some(credentials) = &registry.credentials {
            request = request.basic_auth(&credentials.username, Some(&credentials.password));
        }

        let response = request
            .send()
            .await
            .map_err(|err| map_reqwest_error(&err, &url))?;
        let status = response.status();
        if status == reqwest::StatusCode::NOT_FOUND {
            return Err(OcmError::NotFound { reference: url });
        }
        if !status.is_success() {
            return Err(OcmError::Http {
                status: status.as_u16(),
                url,
            });
        }
        response
            .json()
            .await
            .map_err(|err| OcmError::Decode(format!("invalid manifest from {url}: {err}")))
    }

    /// Download a blob by digest.
    ///
    /// # Errors
    /// Returns [`OcmError`] when the blob cannot be fetched.
    pub async fn get_blob(
        &self,
        registry: &Registry,
        repository: &str,
        digest: &str,
    ) -> Result<Bytes, OcmError> {
        let url = format!("{}/v2/{repository}/blobs/{digest}", registry.url());
        self.get(registry, &url)
            .await?
            .bytes()
            .await
            .map_err(|err| OcmError::Decode(format!("failed to read blob from {url}: {err}")))
    }
}

#[async_trait]
impl OciCatalog for OciClient {
    async fn list_repositories(&self, registry: &Registry) -> Result<Vec<String>, OcmError> {
        let base = registry.url();
        let mut repositories = Vec::new();
        let mut last: Option<String> = None;

        loop {
            let url = match &last {
                Some(last) => format!("{base}/v2/_catalog?n={CATALOG_PAGE_SIZE}&last={last}"),
                None => format!("{base}/v2/_catalog?n={CATALOG_PAGE_SIZE}"),
            };
            let page: CatalogPage = self.get_json(registry, &url).await?;
            let count = page.repositories.len();
            last = page.repositories.last().cloned();
            repositories.extend(page.repositories);

            if count < CATALOG_PAGE_SIZE {
                break;
            }
        }
        Ok(repositories)
    }
}

fn map_reqwest_error(err: &reqwest::Error, url: &str) -> OcmError {
    if err.is_timeout() {
        OcmError::Timeout(format!("{url}: {err}"))
    } else if err.is_connect() {
        OcmError::Connection(format!("{url}: {err}"))
    } else if err.is_decode() {
        OcmError::Decode(format!("{url}: {err}"))
    } else {
        OcmError::Other(format!("{url}: {err}"))
    }
}
