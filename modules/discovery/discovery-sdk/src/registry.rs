//! The registry model shared by the scanner, webhook router, and stages.

use std::fmt;
use std::time::Duration;

/// Default interval between two catalog scans of the same registry.
pub const DEFAULT_SCAN_INTERVAL: Duration = Duration::from_secs(24 * 60 * 60);

/// A named OCI registry the pipeline watches.
///
/// Constructed from configuration at startup and registered into the
/// registry provider; immutable afterwards.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Registry {
    /// Unique name; events reference registries by this name.
    pub name: String,
    /// Host and optional port, without a scheme.
    pub hostname: String,
    /// Talk plain HTTP instead of HTTPS.
    pub plain_http: bool,
    /// Optional basic-auth credentials.
    pub credentials: Option<Credentials>,
    /// Optional webhook registration for push-style notifications.
    pub webhook: Option<WebhookConfig>,
    /// Interval between two catalog scans.
    pub scan_interval: Duration,
}

impl Registry {
    /// Base URL of the registry, derived from `plain_http` and `hostname`.
    #[must_use]
    pub fn url(&self) -> String {
        let scheme = if self.plain_http { "http" } else { "https" };
        format!("{scheme}://{}", self.hostname)
    }
}

/// Basic-auth credentials for a registry.
#[derive(Clone, PartialEq, Eq)]
pub struct Credentials {
    pub username: String,
    pub password: String,
}

impl fmt::Debug for Credentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Credentials")
            .field("username", &self.username)
            .field("password", &"***")
            .finish()
    }
}

/// Webhook registration for a registry: the path suffix under `/webhook/`
/// and the flavor selecting the provider-specific decoder.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WebhookConfig {
    pub path: String,
    pub flavor: String,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn registry(plain_http: bool) -> Registry {
        Registry {
            name: "test".into(),
            hostname: "registry.example.com:5000".into(),
            plain_http,
            credentials: None,
            webhook: None,
            scan_interval: DEFAULT_SCAN_INTERVAL,
        }
    }

    #[test]
    fn url_uses_https_by_default() {
        assert_eq!(registry(false).url(), "https://registry.example.com:5000");
    }

    #[test]
    fn url_honors_plain_http() {
        assert_eq!(registry(true).url(), "http://registry.example.com:5000");
    }

    #[test]
    fn credentials_debug_redacts_password() {
        let creds = Credentials {
            username: "admin".into(),
            password: "hunter2".into(),
        };
        let rendered = format!("{creds:?}");
        assert!(rendered.contains("admin"));
        assert!(!rendered.contains("hunter2"));
    }
}
