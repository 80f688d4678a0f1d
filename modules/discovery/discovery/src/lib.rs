//! Arsenal discovery pipeline core.
//!
//! Discovers OCM component versions published as OCI artifacts and surfaces
//! each newly observed version as a typed record to the catalog store. Two
//! input sources feed the pipeline: periodic scans of each registry's
//! repository catalog, and push-style CloudEvents webhooks. Events flow
//! through bounded channels:
//!
//! ```text
//! scanner ─┐
//!          ├─► repo events ─► qualifier ─► version events ─► filter ─► handler ─► records ─► sink
//! webhook ─┘
//! ```
//!
//! Each stage runs as a single worker driven by the generic [`runner::StageRunner`];
//! every publish is non-blocking and drops on a saturated channel. One shared
//! cancellation token unwinds the whole pipeline.

#![forbid(unsafe_code)]

pub mod config;
pub mod infra;
pub mod logging;
pub mod pipeline;
pub mod provider;
pub mod retry;
pub mod runner;
pub mod scanner;
pub mod stages;
pub mod webhook;

#[cfg(any(test, feature = "test-utils"))]
pub mod test_support;

pub use config::AppConfig;
pub use pipeline::{Pipeline, PipelineDeps};
pub use provider::{ProviderError, RegistryProvider};
pub use retry::BackoffPolicy;
pub use runner::{Processor, RateLimit, StageContext, StageOptions, StageRunner};
pub use scanner::Scanner;
pub use webhook::{WebhookError, WebhookRouter};
