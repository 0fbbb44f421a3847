//! # Appdock - Incremental Multi-App Build Engine
//!
//! Discovers independently-buildable sub-applications inside a host project,
//! rebuilds only the ones whose source trees changed, and serves the results
//! under distinct URL route prefixes.
//!
//! ## How a pass works
//!
//! 1. The registry scans the base directory for `*.webapp` apps, derives
//!    routes and stable 8-hex ids, and rejects route conflicts up front.
//! 2. Each app's source tree is hashed (content-addressed, ignore-aware).
//! 3. The scheduler compares hashes against the persisted manifest and
//!    skips, or installs + compiles, concurrently with at most one build in
//!    flight per app.
//! 4. Successful builds commit to the manifest; the HTTP layer mounts ready
//!    apps at their route prefixes, with SPA history fallback and, in dev
//!    mode, a per-app live-reload channel.
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use appdock::{AppRegistry, BuildManifest, BuildMode, BuildScheduler};
//! use appdock::build::{CommandCompiler, CommandInstaller};
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let registry = AppRegistry::discover("/srv/site".as_ref(), &[])?;
//!     let manifest = BuildManifest::load("/srv/site/appdock-out".as_ref()).await?;
//!     let scheduler = Arc::new(BuildScheduler::new(
//!         manifest,
//!         Arc::new(CommandCompiler::default()),
//!         Arc::new(CommandInstaller::default()),
//!         "/srv/site/appdock-out".into(),
//!         BuildMode::Production,
//!     ));
//!     let results = scheduler.run(registry.into_descriptors()).await;
//!     scheduler.manifest().flush().await?;
//!     println!("{} app(s) processed", results.len());
//!     Ok(())
//! }
//! ```

pub mod build;
pub mod config;
pub mod dev;
pub mod error;
pub mod hasher;
pub mod manifest;
pub mod registry;
pub mod scheduler;
pub mod server;

// Re-export main types for library consumers
pub use build::{BuildConfig, BuildMode, Compiler, DependencyInstaller};
pub use error::{AppdockError, Result};
pub use manifest::{BuildManifest, ManifestEntry};
pub use registry::{AppDescriptor, AppRegistry, AppState};
pub use scheduler::{BuildResult, BuildScheduler};
pub use server::HotChannels;

/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
