//! Skip-vs-rebuild decisions and concurrent build execution.
//!
//! One tokio task per descriptor, no inter-app ordering. Failure policy is
//! per-app isolation: a failed hash, install, or compile marks that app
//! `Failed` and never aborts the pass; every sibling still runs to
//! completion. There is no cancellation and no timeout; a started build runs
//! to completion or failure, and an interrupted process simply rebuilds on
//! the next pass because its manifest entry was never written.
//!
//! At most one build per app id is in flight at any time. A second request
//! for the same id awaits the holder's per-id lock, then re-reads the
//! manifest: if the first build committed the same hash, the second request
//! resolves as `Skipped` instead of duplicating installer and compiler work.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Instant;

use dashmap::DashMap;
use tokio::sync::Mutex;
use tokio::task::JoinSet;
use tracing::{error, info};

use crate::build::{BuildMode, Compiler, DependencyInstaller};
use crate::error::AppdockError;
use crate::hasher::hash_tree;
use crate::manifest::{BuildManifest, ManifestEntry};
use crate::registry::{AppDescriptor, AppState};

/// Outcome of one app's pass through the scheduler.
#[derive(Debug, Clone)]
pub struct BuildResult {
    pub id: String,
    pub route: String,
    pub state: AppState,
    pub hash: Option<String>,
    /// Diagnostic text on failure, tagged upstream with id and route.
    pub detail: Option<String>,
    pub duration_ms: u64,
}

impl BuildResult {
    pub fn is_failure(&self) -> bool {
        self.state == AppState::Failed
    }
}

pub struct BuildScheduler {
    manifest: BuildManifest,
    compiler: Arc<dyn Compiler>,
    installer: Arc<dyn DependencyInstaller>,
    out_root: PathBuf,
    mode: BuildMode,
    extra_excludes: Vec<String>,
    inflight: DashMap<String, Arc<Mutex<()>>>,
}

impl BuildScheduler {
    pub fn new(
        manifest: BuildManifest,
        compiler: Arc<dyn Compiler>,
        installer: Arc<dyn DependencyInstaller>,
        out_root: PathBuf,
        mode: BuildMode,
    ) -> Self {
        Self {
            manifest,
            compiler,
            installer,
            out_root,
            mode,
            extra_excludes: Vec::new(),
            inflight: DashMap::new(),
        }
    }

    /// Additional exclude patterns applied when hashing every app.
    pub fn with_extra_excludes(mut self, excludes: Vec<String>) -> Self {
        self.extra_excludes = excludes;
        self
    }

    pub fn manifest(&self) -> &BuildManifest {
        &self.manifest
    }

    /// Run one pass over all descriptors, one concurrent task each.
    pub async fn run(self: &Arc<Self>, descriptors: Vec<AppDescriptor>) -> Vec<BuildResult> {
        let mut tasks = JoinSet::new();
        for descriptor in descriptors {
            let scheduler = Arc::clone(self);
            tasks.spawn(async move { scheduler.ensure_built(descriptor).await });
        }

        let mut results = Vec::new();
        while let Some(joined) = tasks.join_next().await {
            match joined {
                Ok(result) => results.push(result),
                Err(err) => error!(%err, "build task panicked"),
            }
        }
        results.sort_by(|a, b| a.route.cmp(&b.route));
        results
    }

    /// Hash one app and build it if the manifest says it changed.
    pub async fn ensure_built(&self, mut descriptor: AppDescriptor) -> BuildResult {
        let start = Instant::now();

        let lock = {
            let entry = self
                .inflight
                .entry(descriptor.id.clone())
                .or_insert_with(|| Arc::new(Mutex::new(())));
            Arc::clone(entry.value())
        };
        let _guard = lock.lock().await;

        descriptor.state = AppState::Hashing;
        let source = descriptor.source_path.clone();
        let excludes = self.extra_excludes.clone();
        let hash = match tokio::task::spawn_blocking(move || hash_tree(&source, &excludes)).await {
            Ok(Ok(hash)) => hash,
            Ok(Err(io)) => {
                let err = AppdockError::HashComputation {
                    id: descriptor.id.clone(),
                    source: io,
                };
                return self.failed(descriptor, err.to_string(), start);
            }
            Err(join) => {
                return self.failed(descriptor, format!("hashing task failed: {}", join), start);
            }
        };
        descriptor.hash = Some(hash.clone());

        if let Some(entry) = self.manifest.get(&descriptor.id) {
            if entry.hash == hash {
                info!(id = %descriptor.id, route = %descriptor.route, "unchanged, skipping build");
                descriptor.state = AppState::Skipped;
                return BuildResult {
                    id: descriptor.id,
                    route: entry.route,
                    state: AppState::Skipped,
                    hash: Some(hash),
                    detail: None,
                    duration_ms: start.elapsed().as_millis() as u64,
                };
            }
        }

        descriptor.state = AppState::Building;
        // Install is gated twice: by the app option, and by the hash check
        // above, so an unchanged app never pays the installation cost.
        if descriptor.options.install_dependencies {
            match self.installer.install(&descriptor.source_path).await {
                Ok(result) if result.success => {
                    info!(id = %descriptor.id, route = %descriptor.route, "dependencies installed");
                }
                Ok(result) => {
                    let err = AppdockError::InstallFailed {
                        id: descriptor.id.clone(),
                        route: descriptor.route.clone(),
                        output: result.output,
                    };
                    return self.failed(descriptor, err.to_string(), start);
                }
                Err(err) => return self.failed(descriptor, err.to_string(), start),
            }
        }

        let config = self.compiler.configure(&descriptor, &self.out_root, self.mode);
        match self.compiler.run(&config).await {
            Ok(result) if result.success => {
                // Commit only now, with the hash that triggered this build.
                self.manifest.commit(ManifestEntry {
                    id: descriptor.id.clone(),
                    hash: hash.clone(),
                    route: descriptor.route.clone(),
                    history_api_fallback: descriptor.options.history_api_fallback,
                });
                info!(
                    id = %descriptor.id,
                    route = %descriptor.route,
                    elapsed_ms = start.elapsed().as_millis() as u64,
                    "build ready"
                );
                BuildResult {
                    id: descriptor.id,
                    route: descriptor.route,
                    state: AppState::Ready,
                    hash: Some(hash),
                    detail: None,
                    duration_ms: start.elapsed().as_millis() as u64,
                }
            }
            Ok(result) => {
                let err = AppdockError::CompileFailed {
                    id: descriptor.id.clone(),
                    route: descriptor.route.clone(),
                    output: result.diagnostics,
                };
                self.failed(descriptor, err.to_string(), start)
            }
            Err(err) => self.failed(descriptor, err.to_string(), start),
        }
    }

    fn failed(&self, descriptor: AppDescriptor, detail: String, start: Instant) -> BuildResult {
        error!(id = %descriptor.id, route = %descriptor.route, "{}", detail);
        BuildResult {
            id: descriptor.id,
            route: descriptor.route,
            state: AppState::Failed,
            hash: descriptor.hash,
            detail: Some(detail),
            duration_ms: start.elapsed().as_millis() as u64,
        }
    }
}
