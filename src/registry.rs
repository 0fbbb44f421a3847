//! App discovery and registration.
//!
//! An `AppRegistry` owns the descriptor table for one build-pass or server
//! lifecycle. Descriptors come from two sources: directories named `*.webapp`
//! found under the base directory, and explicit entries from host
//! configuration. Route conflicts are detected here, before any build starts.

use std::collections::HashMap;
use std::path::{Path, PathBuf};

use serde::Deserialize;
use sha2::{Digest, Sha256};
use tracing::debug;
use walkdir::WalkDir;

use crate::error::{AppdockError, Result};
use crate::hasher::ALWAYS_EXCLUDE;

/// Directory-name suffix marking an independently-buildable sub-application.
pub const APP_EXTENSION: &str = ".webapp";

/// Optional per-app configuration file, colocated with the app source.
pub const APP_CONFIG_FILE: &str = "app.config.json";

/// Lifecycle of one app within a pass.
///
/// `Registered → Hashing → {Skipped | Building} → {Ready | Failed}`
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AppState {
    Registered,
    Hashing,
    Skipped,
    Building,
    Ready,
    Failed,
}

/// Per-app build options, merged from defaults, `app.config.json`, and any
/// explicit host-config overrides (in that order).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AppOptions {
    pub history_api_fallback: bool,
    pub install_dependencies: bool,
}

impl Default for AppOptions {
    fn default() -> Self {
        Self {
            history_api_fallback: false,
            install_dependencies: true,
        }
    }
}

/// One discovered unit of build work.
#[derive(Debug, Clone)]
pub struct AppDescriptor {
    /// Stable 8-hex-char id derived from `(route, source_path)`.
    pub id: String,
    /// URL path prefix the built app is served under.
    pub route: String,
    /// Absolute path to the app's source tree.
    pub source_path: PathBuf,
    pub options: AppOptions,
    /// Content hash, filled in by the scheduler.
    pub hash: Option<String>,
    pub state: AppState,
}

/// An app supplied directly by host configuration, bypassing discovery.
#[derive(Debug, Clone, Deserialize)]
pub struct ExplicitApp {
    pub src: PathBuf,
    /// When absent the route is derived from `src` relative to the base dir.
    pub route: Option<String>,
    pub history_api_fallback: Option<bool>,
    pub install_dependencies: Option<bool>,
}

/// Shape of `app.config.json`. Unknown keys are ignored.
#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
struct AppConfigFile {
    history_api_fallback: Option<bool>,
    install_dependencies: Option<bool>,
}

/// Descriptor table for one pass. Scoped, not global: callers hand a reference
/// to the scheduler and the multiplexer.
#[derive(Debug)]
pub struct AppRegistry {
    descriptors: Vec<AppDescriptor>,
}

impl AppRegistry {
    /// Register explicit apps, then recursively discover `*.webapp`
    /// directories under `base_dir`.
    pub fn discover(base_dir: &Path, explicit: &[ExplicitApp]) -> Result<Self> {
        if !base_dir.is_absolute() {
            return Err(AppdockError::Configuration(format!(
                "base dir must be an absolute path: {}",
                base_dir.display()
            )));
        }

        let mut registry = Self {
            descriptors: Vec::new(),
        };
        let mut routes: HashMap<String, String> = HashMap::new();

        for app in explicit {
            registry.register(base_dir, &app.src, app.route.as_deref(), &mut routes, |opts| {
                if let Some(v) = app.history_api_fallback {
                    opts.history_api_fallback = v;
                }
                if let Some(v) = app.install_dependencies {
                    opts.install_dependencies = v;
                }
            })?;
        }

        for src in find_app_dirs(base_dir)? {
            registry.register(base_dir, &src, None, &mut routes, |_| {})?;
        }

        debug!(
            apps = registry.descriptors.len(),
            base = %base_dir.display(),
            "app discovery complete"
        );
        Ok(registry)
    }

    fn register(
        &mut self,
        base_dir: &Path,
        src: &Path,
        route: Option<&str>,
        routes: &mut HashMap<String, String>,
        override_options: impl FnOnce(&mut AppOptions),
    ) -> Result<()> {
        if !src.is_absolute() {
            return Err(AppdockError::Configuration(format!(
                "app source must be an absolute path: {}",
                src.display()
            )));
        }

        let route = match route {
            Some(r) => r.to_string(),
            None => derive_route(base_dir, src)?,
        };
        let id = app_id(&route, src);

        if let Some(first_id) = routes.insert(route.clone(), id.clone()) {
            return Err(AppdockError::RouteConflict {
                route,
                first_id,
                second_id: id,
            });
        }

        let mut options = load_app_config(src)?;
        override_options(&mut options);

        self.descriptors.push(AppDescriptor {
            id,
            route,
            source_path: src.to_path_buf(),
            options,
            hash: None,
            state: AppState::Registered,
        });
        Ok(())
    }

    pub fn descriptors(&self) -> &[AppDescriptor] {
        &self.descriptors
    }

    pub fn into_descriptors(self) -> Vec<AppDescriptor> {
        self.descriptors
    }

    pub fn is_empty(&self) -> bool {
        self.descriptors.is_empty()
    }
}

/// Deterministic short id for `(route, source_path)`. Identical inputs yield
/// the identical id across restarts, which is what keeps manifest entries
/// attached to their apps.
pub fn app_id(route: &str, source_path: &Path) -> String {
    let mut hasher = Sha256::new();
    hasher.update(format!("{}:{}", route, source_path.display()).as_bytes());
    hex::encode(hasher.finalize())[..8].to_string()
}

/// Derive a route from the app path relative to the base directory.
///
/// `blog.webapp` → `/blog`, `_user/profile.webapp` → `/:user/profile`,
/// `index.webapp` → `/`. A trailing `index` segment is dropped and a leading
/// `_` marks a dynamic `:param` segment.
pub fn derive_route(base_dir: &Path, src: &Path) -> Result<String> {
    let relative = src.strip_prefix(base_dir).map_err(|_| {
        AppdockError::Configuration(format!(
            "base dir {} must be an ancestor of app source {}",
            base_dir.display(),
            src.display()
        ))
    })?;

    let mut segments: Vec<String> = Vec::new();
    for component in relative.components() {
        let seg = component.as_os_str().to_string_lossy().into_owned();
        segments.push(seg);
    }
    if segments.is_empty() {
        return Err(AppdockError::Configuration(format!(
            "app source {} must be a strict descendant of the base dir",
            src.display()
        )));
    }

    let last = segments.len() - 1;
    segments[last] = segments[last]
        .strip_suffix(APP_EXTENSION)
        .unwrap_or(&segments[last])
        .to_string();

    if segments.last().map(String::as_str) == Some("index") {
        segments.pop();
    }

    let segments: Vec<String> = segments
        .into_iter()
        .map(|seg| match seg.strip_prefix('_') {
            Some(rest) => format!(":{}", rest),
            None => seg,
        })
        .collect();

    Ok(format!("/{}", segments.join("/")))
}

/// Find `*.webapp` directories under `base_dir`. Matched directories are not
/// descended into, and dependency/output directories are skipped entirely.
fn find_app_dirs(base_dir: &Path) -> Result<Vec<PathBuf>> {
    let mut found = Vec::new();
    let mut walker = WalkDir::new(base_dir).sort_by_file_name().into_iter();

    while let Some(entry) = walker.next() {
        let entry = entry.map_err(|e| {
            AppdockError::Configuration(format!(
                "cannot scan {}: {}",
                base_dir.display(),
                e
            ))
        })?;
        if !entry.file_type().is_dir() {
            continue;
        }
        let name = entry.file_name().to_string_lossy().into_owned();
        if entry.depth() > 0 && ALWAYS_EXCLUDE.contains(&name.as_str()) {
            walker.skip_current_dir();
            continue;
        }
        if entry.depth() > 0 && name.ends_with(APP_EXTENSION) {
            found.push(entry.into_path());
            walker.skip_current_dir();
        }
    }

    Ok(found)
}

fn load_app_config(src: &Path) -> Result<AppOptions> {
    let mut options = AppOptions::default();
    let config_path = src.join(APP_CONFIG_FILE);
    if config_path.exists() {
        let raw = std::fs::read_to_string(&config_path)?;
        let file: AppConfigFile = serde_json::from_str(&raw)?;
        if let Some(v) = file.history_api_fallback {
            options.history_api_fallback = v;
        }
        if let Some(v) = file.install_dependencies {
            options.install_dependencies = v;
        }
    }
    Ok(options)
}
