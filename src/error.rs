//! Error taxonomy for the build engine.
//!
//! Registration-time errors (`Configuration`, `RouteConflict`) are fatal and
//! raised before any build task starts. Build-time errors are attributed to a
//! single app id and never abort sibling builds.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum AppdockError {
    /// Bad paths, missing base directory, or otherwise unusable configuration.
    /// Fatal at registration.
    #[error("configuration error: {0}")]
    Configuration(String),

    /// Two descriptors resolved to the same route. Fatal at registration.
    #[error("route conflict: {route} claimed by both {first_id} and {second_id}")]
    RouteConflict {
        route: String,
        first_id: String,
        second_id: String,
    },

    /// I/O failure while hashing a source tree. Fails that app's build attempt.
    #[error("hash computation failed for app {id}: {source}")]
    HashComputation {
        id: String,
        #[source]
        source: std::io::Error,
    },

    /// Dependency installation subprocess failed.
    #[error("dependency install failed for app {id} ({route}):\n{output}")]
    InstallFailed {
        id: String,
        route: String,
        output: String,
    },

    /// Compiler collaborator reported failure.
    #[error("compile failed for app {id} ({route}):\n{output}")]
    CompileFailed {
        id: String,
        route: String,
        output: String,
    },

    #[error("file watcher error: {0}")]
    Watch(#[from] notify::Error),

    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Json(#[from] serde_json::Error),

    #[error(transparent)]
    Toml(#[from] toml::de::Error),
}

pub type Result<T> = std::result::Result<T, AppdockError>;

impl AppdockError {
    /// The id of the app this error is attributed to, when there is one.
    pub fn app_id(&self) -> Option<&str> {
        match self {
            AppdockError::HashComputation { id, .. }
            | AppdockError::InstallFailed { id, .. }
            | AppdockError::CompileFailed { id, .. } => Some(id),
            _ => None,
        }
    }

    /// Registration-time errors abort startup before any build runs.
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            AppdockError::Configuration(_) | AppdockError::RouteConflict { .. }
        )
    }
}
