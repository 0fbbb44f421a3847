//! Host configuration (`appdock.toml`).
//!
//! Everything except `base_dir` has a default. Relative paths are resolved
//! against the config file's directory, so the registry always receives
//! absolute paths.

use std::path::{Path, PathBuf};

use serde::Deserialize;

use crate::error::{AppdockError, Result};
use crate::registry::ExplicitApp;

pub const CONFIG_FILE: &str = "appdock.toml";

fn default_output_dir() -> PathBuf {
    PathBuf::from("appdock-out")
}

fn default_port() -> u16 {
    3000
}

fn default_compiler() -> Vec<String> {
    vec!["npm".into(), "run".into(), "build".into()]
}

fn default_installer() -> Vec<String> {
    vec!["npm".into(), "install".into()]
}

#[derive(Debug, Clone, Deserialize)]
pub struct HostConfig {
    /// Directory scanned for `*.webapp` apps.
    pub base_dir: PathBuf,

    /// Root for per-app build output and the manifest.
    #[serde(default = "default_output_dir")]
    pub output_dir: PathBuf,

    #[serde(default = "default_port")]
    pub port: u16,

    /// Compiler argv, invoked per app with `APPDOCK_*` env configuration.
    #[serde(default = "default_compiler")]
    pub compiler: Vec<String>,

    /// Dependency-installer argv, invoked with the app dir as cwd.
    #[serde(default = "default_installer")]
    pub installer: Vec<String>,

    /// Extra hash-exclusion patterns (gitignore syntax) applied to all apps.
    #[serde(default)]
    pub exclude: Vec<String>,

    /// Apps registered directly, bypassing discovery.
    #[serde(default)]
    pub apps: Vec<ExplicitApp>,
}

impl HostConfig {
    pub fn load(path: &Path) -> Result<Self> {
        let raw = std::fs::read_to_string(path).map_err(|err| {
            AppdockError::Configuration(format!("cannot read {}: {}", path.display(), err))
        })?;
        let mut config: HostConfig = toml::from_str(&raw)?;

        let config_dir = match path.parent() {
            Some(parent) if !parent.as_os_str().is_empty() => parent.to_path_buf(),
            _ => PathBuf::from("."),
        };
        let config_dir = config_dir.canonicalize().map_err(|err| {
            AppdockError::Configuration(format!(
                "cannot resolve config directory {}: {}",
                config_dir.display(),
                err
            ))
        })?;

        config.base_dir = absolutize(&config_dir, config.base_dir);
        config.output_dir = absolutize(&config_dir, config.output_dir);
        for app in &mut config.apps {
            app.src = absolutize(&config_dir, std::mem::take(&mut app.src));
        }

        if config.compiler.is_empty() {
            return Err(AppdockError::Configuration(
                "compiler command must not be empty".into(),
            ));
        }
        if config.installer.is_empty() {
            return Err(AppdockError::Configuration(
                "installer command must not be empty".into(),
            ));
        }
        Ok(config)
    }
}

fn absolutize(base: &Path, path: PathBuf) -> PathBuf {
    if path.is_absolute() {
        path
    } else {
        base.join(path)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn write_config(tmp: &TempDir, content: &str) -> PathBuf {
        let path = tmp.path().join(CONFIG_FILE);
        std::fs::write(&path, content).unwrap();
        path
    }

    #[test]
    fn minimal_config_fills_defaults() {
        let tmp = TempDir::new().unwrap();
        let path = write_config(&tmp, r#"base_dir = "site""#);

        let config = HostConfig::load(&path).unwrap();
        let root = tmp.path().canonicalize().unwrap();
        assert_eq!(config.base_dir, root.join("site"));
        assert_eq!(config.output_dir, root.join("appdock-out"));
        assert_eq!(config.port, 3000);
        assert_eq!(config.compiler, vec!["npm", "run", "build"]);
        assert_eq!(config.installer, vec!["npm", "install"]);
        assert!(config.apps.is_empty());
    }

    #[test]
    fn absolute_paths_are_kept() {
        let tmp = TempDir::new().unwrap();
        let path = write_config(
            &tmp,
            r#"
base_dir = "/srv/site"
output_dir = "/var/lib/appdock"
"#,
        );
        let config = HostConfig::load(&path).unwrap();
        assert_eq!(config.base_dir, Path::new("/srv/site"));
        assert_eq!(config.output_dir, Path::new("/var/lib/appdock"));
    }

    #[test]
    fn explicit_apps_are_parsed_and_resolved() {
        let tmp = TempDir::new().unwrap();
        let path = write_config(
            &tmp,
            r#"
base_dir = "site"

[[apps]]
src = "vendor/dashboard"
route = "/dashboard"
install_dependencies = false
"#,
        );
        let config = HostConfig::load(&path).unwrap();
        let root = tmp.path().canonicalize().unwrap();
        assert_eq!(config.apps.len(), 1);
        assert_eq!(config.apps[0].src, root.join("vendor/dashboard"));
        assert_eq!(config.apps[0].route.as_deref(), Some("/dashboard"));
        assert_eq!(config.apps[0].install_dependencies, Some(false));
    }

    #[test]
    fn empty_compiler_argv_is_rejected() {
        let tmp = TempDir::new().unwrap();
        let path = write_config(
            &tmp,
            r#"
base_dir = "site"
compiler = []
"#,
        );
        let err = HostConfig::load(&path).unwrap_err();
        assert!(matches!(err, AppdockError::Configuration(_)));
    }

    #[test]
    fn missing_file_is_a_configuration_error() {
        let err = HostConfig::load(Path::new("/nonexistent/appdock.toml")).unwrap_err();
        assert!(matches!(err, AppdockError::Configuration(_)));
    }
}
