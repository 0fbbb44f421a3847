//! External build collaborators: the compiler and the dependency installer.
//!
//! Both are injected capabilities. The scheduler never resolves a compiler by
//! filesystem convention; it is handed something implementing [`Compiler`]
//! and calls `configure` then `run`. The bundler itself is opaque: it accepts
//! a build configuration and reports success or failure plus diagnostic text.

use std::path::{Path, PathBuf};
use std::process::Stdio;

use async_trait::async_trait;
use tokio::process::Command;
use tracing::debug;

use crate::error::{AppdockError, Result};
use crate::registry::AppDescriptor;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BuildMode {
    Production,
    Development,
}

impl BuildMode {
    pub fn as_str(&self) -> &'static str {
        match self {
            BuildMode::Production => "production",
            BuildMode::Development => "development",
        }
    }
}

/// Configuration handed to the compiler for one app.
#[derive(Debug, Clone)]
pub struct BuildConfig {
    /// The app's source tree, used as the compile working directory.
    pub entry_context: PathBuf,
    /// Per-app output directory, keyed by app id under the output root.
    pub output_dir: PathBuf,
    /// URL prefix baked into emitted asset references.
    pub public_path: String,
    pub mode: BuildMode,
}

/// The root route maps to `/`; every other route gets a trailing slash so
/// emitted asset URLs resolve under the app's prefix.
pub fn public_path(route: &str) -> String {
    if route == "/" {
        "/".to_string()
    } else {
        format!("{}/", route.trim_end_matches('/'))
    }
}

#[derive(Debug, Clone)]
pub struct CompileOutput {
    pub success: bool,
    pub diagnostics: String,
}

#[derive(Debug, Clone)]
pub struct InstallOutput {
    pub success: bool,
    pub output: String,
}

/// Opaque bundler/compiler seam. One invocation per app; instances are never
/// shared between apps, so a stalled compile blocks only its own app.
#[async_trait]
pub trait Compiler: Send + Sync {
    /// Derive the build configuration for one descriptor.
    fn configure(&self, descriptor: &AppDescriptor, out_root: &Path, mode: BuildMode) -> BuildConfig {
        BuildConfig {
            entry_context: descriptor.source_path.clone(),
            output_dir: out_root.join(&descriptor.id),
            public_path: public_path(&descriptor.route),
            mode,
        }
    }

    /// Run one compilation. `Err` means the collaborator itself could not be
    /// invoked; a compile that ran and failed is `Ok` with `success: false`.
    async fn run(&self, config: &BuildConfig) -> Result<CompileOutput>;
}

/// Dependency-installation subprocess seam, invoked with the app source path
/// as working directory.
#[async_trait]
pub trait DependencyInstaller: Send + Sync {
    async fn install(&self, dir: &Path) -> Result<InstallOutput>;
}

/// Compiler backed by a configured argv (e.g. `npm run build`). The build
/// configuration is passed through `APPDOCK_*` environment variables.
#[derive(Debug, Clone)]
pub struct CommandCompiler {
    argv: Vec<String>,
}

impl CommandCompiler {
    pub fn new(argv: Vec<String>) -> Self {
        Self { argv }
    }
}

impl Default for CommandCompiler {
    fn default() -> Self {
        Self::new(vec!["npm".into(), "run".into(), "build".into()])
    }
}

#[async_trait]
impl Compiler for CommandCompiler {
    async fn run(&self, config: &BuildConfig) -> Result<CompileOutput> {
        let (program, args) = split_argv(&self.argv, "compiler")?;
        tokio::fs::create_dir_all(&config.output_dir).await?;

        debug!(
            program,
            context = %config.entry_context.display(),
            output = %config.output_dir.display(),
            public_path = %config.public_path,
            mode = config.mode.as_str(),
            "invoking compiler"
        );
        let output = Command::new(program)
            .args(args)
            .current_dir(&config.entry_context)
            .env("APPDOCK_ENTRY", &config.entry_context)
            .env("APPDOCK_OUTPUT_DIR", &config.output_dir)
            .env("APPDOCK_PUBLIC_PATH", &config.public_path)
            .env("APPDOCK_MODE", config.mode.as_str())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .output()
            .await?;

        Ok(CompileOutput {
            success: output.status.success(),
            diagnostics: combine_output(&output.stdout, &output.stderr),
        })
    }
}

/// Installer backed by a configured argv (e.g. `npm install`).
#[derive(Debug, Clone)]
pub struct CommandInstaller {
    argv: Vec<String>,
}

impl CommandInstaller {
    pub fn new(argv: Vec<String>) -> Self {
        Self { argv }
    }
}

impl Default for CommandInstaller {
    fn default() -> Self {
        Self::new(vec!["npm".into(), "install".into()])
    }
}

#[async_trait]
impl DependencyInstaller for CommandInstaller {
    async fn install(&self, dir: &Path) -> Result<InstallOutput> {
        let (program, args) = split_argv(&self.argv, "installer")?;
        debug!(program, dir = %dir.display(), "installing dependencies");
        let output = Command::new(program)
            .args(args)
            .current_dir(dir)
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .output()
            .await?;

        Ok(InstallOutput {
            success: output.status.success(),
            output: combine_output(&output.stdout, &output.stderr),
        })
    }
}

fn split_argv<'a>(argv: &'a [String], what: &str) -> Result<(&'a str, &'a [String])> {
    match argv.split_first() {
        Some((program, args)) => Ok((program, args)),
        None => Err(AppdockError::Configuration(format!(
            "{} command must not be empty",
            what
        ))),
    }
}

fn combine_output(stdout: &[u8], stderr: &[u8]) -> String {
    let mut combined = String::from_utf8_lossy(stdout).into_owned();
    let err = String::from_utf8_lossy(stderr);
    if !err.is_empty() {
        if !combined.is_empty() && !combined.ends_with('\n') {
            combined.push('\n');
        }
        combined.push_str(&err);
    }
    combined
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn root_route_keeps_bare_public_path() {
        assert_eq!(public_path("/"), "/");
    }

    #[test]
    fn non_root_route_gets_trailing_slash() {
        assert_eq!(public_path("/admin"), "/admin/");
        assert_eq!(public_path("/:user/profile"), "/:user/profile/");
    }

    #[tokio::test]
    async fn command_compiler_reports_failure_with_diagnostics() {
        let tmp = TempDir::new().unwrap();
        let compiler = CommandCompiler::new(vec![
            "sh".into(),
            "-c".into(),
            "echo broken template >&2; exit 1".into(),
        ]);
        let config = BuildConfig {
            entry_context: tmp.path().to_path_buf(),
            output_dir: tmp.path().join("out"),
            public_path: "/".into(),
            mode: BuildMode::Production,
        };
        let result = compiler.run(&config).await.unwrap();
        assert!(!result.success);
        assert!(result.diagnostics.contains("broken template"));
    }

    #[tokio::test]
    async fn command_compiler_passes_config_through_env() {
        let tmp = TempDir::new().unwrap();
        let compiler = CommandCompiler::new(vec![
            "sh".into(),
            "-c".into(),
            "printf '%s %s' \"$APPDOCK_PUBLIC_PATH\" \"$APPDOCK_MODE\"".into(),
        ]);
        let config = BuildConfig {
            entry_context: tmp.path().to_path_buf(),
            output_dir: tmp.path().join("out"),
            public_path: "/admin/".into(),
            mode: BuildMode::Development,
        };
        let result = compiler.run(&config).await.unwrap();
        assert!(result.success);
        assert_eq!(result.diagnostics, "/admin/ development");
        assert!(config.output_dir.is_dir());
    }

    #[tokio::test]
    async fn command_installer_runs_in_app_dir() {
        let tmp = TempDir::new().unwrap();
        let installer = CommandInstaller::new(vec!["sh".into(), "-c".into(), "pwd".into()]);
        let result = installer.install(tmp.path()).await.unwrap();
        assert!(result.success);
        let reported = result.output.trim();
        let expected = tmp.path().canonicalize().unwrap();
        assert_eq!(
            std::path::Path::new(reported).canonicalize().unwrap(),
            expected
        );
    }

    #[tokio::test]
    async fn empty_argv_is_a_configuration_error() {
        let compiler = CommandCompiler::new(vec![]);
        let config = BuildConfig {
            entry_context: "/tmp".into(),
            output_dir: "/tmp/out".into(),
            public_path: "/".into(),
            mode: BuildMode::Production,
        };
        let err = compiler.run(&config).await.unwrap_err();
        assert!(matches!(err, AppdockError::Configuration(_)));
    }
}
