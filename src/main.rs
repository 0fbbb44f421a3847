use std::collections::HashSet;
use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Result;
use clap::{Parser, Subcommand};
use colored::*;
use tracing_subscriber::EnvFilter;

use appdock::build::{BuildMode, CommandCompiler, CommandInstaller};
use appdock::config::HostConfig;
use appdock::registry::{AppRegistry, AppState};
use appdock::scheduler::{BuildResult, BuildScheduler};
use appdock::server::{self, HotChannels};
use appdock::{dev, BuildManifest, ManifestEntry};

#[derive(Parser)]
#[command(name = "appdock")]
#[command(
    about = "Discover, incrementally build, and serve sub-applications at route prefixes",
    version
)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// One-shot production build pass over all apps
    Build {
        #[arg(short, long, default_value = "appdock.toml")]
        config: PathBuf,
    },

    /// Build, watch, and serve with live reload
    Dev {
        #[arg(short, long, default_value = "appdock.toml")]
        config: PathBuf,

        /// Override the configured port
        #[arg(short, long)]
        port: Option<u16>,
    },

    /// Serve a previously built manifest without building
    Serve {
        #[arg(short, long, default_value = "appdock.toml")]
        config: PathBuf,

        /// Override the configured port
        #[arg(short, long)]
        port: Option<u16>,
    },

    /// Show discovered apps and their manifest freshness
    Status {
        #[arg(short, long, default_value = "appdock.toml")]
        config: PathBuf,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("appdock=info")),
        )
        .init();

    let cli = Cli::parse();
    match cli.command {
        Commands::Build { config } => build(config).await,
        Commands::Dev { config, port } => dev_mode(config, port).await,
        Commands::Serve { config, port } => serve(config, port).await,
        Commands::Status { config } => status(config).await,
    }
}

async fn build(config_path: PathBuf) -> Result<()> {
    let config = HostConfig::load(&config_path)?;
    let registry = AppRegistry::discover(&config.base_dir, &config.apps)?;
    if registry.is_empty() {
        println!("{} No apps found under {}", "∅".yellow(), config.base_dir.display());
        return Ok(());
    }

    println!(
        "{}",
        format!("🔨 Building {} app(s)...", registry.descriptors().len())
            .cyan()
            .bold()
    );
    let scheduler = make_scheduler(&config, BuildMode::Production).await?;
    let results = scheduler.run(registry.into_descriptors()).await;
    // One durable write per production pass.
    scheduler.manifest().flush().await?;

    let failures = print_summary(&results);
    if failures > 0 {
        anyhow::bail!("{} app(s) failed to build", failures);
    }
    println!("{}", "✓ All apps built successfully".green());
    Ok(())
}

async fn dev_mode(config_path: PathBuf, port: Option<u16>) -> Result<()> {
    let config = HostConfig::load(&config_path)?;
    let port = port.unwrap_or(config.port);
    let registry = AppRegistry::discover(&config.base_dir, &config.apps)?;
    if registry.is_empty() {
        println!("{} No apps found under {}", "∅".yellow(), config.base_dir.display());
        return Ok(());
    }

    println!("{}", "🚧 Starting development mode...".cyan().bold());
    let scheduler = make_scheduler(&config, BuildMode::Development).await?;
    let descriptors = registry.into_descriptors();
    let results = scheduler.run(descriptors.clone()).await;
    scheduler.manifest().flush().await?;
    print_summary(&results);

    let hot = HotChannels::new();
    let entries = mountable_entries(scheduler.manifest(), &results);
    let router = server::mount(&entries, &config.output_dir, Some(hot.clone()));

    tokio::select! {
        served = server::serve(port, router) => served?,
        watched = dev::watch_and_rebuild(scheduler, descriptors, hot) => watched?,
    }
    Ok(())
}

async fn serve(config_path: PathBuf, port: Option<u16>) -> Result<()> {
    let config = HostConfig::load(&config_path)?;
    let port = port.unwrap_or(config.port);

    // Separate serving process: everything persisted is last-known-good.
    let manifest = BuildManifest::load(&config.output_dir).await?;
    if manifest.is_empty() {
        anyhow::bail!(
            "no manifest at {}; run `appdock build` first",
            config.output_dir.display()
        );
    }

    let entries = manifest.entries();
    for entry in &entries {
        println!(
            "  {} {} {}",
            "→".bright_blue(),
            entry.route.bright_white(),
            format!("({})", entry.id).bright_black()
        );
    }
    let router = server::mount(&entries, &config.output_dir, None);
    server::serve(port, router).await?;
    Ok(())
}

async fn status(config_path: PathBuf) -> Result<()> {
    let config = HostConfig::load(&config_path)?;
    let registry = AppRegistry::discover(&config.base_dir, &config.apps)?;
    let manifest = BuildManifest::load(&config.output_dir).await?;

    println!("{}", "Apps".cyan().bold());
    for descriptor in registry.descriptors() {
        let source = descriptor.source_path.clone();
        let excludes = config.exclude.clone();
        let hash =
            tokio::task::spawn_blocking(move || appdock::hasher::hash_tree(&source, &excludes))
                .await??;

        let freshness = match manifest.get(&descriptor.id) {
            Some(entry) if entry.hash == hash => "up to date".green(),
            Some(_) => "stale, rebuild needed".yellow(),
            None => "never built".red(),
        };
        println!(
            "  {} {} {} {}",
            descriptor.id.bright_black(),
            descriptor.route.bright_white(),
            descriptor.source_path.display().to_string().bright_black(),
            freshness
        );
    }
    Ok(())
}

async fn make_scheduler(config: &HostConfig, mode: BuildMode) -> Result<Arc<BuildScheduler>> {
    let manifest = BuildManifest::load(&config.output_dir).await?;
    Ok(Arc::new(
        BuildScheduler::new(
            manifest,
            Arc::new(CommandCompiler::new(config.compiler.clone())),
            Arc::new(CommandInstaller::new(config.installer.clone())),
            config.output_dir.clone(),
            mode,
        )
        .with_extra_excludes(config.exclude.clone()),
    ))
}

/// Manifest entries for apps that came out of this pass mountable. A failed
/// app is excluded even when a stale last-known-good entry exists.
fn mountable_entries(manifest: &BuildManifest, results: &[BuildResult]) -> Vec<ManifestEntry> {
    let mountable: HashSet<&str> = results
        .iter()
        .filter(|r| !r.is_failure())
        .map(|r| r.id.as_str())
        .collect();
    manifest
        .entries()
        .into_iter()
        .filter(|entry| mountable.contains(entry.id.as_str()))
        .collect()
}

fn print_summary(results: &[BuildResult]) -> usize {
    let mut failures = 0;
    for result in results {
        match result.state {
            AppState::Ready => println!(
                "  {} {} built in {}ms",
                "✓".green(),
                result.route.bright_white(),
                result.duration_ms
            ),
            AppState::Skipped => println!(
                "  {} {} unchanged, skipped",
                "⏭".bright_black(),
                result.route.bright_white()
            ),
            AppState::Failed => {
                failures += 1;
                println!("  {} {} failed", "✗".red(), result.route.bright_white());
                if let Some(detail) = &result.detail {
                    for line in detail.lines() {
                        println!("      {}", line.bright_black());
                    }
                }
            }
            _ => {}
        }
    }
    failures
}
