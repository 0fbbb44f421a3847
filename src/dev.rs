//! Development mode: watch sources, rebuild on change, push reloads.
//!
//! Each app's source tree is watched with a debounced filesystem watcher.
//! A change queues that app through the scheduler, whose per-id lock already
//! guarantees at most one build in flight; redundant queue entries from an
//! event burst resolve as skips because the hash no longer differs. After
//! each individual build the manifest is flushed, and subscribers on the
//! app's hot channel are told to reload.

use std::path::{Component, Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use colored::Colorize;
use notify::RecursiveMode;
use notify_debouncer_full::{new_debouncer, DebounceEventResult};
use tokio::sync::mpsc;
use tracing::{debug, warn};

use crate::error::Result;
use crate::hasher::ALWAYS_EXCLUDE;
use crate::registry::{AppDescriptor, AppState};
use crate::scheduler::BuildScheduler;
use crate::server::HotChannels;

const DEBOUNCE: Duration = Duration::from_millis(200);
const EVENT_QUEUE: usize = 1024;

/// Watch every descriptor's source tree and rebuild apps as they change.
/// Runs until the watcher fails; builds themselves never abort the loop.
pub async fn watch_and_rebuild(
    scheduler: Arc<BuildScheduler>,
    descriptors: Vec<AppDescriptor>,
    hot: HotChannels,
) -> Result<()> {
    let (tx, mut rx) = mpsc::channel::<PathBuf>(EVENT_QUEUE);

    let mut debouncer = new_debouncer(DEBOUNCE, None, move |result: DebounceEventResult| {
        match result {
            Ok(events) => {
                for event in events {
                    for path in &event.paths {
                        if tx.blocking_send(path.clone()).is_err() {
                            return;
                        }
                    }
                }
            }
            Err(errors) => {
                for err in errors {
                    warn!(%err, "watch error");
                }
            }
        }
    })?;

    for descriptor in &descriptors {
        debouncer.watch(&descriptor.source_path, RecursiveMode::Recursive)?;
    }
    println!(
        "{}",
        format!("👁  Watching {} app(s) for source changes...", descriptors.len())
            .bright_cyan()
            .bold()
    );

    while let Some(path) = rx.recv().await {
        handle_change(&scheduler, &descriptors, &hot, &path).await?;
    }

    drop(debouncer);
    Ok(())
}

/// Handle one debounced change: attribute the path to an app, rebuild it
/// through the scheduler, flush the manifest, and tell subscribers to reload.
async fn handle_change(
    scheduler: &Arc<BuildScheduler>,
    descriptors: &[AppDescriptor],
    hot: &HotChannels,
    path: &Path,
) -> Result<()> {
    if !is_relevant(path) {
        return Ok(());
    }
    let Some(descriptor) = match_app(descriptors, path) else {
        return Ok(());
    };
    debug!(id = %descriptor.id, changed = %path.display(), "source change detected");

    let result = scheduler.ensure_built(descriptor.clone()).await;
    match result.state {
        AppState::Ready => {
            scheduler.manifest().flush().await?;
            let clients = hot.notify(&result.id, "reload");
            println!(
                "{} {} rebuilt in {}ms ({} client(s) reloading)",
                "↻".bright_blue(),
                result.route.bright_white(),
                result.duration_ms,
                clients
            );
        }
        AppState::Skipped => {
            debug!(id = %result.id, "change event resolved as no-op");
        }
        // Failure diagnostics were already surfaced by the scheduler;
        // the app stays on its last good output until the next change.
        _ => {}
    }
    Ok(())
}

/// Changes under dependency/output directories never trigger rebuilds; the
/// hash excludes them, so a rebuild would always resolve as a skip.
fn is_relevant(path: &Path) -> bool {
    !path.components().any(|component| {
        matches!(
            component,
            Component::Normal(name)
                if name.to_str().is_some_and(|n| ALWAYS_EXCLUDE.contains(&n))
        )
    })
}

/// Deepest source path wins, so a nested app's changes are not attributed to
/// an enclosing app.
fn match_app<'a>(descriptors: &'a [AppDescriptor], path: &Path) -> Option<&'a AppDescriptor> {
    descriptors
        .iter()
        .filter(|d| path.starts_with(&d.source_path))
        .max_by_key(|d| d.source_path.components().count())
}
