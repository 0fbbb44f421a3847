//! Route-to-middleware multiplexing over manifest state.
//!
//! Every `Ready` manifest entry gets its route prefix wired to an explicit,
//! priority-ordered stage list resolved once at mount time: the SPA history
//! fallback (when enabled for the app) runs first, static asset serving from
//! the app's output directory runs last. A `Failed` app is simply absent from
//! the manifest snapshot handed here, so its route stays entirely unhandled;
//! no fallback response is synthesized.
//!
//! Route uniqueness is enforced at registration, never here.

use std::path::Path;

use axum::extract::Request;
use axum::http::Uri;
use axum::middleware;
use axum::Router;
use tower_http::services::ServeDir;
use tracing::{debug, info};

use crate::manifest::ManifestEntry;
use crate::server::hot::{self, HotChannels};

const PRIORITY_HISTORY_FALLBACK: u8 = 10;
const PRIORITY_STATIC_ASSETS: u8 = 20;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum StageKind {
    HistoryFallback,
    StaticAssets,
}

#[derive(Debug, Clone, Copy)]
struct MountStage {
    priority: u8,
    kind: StageKind,
}

/// The ordered middleware chain for one app, lowest priority number first.
fn mount_plan(entry: &ManifestEntry) -> Vec<MountStage> {
    let mut plan = vec![MountStage {
        priority: PRIORITY_STATIC_ASSETS,
        kind: StageKind::StaticAssets,
    }];
    if entry.history_api_fallback {
        plan.push(MountStage {
            priority: PRIORITY_HISTORY_FALLBACK,
            kind: StageKind::HistoryFallback,
        });
    }
    plan.sort_by_key(|stage| stage.priority);
    plan
}

/// Assemble the router for a set of ready manifest entries. `hot` adds the
/// shared live-reload upgrade endpoint in development mode.
pub fn mount(entries: &[ManifestEntry], out_root: &Path, hot: Option<HotChannels>) -> Router {
    let mut router = Router::new();
    let mut root_app: Option<Router> = None;

    for entry in entries {
        let app = app_router(entry, out_root);
        if entry.route == "/" {
            root_app = Some(app);
        } else {
            // nest_service, not nest: the per-app router is fallback-driven,
            // and nesting it as a router at a parameterized path collides
            // with its internal catch-all.
            router = router.nest_service(&axum_mount_path(&entry.route), app);
        }
        info!(id = %entry.id, route = %entry.route, "mounted app");
    }

    if let Some(hot) = hot {
        router = router.merge(hot::router(hot));
    }
    // The root app serves everything no other route claimed.
    if let Some(root_app) = root_app {
        router = router.fallback_service(root_app);
    }
    router
}

fn app_router(entry: &ManifestEntry, out_root: &Path) -> Router {
    let dir = out_root.join(&entry.id);
    let plan = mount_plan(entry);
    debug!(id = %entry.id, route = %entry.route, ?plan, "resolved mount plan");

    // Static serving is the terminal service; every other stage wraps it,
    // applied in reverse so the lowest priority number runs first.
    let mut router = Router::new().fallback_service(ServeDir::new(&dir));
    for stage in plan.iter().rev() {
        router = match stage.kind {
            StageKind::StaticAssets => router,
            StageKind::HistoryFallback => router.layer(middleware::map_request(history_fallback)),
        };
    }
    router
}

/// Rewrite extension-less paths to the app's root document so client-side
/// routes resolve, then fall through to static serving.
async fn history_fallback(mut request: Request) -> Request {
    let path = request.uri().path();
    let last_segment = path.rsplit('/').next().unwrap_or("");
    if !last_segment.contains('.') {
        *request.uri_mut() = Uri::from_static("/index.html");
    }
    request
}

/// Derived routes use `:param` for dynamic segments; axum's router spells
/// them `{param}`.
fn axum_mount_path(route: &str) -> String {
    route
        .split('/')
        .map(|segment| match segment.strip_prefix(':') {
            Some(name) => format!("{{{}}}", name),
            None => segment.to_string(),
        })
        .collect::<Vec<_>>()
        .join("/")
}
