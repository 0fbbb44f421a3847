use std::path::Path;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use anyhow::Result;
use async_trait::async_trait;
use axum::body::Body;
use axum::http::{Request, StatusCode};
use tempfile::TempDir;
use tower::util::ServiceExt;

use appdock::build::{
    BuildConfig, BuildMode, Compiler, CompileOutput, DependencyInstaller, InstallOutput,
};
use appdock::registry::{AppRegistry, AppState};
use appdock::server;
use appdock::{BuildManifest, BuildScheduler};

/// Compiler stand-in that emits a root document naming its public path, and
/// fails for any app whose public path contains "broken".
struct RecordingCompiler {
    runs: AtomicUsize,
}

impl RecordingCompiler {
    fn new() -> Arc<Self> {
        Arc::new(Self {
            runs: AtomicUsize::new(0),
        })
    }
}

#[async_trait]
impl Compiler for RecordingCompiler {
    async fn run(&self, config: &BuildConfig) -> appdock::Result<CompileOutput> {
        self.runs.fetch_add(1, Ordering::SeqCst);
        if config.public_path.contains("broken") {
            return Ok(CompileOutput {
                success: false,
                diagnostics: "unexpected token".into(),
            });
        }
        tokio::fs::create_dir_all(&config.output_dir).await?;
        tokio::fs::write(
            config.output_dir.join("index.html"),
            format!("<h1>{}</h1>", config.public_path),
        )
        .await?;
        Ok(CompileOutput {
            success: true,
            diagnostics: String::new(),
        })
    }
}

struct NoopInstaller {
    runs: AtomicUsize,
}

impl NoopInstaller {
    fn new() -> Arc<Self> {
        Arc::new(Self {
            runs: AtomicUsize::new(0),
        })
    }
}

#[async_trait]
impl DependencyInstaller for NoopInstaller {
    async fn install(&self, _dir: &Path) -> appdock::Result<InstallOutput> {
        self.runs.fetch_add(1, Ordering::SeqCst);
        Ok(InstallOutput {
            success: true,
            output: String::new(),
        })
    }
}

fn make_app(base: &Path, rel: &str) {
    let dir = base.join(rel);
    std::fs::create_dir_all(dir.join("src")).unwrap();
    std::fs::write(dir.join("src/main.js"), format!("export default '{}';", rel)).unwrap();
    std::fs::write(dir.join("package.json"), "{}").unwrap();
}

async fn run_pass(
    base: &Path,
    out_root: &Path,
    compiler: Arc<RecordingCompiler>,
    installer: Arc<NoopInstaller>,
) -> Result<Vec<appdock::scheduler::BuildResult>> {
    let registry = AppRegistry::discover(base, &[])?;
    let manifest = BuildManifest::load(out_root).await?;
    let scheduler = Arc::new(BuildScheduler::new(
        manifest,
        compiler,
        installer,
        out_root.to_path_buf(),
        BuildMode::Production,
    ));
    let results = scheduler.run(registry.into_descriptors()).await;
    scheduler.manifest().flush().await?;
    Ok(results)
}

async fn get(router: &axum::Router, uri: &str) -> (StatusCode, String) {
    let response = router
        .clone()
        .oneshot(Request::builder().uri(uri).body(Body::empty()).unwrap())
        .await
        .unwrap();
    let status = response.status();
    let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .unwrap();
    (status, String::from_utf8_lossy(&bytes).into_owned())
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn full_pass_builds_persists_and_skips_on_rerun() -> Result<()> {
    let tmp = TempDir::new()?;
    let base = tmp.path().canonicalize()?.join("site");
    let out_root = tmp.path().canonicalize()?.join("out");
    make_app(&base, "blog.webapp");
    make_app(&base, "_user/profile.webapp");

    let compiler = RecordingCompiler::new();
    let installer = NoopInstaller::new();
    let results = run_pass(&base, &out_root, compiler.clone(), installer.clone()).await?;

    assert_eq!(results.len(), 2);
    assert!(results.iter().all(|r| r.state == AppState::Ready));
    let mut routes: Vec<&str> = results.iter().map(|r| r.route.as_str()).collect();
    routes.sort();
    assert_eq!(routes, vec!["/:user/profile", "/blog"]);
    assert!(results.iter().all(|r| r.id.len() == 8));
    assert_ne!(results[0].id, results[1].id);
    assert_eq!(compiler.runs.load(Ordering::SeqCst), 2);
    assert_eq!(installer.runs.load(Ordering::SeqCst), 2);

    // The persisted manifest round-trips and drives a restart's decisions.
    let reloaded = BuildManifest::load(&out_root).await?;
    assert_eq!(reloaded.len(), 2);

    let compiler2 = RecordingCompiler::new();
    let installer2 = NoopInstaller::new();
    let rerun = run_pass(&base, &out_root, compiler2.clone(), installer2.clone()).await?;
    assert!(rerun.iter().all(|r| r.state == AppState::Skipped));
    assert_eq!(compiler2.runs.load(Ordering::SeqCst), 0);
    assert_eq!(installer2.runs.load(Ordering::SeqCst), 0);

    Ok(())
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn source_change_rebuilds_only_the_changed_app() -> Result<()> {
    let tmp = TempDir::new()?;
    let base = tmp.path().canonicalize()?.join("site");
    let out_root = tmp.path().canonicalize()?.join("out");
    make_app(&base, "blog.webapp");
    make_app(&base, "admin.webapp");

    run_pass(&base, &out_root, RecordingCompiler::new(), NoopInstaller::new()).await?;

    std::fs::write(
        base.join("blog.webapp/src/main.js"),
        "export default 'edited';",
    )?;

    let compiler = RecordingCompiler::new();
    let results = run_pass(&base, &out_root, compiler.clone(), NoopInstaller::new()).await?;
    let by_route = |route: &str| results.iter().find(|r| r.route == route).unwrap();
    assert_eq!(by_route("/blog").state, AppState::Ready);
    assert_eq!(by_route("/admin").state, AppState::Skipped);
    assert_eq!(compiler.runs.load(Ordering::SeqCst), 1);

    Ok(())
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn app_config_change_rebuilds_and_updates_options() -> Result<()> {
    let tmp = TempDir::new()?;
    let base = tmp.path().canonicalize()?.join("site");
    let out_root = tmp.path().canonicalize()?.join("out");
    make_app(&base, "admin.webapp");

    run_pass(&base, &out_root, RecordingCompiler::new(), NoopInstaller::new()).await?;

    // Flipping an option is a content change like any other: the app must
    // rebuild, not skip, and the committed entry carries the new flag.
    std::fs::write(
        base.join("admin.webapp/app.config.json"),
        r#"{ "historyApiFallback": true }"#,
    )?;
    let compiler = RecordingCompiler::new();
    let results = run_pass(&base, &out_root, compiler.clone(), NoopInstaller::new()).await?;
    assert_eq!(results[0].state, AppState::Ready);
    assert_eq!(compiler.runs.load(Ordering::SeqCst), 1);

    let manifest = BuildManifest::load(&out_root).await?;
    assert!(manifest.get(&results[0].id).unwrap().history_api_fallback);

    Ok(())
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn built_pass_serves_apps_at_their_routes() -> Result<()> {
    let tmp = TempDir::new()?;
    let base = tmp.path().canonicalize()?.join("site");
    let out_root = tmp.path().canonicalize()?.join("out");
    make_app(&base, "blog.webapp");
    make_app(&base, "admin.webapp");
    make_app(&base, "_user/profile.webapp");
    // SPA app: extension-less paths should resolve to its root document.
    std::fs::write(
        base.join("admin.webapp/app.config.json"),
        r#"{ "historyApiFallback": true }"#,
    )?;

    run_pass(&base, &out_root, RecordingCompiler::new(), NoopInstaller::new()).await?;

    // A separate serving process loads the persisted store and mounts it.
    let manifest = BuildManifest::load(&out_root).await?;
    let router = server::mount(&manifest.entries(), &out_root, None);

    let (status, body) = get(&router, "/blog/index.html").await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body, "<h1>/blog/</h1>");

    let (status, body) = get(&router, "/admin/settings/profile").await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body, "<h1>/admin/</h1>");

    // Dynamic segment mounts and matches any value.
    let (status, body) = get(&router, "/alice/profile/index.html").await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body, "<h1>/:user/profile/</h1>");

    let (status, _) = get(&router, "/blog/settings/profile").await;
    assert_eq!(status, StatusCode::NOT_FOUND);

    Ok(())
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn failed_app_is_isolated_and_never_mounted() -> Result<()> {
    let tmp = TempDir::new()?;
    let base = tmp.path().canonicalize()?.join("site");
    let out_root = tmp.path().canonicalize()?.join("out");
    make_app(&base, "blog.webapp");
    make_app(&base, "broken.webapp");

    let results = run_pass(&base, &out_root, RecordingCompiler::new(), NoopInstaller::new()).await?;
    let by_route = |route: &str| results.iter().find(|r| r.route == route).unwrap();
    assert_eq!(by_route("/blog").state, AppState::Ready);

    let failed = by_route("/broken");
    assert_eq!(failed.state, AppState::Failed);
    let detail = failed.detail.as_deref().unwrap();
    assert!(detail.contains("unexpected token"));
    assert!(detail.contains(&failed.id));
    assert!(detail.contains("/broken"));

    // Never committed, never mounted; the route stays unhandled.
    let manifest = BuildManifest::load(&out_root).await?;
    assert!(manifest.get(&failed.id).is_none());
    let router = server::mount(&manifest.entries(), &out_root, None);
    let (status, _) = get(&router, "/broken/index.html").await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    let (status, _) = get(&router, "/blog/index.html").await;
    assert_eq!(status, StatusCode::OK);

    Ok(())
}
