//! HTTP layer: manifest-driven route multiplexing and serving.

pub mod hot;
pub mod mux;

pub use hot::HotChannels;
pub use mux::mount;

use axum::Router;
use colored::Colorize;
use tracing::info;

use crate::error::Result;

/// Bind and serve the assembled router.
pub async fn serve(port: u16, router: Router) -> Result<()> {
    let addr = format!("0.0.0.0:{}", port);
    let listener = tokio::net::TcpListener::bind(&addr).await?;
    info!(%addr, "listening");
    println!(
        "{} Serving at {}",
        "✓".green(),
        format!("http://{}", addr).bright_blue()
    );
    axum::serve(listener, router).await?;
    Ok(())
}
