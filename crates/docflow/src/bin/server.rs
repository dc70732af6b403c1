//! Gateway server binary
//!
//! Run with: cargo run -p docflow --bin docflow-server

use docflow::{DocflowConfig, DocflowServer};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "docflow=info,tower_http=debug".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    println!(
        r#"
╔═══════════════════════════════════════════════════════════╗
║                         Docflow                           ║
║        OCR, Extraction and Editing Service Gateway        ║
╚═══════════════════════════════════════════════════════════╝
"#
    );

    let config = DocflowConfig::load()?;

    tracing::info!("Configuration loaded");
    tracing::info!("  - Public root: {}", config.storage.public_root.display());
    tracing::info!("  - Data root: {}", config.storage.data_root.display());
    tracing::info!("  - OCR service: {}", config.services.ocr_url);
    tracing::info!("  - Large model service: {}", config.services.large_model_url);
    tracing::info!("  - Schema service: {}", config.services.schema_url);
    tracing::info!("  - Extraction service: {}", config.services.extract_url);
    tracing::info!("  - Pipeline service: {}", config.services.pipeline_url);
    tracing::info!("  - Database service: {}", config.services.db_url);
    tracing::info!("  - Path mappings: {}", config.paths.mappings.len());
    if config.paths.mappings.is_empty() {
        tracing::warn!("No path mappings configured; dispatches with local paths will be rejected");
    }

    let server = DocflowServer::new(config).await?;

    println!("\nServer starting...");
    println!("  API: http://{}", server.address());
    println!("  Health: http://{}/health", server.address());
    println!("  API Info: http://{}/api/info", server.address());
    println!("\nEndpoints:");
    println!("  POST /api/upload              - Upload a file and start OCR");
    println!("  GET  /api/document/list       - List documents");
    println!("  GET  /api/jobs/:id/events     - Follow a job");
    println!("  POST /api/onlyoffice-callback - Editor save-back");
    println!("\nPress Ctrl+C to stop\n");

    server.start().await?;

    Ok(())
}
