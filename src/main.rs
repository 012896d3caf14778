//! sitetrack - tracking dashboard backend

use clap::Parser;
use std::sync::Arc;
use tracing::{error, info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use sitetrack::{
    config::Args,
    db::MongoClient,
    logging::AuditLogger,
    migration::{migrate_legacy_projects, MigrationOutcome},
    server::{self, AppState},
    store::{ChangeFeed, DocumentStore, MemoryStore, MongoStore},
};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load environment variables from .env file if present
    let _ = dotenvy::dotenv();

    let args = Args::parse();

    // Initialize tracing/logging
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| format!("sitetrack={},info", args.log_level).into());
    if args.log_json {
        tracing_subscriber::registry()
            .with(filter)
            .with(tracing_subscriber::fmt::layer().json())
            .init();
    } else {
        tracing_subscriber::registry()
            .with(filter)
            .with(tracing_subscriber::fmt::layer())
            .init();
    }

    if let Err(e) = args.validate() {
        error!("Configuration error: {}", e);
        std::process::exit(1);
    }

    info!("======================================");
    info!("  sitetrack - tracking dashboard");
    info!("======================================");
    info!("Listen: {}", args.listen);
    info!("Mode: {}", if args.dev_mode { "DEVELOPMENT" } else { "PRODUCTION" });
    info!(
        "Store: {}",
        if args.memory_store { "memory" } else { args.mongodb_uri.as_str() }
    );
    info!("PDF endpoint: {}", args.pdf_endpoint.as_deref().unwrap_or("none (DOCX only)"));
    info!("======================================");

    let feed = ChangeFeed::new(args.change_feed_capacity);
    let store: Arc<dyn DocumentStore> = if args.memory_store {
        Arc::new(MemoryStore::new(feed))
    } else {
        match MongoClient::new(&args.mongodb_uri, &args.mongodb_db).await {
            Ok(client) => {
                info!("MongoDB connected successfully");
                Arc::new(MongoStore::new(client, feed))
            }
            Err(e) if args.dev_mode => {
                warn!("MongoDB connection failed (dev mode, using in-memory store): {}", e);
                Arc::new(MemoryStore::new(feed))
            }
            Err(e) => {
                error!("MongoDB connection failed: {}", e);
                std::process::exit(1);
            }
        }
    };

    match migrate_legacy_projects(store.as_ref(), args.legacy_projects.as_deref()).await {
        Ok(MigrationOutcome::Imported(count)) => info!("Imported {} legacy projects", count),
        Ok(_) => {}
        Err(e) => warn!("Legacy project import failed: {}", e),
    }

    let audit = AuditLogger::new();
    if let Some(path) = args.audit_log.clone() {
        if let Err(e) = audit.init_file(path).await {
            warn!("Audit log unavailable: {}", e);
        }
    }

    let state = AppState::new(args, store).await?.with_audit(audit);
    server::run(Arc::new(state)).await?;

    Ok(())
}
