//! Age Token Issuer Binary
//!
//! Runs the issuer/verifier HTTP service.

use std::sync::Arc;

use tokio::sync::watch;
use tracing::{error, info, warn};
use tracing_subscriber::FmtSubscriber;

use agetoken_anchor::{CachedAnchor, HttpAnchor, MemoryAnchor, PublisherIdentity, TrustAnchor};
use agetoken_core::{keys, SystemClock};
use agetoken_issuer::core::{jobs, AnchorLink};
use agetoken_issuer::{create_router, AppState, FileStore, IssuerConfig, KeyStore, MemoryStore, RevocationStore};

type BoxError = Box<dyn std::error::Error + Send + Sync>;

#[tokio::main]
async fn main() {
    let config = match IssuerConfig::from_env() {
        Ok(config) => config,
        Err(e) => {
            eprintln!("agetoken-issuer: {}", e);
            std::process::exit(2);
        }
    };

    // Initialize logging
    let subscriber = FmtSubscriber::builder()
        .with_max_level(config.log_level)
        .with_target(true)
        .with_thread_ids(true)
        .finish();

    if let Err(e) = tracing::subscriber::set_global_default(subscriber) {
        eprintln!("agetoken-issuer: failed to set tracing subscriber: {}", e);
        std::process::exit(1);
    }

    if let Err(e) = run(config).await {
        error!(error = %e, "Issuer service failed");
        std::process::exit(1);
    }
}

#[cfg(feature = "postgres")]
async fn open_database(url: &str) -> Result<Arc<dyn RevocationStore>, BoxError> {
    Ok(Arc::new(agetoken_issuer::storage::PostgresStore::new(url).await?))
}

#[cfg(not(feature = "postgres"))]
async fn open_database(_url: &str) -> Result<Arc<dyn RevocationStore>, BoxError> {
    Err("AGETOKEN_DATABASE_URL is set but this build lacks the postgres feature".into())
}

async fn open_store(config: &IssuerConfig) -> Result<Arc<dyn RevocationStore>, BoxError> {
    if let Some(url) = &config.database_url {
        return open_database(url).await;
    }

    match &config.revocation_log {
        Some(path) => Ok(Arc::new(FileStore::open(path).await?)),
        None => {
            warn!("No AGETOKEN_REVOCATION_LOG set, revocations are kept in memory only");
            Ok(Arc::new(MemoryStore::new()))
        }
    }
}

fn open_anchor(config: &IssuerConfig, publisher: &PublisherIdentity) -> Result<Arc<dyn TrustAnchor>, BoxError> {
    let anchor: Arc<dyn TrustAnchor> = match &config.anchor_url {
        Some(url) => Arc::new(HttpAnchor::new(url.clone(), config.anchor_timeout)?),
        None => {
            warn!(
                publisher = %publisher.address(),
                "No AGETOKEN_ANCHOR_URL set, using an in-process bulletin board"
            );
            Arc::new(MemoryAnchor::new().with_publisher(publisher.address()))
        }
    };
    Ok(Arc::new(CachedAnchor::new(anchor, config.anchor_cache_ttl)))
}

async fn run(config: IssuerConfig) -> Result<(), BoxError> {
    // Signing key
    let keypair = if config.strict_key_load {
        keys::load(&config.key_file)?
    } else {
        keys::load_or_generate(&config.key_file)?
    };
    let keys = Arc::new(KeyStore::new(keypair, config.key_grace));

    // Trust anchor
    let publisher = PublisherIdentity::load_or_generate(&config.publisher_key_file)?;
    let anchor = AnchorLink::new(open_anchor(&config, &publisher)?, publisher, config.anchor_timeout);

    // Storage and service state
    let store = open_store(&config).await?;
    let state = Arc::new(
        AppState::build(&config, Arc::clone(&keys), store, anchor.clone(), Arc::new(SystemClock))
            .await?
            .with_key_file(config.key_file.clone()),
    );

    info!(
        kid = %keys.current_kid(),
        issuer = %config.issuer,
        anchor = %anchor.description(),
        failure_policy = %config.anchor_failure_policy,
        accept_legacy = config.accept_legacy,
        port = config.port,
        "Starting age token issuer"
    );

    // Background jobs
    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let mut handles = vec![jobs::spawn_thumbprint_publish(
        Arc::clone(&keys),
        anchor,
        shutdown_rx.clone(),
    )];
    handles.extend(jobs::spawn_root_sync(
        Arc::clone(&state.revocations),
        config.root_sync_interval,
        shutdown_rx,
    ));

    // Start server
    let app = create_router(state);
    let addr = format!("0.0.0.0:{}", config.port);
    let listener = tokio::net::TcpListener::bind(&addr).await?;

    info!(addr = %addr, "Issuer listening");

    axum::serve(listener, app)
        .with_graceful_shutdown(async {
            if let Err(e) = tokio::signal::ctrl_c().await {
                error!(error = %e, "Failed to listen for shutdown signal");
            }
            info!("Shutdown signal received");
        })
        .await?;

    let _ = shutdown_tx.send(true);
    for handle in handles {
        if let Err(e) = handle.await {
            warn!(error = %e, "Background job ended abnormally");
        }
    }
    info!("Issuer stopped");
    Ok(())
}
