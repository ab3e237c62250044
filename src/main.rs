//! stashd - self-hosted S3-compatible object storage server

use axum::http::{HeaderValue, Method};
use axum::middleware;
use clap::Parser;
use stashd::api::admin::{admin_router, AdminState};
use stashd::api::auth::auth_middleware;
use stashd::api::handlers::{request_id_middleware, s3_router, AppState};
use stashd::config::Config;
use stashd::db::Db;
use stashd::ratelimit::RateLimiter;
use stashd::storage::FsStore;
use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tokio::net::TcpListener;
use tokio::signal;
use tower_http::cors::{AllowOrigin, Any, CorsLayer};
use tower_http::trace::TraceLayer;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

/// stashd — self-hosted S3-compatible object storage
#[derive(Parser, Debug)]
#[command(name = "stashd")]
#[command(version, author, about, long_about = None)]
struct Cli {
    /// Listen address (overrides HOST/PORT)
    #[arg(short, long, value_name = "ADDR")]
    listen: Option<String>,

    /// Storage root (overrides STORAGE_PATH)
    #[arg(short, long, value_name = "DIR")]
    storage: Option<PathBuf>,

    /// Metadata database path (overrides DB_PATH)
    #[arg(short, long, value_name = "FILE")]
    db: Option<PathBuf>,

    /// Enable verbose logging
    #[arg(short, long)]
    verbose: bool,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();

    // Priority: RUST_LOG > --verbose > default
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| {
        if cli.verbose {
            EnvFilter::new("stashd=trace,tower_http=trace")
        } else {
            EnvFilter::new("stashd=debug,tower_http=info")
        }
    });
    tracing_subscriber::fmt().with_env_filter(filter).init();

    let mut config = Config::from_env();
    if let Some(ref storage) = cli.storage {
        config.storage_path = storage.clone();
    }
    if let Some(ref db) = cli.db {
        config.db_path = db.clone();
    }

    let listen_addr: SocketAddr = match cli.listen {
        Some(ref addr) => addr.parse()?,
        None => config.listen_addr()?,
    };

    info!("Starting stashd v{}", env!("CARGO_PKG_VERSION"));
    info!("  Listen address: {}", listen_addr);
    info!("  Storage root: {:?}", config.storage_path);
    info!("  Metadata db: {:?}", config.db_path);
    info!("  Region: {}", config.region);

    let db = Arc::new(Db::open(&config.db_path)?);
    let store = Arc::new(FsStore::new(config.storage_path.clone()).await?);

    if db.list_access_keys()?.is_empty() {
        warn!("no access keys exist yet; create one via POST /admin/keys");
    }

    let state = Arc::new(AppState {
        db,
        store,
        config: config.clone(),
    });

    let mut app = s3_router(state.clone())
        .layer(middleware::from_fn_with_state(state.clone(), auth_middleware))
        .layer(TraceLayer::new_for_http())
        // CORS outermost so OPTIONS preflight is answered before auth
        .layer(cors_layer(&config));

    if config.admin_enabled() {
        let username = config.admin_username.clone().unwrap_or_default();
        let password = config.admin_password.clone().unwrap_or_default();
        let token_secret = config.token_secret.clone().unwrap_or_default();

        let password_hash = bcrypt::hash(password, bcrypt::DEFAULT_COST)?;
        let limiter = Arc::new(RateLimiter::new());

        // Sweep expired login-attempt windows every 5 minutes
        spawn_periodic(Duration::from_secs(300), {
            let limiter = limiter.clone();
            move || limiter.sweep()
        });

        let admin_state = Arc::new(AdminState {
            app: state.clone(),
            username,
            password_hash,
            token_secret,
            limiter,
        });
        app = app.merge(admin_router(admin_state));
        info!("  Admin API: enabled");
    } else {
        warn!("  Admin API: disabled — set ADMIN_USERNAME, ADMIN_PASSWORD and JWT_SECRET to enable");
    }

    // Request ids outermost so auth rejections and admin responses
    // carry x-amz-request-id / x-amz-id-2 as well
    let app = app.layer(middleware::from_fn(request_id_middleware));

    let listener = TcpListener::bind(&listen_addr).await?;
    info!("stashd listening on http://{}", listen_addr);

    axum::serve(
        listener,
        app.into_make_service_with_connect_info::<SocketAddr>(),
    )
    .with_graceful_shutdown(shutdown_signal())
    .await?;

    info!("Server shutdown complete");
    Ok(())
}

/// CORS per configuration: explicit origins when set, permissive
/// otherwise. Exposes the headers S3 browser clients read.
fn cors_layer(config: &Config) -> CorsLayer {
    let exposed = [
        axum::http::header::ETAG,
        axum::http::HeaderName::from_static("x-amz-request-id"),
        axum::http::HeaderName::from_static("x-amz-id-2"),
        axum::http::header::CONTENT_RANGE,
        axum::http::header::ACCEPT_RANGES,
    ];
    let methods = [
        Method::GET,
        Method::POST,
        Method::PUT,
        Method::DELETE,
        Method::HEAD,
        Method::OPTIONS,
    ];

    let origin = if config.cors_origins.is_empty() {
        AllowOrigin::any()
    } else {
        AllowOrigin::list(
            config
                .cors_origins
                .iter()
                .filter_map(|o| o.parse::<HeaderValue>().ok()),
        )
    };

    CorsLayer::new()
        .allow_origin(origin)
        .allow_methods(methods)
        .allow_headers(Any)
        .expose_headers(exposed)
}

/// Spawn a background task that runs `f` every `interval`.
fn spawn_periodic(interval: Duration, f: impl Fn() + Send + 'static) {
    tokio::spawn(async move {
        let mut tick = tokio::time::interval(interval);
        loop {
            tick.tick().await;
            f();
        }
    });
}

/// Handle shutdown signals (SIGINT, SIGTERM)
async fn shutdown_signal() {
    let ctrl_c = async {
        signal::ctrl_c()
            .await
            .expect("failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        signal::unix::signal(signal::unix::SignalKind::terminate())
            .expect("failed to install signal handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
            warn!("Received Ctrl+C, initiating graceful shutdown...");
        }
        _ = terminate => {
            warn!("Received SIGTERM, initiating graceful shutdown...");
        }
    }
}
