//! BSM authentication API server binary.
//!
//! Configuration comes from the environment (see `ApiConfig::from_env`);
//! command-line flags override the listener address and database URL.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use bsm_api::{AppState, config::ApiConfig, services::auth::bootstrap_admin};
use bsm_core::auth::queries::PgCredentialStore;
use bsm_core::auth::revocation::{InMemoryRevocationList, RevocationList, spawn_sweeper};
use clap::Parser;
use sqlx::postgres::PgPoolOptions;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

/// CLI arguments for the API server.
#[derive(Parser, Debug)]
#[command(name = "bsm_api_server", about = "BSM authentication API server")]
struct Args {
    /// Address to listen on; overrides `BIND_ADDR`.
    #[arg(long)]
    bind: Option<String>,

    /// PostgreSQL connection URL; overrides `DATABASE_URL`.
    #[arg(long)]
    database_url: Option<String>,

    /// Skip running embedded migrations at startup.
    #[arg(long, default_value_t = false)]
    skip_migrations: bool,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    dotenvy::dotenv().ok();

    tracing_subscriber::fmt()
        .with_writer(std::io::stderr)
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info,bsm_api=debug,bsm_core=debug".into()),
        )
        .init();

    let args = Args::parse();

    let mut config = ApiConfig::from_env()?;
    if let Some(bind) = args.bind {
        config.bind_addr = bind;
    }
    if let Some(url) = args.database_url {
        config.pg_connection_url = url;
    }

    info!(
        bind_addr = %config.bind_addr,
        max_connections = config.max_connections,
        rotate_refresh_tokens = config.rotate_refresh_tokens,
        "starting bsm_api_server"
    );

    let pool = PgPoolOptions::new()
        .max_connections(config.max_connections)
        .acquire_timeout(Duration::from_secs(30))
        .connect(&config.pg_connection_url)
        .await?;

    if args.skip_migrations {
        warn!("skipping database migrations");
    } else {
        info!("running database migrations");
        bsm_api::migrate(&pool).await?;
    }

    let revocations: Arc<dyn RevocationList> = Arc::new(InMemoryRevocationList::new());
    let sweep_every = Duration::from_secs(config.revocation_sweep_secs.max(1));
    let bootstrap = config.bootstrap_admin.clone();
    let bind_addr = config.bind_addr.clone();

    let state = AppState::new(
        config,
        Arc::new(PgCredentialStore::new(pool)),
        revocations.clone(),
    );

    if let Some(admin) = bootstrap {
        match bootstrap_admin(&state, &admin.email, &admin.password).await {
            Ok(Some(user)) => info!(user_id = user.id, "created bootstrap admin"),
            Ok(None) => info!("admin already present, bootstrap skipped"),
            Err(e) => warn!(error = %e, "bootstrap admin failed"),
        }
    }

    let shutdown = CancellationToken::new();
    let sweeper = spawn_sweeper(revocations, sweep_every, shutdown.clone());

    let app = bsm_api::router(state);
    let listener = tokio::net::TcpListener::bind(&bind_addr).await?;
    info!(addr = %listener.local_addr()?, "REST API listening");

    let result = axum::serve(
        listener,
        app.into_make_service_with_connect_info::<SocketAddr>(),
    )
    .with_graceful_shutdown({
        let shutdown = shutdown.clone();
        async move {
            tokio::select! {
                _ = tokio::signal::ctrl_c() => info!("interrupt received, shutting down"),
                _ = shutdown.cancelled() => {}
            }
        }
    })
    .await;

    shutdown.cancel();
    let _ = sweeper.await;

    result?;
    Ok(())
}
