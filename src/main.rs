use axum::Router;
use clap::Parser;
use tower_http::timeout::TimeoutLayer;
use tower_http::trace::TraceLayer;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use std::time::Duration;

use keygate::config::Config;
use keygate::crypto::{self, LookupHasher};
use keygate::db::{AppState, create_pool, init_db, queries};
use keygate::handlers;
use keygate::rate_limit;
use keygate::models::{
    CreateCustomer, CreateLicense, CreateProduct, ExpirationStart, ExpirationType, TeamSettings,
};

#[derive(Parser, Debug)]
#[command(name = "keygate")]
#[command(about = "Multi-tenant license validation and heartbeat server")]
struct Cli {
    /// Seed the database with dev data (team, customer, product, license)
    #[arg(long)]
    seed: bool,

    /// Delete the database on exit (dev mode only, useful for fresh starts)
    #[arg(long)]
    ephemeral: bool,
}

/// Seeds the database with dev data for local testing.
/// Creates a team with settings, a signing key pair, one customer, one
/// product and one license bound to both. Only runs when the database is
/// empty.
fn seed_dev_data(state: &AppState) {
    let conn = state.db.get().expect("Failed to get db connection for seeding");

    let count = queries::count_teams(&conn).expect("Failed to count teams");
    if count > 0 {
        tracing::info!("Database already has data, skipping seed");
        return;
    }

    tracing::info!("============================================");
    tracing::info!("SEEDING DEV DATA");
    tracing::info!("============================================");

    let team = queries::create_team(&conn, "Dev Team").expect("Failed to create dev team");
    queries::upsert_team_settings(&conn, &team.id, &TeamSettings::default())
        .expect("Failed to create dev team settings");

    let (private_key, public_key) = crypto::generate_keypair();
    let encrypted_private_key = state
        .master_key
        .encrypt(&team.id, &private_key)
        .expect("Failed to encrypt dev signing key");
    queries::create_key_pair(&conn, &team.id, &encrypted_private_key, &public_key)
        .expect("Failed to create dev key pair");

    let customer = queries::create_customer(
        &conn,
        &team.id,
        &CreateCustomer {
            name: "Dev Customer".to_string(),
            email: Some("dev@keygate.local".to_string()),
        },
    )
    .expect("Failed to create dev customer");

    let product = queries::create_product(
        &conn,
        &team.id,
        &CreateProduct {
            name: "Dev Product".to_string(),
        },
    )
    .expect("Failed to create dev product");

    let license_key = queries::generate_license_key("KG");
    let license = queries::issue_license(
        &conn,
        &state.lookup,
        &state.master_key,
        &team.id,
        &CreateLicense {
            license_key: license_key.clone(),
            customer_ids: vec![customer.id.clone()],
            product_ids: vec![product.id.clone()],
            expiration_type: ExpirationType::Duration,
            expiration_start: Some(ExpirationStart::Activation),
            expiration_days: Some(365),
            expiration_date: None,
            ip_limit: Some(5),
            seats: Some(3),
            suspended: false,
        },
    )
    .expect("Failed to create dev license");

    tracing::info!("Team: {} (id: {})", team.name, team.id);
    tracing::info!("Customer: {} (id: {})", customer.name, customer.id);
    tracing::info!("Product: {} (id: {})", product.name, product.id);
    tracing::info!("License: {} (id: {})", license_key, license.id);
    tracing::info!("Signing public key: {}", public_key);

    // Copy-paste friendly output without log formatting
    println!();
    println!("--- COPY FROM HERE ---");
    println!("  team_id: {}", team.id);
    println!("  customer_id: {}", customer.id);
    println!("  product_id: {}", product.id);
    println!("  license_id: {}", license.id);
    println!("  license_key: {}", license_key);
    println!("  public_key: {}", public_key);
    println!("--- END COPY ---");
    println!();
}

/// Spawns a background task that prunes old request logs once a day.
fn spawn_log_retention_task(state: AppState, retention_days: i64) {
    tokio::spawn(async move {
        let interval = Duration::from_secs(24 * 60 * 60);

        loop {
            tokio::time::sleep(interval).await;

            let cutoff = chrono::Utc::now().timestamp() - retention_days * 24 * 60 * 60;
            match state.db.get() {
                Ok(conn) => match queries::prune_request_logs(&conn, cutoff) {
                    Ok(count) if count > 0 => {
                        tracing::info!("Pruned {} request logs older than {} days", count, retention_days);
                    }
                    Ok(_) => {}
                    Err(e) => {
                        tracing::warn!("Failed to prune request logs: {}", e);
                    }
                },
                Err(e) => {
                    tracing::warn!("Failed to get db connection for log pruning: {}", e);
                }
            }
        }
    });

    tracing::info!("Log retention task started ({} day retention, daily sweep)", retention_days);
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "keygate=debug,tower_http=debug".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let config = Config::from_env();

    if config.dev_mode {
        tracing::info!("Running in DEVELOPMENT mode");
    }

    let db_pool = create_pool(&config.database_path).expect("Failed to create database pool");
    {
        let conn = db_pool.get().expect("Failed to get connection");
        init_db(&conn).expect("Failed to initialize database");
    }

    let state = AppState {
        db: db_pool,
        lookup: LookupHasher::from_master_key(&config.master_key),
        master_key: config.master_key.clone(),
        service_api_key: config.service_api_key.clone(),
    };

    // Prune on startup too, so restarts don't wait a day (0 = never prune)
    if config.log_retention_days > 0 {
        let conn = state.db.get().expect("Failed to get connection for pruning");
        let cutoff = chrono::Utc::now().timestamp() - config.log_retention_days * 24 * 60 * 60;
        match queries::prune_request_logs(&conn, cutoff) {
            Ok(count) if count > 0 => {
                tracing::info!("Pruned {} request logs older than {} days", count, config.log_retention_days);
            }
            Ok(_) => {}
            Err(e) => {
                tracing::warn!("Failed to prune old request logs: {}", e);
            }
        }
        spawn_log_retention_task(state.clone(), config.log_retention_days);
    }

    if cli.seed {
        if !config.dev_mode {
            tracing::warn!("--seed flag ignored: not in dev mode (set KEYGATE_ENV=dev)");
        } else {
            seed_dev_data(&state);
        }
    }

    let app = Router::new()
        // Public endpoints (heartbeat protocol, health)
        .merge(handlers::public_router(config.rate_limits.standard_rpm))
        // Issuance API (service key auth)
        .merge(handlers::admin_router(config.rate_limits.strict_rpm))
        // Payment provider webhooks (signature auth)
        .merge(rate_limit::per_ip(
            handlers::webhooks::router(),
            config.rate_limits.strict_rpm,
        ))
        .layer(TraceLayer::new_for_http())
        .layer(TimeoutLayer::new(Duration::from_secs(
            config.request_timeout_secs,
        )))
        .with_state(state);

    let addr = config.addr();
    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .expect("Failed to bind to address");

    let cleanup_on_exit = cli.ephemeral && config.dev_mode;
    let db_path = config.database_path.clone();

    if cleanup_on_exit {
        tracing::info!("EPHEMERAL MODE: database will be deleted on exit");
    }

    tracing::info!("Keygate server listening on {}", addr);

    // Connect info is required for IP-based rate limiting
    axum::serve(
        listener,
        app.into_make_service_with_connect_info::<std::net::SocketAddr>(),
    )
    .with_graceful_shutdown(shutdown_signal())
    .await
    .expect("Failed to start server");

    if cleanup_on_exit {
        tracing::info!("Cleaning up ephemeral database...");
        if let Err(e) = std::fs::remove_file(&db_path) {
            tracing::warn!("Failed to remove {}: {}", db_path, e);
        } else {
            tracing::info!("Removed {}", db_path);
        }
        let _ = std::fs::remove_file(format!("{}-wal", db_path));
        let _ = std::fs::remove_file(format!("{}-shm", db_path));
        tracing::info!("Ephemeral cleanup complete");
    }
}

async fn shutdown_signal() {
    tokio::signal::ctrl_c()
        .await
        .expect("Failed to install Ctrl+C handler");
    tracing::info!("Shutdown signal received, stopping server...");
}
