//! Test utilities and fixtures for Keygate integration tests

#![allow(dead_code)]

use axum::Router;
use axum::extract::connect_info::MockConnectInfo;
use axum::routing::post;
use r2d2::Pool;
use r2d2_sqlite::SqliteConnectionManager;
use rusqlite::Connection;
use std::net::SocketAddr;

pub use keygate::crypto::{self, LookupHasher, MasterKey};
pub use keygate::db::{AppState, init_db, queries};
pub use keygate::handlers;
pub use keygate::models::*;
pub use keygate::validation::{Outcome, ValidationContext, Validator, Verdict, VerdictCode};

/// Create a test master key (deterministic for testing)
pub fn test_master_key() -> MasterKey {
    // Fixed 32 zero bytes - ONLY for testing!
    MasterKey::from_bytes([0u8; 32])
}

pub fn test_lookup() -> LookupHasher {
    LookupHasher::from_master_key(&test_master_key())
}

/// Create an in-memory test database with schema initialized
pub fn setup_test_db() -> Connection {
    let conn = Connection::open_in_memory().expect("Failed to create in-memory database");
    init_db(&conn).expect("Failed to initialize schema");
    conn
}

/// Create a test team
pub fn create_test_team(conn: &Connection, name: &str) -> Team {
    queries::create_team(conn, name).expect("Failed to create test team")
}

/// Create a test team with a signing key pair, returning the team and the
/// base64 public key
pub fn create_test_team_with_keys(conn: &Connection, master_key: &MasterKey) -> (Team, String) {
    let team = create_test_team(conn, "Test Team");
    let (private_key, public_key) = crypto::generate_keypair();
    let encrypted = master_key
        .encrypt(&team.id, &private_key)
        .expect("Failed to encrypt test signing key");
    queries::create_key_pair(conn, &team.id, &encrypted, &public_key)
        .expect("Failed to create test key pair");
    (team, public_key)
}

pub fn set_test_settings(conn: &Connection, team_id: &str, settings: &TeamSettings) {
    queries::upsert_team_settings(conn, team_id, settings)
        .expect("Failed to upsert test team settings");
}

pub fn create_test_customer(conn: &Connection, team_id: &str, email: &str) -> Customer {
    let input = CreateCustomer {
        name: format!("Test Customer {}", email),
        email: Some(email.to_string()),
    };
    queries::create_customer(conn, team_id, &input).expect("Failed to create test customer")
}

pub fn create_test_product(conn: &Connection, team_id: &str, name: &str) -> Product {
    let input = CreateProduct {
        name: name.to_string(),
    };
    queries::create_product(conn, team_id, &input).expect("Failed to create test product")
}

/// A minimal issuance input: never expires, no bindings, no limits.
/// Tests override the fields they exercise.
pub fn license_input(license_key: &str) -> CreateLicense {
    CreateLicense {
        license_key: license_key.to_string(),
        customer_ids: vec![],
        product_ids: vec![],
        expiration_type: ExpirationType::None,
        expiration_start: None,
        expiration_days: None,
        expiration_date: None,
        ip_limit: None,
        seats: None,
        suspended: false,
    }
}

pub fn create_test_license(conn: &Connection, team_id: &str, input: &CreateLicense) -> License {
    queries::issue_license(conn, &test_lookup(), &test_master_key(), team_id, input)
        .expect("Failed to create test license")
}

/// Validation context for a plain heartbeat with no bindings or challenge
pub fn test_context(client_identifier: &str) -> ValidationContext {
    ValidationContext {
        customer_id: None,
        product_id: None,
        client_identifier: client_identifier.to_string(),
        ip_address: "198.51.100.1".to_string(),
        challenge: None,
    }
}

/// Get the current timestamp
pub fn now() -> i64 {
    chrono::Utc::now().timestamp()
}

/// Get a future timestamp (days from now)
pub fn future_timestamp(days: i64) -> i64 {
    now() + (days * 86400)
}

/// Get a past timestamp (days ago)
pub fn past_timestamp(days: i64) -> i64 {
    now() - (days * 86400)
}

/// Create an AppState for testing.
///
/// The pool is capped at one connection so every pool checkout sees the same
/// in-memory database.
pub fn create_test_app_state() -> AppState {
    let master_key = test_master_key();

    let manager = SqliteConnectionManager::memory();
    let pool = Pool::builder().max_size(1).build(manager).unwrap();
    {
        let conn = pool.get().unwrap();
        init_db(&conn).unwrap();
    }

    AppState {
        db: pool,
        lookup: LookupHasher::from_master_key(&master_key),
        master_key,
        service_api_key: Some("test-service-key".to_string()),
    }
}

/// Create a Router with all endpoints (without rate limiting for tests).
/// `MockConnectInfo` supplies the peer address that `axum::serve` would.
pub fn test_app(state: AppState) -> Router {
    Router::new()
        .route(
            "/v1/license/{team_id}/heartbeat",
            post(handlers::heartbeat::heartbeat),
        )
        .route(
            "/v1/teams/{team_id}/licenses",
            post(handlers::licenses::issue_license),
        )
        .merge(handlers::webhooks::router())
        .layer(MockConnectInfo(SocketAddr::from(([127, 0, 0, 1], 9000))))
        .with_state(state)
}
