mod from_row;
mod schema;
pub mod queries;

pub use schema::init_db;

use r2d2::Pool;
use r2d2_sqlite::SqliteConnectionManager;

use crate::crypto::{LookupHasher, MasterKey};

pub type DbPool = Pool<SqliteConnectionManager>;

/// Application state holding the database pool and crypto handles
#[derive(Clone)]
pub struct AppState {
    pub db: DbPool,
    pub master_key: MasterKey,
    pub lookup: LookupHasher,
    /// Bearer token guarding the issuance API (None = issuance disabled)
    pub service_api_key: Option<String>,
}

pub fn create_pool(database_path: &str) -> Result<DbPool, r2d2::Error> {
    let manager = SqliteConnectionManager::file(database_path);
    Pool::builder().max_size(10).build(manager)
}
