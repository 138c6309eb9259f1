pub mod db;
mod sqlite_impl;

use std::env;

use log::*;
use sqlx::{sqlite::SqlitePoolOptions, SqlitePool};
pub use sqlite_impl::SqliteDatabase;

pub fn db_url() -> String {
    env::var("SSC_DATABASE_URL").unwrap_or_else(|_| {
        warn!("🗃️ SSC_DATABASE_URL is not set. Using a local database file.");
        "sqlite://data/settlement.db".to_string()
    })
}

pub(crate) async fn new_pool(url: &str, max_connections: u32) -> Result<SqlitePool, sqlx::Error> {
    SqlitePoolOptions::new().max_connections(max_connections).connect(url).await
}
