mod from_row;
mod schema;
pub mod queries;

pub use schema::init_db;

use std::sync::Arc;

use r2d2::Pool;
use r2d2_sqlite::SqliteConnectionManager;

use crate::livescore::LiveScoreCache;
use crate::payments::StripeConfig;

pub type DbPool = Pool<SqliteConnectionManager>;

/// Application state shared across handlers.
#[derive(Clone)]
pub struct AppState {
    pub db: DbPool,
    /// Public base URL of this service (for success/cancel redirect URLs)
    pub base_url: String,
    /// Where the payment provider sends the browser after checkout
    pub success_page_url: String,
    /// Stripe credentials. None when the secret key is not configured, in
    /// which case checkout/webhook routes answer with a configuration error.
    pub stripe: Option<StripeConfig>,
    /// TTL cache in front of the live-score upstream
    pub livescore: Arc<LiveScoreCache>,
}

pub fn create_pool(database_path: &str) -> Result<DbPool, r2d2::Error> {
    let manager = SqliteConnectionManager::file(database_path);
    Pool::builder().max_size(10).build(manager)
}
