//! CLI command implementations.

pub mod migrate;
pub mod outbox;
pub mod seed;

use secrecy::SecretString;

/// Load `.env` and resolve the database URL.
fn database_url() -> Result<SecretString, cartkeeper::config::ConfigError> {
    dotenvy::dotenv().ok();
    cartkeeper::config::get_database_url("CARTKEEPER_DATABASE_URL")
}
