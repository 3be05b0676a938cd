//! Outbox maintenance commands.

use cartkeeper::db::{self, PgStore};
use cartkeeper::outbox::{LogPublisher, OutboxConfig, OutboxPoller};

/// Deliver pending outbox events once.
///
/// Events are claimed with the same lease as the server poller, so running
/// this next to a live server never double-delivers a claimed row.
///
/// # Errors
///
/// Returns an error if the database is unreachable.
pub async fn drain(limit: Option<usize>) -> Result<(), Box<dyn std::error::Error>> {
    let database_url = super::database_url()?;
    let pool = db::create_pool(&database_url).await?;

    let poller = OutboxPoller::new(PgStore::new(pool), LogPublisher, OutboxConfig::default());
    let result = poller.drain(limit).await?;

    tracing::info!(
        delivered = result.delivered,
        released = result.released,
        "Outbox drain complete"
    );
    Ok(())
}
