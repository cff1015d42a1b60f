use redis::Client;
use redis::aio::ConnectionManager;

/// Open a Redis client and a connection manager for async operations.
///
/// The client is returned alongside the manager so callers can open
/// dedicated connections for blocking commands (`BLPOP`), which must not
/// share the multiplexed connection.
pub async fn create_redis_pool(redis_url: &str) -> anyhow::Result<(Client, ConnectionManager)> {
    let client = Client::open(redis_url)?;
    let manager = ConnectionManager::new(client.clone()).await?;

    tracing::info!("Connected to Redis");
    Ok((client, manager))
}
