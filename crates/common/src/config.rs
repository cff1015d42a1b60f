use serde::Deserialize;

/// Global application configuration loaded from environment variables.
#[derive(Debug, Clone, Deserialize)]
pub struct AppConfig {
    /// Destination URL for every webhook delivery
    pub webhook_url: String,

    /// Redis connection string
    pub redis_url: String,

    /// Port the ingress API listens on (default: 8080)
    pub api_port: u16,

    /// Lower bound on live delivery workers (default: 2)
    pub notifier_min_workers: usize,

    /// Upper bound on live delivery workers (default: 200)
    pub notifier_max_workers: usize,

    /// Backlog handled per worker when autoscaling (default: 30)
    pub notifier_scale_batch_size: usize,

    /// Maximum workers retired per autoscaler tick (default: 5)
    pub notifier_scale_down_step: usize,

    /// Failed attempts before a task is dead-lettered (default: 5)
    pub notifier_max_retries: u32,

    /// HTTP timeout for a single delivery attempt in seconds (default: 10)
    pub notifier_delivery_timeout_secs: u64,

    /// How long shutdown waits for workers to drain in seconds (default: 15)
    pub notifier_shutdown_timeout_secs: u64,
}

impl AppConfig {
    /// Load configuration from environment variables.
    pub fn from_env() -> anyhow::Result<Self> {
        dotenvy::dotenv().ok();

        Ok(Self {
            webhook_url: std::env::var("WEBHOOK_URL")
                .map_err(|_| anyhow::anyhow!("WEBHOOK_URL environment variable is required"))?,
            redis_url: std::env::var("REDIS_URL")
                .unwrap_or_else(|_| "redis://localhost:6379".to_string()),
            api_port: parse_var("API_PORT", "8080")?,
            notifier_min_workers: parse_var("NOTIFIER_MIN_WORKERS", "2")?,
            notifier_max_workers: parse_var("NOTIFIER_MAX_WORKERS", "200")?,
            notifier_scale_batch_size: parse_var("NOTIFIER_SCALE_BATCH_SIZE", "30")?,
            notifier_scale_down_step: parse_var("NOTIFIER_SCALE_DOWN_STEP", "5")?,
            notifier_max_retries: parse_var("NOTIFIER_MAX_RETRIES", "5")?,
            notifier_delivery_timeout_secs: parse_var("NOTIFIER_DELIVERY_TIMEOUT_SECS", "10")?,
            notifier_shutdown_timeout_secs: parse_var("NOTIFIER_SHUTDOWN_TIMEOUT_SECS", "15")?,
        })
    }
}

fn parse_var<T: std::str::FromStr>(name: &str, default: &str) -> anyhow::Result<T> {
    std::env::var(name)
        .unwrap_or_else(|_| default.to_string())
        .parse()
        .map_err(|_| {
            anyhow::anyhow!(
                "{} must be a valid {}",
                name,
                std::any::type_name::<T>()
            )
        })
}
