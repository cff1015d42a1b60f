use std::time::Duration;

use siren_common::config::AppConfig;

use crate::error::NotifierError;

/// Configuration of the delivery subsystem. Fixed at construction.
#[derive(Debug, Clone)]
pub struct NotifierConfig {
    /// Every task is POSTed here
    pub webhook_url: String,

    /// Autoscaler floor; this many workers are started immediately
    pub min_workers: usize,
    /// Autoscaler ceiling
    pub max_workers: usize,
    /// Backlog one worker is expected to absorb (`target = backlog / batch`)
    pub scale_batch_size: usize,
    /// Workers retired per tick at most, so scale-down is damped
    pub scale_down_step: usize,
    pub autoscale_interval: Duration,

    /// How often the delayed set is checked for tasks due for retry
    pub scheduler_interval: Duration,

    /// Upper bound on a single blocking pop; cancellation is re-checked after it
    pub dequeue_timeout: Duration,
    /// Upper bound on a single webhook call
    pub delivery_timeout: Duration,
    /// Upper bound on recording a retry or dead-letter decision
    pub store_write_timeout: Duration,

    /// Failed attempts after which a task is dead-lettered
    pub max_retries: u32,
    /// Backoff unit: retry `n` waits `2^n * retry_base_delay_secs` seconds
    pub retry_base_delay_secs: u64,

    /// How long shutdown waits for workers and loops to exit
    pub shutdown_timeout: Duration,
}

impl Default for NotifierConfig {
    fn default() -> Self {
        Self {
            webhook_url: "http://localhost:9090/".to_string(),
            min_workers: 2,
            max_workers: 200,
            scale_batch_size: 30,
            scale_down_step: 5,
            autoscale_interval: Duration::from_secs(1),
            scheduler_interval: Duration::from_secs(1),
            dequeue_timeout: Duration::from_secs(5),
            delivery_timeout: Duration::from_secs(10),
            store_write_timeout: Duration::from_secs(2),
            max_retries: 5,
            retry_base_delay_secs: 1,
            shutdown_timeout: Duration::from_secs(15),
        }
    }
}

impl From<&AppConfig> for NotifierConfig {
    fn from(config: &AppConfig) -> Self {
        Self {
            webhook_url: config.webhook_url.clone(),
            min_workers: config.notifier_min_workers,
            max_workers: config.notifier_max_workers,
            scale_batch_size: config.notifier_scale_batch_size,
            scale_down_step: config.notifier_scale_down_step,
            max_retries: config.notifier_max_retries,
            delivery_timeout: Duration::from_secs(config.notifier_delivery_timeout_secs),
            shutdown_timeout: Duration::from_secs(config.notifier_shutdown_timeout_secs),
            ..Self::default()
        }
    }
}

impl NotifierConfig {
    /// Reject configurations the autoscaler or the retry path cannot honour.
    pub fn validate(&self) -> Result<(), NotifierError> {
        reqwest::Url::parse(&self.webhook_url).map_err(|e| {
            NotifierError::Config(format!("invalid webhook URL {:?}: {}", self.webhook_url, e))
        })?;

        if self.max_workers == 0 {
            return Err(NotifierError::Config(
                "max_workers must be at least 1".to_string(),
            ));
        }
        if self.min_workers > self.max_workers {
            return Err(NotifierError::Config(format!(
                "min_workers ({}) exceeds max_workers ({})",
                self.min_workers, self.max_workers
            )));
        }
        if self.scale_batch_size == 0 {
            return Err(NotifierError::Config(
                "scale_batch_size must be at least 1".to_string(),
            ));
        }
        if self.scale_down_step == 0 {
            return Err(NotifierError::Config(
                "scale_down_step must be at least 1".to_string(),
            ));
        }
        if self.max_retries == 0 {
            return Err(NotifierError::Config(
                "max_retries must be at least 1".to_string(),
            ));
        }

        let durations = [
            ("autoscale_interval", self.autoscale_interval),
            ("scheduler_interval", self.scheduler_interval),
            ("dequeue_timeout", self.dequeue_timeout),
            ("delivery_timeout", self.delivery_timeout),
            ("store_write_timeout", self.store_write_timeout),
        ];
        // A zero BLPOP timeout blocks forever, and a zero tick interval panics.
        if let Some((name, _)) = durations.iter().find(|(_, d)| d.is_zero()) {
            return Err(NotifierError::Config(format!("{} must be non-zero", name)));
        }

        Ok(())
    }
}
