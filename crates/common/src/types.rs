use serde::{Deserialize, Serialize};

/// A webhook delivery task, as carried through every Redis queue and posted
/// verbatim to the webhook endpoint.
///
/// `incident_id`, `user_id`, `x` and `y` identify the task; `retries` is the
/// only field that changes over its lifetime and it never decreases.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WebhookTask {
    pub incident_id: i64,
    pub user_id: i64,
    /// Coordinates of the user that triggered the incident
    pub x: f64,
    pub y: f64,
    /// Number of failed delivery attempts so far.
    /// Producers usually omit it; a fresh task starts at 0.
    #[serde(rename = "retries", default)]
    pub retry_count: u32,
}

impl WebhookTask {
    pub fn new(incident_id: i64, user_id: i64, x: f64, y: f64) -> Self {
        Self {
            incident_id,
            user_id,
            x,
            y,
            retry_count: 0,
        }
    }
}

/// Load snapshot of the delivery subsystem, served by the health endpoint.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeliveryStats {
    /// Tasks waiting in the main queue
    pub pending_tasks: u64,
    /// Tasks sleeping in the delayed set until their retry time
    pub delayed_tasks: u64,
    /// Tasks quarantined in the dead-letter queue
    pub dead_letter_tasks: u64,
    /// Live delivery workers
    pub active_workers: usize,
}
