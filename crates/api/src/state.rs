//! Shared application state for the Axum API server.

use siren_notifier::NotifierHandle;

/// Application state shared across all route handlers via Axum `State`.
#[derive(Clone)]
pub struct AppState {
    pub notifier: NotifierHandle,
}

impl AppState {
    pub fn new(notifier: NotifierHandle) -> Self {
        Self { notifier }
    }
}
