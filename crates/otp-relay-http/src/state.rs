//! Application state shared across handlers.

use std::sync::Arc;

use otp_relay_core::{store::ConfigStore, worker::WorkerStatus};

/// Shared application state.
#[derive(Clone)]
pub struct AppState {
    /// The same store the worker and the chat commands use.
    pub store: Arc<dyn ConfigStore>,
    /// Live worker counters.
    pub status: Arc<WorkerStatus>,
}

impl AppState {
    pub fn new(store: Arc<dyn ConfigStore>, status: Arc<WorkerStatus>) -> Self {
        Self { store, status }
    }
}
