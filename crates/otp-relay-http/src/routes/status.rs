use axum::{extract::State, Json};
use serde::Serialize;

use otp_relay_core::{store::destinations_or_empty, worker::StatusSnapshot};

use crate::state::AppState;

#[derive(Debug, Serialize)]
pub struct StatusBody {
    pub worker: StatusSnapshot,
    pub destinations: usize,
    pub enabled: usize,
    pub total_sent: u64,
}

pub async fn status(State(state): State<AppState>) -> Json<StatusBody> {
    let dests = destinations_or_empty(state.store.as_ref()).await;
    Json(StatusBody {
        worker: state.status.snapshot().await,
        destinations: dests.len(),
        enabled: dests.iter().filter(|d| d.enabled).count(),
        total_sent: dests.iter().map(|d| d.message_count).sum(),
    })
}
