use axum::{extract::State, Json};

use otp_relay_core::domain::Destination;

use crate::{error::Result, state::AppState};

/// Every configured destination, in store order, with its counter.
pub async fn list(State(state): State<AppState>) -> Result<Json<Vec<Destination>>> {
    Ok(Json(state.store.list_destinations().await?))
}
