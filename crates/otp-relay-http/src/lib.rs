//! Read-only HTTP status API for the OTP relay.
//!
//! Exposes health, the destination list and the worker counters as JSON. Nothing here
//! mutates state; configuration changes go through the chat commands.

mod error;
pub mod routes;
mod state;

use std::net::SocketAddr;

use axum::Router;
use tokio_util::sync::CancellationToken;
use tracing::info;

use otp_relay_core::{errors::Error, Result};

pub use error::ApiError;
pub use state::AppState;

pub fn app(state: AppState) -> Router {
    routes::router().with_state(state)
}

/// Bind `addr` and serve until `cancel` fires.
pub async fn serve(addr: SocketAddr, state: AppState, cancel: CancellationToken) -> Result<()> {
    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .map_err(|e| Error::Config(format!("failed to bind status api on {addr}: {e}")))?;
    info!(addr = %addr, "status api listening");

    axum::serve(listener, app(state))
        .with_graceful_shutdown(async move { cancel.cancelled().await })
        .await?;

    info!("status api stopped");
    Ok(())
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use async_trait::async_trait;
    use axum::{extract::State, response::IntoResponse};

    use otp_relay_core::{
        domain::{Destination, DestinationId, UserId},
        store::{ConfigStore, DestinationPatch, Snapshot, SqliteStore},
        worker::{WorkerPhase, WorkerStatus},
    };

    use super::*;

    async fn state_with(dests: &[&str]) -> AppState {
        let store = SqliteStore::open_in_memory(UserId(1)).await.unwrap();
        for raw in dests {
            store
                .upsert_destination(Destination::new(DestinationId::parse(raw).unwrap()))
                .await
                .unwrap();
        }
        AppState::new(Arc::new(store), Arc::new(WorkerStatus::new()))
    }

    #[tokio::test]
    async fn health_is_ok() {
        let body = routes::health::health().await;
        assert_eq!(body.0.status, "ok");
    }

    #[tokio::test]
    async fn destinations_are_listed_in_store_order() {
        let state = state_with(&["-2", "@feed", "-1"]).await;
        state
            .store
            .increment_message_count(&DestinationId::parse("@feed").unwrap())
            .await
            .unwrap();

        let body = routes::destinations::list(State(state)).await.unwrap();
        let json = serde_json::to_value(&body.0).unwrap();
        assert_eq!(json[0]["id"], "-2");
        assert_eq!(json[1]["id"], "@feed");
        assert_eq!(json[1]["message_count"], 1);
        assert_eq!(json[2]["enabled"], true);
    }

    #[tokio::test]
    async fn status_reports_worker_and_totals() {
        let state = state_with(&["-1", "-2"]).await;
        let body = routes::status::status(State(state)).await;
        assert_eq!(body.0.destinations, 2);
        assert_eq!(body.0.enabled, 2);
        assert_eq!(body.0.total_sent, 0);
        assert_eq!(body.0.worker.phase, WorkerPhase::Idle);

        let json = serde_json::to_value(&body.0).unwrap();
        assert_eq!(json["worker"]["phase"], "idle");
    }

    struct Down;

    #[async_trait]
    impl ConfigStore for Down {
        fn owner(&self) -> UserId {
            UserId(1)
        }
        async fn upsert_destination(&self, _: Destination) -> Result<()> {
            Err(Error::Storage("down".into()))
        }
        async fn insert_destination(&self, _: Destination) -> Result<bool> {
            Err(Error::Storage("down".into()))
        }
        async fn update_destination(&self, _: &DestinationId, _: &DestinationPatch) -> Result<bool> {
            Err(Error::Storage("down".into()))
        }
        async fn remove_destination(&self, _: &DestinationId) -> Result<bool> {
            Err(Error::Storage("down".into()))
        }
        async fn get_destination(&self, _: &DestinationId) -> Result<Option<Destination>> {
            Err(Error::Storage("down".into()))
        }
        async fn list_destinations(&self) -> Result<Vec<Destination>> {
            Err(Error::Storage("/var/lib/secret.db is locked".into()))
        }
        async fn increment_message_count(&self, _: &DestinationId) -> Result<bool> {
            Err(Error::Storage("down".into()))
        }
        async fn add_admin(&self, _: UserId) -> Result<()> {
            Err(Error::Storage("down".into()))
        }
        async fn remove_admin(&self, _: UserId) -> Result<bool> {
            Err(Error::Storage("down".into()))
        }
        async fn roster(&self) -> Result<Vec<UserId>> {
            Err(Error::Storage("down".into()))
        }
        async fn export(&self) -> Result<Snapshot> {
            Err(Error::Storage("down".into()))
        }
        async fn import(&self, _: Snapshot) -> Result<()> {
            Err(Error::Storage("down".into()))
        }
    }

    #[tokio::test]
    async fn storage_failure_is_503_without_details() {
        let state = AppState::new(Arc::new(Down), Arc::new(WorkerStatus::new()));

        let err = routes::destinations::list(State(state.clone()))
            .await
            .unwrap_err();
        assert_eq!(err.to_string(), "storage unavailable");
        let resp = err.into_response();
        assert_eq!(resp.status(), axum::http::StatusCode::SERVICE_UNAVAILABLE);

        // The status page degrades instead of failing.
        let body = routes::status::status(State(state)).await;
        assert_eq!(body.0.destinations, 0);
    }
}
