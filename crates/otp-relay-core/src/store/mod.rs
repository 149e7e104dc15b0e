//! Configuration store: destinations, the admin roster and per-destination counters.
//!
//! Both the poll worker and the command surface hold the same `Arc<dyn ConfigStore>`;
//! every operation is atomic on its own, nothing is cached outside the backend.

mod json;
mod schema;
mod sqlite;

#[cfg(test)]
pub(crate) mod testing;

use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::{
    config::StorageBackend,
    domain::{Destination, DestinationId, UserId},
    Result,
};

pub use json::JsonFileStore;
pub use sqlite::SqliteStore;

/// Backend-neutral contents of a store. Also the on-disk layout of [`JsonFileStore`].
///
/// `admins` never contains the owner; the owner is implied by the running config.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Snapshot {
    #[serde(default, alias = "groups")]
    pub destinations: Vec<Destination>,
    #[serde(default)]
    pub admins: Vec<UserId>,
}

/// Field changes applied to an existing destination in one store operation.
///
/// `None` leaves a field as it is. `button: Some(None)` clears the button.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct DestinationPatch {
    pub button: Option<Option<(String, String)>>,
    pub enabled: Option<bool>,
}

impl DestinationPatch {
    pub fn apply(&self, dest: &mut Destination) {
        if let Some(button) = &self.button {
            let (label, target) = button.clone().unzip();
            dest.button_label = label;
            dest.button_target = target;
        }
        if let Some(enabled) = self.enabled {
            dest.enabled = enabled;
        }
    }
}

#[async_trait]
pub trait ConfigStore: Send + Sync {
    /// The immutable top-level principal.
    fn owner(&self) -> UserId;

    /// Insert or replace by id. Replaces metadata only: an existing `message_count` is kept.
    async fn upsert_destination(&self, dest: Destination) -> Result<()>;

    /// Insert only when no destination with that id exists. Returns whether it was inserted;
    /// an existing record is never touched.
    async fn insert_destination(&self, dest: Destination) -> Result<bool>;

    /// Apply `patch` to an existing destination. Returns `false`, writing nothing, when
    /// the destination does not exist.
    async fn update_destination(&self, id: &DestinationId, patch: &DestinationPatch) -> Result<bool>;

    /// Returns whether a destination was actually removed.
    async fn remove_destination(&self, id: &DestinationId) -> Result<bool>;

    async fn get_destination(&self, id: &DestinationId) -> Result<Option<Destination>>;

    /// Snapshot in insertion order.
    async fn list_destinations(&self) -> Result<Vec<Destination>>;

    /// Returns `false` when the destination no longer exists.
    async fn increment_message_count(&self, id: &DestinationId) -> Result<bool>;

    /// Idempotent. Adding the owner is a no-op.
    async fn add_admin(&self, id: UserId) -> Result<()>;

    /// Rejects the owner with `Error::Forbidden`. Returns whether an admin was removed.
    async fn remove_admin(&self, id: UserId) -> Result<bool>;

    /// Roster members, excluding the owner.
    async fn roster(&self) -> Result<Vec<UserId>>;

    async fn export(&self) -> Result<Snapshot>;

    /// Replace the whole store content with `snapshot`.
    async fn import(&self, snapshot: Snapshot) -> Result<()>;

    /// Owner first, then the roster.
    async fn list_admins(&self) -> Result<Vec<UserId>> {
        let mut out = vec![self.owner()];
        out.extend(self.roster().await?.into_iter().filter(|a| *a != self.owner()));
        Ok(out)
    }

    /// Owner or roster member. A failing backend leaves only the owner authorized.
    async fn is_authorized(&self, id: UserId) -> bool {
        if id == self.owner() {
            return true;
        }
        match self.roster().await {
            Ok(roster) => roster.contains(&id),
            Err(e) => {
                warn!(error = %e, user = %id, "admin roster unavailable, denying");
                false
            }
        }
    }
}

/// Read destinations, degrading to "none configured" when the backend is unavailable.
pub async fn destinations_or_empty(store: &dyn ConfigStore) -> Vec<Destination> {
    match store.list_destinations().await {
        Ok(v) => v,
        Err(e) => {
            warn!(error = %e, "destination list unavailable, treating as empty");
            Vec::new()
        }
    }
}

/// Open the backend selected at startup.
pub async fn open(backend: &StorageBackend, owner: UserId) -> Result<Arc<dyn ConfigStore>> {
    let store: Arc<dyn ConfigStore> = match backend {
        StorageBackend::JsonFile(path) => Arc::new(JsonFileStore::open(path, owner).await?),
        StorageBackend::Sqlite(path) => Arc::new(SqliteStore::open(path, owner).await?),
    };
    Ok(store)
}

/// Copy everything from one store into another (e.g. flat file to SQLite).
pub async fn migrate(from: &dyn ConfigStore, to: &dyn ConfigStore) -> Result<usize> {
    let snapshot = from.export().await?;
    let count = snapshot.destinations.len();
    to.import(snapshot).await?;
    Ok(count)
}
