//! Store doubles for tests in other modules.

use std::time::Duration;

use async_trait::async_trait;

use crate::{
    domain::{Destination, DestinationId, UserId},
    errors::Error,
    store::{ConfigStore, DestinationPatch, Snapshot},
    Result,
};

/// Every operation fails with a backend-specific message that must never reach users.
pub(crate) struct Unavailable {
    pub owner: UserId,
}

pub(crate) const UNAVAILABLE_DETAIL: &str = "database /var/lib/otp-relay/relay.db is locked";

fn down<T>() -> Result<T> {
    Err(Error::Storage(UNAVAILABLE_DETAIL.to_string()))
}

#[async_trait]
impl ConfigStore for Unavailable {
    fn owner(&self) -> UserId {
        self.owner
    }
    async fn upsert_destination(&self, _: Destination) -> Result<()> {
        down()
    }
    async fn insert_destination(&self, _: Destination) -> Result<bool> {
        down()
    }
    async fn update_destination(&self, _: &DestinationId, _: &DestinationPatch) -> Result<bool> {
        down()
    }
    async fn remove_destination(&self, _: &DestinationId) -> Result<bool> {
        down()
    }
    async fn get_destination(&self, _: &DestinationId) -> Result<Option<Destination>> {
        down()
    }
    async fn list_destinations(&self) -> Result<Vec<Destination>> {
        down()
    }
    async fn increment_message_count(&self, _: &DestinationId) -> Result<bool> {
        down()
    }
    async fn add_admin(&self, _: UserId) -> Result<()> {
        down()
    }
    async fn remove_admin(&self, _: UserId) -> Result<bool> {
        down()
    }
    async fn roster(&self) -> Result<Vec<UserId>> {
        down()
    }
    async fn export(&self) -> Result<Snapshot> {
        down()
    }
    async fn import(&self, _: Snapshot) -> Result<()> {
        down()
    }
}

/// Delegates to `inner`, but point reads take `delay`. Widens any window between a
/// read and a later write made from its result.
pub(crate) struct SlowReads<S> {
    pub inner: S,
    pub delay: Duration,
}

#[async_trait]
impl<S: ConfigStore> ConfigStore for SlowReads<S> {
    fn owner(&self) -> UserId {
        self.inner.owner()
    }
    async fn upsert_destination(&self, dest: Destination) -> Result<()> {
        self.inner.upsert_destination(dest).await
    }
    async fn insert_destination(&self, dest: Destination) -> Result<bool> {
        self.inner.insert_destination(dest).await
    }
    async fn update_destination(&self, id: &DestinationId, patch: &DestinationPatch) -> Result<bool> {
        self.inner.update_destination(id, patch).await
    }
    async fn remove_destination(&self, id: &DestinationId) -> Result<bool> {
        self.inner.remove_destination(id).await
    }
    async fn get_destination(&self, id: &DestinationId) -> Result<Option<Destination>> {
        tokio::time::sleep(self.delay).await;
        self.inner.get_destination(id).await
    }
    async fn list_destinations(&self) -> Result<Vec<Destination>> {
        self.inner.list_destinations().await
    }
    async fn increment_message_count(&self, id: &DestinationId) -> Result<bool> {
        self.inner.increment_message_count(id).await
    }
    async fn add_admin(&self, id: UserId) -> Result<()> {
        self.inner.add_admin(id).await
    }
    async fn remove_admin(&self, id: UserId) -> Result<bool> {
        self.inner.remove_admin(id).await
    }
    async fn roster(&self) -> Result<Vec<UserId>> {
        self.inner.roster().await
    }
    async fn export(&self) -> Result<Snapshot> {
        self.inner.export().await
    }
    async fn import(&self, snapshot: Snapshot) -> Result<()> {
        self.inner.import(snapshot).await
    }
}
