//! [`JsonFileStore`]: the flat-file backend.
//!
//! Every operation re-reads the document, mutates it and writes it back under one
//! async mutex, so operations are atomic with respect to each other inside the process.
//! Writes go to a sibling temp file followed by a rename.

use std::path::{Path, PathBuf};

use async_trait::async_trait;
use tokio::sync::Mutex;
use tracing::debug;

use crate::{
    domain::{Destination, DestinationId, UserId},
    errors::Error,
    store::{ConfigStore, DestinationPatch, Snapshot},
    Result,
};

pub struct JsonFileStore {
    path: PathBuf,
    owner: UserId,
    lock: Mutex<()>,
}

impl JsonFileStore {
    /// Open the store at `path`, creating an empty document if the file does not exist.
    pub async fn open(path: impl AsRef<Path>, owner: UserId) -> Result<Self> {
        let store = Self {
            path: path.as_ref().to_path_buf(),
            owner,
            lock: Mutex::new(()),
        };
        if !tokio::fs::try_exists(&store.path).await? {
            if let Some(parent) = store.path.parent().filter(|p| !p.as_os_str().is_empty()) {
                tokio::fs::create_dir_all(parent).await?;
            }
            store.write_doc(&Snapshot::default()).await?;
        }
        // Fail fast on a corrupt file rather than on the first command.
        store.read_doc().await?;
        Ok(store)
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    async fn read_doc(&self) -> Result<Snapshot> {
        let raw = match tokio::fs::read_to_string(&self.path).await {
            Ok(raw) => raw,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Snapshot::default()),
            Err(e) => return Err(Error::Storage(format!("read {}: {e}", self.path.display()))),
        };
        if raw.trim().is_empty() {
            return Ok(Snapshot::default());
        }
        serde_json::from_str(&raw)
            .map_err(|e| Error::Storage(format!("parse {}: {e}", self.path.display())))
    }

    async fn write_doc(&self, doc: &Snapshot) -> Result<()> {
        let body = serde_json::to_string_pretty(doc)?;
        let mut tmp = self.path.clone().into_os_string();
        tmp.push(".tmp");
        let tmp = PathBuf::from(tmp);

        tokio::fs::write(&tmp, body)
            .await
            .map_err(|e| Error::Storage(format!("write {}: {e}", tmp.display())))?;
        tokio::fs::rename(&tmp, &self.path)
            .await
            .map_err(|e| Error::Storage(format!("replace {}: {e}", self.path.display())))
    }

    /// Read-modify-write under the store lock. The document is only written when
    /// `apply` returns `Ok((true, _))`.
    async fn update<T>(&self, apply: impl FnOnce(&mut Snapshot) -> Result<(bool, T)>) -> Result<T> {
        let _guard = self.lock.lock().await;
        let mut doc = self.read_doc().await?;
        let (dirty, out) = apply(&mut doc)?;
        if dirty {
            self.write_doc(&doc).await?;
        }
        Ok(out)
    }

    async fn read(&self) -> Result<Snapshot> {
        let _guard = self.lock.lock().await;
        self.read_doc().await
    }
}

#[async_trait]
impl ConfigStore for JsonFileStore {
    fn owner(&self) -> UserId {
        self.owner
    }

    async fn upsert_destination(&self, mut dest: Destination) -> Result<()> {
        self.update(|doc| {
            match doc.destinations.iter_mut().find(|d| d.id == dest.id) {
                Some(existing) => {
                    dest.message_count = existing.message_count;
                    *existing = dest;
                }
                None => {
                    dest.message_count = 0;
                    doc.destinations.push(dest);
                }
            }
            Ok((true, ()))
        })
        .await
    }

    async fn insert_destination(&self, mut dest: Destination) -> Result<bool> {
        self.update(|doc| {
            if doc.destinations.iter().any(|d| d.id == dest.id) {
                return Ok((false, false));
            }
            dest.message_count = 0;
            doc.destinations.push(dest);
            Ok((true, true))
        })
        .await
    }

    async fn update_destination(&self, id: &DestinationId, patch: &DestinationPatch) -> Result<bool> {
        self.update(|doc| match doc.destinations.iter_mut().find(|d| &d.id == id) {
            Some(d) => {
                patch.apply(d);
                Ok((true, true))
            }
            None => Ok((false, false)),
        })
        .await
    }

    async fn remove_destination(&self, id: &DestinationId) -> Result<bool> {
        self.update(|doc| {
            let before = doc.destinations.len();
            doc.destinations.retain(|d| &d.id != id);
            let removed = doc.destinations.len() != before;
            Ok((removed, removed))
        })
        .await
    }

    async fn get_destination(&self, id: &DestinationId) -> Result<Option<Destination>> {
        let doc = self.read().await?;
        Ok(doc.destinations.into_iter().find(|d| &d.id == id))
    }

    async fn list_destinations(&self) -> Result<Vec<Destination>> {
        Ok(self.read().await?.destinations)
    }

    async fn increment_message_count(&self, id: &DestinationId) -> Result<bool> {
        self.update(|doc| match doc.destinations.iter_mut().find(|d| &d.id == id) {
            Some(d) => {
                d.message_count = d.message_count.saturating_add(1);
                Ok((true, true))
            }
            None => {
                debug!(destination = %id, "increment skipped, destination is gone");
                Ok((false, false))
            }
        })
        .await
    }

    async fn add_admin(&self, id: UserId) -> Result<()> {
        let owner = self.owner;
        self.update(|doc| {
            if id == owner || doc.admins.contains(&id) {
                return Ok((false, ()));
            }
            doc.admins.push(id);
            Ok((true, ()))
        })
        .await
    }

    async fn remove_admin(&self, id: UserId) -> Result<bool> {
        if id == self.owner {
            return Err(Error::Forbidden("the owner cannot be removed".to_string()));
        }
        self.update(|doc| {
            let before = doc.admins.len();
            doc.admins.retain(|a| *a != id);
            let removed = doc.admins.len() != before;
            Ok((removed, removed))
        })
        .await
    }

    async fn roster(&self) -> Result<Vec<UserId>> {
        let owner = self.owner;
        let doc = self.read().await?;
        Ok(doc.admins.into_iter().filter(|a| *a != owner).collect())
    }

    async fn export(&self) -> Result<Snapshot> {
        let mut doc = self.read().await?;
        doc.admins.retain(|a| *a != self.owner);
        Ok(doc)
    }

    async fn import(&self, mut snapshot: Snapshot) -> Result<()> {
        let owner = self.owner;
        snapshot.admins.retain(|a| *a != owner);
        dedup_destinations(&mut snapshot.destinations);
        let _guard = self.lock.lock().await;
        self.write_doc(&snapshot).await
    }
}

/// Keep the last record per id, at the position of its first occurrence.
fn dedup_destinations(list: &mut Vec<Destination>) {
    let mut out: Vec<Destination> = Vec::with_capacity(list.len());
    for d in list.drain(..) {
        match out.iter_mut().find(|o| o.id == d.id) {
            Some(existing) => *existing = d,
            None => out.push(d),
        }
    }
    *list = out;
}
