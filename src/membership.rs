// In-memory exact set of watched addresses.
//
// Every broadcast transaction is pre-screened here before any store lookup,
// so a false negative is a correctness bug. A stale positive is fine; the
// intake resolves it against the store. Writes come only from the control
// surface and the initial load, so a read-write lock fits. The lock is
// never held across I/O.

use crate::db::{address, Db, StoreError};
use std::collections::HashSet;
use tokio::sync::RwLock;
use tracing::info;

#[derive(Default)]
pub struct AddressSet {
    inner: RwLock<HashSet<String>>,
}

impl AddressSet {
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns true when the address was not present before.
    pub async fn add(&self, address: &str) -> bool {
        self.inner.write().await.insert(address.to_string())
    }

    pub async fn add_many<I, S>(&self, addresses: I)
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let mut set = self.inner.write().await;
        for addr in addresses {
            set.insert(addr.into());
        }
    }

    pub async fn remove(&self, address: &str) -> bool {
        self.inner.write().await.remove(address)
    }

    pub async fn contains(&self, address: &str) -> bool {
        self.inner.read().await.contains(address)
    }

    /// The subset of `candidates` currently watched.
    pub async fn filter<'a, I>(&self, candidates: I) -> Vec<String>
    where
        I: IntoIterator<Item = &'a str>,
    {
        let set = self.inner.read().await;
        candidates
            .into_iter()
            .filter(|a| set.contains(*a))
            .map(|a| a.to_string())
            .collect()
    }

    pub async fn len(&self) -> usize {
        self.inner.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.inner.read().await.is_empty()
    }

    /// Replace the set with every active address from the store, in one
    /// pass. Called once at startup.
    pub async fn load_from_store(&self, db: &Db) -> Result<usize, StoreError> {
        let ids = address::all_active_ids(db).await?;
        let count = ids.len();
        let mut set = self.inner.write().await;
        set.clear();
        set.extend(ids);
        info!("Membership set loaded with {} active addresses", count);
        Ok(count)
    }
}
