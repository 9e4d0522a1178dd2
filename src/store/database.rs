use std::{
    collections::HashMap,
    sync::{Arc, RwLock},
};

use async_trait::async_trait;

use crate::error::StoreError;

/// Collection holding the single credentials record.
pub const AUTH_CREDS: &str = "auth-creds";
/// Key of the credentials record inside [`AUTH_CREDS`].
pub const CREDS_KEY: &str = "creds";
pub const PREKEY_STORE: &str = "prekey-store";
pub const SESSION_STORE: &str = "session-store";
pub const IDENTITY_STORE: &str = "identity-store";
pub const SIGNED_PREKEY_STORE: &str = "signed-prekey-store";
pub const SENDERKEY_STORE: &str = "senderkey-store";

/// Every collection the core touches, in clear-data order.
pub const ALL_COLLECTIONS: [&str; 6] = [
    PREKEY_STORE,
    SESSION_STORE,
    IDENTITY_STORE,
    SIGNED_PREKEY_STORE,
    SENDERKEY_STORE,
    AUTH_CREDS,
];

/// One named key/value collection inside the persistence backend. Values
/// are serialized strings; per-key operations are expected to be atomic.
#[async_trait]
pub trait Collection: Send + Sync {
    async fn get(&self, key: &str) -> Result<Option<String>, StoreError>;
    async fn set(&self, key: &str, value: String) -> Result<(), StoreError>;
    async fn remove(&self, key: &str) -> Result<(), StoreError>;
    async fn keys(&self) -> Result<Vec<String>, StoreError>;
    async fn clear(&self) -> Result<(), StoreError>;
}

/// Persistence backend consumed by the auth state and key store.
pub trait StorageDatabase: Send + Sync {
    /// Returns the named collection, creating it on first use.
    fn collection(&self, name: &str) -> Arc<dyn Collection>;
}

/// In-memory backend used by tests and lightweight local runs.
#[derive(Default)]
pub struct MemoryDatabase {
    collections: RwLock<HashMap<String, Arc<MemoryCollection>>>,
}

impl MemoryDatabase {
    pub fn new() -> Self {
        Self::default()
    }
}

impl StorageDatabase for MemoryDatabase {
    fn collection(&self, name: &str) -> Arc<dyn Collection> {
        if let Some(existing) = self
            .collections
            .read()
            .expect("collection map lock")
            .get(name)
        {
            return existing.clone();
        }

        let mut guard = self.collections.write().expect("collection map lock");
        guard
            .entry(name.to_owned())
            .or_insert_with(|| Arc::new(MemoryCollection::default()))
            .clone()
    }
}

#[derive(Default)]
struct MemoryCollection {
    entries: RwLock<HashMap<String, String>>,
}

#[async_trait]
impl Collection for MemoryCollection {
    async fn get(&self, key: &str) -> Result<Option<String>, StoreError> {
        Ok(self.entries.read().expect("collection lock").get(key).cloned())
    }

    async fn set(&self, key: &str, value: String) -> Result<(), StoreError> {
        self.entries
            .write()
            .expect("collection lock")
            .insert(key.to_owned(), value);
        Ok(())
    }

    async fn remove(&self, key: &str) -> Result<(), StoreError> {
        self.entries.write().expect("collection lock").remove(key);
        Ok(())
    }

    async fn keys(&self) -> Result<Vec<String>, StoreError> {
        Ok(self
            .entries
            .read()
            .expect("collection lock")
            .keys()
            .cloned()
            .collect())
    }

    async fn clear(&self) -> Result<(), StoreError> {
        self.entries.write().expect("collection lock").clear();
        Ok(())
    }
}
