use std::{collections::HashMap, sync::Arc};

use serde::{Deserialize, Serialize};

use crate::error::StoreError;
use crate::keys::{KeyPair, SignedPreKey};
use crate::store::database::{
    IDENTITY_STORE, PREKEY_STORE, SENDERKEY_STORE, SESSION_STORE, SIGNED_PREKEY_STORE,
    StorageDatabase,
};

/// The kinds of Signal key material the store distinguishes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SignalDataKind {
    PreKey,
    Session,
    SignedIdentityKey,
    SignedPreKey,
    SenderKey,
    PeerIdentityKey,
}

impl SignalDataKind {
    fn collection_name(self) -> &'static str {
        match self {
            Self::PreKey => PREKEY_STORE,
            Self::Session => SESSION_STORE,
            Self::SignedIdentityKey | Self::PeerIdentityKey => IDENTITY_STORE,
            Self::SignedPreKey => SIGNED_PREKEY_STORE,
            Self::SenderKey => SENDERKEY_STORE,
        }
    }
}

/// Opaque byte record persisted as base64.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ByteRecord(#[serde(with = "crate::creds::serde_b64")] pub Vec<u8>);

/// Typed value stored per `{kind, id}` entry.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "data", rename_all = "snake_case")]
pub enum SignalValue {
    KeyPair(KeyPair),
    SignedPreKey(SignedPreKey),
    Record(ByteRecord),
}

/// Batched mutation: `None` deletes the id.
pub type SignalDataSet = HashMap<SignalDataKind, HashMap<String, Option<SignalValue>>>;

/// Typed key/value store over the persistence backend. Entries are created
/// on demand and only removed by explicit deletion or a full clear.
#[derive(Clone)]
pub struct SignalKeyStore {
    db: Arc<dyn StorageDatabase>,
}

impl SignalKeyStore {
    pub fn new(db: Arc<dyn StorageDatabase>) -> Self {
        Self { db }
    }

    /// Fetches a batch of ids of one kind. Only found ids appear in the
    /// result; malformed stored values are logged and omitted.
    pub async fn get(
        &self,
        kind: SignalDataKind,
        ids: &[&str],
    ) -> Result<HashMap<String, SignalValue>, StoreError> {
        let collection = self.db.collection(kind.collection_name());

        let mut out = HashMap::new();
        for id in ids {
            let Some(raw) = collection.get(id).await? else {
                continue;
            };

            match serde_json::from_str::<SignalValue>(&raw) {
                Ok(value) => {
                    out.insert((*id).to_owned(), value);
                }
                Err(error) => {
                    tracing::warn!(
                        collection = kind.collection_name(),
                        id,
                        error = %error,
                        "skipping corrupt signal store entry"
                    );
                }
            }
        }

        Ok(out)
    }

    /// Applies a batched mutation set; a `None` value deletes that id.
    pub async fn set(&self, data: SignalDataSet) -> Result<(), StoreError> {
        for (kind, entries) in data {
            let collection = self.db.collection(kind.collection_name());
            for (id, value) in entries {
                match value {
                    Some(value) => {
                        collection.set(&id, serde_json::to_string(&value)?).await?;
                    }
                    None => collection.remove(&id).await?,
                }
            }
        }

        Ok(())
    }

    /// Returns every stored session addressed to the given user. Session ids
    /// follow the `<user>.<device>` address convention.
    pub async fn all_sessions_for_user(
        &self,
        user: &str,
    ) -> Result<HashMap<String, SignalValue>, StoreError> {
        let collection = self.db.collection(SESSION_STORE);
        let prefix = format!("{user}.");

        let keys = collection.keys().await?;
        let matching: Vec<&str> = keys
            .iter()
            .map(String::as_str)
            .filter(|key| *key == user || key.starts_with(&prefix))
            .collect();

        self.get(SignalDataKind::Session, &matching).await
    }
}
