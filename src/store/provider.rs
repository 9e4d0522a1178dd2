use std::sync::Arc;

use tokio::sync::Mutex;

use crate::creds::{AuthenticationCreds, init_auth_creds};
use crate::error::StoreError;
use crate::store::database::{ALL_COLLECTIONS, AUTH_CREDS, CREDS_KEY, StorageDatabase};
use crate::store::keystore::SignalKeyStore;

/// Credentials plus key store over a pluggable persistence backend.
///
/// `save_creds` is atomic from the caller's perspective: overlapping saves
/// (and `clear_data`) are serialised by an internal mutex, and success is
/// only reported once the backend accepted the bytes.
pub struct AuthStateProvider {
    pub creds: AuthenticationCreds,
    pub keys: SignalKeyStore,
    db: Arc<dyn StorageDatabase>,
    save_lock: Mutex<()>,
}

impl AuthStateProvider {
    /// Loads persisted credentials, or initialises and saves a fresh set.
    pub async fn init(db: Arc<dyn StorageDatabase>) -> Result<Self, StoreError> {
        let creds = match db.collection(AUTH_CREDS).get(CREDS_KEY).await? {
            Some(raw) => match serde_json::from_str::<AuthenticationCreds>(&raw) {
                Ok(creds) => creds,
                Err(error) => {
                    tracing::warn!(error = %error, "stored creds are corrupt, reinitialising");
                    init_auth_creds()
                }
            },
            None => init_auth_creds(),
        };

        let provider = Self {
            creds,
            keys: SignalKeyStore::new(db.clone()),
            db,
            save_lock: Mutex::new(()),
        };
        provider.save_creds().await?;
        Ok(provider)
    }

    /// Persists the in-memory credentials.
    pub async fn save_creds(&self) -> Result<(), StoreError> {
        let _guard = self.save_lock.lock().await;
        let serialized = serde_json::to_string(&self.creds)?;
        self.db
            .collection(AUTH_CREDS)
            .set(CREDS_KEY, serialized)
            .await
    }

    /// Wipes every collection and resets credentials to a fresh set.
    pub async fn clear_data(&mut self) -> Result<(), StoreError> {
        let _guard = self.save_lock.lock().await;
        for name in ALL_COLLECTIONS {
            self.db.collection(name).clear().await?;
        }

        self.creds = init_auth_creds();
        let serialized = serde_json::to_string(&self.creds)?;
        self.db
            .collection(AUTH_CREDS)
            .set(CREDS_KEY, serialized)
            .await
    }
}
