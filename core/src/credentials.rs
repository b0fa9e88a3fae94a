use crate::error::ChatError;
use crate::store::KeyValueStore;
use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::{debug, warn};

pub const ACCESS_TOKEN_KEY: &str = "access_token";
pub const REFRESH_TOKEN_KEY: &str = "refresh_token";
pub const IDENTITY_KEY: &str = "user";

/// Opaque bearer/refresh token pair as issued by the backend.
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CredentialPair {
    pub access_token: String,
    pub refresh_token: String,
}

impl CredentialPair {
    pub fn new(access_token: impl Into<String>, refresh_token: impl Into<String>) -> Self {
        Self {
            access_token: access_token.into(),
            refresh_token: refresh_token.into(),
        }
    }
}

// Tokens never end up in logs.
impl std::fmt::Debug for CredentialPair {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CredentialPair")
            .field("access_token", &"<redacted>")
            .field("refresh_token", &"<redacted>")
            .finish()
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "UPPERCASE")]
pub enum Role {
    Admin,
    Member,
}

/// The authenticated user.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct Identity {
    pub id: String,
    pub email: String,
    pub name: String,
    pub role: Role,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Identity {
    pub fn is_admin(&self) -> bool {
        self.role == Role::Admin
    }

    pub fn is_member(&self) -> bool {
        self.role == Role::Member
    }
}

#[derive(Debug, Clone)]
struct Session {
    pair: CredentialPair,
    identity: Identity,
}

/// Single source of truth for the signed-in session.
///
/// Cheap to clone; every clone shares the same cache and backing entries.
/// Only `set`, `replace_pair` and `clear` write the persisted keys.
#[derive(Clone)]
pub struct CredentialStore {
    session: Arc<RwLock<Option<Session>>>,
    backend: KeyValueStore,
}

impl CredentialStore {
    /// Opens the store and restores any complete persisted session.
    pub fn open(backend: KeyValueStore) -> Self {
        let store = Self {
            session: Arc::new(RwLock::new(None)),
            backend,
        };
        store.restore();
        store
    }

    pub fn in_memory() -> Self {
        Self::open(KeyValueStore::in_memory())
    }

    pub fn get(&self) -> Option<CredentialPair> {
        self.session.read().as_ref().map(|s| s.pair.clone())
    }

    pub fn identity(&self) -> Option<Identity> {
        self.session.read().as_ref().map(|s| s.identity.clone())
    }

    pub fn access_token(&self) -> Option<String> {
        self.session
            .read()
            .as_ref()
            .map(|s| s.pair.access_token.clone())
    }

    pub fn refresh_token(&self) -> Option<String> {
        self.session
            .read()
            .as_ref()
            .map(|s| s.pair.refresh_token.clone())
    }

    pub fn is_authenticated(&self) -> bool {
        self.session.read().is_some()
    }

    pub fn set(&self, pair: CredentialPair, identity: Identity) -> Result<(), ChatError> {
        let serialized = serde_json::to_string(&identity)?;
        self.persist(&pair, Some(&serialized))?;
        *self.session.write() = Some(Session { pair, identity });
        debug!("credentials stored");
        Ok(())
    }

    /// Swaps in a renewed pair, keeping the identity.
    pub fn replace_pair(&self, pair: CredentialPair) -> Result<(), ChatError> {
        if self.session.read().is_none() {
            return Err(ChatError::SessionExpired);
        }
        self.persist(&pair, None)?;
        if let Some(session) = self.session.write().as_mut() {
            session.pair = pair;
        }
        debug!("credential pair renewed");
        Ok(())
    }

    /// Forgets the session. Never fails: disk errors are logged and the
    /// in-memory session is dropped regardless.
    pub fn clear(&self) {
        *self.session.write() = None;
        for key in [ACCESS_TOKEN_KEY, REFRESH_TOKEN_KEY, IDENTITY_KEY] {
            if let Err(err) = self.backend.remove(key) {
                warn!(key, error = %err, "failed to remove persisted credential");
            }
        }
    }

    /// Reloads the persisted session. Anything short of all three entries with
    /// a readable identity is discarded so the user signs in again.
    pub fn restore(&self) -> Option<Identity> {
        match self.load_persisted() {
            Ok(Some(session)) => {
                let identity = session.identity.clone();
                *self.session.write() = Some(session);
                Some(identity)
            }
            Ok(None) => {
                *self.session.write() = None;
                None
            }
            Err(reason) => {
                warn!(%reason, "discarding partial persisted session");
                self.clear();
                None
            }
        }
    }

    fn load_persisted(&self) -> Result<Option<Session>, String> {
        let read = |key: &str| self.backend.read(key).map_err(|err| format!("{err:#}"));
        let access = read(ACCESS_TOKEN_KEY)?;
        let refresh = read(REFRESH_TOKEN_KEY)?;
        let identity = read(IDENTITY_KEY)?;
        match (access, refresh, identity) {
            (None, None, None) => Ok(None),
            (Some(access), Some(refresh), Some(identity)) => {
                let identity: Identity = serde_json::from_str(&identity)
                    .map_err(|err| format!("identity is unreadable: {err}"))?;
                Ok(Some(Session {
                    pair: CredentialPair::new(access, refresh),
                    identity,
                }))
            }
            _ => Err("only some session entries are present".to_string()),
        }
    }

    fn persist(&self, pair: &CredentialPair, identity: Option<&str>) -> Result<(), ChatError> {
        let result = self
            .backend
            .write(ACCESS_TOKEN_KEY, &pair.access_token)
            .and_then(|_| self.backend.write(REFRESH_TOKEN_KEY, &pair.refresh_token))
            .and_then(|_| match identity {
                Some(identity) => self.backend.write(IDENTITY_KEY, identity),
                None => Ok(()),
            });
        if let Err(err) = result {
            warn!(error = %err, "failed to persist credentials, clearing session");
            self.clear();
            return Err(ChatError::Storage(format!("{err:#}")));
        }
        Ok(())
    }
}

#[cfg(test)]
pub(crate) fn test_identity() -> Identity {
    let now = Utc::now();
    Identity {
        id: "user-1".into(),
        email: "ada@example.com".into(),
        name: "Ada".into(),
        role: Role::Member,
        created_at: now,
        updated_at: now,
    }
}
