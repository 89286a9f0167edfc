//! Process-wide session context
//!
//! The session credential is a single opaque string. It is read once at
//! startup from local storage, written by login and cleared by logout. Every
//! gateway call reads it at call time through a shared [`SessionContext`].

use crate::error::Result;
use crate::storage::LocalStore;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::sync::{Arc, RwLock};
use tracing::{debug, info};
use uuid::Uuid;

/// Local storage key of the session credential
pub const TOKEN_KEY: &str = "orbita_token";

/// Local storage key of the notification preference map
pub const NOTIF_PREFS_KEY: &str = "orbita_notif_prefs";

/// Prefix of the per-lead chat session id keys
pub const CHAT_SESSION_PREFIX: &str = "orbita_session_";

/// Shared handle to the session credential and its persistence
#[derive(Clone, Default)]
pub struct SessionContext {
    token: Arc<RwLock<Option<String>>>,
    store: Option<LocalStore>,
}

impl std::fmt::Debug for SessionContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SessionContext")
            .field("authenticated", &self.is_authenticated())
            .field("persistent", &self.store.is_some())
            .finish()
    }
}

impl SessionContext {
    /// Session that lives only in memory
    pub fn detached() -> Self {
        Self::default()
    }

    /// Session seeded with a credential, without persistence
    pub fn with_token(token: impl Into<String>) -> Self {
        let session = Self::default();
        session.set_cached(Some(token.into()));
        session
    }

    /// Load the persisted credential from local storage
    pub async fn init(store: LocalStore) -> Result<Self> {
        let token = store.get(TOKEN_KEY).await?.filter(|t| !t.is_empty());
        debug!("Session initialized (authenticated: {})", token.is_some());
        Ok(Self {
            token: Arc::new(RwLock::new(token)),
            store: Some(store),
        })
    }

    /// Current credential, if any
    pub fn token(&self) -> Option<String> {
        match self.token.read() {
            Ok(guard) => guard.clone(),
            Err(poisoned) => poisoned.into_inner().clone(),
        }
    }

    pub fn is_authenticated(&self) -> bool {
        self.token().is_some()
    }

    fn set_cached(&self, value: Option<String>) {
        match self.token.write() {
            Ok(mut guard) => *guard = value,
            Err(poisoned) => *poisoned.into_inner() = value,
        }
    }

    /// Store a new credential (login)
    pub async fn set_token(&self, token: &str) -> Result<()> {
        if let Some(store) = &self.store {
            store.set(TOKEN_KEY, token).await?;
        }
        self.set_cached(Some(token.to_string()));
        info!("Session credential stored");
        Ok(())
    }

    /// Drop the credential (logout)
    pub async fn clear(&self) -> Result<()> {
        if let Some(store) = &self.store {
            store.remove(TOKEN_KEY).await?;
        }
        self.set_cached(None);
        info!("Session cleared");
        Ok(())
    }

    pub fn store(&self) -> Option<&LocalStore> {
        self.store.as_ref()
    }

    /// Chat session id for a lead, created and persisted on first use
    pub async fn chat_session_id(&self, lead_id: &str) -> Result<String> {
        let key = format!("{}{}", CHAT_SESSION_PREFIX, lead_id);
        let Some(store) = &self.store else {
            return Ok(Uuid::new_v4().to_string());
        };

        if let Some(existing) = store.get(&key).await? {
            return Ok(existing);
        }

        let id = Uuid::new_v4().to_string();
        store.set(&key, &id).await?;
        debug!("Created chat session {} for lead {}", id, lead_id);
        Ok(id)
    }

    /// Read notification preferences (all enabled when never saved)
    pub async fn notification_prefs(&self) -> Result<NotificationPrefs> {
        let stored = match &self.store {
            Some(store) => store.get_json::<BTreeMap<String, bool>>(NOTIF_PREFS_KEY).await?,
            None => None,
        };
        Ok(NotificationPrefs::from_stored(stored.unwrap_or_default()))
    }

    pub async fn save_notification_prefs(&self, prefs: &NotificationPrefs) -> Result<()> {
        if let Some(store) = &self.store {
            store.set_json(NOTIF_PREFS_KEY, &prefs.values).await?;
        }
        Ok(())
    }
}

/// Flat map of notification toggles
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NotificationPrefs {
    values: BTreeMap<String, bool>,
}

impl NotificationPrefs {
    /// Toggles known to the settings page
    pub const KEYS: [&'static str; 5] = [
        "nuevo_lead",
        "cotizacion_enviada",
        "reunion_agendada",
        "lead_calificado",
        "alerta_sistema",
    ];

    /// Merge stored values over all-true defaults
    pub fn from_stored(stored: BTreeMap<String, bool>) -> Self {
        let mut values: BTreeMap<String, bool> =
            Self::KEYS.iter().map(|k| (k.to_string(), true)).collect();
        values.extend(stored);
        Self { values }
    }

    pub fn get(&self, key: &str) -> bool {
        self.values.get(key).copied().unwrap_or(true)
    }

    pub fn set(&mut self, key: &str, enabled: bool) {
        self.values.insert(key.to_string(), enabled);
    }

    /// Flip a toggle and return its new value
    pub fn toggle(&mut self, key: &str) -> bool {
        let next = !self.get(key);
        self.set(key, next);
        next
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, bool)> {
        self.values.iter().map(|(k, v)| (k.as_str(), *v))
    }
}

impl Default for NotificationPrefs {
    fn default() -> Self {
        Self::from_stored(BTreeMap::new())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_token_lifecycle_persists() {
        let store = LocalStore::in_memory().await.unwrap();
        let session = SessionContext::init(store.clone()).await.unwrap();
        assert!(!session.is_authenticated());

        session.set_token("abc").await.unwrap();
        assert_eq!(session.token().as_deref(), Some("abc"));

        // A fresh context over the same storage sees the credential
        let reloaded = SessionContext::init(store.clone()).await.unwrap();
        assert_eq!(reloaded.token().as_deref(), Some("abc"));

        session.clear().await.unwrap();
        assert!(!session.is_authenticated());
        assert_eq!(store.get(TOKEN_KEY).await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_clones_share_the_credential() {
        let session = SessionContext::detached();
        let other = session.clone();
        session.set_token("shared").await.unwrap();
        assert_eq!(other.token().as_deref(), Some("shared"));
    }

    #[tokio::test]
    async fn test_chat_session_id_is_stable_per_lead() {
        let store = LocalStore::in_memory().await.unwrap();
        let session = SessionContext::init(store).await.unwrap();

        let a1 = session.chat_session_id("A").await.unwrap();
        let a2 = session.chat_session_id("A").await.unwrap();
        let b = session.chat_session_id("B").await.unwrap();

        assert_eq!(a1, a2);
        assert_ne!(a1, b);
    }

    #[tokio::test]
    async fn test_notification_prefs_default_all_true() {
        let store = LocalStore::in_memory().await.unwrap();
        let session = SessionContext::init(store).await.unwrap();

        let mut prefs = session.notification_prefs().await.unwrap();
        assert!(NotificationPrefs::KEYS.iter().all(|k| prefs.get(k)));

        assert!(!prefs.toggle("lead_calificado"));
        session.save_notification_prefs(&prefs).await.unwrap();

        let reloaded = session.notification_prefs().await.unwrap();
        assert!(!reloaded.get("lead_calificado"));
        assert!(reloaded.get("nuevo_lead"));
    }
}
