//! Session keyring: derives the Gateway session key for each chat and tracks
//! a per-chat epoch used to start fresh conversations.
//!
//! Epochs live in process memory only, by design: the Gateway owns durable
//! conversation history per session key, so a bridge restart merely resumes
//! the epoch-0 keys.

use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::RwLock;

/// Prefix for every session key minted by this bridge.
const SESSION_KEY_PREFIX: &str = "agent:main:line-bridge";

/// Namespaced chat key: `dm:<userId>` for direct messages, `group:<groupId>`
/// when a group id is present. Disjoint namespaces, so a group epoch never
/// collides with a DM epoch for the same numeric id.
pub fn chat_key(user_id: &str, group_id: Option<&str>) -> String {
    match group_id {
        Some(gid) => format!("group:{}", gid),
        None => format!("dm:{}", user_id),
    }
}

/// Per-chat epoch map with session-key derivation.
pub struct SessionKeyring {
    epochs: Arc<RwLock<HashMap<String, u64>>>,
}

impl Default for SessionKeyring {
    fn default() -> Self {
        Self::new()
    }
}

impl SessionKeyring {
    pub fn new() -> Self {
        Self {
            epochs: Arc::new(RwLock::new(HashMap::new())),
        }
    }

    /// Base session key without any epoch suffix.
    pub fn key_for(&self, user_id: &str, group_id: Option<&str>) -> String {
        format!("{}:{}", SESSION_KEY_PREFIX, chat_key(user_id, group_id))
    }

    /// Current epoch for a chat (0 when never bumped).
    pub async fn epoch_of(&self, user_id: &str, group_id: Option<&str>) -> u64 {
        let key = chat_key(user_id, group_id);
        self.epochs.read().await.get(&key).copied().unwrap_or(0)
    }

    /// Increment the chat's epoch and return the new value. The write lock
    /// serializes concurrent bumps so two `/new` calls never mint the same epoch.
    pub async fn bump(&self, user_id: &str, group_id: Option<&str>) -> u64 {
        let key = chat_key(user_id, group_id);
        let mut epochs = self.epochs.write().await;
        let entry = epochs.entry(key).or_insert(0);
        *entry += 1;
        *entry
    }

    /// Full session key: base key plus `:v<epoch>` only when epoch > 0.
    /// Epoch 0 keeps the original key so pre-existing Gateway history still resolves.
    pub async fn resolve(&self, user_id: &str, group_id: Option<&str>) -> String {
        let base = self.key_for(user_id, group_id);
        let epoch = self.epoch_of(user_id, group_id).await;
        if epoch > 0 {
            format!("{}:v{}", base, epoch)
        } else {
            base
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn dm_key_without_epoch() {
        let keyring = SessionKeyring::new();
        assert_eq!(
            keyring.resolve("U1", None).await,
            "agent:main:line-bridge:dm:U1"
        );
    }

    #[tokio::test]
    async fn group_key_uses_group_namespace() {
        let keyring = SessionKeyring::new();
        assert_eq!(
            keyring.resolve("U1", Some("G9")).await,
            "agent:main:line-bridge:group:G9"
        );
    }

    #[tokio::test]
    async fn bump_appends_epoch_suffix() {
        let keyring = SessionKeyring::new();
        assert_eq!(keyring.bump("U1", None).await, 1);
        assert_eq!(
            keyring.resolve("U1", None).await,
            "agent:main:line-bridge:dm:U1:v1"
        );
        assert_eq!(keyring.bump("U1", None).await, 2);
        assert_eq!(
            keyring.resolve("U1", None).await,
            "agent:main:line-bridge:dm:U1:v2"
        );
    }

    #[tokio::test]
    async fn bump_is_isolated_per_chat() {
        let keyring = SessionKeyring::new();
        keyring.bump("U1", None).await;
        assert_eq!(
            keyring.resolve("U2", None).await,
            "agent:main:line-bridge:dm:U2"
        );
        // group with the same raw id is a different namespace
        assert_eq!(
            keyring.resolve("U1", Some("U1")).await,
            "agent:main:line-bridge:group:U1"
        );
    }

    #[tokio::test]
    async fn concurrent_bumps_never_repeat_an_epoch() {
        let keyring = Arc::new(SessionKeyring::new());
        let mut handles = Vec::new();
        for _ in 0..16 {
            let k = keyring.clone();
            handles.push(tokio::spawn(async move { k.bump("U1", None).await }));
        }
        let mut seen = Vec::new();
        for h in handles {
            seen.push(h.await.unwrap());
        }
        seen.sort_unstable();
        assert_eq!(seen, (1..=16).collect::<Vec<u64>>());
    }
}
