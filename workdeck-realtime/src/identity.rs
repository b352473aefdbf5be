//! Contracts with the identity, user-directory and preference services.
//!
//! The real-time engine never issues identities or stores user profiles
//! itself. It consumes them through the traits below. [`MemoryDirectory`]
//! implements all three over an in-process user table, seeded from the
//! config file or built directly in tests.

use std::collections::HashMap;

use async_trait::async_trait;
use parking_lot::RwLock;
use serde::Deserialize;
use workdeck_proto::message::UserId;
use workdeck_proto::notification::NotificationType;
use workdeck_proto::presence::UserSummary;

/// Authorization role attached to an identity.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    Admin,
    Manager,
    #[default]
    User,
}

/// An authenticated user as yielded by the identity provider.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Identity {
    pub user_id: UserId,
    pub name: String,
    pub email: String,
    pub role: Role,
}

impl Identity {
    /// The public part of the identity shown to other users.
    #[must_use]
    pub fn summary(&self) -> UserSummary {
        UserSummary {
            id: self.user_id.clone(),
            name: self.name.clone(),
        }
    }
}

/// Errors returned by [`IdentityProvider::authenticate`].
#[derive(Debug, thiserror::Error)]
pub enum AuthError {
    /// The token is unknown, expired or malformed.
    #[error("invalid credential token")]
    InvalidToken,
    /// The identity provider could not be reached.
    #[error("identity provider unavailable: {0}")]
    Unavailable(String),
}

/// Errors returned by [`UserDirectory`] lookups.
#[derive(Debug, thiserror::Error)]
pub enum DirectoryError {
    #[error("user directory unavailable: {0}")]
    Unavailable(String),
}

/// Errors returned by [`PreferenceService`] lookups.
#[derive(Debug, thiserror::Error)]
pub enum PreferenceError {
    #[error("preference service unavailable: {0}")]
    Unavailable(String),
}

/// Authenticates connection handshakes.
#[async_trait]
pub trait IdentityProvider: Send + Sync {
    /// Exchanges a credential token for an identity.
    async fn authenticate(&self, token: &str) -> Result<Identity, AuthError>;
}

/// Looks users up by the handles people type in mentions.
#[async_trait]
pub trait UserDirectory: Send + Sync {
    /// Exact e-mail match, ignoring ASCII case.
    async fn find_by_email(&self, email: &str) -> Result<Option<Identity>, DirectoryError>;

    /// Display-name match, ignoring case.
    async fn find_by_name(&self, name: &str) -> Result<Option<Identity>, DirectoryError>;

    /// Match on the part of the e-mail address before `@`, ignoring case.
    async fn find_by_email_localpart(
        &self,
        localpart: &str,
    ) -> Result<Option<Identity>, DirectoryError>;
}

/// Per-channel delivery switches. Only `realtime` is read here; `email`
/// belongs to the mail sender.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DeliveryPreferences {
    pub realtime: bool,
    pub email: bool,
}

impl Default for DeliveryPreferences {
    fn default() -> Self {
        Self {
            realtime: true,
            email: false,
        }
    }
}

/// A user's notification preferences.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NotificationPreferences {
    /// Master switch for all notifications.
    pub enabled: bool,
    /// Per-type switches; a type missing from the map is enabled.
    pub types: HashMap<NotificationType, bool>,
    pub delivery: DeliveryPreferences,
}

impl Default for NotificationPreferences {
    fn default() -> Self {
        Self {
            enabled: true,
            types: HashMap::new(),
            delivery: DeliveryPreferences::default(),
        }
    }
}

impl NotificationPreferences {
    /// Whether a notification of `kind` should be pushed in real time.
    #[must_use]
    pub fn allows(&self, kind: NotificationType) -> bool {
        self.enabled && self.delivery.realtime && self.types.get(&kind).copied().unwrap_or(true)
    }
}

/// Supplies per-user notification preferences.
#[async_trait]
pub trait PreferenceService: Send + Sync {
    async fn notification_preferences(
        &self,
        user: &UserId,
    ) -> Result<NotificationPreferences, PreferenceError>;
}

struct DirectoryEntry {
    identity: Identity,
    token: String,
    preferences: NotificationPreferences,
}

/// In-process user table implementing every external user-facing contract.
#[derive(Default)]
pub struct MemoryDirectory {
    users: RwLock<Vec<DirectoryEntry>>,
}

impl MemoryDirectory {
    /// Creates an empty directory.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds a user that authenticates with `token`, replacing any user with
    /// the same id.
    pub fn insert(&self, identity: Identity, token: impl Into<String>) {
        let mut users = self.users.write();
        users.retain(|e| e.identity.user_id != identity.user_id);
        users.push(DirectoryEntry {
            identity,
            token: token.into(),
            preferences: NotificationPreferences::default(),
        });
    }

    /// Replaces a user's notification preferences. Returns `false` if the
    /// user is unknown.
    pub fn set_preferences(&self, user: &UserId, preferences: NotificationPreferences) -> bool {
        let mut users = self.users.write();
        users
            .iter_mut()
            .find(|e| &e.identity.user_id == user)
            .map(|e| e.preferences = preferences)
            .is_some()
    }

    /// Number of users in the directory.
    #[must_use]
    pub fn len(&self) -> usize {
        self.users.read().len()
    }

    /// Whether the directory has no users.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.users.read().is_empty()
    }

    fn find(&self, pred: impl Fn(&Identity) -> bool) -> Option<Identity> {
        self.users
            .read()
            .iter()
            .find(|e| pred(&e.identity))
            .map(|e| e.identity.clone())
    }
}

#[async_trait]
impl IdentityProvider for MemoryDirectory {
    async fn authenticate(&self, token: &str) -> Result<Identity, AuthError> {
        if token.is_empty() {
            return Err(AuthError::InvalidToken);
        }
        self.users
            .read()
            .iter()
            .find(|e| e.token == token)
            .map(|e| e.identity.clone())
            .ok_or(AuthError::InvalidToken)
    }
}

#[async_trait]
impl UserDirectory for MemoryDirectory {
    async fn find_by_email(&self, email: &str) -> Result<Option<Identity>, DirectoryError> {
        Ok(self.find(|i| i.email.eq_ignore_ascii_case(email)))
    }

    async fn find_by_name(&self, name: &str) -> Result<Option<Identity>, DirectoryError> {
        let wanted = name.to_lowercase();
        Ok(self.find(|i| i.name.to_lowercase() == wanted))
    }

    async fn find_by_email_localpart(
        &self,
        localpart: &str,
    ) -> Result<Option<Identity>, DirectoryError> {
        Ok(self.find(|i| {
            i.email
                .split_once('@')
                .is_some_and(|(local, _)| local.eq_ignore_ascii_case(localpart))
        }))
    }
}

#[async_trait]
impl PreferenceService for MemoryDirectory {
    async fn notification_preferences(
        &self,
        user: &UserId,
    ) -> Result<NotificationPreferences, PreferenceError> {
        Ok(self
            .users
            .read()
            .iter()
            .find(|e| &e.identity.user_id == user)
            .map(|e| e.preferences.clone())
            .unwrap_or_default())
    }
}

#[cfg(test)]
pub(crate) fn identity(id: &str, name: &str) -> Identity {
    Identity {
        user_id: UserId::new(id),
        name: name.to_string(),
        email: format!("{id}@example.com"),
        role: Role::User,
    }
}
