//! Mention detection: `@name` and `@user@domain` tokens in chat messages.
//!
//! A token counts only at the start of the content or after a non-word
//! character, so e-mail addresses written inline are not mentions.

use std::collections::HashSet;
use std::sync::{Arc, LazyLock};

use regex::Regex;
use serde_json::json;
use workdeck_proto::message::ChatMessage;
use workdeck_proto::notification::NotificationType;

use crate::identity::{DirectoryError, Identity, UserDirectory};
use crate::notify::{NewNotification, NotificationEngine};

/// Characters of message content copied into a mention's body.
pub const MENTION_BODY_CHARS: usize = 100;

#[allow(clippy::expect_used)]
static MENTION_PATTERN: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?:^|[^\w])@(\w[\w.+-]*(?:@[\w-]+(?:\.[\w-]+)+)?)")
        .expect("mention pattern is valid")
});

/// Extracts mention tokens (without the leading `@`) in order of
/// appearance. Duplicates are kept; resolution collapses them.
#[must_use]
pub fn extract_mention_tokens(content: &str) -> Vec<String> {
    MENTION_PATTERN
        .captures_iter(content)
        .filter_map(|caps| caps.get(1))
        .map(|m| m.as_str().trim_end_matches('.').to_string())
        .filter(|token| !token.is_empty())
        .collect()
}

/// Builds the `chat_mention` notification for `recipient`.
#[must_use]
pub fn mention_notification(message: &ChatMessage, recipient: &Identity) -> NewNotification {
    let sender_name = message
        .sender_name
        .clone()
        .or_else(|| message.sender.as_ref().map(ToString::to_string))
        .unwrap_or_default();

    let body = if message.content.chars().count() > MENTION_BODY_CHARS {
        let head: String = message.content.chars().take(MENTION_BODY_CHARS).collect();
        format!("{head}...")
    } else {
        message.content.clone()
    };

    NewNotification::new(
        recipient.user_id.clone(),
        NotificationType::ChatMention,
        format!("{sender_name} mentioned you in #{}", message.room),
        body,
    )
    .with_payload(json!({
        "message_id": message.id,
        "room": message.room,
        "sender_id": message.sender,
        "sender_name": sender_name,
        "content": message.content,
    }))
}

/// Resolves mention tokens to users through a [`UserDirectory`].
#[derive(Clone)]
pub struct MentionResolver {
    directory: Arc<dyn UserDirectory>,
}

impl MentionResolver {
    #[must_use]
    pub fn new(directory: Arc<dyn UserDirectory>) -> Self {
        Self { directory }
    }

    /// Looks up one token: by e-mail when it contains `@`, otherwise by
    /// display name and then by e-mail local part.
    pub async fn resolve_token(&self, token: &str) -> Result<Option<Identity>, DirectoryError> {
        if token.contains('@') {
            return self.directory.find_by_email(token).await;
        }
        if let Some(found) = self.directory.find_by_name(token).await? {
            return Ok(Some(found));
        }
        self.directory.find_by_email_localpart(token).await
    }

    /// Distinct users mentioned in `message`, excluding its sender.
    ///
    /// A token that fails to resolve is logged and skipped.
    pub async fn resolve_mentions(&self, message: &ChatMessage) -> Vec<Identity> {
        let mut seen = HashSet::new();
        let mut recipients = Vec::new();

        for token in extract_mention_tokens(&message.content) {
            match self.resolve_token(&token).await {
                Ok(Some(identity)) => {
                    if message.is_sent_by(&identity.user_id) {
                        continue;
                    }
                    if seen.insert(identity.user_id.clone()) {
                        recipients.push(identity);
                    }
                }
                Ok(None) => tracing::trace!(token = %token, "mention matched no user"),
                Err(e) => {
                    tracing::warn!(token = %token, message_id = %message.id, error = %e, "mention lookup failed");
                }
            }
        }
        recipients
    }

    /// Sends a `chat_mention` notification to every user mentioned in
    /// `message`. Returns how many were created.
    pub async fn notify_mentions(&self, engine: &NotificationEngine, message: &ChatMessage) -> usize {
        let mut created = 0;
        for recipient in self.resolve_mentions(message).await {
            match engine.notify(mention_notification(message, &recipient)).await {
                Ok(_) => created += 1,
                Err(e) => tracing::warn!(
                    user_id = %recipient.user_id,
                    message_id = %message.id,
                    error = %e,
                    "failed to create mention notification"
                ),
            }
        }
        created
    }
}
