//! Routing of a single inbound chat message.
//!
//! For each accepted frame the router resolves who the message is for,
//! stores it, and then either pushes it onto the recipient's live queue or
//! falls back to a push notification. Echoing the stored record back to the
//! sender is left to the sender's own connection.

use std::sync::Arc;

use anyhow::Result;
use async_trait::async_trait;
use chrono::{SubsecRound, Utc};
use tracing::{debug, warn};

use super::client::Identity;
use super::hub::HubHandle;
use crate::metrics::ServerMetrics;
use crate::models::{ClientFrame, NewMessage, PersistedMessage, User, UserId};
use crate::notify::Notifier;

/// Storage the router needs: identity lookups and message persistence.
#[async_trait]
pub trait MessageStore: Send + Sync {
    async fn find_admin(&self) -> Result<Option<User>>;
    async fn find_user(&self, id: UserId) -> Result<Option<User>>;
    async fn persist(&self, message: NewMessage) -> Result<PersistedMessage>;
}

#[derive(Debug, thiserror::Error)]
pub enum DeliveryError {
    #[error("no administrator account to route to")]
    NoAdmin,

    #[error("failed to resolve recipient: {0:#}")]
    Store(anyhow::Error),

    #[error("failed to persist message: {0:#}")]
    Persist(anyhow::Error),

    #[error("failed to encode message: {0}")]
    Encode(#[from] serde_json::Error),
}

/// What happened to the recipient's copy of a stored message.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeliveryOutcome {
    /// Queued on the recipient's live connection
    Live,
    /// The recipient's queue was full; the connection was evicted
    Evicted,
    /// Recipient offline, push notification dispatched
    Notified,
    /// Recipient offline without a push token; stored for history only
    Stored,
}

#[derive(Debug)]
pub struct Delivered {
    pub message: PersistedMessage,
    /// JSON encoding of `message`, ready for the sender's echo
    pub payload: String,
    pub outcome: DeliveryOutcome,
}

pub struct DeliveryRouter {
    store: Arc<dyn MessageStore>,
    notifier: Arc<dyn Notifier>,
    hub: HubHandle,
    title_prefix: String,
    metrics: Arc<ServerMetrics>,
}

impl DeliveryRouter {
    pub fn new(
        store: Arc<dyn MessageStore>,
        notifier: Arc<dyn Notifier>,
        hub: HubHandle,
        title_prefix: impl Into<String>,
        metrics: Arc<ServerMetrics>,
    ) -> Self {
        Self {
            store,
            notifier,
            hub,
            title_prefix: title_prefix.into(),
            metrics,
        }
    }

    pub async fn route(
        &self,
        sender: Identity,
        frame: ClientFrame,
    ) -> Result<Delivered, DeliveryError> {
        let receiver_id = self.resolve_recipient(sender, &frame).await?;

        let message = self
            .store
            .persist(NewMessage {
                sender_id: sender.user_id,
                receiver_id,
                content: frame.content,
                timestamp: Utc::now().trunc_subsecs(6),
            })
            .await
            .map_err(|e| {
                self.metrics.persistence_failure();
                DeliveryError::Persist(e)
            })?;
        self.metrics.message_persisted();

        let payload = serde_json::to_string(&message)?;

        let outcome = match self.hub.lookup(receiver_id).await {
            Some(recipient) => match recipient.try_enqueue(payload.clone()) {
                Ok(()) => {
                    self.metrics.live_delivery();
                    DeliveryOutcome::Live
                }
                Err(e) => {
                    warn!(
                        user_id = receiver_id,
                        conn_id = %recipient.conn_id(),
                        "Recipient queue unusable ({e}), evicting"
                    );
                    self.metrics.eviction();
                    self.hub.evict(recipient).await;
                    DeliveryOutcome::Evicted
                }
            },
            None => self.notify_offline(sender, &message).await,
        };

        debug!(
            message_id = message.id,
            sender_id = sender.user_id,
            receiver_id,
            ?outcome,
            "Message routed"
        );

        Ok(Delivered {
            message,
            payload,
            outcome,
        })
    }

    /// Administrators pick their recipient; everyone else talks to the
    /// administrator, looked up fresh on every message.
    async fn resolve_recipient(
        &self,
        sender: Identity,
        frame: &ClientFrame,
    ) -> Result<UserId, DeliveryError> {
        if sender.is_admin {
            return Ok(frame.receiver_id);
        }
        let admin = self
            .store
            .find_admin()
            .await
            .map_err(DeliveryError::Store)?
            .ok_or(DeliveryError::NoAdmin)?;
        Ok(admin.id)
    }

    async fn notify_offline(&self, sender: Identity, message: &PersistedMessage) -> DeliveryOutcome {
        let recipient = match self.store.find_user(message.receiver_id).await {
            Ok(Some(user)) => user,
            Ok(None) => return DeliveryOutcome::Stored,
            Err(e) => {
                warn!(user_id = message.receiver_id, "Failed to load recipient: {e:#}");
                return DeliveryOutcome::Stored;
            }
        };
        let Some(token) = recipient.push_token() else {
            return DeliveryOutcome::Stored;
        };

        let sender_name = match self.store.find_user(sender.user_id).await {
            Ok(Some(user)) => user.username,
            _ => sender.user_id.to_string(),
        };
        let title = format!("{} {}", self.title_prefix, sender_name);

        match self
            .notifier
            .notify(token, &title, &message.content, sender.user_id)
            .await
        {
            Ok(()) => self.metrics.offline_notification(),
            Err(e) => {
                self.metrics.notification_failure();
                warn!(user_id = recipient.id, "Push notification failed: {e}");
            }
        }
        DeliveryOutcome::Notified
    }
}
