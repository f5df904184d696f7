//! In-memory collaborators for exercising the chat core without a database
//! or network.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};

use anyhow::Result;
use async_trait::async_trait;

use super::delivery::{DeliveryRouter, MessageStore};
use super::hub::HubHandle;
use crate::metrics::ServerMetrics;
use crate::models::{NewMessage, PersistedMessage, User, UserId};
use crate::notify::{Notifier, NotifyError};

#[derive(Default)]
pub struct FakeStore {
    users: Mutex<HashMap<UserId, User>>,
    messages: Mutex<Vec<PersistedMessage>>,
    fail_persist: AtomicBool,
}

impl FakeStore {
    pub fn add_user(&self, id: UserId, username: &str, admin: bool, fcm_token: Option<&str>) {
        self.users.lock().unwrap().insert(
            id,
            User {
                id,
                username: username.to_string(),
                email: format!("{username}@example.com"),
                password_hash: String::new(),
                admin,
                fcm_token: fcm_token.map(str::to_string),
                created_at: 0,
            },
        );
    }

    pub fn set_admin(&self, id: UserId, admin: bool) {
        if let Some(user) = self.users.lock().unwrap().get_mut(&id) {
            user.admin = admin;
        }
    }

    pub fn fail_persist(&self, fail: bool) {
        self.fail_persist.store(fail, Ordering::SeqCst);
    }

    pub fn messages(&self) -> Vec<PersistedMessage> {
        self.messages.lock().unwrap().clone()
    }
}

#[async_trait]
impl MessageStore for FakeStore {
    async fn find_admin(&self) -> Result<Option<User>> {
        let users = self.users.lock().unwrap();
        let mut admins: Vec<_> = users.values().filter(|u| u.admin).collect();
        admins.sort_by_key(|u| u.id);
        Ok(admins.first().map(|u| (*u).clone()))
    }

    async fn find_user(&self, id: UserId) -> Result<Option<User>> {
        Ok(self.users.lock().unwrap().get(&id).cloned())
    }

    async fn persist(&self, message: NewMessage) -> Result<PersistedMessage> {
        if self.fail_persist.load(Ordering::SeqCst) {
            anyhow::bail!("disk full");
        }
        let mut messages = self.messages.lock().unwrap();
        let stored = PersistedMessage {
            id: messages.len() as i64 + 1,
            sender_id: message.sender_id,
            receiver_id: message.receiver_id,
            content: message.content,
            read: false,
            timestamp: message.timestamp,
        };
        messages.push(stored.clone());
        Ok(stored)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Notification {
    pub token: String,
    pub title: String,
    pub body: String,
    pub sender_id: UserId,
}

#[derive(Default)]
pub struct RecordingNotifier {
    sent: Mutex<Vec<Notification>>,
    fail: AtomicBool,
}

impl RecordingNotifier {
    pub fn failing() -> Self {
        let notifier = Self::default();
        notifier.fail.store(true, Ordering::SeqCst);
        notifier
    }

    pub fn sent(&self) -> Vec<Notification> {
        self.sent.lock().unwrap().clone()
    }
}

#[async_trait]
impl Notifier for RecordingNotifier {
    async fn notify(
        &self,
        token: &str,
        title: &str,
        body: &str,
        sender_id: UserId,
    ) -> Result<(), NotifyError> {
        self.sent.lock().unwrap().push(Notification {
            token: token.to_string(),
            title: title.to_string(),
            body: body.to_string(),
            sender_id,
        });
        if self.fail.load(Ordering::SeqCst) {
            return Err(NotifyError::Rejected {
                status: reqwest::StatusCode::SERVICE_UNAVAILABLE,
                body: "unavailable".into(),
            });
        }
        Ok(())
    }
}

/// A router wired to fakes, returned alongside them for assertions.
pub fn fake_router(
    hub: HubHandle,
    store: Arc<FakeStore>,
    notifier: Arc<RecordingNotifier>,
) -> (DeliveryRouter, Arc<ServerMetrics>) {
    let metrics = Arc::new(ServerMetrics::new());
    let router = DeliveryRouter::new(store, notifier, hub, "New message from", metrics.clone());
    (router, metrics)
}
