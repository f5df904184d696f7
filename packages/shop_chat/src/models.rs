use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Numeric user identifier (SQLite `INTEGER PRIMARY KEY`).
pub type UserId = i64;

// === User models ===

#[derive(Debug, Clone, Serialize, sqlx::FromRow)]
pub struct User {
    pub id: UserId,
    pub username: String,
    pub email: String,
    #[serde(skip_serializing)]
    pub password_hash: String,
    pub admin: bool,
    /// Push notification token registered by the user's device
    #[serde(skip_serializing)]
    pub fcm_token: Option<String>,
    pub created_at: i64,
}

impl User {
    /// The registered push token, if any non-empty one exists.
    pub fn push_token(&self) -> Option<&str> {
        self.fcm_token.as_deref().filter(|t| !t.is_empty())
    }
}

/// Public view of the administrator, returned by `/api/v1/admin-info`
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AdminInfo {
    pub id: UserId,
    pub username: String,
}

impl From<&User> for AdminInfo {
    fn from(user: &User) -> Self {
        Self {
            id: user.id,
            username: user.username.clone(),
        }
    }
}

// === Chat models ===

/// Inbound chat frame sent by a client.
///
/// `receiver_id` is only honoured for the administrator; everyone else
/// always talks to the administrator.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ClientFrame {
    #[serde(default)]
    pub receiver_id: UserId,
    #[serde(default)]
    pub content: String,
}

/// A message about to be stored.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewMessage {
    pub sender_id: UserId,
    pub receiver_id: UserId,
    pub content: String,
    pub timestamp: DateTime<Utc>,
}

/// A stored chat message. Immutable once written; this is also the
/// server → client wire frame.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, sqlx::FromRow)]
#[serde(rename_all = "camelCase")]
pub struct PersistedMessage {
    pub id: i64,
    pub sender_id: UserId,
    pub receiver_id: UserId,
    pub content: String,
    pub read: bool,
    pub timestamp: DateTime<Utc>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn client_frame_decodes_camel_case() {
        let frame: ClientFrame =
            serde_json::from_str(r#"{"receiverId": 7, "content": "hi"}"#).unwrap();
        assert_eq!(frame.receiver_id, 7);
        assert_eq!(frame.content, "hi");
    }

    #[test]
    fn client_frame_missing_fields_default() {
        let frame: ClientFrame = serde_json::from_str(r#"{"content": "hi"}"#).unwrap();
        assert_eq!(frame.receiver_id, 0);

        let frame: ClientFrame = serde_json::from_str("{}").unwrap();
        assert!(frame.content.is_empty());
    }

    #[test]
    fn client_frame_rejects_non_object() {
        assert!(serde_json::from_str::<ClientFrame>("not json").is_err());
        assert!(serde_json::from_str::<ClientFrame>(r#"{"content": 5}"#).is_err());
    }

    #[test]
    fn persisted_message_wire_shape() {
        let msg = PersistedMessage {
            id: 3,
            sender_id: 1,
            receiver_id: 2,
            content: "hello".into(),
            read: false,
            timestamp: DateTime::parse_from_rfc3339("2026-01-02T03:04:05Z")
                .unwrap()
                .with_timezone(&Utc),
        };
        let json = serde_json::to_value(&msg).unwrap();
        assert_eq!(json["id"], 3);
        assert_eq!(json["senderId"], 1);
        assert_eq!(json["receiverId"], 2);
        assert_eq!(json["content"], "hello");
        assert_eq!(json["read"], false);
        assert_eq!(json["timestamp"], "2026-01-02T03:04:05Z");
    }

    #[test]
    fn user_serialization_hides_secrets() {
        let user = User {
            id: 1,
            username: "alice".into(),
            email: "alice@example.com".into(),
            password_hash: "hash".into(),
            admin: false,
            fcm_token: Some("tok".into()),
            created_at: 0,
        };
        let json = serde_json::to_value(&user).unwrap();
        assert!(json.get("password_hash").is_none());
        assert!(json.get("fcm_token").is_none());
        assert_eq!(json["username"], "alice");
    }

    #[test]
    fn push_token_ignores_empty() {
        let mut user = User {
            id: 1,
            username: "bob".into(),
            email: "bob@example.com".into(),
            password_hash: String::new(),
            admin: false,
            fcm_token: Some(String::new()),
            created_at: 0,
        };
        assert_eq!(user.push_token(), None);
        user.fcm_token = Some("device-token".into());
        assert_eq!(user.push_token(), Some("device-token"));
        user.fcm_token = None;
        assert_eq!(user.push_token(), None);
    }
}
