//! Push notifications for recipients who are not connected.
//!
//! The delivery router only sees the [`Notifier`] trait. In production that is
//! an [`FcmNotifier`] speaking the FCM HTTP v1 API; when push is disabled a
//! [`LogNotifier`] records what would have been sent.
//!
//! FCM authenticates with short-lived OAuth2 access tokens. The notifier signs
//! an RS256 assertion with the service account key, exchanges it at the key's
//! `token_uri`, and reuses the token until shortly before it expires.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, TimeDelta, Utc};
use jsonwebtoken::{Algorithm, EncodingKey, Header};
use serde::{Deserialize, Serialize};
use tokio::sync::Mutex;
use tracing::{debug, info};

use crate::config::NotificationConfig;
use crate::models::UserId;

const FCM_SCOPE: &str = "https://www.googleapis.com/auth/firebase.messaging";
const JWT_BEARER_GRANT: &str = "urn:ietf:params:oauth:grant-type:jwt-bearer";

/// Tokens this close to expiry are refreshed before use.
const TOKEN_REFRESH_MARGIN_SECS: i64 = 60;

#[derive(Debug, thiserror::Error)]
pub enum NotifyError {
    #[error("push request failed: {0}")]
    Request(#[from] reqwest::Error),

    #[error("push service rejected message ({status}): {body}")]
    Rejected {
        status: reqwest::StatusCode,
        body: String,
    },

    #[error("invalid service account key: {0}")]
    Credentials(String),

    #[error("failed to sign token assertion: {0}")]
    Signing(#[from] jsonwebtoken::errors::Error),

    #[error("access token exchange failed ({status}): {body}")]
    TokenExchange {
        status: reqwest::StatusCode,
        body: String,
    },
}

#[async_trait]
pub trait Notifier: Send + Sync {
    async fn notify(
        &self,
        token: &str,
        title: &str,
        body: &str,
        sender_id: UserId,
    ) -> Result<(), NotifyError>;
}

/// The fields of a Google service account key file that FCM auth needs.
#[derive(Clone, Deserialize)]
pub struct ServiceAccountKey {
    pub project_id: String,
    pub private_key: String,
    pub client_email: String,
    pub token_uri: String,
}

impl ServiceAccountKey {
    pub fn from_json(raw: &str) -> Result<Self, NotifyError> {
        serde_json::from_str(raw).map_err(|e| NotifyError::Credentials(e.to_string()))
    }
}

#[derive(Debug, Serialize)]
struct AssertionClaims<'a> {
    iss: &'a str,
    scope: &'a str,
    aud: &'a str,
    iat: i64,
    exp: i64,
}

#[derive(Debug, Deserialize)]
struct TokenResponse {
    access_token: String,
    expires_in: i64,
}

struct CachedToken {
    access_token: String,
    expires_at: DateTime<Utc>,
}

// === FCM HTTP v1 wire format ===

#[derive(Debug, Serialize)]
struct FcmMessage<'a> {
    message: FcmMessageContent<'a>,
}

#[derive(Debug, Serialize)]
struct FcmMessageContent<'a> {
    token: &'a str,
    notification: FcmNotification<'a>,
    data: FcmData,
}

#[derive(Debug, Serialize)]
struct FcmNotification<'a> {
    title: &'a str,
    body: &'a str,
}

#[derive(Debug, Serialize)]
struct FcmData {
    sender_id: String,
}

/// Firebase Cloud Messaging client.
pub struct FcmNotifier {
    url: String,
    credentials: ServiceAccountKey,
    signing_key: EncodingKey,
    token_cache: Mutex<Option<CachedToken>>,
    http_client: reqwest::Client,
}

impl FcmNotifier {
    pub fn new(config: &NotificationConfig) -> Result<Self, NotifyError> {
        let raw = config
            .service_account_key
            .as_deref()
            .ok_or_else(|| NotifyError::Credentials("no service account key configured".into()))?;
        let credentials = ServiceAccountKey::from_json(raw)?;
        let signing_key = EncodingKey::from_rsa_pem(credentials.private_key.as_bytes())
            .map_err(|e| NotifyError::Credentials(format!("private key: {e}")))?;

        let project_id = if config.project_id.is_empty() {
            credentials.project_id.as_str()
        } else {
            config.project_id.as_str()
        };
        let url = format!(
            "{}/v1/projects/{}/messages:send",
            config.endpoint, project_id
        );

        let http_client = reqwest::Client::builder()
            .timeout(Duration::from_secs(10))
            .build()?;
        Ok(Self {
            url,
            credentials,
            signing_key,
            token_cache: Mutex::new(None),
            http_client,
        })
    }

    /// A valid access token, exchanging a fresh assertion when the cached one
    /// is missing or about to expire.
    async fn access_token(&self) -> Result<String, NotifyError> {
        let mut cache = self.token_cache.lock().await;
        if let Some(cached) = cache.as_ref() {
            if cached.expires_at > Utc::now() + TimeDelta::seconds(TOKEN_REFRESH_MARGIN_SECS) {
                return Ok(cached.access_token.clone());
            }
        }

        let fresh = self.exchange_assertion().await?;
        let access_token = fresh.access_token.clone();
        *cache = Some(fresh);
        Ok(access_token)
    }

    async fn exchange_assertion(&self) -> Result<CachedToken, NotifyError> {
        let now = Utc::now();
        let claims = AssertionClaims {
            iss: &self.credentials.client_email,
            scope: FCM_SCOPE,
            aud: &self.credentials.token_uri,
            iat: now.timestamp(),
            exp: (now + TimeDelta::hours(1)).timestamp(),
        };
        let assertion =
            jsonwebtoken::encode(&Header::new(Algorithm::RS256), &claims, &self.signing_key)?;

        let response = self
            .http_client
            .post(&self.credentials.token_uri)
            .form(&[("grant_type", JWT_BEARER_GRANT), ("assertion", assertion.as_str())])
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            let body = response
                .text()
                .await
                .unwrap_or_else(|_| "Unknown error".to_string());
            return Err(NotifyError::TokenExchange { status, body });
        }

        let token: TokenResponse = response.json().await?;
        debug!(expires_in = token.expires_in, "FCM access token refreshed");
        Ok(CachedToken {
            access_token: token.access_token,
            expires_at: Utc::now() + TimeDelta::try_seconds(token.expires_in).unwrap_or_default(),
        })
    }
}

#[async_trait]
impl Notifier for FcmNotifier {
    async fn notify(
        &self,
        token: &str,
        title: &str,
        body: &str,
        sender_id: UserId,
    ) -> Result<(), NotifyError> {
        let message = FcmMessage {
            message: FcmMessageContent {
                token,
                notification: FcmNotification { title, body },
                data: FcmData {
                    sender_id: sender_id.to_string(),
                },
            },
        };

        let access_token = self.access_token().await?;
        let response = self
            .http_client
            .post(&self.url)
            .bearer_auth(&access_token)
            .json(&message)
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            if status == reqwest::StatusCode::UNAUTHORIZED {
                // Revoked early; force a new exchange on the next send
                self.token_cache.lock().await.take();
            }
            let body = response
                .text()
                .await
                .unwrap_or_else(|_| "Unknown error".to_string());
            return Err(NotifyError::Rejected { status, body });
        }

        debug!(sender_id, "Push notification accepted");
        Ok(())
    }
}

/// Stand-in used when push notifications are not configured.
pub struct LogNotifier;

#[async_trait]
impl Notifier for LogNotifier {
    async fn notify(
        &self,
        _token: &str,
        title: &str,
        _body: &str,
        sender_id: UserId,
    ) -> Result<(), NotifyError> {
        info!(sender_id, title, "Push notifications disabled, not sending");
        Ok(())
    }
}

/// Pick the notifier for the configured environment.
pub fn from_config(config: &NotificationConfig) -> Result<Arc<dyn Notifier>, NotifyError> {
    if config.enabled {
        let notifier = FcmNotifier::new(config)?;
        info!(url = %notifier.url, "FCM push notifications enabled");
        Ok(Arc::new(notifier))
    } else {
        info!("Push notifications disabled");
        Ok(Arc::new(LogNotifier))
    }
}
