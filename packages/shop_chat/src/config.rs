use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::{info, warn};

// =============================================================================
// Unified config (figment-deserialized from defaults / config.toml / env vars)
// =============================================================================
//
// Three equivalent ways to configure:
//
//   config.toml:     [chat]
//                    pong_wait_secs = 60
//
//   env var:         SHOP_CHAT_CHAT__PONG_WAIT_SECS=60   (double underscore = nesting)
//
//   (single underscore stays within field names: SHOP_CHAT_AUTH__JWT_SECRET)

/// Top-level tunable configuration, deserialized by figment.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct FileConfig {
    #[serde(default)]
    pub server: ServerFileConfig,
    #[serde(default)]
    pub chat: ChatFileConfig,
    #[serde(default)]
    pub auth: AuthFileConfig,
    #[serde(default)]
    pub admin: AdminFileConfig,
    #[serde(default)]
    pub notifications: NotificationFileConfig,
}

/// Listener settings (lives under `[server]` in config.toml).
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct ServerFileConfig {
    #[serde(default)]
    pub host: Option<String>,
    #[serde(default)]
    pub port: Option<u16>,
}

/// Real-time chat tunables (lives under `[chat]` in config.toml).
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ChatFileConfig {
    #[serde(default = "default_allowed_origins")]
    pub allowed_origins: Vec<String>,
    #[serde(default = "default_send_queue_capacity")]
    pub send_queue_capacity: usize,
    #[serde(default = "default_max_message_bytes")]
    pub max_message_bytes: usize,
    #[serde(default = "default_pong_wait_secs")]
    pub pong_wait_secs: u64,
    #[serde(default = "default_write_wait_secs")]
    pub write_wait_secs: u64,
}

impl Default for ChatFileConfig {
    fn default() -> Self {
        Self {
            allowed_origins: default_allowed_origins(),
            send_queue_capacity: default_send_queue_capacity(),
            max_message_bytes: default_max_message_bytes(),
            pong_wait_secs: default_pong_wait_secs(),
            write_wait_secs: default_write_wait_secs(),
        }
    }
}

/// Token validation settings (lives under `[auth]` in config.toml).
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct AuthFileConfig {
    /// HS256 signing secret. Empty means "generate one into the data dir".
    #[serde(default)]
    pub jwt_secret: String,
    #[serde(default = "default_token_ttl")]
    pub token_ttl_secs: u64,
}

impl Default for AuthFileConfig {
    fn default() -> Self {
        Self {
            jwt_secret: String::new(),
            token_ttl_secs: default_token_ttl(),
        }
    }
}

/// Initial administrator account (lives under `[admin]` in config.toml).
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct AdminFileConfig {
    #[serde(default = "default_admin_username")]
    pub username: String,
    #[serde(default = "default_admin_email")]
    pub email: String,
    /// Seed password. When unset a random one is generated and logged once.
    #[serde(default)]
    pub password: Option<String>,
}

impl Default for AdminFileConfig {
    fn default() -> Self {
        Self {
            username: default_admin_username(),
            email: default_admin_email(),
            password: None,
        }
    }
}

/// Push notification settings (lives under `[notifications]` in config.toml).
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct NotificationFileConfig {
    #[serde(default)]
    pub enabled: bool,
    /// Defaults to the `project_id` inside the service account key.
    #[serde(default)]
    pub project_id: String,
    /// Service account key JSON, inline.
    #[serde(default)]
    pub service_account_key: Option<String>,
    /// Path to a service account key JSON file.
    #[serde(default)]
    pub service_account_key_file: Option<PathBuf>,
    #[serde(default = "default_fcm_endpoint")]
    pub endpoint: String,
    #[serde(default = "default_title_prefix")]
    pub title_prefix: String,
}

impl Default for NotificationFileConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            project_id: String::new(),
            service_account_key: None,
            service_account_key_file: None,
            endpoint: default_fcm_endpoint(),
            title_prefix: default_title_prefix(),
        }
    }
}

fn default_allowed_origins() -> Vec<String> {
    vec!["http://localhost:5173".to_string()]
}
fn default_send_queue_capacity() -> usize {
    256
}
fn default_max_message_bytes() -> usize {
    512
}
fn default_pong_wait_secs() -> u64 {
    60
}
fn default_write_wait_secs() -> u64 {
    10
}
fn default_token_ttl() -> u64 {
    86400
}
fn default_admin_username() -> String {
    "Admin".to_string()
}
fn default_admin_email() -> String {
    "admin@localhost".to_string()
}
fn default_fcm_endpoint() -> String {
    "https://fcm.googleapis.com".to_string()
}
fn default_title_prefix() -> String {
    "New message from".to_string()
}

/// Build a figment that layers: defaults → config.toml → SHOP_CHAT_* env vars.
///
/// Env vars use double-underscore for nesting into sections:
///   `SHOP_CHAT_CHAT__SEND_QUEUE_CAPACITY=512`  →  `chat.send_queue_capacity = 512`
///   `SHOP_CHAT_NOTIFICATIONS__ENABLED=true`    →  `notifications.enabled = true`
pub fn load_config(data_dir: &Path) -> figment::Figment {
    use figment::{
        Figment,
        providers::{Env, Format, Serialized, Toml},
    };

    Figment::from(Serialized::defaults(FileConfig::default()))
        .merge(Toml::file(data_dir.join("config.toml")))
        .merge(Env::prefixed("SHOP_CHAT_").split("__"))
}

// =============================================================================
// Runtime config structs (derived from FileConfig, used throughout the server)
// =============================================================================

/// Connection pump timings and limits (runtime view).
#[derive(Clone, Debug)]
pub struct ChatConfig {
    /// Origins permitted to open a chat connection
    pub allowed_origins: Vec<String>,
    /// Bounded capacity of each connection's outbound queue
    pub send_queue_capacity: usize,
    /// Largest inbound frame accepted before the connection is failed
    pub max_message_bytes: usize,
    /// Read deadline, extended whenever the peer answers a ping
    pub pong_wait: Duration,
    /// Interval between liveness probes (9/10 of `pong_wait`)
    pub ping_period: Duration,
    /// Upper bound on any single transport write
    pub write_wait: Duration,
}

impl ChatConfig {
    pub fn from_file(fc: &ChatFileConfig) -> Self {
        let pong_wait = Duration::from_secs(fc.pong_wait_secs);
        Self {
            allowed_origins: fc.allowed_origins.clone(),
            send_queue_capacity: fc.send_queue_capacity.max(1),
            max_message_bytes: fc.max_message_bytes,
            pong_wait,
            ping_period: pong_wait * 9 / 10,
            write_wait: Duration::from_secs(fc.write_wait_secs),
        }
    }

    pub fn origin_allowed(&self, origin: &str) -> bool {
        self.allowed_origins.iter().any(|o| o == origin)
    }
}

impl Default for ChatConfig {
    fn default() -> Self {
        Self::from_file(&ChatFileConfig::default())
    }
}

/// Token validation configuration (runtime view).
#[derive(Clone, Debug)]
pub struct AuthConfig {
    pub jwt_secret: String,
    pub token_ttl_secs: u64,
}

impl AuthConfig {
    /// Resolve the signing secret, generating and persisting one under
    /// `data_dir` when the configuration leaves it empty.
    pub fn resolve(fc: &AuthFileConfig, data_dir: &Path) -> Result<Self> {
        let jwt_secret = if fc.jwt_secret.is_empty() {
            load_or_generate_jwt_secret(data_dir)?
        } else {
            fc.jwt_secret.clone()
        };
        Ok(Self {
            jwt_secret,
            token_ttl_secs: fc.token_ttl_secs,
        })
    }
}

fn load_or_generate_jwt_secret(data_dir: &Path) -> Result<String> {
    let key_path = data_dir.join("jwt_secret");

    if key_path.exists() {
        let secret = std::fs::read_to_string(&key_path)
            .with_context(|| format!("Failed to read JWT secret: {:?}", key_path))?;
        let secret = secret.trim().to_string();
        if !secret.is_empty() {
            info!("JWT signing secret loaded from {}", key_path.display());
            return Ok(secret);
        }
        warn!("JWT secret file is empty, regenerating");
    }

    let secret = format!(
        "{}{}",
        uuid::Uuid::new_v4().simple(),
        uuid::Uuid::new_v4().simple()
    );
    std::fs::write(&key_path, &secret)
        .with_context(|| format!("Failed to write JWT secret: {:?}", key_path))?;
    info!("JWT signing secret generated at {}", key_path.display());
    Ok(secret)
}

/// Push notification configuration (runtime view).
#[derive(Clone, Debug)]
pub struct NotificationConfig {
    pub enabled: bool,
    pub project_id: String,
    /// Raw service account key JSON, if one was configured.
    pub service_account_key: Option<String>,
    pub endpoint: String,
    pub title_prefix: String,
}

impl NotificationConfig {
    /// Locate the service account key: inline config first, then the key
    /// file, then `FIREBASE_SERVICE_ACCOUNT_KEY`.
    pub fn resolve(fc: &NotificationFileConfig) -> Result<Self> {
        let service_account_key = match (&fc.service_account_key, &fc.service_account_key_file) {
            (Some(inline), _) if !inline.trim().is_empty() => Some(inline.clone()),
            (_, Some(path)) => Some(
                std::fs::read_to_string(path)
                    .with_context(|| format!("Failed to read service account key: {:?}", path))?,
            ),
            _ => std::env::var(SERVICE_ACCOUNT_KEY_ENV)
                .ok()
                .filter(|key| !key.trim().is_empty()),
        };
        if fc.enabled && service_account_key.is_none() {
            warn!("Push notifications enabled but no service account key is configured");
        }
        Ok(Self {
            enabled: fc.enabled,
            project_id: fc.project_id.clone(),
            service_account_key,
            endpoint: fc.endpoint.trim_end_matches('/').to_string(),
            title_prefix: fc.title_prefix.clone(),
        })
    }
}

const SERVICE_ACCOUNT_KEY_ENV: &str = "FIREBASE_SERVICE_ACCOUNT_KEY";

// =============================================================================
// Directory layout config (not tunable via figment; derived from --data-dir)
// =============================================================================

#[derive(Clone, Debug)]
pub struct ShopChatConfig {
    pub data_dir: PathBuf,
    pub db_path: PathBuf,
}

impl ShopChatConfig {
    pub fn new(custom_dir: Option<PathBuf>) -> Result<Self> {
        let data_dir = match custom_dir {
            Some(dir) => dir,
            None => dirs::home_dir()
                .context("Could not find home directory")?
                .join(".shopchat"),
        };

        std::fs::create_dir_all(&data_dir)
            .with_context(|| format!("Failed to create data directory: {:?}", data_dir))?;

        let db_path = data_dir.join("shopchat.db");

        Ok(Self { data_dir, db_path })
    }

    pub fn db_url(&self) -> String {
        format!("sqlite://{}?mode=rwc", self.db_path.display())
    }
}
