//! First-run onboarding.
//!
//! Chat needs exactly one administrator to route shopper messages to. On
//! startup, if no user carries the admin flag, one is created from the
//! `[admin]` section of the configuration.

use anyhow::{Context, Result};
use tracing::{info, warn};

use crate::config::AdminFileConfig;
use crate::models::User;
use crate::repository::ChatRepository;

/// Ensure an administrator exists. Returns the account that was created, or
/// `None` if one was already present.
pub async fn seed_admin(repository: &ChatRepository, admin: &AdminFileConfig) -> Result<Option<User>> {
    if let Some(existing) = repository.find_admin().await? {
        info!(user_id = existing.id, "Administrator account present");
        return Ok(None);
    }

    let password = match &admin.password {
        Some(password) if !password.is_empty() => password.clone(),
        _ => {
            let generated = uuid::Uuid::new_v4().simple().to_string();
            warn!(
                username = %admin.username,
                "No admin password configured, generated one: {generated}"
            );
            generated
        }
    };

    let user = repository
        .create_user(&admin.username, &admin.email, &password, true)
        .await
        .context("Failed to seed administrator account")?;
    info!(user_id = user.id, username = %user.username, "Seeded administrator account");
    Ok(Some(user))
}
