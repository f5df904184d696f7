use std::sync::Arc;

use crate::AppState;
use crate::config::{AuthConfig, ChatConfig};
use crate::db::Database;
use crate::models::User;
use crate::notify::{LogNotifier, Notifier};
use crate::repository::ChatRepository;

pub const TEST_JWT_SECRET: &str = "test-jwt-secret";

/// Build a fully-wired `AppState` backed by an in-memory SQLite database.
/// Suitable for handler tests that exercise real SQL queries without I/O.
pub async fn test_app_state() -> AppState {
    test_app_state_with(ChatConfig::default(), Arc::new(LogNotifier)).await
}

/// Same as [`test_app_state`] with custom chat settings and notifier.
pub async fn test_app_state_with(chat_config: ChatConfig, notifier: Arc<dyn Notifier>) -> AppState {
    let pool = sqlx::sqlite::SqlitePoolOptions::new()
        .max_connections(1)
        .connect("sqlite::memory:")
        .await
        .expect("in-memory sqlite");

    crate::db::run_migrations(&pool).await.expect("migrations");

    sqlx::query("PRAGMA foreign_keys = ON")
        .execute(&pool)
        .await
        .expect("pragma");

    let db = Arc::new(Database { pool: pool.clone() });
    let repository = Arc::new(ChatRepository::new(pool));

    crate::build_state(
        db,
        repository,
        notifier,
        chat_config,
        AuthConfig {
            jwt_secret: TEST_JWT_SECRET.into(),
            token_ttl_secs: 3600,
        },
        "New message from",
    )
}

/// A valid bearer token for `user` under the test secret.
pub fn bearer(state: &AppState, user: &User) -> String {
    crate::auth::issue_token(&state.auth_config.jwt_secret, user, 3600).expect("token")
}
