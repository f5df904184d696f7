pub mod chat;
pub mod health;

pub use chat::{admin_info, chat_history, update_fcm_token, websocket_handler};
pub use health::{health_handler, health_live_handler, health_ready_handler, metrics_handler};
