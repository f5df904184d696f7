//! Real-time chat core: the hub registry, per-connection pumps and the
//! delivery router that sits between them.

pub mod client;
pub mod delivery;
pub mod hub;

#[cfg(test)]
pub(crate) mod test_helpers;

use std::sync::Arc;

use crate::config::ChatConfig;
use crate::metrics::ServerMetrics;

pub use client::{ClientHandle, Identity};
pub use delivery::{DeliveryRouter, MessageStore};
pub use hub::{Hub, HubHandle};

/// Everything a connection needs from the rest of the server.
#[derive(Clone)]
pub struct ChatContext {
    pub hub: HubHandle,
    pub router: Arc<DeliveryRouter>,
    pub config: Arc<ChatConfig>,
    pub metrics: Arc<ServerMetrics>,
}
