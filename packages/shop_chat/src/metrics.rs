//! Server metrics for observability
//!
//! Counters for the chat core, exposed as a JSON snapshot on `/metrics`.

use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Instant;

/// Server-wide metrics
#[derive(Debug, Default)]
pub struct ServerMetrics {
    // Connection metrics
    /// Currently active chat connections
    pub active_connections: AtomicU64,
    /// Total connections since server start
    pub total_connections: AtomicU64,

    // Message metrics
    /// Chat frames received from clients
    pub frames_received: AtomicU64,
    /// Messages durably stored
    pub messages_persisted: AtomicU64,
    /// Messages pushed onto an online recipient's queue
    pub live_deliveries: AtomicU64,
    /// Push notifications dispatched for offline recipients
    pub offline_notifications: AtomicU64,
    /// Recipients evicted because their outbound queue was full
    pub evictions: AtomicU64,

    // Error metrics
    /// Frames that could not be decoded
    pub decode_errors: AtomicU64,
    /// Messages dropped because the store rejected them
    pub persistence_failures: AtomicU64,
    /// Push notifications the dispatcher failed to send
    pub notification_failures: AtomicU64,

    /// Server start time (for uptime calculation)
    start_time: Option<Instant>,
}

impl ServerMetrics {
    pub fn new() -> Self {
        Self {
            start_time: Some(Instant::now()),
            ..Default::default()
        }
    }

    // Connection tracking
    pub fn connection_opened(&self) {
        self.active_connections.fetch_add(1, Ordering::Relaxed);
        self.total_connections.fetch_add(1, Ordering::Relaxed);
    }

    pub fn connection_closed(&self) {
        self.active_connections.fetch_sub(1, Ordering::Relaxed);
    }

    // Message tracking
    pub fn frame_received(&self) {
        self.frames_received.fetch_add(1, Ordering::Relaxed);
    }

    pub fn message_persisted(&self) {
        self.messages_persisted.fetch_add(1, Ordering::Relaxed);
    }

    pub fn live_delivery(&self) {
        self.live_deliveries.fetch_add(1, Ordering::Relaxed);
    }

    pub fn offline_notification(&self) {
        self.offline_notifications.fetch_add(1, Ordering::Relaxed);
    }

    pub fn eviction(&self) {
        self.evictions.fetch_add(1, Ordering::Relaxed);
    }

    // Error tracking
    pub fn decode_error(&self) {
        self.decode_errors.fetch_add(1, Ordering::Relaxed);
    }

    pub fn persistence_failure(&self) {
        self.persistence_failures.fetch_add(1, Ordering::Relaxed);
    }

    pub fn notification_failure(&self) {
        self.notification_failures.fetch_add(1, Ordering::Relaxed);
    }

    /// Get uptime in seconds
    pub fn uptime_secs(&self) -> u64 {
        self.start_time.map(|t| t.elapsed().as_secs()).unwrap_or(0)
    }

    /// Create a snapshot of all metrics. `online` is the hub's registry size.
    pub fn snapshot(&self, online: u64) -> MetricsSnapshot {
        MetricsSnapshot {
            uptime_secs: self.uptime_secs(),
            connections: ConnectionMetrics {
                active: self.active_connections.load(Ordering::Relaxed),
                total: self.total_connections.load(Ordering::Relaxed),
                online_users: online,
            },
            messages: MessageMetrics {
                received: self.frames_received.load(Ordering::Relaxed),
                persisted: self.messages_persisted.load(Ordering::Relaxed),
                live: self.live_deliveries.load(Ordering::Relaxed),
                notified: self.offline_notifications.load(Ordering::Relaxed),
                evictions: self.evictions.load(Ordering::Relaxed),
            },
            errors: ErrorMetrics {
                decode: self.decode_errors.load(Ordering::Relaxed),
                persistence: self.persistence_failures.load(Ordering::Relaxed),
                notification: self.notification_failures.load(Ordering::Relaxed),
            },
        }
    }
}

/// Serializable snapshot of metrics
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MetricsSnapshot {
    pub uptime_secs: u64,
    pub connections: ConnectionMetrics,
    pub messages: MessageMetrics,
    pub errors: ErrorMetrics,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConnectionMetrics {
    pub active: u64,
    pub total: u64,
    pub online_users: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MessageMetrics {
    pub received: u64,
    pub persisted: u64,
    pub live: u64,
    pub notified: u64,
    pub evictions: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ErrorMetrics {
    pub decode: u64,
    pub persistence: u64,
    pub notification: u64,
}

/// Health status
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HealthStatus {
    pub status: String,
    pub online_users: u64,
    pub connections: u64,
    pub uptime_secs: u64,
}
