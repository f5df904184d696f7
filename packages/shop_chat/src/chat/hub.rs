//! The hub: a single actor that owns the map of online users.
//!
//! Every read and write of the registry goes through the hub's command
//! channel, so register, unregister and delivery lookups never race.

use std::collections::HashMap;

use tokio::sync::{mpsc, oneshot};
use tracing::{debug, info, warn};

use super::client::ClientHandle;
use crate::models::UserId;

/// Commands that can be sent to the hub actor
#[derive(Debug)]
pub enum HubCommand {
    Register {
        client: ClientHandle,
    },
    /// Sent only by the connection that owns `client`, when it shuts down.
    Unregister {
        client: ClientHandle,
    },
    /// Drop a recipient whose queue can no longer accept messages.
    Evict {
        client: ClientHandle,
    },
    /// Reserved for multi-party chat; currently only logged.
    Broadcast {
        payload: String,
    },
    Lookup {
        user_id: UserId,
        respond_to: oneshot::Sender<Option<ClientHandle>>,
    },
    OnlineCount {
        respond_to: oneshot::Sender<usize>,
    },
}

/// The registry itself, kept free of channels so its rules are easy to test.
#[derive(Debug, Default)]
pub(crate) struct Registry {
    clients: HashMap<UserId, ClientHandle>,
}

impl Registry {
    /// Insert or replace. Returns the connection that was superseded, if any.
    pub(crate) fn register(&mut self, client: ClientHandle) -> Option<ClientHandle> {
        self.clients
            .insert(client.user_id(), client.clone())
            .filter(|previous| !previous.is_same(&client))
    }

    /// Remove the entry only if it still points at `client`.
    pub(crate) fn unregister(&mut self, client: &ClientHandle) -> bool {
        match self.clients.get(&client.user_id()) {
            Some(current) if current.is_same(client) => {
                self.clients.remove(&client.user_id());
                true
            }
            _ => false,
        }
    }

    pub(crate) fn get(&self, user_id: UserId) -> Option<&ClientHandle> {
        self.clients.get(&user_id)
    }

    pub(crate) fn len(&self) -> usize {
        self.clients.len()
    }
}

/// Handle to communicate with the hub actor
#[derive(Clone, Debug)]
pub struct HubHandle {
    sender: mpsc::Sender<HubCommand>,
}

impl HubHandle {
    async fn send(&self, command: HubCommand) {
        if self.sender.send(command).await.is_err() {
            warn!("Hub actor is gone");
        }
    }

    pub async fn register(&self, client: ClientHandle) {
        self.send(HubCommand::Register { client }).await;
    }

    pub async fn unregister(&self, client: ClientHandle) {
        self.send(HubCommand::Unregister { client }).await;
    }

    pub async fn evict(&self, client: ClientHandle) {
        self.send(HubCommand::Evict { client }).await;
    }

    #[allow(dead_code)]
    pub async fn broadcast(&self, payload: String) {
        self.send(HubCommand::Broadcast { payload }).await;
    }

    /// The live connection for `user_id`, if the user is online.
    pub async fn lookup(&self, user_id: UserId) -> Option<ClientHandle> {
        let (tx, rx) = oneshot::channel();
        self.sender
            .send(HubCommand::Lookup {
                user_id,
                respond_to: tx,
            })
            .await
            .ok()?;
        rx.await.ok().flatten()
    }

    pub async fn online_count(&self) -> usize {
        let (tx, rx) = oneshot::channel();
        if self
            .sender
            .send(HubCommand::OnlineCount { respond_to: tx })
            .await
            .is_err()
        {
            return 0;
        }
        rx.await.unwrap_or(0)
    }
}

/// The hub actor that owns the registry
pub struct Hub {
    registry: Registry,
    receiver: mpsc::Receiver<HubCommand>,
}

impl Hub {
    /// Spawn the hub actor and return its handle
    pub fn spawn() -> HubHandle {
        let (sender, receiver) = mpsc::channel(256);
        let hub = Hub {
            registry: Registry::default(),
            receiver,
        };
        tokio::spawn(hub.run());
        HubHandle { sender }
    }

    async fn run(mut self) {
        while let Some(cmd) = self.receiver.recv().await {
            self.handle_command(cmd);
        }
        debug!("Hub actor stopped");
    }

    fn handle_command(&mut self, cmd: HubCommand) {
        match cmd {
            HubCommand::Register { client } => {
                let user_id = client.user_id();
                if let Some(previous) = self.registry.register(client) {
                    info!(
                        user_id,
                        conn_id = %previous.conn_id(),
                        "Closing superseded connection"
                    );
                    previous.close();
                }
                debug!(user_id, online = self.registry.len(), "Client registered");
            }
            HubCommand::Unregister { client } => {
                if self.registry.unregister(&client) {
                    client.close();
                    debug!(
                        user_id = client.user_id(),
                        online = self.registry.len(),
                        "Client unregistered"
                    );
                }
            }
            HubCommand::Evict { client } => {
                if self.registry.unregister(&client) {
                    warn!(user_id = client.user_id(), "Evicted unresponsive client");
                }
                client.close();
            }
            HubCommand::Broadcast { payload } => {
                info!(bytes = payload.len(), "Broadcast requested, ignoring");
            }
            HubCommand::Lookup {
                user_id,
                respond_to,
            } => {
                let _ = respond_to.send(self.registry.get(user_id).cloned());
            }
            HubCommand::OnlineCount { respond_to } => {
                let _ = respond_to.send(self.registry.len());
            }
        }
    }
}
