//! The broadcaster: single owner of the client registry.
//!
//! Every membership change and every chat line goes through one control
//! channel consumed by one task, so the registry needs no lock and all
//! operations are totally ordered. [`Hub`] is the cloneable handle sessions
//! use to talk to that task.

use std::{
    collections::HashMap,
    sync::{
        Arc,
        atomic::{AtomicU64, Ordering},
    },
};

use tokio::{
    sync::{mpsc, oneshot},
    task::JoinHandle,
};
use tracing::{debug, info, warn};

use crate::outbound::{DeliveryError, OutboundSender};

pub type ClientId = u64;

pub const SHUTDOWN_NOTICE: &str = "Server is shutting down";

pub fn joined_notice(name: &str) -> String {
    format!("User {name} is online")
}

pub fn left_notice(name: &str) -> String {
    format!("User {name} has left")
}

/// A registered participant.
///
/// Identity is the id, which is allocated alongside the outbound queue; two
/// clients may share a name.
#[derive(Debug)]
pub struct Client {
    pub id: ClientId,
    pub name: String,
    pub outbound: OutboundSender,
}

#[derive(Debug, Clone, Copy, Default)]
pub struct HubOptions {
    /// Tell a newcomer who is already online.
    pub announce_roster: bool,
}

enum HubRequest {
    Enter(Client),
    Leave(ClientId),
    Broadcast(String),
    Members { respond_to: oneshot::Sender<Vec<String>> },
    Shutdown,
}

/// Handle to a running hub task.
#[derive(Clone)]
pub struct Hub {
    requests: mpsc::UnboundedSender<HubRequest>,
    next_id: Arc<AtomicU64>,
}

impl Hub {
    /// Starts the control loop and returns a handle plus the loop's task.
    pub fn spawn(options: HubOptions) -> (Self, JoinHandle<()>) {
        let (requests, inbox) = mpsc::unbounded_channel();
        let task = tokio::spawn(run_hub(inbox, options));
        let hub = Self {
            requests,
            next_id: Arc::new(AtomicU64::new(1)),
        };
        (hub, task)
    }

    pub fn next_id(&self) -> ClientId {
        self.next_id.fetch_add(1, Ordering::Relaxed)
    }

    pub fn enter(&self, client: Client) {
        self.submit(HubRequest::Enter(client));
    }

    /// Removes a client. Leaving twice, or leaving after an eviction, is a no-op.
    pub fn leave(&self, id: ClientId) {
        self.submit(HubRequest::Leave(id));
    }

    pub fn broadcast(&self, text: impl Into<String>) {
        self.submit(HubRequest::Broadcast(text.into()));
    }

    /// Names of the registered clients at the time the request is processed.
    ///
    /// Returns an empty list if the hub has stopped.
    pub async fn members(&self) -> Vec<String> {
        let (respond_to, response) = oneshot::channel();
        self.submit(HubRequest::Members { respond_to });
        response.await.unwrap_or_default()
    }

    /// Notifies every client, closes their queues and stops the loop.
    pub fn shutdown(&self) {
        self.submit(HubRequest::Shutdown);
    }

    fn submit(&self, request: HubRequest) {
        if self.requests.send(request).is_err() {
            debug!("hub has stopped; dropping request");
        }
    }
}

async fn run_hub(mut inbox: mpsc::UnboundedReceiver<HubRequest>, options: HubOptions) {
    let mut registry = Registry::new(options);

    while let Some(request) = inbox.recv().await {
        match request {
            HubRequest::Enter(client) => registry.enter(client),
            HubRequest::Leave(id) => registry.leave(id),
            HubRequest::Broadcast(text) => registry.broadcast(&text),
            HubRequest::Members { respond_to } => {
                let _ = respond_to.send(registry.names());
            }
            HubRequest::Shutdown => {
                registry.shutdown();
                break;
            }
        }
    }

    debug!("hub stopped");
}

/// Registry state. Only the hub task holds one.
struct Registry {
    clients: HashMap<ClientId, Client>,
    options: HubOptions,
}

impl Registry {
    fn new(options: HubOptions) -> Self {
        Self {
            clients: HashMap::new(),
            options,
        }
    }

    fn names(&self) -> Vec<String> {
        self.clients.values().map(|client| client.name.clone()).collect()
    }

    fn enter(&mut self, client: Client) {
        if self.options.announce_roster {
            let roster: Vec<String> = self
                .clients
                .values()
                .map(|present| joined_notice(&present.name))
                .collect();
            for line in roster {
                if let Err(err) = client.outbound.deliver(line) {
                    // Never registered, so nobody hears about it; dropping
                    // the client closes its queue.
                    warn!(client_id = client.id, name = %client.name, ?err, "could not deliver roster; refusing client");
                    return;
                }
            }
        }

        info!(client_id = client.id, name = %client.name, "client joined");
        let notice = joined_notice(&client.name);
        let id = client.id;
        self.clients.insert(id, client);
        self.fan_out(&notice, Some(id));
    }

    fn leave(&mut self, id: ClientId) {
        // Dropping the removed client's sender closes its queue.
        let Some(client) = self.clients.remove(&id) else {
            return;
        };
        info!(client_id = id, name = %client.name, "client left");
        let notice = left_notice(&client.name);
        drop(client);
        self.fan_out(&notice, None);
    }

    fn broadcast(&mut self, text: &str) {
        self.fan_out(text, None);
    }

    /// Sends `line` to every registered client except `skip`, then
    /// disconnects anyone whose bounded queue overflowed.
    fn fan_out(&mut self, line: &str, skip: Option<ClientId>) {
        let mut overflowed = Vec::new();

        for (id, client) in &self.clients {
            if Some(*id) == skip {
                continue;
            }
            match client.outbound.deliver(line.to_string()) {
                Ok(()) => {}
                Err(DeliveryError::Full) => overflowed.push(*id),
                Err(DeliveryError::Closed) => {
                    debug!(client_id = *id, "outbound queue closed; awaiting leave");
                }
            }
        }

        for id in overflowed {
            if let Some(client) = self.clients.get(&id) {
                warn!(client_id = id, name = %client.name, "outbound queue full; disconnecting slow client");
            }
            self.leave(id);
        }
    }

    fn shutdown(&mut self) {
        info!(clients = self.clients.len(), "hub shutting down");
        for client in self.clients.values() {
            let _ = client.outbound.deliver(SHUTDOWN_NOTICE.to_string());
        }
        self.clients.clear();
    }
}
