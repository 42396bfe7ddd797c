use std::{
    collections::{BTreeMap, HashMap},
    time::Duration,
};

use shared::{
    domain::{ListId, UserId},
    error::RealtimeError,
    protocol::{BroadcastEnvelope, ListEvent, PresenceUser, UserIdentity},
};
use tokio::sync::{mpsc, oneshot};
use tracing::{debug, info, warn};

const COMMAND_BUFFER: usize = 64;

/// How long a coordinator with no connections waits for one before stopping.
pub const DEFAULT_IDLE_TIMEOUT: Duration = Duration::from_secs(30);

pub type ConnectionId = u64;

/// Outbound text frames for one socket; the socket's writer task drains it.
pub type Outbound = mpsc::UnboundedSender<String>;

enum Command {
    Connect {
        identity: UserIdentity,
        outbound: Outbound,
        reply: oneshot::Sender<ConnectionId>,
    },
    Disconnect {
        connection_id: ConnectionId,
    },
    Broadcast {
        envelope: BroadcastEnvelope,
        reply: oneshot::Sender<usize>,
    },
    Presence {
        reply: oneshot::Sender<Vec<PresenceUser>>,
    },
    Shutdown,
}

/// Cheap, cloneable address of the single coordinator task that owns a list.
#[derive(Debug, Clone)]
pub struct CoordinatorHandle {
    list_id: ListId,
    commands: mpsc::Sender<Command>,
}

impl CoordinatorHandle {
    pub fn spawn(list_id: ListId) -> Self {
        Self::spawn_with_idle_timeout(list_id, DEFAULT_IDLE_TIMEOUT)
    }

    /// The coordinator stops on its own once it has had no connections for
    /// `idle_timeout`; the handle then reports closed.
    pub fn spawn_with_idle_timeout(list_id: ListId, idle_timeout: Duration) -> Self {
        let (commands, rx) = mpsc::channel(COMMAND_BUFFER);
        let coordinator = ListCoordinator {
            list_id: list_id.clone(),
            connections: HashMap::new(),
            next_connection_id: 1,
            idle_timeout,
        };
        tokio::spawn(coordinator.run(rx));
        Self { list_id, commands }
    }

    pub fn list_id(&self) -> &ListId {
        &self.list_id
    }

    pub fn is_closed(&self) -> bool {
        self.commands.is_closed()
    }

    /// Registers an established connection. Every live connection, including
    /// the new one, receives the updated presence list.
    pub async fn connect(
        &self,
        identity: UserIdentity,
        outbound: Outbound,
    ) -> Result<ConnectionId, RealtimeError> {
        let (reply, rx) = oneshot::channel();
        self.send(Command::Connect {
            identity,
            outbound,
            reply,
        })
        .await?;
        rx.await.map_err(|_| self.unreachable())
    }

    pub async fn disconnect(&self, connection_id: ConnectionId) {
        if self
            .commands
            .send(Command::Disconnect { connection_id })
            .await
            .is_err()
        {
            debug!(list_id = %self.list_id, connection_id, "coordinator gone before disconnect");
        }
    }

    pub async fn broadcast(&self, envelope: BroadcastEnvelope) -> Result<usize, RealtimeError> {
        let (reply, rx) = oneshot::channel();
        self.send(Command::Broadcast { envelope, reply }).await?;
        rx.await.map_err(|_| self.unreachable())
    }

    pub async fn presence(&self) -> Result<Vec<PresenceUser>, RealtimeError> {
        let (reply, rx) = oneshot::channel();
        self.send(Command::Presence { reply }).await?;
        rx.await.map_err(|_| self.unreachable())
    }

    pub(crate) async fn shutdown(&self) {
        let _ = self.commands.send(Command::Shutdown).await;
    }

    async fn send(&self, command: Command) -> Result<(), RealtimeError> {
        self.commands
            .send(command)
            .await
            .map_err(|_| self.unreachable())
    }

    fn unreachable(&self) -> RealtimeError {
        RealtimeError::PartitionLookup(format!("coordinator for list {} stopped", self.list_id))
    }
}

/// Validates the body of an internal broadcast request addressed to `room` on
/// the endpoint for `list_id`.
pub fn parse_internal(
    list_id: &ListId,
    room: &str,
    body: &[u8],
) -> Result<BroadcastEnvelope, RealtimeError> {
    if room != list_id.as_str() {
        return Err(RealtimeError::MalformedEvent(format!(
            "room '{room}' does not match list {list_id}"
        )));
    }
    serde_json::from_slice(body).map_err(|e| RealtimeError::MalformedEvent(e.to_string()))
}

struct LiveConnection {
    identity: UserIdentity,
    outbound: Outbound,
}

/// A connection is established while it is present in `connections`; removal
/// is terminal.
struct ListCoordinator {
    list_id: ListId,
    connections: HashMap<ConnectionId, LiveConnection>,
    next_connection_id: ConnectionId,
    idle_timeout: Duration,
}

impl ListCoordinator {
    async fn run(mut self, mut rx: mpsc::Receiver<Command>) {
        info!(list_id = %self.list_id, "list coordinator started");
        loop {
            let next = if self.connections.is_empty() {
                match tokio::time::timeout(self.idle_timeout, rx.recv()).await {
                    Ok(next) => next,
                    Err(_) => {
                        debug!(list_id = %self.list_id, "no connections left; going idle");
                        break;
                    }
                }
            } else {
                rx.recv().await
            };
            let Some(command) = next else {
                break;
            };
            match command {
                Command::Connect {
                    identity,
                    outbound,
                    reply,
                } => {
                    let connection_id = self.on_connect(identity, outbound);
                    let _ = reply.send(connection_id);
                }
                Command::Disconnect { connection_id } => self.on_close(connection_id),
                Command::Broadcast { envelope, reply } => {
                    let delivered = self.broadcast(&envelope);
                    let _ = reply.send(delivered);
                }
                Command::Presence { reply } => {
                    let _ = reply.send(self.presence());
                }
                Command::Shutdown => break,
            }
        }
        info!(
            list_id = %self.list_id,
            open = self.connections.len(),
            "list coordinator stopped"
        );
    }

    fn on_connect(&mut self, identity: UserIdentity, outbound: Outbound) -> ConnectionId {
        let connection_id = self.next_connection_id;
        self.next_connection_id += 1;
        info!(
            list_id = %self.list_id,
            connection_id,
            user_id = %identity.id,
            "connection established"
        );
        self.connections.insert(
            connection_id,
            LiveConnection { identity, outbound },
        );
        self.publish_presence();
        connection_id
    }

    fn on_close(&mut self, connection_id: ConnectionId) {
        let Some(closed) = self.connections.remove(&connection_id) else {
            return;
        };
        info!(
            list_id = %self.list_id,
            connection_id,
            user_id = %closed.identity.id,
            "connection closed"
        );
        self.publish_presence();
    }

    fn publish_presence(&self) {
        let users = self.presence();
        debug!(list_id = %self.list_id, present = users.len(), "presence changed");
        self.broadcast(&BroadcastEnvelope::new(
            ListEvent::UsersUpdated { users },
            Vec::new(),
        ));
    }

    /// One entry per distinct user, ordered by user id.
    fn presence(&self) -> Vec<PresenceUser> {
        let unique: BTreeMap<&UserId, &UserIdentity> = self
            .connections
            .values()
            .map(|conn| (&conn.identity.id, &conn.identity))
            .collect();
        unique.into_values().map(UserIdentity::presence).collect()
    }

    fn broadcast(&self, envelope: &BroadcastEnvelope) -> usize {
        let event = &envelope.event;
        let text = match event.to_wire() {
            Ok(text) => text,
            Err(err) => {
                warn!(list_id = %self.list_id, error = %err, "failed to encode list event");
                return 0;
            }
        };

        // Sockets whose writer already exited are skipped here and removed
        // when their Disconnect arrives.
        let delivered = self
            .connections
            .values()
            .filter(|conn| !envelope.excludes(&conn.identity.id))
            .filter(|conn| conn.outbound.send(text.clone()).is_ok())
            .count();

        debug!(
            list_id = %self.list_id,
            kind = event.kind().as_str(),
            delivered,
            "list event delivered"
        );
        delivered
    }
}

#[cfg(test)]
#[path = "tests/coordinator_tests.rs"]
mod tests;
