//! In-process publish/subscribe.
//!
//! One topic per notification kind. The topic's dispatcher task drains a
//! bounded queue and only hands each notification off: every subscriber
//! owns a delivery task and queue of its own, so callbacks run
//! concurrently with one another and a slow or blocking subscriber (the
//! replication controller writing a snapshot, say) stalls neither the
//! dispatcher nor its peers. Within one subscriber, notifications of a
//! kind still arrive in publish order.

use std::sync::Arc;

use tokio::sync::{mpsc, RwLock};
use tracing::warn;
use uuid::Uuid;

use crate::connection::ConnectionId;
use crate::resp::RespValue;

/// Published after every handler execution, successful or not.
#[derive(Debug, Clone)]
pub struct CommandExecuted {
    /// Resolved command name, including synthesized sub-commands
    /// (`"SET_PX"`, `"REPLCONF_GETACK"`).
    pub cmd: String,
    pub request_id: Uuid,
    /// The decoded request frame as it arrived, for verbatim relaying.
    pub request: RespValue,
    pub args: Vec<String>,
    pub response: Vec<RespValue>,
    pub success: bool,
}

#[derive(Debug, Clone, Copy)]
pub struct ConnectionClosed {
    pub connection: ConnectionId,
}

#[derive(Debug, Clone, Copy)]
pub struct ReplicaHeartbeat {
    pub connected: usize,
}

type Callback<T> = Arc<dyn Fn(&T) + Send + Sync>;

/// A single notification kind: the bounded publish queue plus one
/// delivery queue per subscriber.
struct Topic<T> {
    sender: mpsc::Sender<T>,
    subscribers: Arc<RwLock<Vec<mpsc::UnboundedSender<T>>>>,
}

impl<T: Send + Clone + 'static> Topic<T> {
    fn new(kind: &'static str) -> Self {
        let (sender, mut receiver) = mpsc::channel::<T>(256);
        let subscribers: Arc<RwLock<Vec<mpsc::UnboundedSender<T>>>> =
            Arc::new(RwLock::new(Vec::new()));

        let dispatch_subscribers = Arc::clone(&subscribers);
        tokio::spawn(async move {
            while let Some(notification) = receiver.recv().await {
                // Hand-off only; the callbacks themselves run on their
                // subscribers' tasks.
                let queues = dispatch_subscribers.read().await.clone();
                for queue in queues {
                    let _ = queue.send(notification.clone());
                }
            }
            warn!(kind, "notification dispatcher stopped");
        });

        Self {
            sender,
            subscribers,
        }
    }

    async fn publish(&self, notification: T, kind: &'static str) {
        if self.sender.send(notification).await.is_err() {
            warn!(kind, "notification dropped: dispatcher is gone");
        }
    }

    /// Registers a callback and spawns the delivery task that feeds it.
    async fn subscribe(&self, callback: Callback<T>) {
        let (sender, mut receiver) = mpsc::unbounded_channel::<T>();

        tokio::spawn(async move {
            while let Some(notification) = receiver.recv().await {
                callback(&notification);
            }
        });

        self.subscribers.write().await.push(sender);
    }
}

pub struct NotificationBus {
    command_executed: Topic<CommandExecuted>,
    connection_closed: Topic<ConnectionClosed>,
    replica_heartbeat: Topic<ReplicaHeartbeat>,
}

impl NotificationBus {
    pub fn new() -> Self {
        Self {
            command_executed: Topic::new("command_executed"),
            connection_closed: Topic::new("connection_closed"),
            replica_heartbeat: Topic::new("replica_heartbeat"),
        }
    }

    pub async fn publish_command_executed(&self, notification: CommandExecuted) {
        self.command_executed
            .publish(notification, "command_executed")
            .await;
    }

    pub async fn publish_connection_closed(&self, notification: ConnectionClosed) {
        self.connection_closed
            .publish(notification, "connection_closed")
            .await;
    }

    pub async fn publish_replica_heartbeat(&self, notification: ReplicaHeartbeat) {
        self.replica_heartbeat
            .publish(notification, "replica_heartbeat")
            .await;
    }

    pub async fn on_command_executed<F>(&self, callback: F)
    where
        F: Fn(&CommandExecuted) + Send + Sync + 'static,
    {
        self.command_executed.subscribe(Arc::new(callback)).await;
    }

    pub async fn on_connection_closed<F>(&self, callback: F)
    where
        F: Fn(&ConnectionClosed) + Send + Sync + 'static,
    {
        self.connection_closed.subscribe(Arc::new(callback)).await;
    }

    pub async fn on_replica_heartbeat<F>(&self, callback: F)
    where
        F: Fn(&ReplicaHeartbeat) + Send + Sync + 'static,
    {
        self.replica_heartbeat.subscribe(Arc::new(callback)).await;
    }
}

impl Default for NotificationBus {
    fn default() -> Self {
        Self::new()
    }
}
