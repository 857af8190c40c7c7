//! Server construction and the accept loop.
//!
//! Everything is wired here, explicitly: the keyspace, stream store,
//! notification bus, connection registry, replication controller,
//! command registry and router are built once and handed to each other
//! as shared references. No component reaches for hidden globals.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use rand::distr::{Alphanumeric, SampleString};
use thiserror::Error;
use tokio::net::TcpListener;
use tracing::{info, warn};

use crate::commands::CommandRegistry;
use crate::config::Config;
use crate::connection::{handle_client_connection, ConnectionRegistry};
use crate::key_value_store::{run_ttl_sweeper, Keyspace};
use crate::notification::NotificationBus;
use crate::rdb::load_keyspace;
use crate::replication::{
    connect_to_master, run_master_link, run_replica_cleanup, HandshakeError,
    ReplicationController,
};
use crate::router::Router;
use crate::streams::StreamStore;

#[derive(Error, Debug)]
pub enum ServerError {
    #[error("I/O error: {0}")]
    Io(#[from] tokio::io::Error),
    #[error("replication handshake failed: {0}")]
    Handshake(#[from] HandshakeError),
}

#[derive(Debug, PartialEq, Clone)]
pub enum Role {
    Master,
    Replica { host: String, port: u16 },
}

impl Role {
    /// Replicas report themselves with the historical name.
    pub fn as_str(&self) -> &'static str {
        match self {
            Role::Master => "master",
            Role::Replica { .. } => "slave",
        }
    }
}

/// Identity and replication coordinates, shared read-mostly across
/// components.
#[derive(Debug)]
pub struct ServerInfo {
    pub role: Role,
    /// 40-character alphanumeric replication id, unique per process.
    pub repl_id: String,
    repl_offset: AtomicU64,
    pub port: u16,
    pub dir: String,
    pub dbfilename: String,
}

impl ServerInfo {
    pub fn new(config: &Config) -> Self {
        let role = match &config.replica_of {
            Some((host, port)) => Role::Replica {
                host: host.clone(),
                port: *port,
            },
            None => Role::Master,
        };

        Self {
            role,
            repl_id: Alphanumeric.sample_string(&mut rand::rng(), 40),
            repl_offset: AtomicU64::new(0),
            port: config.port,
            dir: config.dir.clone(),
            dbfilename: config.dbfilename.clone(),
        }
    }

    pub fn is_master(&self) -> bool {
        self.role == Role::Master
    }

    pub fn repl_offset(&self) -> u64 {
        self.repl_offset.load(Ordering::Relaxed)
    }

    pub fn add_repl_offset(&self, bytes: u64) {
        self.repl_offset.fetch_add(bytes, Ordering::Relaxed);
    }
}

pub struct Server {
    listener: TcpListener,
    info: Arc<ServerInfo>,
    keyspace: Arc<Keyspace>,
    connections: Arc<ConnectionRegistry>,
    bus: Arc<NotificationBus>,
    replication: Arc<ReplicationController>,
    router: Arc<Router>,
}

impl Server {
    /// Binds the listener and wires every component. A failed bind is
    /// the caller's cue to exit non-zero. The snapshot, if configured,
    /// is loaded here; a broken snapshot logs a warning and the server
    /// starts empty.
    pub async fn new(config: Config) -> Result<Self, ServerError> {
        let listener = TcpListener::bind(format!("127.0.0.1:{}", config.port)).await?;

        let info = Arc::new(ServerInfo::new(&config));
        let keyspace = Arc::new(Keyspace::new());
        let streams = Arc::new(StreamStore::new());
        let bus = Arc::new(NotificationBus::new());
        let connections = Arc::new(ConnectionRegistry::new());

        match load_keyspace(&config.dir, &config.dbfilename, &keyspace).await {
            Ok(_) => (),
            Err(e) => {
                warn!(error = %e, "snapshot load failed, starting with an empty keyspace");
            }
        }

        let replication = ReplicationController::new(
            Arc::clone(&info),
            Arc::clone(&connections),
            Arc::clone(&bus),
        )
        .await;

        let registry = CommandRegistry::new(
            Arc::clone(&keyspace),
            Arc::clone(&streams),
            Arc::clone(&info),
            Arc::clone(&replication),
            &bus,
        )
        .await;

        let router = Arc::new(Router::new(registry, Arc::clone(&bus)));

        Ok(Self {
            listener,
            info,
            keyspace,
            connections,
            bus,
            replication,
            router,
        })
    }

    /// The actual bound address; ports are sometimes ephemeral in tests.
    pub fn local_addr(&self) -> tokio::io::Result<std::net::SocketAddr> {
        self.listener.local_addr()
    }

    /// Runs forever: replica handshake first when configured (failure
    /// is fatal), then background sweepers, then the accept loop with
    /// one task per connection.
    pub async fn run(self) -> Result<(), ServerError> {
        if let Role::Replica { host, port } = self.info.role.clone() {
            let link = connect_to_master(&host, port, self.info.port).await?;

            tokio::spawn(run_master_link(
                link,
                Arc::clone(&self.router),
                Arc::clone(&self.connections),
                Arc::clone(&self.replication),
            ));
        }

        tokio::spawn(run_ttl_sweeper(Arc::clone(&self.keyspace)));
        tokio::spawn(run_replica_cleanup(Arc::clone(&self.replication)));

        info!(port = self.info.port, role = self.info.role.as_str(), "listening");

        loop {
            match self.listener.accept().await {
                Ok((stream, peer)) => {
                    tokio::spawn(handle_client_connection(
                        stream,
                        Arc::clone(&self.router),
                        Arc::clone(&self.connections),
                        Arc::clone(&self.bus),
                    ));
                    tracing::debug!(peer = %peer, "accepted connection");
                }
                Err(e) => {
                    warn!(error = %e, "failed to accept connection");
                }
            }
        }
    }
}
