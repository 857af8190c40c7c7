//! Connection bookkeeping and the per-socket read loop.
//!
//! The original design watches every socket from one readiness loop;
//! here each accepted socket gets its own task on the runtime, which
//! preserves the properties that matter: frames from one connection are
//! dispatched in arrival order, writes to one socket are serialized
//! behind its lock, and no ordering is promised across connections.

use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use bytes::BytesMut;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::net::TcpStream;
use tokio::sync::{Mutex, RwLock};
use tracing::{debug, warn};
use uuid::Uuid;

use crate::bimap::BiMap;
use crate::notification::{ConnectionClosed, NotificationBus};
use crate::resp::RespValue;
use crate::router::Router;

const READ_CHUNK_SIZE: usize = 1024;

/// How many request-to-connection pairings are remembered. The map only has
/// to outlive notification dispatch for a request, so a small ring is
/// plenty.
const REQUEST_LOG_CAPACITY: usize = 1024;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ConnectionId(u64);

impl ConnectionId {
    pub fn from_raw(raw: u64) -> Self {
        Self(raw)
    }
}

impl std::fmt::Display for ConnectionId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "conn-{}", self.0)
    }
}

/// One accepted socket. Owns the write half; the read half is driven by
/// the connection's task. Nothing outside the multiplexer closes the
/// socket.
pub struct Connection {
    pub id: ConnectionId,
    pub peer_addr: String,
    writer: Mutex<OwnedWriteHalf>,
}

impl Connection {
    /// Writes the given frames, in order, holding the write lock for the
    /// whole batch so concurrent writers cannot interleave.
    pub async fn write_frames(&self, frames: &[RespValue]) -> tokio::io::Result<()> {
        if frames.is_empty() {
            return Ok(());
        }

        let mut writer = self.writer.lock().await;

        for frame in frames {
            writer.write_all(&frame.encode()).await?;
        }

        writer.flush().await
    }
}

/// Recent request ids and the connections they arrived on, oldest
/// evicted first.
#[derive(Default)]
struct RequestLog {
    entries: HashMap<Uuid, ConnectionId>,
    order: VecDeque<Uuid>,
}

impl RequestLog {
    fn insert(&mut self, request_id: Uuid, connection: ConnectionId) {
        if self.order.len() >= REQUEST_LOG_CAPACITY {
            if let Some(oldest) = self.order.pop_front() {
                self.entries.remove(&oldest);
            }
        }

        self.order.push_back(request_id);
        self.entries.insert(request_id, connection);
    }

    fn get(&self, request_id: &Uuid) -> Option<ConnectionId> {
        self.entries.get(request_id).copied()
    }
}

/// All live connections: the id-to-connection map, the id/peer-address
/// bijection, and the request log used by notification subscribers to
/// find a request's originating socket.
pub struct ConnectionRegistry {
    next_id: AtomicU64,
    connections: RwLock<HashMap<ConnectionId, Arc<Connection>>>,
    peers: Mutex<BiMap<ConnectionId, String>>,
    requests: Mutex<RequestLog>,
}

impl ConnectionRegistry {
    pub fn new() -> Self {
        Self {
            next_id: AtomicU64::new(1),
            connections: RwLock::new(HashMap::new()),
            peers: Mutex::new(BiMap::new()),
            requests: Mutex::new(RequestLog::default()),
        }
    }

    /// Splits the stream and registers the write half under a fresh id.
    /// The read half goes back to the caller's read loop.
    pub async fn register(
        &self,
        stream: TcpStream,
    ) -> tokio::io::Result<(Arc<Connection>, OwnedReadHalf)> {
        let peer_addr = stream.peer_addr()?.to_string();
        let id = ConnectionId(self.next_id.fetch_add(1, Ordering::Relaxed));
        let (reader, writer) = stream.into_split();

        let connection = Arc::new(Connection {
            id,
            peer_addr: peer_addr.clone(),
            writer: Mutex::new(writer),
        });

        self.connections
            .write()
            .await
            .insert(id, Arc::clone(&connection));
        self.peers.lock().await.insert(id, peer_addr);

        debug!(connection = %id, peer = %connection.peer_addr, "connection registered");
        Ok((connection, reader))
    }

    pub async fn deregister(&self, id: ConnectionId) -> Option<Arc<Connection>> {
        self.peers.lock().await.remove(&id);
        self.connections.write().await.remove(&id)
    }

    pub async fn get(&self, id: ConnectionId) -> Option<Arc<Connection>> {
        self.connections.read().await.get(&id).map(Arc::clone)
    }

    pub async fn id_for_peer(&self, peer_addr: &str) -> Option<ConnectionId> {
        self.peers
            .lock()
            .await
            .get_by_value(&peer_addr.to_string())
            .copied()
    }

    pub async fn track_request(&self, request_id: Uuid, connection: ConnectionId) {
        self.requests.lock().await.insert(request_id, connection);
    }

    /// The connection a request arrived on, if it is still open.
    pub async fn connection_for_request(&self, request_id: &Uuid) -> Option<Arc<Connection>> {
        let id = self.requests.lock().await.get(request_id)?;
        self.get(id).await
    }
}

impl Default for ConnectionRegistry {
    fn default() -> Self {
        Self::new()
    }
}

/// Drains the socket into a buffer: 1 KiB chunks until a short read.
/// Returns an empty buffer on a clean EOF before any data.
pub async fn drain_socket(reader: &mut OwnedReadHalf) -> tokio::io::Result<Vec<u8>> {
    let mut data = Vec::new();
    let mut chunk = [0u8; READ_CHUNK_SIZE];

    loop {
        let bytes_read = reader.read(&mut chunk).await?;

        if bytes_read == 0 {
            break;
        }

        data.extend_from_slice(&chunk[..bytes_read]);

        if bytes_read < READ_CHUNK_SIZE {
            break;
        }
    }

    Ok(data)
}

/// Read loop for one client socket: drain, decode every complete frame,
/// dispatch each in arrival order, write the responses back. EOF or an
/// I/O error tears the connection down and announces the closure on the
/// bus.
pub async fn handle_client_connection(
    stream: TcpStream,
    router: Arc<Router>,
    connections: Arc<ConnectionRegistry>,
    bus: Arc<NotificationBus>,
) {
    let (connection, mut reader) = match connections.register(stream).await {
        Ok(registered) => registered,
        Err(e) => {
            warn!(error = %e, "failed to register connection");
            return;
        }
    };

    loop {
        let data = match drain_socket(&mut reader).await {
            Ok(data) if !data.is_empty() => data,
            Ok(_) => break,
            Err(e) => {
                debug!(connection = %connection.id, error = %e, "read failed");
                break;
            }
        };

        let mut buffer = BytesMut::from(&data[..]);
        let frames = match RespValue::parse(&mut buffer) {
            Ok(frames) => frames,
            Err(e) => {
                debug!(connection = %connection.id, error = %e, "protocol error");
                if let Err(e) = connection.write_frames(&[e.as_frame()]).await {
                    warn!(connection = %connection.id, error = %e, "failed to write error frame");
                    break;
                }
                continue;
            }
        };

        for frame in frames {
            let request_id = Uuid::new_v4();
            connections.track_request(request_id, connection.id).await;

            let outcome = router.execute(frame, request_id).await;

            // The response must be on the wire before subscribers get a
            // chance to write more bytes on this connection.
            if let Err(e) = connection.write_frames(&outcome.response).await {
                warn!(connection = %connection.id, error = %e, "failed to write response");
                break;
            }

            router.publish(outcome).await;
        }
    }

    connections.deregister(connection.id).await;
    debug!(connection = %connection.id, peer = %connection.peer_addr, "connection closed");
    bus.publish_connection_closed(ConnectionClosed {
        connection: connection.id,
    })
    .await;
}
