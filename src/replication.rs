//! Replication: master-side fan-out and ack accounting, replica-side
//! handshake and the master link.
//!
//! The master side is driven entirely by notifications. Bus callbacks
//! forward events into one ordered queue; a single worker drains it, so
//! replicas observe writes in master execution order and the dispatcher
//! never blocks on replica sockets.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use bytes::BytesMut;
use thiserror::Error;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;
use tokio::sync::{mpsc, Mutex, Notify, RwLock};
use tokio::time::Instant;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use crate::connection::{drain_socket, Connection, ConnectionId, ConnectionRegistry};
use crate::notification::{CommandExecuted, NotificationBus, ReplicaHeartbeat};
use crate::resp::{command_request, RespError, RespValue};
use crate::router::Router;
use crate::server::ServerInfo;

/// An empty snapshot, byte for byte, hex-encoded. Served to a freshly
/// attached replica as its initial resync payload.
const EMPTY_RDB_HEX: &str = "524544495330303131fa0972656469732d76657205372e322e30fa0a7265\
6469732d62697473c040fa056374696d65c26d08bc65fa08757365642d6d656dc2b0c41000fa08616f662d\
62617365c000fff06e3bfec0ff5aa2";

pub fn empty_rdb() -> Vec<u8> {
    EMPTY_RDB_HEX
        .as_bytes()
        .chunks(2)
        .map(|pair| {
            let text = str::from_utf8(pair).unwrap();
            u8::from_str_radix(text, 16).unwrap()
        })
        .collect()
}

#[derive(Error, Debug)]
pub enum HandshakeError {
    #[error("I/O error: {0}")]
    Io(#[from] tokio::io::Error),
    #[error("protocol error: {0}")]
    Protocol(#[from] RespError),
    #[error("empty response from master during {step}")]
    EmptyResponse { step: &'static str },
    #[error("unexpected response from master during {step}: {response}")]
    UnexpectedResponse { step: &'static str, response: String },
}

/// Master-side view of one attached replica.
///
/// Lifecycle: registered on PSYNC with `active = true`; `awaiting_ack`
/// flips on every relayed write and back off on REPLCONF ACK; a closed
/// connection marks it inactive; the sweeper drops inactive entries.
pub struct ReplicaState {
    pub conn: Arc<Connection>,
    pub offset: u64,
    pub active: bool,
    pub awaiting_ack: bool,
}

enum ReplicationEvent {
    Command(CommandExecuted),
    ConnectionClosed(ConnectionId),
}

pub struct ReplicationController {
    server: Arc<ServerInfo>,
    connections: Arc<ConnectionRegistry>,
    bus: Arc<NotificationBus>,
    replicas: RwLock<HashMap<ConnectionId, ReplicaState>>,
    ack_signal: Notify,
    /// Replica role only: encoded bytes of master commands applied so
    /// far. Guarded by a mutex so GETACK reads and post-command
    /// increments stay consistent.
    master_offset: Mutex<u64>,
}

impl ReplicationController {
    /// Builds the controller, spawns its event worker, and wires the bus
    /// subscriptions. On a replica the master-side machinery stays idle:
    /// the callbacks filter on role before forwarding anything.
    pub async fn new(
        server: Arc<ServerInfo>,
        connections: Arc<ConnectionRegistry>,
        bus: Arc<NotificationBus>,
    ) -> Arc<Self> {
        let (events, receiver) = mpsc::unbounded_channel();

        let controller = Arc::new(Self {
            server: Arc::clone(&server),
            connections,
            bus: Arc::clone(&bus),
            replicas: RwLock::new(HashMap::new()),
            ack_signal: Notify::new(),
            master_offset: Mutex::new(0),
        });

        tokio::spawn(run_event_worker(Arc::clone(&controller), receiver));

        {
            let server = Arc::clone(&server);
            let events = events.clone();
            bus.on_command_executed(move |notification| {
                if !server.is_master() {
                    return;
                }
                if !notification.success {
                    debug!(
                        command = %notification.cmd,
                        "skipping failed command for replication"
                    );
                    return;
                }
                match notification.cmd.as_str() {
                    "PSYNC" | "SET" | "SET_PX" | "REPLCONF" => {
                        let _ = events.send(ReplicationEvent::Command(notification.clone()));
                    }
                    _ => (),
                }
            })
            .await;
        }

        {
            let server = Arc::clone(&server);
            bus.on_connection_closed(move |notification| {
                if !server.is_master() {
                    return;
                }
                let _ = events.send(ReplicationEvent::ConnectionClosed(notification.connection));
            })
            .await;
        }

        controller
    }

    /// Number of replicas not waiting on an ack.
    pub async fn up_to_date_count(&self) -> usize {
        self.replicas
            .read()
            .await
            .values()
            .filter(|replica| !replica.awaiting_ack)
            .count()
    }

    pub async fn replica_count(&self) -> usize {
        self.replicas.read().await.len()
    }

    /// WAIT: probe lagging replicas with GETACK, then wait for ack
    /// transitions until enough replicas are caught up or the deadline
    /// passes. No deadline means waiting on the condition alone.
    pub async fn wait_for_acks(&self, replica_count: usize, timeout: Option<Duration>) -> usize {
        self.request_outstanding_acks().await;

        let deadline = timeout.map(|t| Instant::now() + t);

        loop {
            let notified = self.ack_signal.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();

            let acknowledged = self.up_to_date_count().await;
            if acknowledged >= replica_count {
                return acknowledged;
            }

            match deadline {
                Some(deadline) => {
                    tokio::select! {
                        _ = notified => (),
                        _ = tokio::time::sleep_until(deadline) => {
                            return self.up_to_date_count().await;
                        }
                    }
                }
                None => notified.await,
            }
        }
    }

    async fn request_outstanding_acks(&self) {
        let getack = command_request("REPLCONF", &["GETACK", "*"]);
        let replicas = self.replicas.read().await;

        for replica in replicas.values() {
            if !replica.active || !replica.awaiting_ack {
                continue;
            }

            let conn = Arc::clone(&replica.conn);
            let frame = getack.clone();
            tokio::spawn(async move {
                if let Err(e) = conn.write_frames(&[frame]).await {
                    warn!(connection = %conn.id, error = %e, "failed to send GETACK");
                }
            });
        }
    }

    /// Drops replicas whose connections have gone away. Runs on a
    /// 1-minute cadence from [`run_replica_cleanup`].
    pub async fn sweep_inactive(&self) -> usize {
        let mut replicas = self.replicas.write().await;
        let before = replicas.len();

        replicas.retain(|connection, replica| {
            if !replica.active {
                debug!(connection = %connection, "dropping inactive replica");
            }
            replica.active
        });

        before - replicas.len()
    }

    /// Replica role: the `REPLCONF ACK <offset>` reply for a GETACK. The
    /// offset covers bytes processed before the GETACK itself.
    pub async fn ack_response(&self) -> RespValue {
        let offset = *self.master_offset.lock().await;
        command_request("REPLCONF", &["ACK", &offset.to_string()])
    }

    pub async fn add_master_bytes(&self, bytes: u64) {
        let mut offset = self.master_offset.lock().await;
        *offset += bytes;
    }

    pub async fn master_bytes_processed(&self) -> u64 {
        *self.master_offset.lock().await
    }

    async fn register_replica(&self, notification: &CommandExecuted) {
        let Some(conn) = self
            .connections
            .connection_for_request(&notification.request_id)
            .await
        else {
            warn!(
                request = %notification.request_id,
                "no connection found for completed PSYNC"
            );
            return;
        };

        if let Err(e) = conn
            .write_frames(&[RespValue::RdbPayload(empty_rdb())])
            .await
        {
            warn!(connection = %conn.id, error = %e, "failed to send snapshot to replica");
            return;
        }

        let connected = {
            let mut replicas = self.replicas.write().await;
            replicas.insert(
                conn.id,
                ReplicaState {
                    conn: Arc::clone(&conn),
                    offset: 0,
                    active: true,
                    awaiting_ack: false,
                },
            );
            replicas.len()
        };

        info!(connection = %conn.id, connected, "replica attached");
        self.bus
            .publish_replica_heartbeat(ReplicaHeartbeat { connected })
            .await;
    }

    /// Relays a successful write to every active replica, in the order
    /// the worker received it. A failed write skips that replica only.
    async fn fan_out(&self, notification: &CommandExecuted) {
        let encoded_length = notification.request.encode().len() as u64;
        let mut replicas = self.replicas.write().await;

        for (connection, replica) in replicas.iter_mut() {
            if !replica.active {
                debug!(connection = %connection, "skipping inactive replica");
                continue;
            }

            if let Err(e) = replica.conn.write_frames(&[notification.request.clone()]).await {
                warn!(
                    connection = %connection,
                    error = %e,
                    command = %notification.cmd,
                    "failed to relay command to replica"
                );
                continue;
            }

            replica.awaiting_ack = true;
        }

        self.server.add_repl_offset(encoded_length);
        debug!(command = %notification.cmd, "relayed command to replicas");
    }

    async fn record_ack(&self, notification: &CommandExecuted) {
        if notification.args.len() < 2 {
            return;
        }

        let Ok(acknowledged) = notification.args[1].parse::<u64>() else {
            warn!(ack = %notification.args[1], "malformed REPLCONF ACK offset");
            return;
        };

        let Some(conn) = self
            .connections
            .connection_for_request(&notification.request_id)
            .await
        else {
            warn!(
                request = %notification.request_id,
                "no connection found for REPLCONF ACK"
            );
            return;
        };

        {
            let mut replicas = self.replicas.write().await;
            if let Some(replica) = replicas.get_mut(&conn.id) {
                replica.offset += acknowledged;
                replica.awaiting_ack = false;
            }
        }

        self.ack_signal.notify_waiters();
    }

    async fn mark_inactive(&self, connection: ConnectionId) {
        let mut replicas = self.replicas.write().await;
        if let Some(replica) = replicas.get_mut(&connection) {
            replica.active = false;
            info!(connection = %connection, "replica connection lost");
        }
    }
}

async fn run_event_worker(
    controller: Arc<ReplicationController>,
    mut receiver: mpsc::UnboundedReceiver<ReplicationEvent>,
) {
    while let Some(event) = receiver.recv().await {
        match event {
            ReplicationEvent::Command(notification) => match notification.cmd.as_str() {
                "PSYNC" => controller.register_replica(&notification).await,
                "SET" | "SET_PX" => controller.fan_out(&notification).await,
                "REPLCONF" => {
                    if notification
                        .args
                        .first()
                        .is_some_and(|arg| arg.eq_ignore_ascii_case("ack"))
                    {
                        controller.record_ack(&notification).await;
                    }
                }
                other => debug!(command = other, "ignoring command for replication"),
            },
            ReplicationEvent::ConnectionClosed(connection) => {
                controller.mark_inactive(connection).await;
            }
        }
    }
}

/// Background sweeper for inactive replica entries, 1-minute cadence.
pub async fn run_replica_cleanup(controller: Arc<ReplicationController>) {
    let mut ticker = tokio::time::interval(Duration::from_secs(60));
    ticker.tick().await;

    loop {
        ticker.tick().await;
        let removed = controller.sweep_inactive().await;
        if removed > 0 {
            debug!(removed, "replica cleanup completed");
        }
    }
}

/// A completed handshake: the master socket plus any bytes the master
/// pipelined behind the `FULLRESYNC` line (the snapshot payload, and
/// possibly buffered replication commands).
pub struct MasterLink {
    pub stream: TcpStream,
    pub leftover: Vec<u8>,
}

/// Replica-side handshake: PING, REPLCONF listening-port, REPLCONF capa,
/// then PSYNC. Any failed step is fatal to the replica process.
pub async fn connect_to_master(
    host: &str,
    port: u16,
    listening_port: u16,
) -> Result<MasterLink, HandshakeError> {
    let address = format!("{}:{}", host, port);
    let mut stream = TcpStream::connect(&address).await?;
    info!(master = %address, "connected to master, starting handshake");

    let ok = RespValue::SimpleString("OK".to_string());

    handshake_step(
        &mut stream,
        command_request("PING", &[]),
        &RespValue::SimpleString("PONG".to_string()),
        "PING",
    )
    .await?;
    handshake_step(
        &mut stream,
        command_request("REPLCONF", &["listening-port", &listening_port.to_string()]),
        &ok,
        "REPLCONF listening-port",
    )
    .await?;
    handshake_step(
        &mut stream,
        command_request("REPLCONF", &["capa", "psync2"]),
        &ok,
        "REPLCONF capa",
    )
    .await?;

    // PSYNC is different on both ends: only the FULLRESYNC prefix is
    // fixed, and the same read may already carry the snapshot.
    stream
        .write_all(&command_request("PSYNC", &["?", "-1"]).encode())
        .await?;
    stream.flush().await?;

    let data = drain_stream(&mut stream).await?;
    if data.is_empty() {
        return Err(HandshakeError::EmptyResponse { step: "PSYNC" });
    }

    let mut buffer = BytesMut::from(&data[..]);
    let response = RespValue::parse_one(&mut buffer)?;

    if !response.is_equal(&RespValue::SimpleString("FULLRESYNC ".to_string()), true) {
        return Err(HandshakeError::UnexpectedResponse {
            step: "PSYNC",
            response: format!("{:?}", response),
        });
    }

    info!("handshake with master completed");
    Ok(MasterLink {
        stream,
        leftover: buffer.to_vec(),
    })
}

async fn handshake_step(
    stream: &mut TcpStream,
    request: RespValue,
    expected: &RespValue,
    step: &'static str,
) -> Result<(), HandshakeError> {
    debug!(step, "sending handshake command");
    stream.write_all(&request.encode()).await?;
    stream.flush().await?;

    let data = drain_stream(stream).await?;
    if data.is_empty() {
        return Err(HandshakeError::EmptyResponse { step });
    }

    let mut buffer = BytesMut::from(&data[..]);
    let response = RespValue::parse_one(&mut buffer)?;

    if !response.is_equal(expected, false) {
        return Err(HandshakeError::UnexpectedResponse {
            step,
            response: format!("{:?}", response),
        });
    }

    Ok(())
}

async fn drain_stream(stream: &mut TcpStream) -> tokio::io::Result<Vec<u8>> {
    let mut data = Vec::new();
    let mut chunk = [0u8; 1024];

    loop {
        let bytes_read = stream.read(&mut chunk).await?;

        if bytes_read == 0 {
            break;
        }

        data.extend_from_slice(&chunk[..bytes_read]);

        if bytes_read < 1024 {
            break;
        }
    }

    Ok(data)
}

/// Read loop over the master socket. Commands are executed without
/// replying (only `REPLCONF GETACK` is answered), and every applied
/// command's encoded length feeds the processed-bytes counter. Losing
/// this socket is fatal for the replica.
pub async fn run_master_link(
    link: MasterLink,
    router: Arc<Router>,
    connections: Arc<ConnectionRegistry>,
    controller: Arc<ReplicationController>,
) {
    let (connection, mut reader) = match connections.register(link.stream).await {
        Ok(registered) => registered,
        Err(e) => {
            error!(error = %e, "failed to register master connection");
            std::process::exit(1);
        }
    };

    info!(connection = %connection.id, "master link established");

    if !link.leftover.is_empty() {
        process_master_bytes(&link.leftover, &connection, &router, &connections, &controller)
            .await;
    }

    loop {
        match drain_socket(&mut reader).await {
            Ok(data) if !data.is_empty() => {
                process_master_bytes(&data, &connection, &router, &connections, &controller).await;
            }
            Ok(_) => {
                error!("master closed the replication link");
                std::process::exit(1);
            }
            Err(e) => {
                error!(error = %e, "I/O failure on the master link");
                std::process::exit(1);
            }
        }
    }
}

/// Runs every frame from the master through the normal request path, as
/// if freshly received on that connection.
async fn process_master_bytes(
    data: &[u8],
    connection: &Arc<Connection>,
    router: &Arc<Router>,
    connections: &Arc<ConnectionRegistry>,
    controller: &Arc<ReplicationController>,
) {
    let mut buffer = BytesMut::from(data);
    let frames = match RespValue::parse(&mut buffer) {
        Ok(frames) => frames,
        Err(e) => {
            warn!(error = %e, "dropping undecodable bytes from master");
            return;
        }
    };

    for frame in frames {
        if let RespValue::RdbPayload(bytes) = &frame {
            // The seed snapshot; it is not a command and contributes
            // nothing to the offset.
            debug!(length = bytes.len(), "received snapshot payload from master");
            continue;
        }

        let encoded_length = frame.encode().len() as u64;
        let request_id = Uuid::new_v4();
        connections.track_request(request_id, connection.id).await;

        let respond = is_getack(&frame);
        let outcome = router.execute(frame, request_id).await;

        // The GETACK reply must carry the offset as it stood before the
        // GETACK itself; its own length lands on the counter after.
        if respond {
            if let Err(e) = connection.write_frames(&outcome.response).await {
                warn!(error = %e, "failed to write ACK to master");
            }
        }

        router.publish(outcome).await;
        controller.add_master_bytes(encoded_length).await;
    }
}

fn is_getack(frame: &RespValue) -> bool {
    let RespValue::Array(elements) = frame else {
        return false;
    };

    matches!(
        (elements.first(), elements.get(1)),
        (Some(RespValue::BulkString(command)), Some(RespValue::BulkString(sub)))
            if command.eq_ignore_ascii_case("replconf") && sub.eq_ignore_ascii_case("getack")
    )
}
