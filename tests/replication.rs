//! Master/replica pairs over real sockets: handshake, fan-out ordering,
//! GETACK offset accounting and WAIT.

use std::sync::Arc;
use std::time::Duration;

use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};
use tokio::time::timeout;

use oxidis::commands::CommandRegistry;
use oxidis::config::Config;
use oxidis::connection::ConnectionRegistry;
use oxidis::key_value_store::Keyspace;
use oxidis::notification::NotificationBus;
use oxidis::replication::{empty_rdb, run_master_link, MasterLink, ReplicationController};
use oxidis::resp::{command_request, RespValue};
use oxidis::router::Router;
use oxidis::server::{Server, ServerInfo};
use oxidis::streams::StreamStore;

async fn start_master() -> std::net::SocketAddr {
    let server = Server::new(Config {
        port: 0,
        replica_of: None,
        dir: String::new(),
        dbfilename: String::new(),
    })
    .await
    .unwrap();

    let addr = server.local_addr().unwrap();
    tokio::spawn(async move {
        let _ = server.run().await;
    });
    tokio::time::sleep(Duration::from_millis(100)).await;

    addr
}

async fn start_replica(master: std::net::SocketAddr) -> std::net::SocketAddr {
    let server = Server::new(Config {
        port: 0,
        replica_of: Some(("127.0.0.1".to_string(), master.port())),
        dir: String::new(),
        dbfilename: String::new(),
    })
    .await
    .unwrap();

    let addr = server.local_addr().unwrap();
    tokio::spawn(async move {
        let _ = server.run().await;
    });

    // Leave time for the handshake and snapshot delivery.
    tokio::time::sleep(Duration::from_millis(300)).await;
    addr
}

async fn send_and_receive(stream: &mut TcpStream, request: &[u8]) -> Vec<u8> {
    stream.write_all(request).await.unwrap();
    stream.flush().await.unwrap();

    let mut buffer = [0u8; 1024];
    let bytes_read = timeout(Duration::from_secs(2), stream.read(&mut buffer))
        .await
        .expect("timed out waiting for a response")
        .unwrap();

    buffer[..bytes_read].to_vec()
}

fn encode(command: &str, args: &[&str]) -> Vec<u8> {
    command_request(command, args).encode()
}

#[tokio::test]
async fn test_writes_propagate_to_replica_in_order() {
    let master_addr = start_master().await;
    let replica_addr = start_replica(master_addr).await;

    let mut master_client = TcpStream::connect(master_addr).await.unwrap();

    for (key, value) in [("a", "1"), ("a", "2"), ("b", "3")] {
        let response = send_and_receive(&mut master_client, &encode("SET", &[key, value])).await;
        assert_eq!(response, b"+OK\r\n");
    }

    tokio::time::sleep(Duration::from_millis(300)).await;

    // The replica applied all three writes; "a" holds the later value.
    let mut replica_client = TcpStream::connect(replica_addr).await.unwrap();

    let response = send_and_receive(&mut replica_client, &encode("GET", &["a"])).await;
    assert_eq!(response, b"$1\r\n2\r\n");

    let response = send_and_receive(&mut replica_client, &encode("GET", &["b"])).await;
    assert_eq!(response, b"$1\r\n3\r\n");
}

#[tokio::test]
async fn test_replica_reports_slave_role() {
    let master_addr = start_master().await;
    let replica_addr = start_replica(master_addr).await;

    let mut replica_client = TcpStream::connect(replica_addr).await.unwrap();
    let response = send_and_receive(&mut replica_client, &encode("INFO", &[])).await;

    assert!(String::from_utf8(response).unwrap().contains("role:slave\n"));
}

#[tokio::test]
async fn test_wait_counts_acknowledged_replicas() {
    let master_addr = start_master().await;
    let _replica_addr = start_replica(master_addr).await;

    let mut master_client = TcpStream::connect(master_addr).await.unwrap();

    // A fresh replica has nothing outstanding.
    let response = send_and_receive(&mut master_client, &encode("WAIT", &["1", "500"])).await;
    assert_eq!(response, b":1\r\n");

    // After a write the replica owes an ack; WAIT probes it with GETACK
    // and collects the ack well before the deadline.
    let response = send_and_receive(&mut master_client, &encode("SET", &["k", "v"])).await;
    assert_eq!(response, b"+OK\r\n");

    let response = send_and_receive(&mut master_client, &encode("WAIT", &["1", "2000"])).await;
    assert_eq!(response, b":1\r\n");
}

#[tokio::test]
async fn test_wait_with_two_acknowledged_replicas() {
    let master_addr = start_master().await;
    let _first = start_replica(master_addr).await;
    let _second = start_replica(master_addr).await;

    let mut master_client = TcpStream::connect(master_addr).await.unwrap();

    let response = send_and_receive(&mut master_client, &encode("SET", &["k", "v"])).await;
    assert_eq!(response, b"+OK\r\n");

    let started = std::time::Instant::now();
    let response = send_and_receive(&mut master_client, &encode("WAIT", &["2", "2000"])).await;
    assert_eq!(response, b":2\r\n");
    assert!(started.elapsed() < Duration::from_millis(1500));
}

#[tokio::test]
async fn test_wait_times_out_when_no_replica_can_answer() {
    let master_addr = start_master().await;
    let _replica_addr = start_replica(master_addr).await;

    let mut master_client = TcpStream::connect(master_addr).await.unwrap();

    send_and_receive(&mut master_client, &encode("SET", &["k", "v"])).await;

    // Asking for more replicas than exist: the deadline decides.
    let started = std::time::Instant::now();
    let response = send_and_receive(&mut master_client, &encode("WAIT", &["5", "400"])).await;
    assert!(started.elapsed() >= Duration::from_millis(350));
    assert_eq!(response, b":1\r\n");
}

/// Drives `run_master_link` directly against a scripted master so the
/// ACK offsets can be asserted byte for byte.
#[tokio::test]
async fn test_getack_reports_bytes_processed_before_the_probe() {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();

    let replica_side = TcpStream::connect(addr).await.unwrap();
    let (mut master_side, _) = listener.accept().await.unwrap();

    // Replica-role wiring, without a listening server around it.
    let info = Arc::new(ServerInfo::new(&Config {
        port: 0,
        replica_of: Some(("127.0.0.1".to_string(), addr.port())),
        dir: String::new(),
        dbfilename: String::new(),
    }));
    let keyspace = Arc::new(Keyspace::new());
    let streams = Arc::new(StreamStore::new());
    let bus = Arc::new(NotificationBus::new());
    let connections = Arc::new(ConnectionRegistry::new());
    let replication = ReplicationController::new(
        Arc::clone(&info),
        Arc::clone(&connections),
        Arc::clone(&bus),
    )
    .await;
    let registry = CommandRegistry::new(
        Arc::clone(&keyspace),
        Arc::clone(&streams),
        info,
        Arc::clone(&replication),
        &bus,
    )
    .await;
    let router = Arc::new(Router::new(registry, bus));

    tokio::spawn(run_master_link(
        MasterLink {
            stream: replica_side,
            leftover: empty_rdb_frame(),
        },
        router,
        connections,
        replication,
    ));
    tokio::time::sleep(Duration::from_millis(100)).await;

    // Two writes, then the probe. The snapshot contributes nothing.
    let first = encode("SET", &["mango", "1"]);
    let second = encode("SET", &["melon", "2"]);
    master_side.write_all(&first).await.unwrap();
    master_side.write_all(&second).await.unwrap();
    master_side.flush().await.unwrap();
    tokio::time::sleep(Duration::from_millis(200)).await;

    let probe = encode("REPLCONF", &["GETACK", "*"]);
    master_side.write_all(&probe).await.unwrap();
    master_side.flush().await.unwrap();

    let mut buffer = [0u8; 256];
    let bytes_read = timeout(Duration::from_secs(2), master_side.read(&mut buffer))
        .await
        .expect("timed out waiting for the ACK")
        .unwrap();

    let processed = (first.len() + second.len()).to_string();
    let expected = command_request("REPLCONF", &["ACK", &processed]).encode();
    assert_eq!(&buffer[..bytes_read], &expected[..]);

    // The writes were applied without a reply reaching the master.
    assert_eq!(keyspace.get("mango").await.unwrap().data, "1");
    assert_eq!(keyspace.get("melon").await.unwrap().data, "2");

    // A second probe now also covers the first probe's own bytes.
    master_side.write_all(&probe).await.unwrap();
    master_side.flush().await.unwrap();

    let bytes_read = timeout(Duration::from_secs(2), master_side.read(&mut buffer))
        .await
        .expect("timed out waiting for the second ACK")
        .unwrap();

    let processed = (first.len() + second.len() + probe.len()).to_string();
    let expected = command_request("REPLCONF", &["ACK", &processed]).encode();
    assert_eq!(&buffer[..bytes_read], &expected[..]);
}

fn empty_rdb_frame() -> Vec<u8> {
    RespValue::RdbPayload(empty_rdb()).encode()
}
