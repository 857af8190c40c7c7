//! An in-memory key/value server speaking the RESP2 wire protocol.
//!
//! The pieces, bottom up:
//!
//! - RESP2 streaming codec, including the CRLF-less snapshot framing
//!   used during resync
//! - a concurrent keyspace with TTL expiry, split into expirable and
//!   persistent submaps, plus append-only streams with monotonic ids
//! - an RDB snapshot loader
//! - a connection multiplexer feeding a command router, with a
//!   command-executed notification bus behind it
//! - asynchronous primary-to-replica propagation: handshake, fan-out,
//!   GETACK/ACK offset tracking and WAIT

pub mod bimap;
pub mod commands;
pub mod config;
pub mod connection;
pub mod key_value_store;
pub mod notification;
pub mod rdb;
pub mod replication;
pub mod resp;
pub mod router;
pub mod server;
pub mod streams;
