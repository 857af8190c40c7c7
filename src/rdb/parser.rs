use std::collections::HashMap;

use jiff::Timestamp;
use thiserror::Error;
use tracing::debug;

use crate::key_value_store::{StoredValue, ValueKind};
use crate::rdb::encoding::{
    read_plain_length, read_string, read_u32_le, read_u64_le, Cursor,
};

const OPCODE_AUX: u8 = 0xFA;
const OPCODE_RESIZEDB: u8 = 0xFB;
const OPCODE_EXPIRETIME_MS: u8 = 0xFC;
const OPCODE_EXPIRETIME: u8 = 0xFD;
const OPCODE_SELECTDB: u8 = 0xFE;
const OPCODE_EOF: u8 = 0xFF;

const VALUE_TYPE_STRING: u8 = 0x00;

#[derive(Error, Debug)]
pub enum RdbError {
    #[error("unexpected end of file")]
    UnexpectedEof,
    #[error("invalid magic string")]
    InvalidMagic,
    #[error("invalid version header")]
    InvalidVersion,
    #[error("invalid length encoding type {0}")]
    InvalidLengthEncoding(u8),
    #[error("expected a length-encoded integer")]
    ExpectedPlainLength,
    #[error("string contains invalid UTF-8")]
    InvalidUtf8,
    #[error("unsupported value type 0x{0:02X}")]
    UnsupportedValueType(u8),
    #[error("unknown opcode 0x{0:02X}")]
    UnknownOpcode(u8),
    #[error("invalid expiry timestamp")]
    InvalidExpiry,
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// One `SELECTDB` section: the database index, capacity hints from
/// `RESIZEDB` if present, and the entries that were still live at load
/// time.
#[derive(Debug, Default)]
pub struct RdbDatabase {
    pub index: usize,
    pub table_capacity: Option<usize>,
    pub expire_table_capacity: Option<usize>,
    pub entries: HashMap<String, StoredValue>,
}

/// A fully parsed snapshot file.
#[derive(Debug, Default)]
pub struct RdbFile {
    pub version: String,
    pub metadata: HashMap<String, String>,
    pub databases: Vec<RdbDatabase>,
    pub checksum: Vec<u8>,
}

/// Parses a complete snapshot out of `bytes`.
///
/// Entries whose expiry already passed are skipped. Any value type other
/// than String fails the whole load; silently dropping data a snapshot
/// claims to hold is worse than refusing the file.
pub fn parse(bytes: &[u8]) -> Result<RdbFile, RdbError> {
    let mut cursor = Cursor::new(bytes);

    let magic = cursor.take(5)?;
    if magic != b"REDIS" {
        return Err(RdbError::InvalidMagic);
    }

    let version_bytes = cursor.take(4)?;
    let version =
        String::from_utf8(version_bytes.to_vec()).map_err(|_| RdbError::InvalidVersion)?;
    if !version.bytes().all(|b| b.is_ascii_digit()) {
        return Err(RdbError::InvalidVersion);
    }

    let mut file = RdbFile {
        version,
        ..RdbFile::default()
    };

    loop {
        let opcode = cursor.take_byte()?;

        match opcode {
            OPCODE_AUX => {
                let key = read_string(&mut cursor)?;
                let value = read_string(&mut cursor)?;
                debug!(key = %key, value = %value, "snapshot metadata");
                file.metadata.insert(key, value);
            }
            OPCODE_SELECTDB => {
                let index = read_plain_length(&mut cursor)?;
                let database = parse_database(&mut cursor, index)?;
                file.databases.push(database);
            }
            OPCODE_EOF => {
                file.checksum = cursor.take(8)?.to_vec();
                break;
            }
            other => return Err(RdbError::UnknownOpcode(other)),
        }

        if cursor.is_at_end() {
            return Err(RdbError::UnexpectedEof);
        }
    }

    Ok(file)
}

/// Parses one database body. A `SELECTDB` or `EOF` byte terminates the
/// body; the cursor is stepped back so the outer loop re-reads it.
fn parse_database(cursor: &mut Cursor, index: usize) -> Result<RdbDatabase, RdbError> {
    let mut database = RdbDatabase {
        index,
        ..RdbDatabase::default()
    };

    loop {
        let opcode = cursor.take_byte()?;

        match opcode {
            OPCODE_RESIZEDB => {
                // Capacity hints only; the entry maps grow on their own.
                database.table_capacity = Some(read_plain_length(cursor)?);
                database.expire_table_capacity = Some(read_plain_length(cursor)?);
            }
            OPCODE_EXPIRETIME_MS => {
                let expiry_ms = read_u64_le(cursor)?;
                let expires_at = Timestamp::from_millisecond(expiry_ms as i64)
                    .map_err(|_| RdbError::InvalidExpiry)?;
                read_expirable_entry(cursor, &mut database, expires_at)?;
            }
            OPCODE_EXPIRETIME => {
                let expiry_seconds = read_u32_le(cursor)?;
                let expires_at = Timestamp::from_second(expiry_seconds as i64)
                    .map_err(|_| RdbError::InvalidExpiry)?;
                read_expirable_entry(cursor, &mut database, expires_at)?;
            }
            OPCODE_SELECTDB | OPCODE_EOF => {
                cursor.step_back(1);
                break;
            }
            value_type => {
                let (key, value) = read_key_value(cursor, value_type)?;
                database
                    .entries
                    .insert(key, StoredValue::string(value, None));
            }
        }
    }

    Ok(database)
}

fn read_expirable_entry(
    cursor: &mut Cursor,
    database: &mut RdbDatabase,
    expires_at: Timestamp,
) -> Result<(), RdbError> {
    let value_type = cursor.take_byte()?;
    let (key, value) = read_key_value(cursor, value_type)?;

    if Timestamp::now() >= expires_at {
        debug!(key = %key, "skipping already-expired snapshot entry");
        return Ok(());
    }

    database
        .entries
        .insert(key, StoredValue::string(value, Some(expires_at)));

    Ok(())
}

fn read_key_value(cursor: &mut Cursor, value_type: u8) -> Result<(String, String), RdbError> {
    // Recognize the full set of kinds so an unexpected byte is reported
    // as what it is, but only String payloads can be materialized.
    let kind = match value_type {
        VALUE_TYPE_STRING => ValueKind::String,
        0x01 | 0x0A | 0x0E => ValueKind::List,
        0x02 | 0x0B => ValueKind::Set,
        0x03 | 0x0C => ValueKind::ZSet,
        0x04 | 0x09 | 0x0D => ValueKind::Hash,
        other => return Err(RdbError::UnknownOpcode(other)),
    };

    if kind != ValueKind::String {
        return Err(RdbError::UnsupportedValueType(value_type));
    }

    let key = read_string(cursor)?;
    let value = read_string(cursor)?;

    Ok((key, value))
}
