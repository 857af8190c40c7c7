//! RESP2 wire codec.
//!
//! Values are decoded out of a [`BytesMut`] buffer, consuming bytes as
//! frames complete, so a single read that carried several pipelined frames
//! (or a `FULLRESYNC` line followed by a snapshot payload) decodes into
//! multiple values in one pass.

use bytes::BytesMut;
use thiserror::Error;

#[derive(Error, Debug, PartialEq)]
pub enum RespError {
    #[error("invalid UTF-8 sequence")]
    InvalidUtf8,
    #[error("'{0}' is not a valid start of a RESP2 value (expected +, -, :, $ or *)")]
    UnknownRespType(char),
    #[error("failed to parse integer")]
    FailedToParseInteger,
    #[error("invalid bulk string")]
    InvalidBulkString,
    #[error("invalid array")]
    InvalidArray,
    #[error("unexpected end of input")]
    UnexpectedEndOfInput,
}

impl RespError {
    /// Renders the error as a RESP error frame for the originating
    /// connection. Protocol errors never tear the connection down.
    pub fn as_frame(&self) -> RespValue {
        RespValue::Error(format!("ERR {}", self))
    }
}

/// A single RESP2 value.
///
/// `RdbPayload` is the one non-standard shape: a bulk string without the
/// trailing CRLF, used exactly once per replication handshake to ship the
/// snapshot. It has to be its own variant because the bytes that follow it
/// on the wire belong to the next frame, not to this one.
#[derive(Debug, PartialEq, Clone)]
pub enum RespValue {
    SimpleString(String),
    Error(String),
    Integer(i64),
    BulkString(String),
    NullBulkString,
    Array(Vec<RespValue>),
    RdbPayload(Vec<u8>),
}

impl RespValue {
    /// Decodes every complete frame in the buffer, consuming them.
    ///
    /// Fails on a malformed prefix or a truncated frame; nothing is
    /// returned from a buffer that errors part-way through.
    pub fn parse(buffer: &mut BytesMut) -> Result<Vec<RespValue>, RespError> {
        let mut values = Vec::new();

        while !buffer.is_empty() {
            values.push(Self::parse_one(buffer)?);
        }

        Ok(values)
    }

    /// Decodes exactly one frame, leaving any trailing bytes in the buffer.
    ///
    /// The replication handshake uses this to verify the `FULLRESYNC` line
    /// while preserving whatever the master pipelined behind it.
    pub fn parse_one(buffer: &mut BytesMut) -> Result<RespValue, RespError> {
        let Some(&prefix) = buffer.first() else {
            return Err(RespError::UnexpectedEndOfInput);
        };

        match prefix {
            b'+' => {
                let line = split_line(buffer)?;
                Ok(RespValue::SimpleString(to_utf8(&line[1..])?))
            }
            b'-' => {
                let line = split_line(buffer)?;
                Ok(RespValue::Error(to_utf8(&line[1..])?))
            }
            b':' => {
                let line = split_line(buffer)?;
                let value = to_utf8(&line[1..])?
                    .parse::<i64>()
                    .map_err(|_| RespError::FailedToParseInteger)?;
                Ok(RespValue::Integer(value))
            }
            b'$' => Self::parse_bulk_string(buffer),
            b'*' => {
                let line = split_line(buffer)?;
                let length = to_utf8(&line[1..])?
                    .parse::<usize>()
                    .map_err(|_| RespError::InvalidArray)?;

                let mut elements = Vec::with_capacity(length);

                while elements.len() < length {
                    elements.push(Self::parse_one(buffer)?);
                }

                Ok(RespValue::Array(elements))
            }
            other => Err(RespError::UnknownRespType(other as char)),
        }
    }

    fn parse_bulk_string(buffer: &mut BytesMut) -> Result<RespValue, RespError> {
        let line = split_line(buffer)?;
        let declared_length = to_utf8(&line[1..])?
            .parse::<i64>()
            .map_err(|_| RespError::InvalidBulkString)?;

        if declared_length == -1 {
            return Ok(RespValue::NullBulkString);
        }

        let length = usize::try_from(declared_length).map_err(|_| RespError::InvalidBulkString)?;

        if buffer.len() < length {
            return Err(RespError::UnexpectedEndOfInput);
        }

        let content = buffer.split_to(length);

        // A bulk string is terminated by CRLF; its absence marks the
        // CRLF-less snapshot payload sent during PSYNC.
        if buffer.len() >= 2 && &buffer[..2] == b"\r\n" {
            let _ = buffer.split_to(2);
            Ok(RespValue::BulkString(to_utf8(&content)?))
        } else {
            Ok(RespValue::RdbPayload(content.to_vec()))
        }
    }

    /// Encodes the value back to its wire form.
    pub fn encode(&self) -> Vec<u8> {
        match self {
            RespValue::SimpleString(s) => format!("+{}\r\n", s).into_bytes(),
            RespValue::Error(s) => format!("-{}\r\n", s).into_bytes(),
            RespValue::Integer(i) => format!(":{}\r\n", i).into_bytes(),
            RespValue::BulkString(s) => format!("${}\r\n{}\r\n", s.len(), s).into_bytes(),
            RespValue::NullBulkString => b"$-1\r\n".to_vec(),
            RespValue::Array(elements) => {
                let mut encoded = format!("*{}\r\n", elements.len()).into_bytes();

                for element in elements {
                    encoded.extend_from_slice(&element.encode());
                }

                encoded
            }
            RespValue::RdbPayload(bytes) => {
                // No trailing CRLF: the next bytes on the wire may already
                // be a replicated command.
                let mut encoded = format!("${}\r\n", bytes.len()).into_bytes();
                encoded.extend_from_slice(bytes);
                encoded
            }
        }
    }

    /// Structural equality, optionally comparing string contents by prefix.
    ///
    /// Prefix mode exists for the handshake's `FULLRESYNC <replid> <offset>`
    /// line, where only the leading keyword is fixed.
    pub fn is_equal(&self, expected: &RespValue, prefix_only: bool) -> bool {
        match (self, expected) {
            (RespValue::SimpleString(a), RespValue::SimpleString(b))
            | (RespValue::Error(a), RespValue::Error(b))
            | (RespValue::BulkString(a), RespValue::BulkString(b)) => {
                if prefix_only {
                    a.starts_with(b.as_str())
                } else {
                    a == b
                }
            }
            (RespValue::Array(a), RespValue::Array(b)) => {
                a.len() == b.len()
                    && a.iter()
                        .zip(b.iter())
                        .all(|(x, y)| x.is_equal(y, prefix_only))
            }
            _ => self == expected,
        }
    }
}

/// Builds the request frame for a command: an array of bulk strings with
/// the command name first.
pub fn command_request(command: &str, arguments: &[&str]) -> RespValue {
    let mut elements = vec![RespValue::BulkString(command.to_string())];

    for argument in arguments {
        elements.push(RespValue::BulkString(argument.to_string()));
    }

    RespValue::Array(elements)
}

fn split_line(buffer: &mut BytesMut) -> Result<BytesMut, RespError> {
    let Some(position) = buffer.windows(2).position(|window| window == b"\r\n") else {
        return Err(RespError::UnexpectedEndOfInput);
    };

    let line = buffer.split_to(position);
    let _ = buffer.split_to(2);

    Ok(line)
}

fn to_utf8(bytes: &[u8]) -> Result<String, RespError> {
    str::from_utf8(bytes)
        .map(|s| s.to_string())
        .map_err(|_| RespError::InvalidUtf8)
}
