use thiserror::Error;

use crate::resp::RespValue;

#[derive(Error, Debug, PartialEq)]
pub enum CommandError {
    #[error("invalid command")]
    InvalidCommand,
    #[error("unknown command '{0}'")]
    UnknownCommand(String),
    #[error("wrong number of arguments for '{0}' command")]
    WrongArity(&'static str),
    #[error("invalid expiration time in 'set' command")]
    InvalidSetExpiration,
    #[error("value is not an integer or out of range")]
    NotAnInteger,
    #[error("invalid PSYNC offset")]
    InvalidPsyncOffset,
    #[error("{0}")]
    StreamId(String),
    #[error("invalid glob pattern: {0}")]
    InvalidGlobPattern(String),
}

impl CommandError {
    /// The RESP error frame sent back to the client.
    pub fn as_frame(&self) -> RespValue {
        RespValue::Error(format!("ERR {}", self))
    }
}
