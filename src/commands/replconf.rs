//! REPLCONF and its GETACK sub-command.
//!
//! Three shapes arrive under this name: handshake configuration
//! (`listening-port`, `capa`), which gets a plain `OK`; `ACK <n>` from a
//! replica, which gets no reply at all (the replication controller
//! consumes it off the notification bus); and `GETACK *` from a master,
//! answered with the replica's processed-byte offset.

use std::sync::Arc;

use crate::commands::CommandError;
use crate::replication::ReplicationController;
use crate::resp::RespValue;

pub fn replconf(args: &[String]) -> Result<Vec<RespValue>, CommandError> {
    if let Some(first) = args.first() {
        if first.eq_ignore_ascii_case("ack") {
            // The ACK's payload travels via the CommandExecuted
            // notification; replying here would corrupt the replication
            // stream.
            return Ok(vec![]);
        }
    }

    Ok(vec![RespValue::SimpleString("OK".to_string())])
}

pub async fn replconf_getack(
    replication: &Arc<ReplicationController>,
    args: &[String],
) -> Result<Vec<RespValue>, CommandError> {
    if args.len() != 2 {
        return Err(CommandError::WrongArity("replconf"));
    }

    Ok(vec![replication.ack_response().await])
}

#[cfg(test)]
mod tests {
    use super::*;

    fn args(values: &[&str]) -> Vec<String> {
        values.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn test_replconf_handshake_arguments_get_ok() {
        let test_cases = vec![
            args(&["listening-port", "6380"]),
            args(&["capa", "psync2"]),
            args(&[]),
        ];

        for arguments in test_cases {
            assert_eq!(
                replconf(&arguments),
                Ok(vec![RespValue::SimpleString("OK".to_string())]),
                "arguments {:?}",
                arguments
            );
        }
    }

    #[test]
    fn test_replconf_ack_gets_no_reply() {
        assert_eq!(replconf(&args(&["ACK", "37"])), Ok(vec![]));
        assert_eq!(replconf(&args(&["ack", "0"])), Ok(vec![]));
    }
}
