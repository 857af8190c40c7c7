use std::sync::Arc;
use std::time::Duration;

use crate::commands::CommandError;
use crate::replication::ReplicationController;
use crate::resp::RespValue;

#[derive(Debug, PartialEq)]
pub struct WaitArguments {
    pub replica_count: usize,
    /// `None` means no deadline: wait until enough replicas acknowledge.
    pub timeout: Option<Duration>,
}

impl WaitArguments {
    pub fn parse(args: &[String]) -> Result<Self, CommandError> {
        if args.len() != 2 {
            return Err(CommandError::WrongArity("wait"));
        }

        let replica_count = args[0]
            .parse::<usize>()
            .map_err(|_| CommandError::NotAnInteger)?;
        let timeout_ms = args[1]
            .parse::<u64>()
            .map_err(|_| CommandError::NotAnInteger)?;

        Ok(Self {
            replica_count,
            timeout: match timeout_ms {
                0 => None,
                ms => Some(Duration::from_millis(ms)),
            },
        })
    }
}

pub async fn wait(
    replication: &Arc<ReplicationController>,
    args: &[String],
) -> Result<Vec<RespValue>, CommandError> {
    let arguments = WaitArguments::parse(args)?;

    let acknowledged = replication
        .wait_for_acks(arguments.replica_count, arguments.timeout)
        .await;

    Ok(vec![RespValue::Integer(acknowledged as i64)])
}
