use crate::commands::CommandError;
use crate::resp::RespValue;
use crate::server::ServerInfo;

pub struct PsyncArguments {
    pub repl_id: String,
    pub offset: i64,
}

impl PsyncArguments {
    pub fn parse(args: &[String]) -> Result<Self, CommandError> {
        if args.len() != 2 {
            return Err(CommandError::WrongArity("psync"));
        }

        let offset = args[1]
            .parse::<i64>()
            .map_err(|_| CommandError::InvalidPsyncOffset)?;

        Ok(Self {
            repl_id: args[0].clone(),
            offset,
        })
    }
}

/// Answers a replica's resync request with a full resync marker. The
/// snapshot itself is written afterwards by the replication controller,
/// on the same connection.
pub fn psync(server: &ServerInfo, args: &[String]) -> Result<Vec<RespValue>, CommandError> {
    let _ = PsyncArguments::parse(args)?;

    Ok(vec![RespValue::SimpleString(format!(
        "FULLRESYNC {} {}",
        server.repl_id,
        server.repl_offset()
    ))])
}
