use tracing::debug;

use crate::commands::CommandError;
use crate::resp::RespValue;

pub fn ping(args: &[String]) -> Result<Vec<RespValue>, CommandError> {
    if !args.is_empty() {
        debug!("PING does not expect any arguments, ignoring them");
    }

    Ok(vec![RespValue::SimpleString("PONG".to_string())])
}
