use crate::commands::CommandError;
use crate::resp::RespValue;
use crate::server::ServerInfo;

/// `CONFIG GET` over the snapshot-location parameters. Unrecognized
/// parameter names simply contribute nothing to the reply.
pub fn config_get(server: &ServerInfo, args: &[String]) -> Result<Vec<RespValue>, CommandError> {
    // args still carries the routed "GET" sub-command in front.
    let parameters = &args[1..];

    if parameters.is_empty() {
        return Err(CommandError::WrongArity("config|get"));
    }

    let mut pairs = Vec::new();

    for parameter in parameters {
        match parameter.to_lowercase().as_str() {
            "dir" => {
                pairs.push(RespValue::BulkString("dir".to_string()));
                pairs.push(RespValue::BulkString(server.dir.clone()));
            }
            "dbfilename" => {
                pairs.push(RespValue::BulkString("dbfilename".to_string()));
                pairs.push(RespValue::BulkString(server.dbfilename.clone()));
            }
            _ => (),
        }
    }

    Ok(vec![RespValue::Array(pairs)])
}
