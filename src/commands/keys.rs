use globset::Glob;

use crate::commands::CommandError;
use crate::key_value_store::Keyspace;
use crate::resp::RespValue;
use crate::streams::StreamStore;

/// KEYS matches against live keyspace keys and stream names alike.
pub async fn keys(
    keyspace: &Keyspace,
    streams: &StreamStore,
    args: &[String],
) -> Result<Vec<RespValue>, CommandError> {
    if args.len() != 1 {
        return Err(CommandError::WrongArity("keys"));
    }

    let matcher = Glob::new(&args[0])
        .map_err(|e| CommandError::InvalidGlobPattern(e.to_string()))?
        .compile_matcher();

    let mut matched = Vec::new();

    for key in keyspace.keys().await {
        if matcher.is_match(&key) {
            matched.push(RespValue::BulkString(key));
        }
    }

    for name in streams.names().await {
        if matcher.is_match(&name) {
            matched.push(RespValue::BulkString(name));
        }
    }

    Ok(vec![RespValue::Array(matched)])
}
