use crate::commands::CommandError;
use crate::key_value_store::Keyspace;
use crate::resp::RespValue;
use crate::streams::StreamStore;

/// Streams are stored apart from the main maps but still report as
/// `"stream"`; everything unknown is `"none"`.
pub async fn type_of(
    keyspace: &Keyspace,
    streams: &StreamStore,
    args: &[String],
) -> Result<Vec<RespValue>, CommandError> {
    if args.len() != 1 {
        return Err(CommandError::WrongArity("type"));
    }

    let kind = match keyspace.kind_of(&args[0]).await {
        Some(kind) => kind.as_str(),
        None if streams.contains(&args[0]).await => "stream",
        None => "none",
    };

    Ok(vec![RespValue::SimpleString(kind.to_string())])
}
