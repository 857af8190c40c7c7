use crate::commands::CommandError;
use crate::key_value_store::{Keyspace, ValueKind};
use crate::resp::RespValue;

pub async fn get(keyspace: &Keyspace, args: &[String]) -> Result<Vec<RespValue>, CommandError> {
    if args.len() != 1 {
        return Err(CommandError::WrongArity("get"));
    }

    let response = match keyspace.get(&args[0]).await {
        Some(value) if value.kind == ValueKind::String => RespValue::BulkString(value.data),
        _ => RespValue::NullBulkString,
    };

    Ok(vec![response])
}
