use crate::commands::CommandError;
use crate::resp::RespValue;

pub fn echo(args: &[String]) -> Result<Vec<RespValue>, CommandError> {
    if args.len() != 1 {
        return Err(CommandError::WrongArity("echo"));
    }

    Ok(vec![RespValue::BulkString(args[0].clone())])
}
