use crate::commands::CommandError;
use crate::resp::RespValue;
use crate::streams::{IdSpec, StreamError, StreamStore};

/// Parsed arguments for XADD: the stream key, the id specification, and
/// the field/value pairs in the order they were given.
pub struct XaddArguments {
    key: String,
    id_spec: IdSpec,
    fields: Vec<(String, String)>,
}

impl XaddArguments {
    /// Requires at least one field/value pair, with fields and values
    /// properly matched.
    pub fn parse(args: &[String]) -> Result<Self, CommandError> {
        if args.len() < 4 || args[2..].len() % 2 != 0 {
            return Err(CommandError::WrongArity("xadd"));
        }

        Ok(Self {
            key: args[0].clone(),
            id_spec: IdSpec::parse(&args[1]),
            fields: args[2..]
                .chunks(2)
                .map(|pair| (pair[0].clone(), pair[1].clone()))
                .collect(),
        })
    }
}

pub async fn xadd(streams: &StreamStore, args: &[String]) -> Result<Vec<RespValue>, CommandError> {
    let arguments = XaddArguments::parse(args)?;

    let persisted_id = streams
        .append(&arguments.key, &arguments.id_spec, arguments.fields)
        .await
        .map_err(|e: StreamError| CommandError::StreamId(e.to_string()))?;

    Ok(vec![RespValue::BulkString(persisted_id)])
}
