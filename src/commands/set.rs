use std::time::Duration;

use crate::commands::CommandError;
use crate::key_value_store::{Keyspace, SetOptions};
use crate::resp::RespValue;

/// Parsed arguments for SET, covering both the plain form and the
/// `PX <milliseconds>` expiry form.
pub struct SetArguments {
    key: String,
    value: String,
    ttl: Option<Duration>,
}

impl SetArguments {
    pub fn parse(args: &[String], expect_px: bool) -> Result<Self, CommandError> {
        if expect_px {
            if args.len() != 4 {
                return Err(CommandError::WrongArity("set"));
            }
            if !args[2].eq_ignore_ascii_case("px") {
                return Err(CommandError::InvalidCommand);
            }

            let milliseconds = args[3]
                .parse::<u64>()
                .map_err(|_| CommandError::InvalidSetExpiration)?;

            return Ok(Self {
                key: args[0].clone(),
                value: args[1].clone(),
                ttl: Some(Duration::from_millis(milliseconds)),
            });
        }

        if args.len() != 2 {
            return Err(CommandError::WrongArity("set"));
        }

        Ok(Self {
            key: args[0].clone(),
            value: args[1].clone(),
            ttl: None,
        })
    }
}

pub async fn set(keyspace: &Keyspace, args: &[String]) -> Result<Vec<RespValue>, CommandError> {
    store(keyspace, SetArguments::parse(args, false)?).await
}

/// The synthesized `SET_PX` sub-command: same write path, with a TTL.
pub async fn set_px(keyspace: &Keyspace, args: &[String]) -> Result<Vec<RespValue>, CommandError> {
    store(keyspace, SetArguments::parse(args, true)?).await
}

async fn store(
    keyspace: &Keyspace,
    arguments: SetArguments,
) -> Result<Vec<RespValue>, CommandError> {
    keyspace
        .set(
            &arguments.key,
            arguments.value,
            SetOptions { ttl: arguments.ttl },
        )
        .await;

    Ok(vec![RespValue::SimpleString("OK".to_string())])
}

#[cfg(test)]
mod tests {
    use super::*;

    fn args(values: &[&str]) -> Vec<String> {
        values.iter().map(|s| s.to_string()).collect()
    }

    #[tokio::test]
    async fn test_set_plain() {
        let keyspace = Keyspace::new();

        let response = set(&keyspace, &args(&["k", "v"])).await.unwrap();
        assert_eq!(response, vec![RespValue::SimpleString("OK".to_string())]);

        let value = keyspace.get("k").await.unwrap();
        assert_eq!(value.data, "v");
        assert_eq!(value.expires_at, None);
    }

    #[tokio::test]
    async fn test_set_with_px() {
        let keyspace = Keyspace::new();

        let response = set_px(&keyspace, &args(&["k", "v", "px", "60000"]))
            .await
            .unwrap();
        assert_eq!(response, vec![RespValue::SimpleString("OK".to_string())]);

        let value = keyspace.get("k").await.unwrap();
        assert!(value.expires_at.is_some());
    }

    #[tokio::test]
    async fn test_set_argument_errors() {
        let keyspace = Keyspace::new();

        let test_cases = vec![
            (args(&["k"]), false, CommandError::WrongArity("set")),
            (args(&[]), false, CommandError::WrongArity("set")),
            (
                args(&["k", "v", "px"]),
                true,
                CommandError::WrongArity("set"),
            ),
            (
                args(&["k", "v", "ex", "100"]),
                true,
                CommandError::InvalidCommand,
            ),
            (
                args(&["k", "v", "px", "soon"]),
                true,
                CommandError::InvalidSetExpiration,
            ),
        ];

        for (arguments, px, expected) in test_cases {
            let result = if px {
                set_px(&keyspace, &arguments).await
            } else {
                set(&keyspace, &arguments).await
            };
            assert_eq!(result, Err(expected), "arguments {:?}", arguments);
        }
    }
}
