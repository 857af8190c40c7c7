use crate::commands::CommandError;
use crate::resp::RespValue;
use crate::server::ServerInfo;

/// INFO ignores its section argument: the replication section is the
/// only one produced, and it is small enough to always send.
pub fn info(
    server: &ServerInfo,
    connected_replicas: usize,
    _args: &[String],
) -> Result<Vec<RespValue>, CommandError> {
    let body = format!(
        "role:{}\nconnected_slaves:{}\nmaster_replid:{}\nmaster_repl_offset:{}",
        server.role.as_str(),
        connected_replicas,
        server.repl_id,
        server.repl_offset(),
    );

    Ok(vec![RespValue::BulkString(body)])
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Config;
    use crate::server::Role;

    #[test]
    fn test_info_master() {
        let server = ServerInfo::new(&Config {
            port: 6379,
            replica_of: None,
            dir: String::new(),
            dbfilename: String::new(),
        });

        let response = info(&server, 2, &[]).unwrap();
        let RespValue::BulkString(body) = &response[0] else {
            panic!("expected a bulk string response");
        };

        assert!(body.starts_with("role:master\n"));
        assert!(body.contains("connected_slaves:2\n"));
        assert!(body.contains(&format!("master_replid:{}\n", server.repl_id)));
        assert!(body.ends_with("master_repl_offset:0"));
    }

    #[test]
    fn test_info_replica_role() {
        let server = ServerInfo::new(&Config {
            port: 6380,
            replica_of: Some(("127.0.0.1".to_string(), 6379)),
            dir: String::new(),
            dbfilename: String::new(),
        });

        assert_eq!(server.role, Role::Replica {
            host: "127.0.0.1".to_string(),
            port: 6379,
        });

        let response = info(&server, 0, &["replication".to_string()]).unwrap();
        let RespValue::BulkString(body) = &response[0] else {
            panic!("expected a bulk string response");
        };
        assert!(body.starts_with("role:slave\n"));
    }
}
