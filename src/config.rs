//! Command-line configuration.
//!
//! Flag parsing is deliberately small: `--port`, `--replicaof`, `--dir`
//! and `--dbfilename` are the whole surface. Presence of `--replicaof`
//! switches the server into the replica role.

use regex::Regex;
use thiserror::Error;

#[derive(Error, Debug, PartialEq, Clone)]
pub enum CliError {
    #[error("Invalid command line flag")]
    InvalidCommandLineFlag,
    #[error("Invalid port flag value")]
    InvalidPortFlagValue,
    #[error("Invalid master address")]
    InvalidMasterAddress,
    #[error("Invalid master port")]
    InvalidMasterPort,
}

/// Parsed server configuration.
///
/// An empty `dir` or `dbfilename` means no snapshot load is attempted.
#[derive(Debug, PartialEq, Clone)]
pub struct Config {
    pub port: u16,
    pub replica_of: Option<(String, u16)>,
    pub dir: String,
    pub dbfilename: String,
}

impl Config {
    /// Parses command-line arguments (the first element is the binary
    /// name and is skipped).
    ///
    /// # Supported flags
    ///
    /// * `--port <p>`: listening port (default `6379`)
    /// * `--replicaof "<host> <port>"`: replicate from the given master
    /// * `--dir <path>`: directory holding the RDB snapshot
    /// * `--dbfilename <name>`: snapshot file name
    pub fn parse<I: IntoIterator<Item = String>>(args: I) -> Result<Self, CliError> {
        let mut iter = args.into_iter().skip(1);
        let mut port: Option<u16> = None;
        let mut replica_of: Option<(String, u16)> = None;
        let mut dir: Option<String> = None;
        let mut dbfilename: Option<String> = None;

        while let Some(arg) = iter.next() {
            match arg.as_str() {
                "--port" => {
                    let Some(value) = iter.next() else {
                        return Err(CliError::InvalidCommandLineFlag);
                    };
                    port = Some(validate_port(&value, CliError::InvalidPortFlagValue)?);
                }
                "--replicaof" => {
                    let Some(value) = iter.next() else {
                        return Err(CliError::InvalidCommandLineFlag);
                    };
                    replica_of = Some(validate_master_address(&value)?);
                }
                "--dir" => {
                    let Some(value) = iter.next() else {
                        return Err(CliError::InvalidCommandLineFlag);
                    };
                    dir = Some(value);
                }
                "--dbfilename" => {
                    let Some(value) = iter.next() else {
                        return Err(CliError::InvalidCommandLineFlag);
                    };
                    dbfilename = Some(value);
                }
                _ => return Err(CliError::InvalidCommandLineFlag),
            }
        }

        Ok(Config {
            port: port.unwrap_or(6379),
            replica_of,
            dir: dir.unwrap_or_default(),
            dbfilename: dbfilename.unwrap_or_default(),
        })
    }

    /// `<dir>/<dbfilename>` is only meaningful when both pieces are set.
    pub fn has_rdb_location(&self) -> bool {
        !self.dir.is_empty() && !self.dbfilename.is_empty()
    }
}

fn validate_port(port: &str, error: CliError) -> Result<u16, CliError> {
    let port_number = port.parse::<u32>().map_err(|_| error.clone())?;

    if !(1..=65535).contains(&port_number) {
        return Err(error);
    }

    Ok(port_number as u16)
}

/// Validates a `"<host> <port>"` master address.
///
/// The host may be a dotted IPv4 address (each octet checked) or a
/// hostname; anything else is rejected.
fn validate_master_address(master_address: &str) -> Result<(String, u16), CliError> {
    let ipv4_regex = Regex::new(r"^(\d{1,3})\.(\d{1,3})\.(\d{1,3})\.(\d{1,3})$").unwrap();
    let hostname_regex = Regex::new(r"^[a-zA-Z0-9\-\.]+$").unwrap();

    let parts = master_address.split_whitespace().collect::<Vec<&str>>();

    if parts.len() != 2 {
        return Err(CliError::InvalidMasterAddress);
    }

    let host = parts[0];

    let valid_host = if let Some(caps) = ipv4_regex.captures(host) {
        caps.iter().skip(1).all(|octet| {
            octet
                .map(|m| m.as_str().parse::<u16>().map(|v| v <= 255).unwrap_or(false))
                .unwrap_or(false)
        })
    } else {
        hostname_regex.is_match(host)
    };

    if !valid_host {
        return Err(CliError::InvalidMasterAddress);
    }

    let port = validate_port(parts[1], CliError::InvalidMasterPort)?;

    Ok((host.to_string(), port))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn args(rest: &[&str]) -> Vec<String> {
        let mut all = vec!["oxidis".to_string()];
        all.extend(rest.iter().map(|s| s.to_string()));
        all
    }

    #[test]
    fn test_defaults() {
        let config = Config::parse(args(&[])).unwrap();
        assert_eq!(config.port, 6379);
        assert_eq!(config.replica_of, None);
        assert_eq!(config.dir, "");
        assert_eq!(config.dbfilename, "");
        assert!(!config.has_rdb_location());
    }

    #[test]
    fn test_parse_success_cases() {
        let test_cases = vec![
            (
                args(&["--port", "6677"]),
                Config {
                    port: 6677,
                    replica_of: None,
                    dir: String::new(),
                    dbfilename: String::new(),
                },
            ),
            (
                args(&["--replicaof", "127.0.0.1 6380"]),
                Config {
                    port: 6379,
                    replica_of: Some(("127.0.0.1".to_string(), 6380)),
                    dir: String::new(),
                    dbfilename: String::new(),
                },
            ),
            (
                args(&["--port", "7000", "--replicaof", "localhost 6381"]),
                Config {
                    port: 7000,
                    replica_of: Some(("localhost".to_string(), 6381)),
                    dir: String::new(),
                    dbfilename: String::new(),
                },
            ),
            (
                args(&["--dir", "/tmp/rdb", "--dbfilename", "dump.rdb"]),
                Config {
                    port: 6379,
                    replica_of: None,
                    dir: "/tmp/rdb".to_string(),
                    dbfilename: "dump.rdb".to_string(),
                },
            ),
        ];

        for (input, expected) in test_cases {
            let config = Config::parse(input.clone()).unwrap();
            assert_eq!(config, expected, "parsing {:?}", input);
        }
    }

    #[test]
    fn test_parse_error_cases() {
        let test_cases = vec![
            (args(&["--port"]), CliError::InvalidCommandLineFlag),
            (
                args(&["--port", "invalid"]),
                CliError::InvalidPortFlagValue,
            ),
            (args(&["--port", "0"]), CliError::InvalidPortFlagValue),
            (args(&["--port", "70000"]), CliError::InvalidPortFlagValue),
            (args(&["--bogus"]), CliError::InvalidCommandLineFlag),
            (args(&["--replicaof"]), CliError::InvalidCommandLineFlag),
            (
                args(&["--replicaof", "127.0.0.1"]),
                CliError::InvalidMasterAddress,
            ),
            (
                args(&["--replicaof", "256.0.0.1 6379"]),
                CliError::InvalidMasterAddress,
            ),
            (
                args(&["--replicaof", "my_host! 6379"]),
                CliError::InvalidMasterAddress,
            ),
            (
                args(&["--replicaof", "127.0.0.1 invalid"]),
                CliError::InvalidMasterPort,
            ),
            (
                args(&["--replicaof", "127.0.0.1 70000"]),
                CliError::InvalidMasterPort,
            ),
            (args(&["--dir"]), CliError::InvalidCommandLineFlag),
        ];

        for (input, expected) in test_cases {
            let result = Config::parse(input.clone());
            assert_eq!(result, Err(expected), "parsing {:?}", input);
        }
    }

    #[test]
    fn test_validate_port_range() {
        let test_cases = [
            ("6379", Ok(6379u16), "standard port"),
            ("1", Ok(1), "minimum valid port"),
            ("65535", Ok(65535), "maximum valid port"),
            ("0", Err(CliError::InvalidPortFlagValue), "zero port"),
            ("65536", Err(CliError::InvalidPortFlagValue), "port too high"),
            ("-1", Err(CliError::InvalidPortFlagValue), "negative port"),
            ("", Err(CliError::InvalidPortFlagValue), "empty string"),
            ("80.5", Err(CliError::InvalidPortFlagValue), "decimal number"),
        ];

        for (input, expected, description) in test_cases {
            assert_eq!(
                validate_port(input, CliError::InvalidPortFlagValue),
                expected,
                "failed for {}: {}",
                description,
                input
            );
        }
    }
}
