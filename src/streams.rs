//! Append-only streams with monotonically generated record ids.
//!
//! Streams live outside the main keyspace, one ordered map per stream
//! name. Record ids are `<epoch_ms>-<seq>` pairs; for canonical ids the
//! map's lexicographic order is chronological order. Id assignment runs
//! under the per-stream lock so concurrent XADDs can never interleave
//! into a non-monotonic sequence.

use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;

use jiff::Timestamp;
use regex::Regex;
use thiserror::Error;
use tokio::sync::{Mutex, RwLock};
use tracing::debug;

#[derive(Error, Debug, PartialEq)]
pub enum StreamError {
    #[error("The ID specified in XADD must be greater than 0-0")]
    IdIsZeroZero,
    #[error("The ID specified in XADD is equal or smaller than the target stream top item")]
    IdNotGreaterThanTop,
}

/// A record id: epoch milliseconds plus a per-millisecond sequence.
/// Derived ordering is (epoch, seq) tuple order.
#[derive(Debug, PartialEq, Eq, PartialOrd, Ord, Clone, Copy, Default)]
pub struct RecordId {
    pub epoch_ms: u64,
    pub seq: u64,
}

impl fmt::Display for RecordId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}-{}", self.epoch_ms, self.seq)
    }
}

/// Classification of the id argument given to XADD.
#[derive(Debug, PartialEq, Clone)]
pub enum IdSpec {
    /// `*`: epoch from the clock, sequence derived from the last id.
    New,
    /// `<ms>-*`: fixed epoch, sequence derived from the last id.
    Incomplete(u64),
    /// `<ms>-<seq>`: fully specified, validated against the last id.
    Complete(RecordId),
    /// Anything else is persisted verbatim.
    Custom(String),
}

impl IdSpec {
    pub fn parse(id: &str) -> Self {
        if id == "*" {
            return IdSpec::New;
        }

        let incomplete_regex = Regex::new(r"^(\d+)-\*$").unwrap();
        if let Some(caps) = incomplete_regex.captures(id) {
            if let Ok(epoch_ms) = caps[1].parse::<u64>() {
                return IdSpec::Incomplete(epoch_ms);
            }
        }

        let complete_regex = Regex::new(r"^(\d+)-(\d+)$").unwrap();
        if let Some(caps) = complete_regex.captures(id) {
            if let (Ok(epoch_ms), Ok(seq)) = (caps[1].parse::<u64>(), caps[2].parse::<u64>()) {
                return IdSpec::Complete(RecordId { epoch_ms, seq });
            }
        }

        IdSpec::Custom(id.to_string())
    }
}

/// A single stream: records in id order plus the last canonical id
/// handed out.
#[derive(Debug, Default)]
pub struct Stream {
    entries: BTreeMap<String, Vec<(String, String)>>,
    last_id: RecordId,
}

impl Stream {
    /// Resolves the id an append should persist under, enforcing strict
    /// monotonicity for canonical ids. Does not mutate on error.
    fn next_id(&mut self, spec: &IdSpec) -> Result<String, StreamError> {
        match spec {
            IdSpec::New => {
                let epoch_ms = Timestamp::now().as_millisecond().max(0) as u64;
                let seq = if epoch_ms == self.last_id.epoch_ms {
                    self.last_id.seq + 1
                } else {
                    0
                };

                self.last_id = RecordId { epoch_ms, seq };
                Ok(self.last_id.to_string())
            }
            IdSpec::Incomplete(epoch_ms) => {
                let epoch_ms = *epoch_ms;
                let seq = if epoch_ms == self.last_id.epoch_ms {
                    self.last_id.seq + 1
                } else if epoch_ms > self.last_id.epoch_ms {
                    0
                } else {
                    return Err(StreamError::IdNotGreaterThanTop);
                };

                self.last_id = RecordId { epoch_ms, seq };
                Ok(self.last_id.to_string())
            }
            IdSpec::Complete(id) => {
                if id.epoch_ms == 0 && id.seq == 0 {
                    return Err(StreamError::IdIsZeroZero);
                }
                if *id <= self.last_id {
                    return Err(StreamError::IdNotGreaterThanTop);
                }

                self.last_id = *id;
                Ok(id.to_string())
            }
            IdSpec::Custom(id) => Ok(id.clone()),
        }
    }

    pub fn last_id(&self) -> RecordId {
        self.last_id
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn ids(&self) -> Vec<String> {
        self.entries.keys().cloned().collect()
    }

    pub fn entry(&self, id: &str) -> Option<&Vec<(String, String)>> {
        self.entries.get(id)
    }
}

/// All streams, by name. Each stream sits behind its own mutex, which
/// doubles as the per-stream id lock.
#[derive(Debug, Default)]
pub struct StreamStore {
    streams: RwLock<BTreeMap<String, Arc<Mutex<Stream>>>>,
}

impl StreamStore {
    pub fn new() -> Self {
        Self {
            streams: RwLock::new(BTreeMap::new()),
        }
    }

    /// Appends a record, creating the stream on first use. Returns the
    /// persisted id.
    pub async fn append(
        &self,
        name: &str,
        id_spec: &IdSpec,
        fields: Vec<(String, String)>,
    ) -> Result<String, StreamError> {
        let stream = self.get_or_create(name).await;
        let mut stream_guard = stream.lock().await;

        let persisted_id = stream_guard.next_id(id_spec)?;
        stream_guard.entries.insert(persisted_id.clone(), fields);

        debug!(stream = name, id = %persisted_id, "appended stream record");
        Ok(persisted_id)
    }

    pub async fn contains(&self, name: &str) -> bool {
        self.streams.read().await.contains_key(name)
    }

    pub async fn names(&self) -> Vec<String> {
        self.streams.read().await.keys().cloned().collect()
    }

    pub async fn get(&self, name: &str) -> Option<Arc<Mutex<Stream>>> {
        self.streams.read().await.get(name).map(Arc::clone)
    }

    async fn get_or_create(&self, name: &str) -> Arc<Mutex<Stream>> {
        {
            let streams = self.streams.read().await;
            if let Some(stream) = streams.get(name) {
                return Arc::clone(stream);
            }
        }

        let mut streams = self.streams.write().await;
        Arc::clone(
            streams
                .entry(name.to_string())
                .or_insert_with(|| Arc::new(Mutex::new(Stream::default()))),
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_id_spec_parse() {
        let test_cases = vec![
            ("*", IdSpec::New),
            ("5-*", IdSpec::Incomplete(5)),
            (
                "1526919030474-*",
                IdSpec::Incomplete(1526919030474),
            ),
            (
                "1-1",
                IdSpec::Complete(RecordId {
                    epoch_ms: 1,
                    seq: 1,
                }),
            ),
            (
                "0-0",
                IdSpec::Complete(RecordId {
                    epoch_ms: 0,
                    seq: 0,
                }),
            ),
            ("abc", IdSpec::Custom("abc".to_string())),
            ("1-2-3", IdSpec::Custom("1-2-3".to_string())),
            ("-1", IdSpec::Custom("-1".to_string())),
            ("1-", IdSpec::Custom("1-".to_string())),
            ("*-*", IdSpec::Custom("*-*".to_string())),
        ];

        for (input, expected) in test_cases {
            assert_eq!(IdSpec::parse(input), expected, "parsing id {:?}", input);
        }
    }

    #[test]
    fn test_next_id_complete() {
        let test_cases = vec![
            (RecordId::default(), "1-1", Ok("1-1".to_string())),
            (RecordId::default(), "0-1", Ok("0-1".to_string())),
            (RecordId::default(), "0-0", Err(StreamError::IdIsZeroZero)),
            (
                RecordId {
                    epoch_ms: 1,
                    seq: 1,
                },
                "1-1",
                Err(StreamError::IdNotGreaterThanTop),
            ),
            (
                RecordId {
                    epoch_ms: 1,
                    seq: 1,
                },
                "1-0",
                Err(StreamError::IdNotGreaterThanTop),
            ),
            (
                RecordId {
                    epoch_ms: 1,
                    seq: 1,
                },
                "0-9",
                Err(StreamError::IdNotGreaterThanTop),
            ),
            (
                RecordId {
                    epoch_ms: 1,
                    seq: 1,
                },
                "1-2",
                Ok("1-2".to_string()),
            ),
            // A higher epoch resets the sequence: 2-0 follows 1-5.
            (
                RecordId {
                    epoch_ms: 1,
                    seq: 5,
                },
                "2-0",
                Ok("2-0".to_string()),
            ),
        ];

        for (last_id, id, expected) in test_cases {
            let mut stream = Stream {
                entries: BTreeMap::new(),
                last_id,
            };
            let result = stream.next_id(&IdSpec::parse(id));
            assert_eq!(
                result, expected,
                "next_id for {:?} with last_id {:?}",
                id, last_id
            );

            // Rejections must leave the stream untouched.
            if expected.is_err() {
                assert_eq!(stream.last_id(), last_id);
            }
        }
    }

    #[test]
    fn test_next_id_incomplete() {
        let test_cases = vec![
            (RecordId::default(), 0, Ok("0-1".to_string())),
            (RecordId::default(), 5, Ok("5-0".to_string())),
            (
                RecordId {
                    epoch_ms: 5,
                    seq: 2,
                },
                5,
                Ok("5-3".to_string()),
            ),
            (
                RecordId {
                    epoch_ms: 5,
                    seq: 2,
                },
                6,
                Ok("6-0".to_string()),
            ),
            (
                RecordId {
                    epoch_ms: 5,
                    seq: 2,
                },
                4,
                Err(StreamError::IdNotGreaterThanTop),
            ),
        ];

        for (last_id, epoch_ms, expected) in test_cases {
            let mut stream = Stream {
                entries: BTreeMap::new(),
                last_id,
            };
            let result = stream.next_id(&IdSpec::Incomplete(epoch_ms));
            assert_eq!(
                result, expected,
                "next_id for {}-* with last_id {:?}",
                epoch_ms, last_id
            );
        }
    }

    #[test]
    fn test_next_id_new_advances() {
        let mut stream = Stream::default();

        let first = stream.next_id(&IdSpec::New).unwrap();
        let second = stream.next_id(&IdSpec::New).unwrap();

        let parse = |id: &str| {
            let (epoch, seq) = id.split_once('-').unwrap();
            (epoch.parse::<u64>().unwrap(), seq.parse::<u64>().unwrap())
        };

        assert!(parse(&second) > parse(&first), "{} !> {}", second, first);
    }

    #[tokio::test]
    async fn test_append_persists_in_order() {
        let store = StreamStore::new();

        let first = store
            .append(
                "sensor",
                &IdSpec::parse("1-1"),
                vec![("temperature".to_string(), "37".to_string())],
            )
            .await
            .unwrap();
        assert_eq!(first, "1-1");

        let second = store
            .append(
                "sensor",
                &IdSpec::parse("1-*"),
                vec![("temperature".to_string(), "38".to_string())],
            )
            .await
            .unwrap();
        assert_eq!(second, "1-2");

        let duplicate = store
            .append(
                "sensor",
                &IdSpec::parse("1-1"),
                vec![("temperature".to_string(), "39".to_string())],
            )
            .await;
        assert_eq!(duplicate, Err(StreamError::IdNotGreaterThanTop));

        let stream = store.get("sensor").await.unwrap();
        let stream_guard = stream.lock().await;
        assert_eq!(stream_guard.ids(), vec!["1-1".to_string(), "1-2".to_string()]);
        assert_eq!(
            stream_guard.entry("1-2"),
            Some(&vec![("temperature".to_string(), "38".to_string())])
        );
    }

    #[tokio::test]
    async fn test_append_error_messages_are_exact() {
        let store = StreamStore::new();

        let zero = store
            .append("s", &IdSpec::parse("0-0"), vec![("f".to_string(), "v".to_string())])
            .await
            .unwrap_err();
        assert_eq!(
            zero.to_string(),
            "The ID specified in XADD must be greater than 0-0"
        );

        store
            .append("s", &IdSpec::parse("1-1"), vec![("f".to_string(), "v".to_string())])
            .await
            .unwrap();
        let stale = store
            .append("s", &IdSpec::parse("1-1"), vec![("f".to_string(), "v".to_string())])
            .await
            .unwrap_err();
        assert_eq!(
            stale.to_string(),
            "The ID specified in XADD is equal or smaller than the target stream top item"
        );

        // The failed appends must not have persisted anything.
        let stream = store.get("s").await.unwrap();
        assert_eq!(stream.lock().await.len(), 1);
    }

    #[tokio::test]
    async fn test_custom_ids_are_persisted_verbatim() {
        let store = StreamStore::new();

        let id = store
            .append(
                "s",
                &IdSpec::parse("not-numeric"),
                vec![("f".to_string(), "v".to_string())],
            )
            .await
            .unwrap();
        assert_eq!(id, "not-numeric");

        let stream = store.get("s").await.unwrap();
        let stream_guard = stream.lock().await;
        assert_eq!(stream_guard.last_id(), RecordId::default());
        assert!(stream_guard.entry("not-numeric").is_some());
    }

    #[tokio::test]
    async fn test_names() {
        let store = StreamStore::new();
        store
            .append("b", &IdSpec::parse("1-1"), vec![("f".to_string(), "v".to_string())])
            .await
            .unwrap();
        store
            .append("a", &IdSpec::parse("1-1"), vec![("f".to_string(), "v".to_string())])
            .await
            .unwrap();

        assert_eq!(store.names().await, vec!["a".to_string(), "b".to_string()]);
        assert!(store.contains("a").await);
        assert!(!store.contains("c").await);
    }
}
