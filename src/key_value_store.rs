//! The concurrent keyspace.
//!
//! Keys are partitioned into two submaps, each behind its own
//! reader/writer lock: entries with an absolute expiry live in the
//! expirable submap, everything else in the persistent one. The split
//! keeps the TTL sweeper's scans off the lock that plain reads take.
//! A key is present in at most one submap at a time.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use jiff::Timestamp;
use tokio::sync::RwLock;
use tracing::debug;

/// The kind of value stored under a key.
///
/// Commands only ever create `String` entries (streams live in their own
/// store); the remaining kinds exist so snapshot contents and `TYPE`
/// output stay faithful.
#[derive(Debug, PartialEq, Eq, Clone, Copy)]
pub enum ValueKind {
    String,
    List,
    Set,
    ZSet,
    Hash,
    Stream,
}

impl ValueKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ValueKind::String => "string",
            ValueKind::List => "list",
            ValueKind::Set => "set",
            ValueKind::ZSet => "zset",
            ValueKind::Hash => "hash",
            ValueKind::Stream => "stream",
        }
    }
}

#[derive(Debug, PartialEq, Clone)]
pub struct StoredValue {
    pub data: String,
    pub kind: ValueKind,
    pub expires_at: Option<Timestamp>,
}

impl StoredValue {
    pub fn string(data: String, expires_at: Option<Timestamp>) -> Self {
        Self {
            data,
            kind: ValueKind::String,
            expires_at,
        }
    }

    fn is_expired(&self, now: Timestamp) -> bool {
        self.expires_at.is_some_and(|expires_at| now >= expires_at)
    }
}

#[derive(Debug, Default, Clone)]
pub struct SetOptions {
    pub ttl: Option<Duration>,
}

#[derive(Debug, Default)]
pub struct Keyspace {
    persistent: RwLock<HashMap<String, StoredValue>>,
    expirable: RwLock<HashMap<String, StoredValue>>,
}

impl Keyspace {
    pub fn new() -> Self {
        Self {
            persistent: RwLock::new(HashMap::new()),
            expirable: RwLock::new(HashMap::new()),
        }
    }

    /// Stores a string value, overwriting any previous entry and moving
    /// the key into the submap matching its expiry.
    pub async fn set(&self, key: &str, data: String, options: SetOptions) {
        let expires_at = options.ttl.map(|ttl| {
            Timestamp::now()
                .checked_add(ttl)
                .unwrap_or(Timestamp::MAX)
        });

        self.insert_loaded(key, StoredValue::string(data, expires_at))
            .await;
    }

    /// Inserts an already-built entry, routing it by expiry. Used by both
    /// `set` and the snapshot loader.
    pub async fn insert_loaded(&self, key: &str, value: StoredValue) {
        let has_expiry = value.expires_at.is_some();

        {
            let mut persistent = self.persistent.write().await;
            let mut expirable = self.expirable.write().await;

            if has_expiry {
                persistent.remove(key);
                expirable.insert(key.to_string(), value);
            } else {
                expirable.remove(key);
                persistent.insert(key.to_string(), value);
            }
        }
    }

    /// Fetches a live value.
    ///
    /// Expiry is checked lazily here: an entry whose deadline has passed
    /// is deleted and reported absent, whether or not the background
    /// sweeper ever ran.
    pub async fn get(&self, key: &str) -> Option<StoredValue> {
        {
            let persistent = self.persistent.read().await;
            if let Some(value) = persistent.get(key) {
                return Some(value.clone());
            }
        }

        let now = Timestamp::now();

        {
            let expirable = self.expirable.read().await;
            match expirable.get(key) {
                Some(value) if !value.is_expired(now) => return Some(value.clone()),
                Some(_) => (),
                None => return None,
            }
        }

        let mut expirable = self.expirable.write().await;
        if expirable.get(key).is_some_and(|v| v.is_expired(now)) {
            expirable.remove(key);
            debug!(key = %key, "expired key removed on read");
        }

        None
    }

    pub async fn remove(&self, key: &str) -> Option<StoredValue> {
        {
            let mut persistent = self.persistent.write().await;
            if let Some(value) = persistent.remove(key) {
                return Some(value);
            }
        }

        let mut expirable = self.expirable.write().await;
        expirable.remove(key)
    }

    /// All live keys from both submaps. Expired-but-unswept entries are
    /// filtered out, not deleted.
    pub async fn keys(&self) -> Vec<String> {
        let now = Timestamp::now();
        let mut keys = Vec::new();

        {
            let persistent = self.persistent.read().await;
            keys.extend(persistent.keys().cloned());
        }

        {
            let expirable = self.expirable.read().await;
            keys.extend(
                expirable
                    .iter()
                    .filter(|(_, value)| !value.is_expired(now))
                    .map(|(key, _)| key.clone()),
            );
        }

        keys
    }

    pub async fn kind_of(&self, key: &str) -> Option<ValueKind> {
        self.get(key).await.map(|value| value.kind)
    }

    /// Deletes every expirable entry whose deadline has passed. Returns
    /// the number of entries removed.
    pub async fn sweep_expired(&self) -> usize {
        let now = Timestamp::now();
        let mut expirable = self.expirable.write().await;
        let before = expirable.len();

        expirable.retain(|key, value| {
            let keep = !value.is_expired(now);
            if !keep {
                debug!(key = %key, "expired key removed by sweeper");
            }
            keep
        });

        before - expirable.len()
    }
}

/// Background TTL sweeper: scans the expirable submap once a minute.
/// Lazy expiry on `get` keeps reads correct even if this task stalls.
pub async fn run_ttl_sweeper(keyspace: Arc<Keyspace>) {
    let mut ticker = tokio::time::interval(Duration::from_secs(60));
    ticker.tick().await;

    loop {
        ticker.tick().await;
        let removed = keyspace.sweep_expired().await;
        if removed > 0 {
            debug!(removed, "ttl sweep completed");
        }
    }
}
