use std::path::Path;

use tracing::{debug, info};

use crate::key_value_store::Keyspace;
use crate::rdb::parser::{parse, RdbError};

/// Loads the snapshot at `<dir>/<dbfilename>` into the keyspace.
///
/// An empty directory or file name means persistence is unconfigured; a
/// missing file is a fresh start. Both return `Ok(0)`. Parse failures
/// propagate so the caller can log them and continue with an empty
/// keyspace.
pub async fn load_keyspace(
    dir: &str,
    dbfilename: &str,
    keyspace: &Keyspace,
) -> Result<usize, RdbError> {
    if dir.is_empty() || dbfilename.is_empty() {
        debug!("no snapshot location configured, skipping load");
        return Ok(0);
    }

    let path = Path::new(dir).join(dbfilename);

    if !path.exists() {
        info!(path = %path.display(), "no snapshot file found, starting fresh");
        return Ok(0);
    }

    let bytes = tokio::fs::read(&path).await?;
    let file = parse(&bytes)?;

    let mut loaded = 0;

    for database in file.databases {
        debug!(index = database.index, entries = database.entries.len(), "loading database");

        for (key, value) in database.entries {
            keyspace.insert_loaded(&key, value).await;
            loaded += 1;
        }
    }

    info!(path = %path.display(), keys = loaded, "loaded snapshot");
    Ok(loaded)
}
