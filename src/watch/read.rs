//! Post-change file reading with empty-read retry.
//!
//! Editors commonly truncate a file before writing the new content; a read
//! racing that write observes a zero-byte snapshot. On empty content, stat
//! the file and poll its mtime, re-reading once a change is observed or the
//! attempts are exhausted.

use std::io;
use std::path::Path;
use std::time::Duration;

use crate::debug;

/// Read a just-changed file, retrying around editor truncate-then-write.
pub async fn read_modified_file(
    path: &Path,
    retries: u32,
    interval_ms: u64,
) -> io::Result<String> {
    let content = tokio::fs::read_to_string(path).await?;
    if !content.is_empty() {
        return Ok(content);
    }

    let initial_mtime = tokio::fs::metadata(path).await?.modified()?;
    debug!("watch"; "empty read for {}, polling mtime", path.display());

    for _ in 0..retries {
        tokio::time::sleep(Duration::from_millis(interval_ms)).await;
        let mtime = tokio::fs::metadata(path).await?.modified()?;
        if mtime != initial_mtime {
            break;
        }
    }

    tokio::fs::read_to_string(path).await
}
