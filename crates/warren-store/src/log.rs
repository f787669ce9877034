//! The durable command log.
//!
//! An append-only file of length-prefixed, checksummed records. The
//! replicator appends the canonical encoding of each accepted log entry and
//! calls [`CommandLog::sync`] before acknowledging; that fsync is the
//! cluster's durability point. Snapshots bound replay: after a snapshot at
//! op `N` the log rotates to a fresh segment and segments wholly below `N`
//! are deleted.
//!
//! # File layout
//!
//! ```text
//! {data_dir}/log/
//! ├── wal-00000000000000000001.log   <- records for ops >= 1 (pruned)
//! └── wal-00000000000000001025.log   <- active segment
//! ```
//!
//! # Record framing
//!
//! `u32` little-endian payload length, `u64` little-endian checksum (first
//! eight bytes of the payload's blake3 digest), payload bytes. A torn final
//! record (crash mid-append) is detected by length or checksum mismatch and
//! truncated away on recovery.

use std::fs::{self, File, OpenOptions};
use std::io::{Read, Write};
use std::path::{Path, PathBuf};

use tracing::{info, warn};

use crate::{Result, StoreError};

/// Subdirectory of the data dir that holds log segments.
pub const LOG_DIR: &str = "log";

const RECORD_HEADER: usize = 4 + 8;

fn segment_filename(base_op: u64) -> String {
    format!("wal-{base_op:020}.log")
}

fn checksum(payload: &[u8]) -> u64 {
    let digest = blake3::hash(payload);
    u64::from_le_bytes(digest.as_bytes()[..8].try_into().expect("8 bytes"))
}

/// Append-only, checksummed command log.
pub struct CommandLog {
    dir: PathBuf,
    active: File,
    /// First op number covered by the active segment.
    active_base: u64,
}

impl CommandLog {
    /// Opens (or creates) the log under `data_dir`, keeping the
    /// highest-numbered segment active for appends.
    pub fn open(data_dir: &Path) -> Result<Self> {
        let dir = data_dir.join(LOG_DIR);
        fs::create_dir_all(&dir)?;

        let mut bases = segment_bases(&dir)?;
        let active_base = bases.pop().unwrap_or(1);
        let path = dir.join(segment_filename(active_base));
        let active = OpenOptions::new().create(true).append(true).open(&path)?;

        Ok(Self {
            dir,
            active,
            active_base,
        })
    }

    /// Appends one record. Not durable until [`CommandLog::sync`].
    pub fn append(&mut self, payload: &[u8]) -> Result<()> {
        let len = u32::try_from(payload.len())
            .map_err(|_| StoreError::Corrupt("log record exceeds u32 length".into()))?;
        let mut frame = Vec::with_capacity(RECORD_HEADER + payload.len());
        frame.extend_from_slice(&len.to_le_bytes());
        frame.extend_from_slice(&checksum(payload).to_le_bytes());
        frame.extend_from_slice(payload);
        self.active.write_all(&frame)?;
        Ok(())
    }

    /// Fsyncs the active segment. Committed writes are durable after this.
    pub fn sync(&mut self) -> Result<()> {
        self.active.sync_data()?;
        Ok(())
    }

    /// Reads every intact record across all segments, oldest first.
    ///
    /// A torn tail in the final segment is truncated away; corruption
    /// anywhere else is fatal.
    pub fn replay(&self) -> Result<Vec<Vec<u8>>> {
        let bases = segment_bases(&self.dir)?;
        let mut records = Vec::new();
        let last = bases.last().copied();
        for base in bases {
            let path = self.dir.join(segment_filename(base));
            let is_active = Some(base) == last;
            read_segment(&path, is_active, &mut records)?;
        }
        Ok(records)
    }

    /// Starts a fresh segment for ops at `base_op` and deletes segments
    /// that only contain ops below the snapshot boundary.
    ///
    /// Called after a snapshot at `base_op - 1` has been durably written.
    pub fn rotate(&mut self, base_op: u64) -> Result<()> {
        let path = self.dir.join(segment_filename(base_op));
        let file = OpenOptions::new().create(true).append(true).open(&path)?;
        File::open(&self.dir)?.sync_all()?;

        let old_bases: Vec<u64> = segment_bases(&self.dir)?
            .into_iter()
            .filter(|&b| b < self.active_base.max(1))
            .collect();

        self.active = file;
        let prior_base = self.active_base;
        self.active_base = base_op;

        // Segments strictly older than the one we just left are fully
        // covered by the snapshot; the segment we just left is kept for one
        // rotation as a safety margin.
        for base in old_bases {
            let old = self.dir.join(segment_filename(base));
            if let Err(err) = fs::remove_file(&old) {
                warn!(path = %old.display(), %err, "failed to prune log segment");
            }
        }

        info!(prior_base, base_op, "rotated command log");
        Ok(())
    }
}

fn segment_bases(dir: &Path) -> Result<Vec<u64>> {
    let mut bases = Vec::new();
    for entry in fs::read_dir(dir)? {
        let entry = entry?;
        let name = entry.file_name();
        let Some(name) = name.to_str() else { continue };
        if let Some(stripped) = name.strip_prefix("wal-").and_then(|n| n.strip_suffix(".log")) {
            match stripped.parse::<u64>() {
                Ok(base) => bases.push(base),
                Err(_) => warn!(name, "ignoring unrecognized file in log dir"),
            }
        }
    }
    bases.sort_unstable();
    Ok(bases)
}

fn read_segment(path: &Path, tolerate_torn_tail: bool, out: &mut Vec<Vec<u8>>) -> Result<()> {
    let mut bytes = Vec::new();
    File::open(path)?.read_to_end(&mut bytes)?;

    let mut cursor = 0usize;
    while cursor < bytes.len() {
        let torn = |what: &str| {
            if tolerate_torn_tail {
                warn!(path = %path.display(), what, "truncating torn log tail");
                Ok(())
            } else {
                Err(StoreError::Corrupt(format!(
                    "log segment {} has corrupt record ({what})",
                    path.display()
                )))
            }
        };

        if bytes.len() - cursor < RECORD_HEADER {
            return torn("short header");
        }
        let len = u32::from_le_bytes(bytes[cursor..cursor + 4].try_into().expect("4 bytes"))
            as usize;
        let stored_sum =
            u64::from_le_bytes(bytes[cursor + 4..cursor + 12].try_into().expect("8 bytes"));
        let payload_start = cursor + RECORD_HEADER;
        if bytes.len() - payload_start < len {
            return torn("short payload");
        }
        let payload = &bytes[payload_start..payload_start + len];
        if checksum(payload) != stored_sum {
            return torn("checksum mismatch");
        }
        out.push(payload.to_vec());
        cursor = payload_start + len;
    }
    Ok(())
}
