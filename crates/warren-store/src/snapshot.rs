//! Full-state snapshots.
//!
//! A snapshot is the canonical encoding of a [`StoreState`] written
//! atomically (write tmp, fsync, rename, fsync dir) together with a JSON
//! manifest recording the applied op number and a blake3 digest. Snapshots
//! bound log replay: recovery restores the newest valid snapshot, then
//! replays log entries past its `applied_op`.
//!
//! # File layout
//!
//! ```text
//! {data_dir}/snapshots/
//! ├── snapshot-00000000000000001024.bin
//! ├── snapshot-00000000000000002048.bin   <- newest wins
//! └── manifest.json
//! ```

use std::fs::{self, File, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use crate::{Result, StoreError, StoreState};

/// Subdirectory of the data dir that holds snapshots.
pub const SNAPSHOT_DIR: &str = "snapshots";

/// Number of snapshots retained; older ones are pruned after a new write.
const RETAINED_SNAPSHOTS: usize = 2;

/// Manifest describing the newest snapshot.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SnapshotManifest {
    /// Highest op number applied into the snapshotted state.
    pub applied_op: u64,
    /// Hex blake3 digest of the snapshot bytes.
    pub digest: String,
    /// Snapshot filename, relative to the snapshot dir.
    pub file: String,
}

fn snapshot_filename(applied_op: u64) -> String {
    format!("snapshot-{applied_op:020}.bin")
}

fn manifest_path(dir: &Path) -> PathBuf {
    dir.join("manifest.json")
}

/// Durably writes `state` as the newest snapshot and updates the manifest.
///
/// Returns the manifest that now describes the snapshot. Pruning of old
/// snapshots is best-effort; failures there only warn.
pub fn write_snapshot(data_dir: &Path, state: &StoreState) -> Result<SnapshotManifest> {
    let dir = data_dir.join(SNAPSHOT_DIR);
    fs::create_dir_all(&dir)?;

    let bytes = state.encode()?;
    let digest = blake3::hash(&bytes);
    let filename = snapshot_filename(state.applied_op());

    // Atomic write: tmp + fsync + rename + fsync dir.
    let tmp_path = dir.join(format!("{filename}.tmp"));
    let final_path = dir.join(&filename);
    {
        let mut tmp = OpenOptions::new()
            .write(true)
            .create(true)
            .truncate(true)
            .open(&tmp_path)?;
        tmp.write_all(&bytes)?;
        tmp.sync_all()?;
    }
    fs::rename(&tmp_path, &final_path)?;
    File::open(&dir)?.sync_all()?;

    let manifest = SnapshotManifest {
        applied_op: state.applied_op(),
        digest: digest.to_hex().to_string(),
        file: filename,
    };
    let manifest_json = serde_json::to_string_pretty(&manifest)
        .map_err(|e| StoreError::Corrupt(format!("manifest encode: {e}")))?;
    let tmp_manifest = dir.join("manifest.json.tmp");
    {
        let mut tmp = OpenOptions::new()
            .write(true)
            .create(true)
            .truncate(true)
            .open(&tmp_manifest)?;
        tmp.write_all(manifest_json.as_bytes())?;
        tmp.sync_all()?;
    }
    fs::rename(&tmp_manifest, manifest_path(&dir))?;
    File::open(&dir)?.sync_all()?;

    info!(
        applied_op = state.applied_op(),
        bytes = bytes.len(),
        "wrote snapshot"
    );

    prune_old_snapshots(&dir);
    Ok(manifest)
}

/// Loads the newest valid snapshot, if any.
///
/// A snapshot whose digest does not match its manifest is treated as
/// absent (the caller falls back to full log replay); this is the crash
/// window between writing the snapshot file and its manifest.
pub fn load_latest_snapshot(data_dir: &Path) -> Result<Option<(StoreState, SnapshotManifest)>> {
    let dir = data_dir.join(SNAPSHOT_DIR);
    let manifest_file = manifest_path(&dir);
    if !manifest_file.exists() {
        return Ok(None);
    }

    let manifest: SnapshotManifest = serde_json::from_str(&fs::read_to_string(&manifest_file)?)
        .map_err(|e| StoreError::Corrupt(format!("manifest decode: {e}")))?;

    let snapshot_path = dir.join(&manifest.file);
    let bytes = match fs::read(&snapshot_path) {
        Ok(bytes) => bytes,
        Err(err) => {
            warn!(file = %manifest.file, %err, "manifest points at missing snapshot");
            return Ok(None);
        }
    };

    let digest = blake3::hash(&bytes).to_hex().to_string();
    if digest != manifest.digest {
        warn!(file = %manifest.file, "snapshot digest mismatch, ignoring snapshot");
        return Ok(None);
    }

    let state = StoreState::decode(&bytes)?;
    if state.applied_op() != manifest.applied_op {
        return Err(StoreError::Corrupt(format!(
            "snapshot applied_op {} disagrees with manifest {}",
            state.applied_op(),
            manifest.applied_op
        )));
    }

    Ok(Some((state, manifest)))
}

fn prune_old_snapshots(dir: &Path) {
    let Ok(entries) = fs::read_dir(dir) else {
        return;
    };
    let mut snapshots: Vec<PathBuf> = entries
        .filter_map(|e| e.ok().map(|e| e.path()))
        .filter(|p| {
            p.file_name()
                .and_then(|n| n.to_str())
                .is_some_and(|n| n.starts_with("snapshot-") && n.ends_with(".bin"))
        })
        .collect();
    snapshots.sort();
    if snapshots.len() <= RETAINED_SNAPSHOTS {
        return;
    }
    let remove_until = snapshots.len() - RETAINED_SNAPSHOTS;
    for old in &snapshots[..remove_until] {
        if let Err(err) = fs::remove_file(old) {
            warn!(path = %old.display(), %err, "failed to prune old snapshot");
        }
    }
}
