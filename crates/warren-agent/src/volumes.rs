//! Local volume handling.
//!
//! The `local` driver backs a volume with a per-node directory. The first
//! mount reports node affinity to the control plane, which pins future
//! placements of services using the volume to this node.

use std::path::{Path, PathBuf};

use tracing::debug;
use warren_types::{NodeId, VolumeMount};

use crate::Result;
use crate::client::ManagerClient;

/// Ensures the backing directory for a local volume exists. Returns the
/// host path for the bind mount.
pub async fn ensure_local(volumes_dir: &Path, name: &str) -> Result<PathBuf> {
    let path = volumes_dir.join(name);
    tokio::fs::create_dir_all(&path).await?;
    Ok(path)
}

/// Prepares every mount of a container and reports first-mount affinity.
///
/// A bind conflict (already bound to another node) means the scheduler
/// placed against a stale view; the error propagates and the container
/// fails rather than silently writing to a second copy of the data.
pub async fn prepare_mounts(
    volumes_dir: &Path,
    client: &ManagerClient,
    node_id: &NodeId,
    mounts: &[VolumeMount],
) -> Result<Vec<(String, String, bool)>> {
    let mut prepared = Vec::with_capacity(mounts.len());
    for mount in mounts {
        let host = ensure_local(volumes_dir, &mount.volume_name).await?;
        client
            .bind_volume(&mount.volume_name, node_id.clone())
            .await?;
        debug!(volume = %mount.volume_name, node = %node_id, "volume bound");
        prepared.push((
            host.to_string_lossy().into_owned(),
            mount.container_path.clone(),
            mount.read_only,
        ));
    }
    Ok(prepared)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[tokio::test]
    async fn ensure_local_creates_and_reuses_the_directory() {
        let dir = TempDir::new().unwrap();
        let first = ensure_local(dir.path(), "data").await.unwrap();
        assert!(first.is_dir());

        // Existing content survives re-ensure.
        tokio::fs::write(first.join("keep"), b"x").await.unwrap();
        let second = ensure_local(dir.path(), "data").await.unwrap();
        assert_eq!(first, second);
        assert!(second.join("keep").exists());
    }
}
