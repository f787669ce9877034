//! Secret materialization.
//!
//! Ciphertext comes from the control plane; plaintext exists only here,
//! as mode-0400 files under the (tmpfs-backed) secrets directory, one
//! subdirectory per container:
//!
//! ```text
//! {secrets_dir}/{container_id}/{secret_name}   <- mode 0400
//! ```
//!
//! The whole subdirectory is removed on container shutdown. Plaintext
//! never goes back over a channel, a socket, or into a log.

use std::path::{Path, PathBuf};

use tracing::debug;
use warren_crypto::ClusterKey;
use warren_types::ContainerId;

use crate::Result;

/// Decrypts one secret and writes it for a container. Returns the host
/// path for the bind mount.
pub async fn materialize(
    secrets_dir: &Path,
    key: &ClusterKey,
    container_id: &ContainerId,
    name: &str,
    ciphertext: &[u8],
) -> Result<PathBuf> {
    let dir = secrets_dir.join(container_id.as_str());
    tokio::fs::create_dir_all(&dir).await?;

    let plaintext = key.unseal(ciphertext)?;
    let path = dir.join(name);
    tokio::fs::write(&path, &plaintext).await?;

    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        tokio::fs::set_permissions(&path, std::fs::Permissions::from_mode(0o400)).await?;
    }

    debug!(container = %container_id, secret = name, "materialized secret");
    Ok(path)
}

/// Removes every materialized secret of a container.
pub async fn cleanup(secrets_dir: &Path, container_id: &ContainerId) -> Result<()> {
    let dir = secrets_dir.join(container_id.as_str());
    match tokio::fs::remove_dir_all(&dir).await {
        Ok(()) => Ok(()),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
        Err(e) => Err(e.into()),
    }
}

/// The in-container mount point for a named secret.
pub fn mount_path(name: &str) -> String {
    format!("/run/secrets/{name}")
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[tokio::test]
    async fn materialize_writes_restricted_plaintext() {
        let dir = TempDir::new().unwrap();
        let key = ClusterKey::generate();
        let sealed = key.seal(b"p@ssw0rd");
        let container = ContainerId::new("c1");

        let path = materialize(dir.path(), &key, &container, "db-password", &sealed)
            .await
            .unwrap();
        assert_eq!(tokio::fs::read(&path).await.unwrap(), b"p@ssw0rd");

        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            let mode = tokio::fs::metadata(&path).await.unwrap().permissions().mode();
            assert_eq!(mode & 0o777, 0o400);
        }

        cleanup(dir.path(), &container).await.unwrap();
        assert!(!path.exists());
    }

    #[tokio::test]
    async fn wrong_key_materializes_nothing() {
        let dir = TempDir::new().unwrap();
        let sealed = ClusterKey::generate().seal(b"secret");
        let result = materialize(
            dir.path(),
            &ClusterKey::generate(),
            &ContainerId::new("c1"),
            "s",
            &sealed,
        )
        .await;
        assert!(result.is_err());
        // No partial plaintext left behind.
        assert!(!dir.path().join("c1").join("s").exists());
    }

    #[test]
    fn mount_path_is_the_conventional_location() {
        assert_eq!(mount_path("api-token"), "/run/secrets/api-token");
    }
}
