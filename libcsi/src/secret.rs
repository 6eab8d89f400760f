//! Connection defaults loaded from named secrets.
//!
//! Secrets are best-effort: a missing secret yields `Ok(None)` and the
//! caller carries on with the volume context alone.

use std::collections::HashMap;
use std::io;
use std::path::PathBuf;

use async_trait::async_trait;
use tracing::debug;

use crate::error::CsiError;

/// Key/value lookup of named secrets.
#[async_trait]
pub trait SecretProvider: Send + Sync {
    /// Fetch the secret called `name`, or `None` if it does not exist.
    async fn get_secret(&self, name: &str) -> Result<Option<HashMap<String, String>>, CsiError>;
}

/// Secrets held in memory.
#[derive(Debug, Clone, Default)]
pub struct StaticSecrets {
    secrets: HashMap<String, HashMap<String, String>>,
}

impl StaticSecrets {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add (or replace) a secret.
    pub fn with_secret<K, V>(
        mut self,
        name: impl Into<String>,
        data: impl IntoIterator<Item = (K, V)>,
    ) -> Self
    where
        K: Into<String>,
        V: Into<String>,
    {
        let data = data
            .into_iter()
            .map(|(k, v)| (k.into(), v.into()))
            .collect();
        self.secrets.insert(name.into(), data);
        self
    }
}

#[async_trait]
impl SecretProvider for StaticSecrets {
    async fn get_secret(&self, name: &str) -> Result<Option<HashMap<String, String>>, CsiError> {
        Ok(self.secrets.get(name).cloned())
    }
}

/// Secrets projected into the filesystem as Kubernetes secret volumes.
///
/// Each secret is a directory `<root>/<name>/`; every regular file in it is
/// one key, with the file content as the value.  Hidden entries (the
/// `..data` / `..<timestamp>` bookkeeping of the kubelet) are skipped.
#[derive(Debug, Clone)]
pub struct DirSecretProvider {
    root: PathBuf,
}

impl DirSecretProvider {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }
}

#[async_trait]
impl SecretProvider for DirSecretProvider {
    async fn get_secret(&self, name: &str) -> Result<Option<HashMap<String, String>>, CsiError> {
        if name.is_empty() || name.contains('/') || name.starts_with('.') {
            return Err(CsiError::InvalidArgument(format!(
                "invalid secret name {name:?}"
            )));
        }

        let dir = self.root.join(name);
        let mut entries = match tokio::fs::read_dir(&dir).await {
            Ok(entries) => entries,
            Err(e) if e.kind() == io::ErrorKind::NotFound => {
                debug!(secret = name, dir = %dir.display(), "secret directory not found");
                return Ok(None);
            }
            Err(e) => {
                return Err(CsiError::Internal(format!(
                    "can't load secret {name} from {}: {e}",
                    dir.display()
                )));
            }
        };

        let mut data = HashMap::new();
        while let Some(entry) = entries.next_entry().await.map_err(CsiError::internal)? {
            let Some(key) = entry.file_name().to_str().map(str::to_owned) else {
                continue;
            };
            if key.starts_with('.') {
                continue;
            }
            // Projected keys are symlinks into `..data`; follow them.
            let path = entry.path();
            let is_file = tokio::fs::metadata(&path)
                .await
                .map(|m| m.is_file())
                .unwrap_or(false);
            if !is_file {
                continue;
            }
            let value = tokio::fs::read_to_string(&path).await.map_err(|e| {
                CsiError::Internal(format!("read secret key {}: {e}", path.display()))
            })?;
            data.insert(key, value);
        }

        Ok(Some(data))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn static_secret_lookup() {
        let secrets = StaticSecrets::new().with_secret("rclone-secret", [("remote", "s3")]);
        let found = secrets.get_secret("rclone-secret").await.unwrap().unwrap();
        assert_eq!(found.get("remote").map(String::as_str), Some("s3"));
        assert!(secrets.get_secret("other").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn dir_secret_reads_keys_and_skips_hidden_entries() {
        let tmp = tempfile::tempdir().unwrap();
        let secret_dir = tmp.path().join("rclone-secret");
        std::fs::create_dir_all(secret_dir.join("..data")).unwrap();
        std::fs::write(secret_dir.join("remote"), "s3").unwrap();
        std::fs::write(secret_dir.join("s3-provider"), "AWS").unwrap();
        std::fs::write(secret_dir.join("..data").join("ignored"), "x").unwrap();

        let provider = DirSecretProvider::new(tmp.path());
        let data = provider.get_secret("rclone-secret").await.unwrap().unwrap();
        assert_eq!(data.len(), 2);
        assert_eq!(data["remote"], "s3");
        assert_eq!(data["s3-provider"], "AWS");
    }

    #[tokio::test]
    async fn dir_secret_missing_is_none() {
        let tmp = tempfile::tempdir().unwrap();
        let provider = DirSecretProvider::new(tmp.path());
        assert!(provider.get_secret("absent").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn dir_secret_rejects_path_traversal() {
        let tmp = tempfile::tempdir().unwrap();
        let provider = DirSecretProvider::new(tmp.path());
        let err = provider.get_secret("../etc").await.unwrap_err();
        assert!(matches!(err, CsiError::InvalidArgument(_)));
    }
}
