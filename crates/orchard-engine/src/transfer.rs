//! Data-store side of a task: access grants before the jobs run, input
//! discovery, and verification that the push job delivered every result.

use crate::error::{EngineError, Result};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use orchard_client::compose::matches_any;
use orchard_core::model::Task;
use orchard_core::workflow::InputKind;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet, HashSet};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StorageFile {
    pub name: String,
    pub path: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StorageStat {
    pub id: String,
    pub modified: DateTime<Utc>,
}

#[async_trait]
pub trait StorageClient: Send + Sync {
    async fn share(&self, paths: &[String], grantee: &str) -> Result<()>;

    async fn unshare(&self, paths: &[String], grantee: &str) -> Result<()>;

    async fn list_files(&self, path: &str) -> Result<Vec<StorageFile>>;

    async fn stat(&self, path: &str) -> Result<StorageStat>;
}

fn storage_error(path: &str, message: impl ToString) -> EngineError {
    EngineError::Storage {
        path: path.to_string(),
        message: message.to_string(),
    }
}

const GRANTS_FILE: &str = ".grants.json";

/// Storage rooted in a local directory: `/iplant/home/alice` lives at
/// `<root>/iplant/home/alice`. Grants are kept in a sidecar JSON file.
#[derive(Debug)]
pub struct FsStorage {
    root: PathBuf,
    lock: Mutex<()>,
}

impl FsStorage {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self {
            root: root.into(),
            lock: Mutex::new(()),
        }
    }

    pub fn resolve(&self, path: &str) -> PathBuf {
        self.root.join(path.trim_start_matches('/'))
    }

    fn grants_path(&self) -> PathBuf {
        self.root.join(GRANTS_FILE)
    }

    fn read_grants(&self) -> Result<BTreeMap<String, BTreeSet<String>>> {
        let path = self.grants_path();
        if !path.exists() {
            return Ok(BTreeMap::new());
        }
        Ok(serde_json::from_str(&fs_err::read_to_string(path)?)?)
    }

    fn write_grants(&self, grants: &BTreeMap<String, BTreeSet<String>>) -> Result<()> {
        fs_err::create_dir_all(&self.root)?;
        fs_err::write(self.grants_path(), serde_json::to_string_pretty(grants)?)?;
        Ok(())
    }

    /// Paths currently shared with `grantee`.
    pub fn grants_for(&self, grantee: &str) -> Result<Vec<String>> {
        let _guard = self.lock.lock().unwrap_or_else(|e| e.into_inner());
        Ok(self
            .read_grants()?
            .into_iter()
            .filter(|(_, who)| who.contains(grantee))
            .map(|(path, _)| path)
            .collect())
    }

    fn modify_grants(&self, apply: impl FnOnce(&mut BTreeMap<String, BTreeSet<String>>)) -> Result<()> {
        let _guard = self.lock.lock().unwrap_or_else(|e| e.into_inner());
        let mut grants = self.read_grants()?;
        apply(&mut grants);
        grants.retain(|_, who| !who.is_empty());
        self.write_grants(&grants)
    }
}

fn modified_time(path: &Path) -> Result<DateTime<Utc>> {
    let modified = fs_err::metadata(path)?.modified()?;
    Ok(DateTime::<Utc>::from(modified))
}

#[async_trait]
impl StorageClient for FsStorage {
    async fn share(&self, paths: &[String], grantee: &str) -> Result<()> {
        for path in paths {
            if !self.resolve(path).exists() {
                return Err(storage_error(path, "no such collection"));
            }
        }
        self.modify_grants(|grants| {
            for path in paths {
                grants
                    .entry(path.clone())
                    .or_default()
                    .insert(grantee.to_string());
            }
        })
    }

    async fn unshare(&self, paths: &[String], grantee: &str) -> Result<()> {
        self.modify_grants(|grants| {
            for path in paths {
                if let Some(who) = grants.get_mut(path) {
                    who.remove(grantee);
                }
            }
        })
    }

    async fn list_files(&self, path: &str) -> Result<Vec<StorageFile>> {
        let dir = self.resolve(path);
        if !dir.is_dir() {
            return Err(storage_error(path, "not a collection"));
        }
        let mut files = Vec::new();
        for entry in fs_err::read_dir(&dir)? {
            let entry = entry?;
            if !entry.file_type()?.is_file() {
                continue;
            }
            let name = entry.file_name().to_string_lossy().to_string();
            if name == GRANTS_FILE {
                continue;
            }
            files.push(StorageFile {
                path: format!("{}/{}", path.trim_end_matches('/'), name),
                name,
            });
        }
        files.sort_by(|a, b| a.name.cmp(&b.name));
        Ok(files)
    }

    async fn stat(&self, path: &str) -> Result<StorageStat> {
        let resolved = self.resolve(path);
        if !resolved.exists() {
            return Err(storage_error(path, "no such file or collection"));
        }
        Ok(StorageStat {
            id: resolved.to_string_lossy().to_string(),
            modified: modified_time(&resolved)?,
        })
    }
}

pub struct TransferCoordinator {
    storage: Arc<dyn StorageClient>,
    service_account: String,
    public_prefix: String,
}

impl TransferCoordinator {
    pub fn new(
        storage: Arc<dyn StorageClient>,
        service_account: impl Into<String>,
        public_prefix: impl Into<String>,
    ) -> Self {
        Self {
            storage,
            service_account: service_account.into(),
            public_prefix: public_prefix.into(),
        }
    }

    pub fn storage(&self) -> &dyn StorageClient {
        self.storage.as_ref()
    }

    pub fn needs_sharing(&self, task: &Task) -> bool {
        task.owner != self.service_account
    }

    /// Write access is requested on the output destination, and on the input
    /// path unless it is public or the same collection as the destination.
    pub fn share_paths(&self, task: &Task) -> Vec<String> {
        let mut paths = Vec::new();
        let to = task.workflow.output.to.as_deref();
        if let Some(to) = to {
            paths.push(to.to_string());
        }
        if let Some(input) = &task.workflow.input {
            let path = input.path.as_str();
            if !path.starts_with(&self.public_prefix) && Some(path) != to {
                paths.push(path.to_string());
            }
        }
        paths
    }

    /// Grants the service account access to the task's data. Returns the shared paths.
    pub async fn share(&self, task: &Task) -> Result<Vec<String>> {
        if !self.needs_sharing(task) {
            return Ok(Vec::new());
        }
        let paths = self.share_paths(task);
        if !paths.is_empty() {
            self.storage.share(&paths, &self.service_account).await?;
            tracing::info!("[{}] Shared {} with {}", task.guid, paths.join(", "), self.service_account);
        }
        Ok(paths)
    }

    pub async fn unshare(&self, task: &Task) -> Result<()> {
        if task.shared_paths.is_empty() {
            return Ok(());
        }
        self.storage
            .unshare(&task.shared_paths, &self.service_account)
            .await?;
        tracing::info!("[{}] Revoked access to {}", task.guid, task.shared_paths.join(", "));
        Ok(())
    }

    /// Full storage paths of the files the pull job must stage.
    pub async fn list_inputs(&self, task: &Task) -> Result<Vec<String>> {
        let Some(input) = &task.workflow.input else {
            return Ok(Vec::new());
        };
        match input.kind {
            InputKind::File => Ok(vec![input.path.clone()]),
            InputKind::Directory => Ok(self
                .storage
                .list_files(&input.path)
                .await?
                .into_iter()
                .map(|f| f.path)
                .collect()),
            InputKind::Files => {
                let patterns = input.effective_patterns();
                Ok(self
                    .storage
                    .list_files(&input.path)
                    .await?
                    .into_iter()
                    .filter(|f| patterns.is_empty() || matches_any(&f.name.to_lowercase(), &patterns))
                    .map(|f| f.path)
                    .collect())
            }
        }
    }

    /// Checks that every expected file arrived at `destination`. Returns the expected count.
    pub fn verify_push(
        &self,
        destination: &str,
        expected: &[String],
        listed: &[StorageFile],
    ) -> Result<usize> {
        let present: HashSet<&str> = listed.iter().map(|f| f.name.as_str()).collect();
        let found = expected
            .iter()
            .filter(|name| present.contains(base_name(name)))
            .count();
        if found < expected.len() {
            return Err(EngineError::TransferVerification(format!(
                "Transfer to {} incomplete: expected {} files but found {}",
                destination,
                expected.len(),
                found
            )));
        }
        Ok(expected.len())
    }
}

fn base_name(path: &str) -> &str {
    path.rsplit('/').next().unwrap_or(path)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn listing(names: &[&str]) -> Vec<StorageFile> {
        names
            .iter()
            .map(|n| StorageFile {
                name: n.to_string(),
                path: format!("/dest/{}", n),
            })
            .collect()
    }

    fn coordinator(root: &Path) -> TransferCoordinator {
        TransferCoordinator::new(Arc::new(FsStorage::new(root)), "orchard", "/iplant/home/shared")
    }

    #[test]
    fn test_verify_push_extra_files_are_fine() {
        let dir = tempfile::tempdir().unwrap();
        let expected = vec!["a".to_string(), "b".to_string()];
        let count = coordinator(dir.path())
            .verify_push("/dest", &expected, &listing(&["a", "b", "c"]))
            .unwrap();
        assert_eq!(count, 2);
    }

    #[test]
    fn test_verify_push_missing_file_fails() {
        let dir = tempfile::tempdir().unwrap();
        let expected = vec!["a".to_string(), "b".to_string()];
        let err = coordinator(dir.path())
            .verify_push("/dest", &expected, &listing(&["a"]))
            .unwrap_err();
        assert_eq!(
            err.to_string(),
            "Transfer to /dest incomplete: expected 2 files but found 1"
        );
    }

    #[tokio::test]
    async fn test_fs_storage_grants_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let storage = FsStorage::new(dir.path());
        fs_err::create_dir_all(storage.resolve("/iplant/home/alice/in")).unwrap();
        fs_err::write(storage.resolve("/iplant/home/alice/in/a.jpg"), "x").unwrap();

        let paths = vec!["/iplant/home/alice/in".to_string()];
        storage.share(&paths, "orchard").await.unwrap();
        assert_eq!(storage.grants_for("orchard").unwrap(), paths);
        storage.unshare(&paths, "orchard").await.unwrap();
        assert!(storage.grants_for("orchard").unwrap().is_empty());

        let files = storage.list_files("/iplant/home/alice/in").await.unwrap();
        assert_eq!(files[0].path, "/iplant/home/alice/in/a.jpg");
        assert!(storage.stat("/iplant/home/alice/in/a.jpg").await.is_ok());
        assert!(storage.share(&["/missing".to_string()], "orchard").await.is_err());
    }
}
