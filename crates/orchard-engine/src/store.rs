//! Task persistence. Every stage re-reads its task before acting and writes
//! back through [`TaskStore::update`], so the store is the single source of truth.

use crate::error::{EngineError, Result};
use orchard_core::model::{Guid, Task};
use std::collections::BTreeMap;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::Mutex;

pub trait TaskStore: Send + Sync {
    fn get(&self, guid: &Guid) -> Result<Option<Task>>;

    fn put(&self, task: &Task) -> Result<()>;

    /// Read-modify-write under the store's lock. The closure's error aborts the write.
    fn update(&self, guid: &Guid, apply: &mut dyn FnMut(&mut Task) -> Result<()>) -> Result<Task>;

    fn list(&self) -> Result<Vec<Task>>;

    fn remove(&self, guid: &Guid) -> Result<bool>;

    fn load(&self, guid: &Guid) -> Result<Task> {
        self.get(guid)?
            .ok_or_else(|| EngineError::NotFound(guid.clone()))
    }
}

#[derive(Debug, Default)]
pub struct MemoryTaskStore {
    tasks: Mutex<BTreeMap<Guid, Task>>,
}

impl MemoryTaskStore {
    pub fn new() -> Self {
        Self::default()
    }
}

impl TaskStore for MemoryTaskStore {
    fn get(&self, guid: &Guid) -> Result<Option<Task>> {
        let tasks = self.tasks.lock().unwrap_or_else(|e| e.into_inner());
        Ok(tasks.get(guid).cloned())
    }

    fn put(&self, task: &Task) -> Result<()> {
        let mut tasks = self.tasks.lock().unwrap_or_else(|e| e.into_inner());
        tasks.insert(task.guid.clone(), task.clone());
        Ok(())
    }

    fn update(&self, guid: &Guid, apply: &mut dyn FnMut(&mut Task) -> Result<()>) -> Result<Task> {
        let mut tasks = self.tasks.lock().unwrap_or_else(|e| e.into_inner());
        let current = tasks
            .get(guid)
            .ok_or_else(|| EngineError::NotFound(guid.clone()))?;
        let mut task = current.clone();
        apply(&mut task)?;
        tasks.insert(guid.clone(), task.clone());
        Ok(task)
    }

    fn list(&self) -> Result<Vec<Task>> {
        let tasks = self.tasks.lock().unwrap_or_else(|e| e.into_inner());
        Ok(tasks.values().cloned().collect())
    }

    fn remove(&self, guid: &Guid) -> Result<bool> {
        let mut tasks = self.tasks.lock().unwrap_or_else(|e| e.into_inner());
        Ok(tasks.remove(guid).is_some())
    }
}

/// All tasks in one JSON document, rewritten atomically on every change.
/// The file is re-read on each call so that a CLI process and a running
/// server observe each other's writes.
#[derive(Debug)]
pub struct JsonTaskStore {
    path: PathBuf,
    lock: Mutex<()>,
}

impl JsonTaskStore {
    pub fn open(path: impl Into<PathBuf>) -> Result<Self> {
        let path = path.into();
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                fs_err::create_dir_all(parent)?;
            }
        }
        Ok(Self {
            path,
            lock: Mutex::new(()),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn read_all(&self) -> Result<BTreeMap<Guid, Task>> {
        if !self.path.exists() {
            return Ok(BTreeMap::new());
        }
        let contents = fs_err::read_to_string(&self.path)?;
        if contents.trim().is_empty() {
            return Ok(BTreeMap::new());
        }
        let tasks: Vec<Task> = serde_json::from_str(&contents)?;
        Ok(tasks.into_iter().map(|t| (t.guid.clone(), t)).collect())
    }

    fn write_all(&self, tasks: &BTreeMap<Guid, Task>) -> Result<()> {
        let dir = self
            .path
            .parent()
            .filter(|p| !p.as_os_str().is_empty())
            .unwrap_or_else(|| Path::new("."));
        let list: Vec<&Task> = tasks.values().collect();
        let mut file = tempfile::NamedTempFile::new_in(dir)?;
        serde_json::to_writer_pretty(&mut file, &list)?;
        file.write_all(b"\n")?;
        file.persist(&self.path).map_err(|e| e.error)?;
        Ok(())
    }
}

impl TaskStore for JsonTaskStore {
    fn get(&self, guid: &Guid) -> Result<Option<Task>> {
        let _guard = self.lock.lock().unwrap_or_else(|e| e.into_inner());
        Ok(self.read_all()?.remove(guid))
    }

    fn put(&self, task: &Task) -> Result<()> {
        let _guard = self.lock.lock().unwrap_or_else(|e| e.into_inner());
        let mut tasks = self.read_all()?;
        tasks.insert(task.guid.clone(), task.clone());
        self.write_all(&tasks)
    }

    fn update(&self, guid: &Guid, apply: &mut dyn FnMut(&mut Task) -> Result<()>) -> Result<Task> {
        let _guard = self.lock.lock().unwrap_or_else(|e| e.into_inner());
        let mut tasks = self.read_all()?;
        let task = tasks
            .get_mut(guid)
            .ok_or_else(|| EngineError::NotFound(guid.clone()))?;
        let mut updated = task.clone();
        apply(&mut updated)?;
        *task = updated.clone();
        self.write_all(&tasks)?;
        Ok(updated)
    }

    fn list(&self) -> Result<Vec<Task>> {
        let _guard = self.lock.lock().unwrap_or_else(|e| e.into_inner());
        Ok(self.read_all()?.into_values().collect())
    }

    fn remove(&self, guid: &Guid) -> Result<bool> {
        let _guard = self.lock.lock().unwrap_or_else(|e| e.into_inner());
        let mut tasks = self.read_all()?;
        let removed = tasks.remove(guid).is_some();
        if removed {
            self.write_all(&tasks)?;
        }
        Ok(removed)
    }
}
