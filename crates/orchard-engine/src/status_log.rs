use crate::error::Result;
use chrono::{DateTime, Utc};
use orchard_core::constants::suffixes;
use orchard_core::model::Guid;
use std::io::Write;
use std::path::{Path, PathBuf};

/// Append-only per-task log read by `orchard logs`.
#[derive(Debug, Clone)]
pub struct StatusLog {
    dir: PathBuf,
}

impl StatusLog {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    pub fn path(&self, guid: &Guid) -> PathBuf {
        self.dir.join(format!("{}{}", guid, suffixes::STATUS_LOG))
    }

    pub fn append(&self, guid: &Guid, at: DateTime<Utc>, message: &str) -> Result<()> {
        fs_err::create_dir_all(&self.dir)?;
        let mut file = fs_err::OpenOptions::new()
            .create(true)
            .append(true)
            .open(self.path(guid))?;
        writeln!(
            file,
            "[{}] {}",
            at.format("%Y-%m-%d %H:%M:%S%.3f"),
            message.trim_end()
        )?;
        Ok(())
    }

    pub fn read(&self, guid: &Guid) -> Result<Vec<String>> {
        let path = self.path(guid);
        if !path.exists() {
            return Ok(Vec::new());
        }
        Ok(fs_err::read_to_string(path)?
            .lines()
            .map(str::to_string)
            .collect())
    }

    pub fn remove(&self, guid: &Guid) -> Result<()> {
        let path = self.path(guid);
        if path.exists() {
            fs_err::remove_file(path)?;
        }
        Ok(())
    }
}
