use anyhow::{Context, Result};
use std::fs::{self, File};
use std::io::{ErrorKind, Write};
use std::path::{Path, PathBuf};
use uuid::Uuid;

/// Durable string entries, one file per key under a root directory.
///
/// Each `write` replaces its entry atomically (temp file + rename). Writes to
/// different keys are independent, so a crash can leave a partial set behind.
#[derive(Clone, Debug)]
pub struct KeyValueStore {
    root: PathBuf,
}

impl KeyValueStore {
    pub fn new(root: PathBuf) -> Result<Self> {
        fs::create_dir_all(&root)
            .with_context(|| format!("failed to create store directory {}", root.display()))?;
        Ok(Self { root })
    }

    pub fn in_memory() -> Self {
        let mut path = std::env::temp_dir();
        path.push(format!("rapport-{}", Uuid::new_v4()));
        fs::create_dir_all(&path).ok();
        Self { root: path }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn entry_path(&self, key: &str) -> PathBuf {
        self.root.join(key)
    }

    pub fn read(&self, key: &str) -> Result<Option<String>> {
        match fs::read_to_string(self.entry_path(key)) {
            Ok(value) => Ok(Some(value)),
            Err(err) if err.kind() == ErrorKind::NotFound => Ok(None),
            Err(err) => Err(err).with_context(|| format!("failed to read entry {key}")),
        }
    }

    pub fn write(&self, key: &str, value: &str) -> Result<()> {
        let path = self.entry_path(key);
        let staging = self.root.join(format!(".{key}.{}.tmp", Uuid::new_v4()));
        let staged = File::create(&staging)
            .and_then(|mut file| {
                file.write_all(value.as_bytes())?;
                file.sync_all()
            })
            .and_then(|()| fs::rename(&staging, &path));
        if let Err(err) = staged {
            fs::remove_file(&staging).ok();
            return Err(err).with_context(|| format!("failed to write entry {key}"));
        }
        Ok(())
    }

    pub fn remove(&self, key: &str) -> Result<()> {
        match fs::remove_file(self.entry_path(key)) {
            Ok(()) => Ok(()),
            Err(err) if err.kind() == ErrorKind::NotFound => Ok(()),
            Err(err) => Err(err).with_context(|| format!("failed to remove entry {key}")),
        }
    }
}
