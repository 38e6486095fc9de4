use anyhow::Result;
use std::path::{Path, PathBuf};
use tempfile::TempDir;

/// Scratch directory used as working directory and config home for one test.
pub struct TestEnvironment {
    temp_dir: TempDir,
}

impl TestEnvironment {
    pub fn new() -> Result<Self> {
        Ok(Self {
            temp_dir: tempfile::tempdir()?,
        })
    }

    pub fn path(&self) -> &Path {
        self.temp_dir.path()
    }

    /// Directory beatcut treats as the user config home
    pub fn config_home(&self) -> PathBuf {
        self.path().join("config")
    }

    pub fn file(&self, name: &str) -> PathBuf {
        self.path().join(name)
    }

    pub fn write(&self, name: &str, contents: &str) -> Result<PathBuf> {
        let path = self.file(name);
        std::fs::write(&path, contents)?;
        Ok(path)
    }
}
