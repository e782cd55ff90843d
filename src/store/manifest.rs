//! TOML description of a commit tree, used to seed the in-memory store from
//! the command line.
//!
//! ```toml
//! commit = "1"
//!
//! [[file]]
//! path = "src/test.c"
//! contents = "testy tests"
//!
//! [[symlink]]
//! path = "a"
//! target = "b"
//!
//! [[dir]]
//! path = "empty"
//! ```

use serde::Deserialize;
use std::path::Path;
use std::sync::Arc;

use crate::error::{GroveError, Result};
use crate::hash::Hash;
use crate::store::{MemoryBackingStore, TreeBuilder};

fn default_commit() -> String {
    "1".to_string()
}

#[derive(Debug, Clone, Deserialize)]
pub struct ManifestFile {
    pub path: String,
    #[serde(default)]
    pub contents: String,
    #[serde(default)]
    pub executable: bool,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ManifestSymlink {
    pub path: String,
    pub target: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ManifestDir {
    pub path: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct Manifest {
    /// Commit id, as a full or left-padded partial hex string.
    #[serde(default = "default_commit")]
    pub commit: String,
    #[serde(default, rename = "file")]
    pub files: Vec<ManifestFile>,
    #[serde(default, rename = "symlink")]
    pub symlinks: Vec<ManifestSymlink>,
    #[serde(default, rename = "dir")]
    pub dirs: Vec<ManifestDir>,
}

impl Manifest {
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path).map_err(|e| {
            GroveError::Config(format!("Failed to read manifest {}: {}", path.display(), e))
        })?;
        Self::parse(&content)
    }

    pub fn parse(content: &str) -> Result<Self> {
        toml::from_str(content)
            .map_err(|e| GroveError::Config(format!("Failed to parse manifest: {}", e)))
    }

    pub fn commit_hash(&self) -> Result<Hash> {
        Hash::from_partial_hex(&self.commit)
    }

    pub fn to_builder(&self) -> Result<TreeBuilder> {
        let mut builder = TreeBuilder::new();
        for dir in &self.dirs {
            builder.mkdir(&dir.path)?;
        }
        for file in &self.files {
            if file.executable {
                builder.set_executable(&file.path, file.contents.as_bytes())?;
            } else {
                builder.set_file(&file.path, file.contents.as_bytes())?;
            }
        }
        for link in &self.symlinks {
            builder.set_symlink(&link.path, &link.target)?;
        }
        Ok(builder)
    }

    /// Load the manifest's tree into `store` (fully ready) and register its
    /// commit. Returns the commit id.
    pub fn populate(&self, store: &Arc<MemoryBackingStore>) -> Result<Hash> {
        let commit = self.commit_hash()?;
        let mut builder = self.to_builder()?;
        builder.finalize(Arc::clone(store), true)?;
        builder.commit(commit, true)?;
        tracing::debug!(
            "loaded manifest commit {} ({} files, {} symlinks)",
            commit,
            self.files.len(),
            self.symlinks.len()
        );
        Ok(commit)
    }
}
