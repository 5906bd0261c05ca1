//! Process-scoped build cache
//!
//! Holds the wrapper template, the translated C++ file and the uniquely
//! named module artifacts. The whole tree is removed when the cache drops.

use crate::error::{BuildError, BuildResult, BuildStage};
use std::fs;
use std::path::{Path, PathBuf};
use tracing::{info, warn};

/// Architecture file handed to the translator with `-a`
pub const WRAPPER_TEMPLATE: &str = include_str!("../resources/architecture/wrapper.cpp");

#[derive(Debug)]
pub struct CacheDir {
    root: PathBuf,
    wrapper: PathBuf,
}

impl CacheDir {
    /// Create `<user cache dir>/livedsp/<pid>`
    pub fn create() -> BuildResult<Self> {
        let base = dirs::cache_dir().unwrap_or_else(std::env::temp_dir);
        Self::create_in(&base.join("livedsp"))
    }

    /// Create a cache keyed by this process under `base`
    pub fn create_in(base: &Path) -> BuildResult<Self> {
        let root = base.join(std::process::id().to_string());
        info!("Creating the cache directory {}", root.display());
        fs::create_dir_all(&root).map_err(BuildError::io(BuildStage::CacheDir))?;

        let wrapper = root.join("wrapper.cpp");
        fs::write(&wrapper, WRAPPER_TEMPLATE).map_err(BuildError::io(BuildStage::CacheDir))?;

        Ok(Self { root, wrapper })
    }

    pub fn path(&self) -> &Path {
        &self.root
    }

    pub fn wrapper_file(&self) -> &Path {
        &self.wrapper
    }

    /// Translator output; overwritten by every build
    pub fn intermediate_file(&self) -> PathBuf {
        self.root.join("module.cpp")
    }

    /// Reserve a fresh `module.XXXXXX.so`
    ///
    /// The file is left on disk; whoever loads it becomes responsible for
    /// deleting it.
    pub fn new_artifact(&self) -> BuildResult<PathBuf> {
        let file = tempfile::Builder::new()
            .prefix("module.")
            .suffix(std::env::consts::DLL_SUFFIX)
            .tempfile_in(&self.root)
            .map_err(BuildError::io(BuildStage::TempFile))?;
        file.into_temp_path()
            .keep()
            .map_err(|e| BuildError::Io {
                stage: BuildStage::TempFile,
                source: e.error,
            })
    }
}

impl Drop for CacheDir {
    fn drop(&mut self) {
        info!("Deleting the cache directory {}", self.root.display());
        if let Err(e) = fs::remove_dir_all(&self.root) {
            warn!("Could not delete {}: {}", self.root.display(), e);
        }
    }
}
