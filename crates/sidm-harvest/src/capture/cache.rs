//! Debug cache of raw captured payloads.
//!
//! One file per (geography, screen[, province], classification). A repeat
//! capture of the same key overwrites the previous file.

use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use crate::types::{Classification, Screen};

/// Where the current captures belong.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CacheScope {
    /// Community code.
    pub geography: String,
    pub screen: Screen,
    pub province: Option<String>,
}

/// Filesystem cache of raw payloads.
#[derive(Debug, Clone)]
pub struct DebugCache {
    dir: PathBuf,
}

impl DebugCache {
    /// Create the cache directory if needed.
    pub fn new(dir: impl Into<PathBuf>) -> io::Result<Self> {
        let dir = dir.into();
        fs::create_dir_all(&dir)?;
        Ok(Self { dir })
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    pub fn path_for(&self, scope: &CacheScope, classification: Classification) -> PathBuf {
        let filename = match &scope.province {
            Some(province) => format!(
                "{}-{}-{}-{}.json",
                scope.geography,
                scope.screen.slug(),
                province,
                classification.tag()
            ),
            None => format!(
                "{}-{}-{}.json",
                scope.geography,
                scope.screen.slug(),
                classification.tag()
            ),
        };
        self.dir.join(filename)
    }

    /// Write (or overwrite) the payload for this key.
    pub fn write(
        &self,
        scope: &CacheScope,
        classification: Classification,
        payload: &str,
    ) -> io::Result<PathBuf> {
        let path = self.path_for(scope, classification);
        fs::write(&path, payload)?;
        Ok(path)
    }
}
