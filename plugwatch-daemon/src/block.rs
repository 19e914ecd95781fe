//! File-based auto-connect block
//!
//! Flashing tools create a marker file while they own the device; the
//! daemon treats its presence as "auto-connect should be blocked".

use std::path::PathBuf;

#[derive(Debug, Clone, Default)]
pub struct BlockFile {
    path: Option<PathBuf>,
}

impl BlockFile {
    pub fn new(path: Option<PathBuf>) -> Self {
        Self { path }
    }

    /// True while the configured marker file exists
    pub fn should_block(&self) -> bool {
        self.path.as_deref().is_some_and(|p| p.exists())
    }
}
