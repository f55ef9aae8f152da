//! State shared between the command task and the stream acceptor: the bound
//! offer directory and the set of filenames this peer has offered.

use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::sync::RwLock;

#[derive(Debug, Default)]
pub struct SharedState {
    dir: RwLock<Option<PathBuf>>,
    offered: RwLock<HashSet<String>>,
}

impl SharedState {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set_dir(&self, dir: &Path) {
        *self.dir.write().expect("state poisoned") = Some(dir.to_path_buf());
    }

    pub fn dir(&self) -> Option<PathBuf> {
        self.dir.read().expect("state poisoned").clone()
    }

    pub fn add_offered<I>(&self, files: I)
    where
        I: IntoIterator<Item = String>,
    {
        self.offered.write().expect("state poisoned").extend(files);
    }

    pub fn is_offered(&self, filename: &str) -> bool {
        self.offered.read().expect("state poisoned").contains(filename)
    }

    pub fn clear_offered(&self) {
        self.offered.write().expect("state poisoned").clear();
    }
}
