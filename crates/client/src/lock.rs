use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use tokio::sync::RwLock;

/// A named-lock registry with one reader-writer lock per branch: reads
/// against a branch share the read side, a transaction holds the write
/// side. Locks are lazily instantiated and never shrunk.
#[derive(Default)]
pub struct BranchLockMap {
    locks: Mutex<HashMap<String, Arc<RwLock<()>>>>,
}

impl BranchLockMap {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn lock_for(&self, branch: &str) -> Arc<RwLock<()>> {
        self.locks
            .lock()
            .expect("lock map poisoned")
            .entry(branch.to_string())
            .or_default()
            .clone()
    }
}
