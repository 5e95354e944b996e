//! # MSI Resource List
//!
//! Double-buffered store for discovered identity projections.
//!
//! Discovery stages projections with [`MsiResourceList::add`] and makes them
//! visible atomically with [`MsiResourceList::commit`]; readers always get a
//! fully committed snapshot that stays valid across later commits. A failed
//! discovery never reaches `commit`, so the previous snapshot stays in force.

use std::sync::{Arc, Mutex};

use super::projection::MsiProjection;

#[derive(Default)]
struct Buffers {
    committed: Arc<Vec<MsiProjection>>,
    staging: Vec<MsiProjection>,
}

#[derive(Default)]
pub struct MsiResourceList {
    buffers: Mutex<Buffers>,
}

impl MsiResourceList {
    pub fn new() -> Self {
        Self::default()
    }

    /// Empty the staging buffer before a new discovery run
    pub fn clean(&self) {
        self.buffers
            .lock()
            .expect("msi list lock poisoned")
            .staging
            .clear();
    }

    /// Stage a projection; invisible to readers until `commit`
    pub fn add(&self, projection: MsiProjection) {
        self.buffers
            .lock()
            .expect("msi list lock poisoned")
            .staging
            .push(projection);
    }

    /// Atomically replace the committed snapshot with the staged projections
    pub fn commit(&self) {
        let mut buffers = self.buffers.lock().expect("msi list lock poisoned");
        buffers.committed = Arc::new(std::mem::take(&mut buffers.staging));
    }

    /// Snapshot of the committed projections; remains valid for the reader
    /// even if a new commit happens concurrently
    pub fn get_list(&self) -> Arc<Vec<MsiProjection>> {
        self.buffers
            .lock()
            .expect("msi list lock poisoned")
            .committed
            .clone()
    }
}
