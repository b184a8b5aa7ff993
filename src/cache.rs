use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use parking_lot::RwLock;

use crate::algo::GraphView;

/// Caches the adjacency view the algorithms run on.
///
/// Every committed mutation bumps the generation. A view loaded while a write
/// was in flight carries the older generation and is never stored.
#[derive(Default)]
pub struct ViewCache {
    generation: AtomicU64,
    inner: RwLock<Option<(u64, Arc<GraphView>)>>,
}

impl ViewCache {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn generation(&self) -> u64 {
        self.generation.load(Ordering::Acquire)
    }

    pub fn get(&self) -> Option<Arc<GraphView>> {
        let current = self.generation();
        match self.inner.read().as_ref() {
            Some((generation, view)) if *generation == current => Some(Arc::clone(view)),
            _ => None,
        }
    }

    /// Stores `view` if no mutation happened since `generation` was read.
    pub fn insert(&self, generation: u64, view: Arc<GraphView>) {
        let mut slot = self.inner.write();
        if generation == self.generation() {
            *slot = Some((generation, view));
        }
    }

    pub fn invalidate(&self) {
        self.generation.fetch_add(1, Ordering::AcqRel);
        self.inner.write().take();
    }
}
