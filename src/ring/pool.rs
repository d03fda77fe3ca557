use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use parking_lot::Mutex;
use tracing::debug;

use crate::Ring;

/// Constructor used by [`RingPool`] to build a ring for a path it has not
/// seen yet.
pub type NewRingFn = Arc<dyn Fn(&str) -> Arc<dyn Ring> + Send + Sync>;

/// Process-wide cache of rings keyed by path.
///
/// Every caller asking for the same path gets the same ring instance, so
/// watchers started through the pool are shared the way the ring shares
/// them.
pub struct RingPool {
    inner: Mutex<PoolInner>,
}

struct PoolInner {
    rings: HashMap<String, Arc<dyn Ring>>,
    new_ring: NewRingFn,
}

impl RingPool {
    pub fn new<F>(new_ring: F) -> Self
    where
        F: Fn(&str) -> Arc<dyn Ring> + Send + Sync + 'static,
    {
        Self {
            inner: Mutex::new(PoolInner {
                rings: HashMap::new(),
                new_ring: Arc::new(new_ring),
            }),
        }
    }

    /// Ring at `path`, created on first use.
    pub fn get(
        &self,
        path: &str,
    ) -> Arc<dyn Ring> {
        let mut inner = self.inner.lock();
        if let Some(ring) = inner.rings.get(path) {
            return ring.clone();
        }

        let ring = (inner.new_ring)(path);
        inner.rings.insert(path.to_string(), ring.clone());
        debug!(%path, "ring created");
        ring
    }

    /// Forgets the ring at `path`. Holders of the ring keep using it; the
    /// next `get` builds a new one.
    pub fn del(
        &self,
        path: &str,
    ) {
        if self.inner.lock().rings.remove(path).is_some() {
            debug!(%path, "ring dropped from pool");
        }
    }

    /// Replaces the constructor and empties the cache, so every later `get`
    /// builds its ring with `new_ring`. Rings handed out earlier stay usable.
    pub fn set_new_func<F>(
        &self,
        new_ring: F,
    ) where
        F: Fn(&str) -> Arc<dyn Ring> + Send + Sync + 'static,
    {
        let mut inner = self.inner.lock();
        inner.new_ring = Arc::new(new_ring);
        inner.rings.clear();
    }

    pub fn len(&self) -> usize {
        self.inner.lock().rings.len()
    }

    pub fn is_empty(&self) -> bool {
        self.inner.lock().rings.is_empty()
    }
}

impl fmt::Debug for RingPool {
    fn fmt(
        &self,
        f: &mut fmt::Formatter<'_>,
    ) -> fmt::Result {
        let inner = self.inner.lock();
        let mut paths: Vec<&String> = inner.rings.keys().collect();
        paths.sort();
        f.debug_struct("RingPool").field("rings", &paths).finish()
    }
}
