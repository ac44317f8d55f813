//! Content registry: a single process-wide map from digest to resource id,
//! guarding one-writer-wins registration during concurrent ingest.

use crate::digest::Digest;
use std::collections::HashMap;
use std::sync::Mutex;

pub type ResourceId = u64;

pub struct ContentRegistry {
    inner: Mutex<HashMap<Digest, ResourceId>>,
}

impl ContentRegistry {
    /// Pre-seeds the empty-file digest at id 0, per the inlined-empty
    /// invariant.
    pub fn new() -> Self {
        let mut map = HashMap::new();
        map.insert(Digest::empty(), 0);
        Self {
            inner: Mutex::new(map),
        }
    }

    /// Atomically look up or assign an id for `digest`. Returns
    /// `(was_new, id)`.
    pub fn register(&self, digest: Digest) -> (bool, ResourceId) {
        let mut map = self.inner.lock().expect("content registry mutex poisoned");
        if let Some(&id) = map.get(&digest) {
            return (false, id);
        }
        let id = map.len() as ResourceId;
        map.insert(digest, id);
        (true, id)
    }

    pub fn len(&self) -> usize {
        self.inner.lock().expect("content registry mutex poisoned").len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl Default for ContentRegistry {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_digest_preseeded_at_zero() {
        let reg = ContentRegistry::new();
        let (is_new, id) = reg.register(Digest::empty());
        assert!(!is_new);
        assert_eq!(id, 0);
    }

    #[test]
    fn register_is_one_writer_wins() {
        let reg = ContentRegistry::new();
        let d = Digest::of(b"payload");
        let (is_new1, id1) = reg.register(d);
        let (is_new2, id2) = reg.register(d);
        assert!(is_new1);
        assert!(!is_new2);
        assert_eq!(id1, id2);
    }

    #[test]
    fn concurrent_register_assigns_single_id() {
        use std::sync::Arc;
        use std::thread;

        let reg = Arc::new(ContentRegistry::new());
        let d = Digest::of(b"shared blob");
        let mut handles = Vec::new();
        for _ in 0..16 {
            let reg = Arc::clone(&reg);
            handles.push(thread::spawn(move || reg.register(d)));
        }
        let results: Vec<_> = handles.into_iter().map(|h| h.join().unwrap()).collect();
        let ids: std::collections::HashSet<_> = results.iter().map(|(_, id)| *id).collect();
        assert_eq!(ids.len(), 1);
        assert_eq!(results.iter().filter(|(is_new, _)| *is_new).count(), 1);
    }
}
