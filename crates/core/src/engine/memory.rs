//! The bundled in-memory engine.
//!
//! Transactions work on a full snapshot of the engine state: `begin` clones
//! the current tree, reads and writes go against the clone, and `commit`
//! publishes it back. Writer exclusion is an owned mutex guard held for the
//! lifetime of the writable transaction, so a second writer blocks in
//! `begin(true)` until the first commits or rolls back. Read-only
//! transactions snapshot freely and never block.

use std::collections::BTreeMap;
use std::ops::Bound;
use std::sync::Arc;

use parking_lot::lock_api::ArcMutexGuard;
use parking_lot::{Mutex, RawMutex, RwLock};

use super::{Engine, EngineError, EngineTx, KvCursor, Store};

type StoreData = BTreeMap<Vec<u8>, Vec<u8>>;
type EngineData = BTreeMap<String, StoreData>;

#[derive(Default)]
pub struct MemoryEngine {
    data: Arc<RwLock<EngineData>>,
    writer: Arc<Mutex<()>>,
}

impl MemoryEngine {
    pub fn new() -> Self {
        Self::default()
    }
}

impl Engine for MemoryEngine {
    fn begin(&self, writable: bool) -> Result<Box<dyn EngineTx>, EngineError> {
        let guard = writable.then(|| self.writer.lock_arc());
        let snapshot = self.data.read().clone();
        Ok(Box::new(MemoryTx {
            shared: Arc::clone(&self.data),
            state: Arc::new(Mutex::new(snapshot)),
            writable,
            _writer: guard,
        }))
    }
}

struct MemoryTx {
    shared: Arc<RwLock<EngineData>>,
    state: Arc<Mutex<EngineData>>,
    writable: bool,
    _writer: Option<ArcMutexGuard<RawMutex, ()>>,
}

impl EngineTx for MemoryTx {
    fn store(&self, name: &str) -> Result<Box<dyn Store + '_>, EngineError> {
        self.state.lock().entry(name.to_owned()).or_default();
        Ok(Box::new(MemoryStore {
            state: Arc::clone(&self.state),
            name: name.to_owned(),
            writable: self.writable,
        }))
    }

    fn drop_store(&self, name: &str) -> Result<(), EngineError> {
        if !self.writable {
            return Err(EngineError::ReadOnly);
        }
        match self.state.lock().remove(name) {
            Some(_) => Ok(()),
            None => Err(EngineError::StoreNotFound(name.to_owned())),
        }
    }

    fn store_exists(&self, name: &str) -> Result<bool, EngineError> {
        Ok(self.state.lock().contains_key(name))
    }

    fn commit(self: Box<Self>) -> Result<(), EngineError> {
        if self.writable {
            *self.shared.write() = std::mem::take(&mut *self.state.lock());
        }
        Ok(())
    }

    fn rollback(self: Box<Self>) -> Result<(), EngineError> {
        Ok(())
    }
}

struct MemoryStore {
    state: Arc<Mutex<EngineData>>,
    name: String,
    writable: bool,
}

impl MemoryStore {
    fn with_store<T>(
        &self,
        f: impl FnOnce(&mut StoreData) -> T,
    ) -> Result<T, EngineError> {
        let mut state = self.state.lock();
        match state.get_mut(&self.name) {
            Some(store) => Ok(f(store)),
            None => Err(EngineError::StoreNotFound(self.name.clone())),
        }
    }
}

impl Store for MemoryStore {
    fn put(&self, key: &[u8], value: &[u8]) -> Result<(), EngineError> {
        if !self.writable {
            return Err(EngineError::ReadOnly);
        }
        self.with_store(|store| {
            store.insert(key.to_vec(), value.to_vec());
        })
    }

    fn get(&self, key: &[u8]) -> Result<Option<Vec<u8>>, EngineError> {
        self.with_store(|store| store.get(key).cloned())
    }

    fn delete(&self, key: &[u8]) -> Result<bool, EngineError> {
        if !self.writable {
            return Err(EngineError::ReadOnly);
        }
        self.with_store(|store| store.remove(key).is_some())
    }

    fn ascend_ge(&self, pivot: &[u8]) -> KvCursor {
        Box::new(MemoryCursor {
            state: Arc::clone(&self.state),
            name: self.name.clone(),
            bound: Bound::Included(pivot.to_vec()),
            forward: true,
        })
    }

    fn descend_le(&self, pivot: &[u8]) -> KvCursor {
        let bound = if pivot.is_empty() {
            Bound::Unbounded
        } else {
            Bound::Included(pivot.to_vec())
        };
        Box::new(MemoryCursor {
            state: Arc::clone(&self.state),
            name: self.name.clone(),
            bound,
            forward: false,
        })
    }
}

/// A cursor that re-seeks from its last position on every pull. It never
/// borrows the tree, so keys may be inserted or deleted mid-iteration
/// without invalidating it.
struct MemoryCursor {
    state: Arc<Mutex<EngineData>>,
    name: String,
    bound: Bound<Vec<u8>>,
    forward: bool,
}

impl Iterator for MemoryCursor {
    type Item = Result<(Vec<u8>, Vec<u8>), EngineError>;

    fn next(&mut self) -> Option<Self::Item> {
        let state = self.state.lock();
        let store = state.get(&self.name)?;
        let bound = as_slice_bound(&self.bound);
        let entry = if self.forward {
            store.range::<[u8], _>((bound, Bound::Unbounded)).next()
        } else {
            store.range::<[u8], _>((Bound::Unbounded, bound)).next_back()
        };
        let (k, v) = entry?;
        let item = (k.clone(), v.clone());
        self.bound = Bound::Excluded(k.clone());
        Some(Ok(item))
    }
}

fn as_slice_bound(bound: &Bound<Vec<u8>>) -> Bound<&[u8]> {
    match bound {
        Bound::Included(k) => Bound::Included(k.as_slice()),
        Bound::Excluded(k) => Bound::Excluded(k.as_slice()),
        Bound::Unbounded => Bound::Unbounded,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn kv(store: &dyn Store, key: &[u8]) -> Option<Vec<u8>> {
        store.get(key).unwrap()
    }

    #[test]
    fn reads_observe_own_writes() {
        let engine = MemoryEngine::new();
        let tx = engine.begin(true).unwrap();
        let store = tx.store("t").unwrap();
        store.put(b"a", b"1").unwrap();
        assert_eq!(kv(&*store, b"a"), Some(b"1".to_vec()));
    }

    #[test]
    fn commit_publishes_rollback_discards() {
        let engine = MemoryEngine::new();

        let tx = engine.begin(true).unwrap();
        tx.store("t").unwrap().put(b"a", b"1").unwrap();
        tx.commit().unwrap();

        let tx = engine.begin(true).unwrap();
        tx.store("t").unwrap().put(b"b", b"2").unwrap();
        tx.rollback().unwrap();

        let tx = engine.begin(false).unwrap();
        let store = tx.store("t").unwrap();
        assert_eq!(kv(&*store, b"a"), Some(b"1".to_vec()));
        assert_eq!(kv(&*store, b"b"), None);
    }

    #[test]
    fn uncommitted_writes_are_invisible_to_readers() {
        let engine = MemoryEngine::new();
        let writer = engine.begin(true).unwrap();
        writer.store("t").unwrap().put(b"a", b"1").unwrap();

        let reader = engine.begin(false).unwrap();
        assert!(!reader.store_exists("t").unwrap() || kv(&*reader.store("t").unwrap(), b"a").is_none());

        writer.commit().unwrap();
        let reader = engine.begin(false).unwrap();
        assert_eq!(kv(&*reader.store("t").unwrap(), b"a"), Some(b"1".to_vec()));
    }

    #[test]
    fn cursors_walk_in_key_order() {
        let engine = MemoryEngine::new();
        let tx = engine.begin(true).unwrap();
        let store = tx.store("t").unwrap();
        for k in [b"b", b"d", b"a", b"c"] {
            store.put(k, b"").unwrap();
        }

        let keys: Vec<_> = store
            .ascend_ge(b"")
            .map(|r| r.unwrap().0)
            .collect();
        assert_eq!(keys, [b"a".to_vec(), b"b".to_vec(), b"c".to_vec(), b"d".to_vec()]);

        let keys: Vec<_> = store
            .ascend_ge(b"b")
            .map(|r| r.unwrap().0)
            .collect();
        assert_eq!(keys, [b"b".to_vec(), b"c".to_vec(), b"d".to_vec()]);

        let keys: Vec<_> = store
            .descend_le(b"")
            .map(|r| r.unwrap().0)
            .collect();
        assert_eq!(keys, [b"d".to_vec(), b"c".to_vec(), b"b".to_vec(), b"a".to_vec()]);

        let keys: Vec<_> = store
            .descend_le(b"c")
            .map(|r| r.unwrap().0)
            .collect();
        assert_eq!(keys, [b"c".to_vec(), b"b".to_vec(), b"a".to_vec()]);
    }

    #[test]
    fn cursor_survives_deletes_mid_iteration() {
        let engine = MemoryEngine::new();
        let tx = engine.begin(true).unwrap();
        let store = tx.store("t").unwrap();
        for k in 0u8..10 {
            store.put(&[k], b"").unwrap();
        }

        let mut seen = Vec::new();
        let mut cursor = store.ascend_ge(b"");
        while let Some(item) = cursor.next() {
            let (k, _) = item.unwrap();
            // Delete everything ahead of an even key as we pass it.
            if k[0] % 2 == 0 {
                store.delete(&[k[0] + 1]).unwrap();
            }
            seen.push(k[0]);
        }
        assert_eq!(seen, [0, 2, 4, 6, 8]);
    }

    #[test]
    fn drop_store_removes_content() {
        let engine = MemoryEngine::new();
        let tx = engine.begin(true).unwrap();
        tx.store("t").unwrap().put(b"a", b"1").unwrap();
        tx.drop_store("t").unwrap();
        assert!(!tx.store_exists("t").unwrap());
        assert!(matches!(
            tx.drop_store("t"),
            Err(EngineError::StoreNotFound(_))
        ));
    }

    #[test]
    fn read_only_transactions_reject_writes() {
        let engine = MemoryEngine::new();
        engine.begin(true).unwrap().commit().unwrap();
        let tx = engine.begin(false).unwrap();
        let store = tx.store("t").unwrap();
        assert!(matches!(store.put(b"a", b"1"), Err(EngineError::ReadOnly)));
        assert!(matches!(store.delete(b"a"), Err(EngineError::ReadOnly)));
    }
}
