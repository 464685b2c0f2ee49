//! Secondary indexes.
//!
//! An index associates the order-preserving encoding of a field value with
//! the keys of the documents holding that value, inside one dedicated store.
//! Two layouts share the surface:
//!
//! * non-unique: composite key `encode(value) ∥ 0x1E ∥ doc_key`, empty value;
//! * unique: key `encode(value)`, value `doc_key`.
//!
//! Both walk entries in value order, ascending or descending from a pivot.

use crate::db::catalog::IndexInfo;
use crate::db::Transaction;
use crate::engine::{EngineError, KvCursor, Store};
use crate::error::{Error, Result};

const SEPARATOR: u8 = 0x1E;

pub struct Index<'tx> {
    info: IndexInfo,
    store: Box<dyn Store + 'tx>,
}

impl<'tx> Index<'tx> {
    pub fn open(tx: &'tx Transaction, info: IndexInfo) -> Result<Self> {
        let store = tx.engine_tx().store(&info.store_name())?;
        Ok(Index { info, store })
    }

    pub fn info(&self) -> &IndexInfo {
        &self.info
    }

    /// Associate an encoded value with a document key. A unique index holding
    /// the value already fails with [`Error::DuplicateDocument`].
    pub fn set(&self, value: &[u8], key: &[u8]) -> Result<()> {
        if self.info.unique {
            if self.store.get(value)?.is_some() {
                return Err(Error::DuplicateDocument);
            }
            self.store.put(value, key)?;
        } else {
            let mut buf = Vec::with_capacity(value.len() + key.len() + 1);
            buf.extend_from_slice(value);
            buf.push(SEPARATOR);
            buf.extend_from_slice(key);
            self.store.put(&buf, &[])?;
        }
        Ok(())
    }

    /// Remove every reference to `key`. Absent keys are a no-op. Entries are
    /// collected before deletion so no store mutation happens under a live
    /// cursor.
    pub fn delete(&self, key: &[u8]) -> Result<()> {
        let mut to_delete = Vec::new();
        if self.info.unique {
            for entry in self.store.ascend_ge(b"") {
                let (value, doc_key) = entry?;
                if doc_key == key {
                    to_delete.push(value);
                }
            }
        } else {
            let mut suffix = Vec::with_capacity(key.len() + 1);
            suffix.push(SEPARATOR);
            suffix.extend_from_slice(key);
            for entry in self.store.ascend_ge(b"") {
                let (entry_key, _) = entry?;
                if entry_key.ends_with(&suffix) {
                    to_delete.push(entry_key);
                    // One value per document, so one entry at most.
                    break;
                }
            }
        }
        for entry_key in to_delete {
            self.store.delete(&entry_key)?;
        }
        Ok(())
    }

    /// Entries with `value >= pivot`, ascending. An empty pivot starts from
    /// the lowest value.
    pub fn ascend_ge(&self, pivot: &[u8]) -> IndexCursor {
        IndexCursor {
            inner: self.store.ascend_ge(pivot),
            split: !self.info.unique,
        }
    }

    /// Entries with `value <= pivot`, descending. An empty pivot starts from
    /// the highest value.
    pub fn descend_le(&self, pivot: &[u8]) -> IndexCursor {
        let inner = if self.info.unique || pivot.is_empty() {
            self.store.descend_le(pivot)
        } else {
            // Extend the pivot past every composite key sharing the value,
            // so entries equal to the pivot are not skipped.
            let mut extended = Vec::with_capacity(pivot.len() + 2);
            extended.extend_from_slice(pivot);
            extended.push(SEPARATOR);
            extended.push(0xFF);
            self.store.descend_le(&extended)
        };
        IndexCursor {
            inner,
            split: !self.info.unique,
        }
    }
}

/// Walks `(encoded value, doc key)` pairs.
pub struct IndexCursor {
    inner: KvCursor,
    split: bool,
}

impl Iterator for IndexCursor {
    type Item = Result<(Vec<u8>, Vec<u8>)>;

    fn next(&mut self) -> Option<Self::Item> {
        let entry = match self.inner.next()? {
            Ok(entry) => entry,
            Err(err) => return Some(Err(err.into())),
        };
        if !self.split {
            return Some(Ok(entry));
        }
        let (mut key, _) = entry;
        match key.iter().rposition(|&b| b == SEPARATOR) {
            Some(at) => {
                let doc_key = key.split_off(at + 1);
                key.pop();
                Some(Ok((key, doc_key)))
            }
            None => Some(Err(Error::Engine(EngineError::Other(anyhow::anyhow!(
                "corrupted index entry: {}",
                hex::encode(&key)
            ))))),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::catalog;
    use crate::db::Database;
    use crate::engine::MemoryEngine;
    use quill_document::{encode_to_vec, Value};

    fn open_index(tx: &Transaction, unique: bool) -> Index<'_> {
        let info = IndexInfo {
            name: "idx".into(),
            table_name: "t".into(),
            path: "a".into(),
            unique,
            seq: 1,
        };
        Index::open(tx, info).unwrap()
    }

    fn enc(i: i64) -> Vec<u8> {
        encode_to_vec(&Value::Integer(i))
    }

    fn values_of(cursor: IndexCursor) -> Vec<(Vec<u8>, Vec<u8>)> {
        cursor.map(|r| r.unwrap()).collect()
    }

    fn test_db() -> Database {
        Database::new(MemoryEngine::new()).unwrap()
    }

    #[test]
    fn list_index_allows_shared_values() {
        let db = test_db();
        let tx = db.begin(true).unwrap();
        let index = open_index(&tx, false);

        index.set(&enc(2), b"k1").unwrap();
        index.set(&enc(2), b"k2").unwrap();
        index.set(&enc(1), b"k3").unwrap();

        let entries = values_of(index.ascend_ge(&[]));
        assert_eq!(
            entries,
            [
                (enc(1), b"k3".to_vec()),
                (enc(2), b"k1".to_vec()),
                (enc(2), b"k2".to_vec()),
            ]
        );
    }

    #[test]
    fn unique_index_rejects_duplicates() {
        let db = test_db();
        let tx = db.begin(true).unwrap();
        let index = open_index(&tx, true);

        index.set(&enc(1), b"k1").unwrap();
        assert!(matches!(
            index.set(&enc(1), b"k2"),
            Err(Error::DuplicateDocument)
        ));
        index.set(&enc(2), b"k2").unwrap();

        let entries = values_of(index.ascend_ge(&[]));
        assert_eq!(entries, [(enc(1), b"k1".to_vec()), (enc(2), b"k2".to_vec())]);
    }

    #[test]
    fn ascend_from_pivot() {
        let db = test_db();
        let tx = db.begin(true).unwrap();
        let index = open_index(&tx, false);
        for (i, k) in [(3, b"k3"), (1, b"k1"), (2, b"k2")] {
            index.set(&enc(i), k).unwrap();
        }

        let entries = values_of(index.ascend_ge(&enc(2)));
        assert_eq!(entries, [(enc(2), b"k2".to_vec()), (enc(3), b"k3".to_vec())]);
    }

    #[test]
    fn descend_includes_pivot_value() {
        let db = test_db();
        let tx = db.begin(true).unwrap();
        let index = open_index(&tx, false);
        for (i, k) in [(1, b"k1"), (2, b"k2"), (3, b"k3")] {
            index.set(&enc(i), k).unwrap();
        }

        // Without the 0x1E 0xFF extension the k2 entry would be skipped.
        let entries = values_of(index.descend_le(&enc(2)));
        assert_eq!(entries, [(enc(2), b"k2".to_vec()), (enc(1), b"k1".to_vec())]);

        let entries = values_of(index.descend_le(&[]));
        assert_eq!(entries.len(), 3);
        assert_eq!(entries[0], (enc(3), b"k3".to_vec()));
    }

    #[test]
    fn delete_removes_only_the_given_key() {
        let db = test_db();
        let tx = db.begin(true).unwrap();

        let list = open_index(&tx, false);
        list.set(&enc(1), b"k1").unwrap();
        list.set(&enc(1), b"k2").unwrap();
        list.delete(b"k1").unwrap();
        assert_eq!(values_of(list.ascend_ge(&[])), [(enc(1), b"k2".to_vec())]);
        // Deleting an unknown key is a no-op.
        list.delete(b"zz").unwrap();

        catalog::create_table(&tx, "t", catalog::TableInfo::new("t", Vec::new())).unwrap();
        catalog::create_index(&tx, "u", "t", "a".into(), true).unwrap();
        let unique = Index::open(&tx, catalog::get_index_info(&tx, "u").unwrap()).unwrap();
        unique.set(&enc(5), b"k5").unwrap();
        unique.set(&enc(6), b"k6").unwrap();
        unique.delete(b"k5").unwrap();
        assert_eq!(values_of(unique.ascend_ge(&[])), [(enc(6), b"k6".to_vec())]);
    }
}
