//! Tables: document storage, key derivation, constraint enforcement and
//! index upkeep.

use quill_document::{
    encode_to_vec, get_in_value, Document, EncodedDocument, FieldBuffer, Value,
};

use crate::db::catalog::{self, FieldConstraint, IndexInfo, TableInfo};
use crate::db::index::Index;
use crate::db::Transaction;
use crate::engine::Store;
use crate::error::{Error, Result};

pub struct Table<'tx> {
    tx: &'tx Transaction,
    name: String,
    info: TableInfo,
    indexes: Vec<IndexInfo>,
    store: Box<dyn Store + 'tx>,
}

impl<'tx> Table<'tx> {
    pub fn open(tx: &'tx Transaction, name: &str) -> Result<Self> {
        let info = catalog::get_table_info(tx, name)?;
        let indexes = catalog::list_indexes(tx, name)?;
        let store = tx.engine_tx().store(&info.store_name)?;
        Ok(Table {
            tx,
            name: name.to_owned(),
            info,
            indexes,
            store,
        })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn info(&self) -> &TableInfo {
        &self.info
    }

    fn check_writable(&self) -> Result<()> {
        if catalog::is_reserved_name(&self.name) {
            return Err(Error::ReadOnlyTable(self.name.clone()));
        }
        Ok(())
    }

    /// Insert a document and return its key: the encoded primary-key value,
    /// or the next auto-allocated 8-byte big-endian integer.
    pub fn insert(&mut self, doc: &dyn Document) -> Result<Vec<u8>> {
        self.check_writable()?;
        let doc = validate_constraints(&self.info, doc)?;

        let key = match self.info.primary_key() {
            Some(pk) => match doc.get(&pk.path) {
                Ok(value) => encode_to_vec(&value),
                Err(quill_document::Error::FieldNotFound) => {
                    return Err(Error::ConstraintViolation(format!(
                        "primary key `{}` is missing",
                        pk.path
                    )));
                }
                Err(err) => return Err(err.into()),
            },
            None => {
                self.info.last_auto_key += 1;
                catalog::update_table_info(self.tx, &self.name, &self.info)?;
                self.info.last_auto_key.to_be_bytes().to_vec()
            }
        };

        if self.store.get(&key)?.is_some() {
            log::trace!(
                "duplicate key {} in table `{}`",
                hex::encode(&key),
                self.name
            );
            return Err(Error::DuplicateDocument);
        }
        self.store.put(&key, &encode_to_vec(&Value::Document(doc.clone())))?;
        self.set_index_entries(&doc, &key)?;
        Ok(key)
    }

    pub fn get(&self, key: &[u8]) -> Result<EncodedDocument> {
        match self.store.get(key)? {
            Some(payload) => Ok(EncodedDocument::new(payload)?),
            None => Err(Error::DocumentNotFound),
        }
    }

    /// Delete a document: index entries first, then the payload.
    pub fn delete(&mut self, key: &[u8]) -> Result<()> {
        self.check_writable()?;
        // Ensure the payload exists (and is readable) before touching indexes.
        self.get(key)?;
        for info in &self.indexes {
            Index::open(self.tx, info.clone())?.delete(key)?;
        }
        self.store.delete(key)?;
        Ok(())
    }

    /// Replace the document under `key`, revalidating constraints and
    /// refreshing its index entries.
    pub fn replace(&mut self, key: &[u8], doc: &dyn Document) -> Result<()> {
        self.check_writable()?;
        self.get(key)?;
        let doc = validate_constraints(&self.info, doc)?;
        if let Some(pk) = self.info.primary_key() {
            let new_key = encode_to_vec(&doc.get(&pk.path)?);
            if new_key != key {
                return Err(Error::ConstraintViolation(format!(
                    "cannot change primary key `{}` of an existing document",
                    pk.path
                )));
            }
        }
        for info in &self.indexes {
            Index::open(self.tx, info.clone())?.delete(key)?;
        }
        self.store.put(key, &encode_to_vec(&Value::Document(doc.clone())))?;
        self.set_index_entries(&doc, key)?;
        Ok(())
    }

    /// Walk every `(key, document)` pair in key order.
    pub fn iter(&self) -> impl Iterator<Item = Result<(Vec<u8>, EncodedDocument)>> + '_ {
        self.store.ascend_ge(b"").map(|entry| {
            let (key, payload) = entry?;
            Ok((key, EncodedDocument::new(payload)?))
        })
    }

    /// A raw cursor over the table store; it does not borrow the table.
    pub(crate) fn cursor(&self) -> crate::engine::KvCursor {
        self.store.ascend_ge(b"")
    }

    fn set_index_entries(&self, doc: &FieldBuffer, key: &[u8]) -> Result<()> {
        for info in &self.indexes {
            match doc.get(&info.path) {
                Ok(value) => {
                    Index::open(self.tx, info.clone())?.set(&encode_to_vec(&value), key)?;
                }
                // Documents without the indexed field carry no entry.
                Err(quill_document::Error::FieldNotFound) => {}
                Err(err) => return Err(err.into()),
            }
        }
        Ok(())
    }
}

/// Check `doc` against the table's constraints, converting typed fields and
/// applying defaults. Returns the document that will actually be stored.
pub fn validate_constraints(info: &TableInfo, doc: &dyn Document) -> Result<FieldBuffer> {
    let mut buf = FieldBuffer::from_document(doc)?;
    for c in &info.constraints {
        match buf.get(&c.path) {
            Ok(Value::Null) => {
                if c.not_null {
                    return Err(not_null_violation(c));
                }
            }
            Ok(value) => {
                if let Some(target) = c.typ {
                    match value.convert_to(target) {
                        Some(converted) => {
                            if converted != value {
                                buf.set(&c.path, converted)?;
                            }
                        }
                        None => {
                            return Err(Error::ConstraintViolation(format!(
                                "field `{}` must be of type {}, got {}",
                                c.path,
                                target,
                                value.type_of()
                            )));
                        }
                    }
                }
            }
            Err(quill_document::Error::FieldNotFound) => {
                if collides_with_declared_path(&buf, c)? {
                    return Err(Error::ConstraintViolation(format!(
                        "a value shadows the declared nested field `{}`",
                        c.path
                    )));
                }
                if let Some(default) = &c.default_value {
                    buf.set(&c.path, default.clone())?;
                } else if c.not_null {
                    return Err(not_null_violation(c));
                }
            }
            Err(err) => return Err(err.into()),
        }
    }
    Ok(buf)
}

fn not_null_violation(c: &FieldConstraint) -> Error {
    Error::ConstraintViolation(format!("field `{}` must not be null", c.path))
}

/// Declared `s.b`, inserted `{s: 1}`: the prefix `s` exists but cannot hold
/// fields, so the document conflicts with the declared shape.
fn collides_with_declared_path(buf: &FieldBuffer, c: &FieldConstraint) -> Result<bool> {
    let segments = c.path.segments();
    let Some(quill_document::PathSegment::Field(root)) = segments.first() else {
        return Ok(false);
    };
    let Some(root_value) = buf.get_field(root) else {
        return Ok(false);
    };
    for cut in 1..segments.len() {
        match get_in_value(root_value, &segments[1..cut]) {
            Ok(Value::Document(_)) | Ok(Value::Array(_)) => continue,
            Ok(_) => return Ok(true),
            Err(quill_document::Error::FieldNotFound) => return Ok(false),
            Err(err) => return Err(err.into()),
        }
    }
    Ok(false)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::Database;
    use crate::engine::MemoryEngine;
    use quill_document::ValueType;

    fn test_db() -> Database {
        Database::new(MemoryEngine::new()).unwrap()
    }

    fn doc(pairs: &[(&str, Value)]) -> FieldBuffer {
        pairs
            .iter()
            .map(|(n, v)| (n.to_string(), v.clone()))
            .collect()
    }

    fn constraint(path: &str) -> FieldConstraint {
        FieldConstraint {
            path: path.into(),
            typ: None,
            not_null: false,
            primary_key: false,
            default_value: None,
        }
    }

    #[test]
    fn auto_keys_are_monotonic_big_endian() {
        let db = test_db();
        let tx = db.begin(true).unwrap();
        catalog::create_table(&tx, "t", TableInfo::new("t", Vec::new())).unwrap();
        let mut table = Table::open(&tx, "t").unwrap();

        let k1 = table.insert(&doc(&[("a", Value::Integer(1))])).unwrap();
        let k2 = table.insert(&doc(&[("a", Value::Integer(2))])).unwrap();
        assert_eq!(k1, 1u64.to_be_bytes());
        assert_eq!(k2, 2u64.to_be_bytes());

        // The counter is persisted, so a fresh handle continues the series.
        let mut table = Table::open(&tx, "t").unwrap();
        let k3 = table.insert(&doc(&[("a", Value::Integer(3))])).unwrap();
        assert_eq!(k3, 3u64.to_be_bytes());

        let scanned: Vec<_> = table
            .iter()
            .map(|entry| {
                let (key, doc) = entry.unwrap();
                (key, doc.get(&"a".into()).unwrap())
            })
            .collect();
        assert_eq!(
            scanned,
            [
                (k1, Value::Integer(1)),
                (k2, Value::Integer(2)),
                (k3, Value::Integer(3)),
            ]
        );
    }

    #[test]
    fn primary_key_derives_the_document_key() {
        let db = test_db();
        let tx = db.begin(true).unwrap();
        let mut pk = constraint("foo");
        pk.primary_key = true;
        pk.typ = Some(ValueType::Integer);
        catalog::create_table(&tx, "t", TableInfo::new("t", vec![pk])).unwrap();
        let mut table = Table::open(&tx, "t").unwrap();

        let key = table
            .insert(&doc(&[("bar", Value::Integer(1)), ("foo", Value::Integer(2))]))
            .unwrap();
        assert_eq!(key, encode_to_vec(&Value::Integer(2)));

        let err = table
            .insert(&doc(&[("bar", Value::Integer(9)), ("foo", Value::Integer(2))]))
            .unwrap_err();
        assert!(matches!(err, Error::DuplicateDocument));

        let err = table.insert(&doc(&[("bar", Value::Integer(1))])).unwrap_err();
        assert!(matches!(err, Error::ConstraintViolation(_)));
    }

    #[test]
    fn typed_fields_convert_losslessly() {
        let db = test_db();
        let tx = db.begin(true).unwrap();
        let mut c = constraint("a");
        c.typ = Some(ValueType::Integer);
        catalog::create_table(&tx, "t", TableInfo::new("t", vec![c])).unwrap();
        let mut table = Table::open(&tx, "t").unwrap();

        let key = table.insert(&doc(&[("a", Value::Double(2.0))])).unwrap();
        let stored = table.get(&key).unwrap();
        assert_eq!(stored.get(&"a".into()).unwrap(), Value::Integer(2));

        let err = table.insert(&doc(&[("a", Value::Double(2.5))])).unwrap_err();
        assert!(matches!(err, Error::ConstraintViolation(_)));
    }

    #[test]
    fn nested_constraint_collision_is_rejected() {
        let db = test_db();
        let tx = db.begin(true).unwrap();
        let mut a = constraint("a");
        a.typ = Some(ValueType::Integer);
        let mut sb = constraint("s.b");
        sb.typ = Some(ValueType::Text);
        catalog::create_table(&tx, "t", TableInfo::new("t", vec![a, sb])).unwrap();
        let mut table = Table::open(&tx, "t").unwrap();

        let err = table.insert(&doc(&[("s", Value::Integer(1))])).unwrap_err();
        assert!(matches!(err, Error::ConstraintViolation(_)));

        // A document under `s` is the declared shape.
        let mut nested = FieldBuffer::new();
        nested.add("b", Value::Text("x".into()));
        table
            .insert(&doc(&[("s", Value::Document(nested))]))
            .unwrap();
    }

    #[test]
    fn defaults_fill_absent_fields() {
        let db = test_db();
        let tx = db.begin(true).unwrap();
        let mut c = constraint("status");
        c.default_value = Some(Value::Text("new".into()));
        catalog::create_table(&tx, "t", TableInfo::new("t", vec![c])).unwrap();
        let mut table = Table::open(&tx, "t").unwrap();

        let key = table.insert(&doc(&[("a", Value::Integer(1))])).unwrap();
        let stored = table.get(&key).unwrap();
        assert_eq!(stored.get(&"status".into()).unwrap(), Value::Text("new".into()));
    }

    #[test]
    fn delete_and_replace_maintain_indexes() {
        let db = test_db();
        let tx = db.begin(true).unwrap();
        catalog::create_table(&tx, "t", TableInfo::new("t", Vec::new())).unwrap();
        catalog::create_index(&tx, "idx_a", "t", "a".into(), false).unwrap();
        let mut table = Table::open(&tx, "t").unwrap();

        let k1 = table.insert(&doc(&[("a", Value::Integer(1))])).unwrap();
        let k2 = table.insert(&doc(&[("a", Value::Integer(2))])).unwrap();

        let index = Index::open(&tx, catalog::get_index_info(&tx, "idx_a").unwrap()).unwrap();
        assert_eq!(index.ascend_ge(&[]).count(), 2);

        table.replace(&k1, &doc(&[("a", Value::Integer(9))])).unwrap();
        let entries: Vec<_> = index.ascend_ge(&[]).map(|r| r.unwrap()).collect();
        assert_eq!(
            entries,
            [
                (encode_to_vec(&Value::Integer(2)), k2.clone()),
                (encode_to_vec(&Value::Integer(9)), k1.clone()),
            ]
        );

        table.delete(&k2).unwrap();
        assert_eq!(index.ascend_ge(&[]).count(), 1);
        assert!(matches!(table.get(&k2), Err(Error::DocumentNotFound)));
        assert!(matches!(table.delete(&k2), Err(Error::DocumentNotFound)));
    }

    #[test]
    fn reserved_tables_reject_writes() {
        let db = test_db();
        let tx = db.begin(true).unwrap();
        let mut table = Table::open(&tx, catalog::TABLES_STORE).unwrap();
        let err = table.insert(&doc(&[("a", Value::Integer(1))])).unwrap_err();
        assert!(matches!(err, Error::ReadOnlyTable(_)));
    }
}
