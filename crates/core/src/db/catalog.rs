//! The persisted registry of tables and indexes.
//!
//! The catalog lives inside the engine it describes, in two reserved stores
//! whose rows are `TableInfo` / `IndexInfo` serialized through the document
//! codec. It holds no state of its own: every operation takes the transaction
//! it should read or write through, which keeps the catalog/transaction
//! relationship acyclic.

use quill_document::{
    encode_to_vec, Document, EncodedDocument, FieldBuffer, Path, Value, ValueType,
};

use crate::db::index::Index;
use crate::db::Transaction;
use crate::error::{Error, Result};

/// Every name beginning with this prefix is reserved for internal stores.
pub const RESERVED_PREFIX: &str = "__quill";
pub const TABLES_STORE: &str = "__quill_tables";
pub const INDEXES_STORE: &str = "__quill_indexes";
const INDEX_STORE_PREFIX: &str = "__quill_index_";

/// A declared constraint on one field path of a table.
#[derive(Debug, Clone, PartialEq)]
pub struct FieldConstraint {
    pub path: Path,
    pub typ: Option<ValueType>,
    pub not_null: bool,
    pub primary_key: bool,
    pub default_value: Option<Value>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct TableInfo {
    pub store_name: String,
    pub constraints: Vec<FieldConstraint>,
    /// Highest auto-allocated document key handed out so far.
    pub last_auto_key: u64,
}

impl TableInfo {
    pub fn new(store_name: impl Into<String>, constraints: Vec<FieldConstraint>) -> Self {
        TableInfo {
            store_name: store_name.into(),
            constraints,
            last_auto_key: 0,
        }
    }

    pub fn primary_key(&self) -> Option<&FieldConstraint> {
        self.constraints.iter().find(|c| c.primary_key)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IndexInfo {
    pub name: String,
    pub table_name: String,
    pub path: Path,
    pub unique: bool,
    /// Creation order within the table; the planner's tie-break.
    pub seq: u64,
}

impl IndexInfo {
    pub fn store_name(&self) -> String {
        format!("{INDEX_STORE_PREFIX}{}", self.name)
    }
}

pub fn is_reserved_name(name: &str) -> bool {
    name.starts_with(RESERVED_PREFIX)
}

/// DDL rejects reserved names outright.
fn check_user_name(name: &str) -> Result<()> {
    if is_reserved_name(name) {
        return Err(Error::ReadOnlyTable(name.to_owned()));
    }
    Ok(())
}

pub fn table_exists(tx: &Transaction, name: &str) -> Result<bool> {
    if name == TABLES_STORE || name == INDEXES_STORE {
        return Ok(true);
    }
    let store = tx.engine_tx().store(TABLES_STORE)?;
    Ok(store.get(name.as_bytes())?.is_some())
}

pub fn get_table_info(tx: &Transaction, name: &str) -> Result<TableInfo> {
    // The reserved stores are scannable like any table but carry no schema.
    if name == TABLES_STORE || name == INDEXES_STORE {
        return Ok(TableInfo::new(name, Vec::new()));
    }
    let store = tx.engine_tx().store(TABLES_STORE)?;
    match store.get(name.as_bytes())? {
        Some(raw) => table_info_from_doc(&EncodedDocument::new(raw)?),
        None => Err(Error::TableNotFound(name.to_owned())),
    }
}

pub fn create_table(tx: &Transaction, name: &str, mut info: TableInfo) -> Result<()> {
    check_user_name(name)?;
    if info.constraints.iter().filter(|c| c.primary_key).count() > 1 {
        return Err(Error::ConstraintViolation(
            "only one PRIMARY KEY is allowed".into(),
        ));
    }
    // A primary key must always be present, so it is implicitly NOT NULL.
    for c in &mut info.constraints {
        if c.primary_key {
            c.not_null = true;
        }
    }
    let store = tx.engine_tx().store(TABLES_STORE)?;
    if store.get(name.as_bytes())?.is_some() {
        return Err(Error::TableAlreadyExists(name.to_owned()));
    }
    store.put(name.as_bytes(), &encode_table_info(&info))?;
    tx.engine_tx().store(&info.store_name)?;
    log::debug!("created table `{name}`");
    Ok(())
}

/// Persist a mutated `TableInfo` (auto-key allocation).
pub fn update_table_info(tx: &Transaction, name: &str, info: &TableInfo) -> Result<()> {
    let store = tx.engine_tx().store(TABLES_STORE)?;
    if store.get(name.as_bytes())?.is_none() {
        return Err(Error::TableNotFound(name.to_owned()));
    }
    store.put(name.as_bytes(), &encode_table_info(info))?;
    Ok(())
}

pub fn drop_table(tx: &Transaction, name: &str) -> Result<()> {
    check_user_name(name)?;
    let info = get_table_info(tx, name)?;
    for index in list_indexes(tx, name)? {
        drop_index(tx, &index.name)?;
    }
    let store = tx.engine_tx().store(TABLES_STORE)?;
    store.delete(name.as_bytes())?;
    tx.engine_tx().drop_store(&info.store_name)?;
    log::debug!("dropped table `{name}`");
    Ok(())
}

pub fn get_index_info(tx: &Transaction, name: &str) -> Result<IndexInfo> {
    let store = tx.engine_tx().store(INDEXES_STORE)?;
    match store.get(name.as_bytes())? {
        Some(raw) => index_info_from_doc(&EncodedDocument::new(raw)?),
        None => Err(Error::IndexNotFound(name.to_owned())),
    }
}

pub fn create_index(
    tx: &Transaction,
    name: &str,
    table_name: &str,
    path: Path,
    unique: bool,
) -> Result<()> {
    check_user_name(name)?;
    if !table_exists(tx, table_name)? {
        return Err(Error::TableNotFound(table_name.to_owned()));
    }
    check_user_name(table_name)?;
    let store = tx.engine_tx().store(INDEXES_STORE)?;
    if store.get(name.as_bytes())?.is_some() {
        return Err(Error::IndexAlreadyExists(name.to_owned()));
    }
    let seq = list_indexes(tx, table_name)?
        .iter()
        .map(|i| i.seq)
        .max()
        .map_or(1, |s| s + 1);
    let info = IndexInfo {
        name: name.to_owned(),
        table_name: table_name.to_owned(),
        path,
        unique,
        seq,
    };
    store.put(name.as_bytes(), &encode_index_info(&info))?;
    tx.engine_tx().store(&info.store_name())?;
    build_index(tx, &info)?;
    log::debug!("created index `{name}` on `{table_name}`");
    Ok(())
}

pub fn drop_index(tx: &Transaction, name: &str) -> Result<()> {
    check_user_name(name)?;
    let info = get_index_info(tx, name)?;
    let store = tx.engine_tx().store(INDEXES_STORE)?;
    store.delete(name.as_bytes())?;
    tx.engine_tx().drop_store(&info.store_name())?;
    log::debug!("dropped index `{name}`");
    Ok(())
}

/// All indexes of `table_name`, in creation order.
pub fn list_indexes(tx: &Transaction, table_name: &str) -> Result<Vec<IndexInfo>> {
    let mut indexes: Vec<_> = list_all_indexes(tx)?
        .into_iter()
        .filter(|i| i.table_name == table_name)
        .collect();
    indexes.sort_by_key(|i| i.seq);
    Ok(indexes)
}

pub fn list_all_indexes(tx: &Transaction) -> Result<Vec<IndexInfo>> {
    let store = tx.engine_tx().store(INDEXES_STORE)?;
    let mut indexes = Vec::new();
    for entry in store.ascend_ge(b"") {
        let (_, raw) = entry?;
        indexes.push(index_info_from_doc(&EncodedDocument::new(raw)?)?);
    }
    Ok(indexes)
}

/// Rebuild one index, or every index of a table when `name` names a table.
pub fn reindex(tx: &Transaction, name: &str) -> Result<()> {
    if table_exists(tx, name)? {
        for index in list_indexes(tx, name)? {
            rebuild_index(tx, &index)?;
        }
        return Ok(());
    }
    let info = get_index_info(tx, name)?;
    rebuild_index(tx, &info)
}

pub fn reindex_all(tx: &Transaction) -> Result<()> {
    for index in list_all_indexes(tx)? {
        rebuild_index(tx, &index)?;
    }
    Ok(())
}

fn rebuild_index(tx: &Transaction, info: &IndexInfo) -> Result<()> {
    tx.engine_tx().drop_store(&info.store_name())?;
    tx.engine_tx().store(&info.store_name())?;
    build_index(tx, info)?;
    log::debug!("rebuilt index `{}`", info.name);
    Ok(())
}

/// Populate an (empty) index by scanning its table once.
fn build_index(tx: &Transaction, info: &IndexInfo) -> Result<()> {
    let table_info = get_table_info(tx, &info.table_name)?;
    let table_store = tx.engine_tx().store(&table_info.store_name)?;
    let index = Index::open(tx, info.clone())?;
    for entry in table_store.ascend_ge(b"") {
        let (key, payload) = entry?;
        let doc = EncodedDocument::new(payload)?;
        match doc.get(&info.path) {
            Ok(value) => index.set(&encode_to_vec(&value), &key)?,
            Err(quill_document::Error::FieldNotFound) => {}
            Err(err) => return Err(err.into()),
        }
    }
    Ok(())
}

// --- info (de)serialization ---------------------------------------------

fn type_name(t: ValueType) -> &'static str {
    match t {
        ValueType::Null => "null",
        ValueType::Bool => "bool",
        ValueType::Integer => "integer",
        ValueType::Double => "double",
        ValueType::Text => "text",
        ValueType::Blob => "blob",
        ValueType::Array => "array",
        ValueType::Document => "document",
    }
}

fn type_from_name(name: &str) -> Result<ValueType> {
    Ok(match name {
        "null" => ValueType::Null,
        "bool" => ValueType::Bool,
        "integer" => ValueType::Integer,
        "double" => ValueType::Double,
        "text" => ValueType::Text,
        "blob" => ValueType::Blob,
        "array" => ValueType::Array,
        "document" => ValueType::Document,
        other => {
            return Err(Error::Bind(format!("unknown type `{other}` in catalog")));
        }
    })
}

fn encode_table_info(info: &TableInfo) -> Vec<u8> {
    let mut constraints = Vec::with_capacity(info.constraints.len());
    for c in &info.constraints {
        let mut doc = FieldBuffer::new();
        doc.add("path", Value::Text(c.path.to_string()));
        if let Some(t) = c.typ {
            doc.add("type", Value::Text(type_name(t).to_owned()));
        }
        doc.add("not_null", Value::Bool(c.not_null));
        doc.add("primary_key", Value::Bool(c.primary_key));
        if let Some(d) = &c.default_value {
            doc.add("default", d.clone());
        }
        constraints.push(Value::Document(doc));
    }
    let mut doc = FieldBuffer::new();
    doc.add("store_name", Value::Text(info.store_name.clone()));
    doc.add("last_auto_key", Value::Integer(info.last_auto_key as i64));
    doc.add("constraints", Value::Array(constraints));
    encode_to_vec(&Value::Document(doc))
}

fn table_info_from_doc(doc: &EncodedDocument) -> Result<TableInfo> {
    let store_name = expect_text(doc.get(&"store_name".into())?)?;
    let last_auto_key = expect_integer(doc.get(&"last_auto_key".into())?)? as u64;
    let Value::Array(raw) = doc.get(&"constraints".into())? else {
        return Err(corrupt("constraints"));
    };
    let mut constraints = Vec::with_capacity(raw.len());
    for item in raw {
        let Value::Document(c) = item else {
            return Err(corrupt("constraints"));
        };
        let path: Path = expect_text(c.get(&"path".into())?)?.parse().unwrap();
        let typ = match c.get_field("type") {
            Some(Value::Text(name)) => Some(type_from_name(name)?),
            Some(_) => return Err(corrupt("type")),
            None => None,
        };
        constraints.push(FieldConstraint {
            path,
            typ,
            not_null: expect_bool(c.get(&"not_null".into())?)?,
            primary_key: expect_bool(c.get(&"primary_key".into())?)?,
            default_value: c.get_field("default").cloned(),
        });
    }
    Ok(TableInfo {
        store_name,
        constraints,
        last_auto_key,
    })
}

fn encode_index_info(info: &IndexInfo) -> Vec<u8> {
    let mut doc = FieldBuffer::new();
    doc.add("name", Value::Text(info.name.clone()));
    doc.add("table_name", Value::Text(info.table_name.clone()));
    doc.add("path", Value::Text(info.path.to_string()));
    doc.add("unique", Value::Bool(info.unique));
    doc.add("seq", Value::Integer(info.seq as i64));
    encode_to_vec(&Value::Document(doc))
}

fn index_info_from_doc(doc: &EncodedDocument) -> Result<IndexInfo> {
    Ok(IndexInfo {
        name: expect_text(doc.get(&"name".into())?)?,
        table_name: expect_text(doc.get(&"table_name".into())?)?,
        path: expect_text(doc.get(&"path".into())?)?.parse().unwrap(),
        unique: expect_bool(doc.get(&"unique".into())?)?,
        seq: expect_integer(doc.get(&"seq".into())?)? as u64,
    })
}

fn corrupt(field: &str) -> Error {
    Error::Engine(crate::engine::EngineError::Other(anyhow::anyhow!(
        "corrupted catalog entry: bad `{field}` field"
    )))
}

fn expect_text(v: Value) -> Result<String> {
    match v {
        Value::Text(s) => Ok(s),
        _ => Err(corrupt("text")),
    }
}

fn expect_bool(v: Value) -> Result<bool> {
    match v {
        Value::Bool(b) => Ok(b),
        _ => Err(corrupt("bool")),
    }
}

fn expect_integer(v: Value) -> Result<i64> {
    match v {
        Value::Integer(i) => Ok(i),
        _ => Err(corrupt("integer")),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::Database;
    use crate::engine::MemoryEngine;

    fn test_db() -> Database {
        Database::new(MemoryEngine::new()).unwrap()
    }

    fn constraint(path: &str, typ: Option<ValueType>) -> FieldConstraint {
        FieldConstraint {
            path: path.into(),
            typ,
            not_null: false,
            primary_key: false,
            default_value: None,
        }
    }

    #[test]
    fn table_info_roundtrip() {
        let mut pk = constraint("id", Some(ValueType::Integer));
        pk.primary_key = true;
        pk.not_null = true;
        let mut with_default = constraint("score", Some(ValueType::Double));
        with_default.default_value = Some(Value::Double(1.5));
        let info = TableInfo {
            store_name: "players".into(),
            constraints: vec![pk, with_default, constraint("meta.tag", None)],
            last_auto_key: 42,
        };
        let decoded =
            table_info_from_doc(&EncodedDocument::new(encode_table_info(&info)).unwrap()).unwrap();
        assert_eq!(decoded, info);
    }

    #[test]
    fn create_and_drop_table() {
        let db = test_db();
        let tx = db.begin(true).unwrap();

        create_table(&tx, "foo", TableInfo::new("foo", Vec::new())).unwrap();
        assert!(table_exists(&tx, "foo").unwrap());
        let err = create_table(&tx, "foo", TableInfo::new("foo", Vec::new())).unwrap_err();
        assert!(matches!(err, Error::TableAlreadyExists(_)));

        drop_table(&tx, "foo").unwrap();
        assert!(!table_exists(&tx, "foo").unwrap());
        assert!(matches!(
            drop_table(&tx, "foo"),
            Err(Error::TableNotFound(_))
        ));
    }

    #[test]
    fn reserved_names_are_rejected() {
        let db = test_db();
        let tx = db.begin(true).unwrap();
        let err = create_table(&tx, "__quill_evil", TableInfo::new("__quill_evil", Vec::new()))
            .unwrap_err();
        assert!(matches!(err, Error::ReadOnlyTable(_)));
    }

    #[test]
    fn index_lifecycle_and_ordering() {
        let db = test_db();
        let tx = db.begin(true).unwrap();
        create_table(&tx, "t", TableInfo::new("t", Vec::new())).unwrap();

        create_index(&tx, "idx_b", "t", "b".into(), false).unwrap();
        create_index(&tx, "idx_a", "t", "a".into(), true).unwrap();

        // Creation order, not name order.
        let names: Vec<_> = list_indexes(&tx, "t").unwrap().into_iter().map(|i| i.name).collect();
        assert_eq!(names, ["idx_b", "idx_a"]);

        let err = create_index(&tx, "idx_a", "t", "a".into(), false).unwrap_err();
        assert!(matches!(err, Error::IndexAlreadyExists(_)));
        let err = create_index(&tx, "idx_c", "missing", "c".into(), false).unwrap_err();
        assert!(matches!(err, Error::TableNotFound(_)));

        drop_table(&tx, "t").unwrap();
        assert!(matches!(
            get_index_info(&tx, "idx_a"),
            Err(Error::IndexNotFound(_))
        ));
    }
}
