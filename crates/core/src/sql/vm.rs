//! Operator execution: turns a plan into a pull-driven document stream.
//!
//! Query operators stay lazy; only `Sort` materializes, and the mutation
//! operators collect keys before touching the store (the substrate may not
//! keep iterators valid across deletions, and may allow a single live
//! iterator per read-write transaction).

use quill_document::{
    encode_to_vec, Document, EncodedDocument, FieldBuffer, FieldIter, Path, Value,
};

use crate::db::catalog::{self, TableInfo};
use crate::db::index::{Index, IndexCursor};
use crate::db::table::Table;
use crate::db::Transaction;
use crate::error::{Error, Result};
use crate::sql::ast::Projection;
use crate::sql::execute::Cancellation;
use crate::sql::expr::{eval, EvalStack, Expr, Function};
use crate::sql::plan::{IndexRange, InsertOp, Node};

/// Number of documents pulled per buffered-mutation round.
pub(crate) const DELETE_BUFFER_SIZE: usize = 100;

/// One element of a stream: a document and, when it came straight from a
/// table, its storage key.
pub struct Row {
    pub key: Option<Vec<u8>>,
    pub doc: RowDoc,
}

/// The closed set of document shapes flowing between operators.
pub enum RowDoc {
    Encoded(EncodedDocument),
    Buffer(FieldBuffer),
    Mask(Box<Mask>),
}

impl Document for RowDoc {
    fn iter_fields(&self) -> FieldIter<'_> {
        match self {
            RowDoc::Encoded(d) => d.iter_fields(),
            RowDoc::Buffer(d) => d.iter_fields(),
            RowDoc::Mask(d) => d.iter_fields(),
        }
    }

    fn get(&self, path: &Path) -> Result<Value, quill_document::Error> {
        match self {
            RowDoc::Encoded(d) => d.get(path),
            RowDoc::Buffer(d) => d.get(path),
            RowDoc::Mask(d) => d.get(path),
        }
    }
}

pub type DocStream<'a> = Box<dyn Iterator<Item = Result<Row>> + 'a>;

/// Build the stream for a pipeline. Mutation operators run to completion
/// here and leave an empty stream behind.
pub fn build_stream<'tx>(
    tx: &'tx Transaction,
    nodes: &[Node],
    cancel: &Cancellation,
) -> Result<DocStream<'tx>> {
    let mut stream: DocStream<'tx> = Box::new(std::iter::empty());
    let mut table_info: Option<TableInfo> = None;

    for (at, node) in nodes.iter().enumerate() {
        stream = match node {
            Node::Scan { table } => {
                let table = Table::open(tx, table)?;
                let info = table.info().clone();
                let cursor = table.cursor();
                table_info = Some(info);
                let checked = CancelStream {
                    cancel: cancel.clone(),
                    inner: cursor,
                };
                Box::new(checked.map(|entry| {
                    let (key, payload) = entry?;
                    Ok(Row {
                        key: Some(key),
                        doc: RowDoc::Encoded(EncodedDocument::new(payload)?),
                    })
                }))
            }
            Node::IndexScan {
                index,
                range,
                reverse,
            } => {
                let info = catalog::get_index_info(tx, index)?;
                let table = Table::open(tx, &info.table_name)?;
                table_info = Some(table.info().clone());
                Box::new(index_scan(tx, table, info, range, *reverse, cancel)?)
            }
            Node::Filter { expr } => {
                let expr = expr.clone();
                let info = table_info.clone();
                Box::new(FilterStream {
                    inner: stream,
                    expr,
                    info,
                })
            }
            Node::Project { fields } => {
                if let Some(aggregates) = aggregate_projection(fields)? {
                    let row = fold_aggregates(stream, &aggregates)?;
                    Box::new(std::iter::once(Ok(row)))
                } else {
                    let fields = fields.to_vec();
                    let info = table_info.clone();
                    Box::new(stream.map(move |item| {
                        let row = item?;
                        Ok(Row {
                            key: None,
                            doc: RowDoc::Mask(Box::new(Mask {
                                source: row.doc,
                                key: row.key,
                                info: info.clone(),
                                fields: fields.clone(),
                            })),
                        })
                    }))
                }
            }
            Node::Sort { path, descending } => sort_stream(tx, stream, path, *descending)?,
            Node::Offset { n } => Box::new(OffsetStream {
                inner: stream,
                remaining: *n,
            }),
            Node::Limit { n } => Box::new(LimitStream {
                inner: stream,
                remaining: *n,
            }),
            Node::Insert {
                table,
                fields,
                source,
            } => {
                run_insert(tx, table, fields.as_deref(), source, cancel)?;
                Box::new(std::iter::empty())
            }
            Node::Delete { table } => {
                run_delete(tx, &nodes[..at], table, cancel)?;
                Box::new(std::iter::empty())
            }
            Node::Update { table, assignments } => {
                run_update(tx, stream, table, assignments)?;
                Box::new(std::iter::empty())
            }
        };
    }
    Ok(stream)
}

/// Materialize every stream row into an owned field buffer.
pub fn collect_rows(stream: DocStream<'_>) -> Result<Vec<FieldBuffer>> {
    let mut rows = Vec::new();
    for item in stream {
        let row = item?;
        rows.push(FieldBuffer::from_document(&row.doc)?);
    }
    Ok(rows)
}

// --- sources ------------------------------------------------------------

struct CancelStream<I> {
    cancel: Cancellation,
    inner: I,
}

impl<T, I: Iterator<Item = Result<T, crate::engine::EngineError>>> Iterator for CancelStream<I> {
    type Item = Result<T>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.cancel.is_cancelled() {
            return Some(Err(Error::Cancelled));
        }
        self.inner.next().map(|r| r.map_err(Error::from))
    }
}

fn index_scan<'tx>(
    tx: &'tx Transaction,
    table: Table<'tx>,
    info: catalog::IndexInfo,
    range: &IndexRange,
    reverse: bool,
    cancel: &Cancellation,
) -> Result<IndexScanStream<'tx>> {
    let index = Index::open(tx, info)?;
    let lower = range.lower.as_ref().map(encode_to_vec);
    let upper = range.upper.as_ref().map(encode_to_vec);
    let cursor = if reverse {
        index.descend_le(upper.as_deref().unwrap_or(b""))
    } else {
        index.ascend_ge(lower.as_deref().unwrap_or(b""))
    };
    Ok(IndexScanStream {
        cursor,
        table,
        lower,
        lower_inclusive: range.lower_inclusive,
        upper,
        upper_inclusive: range.upper_inclusive,
        reverse,
        cancel: cancel.clone(),
        done: false,
    })
}

/// Walks an index range and resolves each entry to its document.
struct IndexScanStream<'tx> {
    cursor: IndexCursor,
    table: Table<'tx>,
    lower: Option<Vec<u8>>,
    lower_inclusive: bool,
    upper: Option<Vec<u8>>,
    upper_inclusive: bool,
    reverse: bool,
    cancel: Cancellation,
    done: bool,
}

impl Iterator for IndexScanStream<'_> {
    type Item = Result<Row>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.done {
            return None;
        }
        loop {
            if self.cancel.is_cancelled() {
                return Some(Err(Error::Cancelled));
            }
            let (value, doc_key) = match self.cursor.next()? {
                Ok(entry) => entry,
                Err(err) => return Some(Err(err)),
            };
            // The cursor already starts at the pivot; the opposite bound and
            // exclusive pivots are enforced on the encoded value bytes.
            if self.reverse {
                if let Some(hi) = &self.upper {
                    if !self.upper_inclusive && value == *hi {
                        continue;
                    }
                }
                if let Some(lo) = &self.lower {
                    if value < *lo || (!self.lower_inclusive && value == *lo) {
                        self.done = true;
                        return None;
                    }
                }
            } else {
                if let Some(lo) = &self.lower {
                    if !self.lower_inclusive && value == *lo {
                        continue;
                    }
                }
                if let Some(hi) = &self.upper {
                    if value > *hi || (!self.upper_inclusive && value == *hi) {
                        self.done = true;
                        return None;
                    }
                }
            }
            let doc = match self.table.get(&doc_key) {
                Ok(doc) => doc,
                Err(err) => return Some(Err(err)),
            };
            return Some(Ok(Row {
                key: Some(doc_key),
                doc: RowDoc::Encoded(doc),
            }));
        }
    }
}

// --- filtering and projection -------------------------------------------

struct FilterStream<'tx> {
    inner: DocStream<'tx>,
    expr: Expr,
    info: Option<TableInfo>,
}

impl Iterator for FilterStream<'_> {
    type Item = Result<Row>;

    fn next(&mut self) -> Option<Self::Item> {
        loop {
            let row = match self.inner.next()? {
                Ok(row) => row,
                Err(err) => return Some(Err(err)),
            };
            let stack = EvalStack {
                doc: Some(&row.doc),
                key: row.key.as_deref(),
                info: self.info.as_ref(),
            };
            match eval(&self.expr, &stack) {
                Ok(v) if v.is_truthy() => return Some(Ok(row)),
                Ok(_) => continue,
                // A document without the filtered field simply does not match.
                Err(Error::FieldNotFound) => continue,
                Err(err) => return Some(Err(err)),
            }
        }
    }
}

/// The projected view of a source document: evaluates its expressions on
/// demand, expanding `*` to the source fields.
pub struct Mask {
    source: RowDoc,
    key: Option<Vec<u8>>,
    info: Option<TableInfo>,
    fields: Vec<Projection>,
}

impl Mask {
    fn stack(&self) -> EvalStack<'_> {
        EvalStack {
            doc: Some(&self.source),
            key: self.key.as_deref(),
            info: self.info.as_ref(),
        }
    }
}

fn mask_err(err: Error) -> quill_document::Error {
    match err {
        Error::FieldNotFound => quill_document::Error::FieldNotFound,
        Error::Decode(e) => quill_document::Error::Decode(e),
        other => quill_document::Error::Other(Box::new(other)),
    }
}

impl Document for Mask {
    fn iter_fields(&self) -> FieldIter<'_> {
        Box::new(self.fields.iter().flat_map(move |field| match field {
            Projection::Wildcard => self.source.iter_fields(),
            Projection::Expr { expr, name } => {
                let item = match eval(expr, &self.stack()) {
                    Ok(value) => Ok((name.clone(), value)),
                    // An unresolvable path projects as null.
                    Err(Error::FieldNotFound) => Ok((name.clone(), Value::Null)),
                    Err(err) => Err(mask_err(err)),
                };
                Box::new(std::iter::once(item)) as FieldIter<'_>
            }
        }))
    }

    fn get(&self, path: &Path) -> Result<Value, quill_document::Error> {
        let Some(root) = path.root_field() else {
            return Err(quill_document::Error::FieldNotFound);
        };
        for field in &self.fields {
            match field {
                Projection::Wildcard => match self.source.get(path) {
                    Err(quill_document::Error::FieldNotFound) => continue,
                    other => return other,
                },
                Projection::Expr { expr, name } if name == root => {
                    let value = eval(expr, &self.stack()).map_err(mask_err)?;
                    return quill_document::get_in_value(&value, &path.segments()[1..]);
                }
                Projection::Expr { .. } => {}
            }
        }
        Err(quill_document::Error::FieldNotFound)
    }
}

// --- aggregation ---------------------------------------------------------

/// When any projected expression aggregates, all of them must.
fn aggregate_projection(fields: &[Projection]) -> Result<Option<Vec<(String, Function)>>> {
    let any = fields.iter().any(|f| match f {
        Projection::Expr { expr, .. } => expr.contains_aggregate(),
        Projection::Wildcard => false,
    });
    if !any {
        return Ok(None);
    }
    let mut aggregates = Vec::with_capacity(fields.len());
    for field in fields {
        match field {
            Projection::Expr {
                expr: Expr::Call(func),
                name,
            } if func.is_aggregate() => aggregates.push((name.clone(), func.clone())),
            _ => {
                return Err(Error::Bind(
                    "aggregates cannot be mixed with other projections".into(),
                ));
            }
        }
    }
    Ok(Some(aggregates))
}

enum Accumulator {
    Count(i64),
    Sum(Option<Value>),
    Min(Option<Value>),
    Max(Option<Value>),
    Avg { sum: f64, count: i64 },
}

fn fold_aggregates(stream: DocStream<'_>, aggregates: &[(String, Function)]) -> Result<Row> {
    let mut accs: Vec<Accumulator> = aggregates
        .iter()
        .map(|(_, func)| match func {
            Function::Count => Accumulator::Count(0),
            Function::Sum(_) => Accumulator::Sum(None),
            Function::Min(_) => Accumulator::Min(None),
            Function::Max(_) => Accumulator::Max(None),
            Function::Avg(_) => Accumulator::Avg { sum: 0.0, count: 0 },
            Function::Pk => unreachable!("not an aggregate"),
        })
        .collect();

    for item in stream {
        let row = item?;
        for ((_, func), acc) in aggregates.iter().zip(&mut accs) {
            let path = match func {
                Function::Count => {
                    if let Accumulator::Count(n) = acc {
                        *n += 1;
                    }
                    continue;
                }
                Function::Sum(p) | Function::Min(p) | Function::Max(p) | Function::Avg(p) => p,
                Function::Pk => unreachable!(),
            };
            let value = match row.doc.get(path) {
                Ok(v) => v,
                Err(quill_document::Error::FieldNotFound) => continue,
                Err(err) => return Err(err.into()),
            };
            match acc {
                Accumulator::Sum(slot) => {
                    if matches!(value, Value::Integer(_) | Value::Double(_)) {
                        *slot = Some(match slot.take() {
                            None => value,
                            Some(prev) => add_numbers(prev, value)?,
                        });
                    }
                }
                Accumulator::Min(slot) => {
                    let keep = slot.take().map_or(value.clone(), |prev| prev.min(value));
                    *slot = Some(keep);
                }
                Accumulator::Max(slot) => {
                    let keep = slot.take().map_or(value.clone(), |prev| prev.max(value));
                    *slot = Some(keep);
                }
                Accumulator::Avg { sum, count } => match value {
                    Value::Integer(i) => {
                        *sum += i as f64;
                        *count += 1;
                    }
                    Value::Double(d) => {
                        *sum += d;
                        *count += 1;
                    }
                    _ => {}
                },
                Accumulator::Count(_) => unreachable!(),
            }
        }
    }

    let mut out = FieldBuffer::new();
    for ((name, _), acc) in aggregates.iter().zip(accs) {
        let value = match acc {
            Accumulator::Count(n) => Value::Integer(n),
            Accumulator::Sum(v) | Accumulator::Min(v) | Accumulator::Max(v) => {
                v.unwrap_or(Value::Null)
            }
            Accumulator::Avg { count: 0, .. } => Value::Null,
            Accumulator::Avg { sum, count } => Value::Double(sum / count as f64),
        };
        out.add(name.clone(), value);
    }
    Ok(Row {
        key: None,
        doc: RowDoc::Buffer(out),
    })
}

fn add_numbers(a: Value, b: Value) -> Result<Value> {
    Ok(match (a, b) {
        (Value::Integer(a), Value::Integer(b)) => a
            .checked_add(b)
            .map(Value::Integer)
            .ok_or_else(|| Error::Type("integer overflow in sum()".into()))?,
        (a, b) => Value::Double(to_double(&a) + to_double(&b)),
    })
}

fn to_double(v: &Value) -> f64 {
    match v {
        Value::Integer(i) => *i as f64,
        Value::Double(d) => *d,
        _ => unreachable!("only numbers are accumulated"),
    }
}

// --- sort ----------------------------------------------------------------

/// Materialize and reorder the stream by the encoded sort value plus a
/// tie-break counter. Inside a writable transaction the rows go through an
/// auxiliary store (dropped before the stream yields); a read-only
/// transaction orders the same keys in memory.
fn sort_stream<'tx>(
    tx: &'tx Transaction,
    stream: DocStream<'_>,
    path: &Path,
    descending: bool,
) -> Result<DocStream<'tx>> {
    let mut entries = Vec::new();
    let mut counter: u64 = 0;
    for item in stream {
        let row = item?;
        let sort_value = match row.doc.get(path) {
            Ok(v) => v,
            Err(quill_document::Error::FieldNotFound) => Value::Null,
            Err(err) => return Err(err.into()),
        };
        let mut sort_key = encode_to_vec(&sort_value);
        sort_key.extend_from_slice(&counter.to_be_bytes());
        counter += 1;
        entries.push((sort_key, serialize_row(&row)?));
    }

    let mut rows = Vec::with_capacity(entries.len());
    if tx.writable() {
        let store_name = tx.next_temp_store();
        {
            let store = tx.engine_tx().store(&store_name)?;
            for (key, value) in entries {
                store.put(&key, &value)?;
            }
            let cursor = if descending {
                store.descend_le(b"")
            } else {
                store.ascend_ge(b"")
            };
            for entry in cursor {
                let (_, raw) = entry?;
                rows.push(deserialize_row(&raw)?);
            }
        }
        tx.engine_tx().drop_store(&store_name)?;
    } else {
        entries.sort_unstable_by(|(a, _), (b, _)| a.cmp(b));
        if descending {
            entries.reverse();
        }
        for (_, raw) in entries {
            rows.push(deserialize_row(&raw)?);
        }
    }
    Ok(Box::new(rows.into_iter().map(Ok)))
}

fn serialize_row(row: &Row) -> Result<Vec<u8>> {
    let mut out = Vec::new();
    match &row.key {
        Some(key) => {
            out.push(1);
            out.extend_from_slice(&(key.len() as u32).to_be_bytes());
            out.extend_from_slice(key);
        }
        None => out.push(0),
    }
    let doc = FieldBuffer::from_document(&row.doc)?;
    out.extend_from_slice(&encode_to_vec(&Value::Document(doc)));
    Ok(out)
}

fn deserialize_row(raw: &[u8]) -> Result<Row> {
    let corrupted = || Error::Decode(quill_document::DecodeError::UnexpectedEof);
    let (&flag, mut rest) = raw.split_first().ok_or_else(corrupted)?;
    let key = if flag == 1 {
        if rest.len() < 4 {
            return Err(corrupted());
        }
        let (len_bytes, tail) = rest.split_at(4);
        let len = u32::from_be_bytes(len_bytes.try_into().unwrap()) as usize;
        if tail.len() < len {
            return Err(corrupted());
        }
        let (key, tail) = tail.split_at(len);
        rest = tail;
        Some(key.to_vec())
    } else {
        None
    };
    Ok(Row {
        key,
        doc: RowDoc::Encoded(EncodedDocument::new(rest.to_vec())?),
    })
}

// --- limit / offset ------------------------------------------------------

struct OffsetStream<'tx> {
    inner: DocStream<'tx>,
    remaining: u64,
}

impl Iterator for OffsetStream<'_> {
    type Item = Result<Row>;

    fn next(&mut self) -> Option<Self::Item> {
        loop {
            let item = self.inner.next()?;
            if item.is_err() || self.remaining == 0 {
                return Some(item);
            }
            self.remaining -= 1;
        }
    }
}

struct LimitStream<'tx> {
    inner: DocStream<'tx>,
    remaining: u64,
}

impl Iterator for LimitStream<'_> {
    type Item = Result<Row>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.remaining == 0 {
            return None;
        }
        let item = self.inner.next()?;
        if item.is_ok() {
            self.remaining -= 1;
        }
        Some(item)
    }
}

// --- mutations -----------------------------------------------------------

fn run_insert(
    tx: &Transaction,
    table_name: &str,
    fields: Option<&[Path]>,
    source: &InsertOp,
    cancel: &Cancellation,
) -> Result<()> {
    let mut table = Table::open(tx, table_name)?;
    let mut inserted = 0usize;
    match source {
        InsertOp::Rows(rows) => {
            let fields = fields.ok_or_else(|| {
                Error::Bind("INSERT ... VALUES (...) requires a field list".into())
            })?;
            for row in rows {
                if cancel.is_cancelled() {
                    return Err(Error::Cancelled);
                }
                // Each value expression sees the fields bound before it.
                let mut buf = FieldBuffer::new();
                for (path, expr) in fields.iter().zip(row) {
                    let stack = EvalStack {
                        doc: Some(&buf),
                        ..EvalStack::default()
                    };
                    let value = eval(expr, &stack)?;
                    buf.set(path, value)?;
                }
                table.insert(&buf)?;
                inserted += 1;
            }
        }
        InsertOp::Documents(docs) => {
            for expr in docs {
                if cancel.is_cancelled() {
                    return Err(Error::Cancelled);
                }
                let buf = match eval(expr, &EvalStack::default())? {
                    Value::Document(buf) => buf,
                    other => {
                        return Err(Error::Type(format!(
                            "INSERT VALUES expects documents, got {}",
                            other.type_of()
                        )));
                    }
                };
                table.insert(&buf)?;
                inserted += 1;
            }
        }
        InsertOp::Subquery(sub) => {
            let rows = collect_rows(build_stream(tx, &sub.nodes, cancel)?)?;
            for buf in rows {
                let buf = match fields {
                    // A field list renames the produced values positionally.
                    Some(fields) => rename_row(buf, fields)?,
                    None => buf,
                };
                table.insert(&buf)?;
                inserted += 1;
            }
        }
    }
    log::debug!("inserted {inserted} documents into `{table_name}`");
    Ok(())
}

/// Rebuild a sub-query row under the insert statement's field list: the i-th
/// value goes under `fields[i]`. The width of a wildcard projection is only
/// known here, so arity is rechecked per row.
fn rename_row(doc: FieldBuffer, fields: &[Path]) -> Result<FieldBuffer> {
    if doc.len() != fields.len() {
        return Err(Error::Bind(format!(
            "expected {} values, got {}",
            fields.len(),
            doc.len()
        )));
    }
    let mut out = FieldBuffer::new();
    for (path, (_, value)) in fields.iter().zip(doc.iter()) {
        out.set(path, value.clone())?;
    }
    Ok(out)
}

/// Buffered deletion: rebuild the input stream limited to
/// [`DELETE_BUFFER_SIZE`], collect the keys, delete them, and repeat until a
/// round comes up short.
fn run_delete(
    tx: &Transaction,
    input: &[Node],
    table_name: &str,
    cancel: &Cancellation,
) -> Result<()> {
    let mut total = 0usize;
    loop {
        let mut keys: Vec<Vec<u8>> = Vec::with_capacity(DELETE_BUFFER_SIZE);
        {
            let stream = build_stream(tx, input, cancel)?;
            for item in stream.take(DELETE_BUFFER_SIZE) {
                let row = item?;
                let key = row
                    .key
                    .ok_or_else(|| Error::Bind("cannot delete a document without a key".into()))?;
                keys.push(key);
            }
        }

        let pulled = keys.len();
        let mut table = Table::open(tx, table_name)?;
        for key in keys {
            table.delete(&key)?;
        }
        total += pulled;
        log::trace!("deletion round removed {pulled} documents from `{table_name}`");
        if pulled < DELETE_BUFFER_SIZE {
            break;
        }
    }
    log::debug!("deleted {total} documents from `{table_name}`");
    Ok(())
}

/// Update collects the full set of matching documents before mutating: a
/// rescan-per-round loop could re-match its own updates.
fn run_update(
    tx: &Transaction,
    stream: DocStream<'_>,
    table_name: &str,
    assignments: &[(Path, Expr)],
) -> Result<()> {
    let info = catalog::get_table_info(tx, table_name)?;
    let mut pending: Vec<(Vec<u8>, FieldBuffer)> = Vec::new();
    for item in stream {
        let row = item?;
        let key = row
            .key
            .clone()
            .ok_or_else(|| Error::Bind("cannot update a document without a key".into()))?;
        let mut buf = FieldBuffer::from_document(&row.doc)?;
        for (path, expr) in assignments {
            let stack = EvalStack {
                doc: Some(&buf),
                key: Some(&key),
                info: Some(&info),
            };
            let value = eval(expr, &stack)?;
            buf.set(path, value)?;
        }
        pending.push((key, buf));
    }

    let total = pending.len();
    let mut table = Table::open(tx, table_name)?;
    for (key, buf) in pending {
        table.replace(&key, &buf)?;
    }
    log::debug!("updated {total} documents in `{table_name}`");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::Database;
    use crate::engine::MemoryEngine;

    fn setup() -> Database {
        let db = Database::new(MemoryEngine::new()).unwrap();
        db.exec("CREATE TABLE t", &[]).unwrap();
        db.exec("CREATE INDEX idx_a ON t (a)", &[]).unwrap();
        db.exec("INSERT INTO t VALUES {a: 3}, {a: 1}, {a: 4}, {a: 2}, {a: 5}", &[])
            .unwrap();
        db
    }

    fn a_values(rows: Vec<FieldBuffer>) -> Vec<i64> {
        rows.iter()
            .map(|d| match d.get_field("a") {
                Some(Value::Integer(i)) => *i,
                other => panic!("unexpected field: {other:?}"),
            })
            .collect()
    }

    fn run(db: &Database, nodes: Vec<Node>) -> Vec<FieldBuffer> {
        let tx = db.begin(false).unwrap();
        let stream = build_stream(&tx, &nodes, &Cancellation::new()).unwrap();
        collect_rows(stream).unwrap()
    }

    #[test]
    fn index_scan_walks_ranges_both_ways() {
        let db = setup();

        let forward = run(
            &db,
            vec![Node::IndexScan {
                index: "idx_a".into(),
                range: IndexRange {
                    lower: Some(Value::Integer(2)),
                    lower_inclusive: false,
                    upper: Some(Value::Integer(4)),
                    upper_inclusive: true,
                },
                reverse: false,
            }],
        );
        assert_eq!(a_values(forward), [3, 4]);

        let backward = run(
            &db,
            vec![Node::IndexScan {
                index: "idx_a".into(),
                range: IndexRange {
                    lower: Some(Value::Integer(2)),
                    lower_inclusive: true,
                    upper: Some(Value::Integer(4)),
                    upper_inclusive: false,
                },
                reverse: true,
            }],
        );
        assert_eq!(a_values(backward), [3, 2]);

        let unbounded_backward = run(
            &db,
            vec![Node::IndexScan {
                index: "idx_a".into(),
                range: IndexRange {
                    lower: None,
                    lower_inclusive: false,
                    upper: None,
                    upper_inclusive: false,
                },
                reverse: true,
            }],
        );
        assert_eq!(a_values(unbounded_backward), [5, 4, 3, 2, 1]);
    }

    #[test]
    fn offset_and_limit_compose() {
        let db = setup();
        let rows = run(
            &db,
            vec![
                Node::IndexScan {
                    index: "idx_a".into(),
                    range: IndexRange {
                        lower: None,
                        lower_inclusive: false,
                        upper: None,
                        upper_inclusive: false,
                    },
                    reverse: false,
                },
                Node::Offset { n: 1 },
                Node::Limit { n: 2 },
            ],
        );
        assert_eq!(a_values(rows), [2, 3]);
    }

    #[test]
    fn sort_in_a_writable_transaction_uses_a_scratch_store() {
        let db = setup();
        let tx = db.begin(true).unwrap();
        let result = tx
            .query("SELECT a FROM t ORDER BY a DESC LIMIT 3", &[])
            .unwrap();
        assert_eq!(a_values(result.into_rows()), [5, 4, 3]);

        // The scratch store is gone before commit.
        assert!(!tx
            .engine_tx()
            .store_exists("__quill_sort_0")
            .unwrap());
        tx.commit().unwrap();
    }

    #[test]
    fn deletion_buffer_rounds_cover_the_whole_stream() {
        let db = Database::new(MemoryEngine::new()).unwrap();
        db.exec("CREATE TABLE t", &[]).unwrap();
        let tx = db.begin(true).unwrap();
        for i in 0..(DELETE_BUFFER_SIZE as i64 * 2 + 50) {
            tx.exec("INSERT INTO t VALUES {a: ?}", &[crate::db::Param::new(i)])
                .unwrap();
        }
        tx.commit().unwrap();

        db.exec("DELETE FROM t", &[]).unwrap();
        let left = db.query("SELECT COUNT(*) FROM t", &[]).unwrap();
        assert_eq!(
            left.rows()[0].get_field("COUNT(*)"),
            Some(&Value::Integer(0))
        );
    }
}
