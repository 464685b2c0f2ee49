//! The database front door: open over an engine, begin transactions, run
//! statements.

pub mod catalog;
pub mod index;
pub mod table;

use std::cell::Cell;
use std::sync::Arc;

use quill_document::Value;

use crate::engine::{Engine, EngineTx};
use crate::error::Result;
use crate::sql::execute::{self, Cancellation, QueryResult};
use crate::sql::parser;

pub use table::Table;

/// A parameter bound to a statement: positional (`?`) or named (`$name`).
/// The two forms cannot be mixed within one statement.
#[derive(Debug, Clone)]
pub struct Param {
    pub(crate) name: Option<String>,
    pub(crate) value: Value,
}

impl Param {
    pub fn new(value: impl Into<Value>) -> Self {
        Param {
            name: None,
            value: value.into(),
        }
    }

    pub fn named(name: impl Into<String>, value: impl Into<Value>) -> Self {
        Param {
            name: Some(name.into()),
            value: value.into(),
        }
    }
}

pub struct Database {
    engine: Arc<dyn Engine>,
}

impl Database {
    /// Open a database over `engine`, bootstrapping the catalog stores.
    pub fn new(engine: impl Engine) -> Result<Self> {
        let db = Database {
            engine: Arc::new(engine),
        };
        let tx = db.begin(true)?;
        tx.engine_tx().store(catalog::TABLES_STORE)?;
        tx.engine_tx().store(catalog::INDEXES_STORE)?;
        tx.commit()?;
        Ok(db)
    }

    pub fn begin(&self, writable: bool) -> Result<Transaction> {
        Ok(Transaction {
            tx: self.engine.begin(writable)?,
            writable,
            temp_seq: Cell::new(0),
        })
    }

    /// Run statements inside their own transaction and discard the result.
    pub fn exec(&self, sql: &str, params: &[Param]) -> Result<()> {
        self.run(sql, params, &Cancellation::new()).map(|_| ())
    }

    /// Run statements inside their own transaction; the result of the last
    /// statement is returned, earlier ones are drained.
    pub fn query(&self, sql: &str, params: &[Param]) -> Result<QueryResult> {
        self.run(sql, params, &Cancellation::new())
    }

    pub fn query_with(
        &self,
        sql: &str,
        params: &[Param],
        cancel: &Cancellation,
    ) -> Result<QueryResult> {
        self.run(sql, params, cancel)
    }

    fn run(&self, sql: &str, params: &[Param], cancel: &Cancellation) -> Result<QueryResult> {
        let statements = parser::parse(sql)?;
        let writable = statements.iter().any(|s| !s.is_read_only());
        let tx = self.begin(writable)?;
        match execute::run_statements(&tx, statements, params, cancel) {
            Ok(result) => {
                tx.commit()?;
                Ok(result)
            }
            Err(err) => {
                log::debug!("statement failed, rolling back: {err}");
                let _ = tx.rollback();
                Err(err)
            }
        }
    }
}

/// A transaction over the engine. Dropping it without committing rolls it
/// back.
pub struct Transaction {
    tx: Box<dyn EngineTx>,
    writable: bool,
    temp_seq: Cell<u64>,
}

impl Transaction {
    pub(crate) fn engine_tx(&self) -> &dyn EngineTx {
        &*self.tx
    }

    pub fn writable(&self) -> bool {
        self.writable
    }

    /// A fresh reserved store name for transaction-scoped scratch space
    /// (sort materialization).
    pub(crate) fn next_temp_store(&self) -> String {
        let n = self.temp_seq.get();
        self.temp_seq.set(n + 1);
        format!("{}_sort_{n}", catalog::RESERVED_PREFIX)
    }

    pub fn get_table(&self, name: &str) -> Result<Table<'_>> {
        Table::open(self, name)
    }

    pub fn exec(&self, sql: &str, params: &[Param]) -> Result<()> {
        self.query(sql, params).map(|_| ())
    }

    pub fn query(&self, sql: &str, params: &[Param]) -> Result<QueryResult> {
        self.query_with(sql, params, &Cancellation::new())
    }

    pub fn query_with(
        &self,
        sql: &str,
        params: &[Param],
        cancel: &Cancellation,
    ) -> Result<QueryResult> {
        let statements = parser::parse(sql)?;
        execute::run_statements(self, statements, params, cancel)
    }

    pub fn commit(self) -> Result<()> {
        let Transaction { tx, .. } = self;
        tx.commit()?;
        Ok(())
    }

    pub fn rollback(self) -> Result<()> {
        let Transaction { tx, .. } = self;
        tx.rollback()?;
        Ok(())
    }
}
