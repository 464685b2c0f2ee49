//! The ordered key-value substrate the database runs on.
//!
//! An [`Engine`] hands out transactions; a transaction groups named
//! [`Store`]s of ordered byte keys. Everything above this module (tables,
//! indexes, the catalog) is written against these traits, so swapping the
//! bundled in-memory engine for an on-disk one is a matter of implementing
//! them.
//!
//! Two substrate limitations shape the callers: iterators are not guaranteed
//! to survive deletions made mid-iteration, and some engines allow a single
//! live iterator per read-write transaction. Mutating code paths therefore
//! collect keys first and mutate afterwards (see the deletion operator).

pub mod memory;

use thiserror::Error;

pub use memory::MemoryEngine;

#[derive(Error, Debug)]
pub enum EngineError {
    #[error("store `{0}` not found")]
    StoreNotFound(String),
    #[error("transaction is read-only")]
    ReadOnly,
    #[error("engine failure: {0}")]
    Other(#[from] anyhow::Error),
}

/// A pull cursor over `(key, value)` pairs. Dropping the cursor terminates
/// the iteration early.
pub type KvCursor = Box<dyn Iterator<Item = Result<(Vec<u8>, Vec<u8>), EngineError>>>;

pub trait Engine: Send + Sync + 'static {
    /// Begin a transaction. At most one writable transaction is live at a
    /// time; `begin(true)` blocks until the previous writer finishes.
    fn begin(&self, writable: bool) -> Result<Box<dyn EngineTx>, EngineError>;
}

pub trait EngineTx {
    /// Fetch a store, creating it if it does not exist. Store handles share
    /// the transaction, so a table store and its index stores can be held at
    /// the same time.
    fn store(&self, name: &str) -> Result<Box<dyn Store + '_>, EngineError>;

    /// Drop a store and its content.
    fn drop_store(&self, name: &str) -> Result<(), EngineError>;

    /// True when the store exists in this transaction's view.
    fn store_exists(&self, name: &str) -> Result<bool, EngineError>;

    fn commit(self: Box<Self>) -> Result<(), EngineError>;

    fn rollback(self: Box<Self>) -> Result<(), EngineError>;
}

pub trait Store {
    fn put(&self, key: &[u8], value: &[u8]) -> Result<(), EngineError>;

    fn get(&self, key: &[u8]) -> Result<Option<Vec<u8>>, EngineError>;

    /// Remove a key. Returns `false` when the key was absent.
    fn delete(&self, key: &[u8]) -> Result<bool, EngineError>;

    /// Walk keys `>= pivot` in ascending order. An empty pivot starts from
    /// the beginning.
    fn ascend_ge(&self, pivot: &[u8]) -> KvCursor;

    /// Walk keys `<= pivot` in descending order. An empty pivot starts from
    /// the end.
    fn descend_le(&self, pivot: &[u8]) -> KvCursor;
}
