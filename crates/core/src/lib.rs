//! quill: an embeddable document database.
//!
//! SQL-ish statements over schemaless documents, stored in named sub-stores
//! of a pluggable ordered key/value engine, with transactional secondary
//! indexes.
//!
//! ```
//! use quill::{Database, MemoryEngine, Param};
//!
//! # fn main() -> quill::Result<()> {
//! let db = Database::new(MemoryEngine::new())?;
//! db.exec("CREATE TABLE user (id INTEGER PRIMARY KEY, name TEXT)", &[])?;
//! db.exec(
//!     "INSERT INTO user (id, name) VALUES (?, ?)",
//!     &[Param::new(10i64), Param::new("mina")],
//! )?;
//!
//! let result = db.query("SELECT name FROM user WHERE id = 10", &[])?;
//! assert_eq!(result.count(), 1);
//! # Ok(())
//! # }
//! ```

pub mod db;
pub mod engine;
pub mod error;
pub mod sql;

pub use db::{Database, Param, Transaction};
pub use engine::{Engine, EngineError, EngineTx, MemoryEngine, Store};
pub use error::{Error, Result};
pub use sql::execute::{Cancellation, QueryResult};
pub use sql::parser::ParseError;
