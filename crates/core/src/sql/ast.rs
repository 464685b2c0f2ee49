//! Statement-level AST, the parser's output and the compiler's input.

use quill_document::{Path, ValueType};

use crate::sql::expr::Expr;

#[derive(Debug, Clone, PartialEq)]
pub enum Statement {
    CreateTable {
        name: String,
        if_not_exists: bool,
        fields: Vec<FieldDef>,
    },
    CreateIndex {
        name: String,
        if_not_exists: bool,
        table: String,
        path: Path,
        unique: bool,
    },
    DropTable {
        name: String,
        if_exists: bool,
    },
    DropIndex {
        name: String,
        if_exists: bool,
    },
    Insert(InsertStatement),
    Select(SelectStatement),
    Update(UpdateStatement),
    Delete(DeleteStatement),
    ReIndex {
        target: Option<String>,
    },
    Begin,
    Commit,
    Rollback,
}

impl Statement {
    pub fn is_read_only(&self) -> bool {
        matches!(self, Statement::Select(_))
    }
}

/// One `path type? constraint*` entry of a `CREATE TABLE` field list.
#[derive(Debug, Clone, PartialEq)]
pub struct FieldDef {
    pub path: Path,
    pub typ: Option<ValueType>,
    pub not_null: bool,
    pub primary_key: bool,
    pub default: Option<Expr>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct InsertStatement {
    pub table: String,
    pub fields: Option<Vec<Path>>,
    pub source: InsertSource,
}

#[derive(Debug, Clone, PartialEq)]
pub enum InsertSource {
    /// `VALUES (expr, ...), ...` — requires a field list.
    Rows(Vec<Vec<Expr>>),
    /// `VALUES {...}, ...` — document expressions.
    Documents(Vec<Expr>),
    /// `INSERT INTO t SELECT ...`
    Select(Box<SelectStatement>),
}

#[derive(Debug, Clone, PartialEq)]
pub struct SelectStatement {
    pub projections: Vec<Projection>,
    pub table: String,
    pub filter: Option<Expr>,
    pub order_by: Option<OrderBy>,
    pub limit: Option<u64>,
    pub offset: Option<u64>,
}

#[derive(Debug, Clone, PartialEq)]
pub enum Projection {
    Wildcard,
    /// An expression, named after its source text.
    Expr { expr: Expr, name: String },
}

#[derive(Debug, Clone, PartialEq)]
pub struct OrderBy {
    pub path: Path,
    pub descending: bool,
}

#[derive(Debug, Clone, PartialEq)]
pub struct UpdateStatement {
    pub table: String,
    pub assignments: Vec<(Path, Expr)>,
    pub filter: Option<Expr>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct DeleteStatement {
    pub table: String,
    pub filter: Option<Expr>,
}
