//! The operator tree. A plan is a pipeline of tagged nodes applied in order:
//! the first node produces the document stream, the rest transform or consume
//! it.

use std::fmt;

use itertools::Itertools;
use quill_document::{Path, Value};

use crate::sql::ast::Projection;
use crate::sql::expr::Expr;

#[derive(Debug, Clone, PartialEq)]
pub struct Plan {
    pub nodes: Vec<Node>,
}

#[derive(Debug, Clone, PartialEq)]
pub enum Node {
    Scan {
        table: String,
    },
    IndexScan {
        index: String,
        range: IndexRange,
        reverse: bool,
    },
    Filter {
        expr: Expr,
    },
    Project {
        fields: Vec<Projection>,
    },
    Sort {
        path: Path,
        descending: bool,
    },
    Offset {
        n: u64,
    },
    Limit {
        n: u64,
    },
    Insert {
        table: String,
        fields: Option<Vec<Path>>,
        source: InsertOp,
    },
    Delete {
        table: String,
    },
    Update {
        table: String,
        assignments: Vec<(Path, Expr)>,
    },
}

#[derive(Debug, Clone, PartialEq)]
pub enum InsertOp {
    Rows(Vec<Vec<Expr>>),
    Documents(Vec<Expr>),
    Subquery(Plan),
}

/// A range over the indexed value, both ends optional.
#[derive(Debug, Clone, PartialEq)]
pub struct IndexRange {
    pub lower: Option<Value>,
    pub lower_inclusive: bool,
    pub upper: Option<Value>,
    pub upper_inclusive: bool,
}

impl IndexRange {
    pub fn equality(value: Value) -> Self {
        IndexRange {
            lower: Some(value.clone()),
            lower_inclusive: true,
            upper: Some(value),
            upper_inclusive: true,
        }
    }

    pub fn lower_bound(value: Value, inclusive: bool) -> Self {
        IndexRange {
            lower: Some(value),
            lower_inclusive: inclusive,
            upper: None,
            upper_inclusive: false,
        }
    }

    pub fn upper_bound(value: Value, inclusive: bool) -> Self {
        IndexRange {
            lower: None,
            lower_inclusive: false,
            upper: Some(value),
            upper_inclusive: inclusive,
        }
    }
}

impl fmt::Display for IndexRange {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.lower {
            Some(v) => write!(f, "{}{v}", if self.lower_inclusive { "[" } else { "(" })?,
            None => f.write_str("(*")?,
        }
        f.write_str(", ")?;
        match &self.upper {
            Some(v) => write!(f, "{v}{}", if self.upper_inclusive { "]" } else { ")" }),
            None => f.write_str("*)"),
        }
    }
}

impl fmt::Display for Node {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Node::Scan { table } => write!(f, "scan({table})"),
            Node::IndexScan {
                index,
                range,
                reverse,
            } => {
                write!(f, "iscan({index}, {range}")?;
                if *reverse {
                    f.write_str(", reverse")?;
                }
                f.write_str(")")
            }
            Node::Filter { expr } => write!(f, "filter({expr})"),
            Node::Project { fields } => {
                let names = fields
                    .iter()
                    .map(|p| match p {
                        Projection::Wildcard => "*".to_owned(),
                        Projection::Expr { name, .. } => name.clone(),
                    })
                    .join(", ");
                write!(f, "project({names})")
            }
            Node::Sort { path, descending } => {
                write!(f, "sort({path}{})", if *descending { " desc" } else { "" })
            }
            Node::Offset { n } => write!(f, "offset({n})"),
            Node::Limit { n } => write!(f, "limit({n})"),
            Node::Insert { table, .. } => write!(f, "insert({table})"),
            Node::Delete { table } => write!(f, "delete({table})"),
            Node::Update { table, .. } => write!(f, "update({table})"),
        }
    }
}

impl fmt::Display for Plan {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.nodes.iter().map(ToString::to_string).join(" | "))
    }
}
