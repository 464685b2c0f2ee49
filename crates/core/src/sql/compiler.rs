//! Turns parsed statements into operator trees and binds them to a
//! transaction: index selection, arity checks, and parameter substitution.

use quill_document::{Path, Value};

use crate::db::catalog::{self, IndexInfo};
use crate::db::{Param, Transaction};
use crate::error::{Error, Result};
use crate::sql::ast::{
    DeleteStatement, InsertSource, InsertStatement, Projection, SelectStatement, Statement,
    UpdateStatement,
};
use crate::sql::expr::{BinaryOperator, Expr};
use crate::sql::plan::{IndexRange, InsertOp, Node, Plan};

/// Compile a DML/query statement. DDL and transaction-control statements
/// never reach the planner.
pub fn compile(tx: &Transaction, stmt: Statement) -> Result<Plan> {
    match stmt {
        Statement::Select(select) => compile_select(tx, select),
        Statement::Insert(insert) => compile_insert(tx, insert),
        Statement::Update(update) => compile_update(tx, update),
        Statement::Delete(delete) => compile_delete(tx, delete),
        other => Err(Error::Bind(format!(
            "statement cannot be planned: {other:?}"
        ))),
    }
}

fn compile_select(tx: &Transaction, select: SelectStatement) -> Result<Plan> {
    let SelectStatement {
        projections,
        table,
        filter,
        order_by,
        limit,
        offset,
    } = select;

    let mut nodes = build_source(tx, &table, filter)?;
    if let Some(order) = order_by {
        nodes.push(Node::Sort {
            path: order.path,
            descending: order.descending,
        });
    }
    if let Some(n) = offset {
        nodes.push(Node::Offset { n });
    }
    if let Some(n) = limit {
        nodes.push(Node::Limit { n });
    }
    nodes.push(Node::Project {
        fields: projections,
    });
    Ok(Plan { nodes })
}

fn compile_insert(tx: &Transaction, insert: InsertStatement) -> Result<Plan> {
    let InsertStatement {
        table,
        fields,
        source,
    } = insert;

    let source = match source {
        InsertSource::Rows(rows) => {
            let Some(fields) = &fields else {
                return Err(Error::Bind(
                    "INSERT ... VALUES (...) requires a field list".into(),
                ));
            };
            for row in &rows {
                if row.len() != fields.len() {
                    return Err(Error::Bind(format!(
                        "expected {} values, got {}",
                        fields.len(),
                        row.len()
                    )));
                }
            }
            InsertOp::Rows(rows)
        }
        InsertSource::Documents(docs) => {
            if fields.is_some() {
                return Err(Error::Bind(
                    "INSERT ... VALUES {...} cannot take a field list".into(),
                ));
            }
            InsertOp::Documents(docs)
        }
        InsertSource::Select(select) => {
            // The sub-query scans while the insertion mutates; reading the
            // target table would feed the stream its own inserts.
            if select.table == table {
                return Err(Error::Bind(format!(
                    "cannot insert into `{table}` while selecting from it"
                )));
            }
            // With an explicit projection the row width is known here; a
            // wildcard is checked against each produced row instead.
            if let Some(fields) = &fields {
                let has_wildcard = select
                    .projections
                    .iter()
                    .any(|p| matches!(p, Projection::Wildcard));
                if !has_wildcard && select.projections.len() != fields.len() {
                    return Err(Error::Bind(format!(
                        "expected {} values, got {}",
                        fields.len(),
                        select.projections.len()
                    )));
                }
            }
            InsertOp::Subquery(compile_select(tx, *select)?)
        }
    };

    Ok(Plan {
        nodes: vec![Node::Insert {
            table,
            fields,
            source,
        }],
    })
}

fn compile_update(tx: &Transaction, update: UpdateStatement) -> Result<Plan> {
    let UpdateStatement {
        table,
        assignments,
        filter,
    } = update;
    let mut nodes = build_source(tx, &table, filter)?;
    nodes.push(Node::Update { table, assignments });
    Ok(Plan { nodes })
}

fn compile_delete(tx: &Transaction, delete: DeleteStatement) -> Result<Plan> {
    let DeleteStatement { table, filter } = delete;
    let mut nodes = build_source(tx, &table, filter)?;
    nodes.push(Node::Delete { table });
    Ok(Plan { nodes })
}

/// Build the source of a pipeline: a table scan, or an index scan when the
/// filter has a top-level `path <op> literal` conjunct over an indexed path.
/// The consumed conjunct is dropped; the rest stays as a filter.
fn build_source(tx: &Transaction, table: &str, filter: Option<Expr>) -> Result<Vec<Node>> {
    let Some(filter) = filter else {
        return Ok(vec![Node::Scan {
            table: table.to_owned(),
        }]);
    };

    let mut conjuncts = Vec::new();
    flatten_ands(filter, &mut conjuncts);

    let indexes = catalog::list_indexes(tx, table)?;
    let mut chosen = None;
    for (at, conjunct) in conjuncts.iter().enumerate() {
        let Some((path, op, value)) = index_candidate(conjunct) else {
            continue;
        };
        // Prefer unique indexes; among non-unique, first declared wins.
        if let Some(index) = indexes
            .iter()
            .filter(|i| i.path == path)
            .min_by_key(|i| (!i.unique, i.seq))
        {
            chosen = Some((at, index.clone(), op, value.clone()));
            break;
        }
    }

    let mut nodes = Vec::new();
    match chosen {
        Some((at, index, op, value)) => {
            log::trace!("using index `{}` for a filter on `{table}`", index.name);
            nodes.push(index_scan_node(index, op, value));
            conjuncts.remove(at);
        }
        None => nodes.push(Node::Scan {
            table: table.to_owned(),
        }),
    }
    if let Some(rest) = conjoin(conjuncts) {
        nodes.push(Node::Filter { expr: rest });
    }
    Ok(nodes)
}

fn index_scan_node(index: IndexInfo, op: BinaryOperator, value: Value) -> Node {
    let range = match op {
        BinaryOperator::Eq => IndexRange::equality(value),
        BinaryOperator::Gt => IndexRange::lower_bound(value, false),
        BinaryOperator::Gte => IndexRange::lower_bound(value, true),
        BinaryOperator::Lt => IndexRange::upper_bound(value, false),
        BinaryOperator::Lte => IndexRange::upper_bound(value, true),
        _ => unreachable!("not an index-compatible comparison"),
    };
    Node::IndexScan {
        index: index.name,
        range,
        reverse: false,
    }
}

/// `path <op> literal` (or flipped) with `op` in `{=, <, <=, >, >=}`.
fn index_candidate(expr: &Expr) -> Option<(Path, BinaryOperator, &Value)> {
    let Expr::Binary(lhs, op, rhs) = expr else {
        return None;
    };
    let flipped = match op {
        BinaryOperator::Eq => BinaryOperator::Eq,
        BinaryOperator::Lt => BinaryOperator::Gt,
        BinaryOperator::Lte => BinaryOperator::Gte,
        BinaryOperator::Gt => BinaryOperator::Lt,
        BinaryOperator::Gte => BinaryOperator::Lte,
        _ => return None,
    };
    match (&**lhs, &**rhs) {
        (Expr::Path(path), Expr::Literal(value)) => Some((path.clone(), *op, value)),
        (Expr::Literal(value), Expr::Path(path)) => Some((path.clone(), flipped, value)),
        _ => None,
    }
}

fn flatten_ands(expr: Expr, out: &mut Vec<Expr>) {
    match expr {
        Expr::Binary(lhs, BinaryOperator::And, rhs) => {
            flatten_ands(*lhs, out);
            flatten_ands(*rhs, out);
        }
        other => out.push(other),
    }
}

fn conjoin(conjuncts: Vec<Expr>) -> Option<Expr> {
    conjuncts.into_iter().reduce(|acc, next| {
        Expr::Binary(Box::new(acc), BinaryOperator::And, Box::new(next))
    })
}

// --- binding ------------------------------------------------------------

/// Resolve catalog references and substitute parameters, once per execution.
/// Reports `Bind` errors before anything runs.
pub fn bind(plan: &mut Plan, tx: &Transaction, params: &[Param]) -> Result<()> {
    check_param_style(plan)?;
    bind_inner(plan, tx, params)
}

fn bind_inner(plan: &mut Plan, tx: &Transaction, params: &[Param]) -> Result<()> {
    for node in &mut plan.nodes {
        match node {
            Node::Scan { table } => check_table(tx, table, false)?,
            Node::IndexScan { index, .. } => {
                catalog::get_index_info(tx, index)?;
            }
            Node::Insert { table, source, .. } => {
                check_table(tx, table, true)?;
                if let InsertOp::Subquery(sub) = source {
                    bind_inner(sub, tx, params)?;
                }
            }
            Node::Delete { table } | Node::Update { table, .. } => check_table(tx, table, true)?,
            _ => {}
        }
        visit_exprs_mut(node, &mut |expr| {
            *expr = expr.resolve_params(params)?;
            Ok(())
        })?;
    }
    Ok(())
}

fn check_table(tx: &Transaction, table: &str, write: bool) -> Result<()> {
    if !catalog::table_exists(tx, table)? {
        return Err(Error::TableNotFound(table.to_owned()));
    }
    if write && catalog::is_reserved_name(table) {
        return Err(Error::ReadOnlyTable(table.to_owned()));
    }
    Ok(())
}

/// Positional and named parameters must not interleave in one statement.
fn check_param_style(plan: &Plan) -> Result<()> {
    let mut positional = false;
    let mut named = false;
    walk_plan_exprs(plan, &mut |expr| {
        expr.walk(&mut |e| match e {
            Expr::Positional(_) => positional = true,
            Expr::Named(_) => named = true,
            _ => {}
        });
    });
    if positional && named {
        return Err(Error::Bind(
            "cannot mix positional and named parameters".into(),
        ));
    }
    Ok(())
}

fn walk_plan_exprs(plan: &Plan, f: &mut impl FnMut(&Expr)) {
    for node in &plan.nodes {
        match node {
            Node::Filter { expr } => f(expr),
            Node::Project { fields } => {
                for field in fields {
                    if let Projection::Expr { expr, .. } = field {
                        f(expr);
                    }
                }
            }
            Node::Insert { source, .. } => match source {
                InsertOp::Rows(rows) => rows.iter().flatten().for_each(&mut *f),
                InsertOp::Documents(docs) => docs.iter().for_each(&mut *f),
                InsertOp::Subquery(sub) => walk_plan_exprs(sub, f),
            },
            Node::Update { assignments, .. } => {
                for (_, expr) in assignments {
                    f(expr);
                }
            }
            _ => {}
        }
    }
}

fn visit_exprs_mut(
    node: &mut Node,
    f: &mut impl FnMut(&mut Expr) -> Result<()>,
) -> Result<()> {
    match node {
        Node::Filter { expr } => f(expr)?,
        Node::Project { fields } => {
            for field in fields {
                if let Projection::Expr { expr, .. } = field {
                    f(expr)?;
                }
            }
        }
        Node::Insert { source, .. } => match source {
            InsertOp::Rows(rows) => {
                for expr in rows.iter_mut().flatten() {
                    f(expr)?;
                }
            }
            InsertOp::Documents(docs) => {
                for expr in docs {
                    f(expr)?;
                }
            }
            // Subquery expressions are bound by the recursive `bind_inner`.
            InsertOp::Subquery(_) => {}
        },
        Node::Update { assignments, .. } => {
            for (_, expr) in assignments {
                f(expr)?;
            }
        }
        _ => {}
    }
    Ok(())
}
