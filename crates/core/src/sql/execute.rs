//! The statement dispatcher: routes parsed statements to the catalog (DDL)
//! or through the planner (DML/queries), inside the caller's transaction.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use quill_document::FieldBuffer;

use crate::db::catalog::{self, FieldConstraint, TableInfo};
use crate::db::{Param, Transaction};
use crate::error::{Error, Result};
use crate::sql::ast::{FieldDef, Statement};
use crate::sql::compiler;
use crate::sql::expr::{eval, EvalStack};
use crate::sql::vm;

/// A cancellation handle checked by the operators on every pull. Cloning
/// shares the flag.
#[derive(Debug, Clone, Default)]
pub struct Cancellation(Arc<AtomicBool>);

impl Cancellation {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::Relaxed);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::Relaxed)
    }
}

/// The materialized result of a statement.
#[derive(Debug, Default, Clone, PartialEq)]
pub struct QueryResult {
    rows: Vec<FieldBuffer>,
}

impl QueryResult {
    pub fn rows(&self) -> &[FieldBuffer] {
        &self.rows
    }

    pub fn iter(&self) -> impl Iterator<Item = &FieldBuffer> {
        self.rows.iter()
    }

    pub fn count(&self) -> usize {
        self.rows.len()
    }

    pub fn into_rows(self) -> Vec<FieldBuffer> {
        self.rows
    }
}

/// Run a sequence of statements; the last statement's result is returned.
pub fn run_statements(
    tx: &Transaction,
    statements: Vec<Statement>,
    params: &[Param],
    cancel: &Cancellation,
) -> Result<QueryResult> {
    let mut result = QueryResult::default();
    for statement in statements {
        result = run_statement(tx, statement, params, cancel)?;
    }
    Ok(result)
}

fn run_statement(
    tx: &Transaction,
    statement: Statement,
    params: &[Param],
    cancel: &Cancellation,
) -> Result<QueryResult> {
    if cancel.is_cancelled() {
        return Err(Error::Cancelled);
    }
    match statement {
        Statement::CreateTable {
            name,
            if_not_exists,
            fields,
        } => {
            let info = TableInfo::new(name.clone(), field_constraints(fields)?);
            match catalog::create_table(tx, &name, info) {
                Err(ref err) if if_not_exists && err.is_already_exists() => {}
                other => other?,
            }
            Ok(QueryResult::default())
        }
        Statement::CreateIndex {
            name,
            if_not_exists,
            table,
            path,
            unique,
        } => {
            match catalog::create_index(tx, &name, &table, path, unique) {
                Err(ref err) if if_not_exists && err.is_already_exists() => {}
                other => other?,
            }
            Ok(QueryResult::default())
        }
        Statement::DropTable { name, if_exists } => {
            match catalog::drop_table(tx, &name) {
                Err(ref err) if if_exists && err.is_not_found() => {}
                other => other?,
            }
            Ok(QueryResult::default())
        }
        Statement::DropIndex { name, if_exists } => {
            match catalog::drop_index(tx, &name) {
                Err(ref err) if if_exists && err.is_not_found() => {}
                other => other?,
            }
            Ok(QueryResult::default())
        }
        Statement::ReIndex { target } => {
            match target {
                Some(name) => catalog::reindex(tx, &name)?,
                None => catalog::reindex_all(tx)?,
            }
            Ok(QueryResult::default())
        }
        Statement::Begin | Statement::Commit | Statement::Rollback => Err(Error::Bind(
            "transaction control statements cannot run inside a statement; \
             use the transaction API"
                .into(),
        )),
        statement => {
            let mut plan = compiler::compile(tx, statement)?;
            compiler::bind(&mut plan, tx, params)?;
            log::trace!("executing plan: {plan}");
            let stream = vm::build_stream(tx, &plan.nodes, cancel)?;
            Ok(QueryResult {
                rows: vm::collect_rows(stream)?,
            })
        }
    }
}

/// `DEFAULT` expressions are constant; they are evaluated once at DDL time.
fn field_constraints(fields: Vec<FieldDef>) -> Result<Vec<FieldConstraint>> {
    fields
        .into_iter()
        .map(|def| {
            let default_value = def
                .default
                .map(|expr| eval(&expr, &EvalStack::default()))
                .transpose()?;
            Ok(FieldConstraint {
                path: def.path,
                typ: def.typ,
                not_null: def.not_null,
                primary_key: def.primary_key,
                default_value,
            })
        })
        .collect()
}
