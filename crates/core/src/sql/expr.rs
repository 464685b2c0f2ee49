//! Expression AST and evaluator.
//!
//! Expressions are evaluated against an [`EvalStack`]: the current document,
//! its key, and the owning table's info (for `pk()` decoding). Parameters are
//! substituted out of the tree at bind time, so evaluation never sees them.

use std::fmt;

use quill_document::{decode_exact, Document, FieldBuffer, Path, Value};

use crate::db::catalog::TableInfo;
use crate::db::Param;
use crate::error::{Error, Result};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UnaryOperator {
    Neg,
    Not,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BinaryOperator {
    Add,
    Sub,
    Mul,
    Div,
    Mod,
    Eq,
    Neq,
    Lt,
    Lte,
    Gt,
    Gte,
    And,
    Or,
}

impl BinaryOperator {
    pub fn is_comparison(&self) -> bool {
        use BinaryOperator::*;
        matches!(self, Eq | Neq | Lt | Lte | Gt | Gte)
    }
}

impl fmt::Display for BinaryOperator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        use BinaryOperator::*;
        let s = match self {
            Add => "+",
            Sub => "-",
            Mul => "*",
            Div => "/",
            Mod => "%",
            Eq => "=",
            Neq => "!=",
            Lt => "<",
            Lte => "<=",
            Gt => ">",
            Gte => ">=",
            And => "AND",
            Or => "OR",
        };
        f.write_str(s)
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum Function {
    /// The current document's key, decoded.
    Pk,
    /// `COUNT(*)`
    Count,
    Sum(Path),
    Min(Path),
    Max(Path),
    Avg(Path),
}

impl Function {
    pub fn is_aggregate(&self) -> bool {
        !matches!(self, Function::Pk)
    }
}

impl fmt::Display for Function {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Function::Pk => write!(f, "pk()"),
            Function::Count => write!(f, "count(*)"),
            Function::Sum(p) => write!(f, "sum({p})"),
            Function::Min(p) => write!(f, "min({p})"),
            Function::Max(p) => write!(f, "max({p})"),
            Function::Avg(p) => write!(f, "avg({p})"),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum Expr {
    Literal(Value),
    Path(Path),
    /// `?` — index in order of appearance across the input.
    Positional(usize),
    /// `$name`
    Named(String),
    Unary(UnaryOperator, Box<Expr>),
    Binary(Box<Expr>, BinaryOperator, Box<Expr>),
    In(Box<Expr>, Box<Expr>),
    IsNull { expr: Box<Expr>, negated: bool },
    List(Vec<Expr>),
    DocumentLiteral(Vec<(String, Expr)>),
    Call(Function),
}

impl Expr {
    /// Visit every node of the tree, including sub-expressions.
    pub fn walk(&self, visit: &mut dyn FnMut(&Expr)) {
        visit(self);
        match self {
            Expr::Unary(_, e) => e.walk(visit),
            Expr::Binary(l, _, r) => {
                l.walk(visit);
                r.walk(visit);
            }
            Expr::In(l, r) => {
                l.walk(visit);
                r.walk(visit);
            }
            Expr::IsNull { expr, .. } => expr.walk(visit),
            Expr::List(items) => {
                for item in items {
                    item.walk(visit);
                }
            }
            Expr::DocumentLiteral(fields) => {
                for (_, e) in fields {
                    e.walk(visit);
                }
            }
            _ => {}
        }
    }

    pub fn contains_aggregate(&self) -> bool {
        let mut found = false;
        self.walk(&mut |e| {
            if let Expr::Call(f) = e {
                found |= f.is_aggregate();
            }
        });
        found
    }

    /// Replace every parameter placeholder with its bound value. Fails on
    /// missing parameters; mixing `?` and `$name` is checked separately at
    /// statement level.
    pub fn resolve_params(&self, params: &[Param]) -> Result<Expr> {
        Ok(match self {
            Expr::Positional(idx) => {
                let param = params.get(*idx).ok_or_else(|| {
                    Error::Bind(format!(
                        "statement expects at least {} parameters, got {}",
                        idx + 1,
                        params.len()
                    ))
                })?;
                if param.name.is_some() {
                    return Err(Error::Bind(
                        "positional placeholder bound to a named parameter".into(),
                    ));
                }
                Expr::Literal(param.value.clone())
            }
            Expr::Named(name) => {
                let param = params
                    .iter()
                    .find(|p| p.name.as_deref() == Some(name))
                    .ok_or_else(|| Error::Bind(format!("missing named parameter `${name}`")))?;
                Expr::Literal(param.value.clone())
            }
            Expr::Unary(op, e) => Expr::Unary(*op, Box::new(e.resolve_params(params)?)),
            Expr::Binary(l, op, r) => Expr::Binary(
                Box::new(l.resolve_params(params)?),
                *op,
                Box::new(r.resolve_params(params)?),
            ),
            Expr::In(l, r) => Expr::In(
                Box::new(l.resolve_params(params)?),
                Box::new(r.resolve_params(params)?),
            ),
            Expr::IsNull { expr, negated } => Expr::IsNull {
                expr: Box::new(expr.resolve_params(params)?),
                negated: *negated,
            },
            Expr::List(items) => Expr::List(
                items
                    .iter()
                    .map(|e| e.resolve_params(params))
                    .collect::<Result<_>>()?,
            ),
            Expr::DocumentLiteral(fields) => Expr::DocumentLiteral(
                fields
                    .iter()
                    .map(|(n, e)| Ok((n.clone(), e.resolve_params(params)?)))
                    .collect::<Result<_>>()?,
            ),
            other => other.clone(),
        })
    }
}

impl fmt::Display for Expr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Expr::Literal(v) => write!(f, "{v}"),
            Expr::Path(p) => write!(f, "{p}"),
            Expr::Positional(_) => write!(f, "?"),
            Expr::Named(name) => write!(f, "${name}"),
            Expr::Unary(UnaryOperator::Neg, e) => write!(f, "-{e}"),
            Expr::Unary(UnaryOperator::Not, e) => write!(f, "NOT {e}"),
            Expr::Binary(l, op, r) => write!(f, "{l} {op} {r}"),
            Expr::In(l, r) => write!(f, "{l} IN {r}"),
            Expr::IsNull { expr, negated: false } => write!(f, "{expr} IS NULL"),
            Expr::IsNull { expr, negated: true } => write!(f, "{expr} IS NOT NULL"),
            Expr::List(items) => {
                f.write_str("[")?;
                for (i, e) in items.iter().enumerate() {
                    if i > 0 {
                        f.write_str(", ")?;
                    }
                    write!(f, "{e}")?;
                }
                f.write_str("]")
            }
            Expr::DocumentLiteral(fields) => {
                f.write_str("{")?;
                for (i, (n, e)) in fields.iter().enumerate() {
                    if i > 0 {
                        f.write_str(", ")?;
                    }
                    write!(f, "{n}: {e}")?;
                }
                f.write_str("}")
            }
            Expr::Call(func) => write!(f, "{func}"),
        }
    }
}

/// Evaluation context: the current document, its storage key, and the table
/// it came from.
#[derive(Default, Clone, Copy)]
pub struct EvalStack<'a> {
    pub doc: Option<&'a dyn Document>,
    pub key: Option<&'a [u8]>,
    pub info: Option<&'a TableInfo>,
}

pub fn eval(expr: &Expr, stack: &EvalStack<'_>) -> Result<Value> {
    match expr {
        Expr::Literal(v) => Ok(v.clone()),
        Expr::Path(path) => match stack.doc {
            Some(doc) => Ok(doc.get(path)?),
            None => Err(Error::Bind("no document in scope".into())),
        },
        Expr::Positional(_) | Expr::Named(_) => {
            Err(Error::Bind("unresolved parameter in expression".into()))
        }
        Expr::Unary(UnaryOperator::Neg, e) => match eval(e, stack)? {
            Value::Null => Ok(Value::Null),
            Value::Integer(i) => i
                .checked_neg()
                .map(Value::Integer)
                .ok_or_else(|| Error::Type("integer overflow".into())),
            Value::Double(d) => Ok(Value::Double(-d)),
            other => Err(Error::Type(format!("cannot negate a {}", other.type_of()))),
        },
        Expr::Unary(UnaryOperator::Not, e) => Ok(Value::Bool(!eval(e, stack)?.is_truthy())),
        Expr::Binary(l, op, r) => eval_binary(l, *op, r, stack),
        Expr::In(l, r) => {
            let needle = eval(l, stack)?;
            match eval(r, stack)? {
                Value::Array(items) => Ok(Value::Bool(items.contains(&needle))),
                other => Err(Error::Type(format!(
                    "IN expects an array, got {}",
                    other.type_of()
                ))),
            }
        }
        Expr::IsNull { expr, negated } => {
            let is_null = match eval(expr, stack) {
                Ok(Value::Null) => true,
                Ok(_) => false,
                // A missing field reads as null.
                Err(Error::FieldNotFound) => true,
                Err(err) => return Err(err),
            };
            Ok(Value::Bool(is_null != *negated))
        }
        Expr::List(items) => Ok(Value::Array(
            items
                .iter()
                .map(|e| eval(e, stack))
                .collect::<Result<_>>()?,
        )),
        Expr::DocumentLiteral(fields) => {
            // Later fields may refer to earlier ones: `{a: 400, b: a * 4}`.
            let mut buf = FieldBuffer::new();
            for (name, e) in fields {
                let inner = EvalStack {
                    doc: Some(&buf),
                    key: stack.key,
                    info: stack.info,
                };
                let value = eval(e, &inner)?;
                buf.add(name.clone(), value);
            }
            Ok(Value::Document(buf))
        }
        Expr::Call(Function::Pk) => Ok(eval_pk(stack)?),
        Expr::Call(func) => Err(Error::Type(format!(
            "aggregate function {func} outside of a projection"
        ))),
    }
}

/// Decode the current document key: the primary-key value, or the raw
/// big-endian auto key.
fn eval_pk(stack: &EvalStack<'_>) -> Result<Value> {
    let Some(key) = stack.key else {
        return Ok(Value::Null);
    };
    let has_pk = stack.info.is_some_and(|info| info.primary_key().is_some());
    if has_pk {
        return Ok(decode_exact(key)?);
    }
    match <[u8; 8]>::try_from(key) {
        Ok(raw) => Ok(Value::Integer(u64::from_be_bytes(raw) as i64)),
        Err(_) => Ok(Value::Null),
    }
}

fn eval_binary(l: &Expr, op: BinaryOperator, r: &Expr, stack: &EvalStack<'_>) -> Result<Value> {
    use BinaryOperator::*;

    // Boolean operators short-circuit.
    if let And | Or = op {
        let lhs = eval(l, stack)?.is_truthy();
        return Ok(Value::Bool(match op {
            And => lhs && eval(r, stack)?.is_truthy(),
            Or => lhs || eval(r, stack)?.is_truthy(),
            _ => unreachable!(),
        }));
    }

    let lhs = eval(l, stack)?;
    let rhs = eval(r, stack)?;

    if op.is_comparison() {
        // Values of different types compare by tag order, which keeps the
        // comparison total.
        let ord = lhs.cmp(&rhs);
        return Ok(Value::Bool(match op {
            Eq => ord.is_eq(),
            Neq => ord.is_ne(),
            Lt => ord.is_lt(),
            Lte => ord.is_le(),
            Gt => ord.is_gt(),
            Gte => ord.is_ge(),
            _ => unreachable!(),
        }));
    }

    // Arithmetic. Null propagates; Integer and Double mix as Double.
    if let (Value::Null, _) | (_, Value::Null) = (&lhs, &rhs) {
        return Ok(Value::Null);
    }
    match (&lhs, &rhs) {
        (Value::Integer(a), Value::Integer(b)) => {
            let (a, b) = (*a, *b);
            let out = match op {
                Add => a.checked_add(b),
                Sub => a.checked_sub(b),
                Mul => a.checked_mul(b),
                Div => {
                    if b == 0 {
                        return Err(Error::Type("division by zero".into()));
                    }
                    a.checked_div(b)
                }
                Mod => {
                    if b == 0 {
                        return Err(Error::Type("division by zero".into()));
                    }
                    a.checked_rem(b)
                }
                _ => unreachable!(),
            };
            out.map(Value::Integer)
                .ok_or_else(|| Error::Type("integer overflow".into()))
        }
        (Value::Integer(_) | Value::Double(_), Value::Integer(_) | Value::Double(_)) => {
            let a = as_double(&lhs);
            let b = as_double(&rhs);
            Ok(Value::Double(match op {
                Add => a + b,
                Sub => a - b,
                Mul => a * b,
                Div => a / b,
                Mod => a % b,
                _ => unreachable!(),
            }))
        }
        _ => Err(Error::Type(format!(
            "cannot apply `{op}` to {} and {}",
            lhs.type_of(),
            rhs.type_of()
        ))),
    }
}

fn as_double(v: &Value) -> f64 {
    match v {
        Value::Integer(i) => *i as f64,
        Value::Double(d) => *d,
        _ => unreachable!("checked by caller"),
    }
}
