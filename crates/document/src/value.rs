use std::cmp::Ordering;
use std::fmt;

use crate::document::FieldBuffer;

/// A typed value stored in a document field.
///
/// The set of variants is closed and each one maps to a single-byte tag in the
/// order-preserving encoding (see [`crate::encoding`]). Comparisons between
/// values of different types follow the tag order, which makes the ordering
/// total: `Null < Bool(false) < Bool(true) < Integer < Double < Text < Blob <
/// Array < Document`.
#[derive(Debug, Clone)]
pub enum Value {
    Null,
    Bool(bool),
    Integer(i64),
    Double(f64),
    Text(String),
    Blob(Vec<u8>),
    Array(Vec<Value>),
    Document(FieldBuffer),
}

/// The type of a [`Value`], used by field constraints and error messages.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ValueType {
    Null,
    Bool,
    Integer,
    Double,
    Text,
    Blob,
    Array,
    Document,
}

impl fmt::Display for ValueType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ValueType::Null => "null",
            ValueType::Bool => "bool",
            ValueType::Integer => "integer",
            ValueType::Double => "double",
            ValueType::Text => "text",
            ValueType::Blob => "blob",
            ValueType::Array => "array",
            ValueType::Document => "document",
        };
        f.write_str(name)
    }
}

impl Value {
    pub fn type_of(&self) -> ValueType {
        match self {
            Value::Null => ValueType::Null,
            Value::Bool(_) => ValueType::Bool,
            Value::Integer(_) => ValueType::Integer,
            Value::Double(_) => ValueType::Double,
            Value::Text(_) => ValueType::Text,
            Value::Blob(_) => ValueType::Blob,
            Value::Array(_) => ValueType::Array,
            Value::Document(_) => ValueType::Document,
        }
    }

    /// The tag driving cross-type ordering. `Bool(false)` and `Bool(true)`
    /// carry distinct tags so the flag is encoded in the tag byte itself.
    pub fn sort_tag(&self) -> u8 {
        match self {
            Value::Null => crate::encoding::TAG_NULL,
            Value::Bool(false) => crate::encoding::TAG_FALSE,
            Value::Bool(true) => crate::encoding::TAG_TRUE,
            Value::Integer(_) => crate::encoding::TAG_INTEGER,
            Value::Double(_) => crate::encoding::TAG_DOUBLE,
            Value::Text(_) => crate::encoding::TAG_TEXT,
            Value::Blob(_) => crate::encoding::TAG_BLOB,
            Value::Array(_) => crate::encoding::TAG_ARRAY,
            Value::Document(_) => crate::encoding::TAG_DOCUMENT,
        }
    }

    /// Losslessly convert to `target`, or `None` when the conversion would
    /// lose information. `Null` converts to anything (nullability is enforced
    /// separately by `NOT NULL` constraints).
    pub fn convert_to(&self, target: ValueType) -> Option<Value> {
        if let Value::Null = self {
            return Some(Value::Null);
        }
        if self.type_of() == target {
            return Some(self.clone());
        }
        match (self, target) {
            (Value::Integer(i), ValueType::Double) => {
                let d = *i as f64;
                (d as i64 == *i).then_some(Value::Double(d))
            }
            (Value::Double(d), ValueType::Integer) => {
                (d.fract() == 0.0 && *d >= i64::MIN as f64 && *d <= i64::MAX as f64)
                    .then_some(Value::Integer(*d as i64))
            }
            _ => None,
        }
    }

    /// Truthiness for `WHERE` filters: a value is truthy when it is not the
    /// zero value of its type. `Null` is never truthy.
    pub fn is_truthy(&self) -> bool {
        match self {
            Value::Null => false,
            Value::Bool(b) => *b,
            Value::Integer(i) => *i != 0,
            Value::Double(d) => *d != 0.0,
            Value::Text(s) => !s.is_empty(),
            Value::Blob(b) => !b.is_empty(),
            Value::Array(a) => !a.is_empty(),
            Value::Document(d) => !d.is_empty(),
        }
    }
}

impl PartialEq for Value {
    fn eq(&self, other: &Self) -> bool {
        self.cmp(other) == Ordering::Equal
    }
}

impl Eq for Value {}

impl PartialOrd for Value {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for Value {
    fn cmp(&self, other: &Self) -> Ordering {
        match self.sort_tag().cmp(&other.sort_tag()) {
            Ordering::Equal => {}
            ord => return ord,
        }
        match (self, other) {
            (Value::Null, Value::Null) => Ordering::Equal,
            (Value::Bool(a), Value::Bool(b)) => a.cmp(b),
            (Value::Integer(a), Value::Integer(b)) => a.cmp(b),
            // Matches the bit-flipping key encoding: -NaN < -inf, +NaN > +inf,
            // and -0.0 < 0.0.
            (Value::Double(a), Value::Double(b)) => a.total_cmp(b),
            (Value::Text(a), Value::Text(b)) => a.as_bytes().cmp(b.as_bytes()),
            (Value::Blob(a), Value::Blob(b)) => a.cmp(b),
            // Length first, then element-wise: the order produced by the
            // count-prefixed encoding.
            (Value::Array(a), Value::Array(b)) => a
                .len()
                .cmp(&b.len())
                .then_with(|| a.iter().cmp(b.iter())),
            (Value::Document(a), Value::Document(b)) => {
                a.len().cmp(&b.len()).then_with(|| {
                    a.iter()
                        .map(|(n, v)| (n.as_str(), v))
                        .cmp(b.iter().map(|(n, v)| (n.as_str(), v)))
                })
            }
            _ => unreachable!("tags were equal"),
        }
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::Null => f.write_str("NULL"),
            Value::Bool(b) => write!(f, "{b}"),
            Value::Integer(i) => write!(f, "{i}"),
            Value::Double(d) => write!(f, "{d}"),
            Value::Text(s) => write!(f, "{s:?}"),
            Value::Blob(b) => {
                f.write_str("x'")?;
                for byte in b {
                    write!(f, "{byte:02x}")?;
                }
                f.write_str("'")
            }
            Value::Array(a) => {
                f.write_str("[")?;
                for (i, v) in a.iter().enumerate() {
                    if i > 0 {
                        f.write_str(", ")?;
                    }
                    write!(f, "{v}")?;
                }
                f.write_str("]")
            }
            Value::Document(d) => {
                f.write_str("{")?;
                for (i, (name, v)) in d.iter().enumerate() {
                    if i > 0 {
                        f.write_str(", ")?;
                    }
                    write!(f, "{name}: {v}")?;
                }
                f.write_str("}")
            }
        }
    }
}

impl From<bool> for Value {
    fn from(b: bool) -> Self {
        Value::Bool(b)
    }
}

impl From<i64> for Value {
    fn from(i: i64) -> Self {
        Value::Integer(i)
    }
}

impl From<f64> for Value {
    fn from(d: f64) -> Self {
        Value::Double(d)
    }
}

impl From<&str> for Value {
    fn from(s: &str) -> Self {
        Value::Text(s.to_owned())
    }
}

impl From<String> for Value {
    fn from(s: String) -> Self {
        Value::Text(s)
    }
}

impl From<Vec<u8>> for Value {
    fn from(b: Vec<u8>) -> Self {
        Value::Blob(b)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cross_type_order_is_total() {
        let samples = [
            Value::Null,
            Value::Bool(false),
            Value::Bool(true),
            Value::Integer(-5),
            Value::Double(0.5),
            Value::Text("a".into()),
            Value::Blob(vec![0x01]),
            Value::Array(vec![Value::Integer(1)]),
            Value::Document(FieldBuffer::default()),
        ];
        for w in samples.windows(2) {
            assert!(w[0] < w[1], "{} < {}", w[0], w[1]);
        }
    }

    #[test]
    fn double_order_handles_signs() {
        assert!(Value::Double(-1.0) < Value::Double(-0.5));
        assert!(Value::Double(-0.0) < Value::Double(0.0));
        assert!(Value::Double(1.5) < Value::Double(f64::INFINITY));
    }

    #[test]
    fn lossless_conversions() {
        assert_eq!(
            Value::Integer(3).convert_to(ValueType::Double),
            Some(Value::Double(3.0))
        );
        assert_eq!(
            Value::Double(2.0).convert_to(ValueType::Integer),
            Some(Value::Integer(2))
        );
        assert_eq!(Value::Double(2.5).convert_to(ValueType::Integer), None);
        assert_eq!(Value::Text("x".into()).convert_to(ValueType::Integer), None);
        assert_eq!(Value::Null.convert_to(ValueType::Text), Some(Value::Null));
    }

    #[test]
    fn truthiness() {
        assert!(!Value::Null.is_truthy());
        assert!(!Value::Integer(0).is_truthy());
        assert!(Value::Integer(-1).is_truthy());
        assert!(!Value::Text(String::new()).is_truthy());
        assert!(Value::Bool(true).is_truthy());
    }
}
