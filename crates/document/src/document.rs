//! The document protocol and its closed set of implementations.
//!
//! A [`Document`] exposes exactly two capabilities: iterating its top-level
//! fields in order, and resolving a [`Path`] to a value. The engine composes
//! on this trait everywhere (scans yield lazily-decoded documents, projections
//! wrap their source), and user types can implement it to insert their own
//! structs.

use std::fmt;

use thiserror::Error;

use crate::encoding::{self, DecodeError, TAG_DOCUMENT};
use crate::path::{Path, PathSegment};
use crate::value::Value;

#[derive(Error, Debug)]
pub enum Error {
    #[error("field not found")]
    FieldNotFound,
    #[error(transparent)]
    Decode(#[from] DecodeError),
    /// Escape hatch for user adapters and computed documents whose fields can
    /// fail in ways the document layer does not know about.
    #[error(transparent)]
    Other(Box<dyn std::error::Error + Send + Sync>),
}

impl PartialEq for Error {
    fn eq(&self, other: &Self) -> bool {
        match (self, other) {
            (Error::FieldNotFound, Error::FieldNotFound) => true,
            (Error::Decode(a), Error::Decode(b)) => a == b,
            _ => false,
        }
    }
}

pub type FieldIter<'a> = Box<dyn Iterator<Item = Result<(String, Value), Error>> + 'a>;

pub trait Document {
    /// Iterate the top-level fields in insertion order.
    fn iter_fields(&self) -> FieldIter<'_>;

    /// Resolve `path` to a value, or [`Error::FieldNotFound`].
    fn get(&self, path: &Path) -> Result<Value, Error>;
}

/// Resolve the tail of a path inside an already-extracted value.
pub fn get_in_value(value: &Value, segments: &[PathSegment]) -> Result<Value, Error> {
    let Some((seg, rest)) = segments.split_first() else {
        return Ok(value.clone());
    };
    match (value, seg) {
        (Value::Document(doc), PathSegment::Field(name)) => match doc.get_field(name) {
            Some(v) => get_in_value(v, rest),
            None => Err(Error::FieldNotFound),
        },
        (Value::Array(items), PathSegment::Index(idx)) => match items.get(*idx) {
            Some(v) => get_in_value(v, rest),
            None => Err(Error::FieldNotFound),
        },
        _ => Err(Error::FieldNotFound),
    }
}

/// A decoded, mutable document: an insertion-ordered list of fields.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FieldBuffer {
    fields: Vec<(String, Value)>,
}

impl FieldBuffer {
    pub fn new() -> Self {
        Self::default()
    }

    /// Materialize any document into a field buffer, decoding lazily-encoded
    /// sources along the way.
    pub fn from_document(doc: &dyn Document) -> Result<Self, Error> {
        let mut buf = FieldBuffer::new();
        for field in doc.iter_fields() {
            let (name, value) = field?;
            buf.add(name, value);
        }
        Ok(buf)
    }

    /// Append a field. Duplicate names shadow on lookup but are preserved in
    /// iteration order.
    pub fn add(&mut self, name: impl Into<String>, value: Value) {
        self.fields.push((name.into(), value));
    }

    pub fn get_field(&self, name: &str) -> Option<&Value> {
        self.fields.iter().find(|(n, _)| n == name).map(|(_, v)| v)
    }

    /// Set the value at `path`, replacing an existing value or creating the
    /// field (and intermediate documents) when absent. Array elements must
    /// already exist to be assigned.
    pub fn set(&mut self, path: &Path, value: Value) -> Result<(), Error> {
        let segments = path.segments();
        let Some((PathSegment::Field(name), rest)) = segments.split_first()
        else {
            return Err(Error::FieldNotFound);
        };
        match self.fields.iter_mut().find(|(n, _)| n == name) {
            Some((_, slot)) => set_in_value(slot, rest, value),
            None => {
                let mut slot = empty_slot_for(rest);
                set_in_value(&mut slot, rest, value)?;
                self.fields.push((name.clone(), slot));
                Ok(())
            }
        }
    }

    pub fn iter(&self) -> impl Iterator<Item = &(String, Value)> {
        self.fields.iter()
    }

    pub fn len(&self) -> usize {
        self.fields.len()
    }

    pub fn is_empty(&self) -> bool {
        self.fields.is_empty()
    }
}

fn empty_slot_for(rest: &[PathSegment]) -> Value {
    match rest.first() {
        None | Some(PathSegment::Field(_)) => Value::Document(FieldBuffer::new()),
        Some(PathSegment::Index(_)) => Value::Array(Vec::new()),
    }
}

fn set_in_value(slot: &mut Value, segments: &[PathSegment], value: Value) -> Result<(), Error> {
    let Some((seg, rest)) = segments.split_first() else {
        *slot = value;
        return Ok(());
    };
    match seg {
        PathSegment::Field(name) => {
            // Writing below a scalar replaces it with a fresh document.
            if !matches!(slot, Value::Document(_)) {
                *slot = Value::Document(FieldBuffer::new());
            }
            let Value::Document(doc) = slot else { unreachable!() };
            match doc.fields.iter_mut().find(|(n, _)| n == name) {
                Some((_, child)) => set_in_value(child, rest, value),
                None => {
                    let mut child = empty_slot_for(rest);
                    set_in_value(&mut child, rest, value)?;
                    doc.fields.push((name.clone(), child));
                    Ok(())
                }
            }
        }
        PathSegment::Index(idx) => match slot {
            Value::Array(items) => match items.get_mut(*idx) {
                Some(item) => set_in_value(item, rest, value),
                None => Err(Error::FieldNotFound),
            },
            _ => Err(Error::FieldNotFound),
        },
    }
}

impl Document for FieldBuffer {
    fn iter_fields(&self) -> FieldIter<'_> {
        Box::new(self.fields.iter().map(|(n, v)| Ok((n.clone(), v.clone()))))
    }

    fn get(&self, path: &Path) -> Result<Value, Error> {
        let segments = path.segments();
        let Some((PathSegment::Field(name), rest)) = segments.split_first()
        else {
            return Err(Error::FieldNotFound);
        };
        match self.get_field(name) {
            Some(v) => get_in_value(v, rest),
            None => Err(Error::FieldNotFound),
        }
    }
}

impl fmt::Display for FieldBuffer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", Value::Document(self.clone()))
    }
}

impl FromIterator<(String, Value)> for FieldBuffer {
    fn from_iter<T: IntoIterator<Item = (String, Value)>>(iter: T) -> Self {
        FieldBuffer {
            fields: iter.into_iter().collect(),
        }
    }
}

/// A document wrapping its raw encoded bytes; fields decode on demand.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EncodedDocument {
    bytes: Vec<u8>,
}

impl EncodedDocument {
    /// Wrap encoded bytes. The payload is validated lazily, except for the
    /// leading document tag.
    pub fn new(bytes: Vec<u8>) -> Result<Self, DecodeError> {
        match bytes.first() {
            Some(&TAG_DOCUMENT) => Ok(EncodedDocument { bytes }),
            Some(&other) => Err(DecodeError::InvalidTag(other)),
            None => Err(DecodeError::UnexpectedEof),
        }
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.bytes
    }

    pub fn decode(&self) -> Result<FieldBuffer, DecodeError> {
        match encoding::decode_exact(&self.bytes)? {
            Value::Document(doc) => Ok(doc),
            _ => unreachable!("tag checked at construction"),
        }
    }
}

struct EncodedFields<'a> {
    rest: &'a [u8],
    remaining: usize,
    failed: bool,
}

impl Iterator for EncodedFields<'_> {
    type Item = Result<(String, Value), Error>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.failed || self.remaining == 0 {
            return None;
        }
        self.remaining -= 1;
        match encoding::decode_field(&mut self.rest) {
            Ok(field) => Some(Ok(field)),
            Err(err) => {
                self.failed = true;
                Some(Err(err.into()))
            }
        }
    }
}

impl Document for EncodedDocument {
    fn iter_fields(&self) -> FieldIter<'_> {
        // Skip tag and field count; the constructor checked the tag.
        let body = &self.bytes[1..];
        if body.len() < 4 {
            return Box::new(std::iter::once(Err(DecodeError::UnexpectedEof.into())));
        }
        let remaining = u32::from_be_bytes(body[..4].try_into().unwrap()) as usize;
        Box::new(EncodedFields {
            rest: &body[4..],
            remaining,
            failed: false,
        })
    }

    fn get(&self, path: &Path) -> Result<Value, Error> {
        let segments = path.segments();
        let Some((PathSegment::Field(name), rest)) = segments.split_first()
        else {
            return Err(Error::FieldNotFound);
        };
        for field in self.iter_fields() {
            let (n, v) = field?;
            if n == *name {
                return get_in_value(&v, rest);
            }
        }
        Err(Error::FieldNotFound)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::encoding::{encode_to_vec, TAG_INTEGER};

    fn sample() -> FieldBuffer {
        let mut inner = FieldBuffer::new();
        inner.add("b", Value::Text("x".into()));
        let mut doc = FieldBuffer::new();
        doc.add("a", Value::Integer(1));
        doc.add("s", Value::Document(inner));
        doc.add("arr", Value::Array(vec![Value::Integer(10), Value::Integer(20)]));
        doc
    }

    #[test]
    fn get_by_path() {
        let doc = sample();
        assert_eq!(doc.get(&"a".into()), Ok(Value::Integer(1)));
        assert_eq!(doc.get(&"s.b".into()), Ok(Value::Text("x".into())));
        assert_eq!(doc.get(&"arr.1".into()), Ok(Value::Integer(20)));
        assert_eq!(doc.get(&"s.z".into()), Err(Error::FieldNotFound));
        assert_eq!(doc.get(&"a.b".into()), Err(Error::FieldNotFound));
    }

    #[test]
    fn set_creates_intermediate_documents() {
        let mut doc = FieldBuffer::new();
        doc.set(&"a.b.c".into(), Value::Integer(7)).unwrap();
        assert_eq!(doc.get(&"a.b.c".into()), Ok(Value::Integer(7)));

        doc.set(&"a.b.c".into(), Value::Integer(8)).unwrap();
        assert_eq!(doc.get(&"a.b.c".into()), Ok(Value::Integer(8)));

        let mut keyed = sample();
        keyed.set(&"arr.0".into(), Value::Null).unwrap();
        assert_eq!(keyed.get(&"arr.0".into()), Ok(Value::Null));
        assert!(keyed.set(&"arr.9".into(), Value::Null).is_err());
    }

    #[test]
    fn encoded_document_is_lazy_and_ordered() {
        let doc = sample();
        let encoded = EncodedDocument::new(encode_to_vec(&Value::Document(doc.clone()))).unwrap();

        let names: Vec<_> = encoded
            .iter_fields()
            .map(|f| f.unwrap().0)
            .collect();
        assert_eq!(names, ["a", "s", "arr"]);

        assert_eq!(encoded.get(&"s.b".into()), Ok(Value::Text("x".into())));
        assert_eq!(encoded.decode().unwrap(), doc);
    }

    #[test]
    fn encoded_document_rejects_non_document() {
        let err = EncodedDocument::new(encode_to_vec(&Value::Integer(1))).unwrap_err();
        assert_eq!(err, DecodeError::InvalidTag(TAG_INTEGER));
    }
}
