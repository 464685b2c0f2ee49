//! Document model for quill: typed values, dotted field paths, the document
//! protocol, and the order-preserving byte encoding used for keys, index
//! entries and row payloads.

pub mod document;
pub mod encoding;
pub mod path;
pub mod value;

pub use document::{get_in_value, Document, EncodedDocument, Error, FieldBuffer, FieldIter};
pub use encoding::{decode_exact, decode_value, encode_to_vec, encode_value, DecodeError};
pub use path::{Path, PathSegment};
pub use value::{Value, ValueType};
