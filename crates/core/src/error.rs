use thiserror::Error;

use crate::engine::EngineError;
use crate::sql::parser::ParseError;

/// All the ways a statement can fail. The variants are stable identities:
/// callers branch on them (`is_not_found`, `DuplicateDocument`, ...) for
/// control flow, so new failure modes extend existing variants rather than
/// invent new ones.
#[derive(Error, Debug)]
pub enum Error {
    #[error("table `{0}` not found")]
    TableNotFound(String),
    #[error("index `{0}` not found")]
    IndexNotFound(String),
    #[error("document not found")]
    DocumentNotFound,
    #[error("field not found")]
    FieldNotFound,
    #[error("table `{0}` already exists")]
    TableAlreadyExists(String),
    #[error("index `{0}` already exists")]
    IndexAlreadyExists(String),
    #[error("duplicate document")]
    DuplicateDocument,
    #[error("table `{0}` is read-only")]
    ReadOnlyTable(String),
    #[error("constraint violation: {0}")]
    ConstraintViolation(String),
    #[error(transparent)]
    Parse(#[from] ParseError),
    #[error("bind error: {0}")]
    Bind(String),
    #[error("type error: {0}")]
    Type(String),
    #[error("query cancelled")]
    Cancelled,
    #[error(transparent)]
    Engine(#[from] EngineError),
    #[error("corrupted payload: {0}")]
    Decode(#[from] quill_document::DecodeError),
}

impl Error {
    pub fn is_not_found(&self) -> bool {
        matches!(
            self,
            Error::TableNotFound(_)
                | Error::IndexNotFound(_)
                | Error::DocumentNotFound
                | Error::FieldNotFound
        )
    }

    pub fn is_already_exists(&self) -> bool {
        matches!(
            self,
            Error::TableAlreadyExists(_) | Error::IndexAlreadyExists(_)
        )
    }
}

impl From<quill_document::Error> for Error {
    fn from(err: quill_document::Error) -> Self {
        match err {
            quill_document::Error::FieldNotFound => Error::FieldNotFound,
            quill_document::Error::Decode(e) => Error::Decode(e),
            quill_document::Error::Other(e) => match e.downcast::<Error>() {
                Ok(inner) => *inner,
                Err(e) => Error::Engine(EngineError::Other(anyhow::anyhow!("{e}"))),
            },
        }
    }
}

pub type Result<T, E = Error> = std::result::Result<T, E>;
