//! Structural errors.
//!
//! Validation failures are data (`FieldError` lists written into cells) and
//! never show up here. Everything in [`FormError`] is caller misuse or an
//! invariant violation and is propagated with `?`.

use crate::ids::{FormId, RowId};

#[derive(Debug, thiserror::Error, PartialEq)]
pub enum FormError {
    #[error("form \"{0}\" is not registered in this store")]
    UnknownForm(FormId),

    #[error(
        "\"{name}\" is a regular field but has been specified as a nested field array; \
         check the field type declared in the parent field array"
    )]
    NotAFieldArray { name: String },

    #[error("field array \"{name}\" has no row at index {index} (row count {len})")]
    RowIndexOutOfRange {
        name: String,
        index: usize,
        len: usize,
    },

    #[error("row {row_id} is not a member of field array \"{name}\"")]
    UnknownRow { name: String, row_id: RowId },

    #[error("field array \"{name}\" expects an array value")]
    ExpectedArray { name: String },

    #[error("JSON error: {0}")]
    Json(String),
}

impl From<serde_json::Error> for FormError {
    fn from(err: serde_json::Error) -> Self {
        FormError::Json(err.to_string())
    }
}
