//! Field and field-array state engine for nested, dynamically structured forms.
//!
//! Every field and every field array of a form owns one independently
//! addressable cell in a [`CellStore`]. Form-level values are aggregated
//! from the cells on demand, array rows are identified by stable [`RowId`]s,
//! and an initial-values version gates when cells re-seed.

use wasm_bindgen::prelude::*;

pub mod aggregate;
pub mod cell;
pub mod context;
pub mod error;
pub mod field;
pub mod field_array;
pub mod form;
pub mod ids;
pub mod intern;
pub mod mutation;
pub mod path;
mod rev_index;
pub mod store;
pub mod value;
pub mod wasm_api;
pub mod watch;

pub use cell::{
    Ancestor, ArrayValidator, CellKey, FieldArrayCell, FieldCell, FieldDecl, FieldError,
    FieldKind, FieldRef, FieldValidator, FormValues,
};
pub use context::{FieldValue, FieldValueUpdate, FormContext};
pub use error::FormError;
pub use field::{FieldBinding, FieldProps};
pub use field_array::{ArrayValidation, FieldArrayBinding, FieldArrayProps};
pub use form::{
    FormController, FormProps, PendingSubmit, SettledSubmit, SubmitEvent, SubmitOutcome,
    SubmitRejected, SubmitReply, ValidateTarget,
};
pub use ids::{FormId, RowId, RowIndex};
pub use store::{CellRead, CellStore, FormSettings, InitialValues, ProviderOptions, WatchKey};
pub use watch::{ColumnWatch, FieldWatch};

/// Returns the WASM module version string.
#[wasm_bindgen]
pub fn version() -> String {
    env!("CARGO_PKG_VERSION").to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_version() {
        assert_eq!(version(), "0.1.0");
    }
}
