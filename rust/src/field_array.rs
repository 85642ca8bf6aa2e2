//! Field-array binding: owns the row list of one (possibly nested) array.
//!
//! Row fields are not bound here; they are cells addressed through the
//! array's row ids and written by the mutations in [`crate::mutation`].

use crate::aggregate::{
    compute_field_array_data, initial_top_level, write_back_errors, ValidationMode,
};
use crate::cell::{
    non_empty, Ancestor, ArrayValidator, CellKey, FieldArrayCell, FieldDecl, FieldError,
};
use crate::error::FormError;
use crate::ids::{FormId, RowId, RowIndex};
use crate::mutation;
use crate::store::{CellRead, CellStore};
use serde::Serialize;
use serde_json::Value;
use std::rc::Rc;
use ts_rs::TS;

#[derive(Clone, Default)]
pub struct FieldArrayProps {
    pub name: String,
    pub ancestors: Vec<Ancestor>,
    pub field_names: Vec<FieldDecl>,
    pub validate: Option<ArrayValidator>,
    pub skip_unregister: bool,
    /// Seed for a top-level array whose name is absent from the initial values.
    pub default_value: Option<Value>,
}

impl FieldArrayProps {
    pub fn new<D: Into<FieldDecl>>(
        name: impl Into<String>,
        field_names: impl IntoIterator<Item = D>,
    ) -> Self {
        Self {
            name: name.into(),
            field_names: field_names.into_iter().map(Into::into).collect(),
            ..Default::default()
        }
    }

    pub fn within(mut self, ancestors: Vec<Ancestor>) -> Self {
        self.ancestors = ancestors;
        self
    }

    pub fn validate(mut self, validate: impl Fn(&[Value]) -> Option<String> + 'static) -> Self {
        self.validate = Some(Rc::new(validate));
        self
    }

    pub fn skip_unregister(mut self) -> Self {
        self.skip_unregister = true;
        self
    }

    pub fn default_value(mut self, value: Value) -> Self {
        self.default_value = Some(value);
        self
    }

    fn same_metadata(&self, cell: &FieldArrayCell) -> bool {
        let same_validator = match (&cell.validate, &self.validate) {
            (Some(a), Some(b)) => Rc::ptr_eq(a, b),
            (None, None) => true,
            _ => false,
        };
        same_validator
            && cell.field_names == self.field_names
            && cell.skip_unregister == self.skip_unregister
    }
}

/// Result of an explicit whole-array validation.
#[derive(Debug, Clone, PartialEq, Serialize, TS)]
#[serde(rename_all = "camelCase")]
pub struct ArrayValidation {
    pub errors: Vec<FieldError>,
    pub is_valid: bool,
}

pub struct FieldArrayBinding {
    form_id: FormId,
    key: CellKey,
    props: FieldArrayProps,
    /// Rows the validator last saw.
    observed: Option<Vec<Value>>,
}

impl FieldArrayBinding {
    /// Bind without touching the store. Call [`sync`](Self::sync) to seed.
    pub fn attach(form_id: &FormId, props: FieldArrayProps) -> Self {
        Self {
            form_id: form_id.clone(),
            key: CellKey::new(props.name.clone(), props.ancestors.clone()),
            props,
            observed: None,
        }
    }

    pub fn mount(
        store: &mut CellStore,
        form_id: &FormId,
        props: FieldArrayProps,
    ) -> Result<Self, FormError> {
        let mut binding = Self::attach(form_id, props);
        binding.sync(store)?;
        tracing::debug!(form = %form_id, field_array = %binding.key, "field array mounted");
        Ok(binding)
    }

    pub fn key(&self) -> &CellKey {
        &self.key
    }

    pub fn sync(&mut self, store: &mut CellStore) -> Result<(), FormError> {
        // the validator never sees the rows it was initialised with
        if self.seed(store)? || self.observed.is_none() {
            self.observed = Some(self.get_value(store)?);
        }
        self.revalidate(store)
    }

    /// Returns whether the array was (re-)initialised.
    fn seed(&self, store: &mut CellStore) -> Result<bool, FormError> {
        let key = &self.key;
        let props = &self.props;
        store.transaction(&self.form_id, |tx| {
            let version = tx.initial_values().version;
            let cell = tx.field_array(key);
            if cell.map_or(0, |cell| cell.init_ver) >= version {
                if !cell.is_some_and(|cell| props.same_metadata(cell)) {
                    tx.update_field_array(key, |cell| {
                        cell.field_names = props.field_names.clone();
                        cell.validate = props.validate.clone();
                        cell.skip_unregister = props.skip_unregister;
                    });
                }
                return Ok(false);
            }

            tx.update_field_array(key, |cell| {
                cell.field_names = props.field_names.clone();
                cell.validate = props.validate.clone();
                cell.skip_unregister = props.skip_unregister;
                cell.init_ver = version;
            });
            if !key.is_top_level() {
                // rows of nested arrays arrive with their parent's row data
                return Ok(true);
            }
            let (initial, extra) = initial_top_level(&*tx, &key.name);
            match initial.or_else(|| props.default_value.clone()) {
                Some(Value::Array(rows)) if !rows.is_empty() => {
                    let extras = extra.as_ref().and_then(Value::as_array);
                    mutation::set_whole(
                        tx,
                        key,
                        &props.field_names,
                        &rows,
                        extras.map(Vec::as_slice),
                        Some(version),
                    )?;
                }
                None | Some(Value::Null) | Some(Value::Array(_)) => {}
                Some(_) => {
                    return Err(FormError::ExpectedArray {
                        name: key.name.clone(),
                    })
                }
            }
            Ok(true)
        })
    }

    fn revalidate(&mut self, store: &mut CellStore) -> Result<(), FormError> {
        let Some(validate) = self.props.validate.clone() else {
            return Ok(());
        };
        let (rows, stored_error) = {
            let view = store.view(&self.form_id)?;
            let Some(cell) = view.field_array(&self.key) else {
                return Ok(());
            };
            if cell.init_ver == 0 {
                return Ok(());
            }
            let stored_error = cell.error.clone();
            let rows = compute_field_array_data(
                &view,
                &self.key,
                &self.props.field_names,
                ValidationMode::Off,
            )?;
            (rows.data, stored_error)
        };
        if self
            .observed
            .as_ref()
            .is_some_and(|prev| same_rows(prev, &rows))
        {
            return Ok(());
        }

        let error = non_empty(validate(&rows));
        self.observed = Some(rows);
        if error != stored_error {
            let key = &self.key;
            store.transaction(&self.form_id, |tx| {
                tx.update_field_array(key, |cell| cell.error = error);
                Ok(())
            })?;
        }
        Ok(())
    }

    // -----------------------------------------------------------------------
    // Operations
    // -----------------------------------------------------------------------

    /// Append `max(rows.len(), 1)` rows.
    pub fn append(&self, store: &mut CellStore, rows: &[Value]) -> Result<Vec<RowId>, FormError> {
        let key = &self.key;
        store.transaction(&self.form_id, |tx| {
            mutation::insert_rows(tx, key, None, rows, None)
        })
    }

    /// Insert rows before `index`; an index past the end appends.
    pub fn insert(
        &self,
        store: &mut CellStore,
        index: RowIndex,
        rows: &[Value],
    ) -> Result<Vec<RowId>, FormError> {
        let key = &self.key;
        store.transaction(&self.form_id, |tx| {
            mutation::insert_rows(tx, key, Some(index), rows, None)
        })
    }

    pub fn remove(&self, store: &mut CellStore, index: RowIndex) -> Result<RowId, FormError> {
        let key = &self.key;
        store.transaction(&self.form_id, |tx| mutation::remove_row(tx, key, index))
    }

    pub fn remove_all(&self, store: &mut CellStore) -> Result<(), FormError> {
        let key = &self.key;
        store.transaction(&self.form_id, |tx| {
            mutation::remove_all_rows(tx, key);
            Ok(())
        })
    }

    /// Replace all rows, keeping row ids where the length allows.
    pub fn set_value(&self, store: &mut CellStore, rows: &[Value]) -> Result<(), FormError> {
        self.write_rows(store, rows, None)
    }

    pub fn set_value_with_extra(
        &self,
        store: &mut CellStore,
        rows: &[Value],
        extras: &[Value],
    ) -> Result<(), FormError> {
        self.write_rows(store, rows, Some(extras))
    }

    fn write_rows(
        &self,
        store: &mut CellStore,
        rows: &[Value],
        extras: Option<&[Value]>,
    ) -> Result<(), FormError> {
        let key = &self.key;
        let declared = &self.props.field_names;
        store.transaction(&self.form_id, |tx| {
            mutation::set_whole(tx, key, declared, rows, extras, None)
        })
    }

    pub fn get_value(&self, store: &CellStore) -> Result<Vec<Value>, FormError> {
        let view = store.view(&self.form_id)?;
        let rows = compute_field_array_data(
            &view,
            &self.key,
            &self.props.field_names,
            ValidationMode::Off,
        )?;
        Ok(rows.data)
    }

    /// Run every validator in the array's subtree and persist the failures.
    pub fn validate(&self, store: &mut CellStore) -> Result<ArrayValidation, FormError> {
        let key = &self.key;
        let declared = &self.props.field_names;
        let errors = store.transaction(&self.form_id, |tx| {
            let found = compute_field_array_data(&*tx, key, declared, ValidationMode::Full)?;
            write_back_errors(tx, &found.errors);
            Ok(found.errors)
        })?;
        Ok(ArrayValidation {
            is_valid: errors.is_empty(),
            errors,
        })
    }

    pub fn error(&self, store: &CellStore) -> Option<String> {
        let view = store.view(&self.form_id).ok()?;
        view.field_array(&self.key)?.error.clone()
    }

    pub fn row_ids(&self, store: &CellStore) -> Vec<RowId> {
        store
            .view(&self.form_id)
            .ok()
            .and_then(|view| view.field_array(&self.key).map(|cell| cell.row_ids.clone()))
            .unwrap_or_default()
    }

    /// Ancestors for a field inside the row `row_id` of this array.
    pub fn row_ancestors(&self, row_id: RowId) -> Vec<Ancestor> {
        self.key.row_ancestors(row_id)
    }

    /// Reset the array and its rows unless this array, the form, or any
    /// enclosing array opted out of unregistering.
    pub fn unmount(self, store: &mut CellStore) -> Result<(), FormError> {
        if !store.has_form(&self.form_id) {
            return Ok(());
        }
        let skip_global = store.initial_values(&self.form_id)?.settings.skip_unregister;
        let key = &self.key;
        let props = &self.props;
        let reset = store.transaction(&self.form_id, |tx| {
            for depth in (0..key.ancestors.len()).rev() {
                let parent = CellKey::new(
                    key.ancestors[depth].name.clone(),
                    key.ancestors[..depth].to_vec(),
                );
                if tx.field_array(&parent).is_some_and(|cell| cell.skip_unregister) {
                    return Ok(false);
                }
            }
            if props.skip_unregister || skip_global {
                return Ok(false);
            }
            mutation::reset_field_array(tx, key, &props.field_names);
            Ok(true)
        })?;
        if reset {
            tracing::debug!(form = %self.form_id, field_array = %key, "field array unregistered");
        }
        Ok(())
    }
}

fn same_rows(a: &[Value], b: &[Value]) -> bool {
    a.len() == b.len()
        && a.iter()
            .zip(b)
            .all(|(a, b)| crate::value::deep_equal(a, b))
}
