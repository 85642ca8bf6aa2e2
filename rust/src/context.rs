//! Imperative access to a form from anywhere that knows its id.

use crate::aggregate::{compute_field_array_data, compute_form_values, full_object_path, ValidationMode};
use crate::cell::{CellKey, FieldKind, FieldRef, FormValues};
use crate::error::FormError;
use crate::form::establish_initial_values;
use crate::ids::FormId;
use crate::mutation;
use crate::path::get_segments;
use crate::store::{CellRead, CellStore, InitialValues};
use crate::value::deep_equal;
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Value plus extra info of one field or field array. Absent means undefined.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FieldValue {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub value: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub extra_info: Option<Value>,
}

/// One entry of a batched top-level write.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FieldValueUpdate {
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub value: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub extra_info: Option<Value>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FormContext {
    form_id: FormId,
}

impl FormContext {
    pub fn new(form_id: FormId) -> Self {
        Self { form_id }
    }

    pub fn form_id(&self) -> &FormId {
        &self.form_id
    }

    /// Read a field or field array. An unseeded top-level field reads
    /// through to the initial values.
    pub fn get_value(&self, store: &CellStore, field_ref: &FieldRef) -> Result<FieldValue, FormError> {
        let view = store.view(&self.form_id)?;
        let key = field_ref.key();
        match field_ref.kind {
            FieldKind::Field => {
                let cell = view.field(&key);
                let mut out = FieldValue {
                    value: cell.and_then(|cell| cell.data.clone()),
                    extra_info: cell.and_then(|cell| cell.extra_info.clone()),
                };
                let init_ver = cell.map_or(0, |cell| cell.init_ver);
                let initial = view.initial_values();
                if key.is_top_level() && out.value.is_none() && init_ver < initial.version {
                    let segments = full_object_path(&view, &key)?;
                    out.value = get_segments(&initial.values, &segments).cloned();
                    out.extra_info = get_segments(&initial.extra_infos, &segments).cloned();
                }
                Ok(out)
            }
            FieldKind::FieldArray => {
                let rows = compute_field_array_data(&view, &key, &[], ValidationMode::Off)?;
                Ok(FieldValue {
                    value: Some(Value::Array(rows.data)),
                    extra_info: Some(Value::Array(rows.extra_info)),
                })
            }
        }
    }

    /// Write a field or replace a field array's rows. An undefined part
    /// leaves the stored one alone.
    pub fn set_value(
        &self,
        store: &mut CellStore,
        field_ref: &FieldRef,
        update: FieldValue,
    ) -> Result<(), FormError> {
        let key = field_ref.key();
        store.transaction(&self.form_id, |tx| match field_ref.kind {
            FieldKind::Field => {
                let version = tx.initial_values().version;
                tx.update_field(&key, |cell| merge_update(cell, update, version));
                Ok(())
            }
            FieldKind::FieldArray => {
                let rows = as_rows(&key, update.value.as_ref())?;
                let extras = update.extra_info.as_ref().and_then(Value::as_array);
                mutation::set_whole(tx, &key, &[], rows, extras.map(Vec::as_slice), None)
            }
        })
    }

    /// Write several top-level fields in one transaction.
    pub fn set_field_values(
        &self,
        store: &mut CellStore,
        updates: Vec<FieldValueUpdate>,
    ) -> Result<(), FormError> {
        store.transaction(&self.form_id, |tx| {
            let version = tx.initial_values().version;
            for update in updates {
                let key = CellKey::top_level(update.name);
                let update = FieldValue {
                    value: update.value,
                    extra_info: update.extra_info,
                };
                tx.update_field(&key, |cell| merge_update(cell, update, version));
            }
            Ok(())
        })
    }

    /// Reset the cells of the given fields.
    pub fn remove_fields(&self, store: &mut CellStore, refs: &[FieldRef]) -> Result<(), FormError> {
        store.transaction(&self.form_id, |tx| {
            for field_ref in refs {
                tx.reset_field(&field_ref.key());
            }
            Ok(())
        })
    }

    pub fn get_values(&self, store: &CellStore) -> Result<FormValues, FormError> {
        Ok(compute_form_values(&store.view(&self.form_id)?))
    }

    pub fn get_initial_values(&self, store: &CellStore) -> Result<InitialValues, FormError> {
        store.initial_values(&self.form_id).cloned()
    }

    /// Snapshot kept current by the values observer.
    pub fn live_values(&self, store: &CellStore) -> Result<FormValues, FormError> {
        store.live_values(&self.form_id).cloned()
    }

    /// Whether the aggregated values differ from the initial values.
    /// `pre_compare` may normalise the aggregate before comparing.
    pub fn is_dirty(
        &self,
        store: &CellStore,
        pre_compare: Option<&dyn Fn(Value) -> Value>,
    ) -> Result<bool, FormError> {
        let values = self.get_values(store)?.values;
        self.differs_from_initial(store, values, pre_compare)
    }

    /// Like [`is_dirty`](Self::is_dirty), but against the live values snapshot.
    pub fn is_live_dirty(
        &self,
        store: &CellStore,
        pre_compare: Option<&dyn Fn(Value) -> Value>,
    ) -> Result<bool, FormError> {
        let values = store.live_values(&self.form_id)?.values.clone();
        self.differs_from_initial(store, values, pre_compare)
    }

    fn differs_from_initial(
        &self,
        store: &CellStore,
        values: Value,
        pre_compare: Option<&dyn Fn(Value) -> Value>,
    ) -> Result<bool, FormError> {
        let values = match pre_compare {
            Some(transform) => transform(values),
            None => values,
        };
        let initial = store.initial_values(&self.form_id)?;
        Ok(!deep_equal(&initial.values, &values))
    }

    /// Re-baseline the form. Omitted parts keep their previous value.
    pub fn reset_initial_values(
        &self,
        store: &mut CellStore,
        values: Option<Value>,
        extra_infos: Option<Value>,
    ) -> Result<u64, FormError> {
        establish_initial_values(store, &self.form_id, values, None, extra_infos)
    }
}

fn merge_update(cell: &mut crate::cell::FieldCell, update: FieldValue, version: u64) {
    if let Some(value) = update.value {
        cell.data = Some(value);
    }
    if let Some(extra_info) = update.extra_info {
        cell.extra_info = Some(extra_info);
    }
    // an explicit write counts as seeded
    if cell.init_ver < version {
        cell.init_ver = version;
    }
}

fn as_rows<'v>(key: &CellKey, value: Option<&'v Value>) -> Result<&'v [Value], FormError> {
    match value {
        None | Some(Value::Null) => Ok(&[][..]),
        Some(Value::Array(rows)) => Ok(rows.as_slice()),
        Some(_) => Err(FormError::ExpectedArray {
            name: key.name.clone(),
        }),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::field::{FieldBinding, FieldProps};
    use crate::field_array::{FieldArrayBinding, FieldArrayProps};
    use crate::form::{FormController, FormProps};
    use crate::store::ProviderOptions;
    use serde_json::json;

    fn mounted(initial: Value) -> (CellStore, FormId, FormContext) {
        let mut store = CellStore::new();
        let form = store.create_form(ProviderOptions::default());
        FormController::mount(&mut store, &form, FormProps::new().initial_values(initial)).unwrap();
        let context = FormContext::new(form.clone());
        (store, form, context)
    }

    #[test]
    fn get_value_reads_through_to_initial_values() {
        let (store, _, context) = mounted(json!({ "name": "Abc" }));
        let value = context.get_value(&store, &"name".into()).unwrap();
        assert_eq!(value.value, Some(json!("Abc")));
    }

    #[test]
    fn set_value_keeps_unspecified_parts() {
        let (mut store, form, context) = mounted(json!({}));
        let name = FieldBinding::mount(&mut store, &form, FieldProps::new("name")).unwrap();
        name.set_value(&mut store, Some(json!("a")), Some(json!("A"))).unwrap();

        context
            .set_value(
                &mut store,
                &"name".into(),
                FieldValue {
                    value: Some(json!("b")),
                    extra_info: None,
                },
            )
            .unwrap();
        assert_eq!(name.value(&store), Some(json!("b")));
        assert_eq!(name.extra_info(&store), Some(json!("A")));
    }

    #[test]
    fn set_value_stamps_unmounted_field() {
        let (mut store, form, context) = mounted(json!({ "name": "Abc" }));
        context
            .set_field_values(
                &mut store,
                vec![FieldValueUpdate {
                    name: "name".into(),
                    value: Some(json!("typed")),
                    extra_info: None,
                }],
            )
            .unwrap();

        // mounting afterwards must not re-seed over the write
        let name = FieldBinding::mount(&mut store, &form, FieldProps::new("name")).unwrap();
        assert_eq!(name.value(&store), Some(json!("typed")));
    }

    #[test]
    fn field_array_set_value_replaces_rows() {
        let (mut store, form, context) = mounted(json!({ "items": [] }));
        let items =
            FieldArrayBinding::mount(&mut store, &form, FieldArrayProps::new("items", ["amount"]))
                .unwrap();
        context
            .set_value(
                &mut store,
                &FieldRef::field_array("items"),
                FieldValue {
                    value: Some(json!([{ "amount": 1 }, { "amount": 2 }])),
                    extra_info: None,
                },
            )
            .unwrap();
        assert_eq!(items.row_ids(&store).len(), 2);

        let read = context
            .get_value(&store, &FieldRef::field_array("items"))
            .unwrap();
        assert_eq!(read.value, Some(json!([{ "amount": 1 }, { "amount": 2 }])));
    }

    #[test]
    fn dirty_tracks_edits_and_transform() {
        let (mut store, form, context) = mounted(json!({ "name": "a" }));
        let name = FieldBinding::mount(&mut store, &form, FieldProps::new("name")).unwrap();
        assert!(!context.is_dirty(&store, None).unwrap());

        name.set_value(&mut store, Some(json!("b")), None).unwrap();
        assert!(context.is_dirty(&store, None).unwrap());
        assert!(context.is_live_dirty(&store, None).unwrap());

        let restore = |_: Value| json!({ "name": "a" });
        assert!(!context.is_dirty(&store, Some(&restore)).unwrap());
    }

    #[test]
    fn remove_fields_resets_cells() {
        let (mut store, form, context) = mounted(json!({ "name": "a" }));
        let name = FieldBinding::mount(&mut store, &form, FieldProps::new("name")).unwrap();
        context.remove_fields(&mut store, &["name".into()]).unwrap();
        assert!(store.view(&form).unwrap().field(name.key()).is_none());
    }

    #[test]
    fn reset_initial_values_bumps_version() {
        let (mut store, _, context) = mounted(json!({ "name": "a" }));
        let version = context
            .reset_initial_values(&mut store, Some(json!({ "name": "z" })), None)
            .unwrap();
        assert_eq!(version, 2);
        assert_eq!(
            context.get_initial_values(&store).unwrap().values,
            json!({ "name": "z" })
        );
    }
}
