//! JSON boundary for JS hosts.
//!
//! One [`CellStore`] per WASM instance. Every export parses its JSON
//! arguments, runs against the store and serialises the result. Validators
//! and submit handlers are host closures and stay on the JS side; this
//! surface covers registration, reads, writes and row management.
//!
//! The `*_in` functions hold the logic and take the store explicitly so they
//! run natively in tests; the exports only add the store lookup and
//! `JsValue` error mapping.

use crate::aggregate::compute_watch;
use crate::cell::{Ancestor, FieldDecl, FieldRef};
use crate::context::{FieldValue, FieldValueUpdate, FormContext};
use crate::error::FormError;
use crate::field::{FieldBinding, FieldProps};
use crate::field_array::{FieldArrayBinding, FieldArrayProps};
use crate::ids::{FormId, RowId, RowIndex};
use crate::store::{CellStore, FormSettings, ProviderOptions};
use serde::Deserialize;
use serde_json::Value;
use std::cell::RefCell;
use wasm_bindgen::prelude::*;

// WASM is single-threaded, so thread_local acts as a singleton
thread_local! {
    static STORE: RefCell<CellStore> = RefCell::new(CellStore::new());
}

fn with_store<R>(f: impl FnOnce(&mut CellStore) -> Result<R, FormError>) -> Result<R, JsValue> {
    STORE
        .with(|store| f(&mut store.borrow_mut()))
        .map_err(|e| JsValue::from_str(&e.to_string()))
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct FieldInput {
    name: String,
    #[serde(default)]
    ancestors: Vec<Ancestor>,
    #[serde(default)]
    default_value: Option<Value>,
    #[serde(default)]
    skip_unregister: bool,
}

impl From<FieldInput> for FieldProps {
    fn from(input: FieldInput) -> Self {
        FieldProps {
            name: input.name,
            ancestors: input.ancestors,
            default_value: input.default_value,
            skip_unregister: input.skip_unregister,
            ..Default::default()
        }
    }
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct FieldArrayInput {
    name: String,
    #[serde(default)]
    ancestors: Vec<Ancestor>,
    #[serde(default)]
    field_names: Vec<FieldDecl>,
    #[serde(default)]
    default_value: Option<Value>,
    #[serde(default)]
    skip_unregister: bool,
}

impl From<FieldArrayInput> for FieldArrayProps {
    fn from(input: FieldArrayInput) -> Self {
        FieldArrayProps {
            name: input.name,
            ancestors: input.ancestors,
            field_names: input.field_names,
            default_value: input.default_value,
            skip_unregister: input.skip_unregister,
            validate: None,
        }
    }
}

fn parse_opt<T: serde::de::DeserializeOwned>(json: Option<&str>) -> Result<Option<T>, FormError> {
    match json {
        None => Ok(None),
        Some(json) => Ok(Some(serde_json::from_str(json)?)),
    }
}

fn array_binding(form_id: &str, array_json: &str) -> Result<FieldArrayBinding, FormError> {
    let input: FieldArrayInput = serde_json::from_str(array_json)?;
    Ok(FieldArrayBinding::attach(&FormId::from(form_id), input.into()))
}

// ---------------------------------------------------------------------------
// Store-explicit operations
// ---------------------------------------------------------------------------

pub fn create_form_in(store: &mut CellStore, options_json: &str) -> Result<String, FormError> {
    let options: ProviderOptions = serde_json::from_str(options_json)?;
    Ok(store.create_form(options).as_str().to_string())
}

pub fn reset_initial_values_in(
    store: &mut CellStore,
    form_id: &str,
    values_json: Option<&str>,
    settings_json: Option<&str>,
    extra_infos_json: Option<&str>,
) -> Result<u64, FormError> {
    let values: Option<Value> = parse_opt(values_json)?;
    let settings: Option<FormSettings> = parse_opt(settings_json)?;
    let extra_infos: Option<Value> = parse_opt(extra_infos_json)?;
    crate::form::establish_initial_values(store, &FormId::from(form_id), values, settings, extra_infos)
}

pub fn form_values_in(store: &CellStore, form_id: &str) -> Result<String, FormError> {
    let values = FormContext::new(FormId::from(form_id)).get_values(store)?;
    Ok(serde_json::to_string(&values)?)
}

pub fn initial_values_in(store: &CellStore, form_id: &str) -> Result<String, FormError> {
    Ok(serde_json::to_string(store.initial_values(&FormId::from(form_id))?)?)
}

pub fn live_values_in(store: &CellStore, form_id: &str) -> Result<String, FormError> {
    Ok(serde_json::to_string(store.live_values(&FormId::from(form_id))?)?)
}

pub fn is_dirty_in(store: &CellStore, form_id: &str) -> Result<bool, FormError> {
    FormContext::new(FormId::from(form_id)).is_dirty(store, None)
}

pub fn mount_field_in(store: &mut CellStore, form_id: &str, field_json: &str) -> Result<(), FormError> {
    let input: FieldInput = serde_json::from_str(field_json)?;
    FieldBinding::mount(store, &FormId::from(form_id), input.into())?;
    Ok(())
}

pub fn unmount_field_in(
    store: &mut CellStore,
    form_id: &str,
    field_json: &str,
) -> Result<(), FormError> {
    let input: FieldInput = serde_json::from_str(field_json)?;
    FieldBinding::attach(&FormId::from(form_id), input.into()).unmount(store)
}

pub fn get_value_in(store: &CellStore, form_id: &str, ref_json: &str) -> Result<String, FormError> {
    let field_ref: FieldRef = serde_json::from_str(ref_json)?;
    let value = FormContext::new(FormId::from(form_id)).get_value(store, &field_ref)?;
    Ok(serde_json::to_string(&value)?)
}

pub fn set_value_in(
    store: &mut CellStore,
    form_id: &str,
    ref_json: &str,
    update_json: &str,
) -> Result<(), FormError> {
    let field_ref: FieldRef = serde_json::from_str(ref_json)?;
    let update: FieldValue = serde_json::from_str(update_json)?;
    FormContext::new(FormId::from(form_id)).set_value(store, &field_ref, update)
}

pub fn set_field_values_in(
    store: &mut CellStore,
    form_id: &str,
    updates_json: &str,
) -> Result<(), FormError> {
    let updates: Vec<FieldValueUpdate> = serde_json::from_str(updates_json)?;
    FormContext::new(FormId::from(form_id)).set_field_values(store, updates)
}

pub fn remove_fields_in(store: &mut CellStore, form_id: &str, refs_json: &str) -> Result<(), FormError> {
    let refs: Vec<FieldRef> = serde_json::from_str(refs_json)?;
    FormContext::new(FormId::from(form_id)).remove_fields(store, &refs)
}

pub fn watch_fields_in(store: &CellStore, form_id: &str, refs_json: &str) -> Result<String, FormError> {
    let refs: Vec<FieldRef> = serde_json::from_str(refs_json)?;
    let values = compute_watch(&store.view(&FormId::from(form_id))?, &refs)?;
    Ok(serde_json::to_string(&values)?)
}

pub fn mount_field_array_in(
    store: &mut CellStore,
    form_id: &str,
    array_json: &str,
) -> Result<(), FormError> {
    array_binding(form_id, array_json)?.sync(store)
}

pub fn unmount_field_array_in(
    store: &mut CellStore,
    form_id: &str,
    array_json: &str,
) -> Result<(), FormError> {
    array_binding(form_id, array_json)?.unmount(store)
}

/// Insert rows at `index`, or append when `None`. Returns the new row ids.
pub fn insert_rows_in(
    store: &mut CellStore,
    form_id: &str,
    array_json: &str,
    index: Option<usize>,
    rows_json: &str,
) -> Result<Vec<u32>, FormError> {
    let binding = array_binding(form_id, array_json)?;
    let rows: Vec<Value> = serde_json::from_str(rows_json)?;
    let ids = match index {
        Some(index) => binding.insert(store, RowIndex(index), &rows)?,
        None => binding.append(store, &rows)?,
    };
    Ok(ids.into_iter().map(|RowId(id)| id).collect())
}

pub fn remove_row_in(
    store: &mut CellStore,
    form_id: &str,
    array_json: &str,
    index: usize,
) -> Result<u32, FormError> {
    let RowId(id) = array_binding(form_id, array_json)?.remove(store, RowIndex(index))?;
    Ok(id)
}

pub fn remove_all_rows_in(
    store: &mut CellStore,
    form_id: &str,
    array_json: &str,
) -> Result<(), FormError> {
    array_binding(form_id, array_json)?.remove_all(store)
}

pub fn row_ids_in(store: &CellStore, form_id: &str, array_json: &str) -> Result<Vec<u32>, FormError> {
    let binding = array_binding(form_id, array_json)?;
    Ok(binding.row_ids(store).into_iter().map(|RowId(id)| id).collect())
}

// ---------------------------------------------------------------------------
// Exports
// ---------------------------------------------------------------------------

/// Create a form and return its id.
#[wasm_bindgen]
pub fn create_form(options_json: &str) -> Result<String, JsValue> {
    with_store(|store| create_form_in(store, options_json))
}

/// Delete a form's whole registry.
#[wasm_bindgen]
pub fn drop_form(form_id: &str) -> bool {
    STORE.with(|store| store.borrow_mut().drop_form(&FormId::from(form_id)))
}

/// Re-establish the initial values; omitted arguments keep the previous part.
#[wasm_bindgen]
pub fn reset_initial_values(
    form_id: &str,
    values_json: Option<String>,
    settings_json: Option<String>,
    extra_infos_json: Option<String>,
) -> Result<u64, JsValue> {
    with_store(|store| {
        reset_initial_values_in(
            store,
            form_id,
            values_json.as_deref(),
            settings_json.as_deref(),
            extra_infos_json.as_deref(),
        )
    })
}

#[wasm_bindgen]
pub fn get_form_values(form_id: &str) -> Result<String, JsValue> {
    with_store(|store| form_values_in(store, form_id))
}

#[wasm_bindgen]
pub fn get_initial_values(form_id: &str) -> Result<String, JsValue> {
    with_store(|store| initial_values_in(store, form_id))
}

#[wasm_bindgen]
pub fn get_live_values(form_id: &str) -> Result<String, JsValue> {
    with_store(|store| live_values_in(store, form_id))
}

#[wasm_bindgen]
pub fn is_dirty(form_id: &str) -> Result<bool, JsValue> {
    with_store(|store| is_dirty_in(store, form_id))
}

#[wasm_bindgen]
pub fn mount_field(form_id: &str, field_json: &str) -> Result<(), JsValue> {
    with_store(|store| mount_field_in(store, form_id, field_json))
}

#[wasm_bindgen]
pub fn unmount_field(form_id: &str, field_json: &str) -> Result<(), JsValue> {
    with_store(|store| unmount_field_in(store, form_id, field_json))
}

#[wasm_bindgen]
pub fn get_value(form_id: &str, ref_json: &str) -> Result<String, JsValue> {
    with_store(|store| get_value_in(store, form_id, ref_json))
}

#[wasm_bindgen]
pub fn set_value(form_id: &str, ref_json: &str, update_json: &str) -> Result<(), JsValue> {
    with_store(|store| set_value_in(store, form_id, ref_json, update_json))
}

#[wasm_bindgen]
pub fn set_field_values(form_id: &str, updates_json: &str) -> Result<(), JsValue> {
    with_store(|store| set_field_values_in(store, form_id, updates_json))
}

#[wasm_bindgen]
pub fn remove_fields(form_id: &str, refs_json: &str) -> Result<(), JsValue> {
    with_store(|store| remove_fields_in(store, form_id, refs_json))
}

#[wasm_bindgen]
pub fn watch_fields(form_id: &str, refs_json: &str) -> Result<String, JsValue> {
    with_store(|store| watch_fields_in(store, form_id, refs_json))
}

#[wasm_bindgen]
pub fn mount_field_array(form_id: &str, array_json: &str) -> Result<(), JsValue> {
    with_store(|store| mount_field_array_in(store, form_id, array_json))
}

#[wasm_bindgen]
pub fn unmount_field_array(form_id: &str, array_json: &str) -> Result<(), JsValue> {
    with_store(|store| unmount_field_array_in(store, form_id, array_json))
}

#[wasm_bindgen]
pub fn insert_rows(
    form_id: &str,
    array_json: &str,
    index: Option<u32>,
    rows_json: &str,
) -> Result<Vec<u32>, JsValue> {
    let index = index.map(|index| index as usize);
    with_store(|store| insert_rows_in(store, form_id, array_json, index, rows_json))
}

#[wasm_bindgen]
pub fn remove_row(form_id: &str, array_json: &str, index: u32) -> Result<u32, JsValue> {
    with_store(|store| remove_row_in(store, form_id, array_json, index as usize))
}

#[wasm_bindgen]
pub fn remove_all_rows(form_id: &str, array_json: &str) -> Result<(), JsValue> {
    with_store(|store| remove_all_rows_in(store, form_id, array_json))
}

#[wasm_bindgen]
pub fn row_ids(form_id: &str, array_json: &str) -> Result<Vec<u32>, JsValue> {
    with_store(|store| row_ids_in(store, form_id, array_json))
}
