//! Derived read-only views over a form's flat cell registry.
//!
//! Everything here works on any [`CellRead`], so the same code serves
//! point-in-time snapshots and in-flight transactions. Nothing here writes;
//! validation results come back as [`FieldError`] lists and callers holding a
//! transaction persist them with [`write_back_errors`].

use crate::cell::{
    non_empty, Ancestor, CellKey, FieldDecl, FieldError, FieldKind, FieldRef, FormValues,
};
use crate::error::FormError;
use crate::ids::RowIndex;
use crate::path::{
    get_path, get_segments, remove_path, segments_with_prefix, set_path, set_path_with_prefix,
    set_segments, IndexedAncestor, PathSegment,
};
use crate::store::{CellRead, Transaction};
use crate::value::deep_equal;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

// ---------------------------------------------------------------------------
// Positional translation
// ---------------------------------------------------------------------------

/// Translate an ancestor chain into positional row indices using the current
/// `row_ids` of every enclosing field array.
pub fn row_prefix<R: CellRead + ?Sized>(
    view: &R,
    ancestors: &[Ancestor],
) -> Result<Vec<IndexedAncestor>, FormError> {
    let mut prefix = Vec::with_capacity(ancestors.len());
    for (depth, ancestor) in ancestors.iter().enumerate() {
        let array_key = CellKey::new(ancestor.name.clone(), ancestors[..depth].to_vec());
        let index = view
            .field_array(&array_key)
            .and_then(|cell| cell.row_index(ancestor.row_id))
            .ok_or_else(|| FormError::UnknownRow {
                name: ancestor.name.clone(),
                row_id: ancestor.row_id,
            })?;
        prefix.push(IndexedAncestor {
            name: ancestor.name.clone(),
            index: RowIndex(index),
        });
    }
    Ok(prefix)
}

/// Positional path of `key` inside the nested form value, e.g.
/// `orders[1].lines[0].sku`, as parsed segments.
pub fn full_object_path<R: CellRead + ?Sized>(
    view: &R,
    key: &CellKey,
) -> Result<Vec<PathSegment>, FormError> {
    let prefix = row_prefix(view, &key.ancestors)?;
    Ok(segments_with_prefix(&prefix, &key.name))
}

// ---------------------------------------------------------------------------
// Whole-form aggregation
// ---------------------------------------------------------------------------

/// Assemble the nested `{values, extraInfos}` of a form from its registry.
///
/// Starts from the initial values (unless unused initial values are skipped),
/// rebuilds every registered field array from its live rows so removed rows
/// don't come back, then writes every reachable field whose data is defined.
/// Cells whose ancestor row no longer exists are skipped.
pub fn compute_form_values<R: CellRead + ?Sized>(view: &R) -> FormValues {
    let initial = view.initial_values();
    let mut out = if initial.settings.skip_unused_initial_values {
        FormValues::default()
    } else {
        FormValues {
            values: initial.values.clone(),
            extra_infos: initial.extra_infos.clone(),
        }
    };

    let mut arrays = view.registered_field_arrays();
    for (key, _) in arrays.iter().filter(|(key, _)| key.is_top_level()) {
        remove_path(&mut out.values, &key.name);
        remove_path(&mut out.extra_infos, &key.name);
    }

    // Parents first so nested arrays land inside rows that already exist.
    arrays.sort_by_key(|(key, _)| key.ancestors.len());
    for (key, cell) in arrays {
        let Ok(segments) = full_object_path(view, key) else {
            continue;
        };
        materialize_rows(&mut out.values, &initial.values, &segments, cell.row_ids.len());
        materialize_rows(
            &mut out.extra_infos,
            &initial.extra_infos,
            &segments,
            cell.row_ids.len(),
        );
    }

    for (key, cell) in view.registered_fields() {
        let Ok(prefix) = row_prefix(view, &key.ancestors) else {
            continue;
        };
        if let Some(data) = &cell.data {
            set_path_with_prefix(&mut out.values, &prefix, &key.name, data.clone());
        }
        if let Some(extra) = &cell.extra_info {
            set_path_with_prefix(&mut out.extra_infos, &prefix, &key.name, extra.clone());
        }
    }
    out
}

/// One empty object per live row. An array with no rows is kept as `[]` only
/// where the baseline also holds an array, so an untouched form stays clean.
fn materialize_rows(out: &mut Value, baseline: &Value, segments: &[PathSegment], rows: usize) {
    if rows == 0 && !get_segments(baseline, segments).is_some_and(Value::is_array) {
        return;
    }
    let empty_rows = vec![Value::Object(Map::new()); rows];
    set_segments(out, segments, Value::Array(empty_rows));
}

// ---------------------------------------------------------------------------
// Field-array data
// ---------------------------------------------------------------------------

/// Which validators a field-array read runs.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ValidationMode {
    /// Plain read.
    Off,
    /// Every leaf validator and every (nested) array validator.
    Full,
    /// Only the array's own whole-array validator.
    ArrayOnly,
}

/// Row data of one field array, plus any validation failures found.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FieldArrayData {
    pub data: Vec<Value>,
    pub extra_info: Vec<Value>,
    pub errors: Vec<FieldError>,
}

/// Assemble the rows of the field array at `key`, recursing into nested
/// field arrays.
///
/// Children come from the cell's declared `field_names`, falling back to
/// `declared` when the cell has none recorded yet (a nested array seen only
/// through its parent's declaration).
pub fn compute_field_array_data<R: CellRead + ?Sized>(
    view: &R,
    key: &CellKey,
    declared: &[FieldDecl],
    mode: ValidationMode,
) -> Result<FieldArrayData, FormError> {
    let mut out = FieldArrayData::default();
    let Some(cell) = view.field_array(key) else {
        if view.field(key).is_some() && !key.is_top_level() {
            return Err(FormError::NotAFieldArray {
                name: key.name.clone(),
            });
        }
        return Ok(out);
    };
    let field_names = if cell.field_names.is_empty() {
        declared
    } else {
        cell.field_names.as_slice()
    };
    let nested_mode = match mode {
        ValidationMode::Full => ValidationMode::Full,
        ValidationMode::Off | ValidationMode::ArrayOnly => ValidationMode::Off,
    };

    for &row_id in &cell.row_ids {
        let mut row = Value::Object(Map::new());
        let mut row_extra = Value::Object(Map::new());
        for decl in field_names {
            let child = key.child(decl.name(), row_id);
            match decl {
                FieldDecl::Field(name) => {
                    let Some(field) = view.field(&child) else {
                        continue;
                    };
                    if mode == ValidationMode::Full {
                        if let Some(validate) = &field.validate {
                            if let Some(error) =
                                non_empty(validate(field.data.as_ref(), &FormValues::default()))
                            {
                                out.errors.push(FieldError {
                                    error,
                                    name: name.clone(),
                                    kind: FieldKind::Field,
                                    ancestors: child.ancestors.clone(),
                                });
                            }
                        }
                    }
                    if let Some(data) = &field.data {
                        set_path(&mut row, name, data.clone());
                    }
                    if let Some(extra) = &field.extra_info {
                        set_path(&mut row_extra, name, extra.clone());
                    }
                }
                FieldDecl::FieldArray { name, field_names } => {
                    if view.field_array(&child).is_none() && view.field(&child).is_some() {
                        return Err(FormError::NotAFieldArray { name: name.clone() });
                    }
                    let nested = compute_field_array_data(view, &child, field_names, nested_mode)?;
                    set_path(&mut row, name, Value::Array(nested.data));
                    set_path(&mut row_extra, name, Value::Array(nested.extra_info));
                    out.errors.extend(nested.errors);
                }
            }
        }
        out.data.push(row);
        out.extra_info.push(row_extra);
    }

    if mode != ValidationMode::Off {
        if let Some(validate) = &cell.validate {
            if let Some(error) = non_empty(validate(&out.data)) {
                out.errors.push(FieldError {
                    error,
                    name: key.name.clone(),
                    kind: FieldKind::FieldArray,
                    ancestors: key.ancestors.clone(),
                });
            }
        }
    }
    Ok(out)
}

/// Persist validation failures: fields get the error and become touched so
/// the message shows; field arrays get the error.
pub fn write_back_errors(tx: &mut Transaction<'_>, errors: &[FieldError]) {
    for error in errors {
        let key = error.key();
        match error.kind {
            FieldKind::Field => tx.update_field(&key, |cell| {
                cell.error = Some(error.error.clone());
                cell.touched = true;
            }),
            FieldKind::FieldArray => tx.update_field_array(&key, |cell| {
                cell.error = Some(error.error.clone());
            }),
        }
    }
}

// ---------------------------------------------------------------------------
// Narrow watch views
// ---------------------------------------------------------------------------

/// Values of arbitrary fields, keyed by field name.
///
/// Refs carry explicit ancestor chains, so each resolves on its own. A field
/// whose cell holds no data falls back to its initial value, which keeps
/// declared but unmounted dependencies in play for cross-field validation.
/// Field-array refs contribute their assembled rows.
pub fn compute_watch<R: CellRead + ?Sized>(
    view: &R,
    refs: &[FieldRef],
) -> Result<FormValues, FormError> {
    let mut out = FormValues::default();
    for field_ref in refs {
        let key = field_ref.key();
        match field_ref.kind {
            FieldKind::Field => {
                let cell = view.field(&key);
                let mut data = cell.and_then(|c| c.data.clone());
                let mut extra = cell.and_then(|c| c.extra_info.clone());
                if data.is_none() {
                    if let Ok(segments) = full_object_path(view, &key) {
                        let initial = view.initial_values();
                        data = get_segments(&initial.values, &segments).cloned();
                        if extra.is_none() {
                            extra = get_segments(&initial.extra_infos, &segments).cloned();
                        }
                    }
                }
                if let Some(data) = data {
                    set_path(&mut out.values, &key.name, data);
                }
                if let Some(extra) = extra {
                    set_path(&mut out.extra_infos, &key.name, extra);
                }
            }
            FieldKind::FieldArray => {
                let rows = compute_field_array_data(view, &key, &[], ValidationMode::Off)?;
                set_path(&mut out.values, &key.name, Value::Array(rows.data));
                set_path(&mut out.extra_infos, &key.name, Value::Array(rows.extra_info));
            }
        }
    }
    Ok(out)
}

/// Per-row values of a field array, one object per row.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ColumnValues {
    pub values: Vec<Value>,
    pub extra_infos: Vec<Value>,
}

impl ColumnValues {
    pub fn same_values(&self, other: &ColumnValues) -> bool {
        self.values.len() == other.values.len()
            && self.values.iter().zip(&other.values).all(|(a, b)| deep_equal(a, b))
    }
}

/// Rows of a field array restricted to `columns` (plain fields of the row).
/// `None` means every declared child.
pub fn compute_field_array_columns<R: CellRead + ?Sized>(
    view: &R,
    key: &CellKey,
    columns: Option<&[String]>,
) -> Result<ColumnValues, FormError> {
    let Some(columns) = columns else {
        let rows = compute_field_array_data(view, key, &[], ValidationMode::Off)?;
        return Ok(ColumnValues {
            values: rows.data,
            extra_infos: rows.extra_info,
        });
    };
    let mut out = ColumnValues::default();
    if columns.is_empty() {
        return Ok(out);
    }
    let row_ids = view
        .field_array(key)
        .map(|cell| cell.row_ids.clone())
        .unwrap_or_default();
    for row_id in row_ids {
        let mut row = Value::Object(Map::new());
        let mut row_extra = Value::Object(Map::new());
        for column in columns {
            let Some(field) = view.field(&key.child(column, row_id)) else {
                continue;
            };
            if let Some(data) = &field.data {
                set_path(&mut row, column, data.clone());
            }
            if let Some(extra) = &field.extra_info {
                set_path(&mut row_extra, column, extra.clone());
            }
        }
        out.values.push(row);
        out.extra_infos.push(row_extra);
    }
    Ok(out)
}

/// Initial value of a top-level field, used before its cell is seeded.
pub(crate) fn initial_top_level<R: CellRead + ?Sized>(
    view: &R,
    name: &str,
) -> (Option<Value>, Option<Value>) {
    let initial = view.initial_values();
    (
        get_path(&initial.values, name).cloned(),
        get_path(&initial.extra_infos, name).cloned(),
    )
}
