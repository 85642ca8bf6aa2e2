//! Field-array mutations.
//!
//! All operations run inside a [`Transaction`] so row-id allocation and the
//! writes into the new rows are never observed half-applied. Rows exist only
//! as members of `row_ids`; membership is existence.

use crate::cell::{CellKey, FieldDecl};
use crate::error::FormError;
use crate::ids::{new_row_id, RowId, RowIndex};
use crate::path::get_path;
use crate::store::{CellRead, Transaction};
use serde_json::Value;

/// Reconcile the array at `key` to `data`.
///
/// Equal length keeps every row id, shrinking truncates and resets the
/// removed rows, growing appends fresh ids. Every row is then rewritten from
/// its element of `data`/`extra`. With `stamp` set, every cell written is
/// marked as seeded at that initial-values version.
pub fn set_whole(
    tx: &mut Transaction<'_>,
    key: &CellKey,
    declared: &[FieldDecl],
    data: &[Value],
    extra: Option<&[Value]>,
    stamp: Option<u64>,
) -> Result<(), FormError> {
    ensure_field_array(tx, key)?;
    let mut cell = tx.field_array_or_default(key);
    if cell.field_names.is_empty() {
        cell.field_names = declared.to_vec();
    }

    let mut removed = Vec::new();
    if data.len() < cell.row_ids.len() {
        removed = cell.row_ids.split_off(data.len());
        cell.retired_row_ids.extend(removed.iter().copied());
    } else {
        while cell.row_ids.len() < data.len() {
            let id = new_row_id(&cell.row_ids, &cell.retired_row_ids);
            cell.row_ids.push(id);
        }
    }
    if let Some(version) = stamp {
        cell.init_ver = version;
    }

    let field_names = cell.field_names.clone();
    let row_ids = cell.row_ids.clone();
    tx.set_field_array(key.clone(), cell);

    for row_id in removed {
        reset_row_children(tx, key, &field_names, row_id);
    }
    for (index, row) in data.iter().enumerate() {
        let row_extra = extra.and_then(|rows| rows.get(index));
        write_row(tx, key, &field_names, row_ids[index], row, row_extra, stamp)?;
    }
    Ok(())
}

/// Insert `max(rows.len(), 1)` fresh rows at `index` (clamped; `None`
/// appends) and write `rows[i]` into the i-th new row. Returns the new ids.
pub fn insert_rows(
    tx: &mut Transaction<'_>,
    key: &CellKey,
    index: Option<RowIndex>,
    rows: &[Value],
    extra: Option<&[Value]>,
) -> Result<Vec<RowId>, FormError> {
    ensure_field_array(tx, key)?;
    let mut cell = tx.field_array_or_default(key);
    let start = index.map_or(cell.row_ids.len(), |index| index.0.min(cell.row_ids.len()));
    let count = rows.len().max(1);

    let mut inserted = Vec::with_capacity(count);
    for offset in 0..count {
        let id = new_row_id(&cell.row_ids, &cell.retired_row_ids);
        cell.row_ids.insert(start + offset, id);
        inserted.push(id);
    }
    let field_names = cell.field_names.clone();
    tx.set_field_array(key.clone(), cell);

    for (offset, row) in rows.iter().enumerate() {
        let row_extra = extra.and_then(|rows| rows.get(offset));
        write_row(tx, key, &field_names, inserted[offset], row, row_extra, None)?;
    }
    Ok(inserted)
}

/// Remove the row at `index`, resetting its subtree. Returns the removed id.
pub fn remove_row(
    tx: &mut Transaction<'_>,
    key: &CellKey,
    index: RowIndex,
) -> Result<RowId, FormError> {
    let mut cell = tx.field_array_or_default(key);
    if index.0 >= cell.row_ids.len() {
        return Err(FormError::RowIndexOutOfRange {
            name: key.name.clone(),
            index: index.0,
            len: cell.row_ids.len(),
        });
    }
    let row_id = cell.row_ids.remove(index.0);
    cell.retired_row_ids.insert(row_id);
    reset_row_children(tx, key, &cell.field_names, row_id);
    tx.set_field_array(key.clone(), cell);
    Ok(row_id)
}

/// Reset every row's subtree and empty the array.
pub fn remove_all_rows(tx: &mut Transaction<'_>, key: &CellKey) {
    let mut cell = tx.field_array_or_default(key);
    let row_ids = std::mem::take(&mut cell.row_ids);
    for &row_id in &row_ids {
        reset_row_children(tx, key, &cell.field_names, row_id);
    }
    cell.retired_row_ids.extend(row_ids);
    tx.set_field_array(key.clone(), cell);
}

/// Reset every declared child of one row. Nested field arrays are reset
/// together with all of their rows.
pub fn reset_row(tx: &mut Transaction<'_>, key: &CellKey, row_id: RowId) {
    let field_names = tx
        .field_array(key)
        .map(|cell| cell.field_names.clone())
        .unwrap_or_default();
    reset_row_children(tx, key, &field_names, row_id);
}

/// Reset a field array, all of its rows, and their subtrees.
pub fn reset_field_array(tx: &mut Transaction<'_>, key: &CellKey, declared: &[FieldDecl]) {
    let Some(cell) = tx.field_array(key) else {
        return;
    };
    let field_names = if cell.field_names.is_empty() {
        declared.to_vec()
    } else {
        cell.field_names.clone()
    };
    let row_ids = cell.row_ids.clone();
    for row_id in row_ids {
        reset_row_children(tx, key, &field_names, row_id);
    }
    tx.reset_field_array(key);
}

fn reset_row_children(
    tx: &mut Transaction<'_>,
    key: &CellKey,
    field_names: &[FieldDecl],
    row_id: RowId,
) {
    for decl in field_names {
        let child = key.child(decl.name(), row_id);
        match decl {
            FieldDecl::Field(_) => tx.reset_field(&child),
            FieldDecl::FieldArray { field_names, .. } => reset_field_array(tx, &child, field_names),
        }
    }
}

fn write_row(
    tx: &mut Transaction<'_>,
    key: &CellKey,
    field_names: &[FieldDecl],
    row_id: RowId,
    row: &Value,
    row_extra: Option<&Value>,
    stamp: Option<u64>,
) -> Result<(), FormError> {
    for decl in field_names {
        let child = key.child(decl.name(), row_id);
        match decl {
            FieldDecl::Field(name) => {
                let data = get_path(row, name).cloned();
                let extra = row_extra.and_then(|extra| get_path(extra, name)).cloned();
                tx.update_field(&child, |cell| {
                    cell.data = data;
                    cell.extra_info = extra;
                    if let Some(version) = stamp {
                        cell.init_ver = version;
                    }
                });
            }
            FieldDecl::FieldArray { name, field_names } => {
                let rows = nested_rows(get_path(row, name), name)?;
                let extras = row_extra
                    .and_then(|extra| get_path(extra, name))
                    .and_then(Value::as_array)
                    .map(Vec::as_slice);
                set_whole(tx, &child, field_names, rows, extras, stamp)?;
            }
        }
    }
    Ok(())
}

/// Missing or `null` nested data means no rows.
fn nested_rows<'v>(value: Option<&'v Value>, name: &str) -> Result<&'v [Value], FormError> {
    match value {
        None | Some(Value::Null) => Ok(&[][..]),
        Some(Value::Array(rows)) => Ok(rows.as_slice()),
        Some(_) => Err(FormError::ExpectedArray {
            name: name.to_owned(),
        }),
    }
}

fn ensure_field_array(tx: &Transaction<'_>, key: &CellKey) -> Result<(), FormError> {
    if !key.is_top_level() && tx.field_array(key).is_none() && tx.field(key).is_some() {
        return Err(FormError::NotAFieldArray {
            name: key.name.clone(),
        });
    }
    Ok(())
}
