//! Live read-only views.
//!
//! A view subscribes to the cells it reads and only recomputes after a commit
//! wrote one of them; views over untouched cells are never recomputed.

use crate::aggregate::{compute_field_array_columns, compute_watch, ColumnValues};
use crate::cell::{CellKey, FieldKind, FieldRef, FormValues};
use crate::error::FormError;
use crate::ids::FormId;
use crate::rev_index::WatcherId;
use crate::store::{CellRead, CellStore, WatchKey};
use crate::value::deep_equal;

/// `watchFields`: values of named fields, possibly across field arrays.
#[derive(Debug)]
pub struct FieldWatch {
    form_id: FormId,
    refs: Vec<FieldRef>,
    watcher: WatcherId,
    current: FormValues,
}

impl FieldWatch {
    pub fn open(
        store: &mut CellStore,
        form_id: &FormId,
        refs: Vec<FieldRef>,
    ) -> Result<Self, FormError> {
        let current = compute_watch(&store.view(form_id)?, &refs)?;
        let watcher = store.subscribe(form_id, &watch_keys(&refs));
        Ok(Self {
            form_id: form_id.clone(),
            refs,
            watcher,
            current,
        })
    }

    /// Recompute if a dependency was written. Returns whether the values changed.
    pub fn poll(&mut self, store: &mut CellStore) -> Result<bool, FormError> {
        if !store.take_stale(self.watcher) {
            return Ok(false);
        }
        let next = compute_watch(&store.view(&self.form_id)?, &self.refs)?;
        let changed = !deep_equal(&next.values, &self.current.values)
            || !deep_equal(&next.extra_infos, &self.current.extra_infos);
        self.current = next;
        Ok(changed)
    }

    pub fn values(&self) -> &FormValues {
        &self.current
    }

    pub fn close(self, store: &mut CellStore) {
        store.unsubscribe(self.watcher);
    }
}

fn watch_keys(refs: &[FieldRef]) -> Vec<WatchKey> {
    let mut keys = vec![WatchKey::InitialValues];
    for field_ref in refs {
        match field_ref.kind {
            FieldKind::Field => keys.push(WatchKey::Field(field_ref.key())),
            // rows come and go, so any write may matter
            FieldKind::FieldArray => keys.push(WatchKey::AnyCell),
        }
    }
    keys
}

/// `watchFieldArrayColumns`: per-row values of selected columns.
#[derive(Debug)]
pub struct ColumnWatch {
    form_id: FormId,
    key: CellKey,
    columns: Option<Vec<String>>,
    watcher: WatcherId,
    current: ColumnValues,
}

impl ColumnWatch {
    pub fn open(
        store: &mut CellStore,
        form_id: &FormId,
        key: CellKey,
        columns: Option<Vec<String>>,
    ) -> Result<Self, FormError> {
        let watcher = store.subscribe(form_id, &[]);
        let mut watch = Self {
            form_id: form_id.clone(),
            key,
            columns,
            watcher,
            current: ColumnValues::default(),
        };
        watch.current = watch.compute(store)?;
        Ok(watch)
    }

    /// Recompute if the array or one of the watched row cells was written.
    pub fn poll(&mut self, store: &mut CellStore) -> Result<bool, FormError> {
        if !store.take_stale(self.watcher) {
            return Ok(false);
        }
        let next = self.compute(store)?;
        let changed = !next.same_values(&self.current);
        self.current = next;
        Ok(changed)
    }

    pub fn values(&self) -> &ColumnValues {
        &self.current
    }

    pub fn close(self, store: &mut CellStore) {
        store.unsubscribe(self.watcher);
    }

    /// Recompute and re-subscribe to the array plus the cells of its current rows.
    fn compute(&self, store: &mut CellStore) -> Result<ColumnValues, FormError> {
        let (values, keys) = {
            let view = store.view(&self.form_id)?;
            let values = compute_field_array_columns(&view, &self.key, self.columns.as_deref())?;
            let mut keys = vec![WatchKey::FieldArray(self.key.clone())];
            match &self.columns {
                Some(columns) => {
                    let row_ids = view
                        .field_array(&self.key)
                        .map(|cell| cell.row_ids.clone())
                        .unwrap_or_default();
                    for row_id in row_ids {
                        keys.extend(
                            columns
                                .iter()
                                .map(|column| WatchKey::Field(self.key.child(column, row_id))),
                        );
                    }
                }
                None => keys.push(WatchKey::AnyCell),
            }
            (values, keys)
        };
        store.resubscribe(self.watcher, &self.form_id, &keys);
        Ok(values)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cell::FieldArrayCell;
    use crate::ids::RowId;
    use crate::store::ProviderOptions;
    use serde_json::json;

    fn set(store: &mut CellStore, form: &FormId, key: CellKey, value: serde_json::Value) {
        store
            .transaction(form, |tx| {
                tx.update_field(&key, |cell| cell.data = Some(value));
                Ok(())
            })
            .unwrap();
    }

    #[test]
    fn field_watch_ignores_unrelated_writes() {
        let mut store = CellStore::new();
        let form = store.create_form(ProviderOptions::default());
        let mut watch = FieldWatch::open(&mut store, &form, vec!["name".into()]).unwrap();

        set(&mut store, &form, CellKey::top_level("other"), json!(1));
        assert!(!watch.poll(&mut store).unwrap());

        set(&mut store, &form, CellKey::top_level("name"), json!("Abc"));
        assert!(watch.poll(&mut store).unwrap());
        assert_eq!(watch.values().values, json!({ "name": "Abc" }));

        // same value again: stale, recomputed, unchanged
        set(&mut store, &form, CellKey::top_level("name"), json!("Abc"));
        assert!(!watch.poll(&mut store).unwrap());
        watch.close(&mut store);
    }

    #[test]
    fn column_watch_follows_new_rows() {
        let mut store = CellStore::new();
        let form = store.create_form(ProviderOptions::default());
        let items = CellKey::top_level("items");
        let mut watch = ColumnWatch::open(
            &mut store,
            &form,
            items.clone(),
            Some(vec!["amount".into()]),
        )
        .unwrap();
        assert!(watch.values().values.is_empty());

        store
            .transaction(&form, |tx| {
                tx.set_field_array(
                    items.clone(),
                    FieldArrayCell {
                        row_ids: vec![RowId(1)],
                        field_names: vec!["amount".into()],
                        ..Default::default()
                    },
                );
                Ok(())
            })
            .unwrap();
        assert!(watch.poll(&mut store).unwrap());
        assert_eq!(watch.values().values, vec![json!({})]);

        // the row's cell was subscribed on the last recompute
        set(&mut store, &form, items.child("amount", RowId(1)), json!(9));
        assert!(watch.poll(&mut store).unwrap());
        assert_eq!(watch.values().values, vec![json!({ "amount": 9 })]);

        set(&mut store, &form, items.child("note", RowId(1)), json!("x"));
        assert!(!watch.poll(&mut store).unwrap());
    }
}
