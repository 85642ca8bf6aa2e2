//! Cell store: every field and field-array cell of every form instance.
//!
//! The registry of a form is the pair of ordered maps in [`FormCells`]: a
//! cell exists exactly when it has been written and not reset since. Writes
//! only happen through a [`Transaction`], which reads and writes one
//! consistent snapshot and is applied as a unit on commit. The commit is also
//! where the registry index, the live values snapshot and watcher
//! notifications are maintained, so there is no separate "on write" hook.

use crate::aggregate;
use crate::cell::{CellKey, FieldArrayCell, FieldCell, FormValues};
use crate::error::FormError;
use crate::ids::FormId;
use crate::intern::KeyInterner;
use crate::rev_index::{SubscriptionIndex, WatcherId};
use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::collections::{HashMap, HashSet};
use ts_rs::TS;

/// Form-wide switches carried by the initial-values record.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize, TS)]
#[serde(rename_all = "camelCase", default)]
pub struct FormSettings {
    /// Keep cells of unmounted fields and field arrays.
    pub skip_unregister: bool,
    /// Aggregate only what mounted cells hold, ignoring initial values nobody bound.
    pub skip_unused_initial_values: bool,
}

/// Provider-level options for one form instance.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ProviderOptions {
    /// Pin the form id, e.g. to watch a form from outside its own hierarchy.
    pub form_id: Option<String>,
    /// Skip recomputing the live values snapshot on every commit.
    pub skip_values_observer: bool,
}

/// The baseline a form re-seeds from. `version` bumps on every re-establishment.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct InitialValues {
    pub values: Value,
    pub extra_infos: Value,
    pub version: u64,
    pub settings: FormSettings,
}

impl Default for InitialValues {
    fn default() -> Self {
        Self {
            values: Value::Object(Map::new()),
            extra_infos: Value::Object(Map::new()),
            version: 0,
            settings: FormSettings::default(),
        }
    }
}

/// Registry of the cells currently existing for one form.
#[derive(Debug, Clone, Default)]
pub struct FormCells {
    fields: IndexMap<CellKey, FieldCell>,
    arrays: IndexMap<CellKey, FieldArrayCell>,
}

#[derive(Debug)]
pub(crate) struct FormSlot {
    initial: InitialValues,
    live: FormValues,
    cells: FormCells,
    observe_values: bool,
}

/// Something a watcher can depend on.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum WatchKey {
    Field(CellKey),
    FieldArray(CellKey),
    InitialValues,
    /// Any cell write in the form.
    AnyCell,
}

impl WatchKey {
    fn canonical(&self, form_id: &FormId) -> String {
        match self {
            WatchKey::Field(key) => format!("{form_id}|field|{key}"),
            WatchKey::FieldArray(key) => format!("{form_id}|field-array|{key}"),
            WatchKey::InitialValues => format!("{form_id}|initial"),
            WatchKey::AnyCell => format!("{form_id}|*"),
        }
    }
}

/// Read access to one form's cells, shared by snapshots and transactions.
pub trait CellRead {
    fn form_id(&self) -> &FormId;
    fn initial_values(&self) -> &InitialValues;
    fn field(&self, key: &CellKey) -> Option<&FieldCell>;
    fn field_array(&self, key: &CellKey) -> Option<&FieldArrayCell>;
    /// Registered field cells in registration order.
    fn registered_fields(&self) -> Vec<(&CellKey, &FieldCell)>;
    /// Registered field-array cells in registration order.
    fn registered_field_arrays(&self) -> Vec<(&CellKey, &FieldArrayCell)>;
}

/// Point-in-time read view of one form.
pub struct FormView<'a> {
    form_id: &'a FormId,
    slot: &'a FormSlot,
}

impl<'a> FormView<'a> {
    pub fn live_values(&self) -> &'a FormValues {
        &self.slot.live
    }
}

impl CellRead for FormView<'_> {
    fn form_id(&self) -> &FormId {
        self.form_id
    }

    fn initial_values(&self) -> &InitialValues {
        &self.slot.initial
    }

    fn field(&self, key: &CellKey) -> Option<&FieldCell> {
        self.slot.cells.fields.get(key)
    }

    fn field_array(&self, key: &CellKey) -> Option<&FieldArrayCell> {
        self.slot.cells.arrays.get(key)
    }

    fn registered_fields(&self) -> Vec<(&CellKey, &FieldCell)> {
        self.slot.cells.fields.iter().collect()
    }

    fn registered_field_arrays(&self) -> Vec<(&CellKey, &FieldArrayCell)> {
        self.slot.cells.arrays.iter().collect()
    }
}

/// A multi-cell atomic update.
///
/// Reads see the transaction's own earlier writes. `None` in a write slot
/// resets the cell (removes it from the registry).
pub struct Transaction<'a> {
    form_id: &'a FormId,
    base: &'a FormSlot,
    cleared: bool,
    field_writes: IndexMap<CellKey, Option<FieldCell>>,
    array_writes: IndexMap<CellKey, Option<FieldArrayCell>>,
    initial: Option<InitialValues>,
    live: Option<FormValues>,
}

/// Owned result of a finished transaction, applied by [`CellStore::commit`].
struct Changes {
    cleared: bool,
    field_writes: IndexMap<CellKey, Option<FieldCell>>,
    array_writes: IndexMap<CellKey, Option<FieldArrayCell>>,
    initial: Option<InitialValues>,
    live: Option<FormValues>,
}

impl Changes {
    fn is_empty(&self) -> bool {
        !self.cleared
            && self.field_writes.is_empty()
            && self.array_writes.is_empty()
            && self.initial.is_none()
            && self.live.is_none()
    }
}

impl<'a> Transaction<'a> {
    fn new(form_id: &'a FormId, base: &'a FormSlot) -> Self {
        Self {
            form_id,
            base,
            cleared: false,
            field_writes: IndexMap::new(),
            array_writes: IndexMap::new(),
            initial: None,
            live: None,
        }
    }

    /// Current field cell, or the default cell when it doesn't exist.
    pub fn field_or_default(&self, key: &CellKey) -> FieldCell {
        self.field(key).cloned().unwrap_or_default()
    }

    pub fn field_array_or_default(&self, key: &CellKey) -> FieldArrayCell {
        self.field_array(key).cloned().unwrap_or_default()
    }

    pub fn set_field(&mut self, key: CellKey, cell: FieldCell) {
        self.field_writes.insert(key, Some(cell));
    }

    pub fn update_field(&mut self, key: &CellKey, f: impl FnOnce(&mut FieldCell)) {
        let mut cell = self.field_or_default(key);
        f(&mut cell);
        self.field_writes.insert(key.clone(), Some(cell));
    }

    pub fn reset_field(&mut self, key: &CellKey) {
        self.field_writes.insert(key.clone(), None);
    }

    pub fn set_field_array(&mut self, key: CellKey, cell: FieldArrayCell) {
        self.array_writes.insert(key, Some(cell));
    }

    pub fn update_field_array(&mut self, key: &CellKey, f: impl FnOnce(&mut FieldArrayCell)) {
        let mut cell = self.field_array_or_default(key);
        f(&mut cell);
        self.array_writes.insert(key.clone(), Some(cell));
    }

    pub fn reset_field_array(&mut self, key: &CellKey) {
        self.array_writes.insert(key.clone(), None);
    }

    /// Reset every cell of the form and empty its registry.
    pub fn reset_all_cells(&mut self) {
        self.cleared = true;
        self.field_writes.clear();
        self.array_writes.clear();
    }

    pub fn set_initial_values(&mut self, initial: InitialValues) {
        self.initial = Some(initial);
    }

    pub fn set_live_values(&mut self, live: FormValues) {
        self.live = Some(live);
    }

    fn into_changes(self) -> Changes {
        Changes {
            cleared: self.cleared,
            field_writes: self.field_writes,
            array_writes: self.array_writes,
            initial: self.initial,
            live: self.live,
        }
    }
}

impl CellRead for Transaction<'_> {
    fn form_id(&self) -> &FormId {
        self.form_id
    }

    fn initial_values(&self) -> &InitialValues {
        self.initial.as_ref().unwrap_or(&self.base.initial)
    }

    fn field(&self, key: &CellKey) -> Option<&FieldCell> {
        match self.field_writes.get(key) {
            Some(write) => write.as_ref(),
            None if self.cleared => None,
            None => self.base.cells.fields.get(key),
        }
    }

    fn field_array(&self, key: &CellKey) -> Option<&FieldArrayCell> {
        match self.array_writes.get(key) {
            Some(write) => write.as_ref(),
            None if self.cleared => None,
            None => self.base.cells.arrays.get(key),
        }
    }

    fn registered_fields(&self) -> Vec<(&CellKey, &FieldCell)> {
        overlay(&self.base.cells.fields, &self.field_writes, self.cleared)
    }

    fn registered_field_arrays(&self) -> Vec<(&CellKey, &FieldArrayCell)> {
        overlay(&self.base.cells.arrays, &self.array_writes, self.cleared)
    }
}

/// Base entries (unless cleared) patched by pending writes, then new entries.
fn overlay<'s, C>(
    base: &'s IndexMap<CellKey, C>,
    writes: &'s IndexMap<CellKey, Option<C>>,
    cleared: bool,
) -> Vec<(&'s CellKey, &'s C)> {
    let mut out = Vec::with_capacity(base.len() + writes.len());
    if !cleared {
        for (key, cell) in base {
            match writes.get(key) {
                Some(Some(written)) => out.push((key, written)),
                Some(None) => {}
                None => out.push((key, cell)),
            }
        }
    }
    for (key, write) in writes {
        if let Some(cell) = write {
            if cleared || !base.contains_key(key) {
                out.push((key, cell));
            }
        }
    }
    out
}

/// All form instances plus the subscription bookkeeping for live views.
#[derive(Debug, Default)]
pub struct CellStore {
    forms: HashMap<FormId, FormSlot>,
    keys: KeyInterner,
    subscriptions: SubscriptionIndex,
    /// Form each live watcher reads, so dropping a form can release its keys.
    watcher_forms: HashMap<WatcherId, FormId>,
    stale: HashSet<WatcherId>,
    next_watcher_id: WatcherId,
}

impl CellStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a form instance. A pinned id that already exists is reused as is.
    pub fn create_form(&mut self, options: ProviderOptions) -> FormId {
        let form_id = options
            .form_id
            .map(FormId::new)
            .unwrap_or_else(FormId::generate);
        self.forms.entry(form_id.clone()).or_insert_with(|| {
            tracing::debug!(form = %form_id, "form instance created");
            FormSlot {
                initial: InitialValues::default(),
                live: FormValues::default(),
                cells: FormCells::default(),
                observe_values: !options.skip_values_observer,
            }
        });
        form_id
    }

    /// Delete a form instance, its registry, and the subscriptions of every
    /// watcher still reading it.
    pub fn drop_form(&mut self, form_id: &FormId) -> bool {
        let watchers: Vec<WatcherId> = self
            .watcher_forms
            .iter()
            .filter(|(_, form)| *form == form_id)
            .map(|(&watcher, _)| watcher)
            .collect();
        for watcher in watchers {
            self.unsubscribe(watcher);
        }
        let removed = self.forms.remove(form_id).is_some();
        if removed {
            tracing::debug!(form = %form_id, "form instance dropped");
        }
        removed
    }

    pub fn has_form(&self, form_id: &FormId) -> bool {
        self.forms.contains_key(form_id)
    }

    /// Snapshot view of one form.
    pub fn view<'a>(&'a self, form_id: &'a FormId) -> Result<FormView<'a>, FormError> {
        let slot = self
            .forms
            .get(form_id)
            .ok_or_else(|| FormError::UnknownForm(form_id.clone()))?;
        Ok(FormView { form_id, slot })
    }

    pub fn initial_values(&self, form_id: &FormId) -> Result<&InitialValues, FormError> {
        self.forms
            .get(form_id)
            .map(|slot| &slot.initial)
            .ok_or_else(|| FormError::UnknownForm(form_id.clone()))
    }

    /// Live `{values, extraInfos}` snapshot kept current by the values observer.
    pub fn live_values(&self, form_id: &FormId) -> Result<&FormValues, FormError> {
        self.forms
            .get(form_id)
            .map(|slot| &slot.live)
            .ok_or_else(|| FormError::UnknownForm(form_id.clone()))
    }

    pub(crate) fn observes_values(&self, form_id: &FormId) -> bool {
        self.forms
            .get(form_id)
            .is_some_and(|slot| slot.observe_values)
    }

    /// Run `f` against one consistent snapshot and apply its writes as a unit.
    /// An `Err` from `f` discards every write.
    pub fn transaction<R>(
        &mut self,
        form_id: &FormId,
        f: impl FnOnce(&mut Transaction<'_>) -> Result<R, FormError>,
    ) -> Result<R, FormError> {
        let slot = self
            .forms
            .get(form_id)
            .ok_or_else(|| FormError::UnknownForm(form_id.clone()))?;
        let mut tx = Transaction::new(form_id, slot);
        let out = f(&mut tx)?;
        let changes = tx.into_changes();
        self.commit(form_id, changes);
        Ok(out)
    }

    fn commit(&mut self, form_id: &FormId, changes: Changes) {
        if changes.is_empty() {
            return;
        }
        let Some(slot) = self.forms.get_mut(form_id) else {
            return;
        };

        let mut written: Vec<WatchKey> = Vec::new();
        if changes.cleared {
            written.extend(slot.cells.fields.keys().cloned().map(WatchKey::Field));
            written.extend(slot.cells.arrays.keys().cloned().map(WatchKey::FieldArray));
            slot.cells.fields.clear();
            slot.cells.arrays.clear();
        }
        for (key, write) in changes.field_writes {
            match write {
                Some(cell) => {
                    slot.cells.fields.insert(key.clone(), cell);
                }
                None => {
                    slot.cells.fields.shift_remove(&key);
                }
            }
            written.push(WatchKey::Field(key));
        }
        for (key, write) in changes.array_writes {
            match write {
                Some(cell) => {
                    slot.cells.arrays.insert(key.clone(), cell);
                }
                None => {
                    slot.cells.arrays.shift_remove(&key);
                }
            }
            written.push(WatchKey::FieldArray(key));
        }
        if let Some(initial) = changes.initial {
            slot.initial = initial;
            written.push(WatchKey::InitialValues);
        }
        if let Some(live) = changes.live {
            slot.live = live;
        }
        if slot.observe_values {
            let live = aggregate::compute_form_values(&FormView { form_id, slot });
            slot.live = live;
        }
        written.push(WatchKey::AnyCell);

        let mut notified = 0usize;
        for key in &written {
            let Some(key_id) = self.keys.get(&key.canonical(form_id)) else {
                continue;
            };
            for watcher in self.subscriptions.watchers_of(key_id) {
                if self.stale.insert(watcher) {
                    notified += 1;
                }
            }
        }
        tracing::trace!(
            form = %form_id,
            writes = written.len() - 1,
            notified,
            "transaction committed"
        );
    }

    /// Register a live view depending on `keys`.
    pub fn subscribe(&mut self, form_id: &FormId, keys: &[WatchKey]) -> WatcherId {
        let id = self.next_watcher_id;
        self.next_watcher_id += 1;
        self.resubscribe(id, form_id, keys);
        id
    }

    /// Replace the dependencies of an existing view (its key set can change
    /// as rows come and go).
    pub fn resubscribe(&mut self, watcher: WatcherId, form_id: &FormId, keys: &[WatchKey]) {
        let key_ids = keys
            .iter()
            .map(|key| self.keys.intern(&key.canonical(form_id)))
            .collect();
        for key_id in self.subscriptions.set(watcher, key_ids) {
            self.keys.release(key_id);
        }
        self.watcher_forms.insert(watcher, form_id.clone());
    }

    pub fn unsubscribe(&mut self, watcher: WatcherId) {
        for key_id in self.subscriptions.remove(watcher) {
            self.keys.release(key_id);
        }
        self.watcher_forms.remove(&watcher);
        self.stale.remove(&watcher);
    }

    /// Number of watch keys currently interned.
    #[cfg(test)]
    pub(crate) fn interned_keys(&self) -> usize {
        self.keys.count()
    }

    /// Whether anything the view depends on was written since the last call.
    pub fn take_stale(&mut self, watcher: WatcherId) -> bool {
        self.stale.remove(&watcher)
    }
}
