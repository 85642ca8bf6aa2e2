//! Field binding: the per-field contract between one leaf input and its cell.
//!
//! A binding is driven by [`FieldBinding::sync`], which plays the role of a
//! render pass: it seeds the cell when the form's initial values moved past
//! the cell's version, captures the validator, applies a late default value
//! and re-runs validation when the value, the dependency values or the
//! touched flag changed since the previous pass.

use crate::aggregate::initial_top_level;
use crate::cell::{non_empty, Ancestor, CellKey, FieldCell, FieldRef, FieldValidator, FormValues};
use crate::error::FormError;
use crate::ids::FormId;
use crate::store::{CellRead, CellStore};
use crate::value::{deep_equal, deep_equal_opt};
use crate::watch::FieldWatch;
use serde_json::Value;
use std::rc::Rc;

/// Configuration of one bound field.
#[derive(Clone, Default)]
pub struct FieldProps {
    pub name: String,
    pub ancestors: Vec<Ancestor>,
    pub default_value: Option<Value>,
    /// Captured once per initial-values version; later changes are ignored.
    pub validate: Option<FieldValidator>,
    /// Replaces the stored validator whenever a different `Rc` is passed.
    /// Keep the same `Rc` across passes unless the validator really changed.
    pub validate_callback: Option<FieldValidator>,
    /// Fields whose values are handed to the validator and trigger re-validation.
    pub dep_fields: Vec<FieldRef>,
    pub skip_unregister: bool,
}

impl FieldProps {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            ..Default::default()
        }
    }

    pub fn within(mut self, ancestors: Vec<Ancestor>) -> Self {
        self.ancestors = ancestors;
        self
    }

    pub fn default_value(mut self, value: Value) -> Self {
        self.default_value = Some(value);
        self
    }

    pub fn validate(
        mut self,
        validate: impl Fn(Option<&Value>, &FormValues) -> Option<String> + 'static,
    ) -> Self {
        self.validate = Some(Rc::new(validate));
        self
    }

    pub fn validate_callback(mut self, validate: FieldValidator) -> Self {
        self.validate_callback = Some(validate);
        self
    }

    pub fn dep_fields<R: Into<FieldRef>>(mut self, refs: impl IntoIterator<Item = R>) -> Self {
        self.dep_fields = refs.into_iter().map(Into::into).collect();
        self
    }

    pub fn skip_unregister(mut self) -> Self {
        self.skip_unregister = true;
        self
    }

    fn captured_validator(&self) -> Option<FieldValidator> {
        self.validate_callback
            .clone()
            .or_else(|| self.validate.clone())
    }
}

/// What the previous validation pass looked at.
struct Observed {
    value: Option<Value>,
    deps: FormValues,
    touched: bool,
}

pub struct FieldBinding {
    form_id: FormId,
    key: CellKey,
    props: FieldProps,
    deps: Option<FieldWatch>,
    observed: Option<Observed>,
}

impl FieldBinding {
    /// Bind without touching the store. Call [`sync`](Self::sync) to seed.
    pub fn attach(form_id: &FormId, props: FieldProps) -> Self {
        Self {
            form_id: form_id.clone(),
            key: CellKey::new(props.name.clone(), props.ancestors.clone()),
            props,
            deps: None,
            observed: None,
        }
    }

    pub fn mount(
        store: &mut CellStore,
        form_id: &FormId,
        props: FieldProps,
    ) -> Result<Self, FormError> {
        let mut binding = Self::attach(form_id, props);
        if !binding.props.dep_fields.is_empty() {
            binding.deps = Some(FieldWatch::open(
                store,
                form_id,
                binding.props.dep_fields.clone(),
            )?);
        }
        binding.sync(store)?;
        tracing::debug!(form = %form_id, field = %binding.key, "field mounted");
        Ok(binding)
    }

    pub fn key(&self) -> &CellKey {
        &self.key
    }

    /// Bring the cell in line with the current initial values and props, then
    /// re-validate if anything the validator looks at changed.
    pub fn sync(&mut self, store: &mut CellStore) -> Result<(), FormError> {
        self.seed(store)?;
        if let Some(deps) = &mut self.deps {
            deps.poll(store)?;
        }
        self.revalidate(store)
    }

    fn seed(&self, store: &mut CellStore) -> Result<(), FormError> {
        let key = &self.key;
        let props = &self.props;
        store.transaction(&self.form_id, |tx| {
            let version = tx.initial_values().version;
            let current = tx.field(key);
            if current.map_or(0, |cell| cell.init_ver) < version {
                if key.is_top_level() {
                    let (initial, extra_info) = initial_top_level(&*tx, &key.name);
                    tx.set_field(
                        key.clone(),
                        FieldCell {
                            data: initial.or_else(|| props.default_value.clone()),
                            extra_info,
                            error: None,
                            touched: false,
                            validate: props.captured_validator(),
                            init_ver: version,
                        },
                    );
                } else {
                    // row fields are seeded by their field array
                    let validate = props.captured_validator();
                    tx.update_field(key, |cell| {
                        cell.validate = validate;
                        cell.init_ver = version;
                    });
                }
            } else {
                let stored = current.and_then(|cell| cell.validate.clone());
                match (&props.validate_callback, &props.validate) {
                    (Some(callback), _) => {
                        if !stored.is_some_and(|stored| Rc::ptr_eq(&stored, callback)) {
                            let callback = callback.clone();
                            tx.update_field(key, |cell| cell.validate = Some(callback));
                        }
                    }
                    (None, Some(validate)) if stored.is_none() => {
                        let validate = validate.clone();
                        tx.update_field(key, |cell| cell.validate = Some(validate));
                    }
                    _ => {}
                }
            }

            // null, "" and 0 are values; only undefined takes the default
            if let Some(default) = &props.default_value {
                if tx.field(key).is_some_and(|cell| cell.data.is_none()) {
                    let default = default.clone();
                    tx.update_field(key, |cell| cell.data = Some(default));
                }
            }
            Ok(())
        })
    }

    fn revalidate(&mut self, store: &mut CellStore) -> Result<(), FormError> {
        let deps = self
            .deps
            .as_ref()
            .map(|watch| watch.values().clone())
            .unwrap_or_default();
        let (value, touched, stored_error, stored_validate) = {
            let view = store.view(&self.form_id)?;
            let Some(cell) = view.field(&self.key) else {
                return Ok(());
            };
            (
                cell.data.clone(),
                cell.touched,
                cell.error.clone(),
                cell.validate.clone(),
            )
        };

        let changed = match &self.observed {
            None => true,
            Some(prev) => {
                !deep_equal_opt(prev.value.as_ref(), value.as_ref())
                    || !deep_equal(&prev.deps.values, &deps.values)
                    || !deep_equal(&prev.deps.extra_infos, &deps.extra_infos)
                    || (!prev.touched && touched)
            }
        };
        if !changed {
            if let Some(prev) = &mut self.observed {
                prev.touched = touched;
            }
            return Ok(());
        }

        let validate = self.props.validate_callback.clone().or(stored_validate);
        let error = validate.and_then(|validate| non_empty(validate(value.as_ref(), &deps)));
        self.observed = Some(Observed {
            value,
            deps,
            touched,
        });
        if error != stored_error {
            let key = &self.key;
            store.transaction(&self.form_id, |tx| {
                tx.update_field(key, |cell| cell.error = error);
                Ok(())
            })?;
        }
        Ok(())
    }

    fn read<T>(&self, store: &CellStore, f: impl FnOnce(&FieldCell) -> T) -> Option<T> {
        let view = store.view(&self.form_id).ok()?;
        view.field(&self.key).map(f)
    }

    pub fn value(&self, store: &CellStore) -> Option<Value> {
        self.read(store, |cell| cell.data.clone()).flatten()
    }

    pub fn extra_info(&self, store: &CellStore) -> Option<Value> {
        self.read(store, |cell| cell.extra_info.clone()).flatten()
    }

    pub fn touched(&self, store: &CellStore) -> bool {
        self.read(store, |cell| cell.touched).unwrap_or(false)
    }

    /// The stored error, hidden until the field has been touched.
    pub fn error(&self, store: &CellStore) -> Option<String> {
        self.read(store, |cell| cell.touched.then(|| cell.error.clone()).flatten())
            .flatten()
    }

    pub fn init_version(&self, store: &CellStore) -> u64 {
        self.read(store, |cell| cell.init_ver).unwrap_or(0)
    }

    /// Write the value. Validation follows on the next [`sync`](Self::sync).
    pub fn set_value(
        &self,
        store: &mut CellStore,
        data: Option<Value>,
        extra_info: Option<Value>,
    ) -> Result<(), FormError> {
        let key = &self.key;
        store.transaction(&self.form_id, |tx| {
            tx.update_field(key, |cell| {
                cell.data = data;
                cell.extra_info = extra_info;
            });
            Ok(())
        })
    }

    /// Mark as touched. A second call is a no-op.
    pub fn on_blur(&self, store: &mut CellStore) -> Result<(), FormError> {
        if self.touched(store) {
            return Ok(());
        }
        let key = &self.key;
        store.transaction(&self.form_id, |tx| {
            tx.update_field(key, |cell| cell.touched = true);
            Ok(())
        })
    }

    /// Reset the cell unless unregistering is suppressed. Fields inside rows
    /// are reset by their row's removal instead.
    pub fn unmount(self, store: &mut CellStore) -> Result<(), FormError> {
        if let Some(deps) = self.deps {
            deps.close(store);
        }
        if !store.has_form(&self.form_id) {
            return Ok(());
        }
        let skip_global = store.initial_values(&self.form_id)?.settings.skip_unregister;
        if self.props.skip_unregister || skip_global || !self.key.is_top_level() {
            return Ok(());
        }
        let key = &self.key;
        store.transaction(&self.form_id, |tx| {
            tx.reset_field(key);
            Ok(())
        })?;
        tracing::debug!(form = %self.form_id, field = %key, "field unregistered");
        Ok(())
    }
}
