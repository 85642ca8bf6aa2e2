//! Form controller: initial values, whole-form validation and submission.

use crate::aggregate::{compute_field_array_data, compute_form_values, write_back_errors, ValidationMode};
use crate::cell::{non_empty, CellKey, FieldError, FieldKind, FieldRef, FormValues};
use crate::error::FormError;
use crate::ids::FormId;
use crate::store::{CellRead, CellStore, FormSettings, InitialValues, Transaction};
use futures::future::{FutureExt, LocalBoxFuture};
use serde_json::{Map, Value};
use std::future::Future;
use std::rc::Rc;

pub type FormValidator = Rc<dyn Fn(&Value) -> Vec<String>>;
pub type SubmitHandler = Rc<dyn Fn(&Value, &Value) -> SubmitReply>;
pub type ErrorHandler = Rc<dyn Fn(&[FieldError], &[String], &Value)>;

/// What a submit handler hands back.
pub enum SubmitReply {
    /// Handled synchronously.
    Done,
    /// Settles later. `Ok(false)` skips re-baselining the initial values.
    Deferred(LocalBoxFuture<'static, Result<bool, SubmitRejected>>),
}

impl SubmitReply {
    pub fn deferred(reply: impl Future<Output = Result<bool, SubmitRejected>> + 'static) -> Self {
        SubmitReply::Deferred(reply.boxed_local())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("submit rejected: {0}")]
pub struct SubmitRejected(pub String);

/// The native event a submit was triggered by, if any.
pub trait SubmitEvent {
    fn prevent_default(&mut self);
    fn stop_propagation(&mut self);
}

/// A `validate_fields` target. `Infer` resolves a bare name to a top-level
/// field array when one is registered under it, else to a field.
#[derive(Debug, Clone, PartialEq)]
pub enum ValidateTarget {
    Infer(String),
    Exact(FieldRef),
}

impl From<&str> for ValidateTarget {
    fn from(name: &str) -> Self {
        ValidateTarget::Infer(name.to_string())
    }
}

impl From<FieldRef> for ValidateTarget {
    fn from(field_ref: FieldRef) -> Self {
        ValidateTarget::Exact(field_ref)
    }
}

pub enum SubmitOutcome {
    Invalid {
        errors: Vec<FieldError>,
        form_errors: Vec<String>,
    },
    Submitted,
    Pending(PendingSubmit),
}

/// An in-flight asynchronous submit.
pub struct PendingSubmit {
    values: FormValues,
    reply: LocalBoxFuture<'static, Result<bool, SubmitRejected>>,
}

impl PendingSubmit {
    pub async fn wait(self) -> SettledSubmit {
        SettledSubmit {
            result: self.reply.await,
            values: self.values,
        }
    }
}

/// A settled submit, to be handed to [`FormController::complete_submit`].
pub struct SettledSubmit {
    values: FormValues,
    result: Result<bool, SubmitRejected>,
}

impl SettledSubmit {
    pub fn result(&self) -> &Result<bool, SubmitRejected> {
        &self.result
    }
}

#[derive(Clone, Default)]
pub struct FormProps {
    pub initial_values: Option<Value>,
    pub on_submit: Option<SubmitHandler>,
    pub on_error: Option<ErrorHandler>,
    pub validate: Option<FormValidator>,
    pub skip_unregister: bool,
    /// Re-baseline to `initial_values` instead of the submitted values.
    pub reinitialize_on_submit: bool,
    pub skip_unused_initial_values: bool,
}

impl FormProps {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn initial_values(mut self, values: Value) -> Self {
        self.initial_values = Some(values);
        self
    }

    pub fn on_submit(mut self, handler: impl Fn(&Value, &Value) -> SubmitReply + 'static) -> Self {
        self.on_submit = Some(Rc::new(handler));
        self
    }

    pub fn on_error(
        mut self,
        handler: impl Fn(&[FieldError], &[String], &Value) + 'static,
    ) -> Self {
        self.on_error = Some(Rc::new(handler));
        self
    }

    pub fn validate(mut self, validate: impl Fn(&Value) -> Vec<String> + 'static) -> Self {
        self.validate = Some(Rc::new(validate));
        self
    }

    pub fn skip_unregister(mut self) -> Self {
        self.skip_unregister = true;
        self
    }

    pub fn reinitialize_on_submit(mut self) -> Self {
        self.reinitialize_on_submit = true;
        self
    }

    pub fn skip_unused_initial_values(mut self) -> Self {
        self.skip_unused_initial_values = true;
        self
    }

    pub fn settings(&self) -> FormSettings {
        FormSettings {
            skip_unregister: self.skip_unregister,
            skip_unused_initial_values: self.skip_unused_initial_values,
        }
    }
}

fn empty_object() -> Value {
    Value::Object(Map::new())
}

/// Reset every cell and install a new initial-values record with the version
/// bumped. Omitted parts keep their previous value.
pub(crate) fn establish_initial_values(
    store: &mut CellStore,
    form_id: &FormId,
    values: Option<Value>,
    settings: Option<FormSettings>,
    extra_infos: Option<Value>,
) -> Result<u64, FormError> {
    let version = store.transaction(form_id, |tx| {
        let previous = tx.initial_values().clone();
        let next = InitialValues {
            values: values.unwrap_or(previous.values),
            extra_infos: extra_infos.unwrap_or(previous.extra_infos),
            version: previous.version + 1,
            settings: settings.unwrap_or(previous.settings),
        };
        let version = next.version;
        tx.reset_all_cells();
        tx.set_live_values(FormValues {
            values: next.values.clone(),
            extra_infos: next.extra_infos.clone(),
        });
        tx.set_initial_values(next);
        Ok(version)
    })?;
    tracing::debug!(form = %form_id, version, "initial values established");
    Ok(version)
}

/// Run the stored validator of one field cell against `values` and persist
/// the outcome. A failing field is marked touched so its message shows.
fn validate_field_cell(
    tx: &mut Transaction<'_>,
    key: &CellKey,
    values: &FormValues,
) -> Option<FieldError> {
    let cell = tx.field(key)?;
    let validate = cell.validate.clone()?;
    let error = non_empty(validate(cell.data.as_ref(), values));
    tx.update_field(key, |cell| {
        if error.is_some() {
            cell.touched = true;
        }
        cell.error = error.clone();
    });
    error.map(|error| FieldError {
        error,
        name: key.name.clone(),
        kind: FieldKind::Field,
        ancestors: key.ancestors.clone(),
    })
}

pub struct FormController {
    form_id: FormId,
    props: FormProps,
    version: u64,
    mounted: bool,
    submitting: bool,
}

impl FormController {
    /// Take over `form_id` and seed it from `props.initial_values`.
    pub fn mount(
        store: &mut CellStore,
        form_id: &FormId,
        props: FormProps,
    ) -> Result<Self, FormError> {
        let mut controller = Self {
            form_id: form_id.clone(),
            props,
            version: 0,
            mounted: true,
            submitting: false,
        };
        let initial = controller
            .props
            .initial_values
            .clone()
            .unwrap_or_else(empty_object);
        let settings = controller.props.settings();
        controller.update_initial_values(store, Some(initial), Some(settings), None)?;
        Ok(controller)
    }

    pub fn form_id(&self) -> &FormId {
        &self.form_id
    }

    /// The initial-values version this controller last established.
    pub fn version(&self) -> u64 {
        self.version
    }

    pub fn is_submitting(&self) -> bool {
        self.submitting
    }

    pub fn update_initial_values(
        &mut self,
        store: &mut CellStore,
        values: Option<Value>,
        settings: Option<FormSettings>,
        extra_infos: Option<Value>,
    ) -> Result<u64, FormError> {
        self.version = establish_initial_values(store, &self.form_id, values, settings, extra_infos)?;
        Ok(self.version)
    }

    /// Re-baseline keeping the current settings.
    pub fn reset(
        &mut self,
        store: &mut CellStore,
        values: Option<Value>,
        extra_infos: Option<Value>,
    ) -> Result<u64, FormError> {
        self.update_initial_values(store, values, None, extra_infos)
    }

    pub fn get_values(&self, store: &CellStore) -> Result<FormValues, FormError> {
        Ok(compute_form_values(&store.view(&self.form_id)?))
    }

    /// Validate the named targets. Field validators see the whole form's values.
    pub fn validate_fields(
        &self,
        store: &mut CellStore,
        targets: &[ValidateTarget],
    ) -> Result<Vec<FieldError>, FormError> {
        let values = self.get_values(store)?;
        store.transaction(&self.form_id, |tx| {
            let mut errors = Vec::new();
            for target in targets {
                let field_ref = match target {
                    ValidateTarget::Infer(name) => {
                        if tx.field_array(&CellKey::top_level(name.as_str())).is_some() {
                            FieldRef::field_array(name.as_str())
                        } else {
                            FieldRef::field(name.as_str())
                        }
                    }
                    ValidateTarget::Exact(field_ref) => field_ref.clone(),
                };
                let key = field_ref.key();
                match field_ref.kind {
                    FieldKind::Field => errors.extend(validate_field_cell(tx, &key, &values)),
                    FieldKind::FieldArray => {
                        let found =
                            compute_field_array_data(&*tx, &key, &[], ValidationMode::Full)?;
                        write_back_errors(tx, &found.errors);
                        errors.extend(found.errors);
                    }
                }
            }
            Ok(errors)
        })
    }

    /// Validate every registered field cell and every field array's own
    /// validator, persisting the outcome.
    pub fn validate_all(&self, store: &mut CellStore) -> Result<Vec<FieldError>, FormError> {
        let values = self.get_values(store)?;
        self.validate_all_with(store, &values)
    }

    fn validate_all_with(
        &self,
        store: &mut CellStore,
        values: &FormValues,
    ) -> Result<Vec<FieldError>, FormError> {
        store.transaction(&self.form_id, |tx| {
            let fields: Vec<CellKey> = tx
                .registered_fields()
                .into_iter()
                .map(|(key, _)| key.clone())
                .collect();
            let arrays: Vec<CellKey> = tx
                .registered_field_arrays()
                .into_iter()
                .map(|(key, _)| key.clone())
                .collect();

            let mut errors = Vec::new();
            for key in &fields {
                errors.extend(validate_field_cell(tx, key, values));
            }
            // row fields were covered above
            for key in &arrays {
                let found = compute_field_array_data(&*tx, key, &[], ValidationMode::ArrayOnly)?;
                write_back_errors(tx, &found.errors);
                errors.extend(found.errors);
            }
            Ok(errors)
        })
    }

    /// Validate, then either report the errors or hand the values to the
    /// submit handler. A synchronous submit re-baselines right away; a
    /// deferred one is finished by [`complete_submit`](Self::complete_submit).
    pub fn submit(
        &mut self,
        store: &mut CellStore,
        event: Option<&mut dyn SubmitEvent>,
    ) -> Result<SubmitOutcome, FormError> {
        if let Some(event) = event {
            event.prevent_default();
            event.stop_propagation();
        }
        let values = self.get_values(store)?;
        let errors = self.validate_all_with(store, &values)?;
        let form_errors = self
            .props
            .validate
            .as_ref()
            .map(|validate| validate(&values.values))
            .unwrap_or_default();

        if !errors.is_empty() || !form_errors.is_empty() {
            tracing::debug!(
                form = %self.form_id,
                field_errors = errors.len(),
                form_errors = form_errors.len(),
                "submit blocked by validation"
            );
            if let Some(on_error) = &self.props.on_error {
                on_error(&errors, &form_errors, &values.values);
            }
            return Ok(SubmitOutcome::Invalid {
                errors,
                form_errors,
            });
        }

        self.submitting = true;
        let reply = match &self.props.on_submit {
            Some(on_submit) => on_submit(&values.values, &values.extra_infos),
            None => SubmitReply::Done,
        };
        match reply {
            SubmitReply::Done => {
                self.submitting = false;
                self.rebaseline(store, values)?;
                Ok(SubmitOutcome::Submitted)
            }
            SubmitReply::Deferred(reply) => Ok(SubmitOutcome::Pending(PendingSubmit { values, reply })),
        }
    }

    /// Finish a deferred submit. A rejection is logged and otherwise ignored.
    pub fn complete_submit(
        &mut self,
        store: &mut CellStore,
        settled: SettledSubmit,
    ) -> Result<(), FormError> {
        self.submitting = false;
        match settled.result {
            Ok(true) if self.mounted => self.rebaseline(store, settled.values),
            Ok(_) => Ok(()),
            Err(rejection) => {
                tracing::debug!(form = %self.form_id, %rejection, "submit rejected");
                Ok(())
            }
        }
    }

    fn rebaseline(&mut self, store: &mut CellStore, submitted: FormValues) -> Result<(), FormError> {
        let settings = Some(self.props.settings());
        if self.props.reinitialize_on_submit {
            let initial = self
                .props
                .initial_values
                .clone()
                .unwrap_or_else(empty_object);
            self.update_initial_values(store, Some(initial), settings, Some(empty_object()))?;
        } else {
            self.update_initial_values(
                store,
                Some(submitted.values),
                settings,
                Some(submitted.extra_infos),
            )?;
        }
        Ok(())
    }

    /// Reset every cell of the form. The form itself stays registered.
    pub fn unmount(&mut self, store: &mut CellStore) -> Result<(), FormError> {
        self.mounted = false;
        if !store.has_form(&self.form_id) {
            return Ok(());
        }
        store.transaction(&self.form_id, |tx| {
            tx.reset_all_cells();
            Ok(())
        })
    }
}
