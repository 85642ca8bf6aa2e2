//! End-to-end form scenarios driven through the public API.
//!
//! Each test plays the part of a UI: mount bindings, write values, call
//! `sync` where a render pass would happen, then inspect aggregated values.

use futures::executor::block_on;
use serde_json::{json, Value};
use std::cell::RefCell;
use std::collections::HashSet;
use std::rc::Rc;
use witform_state_wasm::{
    Ancestor, CellRead, CellStore, FieldArrayBinding, FieldArrayProps, FieldBinding, FieldDecl,
    FieldKind, FieldProps, FieldRef, FieldWatch, FormContext, FormController, FormError, FormId,
    FormProps, FormValues, ProviderOptions, RowIndex, SubmitOutcome, SubmitRejected, SubmitReply,
};

// ============================================================================
// Helpers
// ============================================================================

fn new_form(store: &mut CellStore) -> FormId {
    store.create_form(ProviderOptions::default())
}

fn values(store: &CellStore, form: &FormId) -> Value {
    FormContext::new(form.clone()).get_values(store).unwrap().values
}

// ============================================================================
// Field arrays
// ============================================================================

#[test]
fn items_append_remove_submit() {
    let mut store = CellStore::new();
    let form = new_form(&mut store);
    let submitted = Rc::new(RefCell::new(None));
    let mut controller = {
        let submitted = submitted.clone();
        FormController::mount(
            &mut store,
            &form,
            FormProps::new()
                .initial_values(json!({ "items": [] }))
                .on_submit(move |values, _| {
                    *submitted.borrow_mut() = Some(values.clone());
                    SubmitReply::Done
                }),
        )
        .unwrap()
    };
    let items =
        FieldArrayBinding::mount(&mut store, &form, FieldArrayProps::new("items", ["amount"]))
            .unwrap();

    items.append(&mut store, &[json!({ "amount": 5 })]).unwrap();
    assert_eq!(values(&store, &form)["items"], json!([{ "amount": 5 }]));

    items.append(&mut store, &[json!({ "amount": 7 })]).unwrap();
    assert_eq!(
        values(&store, &form)["items"],
        json!([{ "amount": 5 }, { "amount": 7 }])
    );

    items.remove(&mut store, RowIndex(0)).unwrap();
    assert_eq!(values(&store, &form)["items"], json!([{ "amount": 7 }]));

    let outcome = controller.submit(&mut store, None).unwrap();
    assert!(matches!(outcome, SubmitOutcome::Submitted));
    assert_eq!(
        submitted.borrow().clone(),
        Some(json!({ "items": [{ "amount": 7 }] }))
    );
}

#[test]
fn insert_and_remove_keep_untouched_row_ids() {
    let mut store = CellStore::new();
    let form = new_form(&mut store);
    FormController::mount(
        &mut store,
        &form,
        FormProps::new().initial_values(json!({ "items": [{ "n": "a" }, { "n": "b" }, { "n": "c" }] })),
    )
    .unwrap();
    let items =
        FieldArrayBinding::mount(&mut store, &form, FieldArrayProps::new("items", ["n"])).unwrap();
    let before = items.row_ids(&store);

    let inserted = items.insert(&mut store, RowIndex(1), &[json!({ "n": "x" })]).unwrap();
    let after = items.row_ids(&store);
    assert_eq!(after, vec![before[0], inserted[0], before[1], before[2]]);

    items.remove(&mut store, RowIndex(0)).unwrap();
    assert_eq!(items.row_ids(&store), vec![inserted[0], before[1], before[2]]);

    // a binding addressed by row id still sees its own row
    let c = FieldBinding::mount(
        &mut store,
        &form,
        FieldProps::new("n").within(items.row_ancestors(before[2])),
    )
    .unwrap();
    assert_eq!(c.value(&store), Some(json!("c")));
}

#[test]
fn whole_array_set_rewrites_by_position() {
    let mut store = CellStore::new();
    let form = new_form(&mut store);
    FormController::mount(
        &mut store,
        &form,
        FormProps::new().initial_values(json!({ "items": [{ "n": "a" }, { "n": "b" }, { "n": "c" }] })),
    )
    .unwrap();
    let items =
        FieldArrayBinding::mount(&mut store, &form, FieldArrayProps::new("items", ["n"])).unwrap();
    let ids = items.row_ids(&store);
    let first = FieldBinding::mount(
        &mut store,
        &form,
        FieldProps::new("n").within(items.row_ancestors(ids[0])),
    )
    .unwrap();

    items
        .set_value(&mut store, &[json!({ "n": "c" }), json!({ "n": "a" }), json!({ "n": "b" })])
        .unwrap();

    // ids stay in place, values move
    assert_eq!(items.row_ids(&store), ids);
    assert_eq!(first.value(&store), Some(json!("c")));
}

#[test]
fn array_resize_allocates_and_resets() {
    let mut store = CellStore::new();
    let form = new_form(&mut store);
    FormController::mount(
        &mut store,
        &form,
        FormProps::new().initial_values(json!({ "items": [{ "n": 1 }, { "n": 2 }, { "n": 3 }] })),
    )
    .unwrap();
    let items =
        FieldArrayBinding::mount(&mut store, &form, FieldArrayProps::new("items", ["n"])).unwrap();
    let ids = items.row_ids(&store);
    let last = FieldBinding::mount(
        &mut store,
        &form,
        FieldProps::new("n").within(items.row_ancestors(ids[2])),
    )
    .unwrap();

    items.set_value(&mut store, &[json!({ "n": 1 })]).unwrap();
    assert_eq!(items.row_ids(&store), vec![ids[0]]);
    assert_eq!(last.value(&store), None);
    assert!(store.view(&form).unwrap().field(last.key()).is_none());

    items
        .set_value(
            &mut store,
            &[json!({ "n": 1 }), json!({ "n": 2 }), json!({ "n": 3 }), json!({ "n": 4 })],
        )
        .unwrap();
    let grown = items.row_ids(&store);
    assert_eq!(grown.len(), 4);
    assert_eq!(grown[0], ids[0]);
    let unique: HashSet<_> = grown.iter().collect();
    assert_eq!(unique.len(), 4);
    // retired ids are never handed out again
    assert!(!grown[1..].contains(&ids[1]) && !grown[1..].contains(&ids[2]));
}

#[test]
fn nested_arrays_round_trip() {
    let mut store = CellStore::new();
    let form = new_form(&mut store);
    let initial = json!({
        "groups": [
            { "title": "g1", "members": [{ "who": "a" }, { "who": "b" }] },
            { "title": "g2", "members": [] }
        ]
    });
    FormController::mount(
        &mut store,
        &form,
        FormProps::new().initial_values(initial.clone()),
    )
    .unwrap();
    let groups = FieldArrayBinding::mount(
        &mut store,
        &form,
        FieldArrayProps::new(
            "groups",
            [
                FieldDecl::field("title"),
                FieldDecl::field_array("members", vec!["who".into()]),
            ],
        ),
    )
    .unwrap();
    assert_eq!(values(&store, &form), initial);

    let second = groups.row_ids(&store)[1];
    let members = FieldArrayBinding::mount(
        &mut store,
        &form,
        FieldArrayProps::new("members", ["who"]).within(groups.row_ancestors(second)),
    )
    .unwrap();
    members.append(&mut store, &[json!({ "who": "c" })]).unwrap();
    assert_eq!(
        values(&store, &form)["groups"][1]["members"],
        json!([{ "who": "c" }])
    );
}

#[test]
fn nested_array_with_scalar_data_is_rejected() {
    let mut store = CellStore::new();
    let form = new_form(&mut store);
    FormController::mount(
        &mut store,
        &form,
        FormProps::new().initial_values(json!({ "groups": [{ "members": "oops" }] })),
    )
    .unwrap();
    let err = FieldArrayBinding::mount(
        &mut store,
        &form,
        FieldArrayProps::new(
            "groups",
            [FieldDecl::field_array("members", vec!["who".into()])],
        ),
    )
    .err()
    .unwrap();
    assert_eq!(err, FormError::ExpectedArray { name: "members".into() });
}

#[test]
fn validate_all_reports_nested_array_errors() {
    let mut store = CellStore::new();
    let form = new_form(&mut store);
    let controller = FormController::mount(
        &mut store,
        &form,
        FormProps::new().initial_values(json!({
            "groups": [
                { "members": [{ "who": "a" }] },
                { "members": [{ "who": "b" }, { "who": "c" }] }
            ]
        })),
    )
    .unwrap();
    let groups = FieldArrayBinding::mount(
        &mut store,
        &form,
        FieldArrayProps::new(
            "groups",
            [FieldDecl::field_array("members", vec!["who".into()])],
        ),
    )
    .unwrap();
    let rows = groups.row_ids(&store);
    let mut members: Vec<_> = rows
        .iter()
        .map(|&row| {
            FieldArrayBinding::mount(
                &mut store,
                &form,
                FieldArrayProps::new("members", ["who"])
                    .within(groups.row_ancestors(row))
                    .validate(|rows| (rows.len() < 2).then(|| "Need two members".to_string())),
            )
            .unwrap()
        })
        .collect();
    // mounting alone never reports on the seeded rows
    assert_eq!(members[0].error(&store), None);

    let errors = controller.validate_all(&mut store).unwrap();
    assert_eq!(errors.len(), 1);
    assert_eq!(errors[0].name, "members");
    assert_eq!(errors[0].kind, FieldKind::FieldArray);
    assert_eq!(errors[0].error, "Need two members");
    assert_eq!(errors[0].ancestors, vec![Ancestor::new("groups", rows[0])]);
    assert_eq!(members[0].error(&store), Some("Need two members".into()));
    assert_eq!(members[1].error(&store), None);

    members[0].append(&mut store, &[json!({ "who": "d" })]).unwrap();
    members[0].sync(&mut store).unwrap();
    assert!(controller.validate_all(&mut store).unwrap().is_empty());
    assert_eq!(members[0].error(&store), None);
}

#[test]
fn watched_row_field_falls_back_to_initial_value() {
    let mut store = CellStore::new();
    let form = new_form(&mut store);
    FormController::mount(
        &mut store,
        &form,
        FormProps::new().initial_values(json!({
            "items": [{ "amount": 1, "note": "first" }, { "amount": 2, "note": "second" }]
        })),
    )
    .unwrap();
    let items =
        FieldArrayBinding::mount(&mut store, &form, FieldArrayProps::new("items", ["amount"]))
            .unwrap();
    let second = items.row_ids(&store)[1];

    // "note" is not a declared column, so its cell never received data
    let mut watch = FieldWatch::open(
        &mut store,
        &form,
        vec![
            FieldRef::field("note").within(items.row_ancestors(second)),
            FieldRef::field("amount").within(items.row_ancestors(second)),
        ],
    )
    .unwrap();
    assert_eq!(watch.values().values, json!({ "note": "second", "amount": 2 }));

    let note = FieldBinding::mount(
        &mut store,
        &form,
        FieldProps::new("note").within(items.row_ancestors(second)),
    )
    .unwrap();
    note.set_value(&mut store, Some(json!("edited")), None).unwrap();
    assert!(watch.poll(&mut store).unwrap());
    assert_eq!(watch.values().values, json!({ "note": "edited", "amount": 2 }));
}

// ============================================================================
// Fields
// ============================================================================

#[test]
fn email_revalidates_when_name_changes() {
    let mut store = CellStore::new();
    let form = new_form(&mut store);
    FormController::mount(
        &mut store,
        &form,
        FormProps::new().initial_values(json!({ "name": "Abc" })),
    )
    .unwrap();
    let mut name = FieldBinding::mount(&mut store, &form, FieldProps::new("name")).unwrap();
    let mut email = FieldBinding::mount(
        &mut store,
        &form,
        FieldProps::new("email")
            .dep_fields(["name"])
            .validate(|_, deps: &FormValues| match deps.values.get("name") {
                Some(Value::String(name)) if !name.is_empty() => None,
                _ => Some("name has to be present".into()),
            }),
    )
    .unwrap();

    name.set_value(&mut store, Some(json!("")), None).unwrap();
    name.sync(&mut store).unwrap();
    email.sync(&mut store).unwrap();

    let view = store.view(&form).unwrap();
    let cell = view.field(email.key()).unwrap();
    assert_eq!(cell.error.as_deref(), Some("name has to be present"));
    assert!(!cell.touched);
    // still hidden from the UI
    assert_eq!(email.error(&store), None);
}

#[test]
fn untouched_fields_hide_errors_and_blur_is_idempotent() {
    let mut store = CellStore::new();
    let form = new_form(&mut store);
    FormController::mount(&mut store, &form, FormProps::new()).unwrap();
    let field = FieldBinding::mount(
        &mut store,
        &form,
        FieldProps::new("age").validate(|value, _| match value {
            Some(Value::Number(_)) => None,
            _ => Some("Age is required".into()),
        }),
    )
    .unwrap();

    assert!(!field.touched(&store));
    assert_eq!(field.error(&store), None);

    field.on_blur(&mut store).unwrap();
    field.on_blur(&mut store).unwrap();
    assert!(field.touched(&store));
    assert_eq!(field.error(&store), Some("Age is required".into()));
}

#[test]
fn version_gates_reseeding() {
    let mut store = CellStore::new();
    let form = new_form(&mut store);
    let context = FormContext::new(form.clone());
    FormController::mount(
        &mut store,
        &form,
        FormProps::new().initial_values(json!({ "city": "Oslo" })),
    )
    .unwrap();
    let mut city = FieldBinding::mount(
        &mut store,
        &form,
        FieldProps::new("city").default_value(json!("Bergen")),
    )
    .unwrap();
    assert_eq!(city.value(&store), Some(json!("Oslo")));

    context
        .reset_initial_values(&mut store, Some(json!({ "city": "Tromsø" })), None)
        .unwrap();
    // not yet re-evaluated
    assert_eq!(city.value(&store), None);
    city.sync(&mut store).unwrap();
    assert_eq!(city.value(&store), Some(json!("Tromsø")));
}

#[test]
fn dirty_follows_baseline() {
    let mut store = CellStore::new();
    let form = new_form(&mut store);
    let context = FormContext::new(form.clone());
    let mut controller = FormController::mount(
        &mut store,
        &form,
        FormProps::new().initial_values(json!({ "name": "a" })),
    )
    .unwrap();
    let mut name = FieldBinding::mount(&mut store, &form, FieldProps::new("name")).unwrap();
    assert!(!context.is_dirty(&store, None).unwrap());

    name.set_value(&mut store, Some(json!("b")), None).unwrap();
    assert!(context.is_dirty(&store, None).unwrap());

    controller.submit(&mut store, None).unwrap();
    name.sync(&mut store).unwrap();
    assert!(!context.is_dirty(&store, None).unwrap());
    assert_eq!(name.value(&store), Some(json!("b")));

    name.set_value(&mut store, Some(json!("c")), None).unwrap();
    assert!(context.is_dirty(&store, None).unwrap());
    let live = context.get_values(&store).unwrap().values;
    context.reset_initial_values(&mut store, Some(live), None).unwrap();
    name.sync(&mut store).unwrap();
    assert!(!context.is_dirty(&store, None).unwrap());
}

#[test]
fn negative_zero_is_not_a_change() {
    let mut store = CellStore::new();
    let form = new_form(&mut store);
    let context = FormContext::new(form.clone());
    FormController::mount(
        &mut store,
        &form,
        FormProps::new().initial_values(json!({ "n": 0.0 })),
    )
    .unwrap();
    let n = FieldBinding::mount(&mut store, &form, FieldProps::new("n")).unwrap();

    n.set_value(&mut store, Some(json!(-0.0)), None).unwrap();
    assert!(!context.is_dirty(&store, None).unwrap());
    n.set_value(&mut store, Some(json!(0.5)), None).unwrap();
    assert!(context.is_dirty(&store, None).unwrap());
}

#[test]
fn unmounted_values_survive_when_skip_unregister() {
    let mut store = CellStore::new();
    let form = new_form(&mut store);
    FormController::mount(
        &mut store,
        &form,
        FormProps::new()
            .initial_values(json!({ "a": 1 }))
            .skip_unregister(),
    )
    .unwrap();
    let a = FieldBinding::mount(&mut store, &form, FieldProps::new("a")).unwrap();
    a.set_value(&mut store, Some(json!(2)), None).unwrap();
    a.unmount(&mut store).unwrap();
    assert_eq!(values(&store, &form), json!({ "a": 2 }));
}

// ============================================================================
// Submission
// ============================================================================

#[test]
fn deferred_submit_rebaselines_after_success() {
    let mut store = CellStore::new();
    let form = new_form(&mut store);
    let mut controller = FormController::mount(
        &mut store,
        &form,
        FormProps::new()
            .initial_values(json!({ "name": "a" }))
            .on_submit(|_, _| SubmitReply::deferred(async { Ok::<_, SubmitRejected>(true) })),
    )
    .unwrap();
    let name = FieldBinding::mount(&mut store, &form, FieldProps::new("name")).unwrap();
    name.set_value(&mut store, Some(json!("b")), None).unwrap();

    let SubmitOutcome::Pending(pending) = controller.submit(&mut store, None).unwrap() else {
        panic!("expected a pending submit");
    };
    assert!(controller.is_submitting());

    let settled = block_on(pending.wait());
    controller.complete_submit(&mut store, settled).unwrap();
    assert!(!controller.is_submitting());
    assert_eq!(
        store.initial_values(&form).unwrap().values,
        json!({ "name": "b" })
    );
}

#[test]
fn deferred_submit_rejection_is_swallowed() {
    let mut store = CellStore::new();
    let form = new_form(&mut store);
    let errors_seen = Rc::new(RefCell::new(0));
    let mut controller = {
        let errors_seen = errors_seen.clone();
        FormController::mount(
            &mut store,
            &form,
            FormProps::new()
                .initial_values(json!({ "name": "a" }))
                .on_submit(|_, _| {
                    SubmitReply::deferred(async { Err::<bool, _>(SubmitRejected("offline".into())) })
                })
                .on_error(move |_, _, _| *errors_seen.borrow_mut() += 1),
        )
        .unwrap()
    };

    let SubmitOutcome::Pending(pending) = controller.submit(&mut store, None).unwrap() else {
        panic!("expected a pending submit");
    };
    let settled = block_on(pending.wait());
    assert!(settled.result().is_err());
    controller.complete_submit(&mut store, settled).unwrap();

    assert!(!controller.is_submitting());
    assert_eq!(*errors_seen.borrow(), 0);
    assert_eq!(store.initial_values(&form).unwrap().version, 1);
}

#[test]
fn deferred_false_skips_rebaseline() {
    let mut store = CellStore::new();
    let form = new_form(&mut store);
    let mut controller = FormController::mount(
        &mut store,
        &form,
        FormProps::new()
            .initial_values(json!({ "name": "a" }))
            .on_submit(|_, _| SubmitReply::deferred(async { Ok::<_, SubmitRejected>(false) })),
    )
    .unwrap();

    let SubmitOutcome::Pending(pending) = controller.submit(&mut store, None).unwrap() else {
        panic!("expected a pending submit");
    };
    controller
        .complete_submit(&mut store, block_on(pending.wait()))
        .unwrap();
    assert_eq!(store.initial_values(&form).unwrap().version, 1);
}
