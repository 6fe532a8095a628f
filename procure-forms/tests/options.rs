use std::sync::{Arc, Mutex};
use std::time::Duration;

use procure_config::EngineConfig;
use procure_fields::{
    resolver_fn, uploader_fn, ArraySpec, Bindings, FieldKind, FieldPath, FieldSpec, Progress,
    ResolveInput, ResolveRequest, Resolver, SelectOption, UploadFile, Value,
};
use procure_forms::{Form, FormError, FormSpec, OptionsState};
use serde_json::json;

/// (search term, path) of every resolver call
type Calls = Arc<Mutex<Vec<(Option<String>, String)>>>;

/// Raw materials 1..=6. The initial load leaves out values picked by sibling
/// items; searches return everything whose label matches. Labels carry the
/// number of items the request saw so tests can tell responses apart.
fn raw_materials(calls: Calls, delay: Duration) -> Arc<dyn Resolver> {
    resolver_fn(move |request: ResolveRequest| {
        let calls = Arc::clone(&calls);
        async move {
            calls
                .lock()
                .unwrap()
                .push((request.term().map(str::to_string), request.path.to_string()));
            tokio::time::sleep(delay).await;

            let items = request.form["items"].as_array().cloned().unwrap_or_default();
            let own = request.path.index_under(&FieldPath::parse("items"));
            let taken: Vec<Value> = items
                .iter()
                .enumerate()
                .filter(|(i, _)| Some(*i) != own)
                .map(|(_, item)| item["rawMaterialId"].clone())
                .filter(|v| !v.is_null())
                .collect();

            let seen = items.len();
            let all = (1..=6).map(|i| SelectOption::new(format!("Material {i} ({seen} items)"), i));
            Ok(match &request.input {
                ResolveInput::Search(None) => all.filter(|o| !taken.contains(&o.value)).collect(),
                ResolveInput::Search(Some(term)) => {
                    all.filter(|o| o.label.contains(term.as_str())).collect()
                }
                ResolveInput::Raw(raw) => all.filter(|o| &o.value == raw).collect(),
            })
        }
    })
}

fn order_spec(items: Value) -> FormSpec {
    FormSpec::new(
        vec![FieldSpec::array(
            "items",
            "Items",
            ArraySpec::new(
                vec![
                    FieldSpec::select("rawMaterialId", "Raw material", "rawMaterials"),
                    FieldSpec::number("quantity", "Quantity"),
                ],
                json!({"rawMaterialId": null, "quantity": 1}),
            ),
        )],
        json!({ "items": items }),
    )
}

fn order_form(items: Value, calls: &Calls, delay: Duration) -> Form {
    Form::builder(order_spec(items))
        .bindings(Bindings::new().resolver("rawMaterials", raw_materials(Arc::clone(calls), delay)))
        .config(Arc::new(EngineConfig::default()))
        .build()
        .unwrap()
}

async fn settled(form: &Form, path: &str) -> OptionsState {
    let mut rx = form.watch_options(path).expect("dropdown mounted");
    let state = rx.wait_for(|s| !s.loading).await.expect("session alive").clone();
    state
}

fn values(state: &OptionsState) -> Vec<Value> {
    state.options.iter().map(|o| o.value.clone()).collect()
}

#[tokio::test(start_paused = true)]
async fn mount_issues_one_initial_load_per_select() {
    let calls = Calls::default();
    let form = order_form(
        json!([{"rawMaterialId": 1}, {"rawMaterialId": null}]),
        &calls,
        Duration::ZERO,
    );

    let first = settled(&form, "items.0.rawMaterialId").await;
    let second = settled(&form, "items.1.rawMaterialId").await;
    assert_eq!(values(&first), json!([1, 2, 3, 4, 5, 6]).as_array().unwrap().clone());
    assert_eq!(values(&second), json!([2, 3, 4, 5, 6]).as_array().unwrap().clone());

    let calls = calls.lock().unwrap().clone();
    assert_eq!(calls.len(), 2);
    assert!(calls.iter().all(|(term, _)| term.is_none()));
}

#[tokio::test(start_paused = true)]
async fn picked_value_disappears_from_sibling_on_reopen() {
    let calls = Calls::default();
    let form = order_form(json!([{"rawMaterialId": null, "quantity": 1}]), &calls, Duration::ZERO);
    let before = settled(&form, "items.0.rawMaterialId").await;
    assert!(values(&before).contains(&json!(5)));

    let index = form.add_array_item("items").unwrap();
    assert_eq!(index, 1);
    form.set_value("items.1.rawMaterialId", json!(5)).unwrap();

    form.open_options("items.0.rawMaterialId").unwrap();
    let after = settled(&form, "items.0.rawMaterialId").await;
    assert!(!values(&after).contains(&json!(5)));
    assert_eq!(after.options.len(), 5);
}

#[tokio::test(start_paused = true)]
async fn search_is_debounced_to_the_last_term() {
    let calls = Calls::default();
    let form = order_form(json!([{"rawMaterialId": null}]), &calls, Duration::ZERO);
    settled(&form, "items.0.rawMaterialId").await;

    for term in ["M", "Ma", "Material 3"] {
        form.search("items.0.rawMaterialId", term).unwrap();
        tokio::time::sleep(Duration::from_millis(100)).await;
    }
    assert!(form.options("items.0.rawMaterialId").unwrap().loading);

    tokio::time::sleep(Duration::from_millis(400)).await;
    let state = form.options("items.0.rawMaterialId").unwrap();
    assert!(!state.loading);
    assert_eq!(state.term.as_deref(), Some("Material 3"));
    assert_eq!(values(&state), vec![json!(3)]);

    let searches: Vec<_> = calls
        .lock()
        .unwrap()
        .iter()
        .filter_map(|(term, _)| term.clone())
        .collect();
    assert_eq!(searches, vec!["Material 3".to_string()]);
}

#[tokio::test(start_paused = true)]
async fn removal_remounts_shifted_items_and_drops_old_responses() {
    let calls = Calls::default();
    let form = order_form(
        json!([{"rawMaterialId": 1}, {"rawMaterialId": 2}]),
        &calls,
        Duration::from_millis(100),
    );

    // both initial loads are still in flight
    tokio::time::sleep(Duration::from_millis(10)).await;
    form.remove_array_item("items", 0).unwrap();
    assert_eq!(
        form.mounted_options(),
        vec![FieldPath::parse("items.0.rawMaterialId")]
    );

    let state = settled(&form, "items.0.rawMaterialId").await;
    assert!(state.options.iter().all(|o| o.label.ends_with("(1 items)")));
    assert_eq!(calls.lock().unwrap().len(), 3);

    tokio::time::sleep(Duration::from_millis(200)).await;
    let state = form.options("items.0.rawMaterialId").unwrap();
    assert!(state.options.iter().all(|o| o.label.ends_with("(1 items)")));
}

/// Items with a photo each; uploads take 100ms and return `<file name>`.
fn photo_form(items: Value) -> Form {
    let spec = FormSpec::new(
        vec![FieldSpec::array(
            "items",
            "Items",
            ArraySpec::new(
                vec![
                    FieldSpec::text("tag", "Tag"),
                    FieldSpec::new(
                        "photo",
                        "Photo",
                        FieldKind::UploadImage {
                            uploader: "images".into(),
                        },
                    ),
                ],
                json!({"tag": null, "photo": null}),
            ),
        )],
        json!({ "items": items }),
    );
    let uploader = uploader_fn(|file: UploadFile, _progress: Progress| async move {
        tokio::time::sleep(Duration::from_millis(100)).await;
        Ok(json!(file.name))
    });
    Form::builder(spec)
        .bindings(Bindings::new().uploader("images", uploader))
        .build()
        .unwrap()
}

fn photo(name: &str) -> UploadFile {
    UploadFile {
        name: name.into(),
        content_type: "image/png".into(),
        bytes: vec![0],
    }
}

#[tokio::test(start_paused = true)]
async fn removal_discards_uploads_for_removed_and_shifted_items() {
    let form = photo_form(json!([
        {"tag": "a", "photo": null},
        {"tag": "b", "photo": null},
        {"tag": "c", "photo": null},
    ]));
    let upload = |path: &'static str, name: &'static str| {
        let form = form.clone();
        tokio::spawn(async move { form.upload(path, photo(name)).await })
    };
    let removed = upload("items.1.photo", "b.png");
    let shifted = upload("items.2.photo", "c.png");
    let kept = upload("items.0.photo", "a.png");

    tokio::time::sleep(Duration::from_millis(10)).await;
    assert!(!form.can_submit());
    form.remove_array_item("items", 1).unwrap();

    assert!(matches!(
        removed.await.unwrap(),
        Err(FormError::UploadDiscarded { ref path }) if path == "items.1.photo"
    ));
    assert!(matches!(
        shifted.await.unwrap(),
        Err(FormError::UploadDiscarded { .. })
    ));
    assert_eq!(kept.await.unwrap().unwrap(), json!("a.png"));

    tokio::time::sleep(Duration::from_millis(200)).await;
    assert_eq!(
        form.value("items"),
        Some(json!([{"tag": "a", "photo": "a.png"}, {"tag": "c", "photo": null}]))
    );
    assert!(form.can_submit());
}

#[tokio::test(start_paused = true)]
async fn reset_discards_running_uploads() {
    let form = photo_form(json!([{"tag": "a", "photo": null}]));
    let upload = tokio::spawn({
        let form = form.clone();
        async move { form.upload("items.0.photo", photo("a.png")).await }
    });
    tokio::time::sleep(Duration::from_millis(10)).await;
    form.reset().unwrap();

    assert!(matches!(
        upload.await.unwrap(),
        Err(FormError::UploadDiscarded { .. })
    ));
    assert_eq!(form.value("items.0.photo"), Some(Value::Null));
    assert!(form.can_submit());
}

#[tokio::test(start_paused = true)]
async fn destroy_stops_pending_option_loads() {
    let calls = Calls::default();
    let form = order_form(json!([{"rawMaterialId": null}]), &calls, Duration::from_millis(100));
    let rx = form.watch_options("items.0.rawMaterialId").unwrap();

    form.destroy();
    tokio::time::sleep(Duration::from_millis(300)).await;

    assert!(rx.borrow().loading);
    assert!(rx.borrow().options.is_empty());
    assert!(form.options("items.0.rawMaterialId").is_none());
    assert!(matches!(
        form.search("items.0.rawMaterialId", "x"),
        Err(FormError::Destroyed)
    ));
}

#[tokio::test(start_paused = true)]
async fn close_and_search_without_session() {
    let calls = Calls::default();
    let form = order_form(json!([{"rawMaterialId": null}]), &calls, Duration::ZERO);
    assert!(form.close_options("items.0.rawMaterialId"));
    assert!(!form.close_options("items.0.rawMaterialId"));
    assert!(matches!(
        form.search("items.0.rawMaterialId", "x"),
        Err(FormError::NoSession { .. })
    ));
    assert!(matches!(
        form.open_options("items.0.quantity"),
        Err(FormError::NotSelectField { .. })
    ));
}
