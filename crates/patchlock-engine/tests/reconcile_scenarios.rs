//! End-to-end reconcile scenarios against the in-memory store.

use std::sync::Arc;
use std::time::Duration;

use assert_json_diff::assert_json_include;
use patchlock_core::{GroupVersionKind, ObjectReference};
use patchlock_engine::{
    BackpressurePolicy, ChannelNotifier, ControllerConfig, EngineError, LockedPatch,
    PatchConditionType, PatchController,
};
use patchlock_store::{ApiResource, ObjectStore, PatchType};
use patchlock_store_memory::InMemoryStore;
use serde_json::{Value, json};

const REPLICAS_TEMPLATE: &str = "spec:\n  replicas: {{index . 0}}";

fn config_map_gvk() -> GroupVersionKind {
    GroupVersionKind::new("", "v1", "ConfigMap")
}

fn deployment_gvk() -> GroupVersionKind {
    GroupVersionKind::new("apps", "v1", "Deployment")
}

fn store() -> Arc<InMemoryStore> {
    let store = InMemoryStore::shared();
    store.register_resource(ApiResource::new(&config_map_gvk(), "configmaps", true));
    store.register_resource(ApiResource::new(&deployment_gvk(), "deployments", true));
    store
}

fn controller_config() -> ControllerConfig {
    ControllerConfig {
        workers: 1,
        base_backoff_ms: 1,
        max_backoff_ms: 50,
    }
}

fn parent() -> ObjectReference {
    ObjectReference::new("redhatcop.redhat.io/v1alpha1", "ResourceLocker", "ops", "locker")
}

async fn seed_config_map(store: &InMemoryStore, name: &str, replicas: &str) {
    store
        .create(json!({
            "apiVersion": "v1",
            "kind": "ConfigMap",
            "metadata": {"name": name, "namespace": "prod"},
            "data": {"replicas": replicas}
        }))
        .await
        .unwrap();
}

async fn seed_deployment(store: &InMemoryStore, name: &str) {
    store
        .create(json!({
            "apiVersion": "apps/v1",
            "kind": "Deployment",
            "metadata": {"name": name, "namespace": "prod"},
            "spec": {
                "replicas": 1,
                "template": {"spec": {"containers": [{"name": "app", "image": "app:1"}]}}
            }
        }))
        .await
        .unwrap();
}

async fn deployment(store: &InMemoryStore, name: &str) -> Value {
    let resource = store.discover(&deployment_gvk()).await.unwrap();
    store.get(&resource, Some("prod"), name).await.unwrap()
}

fn replicas_patch(deployment: &str, config_map: &str, template: &str) -> LockedPatch {
    LockedPatch::new(
        ObjectReference::new("apps/v1", "Deployment", "prod", deployment),
        PatchType::StrategicMergePatch,
        template,
    )
    .with_source(
        ObjectReference::new("v1", "ConfigMap", "prod", config_map).with_field_path("data.replicas"),
    )
}

async fn wait_until(mut condition: impl FnMut() -> bool) {
    tokio::time::timeout(Duration::from_secs(5), async {
        while !condition() {
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    })
    .await
    .expect("condition not reached in time");
}

async fn wait_for_replicas(store: &InMemoryStore, name: &str, replicas: i64) {
    tokio::time::timeout(Duration::from_secs(5), async {
        while deployment(store, name).await["spec"]["replicas"] != json!(replicas) {
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    })
    .await
    .expect("replicas not reached in time");
}

/// Lets follow-up events from the last patch drain.
async fn settle() {
    tokio::time::sleep(Duration::from_millis(100)).await;
}

async fn start(store: &Arc<InMemoryStore>, patch: LockedPatch) -> PatchController {
    PatchController::start(store.clone(), patch, parent(), None, &controller_config())
        .await
        .unwrap()
}

#[tokio::test]
async fn scenario_a_source_value_is_patched_into_target() {
    let store = store();
    seed_config_map(&store, "settings", "3").await;
    seed_deployment(&store, "web").await;

    let controller = start(&store, replicas_patch("web", "settings", REPLICAS_TEMPLATE)).await;
    assert_eq!(controller.watch_count(), 2);

    wait_until(|| controller.status().is_enforcing()).await;
    assert_json_include!(
        actual: deployment(&store, "web").await,
        expected: json!({
            "spec": {
                "replicas": 3,
                "template": {"spec": {"containers": [{"name": "app", "image": "app:1"}]}}
            }
        })
    );

    controller.shutdown().await;
}

#[tokio::test]
async fn scenario_b_deleted_source_freezes_last_patch() {
    let store = store();
    seed_config_map(&store, "settings", "3").await;
    seed_deployment(&store, "web").await;

    let controller = start(&store, replicas_patch("web", "settings", REPLICAS_TEMPLATE)).await;
    wait_until(|| controller.status().is_enforcing()).await;
    settle().await;

    let cycles = controller.reconciler().cycles();
    let patches = store.stats().patches();

    store
        .delete(&config_map_gvk(), "prod", "settings")
        .await
        .unwrap();
    settle().await;

    assert_eq!(controller.reconciler().cycles(), cycles);
    assert_eq!(store.stats().patches(), patches);
    assert!(controller.status().is_enforcing());
    assert_eq!(deployment(&store, "web").await["spec"]["replicas"], 3);

    controller.shutdown().await;
}

#[tokio::test]
async fn scenario_c_out_of_range_index_fails_without_patching() {
    let store = store();
    seed_config_map(&store, "settings", "3").await;
    seed_deployment(&store, "web").await;

    let controller = start(
        &store,
        replicas_patch("web", "settings", "spec:\n  replicas: {{index . 5}}"),
    )
    .await;

    wait_until(|| controller.status().is_failure()).await;
    let status = controller.status();
    assert_eq!(status.condition_type, PatchConditionType::Failure);
    assert!(
        status.message.contains("index out of range: 5"),
        "unexpected message: {}",
        status.message
    );
    assert_eq!(store.stats().patches(), 0);
    assert_eq!(deployment(&store, "web").await["spec"]["replicas"], 1);

    controller.shutdown().await;
}

#[tokio::test]
async fn scenario_d_independent_patches_run_concurrently() {
    let store = store();
    seed_config_map(&store, "settings-a", "2").await;
    seed_config_map(&store, "settings-b", "5").await;
    seed_deployment(&store, "web-a").await;
    seed_deployment(&store, "web-b").await;

    let (a, b) = tokio::join!(
        start(&store, replicas_patch("web-a", "settings-a", REPLICAS_TEMPLATE)),
        start(&store, replicas_patch("web-b", "settings-b", REPLICAS_TEMPLATE)),
    );
    assert_ne!(a.key(), b.key());

    wait_until(|| a.status().is_enforcing() && b.status().is_enforcing()).await;
    assert_eq!(deployment(&store, "web-a").await["spec"]["replicas"], 2);
    assert_eq!(deployment(&store, "web-b").await["spec"]["replicas"], 5);

    tokio::join!(a.shutdown(), b.shutdown());
}

#[tokio::test]
async fn source_update_is_reenforced() {
    let store = store();
    seed_config_map(&store, "settings", "3").await;
    seed_deployment(&store, "web").await;

    let controller = start(&store, replicas_patch("web", "settings", REPLICAS_TEMPLATE)).await;
    wait_for_replicas(&store, "web", 3).await;

    let config_maps = store.discover(&config_map_gvk()).await.unwrap();
    store
        .patch(
            &config_maps,
            Some("prod"),
            "settings",
            PatchType::MergePatch,
            br#"{"data": {"replicas": "4"}}"#,
        )
        .await
        .unwrap();

    wait_for_replicas(&store, "web", 4).await;
    assert!(controller.status().is_enforcing());

    controller.shutdown().await;
}

#[tokio::test]
async fn target_drift_is_reverted() {
    let store = store();
    seed_config_map(&store, "settings", "3").await;
    seed_deployment(&store, "web").await;

    let controller = start(&store, replicas_patch("web", "settings", REPLICAS_TEMPLATE)).await;
    wait_for_replicas(&store, "web", 3).await;

    let deployments = store.discover(&deployment_gvk()).await.unwrap();
    store
        .patch(
            &deployments,
            Some("prod"),
            "web",
            PatchType::MergePatch,
            br#"{"spec": {"replicas": 10}}"#,
        )
        .await
        .unwrap();

    wait_for_replicas(&store, "web", 3).await;

    controller.shutdown().await;
}

#[tokio::test]
async fn steady_state_is_idempotent() {
    let store = store();
    seed_config_map(&store, "settings", "3").await;
    seed_deployment(&store, "web").await;

    let controller = start(&store, replicas_patch("web", "settings", REPLICAS_TEMPLATE)).await;
    wait_until(|| controller.status().is_enforcing()).await;
    settle().await;

    let before = deployment(&store, "web").await;
    controller.reconciler().reconcile_once().await.unwrap();
    let after = deployment(&store, "web").await;

    assert_eq!(before, after);
    assert!(controller.status().is_enforcing());

    controller.shutdown().await;
}

#[tokio::test]
async fn unrelated_objects_do_not_trigger_reconcile() {
    let store = store();
    seed_config_map(&store, "settings", "3").await;
    seed_deployment(&store, "web").await;

    let controller = start(&store, replicas_patch("web", "settings", REPLICAS_TEMPLATE)).await;
    wait_until(|| controller.status().is_enforcing()).await;
    settle().await;
    let cycles = controller.reconciler().cycles();

    seed_config_map(&store, "other", "9").await;
    seed_deployment(&store, "web-2").await;
    store
        .update(json!({
            "apiVersion": "v1",
            "kind": "ConfigMap",
            "metadata": {"name": "other", "namespace": "prod"},
            "data": {"replicas": "8"}
        }))
        .await
        .unwrap();
    settle().await;

    assert_eq!(controller.reconciler().cycles(), cycles);

    controller.shutdown().await;
}

#[tokio::test]
async fn generic_events_do_not_trigger_reconcile() {
    let store = store();
    seed_config_map(&store, "settings", "3").await;
    seed_deployment(&store, "web").await;

    let controller = start(&store, replicas_patch("web", "settings", REPLICAS_TEMPLATE)).await;
    wait_until(|| controller.status().is_enforcing()).await;
    settle().await;
    let cycles = controller.reconciler().cycles();

    let resource = store.discover(&config_map_gvk()).await.unwrap();
    let source = store.get(&resource, Some("prod"), "settings").await.unwrap();
    assert!(store.emit_generic(config_map_gvk(), source) > 0);
    let target = deployment(&store, "web").await;
    assert!(store.emit_generic(deployment_gvk(), target) > 0);
    settle().await;

    assert_eq!(controller.reconciler().cycles(), cycles);

    controller.shutdown().await;
}

#[tokio::test]
async fn missing_source_fails_then_recovers_when_created() {
    let store = store();
    seed_deployment(&store, "web").await;

    let controller = start(&store, replicas_patch("web", "settings", REPLICAS_TEMPLATE)).await;
    wait_until(|| controller.status().is_failure()).await;
    assert!(controller.status().message.contains("not found"));
    assert_eq!(store.stats().patches(), 0);

    seed_config_map(&store, "settings", "6").await;
    wait_until(|| controller.status().is_enforcing()).await;
    assert_eq!(deployment(&store, "web").await["spec"]["replicas"], 6);

    controller.shutdown().await;
}

#[tokio::test]
async fn status_changes_notify_parent() {
    let store = store();
    seed_config_map(&store, "settings", "3").await;
    seed_deployment(&store, "web").await;

    let (notifier, mut changes) = ChannelNotifier::channel(16, BackpressurePolicy::Block);
    let controller = PatchController::start(
        store.clone(),
        replicas_patch("web", "settings", REPLICAS_TEMPLATE),
        parent(),
        Some(Arc::new(notifier)),
        &controller_config(),
    )
    .await
    .unwrap();

    let change = tokio::time::timeout(Duration::from_secs(5), changes.recv())
        .await
        .unwrap()
        .unwrap();
    assert_eq!(change.parent, parent());
    assert_eq!(change.patch_key, controller.key());

    controller.shutdown().await;
}

#[tokio::test]
async fn json_patch_type_is_applied() {
    let store = store();
    seed_config_map(&store, "settings", "7").await;
    seed_deployment(&store, "web").await;

    let mut patch = replicas_patch(
        "web",
        "settings",
        "- op: replace\n  path: /spec/replicas\n  value: {{index . 0}}",
    );
    patch.patch_type = PatchType::JsonPatch;

    let controller = start(&store, patch).await;
    wait_for_replicas(&store, "web", 7).await;

    controller.shutdown().await;
}

#[tokio::test]
async fn unknown_kind_fails_construction() {
    let store = store();
    let patch = LockedPatch::new(
        ObjectReference::new("example.com/v1", "Widget", "prod", "w"),
        PatchType::MergePatch,
        "spec: {}",
    );

    let err = PatchController::start(store.clone(), patch, parent(), None, &controller_config())
        .await
        .unwrap_err();
    assert!(matches!(err, EngineError::Watch { .. }));
    assert_eq!(store.stats().watches(), 0);
}

#[tokio::test]
async fn shutdown_stops_reconciling() {
    let store = store();
    seed_config_map(&store, "settings", "3").await;
    seed_deployment(&store, "web").await;

    let controller = start(&store, replicas_patch("web", "settings", REPLICAS_TEMPLATE)).await;
    wait_for_replicas(&store, "web", 3).await;
    let reconciler = Arc::clone(controller.reconciler());
    controller.shutdown().await;
    let cycles = reconciler.cycles();

    let config_maps = store.discover(&config_map_gvk()).await.unwrap();
    store
        .patch(
            &config_maps,
            Some("prod"),
            "settings",
            PatchType::MergePatch,
            br#"{"data": {"replicas": "4"}}"#,
        )
        .await
        .unwrap();
    settle().await;

    assert_eq!(reconciler.cycles(), cycles);
    assert_eq!(deployment(&store, "web").await["spec"]["replicas"], 3);
}
