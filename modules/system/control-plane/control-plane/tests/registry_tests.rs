#![allow(clippy::unwrap_used, clippy::expect_used)]

//! Service Registry and Health Monitor behaviour through `ControlPlane`.

mod common;

use std::net::SocketAddr;
use std::time::Duration;

use common::{CHAT_URL, NOT_SERVING, SERVING, eventually, node};
use control_plane::DomainError;
use control_plane_sdk::{ControlPlaneError, HealthStatus, ModuleDirectory, RegisteredModule};
use state_store::InMemoryStateStore;
use tokio::sync::broadcast::error::TryRecvError;
use tokio_util::sync::CancellationToken;

fn chat(serving: bool) -> RegisteredModule {
    RegisteredModule {
        name: "chat".to_owned(),
        address: CHAT_URL.to_owned(),
        serving,
    }
}

#[tokio::test]
async fn registering_twice_is_idempotent_and_emits_once() {
    let n = node(&InMemoryStateStore::new(), "cp-1");
    let registry = n.cp.registry();
    let (initial, mut rx) = registry.watch();
    assert!(initial.is_empty());

    assert!(registry.register_module("chat", CHAT_URL, SERVING, None).await.unwrap());
    assert!(registry.register_module("chat", CHAT_URL, SERVING, None).await.unwrap());

    assert_eq!(registry.snapshot(), vec![chat(true)]);
    let update = rx.try_recv().unwrap();
    assert_eq!(&*update, &[chat(true)]);
    assert!(matches!(rx.try_recv(), Err(TryRecvError::Empty)));
    // Only the first registration probes the module.
    assert_eq!(n.probe.calls(), 1);
}

#[tokio::test]
async fn out_of_range_status_is_rejected_and_not_listed() {
    let n = node(&InMemoryStateStore::new(), "cp-1");
    let err = n
        .cp
        .registry()
        .register_module("chat", CHAT_URL, 7, None)
        .await
        .unwrap_err();

    assert!(matches!(err, DomainError::InvalidArgument(_)));
    assert!(matches!(
        ControlPlaneError::from(err),
        ControlPlaneError::InvalidArgument(_)
    ));
    assert!(n.cp.registry().snapshot().is_empty());

    let err = n
        .cp
        .registry()
        .module_health_probe("chat", CHAT_URL, -1, None)
        .await
        .unwrap_err();
    assert!(matches!(err, DomainError::InvalidArgument(_)));
}

#[tokio::test]
async fn unresponsive_new_module_fails_with_internal() {
    let n = node(&InMemoryStateStore::new(), "cp-1");
    n.probe.set_down("chat", true);

    let err = n
        .cp
        .registry()
        .register_module("chat", CHAT_URL, SERVING, None)
        .await
        .unwrap_err();
    assert!(matches!(err, DomainError::ModuleUnresponsive { .. }));
    assert!(matches!(
        ControlPlaneError::from(err),
        ControlPlaneError::Internal(_)
    ));
    assert!(n.cp.registry().snapshot().is_empty());
}

#[tokio::test]
async fn known_module_is_trusted_without_probing() {
    let n = node(&InMemoryStateStore::new(), "cp-1");
    let registry = n.cp.registry();
    registry
        .register_module("chat", CHAT_URL, SERVING, None)
        .await
        .unwrap();

    n.probe.set_down("chat", true);
    registry
        .register_module("chat", CHAT_URL, NOT_SERVING, None)
        .await
        .unwrap();
    assert_eq!(registry.snapshot(), vec![chat(false)]);
    assert_eq!(
        registry.instance_status("chat", CHAT_URL),
        Some(HealthStatus::NotServing)
    );
}

#[tokio::test(start_paused = true)]
async fn stale_instance_is_swept_with_its_module() {
    let n = node(&InMemoryStateStore::new(), "cp-1");
    let registry = n.cp.registry();
    registry
        .register_module("chat", CHAT_URL, SERVING, None)
        .await
        .unwrap();

    tokio::time::advance(Duration::from_secs(4)).await;
    registry
        .module_health_probe("chat", CHAT_URL, SERVING, None)
        .await
        .unwrap();
    tokio::time::advance(Duration::from_secs(2)).await;
    let outcome = registry.sweep_once().await;
    assert!(outcome.removed_instances.is_empty());
    assert_eq!(registry.snapshot(), vec![chat(true)]);

    tokio::time::advance(Duration::from_secs(6)).await;
    let outcome = registry.sweep_once().await;
    assert_eq!(outcome.removed_modules, vec!["chat".to_owned()]);
    assert!(registry.snapshot().is_empty());
    assert!(matches!(
        registry.get_module_url_by_name("chat").await,
        Err(ControlPlaneError::NotFound(_))
    ));
}

#[tokio::test(start_paused = true)]
async fn sweep_emits_one_update_for_many_removals() {
    let n = node(&InMemoryStateStore::new(), "cp-1");
    let registry = n.cp.registry();
    for (i, name) in ["auth", "chat", "files"].into_iter().enumerate() {
        registry
            .register_module(name, &format!("10.0.0.{i}:5000"), SERVING, None)
            .await
            .unwrap();
    }

    let (_, mut rx) = registry.watch();
    tokio::time::advance(Duration::from_secs(10)).await;
    let outcome = registry.sweep_once().await;

    assert_eq!(outcome.removed_modules.len(), 3);
    assert!(rx.try_recv().unwrap().is_empty());
    assert!(matches!(rx.try_recv(), Err(TryRecvError::Empty)));
}

#[tokio::test]
async fn not_serving_instance_is_pruned_by_next_sweep() {
    let n = node(&InMemoryStateStore::new(), "cp-1");
    let registry = n.cp.registry();
    registry
        .register_module("chat", CHAT_URL, SERVING, None)
        .await
        .unwrap();
    registry
        .module_health_probe("chat", CHAT_URL, NOT_SERVING, None)
        .await
        .unwrap();
    assert_eq!(registry.snapshot(), vec![chat(false)]);

    registry.sweep_once().await;
    assert!(registry.snapshot().is_empty());
}

#[tokio::test(start_paused = true)]
async fn heartbeats_refresh_the_instance_registration_created() {
    let n = node(&InMemoryStateStore::new(), "cp-1");
    let registry = n.cp.registry();
    let peer: SocketAddr = "192.168.1.7:41234".parse().unwrap();
    registry
        .register_module("chat", "0.0.0.0:5000", SERVING, Some(peer))
        .await
        .unwrap();

    for _ in 0..4 {
        tokio::time::advance(Duration::from_secs(3)).await;
        registry
            .module_health_probe("chat", "http://0.0.0.0:5000", SERVING, Some(peer))
            .await
            .unwrap();
    }
    let outcome = registry.sweep_once().await;

    assert!(outcome.removed_instances.is_empty());
    assert_eq!(
        registry.snapshot(),
        vec![RegisteredModule {
            name: "chat".to_owned(),
            address: "192.168.1.7:5000".to_owned(),
            serving: true,
        }]
    );
    assert!(registry.instance_status("chat", "0.0.0.0:5000").is_none());
}

#[tokio::test]
async fn health_probe_with_unusable_url_is_invalid_argument() {
    let n = node(&InMemoryStateStore::new(), "cp-1");
    let registry = n.cp.registry();
    registry
        .register_module("chat", CHAT_URL, SERVING, None)
        .await
        .unwrap();
    let err = registry
        .module_health_probe("chat", "chat", SERVING, None)
        .await
        .unwrap_err();
    assert!(matches!(err, DomainError::InvalidArgument(_)));
}

#[tokio::test]
async fn health_probe_for_unknown_module_is_not_found() {
    let n = node(&InMemoryStateStore::new(), "cp-1");
    let err = n
        .cp
        .registry()
        .module_health_probe("ghost", CHAT_URL, SERVING, None)
        .await
        .unwrap_err();
    assert!(matches!(err, DomainError::ModuleNotFound(ref name) if name == "ghost"));
}

#[tokio::test]
async fn lookups_resolve_registered_address() {
    let n = node(&InMemoryStateStore::new(), "cp-1");
    let registry = n.cp.registry();
    registry
        .register_module("chat", &format!("http://{CHAT_URL}"), SERVING, None)
        .await
        .unwrap();

    assert_eq!(registry.get_module_url_by_name("chat").await.unwrap(), CHAT_URL);
    assert_eq!(registry.module_exists("chat").await.unwrap(), CHAT_URL);
    assert_eq!(registry.list_modules().await.unwrap(), vec![chat(true)]);
}

#[tokio::test]
async fn sibling_learns_registration_over_the_bus() {
    let store = InMemoryStateStore::new();
    let a = node(&store, "cp-a");
    let b = node(&store, "cp-b");
    let cancel = CancellationToken::new();
    let listener = b.cp.registry().spawn_bus_listener(cancel.clone()).await.unwrap();

    a.cp.registry()
        .register_module("chat", CHAT_URL, SERVING, None)
        .await
        .unwrap();
    eventually(|| b.cp.registry().snapshot() == vec![chat(true)]).await;
    // The sibling never probes; it trusts the broadcasting instance.
    assert_eq!(b.probe.calls(), 0);

    cancel.cancel();
    listener.await.unwrap();
}

#[tokio::test]
async fn restarted_instance_recovers_modules_from_shared_state() {
    let store = InMemoryStateStore::new();
    let a = node(&store, "cp-a");
    a.cp.registry()
        .register_module("chat", CHAT_URL, SERVING, None)
        .await
        .unwrap();
    a.cp.registry()
        .register_module("auth", "10.0.0.6:6000", SERVING, None)
        .await
        .unwrap();

    let b = node(&store, "cp-b");
    b.probe.set_down("auth", true);
    let restored = b.cp.registry().recover_from_store().await.unwrap();

    assert_eq!(restored, 1);
    assert_eq!(b.cp.registry().snapshot(), vec![chat(true)]);
}
