#![allow(clippy::unwrap_used, clippy::expect_used)]

//! Admin Route Registry and Middleware Patch Engine through `ControlPlane`.

mod common;

use std::sync::Arc;
use std::time::Duration;

use common::{AUTH_URL, CHAT_URL, Node, SERVING, eventually, names, node, node_with_db, route};
use control_plane::{DomainError, InMemoryConfigDatabase};
use control_plane_sdk::{ControlPlaneError, MiddlewarePatchRecord, RouteAction};
use serde_json::json;
use state_store::{InMemoryStateStore, StateStore};
use tokio_util::sync::CancellationToken;

const STATS_URL: &str = "10.0.0.7:5001";

async fn with_chat_module(n: &Node) {
    n.cp.registry()
        .register_module("chat", CHAT_URL, SERVING, None)
        .await
        .unwrap();
}

fn chain(n: &Node, action: RouteAction, path: &str) -> Vec<String> {
    n.cp.route_table()
        .resolve(action, path)
        .expect("route should be mounted")
        .target
        .middlewares
}

fn record(middleware: &str, position: usize, owner: &str) -> MiddlewarePatchRecord {
    MiddlewarePatchRecord {
        path: "/rooms".to_owned(),
        action: RouteAction::Post,
        middleware: middleware.to_owned(),
        position,
        owner: owner.to_owned(),
    }
}

fn sorted_records(n: &Node) -> Vec<MiddlewarePatchRecord> {
    let mut records = n.db.all_records();
    records.sort_by_key(|r| r.position);
    records
}

#[tokio::test]
async fn registration_mounts_under_module_prefix_and_persists() {
    let n = node(&InMemoryStateStore::new(), "cp-1");
    with_chat_module(&n).await;

    n.cp.admin()
        .register_admin_route(
            "chat",
            None,
            vec![
                route("/rooms", RouteAction::Post, &["rateLimit"]),
                route("/rooms/:id", RouteAction::Get, &[]),
            ],
        )
        .await
        .unwrap();

    let resolved = n
        .cp
        .route_table()
        .resolve(RouteAction::Get, "/admin/chat/rooms/42")
        .unwrap();
    assert_eq!(resolved.target.module_url, CHAT_URL);
    assert_eq!(resolved.params["id"], "42");
    assert_eq!(chain(&n, RouteAction::Post, "/admin/chat/rooms"), names(&["rateLimit"]));

    let persisted = n.store.get("admin").await.unwrap().unwrap();
    assert_eq!(persisted["routes"][0]["url"], json!(CHAT_URL));
    assert_eq!(persisted["routes"][0]["moduleName"], json!("chat"));
    assert_eq!(persisted["routes"][0]["routes"].as_array().unwrap().len(), 2);
}

#[tokio::test]
async fn reregistration_replaces_only_routes_of_the_same_url() {
    let n = node(&InMemoryStateStore::new(), "cp-1");
    with_chat_module(&n).await;
    let admin = n.cp.admin();

    admin
        .register_admin_route(
            "chat",
            None,
            vec![
                route("/rooms", RouteAction::Post, &[]),
                route("/rooms/:id", RouteAction::Delete, &[]),
            ],
        )
        .await
        .unwrap();
    admin
        .register_admin_route(
            "chat",
            Some(STATS_URL.to_owned()),
            vec![route("/stats", RouteAction::Get, &[])],
        )
        .await
        .unwrap();

    admin
        .register_admin_route("chat", None, vec![route("/rooms", RouteAction::Post, &[])])
        .await
        .unwrap();

    let table = n.cp.route_table();
    assert!(table.resolve(RouteAction::Post, "/admin/chat/rooms").is_some());
    assert!(table.resolve(RouteAction::Delete, "/admin/chat/rooms/1").is_none());
    let stats = table.resolve(RouteAction::Get, "/admin/chat/stats").unwrap();
    assert_eq!(stats.target.module_url, STATS_URL);

    let urls: Vec<String> = admin.route_sets().into_iter().map(|s| s.url).collect();
    assert_eq!(urls, vec![CHAT_URL.to_owned(), STATS_URL.to_owned()]);
    let persisted = n.store.get("admin").await.unwrap().unwrap();
    assert_eq!(persisted["routes"].as_array().unwrap().len(), 2);
}

/// Paths mounted on the live table and paths the registry holds, sorted.
fn live_and_registered(n: &Node) -> (Vec<String>, Vec<String>) {
    let mut live: Vec<String> = n.cp.route_table().list().into_iter().map(|t| t.path).collect();
    let mut registered: Vec<String> = n
        .cp
        .admin()
        .route_sets()
        .into_iter()
        .flat_map(|s| s.routes)
        .map(|r| r.options.path)
        .collect();
    live.sort();
    registered.sort();
    (live, registered)
}

#[tokio::test]
async fn reregistration_may_rename_path_parameters() {
    let n = node(&InMemoryStateStore::new(), "cp-1");
    with_chat_module(&n).await;
    let admin = n.cp.admin();

    admin
        .register_admin_route("chat", None, vec![route("/rooms/:id", RouteAction::Get, &[])])
        .await
        .unwrap();
    admin
        .register_admin_route("chat", None, vec![route("/rooms/:roomId", RouteAction::Get, &[])])
        .await
        .unwrap();

    let resolved = n
        .cp
        .route_table()
        .resolve(RouteAction::Get, "/admin/chat/rooms/42")
        .unwrap();
    assert_eq!(resolved.params["roomId"], "42");
    assert!(!resolved.params.contains_key("id"));

    let (live, registered) = live_and_registered(&n);
    assert_eq!(live, names(&["/rooms/:roomId"]));
    assert_eq!(live, registered);
}

#[tokio::test]
async fn conflicting_set_leaves_no_route_behind() {
    let n = node(&InMemoryStateStore::new(), "cp-1");
    with_chat_module(&n).await;

    let err = n
        .cp
        .admin()
        .register_admin_route(
            "chat",
            None,
            vec![
                route("/ok", RouteAction::Get, &[]),
                route("/rooms/:id", RouteAction::Get, &[]),
                route("/rooms/:name", RouteAction::Post, &[]),
            ],
        )
        .await
        .unwrap_err();
    assert!(matches!(err, DomainError::RouteMount { .. }));

    assert!(n.cp.route_table().resolve(RouteAction::Get, "/admin/chat/ok").is_none());
    let (live, registered) = live_and_registered(&n);
    assert!(live.is_empty());
    assert!(registered.is_empty());
    assert!(n.store.get("admin").await.unwrap().is_none());
}

#[tokio::test]
async fn failed_reregistration_keeps_previous_set_live() {
    let n = node(&InMemoryStateStore::new(), "cp-1");
    with_chat_module(&n).await;
    let admin = n.cp.admin();

    admin
        .register_admin_route(
            "chat",
            None,
            vec![
                route("/rooms", RouteAction::Post, &["rateLimit"]),
                route("/rooms/:id", RouteAction::Get, &[]),
            ],
        )
        .await
        .unwrap();
    let before = admin.route_sets();

    let err = admin
        .register_admin_route(
            "chat",
            None,
            vec![
                route("/rooms/:roomId", RouteAction::Get, &[]),
                route("/rooms/:name", RouteAction::Delete, &[]),
            ],
        )
        .await
        .unwrap_err();
    assert!(matches!(err, DomainError::RouteMount { .. }));

    assert_eq!(admin.route_sets(), before);
    let resolved = n
        .cp
        .route_table()
        .resolve(RouteAction::Get, "/admin/chat/rooms/7")
        .unwrap();
    assert_eq!(resolved.params["id"], "7");
    assert_eq!(chain(&n, RouteAction::Post, "/admin/chat/rooms"), names(&["rateLimit"]));
    let (live, registered) = live_and_registered(&n);
    assert_eq!(live, names(&["/rooms", "/rooms/:id"]));
    assert_eq!(live, registered);
}

#[tokio::test]
async fn unregistered_module_without_router_url_is_internal() {
    let n = node(&InMemoryStateStore::new(), "cp-1");
    let err = n
        .cp
        .admin()
        .register_admin_route("ghost", None, vec![route("/x", RouteAction::Get, &[])])
        .await
        .unwrap_err();
    assert!(matches!(err, DomainError::Internal(_)));
    assert!(n.cp.route_table().list().is_empty());

    // An explicit router url needs no registry entry.
    n.cp.admin()
        .register_admin_route(
            "ghost",
            Some("10.0.0.9:9000".to_owned()),
            vec![route("/x", RouteAction::Get, &[])],
        )
        .await
        .unwrap();
    assert!(n.cp.route_table().resolve(RouteAction::Get, "/admin/ghost/x").is_some());
}

#[tokio::test]
async fn patching_unknown_route_is_not_found() {
    let n = node(&InMemoryStateStore::new(), "cp-1");
    let err = n
        .cp
        .admin()
        .patch_route_middlewares("/rooms", RouteAction::Post, &names(&["auth"]), None)
        .await
        .unwrap_err();
    assert!(matches!(err, DomainError::RouteNotFound { .. }));
    assert!(matches!(
        ControlPlaneError::from(err),
        ControlPlaneError::NotFound(_)
    ));
}

#[tokio::test]
async fn modules_may_only_remove_their_own_middlewares() {
    const A: &str = "10.0.0.8:8000";
    const B: &str = "10.0.0.9:9000";

    let n = node(&InMemoryStateStore::new(), "cp-1");
    with_chat_module(&n).await;
    let admin = n.cp.admin();
    admin
        .register_admin_route("chat", None, vec![route("/rooms", RouteAction::Post, &["rateLimit"])])
        .await
        .unwrap();

    admin
        .patch_route_middlewares("/rooms", RouteAction::Post, &names(&["rateLimit", "m1"]), Some(A))
        .await
        .unwrap();
    admin
        .patch_route_middlewares(
            "/rooms",
            RouteAction::Post,
            &names(&["rateLimit", "m1", "m2"]),
            Some(B),
        )
        .await
        .unwrap();
    assert_eq!(
        sorted_records(&n),
        vec![record("m1", 1, A), record("m2", 2, B)]
    );

    // B cannot strip A's middleware, nor the route's own default.
    let err = admin
        .patch_route_middlewares("/rooms", RouteAction::Post, &names(&["rateLimit", "m2"]), Some(B))
        .await
        .unwrap_err();
    assert!(matches!(err, DomainError::MiddlewareOwnership { ref owner, .. } if owner == A));
    assert!(matches!(
        ControlPlaneError::from(err),
        ControlPlaneError::PermissionDenied(_)
    ));
    let err = admin
        .patch_route_middlewares("/rooms", RouteAction::Post, &names(&["m1", "m2"]), Some(B))
        .await
        .unwrap_err();
    assert!(matches!(err, DomainError::MiddlewareOwnership { ref owner, .. } if owner == CHAT_URL));
    // A rejected patch changes nothing.
    assert_eq!(
        chain(&n, RouteAction::Post, "/admin/chat/rooms"),
        names(&["rateLimit", "m1", "m2"])
    );

    // A removes its own; m2 moves up and its record follows.
    admin
        .patch_route_middlewares("/rooms", RouteAction::Post, &names(&["rateLimit", "m2"]), Some(A))
        .await
        .unwrap();
    assert_eq!(sorted_records(&n), vec![record("m2", 1, B)]);
    assert_eq!(
        chain(&n, RouteAction::Post, "/admin/chat/rooms"),
        names(&["rateLimit", "m2"])
    );

    // Operators may remove anything.
    admin
        .patch_route_middlewares("/rooms", RouteAction::Post, &[], None)
        .await
        .unwrap();
    assert!(n.db.all_records().is_empty());
    assert!(chain(&n, RouteAction::Post, "/admin/chat/rooms").is_empty());
}

#[tokio::test]
async fn operator_injections_are_owned_by_operator() {
    let n = node(&InMemoryStateStore::new(), "cp-1");
    with_chat_module(&n).await;
    n.cp.admin()
        .register_admin_route("chat", None, vec![route("/rooms", RouteAction::Post, &[])])
        .await
        .unwrap();

    n.cp.admin()
        .patch_route_middlewares("/rooms", RouteAction::Post, &names(&["audit"]), None)
        .await
        .unwrap();
    assert_eq!(n.db.all_records(), vec![record("audit", 0, "operator")]);

    let err = n
        .cp
        .admin()
        .patch_route_middlewares("/rooms", RouteAction::Post, &[], Some(CHAT_URL))
        .await
        .unwrap_err();
    assert!(matches!(err, DomainError::MiddlewareOwnership { .. }));
}

#[tokio::test(start_paused = true)]
async fn patch_fails_when_database_stays_down() {
    let n = node(&InMemoryStateStore::new(), "cp-1");
    with_chat_module(&n).await;
    n.cp.admin()
        .register_admin_route("chat", None, vec![route("/rooms", RouteAction::Post, &[])])
        .await
        .unwrap();
    n.db.set_active(false);

    let err = n
        .cp
        .admin()
        .patch_route_middlewares("/rooms", RouteAction::Post, &names(&["auth"]), Some(AUTH_URL))
        .await
        .unwrap_err();
    assert!(matches!(err, DomainError::DatabaseWaitTimedOut(_)));
    assert!(matches!(
        ControlPlaneError::from(err),
        ControlPlaneError::FailedPrecondition(_)
    ));
    assert!(chain(&n, RouteAction::Post, "/admin/chat/rooms").is_empty());
}

#[tokio::test(start_paused = true)]
async fn patch_waits_for_database_to_come_back() {
    let n = node(&InMemoryStateStore::new(), "cp-1");
    with_chat_module(&n).await;
    n.cp.admin()
        .register_admin_route("chat", None, vec![route("/rooms", RouteAction::Post, &[])])
        .await
        .unwrap();
    n.db.set_active(false);

    let db = Arc::clone(&n.db);
    tokio::spawn(async move {
        tokio::time::sleep(Duration::from_secs(2)).await;
        db.set_active(true);
    });
    n.cp.admin()
        .patch_route_middlewares("/rooms", RouteAction::Post, &names(&["auth"]), Some(AUTH_URL))
        .await
        .unwrap();
    assert_eq!(n.db.all_records(), vec![record("auth", 0, AUTH_URL)]);
}

#[tokio::test(start_paused = true)]
async fn persisted_patches_return_after_reregistration_settles() {
    let n = node(&InMemoryStateStore::new(), "cp-1");
    with_chat_module(&n).await;
    let admin = n.cp.admin();
    let defaults = || vec![route("/rooms", RouteAction::Post, &["rateLimit"])];

    admin.register_admin_route("chat", None, defaults()).await.unwrap();
    admin
        .patch_route_middlewares(
            "/rooms",
            RouteAction::Post,
            &names(&["auth", "rateLimit"]),
            Some(AUTH_URL),
        )
        .await
        .unwrap();

    // The module restarts and pushes its defaults again, twice in a burst.
    admin.register_admin_route("chat", None, defaults()).await.unwrap();
    tokio::time::sleep(Duration::from_secs(1)).await;
    admin.register_admin_route("chat", None, defaults()).await.unwrap();
    assert_eq!(chain(&n, RouteAction::Post, "/admin/chat/rooms"), names(&["rateLimit"]));
    assert!(admin.apply_pending());

    tokio::time::sleep(Duration::from_secs(2)).await;
    assert_eq!(chain(&n, RouteAction::Post, "/admin/chat/rooms"), names(&["rateLimit"]));

    tokio::time::sleep(Duration::from_secs(2)).await;
    assert_eq!(
        chain(&n, RouteAction::Post, "/admin/chat/rooms"),
        names(&["auth", "rateLimit"])
    );
    // Ownership survives re-application.
    assert_eq!(n.db.all_records(), vec![record("auth", 0, AUTH_URL)]);
    assert!(!admin.apply_pending());
}

#[tokio::test(start_paused = true)]
async fn admin_config_change_triggers_reapplication() {
    let n = node(&InMemoryStateStore::new(), "cp-1");
    with_chat_module(&n).await;
    n.cp.admin()
        .register_admin_route("chat", None, vec![route("/rooms", RouteAction::Post, &[])])
        .await
        .unwrap();
    tokio::time::sleep(Duration::from_secs(4)).await;
    assert!(!n.cp.admin().apply_pending());

    n.cp.config_store()
        .set("admin", json!({"theme": "dark"}))
        .await
        .unwrap();
    assert!(n.cp.admin().apply_pending());
}

#[tokio::test(start_paused = true)]
async fn fresh_instance_recovers_routes_and_patches() {
    let store = InMemoryStateStore::new();
    let db = Arc::new(InMemoryConfigDatabase::default());
    let a = node_with_db(&store, Arc::clone(&db), "cp-a");
    with_chat_module(&a).await;
    a.cp.admin()
        .register_admin_route("chat", None, vec![route("/rooms", RouteAction::Post, &["rateLimit"])])
        .await
        .unwrap();
    a.cp.admin()
        .patch_route_middlewares(
            "/rooms",
            RouteAction::Post,
            &names(&["rateLimit", "auth"]),
            Some(AUTH_URL),
        )
        .await
        .unwrap();

    let b = node_with_db(&store, db, "cp-b");
    assert_eq!(b.cp.admin().recover_from_store().await.unwrap(), 1);
    // The persisted route set already carries the patched chain.
    assert_eq!(
        chain(&b, RouteAction::Post, "/admin/chat/rooms"),
        names(&["rateLimit", "auth"])
    );

    tokio::time::sleep(Duration::from_secs(4)).await;
    assert_eq!(
        chain(&b, RouteAction::Post, "/admin/chat/rooms"),
        names(&["rateLimit", "auth"])
    );
    assert_eq!(b.db.all_records(), vec![record("auth", 1, AUTH_URL)]);
}

#[tokio::test]
async fn sibling_mounts_broadcast_route_sets() {
    let store = InMemoryStateStore::new();
    let a = node(&store, "cp-a");
    let b = node(&store, "cp-b");
    let cancel = CancellationToken::new();
    let listener = b.cp.admin().spawn_bus_listener(cancel.clone()).await.unwrap();

    with_chat_module(&a).await;
    a.cp.admin()
        .register_admin_route("chat", None, vec![route("/rooms", RouteAction::Post, &["rateLimit"])])
        .await
        .unwrap();

    eventually(|| {
        b.cp.route_table()
            .resolve(RouteAction::Post, "/admin/chat/rooms")
            .is_some()
    })
    .await;
    assert_eq!(b.cp.admin().route_sets().len(), 1);

    cancel.cancel();
    listener.await.unwrap();
    a.cp.admin().shutdown();
    b.cp.admin().shutdown();
}
