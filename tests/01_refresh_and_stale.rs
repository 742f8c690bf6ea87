mod support;

use std::{sync::Arc, time::Duration};

use pairkeeper::{
    GatewayError, LifecycleError, LifecycleTimings, MemoryStore, SessionKey, SessionRecord,
    SessionStatus, gateway::StatusReply,
};
use support::{ORG, ScriptedGateway, advance, assert_payload_invariant, count, drain};

fn seeded(names: &[(&str, SessionStatus)]) -> Arc<MemoryStore> {
    let records = names.iter().map(|(name, status)| {
        let fresh = SessionRecord::new(&SessionKey::new(ORG, *name));
        match status {
            SessionStatus::Connected => fresh.to_connected(),
            _ => fresh,
        }
    });
    Arc::new(MemoryStore::with_records(records))
}

#[tokio::test(start_paused = true)]
async fn disconnect_is_not_undone_by_a_failed_refresh() {
    let gateway = ScriptedGateway::new();
    let store = Arc::new(MemoryStore::new());
    let manager = support::manager(gateway.clone(), store.clone());
    manager.start(false).await.unwrap();

    gateway.on_start("s1", SessionStatus::Connected, None);
    manager.pair(None).await.unwrap();
    assert_eq!(manager.session("s1").unwrap().status, SessionStatus::Connected);

    // E: explicit disconnect, then a refresh that cannot reach the gateway.
    manager.disconnect("s1").await.unwrap();
    assert_eq!(gateway.disconnect_calls(), 1);
    assert_eq!(manager.session("s1").unwrap().status, SessionStatus::Disconnected);
    assert_eq!(store.get(ORG, "s1").unwrap().status, SessionStatus::Disconnected);

    gateway.set_status("s1", Err(GatewayError::unavailable("timeout")));
    let report = manager.refresh_all().await;

    assert_eq!(report.refreshed, 0);
    assert_eq!(report.failed, 1);
    assert_eq!(manager.session("s1").unwrap().status, SessionStatus::Disconnected);

    manager.shutdown().await;
}

#[tokio::test(start_paused = true)]
async fn failed_disconnect_leaves_state_alone() {
    let gateway = ScriptedGateway::new();
    let manager = support::manager(gateway.clone(), Arc::new(MemoryStore::new()));
    manager.start(false).await.unwrap();

    gateway.on_start("s1", SessionStatus::Connected, None);
    manager.pair(None).await.unwrap();

    gateway.fail_disconnect("s1", GatewayError::rejected("unknown session"));
    let err = manager.disconnect("s1").await.unwrap_err();

    assert!(matches!(err, LifecycleError::Gateway(GatewayError::Rejected { .. })));
    assert_eq!(manager.session("s1").unwrap().status, SessionStatus::Connected);

    manager.shutdown().await;
}

#[tokio::test(start_paused = true)]
async fn stale_fires_once_per_episode() {
    let gateway = ScriptedGateway::new();
    let manager = support::manager(gateway.clone(), Arc::new(MemoryStore::new()));
    manager.start(false).await.unwrap();
    let mut events = manager.subscribe();

    gateway.on_start("s1", SessionStatus::Connected, None);
    manager.pair(None).await.unwrap();
    drain(&mut events);

    // F: 31 minutes without a confirmation.
    advance(31.0 * 60.0 + 5.0).await;
    assert!(manager.is_stale("s1"));
    assert_eq!(count(&drain(&mut events), "stale"), 1);

    advance(10.0 * 60.0).await;
    assert_eq!(count(&drain(&mut events), "stale"), 0);

    // A successful refresh ends the episode.
    gateway.set_status("s1", Ok(StatusReply::connected()));
    let report = manager.refresh_all().await;
    assert_eq!(report.refreshed, 1);
    assert!(!manager.is_stale("s1"));

    advance(31.0 * 60.0 + 5.0).await;
    assert!(manager.is_stale("s1"));
    assert_eq!(count(&drain(&mut events), "stale"), 1);

    manager.shutdown().await;
}

#[tokio::test(start_paused = true)]
async fn sessions_that_never_synced_are_not_stale() {
    let gateway = ScriptedGateway::new();
    let store = seeded(&[("s1", SessionStatus::Connected)]);
    let manager = support::manager(gateway.clone(), store);
    assert_eq!(manager.start(false).await.unwrap(), 1);
    let mut events = manager.subscribe();

    advance(2.0 * 60.0 * 60.0).await;

    assert!(manager.last_sync_at("s1").is_none());
    assert!(!manager.is_stale("s1"));
    assert_eq!(count(&drain(&mut events), "stale"), 0);

    manager.shutdown().await;
}

#[tokio::test(start_paused = true)]
async fn refresh_sweep_isolates_failures() {
    let gateway = ScriptedGateway::new();
    let store = seeded(&[
        ("s1", SessionStatus::Disconnected),
        ("s2", SessionStatus::Connected),
        ("s3", SessionStatus::Connected),
    ]);
    let timings = LifecycleTimings {
        refresh_concurrency: 2,
        ..LifecycleTimings::default()
    };
    let manager = support::manager_with(gateway.clone(), store.clone(), timings);
    manager.start(false).await.unwrap();

    gateway.set_status("s1", Ok(StatusReply::connected()));
    gateway.set_status("s2", Err(GatewayError::unavailable("503")));
    gateway.set_status("s3", Ok(StatusReply::pairing("P9")));

    let report = manager.refresh_all().await;
    assert_eq!(report.refreshed, 2);
    assert_eq!(report.failed, 1);

    assert_eq!(manager.session("s1").unwrap().status, SessionStatus::Connected);
    assert_eq!(manager.session("s2").unwrap().status, SessionStatus::Connected);
    assert!(manager.last_sync_at("s2").is_none());

    // A pairing payload outside a flow is not shown.
    let s3 = manager.session("s3").unwrap();
    assert_eq!(s3.status, SessionStatus::Disconnected);
    assert_eq!(s3.pairing_image, None);
    assert_eq!(store.get(ORG, "s3").unwrap().status, SessionStatus::Disconnected);
    assert_payload_invariant(&manager);

    manager.shutdown().await;
}

#[tokio::test(start_paused = true)]
async fn auto_refresh_can_be_toggled_at_runtime() {
    let gateway = ScriptedGateway::new();
    let store = seeded(&[("s1", SessionStatus::Disconnected)]);
    let manager = support::manager(gateway.clone(), store);
    manager.start(false).await.unwrap();
    gateway.set_status("s1", Ok(StatusReply::connected()));

    advance(45.0).await;
    assert_eq!(gateway.status_calls("s1"), 0);

    manager.set_auto_refresh(true);
    assert!(manager.auto_refresh_enabled());
    advance(30.5).await;
    assert_eq!(gateway.status_calls("s1"), 1);
    assert_eq!(manager.session("s1").unwrap().status, SessionStatus::Connected);
    assert!(manager.last_sync_at("s1").is_some());

    manager.set_auto_refresh(false);
    tokio::time::sleep(Duration::from_secs(90)).await;
    assert_eq!(gateway.status_calls("s1"), 1);

    manager.shutdown().await;
}

#[tokio::test(start_paused = true)]
async fn auto_refresh_idles_without_sessions() {
    let gateway = ScriptedGateway::new();
    let manager = support::manager(gateway.clone(), Arc::new(MemoryStore::new()));
    manager.start(true).await.unwrap();

    advance(95.0).await;
    assert!(manager.sessions().is_empty());

    // The first session is picked up by the next sweep.
    gateway.on_start("s1", SessionStatus::Connected, None);
    gateway.set_status("s1", Ok(StatusReply::connected()));
    manager.pair(None).await.unwrap();

    advance(30.0).await;
    assert_eq!(gateway.status_calls("s1"), 1);

    manager.shutdown().await;
}

#[tokio::test(start_paused = true)]
async fn superseded_refresh_still_counts_as_a_sync() {
    let gateway = ScriptedGateway::new();
    let store = seeded(&[("s1", SessionStatus::Connected)]);
    let manager = support::manager(gateway.clone(), store.clone());
    manager.start(false).await.unwrap();

    gateway.set_status("s1", Ok(StatusReply::connected()));
    gateway.delay_status(Duration::from_secs(1));

    // The disconnect lands while the refresh is waiting on the gateway.
    let (report, disconnected) = tokio::join!(manager.refresh_all(), async {
        advance(0.5).await;
        manager.disconnect("s1").await
    });

    disconnected.unwrap();
    assert_eq!(report.refreshed, 1);
    assert_eq!(manager.session("s1").unwrap().status, SessionStatus::Disconnected);
    assert_eq!(store.get(ORG, "s1").unwrap().status, SessionStatus::Disconnected);
    assert!(manager.last_sync_at("s1").is_some());

    manager.shutdown().await;
}
