//! Observer behavior: registration idempotence, sessions, eviction, debug
//! mode, shutdown.

mod common;

use std::sync::Arc;
use std::time::Duration;

use common::{client_with, fixture, fixture_with, standard_node};

use argus_core::client::HostAddr;
use argus_core::observer::RegisterRequest;
use argus_core::test_helpers::{MockClient, NoopExecutor};

#[tokio::test]
async fn permanent_registration_is_idempotent() {
    let fx = fixture();
    let n1 = standard_node("10.0.0.1", "N1", "4.5.1", 100);
    let client = client_with(&[n1]);
    let first = fx.register(Arc::clone(&client), true).await;

    // Same seeds, registered again: one cluster, one id.
    let second = fx
        .observer
        .register(RegisterRequest {
            seeds: vec![HostAddr::new("10.0.0.1", 3000)],
            permanent: true,
            ..Default::default()
        })
        .await
        .unwrap();

    assert_eq!(first.id(), second.id());
    assert!(Arc::ptr_eq(&first, &second));
    assert_eq!(fx.observer.clusters().len(), 1);
    // The permanent id is the sorted seed list itself.
    assert_eq!(first.id(), "10.0.0.1:3000");
}

#[tokio::test]
async fn user_cluster_reused_only_on_matching_seeds() {
    let fx = fixture();
    let n1 = standard_node("10.0.0.1", "N1", "4.5.1", 100);
    let first = fx.register(client_with(&[n1]), false).await;

    // Same seed list: collapsed onto the existing cluster.
    let same = fx
        .observer
        .register(RegisterRequest {
            seeds: vec![HostAddr::new("10.0.0.1", 3000)],
            ..Default::default()
        })
        .await
        .unwrap();
    assert!(Arc::ptr_eq(&first, &same));

    // Different seeds: a new cluster with its own uuid.
    let other_client = client_with(&[standard_node("10.0.0.5", "N5", "4.5.1", 100)]);
    let other = fx.register(other_client, false).await;
    assert_ne!(first.id(), other.id());
    assert_eq!(fx.observer.clusters().len(), 2);
}

#[tokio::test]
async fn sessions_bind_and_release_clusters() {
    let fx = fixture();
    let n1 = standard_node("10.0.0.1", "N1", "4.5.1", 100);
    let cluster = fx.register(client_with(&[n1]), false).await;

    let sid = fx.observer.new_session();
    fx.observer.append_cluster_for_session(&sid, &cluster.id());

    let visible = fx.observer.clusters_for_session(&sid).unwrap();
    assert_eq!(visible.len(), 1);
    assert_eq!(visible[0].id(), cluster.id());

    assert!(fx.observer.remove_cluster_from_session(&sid, &cluster.id()));
    assert!(fx.observer.clusters_for_session(&sid).unwrap().is_empty());

    fx.observer.remove_session(&sid);
    assert!(fx.observer.clusters_for_session(&sid).is_err());

    // The cluster itself is still registered.
    assert!(fx.observer.find_by_id(&cluster.id()).is_some());
}

#[tokio::test]
async fn idle_user_clusters_are_evicted_but_permanent_survive() {
    let fx = fixture_with(Arc::new(NoopExecutor), 60);
    let user_cluster = fx
        .register(client_with(&[standard_node("10.0.0.1", "N1", "4.5.1", 100)]), false)
        .await;
    let permanent = fx
        .register(client_with(&[standard_node("10.0.0.2", "N2", "4.5.1", 100)]), true)
        .await;

    user_cluster.backdate_last_ping(Duration::from_secs(120));
    permanent.backdate_last_ping(Duration::from_secs(120));

    fx.observer.observe_once().await;

    assert!(fx.observer.find_by_id(&user_cluster.id()).is_none());
    assert!(fx.observer.find_by_id(&permanent.id()).is_some());
}

#[tokio::test]
async fn eviction_disabled_when_inactivity_limit_is_zero() {
    let fx = fixture(); // inactive_dur_before_removal == 0
    let cluster = fx
        .register(client_with(&[standard_node("10.0.0.1", "N1", "4.5.1", 100)]), false)
        .await;
    cluster.backdate_last_ping(Duration::from_secs(86400));

    fx.observer.observe_once().await;
    assert!(fx.observer.find_by_id(&cluster.id()).is_some());
}

#[tokio::test]
async fn session_reads_keep_clusters_alive() {
    let fx = fixture_with(Arc::new(NoopExecutor), 60);
    let cluster = fx
        .register(client_with(&[standard_node("10.0.0.1", "N1", "4.5.1", 100)]), false)
        .await;
    let sid = fx.observer.new_session();
    fx.observer.append_cluster_for_session(&sid, &cluster.id());

    cluster.backdate_last_ping(Duration::from_secs(120));
    // The session read refreshes last_ping before the next eviction scan.
    fx.observer.clusters_for_session(&sid).unwrap();
    fx.observer.observe_once().await;

    assert!(fx.observer.find_by_id(&cluster.id()).is_some());
}

#[tokio::test]
async fn node_discovery_lookup_finds_owning_cluster() {
    let fx = fixture();
    let cluster = fx
        .register(client_with(&[standard_node("10.0.0.1", "N1", "4.5.1", 100)]), false)
        .await;

    let found = fx.observer.node_has_been_discovered("10.0.0.1:3000").unwrap();
    assert_eq!(found.id(), cluster.id());
    assert!(fx.observer.node_has_been_discovered("10.9.9.9:3000").is_none());
}

#[tokio::test]
async fn debug_mode_expires_and_attributes_initiator() {
    let fx = fixture();

    let status = fx
        .observer
        .start_debug("192.168.1.7:55555", Duration::from_secs(60));
    assert!(status.on);
    assert_eq!(status.initiator.as_deref(), Some("192.168.1.7:55555"));
    assert!(fx.observer.debug_status().on);

    // A zero-duration start is expired by the time it is read.
    fx.observer.start_debug("192.168.1.7:55555", Duration::ZERO);
    assert!(!fx.observer.debug_status().on);

    fx.observer.start_debug("x", Duration::from_secs(60));
    let stopped = fx.observer.stop_debug();
    assert!(!stopped.on);
    assert!(!fx.observer.debug_status().on);
}

#[tokio::test]
async fn shutdown_closes_each_client_exactly_once() {
    let fx = fixture();
    let n1 = standard_node("10.0.0.1", "N1", "4.5.1", 100);
    let client: Arc<MockClient> = client_with(&[n1]);
    let cluster = fx.register(Arc::clone(&client), false).await;

    fx.observer.shutdown();
    fx.observer.shutdown();

    assert_eq!(client.close_count(), 1);
    assert_eq!(cluster.status(), "off");
}
