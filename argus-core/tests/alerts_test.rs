//! Alert lifecycle across node failures and recoveries.

mod common;

use common::{client_with, fixture, standard_node};

use argus_core::alerts::AlertStatus;

#[tokio::test]
async fn transitions_raise_stamped_alerts_and_cursor_is_monotonic() {
    let fx = fixture();
    let n1 = standard_node("10.0.0.1", "N1", "4.5.1", 100);
    let cluster = fx.register(client_with(&[n1.clone()]), false).await;

    // First successful poll is discovery, not a transition worth alerting.
    cluster.update().await.unwrap();
    assert!(cluster.alerts_from(0).is_empty());

    // Node failure: node-down plus cluster-down (last live node gone).
    n1.set_failing(true);
    cluster.update().await.unwrap();

    let down = cluster.alerts_from(0);
    assert_eq!(down.len(), 2);
    assert!(down.iter().all(|a| a.status == AlertStatus::Red));
    assert!(down.iter().all(|a| a.cluster_id == cluster.id()));
    assert!(down
        .iter()
        .any(|a| a.node_address == "10.0.0.1:3000" && a.desc.contains("down")));
    let last_seen = down.last().unwrap().id;

    // Recovery: node-up plus cluster-up, visible only after the cursor.
    n1.set_failing(false);
    cluster.update().await.unwrap();

    let up = cluster.alerts_from(last_seen);
    assert_eq!(up.len(), 2);
    assert!(up.iter().all(|a| a.status == AlertStatus::Green));
    assert!(up.iter().all(|a| a.id > last_seen));
    assert!(up.iter().all(|a| a.cluster_id == cluster.id()));

    // Nothing new after the latest id.
    let newest = up.last().unwrap().id;
    assert!(cluster.alerts_from(newest).is_empty());
}

#[tokio::test]
async fn repeated_failures_do_not_repeat_alerts_without_transitions() {
    let fx = fixture();
    let n1 = standard_node("10.0.0.1", "N1", "4.5.1", 100);
    let cluster = fx.register(client_with(&[n1.clone()]), false).await;

    cluster.update().await.unwrap();
    n1.set_failing(true);
    cluster.update().await.unwrap();
    let after_first = cluster.alerts_from(0).len();

    // Still failing: no new transition, no new alerts.
    cluster.update().await.unwrap();
    cluster.update().await.unwrap();
    assert_eq!(cluster.alerts_from(0).len(), after_first);
}
