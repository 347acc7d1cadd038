//! Datacenter/XDR topology folding.

mod common;

use common::{client_with, fixture, standard_node};

use argus_core::stats::Value;

fn shipping_namespaces(xdr_info: &argus_core::stats::Stats, key: &str) -> Vec<String> {
    match xdr_info.get(key) {
        Some(Value::Map(entry)) => match entry.get("shipping_namespaces") {
            Some(Value::List(list)) => list
                .iter()
                .filter_map(|v| v.as_str().map(str::to_owned))
                .collect(),
            _ => Vec::new(),
        },
        _ => Vec::new(),
    }
}

#[tokio::test]
async fn monitored_remote_folds_under_its_cluster_id() {
    let fx = fixture();

    // Cluster X monitors the node the remote datacenter points at.
    let remote_node = standard_node("10.0.0.9", "R1", "4.5.1", 100);
    let cluster_x = fx.register(client_with(&[remote_node]), false).await;

    // Cluster Y ships to DC1, which lists X's node.
    let n1 = standard_node("10.0.0.1", "N1", "4.5.1", 100);
    n1.set_info(
        "get-dc-config",
        "dc-name=DC1:dc-node-address-port=10.0.0.9+3000:namespaces=test,bar",
    );
    let cluster_y = fx.register(client_with(&[n1]), false).await;
    cluster_y.update().await.unwrap();

    let info = cluster_y.datacenter_info();
    let xdr_info = match info.get("xdr_info").unwrap() {
        Value::Map(map) => map.clone(),
        other => panic!("unexpected xdr_info: {:?}", other),
    };

    assert!(xdr_info.contains_key(&cluster_x.id()));
    assert!(!xdr_info.contains_key("10.0.0.9:3000"));
    assert_eq!(
        shipping_namespaces(&xdr_info, &cluster_x.id()),
        vec!["bar".to_owned(), "test".to_owned()]
    );
}

#[tokio::test]
async fn undiscovered_remote_gets_synthetic_off_entry() {
    let fx = fixture();
    let n1 = standard_node("10.0.0.1", "N1", "4.5.1", 100);
    n1.set_info(
        "get-dc-config",
        "dc-name=DC9:dc-node-address-port=10.9.9.9+3000:namespaces=test",
    );
    let cluster = fx.register(client_with(&[n1]), false).await;
    cluster.update().await.unwrap();

    let info = cluster.datacenter_info();
    let xdr_info = match info.get("xdr_info").unwrap() {
        Value::Map(map) => map.clone(),
        other => panic!("unexpected xdr_info: {:?}", other),
    };
    assert!(xdr_info.contains_key("10.9.9.9:3000"));
    assert_eq!(
        shipping_namespaces(&xdr_info, "10.9.9.9:3000"),
        vec!["test".to_owned()]
    );

    let remotes = match info.get("_remotes").unwrap() {
        Value::Map(map) => map.clone(),
        other => panic!("unexpected _remotes: {:?}", other),
    };
    let synthetic = match remotes.get("10.9.9.9:3000").unwrap() {
        Value::Map(map) => map.clone(),
        other => panic!("unexpected synthetic entry: {:?}", other),
    };
    assert_eq!(synthetic.try_string("discovery", ""), "secured");

    let nodes = match synthetic.get("nodes").unwrap() {
        Value::Map(map) => map.clone(),
        other => panic!("unexpected nodes: {:?}", other),
    };
    let entry = match nodes.get("10.9.9.9:3000").unwrap() {
        Value::Map(map) => map.clone(),
        other => panic!("unexpected node entry: {:?}", other),
    };
    assert_eq!(entry.try_string("status", ""), "off");

    // TPS placeholders are numeric zeros, matching the main view's shape.
    let read_tps = match synthetic.get("read_tps").unwrap() {
        Value::Map(map) => map.clone(),
        other => panic!("unexpected read_tps: {:?}", other),
    };
    assert_eq!(read_tps.get("total"), Some(&Value::Float(0.0)));
}

#[tokio::test]
async fn datacenter_view_sums_canonical_tps_metrics() {
    let fx = fixture();
    let n1 = standard_node("10.0.0.1", "N1", "4.5.1", 100);
    let cluster = fx.register(client_with(&[n1.clone()]), false).await;

    cluster.update().await.unwrap();
    n1.set_info(
        "statistics",
        "used-bytes-disk=100;free-bytes-disk=900;used-bytes-memory=50;free-bytes-memory=50;\
         stat_read_reqs=9000;stat_read_success=8900;stat_write_reqs=4000;stat_write_success=3990",
    );
    cluster.update().await.unwrap();

    let info = cluster.datacenter_info();
    let read_tps = match info.get("read_tps").unwrap() {
        Value::Map(map) => map.clone(),
        other => panic!("unexpected read_tps: {:?}", other),
    };
    assert!(read_tps.try_float("total", 0.0) > 0.0);
    assert!(read_tps.try_float("success", 0.0) > 0.0);
}
