//! Shared fixtures for integration tests: an observer wired to the mock
//! driver, plus canned node responses.

#![allow(dead_code)]

use std::sync::Arc;

use tempfile::TempDir;

use argus_core::backup::TransferExecutor;
use argus_core::client::{ClientFactory, DatabaseNode, HostAddr};
use argus_core::cluster::Cluster;
use argus_core::config::Config;
use argus_core::mailer::Mailer;
use argus_core::observer::{Observer, RegisterRequest};
use argus_core::test_helpers::{MockClient, MockFactory, MockNode, NoopExecutor};

pub struct Fixture {
    pub observer: Arc<Observer>,
    pub factory: Arc<MockFactory>,
    // Holds the transfer ledger for the test's lifetime.
    pub data_dir: TempDir,
}

pub fn test_config(data_dir: &TempDir, inactive_secs: i64) -> Config {
    let mut config = Config::default();
    // Make every refresh due immediately.
    config.service.update_interval = 0;
    config.service.inactive_dur_before_removal = inactive_secs;
    config.backup.data_dir = data_dir.path().display().to_string();
    config
}

pub fn fixture() -> Fixture {
    fixture_with(Arc::new(NoopExecutor), 0)
}

pub fn fixture_with(executor: Arc<dyn TransferExecutor>, inactive_secs: i64) -> Fixture {
    let data_dir = TempDir::new().unwrap();
    let config = test_config(&data_dir, inactive_secs);
    let factory = MockFactory::new();
    let observer = Observer::with_components(
        config,
        Arc::clone(&factory) as Arc<dyn ClientFactory>,
        Mailer::new(Default::default()),
        executor,
    );
    Fixture {
        observer,
        factory,
        data_dir,
    }
}

impl Fixture {
    /// Queue `client` on the factory and register it as a cluster.
    pub async fn register(&self, client: Arc<MockClient>, permanent: bool) -> Arc<Cluster> {
        self.register_as(client, permanent, None, None).await
    }

    pub async fn register_as(
        &self,
        client: Arc<MockClient>,
        permanent: bool,
        user: Option<&str>,
        password: Option<&str>,
    ) -> Arc<Cluster> {
        let seeds: Vec<HostAddr> = client
            .mock_nodes()
            .first()
            .map(|n| vec![n.host()])
            .unwrap_or_else(|| vec![HostAddr::new("127.0.0.1", 3000)]);
        self.factory.push_client(client);
        self.observer
            .register(RegisterRequest {
                seeds,
                alias: None,
                user: user.map(str::to_owned),
                password: password.map(str::to_owned),
                permanent,
            })
            .await
            .unwrap()
    }
}

/// A node answering the full poll command set with plausible data.
pub fn standard_node(host: &str, id: &str, build: &str, disk_used: i64) -> Arc<MockNode> {
    let node = MockNode::fixture(host, 3000, id, build);
    node.set_info("cluster-name", "testcluster");
    node.set_info(
        "statistics",
        &format!(
            "used-bytes-disk={};free-bytes-disk={};used-bytes-memory=50;free-bytes-memory=50;\
             stat_read_reqs=1000;stat_read_success=990;stat_write_reqs=500;stat_write_success=495;\
             uptime=86400",
            disk_used,
            1000 - disk_used
        ),
    );
    node.set_info("get-config", "proto-fd-max=15000;transaction-threads-per-queue=4");
    node.set_info("namespaces", "test");
    node.set_info(
        "namespace/test",
        "objects=100;repl-factor=2;available_pct=80;master-objects=1000;master_tombstones=5;\
         prole-objects=900;prole_tombstones=3;used-bytes-disk=60;free-bytes-disk=940;\
         used-bytes-memory=20;free-bytes-memory=80;type=device",
    );
    node.set_info("sets", "ns=test:set=demo:objects=50;ns=test:set=extra:objects=25");
    node.set_info(
        "sindex",
        "ns=test:indexname=idx_age:set=demo:bin=age:type=NUMERIC:sync_state=synced",
    );
    node
}

pub fn client_with(nodes: &[Arc<MockNode>]) -> Arc<MockClient> {
    let client = MockClient::new();
    for node in nodes {
        client.add_mock_node(Arc::clone(node));
    }
    client
}
