//! Per-node poller.
//!
//! A [`Node`] owns the latest parsed view of one database server process:
//! stats, config, namespaces, XDR datacenters, jobs, latency histograms, and
//! ring-buffered throughput series. `update` performs one poll: a batched
//! info round trip, parsing off-lock, then a single write-lock install.
//! Status flips to `on` on a successful poll and to `off` on any failure,
//! raising an alert into the owning cluster's bucket on each transition.

use std::collections::{HashMap, VecDeque};
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use parking_lot::RwLock;
use serde::Serialize;
use tracing::warn;

use crate::alerts::{AlertBucket, AlertStatus};
use crate::client::{DatabaseNode, HostAddr};
use crate::error::{ArgusError, ArgusResult};
use crate::info::{self, Datacenter};
use crate::namespace::{IndexInfo, Namespace};
use crate::stats::{Stats, Value};
use crate::timeseries::{Point, TimeSeries};

/// Commands issued in the main poll round trip.
const BASE_COMMANDS: &[&str] = &[
    "node",
    "build",
    "cluster-name",
    "statistics",
    "get-config",
    "namespaces",
    "sets",
    "sindex",
    "jobs:",
    "get-dc-config",
    "latency:",
];

/// Cumulative counters turned into per-second throughput series.
pub const THROUGHPUT_STATS: &[&str] = &[
    "stat_read_reqs",
    "stat_read_success",
    "stat_write_reqs",
    "stat_write_success",
    "batch_read_reqs",
    "batch_read_success",
    "scan_reqs",
    "scan_success",
    "query_reqs",
    "query_success",
];

/// Poll health of a node.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum NodeStatus {
    On,
    Off,
}

impl NodeStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            NodeStatus::On => "on",
            NodeStatus::Off => "off",
        }
    }
}

struct NodeInner {
    handle: Option<Arc<dyn DatabaseNode>>,
    status: NodeStatus,
    /// True once the node has answered at least one poll.
    ever_polled: bool,
    id: String,
    build: String,
    cluster_name: String,
    stats: Stats,
    calc_stats: Stats,
    config: Stats,
    namespaces: HashMap<String, Namespace>,
    datacenters: HashMap<String, Datacenter>,
    jobs: Vec<Stats>,
    latency: HashMap<String, Stats>,
    latency_history: VecDeque<(i64, HashMap<String, Stats>)>,
    series: HashMap<String, TimeSeries>,
    /// Timestamp of the last successful poll; 0 before the first one.
    server_time: i64,
}

/// One monitored database node. Registered in exactly one cluster; the
/// cluster's alert bucket is shared in so status transitions land there.
pub struct Node {
    origin: HostAddr,
    info_timeout: Duration,
    series_capacity: usize,
    alerts: Arc<AlertBucket>,
    inner: RwLock<NodeInner>,
}

impl Node {
    pub(crate) fn new(
        origin: HostAddr,
        handle: Option<Arc<dyn DatabaseNode>>,
        alerts: Arc<AlertBucket>,
        info_timeout: Duration,
        series_capacity: usize,
    ) -> Arc<Node> {
        Arc::new(Node {
            origin,
            info_timeout,
            series_capacity,
            alerts,
            inner: RwLock::new(NodeInner {
                handle,
                status: NodeStatus::Off,
                ever_polled: false,
                id: String::new(),
                build: String::new(),
                cluster_name: String::new(),
                stats: Stats::new(),
                calc_stats: Stats::new(),
                config: Stats::new(),
                namespaces: HashMap::new(),
                datacenters: HashMap::new(),
                jobs: Vec::new(),
                latency: HashMap::new(),
                latency_history: VecDeque::new(),
                series: HashMap::new(),
                server_time: 0,
            }),
        })
    }

    /// `host:port` of this node; the driver-resolved address once a handle is
    /// attached, the user-supplied one before that.
    pub fn address(&self) -> String {
        let inner = self.inner.read();
        match &inner.handle {
            Some(h) => h.host().to_string(),
            None => self.origin.to_string(),
        }
    }

    pub fn host(&self) -> String {
        let inner = self.inner.read();
        match &inner.handle {
            Some(h) => h.host().host,
            None => self.origin.host.clone(),
        }
    }

    pub fn port(&self) -> u16 {
        let inner = self.inner.read();
        match &inner.handle {
            Some(h) => h.host().port,
            None => self.origin.port,
        }
    }

    /// The address this node was registered under.
    pub fn origin(&self) -> &HostAddr {
        &self.origin
    }

    pub fn status(&self) -> NodeStatus {
        self.inner.read().status
    }

    pub fn is_on(&self) -> bool {
        self.status() == NodeStatus::On
    }

    /// Server-reported node id (empty until the first successful poll).
    pub fn id(&self) -> String {
        self.inner.read().id.clone()
    }

    pub fn build(&self) -> String {
        self.inner.read().build.clone()
    }

    pub fn cluster_name(&self) -> String {
        self.inner.read().cluster_name.clone()
    }

    pub fn stats_attr(&self, key: &str) -> Option<Value> {
        self.inner.read().stats.get(key).cloned()
    }

    pub fn stats_attrs(&self, keys: &[&str]) -> Stats {
        self.inner.read().stats.get_multi(keys)
    }

    /// Full copy of the latest statistics block.
    pub fn all_stats(&self) -> Stats {
        self.inner.read().stats.clone()
    }

    /// Full copy of the latest config block.
    pub fn all_config(&self) -> Stats {
        self.inner.read().config.clone()
    }

    pub fn disk(&self) -> Stats {
        let inner = self.inner.read();
        crate::stats! {
            "used" => inner.calc_stats.try_int("used-bytes-disk", 0),
            "free" => inner.calc_stats.try_int("free-bytes-disk", 0),
        }
    }

    pub fn memory(&self) -> Stats {
        let inner = self.inner.read();
        crate::stats! {
            "used" => inner.calc_stats.try_int("used-bytes-memory", 0),
            "free" => inner.calc_stats.try_int("free-bytes-memory", 0),
        }
    }

    pub fn namespace_list(&self) -> Vec<String> {
        self.inner.read().namespaces.keys().cloned().collect()
    }

    pub fn namespace(&self, name: &str) -> Option<Namespace> {
        self.inner.read().namespaces.get(name).cloned()
    }

    pub fn namespaces(&self) -> Vec<Namespace> {
        self.inner.read().namespaces.values().cloned().collect()
    }

    /// Namespace -> secondary index names.
    pub fn namespace_indexes(&self) -> HashMap<String, Vec<String>> {
        let inner = self.inner.read();
        inner
            .namespaces
            .iter()
            .map(|(name, ns)| (name.clone(), ns.indexes.keys().cloned().collect()))
            .collect()
    }

    pub fn indexes(&self, namespace: &str) -> HashMap<String, IndexInfo> {
        self.inner
            .read()
            .namespaces
            .get(namespace)
            .map(|ns| ns.indexes.clone())
            .unwrap_or_default()
    }

    pub fn datacenters(&self) -> HashMap<String, Datacenter> {
        self.inner.read().datacenters.clone()
    }

    pub fn jobs(&self) -> Vec<Stats> {
        self.inner.read().jobs.clone()
    }

    /// Latest latency histograms, keyed by histogram name.
    pub fn latency(&self) -> HashMap<String, Stats> {
        self.inner.read().latency.clone()
    }

    /// Latency snapshots recorded strictly after `since`.
    pub fn latency_since(&self, since: i64) -> Vec<(i64, HashMap<String, Stats>)> {
        self.inner
            .read()
            .latency_history
            .iter()
            .filter(|(ts, _)| *ts > since)
            .cloned()
            .collect()
    }

    /// Newest throughput point per metric, keyed `metric -> address -> point`.
    pub fn latest_throughput(&self) -> HashMap<String, HashMap<String, Point>> {
        let addr = self.address();
        let inner = self.inner.read();
        let mut out = HashMap::new();
        for (metric, series) in &inner.series {
            if let Some(point) = series.latest() {
                out.entry(metric.clone())
                    .or_insert_with(HashMap::new)
                    .insert(addr.clone(), point);
            }
        }
        out
    }

    /// Throughput points strictly after `since`, keyed
    /// `metric -> address -> points`.
    pub fn throughput_since(&self, since: i64) -> HashMap<String, HashMap<String, Vec<Point>>> {
        let addr = self.address();
        let inner = self.inner.read();
        let mut out = HashMap::new();
        for (metric, series) in &inner.series {
            let points = series.since(since);
            if !points.is_empty() {
                out.entry(metric.clone())
                    .or_insert_with(HashMap::new)
                    .insert(addr.clone(), points);
            }
        }
        out
    }

    /// Timestamp of the last successful poll (0 when never polled).
    pub fn server_time(&self) -> i64 {
        self.inner.read().server_time
    }

    /// Summary block used by node listings.
    pub fn details(&self) -> Stats {
        let mut out = crate::stats! {
            "address" => self.address(),
            "node_id" => self.id(),
            "node_status" => self.status().as_str(),
            "build" => self.build(),
            "cluster_name" => self.cluster_name(),
            "memory" => self.memory(),
            "disk" => self.disk(),
            "namespaces" => self.namespace_list(),
        };
        if let Some(uptime) = self.stats_attr("uptime") {
            out.insert("uptime", uptime);
        }
        out
    }

    pub(crate) fn handle(&self) -> Option<Arc<dyn DatabaseNode>> {
        self.inner.read().handle.clone()
    }

    /// Install a fresh driver handle, closing the previous one if it differs.
    pub(crate) fn set_handle(&self, handle: Arc<dyn DatabaseNode>) {
        let old = {
            let mut inner = self.inner.write();
            let old = inner.handle.take();
            inner.handle = Some(handle.clone());
            old
        };
        if let Some(old) = old {
            if !Arc::ptr_eq(&old, &handle) {
                old.close();
            }
        }
    }

    pub(crate) fn close(&self) {
        if let Some(handle) = self.inner.write().handle.take() {
            handle.close();
        }
    }

    /// Issue a raw info batch against this node.
    pub async fn request_info(&self, commands: &[&str]) -> ArgusResult<HashMap<String, String>> {
        let handle = self.handle().ok_or_else(|| {
            ArgusError::connection(format!("node {} has no live connection", self.address()))
        })?;
        handle.request_info(self.info_timeout, commands).await
    }

    /// Apply `set-config` changes on this node, one command per parameter.
    pub async fn set_config(
        &self,
        context: &str,
        params: &[(String, String)],
    ) -> ArgusResult<Stats> {
        let mut out = Stats::new();
        for (name, value) in params {
            let cmd = format!("set-config:context={};{}={}", context, name, value);
            let res = self.request_info(&[cmd.as_str()]).await?;
            out.insert(
                name.clone(),
                res.get(cmd.as_str()).cloned().unwrap_or_default(),
            );
        }
        Ok(out)
    }

    /// One poll: batched info requests, parse, install, status transition.
    pub async fn update(&self) -> ArgusResult<()> {
        let Some(handle) = self.handle() else {
            // Registered but not yet attached to a driver handle; stays off
            // until cluster reconciliation assigns one.
            self.set_status(NodeStatus::Off);
            return Ok(());
        };

        let base = match handle.request_info(self.info_timeout, BASE_COMMANDS).await {
            Ok(res) => res,
            Err(err) => {
                self.set_status(NodeStatus::Off);
                warn!(node = %self.address(), error = %err, "info poll failed");
                return Err(err);
            }
        };

        let take = |cmd: &str| base.get(cmd).map(String::as_str).unwrap_or("").trim();

        let node_id = take("node").to_owned();
        let build = take("build").to_owned();
        let cluster_name = take("cluster-name").to_owned();
        let stats = info::parse_fields(take("statistics"));
        let config = info::parse_fields(take("get-config"));
        let ns_names = info::parse_list(take("namespaces"));
        let set_entries = info::parse_entries(take("sets"), ';', ':');
        let sindex_entries = info::parse_entries(take("sindex"), ';', ':');
        let jobs = info::parse_entries(take("jobs:"), ';', ':');
        let datacenters = info::parse_datacenters(take("get-dc-config"));
        let latency = info::parse_latency(take("latency:"));

        // Second round trip: the per-namespace stats blocks.
        let ns_commands: Vec<String> = ns_names.iter().map(|n| format!("namespace/{}", n)).collect();
        let ns_responses = if ns_commands.is_empty() {
            HashMap::new()
        } else {
            let refs: Vec<&str> = ns_commands.iter().map(String::as_str).collect();
            match handle.request_info(self.info_timeout, &refs).await {
                Ok(res) => res,
                Err(err) => {
                    self.set_status(NodeStatus::Off);
                    warn!(node = %self.address(), error = %err, "namespace poll failed");
                    return Err(err);
                }
            }
        };

        let mut namespaces: HashMap<String, Namespace> = HashMap::new();
        for (name, cmd) in ns_names.iter().zip(&ns_commands) {
            let raw = ns_responses.get(cmd).map(String::as_str).unwrap_or("");
            namespaces.insert(name.clone(), Namespace::new(name.clone(), info::parse_fields(raw)));
        }
        for entry in set_entries {
            let ns_name = entry.try_string("ns", entry.try_string("ns_name", "").as_str());
            let set_name = entry.try_string("set", entry.try_string("set_name", "").as_str());
            if set_name.is_empty() {
                continue;
            }
            if let Some(ns) = namespaces.get_mut(&ns_name) {
                let mut set_stats = entry;
                set_stats.insert("ns_name", ns_name.clone());
                set_stats.insert("set_name", set_name.clone());
                ns.sets.insert(set_name, set_stats);
            }
        }
        for entry in sindex_entries {
            if let Some(index) = IndexInfo::from_entry(&entry) {
                if let Some(ns) = namespaces.get_mut(&index.namespace) {
                    ns.indexes.insert(index.name.clone(), index);
                }
            }
        }

        let calc_stats = derive_node_calc_stats(&stats, &namespaces);
        let now = Utc::now().timestamp();

        {
            let mut inner = self.inner.write();
            record_throughput(&mut inner, &stats, now, self.series_capacity);

            inner.id = node_id;
            inner.build = build;
            inner.cluster_name = cluster_name;
            inner.stats = stats;
            inner.calc_stats = calc_stats;
            inner.config = config;
            inner.namespaces = namespaces;
            inner.datacenters = datacenters;
            inner.jobs = jobs;
            inner.latency = latency.clone();
            if inner.latency_history.len() == self.series_capacity {
                inner.latency_history.pop_front();
            }
            inner.latency_history.push_back((now, latency));
            inner.server_time = now;
        }

        self.set_status(NodeStatus::On);
        Ok(())
    }

    fn set_status(&self, new: NodeStatus) {
        let (old, ever_polled) = {
            let mut inner = self.inner.write();
            let old = inner.status;
            let ever = inner.ever_polled;
            if new == NodeStatus::On {
                inner.ever_polled = true;
            }
            inner.status = new;
            (old, ever)
        };
        if old == new {
            return;
        }

        let addr = self.address();
        match new {
            NodeStatus::Off => {
                self.alerts.raise(
                    &addr,
                    AlertStatus::Red,
                    format!("Node {} is down", addr),
                );
            }
            NodeStatus::On if ever_polled => {
                self.alerts.raise(&addr, AlertStatus::Green, format!("Node {} is up", addr));
            }
            // First successful poll is discovery, not a recovery.
            NodeStatus::On => {}
        }
    }

    /// Fold this node's stats into the cluster-wide aggregates. Off nodes
    /// contribute nothing.
    pub(crate) fn apply_stats_to_aggregate(&self, agg: &mut Stats, agg_calc: &mut Stats) {
        let inner = self.inner.read();
        if inner.status != NodeStatus::On {
            return;
        }
        agg.aggregate(&inner.stats);
        agg_calc.aggregate(&inner.calc_stats);
    }

    /// Fold this node's per-namespace stats into the namespace aggregates.
    pub(crate) fn apply_ns_stats_to_aggregate(
        &self,
        agg: &mut HashMap<String, Stats>,
        agg_calc: &mut HashMap<String, Stats>,
    ) {
        let inner = self.inner.read();
        if inner.status != NodeStatus::On {
            return;
        }
        for (name, ns) in &inner.namespaces {
            agg.entry(name.clone()).or_default().aggregate(&ns.stats);
            agg_calc
                .entry(name.clone())
                .or_default()
                .aggregate(&ns.calc_stats);
        }
    }

    /// Fold this node's per-set stats into the set aggregates.
    pub(crate) fn apply_ns_set_stats_to_aggregate(
        &self,
        agg: &mut HashMap<String, HashMap<String, Stats>>,
    ) {
        let inner = self.inner.read();
        if inner.status != NodeStatus::On {
            return;
        }
        for (ns_name, ns) in &inner.namespaces {
            let sets = agg.entry(ns_name.clone()).or_default();
            for (set_name, set_stats) in &ns.sets {
                sets.entry(set_name.clone()).or_default().aggregate(set_stats);
            }
        }
    }
}

/// Compute per-second rates for the cumulative throughput counters and push
/// them into the node's series. Needs the previous poll as a baseline, so the
/// first poll records nothing.
fn record_throughput(inner: &mut NodeInner, new_stats: &Stats, now: i64, capacity: usize) {
    if inner.server_time == 0 {
        return;
    }
    let elapsed = (now - inner.server_time).max(1) as f64;
    for metric in THROUGHPUT_STATS {
        let new_value = new_stats.try_float(metric, -1.0);
        if new_value < 0.0 {
            continue;
        }
        let old_value = inner.stats.try_float(metric, -1.0);
        if old_value < 0.0 {
            continue;
        }
        // Counter resets (node restart) clamp to zero.
        let rate = ((new_value - old_value) / elapsed).max(0.0);
        inner
            .series
            .entry((*metric).to_owned())
            .or_insert_with(|| TimeSeries::new(capacity))
            .push(Point::new(now, rate));
    }
}

/// Node-level byte-usage stats: direct from statistics when present,
/// otherwise summed over the node's namespaces.
fn derive_node_calc_stats(stats: &Stats, namespaces: &HashMap<String, Namespace>) -> Stats {
    let mut calc = Stats::new();
    for key in [
        "used-bytes-disk",
        "free-bytes-disk",
        "used-bytes-memory",
        "free-bytes-memory",
    ] {
        let value = if stats.contains_key(key) {
            stats.try_int(key, 0)
        } else {
            namespaces
                .values()
                .map(|ns| ns.calc_stats.try_int(key, 0))
                .sum()
        };
        calc.insert(key, value);
    }
    calc
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_helpers::MockNode;

    fn node_with_bucket(mock: &Arc<MockNode>) -> (Arc<Node>, Arc<AlertBucket>) {
        let alerts = Arc::new(AlertBucket::new(50));
        let node = Node::new(
            mock.host(),
            Some(Arc::clone(mock) as Arc<dyn DatabaseNode>),
            Arc::clone(&alerts),
            Duration::from_secs(5),
            60,
        );
        (node, alerts)
    }

    #[tokio::test]
    async fn first_poll_is_only_a_throughput_baseline() {
        let mock = MockNode::fixture("10.0.0.1", 3000, "N1", "4.5.1");
        mock.set_info("statistics", "stat_read_reqs=1000");
        let (node, _) = node_with_bucket(&mock);

        node.update().await.unwrap();
        assert!(node.latest_throughput().is_empty());
        assert_eq!(node.status(), NodeStatus::On);
    }

    #[tokio::test]
    async fn growing_counters_become_positive_rates() {
        let mock = MockNode::fixture("10.0.0.1", 3000, "N1", "4.5.1");
        mock.set_info("statistics", "stat_read_reqs=1000");
        let (node, _) = node_with_bucket(&mock);

        node.update().await.unwrap();
        mock.set_info("statistics", "stat_read_reqs=2000");
        node.update().await.unwrap();

        let throughput = node.latest_throughput();
        let point = throughput["stat_read_reqs"]["10.0.0.1:3000"];
        assert!(point.value > 0.0);
    }

    #[tokio::test]
    async fn counter_reset_clamps_rate_to_zero() {
        let mock = MockNode::fixture("10.0.0.1", 3000, "N1", "4.5.1");
        mock.set_info("statistics", "stat_read_reqs=1000");
        let (node, _) = node_with_bucket(&mock);

        node.update().await.unwrap();
        // The node restarted: the cumulative counter went backwards.
        mock.set_info("statistics", "stat_read_reqs=400");
        node.update().await.unwrap();

        let throughput = node.latest_throughput();
        let point = throughput["stat_read_reqs"]["10.0.0.1:3000"];
        assert_eq!(point.value, 0.0);
    }

    #[tokio::test]
    async fn status_transitions_raise_alerts_once() {
        let mock = MockNode::fixture("10.0.0.1", 3000, "N1", "4.5.1");
        let (node, alerts) = node_with_bucket(&mock);

        // Discovery is not a transition worth alerting.
        node.update().await.unwrap();
        assert!(alerts.alerts_from(0).is_empty());

        mock.set_failing(true);
        assert!(node.update().await.is_err());
        let down = alerts.alerts_from(0);
        assert_eq!(down.len(), 1);
        assert_eq!(down[0].status, AlertStatus::Red);

        // Still failing: no new transition.
        let _ = node.update().await;
        assert_eq!(alerts.alerts_from(0).len(), 1);

        mock.set_failing(false);
        node.update().await.unwrap();
        let all = alerts.alerts_from(0);
        assert_eq!(all.len(), 2);
        assert_eq!(all[1].status, AlertStatus::Green);
    }

    #[test]
    fn calc_stats_fall_back_to_namespace_sums() {
        // Statistics block carries no byte-usage keys at all.
        let stats = info::parse_fields("uptime=86400");
        let mut namespaces = HashMap::new();
        namespaces.insert(
            "a".to_owned(),
            Namespace::new(
                "a",
                info::parse_fields(
                    "device_used_bytes=100;device_total_bytes=400;memory_used_bytes=10;memory-size=50",
                ),
            ),
        );
        namespaces.insert(
            "b".to_owned(),
            Namespace::new(
                "b",
                info::parse_fields(
                    "device_used_bytes=50;device_total_bytes=100;memory_used_bytes=5;memory-size=25",
                ),
            ),
        );

        let calc = derive_node_calc_stats(&stats, &namespaces);
        assert_eq!(calc.try_int("used-bytes-disk", 0), 150);
        assert_eq!(calc.try_int("free-bytes-disk", 0), 350);
        assert_eq!(calc.try_int("used-bytes-memory", 0), 15);
        assert_eq!(calc.try_int("free-bytes-memory", 0), 60);
    }

    #[test]
    fn direct_stats_win_over_namespace_sums() {
        let stats = info::parse_fields("used-bytes-disk=999;free-bytes-disk=1");
        let mut namespaces = HashMap::new();
        namespaces.insert(
            "a".to_owned(),
            Namespace::new("a", info::parse_fields("device_used_bytes=100;device_total_bytes=400")),
        );

        let calc = derive_node_calc_stats(&stats, &namespaces);
        assert_eq!(calc.try_int("used-bytes-disk", 0), 999);
        assert_eq!(calc.try_int("free-bytes-disk", 0), 1);
        // Memory keys are absent everywhere and sum to zero.
        assert_eq!(calc.try_int("used-bytes-memory", 0), 0);
    }
}
