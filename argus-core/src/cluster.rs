//! One monitored cluster.
//!
//! A [`Cluster`] owns a driver handle and the set of [`Node`]s polled through
//! it. The refresh pipeline reconciles the node map against the driver,
//! fans out node polls, aggregates the results, and installs every aggregate
//! field under a single write-lock section so readers see either the previous
//! refresh or the new one, never a mix. The `jobs` snapshot and the
//! datacenter view live in dedicated snapshot cells so the hottest read
//! paths never touch the main lock.

use std::collections::HashMap;
use std::sync::{Arc, Weak};
use std::time::{Duration, Instant};

use parking_lot::RwLock;
use serde::Serialize;
use tracing::{debug, error, warn};
use uuid::Uuid;

use crate::alerts::{Alert, AlertBucket, AlertStatus};
use crate::backup::{Backup, BackupParams, Restore, RestoreParams, TransferStatus};
use crate::client::{
    DatabaseClient, HostAddr, IndexType, Privilege, Role, UserRoles,
};
use crate::error::{ArgusError, ArgusResult};
use crate::info::Datacenter;
use crate::namespace::IndexInfo;
use crate::node::{Node, NodeStatus};
use crate::observer::Observer;
use crate::stats::{comma, sorted_unique, Stats, SyncCell, SyncStats, Value};
use crate::timeseries::Point;

/// Capacity of the per-cluster alert ring.
const ALERT_CAPACITY: usize = 50;

/// Stats echoed per node by the set listing.
const SET_INFO_ATTRS: &[&str] = &[
    "delete",
    "deleting",
    "disable-eviction",
    "enable-xdr",
    "evict-hwm-count",
    "memory_data_bytes",
    "n_objects",
    "node_status",
    "ns",
    "ns_name",
    "objects",
    "set",
    "set_name",
    "stop-write-count",
    "stop-writes-count",
    "tombstones",
];

/// Per-node namespace stats echoed by the namespace-per-node view.
const NS_NODE_ATTRS: &[&str] = &[
    "expired-objects",
    "evicted-objects",
    "repl-factor",
    "memory-size",
    "free-pct-memory",
    "max-void-time",
    "hwm-breached",
    "default-ttl",
    "max-ttl",
    "enable-xdr",
    "stop-writes",
    "available_pct",
    "stop-writes-pct",
    "single-bin",
    "data-in-memory",
    "type",
    "master-objects",
    "prole-objects",
    "master_tombstones",
    "prole_tombstones",
];

/// Build census of a cluster: build -> node addresses, plus the newest build.
#[derive(Debug, Clone, Default, Serialize)]
pub struct BuildDetails {
    pub version_list: HashMap<String, Vec<String>>,
    pub latest_build_no: String,
}

struct ClusterInner {
    client: Option<Arc<dyn DatabaseClient>>,
    nodes: HashMap<HostAddr, Arc<Node>>,
    seeds: Vec<HostAddr>,
    alias: Option<String>,
    user: Option<String>,
    password: Option<String>,
    permanent: bool,
    update_interval: u64,
    last_update: Option<Instant>,
    last_ping: Instant,

    agg_node_stats: Stats,
    agg_node_calc_stats: Stats,
    agg_ns_stats: HashMap<String, Stats>,
    agg_ns_calc_stats: HashMap<String, Stats>,
    agg_total_ns_stats: Stats,
    agg_ns_set_stats: HashMap<String, HashMap<String, Stats>>,

    users: Vec<UserRoles>,
    roles: Vec<Role>,
    current_user_privileges: Vec<String>,

    active_backup: Option<Arc<Backup>>,
    active_restore: Option<Arc<Restore>>,

    /// Whether the last health check saw any live node; `None` until the
    /// first check.
    prev_live: Option<bool>,
}

/// A monitored cluster. Created and owned by the [`Observer`].
pub struct Cluster {
    id: String,
    observer: Weak<Observer>,
    alerts: Arc<AlertBucket>,
    info_timeout: Duration,
    series_capacity: usize,
    jobs: SyncCell<Vec<Stats>>,
    datacenter_info: SyncStats,
    /// Serializes refreshes; readers are unaffected.
    update_guard: tokio::sync::Mutex<()>,
    inner: RwLock<ClusterInner>,
}

/// Deterministic id for a config-file cluster: the sorted seed list.
pub fn permanent_id(seeds: &[HostAddr]) -> String {
    let mut parts: Vec<String> = seeds.iter().map(HostAddr::to_string).collect();
    parts.sort();
    parts.join(",")
}

impl Cluster {
    #[allow(clippy::too_many_arguments)]
    pub(crate) fn new(
        observer: Weak<Observer>,
        client: Option<Arc<dyn DatabaseClient>>,
        seeds: Vec<HostAddr>,
        alias: Option<String>,
        user: Option<String>,
        password: Option<String>,
        permanent: bool,
        update_interval: u64,
        info_timeout: Duration,
    ) -> Arc<Cluster> {
        let id = if permanent {
            permanent_id(&seeds)
        } else {
            Uuid::new_v4().to_string()
        };
        let alias = alias.filter(|a| !a.is_empty());
        let user = user.filter(|u| !u.is_empty());
        // Keep roughly an hour of samples at the configured poll rate.
        let series_capacity = (3600 / update_interval.max(1)).clamp(60, 3600) as usize;
        let alerts = Arc::new(AlertBucket::new(ALERT_CAPACITY));

        let cluster = Arc::new(Cluster {
            id,
            observer,
            alerts: Arc::clone(&alerts),
            info_timeout,
            series_capacity,
            jobs: SyncCell::default(),
            datacenter_info: SyncStats::default(),
            update_guard: tokio::sync::Mutex::new(()),
            inner: RwLock::new(ClusterInner {
                client: client.clone(),
                nodes: HashMap::new(),
                seeds,
                alias,
                user,
                password,
                permanent,
                update_interval,
                last_update: None,
                last_ping: Instant::now(),
                agg_node_stats: Stats::new(),
                agg_node_calc_stats: Stats::new(),
                agg_ns_stats: HashMap::new(),
                agg_ns_calc_stats: HashMap::new(),
                agg_total_ns_stats: Stats::new(),
                agg_ns_set_stats: HashMap::new(),
                users: Vec::new(),
                roles: Vec::new(),
                current_user_privileges: Vec::new(),
                active_backup: None,
                active_restore: None,
                prev_live: None,
            }),
        });

        if let Some(client) = client {
            let mut inner = cluster.inner.write();
            for handle in client.nodes() {
                let host = handle.host();
                inner.nodes.insert(
                    host.clone(),
                    Node::new(
                        host,
                        Some(handle),
                        Arc::clone(&alerts),
                        info_timeout,
                        series_capacity,
                    ),
                );
            }
        }

        cluster
    }

    pub fn id(&self) -> String {
        self.id.clone()
    }

    pub fn is_permanent(&self) -> bool {
        self.inner.read().permanent
    }

    pub(crate) fn set_permanent(&self, value: bool) {
        self.inner.write().permanent = value;
    }

    pub fn seeds(&self) -> Vec<HostAddr> {
        self.inner.read().seeds.clone()
    }

    pub fn seed_address(&self) -> String {
        self.inner
            .read()
            .seeds
            .first()
            .map(HostAddr::to_string)
            .unwrap_or_default()
    }

    pub fn user(&self) -> Option<String> {
        self.inner.read().user.clone()
    }

    pub fn security_enabled(&self) -> bool {
        self.inner
            .read()
            .user
            .as_ref()
            .is_some_and(|u| !u.is_empty())
    }

    /// Cluster name as reported by the nodes themselves.
    pub fn name(&self) -> Option<String> {
        for node in self.nodes() {
            let name = node.cluster_name();
            if !name.is_empty() && name != "null" {
                return Some(name);
            }
        }
        None
    }

    /// User-set alias, falling back to the reported cluster name.
    pub fn alias(&self) -> Option<String> {
        if let Some(alias) = self.inner.read().alias.clone() {
            return Some(alias);
        }
        self.name()
    }

    /// Empty alias clears the override.
    pub fn set_alias(&self, alias: &str) {
        let mut inner = self.inner.write();
        inner.alias = if alias.is_empty() {
            None
        } else {
            Some(alias.to_owned())
        };
    }

    pub fn update_interval(&self) -> u64 {
        self.inner.read().update_interval
    }

    pub fn set_update_interval(&self, seconds: u64) {
        self.inner.write().update_interval = seconds;
    }

    /// "on" while the driver reports a live connection.
    pub fn status(&self) -> &'static str {
        let inner = self.inner.read();
        match &inner.client {
            Some(client) if client.is_connected() => "on",
            _ => "off",
        }
    }

    pub(crate) fn is_set(&self) -> bool {
        self.inner.read().client.is_some()
    }

    fn client(&self) -> Option<Arc<dyn DatabaseClient>> {
        self.inner.read().client.clone()
    }

    fn require_client(&self) -> ArgusResult<Arc<dyn DatabaseClient>> {
        self.client()
            .ok_or_else(|| ArgusError::connection("cluster connection is closed"))
    }

    /// Close the driver handle. Terminal and idempotent.
    pub(crate) fn close_and_unset(&self) {
        let client = self.inner.write().client.take();
        if let Some(client) = client {
            client.close();
        }
    }

    pub(crate) fn update_latest_ping(&self) {
        self.inner.write().last_ping = Instant::now();
    }

    /// Non-permanent clusters are eligible for eviction after
    /// `inactive_secs` without a session ping; zero or negative disables it.
    pub(crate) fn should_auto_remove(&self, inactive_secs: i64) -> bool {
        if inactive_secs <= 0 {
            return false;
        }
        let inner = self.inner.read();
        !inner.permanent && inner.last_ping.elapsed() > Duration::from_secs(inactive_secs as u64)
    }

    /// Test hook: pretend the last session ping happened `by` earlier.
    #[cfg(any(test, feature = "test-helpers"))]
    pub fn backdate_last_ping(&self, by: Duration) {
        let mut inner = self.inner.write();
        if let Some(at) = inner.last_ping.checked_sub(by) {
            inner.last_ping = at;
        }
    }

    // ------------------------------------------------------------------
    // Node membership
    // ------------------------------------------------------------------

    pub fn nodes(&self) -> Vec<Arc<Node>> {
        self.inner.read().nodes.values().cloned().collect()
    }

    pub fn node_list(&self) -> Vec<String> {
        let mut list: Vec<String> = self.nodes().iter().map(|n| n.address()).collect();
        list.sort();
        list
    }

    pub fn off_nodes(&self) -> Vec<String> {
        self.nodes()
            .iter()
            .filter(|n| n.status() == NodeStatus::Off)
            .map(|n| n.address())
            .collect()
    }

    pub fn random_active_node(&self) -> Option<Arc<Node>> {
        self.nodes().into_iter().find(|n| n.is_on())
    }

    pub fn find_node_by_address(&self, address: &str) -> Option<Arc<Node>> {
        self.nodes().into_iter().find(|n| n.address() == address)
    }

    pub fn find_node_by_id(&self, id: &str) -> Option<Arc<Node>> {
        self.nodes().into_iter().find(|n| n.id() == id)
    }

    pub fn find_nodes_by_address(&self, addresses: &[String]) -> Vec<Arc<Node>> {
        addresses
            .iter()
            .filter_map(|addr| self.find_node_by_address(addr))
            .collect()
    }

    /// Register a node the user wants monitored before the driver has
    /// discovered it. The address is pushed into the driver's seed list so
    /// the cluster can be rediscovered even if every other node drops out.
    pub fn add_node(&self, address: &str, port: u16) -> ArgusResult<()> {
        let host = HostAddr::new(address, port);
        {
            let inner = self.inner.read();
            if inner.nodes.contains_key(&host) {
                return Err(ArgusError::validation("Node already exists"));
            }
        }
        if self.find_node_by_address(&host.to_string()).is_some() {
            return Err(ArgusError::validation("Node already exists"));
        }

        let client = self.require_client()?;
        client.add_seeds(vec![host.clone()]);

        let node = Node::new(
            host.clone(),
            None,
            Arc::clone(&self.alerts),
            self.info_timeout,
            self.series_capacity,
        );
        self.inner.write().nodes.insert(host, node);
        Ok(())
    }

    /// Only off nodes can be removed; removal is terminal.
    pub fn remove_node_by_address(&self, address: &str) -> ArgusResult<()> {
        let node = self.find_node_by_address(address).ok_or_else(|| {
            ArgusError::NotFound {
                resource: format!("node {}", address),
            }
        })?;
        if node.is_on() {
            return Err(ArgusError::validation(format!(
                "Node {} is active. Only inactive nodes can be removed.",
                address
            )));
        }

        let mut inner = self.inner.write();
        inner.nodes.retain(|_, candidate| !Arc::ptr_eq(candidate, &node));
        drop(inner);
        node.close();
        Ok(())
    }

    // ------------------------------------------------------------------
    // Derived read views
    // ------------------------------------------------------------------

    pub fn node_builds(&self) -> Vec<String> {
        sorted_unique(self.nodes().iter().map(|n| n.build()).collect())
    }

    /// `homogeneous` when every node runs the same build, else `compatible`.
    pub fn node_compatibility(&self) -> &'static str {
        let mut builds: Vec<String> = self.nodes().iter().map(|n| n.build()).collect();
        builds.sort();
        builds.dedup();
        if builds.len() <= 1 {
            "homogeneous"
        } else {
            "compatible"
        }
    }

    pub fn build_details(&self) -> BuildDetails {
        let mut version_list: HashMap<String, Vec<String>> = HashMap::new();
        let mut latest = String::new();
        for node in self.nodes() {
            let build = node.build();
            version_list
                .entry(build.clone())
                .or_default()
                .push(node.address());
            if compare_versions(&build, &latest) == std::cmp::Ordering::Greater {
                latest = build;
            }
        }
        // The UI polls this constantly; treat it as a liveness ping.
        self.update_latest_ping();
        BuildDetails {
            version_list,
            latest_build_no: latest,
        }
    }

    /// Fails when any node runs a build older than `oldest`, naming the
    /// offending builds and their nodes.
    pub fn version_supported(&self, oldest: &str) -> ArgusResult<()> {
        let details = self.build_details();
        for (build, nodes) in &details.version_list {
            if compare_versions(build, oldest) == std::cmp::Ordering::Less {
                return Err(ArgusError::UnsupportedVersion {
                    message: format!(
                        "Database cluster is not supported. Latest supported version is: `v{}`. Nodes [{}] are at `v{}`",
                        oldest,
                        nodes.join(", "),
                        build
                    ),
                });
            }
        }
        Ok(())
    }

    pub fn namespace_list(&self) -> Vec<String> {
        let mut all = Vec::new();
        for node in self.nodes() {
            all.extend(node.namespace_list());
        }
        sorted_unique(all)
    }

    pub fn namespace_indexes(&self) -> HashMap<String, Vec<String>> {
        let mut result: HashMap<String, Vec<String>> = HashMap::new();
        for node in self.nodes() {
            for (ns, list) in node.namespace_indexes() {
                result.entry(ns).or_default().extend(list);
            }
        }
        for list in result.values_mut() {
            let deduped = sorted_unique(std::mem::take(list));
            *list = deduped;
        }
        result
    }

    /// Cluster-wide disk rollup with per-node details.
    pub fn disk(&self) -> Stats {
        self.resource_rollup("used-bytes-disk", "free-bytes-disk", Node::disk)
    }

    /// Cluster-wide memory rollup with per-node details.
    pub fn memory(&self) -> Stats {
        self.resource_rollup("used-bytes-memory", "free-bytes-memory", Node::memory)
    }

    fn resource_rollup(
        &self,
        used_key: &str,
        free_key: &str,
        per_node: fn(&Node) -> Stats,
    ) -> Stats {
        let (used, free) = {
            let inner = self.inner.read();
            (
                inner.agg_node_calc_stats.try_int(used_key, 0),
                inner.agg_node_calc_stats.try_int(free_key, 0),
            )
        };
        let mut details = Stats::new();
        for node in self.nodes() {
            details.insert(node.address(), per_node(&node));
        }
        crate::stats! {"used" => used, "free" => free, "details" => details}
    }

    pub fn users(&self) -> Vec<UserRoles> {
        self.inner.read().users.clone()
    }

    pub fn roles(&self) -> Vec<Role> {
        self.inner.read().roles.clone()
    }

    pub fn role_names(&self) -> Vec<String> {
        sorted_unique(
            self.inner
                .read()
                .roles
                .iter()
                .map(|r| r.name.clone())
                .collect(),
        )
    }

    pub fn current_user_privileges(&self) -> Vec<String> {
        self.inner.read().current_user_privileges.clone()
    }

    /// Newest throughput point per metric, merged across nodes into
    /// `metric -> node address -> point`.
    pub fn latest_throughput(&self) -> HashMap<String, HashMap<String, Point>> {
        let mut result: HashMap<String, HashMap<String, Point>> = HashMap::new();
        for node in self.nodes() {
            for (metric, values) in node.latest_throughput() {
                result.entry(metric).or_default().extend(values);
            }
        }
        result
    }

    /// Highest poll timestamp across the nodes.
    pub fn server_time(&self) -> i64 {
        self.nodes()
            .iter()
            .map(|n| n.server_time())
            .max()
            .unwrap_or(0)
    }

    /// Throughput history strictly after `since`; defaults to the last half
    /// hour of server time.
    pub fn throughput_since(
        &self,
        since: Option<i64>,
    ) -> HashMap<String, HashMap<String, Vec<Point>>> {
        let since = since.unwrap_or_else(|| self.server_time() - 30 * 60);
        let mut result: HashMap<String, HashMap<String, Vec<Point>>> = HashMap::new();
        for node in self.nodes() {
            for (metric, values) in node.throughput_since(since) {
                result.entry(metric).or_default().extend(values);
            }
        }
        result
    }

    /// Latency histograms per node address.
    pub fn latency(&self, addresses: &[String]) -> Stats {
        let mut out = Stats::new();
        for node in self.find_nodes_by_address(addresses) {
            let mut per_node = Stats::new();
            for (hist, stats) in node.latency() {
                per_node.insert(hist, stats);
            }
            out.insert(node.address(), per_node);
        }
        out
    }

    /// Latency snapshots per node address, strictly after `since`.
    pub fn latency_since(&self, addresses: &[String], since: Option<i64>) -> Stats {
        let since = since.unwrap_or_else(|| self.server_time() - 30 * 60);
        let mut out = Stats::new();
        for node in self.find_nodes_by_address(addresses) {
            let history: Vec<Value> = node
                .latency_since(since)
                .into_iter()
                .map(|(ts, hists)| {
                    let mut entry = crate::stats! {"timestamp" => ts};
                    for (hist, stats) in hists {
                        entry.insert(hist, stats);
                    }
                    Value::Map(entry)
                })
                .collect();
            out.insert(node.address(), history);
        }
        out
    }

    /// Aggregated namespace stats for the requested namespaces.
    ///
    /// Numeric stats sum across nodes; `least_available_pct` tracks the
    /// node with the smallest non-negative `available_pct` (first seen wins
    /// ties); object/tombstone pairs are formatted with thousands
    /// separators; `repl-factor` is normalized by node count.
    pub fn namespace_info(&self, namespaces: &[String]) -> HashMap<String, Stats> {
        let nodes = self.nodes();
        let mut result: HashMap<String, Stats> = HashMap::new();

        for node in &nodes {
            for ns_name in namespaces {
                let Some(ns) = node.namespace(ns_name) else {
                    continue;
                };
                let node_stats = ns.stats.clone();

                let entry = result.entry(ns_name.clone());
                let ns_stats = match entry {
                    std::collections::hash_map::Entry::Vacant(vacant) => {
                        vacant.insert(node_stats.clone())
                    }
                    std::collections::hash_map::Entry::Occupied(occupied) => {
                        let existing = occupied.into_mut();
                        existing.aggregate(&node_stats);
                        existing
                    }
                };

                let available = node_stats.try_float("available_pct", -1.0);
                if available >= 0.0 {
                    let current = ns_stats
                        .get("least_available_pct")
                        .and_then(|v| match v {
                            Value::Map(m) => m.get("value").and_then(Value::as_f64),
                            _ => None,
                        });
                    if current.map_or(true, |cur| available < cur) {
                        ns_stats.insert(
                            "least_available_pct",
                            crate::stats! {"node" => node.address(), "value" => available},
                        );
                    }
                }

                let master = format!(
                    "{} / {}",
                    comma(ns_stats.try_int("master-objects", 0)),
                    comma(ns_stats.try_int("master_tombstones", 0))
                );
                let prole = format!(
                    "{} / {}",
                    comma(ns_stats.try_int("prole-objects", 0)),
                    comma(ns_stats.try_int("prole_tombstones", 0))
                );
                ns_stats.insert("master-objects-tombstones", master);
                ns_stats.insert("prole-objects-tombstones", prole);
                ns_stats.insert("cluster_status", self.status());
            }
        }

        if !nodes.is_empty() {
            for stats in result.values_mut() {
                let normalized = stats.try_int("repl-factor", 0) / nodes.len() as i64;
                stats.insert("repl-factor", normalized);
            }
        }

        result
    }

    /// Namespace view broken out per node address.
    pub fn namespace_info_per_node(&self, ns_name: &str, addresses: &[String]) -> Stats {
        let mut result = Stats::new();
        for address in addresses {
            let Some(node) = self.find_node_by_address(address) else {
                result.insert(address.clone(), crate::stats! {"node_status" => "off"});
                continue;
            };
            let Some(ns) = node.namespace(ns_name) else {
                result.insert(address.clone(), crate::stats! {"node_status" => "off"});
                continue;
            };

            let counters = ns.stats_attrs(&[
                "master-objects",
                "master_tombstones",
                "prole-objects",
                "prole_tombstones",
            ]);
            let mut node_info = crate::stats! {
                "memory" => ns.memory(),
                "memory-pct" => ns.memory_percent(),
                "disk" => ns.disk(),
                "disk-pct" => ns.disk_percent(),
                "node_status" => node.status().as_str(),
                "master-objects-tombstones" => format!(
                    "{} / {}",
                    comma(counters.try_int("master-objects", 0)),
                    comma(counters.try_int("master_tombstones", 0))
                ),
                "prole-objects-tombstones" => format!(
                    "{} / {}",
                    comma(counters.try_int("prole-objects", 0)),
                    comma(counters.try_int("prole_tombstones", 0))
                ),
                "least_available_pct" => ns.stats_attr("available_pct"),
            };
            for (key, value) in ns.stats_attrs(NS_NODE_ATTRS).iter() {
                node_info.insert(key.clone(), value.clone());
            }
            result.insert(address.clone(), node_info);
        }
        result
    }

    /// Secondary indexes of a namespace, from any live node.
    pub fn namespace_index_info(&self, namespace: &str) -> HashMap<String, IndexInfo> {
        match self.random_active_node() {
            Some(node) => node.indexes(namespace),
            None => HashMap::new(),
        }
    }

    /// Aggregated per-set stats for a namespace.
    pub fn namespace_sets_info(&self, namespace: &str) -> Vec<Stats> {
        let inner = self.inner.read();
        inner
            .agg_ns_set_stats
            .get(namespace)
            .map(|sets| sets.values().map(|s| s.get_multi(SET_INFO_ATTRS)).collect())
            .unwrap_or_default()
    }

    /// Storage engine census for a namespace across nodes.
    pub fn namespace_device_info(&self, namespace: &str) -> Stats {
        let mut storage_types: HashMap<String, Vec<String>> = HashMap::new();
        let mut storage_devices: HashMap<String, Vec<String>> = HashMap::new();

        for node in self.nodes() {
            let Some(ns) = node.namespace(namespace) else {
                continue;
            };
            if let Some(Value::Str(kind)) = ns.stats_attr("type") {
                storage_types.entry(kind).or_default().push(node.address());
            }
            if let Some(Value::Str(device)) = ns.stats_attr("storage-engine") {
                storage_devices
                    .entry(device)
                    .or_default()
                    .push(node.address());
            }
        }

        let synced = storage_types.len() <= 1;
        let mut storage = Stats::new();
        for (kind, nodes) in storage_types {
            storage.insert(kind, nodes);
        }
        let mut devices = Stats::new();
        for (device, nodes) in storage_devices {
            devices.insert(device, nodes);
        }
        crate::stats! {
            "cluster_status" => "on",
            "synced" => synced,
            "storage" => storage,
            "devices" => devices,
        }
    }

    /// Cluster jobs snapshot, each tagged with its node's identity.
    pub fn jobs(&self) -> Vec<Stats> {
        self.jobs.clone_inner()
    }

    /// Clone of the datacenter/XDR view.
    pub fn datacenter_info(&self) -> Stats {
        self.datacenter_info.clone_inner()
    }

    /// Alerts after `id`, stamped with this cluster's id.
    pub fn alerts_from(&self, id: i64) -> Vec<Alert> {
        let cid = self.id();
        let mut alerts = self.alerts.alerts_from(id);
        for alert in &mut alerts {
            alert.cluster_id = cid.clone();
        }
        alerts
    }

    /// High-level summary used by the cluster overview endpoint.
    pub fn overview(&self) -> Stats {
        let build_details = self.build_details();
        crate::stats! {
            "cluster_status" => self.status(),
            "cluster_name" => self.alias(),
            "update_interval" => self.update_interval() as i64,
            "nodes" => self.node_list(),
            "off_nodes" => self.off_nodes(),
            "nodes_compatibility" => self.node_compatibility(),
            "build_details" => crate::stats! {
                "latest_build_no" => build_details.latest_build_no,
                "version_list" => {
                    let mut versions = Stats::new();
                    for (build, addrs) in build_details.version_list {
                        versions.insert(build, addrs);
                    }
                    versions
                },
            },
            "namespaces" => self.namespace_list(),
            "memory" => self.memory(),
            "disk" => self.disk(),
            "active_backup" => self.current_backup().map(|b| b.record().status.as_str().to_owned()),
            "active_restore" => self.current_restore().map(|r| r.record().status.as_str().to_owned()),
        }
    }

    // ------------------------------------------------------------------
    // Admin operations (driver pass-throughs)
    // ------------------------------------------------------------------

    /// Change the monitoring user's own password; validates the current
    /// credentials before touching the database.
    pub async fn update_password(
        &self,
        user: &str,
        current_password: &str,
        new_password: &str,
    ) -> ArgusResult<()> {
        if current_password == new_password {
            return Err(ArgusError::validation(
                "New password cannot be same as current password",
            ));
        }
        {
            let inner = self.inner.read();
            if let Some(stored) = &inner.password {
                if current_password != stored {
                    return Err(ArgusError::validation("Invalid current password"));
                }
            }
            if let Some(stored_user) = &inner.user {
                if user != stored_user {
                    return Err(ArgusError::validation("Invalid current user"));
                }
            }
        }
        self.require_client()?
            .change_password(user, new_password)
            .await?;
        self.inner.write().password = Some(new_password.to_owned());
        Ok(())
    }

    pub async fn change_user_password(&self, user: &str, password: &str) -> ArgusResult<()> {
        self.require_client()?.change_password(user, password).await
    }

    pub async fn create_user(
        &self,
        user: &str,
        password: &str,
        roles: &[String],
    ) -> ArgusResult<()> {
        self.require_client()?.create_user(user, password, roles).await
    }

    pub async fn drop_user(&self, user: &str) -> ArgusResult<()> {
        self.require_client()?.drop_user(user).await
    }

    pub async fn grant_roles(&self, user: &str, roles: &[String]) -> ArgusResult<()> {
        self.require_client()?.grant_roles(user, roles).await
    }

    pub async fn revoke_roles(&self, user: &str, roles: &[String]) -> ArgusResult<()> {
        self.require_client()?.revoke_roles(user, roles).await
    }

    pub async fn create_role(&self, role: &str, privileges: &[Privilege]) -> ArgusResult<()> {
        self.require_client()?.create_role(role, privileges).await
    }

    pub async fn drop_role(&self, role: &str) -> ArgusResult<()> {
        self.require_client()?.drop_role(role).await
    }

    pub async fn add_privileges(&self, role: &str, privileges: &[Privilege]) -> ArgusResult<()> {
        self.require_client()?.grant_privileges(role, privileges).await
    }

    pub async fn remove_privileges(&self, role: &str, privileges: &[Privilege]) -> ArgusResult<()> {
        self.require_client()?
            .revoke_privileges(role, privileges)
            .await
    }

    pub async fn create_udf(&self, name: &str, body: &str) -> ArgusResult<()> {
        self.require_client()?
            .register_udf(name, body.as_bytes())
            .await
    }

    pub async fn drop_udf(&self, name: &str) -> ArgusResult<()> {
        self.require_client()?.remove_udf(name).await
    }

    /// List registered UDF modules from any live node.
    pub async fn udf_list(&self) -> ArgusResult<Vec<Stats>> {
        let node = self
            .random_active_node()
            .ok_or_else(|| ArgusError::connection("no live node to query"))?;
        let response = node.request_info(&["udf-list"]).await?;
        Ok(crate::info::parse_entries(
            response.get("udf-list").map(String::as_str).unwrap_or(""),
            ';',
            ',',
        ))
    }

    pub async fn create_index(
        &self,
        namespace: &str,
        set_name: &str,
        index_name: &str,
        bin_name: &str,
        index_type: IndexType,
    ) -> ArgusResult<()> {
        self.require_client()?
            .create_index(namespace, set_name, index_name, bin_name, index_type)
            .await
    }

    pub async fn drop_index(
        &self,
        namespace: &str,
        set_name: &str,
        index_name: &str,
    ) -> ArgusResult<()> {
        self.require_client()?
            .drop_index(namespace, set_name, index_name)
            .await
    }

    /// Issue one info command against every node in parallel. Returns each
    /// node's response (or its error text) plus the joined error string.
    pub async fn request_info_all(
        &self,
        command: &str,
    ) -> (HashMap<String, String>, Option<String>) {
        let nodes = self.nodes();
        let mut handles = Vec::with_capacity(nodes.len());
        for node in nodes {
            let command = command.to_owned();
            handles.push(tokio::spawn(async move {
                let address = node.address();
                match node.request_info(&[command.as_str()]).await {
                    Ok(res) => {
                        let body = res.get(command.as_str()).cloned().unwrap_or_default();
                        (address, body, None)
                    }
                    Err(err) => {
                        let text = err.to_string();
                        (address, text.clone(), Some(text))
                    }
                }
            }));
        }

        let mut responses = HashMap::new();
        let mut errors = Vec::new();
        for handle in handles {
            if let Ok((address, body, err)) = handle.await {
                responses.insert(address, body);
                if let Some(err) = err {
                    errors.push(err);
                }
            }
        }
        let joined = if errors.is_empty() {
            None
        } else {
            Some(errors.join(", "))
        };
        (responses, joined)
    }

    // ------------------------------------------------------------------
    // Backup / restore
    // ------------------------------------------------------------------

    /// Start a backup. Rejected while another backup is in progress; the
    /// record is persisted before execution begins.
    pub async fn start_backup(&self, params: BackupParams) -> ArgusResult<Arc<Backup>> {
        let observer = self.observer()?;
        let job = Backup::new(self.id(), params);
        {
            let mut inner = self.inner.write();
            if let Some(active) = &inner.active_backup {
                if active.status() == TransferStatus::InProgress {
                    return Err(ArgusError::validation(
                        "Another backup operation already exists and is in progress.",
                    ));
                }
            }
            inner.active_backup = Some(Arc::clone(&job));
        }

        if let Err(err) = observer.transfer_store().save(&job.record()).await {
            self.inner.write().active_backup = None;
            return Err(err);
        }

        let executor = observer.transfer_executor();
        let store = observer.transfer_store().clone();
        let running = Arc::clone(&job);
        tokio::spawn(async move {
            match executor.backup(Arc::clone(&running)).await {
                Ok(()) => running.finish(TransferStatus::Ok),
                Err(err) => {
                    error!(backup = %running.id, error = %err, "backup failed");
                    running.finish(TransferStatus::Failed);
                }
            }
            if let Err(err) = store.save(&running.record()).await {
                error!(backup = %running.id, error = %err, "failed to persist backup record");
            }
        });

        Ok(job)
    }

    pub fn current_backup(&self) -> Option<Arc<Backup>> {
        self.inner.read().active_backup.clone()
    }

    /// Start a restore. Same state machine as [`Cluster::start_backup`].
    pub async fn start_restore(&self, params: RestoreParams) -> ArgusResult<Arc<Restore>> {
        let observer = self.observer()?;
        let job = Restore::new(self.id(), params);
        {
            let mut inner = self.inner.write();
            if let Some(active) = &inner.active_restore {
                if active.status() == TransferStatus::InProgress {
                    return Err(ArgusError::validation(
                        "Another restore operation already exists and is in progress.",
                    ));
                }
            }
            inner.active_restore = Some(Arc::clone(&job));
        }

        if let Err(err) = observer.transfer_store().save(&job.record()).await {
            self.inner.write().active_restore = None;
            return Err(err);
        }

        let executor = observer.transfer_executor();
        let store = observer.transfer_store().clone();
        let running = Arc::clone(&job);
        tokio::spawn(async move {
            match executor.restore(Arc::clone(&running)).await {
                Ok(()) => running.finish(TransferStatus::Ok),
                Err(err) => {
                    error!(restore = %running.id, error = %err, "restore failed");
                    running.finish(TransferStatus::Failed);
                }
            }
            if let Err(err) = store.save(&running.record()).await {
                error!(restore = %running.id, error = %err, "failed to persist restore record");
            }
        });

        Ok(job)
    }

    pub fn current_restore(&self) -> Option<Arc<Restore>> {
        self.inner.read().active_restore.clone()
    }

    fn observer(&self) -> ArgusResult<Arc<Observer>> {
        self.observer.upgrade().ok_or_else(|| ArgusError::Internal {
            message: "observer has shut down".into(),
        })
    }

    // ------------------------------------------------------------------
    // Refresh pipeline
    // ------------------------------------------------------------------

    pub(crate) fn should_update(&self) -> bool {
        let inner = self.inner.read();
        match inner.last_update {
            None => true,
            Some(at) => at.elapsed() >= Duration::from_secs(inner.update_interval),
        }
    }

    /// Run one refresh. Serialized per cluster; alert notifications are
    /// kicked off afterwards and never block the next refresh (each delivery
    /// is its own task).
    pub async fn update(&self) -> ArgusResult<()> {
        let _serial = self.update_guard.lock().await;
        let result = self.refresh().await;
        self.send_email_notifications().await;
        result
    }

    async fn refresh(&self) -> ArgusResult<()> {
        if !self.is_set() {
            return Ok(());
        }
        if !self.should_update() {
            return Ok(());
        }

        let started = Instant::now();
        self.update_cluster();
        self.update_stats().await;
        self.update_jobs();
        self.update_users().await;
        self.update_datacenter_info();
        self.check_health();
        debug!(cluster = %self.id, elapsed = ?started.elapsed(), "cluster refresh complete");

        self.inner.write().last_update = Some(Instant::now());
        Ok(())
    }

    /// Reconcile the driver's node list against ours: known nodes get the
    /// fresh handle (the stale one is closed), unknown nodes are registered.
    fn update_cluster(&self) {
        let Some(client) = self.client() else {
            return;
        };
        for handle in client.nodes() {
            let address = handle.host().to_string();
            let existing = self.find_node_by_address(&address).or_else(|| {
                let name = handle.name();
                if name.is_empty() {
                    None
                } else {
                    self.find_node_by_id(&name)
                }
            });
            match existing {
                Some(node) => node.set_handle(handle),
                None => {
                    let host = handle.host();
                    let node = Node::new(
                        host.clone(),
                        Some(handle),
                        Arc::clone(&self.alerts),
                        self.info_timeout,
                        self.series_capacity,
                    );
                    self.inner.write().nodes.insert(host, node);
                }
            }
        }
    }

    /// Fan out node polls, wait for all of them, aggregate synchronously,
    /// then install every aggregate field in one write-lock section.
    async fn update_stats(&self) {
        let nodes = self.nodes();

        let mut handles = Vec::with_capacity(nodes.len());
        for node in &nodes {
            let node = Arc::clone(node);
            handles.push(tokio::spawn(async move { node.update().await }));
        }
        for handle in handles {
            match handle.await {
                Ok(Ok(())) => {}
                // The node already logged and transitioned to off.
                Ok(Err(_)) => {}
                Err(join_err) if join_err.is_panic() => {
                    error!(cluster = %self.id, "node poll panicked: {}", join_err);
                }
                Err(_) => {}
            }
        }

        let mut agg_node_stats = Stats::new();
        let mut agg_node_calc_stats = Stats::new();
        let mut agg_ns_stats: HashMap<String, Stats> = HashMap::new();
        let mut agg_ns_calc_stats: HashMap<String, Stats> = HashMap::new();
        let mut agg_ns_set_stats: HashMap<String, HashMap<String, Stats>> = HashMap::new();

        for node in &nodes {
            node.apply_stats_to_aggregate(&mut agg_node_stats, &mut agg_node_calc_stats);
            node.apply_ns_stats_to_aggregate(&mut agg_ns_stats, &mut agg_ns_calc_stats);
            node.apply_ns_set_stats_to_aggregate(&mut agg_ns_set_stats);
        }

        let mut agg_total_ns_stats = Stats::new();
        for stats in agg_ns_stats.values() {
            agg_total_ns_stats.aggregate(stats);
        }

        let mut inner = self.inner.write();
        inner.agg_node_stats = agg_node_stats;
        inner.agg_node_calc_stats = agg_node_calc_stats;
        inner.agg_ns_stats = agg_ns_stats;
        inner.agg_ns_calc_stats = agg_ns_calc_stats;
        inner.agg_total_ns_stats = agg_total_ns_stats;
        inner.agg_ns_set_stats = agg_ns_set_stats;
    }

    fn update_jobs(&self) {
        let mut jobs = Vec::new();
        for node in self.nodes() {
            let tag = crate::stats! {
                "address" => node.address(),
                "node_status" => node.status().as_str(),
                "build" => node.build(),
                "memory" => node.memory(),
            };
            for mut job in node.jobs() {
                job.insert("node", tag.clone());
                jobs.push(job);
            }
        }
        self.jobs.store(jobs);
    }

    async fn update_users(&self) {
        let Some(client) = self.client() else {
            return;
        };

        let current_user = self.user();
        let mut privileges = None;
        if let Some(user) = current_user.filter(|u| !u.is_empty()) {
            match client.query_user(&user).await {
                Ok(user_roles) => {
                    let mut collected = Vec::new();
                    for role_name in &user_roles.roles {
                        match client.query_role(role_name).await {
                            Ok(role) => {
                                collected.extend(role.privileges.into_iter().map(|p| p.code))
                            }
                            Err(_) => continue,
                        }
                    }
                    privileges = Some(collected);
                }
                Err(err) => {
                    debug!(cluster = %self.id, error = %err, "current user query failed");
                    return;
                }
            }
        }

        let users = client.query_users().await.unwrap_or_default();
        let roles = client.query_roles().await.unwrap_or_default();

        let mut inner = self.inner.write();
        if let Some(privileges) = privileges {
            inner.current_user_privileges = privileges;
        }
        inner.users = users;
        inner.roles = roles;
    }

    fn update_datacenter_info(&self) {
        let info = self.compute_datacenter_info();
        self.datacenter_info.store(info);
    }

    /// Build the XDR topology view. Remote nodes already monitored by some
    /// cluster fold under that cluster's id with a unioned shipping-namespace
    /// set; unmonitored remotes get a synthetic `off` entry.
    fn compute_datacenter_info(&self) -> Stats {
        let observer = self.observer.upgrade();
        let mut xdr_info: HashMap<String, Stats> = HashMap::new();
        let mut datacenter_list = Vec::new();
        let mut node_stats = Stats::new();
        let mut remotes = Stats::new();

        for node in self.nodes() {
            for (dc_name, dc) in node.datacenters() {
                datacenter_list.push(dc_name);
                for remote in &dc.nodes {
                    let monitored = observer
                        .as_ref()
                        .and_then(|o| o.node_has_been_discovered(remote));
                    match monitored {
                        Some(cluster) => {
                            let entry = xdr_info.entry(cluster.id()).or_default();
                            let mut shipping: Vec<String> = match entry.get("shipping_namespaces") {
                                Some(Value::List(list)) => list
                                    .iter()
                                    .filter_map(|v| v.as_str().map(str::to_owned))
                                    .collect(),
                                _ => Vec::new(),
                            };
                            shipping.extend(dc.namespaces.clone());
                            entry.insert("shipping_namespaces", sorted_unique(shipping));
                        }
                        None => {
                            if let Some(blob) = self.discover_datacenter(&dc) {
                                remotes.insert(remote.clone(), blob);
                            }
                            xdr_info.entry(remote.clone()).or_insert_with(|| {
                                crate::stats! {"shipping_namespaces" => dc.namespaces.clone()}
                            });
                        }
                    }
                }
            }

            node_stats.insert(
                node.id(),
                crate::stats! {
                    "status" => node.status().as_str(),
                    "access_ip" => node.host(),
                    "access_port" => node.port() as i64,
                    "ip" => node.host(),
                    "port" => node.port() as i64,
                    "cur_throughput" => 0i64,
                    "xdr_uptime" => node.stats_attr("xdr_uptime"),
                    "lag" => node.stats_attr("xdr_timelag"),
                },
            );
        }

        let mut read_total = 0.0;
        let mut read_success = 0.0;
        let mut write_total = 0.0;
        let mut write_success = 0.0;
        for (metric, per_node) in self.latest_throughput() {
            let sum: f64 = per_node.values().map(|p| p.value).sum();
            match metric.as_str() {
                "stat_read_reqs" => read_total += sum,
                "stat_read_success" => read_success += sum,
                "stat_write_reqs" => write_total += sum,
                "stat_write_success" => write_success += sum,
                _ => {}
            }
        }

        let mut xdr = Stats::new();
        for (key, value) in xdr_info {
            xdr.insert(key, value);
        }

        crate::stats! {
            "seednode" => self.seed_address(),
            "dc_name" => sorted_unique(datacenter_list),
            "xdr_info" => xdr,
            "cluster_name" => self.alias(),
            "namespaces" => self.namespace_list(),
            "discovery" => "complete",
            "nodes" => node_stats,
            "read_tps" => crate::stats! {"total" => read_total, "success" => read_success},
            "write_tps" => crate::stats! {"total" => write_total, "success" => write_success},
            "_remotes" => remotes,
        }
    }

    /// Synthetic view for a datacenter whose nodes are not monitored here.
    fn discover_datacenter(&self, dc: &Datacenter) -> Option<Stats> {
        let observer = self.observer.upgrade()?;
        for remote in &dc.nodes {
            if observer.node_has_been_discovered(remote).is_none() {
                let addr: HostAddr = remote.parse().ok()?;
                return Some(crate::stats! {
                    "dc_name" => vec![dc.name.clone()],
                    "discovery" => "secured",
                    "seednode" => remote.clone(),
                    "xdr_info" => Stats::new(),
                    "cluster_name" => Value::Null,
                    "namespaces" => Vec::<String>::new(),
                    "nodes" => crate::stats! {
                        remote.clone() => crate::stats! {
                            "status" => "off",
                            "access_ip" => addr.host.clone(),
                            "cur_throughput" => Value::Null,
                            "ip" => addr.host.clone(),
                            "access_port" => addr.port as i64,
                            "xdr_uptime" => Value::Null,
                            "port" => addr.port as i64,
                            "lag" => Value::Null,
                        },
                    },
                    "read_tps" => crate::stats! {"total" => 0.0, "success" => 0.0},
                    "write_tps" => crate::stats! {"total" => 0.0, "success" => 0.0},
                });
            }
        }
        None
    }

    /// Cluster-level health: alert when the set of live nodes drains to zero
    /// or recovers. Node-level transitions raise their own alerts.
    fn check_health(&self) {
        let live = self.nodes().iter().any(|n| n.is_on());
        let transition = {
            let mut inner = self.inner.write();
            let prev = inner.prev_live;
            inner.prev_live = Some(live);
            match prev {
                Some(prev) if prev != live => Some(live),
                _ => None,
            }
        };
        match transition {
            Some(true) => {
                self.alerts.raise(
                    &self.seed_address(),
                    AlertStatus::Green,
                    "Cluster is reachable again",
                );
            }
            Some(false) => {
                self.alerts.raise(
                    &self.seed_address(),
                    AlertStatus::Red,
                    "Cluster is down: no nodes reachable",
                );
            }
            None => {}
        }
    }

    /// Drain newly recorded alerts and hand each to the mailer in its own
    /// task. Never blocks the refresh path.
    pub async fn send_email_notifications(&self) {
        let cid = self.id();
        let mut fresh = self.alerts.drain_new();
        for alert in &mut fresh {
            alert.cluster_id = cid.clone();
        }
        if fresh.is_empty() {
            return;
        }

        let Some(observer) = self.observer.upgrade() else {
            return;
        };
        let mailer = observer.mailer();
        if !mailer.is_configured() {
            return;
        }

        let cluster_name = self.alias().unwrap_or(cid);
        for alert in fresh {
            let mailer = Arc::clone(&mailer);
            let cluster_name = cluster_name.clone();
            tokio::spawn(async move {
                if let Err(err) = mailer.send_alert(&cluster_name, &alert).await {
                    warn!(error = %err, "giving up on alert notification");
                }
            });
        }
    }
}

/// Compare two dotted build strings segment-wise. Numeric segments compare
/// numerically, anything else lexically; missing segments count as zero.
pub(crate) fn compare_versions(a: &str, b: &str) -> std::cmp::Ordering {
    use std::cmp::Ordering;

    let left: Vec<&str> = a.split('.').collect();
    let right: Vec<&str> = b.split('.').collect();
    for i in 0..left.len().max(right.len()) {
        let ls = left.get(i).copied().unwrap_or("0");
        let rs = right.get(i).copied().unwrap_or("0");
        let ordering = match (ls.parse::<u64>(), rs.parse::<u64>()) {
            (Ok(l), Ok(r)) => l.cmp(&r),
            _ => ls.cmp(rs),
        };
        if ordering != Ordering::Equal {
            return ordering;
        }
    }
    Ordering::Equal
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::cmp::Ordering;

    #[test]
    fn version_comparison() {
        assert_eq!(compare_versions("4.5.1", "4.5.1"), Ordering::Equal);
        assert_eq!(compare_versions("4.6.0", "4.5.1"), Ordering::Greater);
        assert_eq!(compare_versions("4.5.1", "4.6.0"), Ordering::Less);
        assert_eq!(compare_versions("4.5.1.2", "4.5.1"), Ordering::Greater);
        assert_eq!(compare_versions("4.10.0", "4.9.0"), Ordering::Greater);
        assert_eq!(compare_versions("", "1.0"), Ordering::Less);
    }

    #[test]
    fn permanent_id_is_sorted_and_stable() {
        let a = vec![HostAddr::new("10.0.0.2", 3000), HostAddr::new("10.0.0.1", 3000)];
        let b = vec![HostAddr::new("10.0.0.1", 3000), HostAddr::new("10.0.0.2", 3000)];
        assert_eq!(permanent_id(&a), permanent_id(&b));
        assert_eq!(permanent_id(&a), "10.0.0.1:3000,10.0.0.2:3000");
    }
}
