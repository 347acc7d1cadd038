//! Per-namespace snapshot held by each node.

use std::collections::HashMap;

use serde::Serialize;

use crate::stats::Stats;

/// One secondary index as reported by the `sindex` info command.
#[derive(Debug, Clone, Serialize)]
pub struct IndexInfo {
    pub name: String,
    pub namespace: String,
    pub set_name: String,
    pub bin: String,
    pub index_type: String,
    pub sync_state: String,
}

impl IndexInfo {
    /// Build from one parsed `sindex` entry; returns `None` when the entry
    /// lacks an index name.
    pub fn from_entry(entry: &Stats) -> Option<IndexInfo> {
        let name = entry.try_string("indexname", "");
        if name.is_empty() {
            return None;
        }
        Some(IndexInfo {
            name,
            namespace: entry.try_string("ns", ""),
            set_name: entry.try_string("set", ""),
            bin: entry.try_string("bin", ""),
            index_type: entry.try_string("type", ""),
            sync_state: entry.try_string("sync_state", entry.try_string("state", "").as_str()),
        })
    }
}

/// A node's view of one namespace: raw stats, derived calc stats, per-set
/// stats, and secondary indexes.
#[derive(Debug, Clone, Default)]
pub struct Namespace {
    pub name: String,
    pub stats: Stats,
    pub calc_stats: Stats,
    /// Set name -> set stats.
    pub sets: HashMap<String, Stats>,
    /// Index name -> index details.
    pub indexes: HashMap<String, IndexInfo>,
}

impl Namespace {
    pub fn new(name: impl Into<String>, stats: Stats) -> Self {
        let calc_stats = derive_calc_stats(&stats);
        Namespace {
            name: name.into(),
            stats,
            calc_stats,
            sets: HashMap::new(),
            indexes: HashMap::new(),
        }
    }

    pub fn stats_attr(&self, key: &str) -> Option<crate::stats::Value> {
        self.stats.get(key).cloned()
    }

    pub fn stats_attrs(&self, keys: &[&str]) -> Stats {
        self.stats.get_multi(keys)
    }

    /// Disk usage rollup for this namespace on this node.
    pub fn disk(&self) -> Stats {
        crate::stats! {
            "used" => self.calc_stats.try_int("used-bytes-disk", 0),
            "free" => self.calc_stats.try_int("free-bytes-disk", 0),
        }
    }

    pub fn disk_percent(&self) -> f64 {
        used_percent(
            self.calc_stats.try_int("used-bytes-disk", 0),
            self.calc_stats.try_int("free-bytes-disk", 0),
        )
    }

    /// Memory usage rollup for this namespace on this node.
    pub fn memory(&self) -> Stats {
        crate::stats! {
            "used" => self.calc_stats.try_int("used-bytes-memory", 0),
            "free" => self.calc_stats.try_int("free-bytes-memory", 0),
        }
    }

    pub fn memory_percent(&self) -> f64 {
        used_percent(
            self.calc_stats.try_int("used-bytes-memory", 0),
            self.calc_stats.try_int("free-bytes-memory", 0),
        )
    }
}

fn used_percent(used: i64, free: i64) -> f64 {
    let total = used + free;
    if total <= 0 {
        return 0.0;
    }
    (used as f64 / total as f64) * 100.0
}

/// Derive the canonical byte-usage stats for a namespace. Older servers
/// report `used-bytes-disk`/`free-bytes-disk` directly; newer ones report
/// `device_used_bytes`/`device_available_pct` and memory equivalents.
pub fn derive_calc_stats(stats: &Stats) -> Stats {
    let mut calc = Stats::new();

    let used_disk = if stats.contains_key("used-bytes-disk") {
        stats.try_int("used-bytes-disk", 0)
    } else {
        stats.try_int("device_used_bytes", 0)
    };
    let free_disk = if stats.contains_key("free-bytes-disk") {
        stats.try_int("free-bytes-disk", 0)
    } else {
        let total = stats.try_int("device_total_bytes", 0);
        (total - used_disk).max(0)
    };

    let used_memory = if stats.contains_key("used-bytes-memory") {
        stats.try_int("used-bytes-memory", 0)
    } else {
        stats.try_int("memory_used_bytes", 0)
    };
    let free_memory = if stats.contains_key("free-bytes-memory") {
        stats.try_int("free-bytes-memory", 0)
    } else {
        let total = stats.try_int("memory-size", 0);
        (total - used_memory).max(0)
    };

    calc.insert("used-bytes-disk", used_disk);
    calc.insert("free-bytes-disk", free_disk);
    calc.insert("used-bytes-memory", used_memory);
    calc.insert("free-bytes-memory", free_memory);
    calc
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::info::parse_fields;

    #[test]
    fn calc_stats_prefer_legacy_names() {
        let ns = Namespace::new(
            "test",
            parse_fields("used-bytes-disk=100;free-bytes-disk=900;used-bytes-memory=10;free-bytes-memory=90"),
        );
        assert_eq!(ns.disk().try_int("used", 0), 100);
        assert_eq!(ns.disk().try_int("free", 0), 900);
        assert!((ns.disk_percent() - 10.0).abs() < 1e-9);
        assert!((ns.memory_percent() - 10.0).abs() < 1e-9);
    }

    #[test]
    fn calc_stats_fall_back_to_device_names() {
        let ns = Namespace::new(
            "test",
            parse_fields("device_used_bytes=250;device_total_bytes=1000;memory_used_bytes=5;memory-size=50"),
        );
        assert_eq!(ns.disk().try_int("used", 0), 250);
        assert_eq!(ns.disk().try_int("free", 0), 750);
        assert_eq!(ns.memory().try_int("free", 0), 45);
    }

    #[test]
    fn index_info_from_sindex_entry() {
        let entries = crate::info::parse_entries(
            "ns=test:indexname=idx_age:set=people:bin=age:type=NUMERIC:sync_state=synced",
            ';',
            ':',
        );
        let idx = IndexInfo::from_entry(&entries[0]).unwrap();
        assert_eq!(idx.name, "idx_age");
        assert_eq!(idx.namespace, "test");
        assert_eq!(idx.index_type, "NUMERIC");
        assert_eq!(idx.sync_state, "synced");
    }
}
