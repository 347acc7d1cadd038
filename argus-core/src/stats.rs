//! Dynamic stats containers.
//!
//! Database nodes report everything as string key/value blocks; after parsing
//! the values land in a [`Stats`] map of tagged [`Value`]s. Typed accessors
//! (`try_int`, `try_float`, ...) replace the untyped casts a dynamic map
//! would force on callers, and [`Stats::aggregate`] implements the key-wise
//! numeric sum used for cluster- and namespace-level rollups.

use std::collections::HashMap;
use std::sync::Arc;

use parking_lot::RwLock;
use serde::{Deserialize, Serialize};

/// Keys that must never be summed when aggregating stats across nodes.
/// These are identities or labels; the first observed value wins.
const NON_SUMMABLE_KEYS: &[&str] = &[
    "type",
    "storage-engine",
    "ns",
    "ns_name",
    "set",
    "set_name",
    "node_status",
    "cluster_status",
    "node-id",
    "build",
];

/// A single stats value: integer, float, string, list, or nested map.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Value {
    Int(i64),
    Float(f64),
    Bool(bool),
    Str(String),
    List(Vec<Value>),
    Map(Stats),
    Null,
}

impl Value {
    /// Numeric view of the value; numeric strings parse, everything else is
    /// `None`.
    pub fn as_f64(&self) -> Option<f64> {
        match self {
            Value::Int(v) => Some(*v as f64),
            Value::Float(v) => Some(*v),
            Value::Str(s) => s.parse::<f64>().ok(),
            _ => None,
        }
    }

    /// Integer view; floats truncate, numeric strings parse.
    pub fn as_i64(&self) -> Option<i64> {
        match self {
            Value::Int(v) => Some(*v),
            Value::Float(v) => Some(*v as i64),
            Value::Str(s) => s
                .parse::<i64>()
                .ok()
                .or_else(|| s.parse::<f64>().ok().map(|f| f as i64)),
            _ => None,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            Value::Str(s) => Some(s),
            _ => None,
        }
    }
}

impl From<i64> for Value {
    fn from(v: i64) -> Self {
        Value::Int(v)
    }
}

impl From<u64> for Value {
    fn from(v: u64) -> Self {
        Value::Int(v as i64)
    }
}

impl From<usize> for Value {
    fn from(v: usize) -> Self {
        Value::Int(v as i64)
    }
}

impl From<f64> for Value {
    fn from(v: f64) -> Self {
        Value::Float(v)
    }
}

impl From<bool> for Value {
    fn from(v: bool) -> Self {
        Value::Bool(v)
    }
}

impl From<&str> for Value {
    fn from(v: &str) -> Self {
        Value::Str(v.to_owned())
    }
}

impl From<String> for Value {
    fn from(v: String) -> Self {
        Value::Str(v)
    }
}

impl From<Vec<String>> for Value {
    fn from(v: Vec<String>) -> Self {
        Value::List(v.into_iter().map(Value::Str).collect())
    }
}

impl From<Vec<Value>> for Value {
    fn from(v: Vec<Value>) -> Self {
        Value::List(v)
    }
}

impl From<Stats> for Value {
    fn from(v: Stats) -> Self {
        Value::Map(v)
    }
}

impl<T: Into<Value>> From<Option<T>> for Value {
    fn from(v: Option<T>) -> Self {
        match v {
            Some(inner) => inner.into(),
            None => Value::Null,
        }
    }
}

/// A string-keyed map of [`Value`]s with typed accessors and aggregation.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Stats(HashMap<String, Value>);

impl Stats {
    pub fn new() -> Self {
        Stats::default()
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn get(&self, key: &str) -> Option<&Value> {
        self.0.get(key)
    }

    pub fn contains_key(&self, key: &str) -> bool {
        self.0.contains_key(key)
    }

    pub fn insert(&mut self, key: impl Into<String>, value: impl Into<Value>) {
        self.0.insert(key.into(), value.into());
    }

    pub fn remove(&mut self, key: &str) -> Option<Value> {
        self.0.remove(key)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&String, &Value)> {
        self.0.iter()
    }

    pub fn keys(&self) -> impl Iterator<Item = &String> {
        self.0.keys()
    }

    /// Integer accessor with default; numeric strings parse.
    pub fn try_int(&self, key: &str, default: i64) -> i64 {
        self.0.get(key).and_then(Value::as_i64).unwrap_or(default)
    }

    /// Float accessor with default; numeric strings parse.
    pub fn try_float(&self, key: &str, default: f64) -> f64 {
        self.0.get(key).and_then(Value::as_f64).unwrap_or(default)
    }

    /// String accessor with default.
    pub fn try_string(&self, key: &str, default: &str) -> String {
        match self.0.get(key) {
            Some(Value::Str(s)) => s.clone(),
            Some(Value::Int(v)) => v.to_string(),
            Some(Value::Float(v)) => v.to_string(),
            Some(Value::Bool(v)) => v.to_string(),
            _ => default.to_owned(),
        }
    }

    /// Subset copy of the listed keys (missing keys are skipped).
    pub fn get_multi(&self, keys: &[&str]) -> Stats {
        let mut out = Stats::new();
        for key in keys {
            if let Some(v) = self.0.get(*key) {
                out.insert(*key, v.clone());
            }
        }
        out
    }

    /// Key-wise numeric aggregation of `other` into `self`.
    ///
    /// Numbers (including numeric strings) are summed; two integers stay an
    /// integer. Keys in [`NON_SUMMABLE_KEYS`] and non-numeric values keep the
    /// first observed value.
    pub fn aggregate(&mut self, other: &Stats) {
        for (key, value) in other.iter() {
            if NON_SUMMABLE_KEYS.contains(&key.as_str()) {
                self.0.entry(key.clone()).or_insert_with(|| value.clone());
                continue;
            }

            match self.0.get_mut(key) {
                None => {
                    self.0.insert(key.clone(), value.clone());
                }
                Some(existing) => {
                    let summed = match (&*existing, value) {
                        (Value::Int(a), Value::Int(b)) => Some(Value::Int(a + b)),
                        _ => match (existing.as_f64(), value.as_f64()) {
                            (Some(a), Some(b)) => Some(Value::Float(a + b)),
                            _ => None,
                        },
                    };
                    if let Some(sum) = summed {
                        *existing = sum;
                    }
                }
            }
        }
    }
}

impl FromIterator<(String, Value)> for Stats {
    fn from_iter<T: IntoIterator<Item = (String, Value)>>(iter: T) -> Self {
        Stats(iter.into_iter().collect())
    }
}

impl IntoIterator for Stats {
    type Item = (String, Value);
    type IntoIter = std::collections::hash_map::IntoIter<String, Value>;

    fn into_iter(self) -> Self::IntoIter {
        self.0.into_iter()
    }
}

/// Convenience constructor used all over the aggregation code:
/// `stats!{"used" => 12, "free" => 34}`.
#[macro_export]
macro_rules! stats {
    ($($key:expr => $value:expr),* $(,)?) => {{
        #[allow(unused_mut)]
        let mut s = $crate::stats::Stats::new();
        $( s.insert($key, $value); )*
        s
    }};
}

/// A snapshot cell: written whole-object by the refresh, read as clones by
/// HTTP handlers. Keeps hot read paths off the owner's main lock.
#[derive(Debug)]
pub struct SyncCell<T> {
    inner: RwLock<Arc<T>>,
}

impl<T: Default> Default for SyncCell<T> {
    fn default() -> Self {
        SyncCell {
            inner: RwLock::new(Arc::new(T::default())),
        }
    }
}

impl<T> SyncCell<T> {
    pub fn new(value: T) -> Self {
        SyncCell {
            inner: RwLock::new(Arc::new(value)),
        }
    }

    /// Replace the stored snapshot.
    pub fn store(&self, value: T) {
        *self.inner.write() = Arc::new(value);
    }

    /// Cheap handle to the current snapshot.
    pub fn load(&self) -> Arc<T> {
        self.inner.read().clone()
    }
}

impl<T: Clone> SyncCell<T> {
    /// Owned copy of the current snapshot.
    pub fn clone_inner(&self) -> T {
        (*self.load()).clone()
    }
}

/// Synchronized stats snapshot, read by cloning.
pub type SyncStats = SyncCell<Stats>;

/// Format an integer with thousands separators (`1234567` -> `1,234,567`).
pub fn comma(value: i64) -> String {
    let negative = value < 0;
    let digits = value.unsigned_abs().to_string();
    let mut out = String::with_capacity(digits.len() + digits.len() / 3 + 1);
    let offset = digits.len() % 3;
    for (i, ch) in digits.chars().enumerate() {
        if i != 0 && (i + 3 - offset) % 3 == 0 {
            out.push(',');
        }
        out.push(ch);
    }
    if negative {
        format!("-{}", out)
    } else {
        out
    }
}

/// Sorted, deduplicated copy of a string list.
pub fn sorted_unique(mut values: Vec<String>) -> Vec<String> {
    values.sort();
    values.dedup();
    values
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn typed_accessors_parse_strings() {
        let s = stats! {
            "objects" => "1234",
            "available_pct" => "82.5",
            "build" => "4.5.1",
        };
        assert_eq!(s.try_int("objects", 0), 1234);
        assert_eq!(s.try_float("available_pct", 0.0), 82.5);
        assert_eq!(s.try_int("missing", -1), -1);
        assert_eq!(s.try_string("build", ""), "4.5.1");
    }

    #[test]
    fn aggregate_sums_numbers_keywise() {
        let mut total = stats! {"objects" => 10i64, "used-bytes-disk" => "100"};
        total.aggregate(&stats! {"objects" => 5i64, "used-bytes-disk" => "100", "extra" => 7i64});

        assert_eq!(total.try_int("objects", 0), 15);
        assert_eq!(total.try_int("used-bytes-disk", 0), 200);
        assert_eq!(total.try_int("extra", 0), 7);
    }

    #[test]
    fn aggregate_keeps_first_for_non_summable() {
        let mut total = stats! {"type" => "device", "objects" => 1i64};
        total.aggregate(&stats! {"type" => "memory", "objects" => 2i64});
        assert_eq!(total.try_string("type", ""), "device");
        assert_eq!(total.try_int("objects", 0), 3);
    }

    #[test]
    fn aggregate_keeps_first_non_numeric() {
        let mut total = stats! {"mode" => "strong"};
        total.aggregate(&stats! {"mode" => "weak"});
        assert_eq!(total.try_string("mode", ""), "strong");
    }

    #[test]
    fn get_multi_skips_missing() {
        let s = stats! {"a" => 1i64, "b" => 2i64};
        let subset = s.get_multi(&["a", "c"]);
        assert_eq!(subset.len(), 1);
        assert_eq!(subset.try_int("a", 0), 1);
    }

    #[test]
    fn sync_cell_round_trip() {
        let cell = SyncStats::default();
        cell.store(stats! {"x" => 1i64});
        let snapshot = cell.clone_inner();
        assert_eq!(snapshot.try_int("x", 0), 1);

        cell.store(stats! {"x" => 2i64});
        // The old snapshot is unaffected by the new store.
        assert_eq!(snapshot.try_int("x", 0), 1);
        assert_eq!(cell.clone_inner().try_int("x", 0), 2);
    }

    #[test]
    fn comma_formatting() {
        assert_eq!(comma(0), "0");
        assert_eq!(comma(999), "999");
        assert_eq!(comma(1000), "1,000");
        assert_eq!(comma(1234567), "1,234,567");
        assert_eq!(comma(-9876543), "-9,876,543");
    }
}
