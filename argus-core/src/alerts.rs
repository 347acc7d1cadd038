//! Alert recording.
//!
//! Every cluster owns one [`AlertBucket`]: a bounded ring of the most recent
//! alerts with monotonically increasing ids. Two readers exist: the mail
//! notifier drains "new since last drain" through a cursor, and the HTTP
//! layer reads "everything after id N" without disturbing that cursor.

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use serde::Serialize;

/// Severity label carried on every alert.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum AlertStatus {
    Green,
    Yellow,
    Red,
}

impl AlertStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            AlertStatus::Green => "green",
            AlertStatus::Yellow => "yellow",
            AlertStatus::Red => "red",
        }
    }
}

/// An observed state transition. Immutable once recorded; `cluster_id` is
/// stamped when the alert is surfaced through its cluster.
#[derive(Debug, Clone, Serialize)]
pub struct Alert {
    pub id: i64,
    pub at: DateTime<Utc>,
    pub cluster_id: String,
    pub node_address: String,
    pub status: AlertStatus,
    pub desc: String,
}

#[derive(Debug)]
struct BucketInner {
    alerts: std::collections::VecDeque<Alert>,
    next_id: i64,
    drained_through: i64,
}

/// Bounded FIFO of recent alerts with monotonic ids and a drain cursor.
#[derive(Debug)]
pub struct AlertBucket {
    capacity: usize,
    inner: Mutex<BucketInner>,
}

impl AlertBucket {
    pub fn new(capacity: usize) -> Self {
        AlertBucket {
            capacity: capacity.max(1),
            inner: Mutex::new(BucketInner {
                alerts: std::collections::VecDeque::with_capacity(capacity.max(1)),
                next_id: 0,
                drained_through: 0,
            }),
        }
    }

    /// Record an alert, assigning it the next id. Returns the assigned id.
    pub fn raise(&self, node_address: &str, status: AlertStatus, desc: impl Into<String>) -> i64 {
        let mut inner = self.inner.lock();
        inner.next_id += 1;
        let id = inner.next_id;
        if inner.alerts.len() == self.capacity {
            inner.alerts.pop_front();
        }
        inner.alerts.push_back(Alert {
            id,
            at: Utc::now(),
            cluster_id: String::new(),
            node_address: node_address.to_owned(),
            status,
            desc: desc.into(),
        });
        id
    }

    /// Alerts recorded since the previous drain; advances the cursor.
    pub fn drain_new(&self) -> Vec<Alert> {
        let mut inner = self.inner.lock();
        let cursor = inner.drained_through;
        let fresh: Vec<Alert> = inner
            .alerts
            .iter()
            .filter(|a| a.id > cursor)
            .cloned()
            .collect();
        if let Some(last) = fresh.last() {
            inner.drained_through = last.id;
        }
        fresh
    }

    /// Alerts with id strictly greater than `id`. Does not move the drain
    /// cursor.
    pub fn alerts_from(&self, id: i64) -> Vec<Alert> {
        let inner = self.inner.lock();
        inner
            .alerts
            .iter()
            .filter(|a| a.id > id)
            .cloned()
            .collect()
    }

    /// Highest id handed out so far.
    pub fn last_id(&self) -> i64 {
        self.inner.lock().next_id
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ids_are_monotonic() {
        let bucket = AlertBucket::new(10);
        let a = bucket.raise("10.0.0.1:3000", AlertStatus::Red, "node down");
        let b = bucket.raise("10.0.0.1:3000", AlertStatus::Green, "node up");
        assert!(b > a);
        assert_eq!(bucket.last_id(), b);
    }

    #[test]
    fn drain_is_monotonic() {
        let bucket = AlertBucket::new(10);
        bucket.raise("n1", AlertStatus::Red, "down");
        bucket.raise("n2", AlertStatus::Red, "down");

        let first = bucket.drain_new();
        assert_eq!(first.len(), 2);

        // Nothing new in between: the second drain is empty.
        assert!(bucket.drain_new().is_empty());

        bucket.raise("n1", AlertStatus::Green, "up");
        let third = bucket.drain_new();
        assert_eq!(third.len(), 1);
        assert_eq!(third[0].node_address, "n1");
    }

    #[test]
    fn capacity_evicts_oldest() {
        let bucket = AlertBucket::new(3);
        for i in 0..5 {
            bucket.raise("n", AlertStatus::Yellow, format!("alert {}", i));
        }
        let all = bucket.alerts_from(0);
        assert_eq!(all.len(), 3);
        assert_eq!(all[0].id, 3);
        assert_eq!(all[2].id, 5);
    }

    #[test]
    fn alerts_from_does_not_move_cursor() {
        let bucket = AlertBucket::new(10);
        bucket.raise("n", AlertStatus::Red, "down");
        assert_eq!(bucket.alerts_from(0).len(), 1);
        assert_eq!(bucket.drain_new().len(), 1);
    }
}
