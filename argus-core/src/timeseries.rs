//! Bounded time-series windows for throughput and latency samples.
//!
//! Each node keeps one [`TimeSeries`] per metric. The window is a fixed-size
//! ring: appending past capacity drops the oldest point, and timestamps are
//! monotonically non-decreasing by construction (out-of-order points are
//! rejected).

use std::collections::VecDeque;

use serde::Serialize;

/// One sample: unix timestamp in seconds and a value.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct Point {
    #[serde(rename = "x")]
    pub timestamp: i64,
    #[serde(rename = "y")]
    pub value: f64,
}

impl Point {
    pub fn new(timestamp: i64, value: f64) -> Self {
        Point { timestamp, value }
    }
}

/// Fixed-capacity ring of [`Point`]s ordered by timestamp.
#[derive(Debug, Clone)]
pub struct TimeSeries {
    capacity: usize,
    points: VecDeque<Point>,
}

impl TimeSeries {
    pub fn new(capacity: usize) -> Self {
        TimeSeries {
            capacity: capacity.max(1),
            points: VecDeque::with_capacity(capacity.max(1)),
        }
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn len(&self) -> usize {
        self.points.len()
    }

    pub fn is_empty(&self) -> bool {
        self.points.is_empty()
    }

    /// Append a point. Points older than the newest stored point are dropped;
    /// when the ring is full the oldest point is evicted first.
    pub fn push(&mut self, point: Point) {
        if let Some(last) = self.points.back() {
            if point.timestamp < last.timestamp {
                return;
            }
        }
        if self.points.len() == self.capacity {
            self.points.pop_front();
        }
        self.points.push_back(point);
    }

    /// The most recent point, if any.
    pub fn latest(&self) -> Option<Point> {
        self.points.back().copied()
    }

    /// All points with a timestamp strictly after `since`.
    pub fn since(&self, since: i64) -> Vec<Point> {
        let start = self.points.partition_point(|p| p.timestamp <= since);
        self.points.iter().skip(start).copied().collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ring_drops_oldest_when_full() {
        let mut ts = TimeSeries::new(3);
        for i in 0..5 {
            ts.push(Point::new(i, i as f64));
        }
        assert_eq!(ts.len(), 3);
        assert_eq!(ts.since(-1).first().map(|p| p.timestamp), Some(2));
        assert_eq!(ts.latest().map(|p| p.timestamp), Some(4));
    }

    #[test]
    fn out_of_order_points_are_rejected() {
        let mut ts = TimeSeries::new(10);
        ts.push(Point::new(100, 1.0));
        ts.push(Point::new(90, 2.0));
        ts.push(Point::new(100, 3.0));
        assert_eq!(ts.len(), 2);
        assert_eq!(ts.latest().map(|p| p.value), Some(3.0));
    }

    #[test]
    fn since_is_strictly_after() {
        let mut ts = TimeSeries::new(10);
        ts.push(Point::new(10, 1.0));
        ts.push(Point::new(20, 2.0));
        ts.push(Point::new(30, 3.0));

        let tail = ts.since(20);
        assert_eq!(tail.len(), 1);
        assert_eq!(tail[0].timestamp, 30);
        assert!(ts.since(30).is_empty());
        assert_eq!(ts.since(0).len(), 3);
    }
}
