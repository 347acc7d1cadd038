//! Parsers for the textual info protocol.
//!
//! Nodes answer info commands with semicolon-delimited text in a handful of
//! shapes: flat `key=value` blocks (statistics, configs), plain lists
//! (namespaces), entry lists with colon-separated fields (sets, secondary
//! indexes, jobs), datacenter descriptors, and the latency histogram table.
//! Everything here is pure string -> [`Stats`] conversion; network I/O lives
//! in the driver.

use std::collections::HashMap;

use crate::stats::{Stats, Value};

/// Parse a scalar the way stats blocks encode them: integer, then float,
/// then boolean, falling back to the raw string.
pub fn parse_value(raw: &str) -> Value {
    if let Ok(v) = raw.parse::<i64>() {
        return Value::Int(v);
    }
    if let Ok(v) = raw.parse::<f64>() {
        return Value::Float(v);
    }
    match raw {
        "true" => Value::Bool(true),
        "false" => Value::Bool(false),
        _ => Value::Str(raw.to_owned()),
    }
}

/// Parse a flat `key=value;key=value` block (statistics, get-config).
pub fn parse_fields(raw: &str) -> Stats {
    let mut out = Stats::new();
    for pair in raw.split(';') {
        let pair = pair.trim();
        if pair.is_empty() {
            continue;
        }
        if let Some((key, value)) = pair.split_once('=') {
            out.insert(key.trim(), parse_value(value.trim()));
        }
    }
    out
}

/// Parse a semicolon-separated list (namespaces).
pub fn parse_list(raw: &str) -> Vec<String> {
    raw.split(';')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(str::to_owned)
        .collect()
}

/// Parse an entry list: entries split by `entry_sep`, fields inside an entry
/// split by `field_sep`, each field a `key=value` pair. Used for sets
/// (`;` / `:`), secondary indexes (`;` / `:`), jobs (`;` / `:`) and UDF
/// listings (`;` / `,`).
pub fn parse_entries(raw: &str, entry_sep: char, field_sep: char) -> Vec<Stats> {
    let mut out = Vec::new();
    for entry in raw.split(entry_sep) {
        let entry = entry.trim();
        if entry.is_empty() {
            continue;
        }
        let mut stats = Stats::new();
        for field in entry.split(field_sep) {
            if let Some((key, value)) = field.split_once('=') {
                stats.insert(key.trim(), parse_value(value.trim()));
            }
        }
        if !stats.is_empty() {
            out.push(stats);
        }
    }
    out
}

/// One remote datacenter as reported by a node's XDR config.
#[derive(Debug, Clone, Default)]
pub struct Datacenter {
    pub name: String,
    /// Remote node addresses, normalized to `host:port`.
    pub nodes: Vec<String>,
    /// Namespaces shipped to this datacenter.
    pub namespaces: Vec<String>,
    /// The remaining reported fields.
    pub stats: Stats,
}

/// Parse the datacenter config response. Each entry describes one remote DC:
/// `dc-name=REMOTE:dc-node-address-port=10.0.1.1+4000,10.0.1.2+4000:namespaces=ns1,ns2:...`
/// (older servers label the fields `DC_Name` / `Nodes`).
pub fn parse_datacenters(raw: &str) -> HashMap<String, Datacenter> {
    let mut out = HashMap::new();
    for entry in parse_entries(raw, ';', ':') {
        let name = match entry
            .get("dc-name")
            .or_else(|| entry.get("DC_Name"))
            .and_then(Value::as_str)
        {
            Some(n) if !n.is_empty() => n.to_owned(),
            _ => continue,
        };

        let nodes_raw = entry
            .get("dc-node-address-port")
            .or_else(|| entry.get("Nodes"))
            .and_then(Value::as_str)
            .unwrap_or("");
        let nodes = nodes_raw
            .split(',')
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .map(|s| s.replace('+', ":"))
            .collect();

        let namespaces = entry
            .get("namespaces")
            .and_then(Value::as_str)
            .map(|s| {
                s.split(',')
                    .map(str::trim)
                    .filter(|s| !s.is_empty())
                    .map(str::to_owned)
                    .collect()
            })
            .unwrap_or_default();

        out.insert(
            name.clone(),
            Datacenter {
                name,
                nodes,
                namespaces,
                stats: entry,
            },
        );
    }
    out
}

/// Parse the latency histogram table. The response alternates header and data
/// rows per histogram:
/// `{ns}-read:10:17:37-GMT,ops/sec,>1ms,>8ms,>64ms;10:17:47,2964.2,3.44,0.08,0.00;...`
/// Rows announcing `error-...` (histogram not populated yet) are skipped.
///
/// Each histogram maps to a [`Stats`] with `ops/sec`, `timestamp`, and one
/// entry per bucket column.
pub fn parse_latency(raw: &str) -> HashMap<String, Stats> {
    let mut out = HashMap::new();
    let rows: Vec<&str> = raw.split(';').map(str::trim).collect();

    let mut i = 0;
    while i < rows.len() {
        let row = rows[i];
        i += 1;
        if row.is_empty() || row.starts_with("error") {
            continue;
        }

        // Header rows carry the histogram name before the first colon and an
        // `ops/sec` column marker.
        if !row.contains("ops/sec") {
            continue;
        }
        let Some((name, header_rest)) = row.split_once(':') else {
            continue;
        };
        let columns: Vec<&str> = header_rest.split(',').skip(1).collect();

        let Some(data_row) = rows.get(i) else { break };
        i += 1;
        let mut fields = data_row.split(',');
        let timestamp = fields.next().unwrap_or("").to_owned();

        let mut hist = Stats::new();
        hist.insert("timestamp", timestamp);
        for (column, value) in columns.iter().zip(fields) {
            hist.insert(*column, parse_value(value.trim()));
        }
        out.insert(name.to_owned(), hist);
    }
    out
}
