//! Execution-time statistics, aggregated two ways: by normalized query
//! pattern and by (table, statement kind).
//!
//! Pattern entries keep the full sample vector so median and p95 can be
//! computed once at report time; table entries only need running
//! count/min/max/total.

use crate::pattern::{self, QueryPattern};
use crate::sql::{self, StatementKind};
use std::collections::{BTreeMap, HashMap};
use std::fs::File;
use std::io::{BufWriter, Write};
use std::path::Path;
use std::sync::{Arc, Mutex};

/// Running statistics for one pattern key.
#[derive(Debug, Clone)]
pub struct PatternEntry {
    pub n: u64,
    pub min: f64,
    pub max: f64,
    pub total: f64,
    samples: Vec<f64>,
}

impl PatternEntry {
    fn new(exec_time: f64) -> Self {
        PatternEntry {
            n: 1,
            min: exec_time,
            max: exec_time,
            total: exec_time,
            samples: vec![exec_time],
        }
    }

    fn record(&mut self, exec_time: f64) {
        self.n += 1;
        self.total += exec_time;
        if exec_time < self.min {
            self.min = exec_time;
        }
        if exec_time > self.max {
            self.max = exec_time;
        }
        self.samples.push(exec_time);
    }

    pub fn avg(&self) -> f64 {
        self.total / self.n as f64
    }

    pub fn median(&self) -> f64 {
        percentile(&self.sorted(), 0.5)
    }

    pub fn p95(&self) -> f64 {
        percentile(&self.sorted(), 0.95)
    }

    fn sorted(&self) -> Vec<f64> {
        let mut sorted = self.samples.clone();
        sorted.sort_by(f64::total_cmp);
        sorted
    }
}

/// Percentile from sorted samples, with linear interpolation between
/// neighbours.
fn percentile(sorted: &[f64], p: f64) -> f64 {
    if sorted.is_empty() {
        return 0.0;
    }
    if p <= 0.0 {
        return sorted[0];
    }
    if p >= 1.0 {
        return sorted[sorted.len() - 1];
    }
    let rank = p * (sorted.len() - 1) as f64;
    let lower = rank.floor() as usize;
    let upper = rank.ceil() as usize;
    if lower == upper {
        return sorted[lower];
    }
    let fraction = rank - lower as f64;
    sorted[lower] + (sorted[upper] - sorted[lower]) * fraction
}

/// Per-pattern-key execution statistics plus overall totals.
#[derive(Debug, Default)]
pub struct QueryStats {
    pub total_queries: u64,
    pub total_time: f64,
    by_key: HashMap<String, PatternEntry>,
}

impl QueryStats {
    pub fn new() -> Self {
        QueryStats::default()
    }

    pub fn record(&mut self, key: &str, exec_time: f64) {
        self.total_queries += 1;
        self.total_time += exec_time;
        match self.by_key.get_mut(key) {
            Some(entry) => entry.record(exec_time),
            None => {
                self.by_key.insert(key.to_string(), PatternEntry::new(exec_time));
            }
        }
    }

    pub fn is_empty(&self) -> bool {
        self.by_key.is_empty()
    }

    /// Entries sorted by key for stable output.
    pub fn entries(&self) -> Vec<(&str, &PatternEntry)> {
        let mut entries: Vec<_> = self
            .by_key
            .iter()
            .map(|(k, v)| (k.as_str(), v))
            .collect();
        entries.sort_by_key(|(k, _)| *k);
        entries
    }

    pub fn write_csv<W: Write>(&self, mut out: W) -> std::io::Result<()> {
        writeln!(out, "pattern,N,min,max,avg,median,p95,total")?;
        for (key, e) in self.entries() {
            writeln!(
                out,
                "{},{},{:.6},{:.6},{:.6},{:.6},{:.6},{:.6}",
                csv_escape(key),
                e.n,
                e.min,
                e.max,
                e.avg(),
                e.median(),
                e.p95(),
                e.total
            )?;
        }
        Ok(())
    }
}

/// Write the pattern statistics CSV to `path`.
pub fn write_pattern_csv(path: &Path, stats: &QueryStats) -> std::io::Result<()> {
    let file = File::create(path)?;
    let mut out = BufWriter::new(file);
    stats.write_csv(&mut out)?;
    out.flush()
}

fn csv_escape(field: &str) -> String {
    if field.contains(',') || field.contains('"') || field.contains('\n') {
        format!("\"{}\"", field.replace('"', "\"\""))
    } else {
        field.to_string()
    }
}

/// Running statistics for one (table, kind) pair.
#[derive(Debug, Clone, Copy)]
pub struct TableEntry {
    pub n: u64,
    pub min: f64,
    pub max: f64,
    pub total: f64,
}

impl TableEntry {
    fn new(exec_time: f64) -> Self {
        TableEntry {
            n: 1,
            min: exec_time,
            max: exec_time,
            total: exec_time,
        }
    }

    fn record(&mut self, exec_time: f64) {
        self.n += 1;
        self.total += exec_time;
        if exec_time < self.min {
            self.min = exec_time;
        }
        if exec_time > self.max {
            self.max = exec_time;
        }
    }

    pub fn avg(&self) -> f64 {
        self.total / self.n as f64
    }
}

/// Per-table execution statistics keyed by statement kind.
#[derive(Debug, Default)]
pub struct TableStats {
    by_table: BTreeMap<String, BTreeMap<StatementKind, TableEntry>>,
}

impl TableStats {
    pub fn new() -> Self {
        TableStats::default()
    }

    pub fn update(&mut self, table: &str, kind: StatementKind, exec_time: f64) {
        let kinds = self.by_table.entry(table.to_string()).or_default();
        match kinds.get_mut(&kind) {
            Some(entry) => entry.record(exec_time),
            None => {
                kinds.insert(kind, TableEntry::new(exec_time));
            }
        }
    }

    /// Parse the query shape and record one entry per table reference.
    /// Parse failures propagate so the caller can report the query.
    pub fn record_query(&mut self, query: &str, exec_time: f64) -> Result<(), sql::SqlError> {
        for (kind, table) in sql::tables_in_query(query)? {
            self.update(&table, kind, exec_time);
        }
        Ok(())
    }

    pub fn is_empty(&self) -> bool {
        self.by_table.is_empty()
    }

    pub fn get(&self, table: &str, kind: StatementKind) -> Option<&TableEntry> {
        self.by_table.get(table).and_then(|kinds| kinds.get(&kind))
    }

    /// One line: a local ISO-8601 timestamp, then a
    /// `,table,kind,N,min,max,avg` tuple per (table, kind).
    pub fn write_line<W: Write>(&self, mut out: W) -> std::io::Result<()> {
        let now = chrono::Local::now();
        write!(out, "{}", now.format("%Y-%m-%d %H:%M:%S"))?;
        for (table, kinds) in &self.by_table {
            for (kind, e) in kinds {
                write!(
                    out,
                    ",{},{},{},{:.5},{:.5},{:.5}",
                    table,
                    kind,
                    e.n,
                    e.min,
                    e.max,
                    e.avg()
                )?;
            }
        }
        writeln!(out)
    }
}

/// Write the table statistics line to `path`.
pub fn write_table_stats(path: &Path, stats: &TableStats) -> std::io::Result<()> {
    let file = File::create(path)?;
    let mut out = BufWriter::new(file);
    stats.write_line(&mut out)?;
    out.flush()
}

/// Statistics shared between the dispatch thread and the replay
/// workers: the compiled normalizer patterns plus both aggregate maps,
/// each behind its own lock.
#[derive(Debug)]
pub struct SharedStats {
    patterns: Vec<QueryPattern>,
    pub queries: Mutex<QueryStats>,
    pub tables: Mutex<TableStats>,
}

impl SharedStats {
    pub fn new(patterns: Vec<QueryPattern>) -> Arc<Self> {
        Arc::new(SharedStats {
            patterns,
            queries: Mutex::new(QueryStats::new()),
            tables: Mutex::new(TableStats::new()),
        })
    }

    /// Record one executed query under its pattern key and its table
    /// references. An unparseable query is reported to stderr and
    /// excluded from table statistics only.
    pub fn record_query(&self, sql: &str, exec_time: f64) {
        let key = pattern::query_key(&self.patterns, sql);
        self.queries.lock().unwrap().record(&key, exec_time);

        let mut tables = self.tables.lock().unwrap();
        if let Err(e) = tables.record_query(sql, exec_time) {
            eprintln!("cannot parse query for table stats: {}: {}", sql, e);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn pattern_entry_running_stats() {
        let mut stats = QueryStats::new();
        for &t in &[0.5, 0.1, 0.3] {
            stats.record("k", t);
        }
        stats.record("other", 1.0);

        assert_eq!(stats.total_queries, 4);
        let entries = stats.entries();
        let (_, e) = entries.iter().find(|(k, _)| *k == "k").unwrap();
        assert_eq!(e.n, 3);
        assert_eq!(e.min, 0.1);
        assert_eq!(e.max, 0.5);
        assert!((e.avg() - 0.3).abs() < 1e-9);
        assert!((e.median() - 0.3).abs() < 1e-9);
    }

    #[test]
    fn percentile_interpolates() {
        let samples = [1.0, 2.0, 3.0, 4.0];
        assert_eq!(percentile(&samples, 0.0), 1.0);
        assert_eq!(percentile(&samples, 1.0), 4.0);
        assert!((percentile(&samples, 0.5) - 2.5).abs() < 1e-9);
        assert!((percentile(&samples, 0.95) - 3.85).abs() < 1e-9);
        assert_eq!(percentile(&[], 0.5), 0.0);
    }

    #[test]
    fn csv_output_escapes_keys() {
        let mut stats = QueryStats::new();
        stats.record("a,b", 0.25);
        let mut buf = Vec::new();
        stats.write_csv(&mut buf).unwrap();
        let text = String::from_utf8(buf).unwrap();
        assert!(text.starts_with("pattern,N,min,max,avg,median,p95,total\n"));
        assert!(text.contains("\"a,b\",1,"));
    }

    #[test]
    fn table_stats_from_queries() {
        let mut stats = TableStats::new();
        stats
            .record_query("SELECT u.name FROM users AS u, posts p WHERE u.id = p.user_id", 0.2)
            .unwrap();
        stats.record_query("UPDATE users SET name = 'x' WHERE id = 1", 0.4).unwrap();
        stats.record_query("SELECT * FROM users", 0.6).unwrap();

        let selects = stats.get("users", StatementKind::Select).unwrap();
        assert_eq!(selects.n, 2);
        assert_eq!(selects.min, 0.2);
        assert_eq!(selects.max, 0.6);
        let updates = stats.get("users", StatementKind::Update).unwrap();
        assert_eq!(updates.n, 1);
        assert!(stats.get("posts", StatementKind::Select).is_some());

        assert!(stats.record_query("GRANT ALL ON x TO y", 0.1).is_err());
    }

    #[test]
    fn table_stats_line_format() {
        let mut stats = TableStats::new();
        stats.update("t1", StatementKind::Select, 0.05);
        let mut buf = Vec::new();
        stats.write_line(&mut buf).unwrap();
        let text = String::from_utf8(buf).unwrap();
        assert!(text.contains(",t1,select,1,0.05000,0.05000,0.05000"));
        // Leading field is a timestamp, not a table name.
        assert!(text.starts_with(|c: char| c.is_ascii_digit()));
    }
}
