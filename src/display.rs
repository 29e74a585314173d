//! Report output for the CLI: the slow-query listing with optional
//! EXPLAIN/ANALYZE, the periodic progress line, and the end-of-run
//! summary block.

use crate::manager::{SlowQuery, StreamManager};
use crate::replay::{ReplayClient, ReplayOpts};

/// Print the slow queries, slowest first, each with its capture-derived
/// execution time. With `explain` or `analyze` set, each query is also
/// explained against the replay endpoint; a failed connection degrades
/// to printing the queries alone.
pub fn print_slow_queries(
    slow: &[&SlowQuery],
    replay_opts: &ReplayOpts,
    explain: bool,
    analyze: bool,
) {
    let mut conn = if (explain || analyze) && !slow.is_empty() {
        match ReplayClient::connect(replay_opts) {
            Ok(conn) => Some(conn),
            Err(e) => {
                tracing::error!(error = %e, "cannot connect for EXPLAIN/ANALYZE");
                None
            }
        }
    } else {
        None
    };

    for query in slow {
        println!("# exec_time = {:.6}s", query.exec_time);
        println!("{}", query.text);

        if let Some(conn) = conn.as_mut() {
            match conn.explain(&query.text, analyze) {
                Ok(fields) => {
                    for (name, value) in fields {
                        println!("{}: {}", name, value);
                    }
                }
                Err(e) => {
                    tracing::error!(error = %e, query = %query.text, "explain failed");
                }
            }
        }
    }
}

/// One progress line on stderr.
pub fn print_progress(mgr: &StreamManager) {
    let counters = mgr.counters();
    eprintln!(
        "[progress] {} frames ({} skipped) | {} queries | {} streams | {} bytes in packet buffers",
        mgr.frames_seen(),
        mgr.frames_skipped(),
        mgr.queries_seen(),
        mgr.stream_count(),
        counters.bytes_in_use(),
    );
}

/// End-of-run summary block.
pub fn print_summary(mgr: &StreamManager) {
    let counters = mgr.counters();
    let stats = mgr.stats();
    let queries = stats.queries.lock().unwrap();

    println!();
    println!("{}", "=".repeat(50));
    println!("Processing complete.");
    println!("  Frames seen:      {}", mgr.frames_seen());
    println!("  Frames skipped:   {}", mgr.frames_skipped());
    println!("  Queries:          {}", mgr.queries_seen());
    if queries.total_queries > 0 {
        println!("  Recorded N:       {}", queries.total_queries);
        println!("  Total exec time:  {:.6}s", queries.total_time);
    }
    println!(
        "  Packet buffers:   {} allocated, {} freed",
        counters.pkts_alloced(),
        counters.pkts_freed()
    );
    println!("{}", "=".repeat(50));
}
