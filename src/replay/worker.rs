//! Per-stream replay worker.
//!
//! One thread per live stream, fed completed COM_QUERY packets over an
//! unbounded channel. The worker paces each query to
//! `replay_start + (capture_ts - first_capture_ts) / speed`, assembles
//! oversized commands across continuation packets, lazily opens its
//! MySQL connection, executes, and feeds the shared statistics with the
//! measured wall-clock latency. Sender drop is the end-of-stream
//! signal: the worker drains what is queued and exits, closing its
//! connection on the way out.

use crossbeam_channel::{Receiver, Sender};
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

use crate::protocol::mysql::{MysqlPacket, MAX_PAYLOAD_LEN};
use crate::replay::client::{self, ReplayClient};
use crate::replay::ReplayShared;

/// Items the dispatch thread hands to a worker.
#[derive(Debug)]
pub enum WorkerItem {
    /// A completed COM_QUERY head packet.
    Query(Arc<MysqlPacket>),
    /// A continuation packet of an oversized command.
    Continuation(Arc<MysqlPacket>),
}

/// Handle the owning stream keeps: the send side plus the join handle.
pub struct ReplayHandle {
    tx: Option<Sender<WorkerItem>>,
    handle: Option<thread::JoinHandle<()>>,
}

impl ReplayHandle {
    pub fn spawn(stream_key: u64, shared: Arc<ReplayShared>) -> std::io::Result<Self> {
        let (tx, rx) = crossbeam_channel::unbounded::<WorkerItem>();
        let handle = thread::Builder::new()
            .name(format!("replay-{:x}", stream_key))
            .spawn(move || run(rx, &shared))?;
        Ok(ReplayHandle {
            tx: Some(tx),
            handle: Some(handle),
        })
    }

    /// Queue an item; a worker that already exited just drops it.
    pub fn send(&self, item: WorkerItem) {
        if let Some(tx) = &self.tx {
            let _ = tx.send(item);
        }
    }

    /// Signal end-of-stream and join the worker.
    pub fn finish(mut self) {
        self.tx.take();
        if let Some(handle) = self.handle.take() {
            let _ = handle.join();
        }
    }
}

fn run(rx: Receiver<WorkerItem>, shared: &ReplayShared) {
    let mut conn: Option<ReplayClient> = None;
    // Packets of the command being assembled (head + continuations).
    let mut pending: Vec<Arc<MysqlPacket>> = Vec::new();

    while let Ok(item) = rx.recv() {
        let ready = match item {
            WorkerItem::Query(pkt) => {
                pending.clear();
                let oversized = pkt.declared_len() == MAX_PAYLOAD_LEN;
                pending.push(pkt);
                !oversized
            }
            WorkerItem::Continuation(pkt) => {
                if pending.is_empty() {
                    tracing::debug!("continuation without a pending command, dropped");
                    continue;
                }
                let last = pkt.declared_len() < MAX_PAYLOAD_LEN;
                pending.push(pkt);
                last
            }
        };

        if !ready {
            continue;
        }

        let command = std::mem::take(&mut pending);
        if !replay_command(&mut conn, &command, shared) {
            // Connect failure: this stream gives up, others proceed.
            return;
        }
    }
}

/// Replay one (possibly multi-packet) command. Returns false when the
/// worker should exit because no connection could be established.
fn replay_command(
    conn: &mut Option<ReplayClient>,
    command: &[Arc<MysqlPacket>],
    shared: &ReplayShared,
) -> bool {
    let head = &command[0];

    pace(head, shared);

    let sql = assemble_command(command);

    if conn.is_none() {
        match ReplayClient::connect(&shared.opts) {
            Ok(client) => *conn = Some(client),
            Err(e) => {
                tracing::error!(error = %e, "replay connect failed, stream abandoned");
                return false;
            }
        }
    }
    let client = conn.as_mut().unwrap();

    let started = Instant::now();
    match client.execute_discard(&sql) {
        Ok(()) => {
            let elapsed = started.elapsed().as_secs_f64();
            shared.stats.record_query(&sql, elapsed);
        }
        Err(e) if shared.opts.ignore_dup_key_errors && client::is_dup_key_error(&e) => {
            // Progress, but not statistics.
            tracing::debug!(error = %e, "duplicate key ignored");
        }
        Err(e) => {
            tracing::error!(error = %e, query = %sql, "replay query failed");
            if shared.opts.assert_on_query_error {
                std::process::abort();
            }
        }
    }
    true
}

/// The full command text: continuation payloads concatenated behind the
/// head, with the opcode byte stripped.
fn assemble_command(command: &[Arc<MysqlPacket>]) -> String {
    let mut text = Vec::with_capacity(command.iter().map(|p| p.payload().len()).sum::<usize>());
    text.extend_from_slice(&command[0].payload()[1..]);
    for pkt in &command[1..] {
        text.extend_from_slice(pkt.payload());
    }
    String::from_utf8_lossy(&text).into_owned()
}

/// Sleep until the query's scheduled dispatch time. A speed of zero
/// disables pacing.
fn pace(head: &Arc<MysqlPacket>, shared: &ReplayShared) {
    if shared.opts.speed == 0.0 {
        return;
    }
    let Some(first_ts) = shared.first_capture_ts.get() else {
        return;
    };
    let delta_us = head.ts().micros_since(*first_ts).max(0) as f64 / shared.opts.speed;
    let scheduled = shared.start + Duration::from_micros(delta_us as u64);
    let now = Instant::now();
    if scheduled > now {
        thread::sleep(scheduled - now);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::mysql::{MemCounters, WireTime, COM_QUERY};

    #[test]
    fn assembles_oversized_command_across_packets() {
        let counters = MemCounters::new();
        let mut head_payload = vec![COM_QUERY];
        head_payload.resize(MAX_PAYLOAD_LEN as usize, b'a');
        let head = Arc::new(MysqlPacket::from_payload(
            crate::protocol::mysql::Direction::ClientToServer,
            WireTime::new(1, 0),
            head_payload,
            &counters,
        ));
        let tail = Arc::new(MysqlPacket::from_payload(
            crate::protocol::mysql::Direction::ClientToServer,
            WireTime::new(1, 1),
            vec![b'b'; 4096],
            &counters,
        ));

        let sql = assemble_command(&[head, tail]);
        // Head payload minus the opcode byte, plus the continuation.
        assert_eq!(sql.len(), MAX_PAYLOAD_LEN as usize - 1 + 4096);
        assert!(sql.starts_with('a'));
        assert!(sql.ends_with('b'));
    }

    #[test]
    fn single_packet_command_strips_opcode() {
        let counters = MemCounters::new();
        let pkt = Arc::new(MysqlPacket::from_payload(
            crate::protocol::mysql::Direction::ClientToServer,
            WireTime::new(1, 0),
            b"\x03SELECT 1".to_vec(),
            &counters,
        ));
        assert_eq!(assemble_command(&[pkt]), "SELECT 1");
    }
}
