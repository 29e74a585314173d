//! Stream manager: frame dispatch, stream lifecycle, the slow-query
//! set, recording output and replay coordination.
//!
//! The dispatch path per captured frame: link-layer offset → IPv4 parse
//! → fragment handling → TCP parse → server-port filter → stream
//! lookup/create/retire → retransmit gate → framing → tail-fragment
//! drain. Completed-packet events come back from the stream and are
//! fanned out here to the recording file, the statistics and the
//! stream's replay worker.

use std::cmp::Reverse;
use std::collections::{BinaryHeap, HashMap};
use std::fmt;
use std::io;
use std::net::Ipv4Addr;
use std::sync::Arc;

use crate::capture::engine::LinkOffset;
use crate::protocol::ipv4::Ipv4Header;
use crate::protocol::mysql::{
    Direction, MemCounters, MysqlPacket, WireTime, COM_QUERY,
};
use crate::protocol::tcp::TcpHeader;
use crate::protocol::IPPROTO_TCP;
use crate::reassembly::IpReassembler;
use crate::recording::{RecordingError, RecordingRecord, RecordingWriter};
use crate::replay::{ReplayHandle, ReplayShared, WorkerItem};
use crate::stats::SharedStats;
use crate::stream::{MysqlStream, StreamEvent};

/// Errors that abort the run; everything else is a skipped frame.
#[derive(Debug)]
pub enum ManagerError {
    Recording(RecordingError),
    WorkerSpawn(io::Error),
}

impl fmt::Display for ManagerError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ManagerError::Recording(e) => write!(f, "{}", e),
            ManagerError::WorkerSpawn(e) => write!(f, "failed to spawn replay worker: {}", e),
        }
    }
}

impl std::error::Error for ManagerError {}

impl From<RecordingError> for ManagerError {
    fn from(e: RecordingError) -> Self {
        ManagerError::Recording(e)
    }
}

/// The 64-bit stream key: `(client_ip << 32) | client_port`.
pub fn stream_key(client_ip: Ipv4Addr, client_port: u16) -> u64 {
    ((u32::from(client_ip) as u64) << 32) | client_port as u64
}

/// Manager construction options.
#[derive(Debug, Clone)]
pub struct ManagerConfig {
    pub server_ip: Ipv4Addr,
    pub server_port: u16,
    /// Capacity of the top-N slow-query set.
    pub slow_queries: usize,
    /// Operator-pinned link-layer offset; `None` auto-detects.
    pub link_offset: Option<usize>,
}

/// A slow query held by value: text, capture timestamp, latency.
#[derive(Debug, Clone)]
pub struct SlowQuery {
    pub text: String,
    pub ts: WireTime,
    pub exec_time: f64,
    seq: u64,
}

struct HeapEntry(SlowQuery);

impl PartialEq for HeapEntry {
    fn eq(&self, other: &Self) -> bool {
        self.cmp(other) == std::cmp::Ordering::Equal
    }
}
impl Eq for HeapEntry {}
impl PartialOrd for HeapEntry {
    fn partial_cmp(&self, other: &Self) -> Option<std::cmp::Ordering> {
        Some(self.cmp(other))
    }
}
impl Ord for HeapEntry {
    /// "Least" = smallest exec_time, ties going to the latest insertion,
    /// so that popping the minimum keeps the earliest-inserted of equal
    /// queries.
    fn cmp(&self, other: &Self) -> std::cmp::Ordering {
        self.0
            .exec_time
            .total_cmp(&other.0.exec_time)
            .then_with(|| other.0.seq.cmp(&self.0.seq))
    }
}

/// Bounded multiset of the N slowest queries seen so far.
pub struct SlowQuerySet {
    capacity: usize,
    heap: BinaryHeap<Reverse<HeapEntry>>,
    next_seq: u64,
}

impl SlowQuerySet {
    pub fn new(capacity: usize) -> Self {
        SlowQuerySet {
            capacity,
            heap: BinaryHeap::with_capacity(capacity + 1),
            next_seq: 0,
        }
    }

    pub fn insert(&mut self, text: String, ts: WireTime, exec_time: f64) {
        if self.capacity == 0 {
            return;
        }
        let seq = self.next_seq;
        self.next_seq += 1;
        self.heap.push(Reverse(HeapEntry(SlowQuery {
            text,
            ts,
            exec_time,
            seq,
        })));
        if self.heap.len() > self.capacity {
            self.heap.pop();
        }
    }

    pub fn len(&self) -> usize {
        self.heap.len()
    }

    pub fn is_empty(&self) -> bool {
        self.heap.is_empty()
    }

    /// Slowest first; equal times in insertion order.
    pub fn sorted(&self) -> Vec<&SlowQuery> {
        let mut out: Vec<&SlowQuery> = self.heap.iter().map(|Reverse(e)| &e.0).collect();
        out.sort_by(|a, b| {
            b.exec_time
                .total_cmp(&a.exec_time)
                .then_with(|| a.seq.cmp(&b.seq))
        });
        out
    }
}

/// Owns every stream and everything they aggregate into.
pub struct StreamManager {
    config: ManagerConfig,
    streams: HashMap<u64, MysqlStream>,
    reassembler: IpReassembler,
    slow_queries: SlowQuerySet,
    stats: Arc<SharedStats>,
    recorder: Option<RecordingWriter>,
    replay: Option<Arc<ReplayShared>>,
    link: LinkOffset,
    counters: Arc<MemCounters>,
    first_ts: Option<WireTime>,
    last_ts: WireTime,
    frames_seen: u64,
    frames_skipped: u64,
    queries_seen: u64,
}

impl StreamManager {
    pub fn new(
        config: ManagerConfig,
        stats: Arc<SharedStats>,
        recorder: Option<RecordingWriter>,
        replay: Option<Arc<ReplayShared>>,
    ) -> Self {
        let link = LinkOffset::new(config.link_offset);
        let slow_queries = SlowQuerySet::new(config.slow_queries);
        StreamManager {
            config,
            streams: HashMap::new(),
            reassembler: IpReassembler::new(),
            slow_queries,
            stats,
            recorder,
            replay,
            link,
            counters: MemCounters::new(),
            first_ts: None,
            last_ts: WireTime::ZERO,
            frames_seen: 0,
            frames_skipped: 0,
            queries_seen: 0,
        }
    }

    /// Dispatch one captured frame.
    pub fn process_frame(&mut self, ts: WireTime, frame: &[u8]) -> Result<(), ManagerError> {
        self.frames_seen += 1;

        let Some(offset) = self.link.offset_for(frame) else {
            self.frames_skipped += 1;
            return Ok(());
        };

        let ip = match Ipv4Header::parse(frame.get(offset..).unwrap_or(&[])) {
            Ok(ip) => ip,
            Err(_) => {
                self.link.note_failure();
                self.frames_skipped += 1;
                return Ok(());
            }
        };
        if ip.protocol() != IPPROTO_TCP {
            self.link.note_success();
            self.frames_skipped += 1;
            return Ok(());
        }
        self.link.note_success();
        self.last_ts = ts;

        let ip_payload = ip.payload();
        let ip_id = ip.identification();

        // Fragments wait in the reassembler until the final (MF=0)
        // piece shows up.
        if ip.more_fragments() {
            self.reassembler
                .enqueue(ip_id, ip.fragment_offset_bytes(), ip_payload);
            return Ok(());
        }

        // With fragments pending, the TCP header lives in the first
        // fragment's bytes, not in this frame.
        let reassembled = self.reassembler.has(ip_id);
        let head_owned: Option<Vec<u8>> = if reassembled {
            self.reassembler.first(ip_id).map(|b| b.to_vec())
        } else {
            None
        };
        let tcp_src: &[u8] = head_owned.as_deref().unwrap_or(ip_payload);

        let tcp = match TcpHeader::parse(tcp_src) {
            Ok(tcp) => tcp,
            Err(_) => {
                self.frames_skipped += 1;
                return Ok(());
            }
        };

        if tcp.src_port() != self.config.server_port && tcp.dst_port() != self.config.server_port {
            self.frames_skipped += 1;
            return Ok(());
        }

        let server_bound =
            ip.dst_addr() == self.config.server_ip && tcp.dst_port() == self.config.server_port;
        let direction = if server_bound {
            Direction::ClientToServer
        } else {
            Direction::ServerToClient
        };
        let (client_ip, client_port) = if server_bound {
            (ip.src_addr(), tcp.src_port())
        } else {
            (ip.dst_addr(), tcp.dst_port())
        };
        let key = stream_key(client_ip, client_port);

        let head_payload = &tcp_src[tcp.header_len()..];

        if !self.streams.contains_key(&key) {
            if tcp.fin() || tcp.rst() {
                self.frames_skipped += 1;
                return Ok(());
            }
            // Mid-stream join rule: no SYN means the flow predates the
            // capture; adopt it only when it is server-bound and the
            // payload plausibly is a query command.
            if !tcp.syn() && !(server_bound && could_be_query(head_payload)) {
                self.frames_skipped += 1;
                return Ok(());
            }
            self.create_stream(key, client_ip, client_port)?;
        } else if tcp.fin() || tcp.rst() {
            return self.retire_stream(key, ts);
        }

        {
            let stream = self.streams.get_mut(&key).unwrap();
            if !stream.accept_seq(direction, tcp.sequence_number()) {
                self.frames_skipped += 1;
                return Ok(());
            }
        }

        if head_payload.is_empty() && !reassembled {
            return Ok(());
        }

        if self.first_ts.is_none() {
            self.first_ts = Some(ts);
            if let Some(replay) = &self.replay {
                let _ = replay.first_capture_ts.set(ts);
            }
        }

        let tails = if reassembled {
            self.reassembler.drain_tail(ip_id)
        } else {
            Vec::new()
        };

        let mut events = Vec::new();
        {
            let stream = self.streams.get_mut(&key).unwrap();
            if !head_payload.is_empty() {
                events.extend(stream.append(ts, head_payload, direction));
            }
            for frag in &tails {
                events.extend(stream.append(ts, &frag.data, direction));
            }
            // The final (MF=0) fragment's own payload goes last.
            if reassembled && !ip_payload.is_empty() {
                events.extend(stream.append(ts, ip_payload, direction));
            }
        }

        self.handle_events(key, events)
    }

    /// Dispatch one record from a replay recording.
    pub fn process_record(&mut self, record: RecordingRecord) -> Result<(), ManagerError> {
        let key = record.key;
        if record.is_stream_end() {
            return self.retire_stream(key, record.ts);
        }

        if !self.streams.contains_key(&key) {
            // Synthetic endpoints: the key holds the client side, the
            // destination is the configured server.
            let client_ip = Ipv4Addr::from((key >> 32) as u32);
            let client_port = (key & 0xFFFF) as u16;
            self.create_stream(key, client_ip, client_port)?;
        }

        if self.first_ts.is_none() {
            self.first_ts = Some(record.ts);
            if let Some(replay) = &self.replay {
                let _ = replay.first_capture_ts.set(record.ts);
            }
        }
        self.last_ts = record.ts;

        let pkt = MysqlPacket::from_payload(
            record.direction,
            record.ts,
            record.payload,
            &self.counters,
        );
        let events = {
            let stream = self.streams.get_mut(&key).unwrap();
            stream.ingest_packet(pkt)
        };
        self.handle_events(key, events)
    }

    fn handle_events(&mut self, key: u64, events: Vec<StreamEvent>) -> Result<(), ManagerError> {
        for event in events {
            match event {
                StreamEvent::Query(pkt) => {
                    self.queries_seen += 1;
                    if let Some(rec) = self.recorder.as_mut() {
                        rec.write_packet(key, &pkt).map_err(ManagerError::Recording)?;
                    }
                    self.forward(key, WorkerItem::Query(pkt));
                }
                StreamEvent::Continuation(pkt) => {
                    if let Some(rec) = self.recorder.as_mut() {
                        rec.write_packet(key, &pkt).map_err(ManagerError::Recording)?;
                    }
                    self.forward(key, WorkerItem::Continuation(pkt));
                }
                StreamEvent::QueryClosed {
                    query,
                    eof,
                    exec_time,
                } => {
                    if let Some(rec) = self.recorder.as_mut() {
                        rec.write_packet(key, &eof).map_err(ManagerError::Recording)?;
                    }
                    let text = String::from_utf8_lossy(query.query_bytes().unwrap_or(&[]))
                        .into_owned();
                    // In replay mode the workers record replay
                    // latencies instead.
                    if self.replay.is_none() {
                        self.stats.record_query(&text, exec_time);
                    }
                    self.slow_queries.insert(text, query.ts(), exec_time);
                }
            }
        }
        Ok(())
    }

    fn forward(&self, key: u64, item: WorkerItem) {
        if let Some(stream) = self.streams.get(&key) {
            if let Some(worker) = &stream.worker {
                worker.send(item);
            }
        }
    }

    fn create_stream(
        &mut self,
        key: u64,
        client_ip: Ipv4Addr,
        client_port: u16,
    ) -> Result<(), ManagerError> {
        let mut stream = MysqlStream::new(
            client_ip,
            client_port,
            self.config.server_ip,
            self.config.server_port,
            key,
            Arc::clone(&self.counters),
        );
        if let Some(replay) = &self.replay {
            stream.worker = Some(
                ReplayHandle::spawn(key, Arc::clone(replay)).map_err(ManagerError::WorkerSpawn)?,
            );
        }
        tracing::debug!(client = %client_ip, port = client_port, key, "stream opened");
        self.streams.insert(key, stream);
        Ok(())
    }

    /// Stop a stream: join its worker, then mark the stream end in the
    /// recording. The worker is signalled and joined before the
    /// stream's packets go away.
    fn retire_stream(&mut self, key: u64, ts: WireTime) -> Result<(), ManagerError> {
        if let Some(mut stream) = self.streams.remove(&key) {
            tracing::debug!(key, "stream closed");
            if let Some(worker) = stream.worker.take() {
                worker.finish();
            }
            if let Some(rec) = self.recorder.as_mut() {
                rec.write_stream_end(key, ts).map_err(ManagerError::Recording)?;
            }
        }
        Ok(())
    }

    /// End of input: retire every stream (joining workers), close the
    /// recording file.
    pub fn finish(&mut self) -> Result<(), ManagerError> {
        let keys: Vec<u64> = self.streams.keys().copied().collect();
        let ts = self.last_ts;
        for key in keys {
            self.retire_stream(key, ts)?;
        }
        if let Some(rec) = self.recorder.take() {
            rec.finish().map_err(ManagerError::Recording)?;
        }
        Ok(())
    }

    pub fn slow_queries(&self) -> Vec<&SlowQuery> {
        self.slow_queries.sorted()
    }

    pub fn stats(&self) -> &Arc<SharedStats> {
        &self.stats
    }

    pub fn counters(&self) -> &Arc<MemCounters> {
        &self.counters
    }

    pub fn frames_seen(&self) -> u64 {
        self.frames_seen
    }

    pub fn frames_skipped(&self) -> u64 {
        self.frames_skipped
    }

    pub fn queries_seen(&self) -> u64 {
        self.queries_seen
    }

    pub fn stream_count(&self) -> usize {
        self.streams.len()
    }
}

/// Keywords that make a mid-stream payload look like a client query.
const JOIN_KEYWORDS: &[&[u8]] = &[b"select", b"update", b"delete", b"alter", b"call", b"show"];

/// Does this TCP payload look like a COM_QUERY command? Checks the
/// opcode byte behind the 4-byte MySQL header and scans the text for a
/// statement keyword, case-insensitively.
fn could_be_query(payload: &[u8]) -> bool {
    if payload.len() <= 5 || payload[4] != COM_QUERY {
        return false;
    }
    let text = &payload[5..];
    JOIN_KEYWORDS
        .iter()
        .any(|kw| contains_ignore_ascii_case(text, kw))
}

fn contains_ignore_ascii_case(haystack: &[u8], needle: &[u8]) -> bool {
    haystack
        .windows(needle.len())
        .any(|window| window.eq_ignore_ascii_case(needle))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::mysql::EOF_MARKER;
    use crate::protocol::tcp::flags;
    use crate::recording::RecordingReader;
    use crate::sql::StatementKind;
    use crate::testutil::{build_frame, com_query, mysql_packet};

    const SERVER_IP: [u8; 4] = [10, 0, 0, 2];
    const CLIENT_IP: [u8; 4] = [10, 0, 0, 1];
    const SERVER_PORT: u16 = 3306;
    const CLIENT_PORT: u16 = 40000;

    fn config() -> ManagerConfig {
        ManagerConfig {
            server_ip: Ipv4Addr::from(SERVER_IP),
            server_port: SERVER_PORT,
            slow_queries: 10,
            link_offset: None,
        }
    }

    fn manager() -> StreamManager {
        StreamManager::new(config(), SharedStats::new(Vec::new()), None, None)
    }

    fn client_frame(seq: u32, tcp_flags: u8, payload: &[u8]) -> Vec<u8> {
        build_frame(
            14, CLIENT_IP, SERVER_IP, CLIENT_PORT, SERVER_PORT, seq, tcp_flags, payload,
        )
    }

    fn server_frame(seq: u32, tcp_flags: u8, payload: &[u8]) -> Vec<u8> {
        build_frame(
            14, SERVER_IP, CLIENT_IP, SERVER_PORT, CLIENT_PORT, seq, tcp_flags, payload,
        )
    }

    fn ts(sec: i64, usec: i64) -> WireTime {
        WireTime::new(sec, usec)
    }

    /// Scenario: one short query, EOF 50 ms later.
    #[test]
    fn single_short_query() {
        let mut mgr = manager();
        let query = com_query(0, "SELECT 1 FROM t1");
        mgr.process_frame(ts(100, 0), &client_frame(1, flags::PSH | flags::ACK, &query))
            .unwrap();
        let eof = mysql_packet(1, &[EOF_MARKER]);
        mgr.process_frame(ts(100, 50_000), &server_frame(1, flags::PSH | flags::ACK, &eof))
            .unwrap();
        mgr.finish().unwrap();

        let slow = mgr.slow_queries();
        assert_eq!(slow.len(), 1);
        assert_eq!(slow[0].text, "SELECT 1 FROM t1");
        assert!((slow[0].exec_time - 0.050).abs() < 1e-6);

        let tables = mgr.stats().tables.lock().unwrap();
        let entry = tables.get("t1", StatementKind::Select).unwrap();
        assert_eq!(entry.n, 1);
    }

    /// Scenario: mid-stream join on a plausible COM_QUERY.
    #[test]
    fn mid_stream_join_adopts_query() {
        let mut mgr = manager();
        let query = com_query(0, "SELECT * FROM users");
        mgr.process_frame(ts(1, 0), &client_frame(1, flags::PSH | flags::ACK, &query))
            .unwrap();
        assert_eq!(mgr.stream_count(), 1);
        assert_eq!(mgr.queries_seen(), 1);
    }

    /// Scenario: a handshake-looking payload mid-stream is dropped.
    #[test]
    fn mid_stream_join_rejects_non_query() {
        let mut mgr = manager();
        // Looks like an auth packet: opcode is not COM_QUERY.
        let handshake = mysql_packet(1, &[0x85, 0xA6, 0x03, 0x00, 0x00, 0x00, 0x00, 0x01]);
        mgr.process_frame(ts(1, 0), &client_frame(1, flags::PSH | flags::ACK, &handshake))
            .unwrap();
        assert_eq!(mgr.stream_count(), 0);
        assert_eq!(mgr.queries_seen(), 0);

        // Server-to-client data never adopts a stream either.
        let query = com_query(0, "SELECT 1 FROM t");
        mgr.process_frame(ts(1, 1), &server_frame(1, flags::PSH | flags::ACK, &query))
            .unwrap();
        assert_eq!(mgr.stream_count(), 0);
    }

    /// Scenario: duplicated TCP segment leaves the stream unchanged.
    #[test]
    fn retransmit_is_idempotent() {
        let mut mgr = manager();
        let query = com_query(0, "SELECT 1 FROM t1");
        let frame = client_frame(1, flags::PSH | flags::ACK, &query);
        mgr.process_frame(ts(1, 0), &frame).unwrap();
        mgr.process_frame(ts(1, 10), &frame).unwrap();
        assert_eq!(mgr.queries_seen(), 1);

        let eof = mysql_packet(1, &[EOF_MARKER]);
        mgr.process_frame(ts(1, 50_000), &server_frame(1, flags::ACK, &eof))
            .unwrap();
        assert_eq!(mgr.slow_queries().len(), 1);
    }

    /// Streams come and go on SYN and FIN/RST.
    #[test]
    fn syn_creates_and_fin_retires() {
        let mut mgr = manager();
        mgr.process_frame(ts(1, 0), &client_frame(1, flags::SYN, &[]))
            .unwrap();
        assert_eq!(mgr.stream_count(), 1);

        mgr.process_frame(ts(2, 0), &client_frame(2, flags::FIN | flags::ACK, &[]))
            .unwrap();
        assert_eq!(mgr.stream_count(), 0);

        // FIN on an unknown stream does not create one.
        mgr.process_frame(ts(3, 0), &client_frame(3, flags::RST, &[]))
            .unwrap();
        assert_eq!(mgr.stream_count(), 0);
    }

    /// Frames for other ports are rejected.
    #[test]
    fn port_filter() {
        let mut mgr = manager();
        let query = com_query(0, "SELECT 1 FROM t1");
        let frame = build_frame(14, CLIENT_IP, SERVER_IP, 40000, 5432, 1, flags::PSH, &query);
        mgr.process_frame(ts(1, 0), &frame).unwrap();
        assert_eq!(mgr.stream_count(), 0);
        assert_eq!(mgr.frames_skipped(), 1);
    }

    /// A query split across two frames still frames correctly, and the
    /// packet-buffer counters balance after teardown.
    #[test]
    fn split_query_and_counter_balance() {
        let mut mgr = manager();
        let query = com_query(0, "SELECT col_a, col_b FROM split_table WHERE col_a > 100");
        let (first, second) = query.split_at(20);
        mgr.process_frame(ts(1, 0), &client_frame(1, flags::PSH | flags::ACK, first))
            .unwrap();
        assert_eq!(mgr.queries_seen(), 0);
        mgr.process_frame(ts(1, 100), &client_frame(2, flags::PSH | flags::ACK, second))
            .unwrap();
        assert_eq!(mgr.queries_seen(), 1);

        mgr.finish().unwrap();
        let counters = Arc::clone(mgr.counters());
        drop(mgr);
        assert_eq!(counters.live_packets(), 0);
        assert_eq!(counters.bytes_in_use(), 0);
    }

    /// Pattern normalization aggregates different literals into one key.
    #[test]
    fn pattern_normalization_buckets() {
        let patterns =
            vec![crate::pattern::QueryPattern::new(r"hash:\s*\d+", "hash: ?").unwrap()];
        let mut mgr = StreamManager::new(config(), SharedStats::new(patterns), None, None);

        for (i, q) in [
            "SELECT * FROM t /* hash: 1234 */",
            "SELECT * FROM t /* hash: 9999 */",
        ]
        .iter()
        .enumerate()
        {
            let seq = (i as u32) * 1000 + 1;
            mgr.process_frame(
                ts(10 + i as i64, 0),
                &client_frame(seq, flags::PSH | flags::ACK, &com_query(0, q)),
            )
            .unwrap();
            mgr.process_frame(
                ts(10 + i as i64, 30_000),
                &server_frame(seq, flags::ACK, &mysql_packet(1, &[EOF_MARKER])),
            )
            .unwrap();
        }

        let queries = mgr.stats().queries.lock().unwrap();
        assert_eq!(queries.total_queries, 2);
        let entries = queries.entries();
        assert_eq!(entries.len(), 1);
        let (key, entry) = entries[0];
        assert_eq!(key, "SELECT * FROM t /* hash: ? */");
        assert_eq!(entry.n, 2);
    }

    /// The slow-query set keeps exactly the N slowest, earliest-first
    /// on ties.
    #[test]
    fn slow_query_set_bound_and_order() {
        let mut set = SlowQuerySet::new(3);
        set.insert("q1".into(), WireTime::ZERO, 0.3);
        set.insert("q2".into(), WireTime::ZERO, 0.1);
        set.insert("q3".into(), WireTime::ZERO, 0.5);
        set.insert("q4".into(), WireTime::ZERO, 0.2);
        assert_eq!(set.len(), 3);
        let texts: Vec<&str> = set.sorted().iter().map(|q| q.text.as_str()).collect();
        assert_eq!(texts, vec!["q3", "q1", "q4"]);

        // Ties evict the later insertion.
        let mut set = SlowQuerySet::new(2);
        set.insert("first".into(), WireTime::ZERO, 0.2);
        set.insert("second".into(), WireTime::ZERO, 0.2);
        set.insert("third".into(), WireTime::ZERO, 0.2);
        let texts: Vec<&str> = set.sorted().iter().map(|q| q.text.as_str()).collect();
        assert_eq!(texts, vec!["first", "second"]);

        let mut off = SlowQuerySet::new(0);
        off.insert("never".into(), WireTime::ZERO, 9.0);
        assert!(off.is_empty());
    }

    /// IP fragments: TCP header in the first fragment, tail payloads
    /// drained in offset order, final fragment appended last.
    #[test]
    fn fragmented_datagram_reassembles() {
        let mut mgr = manager();

        let query = com_query(0, "SELECT fragment_col FROM fragmented_table");
        // First fragment: TCP header + first 12 payload bytes (8-byte
        // aligned offsets: 20 + 12 = 32 bytes = offset 4).
        let (part1, rest) = query.split_at(12);
        let (part2, part3) = rest.split_at(16);

        let frag0 = fragment_frame(77, 0, true, part1, Some((1, flags::PSH | flags::ACK)));
        let frag1 = fragment_frame(77, 4, true, part2, None);
        let frag2 = fragment_frame(77, 6, false, part3, None);

        mgr.process_frame(ts(1, 0), &frag0).unwrap();
        mgr.process_frame(ts(1, 1), &frag1).unwrap();
        assert_eq!(mgr.queries_seen(), 0);
        mgr.process_frame(ts(1, 2), &frag2).unwrap();
        assert_eq!(mgr.queries_seen(), 1);
    }

    /// Build an IPv4 fragment frame. Offset 0 carries a TCP header.
    fn fragment_frame(
        ip_id: u16,
        offset_units: u16,
        more: bool,
        payload: &[u8],
        tcp: Option<(u32, u8)>,
    ) -> Vec<u8> {
        let mut frame = vec![0u8; 14];
        frame[12] = 0x08;

        let tcp_len = if tcp.is_some() { 20 } else { 0 };
        let total_len = (20 + tcp_len + payload.len()) as u16;
        let mut ip = [0u8; 20];
        ip[0] = 0x45;
        ip[2..4].copy_from_slice(&total_len.to_be_bytes());
        ip[4..6].copy_from_slice(&ip_id.to_be_bytes());
        let frag_field = offset_units | if more { 0x2000 } else { 0 };
        ip[6..8].copy_from_slice(&frag_field.to_be_bytes());
        ip[8] = 64;
        ip[9] = 6;
        ip[12..16].copy_from_slice(&CLIENT_IP);
        ip[16..20].copy_from_slice(&SERVER_IP);
        frame.extend_from_slice(&ip);

        if let Some((seq, tcp_flags)) = tcp {
            let mut hdr = [0u8; 20];
            hdr[0..2].copy_from_slice(&CLIENT_PORT.to_be_bytes());
            hdr[2..4].copy_from_slice(&SERVER_PORT.to_be_bytes());
            hdr[4..8].copy_from_slice(&seq.to_be_bytes());
            hdr[12] = 0x50;
            hdr[13] = tcp_flags;
            frame.extend_from_slice(&hdr);
        }
        frame.extend_from_slice(payload);
        frame
    }

    /// Round-trip: record while processing, replay the recording, get
    /// the same query/latency sequence.
    #[test]
    fn recording_round_trip() {
        let path = {
            let mut p = std::env::temp_dir();
            p.push(format!("mysqlscope-mgr-{}-rt.mcap", std::process::id()));
            p
        };

        let recorder = RecordingWriter::create(&path).unwrap();
        let mut direct = StreamManager::new(config(), SharedStats::new(Vec::new()), Some(recorder), None);

        for (i, q) in ["SELECT a FROM t1", "SELECT b FROM t2 WHERE x = 1"].iter().enumerate() {
            let seq = (i as u32) * 100 + 1;
            direct
                .process_frame(
                    ts(50 + i as i64, 0),
                    &client_frame(seq, flags::PSH | flags::ACK, &com_query(0, q)),
                )
                .unwrap();
            direct
                .process_frame(
                    ts(50 + i as i64, 25_000),
                    &server_frame(seq, flags::ACK, &mysql_packet(1, &[EOF_MARKER])),
                )
                .unwrap();
        }
        direct.finish().unwrap();

        let mut replayed = manager();
        let mut reader = RecordingReader::open(&path).unwrap();
        while let Some(record) = reader.next_record().unwrap() {
            replayed.process_record(record).unwrap();
        }
        replayed.finish().unwrap();

        let direct_slow: Vec<(String, u64)> = direct
            .slow_queries()
            .iter()
            .map(|q| (q.text.clone(), (q.exec_time * 1e6) as u64))
            .collect();
        let replayed_slow: Vec<(String, u64)> = replayed
            .slow_queries()
            .iter()
            .map(|q| (q.text.clone(), (q.exec_time * 1e6) as u64))
            .collect();
        assert_eq!(direct_slow, replayed_slow);
        assert_eq!(direct_slow.len(), 2);

        std::fs::remove_file(&path).unwrap();
    }

    #[test]
    fn could_be_query_heuristic() {
        assert!(could_be_query(&com_query(0, "SELECT 1")));
        assert!(could_be_query(&com_query(0, "show processlist")));
        assert!(could_be_query(&com_query(0, "CALL my_proc()")));
        // Not a COM_QUERY opcode.
        assert!(!could_be_query(&mysql_packet(0, &[0x16, b'S', b'E', b'L', b'E', b'C', b'T'])));
        // COM_QUERY opcode but no statement keyword.
        assert!(!could_be_query(&com_query(0, "BEGIN")));
        assert!(!could_be_query(b"shrt"));
    }

    #[test]
    fn stream_key_packs_ip_and_port() {
        let key = stream_key(Ipv4Addr::new(10, 0, 0, 1), 40000);
        assert_eq!(key >> 32, u32::from(Ipv4Addr::new(10, 0, 0, 1)) as u64);
        assert_eq!(key & 0xFFFF_FFFF, 40000);
    }
}
