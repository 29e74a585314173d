//! MySQL protocol packet model.
//!
//! A "packet" here is a single MySQL protocol message as delimited by its
//! 4-byte header (3-byte little-endian payload length + 1-byte sequence
//! number), not a network packet. Framing itself lives in `stream.rs`;
//! this module holds the packet value type and the handful of wire
//! constants the pipeline needs.
//!
//! Reference: <https://dev.mysql.com/doc/dev/mysql-server/latest/page_protocol_basic_packets.html>

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

/// COM_QUERY command opcode (first payload byte of a client query).
pub const COM_QUERY: u8 = 0x03;

/// First payload byte of an EOF packet (server response terminator).
pub const EOF_MARKER: u8 = 0xFE;

/// Sentinel payload length: the command continues in the next packet.
pub const MAX_PAYLOAD_LEN: u32 = 0xFF_FF_FF;

/// Which half of the connection a packet travelled on.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Direction {
    /// Client to server (commands).
    ClientToServer,
    /// Server to client (responses).
    ServerToClient,
}

impl Direction {
    /// Single-byte encoding used by the recording format.
    pub fn to_byte(self) -> u8 {
        match self {
            Direction::ClientToServer => 0,
            Direction::ServerToClient => 1,
        }
    }

    /// Decode the recording-format byte; `None` for anything else.
    pub fn from_byte(b: u8) -> Option<Self> {
        match b {
            0 => Some(Direction::ClientToServer),
            1 => Some(Direction::ServerToClient),
            _ => None,
        }
    }
}

/// Capture timestamp: seconds + microseconds, as pcap records them.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub struct WireTime {
    pub sec: i64,
    pub usec: i64,
}

impl WireTime {
    pub const ZERO: WireTime = WireTime { sec: 0, usec: 0 };

    pub fn new(sec: i64, usec: i64) -> Self {
        WireTime { sec, usec }
    }

    /// Microseconds elapsed since `earlier` (negative if `self` precedes it).
    pub fn micros_since(self, earlier: WireTime) -> i64 {
        (self.sec - earlier.sec) * 1_000_000 + (self.usec - earlier.usec)
    }

    /// Seconds elapsed since `earlier`, as a float.
    pub fn secs_since(self, earlier: WireTime) -> f64 {
        self.micros_since(earlier) as f64 / 1_000_000.0
    }
}

/// Packet-buffer memory accounting, shared by everything that allocates
/// or drops a [`MysqlPacket`].
#[derive(Debug, Default)]
pub struct MemCounters {
    bytes_in_use: AtomicU64,
    pkts_alloced: AtomicU64,
    pkts_freed: AtomicU64,
}

impl MemCounters {
    pub fn new() -> Arc<Self> {
        Arc::new(MemCounters::default())
    }

    fn on_alloc(&self, bytes: u64) {
        self.bytes_in_use.fetch_add(bytes, Ordering::Relaxed);
        self.pkts_alloced.fetch_add(1, Ordering::Relaxed);
    }

    fn on_free(&self, bytes: u64) {
        self.bytes_in_use.fetch_sub(bytes, Ordering::Relaxed);
        self.pkts_freed.fetch_add(1, Ordering::Relaxed);
    }

    pub fn bytes_in_use(&self) -> u64 {
        self.bytes_in_use.load(Ordering::Relaxed)
    }

    pub fn pkts_alloced(&self) -> u64 {
        self.pkts_alloced.load(Ordering::Relaxed)
    }

    pub fn pkts_freed(&self) -> u64 {
        self.pkts_freed.load(Ordering::Relaxed)
    }

    /// Packets currently alive.
    pub fn live_packets(&self) -> u64 {
        self.pkts_alloced() - self.pkts_freed()
    }
}

/// A reconstructed MySQL protocol message.
///
/// The declared length is fixed at creation; the buffer grows
/// monotonically via [`append`](Self::append) until it reaches the
/// declared length, at which point the packet is complete and may be
/// classified. Completed packets are shared as `Arc<MysqlPacket>`
/// between the stream, the replay worker and the recording writer.
#[derive(Debug)]
pub struct MysqlPacket {
    direction: Direction,
    ts: WireTime,
    declared_len: u32,
    data: Vec<u8>,
    counters: Arc<MemCounters>,
}

impl MysqlPacket {
    pub fn new(
        direction: Direction,
        ts: WireTime,
        declared_len: u32,
        counters: &Arc<MemCounters>,
    ) -> Self {
        counters.on_alloc(declared_len as u64);
        MysqlPacket {
            direction,
            ts,
            declared_len,
            data: Vec::with_capacity(declared_len as usize),
            counters: Arc::clone(counters),
        }
    }

    /// Build an already-complete packet from a recorded payload.
    pub fn from_payload(
        direction: Direction,
        ts: WireTime,
        payload: Vec<u8>,
        counters: &Arc<MemCounters>,
    ) -> Self {
        counters.on_alloc(payload.len() as u64);
        MysqlPacket {
            direction,
            ts,
            declared_len: payload.len() as u32,
            data: payload,
            counters: Arc::clone(counters),
        }
    }

    pub fn direction(&self) -> Direction {
        self.direction
    }

    pub fn ts(&self) -> WireTime {
        self.ts
    }

    pub fn declared_len(&self) -> u32 {
        self.declared_len
    }

    pub fn filled(&self) -> usize {
        self.data.len()
    }

    pub fn is_complete(&self) -> bool {
        self.data.len() == self.declared_len as usize
    }

    /// Copy bytes into the packet up to its declared length.
    /// Returns how many bytes were consumed from `bytes`.
    pub fn append(&mut self, bytes: &[u8]) -> usize {
        let missing = self.declared_len as usize - self.data.len();
        let take = missing.min(bytes.len());
        self.data.extend_from_slice(&bytes[..take]);
        take
    }

    pub fn payload(&self) -> &[u8] {
        &self.data
    }

    /// A complete client command whose opcode is COM_QUERY.
    pub fn is_query(&self) -> bool {
        self.direction == Direction::ClientToServer
            && self.is_complete()
            && self.data.first() == Some(&COM_QUERY)
    }

    /// A complete server packet whose first byte is the EOF marker.
    pub fn is_eof(&self) -> bool {
        self.direction == Direction::ServerToClient
            && self.is_complete()
            && self.data.first() == Some(&EOF_MARKER)
    }

    /// Query text of a COM_QUERY packet (payload minus the opcode byte).
    pub fn query_bytes(&self) -> Option<&[u8]> {
        if self.is_query() {
            Some(&self.data[1..])
        } else {
            None
        }
    }
}

impl Drop for MysqlPacket {
    fn drop(&mut self) {
        self.counters.on_free(self.declared_len as u64);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn append_stops_at_declared_length() {
        let counters = MemCounters::new();
        let mut pkt = MysqlPacket::new(
            Direction::ClientToServer,
            WireTime::new(1, 0),
            4,
            &counters,
        );
        assert!(!pkt.is_complete());
        assert_eq!(pkt.append(&[0x03, b'S', b'E', b'L', b'E', b'C']), 4);
        assert!(pkt.is_complete());
        assert_eq!(pkt.payload(), &[0x03, b'S', b'E', b'L']);
        // A complete packet takes nothing more.
        assert_eq!(pkt.append(&[0xFF]), 0);
    }

    #[test]
    fn classification() {
        let counters = MemCounters::new();
        let mut query = MysqlPacket::new(
            Direction::ClientToServer,
            WireTime::ZERO,
            3,
            &counters,
        );
        query.append(&[COM_QUERY, b'h', b'i']);
        assert!(query.is_query());
        assert!(!query.is_eof());
        assert_eq!(query.query_bytes(), Some(&b"hi"[..]));

        let mut eof = MysqlPacket::new(
            Direction::ServerToClient,
            WireTime::ZERO,
            1,
            &counters,
        );
        eof.append(&[EOF_MARKER]);
        assert!(eof.is_eof());
        assert!(!eof.is_query());

        // Same first byte but wrong direction is not an EOF.
        let mut client_fe = MysqlPacket::new(
            Direction::ClientToServer,
            WireTime::ZERO,
            1,
            &counters,
        );
        client_fe.append(&[EOF_MARKER]);
        assert!(!client_fe.is_eof());
    }

    #[test]
    fn counters_balance_on_drop() {
        let counters = MemCounters::new();
        {
            let mut pkts = Vec::new();
            for i in 0..5u32 {
                pkts.push(MysqlPacket::new(
                    Direction::ClientToServer,
                    WireTime::ZERO,
                    i + 1,
                    &counters,
                ));
            }
            assert_eq!(counters.pkts_alloced(), 5);
            assert_eq!(counters.live_packets(), 5);
            assert_eq!(counters.bytes_in_use(), 1 + 2 + 3 + 4 + 5);
        }
        assert_eq!(counters.pkts_freed(), 5);
        assert_eq!(counters.live_packets(), 0);
        assert_eq!(counters.bytes_in_use(), 0);
    }

    #[test]
    fn wire_time_deltas() {
        let a = WireTime::new(10, 500_000);
        let b = WireTime::new(10, 550_000);
        assert_eq!(b.micros_since(a), 50_000);
        assert!((b.secs_since(a) - 0.05).abs() < 1e-9);
        assert_eq!(a.micros_since(b), -50_000);
    }
}
