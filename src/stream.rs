//! Per-connection MySQL stream reconstruction.
//!
//! A stream owns the framing state for one TCP connection between a
//! MySQL client and the server: the 4-byte pending header accumulator,
//! the packet currently being filled, the most recent query awaiting
//! its EOF, and the per-direction sequence slots used for retransmit
//! suppression. Completed packets are classified here and surfaced as
//! [`StreamEvent`]s; the manager decides what to do with them
//! (recording, statistics, worker dispatch).

use crate::codec;
use crate::protocol::mysql::{
    Direction, MemCounters, MysqlPacket, WireTime, MAX_PAYLOAD_LEN,
};
use crate::replay::ReplayHandle;
use std::net::Ipv4Addr;
use std::sync::Arc;

/// What a completed packet turned out to be.
#[derive(Debug)]
pub enum StreamEvent {
    /// A completed COM_QUERY head packet.
    Query(Arc<MysqlPacket>),
    /// A continuation packet of an oversized (0xFFFFFF) command.
    Continuation(Arc<MysqlPacket>),
    /// The EOF closing the tracked query, with the capture-derived
    /// execution time.
    QueryClosed {
        query: Arc<MysqlPacket>,
        eof: Arc<MysqlPacket>,
        exec_time: f64,
    },
}

/// One reconstructed client/server connection.
pub struct MysqlStream {
    pub client_ip: Ipv4Addr,
    pub client_port: u16,
    pub server_ip: Ipv4Addr,
    pub server_port: u16,
    pub key: u64,

    // MySQL packet framer: pending header + packet being filled.
    hdr: [u8; 4],
    hdr_len: usize,
    current: Option<MysqlPacket>,

    /// Most recent completed query, awaiting its EOF.
    last_query: Option<Arc<MysqlPacket>>,
    /// The previous client command had the sentinel length; the next
    /// client packets are its continuations.
    awaiting_continuation: bool,

    /// Last accepted TCP sequence number, one slot per direction.
    last_seq: [Option<u32>; 2],

    /// Replay worker feeding off this stream, when replay is enabled.
    pub worker: Option<ReplayHandle>,

    counters: Arc<MemCounters>,
    // Framer conservation bookkeeping (exercised by tests).
    total_appended: u64,
    completed_declared: u64,
    completed_packets: u64,
}

impl MysqlStream {
    pub fn new(
        client_ip: Ipv4Addr,
        client_port: u16,
        server_ip: Ipv4Addr,
        server_port: u16,
        key: u64,
        counters: Arc<MemCounters>,
    ) -> Self {
        MysqlStream {
            client_ip,
            client_port,
            server_ip,
            server_port,
            key,
            hdr: [0; 4],
            hdr_len: 0,
            current: None,
            last_query: None,
            awaiting_continuation: false,
            last_seq: [None, None],
            worker: None,
            counters,
            total_appended: 0,
            completed_declared: 0,
            completed_packets: 0,
        }
    }

    /// Retransmit suppression: admit a segment only when its sequence
    /// number advances past the last accepted one (wrapping), or no
    /// sequence has been seen in this direction yet.
    pub fn accept_seq(&mut self, direction: Direction, seq: u32) -> bool {
        let slot = match direction {
            Direction::ClientToServer => &mut self.last_seq[0],
            Direction::ServerToClient => &mut self.last_seq[1],
        };
        match *slot {
            None => {
                *slot = Some(seq);
                true
            }
            Some(last) => {
                if seq.wrapping_sub(last) as i32 > 0 {
                    *slot = Some(seq);
                    true
                } else {
                    false
                }
            }
        }
    }

    /// Feed reassembled TCP payload bytes through the framer.
    ///
    /// Never reorders bytes; a packet's declared length is fixed when
    /// its header completes, and its timestamp is that of the segment
    /// that carried the first header byte.
    pub fn append(&mut self, ts: WireTime, bytes: &[u8], direction: Direction) -> Vec<StreamEvent> {
        let mut events = Vec::new();
        let mut rest = bytes;
        self.total_appended += bytes.len() as u64;

        while !rest.is_empty() {
            if self.current.is_none() {
                let need = self.hdr.len() - self.hdr_len;
                let take = need.min(rest.len());
                self.hdr[self.hdr_len..self.hdr_len + take].copy_from_slice(&rest[..take]);
                self.hdr_len += take;
                rest = &rest[take..];

                if self.hdr_len < self.hdr.len() {
                    return events;
                }

                let declared = codec::read_u24(&self.hdr);
                self.hdr_len = 0;
                self.current = Some(MysqlPacket::new(direction, ts, declared, &self.counters));
            }

            let pkt = self.current.as_mut().unwrap();
            let took = pkt.append(rest);
            rest = &rest[took..];

            if pkt.is_complete() {
                let pkt = self.current.take().unwrap();
                self.on_packet_complete(pkt, &mut events);
            }
        }
        events
    }

    /// Inject an already-complete packet (recording input path).
    pub fn ingest_packet(&mut self, pkt: MysqlPacket) -> Vec<StreamEvent> {
        let mut events = Vec::new();
        self.total_appended += 4 + pkt.declared_len() as u64;
        self.on_packet_complete(pkt, &mut events);
        events
    }

    fn on_packet_complete(&mut self, pkt: MysqlPacket, events: &mut Vec<StreamEvent>) {
        self.completed_declared += pkt.declared_len() as u64;
        self.completed_packets += 1;
        tracing::trace!(
            key = self.key,
            len = pkt.declared_len(),
            dir = ?pkt.direction(),
            "packet complete"
        );

        match pkt.direction() {
            Direction::ClientToServer => {
                if self.awaiting_continuation {
                    if pkt.declared_len() < MAX_PAYLOAD_LEN {
                        self.awaiting_continuation = false;
                    }
                    events.push(StreamEvent::Continuation(Arc::new(pkt)));
                } else if pkt.is_query() {
                    let pkt = Arc::new(pkt);
                    self.last_query = Some(Arc::clone(&pkt));
                    if pkt.declared_len() == MAX_PAYLOAD_LEN {
                        self.awaiting_continuation = true;
                    }
                    events.push(StreamEvent::Query(pkt));
                }
                // Other client commands (auth, quit, ...) are dropped here.
            }
            Direction::ServerToClient => {
                if pkt.is_eof() {
                    if let Some(query) = self.last_query.take() {
                        let eof = Arc::new(pkt);
                        let exec_time = eof.ts().secs_since(query.ts());
                        events.push(StreamEvent::QueryClosed {
                            query,
                            eof,
                            exec_time,
                        });
                    }
                }
                // Server packets that are not the matching EOF are not
                // interesting and are dropped immediately.
            }
        }
    }

    /// Bytes the framer has consumed so far.
    pub fn total_appended(&self) -> u64 {
        self.total_appended
    }

    /// Declared lengths of packets completed so far, plus the 4 header
    /// bytes each one consumed, plus the partial state still in flight.
    /// Always equals [`total_appended`](Self::total_appended).
    pub fn accounted_bytes(&self) -> u64 {
        let partial_pkt = self
            .current
            .as_ref()
            .map(|p| 4 + p.filled() as u64)
            .unwrap_or(0);
        self.completed_declared + 4 * self.completed_packets + self.hdr_len as u64 + partial_pkt
    }

    pub fn has_partial_packet(&self) -> bool {
        self.current.is_some() || self.hdr_len > 0
    }
}
