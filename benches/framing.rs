//! Criterion benchmarks for the mysqlscope hot path:
//! - `protocol::parse_tcp_frame` (zero-copy header parsing)
//! - `MysqlStream::append` (MySQL packet framing)
//! - `StreamManager::process_frame` (full frame dispatch)

use criterion::{black_box, criterion_group, criterion_main, Criterion, Throughput};
use std::net::Ipv4Addr;
use std::sync::Arc;

use mysqlscope::manager::{ManagerConfig, StreamManager};
use mysqlscope::protocol;
use mysqlscope::protocol::mysql::{Direction, MemCounters, WireTime};
use mysqlscope::stats::SharedStats;
use mysqlscope::stream::MysqlStream;

const CLIENT_IP: [u8; 4] = [10, 0, 0, 1];
const SERVER_IP: [u8; 4] = [10, 0, 0, 2];
const SERVER_PORT: u16 = 3306;

/// Build a captured frame: 14-byte Ethernet II header, IPv4, TCP, payload.
fn make_frame(src_port: u16, dst_port: u16, seq: u32, flags: u8, payload: &[u8]) -> Vec<u8> {
    let mut pkt = vec![0u8; 14 + 20 + 20 + payload.len()];

    // Ethernet header
    pkt[0..6].copy_from_slice(&[0xff, 0xff, 0xff, 0xff, 0xff, 0xff]);
    pkt[6..12].copy_from_slice(&[0x00, 0x11, 0x22, 0x33, 0x44, 0x55]);
    pkt[12] = 0x08;
    pkt[13] = 0x00;

    // IPv4 header
    let (src_ip, dst_ip) = if dst_port == SERVER_PORT {
        (CLIENT_IP, SERVER_IP)
    } else {
        (SERVER_IP, CLIENT_IP)
    };
    let ip_total: u16 = (20 + 20 + payload.len()) as u16;
    let ip = &mut pkt[14..34];
    ip[0] = 0x45;
    ip[2..4].copy_from_slice(&ip_total.to_be_bytes());
    ip[8] = 64;
    ip[9] = 6;
    ip[12..16].copy_from_slice(&src_ip);
    ip[16..20].copy_from_slice(&dst_ip);

    // TCP header
    let tcp = &mut pkt[34..54];
    tcp[0..2].copy_from_slice(&src_port.to_be_bytes());
    tcp[2..4].copy_from_slice(&dst_port.to_be_bytes());
    tcp[4..8].copy_from_slice(&seq.to_be_bytes());
    tcp[12] = 0x50; // data offset = 5
    tcp[13] = flags;
    tcp[14..16].copy_from_slice(&65535u16.to_be_bytes());

    pkt[54..].copy_from_slice(payload);
    pkt
}

/// A COM_QUERY wire packet for the given SQL text.
fn make_com_query(sql: &str) -> Vec<u8> {
    let len = (sql.len() + 1) as u32;
    let mut out = Vec::with_capacity(4 + sql.len() + 1);
    out.push((len & 0xFF) as u8);
    out.push(((len >> 8) & 0xFF) as u8);
    out.push(((len >> 16) & 0xFF) as u8);
    out.push(0); // sequence
    out.push(0x03); // COM_QUERY
    out.extend_from_slice(sql.as_bytes());
    out
}

fn bench_parse_frame(c: &mut Criterion) {
    let query = make_com_query("SELECT id, name FROM customers WHERE region = 'EU'");
    let frame = make_frame(40000, SERVER_PORT, 1000, 0x18, &query);

    let mut group = c.benchmark_group("parse_frame");
    group.throughput(Throughput::Bytes(frame.len() as u64));
    group.bench_function("ipv4_tcp", |b| {
        b.iter(|| {
            let _ = protocol::parse_tcp_frame(black_box(&frame), 14);
        })
    });
    group.finish();
}

fn bench_stream_append(c: &mut Criterion) {
    let query = make_com_query("SELECT id, name FROM customers WHERE region = 'EU'");

    let mut group = c.benchmark_group("stream_append");
    group.throughput(Throughput::Bytes(query.len() as u64));

    group.bench_function("one_query_packet", |b| {
        let counters = MemCounters::new();
        let mut stream = MysqlStream::new(
            Ipv4Addr::from(CLIENT_IP),
            40000,
            Ipv4Addr::from(SERVER_IP),
            SERVER_PORT,
            1,
            Arc::clone(&counters),
        );
        let mut ts = 0i64;
        b.iter(|| {
            let events = stream.append(
                WireTime::new(ts, 0),
                black_box(&query),
                Direction::ClientToServer,
            );
            ts += 1;
            events
        })
    });

    group.finish();
}

fn bench_dispatch(c: &mut Criterion) {
    let query = make_com_query("SELECT id, name FROM customers WHERE region = 'EU'");

    let mut group = c.benchmark_group("dispatch");
    group.throughput(Throughput::Elements(1));

    group.bench_function("process_frame_existing_stream", |b| {
        let mut mgr = StreamManager::new(
            ManagerConfig {
                server_ip: Ipv4Addr::from(SERVER_IP),
                server_port: SERVER_PORT,
                slow_queries: 10,
                link_offset: None,
            },
            SharedStats::new(Vec::new()),
            None,
            None,
        );
        let mut seq = 1u32;
        let mut usec = 0i64;
        b.iter(|| {
            let frame = make_frame(40000, SERVER_PORT, seq, 0x18, &query);
            mgr.process_frame(WireTime::new(1, usec), black_box(&frame)).unwrap();
            seq = seq.wrapping_add(query.len() as u32);
            usec += 1;
        })
    });

    group.finish();
}

criterion_group!(benches, bench_parse_frame, bench_stream_append, bench_dispatch);
criterion_main!(benches);
