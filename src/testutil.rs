//! Shared builders for synthetic Ethernet/IPv4/TCP frames used by the
//! unit tests. Mirrors the layout helpers in `benches/framing.rs`.

/// Build a captured frame: `offset` opaque link-layer bytes, an IPv4
/// header, a 20-byte TCP header and `payload`.
#[allow(clippy::too_many_arguments)]
pub fn build_frame(
    offset: usize,
    src_ip: [u8; 4],
    dst_ip: [u8; 4],
    src_port: u16,
    dst_port: u16,
    seq: u32,
    tcp_flags: u8,
    payload: &[u8],
) -> Vec<u8> {
    let mut frame = vec![0u8; offset];
    if offset >= 14 {
        // Make the link layer look like Ethernet II carrying IPv4.
        frame[12] = 0x08;
        frame[13] = 0x00;
    }

    let total_len = (20 + 20 + payload.len()) as u16;
    let mut ip = [0u8; 20];
    ip[0] = 0x45;
    ip[2..4].copy_from_slice(&total_len.to_be_bytes());
    ip[4..6].copy_from_slice(&[0x00, 0x01]); // identification
    ip[6] = 0x40; // DF
    ip[8] = 64; // TTL
    ip[9] = 6; // TCP
    ip[12..16].copy_from_slice(&src_ip);
    ip[16..20].copy_from_slice(&dst_ip);
    frame.extend_from_slice(&ip);

    let mut tcp = [0u8; 20];
    tcp[0..2].copy_from_slice(&src_port.to_be_bytes());
    tcp[2..4].copy_from_slice(&dst_port.to_be_bytes());
    tcp[4..8].copy_from_slice(&seq.to_be_bytes());
    tcp[12] = 0x50; // data offset = 5
    tcp[13] = tcp_flags;
    tcp[14..16].copy_from_slice(&65535u16.to_be_bytes());
    frame.extend_from_slice(&tcp);

    frame.extend_from_slice(payload);
    frame
}

/// A MySQL wire packet: 3-byte LE length + 1-byte sequence + payload.
pub fn mysql_packet(seq: u8, payload: &[u8]) -> Vec<u8> {
    let mut out = Vec::with_capacity(4 + payload.len());
    let len = payload.len() as u32;
    out.push((len & 0xFF) as u8);
    out.push(((len >> 8) & 0xFF) as u8);
    out.push(((len >> 16) & 0xFF) as u8);
    out.push(seq);
    out.extend_from_slice(payload);
    out
}

/// A COM_QUERY wire packet for the given SQL text.
pub fn com_query(seq: u8, sql: &str) -> Vec<u8> {
    let mut payload = Vec::with_capacity(1 + sql.len());
    payload.push(crate::protocol::mysql::COM_QUERY);
    payload.extend_from_slice(sql.as_bytes());
    mysql_packet(seq, &payload)
}
