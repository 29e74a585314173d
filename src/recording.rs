//! The replay recording format.
//!
//! Layout: a 6-byte header (`"MCAP"` magic + u16 LE version), then a
//! sequence of per-packet records:
//!
//! ```text
//! +---------+-----------+---------+----------+---------+-----------+
//! | key u64 | direction | sec u64 | usec u64 | len u32 | payload.. |
//! +---------+-----------+---------+----------+---------+-----------+
//! ```
//!
//! The key is the stream key `(client_ip << 32) | client_port`; a
//! record with payload length zero closes that stream and carries no
//! payload bytes. Records are positional, not self-describing: the
//! reader consumes exactly one record at a time and stops cleanly on a
//! short read — a truncated file and a cleanly closed one are
//! indistinguishable, and no partial record ever surfaces.

use crate::codec::{read_uint, store_uint};
use crate::protocol::mysql::{Direction, MysqlPacket, WireTime};
use std::fmt;
use std::fs::File;
use std::io::{self, BufReader, BufWriter, Read, Write};
use std::path::Path;

pub const MAGIC: [u8; 4] = *b"MCAP";
pub const VERSION: u16 = 1;

const RECORD_HEADER_LEN: usize = 8 + 1 + 8 + 8 + 4;

#[derive(Debug)]
pub enum RecordingError {
    Io(io::Error),
    BadMagic([u8; 4]),
    BadVersion(u16),
    BadDirection(u8),
}

impl fmt::Display for RecordingError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RecordingError::Io(e) => write!(f, "recording io error: {}", e),
            RecordingError::BadMagic(m) => {
                write!(f, "not a recording file (magic {:02x?})", m)
            }
            RecordingError::BadVersion(v) => {
                write!(f, "unsupported recording version {} (have {})", v, VERSION)
            }
            RecordingError::BadDirection(d) => write!(f, "invalid direction byte {}", d),
        }
    }
}

impl std::error::Error for RecordingError {}

impl From<io::Error> for RecordingError {
    fn from(e: io::Error) -> Self {
        RecordingError::Io(e)
    }
}

/// One decoded record. An empty payload means "stream end".
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RecordingRecord {
    pub key: u64,
    pub direction: Direction,
    pub ts: WireTime,
    pub payload: Vec<u8>,
}

impl RecordingRecord {
    pub fn is_stream_end(&self) -> bool {
        self.payload.is_empty()
    }
}

pub struct RecordingWriter {
    out: BufWriter<File>,
}

impl RecordingWriter {
    pub fn create(path: &Path) -> Result<Self, RecordingError> {
        let file = File::create(path)?;
        let mut out = BufWriter::new(file);
        out.write_all(&MAGIC)?;
        out.write_all(&VERSION.to_le_bytes())?;
        Ok(RecordingWriter { out })
    }

    fn write_record(
        &mut self,
        key: u64,
        direction: Direction,
        ts: WireTime,
        payload: &[u8],
    ) -> Result<(), RecordingError> {
        let mut hdr = [0u8; RECORD_HEADER_LEN];
        store_uint(&mut hdr[0..], key, 8);
        hdr[8] = direction.to_byte();
        store_uint(&mut hdr[9..], ts.sec as u64, 8);
        store_uint(&mut hdr[17..], ts.usec as u64, 8);
        store_uint(&mut hdr[25..], payload.len() as u64, 4);
        self.out.write_all(&hdr)?;
        self.out.write_all(payload)?;
        Ok(())
    }

    pub fn write_packet(&mut self, key: u64, pkt: &MysqlPacket) -> Result<(), RecordingError> {
        self.write_record(key, pkt.direction(), pkt.ts(), pkt.payload())
    }

    /// Zero-length record: in-band end-of-stream marker.
    pub fn write_stream_end(&mut self, key: u64, ts: WireTime) -> Result<(), RecordingError> {
        self.write_record(key, Direction::ClientToServer, ts, &[])
    }

    pub fn finish(mut self) -> Result<(), RecordingError> {
        self.out.flush()?;
        Ok(())
    }
}

pub struct RecordingReader {
    inp: BufReader<File>,
}

impl RecordingReader {
    pub fn open(path: &Path) -> Result<Self, RecordingError> {
        let file = File::open(path)?;
        let mut inp = BufReader::new(file);
        let mut magic = [0u8; 4];
        inp.read_exact(&mut magic)?;
        if magic != MAGIC {
            return Err(RecordingError::BadMagic(magic));
        }
        let mut version = [0u8; 2];
        inp.read_exact(&mut version)?;
        let version = u16::from_le_bytes(version);
        if version != VERSION {
            return Err(RecordingError::BadVersion(version));
        }
        Ok(RecordingReader { inp })
    }

    /// Next record, or `None` at end of input. A short read mid-record
    /// also ends the stream cleanly (with a warning) — truncation is
    /// not fatal.
    pub fn next_record(&mut self) -> Result<Option<RecordingRecord>, RecordingError> {
        let mut hdr = [0u8; RECORD_HEADER_LEN];
        match read_fully(&mut self.inp, &mut hdr)? {
            0 => return Ok(None),
            n if n < RECORD_HEADER_LEN => {
                tracing::warn!(got = n, "recording truncated mid-record header");
                return Ok(None);
            }
            _ => {}
        }

        let key = read_uint(&hdr[0..], 8);
        let direction =
            Direction::from_byte(hdr[8]).ok_or(RecordingError::BadDirection(hdr[8]))?;
        let ts = WireTime::new(read_uint(&hdr[9..], 8) as i64, read_uint(&hdr[17..], 8) as i64);
        let len = read_uint(&hdr[25..], 4) as usize;

        let mut payload = vec![0u8; len];
        let got = read_fully(&mut self.inp, &mut payload)?;
        if got < len {
            tracing::warn!(want = len, got, "recording truncated mid-record payload");
            return Ok(None);
        }

        Ok(Some(RecordingRecord {
            key,
            direction,
            ts,
            payload,
        }))
    }
}

/// Read until `buf` is full or EOF; returns how many bytes landed.
fn read_fully<R: Read>(inp: &mut R, buf: &mut [u8]) -> io::Result<usize> {
    let mut filled = 0;
    while filled < buf.len() {
        match inp.read(&mut buf[filled..]) {
            Ok(0) => break,
            Ok(n) => filled += n,
            Err(e) if e.kind() == io::ErrorKind::Interrupted => {}
            Err(e) => return Err(e),
        }
    }
    Ok(filled)
}

/// Sniff the first bytes of `path` for the recording magic.
pub fn looks_like_recording(path: &Path) -> io::Result<bool> {
    let mut file = File::open(path)?;
    let mut magic = [0u8; 4];
    let got = read_fully(&mut file, &mut magic)?;
    Ok(got == 4 && magic == MAGIC)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::mysql::MemCounters;
    use std::fs;
    use std::path::PathBuf;

    fn temp_path(name: &str) -> PathBuf {
        let mut path = std::env::temp_dir();
        path.push(format!("mysqlscope-{}-{}", std::process::id(), name));
        path
    }

    #[test]
    fn round_trip() {
        let path = temp_path("roundtrip.mcap");
        let counters = MemCounters::new();

        let pkt = MysqlPacket::from_payload(
            Direction::ClientToServer,
            WireTime::new(100, 250_000),
            vec![0x03, b'S', b'E', b'L', b'E', b'C', b'T', b' ', b'1'],
            &counters,
        );
        let eof = MysqlPacket::from_payload(
            Direction::ServerToClient,
            WireTime::new(100, 300_000),
            vec![0xFE],
            &counters,
        );

        let mut writer = RecordingWriter::create(&path).unwrap();
        writer.write_packet(42, &pkt).unwrap();
        writer.write_packet(42, &eof).unwrap();
        writer.write_stream_end(42, eof.ts()).unwrap();
        writer.finish().unwrap();

        let mut reader = RecordingReader::open(&path).unwrap();
        let r1 = reader.next_record().unwrap().unwrap();
        assert_eq!(r1.key, 42);
        assert_eq!(r1.direction, Direction::ClientToServer);
        assert_eq!(r1.ts, WireTime::new(100, 250_000));
        assert_eq!(r1.payload, pkt.payload());

        let r2 = reader.next_record().unwrap().unwrap();
        assert_eq!(r2.direction, Direction::ServerToClient);

        let r3 = reader.next_record().unwrap().unwrap();
        assert!(r3.is_stream_end());

        assert!(reader.next_record().unwrap().is_none());
        fs::remove_file(&path).unwrap();
    }

    #[test]
    fn truncated_record_is_not_fatal() {
        let path = temp_path("truncated.mcap");
        let counters = MemCounters::new();
        let pkt = MysqlPacket::from_payload(
            Direction::ClientToServer,
            WireTime::new(1, 0),
            vec![0x03; 64],
            &counters,
        );

        let mut writer = RecordingWriter::create(&path).unwrap();
        writer.write_packet(7, &pkt).unwrap();
        writer.write_packet(7, &pkt).unwrap();
        writer.finish().unwrap();

        // Chop into the second record's payload.
        let full = fs::metadata(&path).unwrap().len();
        let file = fs::OpenOptions::new().write(true).open(&path).unwrap();
        file.set_len(full - 32).unwrap();
        drop(file);

        let mut reader = RecordingReader::open(&path).unwrap();
        assert!(reader.next_record().unwrap().is_some());
        // The partial second record is dropped, not an error.
        assert!(reader.next_record().unwrap().is_none());
        fs::remove_file(&path).unwrap();
    }

    #[test]
    fn rejects_foreign_files() {
        let path = temp_path("bogus.mcap");
        fs::write(&path, b"PCAP....").unwrap();
        assert!(matches!(
            RecordingReader::open(&path),
            Err(RecordingError::BadMagic(_))
        ));
        assert!(!looks_like_recording(&path).unwrap());

        fs::write(&path, [b'M', b'C', b'A', b'P', 9, 0]).unwrap();
        assert!(matches!(
            RecordingReader::open(&path),
            Err(RecordingError::BadVersion(9))
        ));
        assert!(looks_like_recording(&path).unwrap());
        fs::remove_file(&path).unwrap();
    }
}
