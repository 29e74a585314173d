//! Capture input: opens a pcap file and yields raw frame data, and
//! figures out where the IPv4 header starts in each frame.
//!
//! The link-layer offset is not derived from EtherType parsing: VLAN
//! tags, driver padding and odd link types make that unreliable on real
//! captures. Instead offsets 14..=22 are probed until one of them
//! starts a structurally valid IPv4 header; the first hit is cached and
//! re-probed only after a run of parse failures.

use pcap::{Capture, Offline};
use std::fmt;
use std::path::Path;

/// Smallest link-layer header worth probing (Ethernet II).
const MIN_LINK_OFFSET: usize = 14;
/// Largest offset probed (802.3/LLC/SNAP, VLAN-tagged and padded frames).
const MAX_LINK_OFFSET: usize = 22;
/// Consecutive parse failures before the cached offset is re-detected.
const REDETECT_AFTER: u32 = 16;

const IPV4_MIN_HEADER_LEN: usize = 20;

/// Errors from the capture engine.
#[derive(Debug)]
pub enum CaptureError {
    /// pcap error.
    Pcap(pcap::Error),
}

impl fmt::Display for CaptureError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CaptureError::Pcap(e) => write!(f, "pcap error: {}", e),
        }
    }
}

impl std::error::Error for CaptureError {}

impl From<pcap::Error> for CaptureError {
    fn from(e: pcap::Error) -> Self {
        CaptureError::Pcap(e)
    }
}

/// Open a capture file for offline reading.
pub fn open_file(path: &Path) -> Result<Capture<Offline>, CaptureError> {
    let cap = Capture::from_file(path)?;
    tracing::info!(file = %path.display(), "capture opened");
    Ok(cap)
}

/// Is there a structurally valid IPv4 header at `offset`?
fn is_valid_ipv4_at(frame: &[u8], offset: usize) -> bool {
    if offset + IPV4_MIN_HEADER_LEN > frame.len() {
        return false;
    }
    let ip = &frame[offset..];
    if (ip[0] >> 4) & 0x0F != 4 {
        return false;
    }
    let ihl = (ip[0] & 0x0F) as usize;
    if ihl < 5 {
        return false;
    }
    let total_length = u16::from_be_bytes([ip[2], ip[3]]) as usize;
    if total_length < ihl * 4 {
        return false;
    }
    // The whole datagram must fit in the captured bytes.
    total_length <= frame.len() - offset
}

/// Probe offsets 14..=22 and return the first that starts a valid IPv4
/// header.
pub fn detect_link_offset(frame: &[u8]) -> Option<usize> {
    (MIN_LINK_OFFSET..=MAX_LINK_OFFSET).find(|&offset| is_valid_ipv4_at(frame, offset))
}

/// Cached link-layer offset: pinned by the operator, or detected from
/// the first parseable frame and re-detected after repeated failures.
#[derive(Debug)]
pub struct LinkOffset {
    pinned: Option<usize>,
    cached: Option<usize>,
    failures: u32,
}

impl LinkOffset {
    pub fn new(pinned: Option<usize>) -> Self {
        LinkOffset {
            pinned,
            cached: None,
            failures: 0,
        }
    }

    /// The offset to parse this frame at, detecting and caching if
    /// needed. `None` when no offset yields a valid IPv4 header.
    pub fn offset_for(&mut self, frame: &[u8]) -> Option<usize> {
        if let Some(pinned) = self.pinned {
            return Some(pinned);
        }
        if let Some(cached) = self.cached {
            return Some(cached);
        }
        match detect_link_offset(frame) {
            Some(found) => {
                tracing::info!(offset = found, "link-layer offset detected");
                self.cached = Some(found);
                Some(found)
            }
            None => None,
        }
    }

    /// A frame at the cached offset failed to parse. After enough
    /// consecutive failures the cache is dropped and the next frame
    /// re-detects.
    pub fn note_failure(&mut self) {
        if self.pinned.is_some() {
            return;
        }
        self.failures += 1;
        if self.failures >= REDETECT_AFTER && self.cached.is_some() {
            tracing::warn!(
                failures = self.failures,
                "link-layer offset no longer parses, re-detecting"
            );
            self.cached = None;
            self.failures = 0;
        }
    }

    pub fn note_success(&mut self) {
        self.failures = 0;
    }
}
