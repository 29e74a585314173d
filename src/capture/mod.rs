//! Capture input using libpcap.
//!
//! Provides an abstraction over the `pcap` crate for reading capture
//! files, plus the heuristic link-layer offset detector.

pub mod engine;
