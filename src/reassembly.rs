//! IPv4 fragment reassembly.
//!
//! Fragmented datagrams are held here until TCP parsing consumes them.
//! The first fragment (offset 0) carries the TCP header and the head of
//! the payload; every later fragment is raw payload to append once the
//! owning stream is known. Fragments are keyed by the IPv4
//! identification field and kept ordered by fragment offset.
//!
//! There is no failure mode: malformed fragmentation metadata just
//! leaves a list behind that is never drained, and that memory goes
//! away with the reassembler.

use std::collections::HashMap;

/// One buffered fragment: its byte offset within the datagram and its
/// payload copy.
#[derive(Debug)]
pub struct Fragment {
    pub offset: usize,
    pub data: Vec<u8>,
}

/// Pending fragments for all in-flight datagrams.
#[derive(Debug, Default)]
pub struct IpReassembler {
    pending: HashMap<u16, Vec<Fragment>>,
}

impl IpReassembler {
    pub fn new() -> Self {
        IpReassembler::default()
    }

    /// Insert a fragment into the offset-ordered list for `ip_id`.
    ///
    /// The insertion point is found by walking from the tail backward;
    /// captures deliver fragments in order almost always, so this is
    /// amortized O(1). Duplicate offsets are accepted in arbitrary
    /// relative order.
    pub fn enqueue(&mut self, ip_id: u16, offset: usize, payload: &[u8]) {
        let list = self.pending.entry(ip_id).or_default();
        let mut at = list.len();
        while at > 0 && list[at - 1].offset >= offset {
            at -= 1;
        }
        list.insert(
            at,
            Fragment {
                offset,
                data: payload.to_vec(),
            },
        );
    }

    /// Are fragments pending for this datagram?
    pub fn has(&self, ip_id: u16) -> bool {
        self.pending.contains_key(&ip_id)
    }

    /// The head fragment's bytes (TCP header + payload head), if any.
    pub fn first(&self, ip_id: u16) -> Option<&[u8]> {
        self.pending
            .get(&ip_id)
            .and_then(|list| list.first())
            .map(|frag| frag.data.as_slice())
    }

    /// Remove the list for `ip_id` and return every fragment after the
    /// head, still in offset order. The caller appends them to the
    /// destination stream.
    pub fn drain_tail(&mut self, ip_id: u16) -> Vec<Fragment> {
        match self.pending.remove(&ip_id) {
            Some(mut list) => {
                if !list.is_empty() {
                    list.remove(0);
                }
                list
            }
            None => Vec::new(),
        }
    }

    /// Number of datagrams with fragments pending.
    pub fn len(&self) -> usize {
        self.pending.len()
    }

    pub fn is_empty(&self) -> bool {
        self.pending.is_empty()
    }
}
