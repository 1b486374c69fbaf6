//! Pre-shared key store

use std::fmt;

use crate::crypto::prf::PMK_LEN;
use crate::protocol::suites::{mac_to_string, MacAddr};

#[derive(Clone)]
struct PskEntry {
    /// `None` matches any station
    addr: Option<MacAddr>,
    psk: [u8; PMK_LEN],
}

/// PSKs keyed by station address, with wildcard entries shared by all
#[derive(Clone, Default)]
pub struct PskStore {
    entries: Vec<PskEntry>,
}

impl PskStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add(&mut self, addr: Option<MacAddr>, psk: [u8; PMK_LEN]) {
        self.entries.push(PskEntry { addr, psk });
    }

    /// Candidate PSKs for a station: its own entries first, then wildcards
    pub fn candidates(&self, addr: &MacAddr) -> impl Iterator<Item = &[u8; PMK_LEN]> + '_ {
        let addr = *addr;
        let own = self
            .entries
            .iter()
            .filter(move |e| e.addr == Some(addr));
        let shared = self.entries.iter().filter(|e| e.addr.is_none());
        own.chain(shared).map(|e| &e.psk)
    }

    /// Preferred PSK for a station
    pub fn first(&self, addr: &MacAddr) -> Option<&[u8; PMK_LEN]> {
        self.candidates(addr).next()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

impl fmt::Debug for PskStore {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let addrs: Vec<String> = self
            .entries
            .iter()
            .map(|e| e.addr.as_ref().map(mac_to_string).unwrap_or_else(|| "*".to_string()))
            .collect();
        f.debug_struct("PskStore").field("entries", &addrs).finish()
    }
}
