//! HMAC-SHA1 key derivation for IEEE 802.11i
//!
//! Implements the PRF-X expansion used to derive the PTK, the GTK, the
//! authenticator's nonce counter seed and the PMKID.

use std::fmt;
use std::time::{SystemTime, UNIX_EPOCH};

use hmac::{Hmac, Mac};
use sha1::Sha1;

use crate::protocol::suites::{Cipher, MacAddr};

/// HMAC-SHA1 (RFC 2104)
type HmacSha1 = Hmac<Sha1>;

/// Length of an HMAC-SHA1 output block
pub const SHA1_LEN: usize = 20;

/// Pairwise/group master key length
pub const PMK_LEN: usize = 32;

/// ANonce/SNonce/GNonce length
pub const NONCE_LEN: usize = 32;

/// PMKID length (truncated HMAC-SHA1)
pub const PMKID_LEN: usize = 16;

/// EAPOL-Key confirmation key length
pub const KCK_LEN: usize = 16;

/// EAPOL-Key encryption key length
pub const KEK_LEN: usize = 16;

/// Label for PTK expansion
pub const PAIRWISE_LABEL: &str = "Pairwise key expansion";

/// Label for GTK expansion
pub const GROUP_LABEL: &str = "Group key expansion";

/// Label for the nonce counter seed
pub const INIT_COUNTER_LABEL: &str = "Init Counter";

/// Label for PMKID computation
pub const PMKID_LABEL: &str = "PMK Name";

/// Seconds between the NTP epoch (1900) and the Unix epoch
const NTP_EPOCH_OFFSET: u64 = 2_208_988_800;

/// A PMKSA identifier
pub type Pmkid = [u8; PMKID_LEN];

/// HMAC-SHA1 over the concatenation of `parts`
pub fn hmac_sha1(key: &[u8], parts: &[&[u8]]) -> [u8; SHA1_LEN] {
    let mut mac = HmacSha1::new_from_slice(key).expect("HMAC accepts any key length");
    for part in parts {
        mac.update(part);
    }
    mac.finalize().into_bytes().into()
}

/// PRF-X: fill `out` with `HMAC-SHA1(key, label || 0 || data || i)` blocks,
/// `i` counting up from zero, truncated to `out.len()`
pub fn sha1_prf(key: &[u8], label: &str, data: &[u8], out: &mut [u8]) {
    for (counter, chunk) in out.chunks_mut(SHA1_LEN).enumerate() {
        let block = hmac_sha1(key, &[label.as_bytes(), &[0u8], data, &[counter as u8]]);
        chunk.copy_from_slice(&block[..chunk.len()]);
    }
}

/// Derive PTK bytes from the PMK, both addresses and both nonces
///
/// The PRF input is `min(AA,SPA) || max(AA,SPA) || min(AN,SN) || max(AN,SN)`
/// with byte-wise unsigned ordering, so the result does not depend on which
/// side is passed as the authenticator.
pub fn derive_ptk(
    pmk: &[u8],
    aa: &MacAddr,
    spa: &MacAddr,
    anonce: &[u8; NONCE_LEN],
    snonce: &[u8; NONCE_LEN],
    len: usize,
) -> Vec<u8> {
    let mut data = Vec::with_capacity(2 * 6 + 2 * NONCE_LEN);
    let (lo_addr, hi_addr) = if aa <= spa { (aa, spa) } else { (spa, aa) };
    data.extend_from_slice(lo_addr);
    data.extend_from_slice(hi_addr);
    let (lo_nonce, hi_nonce) = if anonce <= snonce {
        (anonce, snonce)
    } else {
        (snonce, anonce)
    };
    data.extend_from_slice(lo_nonce);
    data.extend_from_slice(hi_nonce);

    let mut ptk = vec![0u8; len];
    sha1_prf(pmk, PAIRWISE_LABEL, &data, &mut ptk);
    ptk
}

/// Derive GTK bytes: `PRF(GMK, "Group key expansion", AA || GNonce)`
pub fn derive_gtk(gmk: &[u8], aa: &MacAddr, gnonce: &[u8; NONCE_LEN], len: usize) -> Vec<u8> {
    let mut data = Vec::with_capacity(6 + NONCE_LEN);
    data.extend_from_slice(aa);
    data.extend_from_slice(gnonce);

    let mut gtk = vec![0u8; len];
    sha1_prf(gmk, GROUP_LABEL, &data, &mut gtk);
    gtk
}

/// Derive the initial value of the authenticator's nonce counter
///
/// `PRF-256(random, "Init Counter", AA || NTP timestamp)`
pub fn derive_counter_seed(random: &[u8], aa: &MacAddr, ntp_time: u64) -> [u8; NONCE_LEN] {
    let mut data = [0u8; 6 + 8];
    data[..6].copy_from_slice(aa);
    data[6..].copy_from_slice(&ntp_time.to_be_bytes());

    let mut counter = [0u8; NONCE_LEN];
    sha1_prf(random, INIT_COUNTER_LABEL, &data, &mut counter);
    counter
}

/// 64-bit NTP timestamp (seconds since 1900 in the high word, fraction in
/// the low word)
pub fn ntp_timestamp(now: SystemTime) -> u64 {
    let since_unix = now.duration_since(UNIX_EPOCH).unwrap_or_default();
    let secs = since_unix.as_secs().wrapping_add(NTP_EPOCH_OFFSET);
    let frac = (u64::from(since_unix.subsec_nanos()) << 32) / 1_000_000_000;
    (secs << 32) | (frac & 0xffff_ffff)
}

/// PMKID = HMAC-SHA1-128(PMK, "PMK Name" || AA || SPA)
pub fn pmkid(pmk: &[u8], aa: &MacAddr, spa: &MacAddr) -> Pmkid {
    let full = hmac_sha1(pmk, &[PMKID_LABEL.as_bytes(), aa, spa]);
    let mut id = [0u8; PMKID_LEN];
    id.copy_from_slice(&full[..PMKID_LEN]);
    id
}

/// Increment a big-endian byte counter in place, wrapping at the top
pub fn increment_be(bytes: &mut [u8]) {
    for byte in bytes.iter_mut().rev() {
        let (value, overflow) = byte.overflowing_add(1);
        *byte = value;
        if !overflow {
            break;
        }
    }
}

/// Pairwise Transient Key
///
/// ```text
/// KCK(16) | KEK(16) | TK(16 for CCMP, 32 for TKIP: TK1 + MIC keys)
/// ```
#[derive(Clone, PartialEq, Eq)]
pub struct Ptk {
    bytes: Vec<u8>,
}

impl Ptk {
    /// Derive the PTK sized for the negotiated pairwise cipher
    pub fn derive(
        pmk: &[u8],
        aa: &MacAddr,
        spa: &MacAddr,
        anonce: &[u8; NONCE_LEN],
        snonce: &[u8; NONCE_LEN],
        cipher: Cipher,
    ) -> Self {
        let len = KCK_LEN + KEK_LEN + cipher.key_len();
        Self {
            bytes: derive_ptk(pmk, aa, spa, anonce, snonce, len),
        }
    }

    /// EAPOL-Key confirmation key (MIC key)
    pub fn kck(&self) -> &[u8] {
        &self.bytes[..KCK_LEN]
    }

    /// EAPOL-Key encryption key
    pub fn kek(&self) -> &[u8] {
        &self.bytes[KCK_LEN..KCK_LEN + KEK_LEN]
    }

    /// Temporal key installed into the driver
    pub fn tk(&self) -> &[u8] {
        &self.bytes[KCK_LEN + KEK_LEN..]
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.bytes
    }
}

impl fmt::Debug for Ptk {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Ptk")
            .field("len", &self.bytes.len())
            .finish_non_exhaustive()
    }
}
