//! Passphrase to PSK mapping (IEEE 802.11i Annex H.4)

use pbkdf2::pbkdf2_hmac;
use sha1::Sha1;

use crate::crypto::prf::PMK_LEN;

/// PBKDF2 iteration count for WPA passphrases
pub const PBKDF2_ROUNDS: u32 = 4096;

/// Valid passphrase lengths in ASCII characters
pub const PASSPHRASE_MIN: usize = 8;
pub const PASSPHRASE_MAX: usize = 63;

/// Derive the 256-bit PSK from a passphrase and SSID
pub fn passphrase_to_psk(passphrase: &str, ssid: &[u8]) -> [u8; PMK_LEN] {
    let mut psk = [0u8; PMK_LEN];
    pbkdf2_hmac::<Sha1>(passphrase.as_bytes(), ssid, PBKDF2_ROUNDS, &mut psk);
    psk
}

/// Check passphrase length and character range
pub fn is_valid_passphrase(passphrase: &str) -> bool {
    (PASSPHRASE_MIN..=PASSPHRASE_MAX).contains(&passphrase.len())
        && passphrase.bytes().all(|b| (32..=126).contains(&b))
}
