//! Cryptographic primitives for the 802.11i authenticator
//!
//! This module provides:
//! - HMAC-SHA1 PRF-X key derivation (PTK, GTK, nonce counter, PMKID)
//! - EAPOL-Key MIC (HMAC-MD5 / HMAC-SHA1-128)
//! - Key data wrapping (AES key wrap / RC4)
//! - Passphrase to PSK mapping

pub mod keywrap;
pub mod mic;
pub mod prf;
pub mod psk;

pub use mic::DescriptorVersion;
pub use prf::{Pmkid, Ptk, NONCE_LEN, PMKID_LEN, PMK_LEN};
