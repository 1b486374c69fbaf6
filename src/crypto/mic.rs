//! EAPOL-Key MIC computation and verification
//!
//! The key descriptor version bits select the algorithm:
//! - version 1: HMAC-MD5 (RC4 key data, TKIP)
//! - version 2: HMAC-SHA1 truncated to 128 bits (AES key wrap, CCMP)

use hmac::{Hmac, Mac};
use md5::Md5;
use sha1::Sha1;

use crate::error::CryptoError;
use crate::protocol::suites::Cipher;

/// Length of the EAPOL-Key MIC field
pub const MIC_LEN: usize = 16;

/// Key descriptor version (key_info bits 0-2)
#[repr(u16)]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DescriptorVersion {
    HmacMd5Rc4 = 1,
    HmacSha1Aes = 2,
}

impl DescriptorVersion {
    /// Version tied to the negotiated pairwise cipher
    pub fn for_pairwise(cipher: Cipher) -> Self {
        if cipher == Cipher::Ccmp {
            Self::HmacSha1Aes
        } else {
            Self::HmacMd5Rc4
        }
    }

    pub fn bits(self) -> u16 {
        self as u16
    }
}

impl TryFrom<u16> for DescriptorVersion {
    type Error = CryptoError;

    fn try_from(version: u16) -> Result<Self, Self::Error> {
        match version {
            1 => Ok(Self::HmacMd5Rc4),
            2 => Ok(Self::HmacSha1Aes),
            _ => Err(CryptoError::UnknownDescriptorVersion { version }),
        }
    }
}

/// Compute the MIC over a whole EAPOL frame whose MIC field is zeroed
pub fn compute_mic(version: DescriptorVersion, kck: &[u8], frame: &[u8]) -> [u8; MIC_LEN] {
    let mut out = [0u8; MIC_LEN];
    match version {
        DescriptorVersion::HmacMd5Rc4 => {
            let mut mac =
                Hmac::<Md5>::new_from_slice(kck).expect("HMAC accepts any key length");
            mac.update(frame);
            out.copy_from_slice(&mac.finalize().into_bytes());
        }
        DescriptorVersion::HmacSha1Aes => {
            let mut mac =
                Hmac::<Sha1>::new_from_slice(kck).expect("HMAC accepts any key length");
            mac.update(frame);
            out.copy_from_slice(&mac.finalize().into_bytes()[..MIC_LEN]);
        }
    }
    out
}

/// Verify `mic` against a frame whose MIC field is zeroed
///
/// The comparison is constant time.
pub fn verify_mic(version: DescriptorVersion, kck: &[u8], frame: &[u8], mic: &[u8]) -> bool {
    if mic.len() != MIC_LEN {
        return false;
    }
    match version {
        DescriptorVersion::HmacMd5Rc4 => {
            let mut mac =
                Hmac::<Md5>::new_from_slice(kck).expect("HMAC accepts any key length");
            mac.update(frame);
            mac.verify_truncated_left(mic).is_ok()
        }
        DescriptorVersion::HmacSha1Aes => {
            let mut mac =
                Hmac::<Sha1>::new_from_slice(kck).expect("HMAC accepts any key length");
            mac.update(frame);
            mac.verify_truncated_left(mic).is_ok()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_version_from_bits() {
        assert_eq!(
            DescriptorVersion::try_from(1).unwrap(),
            DescriptorVersion::HmacMd5Rc4
        );
        assert_eq!(
            DescriptorVersion::try_from(2).unwrap(),
            DescriptorVersion::HmacSha1Aes
        );
        assert!(DescriptorVersion::try_from(3).is_err());
    }

    #[test]
    fn test_version_for_cipher() {
        assert_eq!(
            DescriptorVersion::for_pairwise(Cipher::Ccmp),
            DescriptorVersion::HmacSha1Aes
        );
        assert_eq!(
            DescriptorVersion::for_pairwise(Cipher::Tkip),
            DescriptorVersion::HmacMd5Rc4
        );
    }

    #[test]
    fn test_mic_round_trip() {
        let kck = [0x33u8; 16];
        let frame = b"eapol frame with zeroed mic";
        for version in [DescriptorVersion::HmacMd5Rc4, DescriptorVersion::HmacSha1Aes] {
            let mic = compute_mic(version, &kck, frame);
            assert!(verify_mic(version, &kck, frame, &mic));

            let mut bad = mic;
            bad[15] ^= 1;
            assert!(!verify_mic(version, &kck, frame, &bad));
        }
    }

    #[test]
    fn test_algorithms_differ() {
        let kck = [0x01u8; 16];
        let frame = b"frame";
        assert_ne!(
            compute_mic(DescriptorVersion::HmacMd5Rc4, &kck, frame),
            compute_mic(DescriptorVersion::HmacSha1Aes, &kck, frame)
        );
    }

    #[test]
    fn test_short_mic_rejected() {
        assert!(!verify_mic(DescriptorVersion::HmacSha1Aes, &[0u8; 16], b"x", &[0u8; 8]));
    }
}
