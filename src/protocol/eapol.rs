//! EAPOL-Key frame wire format
//!
//! ```text
//! 802.1X header: version(1) | type(1) = 3 | body_length(2)
//! EAPOL-Key:     descriptor_type(1) | key_info(2) | key_length(2) |
//!                replay_counter(8) | key_nonce(32) | key_iv(16) |
//!                key_rsc(8) | reserved(8) | key_mic(16) |
//!                key_data_length(2) | key_data(key_data_length)
//! ```
//!
//! All multi-byte fields are big-endian. Fields are read and written one at
//! a time through [`Reader`] and explicit byte pushes.

use crate::crypto::mic::{self, DescriptorVersion, MIC_LEN};
use crate::crypto::prf::{Ptk, NONCE_LEN};
use crate::error::FrameError;
use crate::protocol::cursor::Reader;

/// 802.1X header length
pub const EAPOL_HEADER_LEN: usize = 4;

/// Fixed EAPOL-Key descriptor length (without key data)
pub const EAPOL_KEY_FIXED_LEN: usize = 95;

/// Smallest valid EAPOL-Key frame including the 802.1X header
pub const EAPOL_KEY_MIN_LEN: usize = EAPOL_HEADER_LEN + EAPOL_KEY_FIXED_LEN;

/// Offset of the MIC field from the start of the 802.1X header
pub const MIC_OFFSET: usize = EAPOL_HEADER_LEN + 77;

/// 802.1X packet type for EAPOL-Key
pub const EAPOL_TYPE_KEY: u8 = 3;

/// Key descriptor type for RSN (IEEE 802.11i)
pub const DESC_TYPE_RSN: u8 = 2;

/// Key descriptor type for legacy WPA
pub const DESC_TYPE_WPA: u8 = 254;

/// EAPOL-Key key_info field
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct KeyInfo(pub u16);

impl KeyInfo {
    pub const TYPE_MASK: u16 = 0x0007;
    pub const KEY_TYPE: u16 = 0x0008;
    pub const KEY_INDEX_MASK: u16 = 0x0030;
    pub const KEY_INDEX_SHIFT: u16 = 4;
    pub const INSTALL: u16 = 0x0040;
    pub const ACK: u16 = 0x0080;
    pub const MIC: u16 = 0x0100;
    pub const SECURE: u16 = 0x0200;
    pub const ERROR: u16 = 0x0400;
    pub const REQUEST: u16 = 0x0800;
    pub const ENCR_KEY_DATA: u16 = 0x1000;
    /// Station-to-station link setup (not supported)
    pub const SMK_MESSAGE: u16 = 0x2000;

    pub fn contains(self, flag: u16) -> bool {
        self.0 & flag == flag
    }

    /// Key descriptor version bits
    pub fn version_bits(self) -> u16 {
        self.0 & Self::TYPE_MASK
    }

    /// Key index (legacy WPA only)
    pub fn key_index(self) -> u8 {
        ((self.0 & Self::KEY_INDEX_MASK) >> Self::KEY_INDEX_SHIFT) as u8
    }

    /// True for pairwise (key-type bit set) frames
    pub fn is_pairwise(self) -> bool {
        self.contains(Self::KEY_TYPE)
    }
}

/// Supplicant message kinds the authenticator accepts
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MsgKind {
    /// 4-Way Handshake message 2
    Pairwise2,
    /// 4-Way Handshake message 4
    Pairwise4,
    /// Group Key Handshake message 2
    Group2,
    /// EAPOL-Key request (rekey, MIC failure report)
    Request,
}

impl MsgKind {
    pub fn name(self) -> &'static str {
        match self {
            Self::Pairwise2 => "2/4 Pairwise",
            Self::Pairwise4 => "4/4 Pairwise",
            Self::Group2 => "2/2 Group",
            Self::Request => "Request",
        }
    }
}

/// Parsed EAPOL-Key frame
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EapolKeyFrame {
    pub protocol_version: u8,
    pub descriptor_type: u8,
    pub key_info: KeyInfo,
    pub key_length: u16,
    pub replay_counter: u64,
    pub key_nonce: [u8; NONCE_LEN],
    pub key_iv: [u8; 16],
    pub key_rsc: [u8; 8],
    pub key_id: [u8; 8],
    pub key_mic: [u8; MIC_LEN],
    pub key_data: Vec<u8>,
}

impl EapolKeyFrame {
    /// Create a frame with every field zeroed
    pub fn new(protocol_version: u8, descriptor_type: u8, key_info: KeyInfo) -> Self {
        Self {
            protocol_version,
            descriptor_type,
            key_info,
            key_length: 0,
            replay_counter: 0,
            key_nonce: [0u8; NONCE_LEN],
            key_iv: [0u8; 16],
            key_rsc: [0u8; 8],
            key_id: [0u8; 8],
            key_mic: [0u8; MIC_LEN],
            key_data: Vec::new(),
        }
    }

    /// Serialize including the 802.1X header
    pub fn to_bytes(&self) -> Vec<u8> {
        let body_len = EAPOL_KEY_FIXED_LEN + self.key_data.len();
        let mut buf = Vec::with_capacity(EAPOL_HEADER_LEN + body_len);

        buf.push(self.protocol_version);
        buf.push(EAPOL_TYPE_KEY);
        buf.extend_from_slice(&(body_len as u16).to_be_bytes());

        buf.push(self.descriptor_type);
        buf.extend_from_slice(&self.key_info.0.to_be_bytes());
        buf.extend_from_slice(&self.key_length.to_be_bytes());
        buf.extend_from_slice(&self.replay_counter.to_be_bytes());
        buf.extend_from_slice(&self.key_nonce);
        buf.extend_from_slice(&self.key_iv);
        buf.extend_from_slice(&self.key_rsc);
        buf.extend_from_slice(&self.key_id);
        buf.extend_from_slice(&self.key_mic);
        buf.extend_from_slice(&(self.key_data.len() as u16).to_be_bytes());
        buf.extend_from_slice(&self.key_data);

        buf
    }

    /// Parse a frame; trailing bytes beyond the 802.1X body length are
    /// ignored
    pub fn parse(data: &[u8]) -> Result<Self, FrameError> {
        let data = frame_bytes(data)?;
        let truncated = FrameError::Truncated {
            expected: EAPOL_KEY_MIN_LEN,
            got: data.len(),
        };
        let mut r = Reader::new(data);

        let protocol_version = r.read_u8().ok_or(truncated)?;
        let _packet_type = r.read_u8().ok_or(truncated)?;
        let _body_len = r.read_u16_be().ok_or(truncated)?;

        let descriptor_type = r.read_u8().ok_or(truncated)?;
        let key_info = KeyInfo(r.read_u16_be().ok_or(truncated)?);
        let key_length = r.read_u16_be().ok_or(truncated)?;
        let replay_counter = r.read_u64_be().ok_or(truncated)?;
        let key_nonce = r.read_array::<NONCE_LEN>().ok_or(truncated)?;
        let key_iv = r.read_array::<16>().ok_or(truncated)?;
        let key_rsc = r.read_array::<8>().ok_or(truncated)?;
        let key_id = r.read_array::<8>().ok_or(truncated)?;
        let key_mic = r.read_array::<MIC_LEN>().ok_or(truncated)?;
        let key_data_len = r.read_u16_be().ok_or(truncated)? as usize;

        if key_data_len > r.remaining() {
            return Err(FrameError::BadKeyDataLen {
                declared: key_data_len,
                available: r.remaining(),
            });
        }
        let key_data = r.read_bytes(key_data_len).ok_or(truncated)?.to_vec();

        Ok(Self {
            protocol_version,
            descriptor_type,
            key_info,
            key_length,
            replay_counter,
            key_nonce,
            key_iv,
            key_rsc,
            key_id,
            key_mic,
            key_data,
        })
    }

    /// Classify a supplicant frame
    ///
    /// Request bit → Request; key-type bit clear → Group 2; empty key data
    /// → Pairwise 4; otherwise Pairwise 2.
    pub fn kind(&self) -> MsgKind {
        if self.key_info.contains(KeyInfo::REQUEST) {
            MsgKind::Request
        } else if !self.key_info.is_pairwise() {
            MsgKind::Group2
        } else if self.key_data.is_empty() {
            MsgKind::Pairwise4
        } else {
            MsgKind::Pairwise2
        }
    }
}

/// Validate the 802.1X header and return exactly the bytes of the frame
pub fn frame_bytes(data: &[u8]) -> Result<&[u8], FrameError> {
    if data.len() < EAPOL_KEY_MIN_LEN {
        return Err(FrameError::Truncated {
            expected: EAPOL_KEY_MIN_LEN,
            got: data.len(),
        });
    }
    if data[1] != EAPOL_TYPE_KEY {
        return Err(FrameError::NotEapolKey {
            packet_type: data[1],
        });
    }
    let body_len = u16::from_be_bytes([data[2], data[3]]) as usize;
    let total = EAPOL_HEADER_LEN + body_len;
    if total > data.len() || total < EAPOL_KEY_MIN_LEN {
        return Err(FrameError::Truncated {
            expected: total.max(EAPOL_KEY_MIN_LEN),
            got: data.len(),
        });
    }
    Ok(&data[..total])
}

/// Parse just far enough to classify a frame
pub fn classify(data: &[u8]) -> Result<MsgKind, FrameError> {
    Ok(EapolKeyFrame::parse(data)?.kind())
}

/// Compute and insert the MIC into a serialized frame
pub fn sign_frame(frame: &mut [u8], version: DescriptorVersion, kck: &[u8]) {
    if frame.len() < MIC_OFFSET + MIC_LEN {
        return;
    }
    frame[MIC_OFFSET..MIC_OFFSET + MIC_LEN].fill(0);
    let mic = mic::compute_mic(version, kck, frame);
    frame[MIC_OFFSET..MIC_OFFSET + MIC_LEN].copy_from_slice(&mic);
}

/// Verify the MIC of a serialized frame against a PTK
///
/// The algorithm comes from the frame's descriptor version bits.
pub fn verify_mic(ptk: &Ptk, data: &[u8]) -> bool {
    let Ok(frame) = frame_bytes(data) else {
        return false;
    };
    let key_info = KeyInfo(u16::from_be_bytes([frame[5], frame[6]]));
    let Ok(version) = DescriptorVersion::try_from(key_info.version_bits()) else {
        return false;
    };

    let mut zeroed = frame.to_vec();
    let mut received = [0u8; MIC_LEN];
    received.copy_from_slice(&frame[MIC_OFFSET..MIC_OFFSET + MIC_LEN]);
    zeroed[MIC_OFFSET..MIC_OFFSET + MIC_LEN].fill(0);
    mic::verify_mic(version, ptk.kck(), &zeroed, &received)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::suites::Cipher;

    fn sample() -> EapolKeyFrame {
        let mut f = EapolKeyFrame::new(
            2,
            DESC_TYPE_RSN,
            KeyInfo(KeyInfo::KEY_TYPE | KeyInfo::MIC | 2),
        );
        f.key_length = 16;
        f.replay_counter = 0x0102030405060708;
        f.key_nonce = [0x5a; 32];
        f.key_data = vec![0x30, 0x02, 0x01, 0x00];
        f
    }

    #[test]
    fn test_layout_offsets() {
        let bytes = sample().to_bytes();
        assert_eq!(bytes.len(), EAPOL_KEY_MIN_LEN + 4);
        assert_eq!(bytes[1], EAPOL_TYPE_KEY);
        assert_eq!(u16::from_be_bytes([bytes[2], bytes[3]]) as usize, 95 + 4);
        assert_eq!(bytes[4], DESC_TYPE_RSN);
        assert_eq!(&bytes[9..17], &[1, 2, 3, 4, 5, 6, 7, 8]);
        assert_eq!(bytes[17], 0x5a);
        assert_eq!(&bytes[97..99], &[0x00, 0x04]);
        assert_eq!(&bytes[MIC_OFFSET..MIC_OFFSET + 16], &[0u8; 16]);
    }

    #[test]
    fn test_parse_round_trip() {
        let frame = sample();
        assert_eq!(EapolKeyFrame::parse(&frame.to_bytes()).unwrap(), frame);
    }

    #[test]
    fn test_parse_ignores_link_padding() {
        let frame = sample();
        let mut bytes = frame.to_bytes();
        bytes.extend_from_slice(&[0u8; 10]);
        assert_eq!(EapolKeyFrame::parse(&bytes).unwrap(), frame);
    }

    #[test]
    fn test_parse_rejects_short() {
        let bytes = sample().to_bytes();
        assert!(matches!(
            EapolKeyFrame::parse(&bytes[..50]),
            Err(FrameError::Truncated { .. })
        ));
    }

    #[test]
    fn test_parse_rejects_key_data_overflow() {
        let mut bytes = sample().to_bytes();
        bytes[97] = 0x01;
        bytes[98] = 0x00;
        assert!(matches!(
            EapolKeyFrame::parse(&bytes),
            Err(FrameError::BadKeyDataLen { declared: 256, available: 4 })
        ));
    }

    #[test]
    fn test_parse_rejects_other_packet_type() {
        let mut bytes = sample().to_bytes();
        bytes[1] = 0;
        assert!(matches!(
            EapolKeyFrame::parse(&bytes),
            Err(FrameError::NotEapolKey { packet_type: 0 })
        ));
    }

    #[test]
    fn test_classification() {
        let mut f = sample();
        assert_eq!(f.kind(), MsgKind::Pairwise2);
        f.key_data.clear();
        assert_eq!(f.kind(), MsgKind::Pairwise4);
        f.key_info = KeyInfo(KeyInfo::MIC | KeyInfo::SECURE | 2);
        assert_eq!(f.kind(), MsgKind::Group2);
        f.key_info = KeyInfo(KeyInfo::REQUEST | KeyInfo::KEY_TYPE | KeyInfo::MIC);
        assert_eq!(f.kind(), MsgKind::Request);
        assert_eq!(classify(&f.to_bytes()).unwrap(), MsgKind::Request);
    }

    #[test]
    fn test_sign_and_verify() {
        let ptk = Ptk::derive(&[1u8; 32], &[2u8; 6], &[3u8; 6], &[4u8; 32], &[5u8; 32], Cipher::Ccmp);
        let mut bytes = sample().to_bytes();
        sign_frame(&mut bytes, DescriptorVersion::HmacSha1Aes, ptk.kck());
        assert!(verify_mic(&ptk, &bytes));

        bytes[20] ^= 0x01;
        assert!(!verify_mic(&ptk, &bytes));
    }

    #[test]
    fn test_key_info_helpers() {
        let info = KeyInfo(KeyInfo::KEY_TYPE | (2 << KeyInfo::KEY_INDEX_SHIFT) | 1);
        assert!(info.is_pairwise());
        assert_eq!(info.key_index(), 2);
        assert_eq!(info.version_bits(), 1);
        assert!(!info.contains(KeyInfo::ACK));
    }
}
