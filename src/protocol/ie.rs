//! WPA and RSN information element codec
//!
//! Wire formats (multi-byte counts and version are little-endian):
//!
//! ```text
//! WPA: 0xdd | len | 00:50:f2 | 01 | version(2) | group(4) |
//!      pairwise_count(2) | pairwise(4*n) | akm_count(2) | akm(4*m) | [capabilities(2)]
//! RSN: 0x30 | len | version(2) | group(4) |
//!      pairwise_count(2) | pairwise(4*n) | akm_count(2) | akm(4*m) |
//!      capabilities(2) | [pmkid_count(2) | pmkid(16*k)]
//! ```
//!
//! Trailing fields may be omitted by the sender; decoding fills in the
//! defaults (TKIP/TKIP/802.1X for WPA, CCMP/CCMP/802.1X for RSN).

use crate::crypto::prf::{Pmkid, PMKID_LEN};
use crate::error::IeError;
use crate::protocol::cursor::Reader;
use crate::protocol::suites::{Akm, AkmSet, Cipher, CipherSet, WpaVersion};

/// Element id of the RSN IE
pub const WLAN_EID_RSN: u8 = 0x30;

/// Element id of vendor specific IEs (carries the WPA IE)
pub const WLAN_EID_VENDOR_SPECIFIC: u8 = 0xdd;

/// WPA vendor OUI
pub const WPA_OUI: [u8; 3] = [0x00, 0x50, 0xf2];

/// WPA IE vendor OUI type
pub const WPA_OUI_TYPE: u8 = 1;

/// IEEE 802.11 OUI used by RSN selectors and KDEs
pub const RSN_OUI: [u8; 3] = [0x00, 0x0f, 0xac];

/// Supported WPA and RSN IE version
pub const IE_VERSION: u16 = 1;

/// RSN capability: pre-authentication supported
pub const RSN_CAP_PREAUTH: u16 = 0x0001;

/// RSN capability field value for 16 PTKSA replay counters
pub const RSN_NUM_REPLAY_COUNTERS_16: u16 = 3;

/// Shift of the PTKSA replay counter subfield
pub const RSN_PTKSA_REPLAY_SHIFT: u16 = 2;

const SELECTOR_LEN: usize = 4;
const WPA_HEADER_LEN: usize = 8;
const RSN_HEADER_LEN: usize = 4;
const MAX_ELEMENT_BODY: usize = 255;

/// Decoded (or to-be-encoded) WPA/RSN IE contents
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IeData {
    /// Group cipher; `None` when the selector was not recognized
    pub group_cipher: Option<Cipher>,
    pub pairwise_ciphers: CipherSet,
    pub akm_suites: AkmSet,
    pub capabilities: u16,
    /// RSN only
    pub pmkids: Vec<Pmkid>,
}

impl IeData {
    fn defaults(version: WpaVersion) -> Self {
        let cipher = match version {
            WpaVersion::Wpa => Cipher::Tkip,
            WpaVersion::Rsn => Cipher::Ccmp,
        };
        Self {
            group_cipher: Some(cipher),
            pairwise_ciphers: CipherSet::single(cipher),
            akm_suites: AkmSet::single(Akm::Ieee8021x),
            capabilities: 0,
            pmkids: Vec::new(),
        }
    }
}

/// RSN capabilities advertised by the authenticator
pub fn rsn_capabilities(preauth: bool, wmm: bool) -> u16 {
    let mut capab = 0;
    if preauth {
        capab |= RSN_CAP_PREAUTH;
    }
    if wmm {
        capab |= RSN_NUM_REPLAY_COUNTERS_16 << RSN_PTKSA_REPLAY_SHIFT;
    }
    capab
}

fn selector(oui: [u8; 3], suite_type: u8) -> [u8; SELECTOR_LEN] {
    [oui[0], oui[1], oui[2], suite_type]
}

fn oui_for(version: WpaVersion) -> [u8; 3] {
    match version {
        WpaVersion::Wpa => WPA_OUI,
        WpaVersion::Rsn => RSN_OUI,
    }
}

/// Write group, pairwise and AKM lists shared by both IE flavours
fn encode_suites(version: WpaVersion, ie: &IeData, body: &mut Vec<u8>) -> Result<(), IeError> {
    let oui = oui_for(version);

    let group = match ie.group_cipher {
        Some(Cipher::None) | None => return Err(IeError::InvalidCipher),
        Some(cipher) => cipher,
    };
    body.extend_from_slice(&selector(oui, group.suite_type()));

    if ie.pairwise_ciphers.is_empty() {
        return Err(IeError::InvalidCipher);
    }
    body.extend_from_slice(&(ie.pairwise_ciphers.len() as u16).to_le_bytes());
    for cipher in ie.pairwise_ciphers.iter() {
        body.extend_from_slice(&selector(oui, cipher.suite_type()));
    }

    if ie.akm_suites.is_empty() {
        return Err(IeError::InvalidAkm);
    }
    body.extend_from_slice(&(ie.akm_suites.len() as u16).to_le_bytes());
    for akm in ie.akm_suites.iter() {
        body.extend_from_slice(&selector(oui, akm.suite_type()));
    }
    Ok(())
}

fn finish_element(element_id: u8, body: Vec<u8>) -> Result<Vec<u8>, IeError> {
    if body.len() > MAX_ELEMENT_BODY {
        return Err(IeError::BadCount);
    }
    let mut out = Vec::with_capacity(2 + body.len());
    out.push(element_id);
    out.push(body.len() as u8);
    out.extend_from_slice(&body);
    Ok(out)
}

/// Encode a WPA (vendor specific) IE
///
/// Capabilities are written only when non-zero; PMKIDs are not part of
/// the WPA IE.
pub fn encode_wpa_ie(ie: &IeData) -> Result<Vec<u8>, IeError> {
    let mut body = Vec::with_capacity(32);
    body.extend_from_slice(&WPA_OUI);
    body.push(WPA_OUI_TYPE);
    body.extend_from_slice(&IE_VERSION.to_le_bytes());
    encode_suites(WpaVersion::Wpa, ie, &mut body)?;
    if ie.capabilities != 0 {
        body.extend_from_slice(&ie.capabilities.to_le_bytes());
    }
    finish_element(WLAN_EID_VENDOR_SPECIFIC, body)
}

/// Encode an RSN IE
pub fn encode_rsn_ie(ie: &IeData) -> Result<Vec<u8>, IeError> {
    let mut body = Vec::with_capacity(32);
    body.extend_from_slice(&IE_VERSION.to_le_bytes());
    encode_suites(WpaVersion::Rsn, ie, &mut body)?;
    body.extend_from_slice(&ie.capabilities.to_le_bytes());
    if !ie.pmkids.is_empty() {
        body.extend_from_slice(&(ie.pmkids.len() as u16).to_le_bytes());
        for pmkid in &ie.pmkids {
            body.extend_from_slice(pmkid);
        }
    }
    finish_element(WLAN_EID_RSN, body)
}

fn read_cipher(r: &mut Reader<'_>, oui: [u8; 3]) -> Option<Option<Cipher>> {
    let sel = r.read_array::<SELECTOR_LEN>()?;
    if sel[..3] != oui {
        return Some(None);
    }
    Some(Cipher::from_suite_type(sel[3]))
}

fn read_akm(r: &mut Reader<'_>, oui: [u8; 3]) -> Option<Option<Akm>> {
    let sel = r.read_array::<SELECTOR_LEN>()?;
    if sel[..3] != oui {
        return Some(None);
    }
    Some(Akm::from_suite_type(sel[3]))
}

/// Read a little-endian count followed by that many `unit`-byte items,
/// checking the count against the bytes actually present
fn read_count(r: &mut Reader<'_>, unit: usize) -> Result<usize, IeError> {
    let count = r.read_u16_le().ok_or(IeError::BadCount)? as usize;
    if count == 0 || count * unit > r.remaining() {
        return Err(IeError::BadCount);
    }
    Ok(count)
}

/// Parse the suite lists and capabilities after the fixed header
fn decode_body(version: WpaVersion, r: &mut Reader<'_>) -> Result<IeData, IeError> {
    let oui = oui_for(version);
    let mut data = IeData::defaults(version);

    if r.remaining() >= SELECTOR_LEN {
        data.group_cipher = read_cipher(r, oui).ok_or(IeError::Truncated)?;
    } else if r.remaining() > 0 {
        return Err(IeError::Truncated);
    }

    if r.remaining() >= 2 {
        let count = read_count(r, SELECTOR_LEN)?;
        data.pairwise_ciphers = CipherSet::empty();
        for _ in 0..count {
            if let Some(cipher) = read_cipher(r, oui).ok_or(IeError::BadCount)? {
                data.pairwise_ciphers.insert(cipher);
            }
        }
    } else if r.remaining() == 1 {
        return Err(IeError::BadCount);
    }

    if r.remaining() >= 2 {
        let count = read_count(r, SELECTOR_LEN)?;
        data.akm_suites = AkmSet::empty();
        for _ in 0..count {
            if let Some(akm) = read_akm(r, oui).ok_or(IeError::BadCount)? {
                data.akm_suites.insert(akm);
            }
        }
    } else if r.remaining() == 1 {
        return Err(IeError::BadCount);
    }

    if r.remaining() >= 2 {
        data.capabilities = r.read_u16_le().ok_or(IeError::Truncated)?;
    }

    if version == WpaVersion::Rsn && r.remaining() >= 2 {
        let count = r.read_u16_le().ok_or(IeError::BadCount)? as usize;
        if count * PMKID_LEN > r.remaining() {
            return Err(IeError::BadCount);
        }
        for _ in 0..count {
            let pmkid = r.read_array::<PMKID_LEN>().ok_or(IeError::BadCount)?;
            data.pmkids.push(pmkid);
        }
    }

    if r.remaining() > 0 {
        return Err(IeError::TrailingData);
    }
    Ok(data)
}

/// Decode a WPA IE including its element header
pub fn decode_wpa_ie(bytes: &[u8]) -> Result<IeData, IeError> {
    if bytes.len() < WPA_HEADER_LEN {
        return Err(IeError::Truncated);
    }
    let mut r = Reader::new(bytes);
    let element_id = r.read_u8().ok_or(IeError::Truncated)?;
    let len = r.read_u8().ok_or(IeError::Truncated)? as usize;
    let oui = r.read_array::<3>().ok_or(IeError::Truncated)?;
    let oui_type = r.read_u8().ok_or(IeError::Truncated)?;
    let version = r.read_u16_le().ok_or(IeError::Truncated)?;
    if element_id != WLAN_EID_VENDOR_SPECIFIC
        || len != bytes.len() - 2
        || oui != WPA_OUI
        || oui_type != WPA_OUI_TYPE
        || version != IE_VERSION
    {
        return Err(IeError::BadHeader);
    }
    decode_body(WpaVersion::Wpa, &mut r)
}

/// Decode an RSN IE including its element header
pub fn decode_rsn_ie(bytes: &[u8]) -> Result<IeData, IeError> {
    if bytes.len() < RSN_HEADER_LEN {
        return Err(IeError::Truncated);
    }
    let mut r = Reader::new(bytes);
    let element_id = r.read_u8().ok_or(IeError::Truncated)?;
    let len = r.read_u8().ok_or(IeError::Truncated)? as usize;
    let version = r.read_u16_le().ok_or(IeError::Truncated)?;
    if element_id != WLAN_EID_RSN || len != bytes.len() - 2 || version != IE_VERSION {
        return Err(IeError::BadHeader);
    }
    decode_body(WpaVersion::Rsn, &mut r)
}

/// Decode either IE flavour, dispatching on the element id
pub fn decode_ie(bytes: &[u8]) -> Result<(WpaVersion, IeData), IeError> {
    match bytes.first() {
        Some(&WLAN_EID_RSN) => Ok((WpaVersion::Rsn, decode_rsn_ie(bytes)?)),
        Some(&WLAN_EID_VENDOR_SPECIFIC) => Ok((WpaVersion::Wpa, decode_wpa_ie(bytes)?)),
        Some(_) => Err(IeError::BadHeader),
        None => Err(IeError::Truncated),
    }
}

/// Return the first WPA or RSN IE found in a sequence of elements
/// (e.g. the AP's combined RSN + WPA IE buffer)
pub fn find_ie(elements: &[u8], version: WpaVersion) -> Option<&[u8]> {
    let mut r = Reader::new(elements);
    while r.remaining() >= 2 {
        let start = r.position();
        let id = r.read_u8()?;
        let len = r.read_u8()? as usize;
        let body = r.read_bytes(len)?;
        let matches = match version {
            WpaVersion::Rsn => id == WLAN_EID_RSN,
            WpaVersion::Wpa => {
                id == WLAN_EID_VENDOR_SPECIFIC
                    && body.len() >= 4
                    && body[..3] == WPA_OUI
                    && body[3] == WPA_OUI_TYPE
            }
        };
        if matches {
            return elements.get(start..start + 2 + len);
        }
    }
    None
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    fn sample(version: WpaVersion) -> IeData {
        let mut data = IeData::defaults(version);
        data.pairwise_ciphers = [Cipher::Ccmp, Cipher::Tkip].into_iter().collect();
        data.akm_suites = [Akm::Psk, Akm::Ieee8021x].into_iter().collect();
        data.group_cipher = Some(Cipher::Tkip);
        data
    }

    #[test]
    fn test_encode_wpa_layout() {
        let mut data = sample(WpaVersion::Wpa);
        data.akm_suites = AkmSet::single(Akm::Psk);
        data.pairwise_ciphers = CipherSet::single(Cipher::Tkip);
        let ie = encode_wpa_ie(&data).unwrap();
        assert_eq!(
            hex::encode(&ie),
            "dd160050f20101000050f20201000050f20201000050f202"
        );
    }

    #[test]
    fn test_encode_rsn_layout() {
        let data = IeData {
            group_cipher: Some(Cipher::Ccmp),
            pairwise_ciphers: CipherSet::single(Cipher::Ccmp),
            akm_suites: AkmSet::single(Akm::Psk),
            capabilities: rsn_capabilities(true, false),
            pmkids: Vec::new(),
        };
        let ie = encode_rsn_ie(&data).unwrap();
        assert_eq!(
            hex::encode(&ie),
            "30140100000fac040100000fac040100000fac020100"
        );
    }

    #[test]
    fn test_encode_rejects_empty_suites() {
        let mut data = sample(WpaVersion::Rsn);
        data.pairwise_ciphers = CipherSet::empty();
        assert_eq!(encode_rsn_ie(&data), Err(IeError::InvalidCipher));

        let mut data = sample(WpaVersion::Rsn);
        data.akm_suites = AkmSet::empty();
        assert_eq!(encode_wpa_ie(&data), Err(IeError::InvalidAkm));

        let mut data = sample(WpaVersion::Rsn);
        data.group_cipher = None;
        assert_eq!(encode_rsn_ie(&data), Err(IeError::InvalidCipher));
    }

    #[test]
    fn test_decode_defaults_for_short_ie() {
        let rsn = [0x30, 0x02, 0x01, 0x00];
        let data = decode_rsn_ie(&rsn).unwrap();
        assert_eq!(data.group_cipher, Some(Cipher::Ccmp));
        assert!(data.pairwise_ciphers.contains(Cipher::Ccmp));
        assert!(data.akm_suites.contains(Akm::Ieee8021x));

        let wpa = [0xdd, 0x06, 0x00, 0x50, 0xf2, 0x01, 0x01, 0x00];
        let data = decode_wpa_ie(&wpa).unwrap();
        assert_eq!(data.group_cipher, Some(Cipher::Tkip));
        assert!(data.pairwise_ciphers.contains(Cipher::Tkip));
    }

    #[test]
    fn test_decode_rejects_bad_header() {
        // wrong element length
        assert_eq!(
            decode_rsn_ie(&[0x30, 0x05, 0x01, 0x00]),
            Err(IeError::BadHeader)
        );
        // wrong version
        assert_eq!(
            decode_rsn_ie(&[0x30, 0x02, 0x02, 0x00]),
            Err(IeError::BadHeader)
        );
        // wrong OUI type
        assert_eq!(
            decode_wpa_ie(&[0xdd, 0x06, 0x00, 0x50, 0xf2, 0x04, 0x01, 0x00]),
            Err(IeError::BadHeader)
        );
    }

    #[test]
    fn test_decode_rejects_overlong_count() {
        // pairwise count 2 but only one selector present
        let ie = [
            0x30, 0x0c, 0x01, 0x00, 0x00, 0x0f, 0xac, 0x04, 0x02, 0x00, 0x00, 0x0f, 0xac, 0x04,
        ];
        assert_eq!(decode_rsn_ie(&ie), Err(IeError::BadCount));

        // zero count
        let ie = [0x30, 0x08, 0x01, 0x00, 0x00, 0x0f, 0xac, 0x04, 0x00, 0x00];
        assert_eq!(decode_rsn_ie(&ie), Err(IeError::BadCount));
    }

    #[test]
    fn test_decode_rejects_trailing_and_partial() {
        let mut ie = encode_rsn_ie(&sample(WpaVersion::Rsn)).unwrap();
        ie.push(0x00);
        ie[1] += 1;
        assert_eq!(decode_rsn_ie(&ie), Err(IeError::TrailingData));

        // partial group selector
        let ie = [0x30, 0x04, 0x01, 0x00, 0x00, 0x0f];
        assert_eq!(decode_rsn_ie(&ie), Err(IeError::Truncated));
    }

    #[test]
    fn test_unknown_selectors_tolerated() {
        let ie = [
            0x30, 0x14, 0x01, 0x00, // header
            0x00, 0x0f, 0xac, 0x07, // unknown group
            0x01, 0x00, 0x00, 0x0f, 0xac, 0x09, // unknown pairwise
            0x01, 0x00, 0x00, 0x50, 0xf2, 0x02, // foreign OUI AKM
            0x00, 0x00,
        ];
        let data = decode_rsn_ie(&ie).unwrap();
        assert_eq!(data.group_cipher, None);
        assert!(data.pairwise_ciphers.is_empty());
        assert!(data.akm_suites.is_empty());
    }

    #[test]
    fn test_pmkid_list_round_trip() {
        let mut data = sample(WpaVersion::Rsn);
        data.pmkids = vec![[0xaa; 16], [0xbb; 16]];
        let ie = encode_rsn_ie(&data).unwrap();
        assert_eq!(decode_rsn_ie(&ie).unwrap(), data);

        let short = &ie[..ie.len() - 1];
        let mut short = short.to_vec();
        short[1] -= 1;
        assert_eq!(decode_rsn_ie(&short), Err(IeError::BadCount));
    }

    #[test]
    fn test_find_ie_in_combined_buffer() {
        let rsn = encode_rsn_ie(&sample(WpaVersion::Rsn)).unwrap();
        let wpa = encode_wpa_ie(&sample(WpaVersion::Wpa)).unwrap();
        let mut both = rsn.clone();
        both.extend_from_slice(&wpa);
        assert_eq!(find_ie(&both, WpaVersion::Rsn), Some(&rsn[..]));
        assert_eq!(find_ie(&both, WpaVersion::Wpa), Some(&wpa[..]));
        assert_eq!(find_ie(&rsn, WpaVersion::Wpa), None);
    }

    #[test]
    fn test_decode_ie_dispatch() {
        let wpa = encode_wpa_ie(&sample(WpaVersion::Wpa)).unwrap();
        assert_eq!(decode_ie(&wpa).unwrap().0, WpaVersion::Wpa);
        assert_eq!(decode_ie(&[]), Err(IeError::Truncated));
        assert_eq!(decode_ie(&[0x01, 0x00]), Err(IeError::BadHeader));
    }

    fn cipher_set() -> impl Strategy<Value = CipherSet> {
        proptest::sample::subsequence(vec![Cipher::Ccmp, Cipher::Tkip, Cipher::None], 1..=3)
            .prop_map(|v| v.into_iter().collect())
    }

    fn akm_set() -> impl Strategy<Value = AkmSet> {
        proptest::sample::subsequence(vec![Akm::Ieee8021x, Akm::Psk], 1..=2)
            .prop_map(|v| v.into_iter().collect())
    }

    fn group() -> impl Strategy<Value = Cipher> {
        proptest::sample::select(vec![Cipher::Ccmp, Cipher::Tkip, Cipher::Wep40, Cipher::Wep104])
    }

    proptest! {
        #[test]
        fn prop_rsn_round_trip(
            g in group(),
            pairwise in cipher_set(),
            akm in akm_set(),
            capabilities in any::<u16>(),
            pmkids in proptest::collection::vec(proptest::array::uniform16(any::<u8>()), 0..4),
        ) {
            let data = IeData { group_cipher: Some(g), pairwise_ciphers: pairwise, akm_suites: akm, capabilities, pmkids };
            let ie = encode_rsn_ie(&data).unwrap();
            prop_assert_eq!(decode_rsn_ie(&ie).unwrap(), data);
        }

        #[test]
        fn prop_wpa_round_trip(
            g in group(),
            pairwise in cipher_set(),
            akm in akm_set(),
            capabilities in any::<u16>(),
        ) {
            let data = IeData { group_cipher: Some(g), pairwise_ciphers: pairwise, akm_suites: akm, capabilities, pmkids: Vec::new() };
            let ie = encode_wpa_ie(&data).unwrap();
            prop_assert_eq!(decode_wpa_ie(&ie).unwrap(), data);
        }

        #[test]
        fn prop_short_input_rejected(bytes in proptest::collection::vec(any::<u8>(), 0..4)) {
            prop_assert!(decode_rsn_ie(&bytes[..bytes.len().min(3)]).is_err());
            prop_assert!(decode_wpa_ie(&bytes).is_err());
        }

        #[test]
        fn prop_arbitrary_input_never_panics(bytes in proptest::collection::vec(any::<u8>(), 0..64)) {
            let _ = decode_ie(&bytes);
            let _ = find_ie(&bytes, WpaVersion::Rsn);
        }
    }
}
