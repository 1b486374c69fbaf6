//! Key data encapsulation (KDE) build and parse
//!
//! ```text
//! KDE: 0xdd | len | 00:0f:ac | type | data(len - 4)
//! ```
//!
//! EAPOL-Key key data is a sequence of KDEs and plain WPA/RSN IEs, possibly
//! followed by 0xdd 0x00 padding.

use crate::crypto::prf::{Pmkid, PMKID_LEN};
use crate::error::IeError;
use crate::protocol::cursor::Reader;
use crate::protocol::ie::{RSN_OUI, WLAN_EID_RSN, WLAN_EID_VENDOR_SPECIFIC, WPA_OUI, WPA_OUI_TYPE};
use crate::protocol::suites::MacAddr;

/// GTK KDE
pub const KDE_GROUPKEY: u8 = 1;

/// Station-to-station link MAC address KDE
pub const KDE_MAC_ADDR: u8 = 3;

/// PMKID KDE
pub const KDE_PMKID: u8 = 4;

/// Append a KDE built from the concatenation of `parts`
pub fn push_kde(buf: &mut Vec<u8>, kde_type: u8, parts: &[&[u8]]) {
    let data_len: usize = parts.iter().map(|p| p.len()).sum();
    buf.push(WLAN_EID_VENDOR_SPECIFIC);
    buf.push((RSN_OUI.len() + 1 + data_len) as u8);
    buf.extend_from_slice(&RSN_OUI);
    buf.push(kde_type);
    for part in parts {
        buf.extend_from_slice(part);
    }
}

/// Append a GTK KDE: key id (bits 0-1), reserved byte, then the GTK
pub fn push_gtk_kde(buf: &mut Vec<u8>, keyidx: u8, gtk: &[u8]) {
    push_kde(buf, KDE_GROUPKEY, &[&[keyidx & 0x03, 0], gtk]);
}

pub fn push_pmkid_kde(buf: &mut Vec<u8>, pmkid: &Pmkid) {
    push_kde(buf, KDE_PMKID, &[pmkid]);
}

pub fn push_mac_addr_kde(buf: &mut Vec<u8>, addr: &MacAddr) {
    push_kde(buf, KDE_MAC_ADDR, &[addr]);
}

/// GTK carried in a GTK KDE
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GtkKde<'a> {
    pub keyidx: u8,
    pub tx: bool,
    pub key: &'a [u8],
}

/// Elements found in EAPOL-Key key data
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct KeyData<'a> {
    pub rsn_ie: Option<&'a [u8]>,
    pub wpa_ie: Option<&'a [u8]>,
    pub gtk: Option<GtkKde<'a>>,
    pub mac_addr: Option<MacAddr>,
    pub pmkid: Option<Pmkid>,
}

/// Parse key data into its IEs and KDEs; unknown KDE types are skipped
pub fn parse_key_data(buf: &[u8]) -> Result<KeyData<'_>, IeError> {
    let mut out = KeyData::default();
    let mut r = Reader::new(buf);

    while r.remaining() >= 2 {
        let start = r.position();
        let id = r.read_u8().ok_or(IeError::Truncated)?;
        let len = r.read_u8().ok_or(IeError::Truncated)? as usize;
        if id == WLAN_EID_VENDOR_SPECIFIC && len == 0 {
            // padding
            break;
        }
        let body = r.read_bytes(len).ok_or(IeError::Truncated)?;
        let element = &buf[start..start + 2 + len];

        if id == WLAN_EID_RSN {
            out.rsn_ie = Some(element);
            continue;
        }
        if id != WLAN_EID_VENDOR_SPECIFIC || body.len() < 4 {
            continue;
        }
        if body[..3] == WPA_OUI && body[3] == WPA_OUI_TYPE {
            out.wpa_ie = Some(element);
            continue;
        }
        if body[..3] != RSN_OUI {
            continue;
        }

        let data = &body[4..];
        match body[3] {
            KDE_GROUPKEY if data.len() > 2 => {
                out.gtk = Some(GtkKde {
                    keyidx: data[0] & 0x03,
                    tx: data[0] & 0x04 != 0,
                    key: &data[2..],
                });
            }
            KDE_MAC_ADDR if data.len() >= 6 => {
                let mut addr = [0u8; 6];
                addr.copy_from_slice(&data[..6]);
                out.mac_addr = Some(addr);
            }
            KDE_PMKID if data.len() >= PMKID_LEN => {
                let mut pmkid = [0u8; PMKID_LEN];
                pmkid.copy_from_slice(&data[..PMKID_LEN]);
                out.pmkid = Some(pmkid);
            }
            other => {
                tracing::trace!("Ignoring KDE type {} ({} bytes)", other, data.len());
            }
        }
    }

    Ok(out)
}
