//! Cipher and AKM suite primitives shared by the IE codec, framer and
//! state machines.

use std::fmt;

use serde::Serialize;

/// IEEE 802 MAC address
pub type MacAddr = [u8; 6];

/// Format a MAC address as `aa:bb:cc:dd:ee:ff`
pub fn mac_to_string(addr: &MacAddr) -> String {
    format!(
        "{:02x}:{:02x}:{:02x}:{:02x}:{:02x}:{:02x}",
        addr[0], addr[1], addr[2], addr[3], addr[4], addr[5]
    )
}

/// Parse a colon- or dash-separated MAC address
pub fn parse_mac(value: &str) -> Option<MacAddr> {
    let mut addr = [0u8; 6];
    let mut parts = value.trim().split(|c| c == ':' || c == '-');
    for byte in addr.iter_mut() {
        let part = parts.next()?;
        if part.len() != 2 {
            return None;
        }
        *byte = u8::from_str_radix(part, 16).ok()?;
    }
    if parts.next().is_some() {
        return None;
    }
    Some(addr)
}

/// Pairwise/group cipher suite
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub enum Cipher {
    None,
    Wep40,
    Tkip,
    Ccmp,
    Wep104,
}

impl Cipher {
    /// Order used when a cipher list is written into an IE
    pub const ENCODE_ORDER: [Cipher; 5] = [
        Cipher::Ccmp,
        Cipher::Tkip,
        Cipher::Wep104,
        Cipher::Wep40,
        Cipher::None,
    ];

    fn bit(self) -> u8 {
        match self {
            Self::None => 1 << 0,
            Self::Wep40 => 1 << 1,
            Self::Tkip => 1 << 2,
            Self::Ccmp => 1 << 3,
            Self::Wep104 => 1 << 4,
        }
    }

    /// Suite type octet (fourth selector byte) shared by the WPA and RSN OUIs
    pub fn suite_type(self) -> u8 {
        match self {
            Self::None => 0,
            Self::Wep40 => 1,
            Self::Tkip => 2,
            Self::Ccmp => 4,
            Self::Wep104 => 5,
        }
    }

    /// Map a suite type octet back to a cipher; 3 (WRAP) and unknown values
    /// are not recognized
    pub fn from_suite_type(value: u8) -> Option<Self> {
        match value {
            0 => Some(Self::None),
            1 => Some(Self::Wep40),
            2 => Some(Self::Tkip),
            4 => Some(Self::Ccmp),
            5 => Some(Self::Wep104),
            _ => None,
        }
    }

    /// Temporal key length in bytes
    pub fn key_len(self) -> usize {
        match self {
            Self::Ccmp => 16,
            Self::Tkip => 32,
            Self::Wep104 => 13,
            Self::Wep40 => 5,
            Self::None => 0,
        }
    }

    /// Key size in bits as reported by dot11RSNAConfigGroupCipherSize
    pub fn key_bits(self) -> u32 {
        match self {
            Self::Ccmp => 128,
            Self::Tkip => 256,
            Self::Wep104 => 104,
            Self::Wep40 => 40,
            Self::None => 0,
        }
    }

    /// Driver algorithm used when installing a key of this cipher
    pub fn key_alg(self) -> KeyAlg {
        match self {
            Self::Ccmp => KeyAlg::Ccmp,
            Self::Tkip => KeyAlg::Tkip,
            Self::Wep40 | Self::Wep104 => KeyAlg::Wep,
            Self::None => KeyAlg::None,
        }
    }

    pub fn name(self) -> &'static str {
        match self {
            Self::None => "NONE",
            Self::Wep40 => "WEP40",
            Self::Tkip => "TKIP",
            Self::Ccmp => "CCMP",
            Self::Wep104 => "WEP104",
        }
    }

    pub fn from_name(name: &str) -> Option<Self> {
        match name.to_ascii_uppercase().as_str() {
            "NONE" => Some(Self::None),
            "WEP40" => Some(Self::Wep40),
            "TKIP" => Some(Self::Tkip),
            "CCMP" => Some(Self::Ccmp),
            "WEP104" => Some(Self::Wep104),
            _ => None,
        }
    }
}

impl fmt::Display for Cipher {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Driver key algorithm for key installation
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum KeyAlg {
    /// Remove the key
    None,
    Wep,
    Tkip,
    Ccmp,
}

/// Set of cipher suites (bitmask)
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, Hash)]
pub struct CipherSet(u8);

impl CipherSet {
    pub const fn empty() -> Self {
        Self(0)
    }

    pub fn single(cipher: Cipher) -> Self {
        Self(cipher.bit())
    }

    pub fn insert(&mut self, cipher: Cipher) {
        self.0 |= cipher.bit();
    }

    pub fn contains(&self, cipher: Cipher) -> bool {
        self.0 & cipher.bit() != 0
    }

    pub fn is_empty(&self) -> bool {
        self.0 == 0
    }

    pub fn intersection(&self, other: CipherSet) -> CipherSet {
        Self(self.0 & other.0)
    }

    pub fn len(&self) -> usize {
        self.0.count_ones() as usize
    }

    /// Members in IE encoding order
    pub fn iter(&self) -> impl Iterator<Item = Cipher> + '_ {
        Cipher::ENCODE_ORDER
            .into_iter()
            .filter(move |c| self.contains(*c))
    }
}

impl FromIterator<Cipher> for CipherSet {
    fn from_iter<I: IntoIterator<Item = Cipher>>(iter: I) -> Self {
        let mut set = Self::empty();
        for cipher in iter {
            set.insert(cipher);
        }
        set
    }
}

impl fmt::Display for CipherSet {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let names: Vec<&str> = self.iter().map(Cipher::name).collect();
        write!(f, "{}", names.join(" "))
    }
}

/// Authentication and key management suite
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub enum Akm {
    /// 802.1X/EAP derived PMK
    Ieee8021x,
    /// Pre-shared key
    Psk,
}

impl Akm {
    pub const ENCODE_ORDER: [Akm; 2] = [Akm::Ieee8021x, Akm::Psk];

    fn bit(self) -> u8 {
        match self {
            Self::Ieee8021x => 1 << 0,
            Self::Psk => 1 << 1,
        }
    }

    pub fn suite_type(self) -> u8 {
        match self {
            Self::Ieee8021x => 1,
            Self::Psk => 2,
        }
    }

    pub fn from_suite_type(value: u8) -> Option<Self> {
        match value {
            1 => Some(Self::Ieee8021x),
            2 => Some(Self::Psk),
            _ => None,
        }
    }

    pub fn name(self) -> &'static str {
        match self {
            Self::Ieee8021x => "WPA-EAP",
            Self::Psk => "WPA-PSK",
        }
    }

    pub fn from_name(name: &str) -> Option<Self> {
        match name.to_ascii_uppercase().as_str() {
            "WPA-EAP" => Some(Self::Ieee8021x),
            "WPA-PSK" => Some(Self::Psk),
            _ => None,
        }
    }
}

/// Set of AKM suites (bitmask)
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, Hash)]
pub struct AkmSet(u8);

impl AkmSet {
    pub const fn empty() -> Self {
        Self(0)
    }

    pub fn single(akm: Akm) -> Self {
        Self(akm.bit())
    }

    pub fn insert(&mut self, akm: Akm) {
        self.0 |= akm.bit();
    }

    pub fn contains(&self, akm: Akm) -> bool {
        self.0 & akm.bit() != 0
    }

    pub fn is_empty(&self) -> bool {
        self.0 == 0
    }

    pub fn intersection(&self, other: AkmSet) -> AkmSet {
        Self(self.0 & other.0)
    }

    pub fn len(&self) -> usize {
        self.0.count_ones() as usize
    }

    pub fn iter(&self) -> impl Iterator<Item = Akm> + '_ {
        Akm::ENCODE_ORDER
            .into_iter()
            .filter(move |a| self.contains(*a))
    }
}

impl FromIterator<Akm> for AkmSet {
    fn from_iter<I: IntoIterator<Item = Akm>>(iter: I) -> Self {
        let mut set = Self::empty();
        for akm in iter {
            set.insert(akm);
        }
        set
    }
}

impl fmt::Display for AkmSet {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let names: Vec<&str> = self.iter().map(Akm::name).collect();
        write!(f, "{}", names.join(" "))
    }
}

/// Negotiated protocol version of a station
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub enum WpaVersion {
    /// Legacy WPA (vendor IE, descriptor type 254)
    Wpa,
    /// IEEE 802.11i RSN / WPA2 (descriptor type 2)
    Rsn,
}
