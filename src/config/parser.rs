//! Authenticator configuration file parser
//!
//! Parses INI-style files with one `[Authenticator]` section and any number
//! of `[Station]` sections carrying per-station pre-shared keys.

use std::path::Path;
use std::time::Duration;

use super::psk::PskStore;
use crate::crypto::prf::PMK_LEN;
use crate::crypto::psk::{is_valid_passphrase, passphrase_to_psk};
use crate::error::ConfigError;
use crate::pmksa::{DEFAULT_MAX_ENTRIES, DEFAULT_PMK_LIFETIME};
use crate::protocol::suites::{parse_mac, Akm, AkmSet, Cipher, CipherSet, MacAddr};

/// Default GTK rekey interval
pub const DEFAULT_GROUP_REKEY: Duration = Duration::from_secs(600);

/// Default GMK replacement interval
pub const DEFAULT_GMK_REKEY: Duration = Duration::from_secs(86400);

/// dot11RSNAConfigPairwiseUpdateTimeOut / GroupUpdateTimeOut
pub const DEFAULT_UPDATE_TIMEOUT: Duration = Duration::from_millis(1000);

/// dot11RSNAConfigPairwiseUpdateCount / GroupUpdateCount
pub const DEFAULT_UPDATE_COUNT: u32 = 3;

/// `Wpa` bitmask value enabling legacy WPA
pub const WPA_VERSION_WPA: u8 = 1;

/// `Wpa` bitmask value enabling RSN (WPA2)
pub const WPA_VERSION_RSN: u8 = 2;

/// Complete authenticator configuration for one BSS
#[derive(Debug, Clone)]
pub struct AuthConfig {
    /// Authenticator (BSSID) address
    pub addr: MacAddr,
    pub ssid: Vec<u8>,
    /// Enabled versions (bitmask of `WPA_VERSION_WPA` / `WPA_VERSION_RSN`)
    pub wpa: u8,
    pub key_mgmt: AkmSet,
    pub pairwise: CipherSet,
    pub group_cipher: Cipher,
    /// GTK rekey interval; `None` disables periodic rekeying
    pub group_rekey: Option<Duration>,
    /// GMK replacement interval; `None` disables it
    pub gmk_rekey: Option<Duration>,
    /// Rekey the GTK whenever a station holding it leaves
    pub strict_rekey: bool,
    pub rsn_preauth: bool,
    pub wmm_enabled: bool,
    pub eapol_version: u8,
    pub pmk_lifetime: Duration,
    pub pmksa_cache_size: usize,
    pub pairwise_update_timeout: Duration,
    pub pairwise_update_count: u32,
    pub group_update_timeout: Duration,
    pub group_update_count: u32,
    pub psks: PskStore,
}

impl Default for AuthConfig {
    fn default() -> Self {
        Self {
            addr: [0u8; 6],
            ssid: Vec::new(),
            wpa: WPA_VERSION_RSN,
            key_mgmt: AkmSet::single(Akm::Psk),
            pairwise: CipherSet::single(Cipher::Ccmp),
            group_cipher: Cipher::Ccmp,
            group_rekey: Some(DEFAULT_GROUP_REKEY),
            gmk_rekey: Some(DEFAULT_GMK_REKEY),
            strict_rekey: false,
            rsn_preauth: false,
            wmm_enabled: false,
            eapol_version: 2,
            pmk_lifetime: DEFAULT_PMK_LIFETIME,
            pmksa_cache_size: DEFAULT_MAX_ENTRIES,
            pairwise_update_timeout: DEFAULT_UPDATE_TIMEOUT,
            pairwise_update_count: DEFAULT_UPDATE_COUNT,
            group_update_timeout: DEFAULT_UPDATE_TIMEOUT,
            group_update_count: DEFAULT_UPDATE_COUNT,
            psks: PskStore::new(),
        }
    }
}

impl AuthConfig {
    /// Parse a configuration from a file
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path).map_err(|e| {
            if e.kind() == std::io::ErrorKind::NotFound {
                ConfigError::FileNotFound {
                    path: path.display().to_string(),
                }
            } else {
                ConfigError::Io(e)
            }
        })?;
        Self::parse(&content)
    }

    /// Parse and validate a configuration from a string
    pub fn parse(content: &str) -> Result<Self, ConfigError> {
        let mut auth: Option<AuthBuilder> = None;
        let mut stations: Vec<StationBuilder> = Vec::new();
        let mut current_section: Option<Section> = None;

        for (line_num, line) in content.lines().enumerate() {
            let line_num = line_num + 1;
            let line = line.trim();

            if line.is_empty() || line.starts_with('#') || line.starts_with(';') {
                continue;
            }

            if line.eq_ignore_ascii_case("[authenticator]") {
                auth.get_or_insert_with(AuthBuilder::default);
                current_section = Some(Section::Authenticator);
                continue;
            } else if line.eq_ignore_ascii_case("[station]") {
                stations.push(StationBuilder::new(line_num));
                current_section = Some(Section::Station);
                continue;
            } else if line.starts_with('[') {
                return Err(ConfigError::ParseError {
                    line: line_num,
                    message: format!("Unknown section: {}", line),
                });
            }

            let Some((key, value)) = line.split_once('=') else {
                return Err(ConfigError::ParseError {
                    line: line_num,
                    message: format!("Expected 'key = value', got: {}", line),
                });
            };

            let key = key.trim().to_lowercase();
            let value = value.trim();

            match current_section {
                Some(Section::Authenticator) => {
                    let builder = auth.get_or_insert_with(AuthBuilder::default);
                    builder.set(&key, value, line_num)?;
                }
                Some(Section::Station) => {
                    let station = stations.last_mut().ok_or(ConfigError::ParseError {
                        line: line_num,
                        message: "Station value outside of [Station] section".to_string(),
                    })?;
                    station.set(&key, value, line_num)?;
                }
                None => {
                    return Err(ConfigError::ParseError {
                        line: line_num,
                        message: "Configuration value outside of any section".to_string(),
                    });
                }
            }
        }

        let auth = auth.ok_or(ConfigError::MissingField {
            field: "[Authenticator] section".to_string(),
        })?;
        let config = auth.build(stations)?;
        config.validate()?;
        Ok(config)
    }

    pub fn wpa_enabled(&self) -> bool {
        self.wpa & WPA_VERSION_WPA != 0
    }

    pub fn rsn_enabled(&self) -> bool {
        self.wpa & WPA_VERSION_RSN != 0
    }

    /// Reject policies no station could ever negotiate
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.wpa & (WPA_VERSION_WPA | WPA_VERSION_RSN) == 0 {
            return Err(ConfigError::InvalidPolicy {
                reason: "no WPA version enabled".to_string(),
            });
        }
        if self.key_mgmt.is_empty() {
            return Err(ConfigError::InvalidPolicy {
                reason: "no key management suite".to_string(),
            });
        }
        if self.pairwise.is_empty() {
            return Err(ConfigError::InvalidPolicy {
                reason: "no pairwise cipher".to_string(),
            });
        }
        if self.group_cipher == Cipher::None {
            return Err(ConfigError::InvalidPolicy {
                reason: "group cipher NONE is not usable".to_string(),
            });
        }
        if self.group_cipher == Cipher::Ccmp && self.pairwise.contains(Cipher::Tkip) {
            return Err(ConfigError::InvalidPolicy {
                reason: "CCMP group cipher cannot serve TKIP stations".to_string(),
            });
        }
        if !(1..=2).contains(&self.eapol_version) {
            return Err(ConfigError::Unsupported {
                field: "EapolVersion".to_string(),
                value: self.eapol_version.to_string(),
            });
        }
        if self.key_mgmt.contains(Akm::Psk) && self.psks.is_empty() {
            return Err(ConfigError::MissingField {
                field: "Psk or Passphrase (WPA-PSK enabled)".to_string(),
            });
        }
        if self.pmksa_cache_size == 0 {
            return Err(ConfigError::InvalidPolicy {
                reason: "PmksaCacheSize must be at least 1".to_string(),
            });
        }
        Ok(())
    }
}

/// Section type during parsing
#[derive(Clone, Copy)]
enum Section {
    Authenticator,
    Station,
}

/// Builder for the `[Authenticator]` section
#[derive(Default)]
struct AuthBuilder {
    addr: Option<MacAddr>,
    ssid: Option<Vec<u8>>,
    wpa: Option<u8>,
    key_mgmt: Option<AkmSet>,
    pairwise: Option<CipherSet>,
    group_cipher: Option<Cipher>,
    group_rekey: Option<u64>,
    gmk_rekey: Option<u64>,
    strict_rekey: Option<bool>,
    rsn_preauth: Option<bool>,
    wmm_enabled: Option<bool>,
    eapol_version: Option<u8>,
    pmk_lifetime: Option<u64>,
    pmksa_cache_size: Option<usize>,
    pairwise_update_timeout: Option<u64>,
    pairwise_update_count: Option<u32>,
    group_update_timeout: Option<u64>,
    group_update_count: Option<u32>,
    psk: Option<[u8; PMK_LEN]>,
    passphrase: Option<String>,
}

impl AuthBuilder {
    fn set(&mut self, key: &str, value: &str, line: usize) -> Result<(), ConfigError> {
        match key {
            "address" => self.addr = Some(parse_addr(value)?),
            "ssid" => self.ssid = Some(value.as_bytes().to_vec()),
            "wpa" => self.wpa = Some(parse_num(value, "Wpa", line)?),
            "wpakeymgmt" => self.key_mgmt = Some(parse_akms(value)?),
            "wpapairwise" => self.pairwise = Some(parse_ciphers(value, "WpaPairwise")?),
            "wpagroup" => self.group_cipher = Some(parse_cipher(value, "WpaGroup")?),
            "grouprekey" => self.group_rekey = Some(parse_num(value, "GroupRekey", line)?),
            "gmkrekey" => self.gmk_rekey = Some(parse_num(value, "GmkRekey", line)?),
            "strictrekey" => self.strict_rekey = Some(parse_bool(value, "StrictRekey", line)?),
            "rsnpreauth" => self.rsn_preauth = Some(parse_bool(value, "RsnPreauth", line)?),
            "wmmenabled" => self.wmm_enabled = Some(parse_bool(value, "WmmEnabled", line)?),
            "eapolversion" => self.eapol_version = Some(parse_num(value, "EapolVersion", line)?),
            "pmklifetime" => self.pmk_lifetime = Some(parse_num(value, "PmkLifetime", line)?),
            "pmksacachesize" => {
                self.pmksa_cache_size = Some(parse_num(value, "PmksaCacheSize", line)?)
            }
            "pairwiseupdatetimeout" => {
                self.pairwise_update_timeout =
                    Some(parse_num(value, "PairwiseUpdateTimeout", line)?)
            }
            "pairwiseupdatecount" => {
                self.pairwise_update_count = Some(parse_num(value, "PairwiseUpdateCount", line)?)
            }
            "groupupdatetimeout" => {
                self.group_update_timeout = Some(parse_num(value, "GroupUpdateTimeout", line)?)
            }
            "groupupdatecount" => {
                self.group_update_count = Some(parse_num(value, "GroupUpdateCount", line)?)
            }
            "psk" => self.psk = Some(parse_psk(value, "Psk")?),
            "passphrase" => self.passphrase = Some(parse_passphrase(value)?),
            _ => {
                // Unknown key, ignore (forward compatibility)
                tracing::debug!("Unknown authenticator key: {}", key);
            }
        }
        Ok(())
    }

    fn build(self, stations: Vec<StationBuilder>) -> Result<AuthConfig, ConfigError> {
        let defaults = AuthConfig::default();

        let addr = self.addr.ok_or(ConfigError::MissingField {
            field: "Address".to_string(),
        })?;
        let ssid = self.ssid.ok_or(ConfigError::MissingField {
            field: "Ssid".to_string(),
        })?;
        let wpa = self.wpa.ok_or(ConfigError::MissingField {
            field: "Wpa".to_string(),
        })?;
        let key_mgmt = self.key_mgmt.ok_or(ConfigError::MissingField {
            field: "WpaKeyMgmt".to_string(),
        })?;
        let pairwise = self.pairwise.ok_or(ConfigError::MissingField {
            field: "WpaPairwise".to_string(),
        })?;
        let group_cipher = self.group_cipher.unwrap_or(if pairwise.contains(Cipher::Tkip) {
            Cipher::Tkip
        } else {
            Cipher::Ccmp
        });

        let mut psks = PskStore::new();
        if let Some(psk) = self.psk {
            psks.add(None, psk);
        } else if let Some(passphrase) = &self.passphrase {
            psks.add(None, passphrase_to_psk(passphrase, &ssid));
        }
        for station in stations {
            let (station_addr, psk) = station.build(&ssid)?;
            psks.add(station_addr, psk);
        }

        let secs = |v: Option<u64>, default: Option<Duration>| match v {
            Some(0) => None,
            Some(s) => Some(Duration::from_secs(s)),
            None => default,
        };

        Ok(AuthConfig {
            addr,
            ssid,
            wpa,
            key_mgmt,
            pairwise,
            group_cipher,
            group_rekey: secs(self.group_rekey, defaults.group_rekey),
            gmk_rekey: secs(self.gmk_rekey, defaults.gmk_rekey),
            strict_rekey: self.strict_rekey.unwrap_or(defaults.strict_rekey),
            rsn_preauth: self.rsn_preauth.unwrap_or(defaults.rsn_preauth),
            wmm_enabled: self.wmm_enabled.unwrap_or(defaults.wmm_enabled),
            eapol_version: self.eapol_version.unwrap_or(defaults.eapol_version),
            pmk_lifetime: self
                .pmk_lifetime
                .map(Duration::from_secs)
                .unwrap_or(defaults.pmk_lifetime),
            pmksa_cache_size: self.pmksa_cache_size.unwrap_or(defaults.pmksa_cache_size),
            pairwise_update_timeout: self
                .pairwise_update_timeout
                .map(Duration::from_millis)
                .unwrap_or(defaults.pairwise_update_timeout),
            pairwise_update_count: self
                .pairwise_update_count
                .unwrap_or(defaults.pairwise_update_count),
            group_update_timeout: self
                .group_update_timeout
                .map(Duration::from_millis)
                .unwrap_or(defaults.group_update_timeout),
            group_update_count: self.group_update_count.unwrap_or(defaults.group_update_count),
            psks,
        })
    }
}

/// Builder for one `[Station]` section
struct StationBuilder {
    line: usize,
    addr: Option<MacAddr>,
    psk: Option<[u8; PMK_LEN]>,
    passphrase: Option<String>,
}

impl StationBuilder {
    fn new(line: usize) -> Self {
        Self {
            line,
            addr: None,
            psk: None,
            passphrase: None,
        }
    }

    fn set(&mut self, key: &str, value: &str, _line: usize) -> Result<(), ConfigError> {
        match key {
            "address" => self.addr = Some(parse_addr(value)?),
            "psk" => self.psk = Some(parse_psk(value, "Psk in [Station]")?),
            "passphrase" => self.passphrase = Some(parse_passphrase(value)?),
            _ => {
                tracing::debug!("Unknown station key: {}", key);
            }
        }
        Ok(())
    }

    /// All-zero address means "any station"
    fn build(self, ssid: &[u8]) -> Result<(Option<MacAddr>, [u8; PMK_LEN]), ConfigError> {
        let addr = self.addr.ok_or(ConfigError::MissingField {
            field: format!("Address in [Station] (line {})", self.line),
        })?;
        let psk = match (self.psk, self.passphrase) {
            (Some(psk), _) => psk,
            (None, Some(passphrase)) => passphrase_to_psk(&passphrase, ssid),
            (None, None) => {
                return Err(ConfigError::MissingField {
                    field: format!("Psk or Passphrase in [Station] (line {})", self.line),
                })
            }
        };
        let addr = if addr == [0u8; 6] { None } else { Some(addr) };
        Ok((addr, psk))
    }
}

fn parse_addr(value: &str) -> Result<MacAddr, ConfigError> {
    parse_mac(value).ok_or(ConfigError::InvalidAddress {
        value: value.to_string(),
    })
}

fn parse_num<T: std::str::FromStr>(value: &str, field: &str, line: usize) -> Result<T, ConfigError> {
    value.parse().map_err(|_| ConfigError::ParseError {
        line,
        message: format!("Invalid {}: {}", field, value),
    })
}

fn parse_bool(value: &str, field: &str, line: usize) -> Result<bool, ConfigError> {
    match value.to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Ok(true),
        "0" | "false" | "no" | "off" => Ok(false),
        _ => Err(ConfigError::ParseError {
            line,
            message: format!("Invalid {}: {}", field, value),
        }),
    }
}

fn parse_cipher(value: &str, field: &str) -> Result<Cipher, ConfigError> {
    Cipher::from_name(value).ok_or(ConfigError::Unsupported {
        field: field.to_string(),
        value: value.to_string(),
    })
}

/// Space or comma separated cipher list
fn parse_ciphers(value: &str, field: &str) -> Result<CipherSet, ConfigError> {
    value
        .split(|c: char| c == ',' || c.is_whitespace())
        .filter(|s| !s.is_empty())
        .map(|s| parse_cipher(s, field))
        .collect()
}

fn parse_akms(value: &str) -> Result<AkmSet, ConfigError> {
    value
        .split(|c: char| c == ',' || c.is_whitespace())
        .filter(|s| !s.is_empty())
        .map(|s| {
            Akm::from_name(s).ok_or(ConfigError::Unsupported {
                field: "WpaKeyMgmt".to_string(),
                value: s.to_string(),
            })
        })
        .collect()
}

/// Parse a 64 hex character PSK
fn parse_psk(value: &str, field: &str) -> Result<[u8; PMK_LEN], ConfigError> {
    let bytes = hex::decode(value).map_err(|_| ConfigError::InvalidKey {
        field: field.to_string(),
    })?;

    if bytes.len() != PMK_LEN {
        return Err(ConfigError::InvalidKey {
            field: field.to_string(),
        });
    }

    let mut psk = [0u8; PMK_LEN];
    psk.copy_from_slice(&bytes);
    Ok(psk)
}

fn parse_passphrase(value: &str) -> Result<String, ConfigError> {
    if !is_valid_passphrase(value) {
        return Err(ConfigError::InvalidKey {
            field: "Passphrase".to_string(),
        });
    }
    Ok(value.to_string())
}
