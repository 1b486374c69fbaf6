//! Authenticator statistics and MIB text
//!
//! Counters are snapshotted into plain structs that serialize to JSON for
//! monitoring and render as `name=value` MIB lines for the control
//! interface.

use std::fmt;

use serde::Serialize;

use crate::sm::{GroupState, PtkGroupState, PtkState, SuiteSelector};
use crate::protocol::suites::WpaVersion;

/// RSN IE version reported as dot11RSNAConfigVersion
pub const RSN_CONFIG_VERSION: u16 = 1;

/// dot11RSNAConfigPMKReauthThreshold (percent)
pub const PMK_REAUTH_THRESHOLD: u32 = 70;

/// dot11RSNAConfigSATimeout (seconds)
pub const SA_TIMEOUT: u32 = 60;

/// Render a suite selector as `oo-oo-oo-t`
pub fn suite_text(sel: &SuiteSelector) -> String {
    format!("{:02x}-{:02x}-{:02x}-{}", sel[0], sel[1], sel[2], sel[3])
}

fn bool_text(value: bool) -> &'static str {
    if value {
        "TRUE"
    } else {
        "FALSE"
    }
}

/// BSS-wide statistics
#[derive(Debug, Clone, Serialize)]
pub struct AuthenticatorStats {
    pub rsna_enabled: bool,
    pub preauth_enabled: bool,
    pub config_version: u16,
    pub group_rekey_strict: bool,
    pub group_update_count: u32,
    pub pairwise_update_count: u32,
    pub group_cipher_size: u32,
    /// Seconds
    pub pmk_lifetime: u64,
    pub pmk_reauth_threshold: u32,
    pub sa_timeout: u32,
    pub auth_suite_selected: String,
    pub pairwise_cipher_selected: String,
    pub group_cipher_selected: String,
    pub pmkid_used: String,
    pub auth_suite_requested: String,
    pub pairwise_cipher_requested: String,
    pub group_cipher_requested: String,
    pub tkip_countermeasures_invoked: u32,
    pub four_way_handshake_failures: u32,
    pub tkip_remote_mic_failures: u32,
    pub group_state: GroupState,
    pub stations: usize,
    pub pmksa_entries: usize,
}

impl AuthenticatorStats {
    /// MIB text, one `dot11RSNA*=value` line per counter
    pub fn to_mib(&self) -> String {
        self.to_string()
    }
}

impl fmt::Display for AuthenticatorStats {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "dot11RSNAOptionImplemented=TRUE")?;
        writeln!(f, "dot11RSNAPreauthenticationImplemented=TRUE")?;
        writeln!(f, "dot11RSNAEnabled={}", bool_text(self.rsna_enabled))?;
        writeln!(
            f,
            "dot11RSNAPreauthenticationEnabled={}",
            bool_text(self.preauth_enabled)
        )?;
        writeln!(f, "dot11RSNAConfigVersion={}", self.config_version)?;
        writeln!(f, "dot11RSNAConfigPairwiseKeysSupported=9999")?;
        writeln!(
            f,
            "dot11RSNAConfigGroupRekeyStrict={}",
            u8::from(self.group_rekey_strict)
        )?;
        writeln!(f, "dot11RSNAConfigGroupUpdateCount={}", self.group_update_count)?;
        writeln!(
            f,
            "dot11RSNAConfigPairwiseUpdateCount={}",
            self.pairwise_update_count
        )?;
        writeln!(f, "dot11RSNAConfigGroupCipherSize={}", self.group_cipher_size)?;
        writeln!(f, "dot11RSNAConfigPMKLifetime={}", self.pmk_lifetime)?;
        writeln!(
            f,
            "dot11RSNAConfigPMKReauthThreshold={}",
            self.pmk_reauth_threshold
        )?;
        writeln!(f, "dot11RSNAConfigNumberOfPTKSAReplayCounters=0")?;
        writeln!(f, "dot11RSNAConfigSATimeout={}", self.sa_timeout)?;
        writeln!(
            f,
            "dot11RSNAAuthenticationSuiteSelected={}",
            self.auth_suite_selected
        )?;
        writeln!(
            f,
            "dot11RSNAPairwiseCipherSelected={}",
            self.pairwise_cipher_selected
        )?;
        writeln!(f, "dot11RSNAGroupCipherSelected={}", self.group_cipher_selected)?;
        writeln!(f, "dot11RSNAPMKIDUsed={}", self.pmkid_used)?;
        writeln!(
            f,
            "dot11RSNAAuthenticationSuiteRequested={}",
            self.auth_suite_requested
        )?;
        writeln!(
            f,
            "dot11RSNAPairwiseCipherRequested={}",
            self.pairwise_cipher_requested
        )?;
        writeln!(
            f,
            "dot11RSNAGroupCipherRequested={}",
            self.group_cipher_requested
        )?;
        writeln!(
            f,
            "dot11RSNATKIPCounterMeasuresInvoked={}",
            self.tkip_countermeasures_invoked
        )?;
        writeln!(
            f,
            "dot11RSNA4WayHandshakeFailures={}",
            self.four_way_handshake_failures
        )?;
        writeln!(
            f,
            "dot11RSNATKIPRemoteMICFailures={}",
            self.tkip_remote_mic_failures
        )?;
        writeln!(f, "dot11RSNAConfigNumberOfGTKSAReplayCounters=0")?;
        writeln!(f, "hostapdWPAGroupState={}", self.group_state.number())
    }
}

/// Per-station statistics (dot11RSNAStatsEntry plus machine states)
#[derive(Debug, Clone, Serialize)]
pub struct StationStats {
    pub addr: String,
    pub version: WpaVersion,
    pub pairwise_cipher: String,
    pub tkip_local_mic_failures: u32,
    pub tkip_remote_mic_failures: u32,
    pub ptk_state: PtkState,
    pub ptk_group_state: PtkGroupState,
    pub has_gtk: bool,
}

impl StationStats {
    pub fn to_mib(&self) -> String {
        self.to_string()
    }
}

impl fmt::Display for StationStats {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "dot11RSNAStatsSTAAddress={}", self.addr)?;
        writeln!(f, "dot11RSNAStatsVersion=1")?;
        writeln!(
            f,
            "dot11RSNAStatsSelectedPairwiseCipher={}",
            self.pairwise_cipher
        )?;
        writeln!(
            f,
            "dot11RSNAStatsTKIPLocalMICFailures={}",
            self.tkip_local_mic_failures
        )?;
        writeln!(
            f,
            "dot11RSNAStatsTKIPRemoteMICFailures={}",
            self.tkip_remote_mic_failures
        )?;
        writeln!(f, "hostapdWPAPTKState={}", self.ptk_state.number())?;
        writeln!(f, "hostapdWPAPTKGroupState={}", self.ptk_group_state.number())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_suite_text() {
        assert_eq!(suite_text(&[0x00, 0x0f, 0xac, 4]), "00-0f-ac-4");
        assert_eq!(suite_text(&[0x00, 0x50, 0xf2, 2]), "00-50-f2-2");
    }

    #[test]
    fn test_station_mib_lines() {
        let stats = StationStats {
            addr: "02:00:00:00:00:01".into(),
            version: WpaVersion::Rsn,
            pairwise_cipher: "00-0f-ac-4".into(),
            tkip_local_mic_failures: 1,
            tkip_remote_mic_failures: 2,
            ptk_state: PtkState::PtkInitDone,
            ptk_group_state: PtkGroupState::Idle,
            has_gtk: true,
        };
        let mib = stats.to_mib();

        assert!(mib.starts_with("dot11RSNAStatsSTAAddress=02:00:00:00:00:01\n"));
        assert!(mib.contains("dot11RSNAStatsTKIPRemoteMICFailures=2\n"));
        assert!(mib.contains("hostapdWPAPTKState=11\n"));
        assert!(mib.ends_with("hostapdWPAPTKGroupState=0\n"));
    }

    #[test]
    fn test_station_stats_json() {
        let stats = StationStats {
            addr: "02:00:00:00:00:01".into(),
            version: WpaVersion::Wpa,
            pairwise_cipher: "00-50-f2-2".into(),
            tkip_local_mic_failures: 0,
            tkip_remote_mic_failures: 0,
            ptk_state: PtkState::PtkStart,
            ptk_group_state: PtkGroupState::RekeyNegotiating,
            has_gtk: false,
        };
        let json = serde_json::to_value(&stats).unwrap();

        assert_eq!(json["ptk_state"], "PtkStart");
        assert_eq!(json["version"], "Wpa");
        assert_eq!(json["has_gtk"], false);
    }
}
