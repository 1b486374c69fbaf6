//! Per-station key state shared by the pairwise and group-key machines

use crate::crypto::prf::{Ptk, NONCE_LEN, PMK_LEN};
use crate::pmksa::EntryId;
use crate::protocol::replay::{KeyReplayCounter, RequestReplay};
use crate::protocol::suites::{Akm, Cipher, MacAddr, WpaVersion};
use crate::sm::pairwise::PtkState;
use crate::sm::ptk_group::PtkGroupState;
use crate::timer::{StationHandle, TimerKey};

/// Key material and flags mirrored from the station's IEEE 802.1X machine
#[derive(Clone, Default)]
pub struct EapolMirror {
    pub key_run: bool,
    pub key_available: bool,
    /// PMK delivered by the authentication server
    pub pmk: Option<[u8; PMK_LEN]>,
}

impl std::fmt::Debug for EapolMirror {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EapolMirror")
            .field("key_run", &self.key_run)
            .field("key_available", &self.key_available)
            .field("has_pmk", &self.pmk.is_some())
            .finish()
    }
}

/// Per-station counters exported through the station MIB
#[derive(Debug, Clone, Copy, Default)]
pub struct StationCounters {
    pub tkip_local_mic_failures: u32,
    pub tkip_remote_mic_failures: u32,
}

/// Key state of one associated (or pre-authenticating) station
///
/// Field names follow the IEEE 802.11i state machine variables.
pub struct StationKeyState {
    pub addr: MacAddr,
    pub generation: u64,

    pub ptk_state: PtkState,
    pub ptk_group_state: PtkGroupState,
    /// Set by state entry; the step loop runs until a pass leaves it clear
    pub changed: bool,
    pub in_step: bool,
    /// `sta_associated` has run at least once
    pub started: bool,
    /// Included in the BSS station count (GNoStations)
    pub counted: bool,

    pub init: bool,
    pub auth_request: bool,
    pub reauth_request: bool,
    pub deauth_request: bool,
    pub disconnect: bool,
    pub ptk_request: bool,
    pub timeout_evt: bool,
    pub key_received: bool,
    pub key_request: bool,
    pub key_pairwise: bool,
    pub mic_verified: bool,
    pub pair: bool,
    pub g_update_station_keys: bool,
    pub p_init_a_keys: bool,
    pub has_gtk: bool,
    pub pairwise_set: bool,
    pub timeout_ctr: u32,
    pub gtimeout_ctr: u32,

    /// Negotiated in `validate_sta_ie`
    pub wpa: Option<WpaVersion>,
    pub pairwise: Cipher,
    pub akm: Option<Akm>,
    /// IE copied from the (re)association request
    pub wpa_ie: Option<Vec<u8>>,
    pub pmksa: Option<EntryId>,

    pub anonce: [u8; NONCE_LEN],
    pub snonce: [u8; NONCE_LEN],
    pub pmk: [u8; PMK_LEN],
    /// Present only while valid
    pub ptk: Option<Ptk>,
    pub replay: KeyReplayCounter,
    pub req_replay: RequestReplay,
    pub last_rx: Option<Vec<u8>>,

    pub eapol: EapolMirror,
    pub counters: StationCounters,
}

impl StationKeyState {
    pub fn new(addr: MacAddr, generation: u64) -> Self {
        Self {
            addr,
            generation,
            ptk_state: PtkState::Initialize,
            ptk_group_state: PtkGroupState::Idle,
            changed: false,
            in_step: false,
            started: false,
            counted: false,
            init: false,
            auth_request: false,
            reauth_request: false,
            deauth_request: false,
            disconnect: false,
            ptk_request: false,
            timeout_evt: false,
            key_received: false,
            key_request: false,
            key_pairwise: false,
            mic_verified: false,
            pair: false,
            g_update_station_keys: false,
            p_init_a_keys: false,
            has_gtk: false,
            pairwise_set: false,
            timeout_ctr: 0,
            gtimeout_ctr: 0,
            wpa: None,
            pairwise: Cipher::None,
            akm: None,
            wpa_ie: None,
            pmksa: None,
            anonce: [0u8; NONCE_LEN],
            snonce: [0u8; NONCE_LEN],
            pmk: [0u8; PMK_LEN],
            ptk: None,
            replay: KeyReplayCounter::new(),
            req_replay: RequestReplay::new(),
            last_rx: None,
            eapol: EapolMirror::default(),
            counters: StationCounters::default(),
        }
    }

    pub fn handle(&self) -> StationHandle {
        StationHandle {
            addr: self.addr,
            generation: self.generation,
        }
    }

    pub fn retransmit_timer(&self) -> TimerKey {
        TimerKey::Retransmit(self.handle())
    }

    /// Negotiated version; stations that never sent an IE use RSN framing
    pub fn version(&self) -> WpaVersion {
        self.wpa.unwrap_or(WpaVersion::Rsn)
    }

    pub fn ptk_valid(&self) -> bool {
        self.ptk.is_some()
    }

    pub fn uses_psk(&self) -> bool {
        self.akm == Some(Akm::Psk)
    }

    /// Drop the PTK and ask for a fresh 4-way handshake
    pub fn request_new_ptk(&mut self) {
        self.ptk = None;
        self.ptk_request = true;
    }
}

impl std::fmt::Debug for StationKeyState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StationKeyState")
            .field("addr", &crate::protocol::suites::mac_to_string(&self.addr))
            .field("generation", &self.generation)
            .field("ptk_state", &self.ptk_state)
            .field("ptk_group_state", &self.ptk_group_state)
            .field("wpa", &self.wpa)
            .field("pairwise", &self.pairwise)
            .field("akm", &self.akm)
            .field("ptk_valid", &self.ptk_valid())
            .field("has_gtk", &self.has_gtk)
            .finish_non_exhaustive()
    }
}
