//! Per-station 4-way handshake machine (WPA_PTK)

use serde::Serialize;

use crate::crypto::prf::{self, Ptk, PMK_LEN};
use crate::effects::{Effect, Effects, KeyTarget, Notification, PortVar, REASON_PREV_AUTH_NOT_VALID};
use crate::protocol::eapol::{verify_mic, KeyInfo};
use crate::protocol::framer::KeyFrameRequest;
use crate::protocol::ie::find_ie;
use crate::protocol::kde::{push_gtk_kde, push_pmkid_kde};
use crate::protocol::suites::{mac_to_string, Akm, WpaVersion};
use crate::sm::station::StationKeyState;
use crate::sm::{remove_ptk, send_key_frame, set_port, BssState};

const ZERO_RSC: [u8; 8] = [0u8; 8];

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub enum PtkState {
    Initialize,
    Disconnect,
    Disconnected,
    Authentication,
    Authentication2,
    InitPmk,
    InitPsk,
    PtkStart,
    PtkCalcNegotiating,
    PtkCalcNegotiating2,
    PtkInitNegotiating,
    PtkInitDone,
}

impl PtkState {
    /// Numeric value used by the private MIB
    pub fn number(self) -> u8 {
        self as u8
    }

    pub fn name(self) -> &'static str {
        match self {
            Self::Initialize => "INITIALIZE",
            Self::Disconnect => "DISCONNECT",
            Self::Disconnected => "DISCONNECTED",
            Self::Authentication => "AUTHENTICATION",
            Self::Authentication2 => "AUTHENTICATION2",
            Self::InitPmk => "INITPMK",
            Self::InitPsk => "INITPSK",
            Self::PtkStart => "PTKSTART",
            Self::PtkCalcNegotiating => "PTKCALCNEGOTIATING",
            Self::PtkCalcNegotiating2 => "PTKCALCNEGOTIATING2",
            Self::PtkInitNegotiating => "PTKINITNEGOTIATING",
            Self::PtkInitDone => "PTKINITDONE",
        }
    }
}

/// Evaluate the WPA_PTK transitions once, entering at most one state
pub fn step(sta: &mut StationKeyState, bss: &mut BssState, fx: &mut Effects) {
    let next = if sta.init {
        Some(PtkState::Initialize)
    } else if sta.disconnect {
        Some(PtkState::Disconnect)
    } else if sta.deauth_request {
        Some(PtkState::Disconnected)
    } else if sta.auth_request {
        Some(PtkState::Authentication)
    } else if sta.reauth_request {
        Some(PtkState::Authentication2)
    } else if sta.ptk_request {
        Some(PtkState::PtkStart)
    } else {
        transition(sta, bss, fx)
    };

    if let Some(state) = next {
        enter(state, sta, bss, fx);
    }
}

fn transition(sta: &StationKeyState, bss: &mut BssState, fx: &mut Effects) -> Option<PtkState> {
    let pairwise_msg = sta.key_received && !sta.key_request && sta.key_pairwise;
    // Only a timeout of the last frame sent ends the handshake
    let retries_exhausted = sta.timeout_ctr > bss.config.pairwise_update_count;

    match sta.ptk_state {
        PtkState::Initialize | PtkState::PtkInitDone => None,
        PtkState::Disconnect => Some(PtkState::Disconnected),
        PtkState::Disconnected => Some(PtkState::Initialize),
        PtkState::Authentication => Some(PtkState::Authentication2),
        PtkState::Authentication2 => match sta.akm {
            Some(Akm::Ieee8021x) if sta.eapol.key_run => Some(PtkState::InitPmk),
            Some(Akm::Psk) => Some(PtkState::InitPsk),
            _ => None,
        },
        PtkState::InitPmk => {
            if sta.eapol.key_available || sta.pmksa.is_some() {
                Some(PtkState::PtkStart)
            } else {
                tracing::info!("{}: no PMK available", mac_to_string(&sta.addr));
                Some(handshake_failed(sta, bss, fx))
            }
        }
        PtkState::InitPsk => {
            if bss.config.psks.first(&sta.addr).is_some() {
                Some(PtkState::PtkStart)
            } else {
                tracing::info!("{}: no PSK configured for the STA", mac_to_string(&sta.addr));
                Some(handshake_failed(sta, bss, fx))
            }
        }
        PtkState::PtkStart => {
            if pairwise_msg {
                Some(PtkState::PtkCalcNegotiating)
            } else if sta.timeout_evt && retries_exhausted {
                Some(handshake_failed(sta, bss, fx))
            } else if sta.timeout_evt {
                Some(PtkState::PtkStart)
            } else {
                None
            }
        }
        PtkState::PtkCalcNegotiating => {
            if sta.mic_verified {
                Some(PtkState::PtkCalcNegotiating2)
            } else if pairwise_msg {
                Some(PtkState::PtkCalcNegotiating)
            } else if sta.timeout_evt {
                Some(PtkState::PtkStart)
            } else {
                None
            }
        }
        PtkState::PtkCalcNegotiating2 => Some(PtkState::PtkInitNegotiating),
        PtkState::PtkInitNegotiating => {
            if pairwise_msg && sta.mic_verified {
                Some(PtkState::PtkInitDone)
            } else if sta.timeout_evt && retries_exhausted {
                Some(handshake_failed(sta, bss, fx))
            } else if sta.timeout_evt {
                Some(PtkState::PtkInitNegotiating)
            } else {
                None
            }
        }
    }
}

fn handshake_failed(sta: &StationKeyState, bss: &mut BssState, fx: &mut Effects) -> PtkState {
    bss.counters.four_way_handshake_failures += 1;
    fx.notify(sta.addr, Notification::HandshakeFailed);
    PtkState::Disconnect
}

fn enter(state: PtkState, sta: &mut StationKeyState, bss: &mut BssState, fx: &mut Effects) {
    if sta.ptk_state != state {
        tracing::debug!(
            "{}: WPA_PTK entering state {}",
            mac_to_string(&sta.addr),
            state.name()
        );
    }
    sta.ptk_state = state;
    sta.changed = true;

    match state {
        PtkState::Initialize => enter_initialize(sta, bss, fx),
        PtkState::Disconnect => {
            sta.disconnect = false;
            fx.deauthenticate(sta.addr, REASON_PREV_AUTH_NOT_VALID);
        }
        PtkState::Disconnected => {
            if sta.counted {
                bss.group.stations = bss.group.stations.saturating_sub(1);
                sta.counted = false;
            }
            sta.deauth_request = false;
        }
        PtkState::Authentication => {
            if !sta.counted {
                bss.group.stations += 1;
                sta.counted = true;
            }
            sta.ptk = None;
            set_port(sta, PortVar::PortControlAuto, true, fx);
            set_port(sta, PortVar::PortEnabled, true, fx);
            sta.auth_request = false;
        }
        PtkState::Authentication2 => {
            sta.anonce = bss.group.counter;
            prf::increment_be(&mut bss.group.counter);
            sta.reauth_request = false;
            sta.timeout_ctr = 0;
        }
        PtkState::InitPmk => enter_init_pmk(sta, bss, fx),
        PtkState::InitPsk => {
            if let Some(psk) = bss.config.psks.first(&sta.addr) {
                sta.pmk = *psk;
            }
            sta.req_replay.clear();
        }
        PtkState::PtkStart => enter_ptk_start(sta, bss, fx),
        PtkState::PtkCalcNegotiating => enter_calc_negotiating(sta, bss, fx),
        PtkState::PtkCalcNegotiating2 => sta.timeout_ctr = 0,
        PtkState::PtkInitNegotiating => enter_init_negotiating(sta, bss, fx),
        PtkState::PtkInitDone => enter_init_done(sta, fx),
    }
}

fn enter_initialize(sta: &mut StationKeyState, bss: &mut BssState, fx: &mut Effects) {
    // Init stays set while the caller holds it; do not loop on it
    if sta.init {
        sta.changed = false;
    }
    if sta.g_update_station_keys {
        bss.group.station_done();
    }
    sta.g_update_station_keys = false;
    if sta.version() == WpaVersion::Wpa {
        sta.p_init_a_keys = false;
    }
    sta.pair = true;
    set_port(sta, PortVar::PortEnabled, false, fx);
    remove_ptk(sta, fx);
    set_port(sta, PortVar::PortValid, false, fx);
    sta.timeout_ctr = 0;
    if sta.uses_psk() {
        set_port(sta, PortVar::Authorized, false, fx);
    }
}

fn enter_init_pmk(sta: &mut StationKeyState, bss: &mut BssState, fx: &mut Effects) {
    if let Some(entry) = sta.pmksa.and_then(|id| bss.pmksa.get(id)) {
        tracing::debug!("{}: PMK from PMKSA cache", mac_to_string(&sta.addr));
        sta.pmk = entry.pmk;
    } else if let Some(pmk) = sta.eapol.pmk {
        tracing::debug!("{}: PMK from EAPOL state machine", mac_to_string(&sta.addr));
        sta.pmk = pmk;
    } else {
        tracing::debug!("{}: could not get PMK", mac_to_string(&sta.addr));
    }
    sta.req_replay.clear();
    // Reauthentication must not reuse the previous AAA key
    set_port(sta, PortVar::KeyRun, false, fx);
}

fn enter_ptk_start(sta: &mut StationKeyState, bss: &mut BssState, fx: &mut Effects) {
    sta.ptk_request = false;
    sta.timeout_evt = false;
    tracing::debug!("{}: sending 1/4 msg of 4-Way Handshake", mac_to_string(&sta.addr));

    let mut key_data = Vec::new();
    if sta.version() == WpaVersion::Rsn && !sta.uses_psk() {
        let pmkid = match sta.pmksa.and_then(|id| bss.pmksa.get(id)) {
            Some(entry) => entry.pmkid,
            None => prf::pmkid(&sta.pmk, &bss.config.addr, &sta.addr),
        };
        push_pmkid_kde(&mut key_data, &pmkid);
    }

    let anonce = sta.anonce;
    let req = KeyFrameRequest {
        key_info: KeyInfo::ACK | KeyInfo::KEY_TYPE,
        key_rsc: None,
        nonce: Some(&anonce),
        key_data: (!key_data.is_empty()).then_some(key_data.as_slice()),
        keyidx: 0,
        encrypt: false,
    };
    send_key_frame(sta, bss, &req, fx);
    sta.timeout_ctr += 1;
}

/// Find the PMK that produced the MIC of message 2
///
/// PSK stations may match any of their candidate keys; the list is finite
/// and tried in order. 802.1X stations have exactly one PMK.
fn enter_calc_negotiating(sta: &mut StationKeyState, bss: &mut BssState, fx: &mut Effects) {
    sta.key_received = false;

    let found = {
        let Some(frame) = sta.last_rx.as_deref() else {
            return;
        };
        let candidates: Vec<[u8; PMK_LEN]> = if sta.uses_psk() {
            bss.config.psks.candidates(&sta.addr).copied().collect()
        } else {
            vec![sta.pmk]
        };
        candidates.into_iter().find_map(|pmk| {
            let ptk = Ptk::derive(
                &pmk,
                &bss.config.addr,
                &sta.addr,
                &sta.anonce,
                &sta.snonce,
                sta.pairwise,
            );
            verify_mic(&ptk, frame).then_some((pmk, ptk))
        })
    };

    let Some((pmk, ptk)) = found else {
        tracing::debug!(
            "{}: invalid MIC in msg 2/4 of 4-Way Handshake",
            mac_to_string(&sta.addr)
        );
        return;
    };

    fx.cancel(sta.retransmit_timer());
    if sta.uses_psk() {
        sta.pmk = pmk;
    }
    sta.mic_verified = true;
    tracing::trace!("{}: PTK {}", mac_to_string(&sta.addr), hex::encode(ptk.as_bytes()));
    sta.ptk = Some(ptk);
}

fn enter_init_negotiating(sta: &mut StationKeyState, bss: &mut BssState, fx: &mut Effects) {
    sta.timeout_evt = false;
    tracing::debug!("{}: sending 3/4 msg of 4-Way Handshake", mac_to_string(&sta.addr));

    let rsn = sta.version() == WpaVersion::Rsn;
    let ap_ie: &[u8] = if rsn {
        &bss.wpa_ie
    } else {
        // WPA-only station on a WPA+RSN BSS gets just the WPA IE
        find_ie(&bss.wpa_ie, WpaVersion::Wpa).unwrap_or(&bss.wpa_ie)
    };
    let mut key_data = ap_ie.to_vec();

    let (secure, keyidx) = if rsn {
        push_gtk_kde(&mut key_data, bss.group.gn, bss.group.current_gtk());
        (KeyInfo::SECURE, bss.group.gn)
    } else {
        (0, 0)
    };

    let anonce = sta.anonce;
    let req = KeyFrameRequest {
        key_info: secure | KeyInfo::MIC | KeyInfo::ACK | KeyInfo::INSTALL | KeyInfo::KEY_TYPE,
        key_rsc: rsn.then_some(&ZERO_RSC),
        nonce: Some(&anonce),
        key_data: Some(key_data.as_slice()),
        keyidx,
        encrypt: rsn,
    };
    send_key_frame(sta, bss, &req, fx);
    sta.timeout_ctr += 1;
}

fn enter_init_done(sta: &mut StationKeyState, fx: &mut Effects) {
    sta.key_received = false;

    if sta.pair {
        let Some(ptk) = sta.ptk.as_ref() else {
            tracing::warn!("{}: no PTK to install", mac_to_string(&sta.addr));
            fx.deauthenticate(sta.addr, REASON_PREV_AUTH_NOT_VALID);
            return;
        };
        fx.push(Effect::SetKey {
            alg: sta.pairwise.key_alg(),
            target: KeyTarget::Station(sta.addr),
            index: 0,
            key: ptk.tk().to_vec(),
        });
        sta.pairwise_set = true;

        if sta.uses_psk() {
            set_port(sta, PortVar::Authorized, true, fx);
            fx.push(Effect::AccountingStart { addr: sta.addr });
        }
    }

    set_port(sta, PortVar::PortValid, true, fx);
    set_port(sta, PortVar::KeyAvailable, false, fx);
    set_port(sta, PortVar::KeyDone, true, fx);
    if sta.version() == WpaVersion::Wpa {
        sta.p_init_a_keys = true;
    } else {
        sta.has_gtk = true;
    }

    tracing::info!(
        "{}: pairwise key handshake completed ({})",
        mac_to_string(&sta.addr),
        match sta.version() {
            WpaVersion::Wpa => "WPA",
            WpaVersion::Rsn => "RSN",
        }
    );
    fx.notify(sta.addr, Notification::PairwiseComplete);
}
