//! Per-station group key handshake machine (WPA_PTK_GROUP)

use serde::Serialize;

use crate::effects::{Effects, Notification};
use crate::protocol::eapol::KeyInfo;
use crate::protocol::framer::KeyFrameRequest;
use crate::protocol::kde::push_gtk_kde;
use crate::protocol::suites::{mac_to_string, WpaVersion};
use crate::sm::station::StationKeyState;
use crate::sm::{send_key_frame, BssState, PtkState};

const ZERO_RSC: [u8; 8] = [0u8; 8];

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub enum PtkGroupState {
    Idle,
    RekeyNegotiating,
    RekeyEstablished,
    KeyError,
}

impl PtkGroupState {
    pub fn number(self) -> u8 {
        self as u8
    }

    pub fn name(self) -> &'static str {
        match self {
            Self::Idle => "IDLE",
            Self::RekeyNegotiating => "REKEYNEGOTIATING",
            Self::RekeyEstablished => "REKEYESTABLISHED",
            Self::KeyError => "KEYERROR",
        }
    }
}

/// Evaluate the WPA_PTK_GROUP transitions once
pub fn step(sta: &mut StationKeyState, bss: &mut BssState, fx: &mut Effects) {
    let next = if sta.init {
        Some(PtkGroupState::Idle)
    } else {
        match sta.ptk_group_state {
            // Group message 1 must not overtake message 4
            PtkGroupState::Idle => (sta.ptk_state == PtkState::PtkInitDone
                && (sta.g_update_station_keys
                    || (sta.version() == WpaVersion::Wpa && sta.p_init_a_keys)))
                .then_some(PtkGroupState::RekeyNegotiating),
            PtkGroupState::RekeyNegotiating => {
                if sta.key_received && !sta.key_request && !sta.key_pairwise && sta.mic_verified {
                    Some(PtkGroupState::RekeyEstablished)
                } else if sta.timeout_evt && sta.gtimeout_ctr > bss.config.group_update_count {
                    Some(PtkGroupState::KeyError)
                } else if sta.timeout_evt {
                    Some(PtkGroupState::RekeyNegotiating)
                } else {
                    None
                }
            }
            PtkGroupState::RekeyEstablished | PtkGroupState::KeyError => Some(PtkGroupState::Idle),
        }
    };

    if let Some(state) = next {
        enter(state, sta, bss, fx);
    }
}

fn enter(state: PtkGroupState, sta: &mut StationKeyState, bss: &mut BssState, fx: &mut Effects) {
    if sta.ptk_group_state != state {
        tracing::debug!(
            "{}: WPA_PTK_GROUP entering state {}",
            mac_to_string(&sta.addr),
            state.name()
        );
    }
    sta.ptk_group_state = state;
    sta.changed = true;

    match state {
        PtkGroupState::Idle => {
            if sta.init {
                sta.changed = false;
            }
            sta.gtimeout_ctr = 0;
        }
        PtkGroupState::RekeyNegotiating => enter_rekey_negotiating(sta, bss, fx),
        PtkGroupState::RekeyEstablished => {
            sta.key_received = false;
            if sta.g_update_station_keys {
                bss.group.station_done();
            }
            sta.g_update_station_keys = false;
            sta.gtimeout_ctr = 0;
            sta.has_gtk = true;
            tracing::info!(
                "{}: group key handshake completed ({})",
                mac_to_string(&sta.addr),
                match sta.version() {
                    WpaVersion::Wpa => "WPA",
                    WpaVersion::Rsn => "RSN",
                }
            );
            fx.notify(sta.addr, Notification::GroupComplete);
        }
        PtkGroupState::KeyError => {
            if sta.g_update_station_keys {
                bss.group.station_done();
            }
            sta.g_update_station_keys = false;
            sta.disconnect = true;
            tracing::warn!("{}: group key handshake failed", mac_to_string(&sta.addr));
            fx.notify(sta.addr, Notification::HandshakeFailed);
        }
    }
}

fn enter_rekey_negotiating(sta: &mut StationKeyState, bss: &mut BssState, fx: &mut Effects) {
    if sta.version() == WpaVersion::Wpa {
        sta.p_init_a_keys = false;
    }
    sta.timeout_evt = false;
    tracing::debug!(
        "{}: sending 1/2 msg of Group Key Handshake",
        mac_to_string(&sta.addr)
    );

    let gn = bss.group.gn;
    let key_data = match sta.version() {
        WpaVersion::Rsn => {
            let mut kde = Vec::new();
            push_gtk_kde(&mut kde, gn, bss.group.current_gtk());
            kde
        }
        WpaVersion::Wpa => bss.group.current_gtk().to_vec(),
    };

    let install = if sta.pair { 0 } else { KeyInfo::INSTALL };
    let gnonce = bss.group.gnonce;
    let req = KeyFrameRequest {
        key_info: KeyInfo::SECURE | KeyInfo::MIC | KeyInfo::ACK | install,
        key_rsc: Some(&ZERO_RSC),
        nonce: Some(&gnonce),
        key_data: Some(key_data.as_slice()),
        keyidx: gn,
        encrypt: true,
    };
    send_key_frame(sta, bss, &req, fx);
    sta.gtimeout_ctr += 1;
}
