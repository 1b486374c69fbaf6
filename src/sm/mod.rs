//! IEEE 802.11i authenticator state machines
//!
//! - `pairwise`: per-station 4-way handshake (WPA_PTK)
//! - `ptk_group`: per-station group key handshake (WPA_PTK_GROUP)
//! - `group`: BSS-wide GTK lifecycle (WPA_GROUP)
//!
//! Machines read and write [`BssState`] and [`StationKeyState`] directly and
//! report everything else through [`Effects`]. The step loop that runs them
//! to a fixpoint lives in [`crate::authenticator`].

pub mod group;
pub mod pairwise;
pub mod ptk_group;
pub mod station;

use rand::RngCore;

use crate::config::AuthConfig;
use crate::crypto::prf::Pmkid;
use crate::effects::{Effect, Effects, KeyTarget, PortVar};
use crate::error::CryptoError;
use crate::pmksa::PmksaCache;
use crate::protocol::eapol::KeyInfo;
use crate::protocol::framer::{build_key_frame, FrameContext, KeyFrameRequest};
use crate::protocol::suites::{mac_to_string, KeyAlg};

pub use group::{GroupKeys, GroupState};
pub use pairwise::PtkState;
pub use ptk_group::PtkGroupState;
pub use station::{EapolMirror, StationCounters, StationKeyState};

/// Suite selector as stored in the MIB (OUI + type)
pub type SuiteSelector = [u8; 4];

/// BSS-wide counters exported through the MIB
#[derive(Debug, Clone, Copy, Default)]
pub struct BssCounters {
    pub auth_suite_selected: SuiteSelector,
    pub pairwise_cipher_selected: SuiteSelector,
    pub group_cipher_selected: SuiteSelector,
    pub auth_suite_requested: SuiteSelector,
    pub pairwise_cipher_requested: SuiteSelector,
    pub group_cipher_requested: SuiteSelector,
    pub pmkid_used: Pmkid,
    pub tkip_countermeasures_invoked: u32,
    pub four_way_handshake_failures: u32,
    pub tkip_remote_mic_failures: u32,
}

/// Everything one BSS shares across its stations
pub struct BssState {
    pub config: AuthConfig,
    /// AP WPA/RSN IE (RSN first when both are enabled)
    pub wpa_ie: Vec<u8>,
    pub group: GroupKeys,
    pub pmksa: PmksaCache,
    pub counters: BssCounters,
    pub rng: Box<dyn RngCore + Send>,
}

/// Update an 802.1X port variable, keeping the local mirror in sync
pub(crate) fn set_port(sta: &mut StationKeyState, var: PortVar, value: bool, fx: &mut Effects) {
    match var {
        PortVar::KeyRun => sta.eapol.key_run = value,
        PortVar::KeyAvailable => sta.eapol.key_available = value,
        _ => {}
    }
    fx.set_port(sta.addr, var, value);
}

/// Forget the PTK and remove the pairwise key from the driver
pub(crate) fn remove_ptk(sta: &mut StationKeyState, fx: &mut Effects) {
    sta.ptk = None;
    fx.push(Effect::SetKey {
        alg: KeyAlg::None,
        target: KeyTarget::Station(sta.addr),
        index: 0,
        key: Vec::new(),
    });
    sta.pairwise_set = false;
}

/// Build, queue and arm the retransmission timer for one EAPOL-Key frame
///
/// A frame needing a MIC without a valid PTK is dropped, but the timer is
/// armed regardless so the machine still sees a timeout.
pub(crate) fn send_key_frame(
    sta: &mut StationKeyState,
    bss: &mut BssState,
    req: &KeyFrameRequest<'_>,
    fx: &mut Effects,
) {
    let ctx = FrameContext {
        eapol_version: bss.config.eapol_version,
        wpa: sta.version(),
        pairwise: sta.pairwise,
        group: bss.config.group_cipher,
        ptk: sta.ptk.as_ref(),
    };

    match build_key_frame(&ctx, req, &mut sta.replay, &mut bss.group.counter) {
        Ok(frame) => {
            tracing::trace!(
                "{}: EAPOL-Key frame key_info=0x{:04x} replay={} len={}",
                mac_to_string(&sta.addr),
                req.key_info,
                sta.replay.current(),
                frame.len()
            );
            fx.send_eapol(sta.addr, frame, sta.pairwise_set);
        }
        Err(CryptoError::MissingPtk) => {
            tracing::warn!(
                "{}: PTK not valid when sending EAPOL-Key frame",
                mac_to_string(&sta.addr)
            );
        }
        Err(e) => {
            tracing::warn!(
                "{}: failed to build EAPOL-Key frame: {}",
                mac_to_string(&sta.addr),
                e
            );
        }
    }

    let timeout = if req.key_info & KeyInfo::KEY_TYPE != 0 {
        bss.config.pairwise_update_timeout
    } else {
        bss.config.group_update_timeout
    };
    fx.arm(sta.retransmit_timer(), timeout);
}
