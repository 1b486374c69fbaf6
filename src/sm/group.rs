//! BSS-wide group key machine (WPA_GROUP)
//!
//! Two GTK slots indexed by `GN` (active) and `GM` (next). A rekey swaps the
//! indices and derives a fresh GTK into the new active slot, so stations
//! still holding the old key keep working while they are updated.

use serde::Serialize;

use crate::crypto::prf::{derive_gtk, increment_be, NONCE_LEN};
use crate::effects::{Effect, Effects, KeyTarget};
use crate::protocol::suites::{Cipher, MacAddr};

/// Length of the group master key
pub const GMK_LEN: usize = 32;

/// Largest GTK (TKIP)
pub const GTK_MAX_LEN: usize = 32;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub enum GroupState {
    GtkInit,
    SetKeys,
    SetKeysDone,
}

impl GroupState {
    /// Numeric value used by the private MIB
    pub fn number(self) -> u8 {
        match self {
            Self::GtkInit => 0,
            Self::SetKeys => 1,
            Self::SetKeysDone => 2,
        }
    }
}

/// Result of one WPA_GROUP step
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GroupStep {
    Unchanged,
    Changed,
    /// Entered SETKEYS: stations holding the old GTK must be updated
    UpdateStations,
}

/// Group key state of one BSS
pub struct GroupKeys {
    pub state: GroupState,
    pub gmk: [u8; GMK_LEN],
    pub gtk: [[u8; GTK_MAX_LEN]; 2],
    pub gtk_len: usize,
    /// Active slot index (1 or 2)
    pub gn: u8,
    pub gm: u8,
    pub gnonce: [u8; NONCE_LEN],
    /// Nonce counter shared by ANonce, GNonce and the legacy key IV
    pub counter: [u8; NONCE_LEN],
    pub ginit: bool,
    pub gtk_authenticator: bool,
    pub gtk_rekey: bool,
    /// Stations that completed authentication (GNoStations)
    pub stations: u32,
    /// Stations still to acknowledge the current rekey (GKeyDoneStations)
    pub pending_stations: u32,
}

impl GroupKeys {
    pub fn new(gmk: [u8; GMK_LEN], counter: [u8; NONCE_LEN], cipher: Cipher) -> Self {
        Self {
            state: GroupState::GtkInit,
            gmk,
            gtk: [[0u8; GTK_MAX_LEN]; 2],
            gtk_len: cipher.key_len().min(GTK_MAX_LEN),
            gn: 1,
            gm: 2,
            gnonce: [0u8; NONCE_LEN],
            counter,
            ginit: false,
            gtk_authenticator: true,
            gtk_rekey: false,
            stations: 0,
            pending_stations: 0,
        }
    }

    /// GTK in the active slot
    pub fn current_gtk(&self) -> &[u8] {
        &self.gtk[self.active_slot()][..self.gtk_len]
    }

    fn active_slot(&self) -> usize {
        usize::from(self.gn.clamp(1, 2) - 1)
    }

    /// GNonce = Counter++, GTK[GN] = PRF(GMK, AA || GNonce)
    fn update_gtk(&mut self, aa: &MacAddr) {
        self.gnonce = self.counter;
        increment_be(&mut self.counter);
        let gtk = derive_gtk(&self.gmk, aa, &self.gnonce, self.gtk_len);
        let slot = self.active_slot();
        self.gtk[slot] = [0u8; GTK_MAX_LEN];
        self.gtk[slot][..gtk.len()].copy_from_slice(&gtk);
        tracing::trace!("GTK[{}] = {}", self.gn, hex::encode(self.current_gtk()));
    }

    /// Station finished (or abandoned) its part of a rekey
    pub fn station_done(&mut self) {
        self.pending_stations = self.pending_stations.saturating_sub(1);
    }

    fn enter_gtk_init(&mut self, aa: &MacAddr) {
        tracing::debug!("WPA_GROUP entering state GTK_INIT");
        self.state = GroupState::GtkInit;
        self.gtk = [[0u8; GTK_MAX_LEN]; 2];
        self.gn = 1;
        self.gm = 2;
        self.update_gtk(aa);
    }

    fn enter_set_keys(&mut self, aa: &MacAddr) {
        tracing::debug!("WPA_GROUP entering state SETKEYS");
        self.state = GroupState::SetKeys;
        self.gtk_rekey = false;
        std::mem::swap(&mut self.gn, &mut self.gm);
        self.update_gtk(aa);
    }

    fn enter_set_keys_done(&mut self, cipher: Cipher, fx: &mut Effects) {
        tracing::debug!("WPA_GROUP entering state SETKEYSDONE");
        self.state = GroupState::SetKeysDone;
        fx.push(Effect::SetKey {
            alg: cipher.key_alg(),
            target: KeyTarget::Broadcast,
            index: self.gn,
            key: self.current_gtk().to_vec(),
        });
    }
}

/// Evaluate the WPA_GROUP transitions once
///
/// GTK_INIT is entered while `ginit` is held, without reporting a change.
pub fn step(group: &mut GroupKeys, aa: &MacAddr, cipher: Cipher, fx: &mut Effects) -> GroupStep {
    if group.ginit {
        group.enter_gtk_init(aa);
        return GroupStep::Unchanged;
    }
    match group.state {
        GroupState::GtkInit if group.gtk_authenticator => {
            group.enter_set_keys_done(cipher, fx);
            GroupStep::Changed
        }
        GroupState::SetKeysDone if group.gtk_rekey => {
            group.enter_set_keys(aa);
            GroupStep::UpdateStations
        }
        GroupState::SetKeys if group.pending_stations == 0 => {
            group.enter_set_keys_done(cipher, fx);
            GroupStep::Changed
        }
        GroupState::SetKeys if group.gtk_rekey => {
            group.enter_set_keys(aa);
            GroupStep::UpdateStations
        }
        _ => GroupStep::Unchanged,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const AA: MacAddr = [2, 0, 0, 0, 1, 0];

    fn initialized(cipher: Cipher) -> (GroupKeys, Effects) {
        let mut group = GroupKeys::new([0x11; GMK_LEN], [0u8; NONCE_LEN], cipher);
        let mut fx = Effects::new();
        group.ginit = true;
        step(&mut group, &AA, cipher, &mut fx);
        group.ginit = false;
        step(&mut group, &AA, cipher, &mut fx);
        (group, fx)
    }

    #[test]
    fn test_init_installs_first_gtk() {
        let (group, fx) = initialized(Cipher::Ccmp);
        assert_eq!(group.state, GroupState::SetKeysDone);
        assert_eq!(group.gn, 1);
        assert_eq!(group.current_gtk().len(), 16);
        assert_eq!(group.counter[NONCE_LEN - 1], 1);

        let installed: Vec<&Effect> = fx.iter().collect();
        assert!(matches!(
            installed.as_slice(),
            [Effect::SetKey { target: KeyTarget::Broadcast, index: 1, .. }]
        ));
    }

    #[test]
    fn test_rekey_swaps_slots() {
        let (mut group, mut fx) = initialized(Cipher::Tkip);
        let old = group.current_gtk().to_vec();
        assert_eq!(old.len(), 32);

        group.gtk_rekey = true;
        group.pending_stations = 1;
        assert_eq!(step(&mut group, &AA, Cipher::Tkip, &mut fx), GroupStep::UpdateStations);
        assert_eq!((group.gn, group.gm), (2, 1));
        assert_ne!(group.current_gtk(), old.as_slice());
        assert_eq!(&group.gtk[0][..32], old.as_slice());

        assert_eq!(step(&mut group, &AA, Cipher::Tkip, &mut fx), GroupStep::Unchanged);
        group.station_done();
        assert_eq!(step(&mut group, &AA, Cipher::Tkip, &mut fx), GroupStep::Changed);
        assert_eq!(group.state, GroupState::SetKeysDone);
    }

    #[test]
    fn test_station_done_saturates() {
        let (mut group, _) = initialized(Cipher::Ccmp);
        group.station_done();
        assert_eq!(group.pending_stations, 0);
    }
}
