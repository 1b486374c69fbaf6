//! Side effects requested by the state machines
//!
//! The authenticator never performs I/O. Each operation appends what it
//! wants done to an [`Effects`] sink; the runtime (or a test) applies them.

use std::fmt;
use std::time::Duration;

use serde::Serialize;

use crate::protocol::suites::{mac_to_string, KeyAlg, MacAddr};
use crate::timer::TimerKey;

/// IEEE 802.11 reason code: previous authentication no longer valid
pub const REASON_PREV_AUTH_NOT_VALID: u16 = 2;

/// IEEE 802.1X port variables owned by the EAPOL state machines
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub enum PortVar {
    PortEnabled,
    PortValid,
    PortControlAuto,
    Authorized,
    KeyRun,
    KeyAvailable,
    KeyDone,
}

/// Where an installed key applies
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum KeyTarget {
    Station(MacAddr),
    /// Group key for all stations of the BSS
    Broadcast,
}

/// Handshake outcome reported upward
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum Notification {
    PairwiseComplete,
    GroupComplete,
    HandshakeFailed,
}

/// One requested side effect
#[derive(Clone, PartialEq, Eq)]
pub enum Effect {
    /// Transmit an EAPOL-Key frame; `encrypt` asks for pairwise protection
    SendEapol {
        addr: MacAddr,
        frame: Vec<u8>,
        encrypt: bool,
    },
    /// Install (or with `KeyAlg::None`, remove) a key in the driver
    SetKey {
        alg: KeyAlg,
        target: KeyTarget,
        index: u8,
        key: Vec<u8>,
    },
    Deauthenticate {
        addr: MacAddr,
        reason: u16,
    },
    SetPort {
        addr: MacAddr,
        var: PortVar,
        value: bool,
    },
    ArmTimer {
        key: TimerKey,
        after: Duration,
    },
    CancelTimer {
        key: TimerKey,
    },
    /// Station reported a Michael MIC failure
    MicFailureReport {
        addr: MacAddr,
    },
    AccountingStart {
        addr: MacAddr,
    },
    Notify {
        addr: MacAddr,
        event: Notification,
    },
}

impl fmt::Debug for Effect {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::SendEapol {
                addr,
                frame,
                encrypt,
            } => f
                .debug_struct("SendEapol")
                .field("addr", &mac_to_string(addr))
                .field("len", &frame.len())
                .field("encrypt", encrypt)
                .finish(),
            Self::SetKey {
                alg,
                target,
                index,
                key,
            } => f
                .debug_struct("SetKey")
                .field("alg", alg)
                .field("target", target)
                .field("index", index)
                .field("key_len", &key.len())
                .finish(),
            Self::Deauthenticate { addr, reason } => f
                .debug_struct("Deauthenticate")
                .field("addr", &mac_to_string(addr))
                .field("reason", reason)
                .finish(),
            Self::SetPort { addr, var, value } => f
                .debug_struct("SetPort")
                .field("addr", &mac_to_string(addr))
                .field("var", var)
                .field("value", value)
                .finish(),
            Self::ArmTimer { key, after } => f
                .debug_struct("ArmTimer")
                .field("key", key)
                .field("after", after)
                .finish(),
            Self::CancelTimer { key } => f.debug_struct("CancelTimer").field("key", key).finish(),
            Self::MicFailureReport { addr } => f
                .debug_struct("MicFailureReport")
                .field("addr", &mac_to_string(addr))
                .finish(),
            Self::AccountingStart { addr } => f
                .debug_struct("AccountingStart")
                .field("addr", &mac_to_string(addr))
                .finish(),
            Self::Notify { addr, event } => f
                .debug_struct("Notify")
                .field("addr", &mac_to_string(addr))
                .field("event", event)
                .finish(),
        }
    }
}

/// Ordered effect sink
#[derive(Debug, Default)]
pub struct Effects {
    items: Vec<Effect>,
}

impl Effects {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, effect: Effect) {
        self.items.push(effect);
    }

    pub fn send_eapol(&mut self, addr: MacAddr, frame: Vec<u8>, encrypt: bool) {
        self.push(Effect::SendEapol {
            addr,
            frame,
            encrypt,
        });
    }

    pub fn set_port(&mut self, addr: MacAddr, var: PortVar, value: bool) {
        self.push(Effect::SetPort { addr, var, value });
    }

    pub fn arm(&mut self, key: TimerKey, after: Duration) {
        self.push(Effect::ArmTimer { key, after });
    }

    pub fn cancel(&mut self, key: TimerKey) {
        self.push(Effect::CancelTimer { key });
    }

    pub fn deauthenticate(&mut self, addr: MacAddr, reason: u16) {
        self.push(Effect::Deauthenticate { addr, reason });
    }

    pub fn notify(&mut self, addr: MacAddr, event: Notification) {
        self.push(Effect::Notify { addr, event });
    }

    pub fn iter(&self) -> impl Iterator<Item = &Effect> {
        self.items.iter()
    }

    /// Frames queued for one station, in order
    pub fn frames_to<'a>(&'a self, addr: &'a MacAddr) -> impl Iterator<Item = &'a [u8]> + 'a {
        self.items.iter().filter_map(move |e| match e {
            Effect::SendEapol { addr: a, frame, .. } if a == addr => Some(frame.as_slice()),
            _ => None,
        })
    }

    pub fn drain(&mut self) -> std::vec::Drain<'_, Effect> {
        self.items.drain(..)
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    pub fn clear(&mut self) {
        self.items.clear();
    }
}

impl IntoIterator for Effects {
    type Item = Effect;
    type IntoIter = std::vec::IntoIter<Effect>;

    fn into_iter(self) -> Self::IntoIter {
        self.items.into_iter()
    }
}
