//! 802.11i wire formats
//!
//! This module contains:
//! - Cipher and AKM suite selectors
//! - WPA/RSN information elements and key data encapsulations
//! - EAPOL-Key frame codec, replay counters and outgoing frame builder

pub mod cursor;
pub mod eapol;
pub mod framer;
pub mod ie;
pub mod kde;
pub mod replay;
pub mod suites;

pub use eapol::{EapolKeyFrame, KeyInfo, MsgKind};
pub use framer::{build_key_frame, FrameContext, KeyFrameRequest};
pub use ie::IeData;
pub use replay::{KeyReplayCounter, RequestReplay};
pub use suites::{mac_to_string, parse_mac, Akm, AkmSet, Cipher, CipherSet, MacAddr, WpaVersion};
