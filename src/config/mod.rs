//! Authenticator configuration
//!
//! Parses the INI-style configuration file of `wpa-authd`: security policy,
//! rekey intervals, handshake timeouts and pre-shared keys.

mod parser;
mod psk;

pub use parser::{
    AuthConfig, DEFAULT_GMK_REKEY, DEFAULT_GROUP_REKEY, DEFAULT_UPDATE_COUNT,
    DEFAULT_UPDATE_TIMEOUT, WPA_VERSION_RSN, WPA_VERSION_WPA,
};
pub use psk::PskStore;
