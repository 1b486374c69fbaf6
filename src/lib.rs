//! wpa-authenticator - IEEE 802.11i Authenticator
//!
//! The key management core of a WPA/WPA2 access point.
//!
//! # Features
//!
//! - 4-way handshake (WPA_PTK) and group key handshake (WPA_PTK_GROUP)
//! - BSS-wide GTK lifecycle with strict and periodic rekeying (WPA_GROUP)
//! - WPA and RSN information element codec and policy negotiation
//! - PMKSA cache with PMKID lookup and expiry
//! - EAPOL-Key framing: MIC, AES key wrap / RC4 key data, replay counters
//!
//! The core performs no I/O. Every operation records what must happen
//! (frames to send, keys to install, timers to arm) in an [`Effects`] sink;
//! [`AuthenticatorServer`] applies them from a tokio event loop.
//!
//! # Usage
//!
//! ```no_run
//! use wpa_authenticator::{AuthConfig, Authenticator, AuthenticatorServer};
//! use rand::SeedableRng;
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let config = AuthConfig::from_file("wpa-authd.conf")?;
//!     let auth = Authenticator::new(config, Box::new(rand::rngs::StdRng::from_entropy()))?;
//!     let (mut server, _commands, _effects) = AuthenticatorServer::with_channels(auth);
//!     server.run().await;
//!     Ok(())
//! }
//! ```

pub mod authenticator;
pub mod config;
pub mod crypto;
pub mod effects;
pub mod error;
pub mod pmksa;
pub mod protocol;
pub mod server;
pub mod sim;
pub mod sm;
pub mod stats;
pub mod timer;

pub use authenticator::{Authenticator, StaEvent};
pub use config::AuthConfig;
pub use effects::{Effect, Effects};
pub use error::AuthError;
pub use server::{AuthenticatorServer, StationCommand};
pub use stats::{AuthenticatorStats, StationStats};
pub use timer::{StationHandle, TimerKey};
