//! Authenticator runtime
//!
//! Main event loop that:
//! - Receives station commands (association, EAPOL-Key frames, 802.1X
//!   results) from the driver side
//! - Keeps the timer deadlines requested by the state machines
//! - Forwards every other effect to the driver side

use std::time::{Duration, Instant};

use tokio::sync::{mpsc, oneshot};

use crate::authenticator::{Authenticator, StaEvent};
use crate::crypto::prf::{Pmkid, PMK_LEN};
use crate::effects::{Effect, Effects};
use crate::error::{FrameError, PmksaError, PolicyError};
use crate::pmksa::PmksaAttrs;
use crate::protocol::eapol::MsgKind;
use crate::protocol::suites::{mac_to_string, MacAddr};
use crate::sm::EapolMirror;
use crate::stats::AuthenticatorStats;
use crate::timer::TimerQueue;

/// Depth of the command and effect channels
pub const CHANNEL_DEPTH: usize = 256;

/// Wake-up interval when no timer is armed
const IDLE_WAIT: Duration = Duration::from_secs(3600);

/// Requests from the driver / 802.1X side
pub enum StationCommand {
    /// (Re)Association Request carrying a WPA/RSN IE
    Associate {
        addr: MacAddr,
        ie: Vec<u8>,
        reply: oneshot::Sender<Result<(), PolicyError>>,
    },
    /// EAPOL-Key frame received from a station
    Eapol { addr: MacAddr, frame: Vec<u8> },
    Event { addr: MacAddr, event: StaEvent },
    Remove { addr: MacAddr },
    /// 802.1X key state changed (keyRun, keyAvailable, PMK)
    KeyAvailable { addr: MacAddr, state: EapolMirror },
    PmksaAdd {
        addr: MacAddr,
        pmk: [u8; PMK_LEN],
        session_timeout: Option<Duration>,
        attrs: PmksaAttrs,
        reply: oneshot::Sender<Result<Pmkid, PmksaError>>,
    },
    /// Force a GTK rekey now
    Rekey,
    /// MIB text for the BSS (`None`) or one station
    Mib {
        addr: Option<MacAddr>,
        reply: oneshot::Sender<Option<String>>,
    },
    Stats {
        reply: oneshot::Sender<AuthenticatorStats>,
    },
    Shutdown,
}

/// Authenticator server
pub struct AuthenticatorServer {
    auth: Authenticator,
    timers: TimerQueue,
    commands: mpsc::Receiver<StationCommand>,
    effects: mpsc::Sender<Effect>,
}

impl AuthenticatorServer {
    pub fn new(
        auth: Authenticator,
        commands: mpsc::Receiver<StationCommand>,
        effects: mpsc::Sender<Effect>,
    ) -> Self {
        Self {
            auth,
            timers: TimerQueue::new(),
            commands,
            effects,
        }
    }

    /// Create a server together with its command sender and effect receiver
    pub fn with_channels(
        auth: Authenticator,
    ) -> (Self, mpsc::Sender<StationCommand>, mpsc::Receiver<Effect>) {
        let (command_tx, command_rx) = mpsc::channel(CHANNEL_DEPTH);
        let (effect_tx, effect_rx) = mpsc::channel(CHANNEL_DEPTH);
        (Self::new(auth, command_rx, effect_tx), command_tx, effect_rx)
    }

    pub fn authenticator(&self) -> &Authenticator {
        &self.auth
    }

    pub fn timers(&self) -> &TimerQueue {
        &self.timers
    }

    /// Install the first GTK and serve commands until shutdown
    pub async fn run(&mut self) {
        let mut fx = Effects::new();
        self.auth.start(&mut fx);
        self.apply(fx).await;
        tracing::info!(
            "{}: authenticator started",
            mac_to_string(&self.auth.config().addr)
        );

        self.event_loop().await;
        tracing::info!("Authenticator stopped");
    }

    async fn event_loop(&mut self) {
        loop {
            let wake = match self.timers.next_deadline() {
                Some(deadline) => tokio::time::Instant::from_std(deadline),
                None => tokio::time::Instant::now() + IDLE_WAIT,
            };

            tokio::select! {
                command = self.commands.recv() => {
                    match command {
                        Some(StationCommand::Shutdown) => {
                            tracing::info!("Shutdown requested");
                            break;
                        }
                        Some(command) => self.handle_command(command).await,
                        None => {
                            // Channel closed, driver side is gone
                            tracing::info!("Command channel closed, shutting down");
                            break;
                        }
                    }
                }

                _ = tokio::time::sleep_until(wake) => self.fire_timers().await,
            }
        }
    }

    async fn handle_command(&mut self, command: StationCommand) {
        let mut fx = Effects::new();

        match command {
            StationCommand::Associate { addr, ie, reply } => {
                let result = self.auth.validate_sta_ie(&addr, &ie);
                match result {
                    Ok(()) => self.auth.sta_associated(&addr, &mut fx),
                    Err(e) => tracing::info!("{}: association rejected: {}", mac_to_string(&addr), e),
                }
                let _ = reply.send(result);
            }
            StationCommand::Eapol { addr, frame } => {
                match self.auth.receive_eapol(&addr, &frame, &mut fx) {
                    Ok(MsgKind::Request) => {
                        tracing::debug!("{}: EAPOL-Key request handled", mac_to_string(&addr))
                    }
                    Ok(_) => {}
                    Err(FrameError::UnknownStation) => {
                        tracing::debug!("{}: EAPOL-Key from unknown station", mac_to_string(&addr))
                    }
                    Err(e) => tracing::trace!("{}: EAPOL-Key dropped: {}", mac_to_string(&addr), e),
                }
            }
            StationCommand::Event { addr, event } => self.auth.sta_event(&addr, event, &mut fx),
            StationCommand::Remove { addr } => {
                self.auth.remove_station(&addr, &mut fx);
                self.timers.cancel_station(&addr);
            }
            StationCommand::KeyAvailable { addr, state } => {
                if self.auth.set_eapol_key_state(&addr, state) {
                    self.auth.sta_notify(&addr, &mut fx);
                } else {
                    tracing::debug!("{}: 802.1X key state for unknown station", mac_to_string(&addr));
                }
            }
            StationCommand::PmksaAdd {
                addr,
                pmk,
                session_timeout,
                attrs,
                reply,
            } => {
                let result =
                    self.auth
                        .pmksa_add(&addr, &pmk, session_timeout, attrs, Instant::now(), &mut fx);
                let _ = reply.send(result);
            }
            StationCommand::Rekey => self.auth.rekey_gtk(&mut fx),
            StationCommand::Mib { addr, reply } => {
                let text = match addr {
                    Some(addr) => self.auth.sta_mib_text(&addr),
                    None => Some(self.auth.mib_text()),
                };
                let _ = reply.send(text);
            }
            StationCommand::Stats { reply } => {
                let _ = reply.send(self.auth.stats());
            }
            StationCommand::Shutdown => {}
        }

        self.apply(fx).await;
    }

    async fn fire_timers(&mut self) {
        let now = Instant::now();
        while let Some(key) = self.timers.pop_due(now) {
            tracing::trace!("Timer {:?} expired", key);
            let mut fx = Effects::new();
            self.auth.timer_fired(key, now, &mut fx);
            self.apply(fx).await;
        }
    }

    /// Apply timer effects here and forward the rest
    async fn apply(&mut self, fx: Effects) {
        let now = Instant::now();
        for effect in fx {
            match effect {
                Effect::ArmTimer { key, after } => self.timers.arm(key, now + after),
                Effect::CancelTimer { key } => {
                    self.timers.cancel(key);
                }
                other => {
                    if self.effects.send(other).await.is_err() {
                        tracing::trace!("Effect receiver closed, effect dropped");
                    }
                }
            }
        }
    }
}
