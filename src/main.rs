//! wpa-authd - IEEE 802.11i authenticator daemon
//!
//! Loads an authenticator configuration and either validates it, prints the
//! BSS MIB, or runs the authenticator against simulated supplicants.

use std::collections::{HashMap, HashSet};
use std::path::{Path, PathBuf};
use std::process::ExitCode;
use std::time::Duration;

use anyhow::{anyhow, bail, Context};
use clap::{Parser, Subcommand};
use rand::rngs::StdRng;
use rand::SeedableRng;
use tokio::sync::{mpsc, oneshot};
use tracing_subscriber::{fmt, EnvFilter};

use wpa_authenticator::effects::{Effect, Notification};
use wpa_authenticator::protocol::{mac_to_string, Akm, Cipher, MacAddr, WpaVersion};
use wpa_authenticator::sim::Supplicant;
use wpa_authenticator::{AuthConfig, AuthError, Authenticator, AuthenticatorServer, StationCommand};

/// How long the simulation waits for the next effect
const SIM_STEP_TIMEOUT: Duration = Duration::from_secs(10);

/// wpa-authd - WPA/RSN authenticator
#[derive(Parser, Debug)]
#[command(name = "wpa-authd")]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Enable verbose logging
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Validate a configuration and print the advertised WPA/RSN IE
    Check {
        /// Path to authenticator configuration file
        #[arg(short, long)]
        config: PathBuf,
    },
    /// Print the BSS MIB after installing the first GTK
    Mib {
        #[arg(short, long)]
        config: PathBuf,

        /// Print JSON instead of MIB text
        #[arg(long)]
        json: bool,
    },
    /// Run 4-way and group handshakes against simulated stations
    Simulate {
        #[arg(short, long)]
        config: PathBuf,

        /// Number of simulated stations
        #[arg(long, default_value_t = 4, value_parser = clap::value_parser!(u8).range(1..))]
        stations: u8,
    },
}

#[tokio::main]
async fn main() -> ExitCode {
    let args = Args::parse();

    // Set up logging
    let filter = if args.verbose {
        EnvFilter::new("debug")
    } else {
        EnvFilter::new("info")
    };

    fmt().with_env_filter(filter).with_target(false).init();

    match run(args).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => match e.downcast_ref::<AuthError>() {
            Some(auth) => {
                eprintln!("Error: {}", auth.user_message());
                exit_code(auth)
            }
            None => {
                eprintln!("Error: {:#}", e);
                ExitCode::from(255)
            }
        },
    }
}

async fn run(args: Args) -> anyhow::Result<()> {
    match args.command {
        Command::Check { config } => {
            let config = load_config(&config)?;
            let auth = new_authenticator(config)?;
            let config = auth.config();
            println!("Address:   {}", mac_to_string(&config.addr));
            println!("KeyMgmt:   {}", config.key_mgmt);
            println!("Pairwise:  {}", config.pairwise);
            println!("Group:     {}", config.group_cipher);
            println!("PSKs:      {}", config.psks.len());
            println!("WPA IE:    {}", hex::encode(auth.wpa_ie()));
            Ok(())
        }
        Command::Mib { config, json } => {
            let config = load_config(&config)?;
            let mut auth = new_authenticator(config)?;
            let mut fx = wpa_authenticator::Effects::new();
            auth.start(&mut fx);
            if json {
                println!("{}", serde_json::to_string_pretty(&auth.stats())?);
            } else {
                print!("{}", auth.mib_text());
            }
            Ok(())
        }
        Command::Simulate { config, stations } => {
            let config = load_config(&config)?;
            simulate(config, stations).await
        }
    }
}

fn load_config(path: &Path) -> Result<AuthConfig, AuthError> {
    tracing::info!("Loading configuration from: {}", path.display());
    Ok(AuthConfig::from_file(path)?)
}

fn new_authenticator(config: AuthConfig) -> Result<Authenticator, AuthError> {
    Authenticator::new(config, Box::new(StdRng::from_entropy()))
}

async fn send(commands: &mpsc::Sender<StationCommand>, command: StationCommand) -> anyhow::Result<()> {
    commands
        .send(command)
        .await
        .map_err(|_| anyhow!("authenticator stopped"))
}

/// Associate `count` simulated stations, complete their handshakes, force
/// one GTK rekey and wait until every station has the new GTK
async fn simulate(config: AuthConfig, count: u8) -> anyhow::Result<()> {
    if !config.key_mgmt.contains(Akm::Psk) {
        bail!("simulation needs WPA-PSK in WpaKeyMgmt");
    }
    let aa = config.addr;
    let version = if config.rsn_enabled() {
        WpaVersion::Rsn
    } else {
        WpaVersion::Wpa
    };
    let pairwise = if config.pairwise.contains(Cipher::Ccmp) {
        Cipher::Ccmp
    } else {
        Cipher::Tkip
    };
    let group = config.group_cipher;

    let mut sups: HashMap<MacAddr, Supplicant> = HashMap::new();
    for n in 1..=count {
        let addr: MacAddr = [0x02, 0x00, 0x5e, 0x00, 0x00, n];
        let psk = *config
            .psks
            .first(&addr)
            .with_context(|| format!("no PSK for {}", mac_to_string(&addr)))?;
        let sup = Supplicant::new(addr, aa, psk, version, pairwise, group, Akm::Psk)
            .map_err(AuthError::from)?;
        sups.insert(addr, sup);
    }

    let auth = new_authenticator(config)?;
    let (mut server, commands, mut server_effects) = AuthenticatorServer::with_channels(auth);
    let task = tokio::spawn(async move {
        server.run().await;
        server
    });

    // Keep the server's effect channel drained while this task waits on
    // command replies
    let (effect_tx, mut effects) = mpsc::unbounded_channel();
    let forward = tokio::spawn(async move {
        while let Some(effect) = server_effects.recv().await {
            if effect_tx.send(effect).is_err() {
                break;
            }
        }
    });

    for sup in sups.values() {
        let (reply, rx) = oneshot::channel();
        send(
            &commands,
            StationCommand::Associate {
                addr: sup.addr(),
                ie: sup.ie().to_vec(),
                reply,
            },
        )
        .await?;
        rx.await?.map_err(AuthError::from)?;
    }

    // WPA stations get their first GTK through a separate group handshake
    let initial_group = version == WpaVersion::Wpa;
    let total = usize::from(count);
    let mut paired = HashSet::new();
    let mut grouped = HashSet::new();
    let mut rekeyed = false;

    loop {
        let effect = tokio::time::timeout(SIM_STEP_TIMEOUT, effects.recv())
            .await
            .context("simulation stalled")?
            .context("authenticator stopped")?;

        match effect {
            Effect::SendEapol { addr, frame, .. } => {
                if let Some(sup) = sups.get_mut(&addr) {
                    let reply = sup.handle(&frame)?;
                    send(&commands, StationCommand::Eapol { addr, frame: reply }).await?;
                }
            }
            Effect::Notify { addr, event } => match event {
                Notification::PairwiseComplete => {
                    paired.insert(addr);
                }
                Notification::GroupComplete => {
                    grouped.insert(addr);
                }
                Notification::HandshakeFailed => {
                    bail!("handshake failed for {}", mac_to_string(&addr))
                }
            },
            Effect::Deauthenticate { addr, reason } => {
                bail!("{} deauthenticated (reason {})", mac_to_string(&addr), reason)
            }
            _ => {}
        }

        if !rekeyed {
            if paired.len() == total && (!initial_group || grouped.len() == total) {
                println!("{} stations completed the 4-way handshake", total);
                grouped.clear();
                rekeyed = true;
                send(&commands, StationCommand::Rekey).await?;
            }
        } else if grouped.len() == total {
            println!("{} stations completed the group key handshake", total);
            break;
        }
    }

    let (reply, rx) = oneshot::channel();
    send(&commands, StationCommand::Stats { reply }).await?;
    let stats = rx.await?;
    send(&commands, StationCommand::Shutdown).await?;
    let server = task.await?;
    forward.abort();

    let gtk = server.authenticator().group().current_gtk();
    let in_sync = sups.values().filter(|sup| sup.gtk() == Some(gtk)).count();
    println!("{}/{} stations hold the current GTK", in_sync, total);
    println!("{}", serde_json::to_string_pretty(&stats)?);

    if in_sync != total {
        bail!("GTK mismatch after rekey");
    }
    Ok(())
}

/// Get exit code for error
fn exit_code(error: &AuthError) -> ExitCode {
    u8::try_from(error.exit_code())
        .map(ExitCode::from)
        .unwrap_or(ExitCode::FAILURE)
}
