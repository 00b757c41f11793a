//! Roleplay - live voice practice against a conversational model
//!
//! Pick a scenario, talk, get interrupted, interrupt back. Ctrl-C ends the
//! session and releases the microphone.

use std::io::Write;
use std::path::PathBuf;

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use roleplay_audio::CpalBackend;
use roleplay_live::scenario::{is_known_voice, voice_description};
use roleplay_live::version::version_long;
use roleplay_live::{LiveClient, LiveConfig, SessionStatus, VOICES};
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "roleplay", version, about = "Real-time voice roleplay practice")]
struct Cli {
    /// Config file (default: <config dir>/roleplay/config.toml)
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// List configured scenarios and voices
    Scenarios,
    /// List audio devices
    Devices,
    /// Show version and build information
    Version,
    /// Start a live session
    Run {
        /// Scenario id
        scenario: Option<String>,

        /// Ad-hoc persona instead of a scenario
        #[arg(long, conflicts_with = "scenario")]
        instruction: Option<String>,

        /// Voice override
        #[arg(long)]
        voice: Option<String>,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with_target(false)
        .with_level(true)
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();

    match cli.command {
        Commands::Version => {
            print!("{}", version_long());
            Ok(())
        }
        Commands::Devices => CpalBackend::print_devices().context("Failed to list audio devices"),
        Commands::Scenarios => {
            let config = load_config(cli.config)?;
            print_scenarios(&config);
            Ok(())
        }
        Commands::Run {
            scenario,
            instruction,
            voice,
        } => {
            let config = load_config(cli.config)?;
            run(config, scenario, instruction, voice).await
        }
    }
}

fn load_config(path: Option<PathBuf>) -> Result<LiveConfig> {
    let config = match path {
        Some(path) => LiveConfig::load_from(path)?,
        None => LiveConfig::load()?,
    };
    info!("Configuration loaded from {}", config.config_path.display());
    Ok(config)
}

fn print_scenarios(config: &LiveConfig) {
    println!("Scenarios:");
    for scenario in &config.scenarios {
        println!("  {:<12} {} [{:?}, voice {}]", scenario.id, scenario.title, scenario.difficulty, scenario.voice);
        println!("  {:<12} {}", "", scenario.description);
    }

    println!();
    println!("Voices:");
    for voice in VOICES {
        println!("  {:<8} {}", voice, voice_description(voice).unwrap_or_default());
    }
}

async fn run(
    config: LiveConfig,
    scenario: Option<String>,
    instruction: Option<String>,
    voice: Option<String>,
) -> Result<()> {
    let (instruction, scenario_voice) = match (scenario, instruction) {
        (Some(id), _) => {
            let Some(scenario) = config.find_scenario(&id) else {
                bail!("Unknown scenario '{}'. Run `roleplay scenarios` to list them", id);
            };
            info!("Scenario: {} ({})", scenario.title, scenario.role);
            (scenario.system_instruction.clone(), Some(scenario.voice.clone()))
        }
        (None, Some(instruction)) => (instruction, None),
        (None, None) => bail!("Pass a scenario id or --instruction"),
    };

    let voice = voice
        .or(scenario_voice)
        .unwrap_or_else(|| config.default_voice.clone());
    if !is_known_voice(&voice) {
        warn!("Voice '{}' is not one of {}; the service may reject it", voice, VOICES.join(", "));
    }

    let client = LiveClient::new(config);
    client.on_status_change(|status| info!("Session {}", status));
    client.on_volume_level(|level| {
        let bars = (level.clamp(0.0, 50.0) / 2.5) as usize;
        eprint!("\r  mic [{:<20}]", "#".repeat(bars));
        let _ = std::io::stderr().flush();
    });
    client.on_error(|err| eprintln!("\n{}", err));

    let mut status = client.watch_status();
    client.connect(instruction, voice);
    println!("Speak when connected. Press Ctrl-C to end the session.");

    let outcome = loop {
        tokio::select! {
            _ = tokio::signal::ctrl_c() => {
                eprintln!();
                info!("Ending session");
                client.disconnect();
                let _ = client.settled().await;
                break SessionStatus::Disconnected;
            }
            changed = status.changed() => {
                if changed.is_err() {
                    break SessionStatus::Error;
                }
                let current = *status.borrow_and_update();
                if matches!(current, SessionStatus::Disconnected | SessionStatus::Error) {
                    break current;
                }
            }
        }
    };

    client.shutdown().await;

    if outcome == SessionStatus::Error {
        bail!("Session ended with an error");
    }
    Ok(())
}
