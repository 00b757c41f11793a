//! Roleplay Live
//!
//! Real-time voice roleplay: the microphone streams to a conversational
//! model over a websocket while the model's spoken replies play back
//! gaplessly, and barge-in from the user cuts playback off at once.
//!
//! ```no_run
//! use roleplay_live::{LiveClient, LiveConfig};
//!
//! # async fn demo() -> anyhow::Result<()> {
//! let config = LiveConfig::load()?;
//! let client = LiveClient::new(config);
//! client.on_status_change(|status| println!("status: {}", status));
//! client.on_error(|err| eprintln!("{}", err));
//! client.connect("You are a helpful narrator", "Kore");
//! # Ok(())
//! # }
//! ```

pub mod config;
pub mod controller;
pub mod error;
pub mod scenario;
pub mod session;
pub mod status;
pub mod version;

pub use config::{is_secure_endpoint, LiveConfig};
pub use controller::{ErrorCallback, LiveClient, StatusCallback, VolumeCallback};
pub use error::{LiveError, Result};
pub use scenario::{Difficulty, Scenario, DEFAULT_VOICE, VOICES};
pub use session::{Session, SessionStats};
pub use status::SessionStatus;
