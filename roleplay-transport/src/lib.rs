//! Live conversation transport
//!
//! Owns one persistent bidirectional websocket session with the
//! conversational audio endpoint for the lifetime of a roleplay session.
//!
//! # Protocol
//!
//! - Client opens with a `setup` frame (model, voice, persona instruction)
//! - Server acknowledges with `setupComplete`
//! - Client streams `realtimeInput` frames, one per captured audio block
//! - Server streams `serverContent` frames carrying audio fragments and
//!   interruption signals, and may announce `goAway` before closing
//!
//! # Example Usage
//!
//! ```no_run
//! use std::sync::Arc;
//! use roleplay_transport::{
//!     Connector, EventSink, SessionSetup, TransportConfig, TransportEvent, WebSocketConnector,
//! };
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let connector = WebSocketConnector::new(TransportConfig::new("wss://example.com/live?key=KEY"));
//!
//!     let sink: EventSink = Arc::new(|event| match event {
//!         TransportEvent::Opened => println!("open"),
//!         TransportEvent::Message(message) => println!("{:?}", message),
//!         TransportEvent::Closed { reason } => println!("closed: {:?}", reason),
//!         TransportEvent::Error(e) => eprintln!("error: {}", e),
//!     });
//!
//!     let setup = SessionSetup {
//!         model: "gemini-2.5-flash-native-audio-preview-09-2025".to_string(),
//!         system_instruction: "You are a helpful narrator".to_string(),
//!         voice: "Kore".to_string(),
//!     };
//!
//!     let mut session = connector.open(setup, sink)?;
//!     session.send_audio("AAAA")?; // queued until the session is open
//!     session.close();
//!     Ok(())
//! }
//! ```

pub mod connection;
pub mod error;
pub mod events;
pub mod messages;

// Re-exports
pub use connection::{
    Connector, EventSink, LiveTransport, SessionSetup, SessionTransport, TransportConfig,
    WebSocketConnector,
};
pub use error::{Result, TransportError};
pub use events::{AudioFragment, InboundMessage, PlaybackAction, TransportEvent};
pub use messages::{ClientMessage, ServerEvent, ServerMessage, INPUT_MIME_TYPE};
