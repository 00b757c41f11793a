//! One live session over a websocket
//!
//! A single tokio task owns the socket. It connects, sends the setup frame,
//! waits for the acknowledgement, then multiplexes the outbound queue with
//! inbound frames until either side closes. Callers never touch the socket:
//! they push onto an unbounded queue and receive [`TransportEvent`]s through
//! a sink.

use std::sync::Arc;
use std::time::Duration;

use futures_util::{SinkExt, StreamExt};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_tungstenite::tungstenite::Message as WsMessage;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};
use url::Url;

use crate::error::{Result, TransportError};
use crate::events::TransportEvent;
use crate::messages::{ClientMessage, ServerEvent, ServerMessage};

/// Receives every event of one transport, from the transport's task
pub type EventSink = Arc<dyn Fn(TransportEvent) + Send + Sync>;

const DEFAULT_SETUP_TIMEOUT: Duration = Duration::from_secs(10);

/// Where and how to connect
#[derive(Debug, Clone)]
pub struct TransportConfig {
    /// Full websocket URL, credentials included
    pub url: String,
    /// Upper bound on connect + setup acknowledgement
    pub setup_timeout: Duration,
}

impl TransportConfig {
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            setup_timeout: DEFAULT_SETUP_TIMEOUT,
        }
    }

    pub fn with_setup_timeout(mut self, timeout: Duration) -> Self {
        self.setup_timeout = timeout;
        self
    }
}

/// Persona of one session
#[derive(Debug, Clone, PartialEq)]
pub struct SessionSetup {
    pub model: String,
    pub system_instruction: String,
    pub voice: String,
}

impl SessionSetup {
    pub fn to_message(&self) -> ClientMessage {
        ClientMessage::setup(&self.model, &self.voice, &self.system_instruction)
    }
}

/// Sending half of an open (or opening) session
pub trait SessionTransport: Send {
    /// Queue one base64 PCM16 block. Blocks queued before the session is
    /// open are sent, in order, once it is.
    fn send_audio(&self, data: &str) -> Result<()>;

    /// Close the session. Idempotent.
    fn close(&mut self);
}

/// Opens sessions. Must be called from within a tokio runtime.
pub trait Connector: Send + Sync {
    fn open(&self, setup: SessionSetup, sink: EventSink) -> Result<Box<dyn SessionTransport>>;
}

/// Production connector for the live websocket endpoint
#[derive(Debug, Clone)]
pub struct WebSocketConnector {
    config: TransportConfig,
}

impl WebSocketConnector {
    pub fn new(config: TransportConfig) -> Self {
        Self { config }
    }
}

impl Connector for WebSocketConnector {
    fn open(&self, setup: SessionSetup, sink: EventSink) -> Result<Box<dyn SessionTransport>> {
        let transport = LiveTransport::open(&self.config, &setup, sink)?;
        Ok(Box::new(transport))
    }
}

/// Handle to a running session task
pub struct LiveTransport {
    outbound: mpsc::UnboundedSender<String>,
    cancel: CancellationToken,
    task: Option<JoinHandle<()>>,
}

impl LiveTransport {
    /// Start connecting in the background. Returns immediately; the outcome
    /// arrives as `Opened` or `Error` on `sink`.
    pub fn open(config: &TransportConfig, setup: &SessionSetup, sink: EventSink) -> Result<Self> {
        let url = Url::parse(&config.url)?;
        let setup_frame = setup.to_message().to_json()?;

        let (outbound, outbound_rx) = mpsc::unbounded_channel();
        let cancel = CancellationToken::new();

        let session = SessionTask {
            url,
            setup_frame,
            setup_timeout: config.setup_timeout,
            outbound: outbound_rx,
            cancel: cancel.clone(),
            sink,
        };

        info!("Opening live session (model: {}, voice: {})", setup.model, setup.voice);
        let task = tokio::spawn(session.run());

        Ok(Self {
            outbound,
            cancel,
            task: Some(task),
        })
    }

    pub fn is_closed(&self) -> bool {
        self.cancel.is_cancelled() || self.outbound.is_closed()
    }
}

impl SessionTransport for LiveTransport {
    fn send_audio(&self, data: &str) -> Result<()> {
        if self.cancel.is_cancelled() {
            return Err(TransportError::Closed);
        }

        let frame = ClientMessage::realtime_audio(data).to_json()?;
        self.outbound
            .send(frame)
            .map_err(|_| TransportError::Closed)
    }

    fn close(&mut self) {
        if !self.cancel.is_cancelled() {
            debug!("Closing live session");
            self.cancel.cancel();
        }
        // The task finishes on its own after the close handshake
        self.task.take();
    }
}

impl Drop for LiveTransport {
    fn drop(&mut self) {
        self.cancel.cancel();
    }
}

/// State owned by the socket task
struct SessionTask {
    url: Url,
    setup_frame: String,
    setup_timeout: Duration,
    outbound: mpsc::UnboundedReceiver<String>,
    cancel: CancellationToken,
    sink: EventSink,
}

type WsStream =
    tokio_tungstenite::WebSocketStream<tokio_tungstenite::MaybeTlsStream<tokio::net::TcpStream>>;
type WsWrite = futures_util::stream::SplitSink<WsStream, WsMessage>;
type WsRead = futures_util::stream::SplitStream<WsStream>;

const CLIENT_CLOSE_REASON: &str = "closed by client";

impl SessionTask {
    async fn run(mut self) {
        // Exactly one terminal event per session
        match self.drive().await {
            Ok(reason) => {
                info!(
                    "Live session closed: {}",
                    reason.as_deref().unwrap_or("no reason given")
                );
                (self.sink)(TransportEvent::Closed { reason });
            }
            Err(e) => {
                error!("Live session failed: {}", e);
                (self.sink)(TransportEvent::Error(e));
            }
        }
    }

    async fn drive(&mut self) -> Result<Option<String>> {
        let (mut write, mut read) = match self.establish().await? {
            Some(halves) => halves,
            None => return Ok(Some(CLIENT_CLOSE_REASON.to_string())),
        };

        info!("Live session open");
        (self.sink)(TransportEvent::Opened);

        loop {
            tokio::select! {
                _ = self.cancel.cancelled() => {
                    let _ = write.close().await;
                    return Ok(Some(CLIENT_CLOSE_REASON.to_string()));
                }
                frame = self.outbound.recv() => match frame {
                    Some(frame) => {
                        write
                            .send(WsMessage::Text(frame))
                            .await
                            .map_err(|e| TransportError::ConnectionLost(e.to_string()))?;
                    }
                    None => {
                        let _ = write.close().await;
                        return Ok(Some(CLIENT_CLOSE_REASON.to_string()));
                    }
                },
                msg = read.next() => match msg {
                    Some(Ok(WsMessage::Text(text))) => self.dispatch(&text),
                    Some(Ok(WsMessage::Binary(bytes))) => match std::str::from_utf8(&bytes) {
                        Ok(text) => self.dispatch(text),
                        Err(_) => warn!("Ignoring non-UTF-8 binary frame ({} bytes)", bytes.len()),
                    },
                    Some(Ok(WsMessage::Ping(data))) => {
                        write
                            .send(WsMessage::Pong(data))
                            .await
                            .map_err(|e| TransportError::ConnectionLost(e.to_string()))?;
                    }
                    Some(Ok(WsMessage::Close(frame))) => {
                        return Ok(frame.map(|f| f.reason.to_string()));
                    }
                    Some(Ok(_)) => {}
                    Some(Err(e)) => return Err(TransportError::ConnectionLost(e.to_string())),
                    None => return Err(TransportError::ConnectionLost("stream ended".to_string())),
                },
            }
        }
    }

    /// Connect and complete setup within the timeout. `None` means the
    /// client closed first.
    async fn establish(&mut self) -> Result<Option<(WsWrite, WsRead)>> {
        let timeout = self.setup_timeout;
        let cancel = self.cancel.clone();

        tokio::select! {
            _ = cancel.cancelled() => Ok(None),
            _ = tokio::time::sleep(timeout) => Err(TransportError::Setup(format!(
                "no response from the service within {}s",
                timeout.as_secs_f32()
            ))),
            result = self.handshake() => result.map(Some),
        }
    }

    async fn handshake(&mut self) -> Result<(WsWrite, WsRead)> {
        let host = self.url.host_str().unwrap_or("unknown host").to_string();
        debug!("Connecting to {}", host);

        let (ws_stream, _) = tokio_tungstenite::connect_async(self.url.as_str())
            .await
            .map_err(|e| TransportError::Connect(e.to_string()))?;
        let (mut write, mut read) = ws_stream.split();

        write
            .send(WsMessage::Text(self.setup_frame.clone()))
            .await
            .map_err(|e| TransportError::Setup(e.to_string()))?;

        loop {
            let text = match read.next().await {
                Some(Ok(WsMessage::Text(text))) => text,
                Some(Ok(WsMessage::Binary(bytes))) => String::from_utf8_lossy(&bytes).into_owned(),
                Some(Ok(WsMessage::Ping(data))) => {
                    let _ = write.send(WsMessage::Pong(data)).await;
                    continue;
                }
                Some(Ok(WsMessage::Close(frame))) => {
                    // Rejected keys and models surface here with a reason
                    let reason = frame
                        .map(|f| f.reason.to_string())
                        .filter(|r| !r.is_empty())
                        .unwrap_or_else(|| "closed by the service".to_string());
                    return Err(TransportError::Setup(reason));
                }
                Some(Ok(_)) => continue,
                Some(Err(e)) => return Err(TransportError::Setup(e.to_string())),
                None => return Err(TransportError::Setup("connection ended during setup".to_string())),
            };

            match ServerMessage::parse(&text).map(ServerMessage::into_event) {
                Ok(ServerEvent::SetupComplete) => return Ok((write, read)),
                Ok(other) => debug!("Ignoring frame before setup completed: {:?}", other),
                Err(e) => warn!("Unparseable frame during setup: {}", e),
            }
        }
    }

    fn dispatch(&self, text: &str) {
        match ServerMessage::parse(text).map(ServerMessage::into_event) {
            Ok(ServerEvent::Content(message)) => (self.sink)(TransportEvent::Message(message)),
            Ok(ServerEvent::GoAway { time_left }) => {
                warn!(
                    "Service will close the session soon (time left: {})",
                    time_left.as_deref().unwrap_or("unknown")
                );
            }
            Ok(ServerEvent::SetupComplete) => debug!("Duplicate setup acknowledgement"),
            Ok(ServerEvent::Ignored) => {}
            Err(e) => warn!("Skipping malformed frame: {}", e),
        }
    }
}
