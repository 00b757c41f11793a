//! Session lifecycle controller
//!
//! [`LiveClient`] is a handle to a single tokio task that owns every
//! session resource. Commands from the caller and events from the
//! microphone, the speaker and the connection all arrive on one queue, so
//! they are handled strictly one at a time and in arrival order. Events are
//! tagged with the session that produced them; anything tagged with an
//! older session is dropped, which makes late callbacks from a torn-down
//! session harmless.

use std::sync::Arc;

use parking_lot::Mutex;
use roleplay_audio::{
    AudioBackend, CaptureBlock, CapturePipeline, CpalBackend, EndedCallback, PlaybackScheduler,
    SourceId,
};
use roleplay_transport::{
    Connector, EventSink, InboundMessage, SessionSetup, TransportConfig, TransportError,
    TransportEvent, WebSocketConnector,
};
use tokio::sync::{mpsc, oneshot, watch};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use crate::config::{is_secure_endpoint, LiveConfig};
use crate::error::{LiveError, Result};
use crate::session::{is_output_lost, Session};
use crate::status::SessionStatus;

pub type StatusCallback = Arc<dyn Fn(SessionStatus) + Send + Sync>;
pub type VolumeCallback = Arc<dyn Fn(f32) + Send + Sync>;
pub type ErrorCallback = Arc<dyn Fn(&LiveError) + Send + Sync>;

#[derive(Default)]
struct Callbacks {
    status: Option<StatusCallback>,
    volume: Option<VolumeCallback>,
    error: Option<ErrorCallback>,
}

enum Command {
    Connect {
        system_instruction: String,
        voice: String,
    },
    Disconnect,
    /// Answered once everything queued before it has been handled
    Sync(oneshot::Sender<()>),
    Shutdown,
}

#[derive(Debug)]
enum SessionEvent {
    CaptureBlock(CaptureBlock),
    Opened,
    Inbound(InboundMessage),
    PlaybackEnded(SourceId),
    TransportClosed(Option<String>),
    TransportError(TransportError),
}

enum Inbox {
    Command(Command),
    Session { id: u64, event: SessionEvent },
}

type InboxSender = mpsc::UnboundedSender<Inbox>;

fn session_event(inbox: &InboxSender, id: u64, event: SessionEvent) {
    // The controller may already be gone during shutdown
    let _ = inbox.send(Inbox::Session { id, event });
}

/// Client for live voice sessions
///
/// At most one session exists at a time. Starting a new one tears down the
/// previous session first. Must be created inside a tokio runtime.
pub struct LiveClient {
    inbox: InboxSender,
    callbacks: Arc<Mutex<Callbacks>>,
    status: watch::Receiver<SessionStatus>,
    task: Option<JoinHandle<()>>,
}

impl LiveClient {
    /// Client backed by the system audio devices and the websocket endpoint
    pub fn new(config: LiveConfig) -> Self {
        let transport = TransportConfig::new(config.session_url())
            .with_setup_timeout(config.setup_timeout());

        Self::with_backends(
            config,
            Arc::new(CpalBackend::new()),
            Arc::new(WebSocketConnector::new(transport)),
        )
    }

    pub fn with_backends(
        config: LiveConfig,
        audio: Arc<dyn AudioBackend>,
        connector: Arc<dyn Connector>,
    ) -> Self {
        let (inbox, inbox_rx) = mpsc::unbounded_channel();
        let (status_tx, status) = watch::channel(SessionStatus::Idle);
        let callbacks = Arc::new(Mutex::new(Callbacks::default()));

        let controller = Controller {
            config,
            audio,
            connector,
            callbacks: Arc::clone(&callbacks),
            status_tx,
            inbox: inbox.clone(),
            session: None,
            next_session_id: 1,
        };
        let task = tokio::spawn(controller.run(inbox_rx));

        Self {
            inbox,
            callbacks,
            status,
            task: Some(task),
        }
    }

    /// Start a session with the given persona and voice.
    ///
    /// Returns immediately; progress is reported through the status and
    /// error callbacks.
    pub fn connect(&self, system_instruction: impl Into<String>, voice: impl Into<String>) {
        self.send(Command::Connect {
            system_instruction: system_instruction.into(),
            voice: voice.into(),
        });
    }

    /// End the current session, if any. Safe to call in any state.
    pub fn disconnect(&self) {
        self.send(Command::Disconnect);
    }

    pub fn on_status_change<F>(&self, callback: F)
    where
        F: Fn(SessionStatus) + Send + Sync + 'static,
    {
        self.callbacks.lock().status = Some(Arc::new(callback));
    }

    /// Receives the microphone level of every outbound block
    pub fn on_volume_level<F>(&self, callback: F)
    where
        F: Fn(f32) + Send + Sync + 'static,
    {
        self.callbacks.lock().volume = Some(Arc::new(callback));
    }

    pub fn on_error<F>(&self, callback: F)
    where
        F: Fn(&LiveError) + Send + Sync + 'static,
    {
        self.callbacks.lock().error = Some(Arc::new(callback));
    }

    pub fn status(&self) -> SessionStatus {
        *self.status.borrow()
    }

    pub fn watch_status(&self) -> watch::Receiver<SessionStatus> {
        self.status.clone()
    }

    /// Wait until every command and event queued so far has been handled
    pub async fn settled(&self) -> Result<()> {
        let (done, wait) = oneshot::channel();
        self.inbox
            .send(Inbox::Command(Command::Sync(done)))
            .map_err(|_| LiveError::ClientClosed)?;
        wait.await.map_err(|_| LiveError::ClientClosed)
    }

    /// Release the current session and stop the controller
    pub async fn shutdown(mut self) {
        self.send(Command::Shutdown);
        if let Some(task) = self.task.take() {
            if let Err(e) = task.await {
                warn!("Controller task ended abnormally: {}", e);
            }
        }
    }

    fn send(&self, command: Command) {
        if self.inbox.send(Inbox::Command(command)).is_err() {
            warn!("Live client controller is no longer running");
        }
    }
}

impl Drop for LiveClient {
    fn drop(&mut self) {
        let _ = self.inbox.send(Inbox::Command(Command::Shutdown));
    }
}

struct Controller {
    config: LiveConfig,
    audio: Arc<dyn AudioBackend>,
    connector: Arc<dyn Connector>,
    callbacks: Arc<Mutex<Callbacks>>,
    status_tx: watch::Sender<SessionStatus>,
    inbox: InboxSender,
    session: Option<Session>,
    next_session_id: u64,
}

impl Controller {
    async fn run(mut self, mut inbox: mpsc::UnboundedReceiver<Inbox>) {
        debug!("Live client controller started");

        while let Some(message) = inbox.recv().await {
            match message {
                Inbox::Command(Command::Connect {
                    system_instruction,
                    voice,
                }) => self.connect(system_instruction, voice).await,
                Inbox::Command(Command::Disconnect) => self.disconnect().await,
                Inbox::Command(Command::Sync(done)) => {
                    let _ = done.send(());
                }
                Inbox::Command(Command::Shutdown) => break,
                Inbox::Session { id, event } => {
                    if self.session.as_ref().map(Session::id) != Some(id) {
                        debug!("Dropping event from stale session {}: {:?}", id, event);
                        continue;
                    }
                    self.handle_event(event).await;
                }
            }
        }

        if let Some(session) = self.session.take() {
            release(session).await;
        }
        info!("Live client controller stopped");
    }

    async fn connect(&mut self, system_instruction: String, voice: String) {
        if let Some(previous) = self.session.take() {
            info!("Replacing session {}", previous.id());
            release(previous).await;
        }

        self.set_status(SessionStatus::Connecting);

        match self.start_session(system_instruction, voice).await {
            Ok(session) => {
                info!("Session {} connecting (voice: {})", session.id(), session.voice());
                self.session = Some(session);
            }
            Err(e) => self.fail(e).await,
        }
    }

    fn check_preconditions(&self) -> Result<()> {
        if self.config.api_key().is_none() {
            return Err(LiveError::MissingApiKey);
        }
        if !self.audio.is_available() {
            return Err(LiveError::MicrophoneApiUnavailable);
        }
        if !is_secure_endpoint(&self.config.endpoint) {
            return Err(LiveError::InsecureEndpoint(self.config.endpoint_host()));
        }
        Ok(())
    }

    /// Acquire microphone, speaker and connection in that order. Anything
    /// acquired before a failure is released before this returns.
    async fn start_session(&mut self, system_instruction: String, voice: String) -> Result<Session> {
        self.check_preconditions()?;

        let id = self.next_session_id;
        self.next_session_id += 1;

        let (capture, playback) = self.acquire_devices(id).await?;

        let sink: EventSink = {
            let inbox = self.inbox.clone();
            Arc::new(move |event: TransportEvent| {
                let event = match event {
                    TransportEvent::Opened => SessionEvent::Opened,
                    TransportEvent::Message(message) => SessionEvent::Inbound(message),
                    TransportEvent::Closed { reason } => SessionEvent::TransportClosed(reason),
                    TransportEvent::Error(e) => SessionEvent::TransportError(e),
                };
                session_event(&inbox, id, event);
            })
        };

        let setup = SessionSetup {
            model: self.config.model.clone(),
            system_instruction,
            voice: voice.clone(),
        };
        let transport = match self.connector.open(setup, sink) {
            Ok(transport) => transport,
            Err(e) => {
                let devices = (capture, playback);
                let _ = tokio::task::spawn_blocking(move || drop(devices)).await;
                return Err(LiveError::from_transport(e));
            }
        };

        Ok(Session::new(
            id,
            voice,
            capture,
            playback,
            transport,
            self.config.playback.sample_rate,
        ))
    }

    /// Open the microphone and the speaker on the blocking pool. Device
    /// setup can wait on an OS permission dialog.
    fn acquire_devices(
        &self,
        id: u64,
    ) -> impl std::future::Future<Output = Result<(CapturePipeline, PlaybackScheduler)>> + Send + 'static
    {
        let audio = Arc::clone(&self.audio);
        let capture_config = self.config.capture.clone();
        let playback_config = self.config.playback.clone();
        let on_ended: EndedCallback = {
            let inbox = self.inbox.clone();
            Arc::new(move |source: SourceId| {
                session_event(&inbox, id, SessionEvent::PlaybackEnded(source))
            })
        };

        async move {
            tokio::task::spawn_blocking(move || {
                let microphone = audio
                    .acquire_microphone(&capture_config)
                    .map_err(LiveError::from_microphone)?;
                let capture = CapturePipeline::new(microphone, capture_config.block_size);

                let output = audio
                    .open_output(&playback_config, on_ended)
                    .map_err(LiveError::from_output)?;
                Ok((capture, PlaybackScheduler::new(output)))
            })
            .await
            .map_err(|e| LiveError::MicrophoneUnavailable(format!("device setup aborted: {}", e)))?
        }
    }

    async fn disconnect(&mut self) {
        match self.session.take() {
            Some(session) => {
                info!("Disconnecting session {}", session.id());
                release(session).await;
                self.set_status(SessionStatus::Disconnected);
            }
            None => debug!("Disconnect with no active session"),
        }
    }

    async fn handle_event(&mut self, event: SessionEvent) {
        let Some(session) = self.session.as_mut() else {
            return;
        };

        match event {
            SessionEvent::Opened => {
                let inbox = self.inbox.clone();
                let id = session.id();
                let started = session.start_capture(move |block| {
                    session_event(&inbox, id, SessionEvent::CaptureBlock(block))
                });

                match started {
                    Ok(()) => self.set_status(SessionStatus::Connected),
                    Err(e) => self.fail(LiveError::from_microphone(e)).await,
                }
            }
            SessionEvent::CaptureBlock(block) => {
                if let Err(e) = session.send_block(&block) {
                    warn!("Dropping capture block {}: {}", block.sequence, e);
                }
                self.emit_volume(block.level);
            }
            SessionEvent::Inbound(message) => {
                if message == InboundMessage::TurnComplete {
                    debug!("Model finished its turn");
                }

                for action in message.into_actions() {
                    if let Err(e) = session.apply(action) {
                        if is_output_lost(&e) {
                            self.fail(LiveError::from_output(e)).await;
                            return;
                        }
                        warn!("Skipping audio fragment: {}", e);
                    }
                }
            }
            SessionEvent::PlaybackEnded(source) => session.source_ended(source),
            SessionEvent::TransportClosed(reason) => {
                info!(
                    "Connection closed: {}",
                    reason.as_deref().unwrap_or("no reason given")
                );
                if let Some(session) = self.session.take() {
                    release(session).await;
                }
                self.set_status(SessionStatus::Disconnected);
            }
            SessionEvent::TransportError(e) => self.fail(LiveError::from_transport(e)).await,
        }
    }

    /// Tear down the session, then report the failure
    async fn fail(&mut self, err: LiveError) {
        if let Some(session) = self.session.take() {
            release(session).await;
        }

        error!("Session failed: {}", err);
        self.set_status(SessionStatus::Error);

        let callback = self.callbacks.lock().error.clone();
        if let Some(callback) = callback {
            callback(&err);
        }
    }

    fn set_status(&self, status: SessionStatus) {
        let previous = self.status_tx.send_replace(status);
        if previous != status {
            debug!("Status {} -> {}", previous, status);
        }

        if status.is_reported() {
            // Clone out so a callback can re-register without deadlocking
            let callback = self.callbacks.lock().status.clone();
            if let Some(callback) = callback {
                callback(status);
            }
        }
    }

    fn emit_volume(&self, level: f32) {
        let callback = self.callbacks.lock().volume.clone();
        if let Some(callback) = callback {
            callback(level);
        }
    }
}

/// Close a session on the blocking pool; stopping streams joins their threads
async fn release(mut session: Session) {
    let id = session.id();
    if let Err(e) = tokio::task::spawn_blocking(move || session.close()).await {
        warn!("Releasing session {} failed: {}", id, e);
    }
}
