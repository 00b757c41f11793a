//! Resources of one live session and their single release point

use chrono::{DateTime, Utc};
use roleplay_audio::codec::decode_binary;
use roleplay_audio::{
    AudioError, CaptureBlock, CapturePipeline, PlaybackBuffer, PlaybackScheduler, SourceId,
};
use roleplay_transport::{AudioFragment, PlaybackAction, SessionTransport, TransportError};
use tracing::{debug, info, warn};

/// Counters kept for the end-of-session summary
#[derive(Debug, Clone)]
pub struct SessionStats {
    pub started_at: DateTime<Utc>,
    pub blocks_sent: u64,
    pub fragments_played: u64,
    pub interruptions: u64,
    pub malformed_fragments: u64,
}

impl SessionStats {
    fn new() -> Self {
        Self {
            started_at: Utc::now(),
            blocks_sent: 0,
            fragments_played: 0,
            interruptions: 0,
            malformed_fragments: 0,
        }
    }

    pub fn elapsed(&self) -> chrono::Duration {
        Utc::now() - self.started_at
    }
}

/// Microphone, speaker and connection held by one session
///
/// [`Session::close`] releases all three. It runs on drop as well, so a
/// session that is simply discarded still frees the hardware.
pub struct Session {
    id: u64,
    voice: String,
    capture: CapturePipeline,
    playback: PlaybackScheduler,
    transport: Option<Box<dyn SessionTransport>>,
    default_rate: u32,
    stats: SessionStats,
    closed: bool,
}

impl Session {
    pub fn new(
        id: u64,
        voice: String,
        capture: CapturePipeline,
        playback: PlaybackScheduler,
        transport: Box<dyn SessionTransport>,
        default_rate: u32,
    ) -> Self {
        Self {
            id,
            voice,
            capture,
            playback,
            transport: Some(transport),
            default_rate,
            stats: SessionStats::new(),
            closed: false,
        }
    }

    pub fn id(&self) -> u64 {
        self.id
    }

    pub fn voice(&self) -> &str {
        &self.voice
    }

    pub fn stats(&self) -> &SessionStats {
        &self.stats
    }

    pub fn is_closed(&self) -> bool {
        self.closed
    }

    /// Start streaming microphone blocks to `on_block`
    pub fn start_capture<F>(&mut self, on_block: F) -> roleplay_audio::Result<()>
    where
        F: Fn(CaptureBlock) + Send + Sync + 'static,
    {
        self.capture.start(on_block)
    }

    /// Forward one block to the service
    pub fn send_block(&mut self, block: &CaptureBlock) -> Result<(), TransportError> {
        let transport = self.transport.as_ref().ok_or(TransportError::Closed)?;
        transport.send_audio(&block.data)?;
        self.stats.blocks_sent += 1;
        Ok(())
    }

    /// Apply one playback action in arrival order
    pub fn apply(&mut self, action: PlaybackAction) -> roleplay_audio::Result<()> {
        match action {
            PlaybackAction::Interrupt => {
                debug!("Interrupting {} playing sources", self.playback.active_count());
                self.playback.interrupt();
                self.stats.interruptions += 1;
                Ok(())
            }
            PlaybackAction::Enqueue(fragment) => self.play_fragment(&fragment),
        }
    }

    /// Decode and schedule a fragment. Undecodable payloads are skipped.
    fn play_fragment(&mut self, fragment: &AudioFragment) -> roleplay_audio::Result<()> {
        let bytes = match decode_binary(&fragment.data) {
            Ok(bytes) => bytes,
            Err(e) => {
                warn!("Skipping undecodable audio fragment: {}", e);
                self.stats.malformed_fragments += 1;
                return Ok(());
            }
        };

        let rate = fragment_rate(&fragment.mime_type).unwrap_or(self.default_rate);
        let buffer = PlaybackBuffer::from_pcm16_bytes(&bytes, rate);
        if buffer.is_empty() {
            debug!("Skipping empty audio fragment");
            return Ok(());
        }

        let scheduled = self.playback.enqueue(&buffer)?;
        self.stats.fragments_played += 1;
        debug!(
            "Scheduled {} at {:.3}s for {:.3}s",
            scheduled.id, scheduled.start, scheduled.duration
        );
        Ok(())
    }

    pub fn source_ended(&mut self, id: SourceId) {
        self.playback.source_ended(id);
    }

    pub fn active_sources(&self) -> usize {
        self.playback.active_count()
    }

    /// Release the microphone, the speaker and the connection. Idempotent.
    pub fn close(&mut self) {
        if self.closed {
            return;
        }
        self.closed = true;

        self.capture.stop();
        self.playback.shutdown();
        if let Some(mut transport) = self.transport.take() {
            transport.close();
        }

        info!(
            "Session {} closed after {}s: {} blocks sent, {} fragments played, {} interruptions, {} malformed",
            self.id,
            self.stats.elapsed().num_seconds(),
            self.stats.blocks_sent,
            self.stats.fragments_played,
            self.stats.interruptions,
            self.stats.malformed_fragments
        );
    }
}

impl Drop for Session {
    fn drop(&mut self) {
        self.close();
    }
}

/// Sample rate from a MIME type like `audio/pcm;rate=24000`
pub fn fragment_rate(mime_type: &str) -> Option<u32> {
    mime_type
        .split(';')
        .filter_map(|param| param.trim().strip_prefix("rate="))
        .find_map(|rate| rate.trim().parse().ok())
        .filter(|rate| *rate > 0)
}

/// Whether an enqueue failure means the speaker is gone
pub fn is_output_lost(err: &AudioError) -> bool {
    matches!(err, AudioError::OutputClosed | AudioError::StreamError(_))
}
