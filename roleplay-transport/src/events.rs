use crate::error::TransportError;

/// One base64 audio payload from the model
#[derive(Debug, Clone, PartialEq)]
pub struct AudioFragment {
    pub mime_type: String,
    pub data: String,
}

/// Meaningful content of one inbound frame
///
/// An interruption that arrives in the same frame as new audio is its own
/// variant, so the ordering between the two can't be lost by the consumer.
#[derive(Debug, Clone, PartialEq)]
pub enum InboundMessage {
    Audio(Vec<AudioFragment>),
    Interrupted,
    InterruptedThenAudio(Vec<AudioFragment>),
    TurnComplete,
}

/// What the playback side should do, in order
#[derive(Debug, Clone, PartialEq)]
pub enum PlaybackAction {
    Interrupt,
    Enqueue(AudioFragment),
}

impl InboundMessage {
    pub fn into_actions(self) -> Vec<PlaybackAction> {
        match self {
            Self::Audio(fragments) => fragments.into_iter().map(PlaybackAction::Enqueue).collect(),
            Self::Interrupted => vec![PlaybackAction::Interrupt],
            Self::InterruptedThenAudio(fragments) => std::iter::once(PlaybackAction::Interrupt)
                .chain(fragments.into_iter().map(PlaybackAction::Enqueue))
                .collect(),
            Self::TurnComplete => Vec::new(),
        }
    }

    pub fn is_interruption(&self) -> bool {
        matches!(self, Self::Interrupted | Self::InterruptedThenAudio(_))
    }
}

/// Lifecycle and data events reported by a transport
///
/// After `Opened`, exactly one of `Closed` or `Error` ends the stream of
/// events; nothing follows it.
#[derive(Debug)]
pub enum TransportEvent {
    Opened,
    Message(InboundMessage),
    /// Orderly close, from either side
    Closed { reason: Option<String> },
    Error(TransportError),
}
