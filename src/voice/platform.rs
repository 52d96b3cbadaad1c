use async_trait::async_trait;

use crate::error::VoiceError;
use crate::voice::{SpeakOptions, TranscriptionResult};

/// Signals a recognizer pushes back to the engine while a pass is live.
///
/// The shape mirrors the start/result/error/closed callbacks of the
/// underlying platform recognizer: one `Started` when capture is live,
/// any number of `Result`s, faults as they occur, and exactly one `Ended`
/// when the pass is over (platform recognition sessions are inherently
/// time-bounded).
#[derive(Debug, Clone)]
pub enum RecognitionSignal {
    Started,
    Result(TranscriptionResult),
    Fault(RecognitionFault),
    Ended,
}

/// Fault classes a recognizer can report mid-pass.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RecognitionFault {
    /// Nothing was said before the platform timed the pass out. Not an
    /// error: continuous mode silently re-arms.
    NoSpeech,
    /// Transient transport failure; retried with backoff.
    Network,
    /// Terminal: the user must grant microphone access.
    PermissionDenied,
    /// Terminal: capture device failed or disappeared.
    AudioCapture,
    /// Terminal: the recognition service rejected us.
    ServiceUnavailable,
    /// The engine itself tore the pass down; ignored.
    Aborted,
    Other(String),
}

/// Channel the engine hands to a recognizer at `start`; all signals for the
/// pass flow through it.
pub type SignalSink = tokio::sync::mpsc::UnboundedSender<RecognitionSignal>;

/// Continuous speech-to-text surface.
///
/// Implementations are expected to be non-blocking: `start` arms capture and
/// returns, results arrive on the sink from the platform's own callbacks.
pub trait SpeechRecognizer: Send {
    /// Arm a new recognition pass. Signals flow into `sink` until `Ended`.
    fn start(&mut self, sink: SignalSink) -> Result<(), VoiceError>;

    /// Finish gracefully: audio captured so far may still produce a final
    /// result before `Ended` is delivered.
    fn stop(&mut self);

    /// Tear the pass down immediately. No further results; `Ended` (or an
    /// `Aborted` fault) is still delivered.
    fn abort(&mut self);
}

/// Text-to-speech surface with rate/pitch/volume control.
#[async_trait]
pub trait SpeechSynthesizer: Send + Sync {
    /// Speak `text`, returning once playback has fully ended. A returned
    /// error means playback failed or was cancelled; the engine decides
    /// what to do with it (it never propagates to `speak` callers).
    async fn speak(&self, text: &str, options: &SpeakOptions) -> Result<(), VoiceError>;

    /// Cancel the in-flight utterance, if any.
    fn cancel(&self);
}

/// Microphone acquisition. The engine calls `acquire` exactly once per
/// lifetime and caches the returned probe for level metering.
#[async_trait]
pub trait MicrophoneSource: Send {
    async fn acquire(&mut self) -> Result<Box<dyn AudioLevelProbe>, VoiceError>;
}

/// Frequency-domain level meter over the cached capture stream.
pub trait AudioLevelProbe: Send + Sync {
    /// Instantaneous input level, 0-100.
    fn level(&self) -> u8;
}

/// Capability probe for the runtime's audio surfaces.
///
/// `recognizer` returning `None` is a hard capability failure
/// (`VoiceEngine::initialize` reports `false`); a missing synthesizer only
/// degrades the engine to text-only output.
pub trait VoicePlatform: Send {
    fn recognizer(&mut self) -> Option<Box<dyn SpeechRecognizer>>;
    fn synthesizer(&mut self) -> Option<Box<dyn SpeechSynthesizer>>;
    fn microphone(&mut self) -> Option<Box<dyn MicrophoneSource>>;
}
