use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Errors surfaced by the voice turn-taking engine.
///
/// Terminal errors disable auto-restart and are delivered once on the event
/// bus; transient ones are absorbed by the retry machinery and only escalate
/// when the retry ceiling is hit.
#[derive(Debug, Clone, PartialEq, Eq, Error, Serialize, Deserialize)]
pub enum VoiceError {
    #[error("speech recognition is not supported in this environment")]
    RecognitionUnsupported,

    #[error("speech synthesis is not supported in this environment")]
    SynthesisUnsupported,

    #[error("microphone access denied - allow microphone access in your browser settings")]
    PermissionDenied,

    #[error("no microphone was found - connect a microphone and try again")]
    NoMicrophone,

    #[error("speech recognition service is unavailable")]
    ServiceUnavailable,

    #[error("network unavailable after {attempts} attempts - check your connection")]
    NetworkUnavailable { attempts: u32 },

    #[error("speech recognition restarted {count} times within {window_ms}ms")]
    RestartLoop { count: u32, window_ms: u64 },

    #[error("audio capture failed: {0}")]
    AudioCapture(String),

    #[error("speech synthesis failed: {0}")]
    Synthesis(String),

    #[error("engine is not initialized")]
    NotInitialized,
}

impl VoiceError {
    /// Whether this error class is inherently non-retryable. Terminal errors
    /// disable continuous-mode auto-restart when they reach the engine.
    pub fn is_terminal(&self) -> bool {
        match self {
            VoiceError::RecognitionUnsupported
            | VoiceError::SynthesisUnsupported
            | VoiceError::PermissionDenied
            | VoiceError::NoMicrophone
            | VoiceError::ServiceUnavailable
            | VoiceError::NetworkUnavailable { .. }
            | VoiceError::RestartLoop { .. }
            | VoiceError::AudioCapture(_)
            | VoiceError::NotInitialized => true,
            VoiceError::Synthesis(_) => false,
        }
    }
}
