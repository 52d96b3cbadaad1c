pub mod engine;
pub mod platform;
pub mod scripted;
pub mod transcript;

pub use engine::*;
pub use platform::*;
pub use transcript::*;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Voice engine configuration.
///
/// The timing knobs are tuned for conversational turn-taking; the retry
/// knobs bound how hard the engine fights transient recognition failures
/// before surfacing a terminal error.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VoiceConfig {
    pub language: String,
    /// Keep re-arming capture after every natural end-of-segment.
    pub continuous: bool,
    /// Deliver interim (non-final) recognition results.
    pub interim_results: bool,
    /// Sustained silence after speech that counts as end-of-turn.
    pub silence_threshold_ms: u64,
    /// Gap after playback ends before capture resumes, so the engine does
    /// not hear the tail of its own voice.
    pub settle_delay_ms: u64,
    /// Delay before re-arming capture when a recognition session ends.
    pub restart_delay_ms: u64,
    /// Pause between sentence chunks in `speak_naturally`.
    pub sentence_pause_ms: u64,
    pub max_network_retries: u32,
    pub network_backoff_base_ms: u64,
    pub network_backoff_multiplier: f64,
    pub max_rapid_restarts: u32,
    pub rapid_restart_window_ms: u64,
}

impl Default for VoiceConfig {
    fn default() -> Self {
        Self {
            language: "en-US".to_string(),
            continuous: true,
            interim_results: true,
            silence_threshold_ms: 2200,
            settle_delay_ms: 300,
            restart_delay_ms: 250,
            sentence_pause_ms: 200,
            max_network_retries: 3,
            network_backoff_base_ms: 500,
            network_backoff_multiplier: 2.0,
            max_rapid_restarts: 5,
            rapid_restart_window_ms: 2000,
        }
    }
}

/// What the engine is doing right now. Listening and speaking are distinct
/// variants of one mode, so the illegal combination cannot be represented.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum VoiceMode {
    Idle,
    Listening,
    Processing,
    Speaking,
}

impl VoiceMode {
    pub fn is_listening(self) -> bool {
        self == VoiceMode::Listening
    }

    pub fn is_speaking(self) -> bool {
        self == VoiceMode::Speaking
    }

    pub fn is_processing(self) -> bool {
        self == VoiceMode::Processing
    }
}

/// Snapshot of engine state published on every transition.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VoiceState {
    pub mode: VoiceMode,
    /// Input level for visualization, 0-100.
    pub audio_level: u8,
    pub error: Option<String>,
}

impl VoiceState {
    pub fn idle() -> Self {
        Self {
            mode: VoiceMode::Idle,
            audio_level: 0,
            error: None,
        }
    }

    pub fn is_listening(&self) -> bool {
        self.mode.is_listening()
    }

    pub fn is_speaking(&self) -> bool {
        self.mode.is_speaking()
    }

    pub fn is_processing(&self) -> bool {
        self.mode.is_processing()
    }
}

/// One recognition result, interim or final.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TranscriptionResult {
    pub transcript: String,
    pub is_final: bool,
    pub confidence: f32,
    pub timestamp: DateTime<Utc>,
}

impl TranscriptionResult {
    pub fn interim(transcript: impl Into<String>, confidence: f32) -> Self {
        Self {
            transcript: transcript.into(),
            is_final: false,
            confidence,
            timestamp: Utc::now(),
        }
    }

    pub fn final_segment(transcript: impl Into<String>, confidence: f32) -> Self {
        Self {
            transcript: transcript.into(),
            is_final: true,
            confidence,
            timestamp: Utc::now(),
        }
    }
}

/// Synthesis controls for a single utterance.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SpeakOptions {
    pub rate: f32,
    pub pitch: f32,
    pub volume: f32,
    /// Preferred voice name; the platform picks its default when `None`.
    pub voice: Option<String>,
}

impl Default for SpeakOptions {
    fn default() -> Self {
        Self {
            rate: 1.0,
            pitch: 1.0,
            volume: 1.0,
            voice: None,
        }
    }
}
