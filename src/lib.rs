//! vivavoce - voice-driven AI interview pipeline.
//!
//! Two tightly coupled components form the core:
//!
//! - [`voice::VoiceEngine`]: wraps continuous speech recognition and speech
//!   synthesis into a single conversational loop - silence-based end-of-turn
//!   detection, auto-restart on transient failure, exponential backoff on
//!   network errors, and mutual exclusion between listening and speaking.
//! - [`interview::InterviewService`]: drives a fixed-length question
//!   sequence per role and difficulty, evaluates each answer against a
//!   multi-dimensional rubric, injects a bounded number of follow-up
//!   questions, and produces a final aggregate assessment.
//!
//! Data flows engine → service → engine: the engine produces a finalized
//! transcript on silence, the service evaluates it (through the
//! [`llm::TextCompletion`] seam) and decides what the interviewer says next,
//! and the engine speaks it.
//!
//! Both components are explicitly constructed and explicitly owned - no
//! globals - so independent sessions and tests never share state. The audio
//! surface is a trait ([`voice::VoicePlatform`]); a deterministic scripted
//! implementation ships in [`voice::scripted`] for tests and offline runs.

pub mod backoff;
pub mod error;
pub mod events;
pub mod interview;
pub mod llm;
pub mod voice;

pub use error::VoiceError;
pub use events::{EventBus, Subscription, VoiceEvent};
pub use interview::{
    AnswerEvaluation, ConversationTurn, Difficulty, EvalConfidence, ExperienceLevel,
    FinalFeedback, InterviewQuestion, InterviewService, InterviewSession, NextQuestion,
    QuestionKind, Recommendation, SessionConfig, SessionStatus, TurnRole,
};
pub use llm::{CompletionError, HttpCompletionClient, TextCompletion};
pub use voice::{
    SpeakOptions, TranscriptionResult, VoiceConfig, VoiceEngine, VoiceMode, VoicePlatform,
    VoiceState,
};
