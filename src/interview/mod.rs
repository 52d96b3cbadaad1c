pub mod fallback;
pub mod questions;
pub mod rubric;
pub mod service;
pub mod timer;

pub use questions::*;
pub use service::*;
pub use timer::*;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Question categories the sequencer interleaves.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum QuestionKind {
    Technical,
    Behavioral,
    Scenario,
    FollowUp,
    DsaProblem,
    SystemDesign,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Difficulty {
    Easy,
    Medium,
    Hard,
}

/// Candidate experience level chosen at session start.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ExperienceLevel {
    Beginner,
    Intermediate,
    Advanced,
}

impl Default for ExperienceLevel {
    fn default() -> Self {
        ExperienceLevel::Intermediate
    }
}

impl ExperienceLevel {
    pub fn question_difficulty(self) -> Difficulty {
        match self {
            ExperienceLevel::Beginner => Difficulty::Easy,
            ExperienceLevel::Intermediate => Difficulty::Medium,
            ExperienceLevel::Advanced => Difficulty::Hard,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            ExperienceLevel::Beginner => "beginner",
            ExperienceLevel::Intermediate => "intermediate",
            ExperienceLevel::Advanced => "advanced",
        }
    }
}

/// One interview question. Immutable once generated; a follow-up carries
/// the id of the question it probes.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InterviewQuestion {
    pub id: String,
    pub question: String,
    pub kind: QuestionKind,
    pub difficulty: Difficulty,
    pub topic: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub expected_key_points: Option<Vec<String>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub parent_question_id: Option<String>,
}

impl InterviewQuestion {
    pub fn is_follow_up(&self) -> bool {
        self.parent_question_id.is_some()
    }
}

/// How much to trust an evaluation: `Low` marks the heuristic fallback path.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EvalConfidence {
    Low,
    Medium,
    High,
}

/// Scored assessment of one answer. All sub-scores and the weighted overall
/// are clamped to 0-100 before this struct is built.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AnswerEvaluation {
    pub clarity: u8,
    pub completeness: u8,
    pub technical_accuracy: u8,
    pub communication_skill: u8,
    pub depth: u8,
    pub overall_score: u8,
    pub confidence: EvalConfidence,
    pub needs_follow_up: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub follow_up_reason: Option<String>,
    pub strong_points: Vec<String>,
    pub weak_points: Vec<String>,
    pub missing_concepts: Vec<String>,
    pub key_points_covered: Vec<String>,
    pub feedback: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TurnRole {
    Interviewer,
    Candidate,
}

/// One utterance in the append-only conversation log - the session's source
/// of truth for evaluator context and final feedback.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConversationTurn {
    pub role: TurnRole,
    pub content: String,
    pub timestamp: DateTime<Utc>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub question_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub evaluation: Option<AnswerEvaluation>,
}

impl ConversationTurn {
    pub fn interviewer(content: impl Into<String>, question_id: Option<String>) -> Self {
        Self {
            role: TurnRole::Interviewer,
            content: content.into(),
            timestamp: Utc::now(),
            question_id,
            evaluation: None,
        }
    }

    pub fn candidate(content: impl Into<String>, question_id: Option<String>) -> Self {
        Self {
            role: TurnRole::Candidate,
            content: content.into(),
            timestamp: Utc::now(),
            question_id,
            evaluation: None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SessionStatus {
    Preparing,
    Active,
    Paused,
    Completed,
}

/// Session configuration with documented defaults: 8 questions, 2 follow-ups
/// per parent question, 6 turns of evaluator context.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionConfig {
    pub role: String,
    pub level: ExperienceLevel,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub custom_topic: Option<String>,
    pub question_count: usize,
    pub max_follow_ups: u32,
    pub context_turns: usize,
}

impl SessionConfig {
    pub fn new(role: impl Into<String>, level: ExperienceLevel) -> Self {
        Self {
            role: role.into(),
            level,
            ..Default::default()
        }
    }
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            role: "general".to_string(),
            level: ExperienceLevel::default(),
            custom_topic: None,
            question_count: 8,
            max_follow_ups: 2,
            context_turns: 6,
        }
    }
}

/// Aggregate root for one interview.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InterviewSession {
    pub id: String,
    pub role: String,
    pub level: ExperienceLevel,
    /// The scheduled sequence; follow-ups are kept alongside it, never
    /// spliced into it.
    pub questions: Vec<InterviewQuestion>,
    pub follow_ups: Vec<InterviewQuestion>,
    pub conversation: Vec<ConversationTurn>,
    pub current_question_index: usize,
    pub follow_up_count: u32,
    pub max_follow_ups: u32,
    pub started_at: DateTime<Utc>,
    pub status: SessionStatus,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum Recommendation {
    StrongHire,
    Hire,
    Maybe,
    NoHire,
}

/// Aggregate assessment produced at the end of a session.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FinalFeedback {
    pub overall_score: u8,
    pub strengths: Vec<String>,
    pub improvements: Vec<String>,
    pub detailed_review: String,
    pub recommendation: Recommendation,
}

/// What the protocol hands back after each answer: the next thing the
/// interviewer should say, and whether it probes the previous answer.
#[derive(Debug, Clone)]
pub struct NextQuestion {
    pub question: InterviewQuestion,
    pub is_follow_up: bool,
}
