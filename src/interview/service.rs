use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use log::{info, warn};
use parking_lot::Mutex;
use uuid::Uuid;

use crate::interview::{
    fallback, questions, rubric, AnswerEvaluation, ConversationTurn, FinalFeedback,
    InterviewQuestion, InterviewSession, NextQuestion, QuestionKind, SessionConfig,
    SessionStatus,
};
use crate::llm::TextCompletion;

use super::timer::SessionClock;

/// The interview protocol state machine.
///
/// Owns exactly one [`InterviewSession`] at a time and drives it through
/// `preparing → active → {paused} → completed`. Scoring failures never
/// escape: every operation resolves to a usable value or a documented
/// fallback, and results of calls that finish after the session completed
/// are discarded.
pub struct InterviewService {
    completion: Arc<dyn TextCompletion>,
    config: SessionConfig,
    session: Mutex<Option<InterviewSession>>,
    clock: Mutex<SessionClock>,
}

impl InterviewService {
    pub fn new(completion: Arc<dyn TextCompletion>, config: SessionConfig) -> Self {
        Self {
            completion,
            config,
            session: Mutex::new(None),
            clock: Mutex::new(SessionClock::new()),
        }
    }

    pub fn config(&self) -> &SessionConfig {
        &self.config
    }

    /// Build the question schedule and open the session.
    ///
    /// The interviewer's opening question is recorded as conversation turn 0
    /// and the session is returned already `Active`. Starting a new session
    /// while one is live replaces it (one live session per service).
    pub async fn start_session(&self) -> InterviewSession {
        if self.session.lock().is_some() {
            warn!("starting a new session over a live one; the old session is dropped");
        }

        let questions = questions::build_sequence(&self.config, self.completion.as_ref()).await;
        let opening = questions[0].clone();

        let session = InterviewSession {
            id: Uuid::new_v4().to_string(),
            role: self.config.role.clone(),
            level: self.config.level,
            questions,
            follow_ups: Vec::new(),
            conversation: vec![ConversationTurn::interviewer(
                opening.question.clone(),
                Some(opening.id.clone()),
            )],
            current_question_index: 0,
            follow_up_count: 0,
            max_follow_ups: self.config.max_follow_ups,
            started_at: Utc::now(),
            status: SessionStatus::Active,
        };

        info!(
            "🎬 interview session {} started: {} ({}), {} questions",
            session.id,
            session.role,
            session.level.as_str(),
            session.questions.len()
        );

        let snapshot = session.clone();
        *self.session.lock() = Some(session);
        self.clock.lock().start();
        snapshot
    }

    /// The question the candidate should be answering right now: the last
    /// one the interviewer asked.
    pub fn current_question(&self) -> Option<InterviewQuestion> {
        let session = self.session.lock();
        let session = session.as_ref()?;
        let question_id = session
            .conversation
            .iter()
            .rev()
            .find(|turn| turn.role == super::TurnRole::Interviewer)?
            .question_id
            .clone()?;
        session
            .questions
            .iter()
            .chain(session.follow_ups.iter())
            .find(|q| q.id == question_id)
            .cloned()
    }

    /// Record the candidate's answer and score it against the rubric.
    ///
    /// The answer turn is appended before the evaluator runs, so the
    /// conversation order is always question → answer → evaluation. Service
    /// failures and unparseable responses degrade to the heuristic fallback
    /// (confidence `Low`); no error reaches the caller.
    pub async fn submit_answer(
        &self,
        question: &InterviewQuestion,
        answer: &str,
    ) -> AnswerEvaluation {
        let history = {
            let mut guard = self.session.lock();
            match guard.as_mut() {
                Some(session) if session.status != SessionStatus::Completed => {
                    session
                        .conversation
                        .push(ConversationTurn::candidate(answer, Some(question.id.clone())));
                    session.conversation.clone()
                }
                _ => {
                    warn!("answer submitted without a live session; scoring heuristically");
                    Vec::new()
                }
            }
        };

        let prompt = rubric::evaluation_prompt(question, answer, &history, self.config.context_turns);
        let evaluation = match self.completion.complete(&prompt).await {
            Ok(raw) => match rubric::parse_evaluation(&raw) {
                Some(evaluation) => evaluation,
                None => {
                    warn!("evaluator response was unparseable; using fallback scoring");
                    fallback::evaluate_heuristically(question, answer)
                }
            },
            Err(err) => {
                warn!("evaluator call failed ({}); using fallback scoring", err);
                fallback::evaluate_heuristically(question, answer)
            }
        };

        // Attach to the answer turn unless the session completed while the
        // evaluator was in flight - late results are discarded.
        let mut guard = self.session.lock();
        if let Some(session) = guard.as_mut() {
            if session.status != SessionStatus::Completed {
                if let Some(turn) = session
                    .conversation
                    .iter_mut()
                    .rev()
                    .find(|t| {
                        t.role == super::TurnRole::Candidate
                            && t.question_id.as_deref() == Some(question.id.as_str())
                            && t.evaluation.is_none()
                    })
                {
                    turn.evaluation = Some(evaluation.clone());
                }
                info!(
                    "📝 answer scored {}/100 (confidence {:?}, follow-up: {})",
                    evaluation.overall_score, evaluation.confidence, evaluation.needs_follow_up
                );
            } else {
                info!("evaluation finished after session completion; result discarded");
            }
        }

        evaluation
    }

    /// Decide what the interviewer says next.
    ///
    /// In order: a targeted follow-up when the evaluation asks for one and
    /// the per-parent bound allows it; otherwise the next scheduled
    /// question; otherwise `None` with the session marked `Completed`.
    pub async fn next_question(
        &self,
        answer: Option<&str>,
        evaluation: Option<&AnswerEvaluation>,
    ) -> Option<NextQuestion> {
        let follow_up_context = {
            let guard = self.session.lock();
            let session = guard.as_ref()?;
            if session.status != SessionStatus::Active {
                return None;
            }

            match (answer, evaluation) {
                (Some(answer), Some(evaluation))
                    if evaluation.needs_follow_up
                        && session.follow_up_count < session.max_follow_ups =>
                {
                    Some((
                        session.questions[session.current_question_index].clone(),
                        answer.to_string(),
                        evaluation.clone(),
                    ))
                }
                _ => None,
            }
        };

        if let Some((parent, answer, evaluation)) = follow_up_context {
            let text = self.generate_follow_up(&parent, &answer, &evaluation).await;

            let mut guard = self.session.lock();
            let session = guard.as_mut()?;
            if session.status != SessionStatus::Active {
                return None; // completed while the service call was in flight
            }

            let question = InterviewQuestion {
                id: Uuid::new_v4().to_string(),
                question: text,
                kind: QuestionKind::FollowUp,
                difficulty: parent.difficulty,
                topic: parent.topic.clone(),
                expected_key_points: None,
                parent_question_id: Some(parent.id.clone()),
            };
            session.follow_up_count += 1;
            session.follow_ups.push(question.clone());
            session.conversation.push(ConversationTurn::interviewer(
                question.question.clone(),
                Some(question.id.clone()),
            ));
            info!(
                "🔎 follow-up {}/{} for question {}",
                session.follow_up_count, session.max_follow_ups, parent.id
            );
            return Some(NextQuestion {
                question,
                is_follow_up: true,
            });
        }

        // Advance to a genuinely new question; the follow-up count resets.
        let advanced = {
            let mut guard = self.session.lock();
            let session = guard.as_mut()?;
            if session.status != SessionStatus::Active {
                return None;
            }
            session.follow_up_count = 0;
            session.current_question_index += 1;

            if session.current_question_index >= session.questions.len() {
                session.status = SessionStatus::Completed;
                None
            } else {
                let question = session.questions[session.current_question_index].clone();
                session.conversation.push(ConversationTurn::interviewer(
                    question.question.clone(),
                    Some(question.id.clone()),
                ));
                Some(question)
            }
        };

        match advanced {
            Some(question) => Some(NextQuestion {
                question,
                is_follow_up: false,
            }),
            None => {
                self.clock.lock().stop();
                info!("🏁 question schedule exhausted; session completed");
                None
            }
        }
    }

    async fn generate_follow_up(
        &self,
        parent: &InterviewQuestion,
        answer: &str,
        evaluation: &AnswerEvaluation,
    ) -> String {
        let prompt = rubric::follow_up_prompt(parent, answer, evaluation);
        match self.completion.complete(&prompt).await {
            Ok(raw) => {
                let text = rubric::strip_code_fences(&raw);
                let text = text.trim().trim_matches('"').trim();
                if text.is_empty() {
                    fallback::canned_follow_up(parent, evaluation)
                } else {
                    text.to_string()
                }
            }
            Err(err) => {
                warn!("follow-up generation failed ({}); using canned probe", err);
                fallback::canned_follow_up(parent, evaluation)
            }
        }
    }

    /// Aggregate every per-answer evaluation into the final assessment.
    ///
    /// The overall score is always the local mean; the qualitative half
    /// comes from the completion service, or from the deterministic
    /// summarizer when that call fails. `None` when nothing was evaluated.
    pub async fn generate_final_feedback(&self) -> Option<FinalFeedback> {
        let (evaluations, transcript) = {
            let guard = self.session.lock();
            let session = guard.as_ref()?;
            let evaluations: Vec<AnswerEvaluation> = session
                .conversation
                .iter()
                .filter_map(|turn| turn.evaluation.clone())
                .collect();
            let transcript: String = session
                .conversation
                .iter()
                .map(|turn| {
                    let speaker = match turn.role {
                        super::TurnRole::Interviewer => "Q",
                        super::TurnRole::Candidate => "A",
                    };
                    let score = turn
                        .evaluation
                        .as_ref()
                        .map(|e| format!(" [{}/100]", e.overall_score))
                        .unwrap_or_default();
                    format!("{}: {}{}\n", speaker, condense(&turn.content), score)
                })
                .collect();
            (evaluations, transcript)
        };

        if evaluations.is_empty() {
            return None;
        }

        let mean = (evaluations
            .iter()
            .map(|e| e.overall_score as u32)
            .sum::<u32>()
            / evaluations.len() as u32) as u8;

        let prompt = rubric::final_feedback_prompt(&transcript, mean, evaluations.len());
        let feedback = match self.completion.complete(&prompt).await {
            Ok(raw) => match rubric::parse_final_feedback(&raw) {
                Some((strengths, improvements, detailed_review, recommendation)) => FinalFeedback {
                    overall_score: mean,
                    strengths,
                    improvements,
                    detailed_review,
                    recommendation,
                },
                None => {
                    warn!("final feedback response unparseable; using deterministic summary");
                    fallback::deterministic_final_feedback(&evaluations)
                }
            },
            Err(err) => {
                warn!("final feedback call failed ({}); using deterministic summary", err);
                fallback::deterministic_final_feedback(&evaluations)
            }
        };

        info!(
            "🏆 final feedback: {}/100, recommendation {:?}",
            feedback.overall_score, feedback.recommendation
        );
        Some(feedback)
    }

    /// Suspend the session; the clock stops accruing elapsed time.
    pub fn pause_session(&self) {
        let mut guard = self.session.lock();
        if let Some(session) = guard.as_mut() {
            if session.status == SessionStatus::Active {
                session.status = SessionStatus::Paused;
                self.clock.lock().pause();
                info!("⏸️ session paused");
            }
        }
    }

    pub fn resume_session(&self) {
        let mut guard = self.session.lock();
        if let Some(session) = guard.as_mut() {
            if session.status == SessionStatus::Paused {
                session.status = SessionStatus::Active;
                self.clock.lock().resume();
                info!("▶️ session resumed");
            }
        }
    }

    /// Mark the session completed. Idempotent; the conversation history is
    /// retained for review.
    pub fn end_session(&self) {
        let was_live = {
            let mut guard = self.session.lock();
            match guard.as_mut() {
                Some(session) if session.status != SessionStatus::Completed => {
                    session.status = SessionStatus::Completed;
                    true
                }
                _ => false,
            }
        };
        if was_live {
            let state = self.clock.lock().stop();
            info!("🛑 session ended after {}s", state.elapsed_seconds);
        }
    }

    /// Snapshot of the live session, if any.
    pub fn session(&self) -> Option<InterviewSession> {
        self.session.lock().clone()
    }

    /// Active interview time, excluding paused spans.
    pub fn elapsed(&self) -> Duration {
        self.clock.lock().elapsed()
    }
}

/// First ~160 characters of a turn, enough for final-feedback context.
fn condense(content: &str) -> String {
    if content.len() <= 160 {
        content.to_string()
    } else {
        let mut cut = 160;
        while !content.is_char_boundary(cut) {
            cut -= 1;
        }
        format!("{}…", &content[..cut])
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::interview::{EvalConfidence, ExperienceLevel, Recommendation, TurnRole};
    use crate::interview::Difficulty;
    use crate::llm::testing::ScriptedCompletion;

    fn service(completion: ScriptedCompletion, role: &str, level: ExperienceLevel) -> InterviewService {
        InterviewService::new(Arc::new(completion), SessionConfig::new(role, level))
    }

    fn needy_evaluation() -> AnswerEvaluation {
        AnswerEvaluation {
            clarity: 50,
            completeness: 40,
            technical_accuracy: 45,
            communication_skill: 55,
            depth: 35,
            overall_score: 45,
            confidence: EvalConfidence::Medium,
            needs_follow_up: true,
            follow_up_reason: Some("superficial treatment of the core idea".into()),
            strong_points: vec![],
            weak_points: vec![],
            missing_concepts: vec!["complexity analysis".into()],
            key_points_covered: vec![],
            feedback: "needs probing".into(),
        }
    }

    // A beginner session is scheduled with eight easy questions.
    #[tokio::test]
    async fn beginner_frontend_session_has_eight_easy_questions() {
        let service = service(
            ScriptedCompletion::failing(),
            "frontend-developer",
            ExperienceLevel::Beginner,
        );
        let session = service.start_session().await;

        assert_eq!(session.questions.len(), 8);
        assert_eq!(session.questions[0].difficulty, Difficulty::Easy);
        assert_eq!(session.status, SessionStatus::Active);
        // Turn 0 is the interviewer's opening question.
        assert_eq!(session.conversation.len(), 1);
        assert_eq!(session.conversation[0].role, TurnRole::Interviewer);
        assert_eq!(session.conversation[0].content, session.questions[0].question);
    }

    // At the follow-up bound the protocol advances no matter what the
    // evaluation asks for, and the per-parent count resets.
    #[tokio::test]
    async fn follow_ups_are_bounded_per_parent_question() {
        let service = service(
            ScriptedCompletion::repeat("What is the time complexity of your approach?"),
            "dsa-engineer",
            ExperienceLevel::Intermediate,
        );
        service.start_session().await;
        let evaluation = needy_evaluation();

        let first = service
            .next_question(Some("it just works"), Some(&evaluation))
            .await
            .unwrap();
        assert!(first.is_follow_up);
        assert_eq!(first.question.kind, QuestionKind::FollowUp);
        assert!(first.question.parent_question_id.is_some());

        let second = service
            .next_question(Some("still vague"), Some(&evaluation))
            .await
            .unwrap();
        assert!(second.is_follow_up);
        assert_eq!(service.session().unwrap().follow_up_count, 2);

        // Bound reached: must advance even though needs_follow_up is true.
        let third = service
            .next_question(Some("third try"), Some(&evaluation))
            .await
            .unwrap();
        assert!(!third.is_follow_up);
        assert!(third.question.parent_question_id.is_none());

        let session = service.session().unwrap();
        assert_eq!(session.follow_up_count, 0);
        assert_eq!(session.current_question_index, 1);
    }

    // Advancing with no follow-ups walks the whole schedule, then
    // completes.
    #[tokio::test]
    async fn schedule_exhaustion_completes_the_session() {
        let service = service(
            ScriptedCompletion::failing(),
            "backend-developer",
            ExperienceLevel::Intermediate,
        );
        let session = service.start_session().await;
        let total = session.questions.len();

        let mut advances = 0;
        loop {
            match service.next_question(None, None).await {
                Some(next) => {
                    assert!(!next.is_follow_up);
                    advances += 1;
                }
                None => break,
            }
        }
        // Question 0 is current at start, so total-1 advances succeed.
        assert_eq!(advances, total - 1);
        let session = service.session().unwrap();
        assert_eq!(session.status, SessionStatus::Completed);

        // Further calls stay None without disturbing anything.
        assert!(service.next_question(None, None).await.is_none());
    }

    #[tokio::test]
    async fn ai_evaluation_is_parsed_and_attached_to_the_turn() {
        let service = service(
            ScriptedCompletion::repeat(
                r#"```json
{"clarity": 82, "completeness": 74, "technicalAccuracy": 88, "communicationSkill": 80, "depth": 71,
 "confidence": "high", "needsFollowUp": false,
 "strongPoints": ["solid fundamentals"], "weakPoints": [], "missingConcepts": [],
 "keyPointsCovered": ["hashing"], "feedback": "strong answer"}
```"#,
            ),
            "backend-developer",
            ExperienceLevel::Advanced,
        );
        let session = service.start_session().await;
        let question = session.questions[0].clone();

        let evaluation = service
            .submit_answer(&question, "A thorough answer about caching and invalidation.")
            .await;

        assert_eq!(evaluation.confidence, EvalConfidence::High);
        assert_eq!(evaluation.technical_accuracy, 88);
        // Overall is recomputed locally from the fixed weights.
        assert_eq!(
            evaluation.overall_score,
            rubric::weighted_overall(88, 74, 82, 71, 80)
        );

        let session = service.session().unwrap();
        let candidate_turn = session
            .conversation
            .iter()
            .find(|t| t.role == TurnRole::Candidate)
            .unwrap();
        assert!(candidate_turn.evaluation.is_some());
    }

    #[tokio::test]
    async fn evaluator_failure_degrades_to_low_confidence_fallback() {
        let service = service(
            ScriptedCompletion::failing(),
            "frontend-developer",
            ExperienceLevel::Intermediate,
        );
        let session = service.start_session().await;
        let question = session.questions[0].clone();

        let evaluation = service.submit_answer(&question, "Probably fine I guess").await;
        assert_eq!(evaluation.confidence, EvalConfidence::Low);
        assert!(evaluation.overall_score <= 100);

        // Unparseable output takes the same path as a failed call.
        let service = service_with_garbage().await;
        let session = service.session().unwrap();
        let question = session.questions[0].clone();
        let evaluation = service.submit_answer(&question, "Probably fine I guess").await;
        assert_eq!(evaluation.confidence, EvalConfidence::Low);
    }

    async fn service_with_garbage() -> InterviewService {
        let service = service(
            ScriptedCompletion::repeat("I would rate this answer a solid seven out of ten."),
            "frontend-developer",
            ExperienceLevel::Intermediate,
        );
        service.start_session().await;
        service
    }

    #[tokio::test]
    async fn completed_session_discards_late_answers() {
        let service = service(
            ScriptedCompletion::failing(),
            "general",
            ExperienceLevel::Beginner,
        );
        let session = service.start_session().await;
        let question = session.questions[0].clone();

        service.end_session();
        let turns_before = service.session().unwrap().conversation.len();

        let evaluation = service.submit_answer(&question, "too late").await;
        assert!(evaluation.overall_score <= 100, "still a usable value");
        assert_eq!(
            service.session().unwrap().conversation.len(),
            turns_before,
            "late answer must not mutate a completed session"
        );
    }

    #[tokio::test]
    async fn final_feedback_requires_at_least_one_evaluation() {
        let service = service(
            ScriptedCompletion::failing(),
            "general",
            ExperienceLevel::Intermediate,
        );
        service.start_session().await;
        assert!(service.generate_final_feedback().await.is_none());
    }

    #[tokio::test]
    async fn final_feedback_falls_back_to_deterministic_summary() {
        let service = service(
            ScriptedCompletion::failing(),
            "dsa-engineer",
            ExperienceLevel::Intermediate,
        );
        let session = service.start_session().await;
        let question = session.questions[0].clone();

        service
            .submit_answer(&question, "A hash map gives constant time lookups via hashing.")
            .await;

        let feedback = service.generate_final_feedback().await.unwrap();
        assert!(feedback.overall_score <= 100);
        assert!(!feedback.strengths.is_empty());
        assert!(!feedback.detailed_review.is_empty());
    }

    #[tokio::test]
    async fn final_feedback_uses_ai_recommendation_when_parseable() {
        let responses = vec![
            // submit_answer evaluation
            Err(crate::llm::CompletionError::Empty),
            // final feedback
            Ok(r#"{"strengths": ["clear thinking"], "improvements": ["go deeper"],
                   "detailedReview": "a promising candidate", "recommendation": "hire"}"#
                .to_string()),
        ];
        let service = service(
            ScriptedCompletion::replay(responses),
            "backend-developer",
            ExperienceLevel::Intermediate,
        );
        let session = service.start_session().await;
        let question = session.questions[0].clone();
        service
            .submit_answer(&question, "We cache aggressively and invalidate by ttl and events.")
            .await;

        let feedback = service.generate_final_feedback().await.unwrap();
        assert_eq!(feedback.recommendation, Recommendation::Hire);
        assert_eq!(feedback.detailed_review, "a promising candidate");
    }

    #[tokio::test]
    async fn pause_and_resume_flip_status_and_clock() {
        let service = service(
            ScriptedCompletion::failing(),
            "general",
            ExperienceLevel::Intermediate,
        );
        service.start_session().await;

        service.pause_session();
        assert_eq!(service.session().unwrap().status, SessionStatus::Paused);
        // No advancing while paused.
        assert!(service.next_question(None, None).await.is_none());

        service.resume_session();
        assert_eq!(service.session().unwrap().status, SessionStatus::Active);
    }

    #[tokio::test]
    async fn end_session_is_idempotent_and_keeps_history() {
        let service = service(
            ScriptedCompletion::failing(),
            "general",
            ExperienceLevel::Intermediate,
        );
        service.start_session().await;
        service.end_session();
        service.end_session();

        let session = service.session().unwrap();
        assert_eq!(session.status, SessionStatus::Completed);
        assert_eq!(session.conversation.len(), 1, "history retained");
    }

    #[tokio::test]
    async fn current_question_tracks_follow_ups() {
        let service = service(
            ScriptedCompletion::repeat("Can you quantify that?"),
            "backend-developer",
            ExperienceLevel::Intermediate,
        );
        let session = service.start_session().await;
        assert_eq!(
            service.current_question().unwrap().id,
            session.questions[0].id
        );

        let next = service
            .next_question(Some("we scaled it"), Some(&needy_evaluation()))
            .await
            .unwrap();
        assert!(next.is_follow_up);
        assert_eq!(service.current_question().unwrap().id, next.question.id);
    }
}
