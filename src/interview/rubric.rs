use once_cell::sync::Lazy;
use regex::Regex;
use serde_json::Value;

use crate::interview::{
    AnswerEvaluation, ConversationTurn, EvalConfidence, InterviewQuestion, Recommendation,
    TurnRole,
};

/// Fixed weights for the overall blend. Technical accuracy dominates;
/// communication polish matters least.
pub const WEIGHT_TECHNICAL_ACCURACY: f64 = 0.35;
pub const WEIGHT_COMPLETENESS: f64 = 0.25;
pub const WEIGHT_CLARITY: f64 = 0.15;
pub const WEIGHT_DEPTH: f64 = 0.15;
pub const WEIGHT_COMMUNICATION: f64 = 0.10;

static CODE_FENCE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?s)```(?:json|JSON)?\s*(.*?)```").unwrap());

/// Strip a markdown code fence if the model wrapped its JSON in one.
pub fn strip_code_fences(raw: &str) -> String {
    match CODE_FENCE.captures(raw) {
        Some(caps) => caps[1].trim().to_string(),
        None => raw.trim().to_string(),
    }
}

/// Pull the first JSON value out of free-form model output: fence-stripped,
/// then parsed whole, then the widest `{...}` / `[...]` span as a fallback.
pub fn extract_json(raw: &str) -> Option<Value> {
    let stripped = strip_code_fences(raw);
    if let Ok(value) = serde_json::from_str::<Value>(&stripped) {
        return Some(value);
    }
    for (open, close) in [('{', '}'), ('[', ']')] {
        if let (Some(start), Some(end)) = (stripped.find(open), stripped.rfind(close)) {
            if start < end {
                if let Ok(value) = serde_json::from_str::<Value>(&stripped[start..=end]) {
                    return Some(value);
                }
            }
        }
    }
    None
}

/// Clamp any numeric score into the 0-100 band.
pub fn clamp_score(value: f64) -> u8 {
    value.clamp(0.0, 100.0).round() as u8
}

/// The fixed weighted blend of the five sub-scores.
pub fn weighted_overall(
    technical_accuracy: u8,
    completeness: u8,
    clarity: u8,
    depth: u8,
    communication_skill: u8,
) -> u8 {
    let blended = technical_accuracy as f64 * WEIGHT_TECHNICAL_ACCURACY
        + completeness as f64 * WEIGHT_COMPLETENESS
        + clarity as f64 * WEIGHT_CLARITY
        + depth as f64 * WEIGHT_DEPTH
        + communication_skill as f64 * WEIGHT_COMMUNICATION;
    clamp_score(blended)
}

/// Rubric prompt: the question, the answer, recent context, and explicit
/// numeric score bands so the model grades against the same scale every
/// time.
pub fn evaluation_prompt(
    question: &InterviewQuestion,
    answer: &str,
    history: &[ConversationTurn],
    context_turns: usize,
) -> String {
    let mut context = String::new();
    let tail_start = history.len().saturating_sub(context_turns);
    for turn in &history[tail_start..] {
        let speaker = match turn.role {
            TurnRole::Interviewer => "Interviewer",
            TurnRole::Candidate => "Candidate",
        };
        context.push_str(&format!("{}: {}\n", speaker, turn.content));
    }

    let key_points = question
        .expected_key_points
        .as_ref()
        .map(|points| format!("Expected key points: {}\n", points.join(", ")))
        .unwrap_or_default();

    format!(
        "You are evaluating a candidate's interview answer.\n\n\
         Recent conversation:\n{context}\n\
         Question ({topic}): {question}\n\
         {key_points}\
         Candidate's answer: {answer}\n\n\
         Score each dimension 0-100 using these bands:\n\
         90-100 = fully accurate and complete, 70-89 = mostly correct with minor gaps,\n\
         50-69 = some correct and some incorrect or missing, 30-49 = largely incorrect or superficial,\n\
         0-29 = off-topic or no real content.\n\n\
         Respond with JSON only:\n\
         {{\"clarity\": 0, \"completeness\": 0, \"technicalAccuracy\": 0, \"communicationSkill\": 0, \"depth\": 0,\n\
           \"confidence\": \"low|medium|high\", \"needsFollowUp\": false, \"followUpReason\": \"\",\n\
           \"strongPoints\": [], \"weakPoints\": [], \"missingConcepts\": [], \"keyPointsCovered\": [],\n\
           \"feedback\": \"\"}}",
        context = context,
        topic = question.topic,
        question = question.question,
        key_points = key_points,
        answer = answer,
    )
}

fn score_field(value: &Value, camel: &str, snake: &str) -> Option<u8> {
    value
        .get(camel)
        .or_else(|| value.get(snake))
        .and_then(|v| v.as_f64())
        .map(clamp_score)
}

fn string_list(value: &Value, camel: &str, snake: &str) -> Vec<String> {
    value
        .get(camel)
        .or_else(|| value.get(snake))
        .and_then(|v| v.as_array())
        .map(|arr| {
            arr.iter()
                .filter_map(|v| v.as_str().map(String::from))
                .collect()
        })
        .unwrap_or_default()
}

/// Parse a model response into an [`AnswerEvaluation`].
///
/// Tolerates code fences, surrounding prose, and camelCase or snake_case
/// keys; every sub-score is clamped and the overall is recomputed locally
/// from the fixed weights. Returns `None` when the payload is missing any
/// of the five sub-scores - the caller then takes the heuristic fallback.
pub fn parse_evaluation(raw: &str) -> Option<AnswerEvaluation> {
    let value = extract_json(raw)?;

    let clarity = score_field(&value, "clarity", "clarity")?;
    let completeness = score_field(&value, "completeness", "completeness")?;
    let technical_accuracy = score_field(&value, "technicalAccuracy", "technical_accuracy")?;
    let communication_skill = score_field(&value, "communicationSkill", "communication_skill")?;
    let depth = score_field(&value, "depth", "depth")?;

    let confidence = match value
        .get("confidence")
        .and_then(|v| v.as_str())
        .unwrap_or("medium")
        .to_lowercase()
        .as_str()
    {
        "low" => EvalConfidence::Low,
        "high" => EvalConfidence::High,
        _ => EvalConfidence::Medium,
    };

    let needs_follow_up = value
        .get("needsFollowUp")
        .or_else(|| value.get("needs_follow_up"))
        .and_then(|v| v.as_bool())
        .unwrap_or(false);
    let follow_up_reason = value
        .get("followUpReason")
        .or_else(|| value.get("follow_up_reason"))
        .and_then(|v| v.as_str())
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(String::from);

    Some(AnswerEvaluation {
        clarity,
        completeness,
        technical_accuracy,
        communication_skill,
        depth,
        overall_score: weighted_overall(
            technical_accuracy,
            completeness,
            clarity,
            depth,
            communication_skill,
        ),
        confidence,
        needs_follow_up,
        follow_up_reason,
        strong_points: string_list(&value, "strongPoints", "strong_points"),
        weak_points: string_list(&value, "weakPoints", "weak_points"),
        missing_concepts: string_list(&value, "missingConcepts", "missing_concepts"),
        key_points_covered: string_list(&value, "keyPointsCovered", "key_points_covered"),
        feedback: value
            .get("feedback")
            .and_then(|v| v.as_str())
            .unwrap_or("")
            .to_string(),
    })
}

/// Prompt for the targeted follow-up that probes a deficient answer.
pub fn follow_up_prompt(
    parent: &InterviewQuestion,
    answer: &str,
    evaluation: &AnswerEvaluation,
) -> String {
    let missing = if evaluation.missing_concepts.is_empty() {
        "the parts the answer glossed over".to_string()
    } else {
        evaluation.missing_concepts.join(", ")
    };
    let reason = evaluation
        .follow_up_reason
        .as_deref()
        .unwrap_or("the answer needs probing");
    format!(
        "The candidate was asked: {question}\n\
         They answered: {answer}\n\
         Why a follow-up is needed: {reason}\n\
         Concepts not yet covered: {missing}\n\n\
         Write one short, targeted follow-up question that probes those gaps. \
         Return only the question text.",
        question = parent.question,
        answer = answer,
        reason = reason,
        missing = missing,
    )
}

/// Prompt for the final qualitative assessment.
pub fn final_feedback_prompt(transcript: &str, mean_score: u8, answers: usize) -> String {
    format!(
        "You are summarizing a completed mock interview.\n\
         The candidate answered {answers} question(s) with a mean score of {mean}/100.\n\n\
         Condensed transcript with per-answer scores:\n{transcript}\n\n\
         Respond with JSON only:\n\
         {{\"strengths\": [\"...\"], \"improvements\": [\"...\"], \"detailedReview\": \"...\",\n\
           \"recommendation\": \"strong-hire|hire|maybe|no-hire\"}}",
        answers = answers,
        mean = mean_score,
        transcript = transcript,
    )
}

/// Parse the qualitative half of the final feedback. The overall score is
/// always the locally computed mean, never the model's.
pub fn parse_final_feedback(
    raw: &str,
) -> Option<(Vec<String>, Vec<String>, String, Recommendation)> {
    let value = extract_json(raw)?;
    let strengths = string_list(&value, "strengths", "strengths");
    let improvements = string_list(&value, "improvements", "improvements");
    let review = value
        .get("detailedReview")
        .or_else(|| value.get("detailed_review"))
        .and_then(|v| v.as_str())
        .map(String::from)?;
    let recommendation = match value
        .get("recommendation")
        .and_then(|v| v.as_str())
        .unwrap_or("")
        .to_lowercase()
        .as_str()
    {
        "strong-hire" | "strong hire" => Recommendation::StrongHire,
        "hire" => Recommendation::Hire,
        "maybe" => Recommendation::Maybe,
        "no-hire" | "no hire" => Recommendation::NoHire,
        _ => return None,
    };
    Some((strengths, improvements, review, recommendation))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::interview::{Difficulty, QuestionKind};
    use uuid::Uuid;

    fn question() -> InterviewQuestion {
        InterviewQuestion {
            id: Uuid::new_v4().to_string(),
            question: "Explain cache invalidation.".into(),
            kind: QuestionKind::Technical,
            difficulty: Difficulty::Medium,
            topic: "caching".into(),
            expected_key_points: Some(vec!["ttl".into(), "write-through".into()]),
            parent_question_id: None,
        }
    }

    #[test]
    fn strips_json_code_fences() {
        let fenced = "```json\n{\"a\": 1}\n```";
        assert_eq!(strip_code_fences(fenced), "{\"a\": 1}");
        assert_eq!(strip_code_fences("plain"), "plain");
    }

    #[test]
    fn extract_json_tolerates_surrounding_prose() {
        let raw = "Sure! Here is the evaluation: {\"clarity\": 80} Hope that helps.";
        let value = extract_json(raw).unwrap();
        assert_eq!(value["clarity"], 80);
    }

    // Every sub-score and the overall land in [0, 100] no matter what the
    // model sends back.
    #[test]
    fn out_of_range_scores_are_clamped() {
        let raw = r#"```json
{"clarity": 150, "completeness": -20, "technicalAccuracy": 101, "communicationSkill": 55.4, "depth": 70,
 "needsFollowUp": true, "followUpReason": "shallow", "feedback": "ok"}
```"#;
        let eval = parse_evaluation(raw).unwrap();
        assert_eq!(eval.clarity, 100);
        assert_eq!(eval.completeness, 0);
        assert_eq!(eval.technical_accuracy, 100);
        assert_eq!(eval.communication_skill, 55);
        assert!(eval.overall_score <= 100);
        assert!(eval.needs_follow_up);
        assert_eq!(eval.follow_up_reason.as_deref(), Some("shallow"));
    }

    #[test]
    fn weighted_overall_uses_fixed_weights() {
        // 0.35*80 + 0.25*60 + 0.15*70 + 0.15*50 + 0.10*90 = 70
        assert_eq!(weighted_overall(80, 60, 70, 50, 90), 70);
        assert_eq!(weighted_overall(100, 100, 100, 100, 100), 100);
        assert_eq!(weighted_overall(0, 0, 0, 0, 0), 0);
    }

    #[test]
    fn missing_sub_scores_reject_the_payload() {
        let raw = r#"{"clarity": 80, "completeness": 70}"#;
        assert!(parse_evaluation(raw).is_none());
        assert!(parse_evaluation("not json at all").is_none());
    }

    #[test]
    fn snake_case_keys_are_accepted() {
        let raw = r#"{"clarity": 60, "completeness": 60, "technical_accuracy": 60,
                      "communication_skill": 60, "depth": 60, "needs_follow_up": false}"#;
        let eval = parse_evaluation(raw).unwrap();
        assert_eq!(eval.overall_score, 60);
        assert_eq!(eval.confidence, EvalConfidence::Medium);
    }

    #[test]
    fn evaluation_prompt_includes_rubric_bands_and_context() {
        let history = vec![
            ConversationTurn::interviewer("Explain cache invalidation.", None),
            ConversationTurn::candidate("You clear stale entries.", None),
        ];
        let prompt = evaluation_prompt(&question(), "You clear stale entries.", &history, 6);
        assert!(prompt.contains("90-100"));
        assert!(prompt.contains("Expected key points: ttl, write-through"));
        assert!(prompt.contains("Interviewer: Explain cache invalidation."));
    }

    #[test]
    fn parse_final_feedback_requires_known_recommendation() {
        let good = r#"{"strengths": ["depth"], "improvements": ["pace"],
                       "detailedReview": "solid", "recommendation": "hire"}"#;
        let (s, i, review, rec) = parse_final_feedback(good).unwrap();
        assert_eq!(s, vec!["depth"]);
        assert_eq!(i, vec!["pace"]);
        assert_eq!(review, "solid");
        assert_eq!(rec, Recommendation::Hire);

        let bad = r#"{"strengths": [], "improvements": [], "detailedReview": "x",
                      "recommendation": "definitely"}"#;
        assert!(parse_final_feedback(bad).is_none());
    }
}
