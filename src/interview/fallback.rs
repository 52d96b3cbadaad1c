use std::collections::HashSet;

use log::info;
use once_cell::sync::Lazy;
use regex::Regex;

use crate::interview::rubric::weighted_overall;
use crate::interview::{
    AnswerEvaluation, EvalConfidence, FinalFeedback, InterviewQuestion, QuestionKind,
    Recommendation,
};

static TECH_VOCABULARY: Lazy<HashSet<&'static str>> = Lazy::new(|| {
    [
        // Programming
        "javascript", "typescript", "python", "rust", "java", "react", "node", "api",
        "database", "sql", "algorithm", "framework", "library", "repository", "git",
        "frontend", "backend", "fullstack", "microservices", "kubernetes", "docker",
        "aws", "azure", "cloud", "devops", "testing", "cache", "caching", "queue",
        "thread", "async", "latency", "throughput", "index", "schema", "transaction",
        // Data structures & algorithms
        "array", "hash", "hashmap", "map", "set", "tree", "graph", "heap", "stack",
        "recursion", "iteration", "complexity", "pointer", "pointers", "lookup",
        "lookups", "sorting", "search", "traversal", "memoization",
        // General technology
        "scalability", "performance", "optimization", "architecture", "protocol",
        "encryption", "authentication", "deployment", "monitoring", "logging",
    ]
    .into_iter()
    .collect()
});

static EXAMPLE_MARKERS: Lazy<Regex> = Lazy::new(|| {
    Regex::new(
        r"(?i)\b(for example|for instance|such as|e\.g\.|in my experience|in a previous project|i worked on|we built|i built|i implemented)\b",
    )
    .unwrap()
});

fn technical_hits(answer: &str) -> usize {
    let mut seen = HashSet::new();
    for word in answer.split_whitespace() {
        let clean: String = word
            .to_lowercase()
            .chars()
            .filter(|c| c.is_alphanumeric())
            .collect();
        if TECH_VOCABULARY.contains(clean.as_str()) {
            seen.insert(clean);
        }
    }
    seen.len()
}

fn sentence_count(answer: &str) -> usize {
    answer
        .split(['.', '!', '?'])
        .filter(|s| !s.trim().is_empty())
        .count()
        .max(1)
}

fn expects_technical_content(kind: QuestionKind) -> bool {
    matches!(
        kind,
        QuestionKind::Technical | QuestionKind::DsaProblem | QuestionKind::SystemDesign
    )
}

/// Heuristic evaluation used whenever the completion service is unavailable
/// or returns unparseable output.
///
/// Sub-scores are derived from word count, technical vocabulary, example
/// language, and sentence structure; the result is a fully valid
/// [`AnswerEvaluation`] (confidence `Low`) so the rest of the pipeline never
/// learns that AI scoring failed.
pub fn evaluate_heuristically(question: &InterviewQuestion, answer: &str) -> AnswerEvaluation {
    let words = answer.split_whitespace().count();
    let sentences = sentence_count(answer);
    let tech_hits = technical_hits(answer);
    let has_example = EXAMPLE_MARKERS.is_match(answer);
    let words_per_sentence = words / sentences;

    let completeness: u8 = match words {
        0..=14 => 25,
        15..=39 => 45,
        40..=79 => 65,
        80..=149 => 80,
        _ => 85,
    };

    let technical_accuracy: u8 = if tech_hits == 0 {
        35
    } else {
        (45 + tech_hits as u32 * 10).min(85) as u8
    };

    let mut clarity: u8 = if (8..=25).contains(&words_per_sentence) { 70 } else { 55 };
    if sentences >= 3 {
        clarity = clarity.saturating_add(5);
    }

    let mut depth: u8 = 30;
    if has_example {
        depth += 20;
    }
    depth += (tech_hits * 5).min(15) as u8;
    if words >= 80 {
        depth += 10;
    }

    let mut communication_skill: u8 = 50;
    if has_example {
        communication_skill += 10;
    }
    if sentences >= 2 {
        communication_skill += 5;
    }

    let (needs_follow_up, follow_up_reason) = if words < 30 {
        (
            true,
            Some("The answer was quite brief - more detail would help gauge understanding.".to_string()),
        )
    } else if tech_hits == 0 && expects_technical_content(question.kind) {
        (
            true,
            Some("The answer did not use any technical terminology expected for this question.".to_string()),
        )
    } else {
        (false, None)
    };

    let mut strong_points = Vec::new();
    if has_example {
        strong_points.push("Backed the answer with a concrete example".to_string());
    }
    if tech_hits >= 2 {
        strong_points.push("Used relevant technical vocabulary".to_string());
    }
    if (8..=25).contains(&words_per_sentence) && sentences >= 2 {
        strong_points.push("Structured the answer in clear sentences".to_string());
    }
    if strong_points.is_empty() {
        strong_points.push("Attempted the question".to_string());
    }

    let mut weak_points = Vec::new();
    if words < 30 {
        weak_points.push("Answer is very brief".to_string());
    }
    if tech_hits == 0 {
        weak_points.push("No technical terminology".to_string());
    }
    if !has_example {
        weak_points.push("No concrete examples".to_string());
    }

    // Key-point coverage from the question's own expectations.
    let answer_lower = answer.to_lowercase();
    let (key_points_covered, missing_concepts) = match &question.expected_key_points {
        Some(points) => points
            .iter()
            .cloned()
            .partition(|point| answer_lower.contains(&point.to_lowercase())),
        None => (Vec::new(), Vec::new()),
    };

    let feedback = format!(
        "Heuristic review: {} words across {} sentence(s), {} technical term(s){}.{}",
        words,
        sentences,
        tech_hits,
        if has_example { ", with an example" } else { "" },
        match &follow_up_reason {
            Some(reason) => format!(" {}", reason),
            None => " The answer covers the question at a reasonable level.".to_string(),
        }
    );

    info!("fallback evaluator scored answer ({} words, {} tech terms)", words, tech_hits);

    AnswerEvaluation {
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
        confidence: EvalConfidence::Low,
        needs_follow_up,
        follow_up_reason,
        strong_points,
        weak_points,
        missing_concepts,
        key_points_covered,
        feedback,
    }
}

/// Canned probe used when the completion service cannot produce a targeted
/// follow-up; built from the evaluation's own gap analysis so it still
/// points somewhere useful.
pub fn canned_follow_up(parent: &InterviewQuestion, evaluation: &AnswerEvaluation) -> String {
    match evaluation.missing_concepts.first() {
        Some(concept) => format!(
            "You did not touch on {} - how does it fit into your answer?",
            concept
        ),
        None => format!(
            "Could you go deeper on that? Walk me through the most important part of your answer to \"{}\" step by step.",
            parent.question
        ),
    }
}

/// Deterministic final feedback built purely from the locally computed
/// per-answer evaluations; used when the AI summary fails.
///
/// Per-dimension averages stand in for the qualitative assessment - the same
/// signals the heuristic evaluator uses, so the result is reproducible.
pub fn deterministic_final_feedback(evaluations: &[AnswerEvaluation]) -> FinalFeedback {
    let n = evaluations.len().max(1) as u32;
    let mean = |f: fn(&AnswerEvaluation) -> u8| -> u8 {
        (evaluations.iter().map(|e| f(e) as u32).sum::<u32>() / n) as u8
    };

    let overall = mean(|e| e.overall_score);
    let dimensions = [
        ("technical accuracy", mean(|e| e.technical_accuracy)),
        ("completeness", mean(|e| e.completeness)),
        ("clarity", mean(|e| e.clarity)),
        ("depth", mean(|e| e.depth)),
        ("communication", mean(|e| e.communication_skill)),
    ];

    let mut ranked = dimensions;
    ranked.sort_by(|a, b| b.1.cmp(&a.1));

    let strengths: Vec<String> = ranked[..2]
        .iter()
        .map(|(name, score)| format!("Consistent {} (avg {}/100)", name, score))
        .collect();
    let improvements: Vec<String> = ranked[ranked.len() - 2..]
        .iter()
        .map(|(name, score)| format!("Work on {} (avg {}/100)", name, score))
        .collect();

    let follow_ups_needed = evaluations.iter().filter(|e| e.needs_follow_up).count();
    let detailed_review = format!(
        "Across {} answered question(s) the candidate averaged {}/100. \
         Dimension averages - technical accuracy {}, completeness {}, clarity {}, depth {}, communication {}. \
         {} answer(s) needed follow-up probing.",
        evaluations.len(),
        overall,
        dimensions[0].1,
        dimensions[1].1,
        dimensions[2].1,
        dimensions[3].1,
        dimensions[4].1,
        follow_ups_needed,
    );

    let recommendation = match overall {
        85..=100 => Recommendation::StrongHire,
        70..=84 => Recommendation::Hire,
        50..=69 => Recommendation::Maybe,
        _ => Recommendation::NoHire,
    };

    FinalFeedback {
        overall_score: overall,
        strengths,
        improvements,
        detailed_review,
        recommendation,
    }
}
