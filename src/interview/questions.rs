use std::collections::HashSet;

use lazy_static::lazy_static;
use log::{info, warn};
use uuid::Uuid;

use crate::interview::{Difficulty, InterviewQuestion, QuestionKind, SessionConfig};
use crate::llm::TextCompletion;

use super::rubric;

/// One entry in the static per-role question bank.
struct BankQuestion {
    kind: QuestionKind,
    topic: &'static str,
    text: &'static str,
    key_points: &'static [&'static str],
}

macro_rules! bank {
    ($($kind:ident, $topic:expr, $text:expr, [$($kp:expr),*];)*) => {
        vec![$(BankQuestion {
            kind: QuestionKind::$kind,
            topic: $topic,
            text: $text,
            key_points: &[$($kp),*],
        }),*]
    };
}

lazy_static! {
    static ref FRONTEND_BANK: Vec<BankQuestion> = bank![
        Technical, "javascript",
            "Explain the difference between var, let, and const in JavaScript, and when you would choose each.",
            ["scope", "hoisting", "reassignment"];
        Technical, "react",
            "How does the virtual DOM work, and what problem does reconciliation solve?",
            ["diffing", "re-render", "keys"];
        Technical, "css",
            "How would you debug a layout where a flex item overflows its container?",
            ["flex-basis", "min-width", "overflow"];
        Technical, "performance",
            "What techniques do you use to reduce initial page load time in a large single-page application?",
            ["code splitting", "lazy loading", "caching"];
        Scenario, "debugging",
            "A user reports that a form submits twice when they double-click the button. Walk me through how you would reproduce and fix it.",
            ["debounce", "disabled state", "idempotency"];
        Scenario, "accessibility",
            "You inherit a dashboard that fails an accessibility audit. Where do you start?",
            ["semantic html", "aria", "keyboard navigation"];
        Behavioral, "collaboration",
            "Tell me about a time you disagreed with a designer about an interaction. How did you resolve it?",
            [];
        Behavioral, "growth",
            "Describe the most valuable piece of code review feedback you have received.",
            [];
        SystemDesign, "architecture",
            "Design the state management for a collaborative document editor running in the browser.",
            ["conflict resolution", "websocket", "optimistic updates"];
    ];

    static ref BACKEND_BANK: Vec<BankQuestion> = bank![
        Technical, "databases",
            "When would you choose a document store over a relational database?",
            ["schema flexibility", "joins", "consistency"];
        Technical, "apis",
            "How do you version a public REST API without breaking existing clients?",
            ["versioning", "deprecation", "compatibility"];
        Technical, "concurrency",
            "Explain how you would prevent two workers from processing the same queued job.",
            ["locking", "idempotency", "visibility timeout"];
        Technical, "caching",
            "Walk me through the cache invalidation strategy you would use for a read-heavy product catalog.",
            ["ttl", "write-through", "cache stampede"];
        Scenario, "incident-response",
            "An endpoint's p99 latency tripled overnight with no deploy. How do you investigate?",
            ["metrics", "profiling", "query plan"];
        Scenario, "migrations",
            "You need to rename a heavily used database column with zero downtime. What is your plan?",
            ["dual write", "backfill", "staged rollout"];
        Behavioral, "ownership",
            "Tell me about a production incident you caused and what you changed afterwards.",
            [];
        Behavioral, "prioritization",
            "How do you decide between paying down technical debt and shipping a feature?",
            [];
        SystemDesign, "scalability",
            "Design a rate limiter for a public API serving millions of clients.",
            ["token bucket", "distributed state", "fairness"];
    ];

    static ref FULLSTACK_BANK: Vec<BankQuestion> = bank![
        Technical, "http",
            "What happens to a request between the browser and your application server? Include the layers you can influence.",
            ["dns", "tls", "load balancer"];
        Technical, "auth",
            "Compare session cookies with token-based authentication for a web application.",
            ["statelessness", "revocation", "csrf"];
        Technical, "data-fetching",
            "How do you keep client state consistent with the server after a mutation?",
            ["optimistic updates", "invalidation", "refetch"];
        Scenario, "full-stack-debugging",
            "A page intermittently shows stale data after saving. The API looks correct in isolation. How do you track it down?",
            ["caching layers", "race condition", "cache headers"];
        Scenario, "delivery",
            "You must ship a feature that spans a schema change, an API change, and a UI change. How do you sequence the rollout?",
            ["backwards compatibility", "feature flags", "migration"];
        Behavioral, "breadth",
            "Which end of the stack do you reach for first when you own a feature, and why?",
            [];
        Behavioral, "mentoring",
            "Tell me about a time you helped a teammate work in a part of the stack they did not know.",
            [];
        SystemDesign, "end-to-end",
            "Design a notification system that delivers in-app, email, and push notifications.",
            ["fan-out", "preferences", "retries"];
    ];

    static ref DSA_BANK: Vec<BankQuestion> = bank![
        DsaProblem, "hashing",
            "Given an array of integers and a target, return the indices of two numbers that sum to the target. What data structure gives you constant time lookups?",
            ["hash map", "complement", "single pass"];
        DsaProblem, "strings",
            "How would you find the longest substring without repeating characters?",
            ["sliding window", "set", "two pointers"];
        DsaProblem, "trees",
            "Describe an algorithm to check whether a binary tree is height-balanced.",
            ["recursion", "height", "early exit"];
        DsaProblem, "graphs",
            "You are given a grid of land and water cells. How do you count the islands?",
            ["bfs", "dfs", "visited set"];
        DsaProblem, "heaps",
            "Merge k sorted lists efficiently. What is the time complexity?",
            ["min-heap", "priority queue", "n log k"];
        DsaProblem, "dynamic-programming",
            "How would you compute the minimum number of coins needed to make a given amount?",
            ["dynamic programming", "subproblems", "memoization"];
        Technical, "complexity",
            "Explain amortized analysis using a dynamic array as the example.",
            ["amortized", "doubling", "average cost"];
        Technical, "data-structures",
            "Compare a balanced binary search tree with a hash table for implementing an ordered index.",
            ["ordering", "worst case", "range queries"];
        Behavioral, "problem-solving",
            "Tell me about the hardest algorithmic problem you have solved outside an interview.",
            [];
    ];

    static ref GENERAL_BANK: Vec<BankQuestion> = bank![
        Technical, "fundamentals",
            "What happens between typing a URL into the browser and the page rendering?",
            ["dns", "tcp", "rendering"];
        Technical, "testing",
            "What makes a unit test valuable rather than just present?",
            ["isolation", "behavior", "regression"];
        Technical, "tooling",
            "How do you use version control to keep a long-running feature branch healthy?",
            ["rebase", "conflicts", "small commits"];
        Scenario, "planning",
            "Your team is halfway through a sprint and a critical bug arrives. How do you re-plan?",
            ["triage", "communication", "scope"];
        Scenario, "legacy-code",
            "You join a project with no documentation and failing tests. What are your first two weeks like?",
            ["reading code", "tests first", "quick wins"];
        Behavioral, "teamwork",
            "Tell me about a time you had to deliver difficult feedback to a teammate.",
            [];
        Behavioral, "learning",
            "What is the most recent technology you learned, and how did you approach it?",
            [];
        Behavioral, "motivation",
            "Why this role, and what do you want to learn in the next year?",
            [];
        SystemDesign, "design-basics",
            "Design a URL shortener. Start with the data model.",
            ["hashing", "collisions", "redirects"];
    ];
}

fn is_dsa_role(role: &str) -> bool {
    let role = role.to_lowercase();
    role.contains("dsa") || role.contains("algorithm")
}

fn bank_for_role(role: &str) -> &'static Vec<BankQuestion> {
    let role = role.to_lowercase();
    if is_dsa_role(&role) {
        &DSA_BANK
    } else if role.contains("frontend") || role.contains("front-end") {
        &FRONTEND_BANK
    } else if role.contains("backend") || role.contains("back-end") {
        &BACKEND_BANK
    } else if role.contains("fullstack") || role.contains("full-stack") {
        &FULLSTACK_BANK
    } else {
        &GENERAL_BANK
    }
}

/// The question-type interleaving for a role, `count` slots long.
///
/// DSA roles skew heavily toward problems; developer roles mix technical,
/// scenario, behavioral, and one system-design slot; anything else cycles
/// technical/scenario/behavioral.
pub fn kind_sequence(role: &str, count: usize) -> Vec<QuestionKind> {
    use QuestionKind::*;
    let base: &[QuestionKind] = if is_dsa_role(role) {
        &[DsaProblem, DsaProblem, Technical, DsaProblem, DsaProblem, Technical, DsaProblem, Behavioral]
    } else if !std::ptr::eq(bank_for_role(role), &*GENERAL_BANK) {
        &[Technical, Scenario, Behavioral, Technical, SystemDesign, Technical, Scenario, Behavioral]
    } else {
        &[Technical, Scenario, Behavioral]
    };
    (0..count).map(|i| base[i % base.len()]).collect()
}

fn question_from_bank(entry: &BankQuestion, difficulty: Difficulty) -> InterviewQuestion {
    InterviewQuestion {
        id: Uuid::new_v4().to_string(),
        question: entry.text.to_string(),
        kind: entry.kind,
        difficulty,
        topic: entry.topic.to_string(),
        expected_key_points: if entry.key_points.is_empty() {
            None
        } else {
            Some(entry.key_points.iter().map(|s| s.to_string()).collect())
        },
        parent_question_id: None,
    }
}

/// Build the ordered question sequence for a session.
///
/// Slots are filled from the role bank (general bank as backstop). If the
/// banks cannot cover the sequence, the text-completion service is asked to
/// synthesize the shortfall; when that fails too, bank entries are cycled so
/// the session always starts with a full schedule.
pub(crate) async fn build_sequence(
    config: &SessionConfig,
    completion: &dyn TextCompletion,
) -> Vec<InterviewQuestion> {
    let difficulty = config.level.question_difficulty();
    let kinds = kind_sequence(&config.role, config.question_count);

    let role_bank = bank_for_role(&config.role);
    let combined: Vec<&BankQuestion> = if std::ptr::eq(role_bank, &*GENERAL_BANK) {
        role_bank.iter().collect()
    } else {
        role_bank.iter().chain(GENERAL_BANK.iter()).collect()
    };

    let mut used = vec![false; combined.len()];
    let mut slots: Vec<Option<InterviewQuestion>> = vec![None; kinds.len()];

    for (slot, kind) in kinds.iter().enumerate() {
        if let Some(index) = (0..combined.len()).find(|&i| !used[i] && combined[i].kind == *kind) {
            used[index] = true;
            slots[slot] = Some(question_from_bank(combined[index], difficulty));
        }
    }

    let missing: Vec<usize> = slots
        .iter()
        .enumerate()
        .filter_map(|(i, s)| s.is_none().then_some(i))
        .collect();

    if !missing.is_empty() {
        let existing: HashSet<String> = slots
            .iter()
            .flatten()
            .map(|q| q.question.to_lowercase())
            .collect();
        let supplemented =
            supplement_from_ai(config, missing.len(), &existing, completion).await;
        let mut supplemented = supplemented.into_iter();
        for slot in &missing {
            if let Some((text, topic)) = supplemented.next() {
                slots[*slot] = Some(InterviewQuestion {
                    id: Uuid::new_v4().to_string(),
                    question: text,
                    kind: kinds[*slot],
                    difficulty,
                    topic,
                    expected_key_points: None,
                    parent_question_id: None,
                });
            }
        }
    }

    // Last resort: cycle the bank rather than starting with holes.
    for (slot, entry) in slots.iter_mut().enumerate() {
        if entry.is_none() {
            let pick = combined
                .iter()
                .cycle()
                .skip(slot)
                .take(combined.len())
                .find(|q| q.kind == kinds[slot])
                .copied()
                .unwrap_or(combined[slot % combined.len()]);
            *entry = Some(question_from_bank(pick, difficulty));
        }
    }

    slots.into_iter().flatten().collect()
}

/// Ask the completion service for `count` additional unique questions.
async fn supplement_from_ai(
    config: &SessionConfig,
    count: usize,
    existing: &HashSet<String>,
    completion: &dyn TextCompletion,
) -> Vec<(String, String)> {
    let topic_hint = config
        .custom_topic
        .as_deref()
        .map(|t| format!(" Focus on {}.", t))
        .unwrap_or_default();
    let prompt = format!(
        "Generate {count} additional unique interview questions for a {role} position at {level} level.{topic_hint}\n\
         Do not repeat questions that only vary in wording.\n\
         Respond with a JSON array of objects: [{{\"question\": \"...\", \"topic\": \"...\"}}]",
        count = count,
        role = config.role,
        level = config.level.as_str(),
        topic_hint = topic_hint,
    );

    let raw = match completion.complete(&prompt).await {
        Ok(raw) => raw,
        Err(err) => {
            warn!("question supplement failed: {}", err);
            return Vec::new();
        }
    };

    let Some(value) = rubric::extract_json(&raw) else {
        warn!("question supplement returned unparseable output");
        return Vec::new();
    };
    let Some(items) = value.as_array() else {
        return Vec::new();
    };

    let default_topic = config
        .custom_topic
        .clone()
        .unwrap_or_else(|| config.role.clone());
    let mut out = Vec::new();
    for item in items {
        let text = item
            .get("question")
            .and_then(|q| q.as_str())
            .map(str::trim)
            .unwrap_or_default();
        if text.is_empty() || existing.contains(&text.to_lowercase()) {
            continue;
        }
        let topic = item
            .get("topic")
            .and_then(|t| t.as_str())
            .unwrap_or(&default_topic)
            .to_string();
        out.push((text.to_string(), topic));
        if out.len() == count {
            break;
        }
    }
    info!("supplemented {} question(s) from the completion service", out.len());
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::interview::ExperienceLevel;
    use crate::llm::testing::ScriptedCompletion;

    fn config(role: &str, level: ExperienceLevel) -> SessionConfig {
        SessionConfig::new(role, level)
    }

    #[tokio::test]
    async fn known_roles_fill_eight_slots_from_the_bank() {
        for role in ["frontend-developer", "backend-developer", "fullstack-developer", "dsa-engineer"] {
            let completion = ScriptedCompletion::failing();
            let questions =
                build_sequence(&config(role, ExperienceLevel::Intermediate), &completion).await;
            assert_eq!(questions.len(), 8, "role {}", role);
            assert_eq!(completion.calls(), 0, "bank should cover role {}", role);
            // All scheduled questions are genuinely new, not follow-ups.
            assert!(questions.iter().all(|q| q.parent_question_id.is_none()));
        }
    }

    #[tokio::test]
    async fn beginner_sessions_get_easy_questions() {
        let completion = ScriptedCompletion::failing();
        let questions = build_sequence(
            &config("frontend-developer", ExperienceLevel::Beginner),
            &completion,
        )
        .await;
        assert!(questions.iter().all(|q| q.difficulty == Difficulty::Easy));
    }

    #[tokio::test]
    async fn dsa_roles_skew_toward_problems() {
        let completion = ScriptedCompletion::failing();
        let questions =
            build_sequence(&config("dsa-engineer", ExperienceLevel::Advanced), &completion).await;
        let problems = questions
            .iter()
            .filter(|q| q.kind == QuestionKind::DsaProblem)
            .count();
        assert!(problems >= 5, "expected DSA-heavy mix, got {}", problems);
    }

    #[tokio::test]
    async fn unknown_roles_cycle_core_kinds() {
        let kinds = kind_sequence("underwater-basket-weaver", 8);
        assert_eq!(kinds[0], QuestionKind::Technical);
        assert_eq!(kinds[1], QuestionKind::Scenario);
        assert_eq!(kinds[2], QuestionKind::Behavioral);
        assert_eq!(kinds[3], QuestionKind::Technical);
    }

    #[tokio::test]
    async fn exhausted_bank_is_supplemented_by_the_service() {
        let mut config = config("frontend-developer", ExperienceLevel::Intermediate);
        config.question_count = 20; // well past the bank

        let completion = ScriptedCompletion::repeat(
            r#"```json
[{"question": "How would you structure a design-token pipeline?", "topic": "design systems"},
 {"question": "What tradeoffs come with server-side rendering?", "topic": "rendering"}]
```"#,
        );
        let questions = build_sequence(&config, &completion).await;
        assert_eq!(questions.len(), 20);
        assert!(completion.calls() >= 1);
        assert!(questions
            .iter()
            .any(|q| q.question.contains("design-token pipeline")));
    }

    #[tokio::test]
    async fn supplement_failure_still_fills_the_schedule() {
        let mut config = config("backend-developer", ExperienceLevel::Intermediate);
        config.question_count = 16;
        let completion = ScriptedCompletion::failing();
        let questions = build_sequence(&config, &completion).await;
        assert_eq!(questions.len(), 16, "bank cycling must fill the shortfall");
    }
}
