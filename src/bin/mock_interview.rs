// Offline end-to-end run of the interview pipeline: scripted audio platform,
// fallback scoring, four questions. Set COMPLETION_API_KEY to score with a
// real completion service instead.

use std::sync::Arc;

use anyhow::Result;
use async_trait::async_trait;
use log::info;

use vivavoce::voice::scripted::ScriptedPlatform;
use vivavoce::voice::RecognitionSignal;
use vivavoce::{
    CompletionError, ExperienceLevel, HttpCompletionClient, InterviewService, SessionConfig,
    SpeakOptions, TextCompletion, TranscriptionResult, VoiceConfig, VoiceEngine, VoiceEvent,
};

/// Stands in for the completion service when no API key is configured;
/// every call fails so the deterministic fallback paths run.
struct OfflineCompletion;

#[async_trait]
impl TextCompletion for OfflineCompletion {
    async fn complete(&self, _prompt: &str) -> Result<String, CompletionError> {
        Err(CompletionError::Transport("offline demo".into()))
    }
}

// One scripted answer per candidate turn, in the order the interview plays
// out: Q1, Q2 (too short, draws a follow-up), the follow-up, Q3, Q4, spare.
const ANSWERS: &[&str] = &[
    "In JavaScript, var is function scoped and hoisted, while let and const are block \
     scoped. const also prevents reassignment of the binding. In my experience reaching \
     for const by default makes the code easier to reason about, and I fall back to let \
     only when a binding genuinely has to change.",
    "Honestly I am not sure, maybe some browser thing.",
    "I would disable the button the moment the request starts and debounce the click \
     handler as a second line of defense. The backend api should also treat the \
     submission as idempotent, so even a duplicate request cannot create a second record.",
    "A designer once wanted a hover-only menu and I pushed back because it was unusable \
     on touch devices. For example, we prototyped both versions, watched five users \
     struggle with the hover one, and shipped the click version together.",
    "The virtual DOM is an in-memory tree the framework diffs against the previous \
     render. Reconciliation computes the minimal set of real DOM mutations, and stable \
     keys let the differ match list items instead of recreating them.",
    "I would measure first and optimize the biggest cost, usually bundle size or \
     render-blocking requests, before touching anything else in the frontend.",
];

fn scripted_passes() -> Vec<Vec<(u64, RecognitionSignal)>> {
    ANSWERS
        .iter()
        .map(|answer| {
            let words: Vec<&str> = answer.split_whitespace().collect();
            let interim = words[..words.len().min(4)].join(" ");
            vec![
                (50, RecognitionSignal::Started),
                (150, RecognitionSignal::Result(TranscriptionResult::interim(interim, 0.7))),
                (300, RecognitionSignal::Result(TranscriptionResult::final_segment(*answer, 0.94))),
            ]
        })
        .collect()
}

#[tokio::main]
async fn main() -> Result<()> {
    env_logger::init();

    let completion: Arc<dyn TextCompletion> = match HttpCompletionClient::from_env() {
        Some(client) => {
            info!("using the configured completion service");
            Arc::new(client)
        }
        None => {
            info!("no COMPLETION_API_KEY set - running fully offline");
            Arc::new(OfflineCompletion)
        }
    };

    let mut config = SessionConfig::new("frontend-developer", ExperienceLevel::Intermediate);
    config.question_count = 4;
    let service = InterviewService::new(completion, config);

    // Short silence threshold so the scripted turns complete quickly.
    let voice_config = VoiceConfig {
        silence_threshold_ms: 400,
        ..VoiceConfig::default()
    };
    let engine = VoiceEngine::new(voice_config);
    let mut platform = ScriptedPlatform::with_passes(scripted_passes());
    if !engine.initialize(&mut platform) {
        anyhow::bail!("scripted platform should always support recognition");
    }

    let (turn_tx, mut turn_rx) = tokio::sync::mpsc::unbounded_channel::<String>();
    let _subscription = engine.on(move |event| {
        if let VoiceEvent::SilenceDetected { transcript } = event {
            let _ = turn_tx.send(transcript.clone());
        }
    });

    let session = service.start_session().await;
    println!("=== mock interview: {} ({}) ===\n", session.role, session.level.as_str());

    let mut question = session.questions[0].clone();
    loop {
        println!("Interviewer: {}", question.question);
        engine.speak_naturally(&question.question, &SpeakOptions::default()).await;

        engine.start_listening()?;
        let answer = tokio::time::timeout(std::time::Duration::from_secs(10), turn_rx.recv())
            .await?
            .ok_or_else(|| anyhow::anyhow!("voice channel closed"))?;
        engine.stop_listening();
        println!("Candidate: {}\n", answer);

        engine.set_processing(true);
        let evaluation = service.submit_answer(&question, &answer).await;
        engine.set_processing(false);
        println!(
            "  → scored {}/100 (accuracy {}, completeness {}, clarity {}, depth {}, communication {})",
            evaluation.overall_score,
            evaluation.technical_accuracy,
            evaluation.completeness,
            evaluation.clarity,
            evaluation.depth,
            evaluation.communication_skill,
        );
        if let Some(reason) = &evaluation.follow_up_reason {
            println!("  → follow-up warranted: {}", reason);
        }
        println!();

        match service.next_question(Some(&answer), Some(&evaluation)).await {
            Some(next) => {
                if next.is_follow_up {
                    println!("  (follow-up)");
                }
                question = next.question;
            }
            None => break,
        }
    }

    if let Some(feedback) = service.generate_final_feedback().await {
        println!("=== final assessment ===");
        println!("overall: {}/100 - {:?}", feedback.overall_score, feedback.recommendation);
        for s in &feedback.strengths {
            println!("  + {}", s);
        }
        for i in &feedback.improvements {
            println!("  - {}", i);
        }
        println!("{}", feedback.detailed_review);
    }

    engine.cleanup();
    Ok(())
}
