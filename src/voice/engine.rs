use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use log::{debug, error, info, warn};
use once_cell::sync::Lazy;
use parking_lot::Mutex;
use regex::Regex;
use tokio::sync::mpsc;

use crate::backoff::{BackoffPolicy, RapidRestartGuard};
use crate::error::VoiceError;
use crate::events::{EventBus, Subscription, VoiceEvent};
use crate::voice::platform::{
    AudioLevelProbe, MicrophoneSource, RecognitionFault, RecognitionSignal, SignalSink,
    SpeechRecognizer, SpeechSynthesizer, VoicePlatform,
};
use crate::voice::transcript::TranscriptBuffer;
use crate::voice::{SpeakOptions, VoiceConfig, VoiceMode, VoiceState};

static SENTENCE_SPLIT: Lazy<Regex> = Lazy::new(|| Regex::new(r"[^.!?]+[.!?]*").unwrap());

/// The voice turn-taking engine.
///
/// Presents a single conversational audio channel: continuous listening with
/// silence-based end-of-turn detection, and speech output that mutes capture
/// for its whole duration. Listening and speaking are variants of one
/// [`VoiceMode`], so they can never be true at the same time.
///
/// Lifecycle: [`VoiceEngine::new`] → [`initialize`](Self::initialize) → use →
/// [`cleanup`](Self::cleanup). Each engine owns its platform surfaces and its
/// subscribers; nothing is shared between instances.
#[derive(Clone)]
pub struct VoiceEngine {
    inner: Arc<Inner>,
}

struct Inner {
    config: VoiceConfig,
    state: Mutex<EngineState>,
    devices: Mutex<Devices>,
    bus: EventBus,
    continuous: AtomicBool,
    auto_restart: AtomicBool,
    initialized: AtomicBool,
    /// Bumped on every timer (re)arm; a fired timer only counts if its
    /// generation is still current.
    silence_generation: AtomicU64,
    /// Bumped on every `speak` call so a newer utterance supersedes the
    /// state bookkeeping of the one it cancelled.
    speak_generation: AtomicU64,
    sink: Mutex<Option<SignalSink>>,
    transcript: Mutex<TranscriptBuffer>,
    backoff: Mutex<BackoffPolicy>,
    restart_guard: Mutex<RapidRestartGuard>,
}

struct EngineState {
    mode: VoiceMode,
    error: Option<VoiceError>,
    audio_level: u8,
    /// Capture suspended (engine speaking, or caller paused us) without
    /// leaving continuous mode.
    paused: bool,
    /// A network retry is scheduled; suppresses the end-of-session re-arm
    /// and further retry scheduling until it fires.
    retry_pending: bool,
}

impl Default for EngineState {
    fn default() -> Self {
        Self {
            mode: VoiceMode::Idle,
            error: None,
            audio_level: 0,
            paused: false,
            retry_pending: false,
        }
    }
}

#[derive(Default)]
struct Devices {
    recognizer: Option<Box<dyn SpeechRecognizer>>,
    synthesizer: Option<Arc<dyn SpeechSynthesizer>>,
    microphone: Option<Box<dyn MicrophoneSource>>,
    level_probe: Option<Arc<dyn AudioLevelProbe>>,
}

impl VoiceEngine {
    pub fn new(config: VoiceConfig) -> Self {
        let backoff = BackoffPolicy::new(
            config.max_network_retries,
            Duration::from_millis(config.network_backoff_base_ms),
            config.network_backoff_multiplier,
        );
        let guard = RapidRestartGuard::new(
            config.max_rapid_restarts,
            Duration::from_millis(config.rapid_restart_window_ms),
        );
        Self {
            inner: Arc::new(Inner {
                config,
                state: Mutex::new(EngineState::default()),
                devices: Mutex::new(Devices::default()),
                bus: EventBus::new(),
                continuous: AtomicBool::new(false),
                auto_restart: AtomicBool::new(false),
                initialized: AtomicBool::new(false),
                silence_generation: AtomicU64::new(0),
                speak_generation: AtomicU64::new(0),
                sink: Mutex::new(None),
                transcript: Mutex::new(TranscriptBuffer::new()),
                backoff: Mutex::new(backoff),
                restart_guard: Mutex::new(guard),
            }),
        }
    }

    /// Probe the platform's audio capabilities and wire up the signal pump.
    ///
    /// Returns `false` (without panicking or erroring) when speech
    /// recognition is unavailable. A missing synthesizer degrades the engine
    /// to text-only output; a missing microphone source just disables level
    /// metering.
    pub fn initialize(&self, platform: &mut dyn VoicePlatform) -> bool {
        let inner = &self.inner;

        let recognizer = match platform.recognizer() {
            Some(recognizer) => recognizer,
            None => {
                error!("speech recognition unsupported on this platform");
                inner.state.lock().error = Some(VoiceError::RecognitionUnsupported);
                inner.bus.emit(&VoiceEvent::Error(VoiceError::RecognitionUnsupported));
                return false;
            }
        };

        let synthesizer = platform.synthesizer();
        if synthesizer.is_none() {
            warn!("speech synthesis unsupported - continuing in text-only mode");
        }
        let microphone = platform.microphone();

        {
            let mut devices = inner.devices.lock();
            devices.recognizer = Some(recognizer);
            devices.synthesizer = synthesizer.map(Arc::from);
            devices.microphone = microphone;
        }

        let (tx, mut rx) = mpsc::unbounded_channel();
        *inner.sink.lock() = Some(tx);

        let pump = Arc::downgrade(inner);
        tokio::spawn(async move {
            while let Some(signal) = rx.recv().await {
                let Some(inner) = pump.upgrade() else { break };
                inner.handle_signal(signal);
            }
            debug!("recognition signal pump stopped");
        });

        inner.initialized.store(true, Ordering::SeqCst);
        info!("🎤 voice engine initialized (language: {})", inner.config.language);
        true
    }

    /// Enter always-listening mode: capture re-arms automatically after
    /// every natural end-of-segment until [`stop_continuous_mode`] or a
    /// terminal error.
    ///
    /// Microphone permission is requested exactly once per engine lifetime;
    /// the stream is cached and reused across listen cycles.
    pub async fn start_continuous_mode(&self) -> Result<(), VoiceError> {
        let inner = &self.inner;
        if !inner.initialized.load(Ordering::SeqCst) {
            return Err(VoiceError::NotInitialized);
        }

        inner.continuous.store(true, Ordering::SeqCst);
        inner.auto_restart.store(true, Ordering::SeqCst);
        inner.backoff.lock().reset();
        inner.restart_guard.lock().reset();
        {
            let mut state = inner.state.lock();
            state.error = None;
            state.paused = false;
            state.retry_pending = false;
        }

        self.acquire_microphone().await?;

        info!("🔁 continuous mode on");
        inner.arm();
        Ok(())
    }

    /// Leave continuous mode and tear down the current pass.
    pub fn stop_continuous_mode(&self) {
        let inner = &self.inner;
        inner.continuous.store(false, Ordering::SeqCst);
        inner.auto_restart.store(false, Ordering::SeqCst);
        inner.silence_generation.fetch_add(1, Ordering::SeqCst);
        if let Some(recognizer) = inner.devices.lock().recognizer.as_mut() {
            recognizer.abort();
        }
        {
            let mut state = inner.state.lock();
            state.paused = false;
        }
        inner.set_mode(VoiceMode::Idle);
        info!("continuous mode off");
    }

    /// Single-shot capture; ends when the platform closes the pass or the
    /// caller invokes [`stop_listening`](Self::stop_listening).
    pub fn start_listening(&self) -> Result<(), VoiceError> {
        let inner = &self.inner;
        if !inner.initialized.load(Ordering::SeqCst) {
            return Err(VoiceError::NotInitialized);
        }
        {
            let mut state = inner.state.lock();
            state.error = None;
            // An explicit listen request always unmutes capture.
            state.paused = false;
        }
        inner.arm();
        Ok(())
    }

    /// Stop capture and return everything heard since the buffer was last
    /// cleared. Recognition state is reset for the next turn.
    pub fn stop_listening(&self) -> String {
        let inner = &self.inner;
        inner.silence_generation.fetch_add(1, Ordering::SeqCst);
        if let Some(recognizer) = inner.devices.lock().recognizer.as_mut() {
            recognizer.stop();
        }
        let text = {
            let mut transcript = inner.transcript.lock();
            let text = transcript.text();
            transcript.clear();
            text
        };
        inner.set_mode(VoiceMode::Idle);
        text
    }

    /// Suspend capture without leaving continuous mode.
    pub fn pause_listening(&self) {
        let inner = &self.inner;
        inner.silence_generation.fetch_add(1, Ordering::SeqCst);
        inner.state.lock().paused = true;
        if let Some(recognizer) = inner.devices.lock().recognizer.as_mut() {
            recognizer.abort();
        }
        if inner.mode() == VoiceMode::Listening {
            inner.set_mode(VoiceMode::Idle);
        }
    }

    /// Undo [`pause_listening`](Self::pause_listening). No-op unless
    /// continuous mode is still active.
    pub fn resume_listening(&self) {
        let inner = &self.inner;
        if !inner.initialized.load(Ordering::SeqCst)
            || !inner.continuous.load(Ordering::SeqCst)
        {
            return;
        }
        inner.state.lock().paused = false;
        inner.arm();
    }

    /// Speak `text` as one utterance. Cancels any in-flight utterance, mutes
    /// capture for the duration, and always resolves - a synthesis error is
    /// logged, never surfaced to the caller, so the conversation cannot
    /// stall on a playback failure.
    pub async fn speak(&self, text: &str, options: &SpeakOptions) {
        self.speak_chunks(vec![text.to_string()], options).await;
    }

    /// Speak `text` sentence by sentence with a short pause between chunks,
    /// emulating natural cadence. Same never-fail guarantee as
    /// [`speak`](Self::speak); `SpeechStart`/`SpeechEnd` fire once for the
    /// whole text, not per sentence.
    pub async fn speak_naturally(&self, text: &str, options: &SpeakOptions) {
        self.speak_chunks(split_sentences(text), options).await;
    }

    /// Flag the engine as busy while an answer evaluation is in flight.
    ///
    /// Gates UI-level resubmission between end-of-turn and the next
    /// question. Only toggles between `Idle` and `Processing` - it never
    /// overrides active capture or playback.
    pub fn set_processing(&self, processing: bool) {
        let inner = &self.inner;
        let mode = inner.mode();
        if processing && mode == VoiceMode::Idle {
            inner.set_mode(VoiceMode::Processing);
        } else if !processing && mode == VoiceMode::Processing {
            inner.set_mode(VoiceMode::Idle);
        }
    }

    /// Subscribe to engine events; the handle unsubscribes on drop.
    pub fn on<F>(&self, callback: F) -> Subscription
    where
        F: Fn(&VoiceEvent) + Send + Sync + 'static,
    {
        self.inner.bus.subscribe(callback)
    }

    /// Current state snapshot.
    pub fn state(&self) -> VoiceState {
        let state = self.inner.state.lock();
        self.inner.snapshot_locked(&state)
    }

    /// Text accumulated for the current turn.
    pub fn transcript(&self) -> String {
        self.inner.transcript.lock().text()
    }

    pub fn is_continuous(&self) -> bool {
        self.inner.continuous.load(Ordering::SeqCst)
    }

    pub fn auto_restart_enabled(&self) -> bool {
        self.inner.auto_restart.load(Ordering::SeqCst)
    }

    /// Tear everything down. The engine cannot be reused afterwards.
    pub fn cleanup(&self) {
        let inner = &self.inner;
        inner.initialized.store(false, Ordering::SeqCst);
        inner.continuous.store(false, Ordering::SeqCst);
        inner.auto_restart.store(false, Ordering::SeqCst);
        inner.silence_generation.fetch_add(1, Ordering::SeqCst);
        inner.speak_generation.fetch_add(1, Ordering::SeqCst);
        {
            let mut devices = inner.devices.lock();
            if let Some(recognizer) = devices.recognizer.as_mut() {
                recognizer.abort();
            }
            if let Some(synthesizer) = devices.synthesizer.as_ref() {
                synthesizer.cancel();
            }
            devices.level_probe = None;
        }
        *inner.sink.lock() = None;
        inner.transcript.lock().clear();
        inner.set_mode(VoiceMode::Idle);
        info!("voice engine cleaned up");
    }

    async fn acquire_microphone(&self) -> Result<(), VoiceError> {
        let inner = &self.inner;

        let source = {
            let mut devices = inner.devices.lock();
            if devices.level_probe.is_some() {
                return Ok(()); // cached stream from an earlier cycle
            }
            devices.microphone.take()
        };
        let Some(mut source) = source else {
            return Ok(()); // no microphone surface; level metering disabled
        };

        let acquired = source.acquire().await;
        let mut devices = inner.devices.lock();
        devices.microphone = Some(source);
        match acquired {
            Ok(probe) => {
                let probe: Arc<dyn AudioLevelProbe> = Arc::from(probe);
                devices.level_probe = Some(probe.clone());
                drop(devices);
                inner.spawn_level_meter(probe);
                Ok(())
            }
            Err(err) => {
                drop(devices);
                error!("microphone acquisition failed: {}", err);
                inner.terminal_failure(err.clone());
                Err(err)
            }
        }
    }

    async fn speak_chunks(&self, chunks: Vec<String>, options: &SpeakOptions) {
        let inner = &self.inner;
        let generation = inner.speak_generation.fetch_add(1, Ordering::SeqCst) + 1;

        let synthesizer = inner.devices.lock().synthesizer.clone();
        let Some(synthesizer) = synthesizer else {
            // Text-only mode: the turn still happens, just silently.
            debug!("no synthesizer - skipping playback of {} chunk(s)", chunks.len());
            inner.bus.emit(&VoiceEvent::SpeechStart);
            inner.bus.emit(&VoiceEvent::SpeechEnd);
            return;
        };

        synthesizer.cancel();

        // Mute capture before a single sample plays.
        inner.silence_generation.fetch_add(1, Ordering::SeqCst);
        inner.state.lock().paused = true;
        if let Some(recognizer) = inner.devices.lock().recognizer.as_mut() {
            recognizer.abort();
        }

        inner.set_mode(VoiceMode::Speaking);
        inner.bus.emit(&VoiceEvent::SpeechStart);

        let total = chunks.len();
        for (index, chunk) in chunks.into_iter().enumerate() {
            if inner.speak_generation.load(Ordering::SeqCst) != generation {
                debug!("utterance superseded, stopping at chunk {}", index);
                break;
            }
            if let Err(err) = synthesizer.speak(&chunk, options).await {
                warn!("synthesis failed on chunk {}: {}", index, err);
            }
            let is_last = index + 1 == total;
            if !is_last && inner.speak_generation.load(Ordering::SeqCst) == generation {
                tokio::time::sleep(Duration::from_millis(inner.config.sentence_pause_ms)).await;
            }
        }

        // Each call reports its own end exactly once, even when cancelled.
        let current = inner.speak_generation.load(Ordering::SeqCst) == generation;
        if current {
            inner.set_mode(VoiceMode::Idle);
        }
        inner.bus.emit(&VoiceEvent::SpeechEnd);

        if current {
            // Settle so the tail of playback is not heard as input.
            tokio::time::sleep(Duration::from_millis(inner.config.settle_delay_ms)).await;
            if inner.speak_generation.load(Ordering::SeqCst) == generation
                && inner.continuous.load(Ordering::SeqCst)
                && inner.auto_restart.load(Ordering::SeqCst)
                && inner.initialized.load(Ordering::SeqCst)
            {
                inner.state.lock().paused = false;
                inner.arm();
            }
        }
    }
}

impl Inner {
    fn handle_signal(self: &Arc<Self>, signal: RecognitionSignal) {
        match signal {
            RecognitionSignal::Started => self.on_recognition_started(),
            RecognitionSignal::Result(result) => self.on_recognition_result(result),
            RecognitionSignal::Fault(fault) => self.on_recognition_fault(fault),
            RecognitionSignal::Ended => self.on_recognition_ended(),
        }
    }

    fn on_recognition_started(self: &Arc<Self>) {
        let tripped = self.restart_guard.lock().record(Instant::now());
        if tripped {
            let err = VoiceError::RestartLoop {
                count: self.config.max_rapid_restarts,
                window_ms: self.config.rapid_restart_window_ms,
            };
            warn!("recognition restart storm detected");
            if let Some(recognizer) = self.devices.lock().recognizer.as_mut() {
                recognizer.abort();
            }
            self.terminal_failure(err);
            return;
        }

        let speaking_or_paused = {
            let state = self.state.lock();
            state.paused || state.mode == VoiceMode::Speaking
        };
        if !speaking_or_paused {
            self.set_mode(VoiceMode::Listening);
        }
    }

    fn on_recognition_result(self: &Arc<Self>, result: crate::voice::TranscriptionResult) {
        {
            let state = self.state.lock();
            if state.paused || state.mode == VoiceMode::Speaking {
                // Capture is muted; drop anything the platform still flushes.
                return;
            }
        }

        // A result means the transport works again.
        self.backoff.lock().reset();

        self.transcript.lock().push(&result);
        if result.is_final {
            self.bus.emit(&VoiceEvent::FinalTranscription(result));
        } else {
            self.bus.emit(&VoiceEvent::Transcription(result));
        }
        self.arm_silence_timer();
    }

    fn on_recognition_fault(self: &Arc<Self>, fault: RecognitionFault) {
        match fault {
            RecognitionFault::NoSpeech => {
                // Expected during quiet stretches; continuous mode re-arms
                // on the Ended that follows.
                debug!("no speech before platform timeout");
            }
            RecognitionFault::Aborted => {
                debug!("recognition pass aborted");
            }
            RecognitionFault::Network => self.on_network_fault(),
            RecognitionFault::PermissionDenied => {
                self.terminal_failure(VoiceError::PermissionDenied)
            }
            RecognitionFault::AudioCapture => self.terminal_failure(VoiceError::NoMicrophone),
            RecognitionFault::ServiceUnavailable => {
                self.terminal_failure(VoiceError::ServiceUnavailable)
            }
            RecognitionFault::Other(detail) => {
                warn!("recognition fault: {}", detail);
            }
        }
    }

    fn on_network_fault(self: &Arc<Self>) {
        if !self.auto_restart.load(Ordering::SeqCst) {
            return;
        }
        if self.state.lock().retry_pending {
            return; // one retry in flight at a time
        }

        let delay = self.backoff.lock().next_delay();
        match delay {
            Some(delay) => {
                let attempt = self.backoff.lock().attempts();
                warn!(
                    "network error during recognition, retry {} in {:?}",
                    attempt, delay
                );
                self.state.lock().retry_pending = true;
                let weak = Arc::downgrade(self);
                tokio::spawn(async move {
                    tokio::time::sleep(delay).await;
                    let Some(inner) = weak.upgrade() else { return };
                    inner.state.lock().retry_pending = false;
                    if inner.auto_restart.load(Ordering::SeqCst)
                        && inner.continuous.load(Ordering::SeqCst)
                    {
                        inner.arm();
                    }
                });
            }
            None => {
                self.terminal_failure(VoiceError::NetworkUnavailable {
                    attempts: self.config.max_network_retries,
                });
            }
        }
    }

    fn on_recognition_ended(self: &Arc<Self>) {
        let (speaking, paused, retry_pending) = {
            let state = self.state.lock();
            (
                state.mode == VoiceMode::Speaking,
                state.paused,
                state.retry_pending,
            )
        };
        if !speaking && self.mode() == VoiceMode::Listening {
            self.set_mode(VoiceMode::Idle);
        }

        // Platform sessions are time-bounded; keep the assistant listening.
        if self.continuous.load(Ordering::SeqCst)
            && self.auto_restart.load(Ordering::SeqCst)
            && self.initialized.load(Ordering::SeqCst)
            && !speaking
            && !paused
            && !retry_pending
        {
            let weak = Arc::downgrade(self);
            let delay = Duration::from_millis(self.config.restart_delay_ms);
            tokio::spawn(async move {
                tokio::time::sleep(delay).await;
                let Some(inner) = weak.upgrade() else { return };
                let paused = inner.state.lock().paused;
                if inner.continuous.load(Ordering::SeqCst)
                    && inner.auto_restart.load(Ordering::SeqCst)
                    && !paused
                    && inner.mode() != VoiceMode::Speaking
                {
                    inner.arm();
                }
            });
        }
    }

    /// Re-arm the end-of-turn timer. When it fires with the generation still
    /// current and a non-empty transcript, that's the end-of-turn signal;
    /// it will not fire again until new speech arms a fresh timer.
    fn arm_silence_timer(self: &Arc<Self>) {
        let generation = self.silence_generation.fetch_add(1, Ordering::SeqCst) + 1;
        let threshold = Duration::from_millis(self.config.silence_threshold_ms);
        let weak = Arc::downgrade(self);
        tokio::spawn(async move {
            tokio::time::sleep(threshold).await;
            let Some(inner) = weak.upgrade() else { return };
            if inner.silence_generation.load(Ordering::SeqCst) != generation {
                return;
            }
            let listening = {
                let state = inner.state.lock();
                !state.paused && state.mode == VoiceMode::Listening
            };
            if !listening {
                return;
            }
            let transcript = inner.transcript.lock().text();
            if transcript.is_empty() {
                return;
            }
            info!("🤫 silence detected, turn complete ({} chars)", transcript.len());
            inner.bus.emit(&VoiceEvent::SilenceDetected { transcript });
        });
    }

    fn arm(self: &Arc<Self>) {
        let sink = self.sink.lock().clone();
        let Some(sink) = sink else { return };
        let start_result = {
            let mut devices = self.devices.lock();
            match devices.recognizer.as_mut() {
                Some(recognizer) => recognizer.start(sink),
                None => return,
            }
        };
        if let Err(err) = start_result {
            error!("failed to arm recognition: {}", err);
            if err.is_terminal() {
                self.terminal_failure(err);
            }
        }
    }

    fn spawn_level_meter(self: &Arc<Self>, probe: Arc<dyn AudioLevelProbe>) {
        let weak = Arc::downgrade(self);
        tokio::spawn(async move {
            loop {
                tokio::time::sleep(Duration::from_millis(150)).await;
                let Some(inner) = weak.upgrade() else { break };
                if !inner.initialized.load(Ordering::SeqCst) {
                    break;
                }
                let mut state = inner.state.lock();
                state.audio_level = if state.mode == VoiceMode::Listening {
                    probe.level().min(100)
                } else {
                    0
                };
            }
        });
    }

    /// Terminal errors disable auto-restart and are reported exactly once
    /// per failure (the error slot is cleared when a new mode starts).
    fn terminal_failure(self: &Arc<Self>, err: VoiceError) {
        self.auto_restart.store(false, Ordering::SeqCst);
        let snapshot = {
            let mut state = self.state.lock();
            if state.error.is_some() {
                return;
            }
            state.error = Some(err.clone());
            state.mode = VoiceMode::Idle;
            state.retry_pending = false;
            self.snapshot_locked(&state)
        };
        error!("🛑 terminal voice error: {}", err);
        self.bus.emit(&VoiceEvent::Error(err));
        self.bus.emit(&VoiceEvent::StateChange(snapshot));
    }

    fn mode(&self) -> VoiceMode {
        self.state.lock().mode
    }

    fn set_mode(self: &Arc<Self>, mode: VoiceMode) {
        let snapshot = {
            let mut state = self.state.lock();
            if state.mode == mode {
                return;
            }
            state.mode = mode;
            self.snapshot_locked(&state)
        };
        self.bus.emit(&VoiceEvent::StateChange(snapshot));
    }

    fn snapshot_locked(&self, state: &EngineState) -> VoiceState {
        VoiceState {
            mode: state.mode,
            audio_level: state.audio_level,
            error: state.error.as_ref().map(|e| e.to_string()),
        }
    }
}

/// Sentence-level chunks for natural cadence, punctuation kept.
fn split_sentences(text: &str) -> Vec<String> {
    let chunks: Vec<String> = SENTENCE_SPLIT
        .find_iter(text)
        .map(|m| m.as_str().trim().to_string())
        .filter(|s| !s.is_empty())
        .collect();
    if chunks.is_empty() {
        vec![text.trim().to_string()]
    } else {
        chunks
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::voice::scripted::ScriptedPlatform;
    use crate::voice::TranscriptionResult;
    use std::sync::Arc as StdArc;

    const TURN: &str = "I think the answer involves using a hash map for constant time lookups";

    fn collect_events(engine: &VoiceEngine) -> (StdArc<Mutex<Vec<VoiceEvent>>>, Subscription) {
        let events = StdArc::new(Mutex::new(Vec::new()));
        let sink = events.clone();
        let sub = engine.on(move |event| sink.lock().push(event.clone()));
        (events, sub)
    }

    async fn settle() {
        tokio::time::sleep(Duration::from_millis(5)).await;
    }

    fn count<F: Fn(&VoiceEvent) -> bool>(events: &Mutex<Vec<VoiceEvent>>, pred: F) -> usize {
        events.lock().iter().filter(|e| pred(e)).count()
    }

    #[test]
    fn split_sentences_keeps_punctuation() {
        let chunks = split_sentences("Hello. How are you? Fine!");
        assert_eq!(chunks, vec!["Hello.", "How are you?", "Fine!"]);
        assert_eq!(split_sentences("no punctuation here"), vec!["no punctuation here"]);
    }

    #[tokio::test]
    async fn initialize_without_recognition_returns_false() {
        let mut platform = ScriptedPlatform::new().without_recognition();
        let engine = VoiceEngine::new(VoiceConfig::default());
        let (events, _sub) = collect_events(&engine);

        assert!(!engine.initialize(&mut platform));
        assert_eq!(
            count(&events, |e| matches!(
                e,
                VoiceEvent::Error(VoiceError::RecognitionUnsupported)
            )),
            1
        );
    }

    #[tokio::test]
    async fn denied_microphone_is_a_distinct_terminal_error() {
        let mut platform = ScriptedPlatform::new().deny_microphone();
        let engine = VoiceEngine::new(VoiceConfig::default());
        assert!(engine.initialize(&mut platform));
        let (events, _sub) = collect_events(&engine);

        let result = engine.start_continuous_mode().await;
        assert_eq!(result, Err(VoiceError::PermissionDenied));
        assert!(!engine.auto_restart_enabled());
        assert_eq!(
            count(&events, |e| matches!(e, VoiceEvent::Error(VoiceError::PermissionDenied))),
            1
        );
    }

    // Listening and speaking must never be simultaneously true, across
    // any interleaving of speak and listen calls.
    #[tokio::test(start_paused = true)]
    async fn mutual_exclusion_between_listening_and_speaking() {
        let mut platform = ScriptedPlatform::new().utterance_ms(100);
        let handle = platform.handle();
        let engine = VoiceEngine::new(VoiceConfig::default());
        assert!(engine.initialize(&mut platform));
        let (events, _sub) = collect_events(&engine);

        engine.start_continuous_mode().await.unwrap();
        handle.emit(RecognitionSignal::Started);
        settle().await;
        assert!(engine.state().is_listening());

        engine.speak("One. Two.", &SpeakOptions::default()).await;
        settle().await;

        handle.emit(RecognitionSignal::Started);
        settle().await;

        for event in events.lock().iter() {
            if let VoiceEvent::StateChange(state) = event {
                assert!(
                    !(state.is_listening() && state.is_speaking()),
                    "illegal state: listening and speaking at once"
                );
            }
        }
    }

    // The silence timer fires exactly once with the exact accumulated
    // transcript, and does not re-fire without new speech.
    #[tokio::test(start_paused = true)]
    async fn silence_detection_fires_once_with_exact_transcript() {
        let mut platform = ScriptedPlatform::new();
        let handle = platform.handle();
        let engine = VoiceEngine::new(VoiceConfig::default());
        assert!(engine.initialize(&mut platform));
        let (events, _sub) = collect_events(&engine);

        engine.start_continuous_mode().await.unwrap();
        handle.emit(RecognitionSignal::Started);
        settle().await;
        handle.emit(RecognitionSignal::Result(TranscriptionResult::final_segment(TURN, 0.95)));
        settle().await;

        tokio::time::sleep(Duration::from_millis(2500)).await;
        let detected: Vec<String> = events
            .lock()
            .iter()
            .filter_map(|e| match e {
                VoiceEvent::SilenceDetected { transcript } => Some(transcript.clone()),
                _ => None,
            })
            .collect();
        assert_eq!(detected, vec![TURN.to_string()]);

        // No re-emit without new speech.
        tokio::time::sleep(Duration::from_millis(5000)).await;
        assert_eq!(count(&events, |e| matches!(e, VoiceEvent::SilenceDetected { .. })), 1);

        // New speech arms a fresh timer.
        handle.emit(RecognitionSignal::Result(TranscriptionResult::final_segment(
            "and that is my answer",
            0.9,
        )));
        settle().await;
        tokio::time::sleep(Duration::from_millis(2500)).await;
        assert_eq!(count(&events, |e| matches!(e, VoiceEvent::SilenceDetected { .. })), 2);
    }

    // One SpeechStart and one SpeechEnd per speak call, with the speaking
    // mode toggling around them - also when synthesis errors out.
    #[tokio::test(start_paused = true)]
    async fn speak_reports_start_and_end_exactly_once() {
        for failing in [false, true] {
            let mut platform = ScriptedPlatform::new().utterance_ms(50);
            if failing {
                platform = platform.failing_synthesis();
            }
            let spoken = platform.spoken();
            let engine = VoiceEngine::new(VoiceConfig::default());
            assert!(engine.initialize(&mut platform));
            let (events, _sub) = collect_events(&engine);

            assert!(!engine.state().is_speaking());
            engine.speak("Hello. How are you?", &SpeakOptions::default()).await;
            settle().await;

            assert_eq!(count(&events, |e| matches!(e, VoiceEvent::SpeechStart)), 1);
            assert_eq!(count(&events, |e| matches!(e, VoiceEvent::SpeechEnd)), 1);
            assert!(!engine.state().is_speaking());

            let speaking_states = count(&events, |e| {
                matches!(e, VoiceEvent::StateChange(s) if s.is_speaking())
            });
            assert_eq!(speaking_states, 1, "failing={}", failing);
            assert_eq!(spoken.lock().len(), 1);
        }
    }

    #[tokio::test(start_paused = true)]
    async fn speak_naturally_chunks_but_signals_once() {
        let mut platform = ScriptedPlatform::new().utterance_ms(30);
        let spoken = platform.spoken();
        let engine = VoiceEngine::new(VoiceConfig::default());
        assert!(engine.initialize(&mut platform));
        let (events, _sub) = collect_events(&engine);

        engine
            .speak_naturally("First sentence. Second sentence. Third?", &SpeakOptions::default())
            .await;
        settle().await;

        assert_eq!(spoken.lock().len(), 3);
        assert_eq!(count(&events, |e| matches!(e, VoiceEvent::SpeechStart)), 1);
        assert_eq!(count(&events, |e| matches!(e, VoiceEvent::SpeechEnd)), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn speak_without_synthesizer_degrades_to_text_only() {
        let mut platform = ScriptedPlatform::new().without_synthesis();
        let engine = VoiceEngine::new(VoiceConfig::default());
        assert!(engine.initialize(&mut platform));
        let (events, _sub) = collect_events(&engine);

        engine.speak("Hello there.", &SpeakOptions::default()).await;
        assert_eq!(count(&events, |e| matches!(e, VoiceEvent::SpeechStart)), 1);
        assert_eq!(count(&events, |e| matches!(e, VoiceEvent::SpeechEnd)), 1);
        assert!(!engine.state().is_speaking());
    }

    // Exhausting the network retry ceiling produces exactly one terminal
    // error, disables auto-restart, and stops all restart attempts.
    #[tokio::test(start_paused = true)]
    async fn network_backoff_terminates_after_ceiling() {
        let mut platform = ScriptedPlatform::new();
        let handle = platform.handle();
        let engine = VoiceEngine::new(VoiceConfig::default());
        assert!(engine.initialize(&mut platform));
        let (events, _sub) = collect_events(&engine);

        engine.start_continuous_mode().await.unwrap();
        settle().await;
        assert_eq!(handle.starts(), 1);

        // max_network_retries = 3, so the 4th consecutive fault is terminal.
        for _ in 0..3 {
            handle.emit(RecognitionSignal::Fault(RecognitionFault::Network));
            handle.emit(RecognitionSignal::Ended);
            // Longest backoff delay is 2000ms; let the retry fire.
            tokio::time::sleep(Duration::from_millis(2500)).await;
        }
        assert_eq!(handle.starts(), 4);

        handle.emit(RecognitionSignal::Fault(RecognitionFault::Network));
        handle.emit(RecognitionSignal::Ended);
        tokio::time::sleep(Duration::from_millis(5000)).await;

        assert_eq!(
            count(&events, |e| matches!(
                e,
                VoiceEvent::Error(VoiceError::NetworkUnavailable { attempts: 3 })
            )),
            1
        );
        assert!(!engine.auto_restart_enabled());
        assert_eq!(handle.starts(), 4, "no further restart attempts");
    }

    // A restart storm trips the guard well before the network retry ceiling.
    #[tokio::test(start_paused = true)]
    async fn rapid_restart_storm_disables_auto_restart() {
        let mut platform = ScriptedPlatform::new();
        let handle = platform.handle();
        let engine = VoiceEngine::new(VoiceConfig::default());
        assert!(engine.initialize(&mut platform));
        let (events, _sub) = collect_events(&engine);

        engine.start_continuous_mode().await.unwrap();
        settle().await;

        for _ in 0..5 {
            handle.emit(RecognitionSignal::Started);
        }
        settle().await;

        assert_eq!(
            count(&events, |e| matches!(e, VoiceEvent::Error(VoiceError::RestartLoop { .. }))),
            1
        );
        assert!(!engine.auto_restart_enabled());
    }

    #[tokio::test(start_paused = true)]
    async fn no_speech_timeout_silently_rearms() {
        let mut platform = ScriptedPlatform::new();
        let handle = platform.handle();
        let engine = VoiceEngine::new(VoiceConfig::default());
        assert!(engine.initialize(&mut platform));
        let (events, _sub) = collect_events(&engine);

        engine.start_continuous_mode().await.unwrap();
        settle().await;
        assert_eq!(handle.starts(), 1);

        handle.emit(RecognitionSignal::Fault(RecognitionFault::NoSpeech));
        handle.emit(RecognitionSignal::Ended);
        tokio::time::sleep(Duration::from_millis(500)).await;

        assert_eq!(handle.starts(), 2, "re-armed after no-speech");
        assert_eq!(count(&events, |e| matches!(e, VoiceEvent::Error(_))), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn stop_listening_returns_and_clears_transcript() {
        let mut platform = ScriptedPlatform::new();
        let handle = platform.handle();
        let engine = VoiceEngine::new(VoiceConfig::default());
        assert!(engine.initialize(&mut platform));

        engine.start_listening().unwrap();
        handle.emit(RecognitionSignal::Started);
        settle().await;
        handle.emit(RecognitionSignal::Result(TranscriptionResult::final_segment(
            "binary search trees",
            0.9,
        )));
        settle().await;

        assert_eq!(engine.stop_listening(), "binary search trees");
        assert_eq!(engine.transcript(), "");
        assert!(!engine.state().is_listening());
    }

    #[tokio::test(start_paused = true)]
    async fn processing_flag_only_toggles_from_idle() {
        let mut platform = ScriptedPlatform::new().utterance_ms(50);
        let engine = VoiceEngine::new(VoiceConfig::default());
        assert!(engine.initialize(&mut platform));

        engine.set_processing(true);
        assert!(engine.state().is_processing());
        engine.set_processing(false);
        assert!(!engine.state().is_processing());

        // Never overrides playback.
        let speaking = {
            let engine = engine.clone();
            tokio::spawn(async move {
                engine.speak("A fairly long sentence.", &SpeakOptions::default()).await;
            })
        };
        settle().await;
        engine.set_processing(true);
        assert!(engine.state().is_speaking());
        speaking.await.unwrap();
    }

    #[tokio::test(start_paused = true)]
    async fn resume_listening_is_noop_outside_continuous_mode() {
        let mut platform = ScriptedPlatform::new();
        let handle = platform.handle();
        let engine = VoiceEngine::new(VoiceConfig::default());
        assert!(engine.initialize(&mut platform));

        engine.pause_listening();
        engine.resume_listening();
        settle().await;
        assert_eq!(handle.starts(), 0);

        engine.start_continuous_mode().await.unwrap();
        settle().await;
        engine.pause_listening();
        engine.resume_listening();
        settle().await;
        assert_eq!(handle.starts(), 2);
    }
}
