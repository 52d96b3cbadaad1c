//! Deterministic audio platform for unit tests and the offline demo harness.
//!
//! The recognizer either replays a pre-written script of timed signals on
//! each pass, or (with no script) leaves the pass open so a test can push
//! signals by hand through [`RecognizerHandle`].

use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use log::debug;
use parking_lot::Mutex;

use crate::error::VoiceError;
use crate::voice::platform::{
    AudioLevelProbe, MicrophoneSource, RecognitionSignal, SignalSink, SpeechRecognizer,
    SpeechSynthesizer, VoicePlatform,
};
use crate::voice::SpeakOptions;

/// One scripted recognition pass: (delay before sending, signal) pairs.
pub type ScriptedPass = Vec<(u64, RecognitionSignal)>;

/// External control over a scripted recognizer: inject signals, count starts.
#[derive(Clone, Default)]
pub struct RecognizerHandle {
    sink: Arc<Mutex<Option<SignalSink>>>,
    starts: Arc<AtomicUsize>,
}

impl RecognizerHandle {
    /// How many times the engine has armed a recognition pass.
    pub fn starts(&self) -> usize {
        self.starts.load(Ordering::SeqCst)
    }

    /// Push a signal into the live pass; returns false if none is armed.
    pub fn emit(&self, signal: RecognitionSignal) -> bool {
        match self.sink.lock().as_ref() {
            Some(sink) => sink.send(signal).is_ok(),
            None => false,
        }
    }
}

struct ScriptedRecognizer {
    handle: RecognizerHandle,
    passes: Arc<Mutex<VecDeque<ScriptedPass>>>,
}

impl SpeechRecognizer for ScriptedRecognizer {
    fn start(&mut self, sink: SignalSink) -> Result<(), VoiceError> {
        self.handle.starts.fetch_add(1, Ordering::SeqCst);
        *self.handle.sink.lock() = Some(sink.clone());

        if let Some(pass) = self.passes.lock().pop_front() {
            tokio::spawn(async move {
                for (delay_ms, signal) in pass {
                    if delay_ms > 0 {
                        tokio::time::sleep(Duration::from_millis(delay_ms)).await;
                    }
                    if sink.send(signal).is_err() {
                        break;
                    }
                }
            });
        }
        Ok(())
    }

    fn stop(&mut self) {
        debug!("scripted recognizer: stop");
        if let Some(sink) = self.handle.sink.lock().take() {
            let _ = sink.send(RecognitionSignal::Ended);
        }
    }

    fn abort(&mut self) {
        debug!("scripted recognizer: abort");
        if let Some(sink) = self.handle.sink.lock().take() {
            let _ = sink.send(RecognitionSignal::Ended);
        }
    }
}

struct ScriptedSynthesizer {
    spoken: Arc<Mutex<Vec<String>>>,
    cancelled: Arc<AtomicBool>,
    utterance_ms: u64,
    fail: bool,
}

#[async_trait]
impl SpeechSynthesizer for ScriptedSynthesizer {
    async fn speak(&self, text: &str, _options: &SpeakOptions) -> Result<(), VoiceError> {
        self.cancelled.store(false, Ordering::SeqCst);
        self.spoken.lock().push(text.to_string());
        if self.utterance_ms > 0 {
            tokio::time::sleep(Duration::from_millis(self.utterance_ms)).await;
        }
        if self.fail {
            return Err(VoiceError::Synthesis("scripted synthesis failure".into()));
        }
        if self.cancelled.load(Ordering::SeqCst) {
            return Err(VoiceError::Synthesis("utterance cancelled".into()));
        }
        Ok(())
    }

    fn cancel(&self) {
        self.cancelled.store(true, Ordering::SeqCst);
    }
}

struct ScriptedMicrophone {
    deny: bool,
}

#[async_trait]
impl MicrophoneSource for ScriptedMicrophone {
    async fn acquire(&mut self) -> Result<Box<dyn AudioLevelProbe>, VoiceError> {
        if self.deny {
            return Err(VoiceError::PermissionDenied);
        }
        Ok(Box::new(FixedLevelProbe { level: 42 }))
    }
}

struct FixedLevelProbe {
    level: u8,
}

impl AudioLevelProbe for FixedLevelProbe {
    fn level(&self) -> u8 {
        self.level
    }
}

/// Scripted [`VoicePlatform`] with togglable capabilities.
pub struct ScriptedPlatform {
    with_recognition: bool,
    with_synthesis: bool,
    with_microphone: bool,
    deny_microphone: bool,
    fail_synthesis: bool,
    utterance_ms: u64,
    handle: RecognizerHandle,
    passes: Arc<Mutex<VecDeque<ScriptedPass>>>,
    spoken: Arc<Mutex<Vec<String>>>,
}

impl ScriptedPlatform {
    /// Full capabilities, manual signal injection.
    pub fn new() -> Self {
        Self {
            with_recognition: true,
            with_synthesis: true,
            with_microphone: true,
            deny_microphone: false,
            fail_synthesis: false,
            utterance_ms: 0,
            handle: RecognizerHandle::default(),
            passes: Arc::new(Mutex::new(VecDeque::new())),
            spoken: Arc::new(Mutex::new(Vec::new())),
        }
    }

    /// Replay `passes` in order, one per recognition start.
    pub fn with_passes(passes: Vec<ScriptedPass>) -> Self {
        let platform = Self::new();
        *platform.passes.lock() = passes.into();
        platform
    }

    pub fn without_recognition(mut self) -> Self {
        self.with_recognition = false;
        self
    }

    pub fn without_synthesis(mut self) -> Self {
        self.with_synthesis = false;
        self
    }

    pub fn without_microphone(mut self) -> Self {
        self.with_microphone = false;
        self
    }

    pub fn deny_microphone(mut self) -> Self {
        self.deny_microphone = true;
        self
    }

    pub fn failing_synthesis(mut self) -> Self {
        self.fail_synthesis = true;
        self
    }

    /// Simulated playback duration per utterance.
    pub fn utterance_ms(mut self, ms: u64) -> Self {
        self.utterance_ms = ms;
        self
    }

    pub fn handle(&self) -> RecognizerHandle {
        self.handle.clone()
    }

    /// Every utterance the synthesizer has been asked to play, in order.
    pub fn spoken(&self) -> Arc<Mutex<Vec<String>>> {
        self.spoken.clone()
    }
}

impl Default for ScriptedPlatform {
    fn default() -> Self {
        Self::new()
    }
}

impl VoicePlatform for ScriptedPlatform {
    fn recognizer(&mut self) -> Option<Box<dyn SpeechRecognizer>> {
        if !self.with_recognition {
            return None;
        }
        Some(Box::new(ScriptedRecognizer {
            handle: self.handle.clone(),
            passes: self.passes.clone(),
        }))
    }

    fn synthesizer(&mut self) -> Option<Box<dyn SpeechSynthesizer>> {
        if !self.with_synthesis {
            return None;
        }
        Some(Box::new(ScriptedSynthesizer {
            spoken: self.spoken.clone(),
            cancelled: Arc::new(AtomicBool::new(false)),
            utterance_ms: self.utterance_ms,
            fail: self.fail_synthesis,
        }))
    }

    fn microphone(&mut self) -> Option<Box<dyn MicrophoneSource>> {
        if !self.with_microphone {
            return None;
        }
        Some(Box::new(ScriptedMicrophone {
            deny: self.deny_microphone,
        }))
    }
}
