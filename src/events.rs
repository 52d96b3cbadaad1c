use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Weak};

use log::error;
use parking_lot::Mutex;

use crate::error::VoiceError;
use crate::voice::{TranscriptionResult, VoiceState};

/// Events fanned out by the voice turn-taking engine.
#[derive(Debug, Clone)]
pub enum VoiceEvent {
    /// Interim recognition result; overwritten by the next one.
    Transcription(TranscriptionResult),
    /// Finalized recognition segment, appended to the accumulating buffer.
    FinalTranscription(TranscriptionResult),
    SpeechStart,
    SpeechEnd,
    /// End-of-turn: the silence timer fired with a non-empty transcript.
    SilenceDetected { transcript: String },
    Error(VoiceError),
    StateChange(VoiceState),
}

type Callback = Arc<dyn Fn(&VoiceEvent) + Send + Sync + 'static>;
type SubscriberList = Mutex<Vec<(u64, Callback)>>;

/// Typed publish/subscribe channel for [`VoiceEvent`].
///
/// Delivery is synchronous and in subscription order. A panicking subscriber
/// is isolated: the panic is caught, reported, and delivery continues to the
/// remaining subscribers.
pub struct EventBus {
    subscribers: Arc<SubscriberList>,
    next_id: AtomicU64,
}

impl EventBus {
    pub fn new() -> Self {
        Self {
            subscribers: Arc::new(Mutex::new(Vec::new())),
            next_id: AtomicU64::new(1),
        }
    }

    /// Register a callback; the returned handle unsubscribes on drop.
    pub fn subscribe<F>(&self, callback: F) -> Subscription
    where
        F: Fn(&VoiceEvent) + Send + Sync + 'static,
    {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        self.subscribers.lock().push((id, Arc::new(callback)));
        Subscription {
            id,
            subscribers: Arc::downgrade(&self.subscribers),
        }
    }

    pub fn emit(&self, event: &VoiceEvent) {
        // Snapshot under the lock, deliver outside it so a subscriber may
        // unsubscribe (or subscribe) from within its own callback.
        let snapshot: Vec<Callback> = {
            let subs = self.subscribers.lock();
            subs.iter().map(|(_, cb)| cb.clone()).collect()
        };
        for cb in snapshot {
            if catch_unwind(AssertUnwindSafe(|| cb(event))).is_err() {
                error!("voice event subscriber panicked; continuing delivery");
            }
        }
    }

    pub fn subscriber_count(&self) -> usize {
        self.subscribers.lock().len()
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new()
    }
}

/// Handle returned by [`EventBus::subscribe`]; dropping it (or calling
/// [`Subscription::unsubscribe`]) removes the callback.
pub struct Subscription {
    id: u64,
    subscribers: Weak<SubscriberList>,
}

impl Subscription {
    pub fn unsubscribe(self) {
        // Drop impl does the work.
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        if let Some(subs) = self.subscribers.upgrade() {
            subs.lock().retain(|(id, _)| *id != self.id);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicUsize;

    #[test]
    fn subscribe_emit_unsubscribe() {
        let bus = EventBus::new();
        let hits = Arc::new(AtomicUsize::new(0));

        let h = hits.clone();
        let sub = bus.subscribe(move |_| {
            h.fetch_add(1, Ordering::SeqCst);
        });

        bus.emit(&VoiceEvent::SpeechStart);
        assert_eq!(hits.load(Ordering::SeqCst), 1);

        sub.unsubscribe();
        bus.emit(&VoiceEvent::SpeechEnd);
        assert_eq!(hits.load(Ordering::SeqCst), 1);
        assert_eq!(bus.subscriber_count(), 0);
    }

    #[test]
    fn panicking_subscriber_does_not_break_delivery() {
        let bus = EventBus::new();
        let hits = Arc::new(AtomicUsize::new(0));

        let _bad = bus.subscribe(|_| panic!("subscriber bug"));
        let h = hits.clone();
        let _good = bus.subscribe(move |_| {
            h.fetch_add(1, Ordering::SeqCst);
        });

        bus.emit(&VoiceEvent::SpeechStart);
        bus.emit(&VoiceEvent::SpeechEnd);
        assert_eq!(hits.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn dropping_handle_unsubscribes() {
        let bus = EventBus::new();
        {
            let _sub = bus.subscribe(|_| {});
            assert_eq!(bus.subscriber_count(), 1);
        }
        assert_eq!(bus.subscriber_count(), 0);
    }
}
