//! The straight key, and the `Key` enum unifying it with the iambic keyer.
//! `spec.md` §4.8; `Key` is SPEC_FULL supplement C.3.

use crate::clock::TimeVal;
use crate::error::Result;
use crate::generator::Generator;
use crate::keyer::{IambicKeyer, KeyerState};

/// Single boolean state: open or closed. `notify_event` is a no-op unless
/// the state actually changes.
pub struct StraightKey<'g> {
    generator: &'g Generator,
    closed: bool,
    keying_callback: Option<Box<dyn FnMut(bool) + Send>>,
}

impl<'g> StraightKey<'g> {
    pub fn new(generator: &'g Generator) -> Self {
        Self {
            generator,
            closed: false,
            keying_callback: None,
        }
    }

    pub fn is_closed(&self) -> bool {
        self.closed
    }

    pub fn register_keying_callback(&mut self, callback: Box<dyn FnMut(bool) + Send>) {
        self.keying_callback = Some(callback);
    }

    /// On close, enqueue a held "forever" tone at the current frequency. On
    /// open, flush it instead of letting it ring out.
    pub fn notify_event(&mut self, closed: bool) -> Result<()> {
        if closed == self.closed {
            return Ok(());
        }
        self.closed = closed;
        if let Some(cb) = self.keying_callback.as_mut() {
            cb(closed);
        }
        if closed {
            self.generator.key_down()
        } else {
            self.generator.key_up();
            Ok(())
        }
    }

    pub fn reset(&mut self) {
        if self.closed {
            self.generator.key_up();
        }
        self.closed = false;
    }
}

/// Unifies `StraightKey` and `IambicKeyer` behind one type so a caller can
/// hold either without matching on which (SPEC_FULL supplement C.3; spec §3
/// describes the pairing as a tagged union).
pub enum Key<'g> {
    Straight(StraightKey<'g>),
    Iambic(IambicKeyer<'g>),
}

impl<'g> Key<'g> {
    pub fn straight(generator: &'g Generator) -> Self {
        Key::Straight(StraightKey::new(generator))
    }

    pub fn iambic(generator: &'g Generator) -> Self {
        Key::Iambic(IambicKeyer::new(generator))
    }

    pub fn is_busy(&self) -> bool {
        match self {
            Key::Straight(k) => k.is_closed(),
            Key::Iambic(k) => k.is_keyer_busy(),
        }
    }

    pub fn reset(&mut self) {
        match self {
            Key::Straight(k) => k.reset(),
            Key::Iambic(k) => k.reset(),
        }
    }

    /// Advance the keyer's timer-driven state machine; a no-op for a
    /// straight key, which has no internal timing of its own.
    pub fn update(&mut self, ts: Option<TimeVal>) -> Result<()> {
        match self {
            Key::Straight(_) => Ok(()),
            Key::Iambic(k) => k.update(ts),
        }
    }

    pub fn keyer_state(&self) -> Option<KeyerState> {
        match self {
            Key::Straight(_) => None,
            Key::Iambic(k) => Some(k.state()),
        }
    }

    pub fn register_keying_callback(&mut self, callback: Box<dyn FnMut(bool) + Send>) {
        match self {
            Key::Straight(k) => k.register_keying_callback(callback),
            Key::Iambic(k) => k.register_keying_callback(callback),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sink::AudioSinkSpec;

    fn test_generator() -> Generator {
        Generator::new(&AudioSinkSpec::Null).unwrap()
    }

    #[test]
    fn closing_enqueues_a_held_tone() {
        let g = test_generator();
        let mut key = StraightKey::new(&g);
        key.notify_event(true).unwrap();
        assert!(key.is_closed());
        assert_eq!(g.tone_queue_length(), 1);
    }

    #[test]
    fn opening_flushes_the_held_tone() {
        let g = test_generator();
        let mut key = StraightKey::new(&g);
        key.notify_event(true).unwrap();
        key.notify_event(false).unwrap();
        assert!(!key.is_closed());
        assert_eq!(g.tone_queue_length(), 0);
    }

    #[test]
    fn redundant_events_are_ignored() {
        let g = test_generator();
        let mut key = StraightKey::new(&g);
        key.notify_event(true).unwrap();
        key.notify_event(true).unwrap();
        assert_eq!(g.tone_queue_length(), 1);
    }

    #[test]
    fn keying_callback_fires_on_change_only() {
        use std::sync::atomic::{AtomicUsize, Ordering};
        use std::sync::Arc;

        let g = test_generator();
        let mut key = StraightKey::new(&g);
        let calls = Arc::new(AtomicUsize::new(0));
        let calls_clone = calls.clone();
        key.register_keying_callback(Box::new(move |_closed| {
            calls_clone.fetch_add(1, Ordering::SeqCst);
        }));
        key.notify_event(true).unwrap();
        key.notify_event(true).unwrap();
        key.notify_event(false).unwrap();
        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn key_enum_dispatches_to_the_held_variant() {
        let g = test_generator();
        let mut key = Key::straight(&g);
        assert!(!key.is_busy());
        if let Key::Straight(k) = &mut key {
            k.notify_event(true).unwrap();
        }
        assert!(key.is_busy());
        key.reset();
        assert!(!key.is_busy());
    }
}
