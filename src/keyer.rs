//! The iambic paddle keyer. `spec.md` §4.7.
//!
//! A cooperatively-scheduled state machine: nothing here owns a thread or a
//! timer. `notify_paddle` records paddle transitions; the client calls
//! `update` on its own schedule (a timer, a poll loop) and the keyer decides,
//! each time, whether the element in progress has finished and what comes
//! next. Every element is still enqueued into the [`Generator`]'s tone queue
//! up front (mark and its trailing inter-mark space together, the way
//! `send_dot`/`send_dash` already work); the `InDot*`/`After*` split below is
//! the keyer's own bookkeeping of when the mark phase ends and the space
//! phase ends, not a second round of generator calls.

use crate::clock::{self, offset_us, TimeVal};
use crate::error::Result;
use crate::generator::Generator;

/// `spec.md` §4.7 names these nine states. The `A`/`B` suffix distinguishes
/// an element sent while only one paddle was held (`A`) from one sent as
/// part of an active two-paddle squeeze (`B`) — the distinction Curtis mode
/// B needs to know, on release, whether the element that just finished
/// warrants one trailing opposite element.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum KeyerState {
    Idle,
    InDotA,
    InDashA,
    AfterDotA,
    AfterDashA,
    InDotB,
    InDashB,
    AfterDotB,
    AfterDashB,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Element {
    Dot,
    Dash,
}

/// Which phase of the current element the keyer is waiting out.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Phase {
    Mark,
    Space,
}

pub struct IambicKeyer<'g> {
    generator: &'g Generator,
    state: KeyerState,
    phase: Phase,
    /// End of the current phase, on the same timeline as the `ts` arguments
    /// to `notify_paddle`/`update` (or the host clock, when callers pass
    /// `None` throughout).
    deadline: TimeVal,
    dot_paddle: bool,
    dash_paddle: bool,
    dot_latch: bool,
    dash_latch: bool,
    curtis_b_enabled: bool,
    curtis_b_latch: bool,
    keying_callback: Option<Box<dyn FnMut(bool) + Send>>,
}

impl<'g> IambicKeyer<'g> {
    pub fn new(generator: &'g Generator) -> Self {
        Self {
            generator,
            state: KeyerState::Idle,
            phase: Phase::Mark,
            deadline: TimeVal::new(0, 0),
            dot_paddle: false,
            dash_paddle: false,
            dot_latch: false,
            dash_latch: false,
            curtis_b_enabled: false,
            curtis_b_latch: false,
            keying_callback: None,
        }
    }

    pub fn state(&self) -> KeyerState {
        self.state
    }

    pub fn is_keyer_busy(&self) -> bool {
        self.state != KeyerState::Idle
    }

    pub fn set_curtis_mode_b(&mut self, enabled: bool) {
        self.curtis_b_enabled = enabled;
    }

    pub fn curtis_mode_b(&self) -> bool {
        self.curtis_b_enabled
    }

    /// Fired whenever the keyer keys the generator up or down, the same
    /// callback shape the generator itself uses internally for the console
    /// buzzer and similar hardware.
    pub fn register_keying_callback(&mut self, callback: Box<dyn FnMut(bool) + Send>) {
        self.keying_callback = Some(callback);
    }

    /// Convenience wrapper over `notify_paddle` that only changes the dot
    /// paddle's state.
    pub fn notify_dot_paddle_event(&mut self, pressed: bool, ts: Option<TimeVal>) -> Result<()> {
        let dash = self.dash_paddle;
        self.notify_paddle(pressed, dash, ts)
    }

    /// Convenience wrapper over `notify_paddle` that only changes the dash
    /// paddle's state.
    pub fn notify_dash_paddle_event(&mut self, pressed: bool, ts: Option<TimeVal>) -> Result<()> {
        let dot = self.dot_paddle;
        self.notify_paddle(dot, pressed, ts)
    }

    /// Record a paddle transition. Squeeze (both pressed together) always
    /// latches both; the keyer starts sending immediately if it was Idle.
    ///
    /// Takes an optional timestamp, like every other timing-sensitive entry
    /// point in this crate (`Receiver::mark_begin` and friends), rather than
    /// reading the host clock directly — deadlines this call sets have to
    /// live on the same timeline `update`'s `ts` argument does, or the two
    /// can never agree on whether a deadline has passed.
    pub fn notify_paddle(&mut self, dot_pressed: bool, dash_pressed: bool, ts: Option<TimeVal>) -> Result<()> {
        let now = clock::validate_timestamp(ts)?;
        if dot_pressed && !self.dot_paddle {
            self.dot_latch = true;
        }
        if dash_pressed && !self.dash_paddle {
            self.dash_latch = true;
        }
        self.dot_paddle = dot_pressed;
        self.dash_paddle = dash_pressed;

        if self.state == KeyerState::Idle {
            if dot_pressed && dash_pressed {
                self.start_element(Element::Dot, true, now)?;
            } else if dot_pressed {
                self.start_element(Element::Dot, false, now)?;
            } else if dash_pressed {
                self.start_element(Element::Dash, false, now)?;
            }
        }
        Ok(())
    }

    /// Advance the state machine against the current time. Call this from a
    /// timer on whatever cadence is finer than a dot length; nothing happens
    /// if no deadline has passed.
    pub fn update(&mut self, ts: Option<TimeVal>) -> Result<()> {
        let now = clock::validate_timestamp(ts)?;
        if self.state == KeyerState::Idle || now < self.deadline {
            return Ok(());
        }
        match self.phase {
            Phase::Mark => self.enter_space_phase(),
            Phase::Space => self.decide_next()?,
        }
        Ok(())
    }

    fn enter_space_phase(&mut self) {
        self.state = match self.state {
            KeyerState::InDotA => KeyerState::AfterDotA,
            KeyerState::InDashA => KeyerState::AfterDashA,
            KeyerState::InDotB => KeyerState::AfterDotB,
            KeyerState::InDashB => KeyerState::AfterDashB,
            other => other,
        };
        self.phase = Phase::Space;
        let space_us = self.generator.inter_mark_space_us();
        self.deadline = offset_us(self.deadline, space_us);
        if let Some(cb) = self.keying_callback.as_mut() {
            cb(false);
        }
    }

    fn decide_next(&mut self) -> Result<()> {
        let last_was_dot = matches!(self.state, KeyerState::AfterDotA | KeyerState::AfterDotB);
        // A paddle "wants" its element if it's currently held (continue
        // repeating) or was tapped and released before this decision point
        // (the latch spec §4.7 describes) — either way the element is owed.
        let dot_wants = self.dot_paddle || self.dot_latch;
        let dash_wants = self.dash_paddle || self.dash_latch;
        // The instant the space phase ended is exactly when the next
        // element begins — anchor off it rather than the `ts` `update` was
        // called with, which may lag behind if the client polls coarsely.
        let base = self.deadline;

        if dot_wants && dash_wants {
            return self.start_element(if last_was_dot { Element::Dash } else { Element::Dot }, true, base);
        }
        if dot_wants {
            return self.start_element(Element::Dot, false, base);
        }
        if dash_wants {
            return self.start_element(Element::Dash, false, base);
        }
        if self.curtis_b_enabled && self.curtis_b_latch {
            self.curtis_b_latch = false;
            log::debug!("curtis B: sending trailing opposite element");
            return self.start_element(if last_was_dot { Element::Dash } else { Element::Dot }, false, base);
        }

        self.dot_latch = false;
        self.dash_latch = false;
        self.curtis_b_latch = false;
        self.state = KeyerState::Idle;
        Ok(())
    }

    /// Starts an element and clears the latch(es) it consumes — whether the
    /// press that triggered it came straight from `notify_paddle`'s
    /// Idle-start branch or from a decision made here in `decide_next`. A
    /// paddle still held stays `false` in its latch and simply gets re-read
    /// as "wants" off `self.dot_paddle`/`self.dash_paddle` at the next
    /// decision point.
    fn start_element(&mut self, element: Element, squeeze: bool, base: TimeVal) -> Result<()> {
        if squeeze {
            self.dot_latch = false;
            self.dash_latch = false;
        } else {
            match element {
                Element::Dot => self.dot_latch = false,
                Element::Dash => self.dash_latch = false,
            }
        }
        let mark_us = match element {
            Element::Dot => {
                self.generator.send_dot()?;
                self.generator.dot_mark_us()
            }
            Element::Dash => {
                self.generator.send_dash()?;
                self.generator.dash_mark_us()
            }
        };
        self.state = match (element, squeeze) {
            (Element::Dot, false) => KeyerState::InDotA,
            (Element::Dash, false) => KeyerState::InDashA,
            (Element::Dot, true) => KeyerState::InDotB,
            (Element::Dash, true) => KeyerState::InDashB,
        };
        self.phase = Phase::Mark;
        self.curtis_b_latch = squeeze;
        self.deadline = offset_us(base, mark_us);
        if let Some(cb) = self.keying_callback.as_mut() {
            cb(true);
        }
        Ok(())
    }

    /// Blocks until the element currently in progress has been dequeued by
    /// the generator's worker thread. The client must keep calling `update`
    /// for the keyer's own state to follow along.
    pub fn wait_for_element(&self) -> Result<()> {
        self.generator.wait_for_tone()
    }

    /// Blocks until the generator's queue has drained. As with
    /// `wait_for_element`, the keyer's own state still needs `update` calls
    /// to reach `Idle`.
    pub fn wait_for_keyer(&self) -> Result<()> {
        self.generator.wait_for_tone_queue()
    }

    /// Return to `Idle`, clearing every latch and paddle flag. Does not stop
    /// any tone already enqueued with the generator.
    pub fn reset(&mut self) {
        self.state = KeyerState::Idle;
        self.phase = Phase::Mark;
        self.dot_paddle = false;
        self.dash_paddle = false;
        self.dot_latch = false;
        self.dash_latch = false;
        self.curtis_b_latch = false;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sink::AudioSinkSpec;

    fn test_generator() -> Generator {
        let g = Generator::new(&AudioSinkSpec::Null).unwrap();
        g.set_speed_wpm(20).unwrap();
        g
    }

    fn at(us: i32) -> TimeVal {
        offset_us(TimeVal::new(0, 0), us)
    }

    #[test]
    fn idle_keyer_ignores_update() {
        let g = test_generator();
        let mut k = IambicKeyer::new(&g);
        assert!(!k.is_keyer_busy());
        k.update(Some(at(0))).unwrap();
        assert_eq!(k.state(), KeyerState::Idle);
    }

    #[test]
    fn single_paddle_press_starts_a_dot() {
        let g = test_generator();
        let mut k = IambicKeyer::new(&g);
        k.notify_paddle(true, false, Some(at(0))).unwrap();
        assert_eq!(k.state(), KeyerState::InDotA);
        assert!(k.is_keyer_busy());
        assert_eq!(g.tone_queue_length(), 2);
    }

    #[test]
    fn squeeze_latches_both_paddles_and_starts_in_b_track() {
        let g = test_generator();
        let mut k = IambicKeyer::new(&g);
        k.notify_paddle(true, true, Some(at(0))).unwrap();
        assert_eq!(k.state(), KeyerState::InDotB);
    }

    #[test]
    fn dot_paddle_convenience_wrapper_leaves_dash_paddle_alone() {
        let g = test_generator();
        let mut k = IambicKeyer::new(&g);
        k.notify_dash_paddle_event(true, Some(at(0))).unwrap();
        k.notify_dot_paddle_event(true, Some(at(0))).unwrap();
        assert_eq!(k.state(), KeyerState::InDotB);
    }

    #[test]
    fn keying_callback_fires_true_then_false_across_one_element() {
        use std::sync::atomic::{AtomicUsize, Ordering};
        use std::sync::Arc;

        let g = test_generator();
        let mut k = IambicKeyer::new(&g);
        let downs = Arc::new(AtomicUsize::new(0));
        let ups = Arc::new(AtomicUsize::new(0));
        let (d, u) = (downs.clone(), ups.clone());
        k.register_keying_callback(Box::new(move |keyed| {
            if keyed {
                d.fetch_add(1, Ordering::SeqCst);
            } else {
                u.fetch_add(1, Ordering::SeqCst);
            }
        }));

        k.notify_paddle(true, false, Some(at(0))).unwrap();
        assert_eq!(downs.load(Ordering::SeqCst), 1);
        assert_eq!(ups.load(Ordering::SeqCst), 0);

        let mark_us = g.dot_mark_us();
        k.notify_paddle(false, false, Some(at(mark_us))).unwrap();
        k.update(Some(at(mark_us))).unwrap();
        assert_eq!(ups.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn release_during_dash_only_run_returns_to_idle() {
        let g = test_generator();
        let mut k = IambicKeyer::new(&g);
        k.notify_paddle(false, true, Some(at(0))).unwrap();
        assert_eq!(k.state(), KeyerState::InDashA);

        let mark_us = g.dash_mark_us();
        let space_us = g.inter_mark_space_us();

        k.notify_paddle(false, false, Some(at(mark_us))).unwrap();
        k.update(Some(at(mark_us))).unwrap();
        assert_eq!(k.state(), KeyerState::AfterDashA);

        k.update(Some(at(mark_us + space_us))).unwrap();
        assert_eq!(k.state(), KeyerState::Idle);
    }

    #[test]
    fn dot_latch_is_honored_even_if_tapped_and_released_before_the_decision_point() {
        let g = test_generator();
        let mut k = IambicKeyer::new(&g);
        k.notify_paddle(false, true, Some(at(0))).unwrap();
        assert_eq!(k.state(), KeyerState::InDashA);

        let mark_us = g.dash_mark_us();
        let space_us = g.inter_mark_space_us();

        // Tap the dot paddle and release it before the dash even finishes,
        // then let the dash paddle go too — neither paddle is held by the
        // time the decision point is reached.
        k.notify_paddle(true, true, Some(at(10))).unwrap();
        k.notify_paddle(false, true, Some(at(20))).unwrap();
        k.notify_paddle(false, false, Some(at(30))).unwrap();

        k.update(Some(at(mark_us))).unwrap();
        k.update(Some(at(mark_us + space_us))).unwrap();
        // The dot is still owed even though neither paddle is pressed now.
        assert_eq!(k.state(), KeyerState::InDotA);
    }

    #[test]
    fn curtis_b_sends_one_trailing_opposite_element_after_squeeze_release() {
        let g = test_generator();
        let mut k = IambicKeyer::new(&g);
        k.set_curtis_mode_b(true);
        k.notify_paddle(true, true, Some(at(0))).unwrap();
        assert_eq!(k.state(), KeyerState::InDotB);

        let mark_us = g.dot_mark_us();
        let space_us = g.inter_mark_space_us();

        // Both paddles release while the squeezed dot is still sounding.
        k.notify_paddle(false, false, Some(at(mark_us))).unwrap();
        k.update(Some(at(mark_us))).unwrap();
        k.update(Some(at(mark_us + space_us))).unwrap();

        // Curtis B sends one trailing dash before returning to idle.
        assert_eq!(k.state(), KeyerState::InDashA);
    }

    #[test]
    fn curtis_a_sends_nothing_extra_after_squeeze_release() {
        let g = test_generator();
        let mut k = IambicKeyer::new(&g);
        k.notify_paddle(true, true, Some(at(0))).unwrap();

        let mark_us = g.dot_mark_us();
        let space_us = g.inter_mark_space_us();

        k.notify_paddle(false, false, Some(at(mark_us))).unwrap();
        k.update(Some(at(mark_us))).unwrap();
        k.update(Some(at(mark_us + space_us))).unwrap();

        assert_eq!(k.state(), KeyerState::Idle);
    }

    #[test]
    fn reset_clears_latches_and_returns_to_idle() {
        let g = test_generator();
        let mut k = IambicKeyer::new(&g);
        k.notify_paddle(true, false, Some(at(0))).unwrap();
        k.reset();
        assert_eq!(k.state(), KeyerState::Idle);
        assert!(!k.is_keyer_busy());
    }
}
