//! The receiver: a timing classifier that turns mark/space events into
//! characters. `spec.md` §4.6, §3.

use crate::clock::{self, TimeVal};
use crate::error::{CwError, Result};
use crate::generator::{self, CW_DOT_CALIBRATION_US};
use crate::tables::{self, MAX_REPRESENTATION_LENGTH};

pub const TOLERANCE_MIN: u32 = 0;
pub const TOLERANCE_MAX: u32 = 90;
pub const DEFAULT_NOISE_SPIKE_THRESHOLD_US: i32 = 10_000;
const ADAPTIVE_RING_LEN: usize = 4;
const STATISTICS_RING_LEN: usize = 256;

pub fn tolerance_limits() -> (u32, u32) {
    (TOLERANCE_MIN, TOLERANCE_MAX)
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum State {
    Idle,
    Mark,
    Space,
    EocGap,
    EowGap,
    EocGapErr,
    EowGapErr,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Classification {
    Dot,
    Dash,
    Unknown,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StatKind {
    Dot,
    Dash,
    InterMark,
    InterCharacter,
}

#[derive(Debug, Clone, Copy, Default)]
struct Windows {
    dot_min: i32,
    dot_max: i32,
    dash_min: i32,
    dash_max: i32,
    eom_min: i32,
    eom_max: i32,
    eoc_min: i32,
    eoc_max: i32,
    ideal_dot: i32,
}

#[derive(Debug, Clone, Copy)]
struct StatEntry {
    kind: StatKind,
    delta: i32,
}

/// Fixed 256-slot ring of statistics, overwriting the oldest entry once full.
struct StatsRing {
    entries: Vec<StatEntry>,
    next: usize,
}

impl StatsRing {
    fn new() -> Self {
        Self {
            entries: Vec::with_capacity(STATISTICS_RING_LEN),
            next: 0,
        }
    }

    fn push(&mut self, kind: StatKind, delta: i32) {
        if self.entries.len() < STATISTICS_RING_LEN {
            self.entries.push(StatEntry { kind, delta });
        } else {
            self.entries[self.next] = StatEntry { kind, delta };
        }
        self.next = (self.next + 1) % STATISTICS_RING_LEN;
    }

    fn std_dev(&self, kind: StatKind) -> f64 {
        let deltas: Vec<f64> = self
            .entries
            .iter()
            .filter(|e| e.kind == kind)
            .map(|e| e.delta as f64)
            .collect();
        if deltas.is_empty() {
            return 0.0;
        }
        let mean = deltas.iter().sum::<f64>() / deltas.len() as f64;
        let variance = deltas.iter().map(|d| (d - mean).powi(2)).sum::<f64>() / deltas.len() as f64;
        variance.sqrt()
    }

    fn clear(&mut self) {
        self.entries.clear();
        self.next = 0;
    }
}

/// 4-slot moving-average ring used by adaptive speed tracking for dot and
/// dash durations separately.
struct AverageRing {
    samples: [i32; ADAPTIVE_RING_LEN],
    len: usize,
    pos: usize,
    initial: i32,
}

impl AverageRing {
    fn new(initial: i32) -> Self {
        Self {
            samples: [initial; ADAPTIVE_RING_LEN],
            len: 0,
            pos: 0,
            initial,
        }
    }

    fn push(&mut self, value: i32) {
        self.samples[self.pos] = value;
        self.pos = (self.pos + 1) % ADAPTIVE_RING_LEN;
        self.len = (self.len + 1).min(ADAPTIVE_RING_LEN);
    }

    fn average(&self) -> i32 {
        if self.len == 0 {
            return self.initial;
        }
        let sum: i64 = self.samples.iter().map(|&v| v as i64).sum();
        (sum / ADAPTIVE_RING_LEN as i64) as i32
    }

    fn reset(&mut self) {
        self.samples = [self.initial; ADAPTIVE_RING_LEN];
        self.len = 0;
        self.pos = 0;
    }
}

/// Mark/space timing classifier and character assembler. Single-threaded by
/// contract (`spec.md` §5): the client must not call its mutators from
/// multiple threads concurrently.
pub struct Receiver {
    state: State,
    mark_start: TimeVal,
    mark_end: TimeVal,
    representation: [u8; MAX_REPRESENTATION_LENGTH],
    representation_len: usize,
    speed_wpm: f64,
    tolerance: u32,
    gap: u32,
    is_adaptive: bool,
    noise_spike_threshold_us: i32,
    dirty: bool,
    windows: Windows,
    dot_ring: AverageRing,
    dash_ring: AverageRing,
    stats: StatsRing,
    pending_error: Option<CwError>,
}

impl Receiver {
    pub fn new() -> Self {
        let mut r = Self {
            state: State::Idle,
            mark_start: TimeVal::new(0, 0),
            mark_end: TimeVal::new(0, 0),
            representation: [0; MAX_REPRESENTATION_LENGTH],
            representation_len: 0,
            speed_wpm: 20.0,
            tolerance: 50,
            gap: 0,
            is_adaptive: false,
            noise_spike_threshold_us: DEFAULT_NOISE_SPIKE_THRESHOLD_US,
            dirty: true,
            windows: Windows::default(),
            dot_ring: AverageRing::new(0),
            dash_ring: AverageRing::new(0),
            stats: StatsRing::new(),
            pending_error: None,
        };
        r.ensure_fresh();
        r
    }

    // ---- parameters ----

    pub fn speed_wpm(&self) -> f64 {
        self.speed_wpm
    }

    pub fn set_speed_wpm(&mut self, wpm: f64) -> Result<()> {
        if self.is_adaptive {
            return Err(CwError::AdaptiveMode);
        }
        let (min, max) = generator::speed_limits();
        if wpm < min as f64 || wpm > max as f64 {
            return Err(CwError::InvalidArgument(format!(
                "speed {wpm} wpm out of range [{min}, {max}]"
            )));
        }
        self.speed_wpm = wpm;
        self.dirty = true;
        Ok(())
    }

    pub fn tolerance(&self) -> u32 {
        self.tolerance
    }

    pub fn set_tolerance(&mut self, tolerance: u32) -> Result<()> {
        if !(TOLERANCE_MIN..=TOLERANCE_MAX).contains(&tolerance) {
            return Err(CwError::InvalidArgument(format!(
                "tolerance {tolerance} out of range [{TOLERANCE_MIN}, {TOLERANCE_MAX}]"
            )));
        }
        self.tolerance = tolerance;
        self.dirty = true;
        Ok(())
    }

    pub fn gap(&self) -> u32 {
        self.gap
    }

    pub fn set_gap(&mut self, gap: u32) -> Result<()> {
        let (min, max) = generator::gap_limits();
        if !(min..=max).contains(&gap) {
            return Err(CwError::InvalidArgument(format!(
                "gap {gap} out of range [{min}, {max}]"
            )));
        }
        self.gap = gap;
        self.dirty = true;
        Ok(())
    }

    pub fn is_adaptive(&self) -> bool {
        self.is_adaptive
    }

    pub fn set_adaptive(&mut self, adaptive: bool) {
        self.is_adaptive = adaptive;
        self.dirty = true;
    }

    pub fn noise_spike_threshold_us(&self) -> i32 {
        self.noise_spike_threshold_us
    }

    pub fn set_noise_spike_threshold_us(&mut self, threshold_us: i32) -> Result<()> {
        if threshold_us < 0 {
            return Err(CwError::InvalidArgument(
                "noise spike threshold must be non-negative".into(),
            ));
        }
        self.noise_spike_threshold_us = threshold_us;
        Ok(())
    }

    /// Recompute classification windows from the current speed/tolerance/gap
    /// and adaptive-mode flag. `spec.md` §3: in adaptive mode
    /// `dot_min = 0, dot_max = 2*dot_ideal, dash_min = dot_max, dash_max = ∞`
    /// — the boundary overlap between `dot_max` and `dash_min` is preserved
    /// verbatim per `spec.md` §9's open question, rather than "fixed" to a
    /// strict `dash_min = dot_max + 1`.
    fn derive(&mut self) {
        let ideal_dot = (CW_DOT_CALIBRATION_US as f64 / self.speed_wpm).round() as i32;
        let ideal_dash = 3 * ideal_dot;
        let gap_us = self.gap as i32 * ideal_dot;
        let ideal_eoc = 3 * ideal_dot + gap_us;

        let mut w = Windows {
            ideal_dot,
            ..Windows::default()
        };

        if self.is_adaptive {
            w.dot_min = 0;
            w.dot_max = 2 * ideal_dot;
            w.dash_min = w.dot_max;
            w.dash_max = i32::MAX;
        } else {
            let dot_slack = (ideal_dot as i64 * self.tolerance as i64 / 100) as i32;
            let dash_slack = (ideal_dash as i64 * self.tolerance as i64 / 100) as i32;
            w.dot_min = (ideal_dot - dot_slack).max(0);
            w.dot_max = ideal_dot + dot_slack;
            w.dash_min = (ideal_dash - dash_slack).max(0);
            w.dash_max = ideal_dash + dash_slack;
        }

        w.eom_min = 0;
        w.eom_max = w.dot_max;
        w.eoc_min = w.eom_max + 1;
        w.eoc_max = ideal_eoc + (ideal_dot as i64 * self.tolerance as i64 / 100) as i32;

        self.windows = w;
        self.dirty = false;
    }

    fn ensure_fresh(&mut self) {
        if self.dirty {
            self.derive();
        }
    }

    pub fn classify(&mut self, duration_us: i32) -> Classification {
        self.ensure_fresh();
        let w = self.windows;
        if duration_us >= w.dot_min && duration_us <= w.dot_max {
            Classification::Dot
        } else if duration_us >= w.dash_min && duration_us <= w.dash_max {
            Classification::Dash
        } else {
            Classification::Unknown
        }
    }

    // ---- event intake ----

    pub fn mark_begin(&mut self, ts: Option<TimeVal>) -> Result<()> {
        self.ensure_fresh();
        let ts = clock::validate_timestamp(ts)?;
        if matches!(self.state, State::Space | State::EocGap | State::EowGap) {
            let elapsed = clock::diff_us(self.mark_end, ts);
            self.stats.push(StatKind::InterMark, elapsed - self.windows.ideal_dot);
        }
        self.mark_start = ts;
        self.state = State::Mark;
        self.pending_error = None;
        Ok(())
    }

    pub fn mark_end(&mut self, ts: Option<TimeVal>) -> Result<()> {
        if self.state != State::Mark {
            return Err(CwError::InvalidArgument(
                "mark_end called without a preceding mark_begin".into(),
            ));
        }
        let ts = clock::validate_timestamp(ts)?;
        let duration = clock::diff_us(self.mark_start, ts);

        if duration <= self.noise_spike_threshold_us {
            self.state = if self.representation_len == 0 {
                State::Idle
            } else {
                State::Space
            };
            return Err(CwError::SpikeRejected);
        }

        match self.classify(duration) {
            Classification::Dot => self.accept_mark(b'.', duration, ts, StatKind::Dot),
            Classification::Dash => self.accept_mark(b'-', duration, ts, StatKind::Dash),
            Classification::Unknown => {
                self.state = State::EocGapErr;
                let err = CwError::InvalidArgument(format!(
                    "mark duration {duration}us did not classify as dot or dash"
                ));
                self.pending_error = Some(err.clone());
                Err(err)
            }
        }
    }

    fn accept_mark(&mut self, symbol: u8, duration_us: i32, ts: TimeVal, kind: StatKind) -> Result<()> {
        if self.representation_len >= MAX_REPRESENTATION_LENGTH {
            self.state = State::EocGapErr;
            self.pending_error = Some(CwError::BufferFull);
            return Err(CwError::BufferFull);
        }

        let ideal = match kind {
            StatKind::Dot => self.windows.ideal_dot,
            StatKind::Dash => self.windows.ideal_dot * 3,
            _ => 0,
        };
        self.stats.push(kind, duration_us - ideal);

        if self.is_adaptive {
            match kind {
                StatKind::Dot => self.dot_ring.push(duration_us),
                StatKind::Dash => self.dash_ring.push(duration_us),
                _ => {}
            }
            self.resync_adaptive_speed();
        }

        self.representation[self.representation_len] = symbol;
        self.representation_len += 1;
        self.mark_end = ts;
        self.state = State::Space;
        Ok(())
    }

    /// Buffer a dot directly, bypassing timing classification — a shortcut
    /// for clients that have already classified the mark themselves.
    pub fn buffer_dot(&mut self, ts: Option<TimeVal>) -> Result<()> {
        self.ensure_fresh();
        let ts = clock::validate_timestamp(ts)?;
        let ideal = self.windows.ideal_dot;
        self.accept_mark(b'.', ideal, ts, StatKind::Dot)
    }

    pub fn buffer_dash(&mut self, ts: Option<TimeVal>) -> Result<()> {
        self.ensure_fresh();
        let ts = clock::validate_timestamp(ts)?;
        let ideal = self.windows.ideal_dot * 3;
        self.accept_mark(b'-', ideal, ts, StatKind::Dash)
    }

    /// Recompute the adaptive speed estimate from the dot/dash averaging
    /// rings, clamp it, then re-derive windows. `spec.md` §4.6: clamping
    /// requires a fixed-mode-style recomputation of the ideal dot from the
    /// new speed, followed by the adaptive-mode window derivation — both of
    /// which `derive()` already performs in one pass keyed off `is_adaptive`.
    fn resync_adaptive_speed(&mut self) {
        let avg_dot = self.dot_ring.average();
        let avg_dash = self.dash_ring.average();
        let threshold = ((avg_dash + avg_dot) / 2).max(1);
        let speed = (CW_DOT_CALIBRATION_US as f64 * 2.0) / threshold as f64;
        let (min, max) = generator::speed_limits();
        self.speed_wpm = speed.clamp(min as f64, max as f64);
        self.dirty = true;
        self.ensure_fresh();
    }

    // ---- polling ----

    fn current_representation(&self) -> String {
        self.representation[..self.representation_len]
            .iter()
            .map(|&b| b as char)
            .collect()
    }

    pub fn poll_representation(&mut self, ts: Option<TimeVal>) -> Result<(String, bool)> {
        self.ensure_fresh();
        if let Some(err) = self.pending_error.clone() {
            return Err(err);
        }
        let ts = clock::validate_timestamp(ts)?;

        match self.state {
            State::Idle | State::Mark => Err(CwError::EarlyPoll),
            State::Space => {
                let elapsed = clock::diff_us(self.mark_end, ts);
                if elapsed < self.windows.eoc_min {
                    Err(CwError::EarlyPoll)
                } else if elapsed <= self.windows.eoc_max {
                    self.state = State::EocGap;
                    Ok((self.current_representation(), false))
                } else {
                    self.stats.push(StatKind::InterCharacter, elapsed - self.windows.eoc_max);
                    self.state = State::EowGap;
                    Ok((self.current_representation(), true))
                }
            }
            State::EocGap => {
                let elapsed = clock::diff_us(self.mark_end, ts);
                if elapsed > self.windows.eoc_max {
                    self.state = State::EowGap;
                    Ok((self.current_representation(), true))
                } else {
                    Ok((self.current_representation(), false))
                }
            }
            State::EowGap => Ok((self.current_representation(), true)),
            State::EocGapErr | State::EowGapErr => {
                Err(self.pending_error.clone().unwrap_or(CwError::BufferFull))
            }
        }
    }

    pub fn poll_character(&mut self, ts: Option<TimeVal>) -> Result<(char, bool)> {
        let (representation, end_of_word) = self.poll_representation(ts)?;
        let c = tables::representation_to_char(&representation).ok_or(CwError::NoSuchCharacter)?;
        Ok((c, end_of_word))
    }

    pub fn clear_receive_buffer(&mut self) {
        self.representation_len = 0;
        self.state = State::Idle;
        self.pending_error = None;
    }

    pub fn receive_buffer_capacity(&self) -> usize {
        MAX_REPRESENTATION_LENGTH
    }

    pub fn receive_buffer_length(&self) -> usize {
        self.representation_len
    }

    pub fn reset_receive(&mut self) {
        self.clear_receive_buffer();
        self.dot_ring.reset();
        self.dash_ring.reset();
    }

    pub fn receive_statistics(&self, kind: StatKind) -> f64 {
        self.stats.std_dev(kind)
    }

    pub fn reset_receive_statistics(&mut self) {
        self.stats.clear();
    }

    pub fn state(&self) -> State {
        self.state
    }
}

impl Default for Receiver {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ts(sec: i64, usec: i32) -> TimeVal {
        TimeVal::new(sec, usec)
    }

    #[test]
    fn fixed_mode_20wpm_tolerance_50_classifies_per_scenario() {
        let mut r = Receiver::new();
        r.set_speed_wpm(20.0).unwrap();
        r.set_tolerance(50).unwrap();
        assert_eq!(r.classify(60_000), Classification::Dot);
        assert_eq!(r.classify(180_000), Classification::Dash);
    }

    #[test]
    fn noise_spike_is_rejected() {
        let mut r = Receiver::new();
        r.set_speed_wpm(20.0).unwrap();
        r.mark_begin(Some(ts(0, 0))).unwrap();
        let err = r.mark_end(Some(ts(0, 5_000))).unwrap_err();
        assert_eq!(err, CwError::SpikeRejected);
        assert_eq!(r.receive_buffer_length(), 0);
    }

    fn at(t: i64) -> TimeVal {
        ts(t / 1_000_000, (t % 1_000_000) as i32)
    }

    fn send_element(r: &mut Receiver, t: &mut i64, mark_us: i32, space_us: i32) {
        r.mark_begin(Some(at(*t))).unwrap();
        *t += mark_us as i64;
        r.mark_end(Some(at(*t))).unwrap();
        *t += space_us as i64;
    }

    #[test]
    fn paris_round_trip_at_twelve_wpm() {
        let mut r = Receiver::new();
        r.set_speed_wpm(12.0).unwrap();
        r.set_tolerance(50).unwrap();

        // dot_us = 100_000, dash_us = 300_000 at 12wpm (spec.md §8 scenario 1).
        let dot = 100_000;
        let dash = 300_000;
        let inter_mark = dot;
        let eoc = dot * 3 + dot / 2; // comfortably inside the eoc window at tolerance 50

        // PARIS: P=.--. A=.- R=.-. I=.. S=...
        let letters: &[&[i32]] = &[
            &[dot, dash, dash, dot], // P
            &[dot, dash],            // A
            &[dot, dash, dot],       // R
            &[dot, dot],             // I
            &[dot, dot, dot],        // S
        ];

        let mut t = 0i64;
        let mut decoded = String::new();
        for (i, elements) in letters.iter().enumerate() {
            for (j, &mark_us) in elements.iter().enumerate() {
                let is_last = j + 1 == elements.len();
                let space = if is_last { eoc } else { inter_mark };
                send_element(&mut r, &mut t, mark_us, space);
            }
            let (c, eow) = r.poll_character(Some(at(t))).unwrap();
            decoded.push(c);
            assert!(!eow, "character {i} unexpectedly flagged end-of-word");
            r.clear_receive_buffer();
        }

        assert_eq!(decoded, "PARIS");
    }

    #[test]
    fn buffer_full_rejects_eighth_symbol() {
        let mut r = Receiver::new();
        r.set_speed_wpm(20.0).unwrap();
        for _ in 0..MAX_REPRESENTATION_LENGTH {
            r.buffer_dot(None).unwrap();
        }
        assert_eq!(r.buffer_dot(None), Err(CwError::BufferFull));
    }

    #[test]
    fn adaptive_mode_forbids_manual_speed() {
        let mut r = Receiver::new();
        r.set_adaptive(true);
        assert_eq!(r.set_speed_wpm(20.0), Err(CwError::AdaptiveMode));
    }

    #[test]
    fn clear_is_idempotent() {
        let mut r = Receiver::new();
        r.buffer_dot(None).unwrap();
        r.clear_receive_buffer();
        let len_once = r.receive_buffer_length();
        r.clear_receive_buffer();
        assert_eq!(r.receive_buffer_length(), len_once);
    }
}
