//! The tone generator: owns a sink and a tone queue, runs the worker thread
//! that dequeues and synthesizes, and exposes the high-level send operations.
//! `spec.md` §4.5, §6.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::thread::JoinHandle;

use crate::error::{CwError, Result};
use crate::queue::{DequeueResult, ToneQueue};
use crate::sink::{self, AudioSink, AudioSinkSpec, SinkInfo};
use crate::tables;
use crate::tone::{SlopeMode, SlopeShape, Tone};

/// The reference word "PARIS" takes `60 / wpm` seconds to send; this is the
/// calibration constant the dot length is derived from. `spec.md` §3/§9:
/// asserted in the source, not derived, kept here as a named constant.
pub const CW_DOT_CALIBRATION_US: i32 = 1_200_000;

/// Rise/fall duration applied to every mark tone's envelope.
const SLOPE_DURATION_US: u32 = 5_000;

pub const SPEED_MIN: u32 = 4;
pub const SPEED_MAX: u32 = 60;
pub const GAP_MIN: u32 = 0;
pub const GAP_MAX: u32 = 60;
pub const WEIGHTING_MIN: u32 = 20;
pub const WEIGHTING_MAX: u32 = 80;

pub fn speed_limits() -> (u32, u32) {
    (SPEED_MIN, SPEED_MAX)
}
pub fn frequency_limits() -> (i32, i32) {
    (crate::tone::CW_FREQUENCY_MIN, crate::tone::CW_FREQUENCY_MAX)
}
pub fn volume_limits() -> (i32, i32) {
    (crate::tone::CW_VOLUME_MIN, crate::tone::CW_VOLUME_MAX)
}
pub fn gap_limits() -> (u32, u32) {
    (GAP_MIN, GAP_MAX)
}
pub fn weighting_limits() -> (u32, u32) {
    (WEIGHTING_MIN, WEIGHTING_MAX)
}

/// Raw settable parameters plus their lazily-recomputed derived timings.
/// `spec.md` §4.5: "a private dirty flag is set by any setter... recompute
/// before next use."
struct Params {
    speed_wpm: u32,
    frequency_hz: i32,
    volume_percent: i32,
    gap_units: u32,
    weighting_percent: u32,
    dirty: bool,
    dot_us: i32,
    dash_us: i32,
    inter_mark_us: i32,
    eoc_us: i32,
    eow_us: i32,
}

impl Params {
    fn new() -> Self {
        let mut p = Self {
            speed_wpm: 20,
            frequency_hz: 800,
            volume_percent: 100,
            gap_units: 0,
            weighting_percent: 50,
            dirty: true,
            dot_us: 0,
            dash_us: 0,
            inter_mark_us: 0,
            eoc_us: 0,
            eow_us: 0,
        };
        p.derive();
        p
    }

    /// Recompute `dot_us`/`dash_us`/`inter_mark_us`/`eoc_us`/`eow_us` from
    /// the raw settable fields. Weighting redistributes time between a mark
    /// and the inter-mark space that follows it without changing the total;
    /// gap extends the inter-character and inter-word spaces by whole
    /// dot-units, per `spec.md` §4.5's Farnsworth-style ratio of 7/3.
    fn derive(&mut self) {
        let base_dot = CW_DOT_CALIBRATION_US / self.speed_wpm as i32;
        let weight_adjust = ((self.weighting_percent as i32 - 50) * base_dot) / 50;

        self.dot_us = (base_dot + weight_adjust).max(1);
        self.dash_us = (3 * base_dot + weight_adjust).max(1);
        self.inter_mark_us = (base_dot - weight_adjust).max(1);

        let gap_us = self.gap_units as i32 * base_dot;
        self.eoc_us = 3 * base_dot + gap_us;
        self.eow_us = 7 * base_dot + (7 * gap_us) / 3;
        self.dirty = false;
    }

    fn ensure_fresh(&mut self) {
        if self.dirty {
            self.derive();
        }
    }
}

/// The sample-producing worker's view of state it must track across
/// consecutive dequeues: the frequency of the last tone it wrote, used to
/// detect the silence↔sound transitions that fire the keying callback.
struct WorkerState {
    last_frequency_nonzero: bool,
}

pub struct Generator {
    queue: Arc<ToneQueue>,
    sink: Arc<Mutex<Box<dyn AudioSink>>>,
    sink_info: SinkInfo,
    params: Arc<Mutex<Params>>,
    keying_callback: Arc<Mutex<Option<Box<dyn FnMut(bool) + Send>>>>,
    running: Arc<AtomicBool>,
    worker: Option<JoinHandle<()>>,
}

impl Generator {
    /// Construct with an already-open sink and the `SinkInfo` it reported.
    pub fn with_sink(sink: Box<dyn AudioSink>, sink_info: SinkInfo) -> Self {
        Self {
            queue: Arc::new(ToneQueue::new()),
            sink: Arc::new(Mutex::new(sink)),
            sink_info,
            params: Arc::new(Mutex::new(Params::new())),
            keying_callback: Arc::new(Mutex::new(None)),
            running: Arc::new(AtomicBool::new(false)),
            worker: None,
        }
    }

    /// Open `spec` and build a generator ready to `start()`. `spec.md` §6:
    /// `generator_new(sink_choice, device) -> Generator`.
    pub fn new(spec: &AudioSinkSpec) -> Result<Self> {
        let (sink, info) = sink::open(spec)?;
        Ok(Self::with_sink(sink, info))
    }

    pub fn start(&mut self) {
        if self.running.swap(true, Ordering::SeqCst) {
            return;
        }
        let queue = self.queue.clone();
        let sink = self.sink.clone();
        let keying_callback = self.keying_callback.clone();
        let running = self.running.clone();
        let sink_info = self.sink_info;

        let params = self.params.clone();
        self.worker = Some(std::thread::spawn(move || {
            queue.set_worker_thread(Some(std::thread::current().id()));
            let mut state = WorkerState {
                last_frequency_nonzero: false,
            };
            log::info!("generator worker thread starting");
            while running.load(Ordering::SeqCst) {
                match queue.dequeue() {
                    DequeueResult::Dequeued(tone) => {
                        let volume = params.lock().unwrap().volume_percent;
                        Self::write_tone(&sink, &keying_callback, &mut state, &tone, sink_info, volume);
                    }
                    DequeueResult::EmptyButRecentlyActive => {
                        let mut sink = sink.lock().unwrap();
                        let _ = sink.silence();
                        if state.last_frequency_nonzero {
                            state.last_frequency_nonzero = false;
                            if let Some(cb) = keying_callback.lock().unwrap().as_mut() {
                                cb(false);
                            }
                        }
                    }
                    DequeueResult::Idle => {
                        queue.wait_for_work();
                    }
                }
            }
            log::info!("generator worker thread stopping");
        }));
    }

    fn write_tone(
        sink: &Arc<Mutex<Box<dyn AudioSink>>>,
        keying_callback: &Arc<Mutex<Option<Box<dyn FnMut(bool) + Send>>>>,
        state: &mut WorkerState,
        tone: &Tone,
        sink_info: SinkInfo,
        volume_percent: i32,
    ) {
        let now_nonzero = tone.frequency_hz > 0;
        if now_nonzero != state.last_frequency_nonzero {
            state.last_frequency_nonzero = now_nonzero;
            if let Some(cb) = keying_callback.lock().unwrap().as_mut() {
                cb(now_nonzero);
            }
        }

        let samples = tone.render(sink_info.sample_rate, volume_percent, SLOPE_DURATION_US);
        let mut sink = sink.lock().unwrap();
        for chunk in samples.chunks(sink_info.period_size.max(1)) {
            if sink.write(tone.frequency_hz, chunk).is_err() {
                log::warn!("generator: sink write failed, dropping remainder of tone");
                break;
            }
        }
    }

    pub fn stop(&mut self) {
        if !self.running.swap(false, Ordering::SeqCst) {
            return;
        }
        self.queue.flush();
        // wake a worker parked in wait_for_work
        self.queue.enqueue(Tone::new(0, 1, SlopeMode::NoSlopes, SlopeShape::Rectangular).unwrap()).ok();
        if let Some(handle) = self.worker.take() {
            let _ = handle.join();
        }
        self.sink.lock().unwrap().close();
    }

    // ---- parameters ----

    pub fn speed_wpm(&self) -> u32 {
        self.params.lock().unwrap().speed_wpm
    }

    pub fn set_speed_wpm(&self, wpm: u32) -> Result<()> {
        if !(SPEED_MIN..=SPEED_MAX).contains(&wpm) {
            return Err(CwError::InvalidArgument(format!(
                "speed {wpm} wpm out of range [{SPEED_MIN}, {SPEED_MAX}]"
            )));
        }
        let mut p = self.params.lock().unwrap();
        p.speed_wpm = wpm;
        p.dirty = true;
        Ok(())
    }

    pub fn frequency_hz(&self) -> i32 {
        self.params.lock().unwrap().frequency_hz
    }

    pub fn set_frequency_hz(&self, hz: i32) -> Result<()> {
        let (min, max) = frequency_limits();
        if !(min..=max).contains(&hz) {
            return Err(CwError::InvalidArgument(format!(
                "frequency {hz} Hz out of range [{min}, {max}]"
            )));
        }
        self.params.lock().unwrap().frequency_hz = hz;
        Ok(())
    }

    pub fn volume_percent(&self) -> i32 {
        self.params.lock().unwrap().volume_percent
    }

    pub fn set_volume_percent(&self, percent: i32) -> Result<()> {
        let (min, max) = volume_limits();
        if !(min..=max).contains(&percent) {
            return Err(CwError::InvalidArgument(format!(
                "volume {percent}% out of range [{min}, {max}]"
            )));
        }
        self.params.lock().unwrap().volume_percent = percent;
        Ok(())
    }

    pub fn gap_units(&self) -> u32 {
        self.params.lock().unwrap().gap_units
    }

    pub fn set_gap_units(&self, gap: u32) -> Result<()> {
        if !(GAP_MIN..=GAP_MAX).contains(&gap) {
            return Err(CwError::InvalidArgument(format!(
                "gap {gap} out of range [{GAP_MIN}, {GAP_MAX}]"
            )));
        }
        let mut p = self.params.lock().unwrap();
        p.gap_units = gap;
        p.dirty = true;
        Ok(())
    }

    pub fn weighting_percent(&self) -> u32 {
        self.params.lock().unwrap().weighting_percent
    }

    pub fn set_weighting_percent(&self, weighting: u32) -> Result<()> {
        if !(WEIGHTING_MIN..=WEIGHTING_MAX).contains(&weighting) {
            return Err(CwError::InvalidArgument(format!(
                "weighting {weighting} out of range [{WEIGHTING_MIN}, {WEIGHTING_MAX}]"
            )));
        }
        let mut p = self.params.lock().unwrap();
        p.weighting_percent = weighting;
        p.dirty = true;
        Ok(())
    }

    pub fn register_keying_callback(&self, callback: Box<dyn FnMut(bool) + Send>) {
        *self.keying_callback.lock().unwrap() = Some(callback);
    }

    // ---- sending primitives ----

    fn enqueue_mark(&self, duration_us: i32) -> Result<()> {
        let freq = self.frequency_hz();
        self.queue
            .enqueue(Tone::new(freq, duration_us, SlopeMode::Standard, SlopeShape::RaisedCosine)?)
    }

    fn enqueue_space(&self, duration_us: i32) -> Result<()> {
        if duration_us <= 0 {
            return Ok(());
        }
        self.queue
            .enqueue(Tone::new(0, duration_us, SlopeMode::NoSlopes, SlopeShape::Rectangular)?)
    }

    pub fn send_dot(&self) -> Result<()> {
        let mut p = self.params.lock().unwrap();
        p.ensure_fresh();
        let (dot_us, inter_mark_us) = (p.dot_us, p.inter_mark_us);
        drop(p);
        self.enqueue_mark(dot_us)?;
        self.enqueue_space(inter_mark_us)
    }

    pub fn send_dash(&self) -> Result<()> {
        let mut p = self.params.lock().unwrap();
        p.ensure_fresh();
        let (dash_us, inter_mark_us) = (p.dash_us, p.inter_mark_us);
        drop(p);
        self.enqueue_mark(dash_us)?;
        self.enqueue_space(inter_mark_us)
    }

    /// Grows the inter-mark space that already trails the last-sent mark
    /// into a full end-of-character space, rather than appending a second
    /// silent tone after it (`spec.md` §4.5: "it follows a mark that already
    /// had its trailing inter-mark space").
    pub fn send_character_space(&self) -> Result<()> {
        let mut p = self.params.lock().unwrap();
        p.ensure_fresh();
        let extra = p.eoc_us - p.inter_mark_us;
        drop(p);
        self.queue.extend_last_silence(extra)
    }

    /// Grows the trailing end-of-character space into a full end-of-word
    /// space, the same way `send_character_space` grows an inter-mark space.
    pub fn send_word_space(&self) -> Result<()> {
        let mut p = self.params.lock().unwrap();
        p.ensure_fresh();
        let extra = p.eow_us - p.eoc_us;
        drop(p);
        self.queue.extend_last_silence(extra)
    }

    /// Send a raw dot/dash representation, e.g. `".-"` for `A`. `partial`
    /// suppresses the trailing end-of-character space, for building
    /// multi-letter prosigns with no inter-character gap.
    pub fn send_representation(&self, representation: &str, partial: bool) -> Result<()> {
        for symbol in representation.chars() {
            match symbol {
                '.' => self.send_dot()?,
                '-' => self.send_dash()?,
                _ => {
                    return Err(CwError::InvalidArgument(format!(
                        "representation contains invalid symbol {symbol:?}"
                    )))
                }
            }
        }
        if !partial {
            self.send_character_space()?;
        }
        Ok(())
    }

    pub fn send_character(&self, c: char) -> Result<()> {
        if let Some((expansion, unbroken)) = tables::procedural_expansion(c) {
            let chars: Vec<char> = expansion.chars().collect();
            for (i, ec) in chars.iter().enumerate() {
                let representation = tables::char_to_representation(*ec).ok_or(CwError::NoSuchCharacter)?;
                let is_last = i + 1 == chars.len();
                self.send_representation(representation, unbroken && !is_last)?;
            }
            return Ok(());
        }
        let representation = tables::char_to_representation(c).ok_or(CwError::NoSuchCharacter)?;
        self.send_representation(representation, false)
    }

    /// Send `s`, treating each space as a word boundary. Fails fast with
    /// `NoSuchCharacter` on the first unrecognized character; tones already
    /// enqueued for earlier characters are left in the queue (`spec.md`
    /// §4.5).
    pub fn send_string(&self, s: &str) -> Result<()> {
        for c in s.chars() {
            if c == ' ' {
                self.send_word_space()?;
            } else {
                self.send_character(c)?;
            }
        }
        Ok(())
    }

    // ---- queue control, spec.md §6 ----

    pub fn is_tone_busy(&self) -> bool {
        self.queue.is_busy()
    }

    pub fn wait_for_tone(&self) -> Result<()> {
        self.queue.wait_for_tone()
    }

    pub fn wait_for_tone_queue(&self) -> Result<()> {
        self.queue.wait_for_tone_queue()
    }

    pub fn wait_for_tone_queue_critical(&self, level: usize) -> Result<()> {
        self.queue.wait_for_level(level)
    }

    pub fn is_tone_queue_full(&self) -> bool {
        self.queue.is_full()
    }

    pub fn tone_queue_capacity(&self) -> usize {
        self.queue.capacity()
    }

    pub fn tone_queue_length(&self) -> usize {
        self.queue.length()
    }

    pub fn flush_tone_queue(&self) {
        self.queue.flush()
    }

    pub fn queue_tone(&self, duration_us: i32, freq_hz: i32) -> Result<()> {
        self.queue
            .enqueue(Tone::new(freq_hz, duration_us, SlopeMode::Standard, SlopeShape::RaisedCosine)?)
    }

    pub fn register_tone_queue_low_callback(
        &self,
        callback: Box<dyn FnMut() + Send>,
        level: usize,
    ) -> Result<()> {
        self.queue.register_low_water_callback(callback, level)
    }

    pub(crate) fn queue_handle(&self) -> Arc<ToneQueue> {
        self.queue.clone()
    }

    /// Mark-only and inter-mark-space-only durations, read separately so
    /// `keyer.rs`'s timer can schedule its `InDot*`/`After*` states against
    /// the same two phases the generator itself enqueues.
    pub fn dot_mark_us(&self) -> i32 {
        let mut p = self.params.lock().unwrap();
        p.ensure_fresh();
        p.dot_us
    }

    pub fn dash_mark_us(&self) -> i32 {
        let mut p = self.params.lock().unwrap();
        p.ensure_fresh();
        p.dash_us
    }

    pub fn inter_mark_space_us(&self) -> i32 {
        let mut p = self.params.lock().unwrap();
        p.ensure_fresh();
        p.inter_mark_us
    }

    /// Nominal chunk length for a held straight-key tone. The duration only
    /// sets how often the worker re-renders while the key stays down; the
    /// `forever` flag, not this value, is what keeps the tone sounding.
    const STRAIGHT_KEY_HOLD_CHUNK_US: i32 = 50_000;

    /// Enqueue a held tone at the current frequency, for as long as a
    /// straight key stays closed. `spec.md` supplement C.3.
    pub fn key_down(&self) -> Result<()> {
        let freq = self.frequency_hz();
        let tone = Tone::new(
            freq,
            Self::STRAIGHT_KEY_HOLD_CHUNK_US,
            SlopeMode::Standard,
            SlopeShape::RaisedCosine,
        )?
        .forever();
        self.queue.enqueue(tone)
    }

    /// Release a straight key: drop the held tone immediately rather than
    /// letting it ring out.
    pub fn key_up(&self) {
        self.queue.flush();
    }
}

impl Drop for Generator {
    fn drop(&mut self) {
        self.stop();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn test_generator() -> Generator {
        Generator::new(&AudioSinkSpec::Null).unwrap()
    }

    #[test]
    fn default_speed_is_twenty_wpm() {
        let g = test_generator();
        assert_eq!(g.speed_wpm(), 20);
    }

    #[test]
    fn set_speed_rejects_out_of_range() {
        let g = test_generator();
        assert!(g.set_speed_wpm(3).is_err());
        assert!(g.set_speed_wpm(61).is_err());
        assert!(g.set_speed_wpm(20).is_ok());
    }

    #[test]
    fn character_a_at_twelve_wpm_matches_scenario() {
        let g = test_generator();
        g.set_speed_wpm(12).unwrap();
        g.set_frequency_hz(800).unwrap();
        g.send_character('A').unwrap();
        assert_eq!(g.tone_queue_length(), 4);

        let expect = |len: usize| {
            let tone = match g.queue_handle().dequeue() {
                DequeueResult::Dequeued(t) => t,
                other => panic!("expected Dequeued, got {other:?}"),
            };
            assert_eq!(tone.duration_us, len as i32);
            tone
        };
        let dot = expect(100_000);
        assert_eq!(dot.frequency_hz, 800);
        let sp1 = expect(100_000);
        assert_eq!(sp1.frequency_hz, 0);
        let dash = expect(300_000);
        assert_eq!(dash.frequency_hz, 800);
        let sp2 = expect(300_000);
        assert_eq!(sp2.frequency_hz, 0);
    }

    #[test]
    fn unknown_character_fails_without_clearing_queue() {
        let g = test_generator();
        g.send_character('A').unwrap();
        let before = g.tone_queue_length();
        assert_eq!(g.send_character('\u{1F600}'), Err(CwError::NoSuchCharacter));
        assert_eq!(g.tone_queue_length(), before);
    }

    #[test]
    fn string_with_space_adds_word_space() {
        let g = test_generator();
        g.send_string("E E").unwrap();
        assert!(g.tone_queue_length() > 4);
    }

    #[test]
    fn start_and_stop_round_trip() {
        let mut g = test_generator();
        g.start();
        g.send_character('E').unwrap();
        g.wait_for_tone_queue().unwrap();
        g.stop();
    }
}
