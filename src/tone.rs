//! The `Tone` primitive and its PCM synthesis. `spec.md` §3 (data model),
//! §4.5 (synthesis).

use crate::error::CwError;

/// Which portions of a tone's duration carry an amplitude slope, as opposed
/// to full-volume sustain. `spec.md` §3.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SlopeMode {
    /// No slopes at all — a hard-edged rectangular tone (used for the final
    /// trailing silence block and other cases where clicks don't matter).
    NoSlopes,
    /// Only the rising edge is shaped; the tone ends abruptly.
    RisingOnly,
    /// Only the falling edge is shaped; the tone starts abruptly.
    FallingOnly,
    /// Both edges are shaped, full sustain in between. The normal case for
    /// dots, dashes, and the spaces around them.
    Standard,
}

/// The envelope curve applied within a slope region. `spec.md` §4.5 names
/// four shapes; `RaisedCosine` is the generator's default, matching
/// conventional CW keying practice.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SlopeShape {
    /// `amplitude(t) = t / slope_len`.
    Linear,
    /// `amplitude(t) = (1 - cos(pi * t / slope_len)) / 2`, i.e. cosine
    /// swept over `[-pi, 0)`.
    RaisedCosine,
    /// `amplitude(t) = sin(pi/2 * t / slope_len)`, cosine swept over
    /// `[0, pi/2)`.
    SineRise,
    /// Instant step; no shaping at all (slope length is effectively 0).
    Rectangular,
}

/// One scheduled tone: a span of audio (or silence, if `frequency_hz == 0`)
/// with a given duration and envelope treatment.
///
/// `duration_us == 0` tones are dropped at enqueue time rather than stored
/// (`spec.md` §3); this struct itself places no such restriction, since the
/// queue is responsible for enforcing it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Tone {
    pub frequency_hz: i32,
    pub duration_us: i32,
    pub slope_mode: SlopeMode,
    pub slope_shape: SlopeShape,
    /// When `true` and this tone is alone at the head of the queue, dequeue
    /// returns a copy without consuming it, until a successor tone arrives.
    pub forever: bool,
}

pub const CW_FREQUENCY_MIN: i32 = 0;
pub const CW_FREQUENCY_MAX: i32 = 4000;
pub const CW_VOLUME_MIN: i32 = 0;
pub const CW_VOLUME_MAX: i32 = 100;

impl Tone {
    pub fn new(
        frequency_hz: i32,
        duration_us: i32,
        slope_mode: SlopeMode,
        slope_shape: SlopeShape,
    ) -> Result<Self, CwError> {
        if !(CW_FREQUENCY_MIN..=CW_FREQUENCY_MAX).contains(&frequency_hz) {
            return Err(CwError::InvalidArgument(format!(
                "frequency {frequency_hz} Hz out of range [{CW_FREQUENCY_MIN}, {CW_FREQUENCY_MAX}]"
            )));
        }
        if duration_us < 0 {
            return Err(CwError::InvalidArgument(format!(
                "negative tone duration {duration_us} us"
            )));
        }
        Ok(Self {
            frequency_hz,
            duration_us,
            slope_mode,
            slope_shape,
            forever: false,
        })
    }

    pub fn forever(mut self) -> Self {
        self.forever = true;
        self
    }

    /// Number of PCM samples this tone occupies at `sample_rate`.
    pub fn n_samples(&self, sample_rate: u32) -> u32 {
        ((self.duration_us as i64) * (sample_rate as i64) / 1_000_000) as u32
    }

    /// Length in samples of each slope region, bounded so the two slopes
    /// never together exceed the tone's total length.
    fn slope_n_samples(&self, sample_rate: u32, requested_slope_us: u32) -> u32 {
        let n = self.n_samples(sample_rate);
        let requested = ((requested_slope_us as u64) * (sample_rate as u64) / 1_000_000) as u32;
        requested.min(n / 2)
    }

    pub fn rising_slope_n_samples(&self, sample_rate: u32, requested_slope_us: u32) -> u32 {
        match self.slope_mode {
            SlopeMode::NoSlopes | SlopeMode::FallingOnly => 0,
            SlopeMode::RisingOnly => self.n_samples(sample_rate),
            SlopeMode::Standard => self.slope_n_samples(sample_rate, requested_slope_us),
        }
    }

    pub fn falling_slope_n_samples(&self, sample_rate: u32, requested_slope_us: u32) -> u32 {
        match self.slope_mode {
            SlopeMode::NoSlopes | SlopeMode::RisingOnly => 0,
            SlopeMode::FallingOnly => self.n_samples(sample_rate),
            SlopeMode::Standard => self.slope_n_samples(sample_rate, requested_slope_us),
        }
    }

    /// Render this tone to signed 16-bit PCM samples at `sample_rate`,
    /// scaling amplitude linearly with `volume_percent`.
    ///
    /// `frequency_hz == 0` produces silence that still occupies
    /// `n_samples(sample_rate)` slots — this is how inter-mark,
    /// inter-character, and inter-word spaces consume wall-clock time.
    pub fn render(&self, sample_rate: u32, volume_percent: i32, slope_duration_us: u32) -> Vec<i16> {
        let n = self.n_samples(sample_rate) as usize;
        let mut out = Vec::with_capacity(n);
        if n == 0 {
            return out;
        }
        if self.frequency_hz == 0 {
            out.resize(n, 0);
            return out;
        }

        let rising = self.rising_slope_n_samples(sample_rate, slope_duration_us) as usize;
        let falling = self.falling_slope_n_samples(sample_rate, slope_duration_us) as usize;
        let amplitude = (i16::MAX as f64) * (volume_percent.clamp(0, 100) as f64 / 100.0);
        let freq = self.frequency_hz as f64;
        let sr = sample_rate as f64;

        for i in 0..n {
            let envelope = if i < rising {
                self.shape_amplitude(i as f64 / rising.max(1) as f64)
            } else if i >= n - falling {
                self.shape_amplitude((n - 1 - i) as f64 / falling.max(1) as f64)
            } else {
                1.0
            };
            let phase = 2.0 * std::f64::consts::PI * freq * (i as f64) / sr;
            let sample = amplitude * phase.sin() * envelope;
            out.push(sample.round().clamp(i16::MIN as f64, i16::MAX as f64) as i16);
        }
        out
    }

    fn shape_amplitude(&self, t: f64) -> f64 {
        let t = t.clamp(0.0, 1.0);
        match self.slope_shape {
            SlopeShape::Linear => t,
            SlopeShape::RaisedCosine => (1.0 - (std::f64::consts::PI * (t - 1.0)).cos()) / 2.0,
            SlopeShape::SineRise => (std::f64::consts::FRAC_PI_2 * t).sin(),
            SlopeShape::Rectangular => 1.0,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rejects_out_of_range_frequency() {
        assert!(Tone::new(5000, 1000, SlopeMode::Standard, SlopeShape::RaisedCosine).is_err());
        assert!(Tone::new(-1, 1000, SlopeMode::Standard, SlopeShape::RaisedCosine).is_err());
    }

    #[test]
    fn rejects_negative_duration() {
        assert!(Tone::new(800, -1, SlopeMode::Standard, SlopeShape::RaisedCosine).is_err());
    }

    #[test]
    fn n_samples_matches_duration_and_rate() {
        let tone = Tone::new(800, 100_000, SlopeMode::Standard, SlopeShape::RaisedCosine).unwrap();
        assert_eq!(tone.n_samples(8_000), 800);
    }

    #[test]
    fn silent_tone_still_consumes_time() {
        let tone = Tone::new(0, 100_000, SlopeMode::NoSlopes, SlopeShape::RaisedCosine).unwrap();
        let samples = tone.render(8_000, 100, 5_000);
        assert_eq!(samples.len(), 800);
        assert!(samples.iter().all(|&s| s == 0));
    }

    #[test]
    fn slopes_never_exceed_half_of_tone() {
        let tone = Tone::new(800, 1_000, SlopeMode::Standard, SlopeShape::RaisedCosine).unwrap();
        let n = tone.n_samples(8_000);
        let rising = tone.rising_slope_n_samples(8_000, 50_000);
        let falling = tone.falling_slope_n_samples(8_000, 50_000);
        assert!(rising <= n / 2);
        assert!(falling <= n / 2);
    }

    #[test]
    fn rising_only_has_no_falling_slope() {
        let tone = Tone::new(800, 10_000, SlopeMode::RisingOnly, SlopeShape::Linear).unwrap();
        assert_eq!(tone.falling_slope_n_samples(8_000, 1_000), 0);
        assert_eq!(tone.rising_slope_n_samples(8_000, 1_000), tone.n_samples(8_000));
    }

    #[test]
    fn volume_scales_peak_amplitude() {
        let tone = Tone::new(800, 10_000, SlopeMode::NoSlopes, SlopeShape::Rectangular).unwrap();
        let full = tone.render(8_000, 100, 0);
        let half = tone.render(8_000, 50, 0);
        let peak_full = full.iter().map(|&s| s.unsigned_abs()).max().unwrap();
        let peak_half = half.iter().map(|&s| s.unsigned_abs()).max().unwrap();
        assert!(peak_half < peak_full);
    }
}
