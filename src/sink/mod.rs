//! The polymorphic audio sink. `spec.md` §4.4.
//!
//! A sink is addressed through one capability set regardless of backend:
//! `probe` / `open` / `close` / `write` / `silence`. Adding a new backend
//! means providing one more implementation of [`AudioSink`]; the generator
//! never matches on which backend it holds.

mod alsa;
mod console;
mod null;
mod oss;
mod pulse;
mod soundcard;

use crate::error::CwError;

pub use alsa::AlsaSink;
pub use console::ConsoleSink;
pub use null::NullSink;
pub use oss::OssSink;
pub use pulse::PulseSink;
pub use soundcard::SoundcardSink;

/// Which backend a `Generator` should use, and which device string (may be
/// empty, meaning the backend's own default device).
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AudioSinkSpec {
    /// No sink at all: every generator operation that would touch audio is
    /// a no-op. Distinct from `Null`, which does run the cooperative timing
    /// loop but produces no sound.
    None,
    Null,
    Console { device: String },
    Oss { device: String },
    Alsa { device: String },
    Pulse { device: String },
    /// Try PulseAudio, then OSS, then ALSA, in that order, and use the
    /// first that opens.
    Soundcard { device: String },
}

impl AudioSinkSpec {
    pub fn device(&self) -> &str {
        match self {
            AudioSinkSpec::None | AudioSinkSpec::Null => "",
            AudioSinkSpec::Console { device }
            | AudioSinkSpec::Oss { device }
            | AudioSinkSpec::Alsa { device }
            | AudioSinkSpec::Pulse { device }
            | AudioSinkSpec::Soundcard { device } => device,
        }
    }
}

/// Sample-rate and chunking parameters a sink reports once opened. The
/// generator's worker loop writes PCM in `period_size`-sample chunks, the
/// way `spec.md` §4.5 describes ("period size obtained from the sink on
/// open").
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SinkInfo {
    pub sample_rate: u32,
    pub period_size: usize,
}

/// Sample rates probed in descending order until a sink accepts one.
/// `spec.md` §4.4.
pub const PREFERRED_SAMPLE_RATES: &[u32] = &[48_000, 44_100, 22_050, 11_025, 8_000];

/// The capability set every backend implements.
///
/// `write` receives both the tone's nominal frequency and its rendered PCM:
/// PCM-capable backends (OSS/ALSA/PulseAudio/Null) use the samples; the
/// console buzzer, which can only express on/off at a given pitch via an
/// ioctl, uses the frequency and ignores the waveform.
pub trait AudioSink: Send {
    /// Human-readable backend name, used in diagnostics.
    fn name(&self) -> &str;

    /// Cheap check of whether `device` looks usable without fully opening
    /// it (e.g. the path exists, the shared library loads).
    fn probe(&self, device: &str) -> bool;

    /// Open the device, returning the sample rate and period size the
    /// generator should synthesize against.
    fn open(&mut self, device: &str) -> Result<SinkInfo, CwError>;

    fn close(&mut self);

    /// Write one chunk. `frequency_hz == 0` means silence.
    fn write(&mut self, frequency_hz: i32, samples: &[i16]) -> Result<(), CwError>;

    /// Write one period's worth of silence, used to flush the sink when the
    /// queue drains (`EmptyButRecentlyActive`).
    fn silence(&mut self) -> Result<(), CwError>;
}

/// Construct (unopened) the sink named by `spec`, without touching any
/// device. Used by callers that want to `open()` it themselves, e.g. to
/// retry with a fallback device on failure.
pub fn new_sink(spec: &AudioSinkSpec) -> Box<dyn AudioSink> {
    match spec {
        AudioSinkSpec::None | AudioSinkSpec::Null => Box::new(NullSink::new()),
        AudioSinkSpec::Console { .. } => Box::new(ConsoleSink::new()),
        AudioSinkSpec::Oss { .. } => Box::new(OssSink::new()),
        AudioSinkSpec::Alsa { .. } => Box::new(AlsaSink::new()),
        AudioSinkSpec::Pulse { .. } => Box::new(PulseSink::new()),
        AudioSinkSpec::Soundcard { .. } => Box::new(SoundcardSink::new()),
    }
}

/// Construct and open the sink named by `spec`, returning both the sink and
/// the `SinkInfo` it reported on open.
pub fn open(spec: &AudioSinkSpec) -> Result<(Box<dyn AudioSink>, SinkInfo), CwError> {
    let device = spec.device().to_string();
    let mut sink = new_sink(spec);
    log::info!("opening audio sink {} (device={device:?})", sink.name());
    let info = sink.open(&device)?;
    Ok((sink, info))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn null_sink_always_opens() {
        let spec = AudioSinkSpec::Null;
        let sink = open(&spec);
        assert!(sink.is_ok());
    }

    #[test]
    fn none_sink_behaves_like_null() {
        let spec = AudioSinkSpec::None;
        assert!(open(&spec).is_ok());
    }
}
