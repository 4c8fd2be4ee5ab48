//! The auto-selecting "soundcard" meta-sink. `spec.md` §4.4.
//!
//! Tries PulseAudio, then OSS, then ALSA, in that order, and keeps the first
//! backend that opens the given device successfully. `probe` reports true as
//! soon as any candidate probes true.

use super::{AlsaSink, AudioSink, OssSink, PulseSink, SinkInfo};
use crate::error::CwError;

pub struct SoundcardSink {
    chosen: Option<Box<dyn AudioSink>>,
}

impl SoundcardSink {
    pub fn new() -> Self {
        Self { chosen: None }
    }

    fn candidates() -> Vec<Box<dyn AudioSink>> {
        vec![
            Box::new(PulseSink::new()),
            Box::new(OssSink::new()),
            Box::new(AlsaSink::new()),
        ]
    }
}

impl Default for SoundcardSink {
    fn default() -> Self {
        Self::new()
    }
}

impl AudioSink for SoundcardSink {
    fn name(&self) -> &str {
        self.chosen.as_ref().map_or("soundcard", |s| s.name())
    }

    fn probe(&self, device: &str) -> bool {
        Self::candidates().iter().any(|s| s.probe(device))
    }

    fn open(&mut self, device: &str) -> Result<SinkInfo, CwError> {
        let mut last_err = None;
        for mut candidate in Self::candidates() {
            match candidate.open(device) {
                Ok(info) => {
                    log::info!("soundcard sink selected backend {}", candidate.name());
                    self.chosen = Some(candidate);
                    return Ok(info);
                }
                Err(e) => {
                    log::debug!("soundcard candidate {} failed: {e}", candidate.name());
                    last_err = Some(e);
                }
            }
        }
        Err(last_err.unwrap_or_else(|| {
            CwError::SinkUnavailable("no soundcard backend available".into())
        }))
    }

    fn close(&mut self) {
        if let Some(sink) = self.chosen.as_mut() {
            sink.close();
        }
        self.chosen = None;
    }

    fn write(&mut self, frequency_hz: i32, samples: &[i16]) -> Result<(), CwError> {
        let Some(sink) = self.chosen.as_mut() else {
            return Err(CwError::SinkUnavailable("soundcard sink not open".into()));
        };
        sink.write(frequency_hz, samples)
    }

    fn silence(&mut self) -> Result<(), CwError> {
        let Some(sink) = self.chosen.as_mut() else {
            return Err(CwError::SinkUnavailable("soundcard sink not open".into()));
        };
        sink.silence()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn name_before_open_is_generic() {
        let sink = SoundcardSink::new();
        assert_eq!(sink.name(), "soundcard");
    }

    #[test]
    fn candidates_are_tried_in_pulse_oss_alsa_order() {
        let names: Vec<&str> = SoundcardSink::candidates().iter().map(|s| s.name()).collect();
        assert_eq!(names, vec!["pulse", "oss", "alsa"]);
    }
}
