//! The null sink: always writable, produces no sound, but still consumes
//! wall-clock time so the generator's timing stays correct when no audio
//! device is wanted. `spec.md` §4.4.

use super::{AudioSink, SinkInfo};
use crate::clock;
use crate::error::CwError;

/// Samples per cooperative chunk. Splitting a tone's duration into chunks
/// this size (rather than sleeping for the whole tone at once) lets other
/// work — flush, stop — interleave between chunks.
const NULL_PERIOD_SIZE: usize = 256;
const NULL_SAMPLE_RATE: u32 = 44_100;

pub struct NullSink {
    opened: bool,
}

impl NullSink {
    pub fn new() -> Self {
        Self { opened: false }
    }
}

impl Default for NullSink {
    fn default() -> Self {
        Self::new()
    }
}

impl AudioSink for NullSink {
    fn name(&self) -> &str {
        "null"
    }

    fn probe(&self, _device: &str) -> bool {
        true
    }

    fn open(&mut self, _device: &str) -> Result<SinkInfo, CwError> {
        self.opened = true;
        Ok(SinkInfo {
            sample_rate: NULL_SAMPLE_RATE,
            period_size: NULL_PERIOD_SIZE,
        })
    }

    fn close(&mut self) {
        self.opened = false;
    }

    fn write(&mut self, _frequency_hz: i32, samples: &[i16]) -> Result<(), CwError> {
        let us = (samples.len() as u64 * 1_000_000 / NULL_SAMPLE_RATE as u64) as u32;
        clock::sleep_us(us);
        Ok(())
    }

    fn silence(&mut self) -> Result<(), CwError> {
        self.write(0, &[0i16; NULL_PERIOD_SIZE])
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn probes_and_opens_unconditionally() {
        let sink = NullSink::new();
        assert!(sink.probe("anything"));
    }

    #[test]
    fn open_reports_fixed_rate_and_period() {
        let mut sink = NullSink::new();
        let info = sink.open("").unwrap();
        assert_eq!(info.sample_rate, NULL_SAMPLE_RATE);
        assert_eq!(info.period_size, NULL_PERIOD_SIZE);
    }

    #[test]
    fn write_and_silence_succeed() {
        let mut sink = NullSink::new();
        sink.open("").unwrap();
        assert!(sink.write(800, &[0i16; 8]).is_ok());
        assert!(sink.silence().is_ok());
    }
}
