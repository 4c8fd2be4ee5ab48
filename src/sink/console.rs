//! The PC-console buzzer sink. `spec.md` §4.4, §6.
//!
//! Opens `/dev/console` (or the given device) and drives the kernel's
//! `KIOCSOUND` ioctl. The ioctl's numeric argument is the PIT tick rate
//! (1_193_180 Hz) divided by the desired frequency; an argument of 0
//! silences the buzzer. Volume on this sink is only expressible as on/off —
//! there is no PCM path at all, so `write`'s `samples` argument is ignored
//! and only `frequency_hz` matters.

use super::{AudioSink, SinkInfo};
use crate::error::CwError;

/// The PIT (programmable interval timer) tick rate the kernel's console
/// beep divider is defined against.
pub const CONSOLE_TICK_RATE: u32 = 1_193_180;
const DEFAULT_DEVICE: &str = "/dev/console";
/// Nominal only: the console sink produces no PCM, so there is no real
/// sample-accurate chunking, but the generator still wants a period size to
/// pace its write loop against.
const CONSOLE_PERIOD_SIZE: usize = 64;
const CONSOLE_SAMPLE_RATE: u32 = 8_000;

pub struct ConsoleSink {
    #[cfg(target_os = "linux")]
    file: Option<std::fs::File>,
    #[cfg(not(target_os = "linux"))]
    _opened: bool,
}

impl ConsoleSink {
    pub fn new() -> Self {
        Self {
            #[cfg(target_os = "linux")]
            file: None,
            #[cfg(not(target_os = "linux"))]
            _opened: false,
        }
    }

    #[cfg(target_os = "linux")]
    fn ioctl_sound(&self, divisor_arg: libc::c_ulong) -> Result<(), CwError> {
        use std::os::unix::io::AsRawFd;
        const KIOCSOUND: libc::c_ulong = 0x4B2F;
        let Some(file) = self.file.as_ref() else {
            return Err(CwError::SinkUnavailable("console sink not open".into()));
        };
        let rc = unsafe { libc::ioctl(file.as_raw_fd(), KIOCSOUND, divisor_arg) };
        if rc < 0 {
            return Err(CwError::SinkUnavailable(format!(
                "KIOCSOUND ioctl failed: {}",
                std::io::Error::last_os_error()
            )));
        }
        Ok(())
    }
}

impl Default for ConsoleSink {
    fn default() -> Self {
        Self::new()
    }
}

impl AudioSink for ConsoleSink {
    fn name(&self) -> &str {
        "console"
    }

    #[cfg(target_os = "linux")]
    fn probe(&self, device: &str) -> bool {
        let path = if device.is_empty() { DEFAULT_DEVICE } else { device };
        std::fs::OpenOptions::new().write(true).open(path).is_ok()
    }

    #[cfg(not(target_os = "linux"))]
    fn probe(&self, _device: &str) -> bool {
        false
    }

    #[cfg(target_os = "linux")]
    fn open(&mut self, device: &str) -> Result<SinkInfo, CwError> {
        let path = if device.is_empty() { DEFAULT_DEVICE } else { device };
        let file = std::fs::OpenOptions::new()
            .write(true)
            .open(path)
            .map_err(|e| CwError::SinkUnavailable(format!("open {path}: {e}")))?;
        self.file = Some(file);
        Ok(SinkInfo {
            sample_rate: CONSOLE_SAMPLE_RATE,
            period_size: CONSOLE_PERIOD_SIZE,
        })
    }

    #[cfg(not(target_os = "linux"))]
    fn open(&mut self, _device: &str) -> Result<SinkInfo, CwError> {
        Err(CwError::SinkUnavailable(
            "console buzzer sink is only available on linux".into(),
        ))
    }

    #[cfg(target_os = "linux")]
    fn close(&mut self) {
        if self.file.is_some() {
            let _ = self.ioctl_sound(0);
            self.file = None;
        }
    }

    #[cfg(not(target_os = "linux"))]
    fn close(&mut self) {}

    #[cfg(target_os = "linux")]
    fn write(&mut self, frequency_hz: i32, _samples: &[i16]) -> Result<(), CwError> {
        let divisor = if frequency_hz > 0 {
            (CONSOLE_TICK_RATE / frequency_hz as u32) as libc::c_ulong
        } else {
            0
        };
        self.ioctl_sound(divisor)
    }

    #[cfg(not(target_os = "linux"))]
    fn write(&mut self, _frequency_hz: i32, _samples: &[i16]) -> Result<(), CwError> {
        Err(CwError::SinkUnavailable("console sink unavailable".into()))
    }

    #[cfg(target_os = "linux")]
    fn silence(&mut self) -> Result<(), CwError> {
        self.ioctl_sound(0)
    }

    #[cfg(not(target_os = "linux"))]
    fn silence(&mut self) -> Result<(), CwError> {
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn tick_rate_matches_pit_frequency() {
        assert_eq!(CONSOLE_TICK_RATE, 1_193_180);
    }

    #[test]
    fn divisor_for_800hz_tone() {
        // spec.md §6: argument = 1_193_180 / frequency_hz
        let divisor = CONSOLE_TICK_RATE / 800;
        assert_eq!(divisor, 1491);
    }
}
