//! The OSS (Open Sound System) PCM sink. `spec.md` §4.4.
//!
//! Opens `/dev/dsp` (or the given device) and negotiates signed 16-bit
//! native-endian mono via the `SNDCTL_DSP_*` ioctls. Preferred sample rates
//! are probed in descending order until the driver accepts one.

use std::io::Write;
use std::os::unix::io::AsRawFd;

use super::{AudioSink, SinkInfo, PREFERRED_SAMPLE_RATES};
use crate::error::CwError;

const DEFAULT_DEVICE: &str = "/dev/dsp";
const OSS_PERIOD_SIZE: usize = 512;

// ioctl request numbers from <sys/soundcard.h>, encoded with the standard
// Linux _IOW/_IOWR macros. OSS is not exposed by the `libc` crate, so these
// are reproduced directly from the OSS API, which has been stable for
// decades.
const SNDCTL_DSP_SPEED: libc::c_ulong = 0xC004_5002;
const SNDCTL_DSP_SETFMT: libc::c_ulong = 0xC004_5005;
const SNDCTL_DSP_CHANNELS: libc::c_ulong = 0xC004_5006;
const SNDCTL_DSP_GETBLKSIZE: libc::c_ulong = 0xC004_5004;
const AFMT_S16_NE: i32 = if cfg!(target_endian = "big") { 0x0020 } else { 0x0010 };

pub struct OssSink {
    file: Option<std::fs::File>,
    sample_rate: u32,
}

impl OssSink {
    pub fn new() -> Self {
        Self {
            file: None,
            sample_rate: 0,
        }
    }

    fn ioctl_set(file: &std::fs::File, request: libc::c_ulong, mut value: i32) -> Result<i32, CwError> {
        let rc = unsafe { libc::ioctl(file.as_raw_fd(), request, &mut value as *mut i32) };
        if rc < 0 {
            return Err(CwError::SinkUnavailable(format!(
                "OSS ioctl {request:#x} failed: {}",
                std::io::Error::last_os_error()
            )));
        }
        Ok(value)
    }
}

impl Default for OssSink {
    fn default() -> Self {
        Self::new()
    }
}

impl AudioSink for OssSink {
    fn name(&self) -> &str {
        "oss"
    }

    fn probe(&self, device: &str) -> bool {
        let path = if device.is_empty() { DEFAULT_DEVICE } else { device };
        std::fs::OpenOptions::new().write(true).open(path).is_ok()
    }

    fn open(&mut self, device: &str) -> Result<SinkInfo, CwError> {
        let path = if device.is_empty() { DEFAULT_DEVICE } else { device };
        let file = std::fs::OpenOptions::new()
            .write(true)
            .open(path)
            .map_err(|e| CwError::SinkUnavailable(format!("open {path}: {e}")))?;

        Self::ioctl_set(&file, SNDCTL_DSP_SETFMT, AFMT_S16_NE)?;
        Self::ioctl_set(&file, SNDCTL_DSP_CHANNELS, 1)?;

        let mut accepted_rate = None;
        for &rate in PREFERRED_SAMPLE_RATES {
            if let Ok(got) = Self::ioctl_set(&file, SNDCTL_DSP_SPEED, rate as i32) {
                accepted_rate = Some(got as u32);
                break;
            }
        }
        let sample_rate = accepted_rate.ok_or_else(|| {
            CwError::SinkUnavailable("OSS device accepted no preferred sample rate".into())
        })?;

        let period_size = Self::ioctl_set(&file, SNDCTL_DSP_GETBLKSIZE, 0)
            .map(|bytes| (bytes as usize / 2).max(1))
            .unwrap_or(OSS_PERIOD_SIZE);

        self.sample_rate = sample_rate;
        self.file = Some(file);
        log::info!("OSS sink opened {path} at {sample_rate} Hz, period {period_size} samples");
        Ok(SinkInfo {
            sample_rate,
            period_size,
        })
    }

    fn close(&mut self) {
        self.file = None;
    }

    fn write(&mut self, _frequency_hz: i32, samples: &[i16]) -> Result<(), CwError> {
        let Some(file) = self.file.as_mut() else {
            return Err(CwError::SinkUnavailable("OSS sink not open".into()));
        };
        let bytes: Vec<u8> = samples.iter().flat_map(|s| s.to_ne_bytes()).collect();
        file.write_all(&bytes)
            .map_err(|e| CwError::SinkUnavailable(format!("OSS write failed: {e}")))
    }

    fn silence(&mut self) -> Result<(), CwError> {
        self.write(0, &[0i16; OSS_PERIOD_SIZE])
    }
}
