//! The PulseAudio sink. `spec.md` §4.4.
//!
//! Loaded dynamically through `libloading` against `libpulse-simple.so.0`,
//! using the "simple" blocking API (`pa_simple_new`/`pa_simple_write`), which
//! is sufficient for the generator's single mono playback stream and avoids
//! pulling in the full async mainloop API.

#![allow(non_camel_case_types)]

use std::ffi::{c_char, c_int, c_void, CString};

use super::{AudioSink, SinkInfo};
use crate::error::CwError;

type pa_simple = c_void;

#[repr(C)]
struct pa_sample_spec {
    format: c_int,
    rate: u32,
    channels: u8,
}

const PA_SAMPLE_S16NE: c_int = if cfg!(target_endian = "big") { 4 } else { 3 };
const PA_STREAM_PLAYBACK: c_int = 1;
const PULSE_SAMPLE_RATE: u32 = 44_100;
const PULSE_PERIOD_SIZE: usize = 1024;

#[cfg(target_os = "linux")]
type NewFn = unsafe extern "C" fn(
    *const c_char,
    *const c_char,
    c_int,
    *const c_char,
    *const c_char,
    *const pa_sample_spec,
    *const c_void,
    *const c_void,
    *mut c_int,
) -> *mut pa_simple;
#[cfg(target_os = "linux")]
type WriteFn = unsafe extern "C" fn(*mut pa_simple, *const c_void, usize, *mut c_int) -> c_int;
#[cfg(target_os = "linux")]
type FreeFn = unsafe extern "C" fn(*mut pa_simple);

#[cfg(target_os = "linux")]
struct PulseLib {
    _library: libloading::Library,
    new: NewFn,
    write: WriteFn,
    free: FreeFn,
}

#[cfg(target_os = "linux")]
impl PulseLib {
    fn load() -> Result<Self, CwError> {
        unsafe {
            let library = libloading::Library::new("libpulse-simple.so.0")
                .map_err(|e| CwError::SinkUnavailable(format!("libpulse-simple.so.0: {e}")))?;
            macro_rules! sym {
                ($name:literal) => {
                    *library
                        .get::<*const ()>($name)
                        .map_err(|e| CwError::SinkUnavailable(format!("{}: {e}", $name)))?
                };
            }
            let new: NewFn = std::mem::transmute(sym!(b"pa_simple_new\0"));
            let write: WriteFn = std::mem::transmute(sym!(b"pa_simple_write\0"));
            let free: FreeFn = std::mem::transmute(sym!(b"pa_simple_free\0"));
            Ok(Self {
                _library: library,
                new,
                write,
                free,
            })
        }
    }
}

pub struct PulseSink {
    #[cfg(target_os = "linux")]
    lib: Option<PulseLib>,
    #[cfg(target_os = "linux")]
    handle: *mut pa_simple,
}

#[cfg(target_os = "linux")]
unsafe impl Send for PulseSink {}

impl PulseSink {
    pub fn new() -> Self {
        Self {
            #[cfg(target_os = "linux")]
            lib: None,
            #[cfg(target_os = "linux")]
            handle: std::ptr::null_mut(),
        }
    }
}

impl Default for PulseSink {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(target_os = "linux")]
impl AudioSink for PulseSink {
    fn name(&self) -> &str {
        "pulse"
    }

    fn probe(&self, _device: &str) -> bool {
        PulseLib::load().is_ok()
    }

    fn open(&mut self, device: &str) -> Result<SinkInfo, CwError> {
        let lib = PulseLib::load()?;
        let app_name = CString::new("cw-core").unwrap();
        let stream_name = CString::new("cw tone").unwrap();
        let device_name = if device.is_empty() {
            None
        } else {
            Some(
                CString::new(device)
                    .map_err(|_| CwError::InvalidArgument("device name contains a NUL byte".into()))?,
            )
        };
        let spec = pa_sample_spec {
            format: PA_SAMPLE_S16NE,
            rate: PULSE_SAMPLE_RATE,
            channels: 1,
        };

        let mut error: c_int = 0;
        let handle = unsafe {
            (lib.new)(
                std::ptr::null(),
                app_name.as_ptr(),
                PA_STREAM_PLAYBACK,
                device_name.as_ref().map_or(std::ptr::null(), |d| d.as_ptr()),
                stream_name.as_ptr(),
                &spec,
                std::ptr::null(),
                std::ptr::null(),
                &mut error,
            )
        };
        if handle.is_null() {
            return Err(CwError::SinkUnavailable(format!(
                "pa_simple_new failed with error code {error}"
            )));
        }

        self.handle = handle;
        self.lib = Some(lib);
        log::info!("PulseAudio sink opened at {PULSE_SAMPLE_RATE} Hz");
        Ok(SinkInfo {
            sample_rate: PULSE_SAMPLE_RATE,
            period_size: PULSE_PERIOD_SIZE,
        })
    }

    fn close(&mut self) {
        if let Some(lib) = self.lib.take() {
            if !self.handle.is_null() {
                unsafe { (lib.free)(self.handle) };
            }
        }
        self.handle = std::ptr::null_mut();
    }

    fn write(&mut self, _frequency_hz: i32, samples: &[i16]) -> Result<(), CwError> {
        let Some(lib) = self.lib.as_ref() else {
            return Err(CwError::SinkUnavailable("pulse sink not open".into()));
        };
        let bytes = samples.len() * std::mem::size_of::<i16>();
        let mut error: c_int = 0;
        let rc = unsafe {
            (lib.write)(self.handle, samples.as_ptr() as *const c_void, bytes, &mut error)
        };
        if rc < 0 {
            return Err(CwError::SinkUnavailable(format!(
                "pa_simple_write failed with error code {error}"
            )));
        }
        Ok(())
    }

    fn silence(&mut self) -> Result<(), CwError> {
        self.write(0, &[0i16; PULSE_PERIOD_SIZE])
    }
}

#[cfg(not(target_os = "linux"))]
impl AudioSink for PulseSink {
    fn name(&self) -> &str {
        "pulse"
    }

    fn probe(&self, _device: &str) -> bool {
        false
    }

    fn open(&mut self, _device: &str) -> Result<SinkInfo, CwError> {
        Err(CwError::SinkUnavailable(
            "PulseAudio is only available on linux".into(),
        ))
    }

    fn close(&mut self) {}

    fn write(&mut self, _frequency_hz: i32, _samples: &[i16]) -> Result<(), CwError> {
        Err(CwError::SinkUnavailable("pulse sink not open".into()))
    }

    fn silence(&mut self) -> Result<(), CwError> {
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn format_constant_matches_native_endianness() {
        assert_eq!(PA_SAMPLE_S16NE, if cfg!(target_endian = "big") { 4 } else { 3 });
    }
}
