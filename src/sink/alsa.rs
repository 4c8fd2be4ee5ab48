//! The ALSA PCM sink. `spec.md` §4.4.
//!
//! ALSA is loaded dynamically at runtime through `libloading`, resolving
//! `libasound.so.2` and the handful of `snd_pcm_*` symbols this sink needs,
//! so the crate does not hard-link against ALSA and can run on hosts where
//! it isn't installed (falling back to another sink via
//! [`super::SoundcardSink`]).

#![allow(non_camel_case_types)]

use std::ffi::{c_char, c_int, c_uint, c_void, CString};

use super::{AudioSink, SinkInfo, PREFERRED_SAMPLE_RATES};
use crate::error::CwError;

type snd_pcm_t = c_void;
type snd_pcm_sframes_t = isize;
type snd_pcm_uframes_t = usize;

const SND_PCM_STREAM_PLAYBACK: c_int = 0;
const SND_PCM_FORMAT_S16: c_int = if cfg!(target_endian = "big") { 3 } else { 2 };
const SND_PCM_ACCESS_RW_INTERLEAVED: c_int = 3;
const ALSA_PERIOD_SIZE: usize = 1024;
const ALSA_LATENCY_US: c_uint = 100_000;

#[cfg(target_os = "linux")]
type OpenFn = unsafe extern "C" fn(*mut *mut snd_pcm_t, *const c_char, c_int, c_int) -> c_int;
#[cfg(target_os = "linux")]
type SetParamsFn =
    unsafe extern "C" fn(*mut snd_pcm_t, c_int, c_int, c_uint, c_uint, c_int, c_uint) -> c_int;
#[cfg(target_os = "linux")]
type WriteiFn = unsafe extern "C" fn(*mut snd_pcm_t, *const c_void, snd_pcm_uframes_t) -> snd_pcm_sframes_t;
#[cfg(target_os = "linux")]
type CloseFn = unsafe extern "C" fn(*mut snd_pcm_t) -> c_int;
#[cfg(target_os = "linux")]
type PrepareFn = unsafe extern "C" fn(*mut snd_pcm_t) -> c_int;
#[cfg(target_os = "linux")]
type RecoverFn = unsafe extern "C" fn(*mut snd_pcm_t, c_int, c_int) -> c_int;

#[cfg(target_os = "linux")]
struct AlsaLib {
    _library: libloading::Library,
    open: OpenFn,
    set_params: SetParamsFn,
    writei: WriteiFn,
    close: CloseFn,
    prepare: PrepareFn,
    recover: RecoverFn,
}

#[cfg(target_os = "linux")]
impl AlsaLib {
    fn load() -> Result<Self, CwError> {
        unsafe {
            let library = libloading::Library::new("libasound.so.2")
                .map_err(|e| CwError::SinkUnavailable(format!("libasound.so.2: {e}")))?;
            macro_rules! sym {
                ($name:literal) => {
                    *library
                        .get::<*const ()>($name)
                        .map_err(|e| CwError::SinkUnavailable(format!("{}: {e}", $name)))?
                };
            }
            let open: OpenFn = std::mem::transmute(sym!(b"snd_pcm_open\0"));
            let set_params: SetParamsFn = std::mem::transmute(sym!(b"snd_pcm_set_params\0"));
            let writei: WriteiFn = std::mem::transmute(sym!(b"snd_pcm_writei\0"));
            let close: CloseFn = std::mem::transmute(sym!(b"snd_pcm_close\0"));
            let prepare: PrepareFn = std::mem::transmute(sym!(b"snd_pcm_prepare\0"));
            let recover: RecoverFn = std::mem::transmute(sym!(b"snd_pcm_recover\0"));
            Ok(Self {
                _library: library,
                open,
                set_params,
                writei,
                close,
                prepare,
                recover,
            })
        }
    }
}

pub struct AlsaSink {
    #[cfg(target_os = "linux")]
    lib: Option<AlsaLib>,
    #[cfg(target_os = "linux")]
    handle: *mut snd_pcm_t,
    sample_rate: u32,
}

// `handle` is an opaque ALSA PCM handle; ALSA requires it be used from a
// single stream owner at a time, which the generator's worker thread
// already guarantees.
#[cfg(target_os = "linux")]
unsafe impl Send for AlsaSink {}

impl AlsaSink {
    pub fn new() -> Self {
        Self {
            #[cfg(target_os = "linux")]
            lib: None,
            #[cfg(target_os = "linux")]
            handle: std::ptr::null_mut(),
            sample_rate: 0,
        }
    }
}

impl Default for AlsaSink {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(target_os = "linux")]
impl AudioSink for AlsaSink {
    fn name(&self) -> &str {
        "alsa"
    }

    fn probe(&self, _device: &str) -> bool {
        AlsaLib::load().is_ok()
    }

    fn open(&mut self, device: &str) -> Result<SinkInfo, CwError> {
        let lib = AlsaLib::load()?;
        let device_name = CString::new(if device.is_empty() { "default" } else { device })
            .map_err(|_| CwError::InvalidArgument("device name contains a NUL byte".into()))?;

        let mut handle: *mut snd_pcm_t = std::ptr::null_mut();
        let rc = unsafe { (lib.open)(&mut handle, device_name.as_ptr(), SND_PCM_STREAM_PLAYBACK, 0) };
        if rc < 0 {
            return Err(CwError::SinkUnavailable(format!(
                "snd_pcm_open({device_name:?}) failed: {rc}"
            )));
        }

        let mut accepted_rate = None;
        for &rate in PREFERRED_SAMPLE_RATES {
            let rc = unsafe {
                (lib.set_params)(
                    handle,
                    SND_PCM_FORMAT_S16,
                    SND_PCM_ACCESS_RW_INTERLEAVED,
                    1,
                    rate,
                    1,
                    ALSA_LATENCY_US,
                )
            };
            if rc == 0 {
                accepted_rate = Some(rate);
                break;
            }
        }
        let Some(sample_rate) = accepted_rate else {
            unsafe { (lib.close)(handle) };
            return Err(CwError::SinkUnavailable(
                "ALSA device accepted no preferred sample rate".into(),
            ));
        };

        self.sample_rate = sample_rate;
        self.handle = handle;
        self.lib = Some(lib);
        log::info!("ALSA sink opened {device_name:?} at {sample_rate} Hz");
        Ok(SinkInfo {
            sample_rate,
            period_size: ALSA_PERIOD_SIZE,
        })
    }

    fn close(&mut self) {
        if let Some(lib) = self.lib.take() {
            if !self.handle.is_null() {
                unsafe { (lib.close)(self.handle) };
            }
        }
        self.handle = std::ptr::null_mut();
    }

    fn write(&mut self, _frequency_hz: i32, samples: &[i16]) -> Result<(), CwError> {
        let Some(lib) = self.lib.as_ref() else {
            return Err(CwError::SinkUnavailable("ALSA sink not open".into()));
        };
        let frames = samples.len();
        let rc = unsafe {
            (lib.writei)(self.handle, samples.as_ptr() as *const c_void, frames)
        };
        if rc < 0 {
            // Underrun/overrun: attempt one recovery pass before failing.
            let recovered = unsafe { (lib.recover)(self.handle, rc as c_int, 1) };
            if recovered < 0 {
                unsafe { (lib.prepare)(self.handle) };
                return Err(CwError::SinkUnavailable(format!(
                    "snd_pcm_writei failed and could not recover: {rc}"
                )));
            }
            return Ok(());
        }
        Ok(())
    }

    fn silence(&mut self) -> Result<(), CwError> {
        self.write(0, &[0i16; ALSA_PERIOD_SIZE])
    }
}

#[cfg(not(target_os = "linux"))]
impl AudioSink for AlsaSink {
    fn name(&self) -> &str {
        "alsa"
    }

    fn probe(&self, _device: &str) -> bool {
        false
    }

    fn open(&mut self, _device: &str) -> Result<SinkInfo, CwError> {
        Err(CwError::SinkUnavailable("ALSA is only available on linux".into()))
    }

    fn close(&mut self) {}

    fn write(&mut self, _frequency_hz: i32, _samples: &[i16]) -> Result<(), CwError> {
        Err(CwError::SinkUnavailable("ALSA sink not open".into()))
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
        assert_eq!(SND_PCM_FORMAT_S16, if cfg!(target_endian = "big") { 3 } else { 2 });
    }
}
