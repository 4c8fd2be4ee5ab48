//! Real-time Morse-code signal processing: tone generation, iambic/straight
//! keying, and a timing-tolerant receiver, built around a single shared tone
//! queue.
//!
//! This is a library: it owns no `main`, reads no config file, and draws no
//! UI. A caller assembles a [`sink::AudioSinkSpec`], opens a [`Generator`],
//! and drives it either through a [`Key`] (straight key or iambic paddles) or
//! directly through `send_*`/`queue_tone`. A [`Receiver`] decodes incoming
//! mark/space timings back into characters, independently of whatever
//! produced them (this crate's own generator, or an operator's key).

mod clock;
mod error;
mod generator;
mod key;
mod keyer;
mod queue;
mod receiver;
mod sink;
mod tables;
mod tone;

pub use clock::{now, validate_timestamp, TimeVal};
pub use error::{CwError, Result};
pub use generator::{
    frequency_limits, gap_limits, speed_limits, volume_limits, weighting_limits, Generator,
    CW_DOT_CALIBRATION_US,
};
pub use key::{Key, StraightKey};
pub use keyer::{IambicKeyer, KeyerState};
pub use queue::DequeueResult;
pub use receiver::{tolerance_limits, Classification, Receiver, StatKind, State as ReceiverState};
pub use sink::{
    AlsaSink, AudioSink, AudioSinkSpec, ConsoleSink, NullSink, OssSink, PulseSink, SinkInfo,
    SoundcardSink,
};
pub use tables::{char_to_representation, phonetic, procedural_expansion, representation_to_char};
pub use tone::{SlopeMode, SlopeShape, Tone, CW_FREQUENCY_MAX, CW_FREQUENCY_MIN, CW_VOLUME_MAX, CW_VOLUME_MIN};
