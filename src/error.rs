use thiserror::Error;

/// Every recoverable failure the core can surface.
///
/// Names are behavioral, not type-bound, mirroring the error kinds in the
/// design: each corresponds to one documented refusal, not an internal
/// implementation accident. Invalid parameters never mutate state before
/// returning one of these.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum CwError {
    /// A parameter was out of its documented range, or a representation
    /// string was malformed (contained characters other than `.`/`-`, or
    /// exceeded 7 symbols).
    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    /// A caller-supplied timestamp had a negative `tv_sec` or a `tv_usec`
    /// outside `[0, 1_000_000)`.
    #[error("invalid timestamp")]
    InvalidTimestamp,

    /// A character has no known Morse representation, or a representation
    /// has no known character.
    #[error("no such character")]
    NoSuchCharacter,

    /// The receiver's representation buffer would overflow if the current
    /// mark were stored.
    #[error("representation buffer full")]
    BufferFull,

    /// `enqueue` was called on a tone queue already at capacity.
    #[error("tone queue full")]
    FullQueue,

    /// The operation was refused because a conflicting subsystem currently
    /// holds the keying resource (e.g. the iambic keyer is mid-element).
    #[error("keyer or key busy")]
    Busy,

    /// The receiver was polled before the end-of-character gap elapsed.
    #[error("poll is early: end-of-character gap not yet elapsed")]
    EarlyPoll,

    /// A mark shorter than `noise_spike_threshold_us` was discarded.
    #[error("mark rejected as a noise spike")]
    SpikeRejected,

    /// The requested audio sink could not be opened.
    #[error("audio sink unavailable: {0}")]
    SinkUnavailable(String),

    /// A `wait_for_*` call was made from the one thread that would have to
    /// deliver the wake signal, which would deadlock forever.
    #[error("would deadlock: wake signal is blocked on the calling thread")]
    WakeSignalBlocked,

    /// A speed setter was refused because adaptive speed tracking is enabled
    /// on the receiver (speed is derived, not set, while adaptive).
    #[error("receiver is in adaptive-speed mode")]
    AdaptiveMode,
}

pub type Result<T> = std::result::Result<T, CwError>;
