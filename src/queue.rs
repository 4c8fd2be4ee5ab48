//! The tone queue: a bounded circular buffer of pending tones with a
//! producer/consumer discipline, low-water-mark callback, and "forever tone"
//! semantics. `spec.md` §4.3.

use std::sync::{Condvar, Mutex};
use std::thread::ThreadId;

use crate::error::CwError;
use crate::tone::{SlopeMode, SlopeShape, Tone};

pub const DEFAULT_CAPACITY: usize = 3000;
pub const DEFAULT_HIGH_WATER_MARK: usize = 2900;
pub const MAX_CAPACITY: usize = 3000;

/// Queue busy/idle state. `Idle` implies the queue is empty, but the
/// converse does not hold: a queue can be momentarily empty while still
/// `Busy`, which is exactly the `EmptyButRecentlyActive` dequeue outcome
/// below — the generator is expected to write one trailing silent block
/// before the queue actually transitions to `Idle`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum QueueState {
    Idle,
    Busy,
}

/// Result of a dequeue attempt. The three-valued shape is load-bearing: the
/// generator's worker loop treats each variant differently (`spec.md`
/// §4.5's worker loop description).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DequeueResult {
    Dequeued(Tone),
    /// The queue just became empty. The caller should write one trailing
    /// silent block to flush the sink, then the queue transitions to
    /// `Idle`.
    EmptyButRecentlyActive,
    /// The queue is empty and has already been flushed; the caller should
    /// sleep until woken.
    Idle,
}

struct Inner {
    slots: Vec<Option<Tone>>,
    head: usize,
    tail: usize,
    len: usize,
    capacity: usize,
    state: QueueState,
    /// Set when the sole element at `head` is a `forever` tone that has
    /// been handed out by `dequeue` without being removed. The next
    /// `enqueue` overwrites it in place instead of appending.
    forever_pinned: bool,
    low_water_mark: usize,
    low_water_callback: Option<Box<dyn FnMut() + Send>>,
    /// Bumped on every head advance and on every Busy->Idle transition, so
    /// `wait_for_*` callers can use a condvar predicate that doesn't miss a
    /// wakeup that happened between their check and their wait.
    generation: u64,
    worker_thread: Option<ThreadId>,
}

impl Inner {
    fn new(capacity: usize, low_water_mark: usize) -> Self {
        Self {
            slots: vec![None; capacity],
            head: 0,
            tail: 0,
            len: 0,
            capacity,
            state: QueueState::Idle,
            forever_pinned: false,
            low_water_mark,
            low_water_callback: None,
            generation: 0,
            worker_thread: None,
        }
    }
}

/// Thread-safe bounded FIFO of pending tones. One [`Generator`](crate::generator::Generator)
/// owns exactly one `ToneQueue`.
pub struct ToneQueue {
    inner: Mutex<Inner>,
    condvar: Condvar,
}

impl ToneQueue {
    pub fn new() -> Self {
        Self::with_capacity(DEFAULT_CAPACITY, DEFAULT_HIGH_WATER_MARK)
            .expect("default capacity/high-water-mark are always valid")
    }

    pub fn with_capacity(capacity: usize, high_water_mark: usize) -> Result<Self, CwError> {
        validate_capacity(capacity, high_water_mark)?;
        Ok(Self {
            inner: Mutex::new(Inner::new(capacity, high_water_mark)),
            condvar: Condvar::new(),
        })
    }

    /// Record which thread runs the generator's worker loop, so `wait_for_*`
    /// can detect (and refuse) being called from that same thread — which
    /// would deadlock, since nothing else would ever signal the wake
    /// condition.
    pub fn set_worker_thread(&self, id: Option<ThreadId>) {
        self.inner.lock().unwrap().worker_thread = id;
    }

    fn guard_against_self_wait(&self, inner: &Inner) -> Result<(), CwError> {
        if inner.worker_thread == Some(std::thread::current().id()) {
            return Err(CwError::WakeSignalBlocked);
        }
        Ok(())
    }

    pub fn enqueue(&self, tone: Tone) -> Result<(), CwError> {
        if tone.duration_us == 0 {
            return Ok(());
        }
        let mut inner = self.inner.lock().unwrap();

        if inner.forever_pinned {
            // Replace the pinned forever tone in place; length is unchanged.
            inner.slots[inner.head] = Some(tone);
            inner.forever_pinned = false;
            inner.generation += 1;
            self.condvar.notify_all();
            return Ok(());
        }

        if inner.len == inner.capacity {
            return Err(CwError::FullQueue);
        }

        inner.slots[inner.tail] = Some(tone);
        inner.tail = (inner.tail + 1) % inner.capacity;
        inner.len += 1;

        let was_idle = inner.state == QueueState::Idle;
        inner.state = QueueState::Busy;
        inner.generation += 1;
        if was_idle {
            log::debug!("tone queue: idle -> busy, waking worker");
        }
        drop(inner);
        self.condvar.notify_all();
        Ok(())
    }

    /// Extend the most recently enqueued tone by `extra_us` if it is a
    /// silent, non-`forever` tone; otherwise enqueue a fresh silent tone of
    /// that length. Used to grow an already-queued inter-mark space into the
    /// end-of-character or end-of-word space that follows it, rather than
    /// appending a second silent entry right after the first.
    pub fn extend_last_silence(&self, extra_us: i32) -> Result<(), CwError> {
        if extra_us <= 0 {
            return Ok(());
        }
        let mut inner = self.inner.lock().unwrap();
        if inner.len > 0 && !inner.forever_pinned {
            let last = (inner.tail + inner.capacity - 1) % inner.capacity;
            if let Some(tone) = inner.slots[last].as_mut() {
                if tone.frequency_hz == 0 && !tone.forever {
                    tone.duration_us += extra_us;
                    return Ok(());
                }
            }
        }
        drop(inner);
        self.enqueue(Tone::new(0, extra_us, SlopeMode::NoSlopes, SlopeShape::Rectangular)?)
    }

    pub fn dequeue(&self) -> DequeueResult {
        let mut inner = self.inner.lock().unwrap();

        if inner.len == 0 {
            return if inner.state == QueueState::Busy {
                inner.state = QueueState::Idle;
                inner.generation += 1;
                drop(inner);
                self.condvar.notify_all();
                DequeueResult::EmptyButRecentlyActive
            } else {
                DequeueResult::Idle
            };
        }

        let head_tone = inner.slots[inner.head].expect("len > 0 implies a tone at head");
        if head_tone.forever && inner.len == 1 {
            inner.forever_pinned = true;
            return DequeueResult::Dequeued(head_tone);
        }

        inner.slots[inner.head] = None;
        inner.head = (inner.head + 1) % inner.capacity;
        inner.len -= 1;
        inner.generation += 1;

        let mut fire_callback = false;
        if inner.low_water_callback.is_some() {
            let level = inner.low_water_mark;
            let before = inner.len + 1;
            if before > level && inner.len <= level {
                fire_callback = true;
            }
        }

        // len==0 here leaves state as Busy on purpose: the *next* dequeue
        // call will observe it and return EmptyButRecentlyActive, giving
        // the generator one more chance to flush the sink with a trailing
        // silence block before the queue actually goes Idle.
        let cb = if fire_callback {
            inner.low_water_callback.take()
        } else {
            None
        };
        drop(inner);
        self.condvar.notify_all();

        if let (Some(mut cb), true) = (cb, fire_callback) {
            log::debug!("tone queue: low-water callback firing");
            cb();
            self.inner.lock().unwrap().low_water_callback = Some(cb);
        }

        DequeueResult::Dequeued(head_tone)
    }

    pub fn length(&self) -> usize {
        self.inner.lock().unwrap().len
    }

    pub fn capacity(&self) -> usize {
        self.inner.lock().unwrap().capacity
    }

    pub fn is_full(&self) -> bool {
        let inner = self.inner.lock().unwrap();
        inner.len == inner.capacity
    }

    pub fn is_busy(&self) -> bool {
        self.inner.lock().unwrap().state == QueueState::Busy
    }

    /// Atomically empty the queue. The worker observes
    /// [`DequeueResult::EmptyButRecentlyActive`] on its next dequeue and
    /// writes a final silence block before idling.
    pub fn flush(&self) {
        let mut inner = self.inner.lock().unwrap();
        for slot in inner.slots.iter_mut() {
            *slot = None;
        }
        inner.head = 0;
        inner.tail = 0;
        inner.len = 0;
        inner.forever_pinned = false;
        inner.generation += 1;
        drop(inner);
        self.condvar.notify_all();
    }

    /// Zero the queue and clear the low-water callback.
    pub fn reset(&self) {
        let mut inner = self.inner.lock().unwrap();
        for slot in inner.slots.iter_mut() {
            *slot = None;
        }
        inner.head = 0;
        inner.tail = 0;
        inner.len = 0;
        inner.forever_pinned = false;
        inner.low_water_callback = None;
        inner.state = QueueState::Idle;
        inner.generation += 1;
        drop(inner);
        self.condvar.notify_all();
    }

    pub fn set_capacity(&self, capacity: usize, high_water_mark: usize) -> Result<(), CwError> {
        validate_capacity(capacity, high_water_mark)?;
        let mut inner = self.inner.lock().unwrap();
        inner.slots = vec![None; capacity];
        inner.head = 0;
        inner.tail = 0;
        inner.len = 0;
        inner.capacity = capacity;
        inner.low_water_mark = high_water_mark;
        inner.state = QueueState::Idle;
        inner.forever_pinned = false;
        Ok(())
    }

    /// Register a callback fired (with the lock released) the first time,
    /// after a successful dequeue, that length transitions from `> level`
    /// to `<= level`. `0 <= level < capacity`.
    pub fn register_low_water_callback(
        &self,
        callback: Box<dyn FnMut() + Send>,
        level: usize,
    ) -> Result<(), CwError> {
        let mut inner = self.inner.lock().unwrap();
        if level >= inner.capacity {
            return Err(CwError::InvalidArgument(format!(
                "low water level {level} must be < capacity {}",
                inner.capacity
            )));
        }
        inner.low_water_mark = level;
        inner.low_water_callback = Some(callback);
        Ok(())
    }

    /// Block until there is work to do: state is `Busy` or length is
    /// nonzero. Used only by the generator's own worker thread, which is
    /// exactly the caller the other `wait_for_*` methods refuse (see
    /// [`Self::guard_against_self_wait`]) — the worker is the one thread
    /// that is *supposed* to wait here, since every enqueue from any other
    /// thread notifies this condvar.
    pub(crate) fn wait_for_work(&self) {
        let inner = self.inner.lock().unwrap();
        let _guard = self
            .condvar
            .wait_while(inner, |i| i.state == QueueState::Idle && i.len == 0)
            .unwrap();
    }

    /// Block until `head` advances or the queue becomes `Idle`.
    pub fn wait_for_tone(&self) -> Result<(), CwError> {
        let inner = self.inner.lock().unwrap();
        self.guard_against_self_wait(&inner)?;
        let start_gen = inner.generation;
        let start_idle = inner.state == QueueState::Idle;
        let _guard = self
            .condvar
            .wait_while(inner, |i| i.generation == start_gen && (i.state == QueueState::Idle) == start_idle)
            .unwrap();
        Ok(())
    }

    /// Block until the queue's state becomes `Idle`.
    pub fn wait_for_tone_queue(&self) -> Result<(), CwError> {
        let inner = self.inner.lock().unwrap();
        self.guard_against_self_wait(&inner)?;
        let _guard = self
            .condvar
            .wait_while(inner, |i| i.state != QueueState::Idle)
            .unwrap();
        Ok(())
    }

    /// Block until length is `<= level`.
    pub fn wait_for_level(&self, level: usize) -> Result<(), CwError> {
        let inner = self.inner.lock().unwrap();
        self.guard_against_self_wait(&inner)?;
        let _guard = self.condvar.wait_while(inner, |i| i.len > level).unwrap();
        Ok(())
    }
}

impl Default for ToneQueue {
    fn default() -> Self {
        Self::new()
    }
}

fn validate_capacity(capacity: usize, high_water_mark: usize) -> Result<(), CwError> {
    if capacity == 0 || capacity > MAX_CAPACITY {
        return Err(CwError::InvalidArgument(format!(
            "capacity {capacity} must be in (0, {MAX_CAPACITY}]"
        )));
    }
    if high_water_mark == 0 || high_water_mark > capacity {
        return Err(CwError::InvalidArgument(format!(
            "high water mark {high_water_mark} must be in (0, {capacity}]"
        )));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tone::{SlopeMode, SlopeShape};

    fn tone(duration_us: i32) -> Tone {
        Tone::new(800, duration_us, SlopeMode::NoSlopes, SlopeShape::Rectangular).unwrap()
    }

    #[test]
    fn enqueue_dequeue_round_trip() {
        let q = ToneQueue::new();
        q.enqueue(tone(1000)).unwrap();
        assert_eq!(q.length(), 1);
        match q.dequeue() {
            DequeueResult::Dequeued(t) => assert_eq!(t.duration_us, 1000),
            other => panic!("expected Dequeued, got {other:?}"),
        }
        assert_eq!(q.length(), 0);
    }

    #[test]
    fn zero_duration_tone_is_dropped_silently() {
        let q = ToneQueue::new();
        q.enqueue(tone(0)).unwrap();
        assert_eq!(q.length(), 0);
    }

    #[test]
    fn extend_last_silence_grows_the_trailing_silent_tone_in_place() {
        let q = ToneQueue::new();
        q.enqueue(tone(100_000)).unwrap();
        q.enqueue(Tone::new(0, 100_000, SlopeMode::NoSlopes, SlopeShape::Rectangular).unwrap())
            .unwrap();
        q.extend_last_silence(200_000).unwrap();
        assert_eq!(q.length(), 2);

        q.dequeue();
        match q.dequeue() {
            DequeueResult::Dequeued(t) => {
                assert_eq!(t.frequency_hz, 0);
                assert_eq!(t.duration_us, 300_000);
            }
            other => panic!("expected Dequeued, got {other:?}"),
        }
    }

    #[test]
    fn extend_last_silence_enqueues_fresh_when_tail_is_not_silent() {
        let q = ToneQueue::new();
        q.enqueue(tone(100_000)).unwrap();
        q.extend_last_silence(50_000).unwrap();
        assert_eq!(q.length(), 2);
    }

    #[test]
    fn full_queue_rejects_enqueue() {
        let q = ToneQueue::with_capacity(2, 1).unwrap();
        q.enqueue(tone(10)).unwrap();
        q.enqueue(tone(10)).unwrap();
        assert!(q.is_full());
        assert_eq!(q.enqueue(tone(10)), Err(CwError::FullQueue));
        assert_eq!(q.length(), 2);
    }

    #[test]
    fn dequeue_reports_empty_but_recently_active_then_idle() {
        let q = ToneQueue::new();
        q.enqueue(tone(10)).unwrap();
        assert!(matches!(q.dequeue(), DequeueResult::Dequeued(_)));
        assert!(matches!(q.dequeue(), DequeueResult::EmptyButRecentlyActive));
        assert!(matches!(q.dequeue(), DequeueResult::Idle));
    }

    #[test]
    fn forever_tone_is_returned_without_being_consumed() {
        let q = ToneQueue::new();
        q.enqueue(tone(10).forever()).unwrap();
        for _ in 0..3 {
            match q.dequeue() {
                DequeueResult::Dequeued(t) => assert!(t.forever),
                other => panic!("expected pinned forever tone, got {other:?}"),
            }
        }
        assert_eq!(q.length(), 1);
        // A successor replaces the pinned tone as the new head.
        q.enqueue(tone(20)).unwrap();
        assert_eq!(q.length(), 1);
        match q.dequeue() {
            DequeueResult::Dequeued(t) => assert_eq!(t.duration_us, 20),
            other => panic!("expected the replacement tone, got {other:?}"),
        }
    }

    #[test]
    fn low_water_callback_fires_once_per_crossing() {
        use std::sync::atomic::{AtomicUsize, Ordering};
        use std::sync::Arc;

        let q = ToneQueue::with_capacity(10, 3).unwrap();
        let fired = Arc::new(AtomicUsize::new(0));
        let fired_cb = fired.clone();
        q.register_low_water_callback(Box::new(move || {
            fired_cb.fetch_add(1, Ordering::SeqCst);
        }), 3)
        .unwrap();

        for _ in 0..5 {
            q.enqueue(tone(10)).unwrap();
        }
        assert_eq!(q.length(), 5);

        // 5 -> 4 -> 3: callback fires exactly once, on the dequeue that
        // takes length from 4 to 3 (len 4 -> 3 crosses level 3: 4>3, 3<=3).
        q.dequeue();
        assert_eq!(fired.load(Ordering::SeqCst), 0);
        q.dequeue();
        assert_eq!(fired.load(Ordering::SeqCst), 1);

        // Continued dequeues to 2, 1, 0 must not call it again.
        q.dequeue();
        q.dequeue();
        q.dequeue();
        assert_eq!(fired.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn flush_empties_and_worker_sees_recently_active_once() {
        let q = ToneQueue::new();
        q.enqueue(tone(10)).unwrap();
        q.enqueue(tone(10)).unwrap();
        q.flush();
        assert_eq!(q.length(), 0);
        assert!(matches!(q.dequeue(), DequeueResult::EmptyButRecentlyActive));
    }

    #[test]
    fn set_capacity_validates_bounds() {
        let q = ToneQueue::new();
        assert!(q.set_capacity(0, 0).is_err());
        assert!(q.set_capacity(10, 11).is_err());
        assert!(q.set_capacity(10, 5).is_ok());
        assert_eq!(q.capacity(), 10);
    }

    #[test]
    fn wait_for_tone_unblocks_after_enqueue() {
        use std::sync::Arc;
        use std::thread;
        use std::time::Duration;

        let q = Arc::new(ToneQueue::new());
        let q2 = q.clone();
        let handle = thread::spawn(move || {
            q2.wait_for_tone().unwrap();
        });
        thread::sleep(Duration::from_millis(20));
        q.enqueue(tone(1000)).unwrap();
        handle.join().unwrap();
    }

    #[test]
    fn wait_from_worker_thread_is_refused() {
        let q = ToneQueue::new();
        q.set_worker_thread(Some(std::thread::current().id()));
        assert_eq!(q.wait_for_tone(), Err(CwError::WakeSignalBlocked));
        assert_eq!(q.wait_for_tone_queue(), Err(CwError::WakeSignalBlocked));
        assert_eq!(q.wait_for_level(0), Err(CwError::WakeSignalBlocked));
    }
}
