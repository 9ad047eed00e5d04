//! Timers for lightweight tasks
//!
//! Each executor owns a [`TimerWheel`]. A [`Sleep`] future registers its
//! deadline and waker with the wheel of the carrier it is polled on and
//! returns `Pending`; the carrier keeps running other tasks and fires the
//! waker once the deadline has passed. The suspension therefore parks the
//! task, never the carrier thread.
//!
//! ```rust,no_run
//! use rust_vtasks::timer;
//! use std::time::Duration;
//!
//! rust_vtasks::block_on(async {
//!     timer::sleep(Duration::from_millis(50)).await;
//! });
//! ```

use std::collections::{BTreeSet, HashMap, VecDeque};
use std::sync::atomic::{AtomicU64, Ordering};
use std::task::Waker;
use std::time::{Duration, Instant};

pub mod sleep;

pub use sleep::Sleep;

/// Sleep for the given duration
pub async fn sleep(duration: Duration) {
    Sleep::new(duration).await
}

static TIMER_COUNTER: AtomicU64 = AtomicU64::new(1);

/// A unique identifier for a timer
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct TimerId(u64);

impl TimerId {
    /// Generates a new unique TimerId
    pub fn new() -> Self {
        TimerId(TIMER_COUNTER.fetch_add(1, Ordering::Relaxed))
    }
}

impl Default for TimerId {
    fn default() -> Self {
        Self::new()
    }
}

/// A scheduled wakeup
struct Entry {
    id: TimerId,
    deadline: Instant,
    waker: Waker,
}

/// Hashed timer wheel
///
/// Timers hash into `num_slots` buckets of `resolution_ms` each. A slot may
/// hold entries from several rotations; an entry only fires once its own
/// deadline has passed, so timers further out than one rotation stay put
/// until their turn comes around.
pub struct TimerWheel {
    slots: Vec<VecDeque<Entry>>,
    resolution_ms: u64,
    num_slots: usize,
    /// Tick the wheel has been processed up to (inclusive on the next pass)
    current_tick: u64,
    start_time: Instant,
    /// Slot and deadline of every pending timer
    index: HashMap<TimerId, (usize, Instant)>,
    /// Pending timers ordered by deadline
    deadlines: BTreeSet<(Instant, TimerId)>,
}

impl Default for TimerWheel {
    fn default() -> Self {
        Self::new(
            crate::config::TIMER_WHEEL_SLOTS,
            crate::config::TIMER_RESOLUTION_MS,
        )
    }
}

impl TimerWheel {
    /// Creates a new TimerWheel with the specified number of slots and resolution
    pub fn new(num_slots: usize, resolution_ms: u64) -> Self {
        let num_slots = num_slots.max(1);
        let mut slots = Vec::with_capacity(num_slots);
        slots.resize_with(num_slots, VecDeque::new);

        Self {
            slots,
            resolution_ms: resolution_ms.max(1),
            num_slots,
            current_tick: 0,
            start_time: Instant::now(),
            index: HashMap::new(),
            deadlines: BTreeSet::new(),
        }
    }

    /// Schedules `waker` to be woken once `at` has passed
    ///
    /// Returns a TimerId that can be used to cancel the timer
    pub fn schedule(&mut self, at: Instant, waker: Waker) -> TimerId {
        let id = TimerId::new();
        let tick = self.tick_of(at).max(self.current_tick);
        let slot_index = (tick % self.num_slots as u64) as usize;

        self.slots[slot_index].push_back(Entry {
            id,
            deadline: at,
            waker,
        });
        self.index.insert(id, (slot_index, at));
        self.deadlines.insert((at, id));

        id
    }

    /// Attempts to cancel a timer with the given ID
    ///
    /// Returns true if the timer was found and cancelled, false otherwise
    pub fn cancel(&mut self, id: TimerId) -> bool {
        let Some((slot_index, deadline)) = self.index.remove(&id) else {
            return false;
        };
        self.deadlines.remove(&(deadline, id));
        let slot = &mut self.slots[slot_index];
        match slot.iter().position(|entry| entry.id == id) {
            Some(pos) => {
                slot.remove(pos);
                true
            }
            None => false,
        }
    }

    /// Expires all timers whose deadline is at or before `now`
    ///
    /// Expired timer wakers are moved to the provided ready vector. Returns
    /// the number of timers that fired.
    pub fn expire(&mut self, now: Instant, ready: &mut Vec<Waker>) -> usize {
        let target_tick = self.tick_of(now);
        if target_tick < self.current_tick {
            return 0;
        }

        let span = target_tick - self.current_tick + 1;
        let visits = span.min(self.num_slots as u64);
        let before = ready.len();

        for step in 0..visits {
            let slot_index = ((self.current_tick + step) % self.num_slots as u64) as usize;
            let slot = &mut self.slots[slot_index];

            let mut remaining = VecDeque::with_capacity(slot.len());
            while let Some(entry) = slot.pop_front() {
                if entry.deadline <= now {
                    self.index.remove(&entry.id);
                    self.deadlines.remove(&(entry.deadline, entry.id));
                    ready.push(entry.waker);
                } else {
                    remaining.push_back(entry);
                }
            }
            *slot = remaining;
        }

        // Stay on the current tick: entries later in this millisecond are
        // still waiting in its slot.
        self.current_tick = target_tick;
        ready.len() - before
    }

    /// Earliest pending deadline, if any timer is scheduled
    pub fn next_deadline(&self) -> Option<Instant> {
        self.deadlines.first().map(|(deadline, _)| *deadline)
    }

    /// Returns the number of pending timers across all slots
    pub fn pending_count(&self) -> usize {
        self.index.len()
    }

    fn tick_of(&self, at: Instant) -> u64 {
        let elapsed = at.saturating_duration_since(self.start_time);
        elapsed.as_millis() as u64 / self.resolution_ms
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::task::Wake;
    use std::time::Duration;

    struct TestWaker;

    impl Wake for TestWaker {
        fn wake(self: Arc<Self>) {}
    }

    fn create_test_waker() -> Waker {
        Arc::new(TestWaker).into()
    }

    #[test]
    fn test_timer_wheel_creation() {
        let wheel = TimerWheel::new(64, 10);
        assert_eq!(wheel.num_slots, 64);
        assert_eq!(wheel.resolution_ms, 10);
        assert_eq!(wheel.current_tick, 0);
        assert_eq!(wheel.pending_count(), 0);
        assert!(wheel.next_deadline().is_none());
    }

    #[test]
    fn test_timer_scheduling() {
        let mut wheel = TimerWheel::new(64, 1);
        let future_time = Instant::now() + Duration::from_millis(50);

        let timer_id = wheel.schedule(future_time, create_test_waker());
        let timer_id2 = wheel.schedule(future_time + Duration::from_millis(10), create_test_waker());

        assert_eq!(wheel.pending_count(), 2);
        assert_ne!(timer_id, timer_id2);
        assert_eq!(wheel.next_deadline(), Some(future_time));
    }

    #[test]
    fn test_timer_cancellation() {
        let mut wheel = TimerWheel::new(64, 1);
        let future_time = Instant::now() + Duration::from_millis(50);

        let timer_id = wheel.schedule(future_time, create_test_waker());
        assert!(wheel.cancel(timer_id));
        assert_eq!(wheel.pending_count(), 0);

        // Cancelling again should return false
        assert!(!wheel.cancel(timer_id));

        // A cancelled timer never fires
        let mut ready = Vec::new();
        wheel.expire(future_time + Duration::from_millis(100), &mut ready);
        assert!(ready.is_empty());
    }

    #[test]
    fn test_next_deadline_tracks_cancel_and_expire() {
        let mut wheel = TimerWheel::new(64, 1);
        let base = wheel.start_time;
        let early = base + Duration::from_millis(5);
        let middle = base + Duration::from_millis(20);
        let late = base + Duration::from_secs(30);

        let early_id = wheel.schedule(early, create_test_waker());
        wheel.schedule(late, create_test_waker());
        wheel.schedule(middle, create_test_waker());
        assert_eq!(wheel.next_deadline(), Some(early));

        assert!(wheel.cancel(early_id));
        assert_eq!(wheel.next_deadline(), Some(middle));

        let mut ready = Vec::new();
        assert_eq!(wheel.expire(middle, &mut ready), 1);
        assert_eq!(wheel.next_deadline(), Some(late));
        assert_eq!(wheel.pending_count(), 1);
    }

    #[test]
    fn test_timer_expiration() {
        let mut wheel = TimerWheel::new(64, 1);
        let now = Instant::now();

        wheel.schedule(now, create_test_waker());

        let mut ready = Vec::new();
        assert_eq!(wheel.expire(now + Duration::from_millis(5), &mut ready), 1);
        assert_eq!(ready.len(), 1);
        assert_eq!(wheel.pending_count(), 0);
    }

    #[test]
    fn test_timer_wheel_advance() {
        let mut wheel = TimerWheel::new(10, 1);
        let now = wheel.start_time;

        wheel.schedule(now + Duration::from_millis(1), create_test_waker());
        wheel.schedule(now + Duration::from_millis(2), create_test_waker());
        wheel.schedule(now + Duration::from_millis(5), create_test_waker());

        let mut ready = Vec::new();
        wheel.expire(now + Duration::from_millis(3), &mut ready);
        assert_eq!(ready.len(), 2);
        assert_eq!(wheel.pending_count(), 1);

        ready.clear();
        wheel.expire(now + Duration::from_millis(6), &mut ready);
        assert_eq!(ready.len(), 1);
        assert_eq!(wheel.pending_count(), 0);
    }

    #[test]
    fn test_timer_wheel_wrapping() {
        let mut wheel = TimerWheel::new(4, 1);
        let now = wheel.start_time;

        for i in 0..8u64 {
            wheel.schedule(now + Duration::from_millis(i + 1), create_test_waker());
        }
        assert_eq!(wheel.pending_count(), 8);

        let mut ready = Vec::new();
        wheel.expire(now + Duration::from_millis(20), &mut ready);

        assert_eq!(ready.len(), 8);
        assert_eq!(wheel.pending_count(), 0);
    }

    #[test]
    fn test_far_timer_does_not_fire_on_earlier_rotation() {
        // 4 slots of 1ms: a 10ms timer shares a slot with ticks 2 and 6
        let mut wheel = TimerWheel::new(4, 1);
        let now = wheel.start_time;
        wheel.schedule(now + Duration::from_millis(10), create_test_waker());

        let mut ready = Vec::new();
        wheel.expire(now + Duration::from_millis(3), &mut ready);
        wheel.expire(now + Duration::from_millis(7), &mut ready);
        assert!(ready.is_empty());
        assert_eq!(wheel.pending_count(), 1);

        wheel.expire(now + Duration::from_millis(10), &mut ready);
        assert_eq!(ready.len(), 1);
    }

    #[test]
    fn test_sub_tick_deadline_waits_for_deadline() {
        let mut wheel = TimerWheel::new(16, 10);
        let now = wheel.start_time;
        wheel.schedule(now + Duration::from_millis(15), create_test_waker());

        let mut ready = Vec::new();
        // Same 10ms tick, deadline not reached yet
        wheel.expire(now + Duration::from_millis(12), &mut ready);
        assert!(ready.is_empty());

        wheel.expire(now + Duration::from_millis(16), &mut ready);
        assert_eq!(ready.len(), 1);
    }

    #[test]
    fn test_timer_id_uniqueness() {
        let id1 = TimerId::new();
        let id2 = TimerId::new();
        assert_ne!(id1, id2);
    }
}
