use std::cell::Cell;
use std::cmp::{Ordering, Reverse};
use std::collections::BinaryHeap;
use std::rc::Rc;
use std::time::{Duration, Instant};

/// Monotonic time as seen by the runner, measured from an arbitrary origin.
pub trait Clock {
    fn now(&self) -> Duration;
}

pub struct SystemClock {
    origin: Instant,
}

impl SystemClock {
    pub fn new() -> SystemClock {
        SystemClock {
            origin: Instant::now(),
        }
    }
}

impl Clock for SystemClock {
    fn now(&self) -> Duration {
        Instant::now() - self.origin
    }
}

/// Clock that only moves when told to. Clones share the same time.
#[derive(Clone, Default)]
pub struct ManualClock {
    now: Rc<Cell<Duration>>,
}

impl ManualClock {
    pub fn new() -> ManualClock {
        ManualClock::default()
    }

    pub fn advance(&self, by: Duration) {
        self.now.set(self.now.get() + by);
    }
}

impl Clock for ManualClock {
    fn now(&self) -> Duration {
        self.now.get()
    }
}

struct Entry<T> {
    due: Duration,
    seq: u64,
    item: T,
}

impl<T> PartialEq for Entry<T> {
    fn eq(&self, other: &Self) -> bool {
        self.due == other.due && self.seq == other.seq
    }
}

impl<T> Eq for Entry<T> {}

impl<T> PartialOrd for Entry<T> {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl<T> Ord for Entry<T> {
    fn cmp(&self, other: &Self) -> Ordering {
        (self.due, self.seq).cmp(&(other.due, other.seq))
    }
}

/// Deadline ordered one-shot timers. Timers with the same deadline fire in
/// the order they were scheduled.
pub struct TimerQueue<T> {
    heap: BinaryHeap<Reverse<Entry<T>>>,
    seq: u64,
}

impl<T> TimerQueue<T> {
    pub fn new() -> TimerQueue<T> {
        TimerQueue {
            heap: BinaryHeap::new(),
            seq: 0,
        }
    }

    pub fn schedule(&mut self, now: Duration, delay: Duration, item: T) {
        let due = now.checked_add(delay).unwrap_or(Duration::MAX);
        self.seq += 1;
        self.heap.push(Reverse(Entry {
            due,
            seq: self.seq,
            item,
        }));
    }

    pub fn next_due(&self) -> Option<Duration> {
        self.heap.peek().map(|Reverse(entry)| entry.due)
    }

    pub fn pop_due(&mut self, now: Duration) -> Option<T> {
        match self.heap.peek() {
            Some(Reverse(entry)) if entry.due <= now => {
                self.heap.pop().map(|Reverse(entry)| entry.item)
            }
            _ => None,
        }
    }

    /// Keeps only the timers whose item satisfies `keep`.
    pub fn retain(&mut self, mut keep: impl FnMut(&T) -> bool) {
        self.heap.retain(|Reverse(entry)| keep(&entry.item));
    }

    pub fn len(&self) -> usize {
        self.heap.len()
    }

    pub fn is_empty(&self) -> bool {
        self.heap.is_empty()
    }
}

impl<T> Default for TimerQueue<T> {
    fn default() -> Self {
        TimerQueue::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ms(v: u64) -> Duration {
        Duration::from_millis(v)
    }

    #[test]
    fn fires_in_deadline_order() {
        let mut timers = TimerQueue::new();
        timers.schedule(ms(0), ms(100), "late");
        timers.schedule(ms(0), ms(50), "early");
        timers.schedule(ms(10), ms(40), "same deadline, scheduled later");

        assert_eq!(timers.next_due(), Some(ms(50)));
        assert_eq!(timers.pop_due(ms(49)), None);
        assert_eq!(timers.pop_due(ms(50)), Some("early"));
        assert_eq!(timers.pop_due(ms(50)), Some("same deadline, scheduled later"));
        assert_eq!(timers.pop_due(ms(99)), None);
        assert_eq!(timers.pop_due(ms(1000)), Some("late"));
        assert!(timers.is_empty());
    }

    #[test]
    fn huge_delays_saturate() {
        let mut timers = TimerQueue::new();
        timers.schedule(ms(5), Duration::MAX, ());
        assert_eq!(timers.next_due(), Some(Duration::MAX));
        assert_eq!(timers.len(), 1);
    }

    #[test]
    fn retain_drops_unwanted_timers() {
        let mut timers = TimerQueue::new();
        timers.schedule(ms(0), ms(10), 1);
        timers.schedule(ms(0), ms(20), 2);
        timers.schedule(ms(0), ms(30), 1);

        timers.retain(|id| *id == 2);
        assert_eq!(timers.len(), 1);
        assert_eq!(timers.next_due(), Some(ms(20)));
        assert_eq!(timers.pop_due(ms(100)), Some(2));
    }

    #[test]
    fn manual_clock_is_shared() {
        let clock = ManualClock::new();
        let other = clock.clone();
        clock.advance(ms(30));
        assert_eq!(other.now(), ms(30));
    }

    #[test]
    fn system_clock_moves_forward() {
        let clock = SystemClock::new();
        let before = clock.now();
        std::thread::sleep(ms(2));
        assert!(clock.now() > before);
    }
}
