//! Central backlog between producers and the dispatcher.
//!
//! A single FIFO queue guarded by a mutex. Producers push from any thread;
//! only the dispatcher pops. The queue is unbounded unless a capacity is
//! configured, in which case an [`OverflowPolicy`] decides what happens when
//! it fills up.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use parking_lot::{Condvar, Mutex};
use serde::{Deserialize, Serialize};

use crate::diagnostics::Diagnostics;
use crate::event::Event;
use crate::level::Level;

/// Minimum time between two overflow warnings.
pub const OVERFLOW_WARNING_INTERVAL: Duration = Duration::from_secs(30);

/// Behavior once the backlog holds `capacity` events.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OverflowPolicy {
    /// Keep queueing; the capacity is only a warning threshold
    #[default]
    Grow,
    /// Producers wait until the dispatcher makes room
    Block,
    /// Discard the oldest queued event to make room
    DropOldest,
    /// Discard the event being pushed
    DropNewest,
}

/// Result of a push.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PushOutcome {
    Queued,
    /// Queued after discarding the oldest event
    Displaced,
    /// Discarded because the backlog was full
    Rejected,
    /// Discarded because the backlog no longer accepts events
    Sealed,
}

struct Queue {
    events: VecDeque<Event>,
    sealed: bool,
    last_warning: Option<Instant>,
}

/// Multi-producer, single-consumer hand-off queue.
pub struct Backlog {
    queue: Mutex<Queue>,
    ready: Condvar,
    space: Condvar,
    capacity: Option<usize>,
    policy: OverflowPolicy,
    dropped: AtomicU64,
    diagnostics: Arc<Diagnostics>,
}

impl Backlog {
    /// Unbounded backlog.
    pub fn unbounded(diagnostics: Arc<Diagnostics>) -> Self {
        Self::new(None, OverflowPolicy::Grow, diagnostics)
    }

    pub fn new(
        capacity: Option<usize>,
        policy: OverflowPolicy,
        diagnostics: Arc<Diagnostics>,
    ) -> Self {
        Self {
            queue: Mutex::new(Queue {
                events: VecDeque::new(),
                sealed: false,
                last_warning: None,
            }),
            ready: Condvar::new(),
            space: Condvar::new(),
            capacity,
            policy,
            dropped: AtomicU64::new(0),
            diagnostics,
        }
    }

    /// Hand an event to the dispatcher.
    ///
    /// Only blocks under [`OverflowPolicy::Block`] with a full backlog.
    pub fn push(&self, event: Event) -> PushOutcome {
        let mut queue = self.queue.lock();
        if queue.sealed {
            self.dropped.fetch_add(1, Ordering::Relaxed);
            return PushOutcome::Sealed;
        }

        let mut outcome = PushOutcome::Queued;
        let mut warning = None;

        if let Some(capacity) = self.capacity {
            if queue.events.len() >= capacity {
                match self.policy {
                    OverflowPolicy::Grow => {
                        warning = self.overflow_warning(&mut queue, capacity, "growing past it");
                    }
                    OverflowPolicy::Block => {
                        while queue.events.len() >= capacity && !queue.sealed {
                            self.space.wait(&mut queue);
                        }
                        if queue.sealed {
                            self.dropped.fetch_add(1, Ordering::Relaxed);
                            return PushOutcome::Sealed;
                        }
                    }
                    OverflowPolicy::DropOldest => {
                        queue.events.pop_front();
                        self.dropped.fetch_add(1, Ordering::Relaxed);
                        outcome = PushOutcome::Displaced;
                        warning =
                            self.overflow_warning(&mut queue, capacity, "dropping oldest events");
                    }
                    OverflowPolicy::DropNewest => {
                        self.dropped.fetch_add(1, Ordering::Relaxed);
                        let warning =
                            self.overflow_warning(&mut queue, capacity, "dropping new events");
                        drop(queue);
                        if let Some(message) = warning {
                            self.diagnostics.report(Level::Warn, message);
                        }
                        return PushOutcome::Rejected;
                    }
                }
            }
        }

        queue.events.push_back(event);
        drop(queue);
        self.ready.notify_one();

        if let Some(message) = warning {
            self.diagnostics.report(Level::Warn, message);
        }
        outcome
    }

    /// Next event, blocking until one arrives.
    ///
    /// Returns `None` once the backlog is sealed and empty.
    pub fn pop(&self) -> Option<Event> {
        let mut queue = self.queue.lock();
        loop {
            if let Some(event) = queue.events.pop_front() {
                drop(queue);
                self.space.notify_one();
                return Some(event);
            }
            if queue.sealed {
                return None;
            }
            self.ready.wait(&mut queue);
        }
    }

    /// Next event if one is queued.
    pub fn try_pop(&self) -> Option<Event> {
        let event = self.queue.lock().events.pop_front();
        if event.is_some() {
            self.space.notify_one();
        }
        event
    }

    /// Stop accepting events. Queued events stay available to `pop`.
    pub fn seal(&self) {
        self.queue.lock().sealed = true;
        self.ready.notify_all();
        self.space.notify_all();
    }

    pub fn is_sealed(&self) -> bool {
        self.queue.lock().sealed
    }

    pub fn len(&self) -> usize {
        self.queue.lock().events.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn capacity(&self) -> Option<usize> {
        self.capacity
    }

    pub fn policy(&self) -> OverflowPolicy {
        self.policy
    }

    /// Events discarded by the overflow policy or after sealing.
    pub fn dropped(&self) -> u64 {
        self.dropped.load(Ordering::Relaxed)
    }

    /// Warning text if one is due; the caller reports it after unlocking.
    fn overflow_warning(
        &self,
        queue: &mut Queue,
        capacity: usize,
        action: &str,
    ) -> Option<String> {
        let now = Instant::now();
        let due = queue
            .last_warning
            .map_or(true, |last| now.duration_since(last) >= OVERFLOW_WARNING_INTERVAL);
        if !due {
            return None;
        }
        queue.last_warning = Some(now);
        Some(format!(
            "backlog reached capacity {} ({:?} policy), {}; {} events dropped so far",
            capacity,
            self.policy,
            action,
            self.dropped()
        ))
    }
}

impl std::fmt::Debug for Backlog {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Backlog")
            .field("len", &self.len())
            .field("capacity", &self.capacity)
            .field("policy", &self.policy)
            .field("dropped", &self.dropped())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::diagnostics::CaptureBuffer;
    use crate::event::Message;
    use std::thread;

    fn event(text: &str) -> Event {
        Event::new(Level::Info, Arc::from("svc"), Message::from(text))
    }

    fn text(event: &Event) -> String {
        event.message().render().into_owned()
    }

    fn quiet() -> Arc<Diagnostics> {
        Arc::new(Diagnostics::with_writer(Box::new(std::io::sink())))
    }

    #[test]
    fn test_fifo_order() {
        let backlog = Backlog::unbounded(quiet());
        for i in 0..10 {
            assert_eq!(backlog.push(event(&i.to_string())), PushOutcome::Queued);
        }
        let drained: Vec<_> = std::iter::from_fn(|| backlog.try_pop()).map(|e| text(&e)).collect();
        let expected: Vec<_> = (0..10).map(|i| i.to_string()).collect();
        assert_eq!(drained, expected);
    }

    #[test]
    fn test_sealed_backlog_drains_then_ends() {
        let backlog = Backlog::unbounded(quiet());
        backlog.push(event("a"));
        backlog.push(event("b"));
        backlog.seal();

        assert_eq!(backlog.push(event("late")), PushOutcome::Sealed);
        assert_eq!(text(&backlog.pop().unwrap()), "a");
        assert_eq!(text(&backlog.pop().unwrap()), "b");
        assert!(backlog.pop().is_none());
        assert_eq!(backlog.dropped(), 1);
    }

    #[test]
    fn test_pop_blocks_until_push() {
        let backlog = Arc::new(Backlog::unbounded(quiet()));
        let consumer = {
            let backlog = Arc::clone(&backlog);
            thread::spawn(move || backlog.pop().map(|e| text(&e)))
        };
        thread::sleep(Duration::from_millis(20));
        backlog.push(event("wake"));
        assert_eq!(consumer.join().unwrap().as_deref(), Some("wake"));
    }

    #[test]
    fn test_seal_wakes_blocked_consumer() {
        let backlog = Arc::new(Backlog::unbounded(quiet()));
        let consumer = {
            let backlog = Arc::clone(&backlog);
            thread::spawn(move || backlog.pop().is_none())
        };
        thread::sleep(Duration::from_millis(20));
        backlog.seal();
        assert!(consumer.join().unwrap());
    }

    #[test]
    fn test_grow_policy_keeps_everything_and_warns_once() {
        let buffer = CaptureBuffer::new();
        let diagnostics = Arc::new(Diagnostics::with_writer(Box::new(buffer.clone())));
        let backlog = Backlog::new(Some(2), OverflowPolicy::Grow, Arc::clone(&diagnostics));

        for i in 0..6 {
            assert_eq!(backlog.push(event(&i.to_string())), PushOutcome::Queued);
        }

        assert_eq!(backlog.len(), 6);
        assert_eq!(backlog.dropped(), 0);
        assert_eq!(diagnostics.reported(), 1);
        assert!(buffer.contents().contains("backlog reached capacity 2"));
    }

    #[test]
    fn test_drop_oldest_policy() {
        let backlog = Backlog::new(Some(3), OverflowPolicy::DropOldest, quiet());
        for i in 0..5 {
            backlog.push(event(&i.to_string()));
        }
        assert_eq!(backlog.push(event("5")), PushOutcome::Displaced);

        let drained: Vec<_> = std::iter::from_fn(|| backlog.try_pop()).map(|e| text(&e)).collect();
        assert_eq!(drained, vec!["3", "4", "5"]);
        assert_eq!(backlog.dropped(), 3);
    }

    #[test]
    fn test_drop_newest_policy() {
        let backlog = Backlog::new(Some(3), OverflowPolicy::DropNewest, quiet());
        for i in 0..3 {
            assert_eq!(backlog.push(event(&i.to_string())), PushOutcome::Queued);
        }
        assert_eq!(backlog.push(event("3")), PushOutcome::Rejected);
        assert_eq!(backlog.push(event("4")), PushOutcome::Rejected);

        let drained: Vec<_> = std::iter::from_fn(|| backlog.try_pop()).map(|e| text(&e)).collect();
        assert_eq!(drained, vec!["0", "1", "2"]);
        assert_eq!(backlog.dropped(), 2);
    }

    #[test]
    fn test_block_policy_waits_for_space() {
        let backlog = Arc::new(Backlog::new(Some(1), OverflowPolicy::Block, quiet()));
        backlog.push(event("first"));

        let producer = {
            let backlog = Arc::clone(&backlog);
            thread::spawn(move || backlog.push(event("second")))
        };

        thread::sleep(Duration::from_millis(30));
        assert!(!producer.is_finished());
        assert_eq!(backlog.len(), 1);

        assert_eq!(text(&backlog.pop().unwrap()), "first");
        assert_eq!(producer.join().unwrap(), PushOutcome::Queued);
        assert_eq!(text(&backlog.pop().unwrap()), "second");
        assert_eq!(backlog.dropped(), 0);
    }

    #[test]
    fn test_block_policy_released_by_seal() {
        let backlog = Arc::new(Backlog::new(Some(1), OverflowPolicy::Block, quiet()));
        backlog.push(event("first"));

        let producer = {
            let backlog = Arc::clone(&backlog);
            thread::spawn(move || backlog.push(event("second")))
        };
        thread::sleep(Duration::from_millis(20));
        backlog.seal();

        assert_eq!(producer.join().unwrap(), PushOutcome::Sealed);
        assert_eq!(text(&backlog.pop().unwrap()), "first");
        assert!(backlog.pop().is_none());
    }

    #[test]
    fn test_per_producer_order_with_many_threads() {
        let backlog = Arc::new(Backlog::unbounded(quiet()));
        let handles: Vec<_> = (0..4)
            .map(|p| {
                let backlog = Arc::clone(&backlog);
                thread::spawn(move || {
                    for i in 0..250 {
                        backlog.push(event(&format!("{}:{}", p, i)));
                    }
                })
            })
            .collect();
        for handle in handles {
            handle.join().unwrap();
        }

        let mut last = [None::<u32>; 4];
        while let Some(e) = backlog.try_pop() {
            let body = text(&e);
            let (p, i) = body.split_once(':').unwrap();
            let (p, i): (usize, u32) = (p.parse().unwrap(), i.parse().unwrap());
            assert!(last[p].map_or(true, |prev| prev < i));
            last[p] = Some(i);
        }
        assert!(last.iter().all(|l| *l == Some(249)));
    }
}
