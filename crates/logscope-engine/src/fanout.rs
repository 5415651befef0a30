//! Listener registration and notification batching.
//!
//! A source owns one [`ListenerFanout`]. The producing side reports how many
//! rows exist (`on_read`), retractions (`invalidate`) and clears (`reset`);
//! the fanout turns those into per-listener [`LogModification`] callbacks,
//! coalescing appends so no listener is invoked more often than its wait
//! window or with more lines than its batch size allows. Removals and resets
//! are never coalesced.

use std::sync::Arc;
use std::time::{Duration, Instant};

use parking_lot::Mutex;

use logscope_types::LogModification;

use crate::source::{ListenerId, LogSourceListener};

struct Registration {
    id: ListenerId,
    listener: Arc<dyn LogSourceListener>,
    max_wait: Duration,
    max_batch: usize,
    /// Rows reported to this listener via `Appended` so far.
    reported: usize,
    last_delivery: Instant,
}

impl Registration {
    /// Push appends out when the batch is full, the wait window elapsed, or
    /// `force` is set. Chunks never exceed `max_batch`.
    fn deliver_appends(&mut self, available: usize, force: bool) {
        let mut pending = available.saturating_sub(self.reported);
        if pending == 0 {
            return;
        }
        let window_open =
            pending >= self.max_batch || self.last_delivery.elapsed() >= self.max_wait;
        if !force && !window_open {
            return;
        }
        let chunk = self.max_batch.max(1);
        while pending > 0 {
            let count = pending.min(chunk);
            self.listener
                .on_log_modified(LogModification::appended(self.reported, count));
            self.reported += count;
            pending -= count;
        }
        self.last_delivery = Instant::now();
    }
}

struct FanoutInner {
    registrations: Vec<Registration>,
    next_id: ListenerId,
    /// Rows most recently reported by the producer.
    available: usize,
}

/// Fans source modifications out to registered listeners.
pub struct ListenerFanout {
    inner: Mutex<FanoutInner>,
}

impl Default for ListenerFanout {
    fn default() -> Self {
        Self::new()
    }
}

impl ListenerFanout {
    pub fn new() -> Self {
        Self {
            inner: Mutex::new(FanoutInner {
                registrations: Vec::new(),
                next_id: 0,
                available: 0,
            }),
        }
    }

    /// Register a listener. It is immediately primed with `Reset` followed
    /// by the rows the producer has already reported, so late subscribers
    /// catch up without waiting for the next report.
    pub fn add(
        &self,
        listener: Arc<dyn LogSourceListener>,
        max_wait: Duration,
        max_batch: usize,
    ) -> ListenerId {
        let mut inner = self.inner.lock();
        let id = inner.next_id;
        inner.next_id += 1;
        listener.on_log_modified(LogModification::Reset);
        let mut registration = Registration {
            id,
            listener,
            max_wait,
            max_batch,
            reported: 0,
            last_delivery: Instant::now(),
        };
        registration.deliver_appends(inner.available, true);
        inner.registrations.push(registration);
        id
    }

    /// Drop a registration. Unknown ids are ignored.
    pub fn remove(&self, id: ListenerId) {
        self.inner.lock().registrations.retain(|r| r.id != id);
    }

    pub fn listener_count(&self) -> usize {
        self.inner.lock().registrations.len()
    }

    /// Report that `count` rows now exist; listeners receive the delta as
    /// coalesced `Appended` callbacks.
    pub fn on_read(&self, count: usize) {
        let mut inner = self.inner.lock();
        inner.available = count;
        for registration in &mut inner.registrations {
            registration.deliver_appends(count, false);
        }
    }

    /// Retract rows `[first_invalid, first_invalid + count)`. Delivered
    /// immediately to every listener that has seen past the cut.
    pub fn invalidate(&self, first_invalid: usize, count: usize) {
        if count == 0 {
            return;
        }
        let mut inner = self.inner.lock();
        inner.available = inner.available.min(first_invalid);
        for registration in &mut inner.registrations {
            if registration.reported > first_invalid {
                // flush nothing: rows past the cut are gone, rows before it
                // were already reported
                registration
                    .listener
                    .on_log_modified(LogModification::removed(
                        first_invalid,
                        registration.reported - first_invalid,
                    ));
                registration.reported = first_invalid;
            }
        }
    }

    /// Clear all rows. Delivered immediately.
    pub fn reset(&self) {
        let mut inner = self.inner.lock();
        inner.available = 0;
        for registration in &mut inner.registrations {
            registration.listener.on_log_modified(LogModification::Reset);
            registration.reported = 0;
            registration.last_delivery = Instant::now();
        }
    }

    /// Force out any coalesced appends still pending, regardless of batch
    /// size or wait window. Emitted by producers once per caught-up boundary.
    pub fn flush(&self) {
        let mut inner = self.inner.lock();
        let available = inner.available;
        for registration in &mut inner.registrations {
            registration.deliver_appends(available, true);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use parking_lot::Mutex as PlMutex;

    #[derive(Default)]
    struct Recorder {
        events: PlMutex<Vec<LogModification>>,
    }

    impl LogSourceListener for Recorder {
        fn on_log_modified(&self, modification: LogModification) {
            self.events.lock().push(modification);
        }
    }

    impl Recorder {
        fn take(&self) -> Vec<LogModification> {
            std::mem::take(&mut self.events.lock())
        }
    }

    #[test]
    fn test_add_primes_with_reset() {
        let fanout = ListenerFanout::new();
        let recorder = Arc::new(Recorder::default());
        fanout.add(recorder.clone(), Duration::ZERO, 100);
        assert_eq!(recorder.take(), vec![LogModification::Reset]);
    }

    #[test]
    fn test_late_subscriber_catches_up_on_add() {
        let fanout = ListenerFanout::new();
        fanout.on_read(7);

        let recorder = Arc::new(Recorder::default());
        fanout.add(recorder.clone(), Duration::from_secs(3600), 3);
        assert_eq!(
            recorder.take(),
            vec![
                LogModification::Reset,
                LogModification::appended(0, 3),
                LogModification::appended(3, 3),
                LogModification::appended(6, 1),
            ]
        );
    }

    #[test]
    fn test_on_read_zero_wait_delivers_immediately() {
        let fanout = ListenerFanout::new();
        let recorder = Arc::new(Recorder::default());
        fanout.add(recorder.clone(), Duration::ZERO, 100);
        recorder.take();

        fanout.on_read(3);
        fanout.on_read(5);
        assert_eq!(
            recorder.take(),
            vec![
                LogModification::appended(0, 3),
                LogModification::appended(3, 2),
            ]
        );
    }

    #[test]
    fn test_batch_size_chunks_deliveries() {
        let fanout = ListenerFanout::new();
        let recorder = Arc::new(Recorder::default());
        fanout.add(recorder.clone(), Duration::ZERO, 4);
        recorder.take();

        fanout.on_read(10);
        assert_eq!(
            recorder.take(),
            vec![
                LogModification::appended(0, 4),
                LogModification::appended(4, 4),
                LogModification::appended(8, 2),
            ]
        );
    }

    #[test]
    fn test_long_wait_holds_small_batches_until_flush() {
        let fanout = ListenerFanout::new();
        let recorder = Arc::new(Recorder::default());
        fanout.add(recorder.clone(), Duration::from_secs(3600), 100);
        recorder.take();

        fanout.on_read(5);
        assert_eq!(recorder.take(), vec![]);

        fanout.flush();
        assert_eq!(recorder.take(), vec![LogModification::appended(0, 5)]);

        // nothing pending: a second flush is silent
        fanout.flush();
        assert_eq!(recorder.take(), vec![]);
    }

    #[test]
    fn test_full_batch_bypasses_wait_window() {
        let fanout = ListenerFanout::new();
        let recorder = Arc::new(Recorder::default());
        fanout.add(recorder.clone(), Duration::from_secs(3600), 4);
        recorder.take();

        fanout.on_read(4);
        assert_eq!(recorder.take(), vec![LogModification::appended(0, 4)]);
    }

    #[test]
    fn test_invalidate_rewinds_reported_rows() {
        let fanout = ListenerFanout::new();
        let recorder = Arc::new(Recorder::default());
        fanout.add(recorder.clone(), Duration::ZERO, 100);
        recorder.take();

        fanout.on_read(10);
        recorder.take();

        fanout.invalidate(4, 6);
        assert_eq!(recorder.take(), vec![LogModification::removed(4, 6)]);

        // re-append resumes from the cut
        fanout.on_read(7);
        assert_eq!(recorder.take(), vec![LogModification::appended(4, 3)]);
    }

    #[test]
    fn test_invalidate_past_reported_is_silent() {
        let fanout = ListenerFanout::new();
        let recorder = Arc::new(Recorder::default());
        fanout.add(recorder.clone(), Duration::from_secs(3600), 100);
        recorder.take();

        fanout.on_read(5); // held back by the wait window
        fanout.invalidate(5, 2);
        assert_eq!(recorder.take(), vec![]);
    }

    #[test]
    fn test_reset_delivers_immediately_and_rewinds() {
        let fanout = ListenerFanout::new();
        let recorder = Arc::new(Recorder::default());
        fanout.add(recorder.clone(), Duration::ZERO, 100);
        recorder.take();

        fanout.on_read(6);
        recorder.take();

        fanout.reset();
        fanout.on_read(2);
        assert_eq!(
            recorder.take(),
            vec![LogModification::Reset, LogModification::appended(0, 2)]
        );
    }

    #[test]
    fn test_remove_is_idempotent() {
        let fanout = ListenerFanout::new();
        let recorder = Arc::new(Recorder::default());
        let id = fanout.add(recorder.clone(), Duration::ZERO, 100);
        recorder.take();
        assert_eq!(fanout.listener_count(), 1);
        fanout.remove(id);
        fanout.remove(id);
        assert_eq!(fanout.listener_count(), 0);

        fanout.on_read(3);
        assert_eq!(recorder.take(), vec![]);
    }
}
