//! Shared skeleton for derived pipeline stages.
//!
//! A stage is both a listener of its input source and a [`LogSource`] to its
//! own listeners. [`StageCore`] owns everything the two concerns share: the
//! registration on the input, the FIFO of pending modifications, the output
//! fanout, the published property snapshot, and the repeating task that
//! drives [`PipelineStage::run_once`].

use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use parking_lot::{Mutex, RwLock};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use logscope_types::LogModification;

use crate::fanout::ListenerFanout;
use crate::properties::{LogProperty, PropertyBag, PropertyValue};
use crate::source::{ListenerId, LogSource, LogSourceListener};

/// FIFO of not-yet-processed input modifications.
///
/// This is the stage's listener registration on its source: the callback
/// only enqueues, processing happens on the stage's own task.
pub(crate) struct PendingModifications {
    queue: Mutex<VecDeque<LogModification>>,
}

impl PendingModifications {
    pub(crate) fn new() -> Arc<Self> {
        Arc::new(Self {
            queue: Mutex::new(VecDeque::new()),
        })
    }

    pub(crate) fn pop(&self) -> Option<LogModification> {
        self.queue.lock().pop_front()
    }

    /// Put back the unprocessed remainder of a split batch.
    pub(crate) fn push_front(&self, modification: LogModification) {
        self.queue.lock().push_front(modification);
    }

    pub(crate) fn is_empty(&self) -> bool {
        self.queue.lock().is_empty()
    }

    pub(crate) fn clear(&self) {
        self.queue.lock().clear();
    }
}

impl LogSourceListener for PendingModifications {
    fn on_log_modified(&self, modification: LogModification) {
        self.queue.lock().push_back(modification);
    }
}

/// The boilerplate every derived log source shares.
pub(crate) struct StageCore {
    pub(crate) source: Arc<dyn LogSource>,
    pub(crate) pending: Arc<PendingModifications>,
    pub(crate) listeners: ListenerFanout,
    /// Snapshot published before listener callbacks fire.
    pub(crate) properties: RwLock<PropertyBag>,
    pub(crate) max_wait: Duration,
    listener_id: ListenerId,
    cancel: CancellationToken,
    task: Mutex<Option<JoinHandle<()>>>,
    disposed: AtomicBool,
}

impl StageCore {
    /// Subscribe to `source` and prepare the stage's shared state. The run
    /// loop is launched separately via [`spawn_loop`].
    pub(crate) fn new(
        source: Arc<dyn LogSource>,
        own_properties: &[LogProperty],
        max_wait: Duration,
        max_batch: usize,
    ) -> Self {
        let pending = PendingModifications::new();
        let listener_id = source.add_listener(pending.clone(), max_wait, max_batch);
        Self {
            source,
            pending,
            listeners: ListenerFanout::new(),
            properties: RwLock::new(PropertyBag::with_defaults(own_properties)),
            max_wait,
            listener_id,
            cancel: CancellationToken::new(),
            task: Mutex::new(None),
            disposed: AtomicBool::new(false),
        }
    }

    pub(crate) fn cancel_token(&self) -> CancellationToken {
        self.cancel.clone()
    }

    pub(crate) fn set_task(&self, handle: JoinHandle<()>) {
        *self.task.lock() = Some(handle);
    }

    pub(crate) fn is_disposed(&self) -> bool {
        self.disposed.load(Ordering::SeqCst)
    }

    /// Deregister from the source, stop the task, drop queued work.
    /// Terminal; later calls are no-ops.
    pub(crate) fn dispose(&self) {
        if self.disposed.swap(true, Ordering::SeqCst) {
            return;
        }
        self.source.remove_listener(self.listener_id);
        self.cancel.cancel();
        if let Some(task) = self.task.lock().take() {
            task.abort();
        }
        self.pending.clear();
    }

    /// This stage's value for `property`: the stage's own snapshot when it
    /// owns the descriptor, the source's answer otherwise.
    pub(crate) fn property(&self, property: LogProperty) -> PropertyValue {
        if self.is_disposed() {
            return property.default_value();
        }
        let bag = self.properties.read();
        if bag.contains(property) {
            bag.get_or_default(property)
        } else {
            drop(bag);
            self.source.get_property(property)
        }
    }

    /// The stage's own descriptors plus the ancestor union.
    pub(crate) fn property_union(&self) -> Vec<LogProperty> {
        let mut union = self.properties.read().properties();
        for property in self.source.properties() {
            if !union.contains(&property) {
                union.push(property);
            }
        }
        union
    }

    /// Snapshot the ancestor properties, then overlay the stage's own.
    pub(crate) fn copy_properties_into(&self, dest: &mut PropertyBag) {
        if self.is_disposed() {
            return;
        }
        self.source.copy_properties(dest);
        self.properties.read().copy_to(dest);
    }

    /// Stage-owned descriptors are read-only; anything else is forwarded to
    /// the underlying writable source.
    pub(crate) fn forward_set_property(&self, property: LogProperty, value: PropertyValue) {
        if self.is_disposed() || self.properties.read().contains(property) {
            return;
        }
        self.source.set_property(property, value);
    }

    /// `source_percentage × (processed / known_total)`, clamped to `[0, 1]`;
    /// 1 when nothing is known to process.
    pub(crate) fn processed_percentage(&self, processed: usize, known_total: usize) -> f64 {
        let source_percentage = self
            .source
            .get_property(LogProperty::PercentageProcessed)
            .as_percentage()
            .unwrap_or(0.0);
        let own = if known_total == 0 {
            1.0
        } else {
            processed as f64 / known_total as f64
        };
        (source_percentage * own).clamp(0.0, 1.0)
    }
}

/// A derived source driven by a repeating scheduler task.
pub trait PipelineStage: Send + Sync + 'static {
    /// One scheduling tick: process at most one batch of pending work and
    /// return the minimum delay before the next tick. Zero requests
    /// immediate rescheduling.
    fn run_once(&self, cancel: &CancellationToken) -> Duration;
}

/// Drive `stage` until its token is cancelled.
pub(crate) fn spawn_loop(stage: Arc<dyn PipelineStage>, cancel: CancellationToken) -> JoinHandle<()> {
    tokio::spawn(async move {
        loop {
            if cancel.is_cancelled() {
                break;
            }
            let delay = stage.run_once(&cancel);
            if delay.is_zero() {
                tokio::task::yield_now().await;
            } else {
                tokio::select! {
                    _ = cancel.cancelled() => break,
                    _ = tokio::time::sleep(delay) => {}
                }
            }
        }
    })
}
