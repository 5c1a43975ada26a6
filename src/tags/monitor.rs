// SPDX-License-Identifier: AGPL-3.0-or-later
// Copyright (C) 2012-2025 Andrei Maltsev

//! Per-tag event pipeline: edge detection on value assignments, a bounded
//! queue decoupling detection from handling, and a consumer task invoking
//! the registered handlers.

use std::{
    fmt,
    panic::{AssertUnwindSafe, catch_unwind},
    sync::{Arc, Mutex, PoisonError},
    time::Duration,
};

use dashmap::DashMap;
use tokio::{
    sync::mpsc,
    task::JoinHandle,
    time::timeout,
};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::{tags::value::TagValue, utils::epoch_secs};

/// Capacity of the per-tag event queue. Overflow drops the event with a
/// warning rather than stalling the sweep that produced it.
const QUEUE_CAPACITY: usize = 256;

/// Bound on waiting for a consumer to finish during shutdown.
const STOP_TIMEOUT: Duration = Duration::from_secs(5);

/// Kinds of events a monitor can emit.
///
/// A boolean transition emits its edge kind *and* `Both` as two separate
/// queue entries; `Change` fires for every value type on any change.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EventKind {
    Rising,
    Falling,
    Both,
    Change,
}

impl fmt::Display for EventKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            EventKind::Rising => "rising",
            EventKind::Falling => "falling",
            EventKind::Both => "both",
            EventKind::Change => "change",
        })
    }
}

/// One observed value transition.
#[derive(Debug, Clone)]
pub struct TagEvent {
    pub tag_path: Arc<str>,
    pub kind: EventKind,
    pub old_value: Option<TagValue>,
    pub new_value: TagValue,
    /// Epoch seconds at detection time.
    pub timestamp: i64,
}

impl fmt::Display for TagEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.old_value {
            Some(old) => write!(
                f,
                "{} {} edge: {} -> {}",
                self.tag_path, self.kind, old, self.new_value
            ),
            None => write!(f, "{} {} edge: -> {}", self.tag_path, self.kind, self.new_value),
        }
    }
}

pub type EventHandler = Arc<dyn Fn(&TagEvent) + Send + Sync>;

type HandlerMap = DashMap<EventKind, Vec<EventHandler>>;

/// Edge monitor of a single tag.
///
/// Detection happens inline on the assigning task; dispatch happens on the
/// consumer task, so a slow handler never stalls a sweep. Events of one tag
/// are handled in assignment order; across tags no order is guaranteed.
pub struct EdgeMonitor {
    tag_path: Arc<str>,
    tx: mpsc::Sender<TagEvent>,
    /// The consumer claims the receiver through this owned mutex; a stopped
    /// consumer releases it so the monitor can be enabled again.
    rx: Arc<tokio::sync::Mutex<mpsc::Receiver<TagEvent>>>,
    handlers: Arc<HandlerMap>,
    consumer: Mutex<Option<(CancellationToken, JoinHandle<()>)>>,
}

impl fmt::Debug for EdgeMonitor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EdgeMonitor")
            .field("tag_path", &self.tag_path)
            .finish_non_exhaustive()
    }
}

impl EdgeMonitor {
    pub fn new(tag_path: Arc<str>) -> Self {
        let (tx, rx) = mpsc::channel(QUEUE_CAPACITY);
        Self {
            tag_path,
            tx,
            rx: Arc::new(tokio::sync::Mutex::new(rx)),
            handlers: Arc::new(DashMap::new()),
            consumer: Mutex::new(None),
        }
    }

    /// Registers a handler for one event kind. Handlers run serially on the
    /// consumer task, in registration order.
    pub fn register_handler(&self, kind: EventKind, handler: EventHandler) {
        self.handlers.entry(kind).or_default().push(handler);
    }

    /// Feeds a value assignment into edge detection. Called by the owning
    /// tag whenever its current value is set; equal values emit nothing.
    pub fn on_assign(&self, old: Option<TagValue>, new: &TagValue) {
        if old.as_ref() == Some(new) {
            return;
        }

        self.push(EventKind::Change, old.clone(), new);

        if let (Some(TagValue::Bool(was)), TagValue::Bool(is)) = (&old, new) {
            match (was, is) {
                (false, true) => {
                    self.push(EventKind::Rising, old.clone(), new);
                    self.push(EventKind::Both, old, new);
                },
                (true, false) => {
                    self.push(EventKind::Falling, old.clone(), new);
                    self.push(EventKind::Both, old, new);
                },
                _ => {},
            }
        }
    }

    fn push(&self, kind: EventKind, old_value: Option<TagValue>, new_value: &TagValue) {
        let event = TagEvent {
            tag_path: Arc::clone(&self.tag_path),
            kind,
            old_value,
            new_value: new_value.clone(),
            timestamp: epoch_secs(),
        };
        if self.tx.try_send(event).is_err() {
            warn!(tag_path = %self.tag_path, %kind, "event queue full, dropping event");
        }
    }

    /// Switches the consumer on or off. Both directions are idempotent;
    /// stopping drains the queue before returning.
    pub async fn enable(&self, enabled: bool) {
        if enabled {
            self.start_consumer();
        } else {
            self.stop_consumer().await;
        }
    }

    fn start_consumer(&self) {
        let mut slot = self.consumer.lock().unwrap_or_else(PoisonError::into_inner);
        if slot.is_some() {
            debug!(tag_path = %self.tag_path, "event consumer already running");
            return;
        }
        let cancel = CancellationToken::new();
        let handle = tokio::spawn(consume_events(
            Arc::clone(&self.tag_path),
            Arc::clone(&self.rx),
            Arc::clone(&self.handlers),
            cancel.clone(),
        ));
        *slot = Some((cancel, handle));
        info!(tag_path = %self.tag_path, "event consumer started");
    }

    async fn stop_consumer(&self) {
        let taken = self
            .consumer
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        let Some((cancel, handle)) = taken else {
            return;
        };
        cancel.cancel();
        if timeout(STOP_TIMEOUT, handle).await.is_err() {
            warn!(tag_path = %self.tag_path, "event consumer did not stop in time");
        }
    }
}

/// Consumer loop: pops events until cancelled, then drains what is already
/// queued before declaring shutdown complete.
async fn consume_events(
    tag_path: Arc<str>,
    rx: Arc<tokio::sync::Mutex<mpsc::Receiver<TagEvent>>>,
    handlers: Arc<HandlerMap>,
    cancel: CancellationToken,
) {
    let mut rx = match rx.try_lock_owned() {
        Ok(guard) => guard,
        Err(_) => {
            error!(tag_path = %tag_path, "event queue already claimed by another consumer");
            return;
        },
    };

    loop {
        tokio::select! {
            _ = cancel.cancelled() => break,
            event = rx.recv() => match event {
                Some(event) => dispatch(&handlers, &event),
                None => break,
            },
        }
    }

    while let Ok(event) = rx.try_recv() {
        dispatch(&handlers, &event);
    }
    info!(tag_path = %tag_path, "event consumer stopped");
}

fn dispatch(handlers: &HandlerMap, event: &TagEvent) {
    let registered: Vec<EventHandler> = handlers
        .get(&event.kind)
        .map(|list| list.clone())
        .unwrap_or_default();
    for handler in registered {
        if catch_unwind(AssertUnwindSafe(|| handler(event))).is_err() {
            error!(tag_path = %event.tag_path, kind = %event.kind, "event handler panicked");
        }
    }
}
