use std::collections::HashMap;
use std::sync::{
    atomic::{AtomicU64, Ordering},
    Arc, Mutex,
};
use tokio::sync::mpsc as tokio_mpsc;
use tracing::trace;

type SubscriptionId = u64;

/// Change notification for a persisted model
///
/// Payloads are snapshots; holding one does not keep anything alive.
#[derive(Debug, Clone, PartialEq)]
pub enum ModelEvent<M> {
    /// Added, restored or modified
    Updated { id: i64, model: M },
    /// Marked for deletion
    Removed { id: i64, model: M },
}

impl<M> ModelEvent<M> {
    pub fn id(&self) -> i64 {
        match self {
            ModelEvent::Updated { id, .. } | ModelEvent::Removed { id, .. } => *id,
        }
    }

    pub fn model(&self) -> &M {
        match self {
            ModelEvent::Updated { model, .. } | ModelEvent::Removed { model, .. } => model,
        }
    }
}

/// Anything model operations can raise events into
pub trait EventSink<E>: Send + Sync {
    fn raise(&self, event: E);
}

/// Publish/subscribe hub; subscribers receive events on unbounded channels
pub struct EventHub<E> {
    subscriptions: Arc<Mutex<HashMap<SubscriptionId, tokio_mpsc::UnboundedSender<E>>>>,
    next_id: Arc<AtomicU64>,
}

impl<E> Clone for EventHub<E> {
    fn clone(&self) -> Self {
        EventHub {
            subscriptions: self.subscriptions.clone(),
            next_id: self.next_id.clone(),
        }
    }
}

impl<E: Clone + Send + 'static> Default for EventHub<E> {
    fn default() -> Self {
        Self::new()
    }
}

impl<E: Clone + Send + 'static> EventHub<E> {
    pub fn new() -> Self {
        EventHub {
            subscriptions: Arc::new(Mutex::new(HashMap::new())),
            next_id: Arc::new(AtomicU64::new(1)),
        }
    }

    /// Subscribe to every event published after this call.
    /// The subscription is removed once the receiver is dropped.
    pub fn subscribe(&self) -> tokio_mpsc::UnboundedReceiver<E> {
        let (tx, rx) = tokio_mpsc::unbounded_channel();
        let id = self.next_id.fetch_add(1, Ordering::SeqCst);
        self.subscriptions.lock().unwrap().insert(id, tx);
        rx
    }

    pub fn publish(&self, event: E) {
        let mut subs = self.subscriptions.lock().unwrap();
        // If send fails, receiver was dropped
        subs.retain(|_, tx| tx.send(event.clone()).is_ok());
    }

    /// Start buffering events for one transaction
    pub fn begin(&self) -> DelayedEvents<E> {
        DelayedEvents {
            hub: self.clone(),
            queue: Mutex::new(Vec::new()),
        }
    }
}

impl<E: Clone + Send + 'static> EventSink<E> for EventHub<E> {
    fn raise(&self, event: E) {
        self.publish(event);
    }
}

/// Events held back until the owning transaction decides
///
/// `end(true)` publishes the queue in order; `end(false)` or dropping the
/// buffer discards it. Each buffer belongs to exactly one transaction.
pub struct DelayedEvents<E> {
    hub: EventHub<E>,
    queue: Mutex<Vec<E>>,
}

impl<E: Clone + Send + 'static> DelayedEvents<E> {
    pub fn end(self, fire: bool) {
        let queue = std::mem::take(&mut *self.queue.lock().unwrap());
        if !fire {
            trace!("Discarding {} delayed event(s)", queue.len());
            return;
        }
        for event in queue {
            self.hub.publish(event);
        }
    }

    pub fn len(&self) -> usize {
        self.queue.lock().unwrap().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl<E: Clone + Send + 'static> EventSink<E> for DelayedEvents<E> {
    fn raise(&self, event: E) {
        self.queue.lock().unwrap().push(event);
    }
}
