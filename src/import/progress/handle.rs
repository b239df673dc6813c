use crate::import::progress::notification::{ImportProgress, ProgressNotification};
use std::collections::HashMap;
use std::sync::{
    atomic::{AtomicU64, Ordering},
    Arc, Mutex,
};
use tokio::sync::mpsc as tokio_mpsc;
use tracing::debug;

type SubscriptionId = u64;

/// Filter criteria for progress subscriptions
#[derive(Debug, Clone)]
enum SubscriptionFilter {
    All,
    Notification { notification_id: u64 },
}

impl SubscriptionFilter {
    fn matches(&self, progress: &ImportProgress) -> bool {
        match self {
            SubscriptionFilter::All => true,
            SubscriptionFilter::Notification { notification_id } => {
                progress.id() == *notification_id
            }
        }
    }
}

struct Subscription {
    filter: SubscriptionFilter,
    tx: tokio_mpsc::UnboundedSender<ImportProgress>,
}

/// Creates progress notifications and fans their updates out to subscribers
#[derive(Clone)]
pub struct ImportProgressHandle {
    progress_tx: tokio_mpsc::UnboundedSender<ImportProgress>,
    subscriptions: Arc<Mutex<HashMap<SubscriptionId, Subscription>>>,
    next_id: Arc<AtomicU64>,
}

impl ImportProgressHandle {
    /// Create a new progress handle and spawn background task to process progress updates
    pub fn new(runtime_handle: &tokio::runtime::Handle) -> Self {
        let (progress_tx, mut progress_rx) = tokio_mpsc::unbounded_channel::<ImportProgress>();
        let subscriptions: Arc<Mutex<HashMap<SubscriptionId, Subscription>>> =
            Arc::new(Mutex::new(HashMap::new()));
        let subscriptions_clone = subscriptions.clone();

        // Receive progress updates and dispatch to subscribers
        runtime_handle.spawn(async move {
            while let Some(progress) = progress_rx.recv().await {
                let mut subs = subscriptions_clone.lock().unwrap();
                let mut to_remove = Vec::new();

                for (id, subscription) in subs.iter() {
                    if subscription.filter.matches(&progress)
                        && subscription.tx.send(progress.clone()).is_err()
                    {
                        to_remove.push(*id);
                    }
                }

                // Clean up dropped subscriptions
                for id in to_remove {
                    subs.remove(&id);
                }
            }
            debug!("Progress channel closed, dispatcher exiting");
        });

        Self {
            progress_tx,
            subscriptions,
            next_id: Arc::new(AtomicU64::new(1)),
        }
    }

    /// Create a notification whose updates flow to this handle's subscribers
    pub fn notification(&self) -> ProgressNotification {
        ProgressNotification::with_sender(self.progress_tx.clone())
    }

    /// Subscribe to updates of every notification
    pub fn subscribe_all(&self) -> tokio_mpsc::UnboundedReceiver<ImportProgress> {
        self.subscribe(SubscriptionFilter::All)
    }

    /// Subscribe to updates for a single notification
    /// Subscription is automatically removed when receiver is dropped
    pub fn subscribe_notification(
        &self,
        notification_id: u64,
    ) -> tokio_mpsc::UnboundedReceiver<ImportProgress> {
        self.subscribe(SubscriptionFilter::Notification { notification_id })
    }

    fn subscribe(&self, filter: SubscriptionFilter) -> tokio_mpsc::UnboundedReceiver<ImportProgress> {
        let (tx, rx) = tokio_mpsc::unbounded_channel();
        let id = self.next_id.fetch_add(1, Ordering::SeqCst);
        self.subscriptions
            .lock()
            .unwrap()
            .insert(id, Subscription { filter, tx });
        rx
    }
}
