use crate::import::cancel::CancellationToken;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use tokio::sync::mpsc as tokio_mpsc;

static NEXT_NOTIFICATION_ID: AtomicU64 = AtomicU64::new(1);

/// Lifecycle of a progress notification
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NotificationState {
    Active,
    Completed,
    Cancelled,
    Failed,
}

/// Updates emitted by progress notifications
#[derive(Debug, Clone, PartialEq)]
pub enum ImportProgress {
    Progress {
        id: u64,
        fraction: f32,
        text: String,
    },
    Complete {
        id: u64,
        text: String,
    },
    Failed {
        id: u64,
        text: String,
    },
    Cancelled {
        id: u64,
    },
}

impl ImportProgress {
    pub fn id(&self) -> u64 {
        match self {
            ImportProgress::Progress { id, .. }
            | ImportProgress::Complete { id, .. }
            | ImportProgress::Failed { id, .. }
            | ImportProgress::Cancelled { id } => *id,
        }
    }
}

/// Point-in-time view of a notification
#[derive(Debug, Clone, PartialEq)]
pub struct NotificationSnapshot {
    pub progress: f32,
    pub text: String,
    pub completion_text: String,
    pub state: NotificationState,
}

/// Progress sink for a long running operation
///
/// Import and batch code reports through it and polls
/// [`cancel_token`](Self::cancel_token) for cancellation requested by
/// whoever displays it.
#[derive(Debug, Clone)]
pub struct ProgressNotification {
    id: u64,
    snapshot: Arc<Mutex<NotificationSnapshot>>,
    cancel: CancellationToken,
    tx: Option<tokio_mpsc::UnboundedSender<ImportProgress>>,
}

impl Default for ProgressNotification {
    fn default() -> Self {
        Self::new()
    }
}

impl ProgressNotification {
    /// A notification nobody listens to
    pub fn new() -> Self {
        Self::build(None)
    }

    pub(crate) fn with_sender(tx: tokio_mpsc::UnboundedSender<ImportProgress>) -> Self {
        Self::build(Some(tx))
    }

    fn build(tx: Option<tokio_mpsc::UnboundedSender<ImportProgress>>) -> Self {
        ProgressNotification {
            id: NEXT_NOTIFICATION_ID.fetch_add(1, Ordering::SeqCst),
            snapshot: Arc::new(Mutex::new(NotificationSnapshot {
                progress: 0.0,
                text: String::new(),
                completion_text: String::new(),
                state: NotificationState::Active,
            })),
            cancel: CancellationToken::new(),
            tx,
        }
    }

    pub fn id(&self) -> u64 {
        self.id
    }

    pub fn snapshot(&self) -> NotificationSnapshot {
        self.snapshot.lock().unwrap().clone()
    }

    pub fn state(&self) -> NotificationState {
        self.snapshot.lock().unwrap().state
    }

    pub fn cancel_token(&self) -> &CancellationToken {
        &self.cancel
    }

    pub fn is_cancel_requested(&self) -> bool {
        self.cancel.is_cancelled()
    }

    pub fn set_text(&self, text: impl Into<String>) {
        let progress = {
            let mut snapshot = self.snapshot.lock().unwrap();
            snapshot.text = text.into();
            ImportProgress::Progress {
                id: self.id,
                fraction: snapshot.progress,
                text: snapshot.text.clone(),
            }
        };
        self.emit(progress);
    }

    /// Update progress; the fraction is clamped to `0.0..=1.0`
    pub fn set_progress(&self, fraction: f32, text: impl Into<String>) {
        let progress = {
            let mut snapshot = self.snapshot.lock().unwrap();
            snapshot.progress = fraction.clamp(0.0, 1.0);
            snapshot.text = text.into();
            ImportProgress::Progress {
                id: self.id,
                fraction: snapshot.progress,
                text: snapshot.text.clone(),
            }
        };
        self.emit(progress);
    }

    pub fn set_completion_text(&self, text: impl Into<String>) {
        self.snapshot.lock().unwrap().completion_text = text.into();
    }

    pub fn complete(&self) {
        let text = {
            let mut snapshot = self.snapshot.lock().unwrap();
            snapshot.progress = 1.0;
            snapshot.state = NotificationState::Completed;
            snapshot.completion_text.clone()
        };
        self.emit(ImportProgress::Complete { id: self.id, text });
    }

    pub fn fail(&self, text: impl Into<String>) {
        let text = text.into();
        {
            let mut snapshot = self.snapshot.lock().unwrap();
            snapshot.text = text.clone();
            snapshot.state = NotificationState::Failed;
        }
        self.emit(ImportProgress::Failed { id: self.id, text });
    }

    /// Request cancellation of the operation behind this notification
    pub fn cancel(&self) {
        self.cancel.cancel();
        self.snapshot.lock().unwrap().state = NotificationState::Cancelled;
        self.emit(ImportProgress::Cancelled { id: self.id });
    }

    fn emit(&self, progress: ImportProgress) {
        if let Some(tx) = &self.tx {
            let _ = tx.send(progress);
        }
    }
}
