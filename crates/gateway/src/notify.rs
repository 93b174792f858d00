//! Status / notifier seam.
//!
//! The core reports whether it is idle, working, or blocked on a human;
//! a blocked state that lingers past the reminder window fires a delayed
//! notification. The default sink just logs; front-ends plug in their
//! own (desktop notifications, tray icon, chat ping).

use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use tokio::task::JoinHandle;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Status {
    Idle,
    Working,
    Blocked,
}

/// Sink for status transitions and reminders.
pub trait Notifier: Send + Sync {
    fn set_status(&self, status: Status);
    /// Fired when a permission has been waiting past the reminder window.
    fn reminder(&self, reason: &str);
}

/// Default sink: tracing only.
pub struct LogNotifier;

impl Notifier for LogNotifier {
    fn set_status(&self, status: Status) {
        tracing::debug!(?status, "status");
    }

    fn reminder(&self, reason: &str) {
        tracing::info!(reason, "still waiting on operator input");
    }
}

/// How long a permission may sit unanswered before the reminder fires.
const REMINDER_AFTER: Duration = Duration::from_secs(60);

/// Tracks blocked state and schedules the delayed reminder.
pub struct StatusTracker {
    notifier: Arc<dyn Notifier>,
    reminder: Mutex<Option<JoinHandle<()>>>,
}

impl StatusTracker {
    pub fn new(notifier: Arc<dyn Notifier>) -> Self {
        Self {
            notifier,
            reminder: Mutex::new(None),
        }
    }

    pub fn working(&self) {
        self.notifier.set_status(Status::Working);
    }

    pub fn idle(&self) {
        self.notifier.set_status(Status::Idle);
    }

    /// Enter blocked state and schedule the reminder.
    pub fn blocked(&self, reason: &str) {
        self.notifier.set_status(Status::Blocked);
        let notifier = self.notifier.clone();
        let reason = reason.to_string();
        let handle = tokio::spawn(async move {
            tokio::time::sleep(REMINDER_AFTER).await;
            notifier.reminder(&reason);
        });
        if let Some(previous) = self.reminder.lock().replace(handle) {
            previous.abort();
        }
    }

    /// Leave blocked state and cancel any scheduled reminder.
    pub fn unblocked(&self) {
        if let Some(handle) = self.reminder.lock().take() {
            handle.abort();
        }
        self.notifier.set_status(Status::Working);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[derive(Default)]
    struct CountingNotifier {
        reminders: AtomicUsize,
    }

    impl Notifier for CountingNotifier {
        fn set_status(&self, _status: Status) {}
        fn reminder(&self, _reason: &str) {
            self.reminders.fetch_add(1, Ordering::SeqCst);
        }
    }

    #[tokio::test(start_paused = true)]
    async fn reminder_fires_when_still_blocked() {
        let notifier = Arc::new(CountingNotifier::default());
        let tracker = StatusTracker::new(notifier.clone());

        tracker.blocked("bash permission");
        // Let the spawned task start and register its sleep before advancing the clock.
        tokio::task::yield_now().await;
        tokio::time::advance(REMINDER_AFTER + Duration::from_secs(1)).await;
        // Let the spawned task run.
        tokio::task::yield_now().await;
        assert_eq!(notifier.reminders.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn unblocked_cancels_reminder() {
        let notifier = Arc::new(CountingNotifier::default());
        let tracker = StatusTracker::new(notifier.clone());

        tracker.blocked("bash permission");
        tracker.unblocked();
        tokio::time::advance(REMINDER_AFTER * 2).await;
        tokio::task::yield_now().await;
        assert_eq!(notifier.reminders.load(Ordering::SeqCst), 0);
    }
}
