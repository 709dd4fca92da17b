//! Best-effort hints that a job was just enqueued.

use tokio::sync::mpsc;
use uuid::Uuid;

/// Sends new job ids to a running scheduler so it can claim them at once.
///
/// Delivery is not guaranteed; the scheduler's polling loop picks up any job
/// whose hint was lost.
#[derive(Debug, Clone, Default)]
pub struct DispatchNotifier {
    tx: Option<mpsc::UnboundedSender<Uuid>>,
}

impl DispatchNotifier {
    pub fn channel() -> (Self, mpsc::UnboundedReceiver<Uuid>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Self { tx: Some(tx) }, rx)
    }

    /// A notifier that drops every hint.
    pub fn disabled() -> Self {
        Self::default()
    }

    pub fn notify(&self, job_id: Uuid) {
        if let Some(tx) = &self.tx {
            if tx.send(job_id).is_err() {
                tracing::trace!(job_id = %job_id, "dispatch hint dropped, no listener");
            }
        }
    }
}
