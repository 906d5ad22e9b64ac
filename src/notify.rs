/// Run completion notifications
///
/// Delivery is best effort: callers log failures and carry on.
use crate::Result;

/// Sends a short message to a recipient
pub trait Notifier {
    fn notify(&self, recipient: &str, subject: &str, body: &str) -> Result<()>;
}

/// Writes the notification to the log instead of delivering it
#[derive(Debug, Clone, Copy, Default)]
pub struct LogNotifier;

impl Notifier for LogNotifier {
    fn notify(&self, recipient: &str, subject: &str, body: &str) -> Result<()> {
        log::info!("Notification to {}: {} - {}", recipient, subject, body);
        Ok(())
    }
}

/// Send through `notifier`, logging instead of failing
pub fn notify_best_effort(notifier: &dyn Notifier, recipient: &str, subject: &str, body: &str) {
    if let Err(e) = notifier.notify(recipient, subject, body) {
        log::warn!("Failed to notify {}: {}", recipient, e);
    }
}
