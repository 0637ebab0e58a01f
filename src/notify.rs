//! User notification port

use crate::swap::Notification;

use tracing::info;

#[cfg(test)]
use mockall::automock;

/// Fire-and-forget delivery of user notifications
#[cfg_attr(test, automock)]
pub trait Notifier: Send + Sync {
    fn notify(&self, notification: Notification);
}

/// Notifier that writes to the log; used when the host supplies none
#[derive(Debug, Default, Clone, Copy)]
pub struct LogNotifier;

impl Notifier for LogNotifier {
    fn notify(&self, notification: Notification) {
        info!("{}: {}", notification.title, notification.message);
    }
}

/// Prompt shown before a hardware account has to sign a swap transaction
pub fn signing_required(action: &str) -> Notification {
    Notification {
        title: "Sign with your hardware wallet".to_string(),
        message: format!("Signing required to {} the swap.", action),
    }
}
