//! User-facing notification requests.
//!
//! The engine never renders anything; it only asks the host application to
//! surface a message. Transient retries stay silent — notifications fire on
//! sync start/finish, exhausted retries, conflicts needing an operator, and
//! capacity/offline rejections of a user-initiated action.

use async_trait::async_trait;
use tracing::{error, info, warn};

/// How loudly the host should surface a notification.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Severity {
    Info,
    Warning,
    Error,
}

/// A request for the host application to show a message.
#[derive(Debug, Clone)]
pub struct Notification {
    pub title: String,
    pub message: String,
    pub severity: Severity,
}

impl Notification {
    /// Creates an informational notification.
    #[must_use]
    pub fn info(title: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            title: title.into(),
            message: message.into(),
            severity: Severity::Info,
        }
    }

    /// Creates a warning notification.
    #[must_use]
    pub fn warning(title: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            title: title.into(),
            message: message.into(),
            severity: Severity::Warning,
        }
    }

    /// Creates an error notification.
    #[must_use]
    pub fn error(title: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            title: title.into(),
            message: message.into(),
            severity: Severity::Error,
        }
    }
}

/// Sink for notification requests, implemented by the host application.
#[async_trait]
pub trait Notifier: Send + Sync {
    /// Requests that a notification be shown.
    async fn notify(&self, notification: Notification);
}

/// Default notifier that routes notifications into the log.
#[derive(Debug, Default, Clone)]
pub struct LogNotifier;

#[async_trait]
impl Notifier for LogNotifier {
    async fn notify(&self, notification: Notification) {
        match notification.severity {
            Severity::Info => info!("{}: {}", notification.title, notification.message),
            Severity::Warning => warn!("{}: {}", notification.title, notification.message),
            Severity::Error => error!("{}: {}", notification.title, notification.message),
        }
    }
}
