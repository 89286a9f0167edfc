//! Transient user-facing notifications (toasts)

use serde::Serialize;
use std::sync::Mutex;
use tracing::{error, info};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum NoticeLevel {
    Success,
    Info,
    Error,
}

/// One notification shown to the operator
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Notice {
    pub level: NoticeLevel,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub detail: Option<String>,
}

impl Notice {
    pub fn new(level: NoticeLevel, message: impl Into<String>) -> Self {
        Self {
            level,
            message: message.into(),
            detail: None,
        }
    }

    pub fn with_detail(mut self, detail: impl Into<String>) -> Self {
        self.detail = Some(detail.into());
        self
    }
}

/// Sink for toasts raised by the view stores
pub trait Notifier: Send + Sync {
    fn notify(&self, notice: Notice);

    fn success(&self, message: &str) {
        self.notify(Notice::new(NoticeLevel::Success, message));
    }

    fn info(&self, message: &str) {
        self.notify(Notice::new(NoticeLevel::Info, message));
    }

    fn error(&self, message: &str, err: &crate::error::Error) {
        self.notify(Notice::new(NoticeLevel::Error, message).with_detail(err.to_string()));
    }
}

/// Routes notices into the log
#[derive(Debug, Default, Clone, Copy)]
pub struct TracingNotifier;

impl Notifier for TracingNotifier {
    fn notify(&self, notice: Notice) {
        match (notice.level, &notice.detail) {
            (NoticeLevel::Error, Some(detail)) => error!("{}: {}", notice.message, detail),
            (NoticeLevel::Error, None) => error!("{}", notice.message),
            (_, _) => info!("{}", notice.message),
        }
    }
}

/// Prints notices for the terminal user
#[derive(Debug, Default, Clone, Copy)]
pub struct ConsoleNotifier;

impl Notifier for ConsoleNotifier {
    fn notify(&self, notice: Notice) {
        let marker = match notice.level {
            NoticeLevel::Success => "✓",
            NoticeLevel::Info => "·",
            NoticeLevel::Error => "✗",
        };
        match notice.detail {
            Some(detail) => eprintln!("{} {} ({})", marker, notice.message, detail),
            None => eprintln!("{} {}", marker, notice.message),
        }
    }
}

/// Keeps every notice; used to assert on what the operator would have seen
#[derive(Debug, Default)]
pub struct RecordingNotifier {
    notices: Mutex<Vec<Notice>>,
}

impl RecordingNotifier {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn notices(&self) -> Vec<Notice> {
        match self.notices.lock() {
            Ok(guard) => guard.clone(),
            Err(poisoned) => poisoned.into_inner().clone(),
        }
    }

    pub fn count(&self, level: NoticeLevel) -> usize {
        self.notices().iter().filter(|n| n.level == level).count()
    }
}

impl Notifier for RecordingNotifier {
    fn notify(&self, notice: Notice) {
        match self.notices.lock() {
            Ok(mut guard) => guard.push(notice),
            Err(poisoned) => poisoned.into_inner().push(notice),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::Error;

    #[test]
    fn test_recording_notifier_counts_by_level() {
        let notifier = RecordingNotifier::new();
        notifier.success("Lead created");
        notifier.error("Send failed", &Error::Rejected("quota".to_string()));
        notifier.info("Webhooks configured");

        assert_eq!(notifier.count(NoticeLevel::Error), 1);
        assert_eq!(notifier.count(NoticeLevel::Success), 1);

        let notices = notifier.notices();
        assert_eq!(notices[1].detail.as_deref(), Some("Request rejected: quota"));
    }
}
