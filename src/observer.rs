//! Observer roles
//!
//! Session records never hold UI objects. Whatever currently plays a role
//! (the unread badge, the notification area) registers itself here and is
//! looked up at call time; only a weak reference is kept, so a role whose
//! owner went away silently resolves to nothing.

use std::fmt;
use std::sync::{Arc, RwLock, Weak};

/// Displays the active session's unread inbox count
pub trait UnreadCountObserver: Send + Sync {
    fn set_unread_count(&self, count: usize);
}

/// Shows one-line messages to the user
pub trait NoticeSink: Send + Sync {
    fn notify(&self, notice: Notice);
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NoticeLevel {
    Info,
    Warning,
    Error,
}

/// A one-line user-visible message
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Notice {
    pub level: NoticeLevel,
    pub message: String,
}

impl Notice {
    pub fn new(level: NoticeLevel, message: impl Into<String>) -> Self {
        Self {
            level,
            message: message.into(),
        }
    }
}

impl fmt::Display for Notice {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let tag = match self.level {
            NoticeLevel::Info => "info",
            NoticeLevel::Warning => "warning",
            NoticeLevel::Error => "error",
        };
        write!(f, "[{}] {}", tag, self.message)
    }
}

/// Role registry
#[derive(Default)]
pub struct Observers {
    unread_indicator: RwLock<Option<Weak<dyn UnreadCountObserver>>>,
    notice_sink: RwLock<Option<Weak<dyn NoticeSink>>>,
}

impl Observers {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make `observer` the unread indicator, replacing any previous one
    pub fn set_unread_indicator(&self, observer: &Arc<dyn UnreadCountObserver>) {
        if let Ok(mut slot) = self.unread_indicator.write() {
            *slot = Some(Arc::downgrade(observer));
        }
    }

    /// The current unread indicator, if one is alive
    pub fn unread_indicator(&self) -> Option<Arc<dyn UnreadCountObserver>> {
        self.unread_indicator
            .read()
            .ok()
            .and_then(|slot| slot.as_ref().and_then(Weak::upgrade))
    }

    pub fn set_notice_sink(&self, sink: &Arc<dyn NoticeSink>) {
        if let Ok(mut slot) = self.notice_sink.write() {
            *slot = Some(Arc::downgrade(sink));
        }
    }

    pub fn notice_sink(&self) -> Option<Arc<dyn NoticeSink>> {
        self.notice_sink
            .read()
            .ok()
            .and_then(|slot| slot.as_ref().and_then(Weak::upgrade))
    }

    /// Show a notice, or log it when nobody displays notices
    pub fn notify(&self, level: NoticeLevel, message: impl Into<String>) {
        let notice = Notice::new(level, message);
        match self.notice_sink() {
            Some(sink) => sink.notify(notice),
            None => tracing::info!(notice = %notice, "No notice sink registered"),
        }
    }
}
