use crate::config::NotifyPrefs;

/// Where a tapped notification should lead.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Conversation {
    Peer(String),
    Group(String),
}

/// Passive alert for a message nobody is looking at.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Notification {
    pub title: String,
    pub content: String,
    pub conversation: Conversation,
    pub sound: bool,
    pub vibrate: bool,
}

impl Notification {
    pub fn new(
        title: impl Into<String>,
        content: impl Into<String>,
        conversation: Conversation,
        prefs: &NotifyPrefs,
    ) -> Self {
        Self {
            title: title.into(),
            content: content.into(),
            conversation,
            sound: prefs.voice,
            vibrate: prefs.vibrate,
        }
    }

    /// Single-line ticker text.
    pub fn ticker(&self) -> String {
        format!("{}\n{}", self.title, self.content)
    }
}

/// Short-lived user notices.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Notice {
    BadNetwork,
}

pub trait Notifier: Send + Sync {
    fn notify(&self, notification: &Notification);

    fn transient(&self, notice: Notice);
}

/// Notifier for headless runs: everything goes to the log.
#[derive(Debug, Default, Clone, Copy)]
pub struct LogNotifier;

impl Notifier for LogNotifier {
    fn notify(&self, notification: &Notification) {
        log::info!(
            "[notify {:?}] {}",
            notification.conversation,
            notification.ticker().replace('\n', ": ")
        );
    }

    fn transient(&self, notice: Notice) {
        match notice {
            Notice::BadNetwork => log::warn!("Network unavailable, please check your connection"),
        }
    }
}
