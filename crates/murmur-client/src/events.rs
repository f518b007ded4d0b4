//! What the router tells the presentation layer.

use chrono::{DateTime, Local, Utc};
use serde::Serialize;

use murmur_shared::types::{ConnectionStatus, PresenceStatus};

/// A chat message ready to display: already decrypted.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ChatEntry {
    pub username: String,
    pub content: String,
    pub created_at: DateTime<Utc>,
    pub encrypted: bool,
    /// Sent by the local user
    pub own: bool,
}

/// Rendering sink. Every method is a notification; none can fail.
pub trait Presenter: Send {
    fn on_status(&mut self, status: ConnectionStatus, reason: Option<&str>);

    /// Backfilled history, oldest first.
    fn on_history(&mut self, entries: &[ChatEntry]);

    fn on_message(&mut self, entry: &ChatEntry);

    /// A message from someone else while notifications are enabled.
    fn on_notify(&mut self, entry: &ChatEntry);

    /// Server-rendered indicator text; empty clears it.
    fn on_typing(&mut self, indicator: &str);

    fn on_presence(&mut self, username: &str, status: PresenceStatus);

    /// One-line, non-blocking error.
    fn on_error(&mut self, message: &str);

    fn on_notice(&mut self, message: &str);
}

/// Prints to stdout, one line per event.
#[derive(Debug, Default)]
pub struct ConsolePresenter {
    last_typing: String,
}

impl ConsolePresenter {
    pub fn new() -> Self {
        Self::default()
    }

    fn format_entry(entry: &ChatEntry) -> String {
        let time = entry.created_at.with_timezone(&Local).format("%H:%M");
        let lock = if entry.encrypted { " 🔒" } else { "" };
        format!("[{time}] <{}>{lock} {}", entry.username, entry.content)
    }
}

impl Presenter for ConsolePresenter {
    fn on_status(&mut self, status: ConnectionStatus, reason: Option<&str>) {
        match reason {
            Some(reason) => println!("-- {status} ({reason})"),
            None => println!("-- {status}"),
        }
        if status == ConnectionStatus::Closed {
            println!("-- type /retry to reconnect now");
        }
    }

    fn on_history(&mut self, entries: &[ChatEntry]) {
        for entry in entries {
            println!("{}", Self::format_entry(entry));
        }
        if !entries.is_empty() {
            println!("-- end of history");
        }
    }

    fn on_message(&mut self, entry: &ChatEntry) {
        println!("{}", Self::format_entry(entry));
    }

    fn on_notify(&mut self, _entry: &ChatEntry) {
        print!("\x07");
    }

    fn on_typing(&mut self, indicator: &str) {
        if indicator != self.last_typing && !indicator.is_empty() {
            println!("-- {indicator}");
        }
        self.last_typing = indicator.to_string();
    }

    fn on_presence(&mut self, username: &str, status: PresenceStatus) {
        match status {
            PresenceStatus::Online => println!("-- {username} joined"),
            PresenceStatus::Offline => println!("-- {username} left"),
        }
    }

    fn on_error(&mut self, message: &str) {
        eprintln!("!! {message}");
    }

    fn on_notice(&mut self, message: &str) {
        println!("-- {message}");
    }
}
