//! Terminal rendering of a room's message list.
//!
//! The list is re-read after every change, so [`Transcript::render`] diffs
//! the snapshot against what it already printed and only emits new lines:
//! unseen messages, failures of pending sends, and a short marker when a
//! pending send is confirmed (the server copy replaces the printed temporary
//! entry and is not printed again).

use colored::*;
use std::collections::{HashMap, HashSet};

use crate::models::{is_temp_id, DeliveryStatus, Message};

#[derive(Debug, Clone, PartialEq, Eq)]
enum Shown {
    Pending { content: String },
    Settled,
    Failed,
}

pub struct Transcript {
    user_name: String,
    room_id: Option<String>,
    shown: HashMap<String, Shown>,
}

/// `HH:MM` (UTC) of a millisecond timestamp.
pub fn format_time(ms: u64) -> String {
    let minutes = (ms / 60_000) % (24 * 60);
    format!("{:02}:{:02}", minutes / 60, minutes % 60)
}

fn snippet(text: &str, max_chars: usize) -> String {
    let mut out: String = text.chars().take(max_chars).collect();
    if text.chars().count() > max_chars {
        out.push('…');
    }
    out
}

/// The `n`-th confirmed message counted from the end (`1` = latest).
pub fn reply_candidate(messages: &[Message], n: usize) -> Option<&Message> {
    if n == 0 {
        return None;
    }
    messages.iter().rev().filter(|m| !is_temp_id(&m.id)).nth(n - 1)
}

impl Transcript {
    pub fn new(user_name: impl Into<String>) -> Self {
        Self {
            user_name: user_name.into(),
            room_id: None,
            shown: HashMap::new(),
        }
    }

    /// Forget everything printed when the snapshot belongs to another room.
    fn follow_room(&mut self, snapshot: &[Message]) {
        let Some(first) = snapshot.first() else { return };
        if self.room_id.as_deref() != Some(first.room_id.as_str()) {
            self.room_id = Some(first.room_id.clone());
            self.shown.clear();
        }
    }

    fn is_own(&self, m: &Message) -> bool {
        !m.is_ai && m.user_name == self.user_name
    }

    /// Lines to print for `snapshot`, given everything printed before.
    pub fn render(&mut self, snapshot: &[Message]) -> Vec<String> {
        self.follow_room(snapshot);
        let present: HashSet<&str> = snapshot.iter().map(|m| m.id.as_str()).collect();
        let mut lines = Vec::new();

        for m in snapshot {
            match self.shown.get(&m.id).cloned() {
                Some(Shown::Pending { .. }) if m.status == Some(DeliveryStatus::Failed) => {
                    lines.push(format!("  {} {}", "✗".bright_red(), m.content.red()));
                    self.shown.insert(m.id.clone(), Shown::Failed);
                }
                Some(_) => {}
                None => {
                    if !is_temp_id(&m.id) && self.is_own(m) {
                        if let Some(temp_id) = self.confirmed_pending(&m.content, &present) {
                            self.shown.remove(&temp_id);
                            self.shown.insert(m.id.clone(), Shown::Settled);
                            lines.push(format!("  {} {}", "✓".bright_green(), "delivered".dimmed()));
                            continue;
                        }
                    }
                    lines.extend(self.format_message(m));
                    let state = match m.status {
                        Some(DeliveryStatus::Sending) => Shown::Pending { content: m.content.clone() },
                        Some(DeliveryStatus::Failed) => Shown::Failed,
                        _ => Shown::Settled,
                    };
                    self.shown.insert(m.id.clone(), state);
                }
            }
        }
        lines
    }

    /// A printed pending entry with `content` that has left the list.
    fn confirmed_pending(&self, content: &str, present: &HashSet<&str>) -> Option<String> {
        self.shown.iter().find_map(|(id, shown)| match shown {
            Shown::Pending { content: c } if c == content && !present.contains(id.as_str()) => Some(id.clone()),
            _ => None,
        })
    }

    fn format_message(&self, m: &Message) -> Vec<String> {
        let mut lines = Vec::with_capacity(2);
        if let Some(target) = &m.reply_to {
            lines.push(format!(
                "  {} {}: {}",
                "↪".dimmed(),
                target.user_name.dimmed(),
                snippet(&target.content, 40).dimmed()
            ));
        }

        let name = if m.is_ai {
            m.user_name.bright_magenta().bold()
        } else if self.is_own(m) {
            m.user_name.bright_green().bold()
        } else {
            m.user_name.bright_cyan().bold()
        };
        let content = match m.status {
            Some(DeliveryStatus::Failed) => m.content.red(),
            _ => m.content.normal(),
        };
        let mut line = format!("[{}] {}: {}", format_time(m.created_at).dimmed(), name, content);
        if m.status == Some(DeliveryStatus::Sending) {
            line.push_str(&format!(" {}", "…".dimmed()));
        }
        lines.push(line);
        lines
    }
}
