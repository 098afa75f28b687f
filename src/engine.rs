//! # Message reconciliation
//!
//! [`Reconciler`] is the client's view of one room: a display-ordered message
//! list that mixes optimistic local entries with the server's authoritative
//! list. It performs no I/O and never sleeps; [`crate::session::ChatSession`]
//! feeds it network results and timer expirations.
//!
//! ## Message lifecycle
//!
//! ```text
//! submit ──► Sending(temp id) ──confirm──► Sent(server id) ──clear──► (none)
//!                   │
//!                   └──fail──► Failed ("… (Failed to send)")
//! ```
//!
//! ## Poll merge
//!
//! A poll result replaces the list. Local entries that the server has not
//! confirmed yet (`Sending`, `Failed`) are appended after it, except a
//! `Sending` entry that matches a newly seen server message by author,
//! content and creation time; that entry is dropped in favour of the
//! server copy so the message is never shown twice.
//!
//! ## Cues
//!
//! Every message that is just-arrived and not `Sending` is announced exactly
//! once per room visit: assistant messages get [`Cue::Ai`], other people's
//! messages [`Cue::Received`], the local user's own messages nothing (their
//! [`Cue::Sent`] already played at submit time).

use std::collections::{HashMap, HashSet};

use crate::models::{
    is_temp_id, new_temp_id, DeliveryStatus, Message, ReplyTo, SendMessageRequest,
    SendMessageResponse,
};
use crate::sounds::Cue;

/// Appended to the content of a message whose send request failed.
pub const FAILURE_SUFFIX: &str = " (Failed to send)";

/// A send request produced by [`Reconciler::submit`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OutgoingMessage {
    pub temp_id: String,
    pub request: SendMessageRequest,
}

/// What a poll merge changed.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PollOutcome {
    /// Server messages seen for the first time this visit (marked just-arrived).
    pub fresh: usize,
    /// Pending local entries dropped because the server copy arrived first.
    pub superseded: usize,
}

#[derive(Debug)]
pub struct Reconciler {
    user_name: String,
    dedup_window_ms: u64,
    room_id: Option<String>,
    epoch: u64,
    loaded: bool,
    messages: Vec<Message>,
    draft: String,
    reply_target: Option<ReplyTo>,
    announced: HashSet<String>,
    superseded: HashMap<String, String>,
    pending_cues: Vec<Cue>,
}

impl Reconciler {
    pub fn new(user_name: impl Into<String>, dedup_window_ms: u64) -> Self {
        Self {
            user_name: user_name.into(),
            dedup_window_ms,
            room_id: None,
            epoch: 0,
            loaded: false,
            messages: Vec::new(),
            draft: String::new(),
            reply_target: None,
            announced: HashSet::new(),
            superseded: HashMap::new(),
            pending_cues: Vec::new(),
        }
    }

    // -----------------------------------------------------------------------
    // Accessors
    // -----------------------------------------------------------------------

    pub fn user_name(&self) -> &str {
        &self.user_name
    }

    pub fn messages(&self) -> &[Message] {
        &self.messages
    }

    pub fn room_id(&self) -> Option<&str> {
        self.room_id.as_deref()
    }

    pub fn epoch(&self) -> u64 {
        self.epoch
    }

    /// Whether results tagged with `epoch` may still be applied.
    pub fn is_current(&self, epoch: u64) -> bool {
        self.room_id.is_some() && self.epoch == epoch
    }

    pub fn draft(&self) -> &str {
        &self.draft
    }

    pub fn set_draft(&mut self, text: impl Into<String>) {
        self.draft = text.into();
    }

    pub fn reply_target(&self) -> Option<&ReplyTo> {
        self.reply_target.as_ref()
    }

    /// Cues produced since the last call, in order.
    pub fn take_cues(&mut self) -> Vec<Cue> {
        std::mem::take(&mut self.pending_cues)
    }

    // -----------------------------------------------------------------------
    // Room lifecycle
    // -----------------------------------------------------------------------

    /// Start a visit to `room_id` and return its epoch.
    pub fn enter_room(&mut self, room_id: impl Into<String>) -> u64 {
        self.reset();
        self.room_id = Some(room_id.into());
        self.pending_cues.push(Cue::RoomEntry);
        self.epoch
    }

    /// End the current visit. Results tagged with its epoch are ignored from now on.
    pub fn leave_room(&mut self) {
        self.reset();
    }

    fn reset(&mut self) {
        self.epoch += 1;
        self.room_id = None;
        self.loaded = false;
        self.messages.clear();
        self.draft.clear();
        self.reply_target = None;
        self.announced.clear();
        self.superseded.clear();
        self.pending_cues.clear();
    }

    // -----------------------------------------------------------------------
    // Local actions
    // -----------------------------------------------------------------------

    /// Record (or clear) the message being replied to.
    ///
    /// Returns `false` and leaves the target unchanged for unconfirmed
    /// messages, which the server cannot reference yet.
    pub fn set_reply_target(&mut self, message: Option<&Message>) -> bool {
        match message {
            Some(m) if is_temp_id(&m.id) => false,
            Some(m) => {
                self.reply_target = Some(m.as_reply_target());
                true
            }
            None => {
                self.reply_target = None;
                true
            }
        }
    }

    /// Optimistically append a message and return the request to send.
    ///
    /// Returns `None` without touching any state when `content` is blank, no
    /// room is active, or the user name is blank.
    pub fn submit(&mut self, content: &str, now_ms: u64) -> Option<OutgoingMessage> {
        if content.trim().is_empty() || self.user_name.trim().is_empty() {
            return None;
        }
        let room_id = self.room_id.clone()?;

        let temp_id = new_temp_id();
        let reply_to = self.reply_target.take();
        let reply_to_id = reply_to.as_ref().map(|r| r.id.clone());

        self.messages.push(Message {
            id: temp_id.clone(),
            content: content.to_string(),
            user_name: self.user_name.clone(),
            is_ai: false,
            room_id: room_id.clone(),
            created_at: now_ms,
            reply_to_id: reply_to_id.clone(),
            reply_to,
            status: Some(DeliveryStatus::Sending),
            is_new: true,
        });
        self.draft.clear();
        self.pending_cues.push(Cue::Sent);

        Some(OutgoingMessage {
            temp_id,
            request: SendMessageRequest {
                content: content.to_string(),
                user_name: self.user_name.clone(),
                room_id,
                reply_to_id,
            },
        })
    }

    // -----------------------------------------------------------------------
    // Network results
    // -----------------------------------------------------------------------

    /// Apply a successful send: the temp entry becomes the server message in
    /// the same slot. Returns the AI reply to insert later, if any.
    pub fn confirm_send(&mut self, temp_id: &str, response: SendMessageResponse) -> Option<Message> {
        let mut confirmed = response.user_message;
        confirmed.status = Some(DeliveryStatus::Sent);
        confirmed.is_new = true;

        let server_id = self.superseded.remove(temp_id);
        let temp_slot = self.messages.iter().position(|m| m.id == temp_id);
        let server_slot = self.messages.iter().position(|m| m.id == confirmed.id);
        if let (Some(i), Some(j)) = (temp_slot, server_slot) {
            // A poll kept the temp entry next to the server copy (clock skew
            // beyond the dedup window); keep the server copy only.
            self.messages[j].status = Some(DeliveryStatus::Sent);
            self.messages[j].is_new = true;
            self.messages.remove(i);
        } else if let Some(i) = temp_slot {
            self.messages[i] = confirmed;
        } else if let Some(i) = self
            .messages
            .iter()
            .position(|m| m.id == confirmed.id || server_id.as_deref() == Some(m.id.as_str()))
        {
            // A poll delivered the server copy first.
            self.messages[i].status = Some(DeliveryStatus::Sent);
        } else {
            self.messages.push(confirmed);
        }
        self.announce();

        response.ai_message.map(|mut ai| {
            ai.is_new = true;
            ai.status = None;
            ai
        })
    }

    /// Apply a failed send: annotate the temp entry; it stays in place.
    pub fn fail_send(&mut self, temp_id: &str) -> bool {
        let Some(i) = self
            .messages
            .iter()
            .position(|m| m.id == temp_id && m.status == Some(DeliveryStatus::Sending))
        else {
            return false;
        };
        let m = &mut self.messages[i];
        m.content.push_str(FAILURE_SUFFIX);
        m.status = Some(DeliveryStatus::Failed);
        self.announce();
        true
    }

    /// Insert the AI reply returned with a send, unless a poll already brought it.
    pub fn insert_ai_reply(&mut self, mut message: Message) -> bool {
        if self.messages.iter().any(|m| m.id == message.id) {
            return false;
        }
        message.is_new = true;
        self.messages.push(message);
        self.announce();
        true
    }

    /// Replace the list with a poll result, carrying unconfirmed local entries.
    pub fn apply_poll(&mut self, server: Vec<Message>) -> PollOutcome {
        let first_load = !self.loaded;
        let previous: HashMap<&str, (Option<DeliveryStatus>, bool)> = self
            .messages
            .iter()
            .map(|m| (m.id.as_str(), (m.status, m.is_new)))
            .collect();

        let mut outcome = PollOutcome::default();
        let mut next = Vec::with_capacity(server.len());
        let mut unseen = Vec::new();
        for mut m in server {
            m.status = None;
            m.is_new = false;
            match previous.get(m.id.as_str()) {
                Some(&(status, is_new)) => {
                    m.status = status;
                    m.is_new = is_new;
                }
                None => {
                    unseen.push(next.len());
                    if !first_load {
                        m.is_new = true;
                        outcome.fresh += 1;
                    }
                }
            }
            next.push(m);
        }

        let mut claimed = HashSet::new();
        for local in self.messages.iter().filter(|m| is_temp_id(&m.id) && m.is_unconfirmed()) {
            if local.status == Some(DeliveryStatus::Sending) {
                let matched = unseen.iter().copied().find(|&i| {
                    !claimed.contains(&i) && self.same_message(local, &next[i])
                });
                if let Some(i) = matched {
                    claimed.insert(i);
                    next[i].status = Some(DeliveryStatus::Sent);
                    next[i].is_new = true;
                    self.superseded.insert(local.id.clone(), next[i].id.clone());
                    outcome.superseded += 1;
                    continue;
                }
            }
            next.push(local.clone());
        }

        self.messages = next;
        self.loaded = true;
        self.announce();
        outcome
    }

    fn same_message(&self, local: &Message, server: &Message) -> bool {
        !server.is_ai
            && server.user_name == local.user_name
            && server.content == local.content
            && server.created_at.abs_diff(local.created_at) <= self.dedup_window_ms
    }

    // -----------------------------------------------------------------------
    // Timers
    // -----------------------------------------------------------------------

    /// Drop every just-arrived flag; confirmed messages lose their `Sent`
    /// status too. Safe to call any number of times.
    pub fn clear_new_flags(&mut self) -> bool {
        let mut changed = false;
        for m in &mut self.messages {
            if m.is_new {
                m.is_new = false;
                changed = true;
            }
            if m.status == Some(DeliveryStatus::Sent) {
                m.status = None;
                changed = true;
            }
        }
        changed
    }

    // -----------------------------------------------------------------------
    // Side effects
    // -----------------------------------------------------------------------

    fn announce(&mut self) {
        for m in &self.messages {
            if !m.is_new || m.status == Some(DeliveryStatus::Sending) {
                continue;
            }
            if !self.announced.insert(m.id.clone()) {
                continue;
            }
            if m.is_ai {
                self.pending_cues.push(Cue::Ai);
            } else if m.user_name != self.user_name {
                self.pending_cues.push(Cue::Received);
            }
        }
    }
}
