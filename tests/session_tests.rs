//! ChatSession against a scripted server on a paused clock: optimistic
//! sends, in-place confirmation, failures, delayed AI replies, polling, and
//! room lifecycle.

use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use tokio::sync::Notify;
use tokio::time::sleep;

use textify::assistant::is_ai_request;
use textify::client::{ApiError, ChatApi};
use textify::models::{
    is_temp_id, new_server_id, now_ms, CheckRoomResponse, DeliveryStatus, Message, Room,
    SendMessageRequest, SendMessageResponse, AI_USER_NAME,
};
use textify::session::{ChatSession, SessionConfig};
use textify::sounds::{Cue, RecordingSink};

// ---------------------------------------------------------------------------
// Scripted server
// ---------------------------------------------------------------------------

#[derive(Default)]
struct ScriptedServer {
    messages: Mutex<Vec<Message>>,
    sent: Mutex<Vec<SendMessageRequest>>,
    /// When set, send responses wait for a permit.
    gate: Option<Arc<Notify>>,
    /// Store the message before waiting on the gate (server done, response late).
    store_before_gate: bool,
    fail_sends: AtomicBool,
    fail_polls: AtomicBool,
    polls: AtomicUsize,
}

impl ScriptedServer {
    fn gated(store_before_gate: bool) -> (Self, Arc<Notify>) {
        let gate = Arc::new(Notify::new());
        let server = Self {
            gate: Some(Arc::clone(&gate)),
            store_before_gate,
            ..Self::default()
        };
        (server, gate)
    }

    fn push(&self, room_id: &str, user: &str, content: &str) -> Message {
        let m = Message {
            id: new_server_id(),
            content: content.to_string(),
            user_name: user.to_string(),
            is_ai: user == AI_USER_NAME,
            room_id: room_id.to_string(),
            created_at: now_ms(),
            reply_to_id: None,
            reply_to: None,
            status: None,
            is_new: false,
        };
        self.messages.lock().unwrap().push(m.clone());
        m
    }

    fn store_request(&self, req: &SendMessageRequest) -> SendMessageResponse {
        let mut user_message = self.push(&req.room_id, &req.user_name, &req.content);
        if req.reply_to_id.is_some() {
            user_message.reply_to_id = req.reply_to_id.clone();
            let mut messages = self.messages.lock().unwrap();
            if let Some(last) = messages.last_mut() {
                last.reply_to_id = req.reply_to_id.clone();
            }
        }
        let ai_message = is_ai_request(&req.content).then(|| self.push(&req.room_id, AI_USER_NAME, "4"));
        SendMessageResponse { user_message, ai_message }
    }

    fn polls(&self) -> usize {
        self.polls.load(Ordering::SeqCst)
    }

    fn sent(&self) -> Vec<SendMessageRequest> {
        self.sent.lock().unwrap().clone()
    }
}

impl ChatApi for ScriptedServer {
    async fn fetch_messages(&self, room_id: &str) -> Result<Vec<Message>, ApiError> {
        self.polls.fetch_add(1, Ordering::SeqCst);
        if self.fail_polls.load(Ordering::SeqCst) {
            return Err(ApiError::Connect { url: "scripted".into(), detail: "down".into() });
        }
        let messages = self.messages.lock().unwrap();
        Ok(messages.iter().filter(|m| m.room_id == room_id).cloned().collect())
    }

    async fn send_message(&self, req: &SendMessageRequest) -> Result<SendMessageResponse, ApiError> {
        self.sent.lock().unwrap().push(req.clone());
        let early = self.store_before_gate.then(|| self.store_request(req));
        if let Some(gate) = &self.gate {
            gate.notified().await;
        }
        if self.fail_sends.load(Ordering::SeqCst) {
            return Err(ApiError::Http { status: 500, message: "Failed to send message".into() });
        }
        Ok(match early {
            Some(resp) => resp,
            None => self.store_request(req),
        })
    }

    async fn check_room(&self, code: &str) -> Result<CheckRoomResponse, ApiError> {
        Ok(CheckRoomResponse { exists: true, room_id: Some(code.to_string()) })
    }

    async fn create_room(&self, code: &str) -> Result<Room, ApiError> {
        Ok(Room { id: code.to_string(), code: code.to_string(), created_at: now_ms() })
    }
}

fn session(api: &Arc<ScriptedServer>) -> (ChatSession<ScriptedServer>, Arc<RecordingSink>) {
    let sink = Arc::new(RecordingSink::new());
    let session = ChatSession::new(Arc::clone(api), "Alice", sink.clone(), SessionConfig::default());
    (session, sink)
}

async fn settle() {
    sleep(Duration::from_millis(10)).await;
}

// ---------------------------------------------------------------------------
// Entering rooms
// ---------------------------------------------------------------------------

#[tokio::test(start_paused = true)]
async fn test_enter_polls_immediately() {
    let api = Arc::new(ScriptedServer::default());
    api.push("R1", "Bob", "hello");
    let (mut s, sink) = session(&api);

    s.enter("R1");
    settle().await;

    let snap = s.snapshot();
    assert_eq!(snap.len(), 1);
    assert!(!snap[0].is_new, "history is not announced as new");
    assert_eq!(sink.played(), vec![Cue::RoomEntry]);
    assert_eq!(api.polls(), 1);
}

#[tokio::test(start_paused = true)]
async fn test_reentering_resets_the_list() {
    let api = Arc::new(ScriptedServer::default());
    api.push("R1", "Bob", "in R1");
    let (mut s, sink) = session(&api);

    s.enter("R1");
    settle().await;
    s.enter("R2");
    settle().await;

    assert!(s.snapshot().is_empty());
    assert_eq!(s.room_id().as_deref(), Some("R2"));
    assert_eq!(sink.count(Cue::RoomEntry), 2);
}

#[tokio::test(start_paused = true)]
async fn test_zero_poll_interval_still_polls() {
    let api = Arc::new(ScriptedServer::default());
    let config = SessionConfig { poll_interval: Duration::ZERO, ..SessionConfig::default() };
    let mut s = ChatSession::new(Arc::clone(&api), "Alice", Arc::new(RecordingSink::new()), config);

    s.enter("R1");
    settle().await;
    assert!(api.polls() >= 2);
    s.leave();
}

#[tokio::test(start_paused = true)]
async fn test_subscribers_are_notified() {
    let api = Arc::new(ScriptedServer::default());
    let (mut s, _sink) = session(&api);
    let rx = s.subscribe();
    s.enter("R1");
    settle().await;
    assert!(rx.has_changed().unwrap());
}

// ---------------------------------------------------------------------------
// Sending
// ---------------------------------------------------------------------------

#[tokio::test(start_paused = true)]
async fn test_submit_is_visible_before_response_and_confirmed_in_place() {
    let (server, gate) = ScriptedServer::gated(false);
    let api = Arc::new(server);
    api.push("R1", "Bob", "earlier");
    let (mut s, sink) = session(&api);
    s.enter("R1");
    settle().await;

    let temp_id = s.submit("hi").expect("accepted");
    let snap = s.snapshot();
    assert_eq!(snap.len(), 2);
    assert_eq!(snap[1].id, temp_id);
    assert_eq!(snap[1].status, Some(DeliveryStatus::Sending));

    gate.notify_one();
    settle().await;
    let snap = s.snapshot();
    assert_eq!(snap.len(), 2);
    assert!(!is_temp_id(&snap[1].id));
    assert_eq!(snap[1].content, "hi");
    assert_eq!(snap[1].status, Some(DeliveryStatus::Sent));

    sleep(Duration::from_millis(1_600)).await;
    let snap = s.snapshot();
    assert_eq!(snap[1].status, None);
    assert!(!snap[1].is_new);
    assert_eq!(sink.played(), vec![Cue::RoomEntry, Cue::Sent]);
}

#[tokio::test(start_paused = true)]
async fn test_blank_submit_sends_nothing() {
    let api = Arc::new(ScriptedServer::default());
    let (mut s, sink) = session(&api);
    s.enter("R1");
    settle().await;

    assert!(s.submit("   ").is_none());
    settle().await;
    assert!(api.sent().is_empty());
    assert!(s.snapshot().is_empty());
    assert_eq!(sink.count(Cue::Sent), 0);
}

#[tokio::test(start_paused = true)]
async fn test_submit_without_room_is_ignored() {
    let api = Arc::new(ScriptedServer::default());
    let (s, _sink) = session(&api);
    assert!(s.submit("hello").is_none());
}

#[tokio::test(start_paused = true)]
async fn test_failed_send_is_annotated_and_survives_polls() {
    let api = Arc::new(ScriptedServer::default());
    api.fail_sends.store(true, Ordering::SeqCst);
    let (mut s, _sink) = session(&api);
    s.enter("R1");
    settle().await;

    s.submit("hi").expect("accepted");
    settle().await;
    let snap = s.snapshot();
    assert_eq!(snap.len(), 1);
    assert_eq!(snap[0].content, "hi (Failed to send)");
    assert_eq!(snap[0].status, Some(DeliveryStatus::Failed));

    sleep(Duration::from_secs(3)).await;
    let snap = s.snapshot();
    assert_eq!(snap.len(), 1);
    assert_eq!(snap[0].status, Some(DeliveryStatus::Failed));
}

#[tokio::test(start_paused = true)]
async fn test_reply_target_is_sent_and_cleared() {
    let api = Arc::new(ScriptedServer::default());
    api.push("R1", "Bob", "lunch?");
    let (mut s, _sink) = session(&api);
    s.enter("R1");
    settle().await;

    let target = s.snapshot()[0].clone();
    assert!(s.set_reply_target(Some(&target)));
    assert_eq!(s.reply_target().map(|r| r.id), Some(target.id.clone()));
    s.submit("yes").expect("accepted");
    settle().await;

    assert_eq!(api.sent()[0].reply_to_id.as_deref(), Some(target.id.as_str()));
    assert!(s.reply_target().is_none());
}

// ---------------------------------------------------------------------------
// Assistant replies
// ---------------------------------------------------------------------------

#[tokio::test(start_paused = true)]
async fn test_ai_reply_appears_after_delay_once() {
    let api = Arc::new(ScriptedServer::default());
    let (mut s, sink) = session(&api);
    s.enter("R1");
    settle().await;

    s.submit("@AI what is 2+2?").expect("accepted");
    settle().await;
    assert_eq!(s.snapshot().len(), 1);

    sleep(Duration::from_millis(500)).await;
    assert_eq!(s.snapshot().len(), 1, "reply held back");

    sleep(Duration::from_millis(400)).await;
    let snap = s.snapshot();
    assert_eq!(snap.len(), 2);
    assert!(snap[1].is_ai);
    assert_eq!(snap[1].content, "4");
    assert!(snap[1].is_new);
    assert_eq!(sink.count(Cue::Ai), 1);

    // The next poll returns the same two messages.
    sleep(Duration::from_secs(3)).await;
    assert_eq!(s.snapshot().len(), 2);
    assert_eq!(sink.count(Cue::Ai), 1);
    assert_eq!(sink.count(Cue::Received), 0);
}

// ---------------------------------------------------------------------------
// Polling
// ---------------------------------------------------------------------------

#[tokio::test(start_paused = true)]
async fn test_incoming_message_is_announced_once_then_settles() {
    let api = Arc::new(ScriptedServer::default());
    let (mut s, sink) = session(&api);
    s.enter("R1");
    settle().await;

    api.push("R1", "Bob", "anyone here?");
    sleep(Duration::from_secs(3)).await;
    let snap = s.snapshot();
    assert_eq!(snap.len(), 1);
    assert!(snap[0].is_new);
    assert_eq!(sink.count(Cue::Received), 1);

    sleep(Duration::from_secs(3)).await;
    assert_eq!(sink.count(Cue::Received), 1);
    assert!(!s.snapshot()[0].is_new);
}

#[tokio::test(start_paused = true)]
async fn test_failed_poll_keeps_list() {
    let api = Arc::new(ScriptedServer::default());
    api.push("R1", "Bob", "one");
    let (mut s, sink) = session(&api);
    s.enter("R1");
    settle().await;

    api.fail_polls.store(true, Ordering::SeqCst);
    api.push("R1", "Carol", "two");
    sleep(Duration::from_secs(3)).await;
    assert_eq!(s.snapshot().len(), 1);

    api.fail_polls.store(false, Ordering::SeqCst);
    sleep(Duration::from_secs(3)).await;
    let snap = s.snapshot();
    assert_eq!(snap.len(), 2);
    assert!(snap[1].is_new);
    assert_eq!(sink.count(Cue::Received), 1);
}

#[tokio::test(start_paused = true)]
async fn test_pending_message_survives_poll() {
    let (server, gate) = ScriptedServer::gated(false);
    let api = Arc::new(server);
    let (mut s, _sink) = session(&api);
    s.enter("R1");
    settle().await;

    let temp_id = s.submit("slow").expect("accepted");
    sleep(Duration::from_secs(3)).await;
    assert!(api.polls() >= 2);
    let snap = s.snapshot();
    assert_eq!(snap.len(), 1);
    assert_eq!(snap[0].id, temp_id);
    assert_eq!(snap[0].status, Some(DeliveryStatus::Sending));

    gate.notify_one();
    settle().await;
    let snap = s.snapshot();
    assert_eq!(snap.len(), 1);
    assert_eq!(snap[0].status, Some(DeliveryStatus::Sent));
}

#[tokio::test(start_paused = true)]
async fn test_poll_racing_confirmation_never_duplicates() {
    let (server, gate) = ScriptedServer::gated(true);
    let api = Arc::new(server);
    let (mut s, _sink) = session(&api);
    s.enter("R1");
    settle().await;

    s.submit("race").expect("accepted");
    sleep(Duration::from_secs(3)).await;
    let snap = s.snapshot();
    assert_eq!(snap.len(), 1, "poll copy replaces the pending entry");
    assert!(!is_temp_id(&snap[0].id));

    gate.notify_one();
    settle().await;
    let snap = s.snapshot();
    assert_eq!(snap.len(), 1);
    assert_eq!(snap[0].content, "race");
}

// ---------------------------------------------------------------------------
// Leaving
// ---------------------------------------------------------------------------

#[tokio::test(start_paused = true)]
async fn test_leave_discards_late_confirmation() {
    let (server, gate) = ScriptedServer::gated(false);
    let api = Arc::new(server);
    let (mut s, sink) = session(&api);
    s.enter("R1");
    settle().await;

    s.submit("bye").expect("accepted");
    s.leave();
    gate.notify_one();
    sleep(Duration::from_secs(2)).await;

    assert!(s.snapshot().is_empty());
    assert!(s.room_id().is_none());
    assert_eq!(sink.played(), vec![Cue::RoomEntry, Cue::Sent]);
}

#[tokio::test(start_paused = true)]
async fn test_leave_stops_polling() {
    let api = Arc::new(ScriptedServer::default());
    let (mut s, _sink) = session(&api);
    s.enter("R1");
    settle().await;
    assert_eq!(api.polls(), 1);

    s.leave();
    sleep(Duration::from_secs(10)).await;
    assert_eq!(api.polls(), 1);
}

#[tokio::test(start_paused = true)]
async fn test_drop_stops_polling() {
    let api = Arc::new(ScriptedServer::default());
    let (mut s, _sink) = session(&api);
    s.enter("R1");
    settle().await;

    drop(s);
    sleep(Duration::from_secs(10)).await;
    assert_eq!(api.polls(), 1);
}

#[tokio::test(start_paused = true)]
async fn test_poll_on_demand() {
    let api = Arc::new(ScriptedServer::default());
    let (mut s, _sink) = session(&api);
    s.enter("R1");
    settle().await;

    api.push("R1", "Bob", "now");
    s.poll().await.expect("poll");
    assert_eq!(s.snapshot().len(), 1);

    api.fail_polls.store(true, Ordering::SeqCst);
    assert!(s.poll().await.is_err());
    assert_eq!(s.snapshot().len(), 1);
}
