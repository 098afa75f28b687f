//! Async driver for a [`Reconciler`].
//!
//! A [`ChatSession`] owns one room visit at a time. Entering a room starts a
//! poller task; each submit spawns a delivery task; confirmations schedule
//! one-shot timers that clear just-arrived flags and insert delayed AI
//! replies. Every task is tagged with the visit's epoch and cancelled through
//! a shutdown channel when the visit ends, so nothing from an old room can
//! touch the state of a new one.
//!
//! The reconciler lives behind a `std::sync::Mutex` that is never held
//! across an `.await`.

use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tracing::{debug, error, info, warn};

use crate::client::{ApiError, ChatApi};
use crate::config::ClientConfig;
use crate::engine::{OutgoingMessage, Reconciler};
use crate::models::{now_ms, Message, ReplyTo};
use crate::sounds::{Cue, CueSink};

// ---------------------------------------------------------------------------
// Configuration
// ---------------------------------------------------------------------------

/// Timings of a session. A zero `poll_interval` is treated as 1 ms.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SessionConfig {
    pub poll_interval: Duration,
    /// How long a message stays "just arrived".
    pub new_flag_delay: Duration,
    /// Pause between a send confirmation and showing the AI reply.
    pub ai_reply_delay: Duration,
    /// Max creation-time distance for a poll to supersede a pending entry.
    pub dedup_window: Duration,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            poll_interval: Duration::from_millis(3_000),
            new_flag_delay: Duration::from_millis(1_500),
            ai_reply_delay: Duration::from_millis(800),
            dedup_window: Duration::from_millis(10_000),
        }
    }
}

impl SessionConfig {
    /// Period of the poll ticker, never zero.
    pub fn poll_period(&self) -> Duration {
        self.poll_interval.max(Duration::from_millis(1))
    }
}

impl From<&ClientConfig> for SessionConfig {
    fn from(c: &ClientConfig) -> Self {
        Self {
            poll_interval: c.poll_interval(),
            new_flag_delay: c.new_flag_delay(),
            ai_reply_delay: c.ai_reply_delay(),
            dedup_window: Duration::from_millis(c.dedup_window_ms),
        }
    }
}

// ---------------------------------------------------------------------------
// Shared state
// ---------------------------------------------------------------------------

struct Shared<A> {
    api: Arc<A>,
    state: Mutex<Reconciler>,
    cues: Arc<dyn CueSink>,
    config: SessionConfig,
    changes: watch::Sender<u64>,
}

impl<A: ChatApi + 'static> Shared<A> {
    fn lock(&self) -> MutexGuard<'_, Reconciler> {
        self.state.lock().unwrap_or_else(|p| p.into_inner())
    }

    fn emit(&self, cues: Vec<Cue>) {
        for cue in cues {
            self.cues.play(cue);
        }
        self.changes.send_modify(|v| *v = v.wrapping_add(1));
    }

    /// Run `f` against the state if `epoch` is still the active visit.
    fn apply<R>(&self, epoch: u64, f: impl FnOnce(&mut Reconciler) -> R) -> Option<R> {
        let (result, cues) = {
            let mut state = self.lock();
            if !state.is_current(epoch) {
                return None;
            }
            let result = f(&mut *state);
            (result, state.take_cues())
        };
        self.emit(cues);
        Some(result)
    }

    fn schedule_clear(self: &Arc<Self>, epoch: u64, mut shutdown: watch::Receiver<bool>) {
        let shared = Arc::clone(self);
        tokio::spawn(async move {
            tokio::select! {
                _ = shutdown.changed() => {}
                _ = tokio::time::sleep(shared.config.new_flag_delay) => {
                    shared.apply(epoch, Reconciler::clear_new_flags);
                }
            }
        });
    }

    async fn poll_once(self: &Arc<Self>, epoch: u64, shutdown: &watch::Receiver<bool>) -> Result<(), ApiError> {
        let room_id = {
            let state = self.lock();
            match state.room_id() {
                Some(id) if state.is_current(epoch) => id.to_string(),
                _ => return Ok(()),
            }
        };

        let messages = self.api.fetch_messages(&room_id).await?;
        if let Some(outcome) = self.apply(epoch, |s| s.apply_poll(messages)) {
            if outcome.fresh > 0 || outcome.superseded > 0 {
                debug!(
                    room_id = %room_id,
                    fresh = outcome.fresh,
                    superseded = outcome.superseded,
                    "poll merged"
                );
                self.schedule_clear(epoch, shutdown.clone());
            }
        }
        Ok(())
    }

    /// Poll every `poll_interval` until the visit ends. A failed poll skips
    /// the cycle and leaves the list untouched.
    async fn run_poller(self: Arc<Self>, epoch: u64, mut shutdown: watch::Receiver<bool>) {
        let mut ticker = tokio::time::interval(self.config.poll_period());
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

        let mut consecutive_failures: u32 = 0;

        loop {
            tokio::select! {
                _ = shutdown.changed() => break,
                _ = ticker.tick() => {}
            }

            match self.poll_once(epoch, &shutdown).await {
                Ok(()) => consecutive_failures = 0,
                Err(e) => {
                    consecutive_failures = consecutive_failures.saturating_add(1);

                    if consecutive_failures >= 5 {
                        error!(
                            error = %e,
                            consecutive_failures,
                            "message poll failed repeatedly, will retry next tick"
                        );
                    } else {
                        warn!(error = %e, "message poll failed, will retry next tick");
                    }
                }
            }
        }
        debug!(epoch, "poller stopped");
    }

    async fn deliver(self: Arc<Self>, epoch: u64, outgoing: OutgoingMessage, mut shutdown: watch::Receiver<bool>) {
        let OutgoingMessage { temp_id, request } = outgoing;

        let response = match self.api.send_message(&request).await {
            Ok(response) => response,
            Err(e) => {
                warn!(error = %e, temp_id = %temp_id, "message send failed");
                self.apply(epoch, |s| s.fail_send(&temp_id));
                return;
            }
        };

        let Some(ai_reply) = self.apply(epoch, |s| s.confirm_send(&temp_id, response)) else {
            debug!(temp_id = %temp_id, "confirmation for a finished visit dropped");
            return;
        };
        self.schedule_clear(epoch, shutdown.clone());

        let Some(ai_reply) = ai_reply else { return };
        tokio::select! {
            _ = shutdown.changed() => return,
            _ = tokio::time::sleep(self.config.ai_reply_delay) => {}
        }
        if self.apply(epoch, |s| s.insert_ai_reply(ai_reply)) == Some(true) {
            self.schedule_clear(epoch, shutdown);
        }
    }
}

// ---------------------------------------------------------------------------
// ChatSession
// ---------------------------------------------------------------------------

struct Visit {
    epoch: u64,
    shutdown: watch::Sender<bool>,
    poller: JoinHandle<()>,
}

/// A user's live view of a chat room.
///
/// Must be used from within a tokio runtime. Dropping the session ends the
/// current visit.
pub struct ChatSession<A: ChatApi + 'static> {
    shared: Arc<Shared<A>>,
    visit: Option<Visit>,
}

impl<A: ChatApi + 'static> ChatSession<A> {
    pub fn new(api: Arc<A>, user_name: impl Into<String>, cues: Arc<dyn CueSink>, config: SessionConfig) -> Self {
        let dedup_ms = u64::try_from(config.dedup_window.as_millis()).unwrap_or(u64::MAX);
        let (changes, _) = watch::channel(0);
        Self {
            shared: Arc::new(Shared {
                api,
                state: Mutex::new(Reconciler::new(user_name, dedup_ms)),
                cues,
                config,
                changes,
            }),
            visit: None,
        }
    }

    /// Receiver that is marked changed after every state update.
    pub fn subscribe(&self) -> watch::Receiver<u64> {
        self.shared.changes.subscribe()
    }

    /// Current message list in display order.
    pub fn snapshot(&self) -> Vec<Message> {
        self.shared.lock().messages().to_vec()
    }

    pub fn room_id(&self) -> Option<String> {
        self.shared.lock().room_id().map(str::to_string)
    }

    pub fn reply_target(&self) -> Option<ReplyTo> {
        self.shared.lock().reply_target().cloned()
    }

    pub fn set_draft(&self, text: impl Into<String>) {
        self.shared.lock().set_draft(text);
    }

    /// Enter `room_id`, leaving any current room first. Polling starts
    /// immediately.
    pub fn enter(&mut self, room_id: impl Into<String>) {
        self.leave();
        let room_id = room_id.into();

        let (epoch, cues) = {
            let mut state = self.shared.lock();
            let epoch = state.enter_room(room_id.as_str());
            (epoch, state.take_cues())
        };
        self.shared.emit(cues);

        let (shutdown, rx) = watch::channel(false);
        let poller = tokio::spawn(Arc::clone(&self.shared).run_poller(epoch, rx));
        info!(room_id = %room_id, "entered room");
        self.visit = Some(Visit { epoch, shutdown, poller });
    }

    /// Poll once now, outside the regular schedule.
    ///
    /// # Errors
    /// Returns the [`ApiError`] of the fetch; the list is unchanged then.
    pub async fn poll(&self) -> Result<(), ApiError> {
        let Some(visit) = &self.visit else { return Ok(()) };
        let shutdown = visit.shutdown.subscribe();
        self.shared.poll_once(visit.epoch, &shutdown).await
    }

    /// Send `content` to the current room. Returns the temporary id of the
    /// optimistic entry, or `None` if nothing was sent (blank content or no room).
    pub fn submit(&self, content: &str) -> Option<String> {
        let visit = self.visit.as_ref()?;
        let (outgoing, cues) = {
            let mut state = self.shared.lock();
            let outgoing = state.submit(content, now_ms())?;
            (outgoing, state.take_cues())
        };
        self.shared.emit(cues);

        let temp_id = outgoing.temp_id.clone();
        debug!(temp_id = %temp_id, "message queued");
        self.shared.schedule_clear(visit.epoch, visit.shutdown.subscribe());
        tokio::spawn(Arc::clone(&self.shared).deliver(visit.epoch, outgoing, visit.shutdown.subscribe()));
        Some(temp_id)
    }

    /// Choose the message the next submit replies to; `None` cancels.
    pub fn set_reply_target(&self, message: Option<&Message>) -> bool {
        let changed = self.shared.lock().set_reply_target(message);
        if changed {
            self.shared.emit(Vec::new());
        }
        changed
    }

    /// End the current visit: stop polling, cancel timers, discard the list.
    pub fn leave(&mut self) {
        let Some(visit) = self.visit.take() else { return };
        visit.shutdown.send_replace(true);
        visit.poller.abort();

        let cues = {
            let mut state = self.shared.lock();
            state.leave_room();
            state.take_cues()
        };
        self.shared.emit(cues);
        info!(epoch = visit.epoch, "left room");
    }
}

impl<A: ChatApi + 'static> Drop for ChatSession<A> {
    fn drop(&mut self) {
        self.leave();
    }
}
