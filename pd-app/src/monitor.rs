//! Per-conversation activity monitor: decides WHEN to ask for a decision.
//!
//! One cancelable pending trigger per (user, conversation) at any time,
//! replace-not-queue: every new message cancels the previous trigger and
//! schedules a fresh one for `pause_threshold_seconds` of silence. A
//! sustained burst therefore postpones analysis until the chat naturally
//! pauses; there is deliberately no maximum-wait ceiling forcing an
//! analysis mid-burst.
//!
//! A trigger that fires re-verifies its preconditions before invoking the
//! engine, so a message racing the timer can never produce a stale
//! analysis.

use crate::engine::{DecisionEngine, Outcome};
use dashmap::DashMap;
use pd_core::{ConversationId, Message, PreferencesStore, UserId};
use std::collections::VecDeque;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

#[derive(Debug, Clone)]
pub struct MonitorConfig {
    /// Length of the rolling message-arrival window.
    pub window_seconds: u64,
    /// Window count at which a conversation is flagged threshold-exceeded.
    pub message_threshold_count: usize,
    /// Minimum spacing between analyses of one conversation.
    pub debounce_window_seconds: u64,
}

impl Default for MonitorConfig {
    fn default() -> Self {
        Self {
            window_seconds: 300,
            message_threshold_count: 5,
            debounce_window_seconds: 60,
        }
    }
}

/// A decision the monitor produced for the push/display layer.
#[derive(Debug, Clone)]
pub struct Delivery {
    pub user_id: UserId,
    pub outcome: Outcome,
}

#[derive(Default)]
struct ConversationActivityState {
    last_message_time: Option<Instant>,
    window: VecDeque<Instant>,
    threshold_exceeded: bool,
    pending: Option<CancellationToken>,
    last_analysis_time: Option<Instant>,
    /// Bumped on every arrival; a fired trigger aborts if it no longer
    /// matches (a newer message won the race against the timer).
    seq: u64,
}

struct MonitorInner {
    states: DashMap<(UserId, ConversationId), ConversationActivityState>,
    active: Arc<DashMap<UserId, ConversationId>>,
    engine: Arc<DecisionEngine>,
    preferences: Arc<dyn PreferencesStore>,
    deliveries: mpsc::Sender<Delivery>,
    cfg: MonitorConfig,
    shutdown: CancellationToken,
}

#[derive(Clone)]
pub struct ActivityMonitor {
    inner: Arc<MonitorInner>,
}

impl ActivityMonitor {
    pub fn new(
        engine: Arc<DecisionEngine>,
        preferences: Arc<dyn PreferencesStore>,
        deliveries: mpsc::Sender<Delivery>,
        cfg: MonitorConfig,
    ) -> Self {
        let active = engine.active_conversations();
        Self {
            inner: Arc::new(MonitorInner {
                states: DashMap::new(),
                active,
                engine,
                preferences,
                deliveries,
                cfg,
                shutdown: CancellationToken::new(),
            }),
        }
    }

    /// Record a message arrival for one recipient and (re)schedule the
    /// pause trigger for its conversation.
    #[tracing::instrument(level = "debug", skip_all, fields(user_id = %user_id, conversation_id = %message.conversation_id))]
    pub async fn record_message(&self, user_id: &UserId, message: &Message) {
        let preferences = match self.inner.preferences.get(user_id).await {
            Ok(Some(p)) => p,
            Ok(None) => Default::default(),
            Err(e) => {
                tracing::warn!(error = %e, "preferences unavailable; using defaults");
                Default::default()
            }
        };
        let pause = Duration::from_secs(preferences.pause_threshold_seconds);
        let window = Duration::from_secs(self.inner.cfg.window_seconds);
        let key = (user_id.clone(), message.conversation_id.clone());

        let is_active = self
            .inner
            .active
            .get(user_id)
            .map(|c| *c.value() == message.conversation_id)
            .unwrap_or(false);

        let (token, seq) = {
            let mut state = self.inner.states.entry(key.clone()).or_default();
            let now = Instant::now();
            state.last_message_time = Some(now);
            state.window.push_back(now);
            while let Some(front) = state.window.front() {
                if now.duration_since(*front) > window {
                    state.window.pop_front();
                } else {
                    break;
                }
            }
            if state.window.len() >= self.inner.cfg.message_threshold_count {
                // Flagged, but analysis still waits for the next pause.
                state.threshold_exceeded = true;
            }
            if let Some(pending) = state.pending.take() {
                pending.cancel();
            }
            state.seq += 1;
            let seq = state.seq;

            // No trigger while the user is looking at this conversation.
            if is_active {
                return;
            }

            let token = self.inner.shutdown.child_token();
            state.pending = Some(token.clone());
            (token, seq)
        };

        let monitor = self.clone();
        tokio::spawn(async move {
            tokio::select! {
                _ = token.cancelled() => {}
                _ = tokio::time::sleep(pause) => {
                    monitor.fire(key, seq, pause).await;
                }
            }
        });
    }

    /// Mark the conversation the user is currently viewing (or `None`).
    /// Any pending trigger for the newly-active conversation is canceled.
    pub fn set_active_conversation(
        &self,
        user_id: &UserId,
        conversation_id: Option<ConversationId>,
    ) {
        match conversation_id {
            Some(conversation_id) => {
                if let Some(mut state) = self
                    .inner
                    .states
                    .get_mut(&(user_id.clone(), conversation_id.clone()))
                {
                    if let Some(pending) = state.pending.take() {
                        pending.cancel();
                    }
                }
                self.inner.active.insert(user_id.clone(), conversation_id);
            }
            None => {
                self.inner.active.remove(user_id);
            }
        }
    }

    pub fn is_threshold_exceeded(&self, user_id: &UserId, conversation_id: &ConversationId) -> bool {
        self.inner
            .states
            .get(&(user_id.clone(), conversation_id.clone()))
            .map(|s| s.threshold_exceeded)
            .unwrap_or(false)
    }

    pub fn reset_conversation(&self, user_id: &UserId, conversation_id: &ConversationId) {
        if let Some((_, state)) = self
            .inner
            .states
            .remove(&(user_id.clone(), conversation_id.clone()))
        {
            if let Some(pending) = state.pending {
                pending.cancel();
            }
        }
    }

    /// Cancel every pending trigger and refuse new ones' completion.
    pub fn shutdown(&self) {
        self.inner.shutdown.cancel();
    }

    async fn fire(&self, key: (UserId, ConversationId), seq: u64, pause: Duration) {
        // Re-verify the pause condition; the guard must not be held across
        // the engine call.
        {
            let Some(state) = self.inner.states.get(&key) else {
                return;
            };
            if state.seq != seq {
                return;
            }
            if let Some(last) = state.last_message_time {
                if last.elapsed() < pause {
                    return;
                }
            }
            if let Some(last_analysis) = state.last_analysis_time {
                if last_analysis.elapsed()
                    < Duration::from_secs(self.inner.cfg.debounce_window_seconds)
                {
                    tracing::debug!("within debounce window; skipping analysis");
                    return;
                }
            }
        }
        let (user_id, conversation_id) = &key;
        if self
            .inner
            .active
            .get(user_id)
            .map(|c| c.value() == conversation_id)
            .unwrap_or(false)
        {
            return;
        }

        match self.inner.engine.decide(user_id, conversation_id).await {
            Ok(outcome) => {
                if let Some(mut state) = self.inner.states.get_mut(&key) {
                    state.last_analysis_time = Some(Instant::now());
                    state.threshold_exceeded = false;
                    // A newer message may have scheduled its own trigger
                    // while the engine ran; its cancellation handle must
                    // survive this completion.
                    if state.seq == seq {
                        state.pending = None;
                    }
                }
                let delivery = Delivery {
                    user_id: user_id.clone(),
                    outcome,
                };
                if let Err(e) = self.inner.deliveries.send(delivery).await {
                    tracing::warn!(error = %e, "delivery channel closed; dropping decision");
                }
            }
            Err(e) => {
                tracing::warn!(error = %e, "decision request rejected");
            }
        }
    }
}
