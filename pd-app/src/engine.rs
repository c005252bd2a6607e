//! Decision orchestration: cache -> context -> model -> validation ->
//! fallback-on-failure -> cache write.
//!
//! The trigger caller never sees a model failure. Timeouts, provider rate
//! limits, and malformed output all land on the deterministic fallback;
//! only authorization failures surface as errors.

use crate::cache::{DecisionCache, decision_cache_key};
use crate::context::ContextAssembler;
use crate::heuristics;
use crate::model::DecisionModel;
use crate::prompt::build_decision_prompt;
use crate::ratelimit::RateLimiter;
use chrono::Utc;
use dashmap::DashMap;
use pd_core::{
    ConversationId, ConversationStore, CoreError, DecisionLog, DecisionRecord, DecisionSource,
    Message, MessageId, MessageStore, NotificationDecision, PreferencesStore, Priority, Result,
    UserId, UserPreferences, truncate_notification_text,
};
use pd_llm::CompletionOptions;
use serde::Deserialize;
use std::sync::Arc;
use std::time::Duration;
use uuid::Uuid;

#[derive(Debug, Clone)]
pub struct EngineConfig {
    pub cache_ttl: Duration,
    pub model_timeout: Duration,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            cache_ttl: Duration::from_secs(3600),
            model_timeout: Duration::from_secs(10),
        }
    }
}

#[derive(Debug, Clone)]
pub struct Outcome {
    pub decision: NotificationDecision,
    pub source: DecisionSource,
}

pub struct DecisionEngine {
    model: Option<Arc<dyn DecisionModel>>,
    messages: Arc<dyn MessageStore>,
    conversations: Arc<dyn ConversationStore>,
    preferences: Arc<dyn PreferencesStore>,
    decisions: Arc<dyn DecisionLog>,
    assembler: Arc<ContextAssembler>,
    cache: DecisionCache,
    limiter: RateLimiter,
    active: Arc<DashMap<UserId, ConversationId>>,
    cfg: EngineConfig,
}

impl DecisionEngine {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        model: Option<Arc<dyn DecisionModel>>,
        messages: Arc<dyn MessageStore>,
        conversations: Arc<dyn ConversationStore>,
        preferences: Arc<dyn PreferencesStore>,
        decisions: Arc<dyn DecisionLog>,
        assembler: Arc<ContextAssembler>,
        active: Arc<DashMap<UserId, ConversationId>>,
        cfg: EngineConfig,
    ) -> Self {
        if model.is_none() {
            // ConfigurationError: the model path is down until credentials
            // are provided. Loud once here, warn per decision below.
            tracing::error!(
                "no model provider configured; decision path degraded to fallback heuristics"
            );
        }
        Self {
            model,
            messages,
            conversations,
            preferences,
            decisions,
            assembler,
            cache: DecisionCache::new(cfg.cache_ttl),
            limiter: RateLimiter::hourly(),
            active,
            cfg,
        }
    }

    /// The actively-viewed conversation map is shared with the monitor so
    /// both sides enforce the same invariant.
    pub fn active_conversations(&self) -> Arc<DashMap<UserId, ConversationId>> {
        self.active.clone()
    }

    #[tracing::instrument(level = "info", skip_all, fields(user_id = %user_id, conversation_id = %conversation_id))]
    pub async fn decide(
        &self,
        user_id: &UserId,
        conversation_id: &ConversationId,
    ) -> Result<Outcome> {
        if !self
            .conversations
            .is_participant(user_id, conversation_id)
            .await?
        {
            return Err(CoreError::Authorization(format!(
                "user {user_id} is not a participant of conversation {conversation_id}"
            )));
        }

        let preferences = self.preferences.get(user_id).await?.unwrap_or_default();
        if !preferences.enabled {
            return Ok(self.suppressed(conversation_id, vec![], "notifications disabled"));
        }

        let unread = self.messages.unread_messages(user_id, conversation_id).await?;
        if unread.is_empty() {
            return Ok(self.suppressed(conversation_id, vec![], "no unread messages"));
        }
        let unread_ids: Vec<MessageId> = unread.iter().map(|m| m.id.clone()).collect();

        // Never notify for the conversation the user is looking at.
        if self
            .active
            .get(user_id)
            .map(|c| c.value() == conversation_id)
            .unwrap_or(false)
        {
            return Ok(self.suppressed(
                conversation_id,
                unread_ids,
                "conversation is actively viewed",
            ));
        }

        if let Some(quiet) = &preferences.quiet_hours {
            if quiet.contains(Utc::now()) {
                return Ok(self.suppressed(conversation_id, unread_ids, "quiet hours"));
            }
        }

        let key = decision_cache_key(conversation_id, &unread_ids);
        if let Some(entry) = self.cache.get(&key) {
            tracing::debug!("decision cache hit");
            return Ok(Outcome {
                decision: entry.decision,
                source: DecisionSource::Cached,
            });
        }

        // Oldest-first list; the newest message drives the fallback rules.
        let newest = unread
            .last()
            .ok_or_else(|| CoreError::Validation("unread batch became empty".to_string()))?;

        let outcome = if !self
            .limiter
            .check_and_record(user_id, preferences.max_analyses_per_hour)
        {
            tracing::warn!(max = preferences.max_analyses_per_hour, "hourly analysis ceiling hit");
            self.fallback_outcome(user_id, newest, unread_ids.clone(), &preferences)
        } else {
            match self
                .model_decision(user_id, conversation_id, newest, &unread)
                .await
            {
                Ok(decision) => Outcome {
                    decision,
                    source: DecisionSource::Model,
                },
                Err(e) if e.falls_back() => {
                    tracing::warn!(error = %e, "model path failed; using fallback heuristics");
                    self.fallback_outcome(user_id, newest, unread_ids.clone(), &preferences)
                }
                Err(e) => return Err(e),
            }
        };

        self.cache
            .put(key, outcome.decision.clone(), outcome.source);
        self.record(user_id, &outcome).await;
        Ok(outcome)
    }

    async fn model_decision(
        &self,
        user_id: &UserId,
        conversation_id: &ConversationId,
        newest: &Message,
        unread: &[Message],
    ) -> Result<NotificationDecision> {
        let Some(model) = self.model.as_ref() else {
            return Err(CoreError::Configuration(
                "no model provider configured".to_string(),
            ));
        };

        let context = self.assembler.assemble(user_id, Some(newest)).await?;
        let conversation = self
            .conversations
            .conversation(conversation_id)
            .await?
            .ok_or_else(|| CoreError::NotFound(format!("conversation {conversation_id}")))?;
        let prompt = build_decision_prompt(&context, &conversation, unread);

        let opts = CompletionOptions::default();
        let response = match tokio::time::timeout(
            self.cfg.model_timeout,
            model.complete(&prompt, &opts),
        )
        .await
        {
            Ok(Ok(response)) => response,
            Ok(Err(e)) if e.is_transient() => {
                return Err(CoreError::Transient(e.to_string()));
            }
            Ok(Err(e)) => return Err(CoreError::Validation(e.to_string())),
            Err(_) => {
                return Err(CoreError::Transient(format!(
                    "model call exceeded {:?}",
                    self.cfg.model_timeout
                )));
            }
        };

        let mut decision = parse_model_decision(&response.content)?;
        decision.timestamp = Utc::now();
        decision.conversation_id = conversation_id.clone();
        decision.message_ids = unread.iter().map(|m| m.id.clone()).collect();
        Ok(decision)
    }

    fn fallback_outcome(
        &self,
        user_id: &UserId,
        newest: &Message,
        unread_ids: Vec<MessageId>,
        preferences: &UserPreferences,
    ) -> Outcome {
        // The stores carry no display-name record for the target user, so
        // mention matching can only use the raw user id.
        let aliases = vec![user_id.to_string()];
        Outcome {
            decision: heuristics::fallback_decision(newest, unread_ids, &aliases, preferences),
            source: DecisionSource::Fallback,
        }
    }

    fn suppressed(
        &self,
        conversation_id: &ConversationId,
        message_ids: Vec<MessageId>,
        reason: &str,
    ) -> Outcome {
        Outcome {
            decision: NotificationDecision {
                should_notify: false,
                reason: reason.to_string(),
                notification_text: String::new(),
                priority: Priority::Low,
                timestamp: Utc::now(),
                conversation_id: conversation_id.clone(),
                message_ids,
            },
            source: DecisionSource::Fallback,
        }
    }

    /// Audit logging is best-effort; a storage hiccup must not turn a
    /// computed decision into a caller-visible error.
    async fn record(&self, user_id: &UserId, outcome: &Outcome) {
        let record = DecisionRecord {
            id: Uuid::new_v4(),
            user_id: user_id.clone(),
            decision: outcome.decision.clone(),
            source: outcome.source,
            feedback: None,
            created_at: Utc::now(),
        };
        if let Err(e) = self.decisions.append(&record).await {
            tracing::warn!(error = %e, "failed to append decision audit record");
        }
    }
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ModelDecision {
    should_notify: bool,
    reason: String,
    notification_text: String,
    priority: String,
}

/// Strict-parse the model output: all four fields present, priority from
/// the closed set, text within budget. Anything else is a ValidationError
/// logged with the raw payload for audit.
fn parse_model_decision(raw: &str) -> Result<NotificationDecision> {
    let stripped = strip_code_fences(raw);
    let parsed: ModelDecision = serde_json::from_str(stripped).map_err(|e| {
        tracing::warn!(raw, "model returned malformed decision JSON");
        CoreError::Validation(format!("malformed decision JSON: {e}"))
    })?;
    let priority = Priority::parse(&parsed.priority).ok_or_else(|| {
        tracing::warn!(raw, "model returned out-of-set priority");
        CoreError::Validation(format!("invalid priority {:?}", parsed.priority))
    })?;
    Ok(NotificationDecision {
        should_notify: parsed.should_notify,
        reason: parsed.reason,
        notification_text: truncate_notification_text(&parsed.notification_text),
        priority,
        timestamp: Utc::now(),
        conversation_id: "".into(),
        message_ids: Vec::new(),
    })
}

fn strip_code_fences(raw: &str) -> &str {
    let trimmed = raw.trim();
    let Some(inner) = trimmed.strip_prefix("```") else {
        return trimmed;
    };
    let inner = inner.strip_prefix("json").unwrap_or(inner);
    inner.trim_start().strip_suffix("```").unwrap_or(inner).trim()
}
