use crate::error::{CoreError, Result};
use crate::traits::{
    ConversationStore, DecisionLog, EmbeddingStore, FeedbackLog, MessageStore, PreferencesStore,
    ProfileStore,
};
use crate::types::{
    ConversationId, ConversationSummary, DecisionRecord, Feedback, FeedbackRecord, LearnedProfile,
    Message, MessageId, StoredEmbedding, UserId, UserPreferences,
};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use dashmap::DashMap;
use std::sync::Mutex;

/// In-memory implementation of every store seam. Backs the embedded
/// deployment mode and every test that needs a message/conversation
/// substrate without a real messaging platform behind it.
#[derive(Default)]
pub struct MemoryStore {
    messages: DashMap<MessageId, Message>,
    conversations: DashMap<ConversationId, ConversationSummary>,
    unread: DashMap<(UserId, ConversationId), Vec<MessageId>>,
    embeddings: DashMap<MessageId, StoredEmbedding>,
    preferences: DashMap<UserId, UserPreferences>,
    profiles: DashMap<UserId, LearnedProfile>,
    feedback: Mutex<Vec<FeedbackRecord>>,
    decisions: Mutex<Vec<DecisionRecord>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_conversation(&self, summary: ConversationSummary) {
        self.conversations.insert(summary.id.clone(), summary);
    }

    /// Record an inbound message: stores it, bumps conversation activity,
    /// and marks it unread for every participant except the sender.
    pub fn add_message(&self, message: Message) -> Result<()> {
        let conversation = self
            .conversations
            .get(&message.conversation_id)
            .ok_or_else(|| {
                CoreError::NotFound(format!("conversation {}", message.conversation_id))
            })?;
        let participants = conversation.participants.clone();
        drop(conversation);

        if let Some(mut c) = self.conversations.get_mut(&message.conversation_id) {
            c.last_activity = message.timestamp;
        }
        for participant in participants {
            if participant == message.sender_id {
                continue;
            }
            self.unread
                .entry((participant, message.conversation_id.clone()))
                .or_default()
                .push(message.id.clone());
        }
        self.messages.insert(message.id.clone(), message);
        Ok(())
    }

    pub fn mark_read(&self, user_id: &UserId, conversation_id: &ConversationId) {
        self.unread
            .remove(&(user_id.clone(), conversation_id.clone()));
    }
}

#[async_trait]
impl MessageStore for MemoryStore {
    async fn messages_since(
        &self,
        user_id: &UserId,
        since: DateTime<Utc>,
        limit: usize,
    ) -> Result<Vec<Message>> {
        let mut out: Vec<Message> = self
            .messages
            .iter()
            .filter(|entry| {
                let m = entry.value();
                if m.timestamp < since {
                    return false;
                }
                self.conversations
                    .get(&m.conversation_id)
                    .map(|c| c.participants.contains(user_id))
                    .unwrap_or(false)
            })
            .map(|entry| entry.value().clone())
            .collect();
        out.sort_by(|a, b| b.timestamp.cmp(&a.timestamp));
        out.truncate(limit);
        Ok(out)
    }

    async fn unread_messages(
        &self,
        user_id: &UserId,
        conversation_id: &ConversationId,
    ) -> Result<Vec<Message>> {
        let Some(ids) = self
            .unread
            .get(&(user_id.clone(), conversation_id.clone()))
        else {
            return Ok(Vec::new());
        };
        let mut out: Vec<Message> = ids
            .iter()
            .filter_map(|id| self.messages.get(id).map(|m| m.clone()))
            .collect();
        out.sort_by(|a, b| a.timestamp.cmp(&b.timestamp));
        Ok(out)
    }

    async fn message_by_id(&self, message_id: &MessageId) -> Result<Option<Message>> {
        Ok(self.messages.get(message_id).map(|m| m.clone()))
    }
}

#[async_trait]
impl ConversationStore for MemoryStore {
    async fn conversation(&self, id: &ConversationId) -> Result<Option<ConversationSummary>> {
        Ok(self.conversations.get(id).map(|c| c.clone()))
    }

    async fn conversations_active_since(
        &self,
        user_id: &UserId,
        since: DateTime<Utc>,
    ) -> Result<Vec<ConversationSummary>> {
        let mut out: Vec<ConversationSummary> = self
            .conversations
            .iter()
            .filter(|entry| {
                let c = entry.value();
                c.participants.contains(user_id) && c.last_activity >= since
            })
            .map(|entry| {
                let mut c = entry.value().clone();
                c.unread_count = self
                    .unread
                    .get(&(user_id.clone(), c.id.clone()))
                    .map(|ids| ids.len())
                    .unwrap_or(0);
                c
            })
            .collect();
        out.sort_by(|a, b| b.last_activity.cmp(&a.last_activity));
        Ok(out)
    }

    async fn is_participant(
        &self,
        user_id: &UserId,
        conversation_id: &ConversationId,
    ) -> Result<bool> {
        Ok(self
            .conversations
            .get(conversation_id)
            .map(|c| c.participants.contains(user_id))
            .unwrap_or(false))
    }
}

#[async_trait]
impl EmbeddingStore for MemoryStore {
    async fn get(&self, message_id: &MessageId) -> Result<Option<StoredEmbedding>> {
        Ok(self.embeddings.get(message_id).map(|e| e.clone()))
    }

    async fn put(&self, embedding: StoredEmbedding) -> Result<()> {
        self.embeddings
            .insert(embedding.message_id.clone(), embedding);
        Ok(())
    }
}

#[async_trait]
impl PreferencesStore for MemoryStore {
    async fn get(&self, user_id: &UserId) -> Result<Option<UserPreferences>> {
        Ok(self.preferences.get(user_id).map(|p| p.clone()))
    }

    async fn put(&self, user_id: &UserId, preferences: &UserPreferences) -> Result<()> {
        self.preferences.insert(user_id.clone(), preferences.clone());
        Ok(())
    }
}

#[async_trait]
impl ProfileStore for MemoryStore {
    async fn get(&self, user_id: &UserId) -> Result<Option<LearnedProfile>> {
        Ok(self.profiles.get(user_id).map(|p| p.clone()))
    }

    async fn put(&self, user_id: &UserId, profile: &LearnedProfile) -> Result<()> {
        self.profiles.insert(user_id.clone(), profile.clone());
        Ok(())
    }
}

#[async_trait]
impl FeedbackLog for MemoryStore {
    async fn append(&self, record: &FeedbackRecord) -> Result<()> {
        self.feedback
            .lock()
            .map_err(|e| CoreError::Storage(e.to_string()))?
            .push(record.clone());
        Ok(())
    }

    async fn list_for_user(&self, user_id: &UserId) -> Result<Vec<FeedbackRecord>> {
        Ok(self
            .feedback
            .lock()
            .map_err(|e| CoreError::Storage(e.to_string()))?
            .iter()
            .filter(|r| &r.user_id == user_id)
            .cloned()
            .collect())
    }

    async fn users_with_feedback(&self) -> Result<Vec<UserId>> {
        let guard = self
            .feedback
            .lock()
            .map_err(|e| CoreError::Storage(e.to_string()))?;
        let mut users: Vec<UserId> = Vec::new();
        for record in guard.iter() {
            if !users.contains(&record.user_id) {
                users.push(record.user_id.clone());
            }
        }
        Ok(users)
    }
}

#[async_trait]
impl DecisionLog for MemoryStore {
    async fn append(&self, record: &DecisionRecord) -> Result<()> {
        self.decisions
            .lock()
            .map_err(|e| CoreError::Storage(e.to_string()))?
            .push(record.clone());
        Ok(())
    }

    async fn attach_feedback(
        &self,
        user_id: &UserId,
        message_id: &MessageId,
        feedback: Feedback,
    ) -> Result<bool> {
        let mut guard = self
            .decisions
            .lock()
            .map_err(|e| CoreError::Storage(e.to_string()))?;
        let hit = guard
            .iter_mut()
            .rev()
            .find(|r| &r.user_id == user_id && r.decision.message_ids.contains(message_id));
        match hit {
            Some(record) => {
                record.feedback = Some(feedback);
                Ok(true)
            }
            None => Ok(false),
        }
    }

    async fn list_for_user(&self, user_id: &UserId, limit: usize) -> Result<Vec<DecisionRecord>> {
        let guard = self
            .decisions
            .lock()
            .map_err(|e| CoreError::Storage(e.to_string()))?;
        let mut out: Vec<DecisionRecord> = guard
            .iter()
            .filter(|r| &r.user_id == user_id)
            .cloned()
            .collect();
        out.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        out.truncate(limit);
        Ok(out)
    }
}
