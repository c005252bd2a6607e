use crate::error::Result;
use crate::types::{
    ConversationId, ConversationSummary, DecisionRecord, Feedback, FeedbackRecord, LearnedProfile,
    Message, MessageId, StoredEmbedding, UserId, UserPreferences,
};
use async_trait::async_trait;
use chrono::{DateTime, Utc};

/// Read side of the message system. Owned by the surrounding platform;
/// the pipeline only ever pulls bounded windows.
#[async_trait]
pub trait MessageStore: Send + Sync {
    /// Messages visible to the user across their conversations since
    /// `since`, newest-first, at most `limit`.
    async fn messages_since(
        &self,
        user_id: &UserId,
        since: DateTime<Utc>,
        limit: usize,
    ) -> Result<Vec<Message>>;

    /// The user's unread messages in one conversation, oldest-first.
    async fn unread_messages(
        &self,
        user_id: &UserId,
        conversation_id: &ConversationId,
    ) -> Result<Vec<Message>>;

    async fn message_by_id(&self, message_id: &MessageId) -> Result<Option<Message>>;

    async fn message_exists(&self, message_id: &MessageId) -> Result<bool> {
        Ok(self.message_by_id(message_id).await?.is_some())
    }
}

#[async_trait]
pub trait ConversationStore: Send + Sync {
    async fn conversation(&self, id: &ConversationId) -> Result<Option<ConversationSummary>>;

    /// Conversations the user participates in with any activity since `since`.
    async fn conversations_active_since(
        &self,
        user_id: &UserId,
        since: DateTime<Utc>,
    ) -> Result<Vec<ConversationSummary>>;

    async fn is_participant(
        &self,
        user_id: &UserId,
        conversation_id: &ConversationId,
    ) -> Result<bool>;
}

/// Cached embedding vectors keyed by message id. Entries carry their
/// creation time so callers can enforce a freshness window.
#[async_trait]
pub trait EmbeddingStore: Send + Sync {
    async fn get(&self, message_id: &MessageId) -> Result<Option<StoredEmbedding>>;
    async fn put(&self, embedding: StoredEmbedding) -> Result<()>;
}

#[async_trait]
pub trait PreferencesStore: Send + Sync {
    async fn get(&self, user_id: &UserId) -> Result<Option<UserPreferences>>;
    async fn put(&self, user_id: &UserId, preferences: &UserPreferences) -> Result<()>;
}

#[async_trait]
pub trait ProfileStore: Send + Sync {
    async fn get(&self, user_id: &UserId) -> Result<Option<LearnedProfile>>;
    async fn put(&self, user_id: &UserId, profile: &LearnedProfile) -> Result<()>;
}

#[async_trait]
pub trait FeedbackLog: Send + Sync {
    async fn append(&self, record: &FeedbackRecord) -> Result<()>;
    async fn list_for_user(&self, user_id: &UserId) -> Result<Vec<FeedbackRecord>>;
    async fn users_with_feedback(&self) -> Result<Vec<UserId>>;
}

#[async_trait]
pub trait DecisionLog: Send + Sync {
    async fn append(&self, record: &DecisionRecord) -> Result<()>;

    /// Attach feedback to the most recent decision covering `message_id`.
    /// Returns false when no matching decision exists.
    async fn attach_feedback(
        &self,
        user_id: &UserId,
        message_id: &MessageId,
        feedback: Feedback,
    ) -> Result<bool>;

    async fn list_for_user(&self, user_id: &UserId, limit: usize) -> Result<Vec<DecisionRecord>>;
}
