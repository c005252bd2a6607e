//! Pindrop domain types and collaborator seams.
//!
//! The decision pipeline consumes messages, conversations, preferences,
//! embeddings, and feedback through the traits defined here; `pd-app` wires
//! real stores behind them.

mod error;
mod memory;
mod similarity;
mod traits;
mod types;

pub use error::{CoreError, Result};
pub use memory::MemoryStore;
pub use similarity::cosine_similarity;
pub use traits::{
    ConversationStore, DecisionLog, EmbeddingStore, FeedbackLog, MessageStore, PreferencesStore,
    ProfileStore,
};
pub use types::{
    ConversationId, ConversationSummary, DecisionRecord, DecisionSource, FallbackStrategy,
    Feedback, FeedbackRecord, LearnedProfile, Message, MessageId, NotificationDecision,
    NotificationRate, Priority, QuietHours, SemanticMatch, StoredEmbedding, UserContext, UserId,
    UserPreferences, MAX_NOTIFICATION_TEXT_CHARS, truncate_notification_text,
};
