//! Feedback intake. Each submission is validated against the message
//! store, snapshotted together with the decision it rates, and stamped
//! onto the audit log so the learner sees both sides.

use chrono::Utc;
use pd_core::{
    ConversationId, CoreError, DecisionLog, Feedback, FeedbackLog, FeedbackRecord, MessageId,
    MessageStore, Result, UserId,
};
use std::sync::Arc;
use uuid::Uuid;

const DECISION_LOOKBACK: usize = 200;

pub struct FeedbackService {
    messages: Arc<dyn MessageStore>,
    feedback: Arc<dyn FeedbackLog>,
    decisions: Arc<dyn DecisionLog>,
}

impl FeedbackService {
    pub fn new(
        messages: Arc<dyn MessageStore>,
        feedback: Arc<dyn FeedbackLog>,
        decisions: Arc<dyn DecisionLog>,
    ) -> Self {
        Self {
            messages,
            feedback,
            decisions,
        }
    }

    /// Records a helpful / not-helpful verdict for the decision that
    /// covered `message_id` and returns the stored record.
    #[tracing::instrument(level = "debug", skip_all, fields(user_id = %user_id, message_id = %message_id))]
    pub async fn submit(
        &self,
        user_id: &UserId,
        conversation_id: &ConversationId,
        message_id: &MessageId,
        feedback: Feedback,
    ) -> Result<FeedbackRecord> {
        if message_id.as_str().trim().is_empty() {
            return Err(CoreError::Validation("message id is empty".to_string()));
        }
        if !self.messages.message_exists(message_id).await? {
            return Err(CoreError::Validation(format!(
                "unknown message id {message_id}"
            )));
        }

        let decision = self
            .decisions
            .list_for_user(user_id, DECISION_LOOKBACK)
            .await?
            .into_iter()
            .find(|record| record.decision.message_ids.contains(message_id))
            .ok_or_else(|| {
                CoreError::NotFound(format!("no decision covers message {message_id}"))
            })?;

        let record = FeedbackRecord {
            id: Uuid::new_v4(),
            user_id: user_id.clone(),
            conversation_id: conversation_id.clone(),
            message_id: message_id.clone(),
            feedback,
            decision: decision.decision.clone(),
            submitted_at: Utc::now(),
        };
        self.feedback.append(&record).await?;

        if !self
            .decisions
            .attach_feedback(user_id, message_id, feedback)
            .await?
        {
            tracing::warn!(%user_id, %message_id, "feedback stored but no decision row updated");
        }

        Ok(record)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use pd_core::{
        ConversationSummary, DecisionRecord, DecisionSource, MemoryStore, Message,
        NotificationDecision, Priority,
    };

    fn seeded_store() -> Arc<MemoryStore> {
        let store = Arc::new(MemoryStore::new());
        store.add_conversation(ConversationSummary {
            id: "c1".into(),
            name: "ops".to_string(),
            unread_count: 0,
            is_group: true,
            participants: vec!["bob".into(), "alice".into()],
            last_activity: Utc::now(),
        });
        store.add_message(Message {
            id: "m1".into(),
            conversation_id: "c1".into(),
            text: "deploy is failing".to_string(),
            timestamp: Utc::now(),
            sender_id: "alice".into(),
            sender_name: "Alice".to_string(),
        });
        store
    }

    async fn seed_decision(store: &MemoryStore, message_ids: &[&str]) {
        let record = DecisionRecord {
            id: Uuid::new_v4(),
            user_id: "bob".into(),
            decision: NotificationDecision {
                should_notify: true,
                reason: "deploy failure".to_string(),
                notification_text: "Alice: deploy is failing".to_string(),
                priority: Priority::High,
                timestamp: Utc::now(),
                conversation_id: "c1".into(),
                message_ids: message_ids.iter().map(|id| MessageId::from(*id)).collect(),
            },
            source: DecisionSource::Model,
            feedback: None,
            created_at: Utc::now(),
        };
        DecisionLog::append(store, &record).await.expect("append");
    }

    fn service(store: Arc<MemoryStore>) -> FeedbackService {
        FeedbackService::new(store.clone(), store.clone(), store)
    }

    #[tokio::test]
    async fn submit_snapshots_decision_and_updates_log() {
        let store = seeded_store();
        seed_decision(&store, &["m1"]).await;
        let svc = service(store.clone());

        let record = svc
            .submit(&"bob".into(), &"c1".into(), &"m1".into(), Feedback::Helpful)
            .await
            .expect("submit");
        assert_eq!(record.feedback, Feedback::Helpful);
        assert_eq!(record.decision.priority, Priority::High);

        let decisions = DecisionLog::list_for_user(store.as_ref(), &"bob".into(), 10)
            .await
            .expect("list");
        assert_eq!(decisions[0].feedback, Some(Feedback::Helpful));
    }

    #[tokio::test]
    async fn unknown_message_is_a_validation_error() {
        let store = seeded_store();
        seed_decision(&store, &["m1"]).await;
        let svc = service(store);

        let err = svc
            .submit(&"bob".into(), &"c1".into(), &"m9".into(), Feedback::Helpful)
            .await
            .expect_err("must reject");
        assert!(matches!(err, CoreError::Validation(_)));
    }

    #[tokio::test]
    async fn message_without_covering_decision_is_not_found() {
        let store = seeded_store();
        let svc = service(store);

        let err = svc
            .submit(&"bob".into(), &"c1".into(), &"m1".into(), Feedback::Helpful)
            .await
            .expect_err("must reject");
        assert!(matches!(err, CoreError::NotFound(_)));
    }

    #[tokio::test]
    async fn empty_message_id_is_rejected_before_lookup() {
        let store = seeded_store();
        let svc = service(store);

        let err = svc
            .submit(&"bob".into(), &"c1".into(), &"  ".into(), Feedback::Helpful)
            .await
            .expect_err("must reject");
        assert!(matches!(err, CoreError::Validation(_)));
    }
}
