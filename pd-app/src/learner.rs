//! Batch learner. Reads accumulated feedback and rewrites each user's
//! learned profile: a preferred notification rate, keywords that tend
//! to be helpful, and topics the user keeps dismissing.

use chrono::Utc;
use cron::Schedule;
use pd_core::{
    CoreError, Feedback, FeedbackLog, FeedbackRecord, LearnedProfile, MessageStore,
    NotificationRate, ProfileStore, Result, UserId,
};
use std::collections::HashMap;
use std::str::FromStr;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;

const MIN_TERM_LEN: usize = 4;
const MIN_TERM_COUNT: usize = 2;
const MAX_TERMS: usize = 10;

const STOPWORDS: &[&str] = &[
    "about", "after", "again", "been", "before", "being", "could", "does", "from", "have", "here",
    "into", "just", "like", "more", "only", "over", "please", "really", "should", "some", "than",
    "that", "their", "them", "then", "there", "they", "this", "very", "want", "were", "what",
    "when", "where", "which", "will", "with", "would", "your",
];

pub struct ProfileLearner {
    messages: Arc<dyn MessageStore>,
    feedback: Arc<dyn FeedbackLog>,
    profiles: Arc<dyn ProfileStore>,
}

impl ProfileLearner {
    pub fn new(
        messages: Arc<dyn MessageStore>,
        feedback: Arc<dyn FeedbackLog>,
        profiles: Arc<dyn ProfileStore>,
    ) -> Self {
        Self {
            messages,
            feedback,
            profiles,
        }
    }

    /// Recomputes profiles for every user with feedback on file.
    /// Returns the number of profiles written.
    #[tracing::instrument(level = "info", skip_all)]
    pub async fn run_once(&self) -> Result<usize> {
        let users = self.feedback.users_with_feedback().await?;
        let mut written = 0;
        for user_id in users {
            match self.learn_user(&user_id).await {
                Ok(true) => written += 1,
                Ok(false) => {}
                Err(error) => {
                    tracing::warn!(%user_id, %error, "profile update failed, skipping user");
                }
            }
        }
        tracing::info!(profiles = written, "learner pass complete");
        Ok(written)
    }

    async fn learn_user(&self, user_id: &UserId) -> Result<bool> {
        let records = self.feedback.list_for_user(user_id).await?;
        if records.is_empty() {
            return Ok(false);
        }

        let helpful = records
            .iter()
            .filter(|r| r.feedback == Feedback::Helpful)
            .count();
        let ratio = helpful as f64 / records.len() as f64;
        let rate = if ratio >= 0.7 {
            NotificationRate::High
        } else if ratio >= 0.4 {
            NotificationRate::Medium
        } else {
            NotificationRate::Low
        };

        let mut helpful_terms: HashMap<String, usize> = HashMap::new();
        let mut dismissed_terms: HashMap<String, usize> = HashMap::new();
        for record in &records {
            let text = self.record_text(record).await?;
            let bucket = match record.feedback {
                Feedback::Helpful => &mut helpful_terms,
                Feedback::NotHelpful => &mut dismissed_terms,
            };
            for term in extract_terms(&text) {
                *bucket.entry(term).or_default() += 1;
            }
        }
        let learned_keywords = top_terms(&helpful_terms);
        // A term the user found helpful anywhere never becomes a
        // suppressed topic, however often it was dismissed.
        let suppressed_topics = top_terms(&dismissed_terms)
            .into_iter()
            .filter(|term| !helpful_terms.contains_key(term))
            .collect();

        let profile = LearnedProfile {
            preferred_notification_rate: rate,
            learned_keywords,
            suppressed_topics,
            accuracy: ratio,
            feedback_count: records.len(),
            updated_at: Utc::now(),
        };
        self.profiles.put(user_id, &profile).await?;
        Ok(true)
    }

    async fn record_text(&self, record: &FeedbackRecord) -> Result<String> {
        Ok(self
            .messages
            .message_by_id(&record.message_id)
            .await?
            .map(|m| m.text)
            .unwrap_or_else(|| record.decision.notification_text.clone()))
    }

    /// Runs the learner on a cron schedule until `shutdown` fires.
    pub async fn run_scheduled(self: Arc<Self>, expression: &str, shutdown: CancellationToken) {
        let schedule = match Schedule::from_str(expression) {
            Ok(schedule) => schedule,
            Err(error) => {
                tracing::error!(%error, expression, "invalid learner schedule, learner disabled");
                return;
            }
        };
        loop {
            let Some(next) = schedule.after(&Utc::now()).next() else {
                tracing::warn!(expression, "learner schedule yields no future run, stopping");
                return;
            };
            let wait = (next - Utc::now())
                .to_std()
                .unwrap_or(std::time::Duration::ZERO);
            tokio::select! {
                _ = shutdown.cancelled() => return,
                _ = tokio::time::sleep(wait) => {}
            }
            if let Err(error) = self.run_once().await {
                tracing::error!(%error, "scheduled learner pass failed");
            }
        }
    }
}

pub fn validate_schedule(expression: &str) -> Result<()> {
    Schedule::from_str(expression)
        .map(|_| ())
        .map_err(|e| CoreError::Configuration(format!("invalid learner schedule: {e}")))
}

fn extract_terms(text: &str) -> Vec<String> {
    text.to_lowercase()
        .split(|c: char| !c.is_alphanumeric())
        .filter(|w| w.len() >= MIN_TERM_LEN && !STOPWORDS.contains(w))
        .map(str::to_string)
        .collect()
}

fn top_terms(counts: &HashMap<String, usize>) -> Vec<String> {
    let mut terms: Vec<(&String, usize)> = counts
        .iter()
        .filter(|&(_, &count)| count >= MIN_TERM_COUNT)
        .map(|(term, &count)| (term, count))
        .collect();
    terms.sort_by(|a, b| b.1.cmp(&a.1).then_with(|| a.0.cmp(b.0)));
    terms
        .into_iter()
        .take(MAX_TERMS)
        .map(|(term, _)| term.clone())
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use pd_core::{MemoryStore, MessageId, NotificationDecision, Priority, ProfileStore};
    use uuid::Uuid;

    fn feedback_record(
        user: &str,
        message_id: &str,
        feedback: Feedback,
        text: &str,
    ) -> FeedbackRecord {
        FeedbackRecord {
            id: Uuid::new_v4(),
            user_id: user.into(),
            conversation_id: "c1".into(),
            message_id: message_id.into(),
            feedback,
            decision: NotificationDecision {
                should_notify: true,
                reason: "test".to_string(),
                notification_text: format!("Alice: {text}"),
                priority: Priority::Medium,
                timestamp: Utc::now(),
                conversation_id: "c1".into(),
                message_ids: vec![MessageId::from(message_id)],
            },
            submitted_at: Utc::now(),
        }
    }

    fn learner(store: &Arc<MemoryStore>) -> ProfileLearner {
        ProfileLearner::new(store.clone(), store.clone(), store.clone())
    }

    #[tokio::test]
    async fn mostly_helpful_feedback_yields_high_rate() {
        let store = Arc::new(MemoryStore::new());
        for i in 0..9 {
            FeedbackLog::append(
                store.as_ref(),
                &feedback_record("bob", &format!("m{i}"), Feedback::Helpful, "deploy broke"),
            )
            .await
            .expect("append");
        }
        FeedbackLog::append(
            store.as_ref(),
            &feedback_record("bob", "m9", Feedback::NotHelpful, "lunch plans"),
        )
        .await
        .expect("append");

        let written = learner(&store).run_once().await.expect("run");
        assert_eq!(written, 1);

        let profile = ProfileStore::get(store.as_ref(), &"bob".into())
            .await
            .expect("get")
            .expect("profile exists");
        assert_eq!(profile.preferred_notification_rate, NotificationRate::High);
        assert!((profile.accuracy - 0.9).abs() < 1e-9);
        assert_eq!(profile.feedback_count, 10);
    }

    #[tokio::test]
    async fn mixed_feedback_yields_medium_then_low() {
        let store = Arc::new(MemoryStore::new());
        for i in 0..5 {
            FeedbackLog::append(
                store.as_ref(),
                &feedback_record("bob", &format!("h{i}"), Feedback::Helpful, "status check"),
            )
            .await
            .expect("append");
            FeedbackLog::append(
                store.as_ref(),
                &feedback_record("bob", &format!("n{i}"), Feedback::NotHelpful, "memes again"),
            )
            .await
            .expect("append");
        }
        for i in 0..3 {
            FeedbackLog::append(
                store.as_ref(),
                &feedback_record("carol", &format!("c{i}"), Feedback::NotHelpful, "noise"),
            )
            .await
            .expect("append");
        }

        learner(&store).run_once().await.expect("run");

        let bob = ProfileStore::get(store.as_ref(), &"bob".into())
            .await
            .expect("get")
            .expect("profile");
        assert_eq!(bob.preferred_notification_rate, NotificationRate::Medium);

        let carol = ProfileStore::get(store.as_ref(), &"carol".into())
            .await
            .expect("get")
            .expect("profile");
        assert_eq!(carol.preferred_notification_rate, NotificationRate::Low);
    }

    #[tokio::test]
    async fn keywords_come_from_repeated_helpful_terms() {
        let store = Arc::new(MemoryStore::new());
        for (i, text) in [
            "deploy pipeline failed",
            "deploy pipeline stuck",
            "random chatter",
        ]
        .iter()
        .enumerate()
        {
            FeedbackLog::append(
                store.as_ref(),
                &feedback_record("bob", &format!("m{i}"), Feedback::Helpful, text),
            )
            .await
            .expect("append");
        }
        for i in 0..2 {
            FeedbackLog::append(
                store.as_ref(),
                &feedback_record("bob", &format!("d{i}"), Feedback::NotHelpful, "lunch orders"),
            )
            .await
            .expect("append");
        }

        learner(&store).run_once().await.expect("run");
        let profile = ProfileStore::get(store.as_ref(), &"bob".into())
            .await
            .expect("get")
            .expect("profile");

        assert!(profile.learned_keywords.contains(&"deploy".to_string()));
        assert!(profile.learned_keywords.contains(&"pipeline".to_string()));
        // Only seen once each, below the repeat threshold.
        assert!(!profile.learned_keywords.contains(&"random".to_string()));
        assert!(profile.suppressed_topics.contains(&"lunch".to_string()));
    }

    #[tokio::test]
    async fn helpful_terms_never_become_suppressed_topics() {
        let store = Arc::new(MemoryStore::new());
        for i in 0..2 {
            FeedbackLog::append(
                store.as_ref(),
                &feedback_record("bob", &format!("h{i}"), Feedback::Helpful, "standup notes"),
            )
            .await
            .expect("append");
            FeedbackLog::append(
                store.as_ref(),
                &feedback_record("bob", &format!("n{i}"), Feedback::NotHelpful, "standup notes"),
            )
            .await
            .expect("append");
        }

        learner(&store).run_once().await.expect("run");
        let profile = ProfileStore::get(store.as_ref(), &"bob".into())
            .await
            .expect("get")
            .expect("profile");
        assert!(profile.learned_keywords.contains(&"standup".to_string()));
        assert!(!profile.suppressed_topics.contains(&"standup".to_string()));
    }

    #[tokio::test]
    async fn falls_back_to_notification_text_for_pruned_messages() {
        let store = Arc::new(MemoryStore::new());
        // No message rows seeded, so text must come from the snapshot.
        for i in 0..2 {
            FeedbackLog::append(
                store.as_ref(),
                &feedback_record("bob", &format!("m{i}"), Feedback::Helpful, "incident open"),
            )
            .await
            .expect("append");
        }

        learner(&store).run_once().await.expect("run");
        let profile = ProfileStore::get(store.as_ref(), &"bob".into())
            .await
            .expect("get")
            .expect("profile");
        assert!(profile.learned_keywords.contains(&"incident".to_string()));
    }

    #[test]
    fn schedule_validation() {
        assert!(validate_schedule("0 0 3 * * Sun *").is_ok());
        assert!(validate_schedule("not a schedule").is_err());
    }

    #[test]
    fn term_extraction_filters_short_and_stopwords() {
        let terms = extract_terms("Can you check the deploy? It is very broken");
        assert!(terms.contains(&"deploy".to_string()));
        assert!(terms.contains(&"check".to_string()));
        assert!(terms.contains(&"broken".to_string()));
        assert!(!terms.contains(&"very".to_string()));
        assert!(!terms.contains(&"is".to_string()));
    }
}
