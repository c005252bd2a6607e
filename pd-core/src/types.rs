use chrono::{DateTime, Timelike, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::ops::Deref;
use uuid::Uuid;

macro_rules! id_newtype {
    ($name:ident) => {
        #[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
        #[serde(transparent)]
        pub struct $name(String);

        impl $name {
            pub fn new(value: impl Into<String>) -> Self {
                Self(value.into())
            }

            pub fn as_str(&self) -> &str {
                &self.0
            }

            pub fn into_inner(self) -> String {
                self.0
            }
        }

        impl From<String> for $name {
            fn from(value: String) -> Self {
                Self::new(value)
            }
        }

        impl From<&str> for $name {
            fn from(value: &str) -> Self {
                Self::new(value)
            }
        }

        impl From<$name> for String {
            fn from(value: $name) -> Self {
                value.0
            }
        }

        impl AsRef<str> for $name {
            fn as_ref(&self) -> &str {
                self.as_str()
            }
        }

        impl Deref for $name {
            type Target = str;

            fn deref(&self) -> &Self::Target {
                self.as_str()
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str(self.as_str())
            }
        }
    };
}

id_newtype!(MessageId);
id_newtype!(ConversationId);
id_newtype!(UserId);

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Message {
    pub id: MessageId,
    pub conversation_id: ConversationId,
    pub text: String,
    pub timestamp: DateTime<Utc>,
    pub sender_id: UserId,
    pub sender_name: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConversationSummary {
    pub id: ConversationId,
    pub name: String,
    pub unread_count: usize,
    pub is_group: bool,
    pub participants: Vec<UserId>,
    pub last_activity: DateTime<Utc>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Priority {
    High,
    Medium,
    Low,
}

impl Priority {
    pub fn parse(value: &str) -> Option<Self> {
        match value.trim().to_ascii_lowercase().as_str() {
            "high" => Some(Self::High),
            "medium" => Some(Self::Medium),
            "low" => Some(Self::Low),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::High => "high",
            Self::Medium => "medium",
            Self::Low => "low",
        }
    }
}

pub const MAX_NOTIFICATION_TEXT_CHARS: usize = 100;

/// Truncate to the notification text budget, char-aware, appending an
/// ellipsis when anything was cut. Output never exceeds 100 chars.
pub fn truncate_notification_text(text: &str) -> String {
    if text.chars().count() <= MAX_NOTIFICATION_TEXT_CHARS {
        return text.to_string();
    }
    let mut out: String = text.chars().take(MAX_NOTIFICATION_TEXT_CHARS - 1).collect();
    out.push('…');
    out
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NotificationDecision {
    pub should_notify: bool,
    pub reason: String,
    pub notification_text: String,
    pub priority: Priority,
    pub timestamp: DateTime<Utc>,
    pub conversation_id: ConversationId,
    pub message_ids: Vec<MessageId>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DecisionSource {
    Model,
    Fallback,
    Cached,
}

/// Audit row: one per delivered decision, feedback attached later.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DecisionRecord {
    pub id: Uuid,
    pub user_id: UserId,
    pub decision: NotificationDecision,
    pub source: DecisionSource,
    pub feedback: Option<Feedback>,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Feedback {
    Helpful,
    NotHelpful,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FeedbackRecord {
    pub id: Uuid,
    pub user_id: UserId,
    pub conversation_id: ConversationId,
    pub message_id: MessageId,
    pub feedback: Feedback,
    pub decision: NotificationDecision,
    pub submitted_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FallbackStrategy {
    #[default]
    Rules,
    NotifyAll,
    SuppressAll,
}

/// Local-time window during which notifications are suppressed.
/// Supports wrapping intervals (e.g. 22 -> 7).
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct QuietHours {
    pub start_hour: u8,
    pub end_hour: u8,
    pub timezone_offset_minutes: i32,
}

impl QuietHours {
    pub fn contains(&self, now: DateTime<Utc>) -> bool {
        let local = now + chrono::Duration::minutes(self.timezone_offset_minutes as i64);
        let hour = local.hour() as u8;
        if self.start_hour == self.end_hour {
            return false;
        }
        if self.start_hour < self.end_hour {
            hour >= self.start_hour && hour < self.end_hour
        } else {
            hour >= self.start_hour || hour < self.end_hour
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UserPreferences {
    pub enabled: bool,
    pub pause_threshold_seconds: u64,
    pub active_conversation_threshold: usize,
    pub quiet_hours: Option<QuietHours>,
    pub priority_keywords: Vec<String>,
    pub max_analyses_per_hour: u32,
    pub fallback_strategy: FallbackStrategy,
}

impl Default for UserPreferences {
    fn default() -> Self {
        Self {
            enabled: true,
            pause_threshold_seconds: 120,
            active_conversation_threshold: 5,
            quiet_hours: None,
            priority_keywords: Vec::new(),
            max_analyses_per_hour: 10,
            fallback_strategy: FallbackStrategy::Rules,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum NotificationRate {
    High,
    Medium,
    Low,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LearnedProfile {
    pub preferred_notification_rate: NotificationRate,
    pub learned_keywords: Vec<String>,
    pub suppressed_topics: Vec<String>,
    pub accuracy: f64,
    pub feedback_count: usize,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StoredEmbedding {
    pub message_id: MessageId,
    pub vector: Vec<f32>,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize)]
pub struct SemanticMatch {
    pub message: Message,
    pub similarity: f64,
}

/// Everything the decision engine knows about a user at evaluation time.
#[derive(Debug, Clone, Serialize)]
pub struct UserContext {
    pub user_id: UserId,
    pub recent_messages: Vec<Message>,
    pub conversations: Vec<ConversationSummary>,
    pub preferences: UserPreferences,
    pub learned_profile: Option<LearnedProfile>,
    pub semantic_matches: Vec<SemanticMatch>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn truncation_respects_char_budget() {
        let short = "hello";
        assert_eq!(truncate_notification_text(short), "hello");

        let long = "x".repeat(250);
        let truncated = truncate_notification_text(&long);
        assert_eq!(truncated.chars().count(), MAX_NOTIFICATION_TEXT_CHARS);
        assert!(truncated.ends_with('…'));

        let exact = "y".repeat(MAX_NOTIFICATION_TEXT_CHARS);
        assert_eq!(truncate_notification_text(&exact), exact);
    }

    #[test]
    fn truncation_is_char_aware_for_multibyte_text() {
        let long = "日".repeat(150);
        let truncated = truncate_notification_text(&long);
        assert_eq!(truncated.chars().count(), MAX_NOTIFICATION_TEXT_CHARS);
    }

    #[test]
    fn priority_parses_case_insensitively() {
        assert_eq!(Priority::parse("HIGH"), Some(Priority::High));
        assert_eq!(Priority::parse(" medium "), Some(Priority::Medium));
        assert_eq!(Priority::parse("urgent"), None);
    }

    #[test]
    fn quiet_hours_plain_interval() {
        let qh = QuietHours {
            start_hour: 9,
            end_hour: 17,
            timezone_offset_minutes: 0,
        };
        let inside = DateTime::parse_from_rfc3339("2026-08-24T12:00:00Z")
            .expect("parse")
            .with_timezone(&Utc);
        let outside = DateTime::parse_from_rfc3339("2026-08-24T20:00:00Z")
            .expect("parse")
            .with_timezone(&Utc);
        assert!(qh.contains(inside));
        assert!(!qh.contains(outside));
    }

    #[test]
    fn quiet_hours_wrapping_interval() {
        let qh = QuietHours {
            start_hour: 22,
            end_hour: 7,
            timezone_offset_minutes: 0,
        };
        let late = DateTime::parse_from_rfc3339("2026-08-24T23:30:00Z")
            .expect("parse")
            .with_timezone(&Utc);
        let early = DateTime::parse_from_rfc3339("2026-08-24T06:00:00Z")
            .expect("parse")
            .with_timezone(&Utc);
        let midday = DateTime::parse_from_rfc3339("2026-08-24T12:00:00Z")
            .expect("parse")
            .with_timezone(&Utc);
        assert!(qh.contains(late));
        assert!(qh.contains(early));
        assert!(!qh.contains(midday));
    }

    #[test]
    fn quiet_hours_respect_timezone_offset() {
        // 22:00 UTC is 17:00 at UTC-5; quiet hours 22-7 local should not match.
        let qh = QuietHours {
            start_hour: 22,
            end_hour: 7,
            timezone_offset_minutes: -300,
        };
        let utc_evening = DateTime::parse_from_rfc3339("2026-08-24T22:00:00Z")
            .expect("parse")
            .with_timezone(&Utc);
        assert!(!qh.contains(utc_evening));
    }
}
