//! Deterministic fallback rules.
//!
//! Evaluated over the single newest unread message only: resurfacing older
//! unread content from a fallback path would notify about stale messages.
//! Rules run in fixed priority order, first match wins.

use chrono::Utc;
use pd_core::{
    FallbackStrategy, Message, MessageId, NotificationDecision, Priority, UserPreferences,
    truncate_notification_text,
};

const QUESTION_OPENERS: &[&str] = &[
    "can ", "could ", "would ", "will ", "should ", "shall ", "do ", "does ", "did ", "is ",
    "are ", "who ", "what ", "when ", "where ", "why ", "how ",
];

/// Rule-based decision over the newest unread message. `aliases` are the
/// names/ids a mention of the target user can appear under.
pub fn fallback_decision(
    newest: &Message,
    message_ids: Vec<MessageId>,
    aliases: &[String],
    preferences: &UserPreferences,
) -> NotificationDecision {
    let text = truncate_notification_text(&format!("{}: {}", newest.sender_name, newest.text));
    let base = |should_notify: bool, reason: String, priority: Priority| NotificationDecision {
        should_notify,
        reason,
        notification_text: text.clone(),
        priority,
        timestamp: Utc::now(),
        conversation_id: newest.conversation_id.clone(),
        message_ids: message_ids.clone(),
    };

    match preferences.fallback_strategy {
        FallbackStrategy::NotifyAll => {
            return base(
                true,
                "fallback strategy notify_all".to_string(),
                Priority::Medium,
            );
        }
        FallbackStrategy::SuppressAll => {
            return base(
                false,
                "fallback strategy suppress_all".to_string(),
                Priority::Low,
            );
        }
        FallbackStrategy::Rules => {}
    }

    let lower = newest.text.to_lowercase();

    if let Some(alias) = aliases
        .iter()
        .find(|a| !a.is_empty() && lower.contains(&format!("@{}", a.to_lowercase())))
    {
        return base(
            true,
            format!("direct mention of @{alias}"),
            Priority::High,
        );
    }

    if let Some(keyword) = preferences
        .priority_keywords
        .iter()
        .find(|k| !k.is_empty() && lower.contains(&k.to_lowercase()))
    {
        return base(
            true,
            format!("matches priority keyword {keyword:?}"),
            Priority::Medium,
        );
    }

    if is_direct_question(&lower) {
        return base(
            true,
            "looks like a direct question".to_string(),
            Priority::Medium,
        );
    }

    base(
        false,
        "no notify-worthy signal in newest message".to_string(),
        Priority::Low,
    )
}

fn is_direct_question(lower: &str) -> bool {
    let trimmed = lower.trim();
    if trimmed.ends_with('?') {
        return true;
    }
    QUESTION_OPENERS.iter().any(|opener| trimmed.starts_with(opener))
}
