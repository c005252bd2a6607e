//! Decision prompt assembly.
//!
//! The policy is fixed; the context block and the learned-profile section
//! vary per call. The model is asked for a strict JSON object so the
//! engine can validate fields mechanically.

use pd_core::{ConversationSummary, Message, UserContext};
use pd_llm::ChatMessage;

const DECISION_POLICY: &str = "\
You decide whether a batch of unread chat messages deserves an interruptive \
notification for one user. Apply this policy:

ALWAYS notify: a direct mention of the user, a direct question to them, a \
task assignment, or urgent/blocking language.
NEVER notify: casual or social chatter, information the user already has, \
or messages in the conversation the user is actively viewing.
CONDITIONALLY notify: messages matching the user's priority keywords or \
learned keywords.

Respond with a single JSON object and nothing else:
{\"shouldNotify\": boolean, \"reason\": string, \"notificationText\": string \
(max 100 chars), \"priority\": \"high\"|\"medium\"|\"low\"}";

pub fn build_decision_prompt(
    context: &UserContext,
    conversation: &ConversationSummary,
    unread: &[Message],
) -> Vec<ChatMessage> {
    let mut body = String::new();

    body.push_str(&format!(
        "User: {}\nConversation: {} ({}{} unread)\n",
        context.user_id,
        conversation.name,
        if conversation.is_group { "group, " } else { "" },
        unread.len(),
    ));

    if !context.preferences.priority_keywords.is_empty() {
        body.push_str(&format!(
            "Priority keywords: {}\n",
            context.preferences.priority_keywords.join(", ")
        ));
    }

    if let Some(profile) = &context.learned_profile {
        body.push_str(&format!(
            "Learned profile: prefers {:?} notification volume (feedback accuracy {:.2}).\n",
            profile.preferred_notification_rate, profile.accuracy,
        ));
        if !profile.learned_keywords.is_empty() {
            body.push_str(&format!(
                "Learned keywords: {}\n",
                profile.learned_keywords.join(", ")
            ));
        }
        if !profile.suppressed_topics.is_empty() {
            body.push_str(&format!(
                "Suppressed topics (user found these unhelpful): {}\n",
                profile.suppressed_topics.join(", ")
            ));
        }
    }

    if !context.conversations.is_empty() {
        body.push_str("\nActive conversations:\n");
        for c in context.conversations.iter().take(10) {
            body.push_str(&format!(
                "- {} ({} unread{})\n",
                c.name,
                c.unread_count,
                if c.is_group { ", group" } else { "" }
            ));
        }
    }

    if !context.semantic_matches.is_empty() {
        body.push_str("\nSimilar past messages:\n");
        for m in &context.semantic_matches {
            body.push_str(&format!(
                "- [{:.2}] {}: {}\n",
                m.similarity, m.message.sender_name, m.message.text
            ));
        }
    }

    body.push_str("\nUnread messages (oldest first):\n");
    for m in unread {
        body.push_str(&format!("- {}: {}\n", m.sender_name, m.text));
    }

    body.push_str("\nDecide now.");

    vec![
        ChatMessage::system(DECISION_POLICY),
        ChatMessage::user(body),
    ]
}
