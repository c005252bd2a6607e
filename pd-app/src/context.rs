//! Context assembly for a decision: recent messages, conversation
//! summaries, preferences, learned profile, and optional semantic matches.
//!
//! Assembly is pull-based: a function of (user, now) over the stores, with
//! no live subscriptions. Embeddings are generated lazily, only when
//! semantic search actually runs, and reused from the embedding store while
//! fresh. Assembled bundles are cached for a short TTL so a burst of
//! triggers does not re-fetch everything.

use crate::model::DecisionModel;
use chrono::{Duration as ChronoDuration, Utc};
use dashmap::DashMap;
use pd_core::{
    ConversationStore, EmbeddingStore, Message, MessageId, MessageStore, PreferencesStore,
    ProfileStore, Result, SemanticMatch, StoredEmbedding, UserContext, UserId, cosine_similarity,
};
use std::sync::Arc;
use std::time::{Duration, Instant};

#[derive(Debug, Clone)]
pub struct ContextConfig {
    pub window_days: i64,
    pub max_messages: usize,
    pub semantic_top_k: usize,
    pub context_ttl: Duration,
    pub embedding_max_age_days: i64,
}

impl Default for ContextConfig {
    fn default() -> Self {
        Self {
            window_days: 7,
            max_messages: 50,
            semantic_top_k: 5,
            context_ttl: Duration::from_secs(300),
            embedding_max_age_days: 7,
        }
    }
}

struct CachedContext {
    context: UserContext,
    cached_at: Instant,
}

pub struct ContextAssembler {
    messages: Arc<dyn MessageStore>,
    conversations: Arc<dyn ConversationStore>,
    preferences: Arc<dyn PreferencesStore>,
    profiles: Arc<dyn ProfileStore>,
    embeddings: Arc<dyn EmbeddingStore>,
    model: Option<Arc<dyn DecisionModel>>,
    cache: DashMap<(UserId, Option<MessageId>), CachedContext>,
    cfg: ContextConfig,
}

impl ContextAssembler {
    pub fn new(
        messages: Arc<dyn MessageStore>,
        conversations: Arc<dyn ConversationStore>,
        preferences: Arc<dyn PreferencesStore>,
        profiles: Arc<dyn ProfileStore>,
        embeddings: Arc<dyn EmbeddingStore>,
        model: Option<Arc<dyn DecisionModel>>,
        cfg: ContextConfig,
    ) -> Self {
        Self {
            messages,
            conversations,
            preferences,
            profiles,
            embeddings,
            model,
            cache: DashMap::new(),
            cfg,
        }
    }

    #[tracing::instrument(level = "debug", skip_all, fields(user_id = %user_id))]
    pub async fn assemble(
        &self,
        user_id: &UserId,
        trigger: Option<&Message>,
    ) -> Result<UserContext> {
        let cache_key = (user_id.clone(), trigger.map(|m| m.id.clone()));
        if let Some(cached) = self.cache.get(&cache_key) {
            if cached.cached_at.elapsed() < self.cfg.context_ttl {
                tracing::debug!("context cache hit");
                return Ok(cached.context.clone());
            }
        }

        let since = Utc::now() - ChronoDuration::days(self.cfg.window_days);
        let conversations = self
            .conversations
            .conversations_active_since(user_id, since)
            .await?;
        let recent_messages = self
            .messages
            .messages_since(user_id, since, self.cfg.max_messages)
            .await?;
        let preferences = self.preferences.get(user_id).await?.unwrap_or_default();
        let learned_profile = self.profiles.get(user_id).await?;

        let semantic_matches = match trigger {
            Some(t) => self.semantic_matches(t, &recent_messages).await,
            None => Vec::new(),
        };

        let context = UserContext {
            user_id: user_id.clone(),
            recent_messages,
            conversations,
            preferences,
            learned_profile,
            semantic_matches,
        };

        // Trigger ids never repeat, so stale keys are unreachable; sweep
        // them out whenever a fresh bundle is cached.
        self.cache
            .retain(|_, cached| cached.cached_at.elapsed() < self.cfg.context_ttl);
        self.cache.insert(
            cache_key,
            CachedContext {
                context: context.clone(),
                cached_at: Instant::now(),
            },
        );
        Ok(context)
    }

    /// Semantic search is best-effort enrichment: any provider or store
    /// trouble degrades to an empty match list, never to a failed decision.
    async fn semantic_matches(&self, trigger: &Message, recent: &[Message]) -> Vec<SemanticMatch> {
        let Some(model) = self.model.as_ref() else {
            return Vec::new();
        };

        let trigger_vector = match self.vector_for(model.as_ref(), trigger).await {
            Ok(Some(v)) => v,
            Ok(None) => return Vec::new(),
            Err(e) => {
                tracing::debug!(%e, "trigger embedding unavailable; skipping semantic search");
                return Vec::new();
            }
        };

        let candidates: Vec<&Message> = recent.iter().filter(|m| m.id != trigger.id).collect();
        let mut scored: Vec<SemanticMatch> = Vec::new();
        for candidate in candidates {
            let vector = match self.vector_for(model.as_ref(), candidate).await {
                Ok(Some(v)) => v,
                Ok(None) => continue,
                Err(e) => {
                    tracing::debug!(%e, "candidate embedding failed; skipping semantic search");
                    return Vec::new();
                }
            };
            let similarity = cosine_similarity(&trigger_vector, &vector);
            if similarity > 0.0 {
                scored.push(SemanticMatch {
                    message: candidate.clone(),
                    similarity,
                });
            }
        }

        scored.sort_by(|a, b| {
            b.similarity
                .partial_cmp(&a.similarity)
                .unwrap_or(std::cmp::Ordering::Equal)
        });
        scored.truncate(self.cfg.semantic_top_k);
        scored
    }

    /// Cached vector when fresh, otherwise embed and write back.
    async fn vector_for(
        &self,
        model: &dyn DecisionModel,
        message: &Message,
    ) -> Result<Option<Vec<f32>>> {
        let max_age = ChronoDuration::days(self.cfg.embedding_max_age_days);
        if let Some(cached) = self.embeddings.get(&message.id).await? {
            if Utc::now() - cached.created_at < max_age {
                return Ok(Some(cached.vector));
            }
        }

        let vectors = match model.embed(std::slice::from_ref(&message.text)).await {
            Ok(v) => v,
            Err(pd_llm::LlmError::Unsupported(_)) => return Ok(None),
            Err(e) => return Err(pd_core::CoreError::Transient(e.to_string())),
        };
        let Some(vector) = vectors.into_iter().next() else {
            return Ok(None);
        };
        self.embeddings
            .put(StoredEmbedding {
                message_id: message.id.clone(),
                vector: vector.clone(),
                created_at: Utc::now(),
            })
            .await?;
        Ok(Some(vector))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use pd_core::{ConversationSummary, MemoryStore};
    use pd_llm::{ChatMessage, ChatResponse, CompletionOptions, Usage};
    use std::sync::atomic::{AtomicUsize, Ordering};

    /// Embeds "deploy"-themed texts along one axis and everything else
    /// along another, so similarity ranking is deterministic.
    struct StubModel {
        embed_calls: AtomicUsize,
    }

    impl StubModel {
        fn new() -> Self {
            Self {
                embed_calls: AtomicUsize::new(0),
            }
        }
    }

    #[async_trait]
    impl DecisionModel for StubModel {
        async fn complete(
            &self,
            _messages: &[ChatMessage],
            _opts: &CompletionOptions,
        ) -> pd_llm::Result<ChatResponse> {
            Ok(ChatResponse {
                content: "{}".to_string(),
                usage: Usage::default(),
                finish_reason: "stop".to_string(),
            })
        }

        async fn embed(&self, texts: &[String]) -> pd_llm::Result<Vec<Vec<f32>>> {
            self.embed_calls.fetch_add(1, Ordering::SeqCst);
            Ok(texts
                .iter()
                .map(|t| {
                    if t.contains("deploy") {
                        vec![1.0, 0.0]
                    } else {
                        vec![0.0, 1.0]
                    }
                })
                .collect())
        }
    }

    fn seeded_store() -> Arc<MemoryStore> {
        let store = Arc::new(MemoryStore::new());
        store.add_conversation(ConversationSummary {
            id: "c1".into(),
            name: "ops".to_string(),
            unread_count: 0,
            is_group: true,
            participants: vec!["alice".into(), "bob".into()],
            last_activity: Utc::now(),
        });
        for (id, sender, text) in [
            ("m1", "alice", "did the deploy finish"),
            ("m2", "alice", "lunch plans anyone"),
            ("m3", "alice", "deploy is rolling back"),
        ] {
            store
                .add_message(Message {
                    id: id.into(),
                    conversation_id: "c1".into(),
                    text: text.to_string(),
                    timestamp: Utc::now(),
                    sender_id: sender.into(),
                    sender_name: sender.to_string(),
                })
                .expect("seed message");
        }
        store
    }

    fn assembler(store: Arc<MemoryStore>, model: Option<Arc<dyn DecisionModel>>) -> ContextAssembler {
        ContextAssembler::new(
            store.clone(),
            store.clone(),
            store.clone(),
            store.clone(),
            store,
            model,
            ContextConfig::default(),
        )
    }

    fn trigger() -> Message {
        Message {
            id: "m9".into(),
            conversation_id: "c1".into(),
            text: "deploy broke again".to_string(),
            timestamp: Utc::now(),
            sender_id: "alice".into(),
            sender_name: "alice".to_string(),
        }
    }

    #[tokio::test]
    async fn semantic_matches_rank_similar_messages_first() {
        let store = seeded_store();
        let model = Arc::new(StubModel::new());
        let assembler = assembler(store, Some(model));

        let bob: UserId = "bob".into();
        let ctx = assembler
            .assemble(&bob, Some(&trigger()))
            .await
            .expect("assemble");

        assert_eq!(ctx.recent_messages.len(), 3);
        assert!(!ctx.semantic_matches.is_empty());
        // Both deploy-themed messages outrank the lunch message.
        assert!(ctx.semantic_matches[0].message.text.contains("deploy"));
        assert!(ctx.semantic_matches[0].similarity > 0.9);
    }

    #[tokio::test]
    async fn context_cache_amortizes_bursts() {
        let store = seeded_store();
        let model = Arc::new(StubModel::new());
        let model_dyn: Arc<dyn DecisionModel> = model.clone();
        let assembler = assembler(store, Some(model_dyn));

        let bob: UserId = "bob".into();
        let t = trigger();
        assembler.assemble(&bob, Some(&t)).await.expect("assemble");
        let calls_after_first = model.embed_calls.load(Ordering::SeqCst);
        assert!(calls_after_first > 0);

        assembler.assemble(&bob, Some(&t)).await.expect("assemble");
        assert_eq!(model.embed_calls.load(Ordering::SeqCst), calls_after_first);
    }

    #[tokio::test]
    async fn fresh_cached_embeddings_are_reused() {
        let store = seeded_store();
        let t = trigger();
        // Pre-seed every embedding the search would need.
        for (id, vector) in [
            ("m9", vec![1.0, 0.0]),
            ("m1", vec![1.0, 0.0]),
            ("m2", vec![0.0, 1.0]),
            ("m3", vec![1.0, 0.0]),
        ] {
            EmbeddingStore::put(
                store.as_ref(),
                StoredEmbedding {
                    message_id: id.into(),
                    vector,
                    created_at: Utc::now(),
                },
            )
            .await
            .expect("seed embedding");
        }

        let model = Arc::new(StubModel::new());
        let model_dyn: Arc<dyn DecisionModel> = model.clone();
        let assembler = assembler(store, Some(model_dyn));

        let bob: UserId = "bob".into();
        let ctx = assembler.assemble(&bob, Some(&t)).await.expect("assemble");
        assert!(!ctx.semantic_matches.is_empty());
        assert_eq!(model.embed_calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn stale_context_entries_are_swept_on_insert() {
        let store = seeded_store();
        let assembler = ContextAssembler::new(
            store.clone(),
            store.clone(),
            store.clone(),
            store.clone(),
            store,
            None,
            ContextConfig {
                context_ttl: Duration::from_millis(20),
                ..ContextConfig::default()
            },
        );

        let bob: UserId = "bob".into();
        let mut first = trigger();
        first.id = "t1".into();
        assembler.assemble(&bob, Some(&first)).await.expect("assemble");
        assert_eq!(assembler.cache.len(), 1);

        std::thread::sleep(Duration::from_millis(40));

        // A new trigger id is a new key; the expired bundle must not linger.
        let mut second = trigger();
        second.id = "t2".into();
        assembler.assemble(&bob, Some(&second)).await.expect("assemble");
        assert_eq!(assembler.cache.len(), 1);
    }

    #[tokio::test]
    async fn no_model_means_no_semantic_matches() {
        let store = seeded_store();
        let assembler = assembler(store, None);

        let bob: UserId = "bob".into();
        let ctx = assembler
            .assemble(&bob, Some(&trigger()))
            .await
            .expect("assemble");
        assert!(ctx.semantic_matches.is_empty());
        assert_eq!(ctx.recent_messages.len(), 3);
    }
}
