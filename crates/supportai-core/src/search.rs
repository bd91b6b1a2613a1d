//! Knowledge-base retrieval with pluggable ranking strategies.
//!
//! Callers ask a [`ChunkRanker`] for "relevant chunks for this app, best
//! first, capped at N". Two strategies implement it:
//!
//! | Strategy | Ranker | Backing operation |
//! |----------|--------|-------------------|
//! | `lexical` | [`LexicalRanker`] | [`KnowledgeStore::keyword_search`] (FTS5 bm25 in SQLite) |
//! | `vector` | [`VectorRanker`] | [`KnowledgeStore::vector_search`] with a minimum cosine score |
//!
//! Deployment configuration picks one; the chat pipeline never knows which.

use std::collections::HashSet;
use std::sync::Arc;

use anyhow::Result;
use async_trait::async_trait;

use crate::embedding::Embedder;
use crate::models::ScoredChunk;
use crate::store::KnowledgeStore;

/// Default number of chunks returned to the chat pipeline.
pub const DEFAULT_LIMIT: usize = 5;

/// Default minimum cosine similarity for vector ranking.
pub const DEFAULT_MIN_SCORE: f32 = 0.7;

/// English words ignored by lexical search.
const STOP_WORDS: &[&str] = &[
    "a", "about", "an", "and", "are", "as", "at", "be", "but", "by", "can", "could", "did", "do",
    "does", "for", "from", "had", "has", "have", "he", "her", "him", "his", "how", "i", "if", "in",
    "into", "is", "it", "its", "me", "my", "no", "not", "of", "on", "or", "our", "she", "so",
    "than", "that", "the", "their", "them", "then", "there", "these", "they", "this", "to", "was",
    "we", "were", "what", "when", "where", "which", "who", "why", "will", "with", "would", "you",
    "your",
];

/// Normalize a free-text query into lexical search terms.
///
/// Lower-cases, splits on anything that is not alphanumeric, drops stop
/// words, and de-duplicates while keeping first-seen order.
pub fn query_terms(query: &str) -> Vec<String> {
    let mut seen = HashSet::new();
    query
        .split(|c: char| !c.is_alphanumeric())
        .filter(|t| !t.is_empty())
        .map(|t| t.to_lowercase())
        .filter(|t| !STOP_WORDS.contains(&t.as_str()))
        .filter(|t| seen.insert(t.clone()))
        .collect()
}

/// A ranking strategy over one app's knowledge base.
#[async_trait]
pub trait ChunkRanker: Send + Sync {
    /// Strategy name as written in configuration.
    fn name(&self) -> &'static str;

    /// Up to `limit` chunks of `app_key` relevant to `query`, best first.
    ///
    /// An empty result is a normal outcome. Store failures propagate.
    async fn rank(
        &self,
        store: &dyn KnowledgeStore,
        app_key: &str,
        query: &str,
        limit: usize,
    ) -> Result<Vec<ScoredChunk>>;
}

/// Term-based relevance scoring delegated to the store's text index.
pub struct LexicalRanker;

#[async_trait]
impl ChunkRanker for LexicalRanker {
    fn name(&self) -> &'static str {
        "lexical"
    }

    async fn rank(
        &self,
        store: &dyn KnowledgeStore,
        app_key: &str,
        query: &str,
        limit: usize,
    ) -> Result<Vec<ScoredChunk>> {
        let terms = query_terms(query);
        if terms.is_empty() || limit == 0 {
            return Ok(Vec::new());
        }
        store.keyword_search(app_key, &terms, limit).await
    }
}

/// Embedding-similarity scoring with a minimum-score cutoff.
pub struct VectorRanker {
    embedder: Arc<dyn Embedder>,
    min_score: f32,
}

impl VectorRanker {
    pub fn new(embedder: Arc<dyn Embedder>, min_score: f32) -> Self {
        Self {
            embedder,
            min_score,
        }
    }
}

#[async_trait]
impl ChunkRanker for VectorRanker {
    fn name(&self) -> &'static str {
        "vector"
    }

    async fn rank(
        &self,
        store: &dyn KnowledgeStore,
        app_key: &str,
        query: &str,
        limit: usize,
    ) -> Result<Vec<ScoredChunk>> {
        if query.trim().is_empty() || limit == 0 {
            return Ok(Vec::new());
        }
        let query_vec = self.embedder.embed_query(query).await?;
        store
            .vector_search(app_key, &query_vec, self.min_score, limit)
            .await
    }
}

/// Sort best-first with a stable tie-break on id, then truncate.
pub fn sort_and_truncate(results: &mut Vec<ScoredChunk>, limit: usize) {
    results.sort_by(|a, b| {
        b.score
            .partial_cmp(&a.score)
            .unwrap_or(std::cmp::Ordering::Equal)
            .then_with(|| a.id.cmp(&b.id))
    });
    results.truncate(limit);
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::NewChunk;
    use crate::store::memory::InMemoryStore;

    struct AxisEmbedder;

    #[async_trait]
    impl Embedder for AxisEmbedder {
        fn model_name(&self) -> &str {
            "axis"
        }

        // "install" points along x, everything else along y.
        async fn embed(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
            Ok(texts
                .iter()
                .map(|t| {
                    if t.to_lowercase().contains("install") {
                        vec![1.0, 0.0]
                    } else {
                        vec![0.0, 1.0]
                    }
                })
                .collect())
        }
    }

    fn chunk(title: &str, text: &str, embedding: Option<Vec<f32>>) -> NewChunk {
        NewChunk {
            title: title.into(),
            text: text.into(),
            embedding,
        }
    }

    #[test]
    fn test_query_terms_drop_stop_words() {
        assert_eq!(query_terms("How do I install it?"), vec!["install"]);
        assert_eq!(
            query_terms("Reset PASSWORD, reset password!"),
            vec!["reset", "password"]
        );
        assert!(query_terms("?? !!").is_empty());
    }

    #[tokio::test]
    async fn test_lexical_ranker_scoped_to_app() {
        let store = InMemoryStore::new();
        store
            .replace_chunks("app_a", "a.md", &[chunk("a.md • Install", "install steps", None)])
            .await
            .unwrap();
        store
            .replace_chunks("app_b", "b.md", &[chunk("b.md • Install", "install steps", None)])
            .await
            .unwrap();

        let hits = LexicalRanker
            .rank(&store, "app_a", "install", 5)
            .await
            .unwrap();
        assert_eq!(hits.len(), 1);
        assert_eq!(hits[0].source_file, "a.md");
    }

    #[tokio::test]
    async fn test_lexical_ranker_stop_word_query_is_empty() {
        let store = InMemoryStore::new();
        store
            .replace_chunks("app_a", "a.md", &[chunk("t", "it is what it is", None)])
            .await
            .unwrap();
        let hits = LexicalRanker.rank(&store, "app_a", "is it", 5).await.unwrap();
        assert!(hits.is_empty());
    }

    #[tokio::test]
    async fn test_vector_ranker_applies_cutoff() {
        let store = InMemoryStore::new();
        store
            .replace_chunks(
                "app_a",
                "a.md",
                &[
                    chunk("install", "install guide", Some(vec![1.0, 0.0])),
                    chunk("billing", "billing guide", Some(vec![0.0, 1.0])),
                    chunk("unembedded", "install too", None),
                ],
            )
            .await
            .unwrap();

        let ranker = VectorRanker::new(Arc::new(AxisEmbedder), 0.7);
        let hits = ranker
            .rank(&store, "app_a", "how to install", 5)
            .await
            .unwrap();
        assert_eq!(hits.len(), 1);
        assert_eq!(hits[0].title, "install");
        assert!(hits[0].score >= 0.7);
    }

    #[test]
    fn test_sort_and_truncate() {
        let mk = |id: &str, score: f64| ScoredChunk {
            id: id.into(),
            title: String::new(),
            text: String::new(),
            source_file: String::new(),
            score,
        };
        let mut v = vec![mk("b", 1.0), mk("a", 1.0), mk("c", 3.0)];
        sort_and_truncate(&mut v, 2);
        let ids: Vec<&str> = v.iter().map(|c| c.id.as_str()).collect();
        assert_eq!(ids, vec!["c", "a"]);
    }
}
