//! Knowledge-base ingestion: chunk → embed (optional) → replace.
//!
//! Re-ingesting a file replaces every chunk previously stored under the same
//! app key and filename. Embedding is inline and non-fatal: if the provider
//! fails, chunks are stored without vectors and a warning is logged.

use anyhow::Result;
use serde::Serialize;

use supportai_core::chunk::chunk_markdown;
use supportai_core::embedding::Embedder;
use supportai_core::models::NewChunk;
use supportai_core::store::KnowledgeStore;

/// Filename used when the caller does not supply one.
pub const DEFAULT_FILENAME: &str = "kb.md";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct IngestOutcome {
    pub chunks_stored: usize,
    pub chunks_embedded: usize,
}

pub async fn ingest_markdown(
    store: &dyn KnowledgeStore,
    embedder: Option<&dyn Embedder>,
    max_chars: usize,
    app_key: &str,
    filename: &str,
    content: &str,
) -> Result<IngestOutcome> {
    let drafts = chunk_markdown(filename, content, max_chars);

    let mut vectors: Option<Vec<Vec<f32>>> = None;
    if let Some(embedder) = embedder.filter(|_| !drafts.is_empty()) {
        let texts: Vec<String> = drafts
            .iter()
            .map(|d| format!("{}\n{}", d.title, d.text))
            .collect();
        match embedder.embed(&texts).await {
            Ok(v) if v.len() == drafts.len() => vectors = Some(v),
            Ok(v) => tracing::warn!(
                expected = drafts.len(),
                got = v.len(),
                "embedding count mismatch; storing chunks without vectors"
            ),
            Err(e) => tracing::warn!(
                model = embedder.model_name(),
                "embedding failed; storing chunks without vectors: {:#}",
                e
            ),
        }
    }

    let chunks_embedded = vectors.as_ref().map_or(0, Vec::len);
    let mut vectors = vectors.map(Vec::into_iter);
    let chunks: Vec<NewChunk> = drafts
        .into_iter()
        .map(|d| NewChunk {
            title: d.title,
            text: d.text,
            embedding: vectors.as_mut().and_then(Iterator::next),
        })
        .collect();

    let chunks_stored = store.replace_chunks(app_key, filename, &chunks).await?;
    tracing::info!(app_key, filename, chunks_stored, chunks_embedded, "ingested markdown");

    Ok(IngestOutcome {
        chunks_stored,
        chunks_embedded,
    })
}
