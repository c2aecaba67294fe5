use std::collections::HashMap;
use std::sync::{Arc, OnceLock};

use async_trait::async_trait;
use futures::future::try_join_all;
use log::{debug, warn};
use regex::{NoExpand, Regex};

use super::chains::StepContextSource;
use crate::domain::document::{DocumentType, RetrievedContext, ScoredDocument};
use crate::domain::embedding::EmbeddingProvider;
use crate::domain::vector_repository::{collection_for, VectorRepository};
use crate::error::RagError;

/// Rendered in place of a context when retrieval found nothing.
pub const NO_CONTEXT: &str = "No relevant context found.";

/// Domain terms and the phrasings they are expanded into.
const EXPANSIONS: [(&str, &[&str]); 6] = [
    ("employee", &["staff", "worker", "personnel", "team member"]),
    ("advance", &["advance request", "salary advance", "pre-payment", "early payment"]),
    ("bill", &["expense", "charge", "cost", "invoice"]),
    ("summary", &["overview", "report", "analysis", "summary"]),
    ("financial", &["money", "financial", "budget", "expenses", "revenue"]),
    ("report", &["summary", "analysis", "overview", "report"]),
];

fn expansion_patterns() -> &'static [(Regex, &'static [&'static str])] {
    static PATTERNS: OnceLock<Vec<(Regex, &'static [&'static str])>> = OnceLock::new();
    PATTERNS.get_or_init(|| {
        EXPANSIONS
            .iter()
            .filter_map(|(term, synonyms)| {
                Regex::new(&format!(r"(?i)\b{}\b", regex::escape(term)))
                    .ok()
                    .map(|re| (re, *synonyms))
            })
            .collect()
    })
}

/// Query variants: the query itself first, then one variant per synonym of
/// each known term it contains, without duplicates, at most `max_variants`.
pub fn expand_query(query: &str, max_variants: usize) -> Vec<String> {
    let max_variants = max_variants.max(1);
    let mut variants = vec![query.to_string()];
    for (pattern, synonyms) in expansion_patterns() {
        if !pattern.is_match(query) {
            continue;
        }
        for synonym in synonyms.iter() {
            let variant = pattern.replace_all(query, NoExpand(synonym)).into_owned();
            if !variants.contains(&variant) {
                variants.push(variant);
            }
        }
    }
    variants.truncate(max_variants);
    variants
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RetrievalSettings {
    pub top_k: usize,
    pub similarity_threshold: f32,
    pub enable_query_expansion: bool,
    pub max_query_variants: usize,
}

impl Default for RetrievalSettings {
    fn default() -> Self {
        Self {
            top_k: 5,
            similarity_threshold: 0.7,
            enable_query_expansion: true,
            max_query_variants: 3,
        }
    }
}

/// Expands, searches and merges against the active provider's collection.
pub struct RetrievalEngine {
    embedder: Arc<dyn EmbeddingProvider>,
    repository: Arc<dyn VectorRepository>,
    base_collection: String,
    settings: RetrievalSettings,
}

impl RetrievalEngine {
    pub fn new(
        embedder: Arc<dyn EmbeddingProvider>,
        repository: Arc<dyn VectorRepository>,
        base_collection: impl Into<String>,
        settings: RetrievalSettings,
    ) -> Self {
        Self {
            embedder,
            repository,
            base_collection: base_collection.into(),
            settings,
        }
    }

    pub fn settings(&self) -> &RetrievalSettings {
        &self.settings
    }

    pub fn collection(&self) -> String {
        collection_for(&self.base_collection, self.embedder.provider_id())
    }

    /// Top `k` documents for `query`, optionally restricted to one document type.
    /// The type filter is applied by the store, before each variant's top-k cut.
    /// An empty or missing collection yields an empty context.
    pub async fn retrieve(&self, query: &str, k: usize, type_filter: Option<DocumentType>) -> Result<RetrievedContext, RagError> {
        if k == 0 {
            return Ok(RetrievedContext::empty());
        }
        let variants = if self.settings.enable_query_expansion {
            expand_query(query, self.settings.max_query_variants)
        } else {
            vec![query.to_string()]
        };
        let vectors = self.embedder.embed(&variants).await?;
        let collection = self.collection();

        let searches = vectors.iter().map(|vector| {
            self.repository
                .search(&collection, vector, k, self.settings.similarity_threshold, type_filter)
        });
        let results = try_join_all(searches).await?;

        let mut merged: HashMap<String, ScoredDocument> = HashMap::new();
        for found in results {
            for hit in found.entries {
                match merged.get_mut(&hit.document.id) {
                    Some(existing) if existing.score >= hit.score => {}
                    Some(existing) => existing.score = hit.score,
                    None => {
                        merged.insert(hit.document.id.clone(), hit);
                    }
                }
            }
        }

        let mut entries: Vec<ScoredDocument> = merged.into_values().collect();
        entries.sort_by(|a, b| {
            b.score
                .total_cmp(&a.score)
                .then_with(|| b.document.timestamp().cmp(&a.document.timestamp()))
                .then_with(|| b.sequence.cmp(&a.sequence))
        });
        entries.truncate(k);
        debug!(
            "Retrieved {} documents from '{}' using {} query variants",
            entries.len(),
            collection,
            variants.len()
        );
        Ok(RetrievedContext::new(entries))
    }
}

#[async_trait]
impl StepContextSource for RetrievalEngine {
    async fn context_for(&self, query: &str) -> String {
        match self.retrieve(query, self.settings.top_k, None).await {
            Ok(ctx) => format_context(&ctx, None),
            Err(e) => {
                warn!("Step retrieval failed, continuing without context: {}", e);
                NO_CONTEXT.to_string()
            }
        }
    }
}

/// Renders a context for prompt injection.
///
/// Entries are never cut: once the next entry would exceed `max_length`
/// characters, rendering stops. An empty context, or one whose first entry
/// does not fit, renders as [`NO_CONTEXT`].
pub fn format_context(context: &RetrievedContext, max_length: Option<usize>) -> String {
    const SEPARATOR: &str = "\n\n";
    let mut out = String::new();
    let mut used = 0usize;

    for (i, entry) in context.iter().enumerate() {
        let doc = &entry.document;
        let mut lines = vec![format!("[Context {}]", i + 1), format!("Type: {}", doc.type_tag()), format!("ID: {}", doc.id)];
        if let Some(name) = doc.meta_str("employee_name") {
            lines.push(format!("Employee: {}", name));
        }
        if let Some(month) = doc.meta_str("month") {
            lines.push(format!("Period: {}", month));
        }
        lines.push(format!("Content: {}", doc.content));
        let rendered = lines.join("\n");

        let cost = rendered.chars().count() + if out.is_empty() { 0 } else { SEPARATOR.len() };
        if max_length.map_or(false, |max| used + cost > max) {
            break;
        }
        if !out.is_empty() {
            out.push_str(SEPARATOR);
        }
        out.push_str(&rendered);
        used += cost;
    }

    if out.is_empty() {
        NO_CONTEXT.to_string()
    } else {
        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::document::Document;
    use crate::infrastructure::embedding::HashingEmbeddingProvider;
    use crate::infrastructure::memory_store::MemoryVectorStore;

    #[test]
    fn test_expand_query_keeps_original_first_and_caps_variants() {
        let variants = expand_query("Summarize employee advances", 3);
        assert_eq!(variants[0], "Summarize employee advances");
        assert_eq!(variants.len(), 3);
        assert_eq!(variants[1], "Summarize staff advances");
        assert_eq!(variants[2], "Summarize worker advances");
    }

    #[test]
    fn test_expand_query_matches_whole_words_case_insensitively() {
        assert_eq!(expand_query("Billing cycle", 5), vec!["Billing cycle".to_string()]);
        let variants = expand_query("Latest BILL for Ada", 5);
        assert_eq!(variants[1], "Latest expense for Ada");
    }

    #[test]
    fn test_expand_query_skips_identity_variants() {
        let variants = expand_query("financial", 10);
        assert_eq!(variants, vec!["financial", "money", "budget", "expenses", "revenue"]);
    }

    #[test]
    fn test_expand_query_never_rescans_injected_text() {
        let variants = expand_query("report $1", 10);
        assert!(variants.contains(&"summary $1".to_string()));
    }

    fn scored(doc: Document, score: f32) -> ScoredDocument {
        ScoredDocument {
            document: doc,
            score,
            sequence: 0,
        }
    }

    #[test]
    fn test_format_context_layout() {
        let doc = Document::new(DocumentType::EmployeeSummary, "Employee Profile: Ada Lovelace")
            .with_meta("employee_name", "Ada Lovelace");
        let ctx = RetrievedContext::new(vec![scored(doc.clone(), 0.9)]);
        let text = format_context(&ctx, None);
        assert_eq!(
            text,
            format!(
                "[Context 1]\nType: employee_summary\nID: {}\nEmployee: Ada Lovelace\nContent: Employee Profile: Ada Lovelace",
                doc.id
            )
        );
    }

    #[test]
    fn test_format_context_never_cuts_an_entry() {
        let a = Document::new(DocumentType::DomainKnowledge, "a".repeat(40));
        let b = Document::new(DocumentType::DomainKnowledge, "b".repeat(40));
        let ctx = RetrievedContext::new(vec![scored(a, 0.9), scored(b, 0.8)]);
        let full = format_context(&ctx, None);
        let first_len = full.split("\n\n").next().unwrap().chars().count();

        let limited = format_context(&ctx, Some(first_len + 5));
        assert_eq!(limited.chars().count(), first_len);
        assert!(!limited.contains("bbbb"));

        assert_eq!(format_context(&ctx, Some(10)), NO_CONTEXT);
        assert_eq!(format_context(&RetrievedContext::empty(), None), NO_CONTEXT);
    }

    async fn engine_with(docs: &[Document], threshold: f32) -> RetrievalEngine {
        engine_with_settings(
            docs,
            RetrievalSettings {
                similarity_threshold: threshold,
                ..RetrievalSettings::default()
            },
        )
        .await
    }

    async fn engine_with_settings(docs: &[Document], settings: RetrievalSettings) -> RetrievalEngine {
        let embedder = Arc::new(HashingEmbeddingProvider::new(256));
        let repo = Arc::new(MemoryVectorStore::new());
        let texts: Vec<String> = docs.iter().map(|d| d.content.clone()).collect();
        if !docs.is_empty() {
            let vectors = embedder.embed(&texts).await.unwrap();
            repo.upsert("kb_hashing", docs, &vectors).await.unwrap();
        }
        RetrievalEngine::new(embedder, repo, "kb", settings)
    }

    #[tokio::test]
    async fn test_retrieve_on_empty_collection_is_empty() {
        let engine = engine_with(&[], 0.0).await;
        let ctx = engine.retrieve("employee advances", 5, None).await.unwrap();
        assert!(ctx.is_empty());
    }

    #[tokio::test]
    async fn test_retrieve_exact_text_ranks_first() {
        let docs = vec![
            Document::new(DocumentType::DomainKnowledge, "Bill management guidelines for managers"),
            Document::new(DocumentType::DomainKnowledge, "Advance request approval rules"),
        ];
        let engine = engine_with(&docs, 0.7).await;
        let ctx = engine.retrieve("Advance request approval rules", 5, None).await.unwrap();
        assert_eq!(ctx.entries[0].document.id, docs[1].id);
        assert!(ctx.entries[0].score >= 0.7);
    }

    #[tokio::test]
    async fn test_type_filter_applies_before_truncation() {
        let mut docs: Vec<Document> = (0..10)
            .map(|_| Document::new(DocumentType::DomainKnowledge, "advance request guidance"))
            .collect();
        let pattern = Document::new(DocumentType::AdvancePattern, "Pending advance request pattern");
        docs.push(pattern.clone());
        let engine = engine_with(&docs, 0.0).await;

        let unfiltered = engine.retrieve("advance request guidance", 1, None).await.unwrap();
        assert_eq!(unfiltered.entries[0].document.doc_type(), Some(DocumentType::DomainKnowledge));

        let ctx = engine
            .retrieve("advance request guidance", 1, Some(DocumentType::AdvancePattern))
            .await
            .unwrap();
        assert_eq!(ctx.ids(), vec![pattern.id.as_str()]);
    }

    #[tokio::test]
    async fn test_equal_scores_and_timestamps_rank_latest_insert_first() {
        let at = chrono::Utc::now();
        let docs: Vec<Document> = (0..4)
            .map(|_| Document::created_at(DocumentType::DomainKnowledge, "Payroll closing note", at))
            .collect();
        let engine = engine_with(&docs, 0.0).await;

        let expected: Vec<&str> = docs.iter().rev().map(|d| d.id.as_str()).collect();
        for _ in 0..5 {
            let ctx = engine.retrieve("Payroll closing note", 4, None).await.unwrap();
            assert_eq!(ctx.ids(), expected);
        }
    }

    #[tokio::test]
    async fn test_merge_keeps_each_document_once() {
        let docs = vec![
            Document::new(DocumentType::EmployeeSummary, "employee Ada staff record"),
            Document::new(DocumentType::EmployeeSummary, "employee Alan staff record"),
        ];
        let engine = engine_with(&docs, 0.0).await;
        let ctx = engine.retrieve("employee record", 10, None).await.unwrap();
        let mut ids = ctx.ids();
        ids.sort();
        ids.dedup();
        assert_eq!(ids.len(), ctx.len());
        assert_eq!(ctx.len(), 2);
    }
    mod expansion_recall {
        use super::*;
        use proptest::prelude::*;

        fn corpus() -> (Vec<Document>, Vec<String>) {
            let relevant = [
                "staff salary advance still pending",
                "worker pre-payment approved in March",
                "personnel invoice for travel",
                "team member expense claim",
                "early payment requested by staff",
                "salary advance repaid by worker",
            ];
            let unrelated = ["office plant watering schedule", "quarterly weather outlook"];
            let docs: Vec<Document> = relevant
                .iter()
                .chain(unrelated.iter())
                .map(|text| Document::new(DocumentType::DomainKnowledge, *text))
                .collect();
            let relevant_ids = docs[..relevant.len()].iter().map(|d| d.id.clone()).collect();
            (docs, relevant_ids)
        }

        async fn relevant_hits(docs: &[Document], relevant: &[String], query: &str, threshold: f32, expand: bool) -> usize {
            let engine = engine_with_settings(
                docs,
                RetrievalSettings {
                    similarity_threshold: threshold,
                    enable_query_expansion: expand,
                    max_query_variants: 6,
                    ..RetrievalSettings::default()
                },
            )
            .await;
            let ctx = engine.retrieve(query, docs.len(), None).await.unwrap();
            ctx.iter().filter(|hit| relevant.contains(&hit.document.id)).count()
        }

        proptest! {
            #[test]
            fn expansion_never_loses_relevant_hits(
                query in prop::sample::select(vec![
                    "employee advance",
                    "advance for employee",
                    "latest bill",
                    "employee bill totals",
                    "pending advance",
                ]),
                threshold in 0.05f32..0.6,
            ) {
                let rt = tokio::runtime::Builder::new_current_thread().build().unwrap();
                rt.block_on(async {
                    let (docs, relevant) = corpus();
                    let off = relevant_hits(&docs, &relevant, query, threshold, false).await;
                    let on = relevant_hits(&docs, &relevant, query, threshold, true).await;
                    prop_assert!(on >= off, "expansion dropped hits for {:?}: {} < {}", query, on, off);
                    Ok(())
                })?;
            }
        }
    }
}
