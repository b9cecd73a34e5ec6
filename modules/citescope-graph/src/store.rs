//! The graph-store contract the frontier controller drives. `Neo4jStore` is
//! the production implementation; an in-memory store behind the `test-utils`
//! feature lets build passes run in tests without a database.

use async_trait::async_trait;
use chrono::{DateTime, NaiveDate, Utc};
use uuid::Uuid;

use citescope_common::{ArticleIds, ArticleRecord, Identifier, Result, SourceTag};

/// Result of resolving one identifier to a canonical entity.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Resolved {
    pub id: Uuid,
    pub created: bool,
}

/// What applying a record changed on an entity.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MergeOutcome {
    /// The entity was a stub and now carries confirmed metadata.
    FilledStub,
    /// At least one field changed on an already-hydrated entity.
    Updated,
    /// Nothing the record carried outranked existing state.
    Unchanged,
}

/// Which source last supplied each merged field; drives per-field precedence.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct FieldSources {
    pub title: Option<SourceTag>,
    pub pub_date: Option<SourceTag>,
    pub pdf_url: Option<SourceTag>,
    pub license: Option<SourceTag>,
    pub cited_by_count: Option<SourceTag>,
}

/// Full state of one Article node, as read from the graph.
#[derive(Debug, Clone, PartialEq)]
pub struct ArticleSnapshot {
    pub id: Uuid,
    pub ids: ArticleIds,
    pub title: Option<String>,
    pub pub_date: Option<NaiveDate>,
    pub pdf_url: Option<String>,
    pub license: Option<String>,
    pub cited_by_count: Option<i64>,
    /// Sources that have supplied any data for this entity.
    pub provenance: Vec<SourceTag>,
    pub field_sources: FieldSources,
    /// No confirmed metadata yet (identifier-only entity).
    pub stub: bool,
    /// Member of the broad-search seed set.
    pub seed: bool,
    pub created_at: DateTime<Utc>,
}

impl ArticleSnapshot {
    pub fn new_stub(id: Uuid, identifier: &Identifier, created_at: DateTime<Utc>) -> Self {
        let mut ids = ArticleIds::default();
        match identifier.kind {
            citescope_common::IdKind::Doi => ids.doi = Some(identifier.value.clone()),
            citescope_common::IdKind::Pmid => ids.pmid = Some(identifier.value.clone()),
            citescope_common::IdKind::Pmcid => ids.pmcid = Some(identifier.value.clone()),
        }
        Self {
            id,
            ids,
            title: None,
            pub_date: None,
            pdf_url: None,
            license: None,
            cited_by_count: None,
            provenance: Vec::new(),
            field_sources: FieldSources::default(),
            stub: true,
            seed: false,
            created_at,
        }
    }
}

/// Frontier predicates, computed fresh from graph state at stage entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Frontier {
    /// DOIs of articles with no outgoing CITES edge.
    DoisUnreferenced,
    /// PMIDs of articles with no outgoing CITES edge.
    PmidsUnreferenced,
    /// DOIs of articles in the broad-search seed set.
    SeedDois,
    /// DOIs of articles lacking a PMID.
    DoisMissingPmid,
    /// PMIDs of articles lacking a DOI.
    PmidsMissingDoi,
    /// DOIs of articles whose cited-by count is unknown.
    DoisUnknownCitedBy,
    /// DOIs of stub articles (no confirmed metadata).
    DoiStubs,
    /// PMIDs of stub articles.
    PmidStubs,
}

/// One affiliation node, fetched for clustering.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AffiliationRow {
    pub id: Uuid,
    pub name: String,
}

/// An unordered similarity pair; stores must create at most one edge per pair.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SimilarityPair {
    pub a: Uuid,
    pub b: Uuid,
    pub similarity: f64,
}

#[async_trait]
pub trait GraphStore: Send + Sync {
    /// Advisory lock preventing concurrent builds against one graph.
    /// Returns false when another pass holds it.
    async fn acquire_build_lock(&self) -> Result<bool>;
    async fn release_build_lock(&self) -> Result<()>;

    /// Look up an entity by identifier, creating a stub when unseen.
    async fn resolve(&self, identifier: &Identifier) -> Result<Resolved>;

    /// Attach newly discovered identifiers; coalesces entities when an
    /// identifier already belongs to another one. Returns the id of the
    /// canonical surviving entity.
    async fn attach_identifiers(&self, entity: Uuid, ids: &ArticleIds) -> Result<Uuid>;

    async fn snapshot(&self, entity: Uuid) -> Result<Option<ArticleSnapshot>>;

    /// Merge a record into an entity under field-level source precedence.
    async fn apply_record(
        &self,
        entity: Uuid,
        record: &ArticleRecord,
        source: SourceTag,
    ) -> Result<MergeOutcome>;

    async fn mark_seed(&self, entity: Uuid) -> Result<()>;

    /// Idempotently create a CITES edge. Returns true when the edge is new.
    async fn create_citation(&self, from: Uuid, to: Uuid) -> Result<bool>;

    /// Attach raw affiliation strings to an article, one node per
    /// (article, string), idempotently.
    async fn add_affiliations(&self, entity: Uuid, names: &[String]) -> Result<()>;

    async fn frontier(&self, frontier: Frontier) -> Result<Vec<String>>;

    async fn affiliation_rows(&self) -> Result<Vec<AffiliationRow>>;

    /// Create SIMILAR_TO edges, once per unordered pair. Returns edges created.
    async fn create_similarity_edges(&self, pairs: &[SimilarityPair]) -> Result<u64>;

    /// Execute an externally configured named query; returns rows produced.
    async fn execute_named_query(&self, name: &str, cypher: &str) -> Result<u64>;

    async fn article_count(&self) -> Result<u64>;
    async fn citation_count(&self) -> Result<u64>;
}
