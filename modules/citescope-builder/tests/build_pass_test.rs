//! Full build-pass tests: mocked sources over the in-memory store, covering
//! the staged expansion scenario, convergence on re-run, and per-unit failure
//! isolation.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use bytes::Bytes;

use citescope_builder::{CitationGraphBuilder, StageId};
use citescope_common::sources::{
    CitationSource, IdConverter, OpenAccessSource, ReferenceExtractor, SearchSource,
};
use citescope_common::{
    ArticleIds, ArticleRecord, BuildProfile, DateWindow, Error, IdKind, Identifier, LinkKind,
    OaRecord, RefLink, Result, SearchResult, SourceTag, Work,
};
use citescope_graph::memory::MemoryStore;
use citescope_graph::GraphStore;

// --- Mock adapters ---

#[derive(Default)]
struct MockSearch {
    ids: Vec<String>,
    records: HashMap<String, ArticleRecord>,
    links: Vec<RefLink>,
}

#[async_trait]
impl SearchSource for MockSearch {
    async fn search(&self, _query: &str, _window: DateWindow) -> Result<SearchResult> {
        Ok(SearchResult {
            count: self.ids.len() as u64,
            ids: self.ids.clone(),
        })
    }

    async fn fetch_by_ids(&self, pmids: &[String]) -> Result<Vec<ArticleRecord>> {
        Ok(pmids
            .iter()
            .filter_map(|pmid| self.records.get(pmid).cloned())
            .collect())
    }

    async fn fetch_links(&self, pmids: &[String], _kind: LinkKind) -> Result<Vec<RefLink>> {
        Ok(self
            .links
            .iter()
            .filter(|l| pmids.contains(&l.from))
            .cloned()
            .collect())
    }
}

#[derive(Default)]
struct MockCitations {
    works: HashMap<String, Work>,
}

#[async_trait]
impl CitationSource for MockCitations {
    async fn get_by_doi(&self, doi: &str) -> Result<Option<Work>> {
        Ok(self.works.get(doi).cloned())
    }

    async fn find_by_citation_string(&self, _text: &str) -> Result<Option<Work>> {
        Ok(None)
    }
}

struct FailingCitations;

#[async_trait]
impl CitationSource for FailingCitations {
    async fn get_by_doi(&self, _doi: &str) -> Result<Option<Work>> {
        Err(Error::source_unavailable(SourceTag::Crossref, "down"))
    }

    async fn find_by_citation_string(&self, _text: &str) -> Result<Option<Work>> {
        Err(Error::source_unavailable(SourceTag::Crossref, "down"))
    }
}

#[derive(Default)]
struct MockOpenAccess;

#[async_trait]
impl OpenAccessSource for MockOpenAccess {
    async fn get_by_doi(&self, _doi: &str) -> Result<Option<OaRecord>> {
        Ok(None)
    }

    async fn fetch_pdf(&self, _doi: &str) -> Result<Option<Bytes>> {
        Ok(None)
    }
}

#[derive(Default)]
struct MockIdConverter;

#[async_trait]
impl IdConverter for MockIdConverter {
    async fn map_ids(
        &self,
        _ids: &[String],
        _from: IdKind,
    ) -> Result<HashMap<String, ArticleIds>> {
        Ok(HashMap::new())
    }
}

#[derive(Default)]
struct MockExtractor;

impl ReferenceExtractor for MockExtractor {
    fn extract_references(&self, _doc: &[u8]) -> Result<Vec<String>> {
        Ok(Vec::new())
    }
}

// --- Fixtures ---

fn profile() -> BuildProfile {
    BuildProfile::from_yaml(
        r#"
search: "machine learning AND sepsis"
broader_search: "sepsis"
earliest: 2019-01-01
latest: 2020-06-01
queries:
  - name: citation-counts
    cypher: "MATCH (a:Article)<-[c:CITES]-(b:Article) RETURN a, count(c)"
"#,
    )
    .unwrap()
}

fn pubmed_record(pmid: &str, doi: &str, title: &str) -> ArticleRecord {
    ArticleRecord {
        ids: ArticleIds::default().with_pmid(pmid).with_doi(doi),
        title: Some(title.to_string()),
        ..Default::default()
    }
}

fn crossref_work(doi: &str, cited_by: i64, reference_dois: &[&str]) -> Work {
    Work {
        record: ArticleRecord {
            ids: ArticleIds::default().with_doi(doi),
            cited_by_count: Some(cited_by),
            ..Default::default()
        },
        references: reference_dois
            .iter()
            .map(|d| ArticleRecord {
                ids: ArticleIds::default().with_doi(*d),
                ..Default::default()
            })
            .collect(),
    }
}

fn scenario_builder() -> CitationGraphBuilder<MemoryStore> {
    let search = MockSearch {
        ids: vec!["100".to_string(), "200".to_string()],
        records: HashMap::from([
            ("100".to_string(), pubmed_record("100", "10.1/a", "Article A")),
            ("200".to_string(), pubmed_record("200", "10.1/b", "Article B")),
        ]),
        links: Vec::new(),
    };
    let citations = MockCitations {
        works: HashMap::from([
            ("10.1/a".to_string(), crossref_work("10.1/a", 3, &["10.1/c"])),
            ("10.1/b".to_string(), crossref_work("10.1/b", 0, &[])),
        ]),
    };

    CitationGraphBuilder::new(
        MemoryStore::new(),
        Arc::new(search),
        Arc::new(citations),
        Arc::new(MockOpenAccess),
        Arc::new(MockIdConverter),
        Arc::new(MockExtractor),
        profile(),
    )
}

// --- Tests ---

#[tokio::test]
async fn staged_expansion_scenario() {
    let builder = scenario_builder();
    let report = builder.build().await.unwrap();
    let store = builder.store();

    // Seed PMIDs {100, 200} hydrate to DOIs a and b; the citation index
    // reveals one reference a -> c. Three entities, exactly one edge.
    assert_eq!(store.article_count().await.unwrap(), 3);
    assert_eq!(store.citation_count().await.unwrap(), 1);

    let a = store
        .snapshot_by_identifier(&Identifier::doi("10.1/a"))
        .unwrap();
    let c = store
        .snapshot_by_identifier(&Identifier::doi("10.1/c"))
        .unwrap();
    assert_eq!(store.citation_pairs(), vec![(a.id, c.id)]);

    // c was created as a stub and no later stage hydrated it.
    assert!(c.stub);
    assert!(c.title.is_none());

    // a was hydrated by the primary index and backfilled by the citation index.
    assert_eq!(a.title.as_deref(), Some("Article A"));
    assert_eq!(a.cited_by_count, Some(3));
    assert!(a.seed);
    assert!(!c.seed);

    // The configured derived query ran as the terminal stage.
    assert_eq!(store.named_queries_run(), vec!["citation-counts".to_string()]);

    // Seed stage found and created both seed entities.
    let seed = report
        .stages
        .iter()
        .find(|s| s.id == StageId::Seed)
        .unwrap()
        .counters;
    assert_eq!(seed.found, 2);
    assert_eq!(seed.new, 2);

    assert_eq!(report.articles, 3);
    assert_eq!(report.citations, 1);
}

#[tokio::test]
async fn rerunning_build_adds_no_edges_or_entities() {
    let builder = scenario_builder();
    builder.build().await.unwrap();

    let articles_before = builder.store().article_count().await.unwrap();
    let citations_before = builder.store().citation_count().await.unwrap();
    let similar_before = builder.store().similarity_edge_count();

    let report = builder.build().await.unwrap();

    assert_eq!(builder.store().article_count().await.unwrap(), articles_before);
    assert_eq!(
        builder.store().citation_count().await.unwrap(),
        citations_before
    );
    assert_eq!(builder.store().similarity_edge_count(), similar_before);

    // The second pass created nothing new in the expansion stage either.
    let expand = report
        .stages
        .iter()
        .find(|s| s.id == StageId::ExpandCitations)
        .unwrap()
        .counters;
    assert_eq!(expand.new, 0);
}

#[tokio::test]
async fn held_lock_rejects_a_concurrent_build() {
    let builder = scenario_builder();
    assert!(builder.store().acquire_build_lock().await.unwrap());

    let err = builder.build().await.unwrap_err();
    assert!(matches!(err, Error::BuildLockHeld));
}

#[tokio::test]
async fn lock_is_released_after_a_pass() {
    let builder = scenario_builder();
    builder.build().await.unwrap();
    // A fresh acquisition succeeds, so the pass released its lock.
    assert!(builder.store().acquire_build_lock().await.unwrap());
}

#[tokio::test]
async fn malformed_records_are_skipped_and_counted() {
    let mut records = HashMap::from([(
        "100".to_string(),
        pubmed_record("100", "10.1/a", "Article A"),
    )]);
    // A record with no identifier at all cannot be resolved.
    records.insert("200".to_string(), ArticleRecord::default());

    let search = MockSearch {
        ids: vec!["100".to_string(), "200".to_string()],
        records,
        links: Vec::new(),
    };

    let builder = CitationGraphBuilder::new(
        MemoryStore::new(),
        Arc::new(search),
        Arc::new(MockCitations::default()),
        Arc::new(MockOpenAccess),
        Arc::new(MockIdConverter),
        Arc::new(MockExtractor),
        profile(),
    );
    let report = builder.build().await.unwrap();

    let hydrate = report
        .stages
        .iter()
        .find(|s| s.id == StageId::Hydrate)
        .unwrap()
        .counters;
    assert_eq!(hydrate.skipped, 1);

    // The well-formed record still landed.
    assert!(builder
        .store()
        .snapshot_by_identifier(&Identifier::doi("10.1/a"))
        .is_some());
}

#[tokio::test]
async fn an_unavailable_source_skips_its_units_but_not_the_pass() {
    let search = MockSearch {
        ids: vec!["100".to_string()],
        records: HashMap::from([(
            "100".to_string(),
            pubmed_record("100", "10.1/a", "Article A"),
        )]),
        links: Vec::new(),
    };

    let builder = CitationGraphBuilder::new(
        MemoryStore::new(),
        Arc::new(search),
        Arc::new(FailingCitations),
        Arc::new(MockOpenAccess),
        Arc::new(MockIdConverter),
        Arc::new(MockExtractor),
        profile(),
    );
    let report = builder.build().await.unwrap();

    // The citation-index stages skipped their frontier instead of aborting.
    let expand = report
        .stages
        .iter()
        .find(|s| s.id == StageId::ExpandCitations)
        .unwrap()
        .counters;
    assert_eq!(expand.found, 1);
    assert_eq!(expand.skipped, 1);

    // Later stages still ran.
    assert_eq!(
        builder.store().named_queries_run(),
        vec!["citation-counts".to_string()]
    );
}

#[tokio::test]
async fn near_duplicate_affiliations_get_similarity_edges() {
    let mut rec_a = pubmed_record("100", "10.1/a", "Article A");
    rec_a.affiliations = vec!["Department of Critical Care, University of Oxford, UK".to_string()];
    let mut rec_b = pubmed_record("200", "10.1/b", "Article B");
    rec_b.affiliations = vec!["Dept of Critical Care, Oxford University, United Kingdom".to_string()];

    let search = MockSearch {
        ids: vec!["100".to_string(), "200".to_string()],
        records: HashMap::from([("100".to_string(), rec_a), ("200".to_string(), rec_b)]),
        links: Vec::new(),
    };

    let builder = CitationGraphBuilder::new(
        MemoryStore::new(),
        Arc::new(search),
        Arc::new(MockCitations::default()),
        Arc::new(MockOpenAccess),
        Arc::new(MockIdConverter),
        Arc::new(MockExtractor),
        profile(),
    );
    let report = builder.build().await.unwrap();

    assert_eq!(builder.store().similarity_edge_count(), 1);
    let clustering = report
        .stages
        .iter()
        .find(|s| s.id == StageId::AffiliationClustering)
        .unwrap()
        .counters;
    assert_eq!(clustering.found, 2);
    assert_eq!(clustering.new, 1);
}

#[tokio::test]
async fn a_single_unique_affiliation_creates_no_edges() {
    let mut rec_a = pubmed_record("100", "10.1/a", "Article A");
    rec_a.affiliations = vec!["Institute for Quantum Computing, Waterloo".to_string()];

    let search = MockSearch {
        ids: vec!["100".to_string()],
        records: HashMap::from([("100".to_string(), rec_a)]),
        links: Vec::new(),
    };

    let builder = CitationGraphBuilder::new(
        MemoryStore::new(),
        Arc::new(search),
        Arc::new(MockCitations::default()),
        Arc::new(MockOpenAccess),
        Arc::new(MockIdConverter),
        Arc::new(MockExtractor),
        profile(),
    );
    builder.build().await.unwrap();

    assert_eq!(builder.store().similarity_edge_count(), 0);
}

#[tokio::test]
async fn back_link_stage_creates_stub_neighbors_from_the_link_graph() {
    // One seed article with a PMID but no DOI: the citation index cannot
    // expand it, so the link graph supplies its references.
    let record = ArticleRecord {
        ids: ArticleIds::default().with_pmid("100"),
        title: Some("Linked article".to_string()),
        ..Default::default()
    };
    let search = MockSearch {
        ids: vec!["100".to_string()],
        records: HashMap::from([("100".to_string(), record)]),
        links: vec![
            RefLink {
                from: "100".to_string(),
                to: "300".to_string(),
            },
            RefLink {
                from: "100".to_string(),
                to: "400".to_string(),
            },
        ],
    };

    let builder = CitationGraphBuilder::new(
        MemoryStore::new(),
        Arc::new(search),
        Arc::new(MockCitations::default()),
        Arc::new(MockOpenAccess),
        Arc::new(MockIdConverter),
        Arc::new(MockExtractor),
        profile(),
    );
    let report = builder.build().await.unwrap();
    let store = builder.store();

    assert_eq!(store.article_count().await.unwrap(), 3);
    assert_eq!(store.citation_count().await.unwrap(), 2);

    let back_link = report
        .stages
        .iter()
        .find(|s| s.id == StageId::BackLink)
        .unwrap()
        .counters;
    assert_eq!(back_link.new, 2);
    assert_eq!(back_link.updated, 2);

    // Neighbors exist as stubs awaiting a later hydration pass.
    let neighbor = store
        .snapshot_by_identifier(&Identifier::pmid("300"))
        .unwrap();
    assert!(neighbor.stub);
}
