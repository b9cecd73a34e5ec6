//! Store contract tests: the invariants every `GraphStore` implementation
//! must uphold, exercised against the in-memory store. Integration tests
//! against a live Neo4j would live in a separate file.

use citescope_common::{ArticleIds, ArticleRecord, Identifier, SourceTag};
use citescope_graph::memory::MemoryStore;
use citescope_graph::{GraphStore, MergeOutcome};

fn record_with_title(title: &str) -> ArticleRecord {
    ArticleRecord {
        title: Some(title.to_string()),
        ..Default::default()
    }
}

#[tokio::test]
async fn resolve_is_idempotent_per_identifier() {
    let store = MemoryStore::new();

    let first = store.resolve(&Identifier::pmid("100")).await.unwrap();
    let second = store.resolve(&Identifier::pmid("100")).await.unwrap();

    assert!(first.created);
    assert!(!second.created);
    assert_eq!(first.id, second.id);
    assert_eq!(store.article_count().await.unwrap(), 1);
}

#[tokio::test]
async fn doi_resolution_is_case_insensitive() {
    let store = MemoryStore::new();

    let upper = store.resolve(&Identifier::doi("10.1/AbC")).await.unwrap();
    let lower = store.resolve(&Identifier::doi("10.1/abc")).await.unwrap();

    assert_eq!(upper.id, lower.id);
    assert_eq!(store.article_count().await.unwrap(), 1);
}

#[tokio::test]
async fn citation_edges_are_idempotent_and_irreflexive() {
    let store = MemoryStore::new();
    let a = store.resolve(&Identifier::doi("10.1/a")).await.unwrap().id;
    let b = store.resolve(&Identifier::doi("10.1/b")).await.unwrap().id;

    assert!(store.create_citation(a, b).await.unwrap());
    assert!(!store.create_citation(a, b).await.unwrap());
    assert!(!store.create_citation(a, a).await.unwrap());
    assert_eq!(store.citation_count().await.unwrap(), 1);
}

#[tokio::test]
async fn coalescing_preserves_the_union_of_edges() {
    let store = MemoryStore::new();

    // X known by DOI, Y known by PMID; each with its own neighborhood.
    let x = store.resolve(&Identifier::doi("10.1/x")).await.unwrap().id;
    let y = store.resolve(&Identifier::pmid("999")).await.unwrap().id;
    let cited_by_x = store.resolve(&Identifier::doi("10.1/c1")).await.unwrap().id;
    let citing_y = store.resolve(&Identifier::pmid("777")).await.unwrap().id;

    store.create_citation(x, cited_by_x).await.unwrap();
    store.create_citation(citing_y, y).await.unwrap();
    assert_eq!(store.article_count().await.unwrap(), 4);

    // A later record reveals Y also carries X's DOI: the two must coalesce.
    let ids = ArticleIds::default().with_pmid("999").with_doi("10.1/x");
    let survivor = store.attach_identifiers(y, &ids).await.unwrap();

    assert_eq!(store.article_count().await.unwrap(), 3);

    let snap = store
        .snapshot_by_identifier(&Identifier::doi("10.1/x"))
        .unwrap();
    assert_eq!(snap.id, survivor);
    assert_eq!(snap.ids.pmid.as_deref(), Some("999"));

    // Union of both entities' edges, none lost, none duplicated.
    let pairs = store.citation_pairs();
    assert_eq!(pairs.len(), 2);
    assert!(pairs.contains(&(survivor, cited_by_x)));
    assert!(pairs.contains(&(citing_y, survivor)));

    // The duplicate's identifiers now resolve to the survivor.
    let via_pmid = store.resolve(&Identifier::pmid("999")).await.unwrap();
    assert!(!via_pmid.created);
    assert_eq!(via_pmid.id, survivor);
}

#[tokio::test]
async fn no_identifier_is_shared_between_entities_after_attach() {
    let store = MemoryStore::new();

    let a = store.resolve(&Identifier::doi("10.1/a")).await.unwrap().id;
    let b = store.resolve(&Identifier::pmid("100")).await.unwrap().id;

    // Attaching b's pmid to a coalesces rather than duplicating the value.
    let ids = ArticleIds::default().with_doi("10.1/a").with_pmid("100");
    let survivor = store.attach_identifiers(a, &ids).await.unwrap();

    assert_eq!(store.article_count().await.unwrap(), 1);
    let by_doi = store.resolve(&Identifier::doi("10.1/a")).await.unwrap().id;
    let by_pmid = store.resolve(&Identifier::pmid("100")).await.unwrap().id;
    assert_eq!(by_doi, survivor);
    assert_eq!(by_pmid, survivor);
    assert!(survivor == a || survivor == b);
}

#[tokio::test]
async fn coalesce_survivor_keeps_the_more_complete_entity() {
    let store = MemoryStore::new();

    let poor = store.resolve(&Identifier::pmid("100")).await.unwrap().id;
    let rich = store.resolve(&Identifier::doi("10.1/a")).await.unwrap().id;
    store
        .apply_record(rich, &record_with_title("Hydrated"), SourceTag::PubMed)
        .await
        .unwrap();

    let ids = ArticleIds::default().with_pmid("100").with_doi("10.1/a");
    let survivor = store.attach_identifiers(poor, &ids).await.unwrap();

    assert_eq!(survivor, rich);
    let snap = store.snapshot(survivor).await.unwrap().unwrap();
    assert_eq!(snap.title.as_deref(), Some("Hydrated"));
    assert_eq!(snap.ids.pmid.as_deref(), Some("100"));
    assert!(!snap.stub);
}

#[tokio::test]
async fn apply_record_fills_stub_then_respects_precedence() {
    let store = MemoryStore::new();
    let entity = store.resolve(&Identifier::pmid("100")).await.unwrap().id;

    let outcome = store
        .apply_record(entity, &record_with_title("PubMed title"), SourceTag::PubMed)
        .await
        .unwrap();
    assert_eq!(outcome, MergeOutcome::FilledStub);

    // Lower-precedence title never replaces the primary index's.
    store
        .apply_record(
            entity,
            &record_with_title("Crossref title"),
            SourceTag::Crossref,
        )
        .await
        .unwrap();
    let snap = store.snapshot(entity).await.unwrap().unwrap();
    assert_eq!(snap.title.as_deref(), Some("PubMed title"));
    assert!(snap.provenance.contains(&SourceTag::Crossref));
}

#[tokio::test]
async fn similarity_edges_are_unordered_and_created_once() {
    use citescope_graph::SimilarityPair;

    let store = MemoryStore::new();
    let a = uuid::Uuid::new_v4();
    let b = uuid::Uuid::new_v4();
    // register affiliations so ids exist conceptually; edges only need ids
    let forward = SimilarityPair {
        a,
        b,
        similarity: 0.9,
    };
    let backward = SimilarityPair {
        a: b,
        b: a,
        similarity: 0.9,
    };
    let reflexive = SimilarityPair {
        a,
        b: a,
        similarity: 1.0,
    };

    let created = store
        .create_similarity_edges(&[forward, backward, reflexive])
        .await
        .unwrap();
    assert_eq!(created, 1);
    assert_eq!(store.similarity_edge_count(), 1);
}
