//! The build pass is a fixed sequence of stages, declared here as data so the
//! order, each stage's frontier predicate, and its source dependency are
//! explicit and individually testable.

use citescope_common::SourceTag;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum StageId {
    Seed,
    Hydrate,
    ExpandCitations,
    BackLink,
    PdfFallback,
    GapFill,
    CitationBackfill,
    OpenAccessBackfill,
    AffiliationClustering,
    DerivedQueries,
}

impl std::fmt::Display for StageId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = STAGES
            .iter()
            .find(|s| s.id == *self)
            .map(|s| s.name)
            .unwrap_or("unknown");
        write!(f, "{name}")
    }
}

/// One stage descriptor: what runs, over which frontier, against which source.
#[derive(Debug, Clone, Copy)]
pub struct StageSpec {
    pub id: StageId,
    pub name: &'static str,
    pub frontier: &'static str,
    pub source: Option<SourceTag>,
}

/// The build pass, in execution order. Each stage runs exactly once; its
/// frontier is computed fresh from graph state at stage entry.
pub const STAGES: [StageSpec; 10] = [
    StageSpec {
        id: StageId::Seed,
        name: "seed",
        frontier: "broad search hits for the date window",
        source: Some(SourceTag::PubMed),
    },
    StageSpec {
        id: StageId::Hydrate,
        name: "hydrate",
        frontier: "seed PMIDs, in bounded batches",
        source: Some(SourceTag::PubMed),
    },
    StageSpec {
        id: StageId::ExpandCitations,
        name: "expand-citations",
        frontier: "articles with a DOI and no outgoing references",
        source: Some(SourceTag::Crossref),
    },
    StageSpec {
        id: StageId::BackLink,
        name: "back-link",
        frontier: "still-unreferenced articles with a PMID",
        source: Some(SourceTag::PubMed),
    },
    StageSpec {
        id: StageId::PdfFallback,
        name: "pdf-fallback",
        frontier: "unreferenced articles within the seed set",
        source: Some(SourceTag::Unpaywall),
    },
    StageSpec {
        id: StageId::GapFill,
        name: "gap-fill",
        frontier: "articles missing a DOI or a PMID",
        source: Some(SourceTag::PubMed),
    },
    StageSpec {
        id: StageId::CitationBackfill,
        name: "citation-backfill",
        frontier: "articles with unknown cited-by count",
        source: Some(SourceTag::Crossref),
    },
    StageSpec {
        id: StageId::OpenAccessBackfill,
        name: "open-access-backfill",
        frontier: "remaining stubs, then the seed set for PDF links",
        source: Some(SourceTag::Unpaywall),
    },
    StageSpec {
        id: StageId::AffiliationClustering,
        name: "affiliation-clustering",
        frontier: "all affiliation nodes",
        source: None,
    },
    StageSpec {
        id: StageId::DerivedQueries,
        name: "derived-queries",
        frontier: "configured named queries, in declared order",
        source: None,
    },
];
