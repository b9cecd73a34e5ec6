//! Capability traits for the external bibliographic sources. The frontier
//! controller only ever sees these; concrete HTTP clients live in
//! `biblio-client` and tests substitute mocks.

use std::collections::HashMap;

use async_trait::async_trait;
use bytes::Bytes;

use crate::error::Result;
use crate::ids::{ArticleIds, IdKind};
use crate::record::{ArticleRecord, DateWindow, LinkKind, OaRecord, RefLink, SearchResult, Work};

/// Primary search/metadata index (PubMed Entrez in production).
#[async_trait]
pub trait SearchSource: Send + Sync {
    /// Run a search query constrained to a publication-date window.
    async fn search(&self, query: &str, window: DateWindow) -> Result<SearchResult>;

    /// Fetch full metadata records for a batch of PMIDs. Callers bound the
    /// batch size; implementations must not re-chunk.
    async fn fetch_by_ids(&self, pmids: &[String]) -> Result<Vec<ArticleRecord>>;

    /// Query the link graph for citation neighbors of the given PMIDs.
    async fn fetch_links(&self, pmids: &[String], kind: LinkKind) -> Result<Vec<RefLink>>;
}

/// Citation-reference index (Crossref in production).
#[async_trait]
pub trait CitationSource: Send + Sync {
    /// Look up a work and its declared references by DOI.
    async fn get_by_doi(&self, doi: &str) -> Result<Option<Work>>;

    /// Fuzzy-resolve a free-text citation string to a known work.
    async fn find_by_citation_string(&self, text: &str) -> Result<Option<Work>>;
}

/// Open-access metadata service (Unpaywall in production).
#[async_trait]
pub trait OpenAccessSource: Send + Sync {
    async fn get_by_doi(&self, doi: &str) -> Result<Option<OaRecord>>;

    /// Download the open-access PDF if one is available.
    async fn fetch_pdf(&self, doi: &str) -> Result<Option<Bytes>>;
}

/// Identifier cross-reference service (NCBI ID converter in production).
#[async_trait]
pub trait IdConverter: Send + Sync {
    /// Map identifiers of one namespace to the full identifier sets known for
    /// them. Absent mappings are simply missing from the result map.
    async fn map_ids(&self, ids: &[String], from: IdKind) -> Result<HashMap<String, ArticleIds>>;
}

/// Extracts raw citation strings from an article PDF.
pub trait ReferenceExtractor: Send + Sync {
    fn extract_references(&self, doc: &[u8]) -> Result<Vec<String>>;
}
