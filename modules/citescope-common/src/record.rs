use chrono::NaiveDate;
use serde::{Deserialize, Serialize};

use crate::ids::ArticleIds;

/// Which external source supplied a record. Ordering of precedence per field
/// lives in the merge engine, not here.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SourceTag {
    PubMed,
    Crossref,
    Unpaywall,
    PdfExtract,
}

impl std::fmt::Display for SourceTag {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SourceTag::PubMed => write!(f, "pubmed"),
            SourceTag::Crossref => write!(f, "crossref"),
            SourceTag::Unpaywall => write!(f, "unpaywall"),
            SourceTag::PdfExtract => write!(f, "pdf_extract"),
        }
    }
}

impl SourceTag {
    pub fn parse(s: &str) -> Option<SourceTag> {
        match s {
            "pubmed" => Some(SourceTag::PubMed),
            "crossref" => Some(SourceTag::Crossref),
            "unpaywall" => Some(SourceTag::Unpaywall),
            "pdf_extract" => Some(SourceTag::PdfExtract),
            _ => None,
        }
    }
}

/// Kind of link-graph traversal to request from the search source.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LinkKind {
    /// Articles the given article cites.
    References,
    /// Articles citing the given article.
    CitedBy,
}

/// Inclusive publication-date window for the seed search.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct DateWindow {
    pub earliest: NaiveDate,
    pub latest: NaiveDate,
}

impl DateWindow {
    pub fn contains(&self, date: NaiveDate) -> bool {
        date >= self.earliest && date <= self.latest
    }
}

/// A bibliographic record as returned by any source, already normalized into
/// the shape the merge engine consumes. Fields a source cannot supply stay
/// `None` and never overwrite existing graph state.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ArticleRecord {
    pub ids: ArticleIds,
    pub title: Option<String>,
    pub pub_date: Option<NaiveDate>,
    pub pdf_url: Option<String>,
    pub license: Option<String>,
    pub cited_by_count: Option<i64>,
    /// Raw organisation strings for the authors of this article.
    pub affiliations: Vec<String>,
}

impl ArticleRecord {
    /// A record carrying nothing the merge engine could use.
    pub fn is_empty(&self) -> bool {
        self.ids.is_empty()
            && self.title.is_none()
            && self.pub_date.is_none()
            && self.pdf_url.is_none()
            && self.license.is_none()
            && self.cited_by_count.is_none()
            && self.affiliations.is_empty()
    }
}

/// A work from the citation-reference index: its own metadata plus the
/// references it declares.
#[derive(Debug, Clone, Default)]
pub struct Work {
    pub record: ArticleRecord,
    pub references: Vec<ArticleRecord>,
}

/// Metadata plus open-access PDF link from the open-access service.
#[derive(Debug, Clone, Default)]
pub struct OaRecord {
    pub record: ArticleRecord,
    pub pdf_url: Option<String>,
}

/// A directed citation link between two identifiers in one namespace,
/// as reported by the search source's link graph.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RefLink {
    pub from: String,
    pub to: String,
}

/// Outcome of the broad seed search.
#[derive(Debug, Clone, Default)]
pub struct SearchResult {
    pub count: u64,
    pub ids: Vec<String>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn source_tag_round_trips_through_display() {
        for tag in [
            SourceTag::PubMed,
            SourceTag::Crossref,
            SourceTag::Unpaywall,
            SourceTag::PdfExtract,
        ] {
            assert_eq!(SourceTag::parse(&tag.to_string()), Some(tag));
        }
        assert_eq!(SourceTag::parse("semantic_scholar"), None);
    }

    #[test]
    fn window_bounds_are_inclusive() {
        let w = DateWindow {
            earliest: NaiveDate::from_ymd_opt(2019, 1, 1).unwrap(),
            latest: NaiveDate::from_ymd_opt(2020, 6, 1).unwrap(),
        };
        assert!(w.contains(w.earliest));
        assert!(w.contains(w.latest));
        assert!(!w.contains(NaiveDate::from_ymd_opt(2020, 6, 2).unwrap()));
    }
}
