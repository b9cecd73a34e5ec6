//! Crossref works API client: DOI lookup with declared references, and fuzzy
//! resolution of free-text citation strings.

use async_trait::async_trait;
use chrono::NaiveDate;
use serde::Deserialize;

use citescope_common::sources::CitationSource;
use citescope_common::{ArticleIds, ArticleRecord, Error, Result, SourceTag, Work};

const CROSSREF_BASE: &str = "https://api.crossref.org";

/// Minimum Crossref relevance score for accepting a citation-string match.
/// Below this the top hit is usually an unrelated work.
const CITATION_MATCH_MIN_SCORE: f64 = 40.0;

pub struct CrossrefClient {
    client: reqwest::Client,
    email: String,
}

impl CrossrefClient {
    pub fn new(contact_email: &str) -> Self {
        Self {
            client: crate::http_client(contact_email),
            email: contact_email.to_string(),
        }
    }

    async fn get<T: serde::de::DeserializeOwned>(&self, url: &str) -> Result<Option<T>> {
        let resp = self
            .client
            .get(url)
            .query(&[("mailto", self.email.as_str())])
            .send()
            .await
            .map_err(|e| Error::source_unavailable(SourceTag::Crossref, e))?;

        let status = resp.status();
        if status == reqwest::StatusCode::NOT_FOUND {
            return Ok(None);
        }
        if !status.is_success() {
            return Err(Error::source_unavailable(
                SourceTag::Crossref,
                format!("{url} returned {status}"),
            ));
        }

        resp.json::<T>()
            .await
            .map(Some)
            .map_err(|e| Error::malformed(SourceTag::Crossref, e))
    }
}

#[derive(Debug, Deserialize)]
struct SingleEnvelope {
    message: CrossrefWork,
}

#[derive(Debug, Deserialize)]
struct ListEnvelope {
    message: CrossrefItems,
}

#[derive(Debug, Deserialize)]
struct CrossrefItems {
    #[serde(default)]
    items: Vec<CrossrefWork>,
}

#[derive(Debug, Deserialize)]
struct CrossrefWork {
    #[serde(rename = "DOI")]
    doi: String,
    #[serde(default)]
    title: Vec<String>,
    #[serde(default)]
    issued: Option<DateParts>,
    #[serde(rename = "is-referenced-by-count")]
    cited_by_count: Option<i64>,
    #[serde(default)]
    license: Vec<CrossrefLicense>,
    #[serde(default)]
    link: Vec<CrossrefLink>,
    #[serde(default)]
    reference: Vec<CrossrefReference>,
    #[serde(default)]
    author: Vec<CrossrefAuthor>,
    score: Option<f64>,
}

#[derive(Debug, Deserialize)]
struct DateParts {
    #[serde(rename = "date-parts", default)]
    date_parts: Vec<Vec<Option<i32>>>,
}

#[derive(Debug, Deserialize)]
struct CrossrefLicense {
    #[serde(rename = "URL")]
    url: Option<String>,
}

#[derive(Debug, Deserialize)]
struct CrossrefLink {
    #[serde(rename = "URL")]
    url: Option<String>,
    #[serde(rename = "content-type")]
    content_type: Option<String>,
}

#[derive(Debug, Deserialize)]
struct CrossrefReference {
    #[serde(rename = "DOI")]
    doi: Option<String>,
}

#[derive(Debug, Deserialize)]
struct CrossrefAuthor {
    #[serde(default)]
    affiliation: Vec<CrossrefAffiliation>,
}

#[derive(Debug, Deserialize)]
struct CrossrefAffiliation {
    name: Option<String>,
}

impl CrossrefWork {
    fn into_work(self) -> Work {
        let pub_date = self.issued.as_ref().and_then(date_from_parts);
        let pdf_url = self
            .link
            .iter()
            .find(|l| l.content_type.as_deref() == Some("application/pdf"))
            .and_then(|l| l.url.clone());
        let license = self.license.first().and_then(|l| l.url.clone());
        let affiliations = self
            .author
            .iter()
            .flat_map(|a| a.affiliation.iter())
            .filter_map(|a| a.name.clone())
            .collect();

        let references = self
            .reference
            .into_iter()
            .filter_map(|r| r.doi)
            .map(|doi| ArticleRecord {
                ids: ArticleIds::default().with_doi(doi),
                ..Default::default()
            })
            .collect();

        Work {
            record: ArticleRecord {
                ids: ArticleIds::default().with_doi(self.doi),
                title: self.title.into_iter().next(),
                pub_date,
                pdf_url,
                license,
                cited_by_count: self.cited_by_count,
                affiliations,
            },
            references,
        }
    }
}

fn date_from_parts(issued: &DateParts) -> Option<NaiveDate> {
    let parts = issued.date_parts.first()?;
    let year = (*parts.first()?)?;
    let month = parts.get(1).copied().flatten().unwrap_or(1) as u32;
    let day = parts.get(2).copied().flatten().unwrap_or(1) as u32;
    NaiveDate::from_ymd_opt(year, month, day)
        .or_else(|| NaiveDate::from_ymd_opt(year, month, 1))
        .or_else(|| NaiveDate::from_ymd_opt(year, 1, 1))
}

#[async_trait]
impl CitationSource for CrossrefClient {
    async fn get_by_doi(&self, doi: &str) -> Result<Option<Work>> {
        let url = format!("{CROSSREF_BASE}/works/{}", urlencoding::encode(doi));
        let envelope: Option<SingleEnvelope> = self.get(&url).await?;
        Ok(envelope.map(|e| e.message.into_work()))
    }

    async fn find_by_citation_string(&self, text: &str) -> Result<Option<Work>> {
        let resp = self
            .client
            .get(format!("{CROSSREF_BASE}/works"))
            .query(&[
                ("query.bibliographic", text),
                ("rows", "1"),
                ("mailto", self.email.as_str()),
            ])
            .send()
            .await
            .map_err(|e| Error::source_unavailable(SourceTag::Crossref, e))?;

        let status = resp.status();
        if !status.is_success() {
            return Err(Error::source_unavailable(
                SourceTag::Crossref,
                format!("bibliographic query returned {status}"),
            ));
        }

        let envelope: ListEnvelope = resp
            .json()
            .await
            .map_err(|e| Error::malformed(SourceTag::Crossref, e))?;

        let best = envelope
            .message
            .items
            .into_iter()
            .next()
            .filter(|w| w.score.unwrap_or(0.0) >= CITATION_MATCH_MIN_SCORE);

        if best.is_none() {
            tracing::debug!(text, "no confident Crossref match for citation string");
        }
        Ok(best.map(|w| w.into_work()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn work_payload_maps_into_record_and_references() {
        let json = serde_json::json!({
            "DOI": "10.1/A",
            "title": ["A title"],
            "issued": {"date-parts": [[2019, 3]]},
            "is-referenced-by-count": 12,
            "license": [{"URL": "https://creativecommons.org/licenses/by/4.0/"}],
            "link": [{"URL": "https://host/a.pdf", "content-type": "application/pdf"}],
            "reference": [
                {"DOI": "10.1/C"},
                {"unstructured": "no identifier, dropped"}
            ],
            "author": [{"affiliation": [{"name": "University of Somewhere"}]}]
        });
        let work: CrossrefWork = serde_json::from_value(json).unwrap();
        let work = work.into_work();

        assert_eq!(work.record.ids.doi.as_deref(), Some("10.1/a"));
        assert_eq!(work.record.title.as_deref(), Some("A title"));
        assert_eq!(
            work.record.pub_date,
            NaiveDate::from_ymd_opt(2019, 3, 1)
        );
        assert_eq!(work.record.cited_by_count, Some(12));
        assert_eq!(work.record.pdf_url.as_deref(), Some("https://host/a.pdf"));
        assert_eq!(work.record.affiliations.len(), 1);
        // references without a DOI cannot be resolved and are dropped
        assert_eq!(work.references.len(), 1);
        assert_eq!(work.references[0].ids.doi.as_deref(), Some("10.1/c"));
    }

}
