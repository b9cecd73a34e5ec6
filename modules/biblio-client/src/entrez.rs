//! Entrez E-utilities client: esearch for the seed query, efetch (MEDLINE
//! text) for metadata hydration, elink for the citation link graph.

use async_trait::async_trait;
use serde::Deserialize;

use citescope_common::sources::SearchSource;
use citescope_common::{
    ArticleRecord, DateWindow, Error, LinkKind, RefLink, Result, SearchResult, SourceTag,
};

use crate::medline;

const EUTILS_BASE: &str = "https://eutils.ncbi.nlm.nih.gov/entrez/eutils";

/// Upper bound on ids returned by a single esearch call. The seed search is
/// expected to be broad but bounded; anything larger should narrow the query.
const SEARCH_RETMAX: u32 = 100_000;

pub struct EntrezClient {
    client: reqwest::Client,
    email: String,
    api_key: Option<String>,
}

impl EntrezClient {
    pub fn new(contact_email: &str, api_key: Option<String>) -> Self {
        Self {
            client: crate::http_client(contact_email),
            email: contact_email.to_string(),
            api_key,
        }
    }

    fn endpoint(&self, tool: &str) -> String {
        format!("{EUTILS_BASE}/{tool}.fcgi")
    }

    fn common_params(&self) -> Vec<(&'static str, String)> {
        let mut params = vec![("tool", "citescope".to_string()), ("email", self.email.clone())];
        if let Some(key) = &self.api_key {
            params.push(("api_key", key.clone()));
        }
        params
    }

    async fn get_json<T: serde::de::DeserializeOwned>(
        &self,
        url: &str,
        params: &[(&str, String)],
    ) -> Result<T> {
        let resp = self
            .client
            .get(url)
            .query(params)
            .send()
            .await
            .map_err(|e| Error::source_unavailable(SourceTag::PubMed, e))?;

        let status = resp.status();
        if !status.is_success() {
            return Err(Error::source_unavailable(
                SourceTag::PubMed,
                format!("{url} returned {status}"),
            ));
        }

        resp.json::<T>()
            .await
            .map_err(|e| Error::malformed(SourceTag::PubMed, e))
    }
}

#[derive(Debug, Deserialize)]
struct EsearchEnvelope {
    esearchresult: EsearchResult,
}

#[derive(Debug, Deserialize)]
struct EsearchResult {
    count: String,
    #[serde(default)]
    idlist: Vec<String>,
}

#[derive(Debug, Deserialize)]
struct ElinkEnvelope {
    #[serde(default)]
    linksets: Vec<LinkSet>,
}

#[derive(Debug, Deserialize)]
struct LinkSet {
    #[serde(default)]
    ids: Vec<String>,
    #[serde(default)]
    linksetdbs: Vec<LinkSetDb>,
}

#[derive(Debug, Deserialize)]
struct LinkSetDb {
    linkname: String,
    #[serde(default)]
    links: Vec<String>,
}

#[async_trait]
impl SearchSource for EntrezClient {
    async fn search(&self, query: &str, window: DateWindow) -> Result<SearchResult> {
        let mut params = self.common_params();
        params.extend([
            ("db", "pubmed".to_string()),
            ("term", query.to_string()),
            ("retmode", "json".to_string()),
            ("retmax", SEARCH_RETMAX.to_string()),
            ("datetype", "pdat".to_string()),
            ("mindate", window.earliest.format("%Y/%m/%d").to_string()),
            ("maxdate", window.latest.format("%Y/%m/%d").to_string()),
        ]);

        let envelope: EsearchEnvelope = self.get_json(&self.endpoint("esearch"), &params).await?;
        let count = envelope
            .esearchresult
            .count
            .parse::<u64>()
            .map_err(|_| Error::malformed(SourceTag::PubMed, "non-numeric esearch count"))?;

        tracing::debug!(query, count, "Entrez search completed");
        Ok(SearchResult {
            count,
            ids: envelope.esearchresult.idlist,
        })
    }

    async fn fetch_by_ids(&self, pmids: &[String]) -> Result<Vec<ArticleRecord>> {
        if pmids.is_empty() {
            return Ok(Vec::new());
        }

        let mut params = self.common_params();
        params.extend([
            ("db", "pubmed".to_string()),
            ("id", pmids.join(",")),
            ("rettype", "medline".to_string()),
            ("retmode", "text".to_string()),
        ]);

        let resp = self
            .client
            .get(self.endpoint("efetch"))
            .query(&params)
            .send()
            .await
            .map_err(|e| Error::source_unavailable(SourceTag::PubMed, e))?;

        let status = resp.status();
        if !status.is_success() {
            return Err(Error::source_unavailable(
                SourceTag::PubMed,
                format!("efetch returned {status}"),
            ));
        }

        let text = resp
            .text()
            .await
            .map_err(|e| Error::malformed(SourceTag::PubMed, e))?;

        let records = medline::parse_records(&text);
        tracing::debug!(requested = pmids.len(), parsed = records.len(), "efetch batch parsed");
        Ok(records)
    }

    async fn fetch_links(&self, pmids: &[String], kind: LinkKind) -> Result<Vec<RefLink>> {
        if pmids.is_empty() {
            return Ok(Vec::new());
        }

        let linkname = match kind {
            LinkKind::References => "pubmed_pubmed_refs",
            LinkKind::CitedBy => "pubmed_pubmed_citedin",
        };

        let mut params = self.common_params();
        params.extend([
            ("dbfrom", "pubmed".to_string()),
            ("db", "pubmed".to_string()),
            ("cmd", "neighbor".to_string()),
            ("linkname", linkname.to_string()),
            ("retmode", "json".to_string()),
        ]);
        // One id parameter per pmid keeps linksets attributed per source id.
        for pmid in pmids {
            params.push(("id", pmid.clone()));
        }

        let envelope: ElinkEnvelope = self.get_json(&self.endpoint("elink"), &params).await?;

        let mut links = Vec::new();
        for set in envelope.linksets {
            let Some(from) = set.ids.first() else { continue };
            for db in set.linksetdbs.into_iter().filter(|d| d.linkname == linkname) {
                for to in db.links {
                    links.push(RefLink {
                        from: from.clone(),
                        to,
                    });
                }
            }
        }

        tracing::debug!(requested = pmids.len(), links = links.len(), "elink batch resolved");
        Ok(links)
    }
}
