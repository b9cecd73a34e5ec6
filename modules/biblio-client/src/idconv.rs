//! NCBI PMC ID converter client: maps DOIs/PMIDs/PMCIDs onto each other.

use std::collections::HashMap;

use async_trait::async_trait;
use serde::Deserialize;

use citescope_common::sources::IdConverter;
use citescope_common::{ArticleIds, Error, IdKind, Result, SourceTag};

const IDCONV_BASE: &str = "https://www.ncbi.nlm.nih.gov/pmc/utils/idconv/v1.0/";

/// The converter accepts at most 200 ids per request; stay under it.
const IDCONV_BATCH: usize = 100;

pub struct IdConverterClient {
    client: reqwest::Client,
    email: String,
}

impl IdConverterClient {
    pub fn new(contact_email: &str) -> Self {
        Self {
            client: crate::http_client(contact_email),
            email: contact_email.to_string(),
        }
    }
}

#[derive(Debug, Deserialize)]
struct IdConvEnvelope {
    #[serde(default)]
    records: Vec<IdConvRecord>,
}

#[derive(Debug, Deserialize)]
struct IdConvRecord {
    doi: Option<String>,
    pmid: Option<String>,
    pmcid: Option<String>,
}

impl IdConvRecord {
    fn ids(&self) -> ArticleIds {
        let mut ids = ArticleIds::default();
        if let Some(doi) = &self.doi {
            ids = ids.with_doi(doi.clone());
        }
        if let Some(pmid) = &self.pmid {
            ids = ids.with_pmid(pmid.clone());
        }
        if let Some(pmcid) = &self.pmcid {
            ids = ids.with_pmcid(pmcid.clone());
        }
        ids
    }

    /// The value this record is keyed under in the result map.
    fn key_for(&self, from: IdKind) -> Option<String> {
        match from {
            IdKind::Doi => self.doi.as_ref().map(|d| d.to_lowercase()),
            IdKind::Pmid => self.pmid.clone(),
            IdKind::Pmcid => self.pmcid.clone(),
        }
    }
}

#[async_trait]
impl IdConverter for IdConverterClient {
    async fn map_ids(&self, ids: &[String], from: IdKind) -> Result<HashMap<String, ArticleIds>> {
        let idtype = match from {
            IdKind::Doi => "doi",
            IdKind::Pmid => "pmid",
            IdKind::Pmcid => "pmcid",
        };

        let mut out = HashMap::new();
        for batch in ids.chunks(IDCONV_BATCH) {
            let resp = self
                .client
                .get(IDCONV_BASE)
                .query(&[
                    ("tool", "citescope"),
                    ("email", self.email.as_str()),
                    ("format", "json"),
                    ("idtype", idtype),
                    ("ids", batch.join(",").as_str()),
                ])
                .send()
                .await
                .map_err(|e| Error::source_unavailable(SourceTag::PubMed, e))?;

            let status = resp.status();
            if !status.is_success() {
                return Err(Error::source_unavailable(
                    SourceTag::PubMed,
                    format!("idconv returned {status}"),
                ));
            }

            let envelope: IdConvEnvelope = resp
                .json()
                .await
                .map_err(|e| Error::malformed(SourceTag::PubMed, e))?;

            for record in envelope.records {
                let mapped = record.ids();
                if mapped.len() < 2 {
                    // Nothing new beyond the identifier we asked with.
                    continue;
                }
                if let Some(key) = record.key_for(from) {
                    out.insert(key, mapped);
                }
            }

            tracing::debug!(batch = batch.len(), mapped = out.len(), "idconv batch mapped");
        }
        Ok(out)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn record_keys_by_requested_namespace() {
        let json = serde_json::json!({
            "records": [
                {"doi": "10.1/A", "pmid": "100", "pmcid": "PMC1"},
                {"doi": "10.1/b"}
            ]
        });
        let envelope: IdConvEnvelope = serde_json::from_value(json).unwrap();

        let full = &envelope.records[0];
        assert_eq!(full.key_for(IdKind::Doi).as_deref(), Some("10.1/a"));
        assert_eq!(full.key_for(IdKind::Pmid).as_deref(), Some("100"));
        assert_eq!(full.ids().len(), 3);

        // a record that maps to nothing new
        assert_eq!(envelope.records[1].ids().len(), 1);
    }
}
