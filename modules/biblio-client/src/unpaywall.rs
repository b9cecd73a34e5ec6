//! Unpaywall v2 client: open-access metadata and PDF download.

use async_trait::async_trait;
use bytes::Bytes;
use chrono::NaiveDate;
use serde::Deserialize;

use citescope_common::sources::OpenAccessSource;
use citescope_common::{ArticleIds, ArticleRecord, Error, OaRecord, Result, SourceTag};

const UNPAYWALL_BASE: &str = "https://api.unpaywall.org/v2";

pub struct UnpaywallClient {
    client: reqwest::Client,
    email: String,
}

impl UnpaywallClient {
    pub fn new(contact_email: &str) -> Self {
        Self {
            client: crate::http_client(contact_email),
            email: contact_email.to_string(),
        }
    }
}

#[derive(Debug, Deserialize)]
struct UnpaywallResponse {
    doi: String,
    title: Option<String>,
    published_date: Option<String>,
    best_oa_location: Option<OaLocation>,
}

#[derive(Debug, Deserialize)]
struct OaLocation {
    url_for_pdf: Option<String>,
    license: Option<String>,
}

impl UnpaywallResponse {
    fn into_oa_record(self) -> OaRecord {
        let pub_date = self
            .published_date
            .as_deref()
            .and_then(|d| NaiveDate::parse_from_str(d, "%Y-%m-%d").ok());
        let (pdf_url, license) = match self.best_oa_location {
            Some(loc) => (loc.url_for_pdf, loc.license),
            None => (None, None),
        };

        OaRecord {
            record: ArticleRecord {
                ids: ArticleIds::default().with_doi(self.doi),
                title: self.title,
                pub_date,
                pdf_url: pdf_url.clone(),
                license,
                ..Default::default()
            },
            pdf_url,
        }
    }
}

#[async_trait]
impl OpenAccessSource for UnpaywallClient {
    async fn get_by_doi(&self, doi: &str) -> Result<Option<OaRecord>> {
        let url = format!("{UNPAYWALL_BASE}/{doi}");
        let resp = self
            .client
            .get(&url)
            .query(&[("email", self.email.as_str())])
            .send()
            .await
            .map_err(|e| Error::source_unavailable(SourceTag::Unpaywall, e))?;

        let status = resp.status();
        if status == reqwest::StatusCode::NOT_FOUND {
            return Ok(None);
        }
        if !status.is_success() {
            return Err(Error::source_unavailable(
                SourceTag::Unpaywall,
                format!("{url} returned {status}"),
            ));
        }

        let payload: UnpaywallResponse = resp
            .json()
            .await
            .map_err(|e| Error::malformed(SourceTag::Unpaywall, e))?;
        Ok(Some(payload.into_oa_record()))
    }

    async fn fetch_pdf(&self, doi: &str) -> Result<Option<Bytes>> {
        let Some(oa) = self.get_by_doi(doi).await? else {
            return Ok(None);
        };
        let Some(pdf_url) = oa.pdf_url else {
            return Ok(None);
        };

        let resp = self
            .client
            .get(&pdf_url)
            .send()
            .await
            .map_err(|e| Error::source_unavailable(SourceTag::Unpaywall, e))?;

        if !resp.status().is_success() {
            tracing::debug!(doi, pdf_url, status = %resp.status(), "open-access PDF not retrievable");
            return Ok(None);
        }

        let bytes = resp
            .bytes()
            .await
            .map_err(|e| Error::source_unavailable(SourceTag::Unpaywall, e))?;

        // Some hosts answer 200 with an HTML interstitial instead of the PDF.
        if !bytes.starts_with(b"%PDF") {
            tracing::debug!(doi, pdf_url, "response is not a PDF, skipping");
            return Ok(None);
        }
        Ok(Some(bytes))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn payload_maps_pdf_link_and_license() {
        let json = serde_json::json!({
            "doi": "10.1/A",
            "title": "A title",
            "published_date": "2019-05-21",
            "best_oa_location": {
                "url_for_pdf": "https://host/a.pdf",
                "license": "cc-by"
            }
        });
        let payload: UnpaywallResponse = serde_json::from_value(json).unwrap();
        let oa = payload.into_oa_record();
        assert_eq!(oa.record.ids.doi.as_deref(), Some("10.1/a"));
        assert_eq!(oa.pdf_url.as_deref(), Some("https://host/a.pdf"));
        assert_eq!(oa.record.license.as_deref(), Some("cc-by"));
        assert_eq!(oa.record.pub_date, NaiveDate::from_ymd_opt(2019, 5, 21));
    }

    #[test]
    fn closed_access_payload_has_no_pdf() {
        let json = serde_json::json!({"doi": "10.1/B", "title": null, "published_date": null, "best_oa_location": null});
        let payload: UnpaywallResponse = serde_json::from_value(json).unwrap();
        let oa = payload.into_oa_record();
        assert!(oa.pdf_url.is_none());
        assert!(oa.record.license.is_none());
    }
}
