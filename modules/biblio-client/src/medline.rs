//! Parser for Entrez efetch MEDLINE tagged text (`rettype=medline`).
//!
//! The format is line-oriented: a four-character tag, `- `, then the value;
//! continuation lines are indented six spaces. Records are separated by blank
//! lines. Only the tags the merge engine consumes are extracted.

use chrono::NaiveDate;

use citescope_common::{ArticleIds, ArticleRecord};

/// Parse a full efetch response into one record per PMID entry.
pub fn parse_records(text: &str) -> Vec<ArticleRecord> {
    text.split("\n\n")
        .filter(|block| !block.trim().is_empty())
        .filter_map(parse_record)
        .collect()
}

fn parse_record(block: &str) -> Option<ArticleRecord> {
    let mut pmid = None;
    let mut pmcid = None;
    let mut doi = None;
    let mut title = None;
    let mut pub_date = None;
    let mut affiliations = Vec::new();

    for (tag, value) in fields(block) {
        match tag.as_str() {
            "PMID" => pmid = Some(value),
            "PMC" => pmcid = Some(value),
            "AID" => {
                if let Some(v) = value.strip_suffix("[doi]") {
                    doi = Some(v.trim().to_string());
                }
            }
            // LID carries the DOI when no AID [doi] line is present.
            "LID" => {
                if doi.is_none() {
                    if let Some(v) = value.strip_suffix("[doi]") {
                        doi = Some(v.trim().to_string());
                    }
                }
            }
            "TI" => title = Some(value.trim_end_matches('.').to_string()),
            "DP" => pub_date = parse_pub_date(&value),
            "AD" => affiliations.push(clean_affiliation(&value)),
            _ => {}
        }
    }

    let pmid = pmid?;
    let mut ids = ArticleIds::default().with_pmid(pmid);
    if let Some(doi) = doi {
        ids = ids.with_doi(doi);
    }
    if let Some(pmcid) = pmcid {
        ids = ids.with_pmcid(pmcid);
    }

    Some(ArticleRecord {
        ids,
        title,
        pub_date,
        affiliations,
        ..Default::default()
    })
}

/// Fold continuation lines into their owning tag and yield (tag, value) pairs.
fn fields(block: &str) -> Vec<(String, String)> {
    let mut out: Vec<(String, String)> = Vec::new();
    for line in block.lines() {
        if let Some(rest) = line.strip_prefix("      ") {
            if let Some(last) = out.last_mut() {
                last.1.push(' ');
                last.1.push_str(rest.trim());
            }
        } else if line.get(4..6) == Some("- ") {
            let tag = line.get(..4).unwrap_or_default().trim().to_string();
            let value = line.get(6..).unwrap_or_default().trim().to_string();
            out.push((tag, value));
        }
    }
    out
}

/// MEDLINE `DP` values range from `2019 Mar 12` down to just `2019`.
/// Missing components default to the first of the month/year.
fn parse_pub_date(value: &str) -> Option<NaiveDate> {
    let parts: Vec<&str> = value.split_whitespace().collect();
    let year: i32 = parts.first()?.parse().ok()?;
    let month = parts
        .get(1)
        .and_then(|m| parse_month(m))
        .unwrap_or(1);
    let day: u32 = parts.get(2).and_then(|d| d.parse().ok()).unwrap_or(1);
    NaiveDate::from_ymd_opt(year, month, day)
        .or_else(|| NaiveDate::from_ymd_opt(year, month, 1))
}

fn parse_month(m: &str) -> Option<u32> {
    let lower = m.to_lowercase();
    match lower.get(..3)? {
        "jan" => Some(1),
        "feb" => Some(2),
        "mar" => Some(3),
        "apr" => Some(4),
        "may" => Some(5),
        "jun" => Some(6),
        "jul" => Some(7),
        "aug" => Some(8),
        "sep" => Some(9),
        "oct" => Some(10),
        "nov" => Some(11),
        "dec" => Some(12),
        _ => None,
    }
}

/// Affiliation lines often end with a contact email and a trailing period;
/// both add noise to token weighting downstream.
fn clean_affiliation(value: &str) -> String {
    let mut s = value.trim().trim_end_matches('.').to_string();
    if let Some(idx) = s.find("Electronic address:") {
        s.truncate(idx);
    }
    s.trim().trim_end_matches('.').trim().to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    const RECORD: &str = "PMID- 31113000\n\
OWN - NLM\n\
DP  - 2019 May 21\n\
TI  - Machine learning for sepsis prediction in the\n      intensive care unit.\n\
AD  - Department of Critical Care, University of Oxford, Oxford, UK.\n      Electronic address: someone@ox.ac.uk.\n\
PMC - PMC6529359\n\
AID - 10.1186/S13054-019-2411-Z [doi]\n\
AID - 2411 [pii]";

    #[test]
    fn parses_a_tagged_record() {
        let records = parse_records(RECORD);
        assert_eq!(records.len(), 1);
        let r = &records[0];
        assert_eq!(r.ids.pmid.as_deref(), Some("31113000"));
        assert_eq!(r.ids.pmcid.as_deref(), Some("PMC6529359"));
        // DOI is lower-cased by ArticleIds construction
        assert_eq!(r.ids.doi.as_deref(), Some("10.1186/s13054-019-2411-z"));
        assert_eq!(
            r.title.as_deref(),
            Some("Machine learning for sepsis prediction in the intensive care unit")
        );
        assert_eq!(r.pub_date, NaiveDate::from_ymd_opt(2019, 5, 21));
        assert_eq!(
            r.affiliations,
            vec!["Department of Critical Care, University of Oxford, Oxford, UK".to_string()]
        );
    }

    #[test]
    fn record_without_pmid_is_dropped() {
        assert!(parse_records("TI  - No id here\n").is_empty());
    }

    #[test]
    fn year_only_dates_default_to_january_first() {
        assert_eq!(parse_pub_date("2020"), NaiveDate::from_ymd_opt(2020, 1, 1));
        assert_eq!(
            parse_pub_date("2020 Dec"),
            NaiveDate::from_ymd_opt(2020, 12, 1)
        );
    }

    #[test]
    fn multiple_records_split_on_blank_lines() {
        let text = format!("{RECORD}\n\nPMID- 2\nTI  - Second.\nDP  - 2018\n");
        let records = parse_records(&text);
        assert_eq!(records.len(), 2);
        assert_eq!(records[1].ids.pmid.as_deref(), Some("2"));
    }
}
