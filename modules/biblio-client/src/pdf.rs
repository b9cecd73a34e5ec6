//! Reference extraction from article PDFs: text via `lopdf`, then a
//! line-structure heuristic over the trailing references section.

use regex::Regex;
use std::sync::OnceLock;

use citescope_common::sources::ReferenceExtractor;
use citescope_common::{Error, Result, SourceTag};

/// Headings that open a bibliography section, checked case-insensitively.
const SECTION_HEADINGS: &[&str] = &["references", "bibliography", "literature cited"];

/// Citation strings shorter than this are heading fragments or page furniture.
const MIN_REFERENCE_LEN: usize = 40;

/// Marker for numbered reference styles: `1.`, `12.`, `[3]`, `(17)`.
fn numbered_marker() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"^\s*(?:\[\d{1,3}\]|\(\d{1,3}\)|\d{1,3}\.)\s+").unwrap())
}

pub struct PdfReferenceExtractor;

impl PdfReferenceExtractor {
    pub fn new() -> Self {
        Self
    }
}

impl Default for PdfReferenceExtractor {
    fn default() -> Self {
        Self::new()
    }
}

impl ReferenceExtractor for PdfReferenceExtractor {
    fn extract_references(&self, doc: &[u8]) -> Result<Vec<String>> {
        let document = lopdf::Document::load_mem(doc)
            .map_err(|e| Error::malformed(SourceTag::PdfExtract, e))?;

        let pages: Vec<u32> = document.get_pages().keys().copied().collect();
        let text = document
            .extract_text(&pages)
            .map_err(|e| Error::malformed(SourceTag::PdfExtract, e))?;

        Ok(split_references(&text))
    }
}

/// Cut the text at the last bibliography heading and split what follows into
/// individual citation strings.
pub fn split_references(text: &str) -> Vec<String> {
    let lower = text.to_lowercase();
    let start = SECTION_HEADINGS
        .iter()
        .filter_map(|h| lower.rfind(h).map(|i| i + h.len()))
        .max();

    let Some(start) = start else {
        return Vec::new();
    };
    let section = &text[start..];

    let mut refs: Vec<String> = Vec::new();
    let mut current = String::new();
    for line in section.lines() {
        let line = line.trim();
        if line.is_empty() {
            continue;
        }
        if numbered_marker().is_match(line) {
            push_reference(&mut refs, std::mem::take(&mut current));
            current = numbered_marker().replace(line, "").to_string();
        } else if !current.is_empty() {
            current.push(' ');
            current.push_str(line);
        } else {
            current = line.to_string();
        }
    }
    push_reference(&mut refs, current);
    refs
}

fn push_reference(refs: &mut Vec<String>, candidate: String) {
    let candidate = candidate.trim().to_string();
    if candidate.len() >= MIN_REFERENCE_LEN {
        refs.push(candidate);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn splits_numbered_references_after_heading() {
        let text = "Body text mentioning references casually.\n\
            References\n\
            1. Smith J, Jones K. Sepsis prediction with gradient boosting. Crit Care. 2019;23:64.\n\
            2. Doe A. Deep learning for early warning scores in hospital\n\
            wards. Lancet Digit Health. 2020;2:e102.\n";
        let refs = split_references(text);
        assert_eq!(refs.len(), 2);
        assert!(refs[0].starts_with("Smith J"));
        // wrapped line was folded into the second reference
        assert!(refs[1].contains("hospital wards"));
    }

    #[test]
    fn no_heading_means_no_references() {
        assert!(split_references("plain text without a bibliography").is_empty());
    }

    #[test]
    fn short_fragments_are_dropped() {
        let text = "References\n1. Too short.\n";
        assert!(split_references(text).is_empty());
    }
}
