//! Pure merge logic shared by every `GraphStore` implementation: field-level
//! source precedence, stub transitions, coalesce property union, and the
//! deterministic survivor rule.

use citescope_common::{ArticleRecord, SourceTag};

use crate::store::{ArticleSnapshot, MergeOutcome};

/// Field classes with distinct precedence orderings.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum FieldClass {
    /// Title and publication date: the primary index is authoritative.
    Descriptive,
    /// PDF link and license: the open-access service is authoritative.
    Access,
    /// Cited-by count: only the citation index supplies it.
    CitedBy,
}

/// Rank of a source for a field class; higher wins, `None` means the source
/// never writes that class.
fn rank(class: FieldClass, source: SourceTag) -> Option<u8> {
    match class {
        FieldClass::Descriptive => Some(match source {
            SourceTag::PubMed => 3,
            SourceTag::Crossref => 2,
            SourceTag::Unpaywall => 1,
            SourceTag::PdfExtract => 0,
        }),
        FieldClass::Access => Some(match source {
            SourceTag::Unpaywall => 3,
            SourceTag::Crossref => 2,
            SourceTag::PubMed => 1,
            SourceTag::PdfExtract => 0,
        }),
        FieldClass::CitedBy => match source {
            SourceTag::Crossref => Some(3),
            _ => None,
        },
    }
}

/// Whether `incoming` may write a field of `class` currently owned by
/// `current`. Absent fields are always writable; a source may refresh its own
/// value; otherwise strictly higher precedence is required.
fn may_write(class: FieldClass, current: Option<SourceTag>, incoming: SourceTag) -> bool {
    let Some(incoming_rank) = rank(class, incoming) else {
        return false;
    };
    match current {
        None => true,
        Some(cur) if cur == incoming => true,
        Some(cur) => rank(class, cur).map_or(true, |r| incoming_rank > r),
    }
}

/// Apply `record` to `current` under the precedence table. Returns the merged
/// snapshot and what changed. Identifiers are NOT merged here — identifier
/// attachment (and any coalescing it triggers) is the resolver's job.
pub fn merged(
    current: &ArticleSnapshot,
    record: &ArticleRecord,
    source: SourceTag,
) -> (ArticleSnapshot, MergeOutcome) {
    let mut next = current.clone();
    let mut changed = false;

    if let Some(title) = &record.title {
        if may_write(FieldClass::Descriptive, next.field_sources.title, source)
            && next.title.as_ref() != Some(title)
        {
            next.title = Some(title.clone());
            next.field_sources.title = Some(source);
            changed = true;
        }
    }
    if let Some(date) = record.pub_date {
        if may_write(FieldClass::Descriptive, next.field_sources.pub_date, source)
            && next.pub_date != Some(date)
        {
            next.pub_date = Some(date);
            next.field_sources.pub_date = Some(source);
            changed = true;
        }
    }
    if let Some(pdf_url) = &record.pdf_url {
        if may_write(FieldClass::Access, next.field_sources.pdf_url, source)
            && next.pdf_url.as_ref() != Some(pdf_url)
        {
            next.pdf_url = Some(pdf_url.clone());
            next.field_sources.pdf_url = Some(source);
            changed = true;
        }
    }
    if let Some(license) = &record.license {
        if may_write(FieldClass::Access, next.field_sources.license, source)
            && next.license.as_ref() != Some(license)
        {
            next.license = Some(license.clone());
            next.field_sources.license = Some(source);
            changed = true;
        }
    }
    if let Some(count) = record.cited_by_count {
        if may_write(FieldClass::CitedBy, next.field_sources.cited_by_count, source)
            && next.cited_by_count != Some(count)
        {
            next.cited_by_count = Some(count);
            next.field_sources.cited_by_count = Some(source);
            changed = true;
        }
    }

    if !next.provenance.contains(&source) {
        next.provenance.push(source);
        changed = true;
    }

    let was_stub = next.stub;
    if next.title.is_some() {
        next.stub = false;
    }

    let outcome = if was_stub && !next.stub {
        MergeOutcome::FilledStub
    } else if changed {
        MergeOutcome::Updated
    } else {
        MergeOutcome::Unchanged
    };
    (next, outcome)
}

/// Completeness score for the survivor rule: populated identifier and
/// metadata slots.
fn completeness(s: &ArticleSnapshot) -> usize {
    s.ids.len()
        + s.title.is_some() as usize
        + s.pub_date.is_some() as usize
        + s.pdf_url.is_some() as usize
}

/// Deterministic survivor for a coalesce: more complete entity wins, ties go
/// to the earlier-created entity, final tie to the smaller uuid.
/// Returns (survivor, duplicate).
pub fn choose_survivor<'a>(
    a: &'a ArticleSnapshot,
    b: &'a ArticleSnapshot,
) -> (&'a ArticleSnapshot, &'a ArticleSnapshot) {
    let ordering = completeness(a)
        .cmp(&completeness(b))
        .then_with(|| b.created_at.cmp(&a.created_at))
        .then_with(|| b.id.cmp(&a.id));
    if ordering == std::cmp::Ordering::Less {
        (b, a)
    } else {
        (a, b)
    }
}

/// Property union for a coalesce: the survivor's populated fields win, absent
/// ones are filled from the duplicate; provenance is unioned, seed is or-ed.
pub fn union_into_survivor(
    survivor: &ArticleSnapshot,
    duplicate: &ArticleSnapshot,
) -> ArticleSnapshot {
    let mut merged = survivor.clone();

    merged.ids.doi = merged.ids.doi.or_else(|| duplicate.ids.doi.clone());
    merged.ids.pmid = merged.ids.pmid.or_else(|| duplicate.ids.pmid.clone());
    merged.ids.pmcid = merged.ids.pmcid.or_else(|| duplicate.ids.pmcid.clone());

    if merged.title.is_none() {
        merged.title = duplicate.title.clone();
        merged.field_sources.title = duplicate.field_sources.title;
    }
    if merged.pub_date.is_none() {
        merged.pub_date = duplicate.pub_date;
        merged.field_sources.pub_date = duplicate.field_sources.pub_date;
    }
    if merged.pdf_url.is_none() {
        merged.pdf_url = duplicate.pdf_url.clone();
        merged.field_sources.pdf_url = duplicate.field_sources.pdf_url;
    }
    if merged.license.is_none() {
        merged.license = duplicate.license.clone();
        merged.field_sources.license = duplicate.field_sources.license;
    }
    if merged.cited_by_count.is_none() {
        merged.cited_by_count = duplicate.cited_by_count;
        merged.field_sources.cited_by_count = duplicate.field_sources.cited_by_count;
    }

    for tag in &duplicate.provenance {
        if !merged.provenance.contains(tag) {
            merged.provenance.push(*tag);
        }
    }
    merged.seed = merged.seed || duplicate.seed;
    merged.stub = merged.title.is_none();
    merged.created_at = merged.created_at.min(duplicate.created_at);

    merged
}
