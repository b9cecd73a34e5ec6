//! The frontier controller: one `CitationGraphBuilder` per build invocation
//! owns all session state and drives the fixed stage sequence. Source fetches
//! fan out with bounded concurrency; graph writes stay sequential, which
//! serializes identifier resolution and coalescing.

use std::collections::HashSet;
use std::sync::Arc;

use futures::stream::{self, StreamExt};
use tracing::{debug, error, info, warn};

use citescope_common::sources::{
    CitationSource, IdConverter, OpenAccessSource, ReferenceExtractor, SearchSource,
};
use citescope_common::{
    ArticleRecord, BuildProfile, Error, IdKind, Identifier, LinkKind, Result, SourceTag, Work,
};
use citescope_graph::affiliation::AffiliationClusterer;
use citescope_graph::{Frontier, GraphStore, MergeOutcome};

use crate::outcome::{BuildReport, SkipReason, StageCounters, StageReport, UnitOutcome};
use crate::retry::with_retry;
use crate::stages::{StageId, STAGES};

/// In-flight source fetches per stage. Writes stay sequential regardless.
const FETCH_CONCURRENCY: usize = 8;

/// In-flight hydration batches.
const BATCH_CONCURRENCY: usize = 4;

/// Session state owned by exactly one build invocation; dropped when the pass
/// returns.
#[derive(Default)]
struct BuildSession {
    seed_pmids: Vec<String>,
}

pub struct CitationGraphBuilder<S: GraphStore> {
    store: S,
    search: Arc<dyn SearchSource>,
    citations: Arc<dyn CitationSource>,
    open_access: Arc<dyn OpenAccessSource>,
    id_converter: Arc<dyn IdConverter>,
    extractor: Arc<dyn ReferenceExtractor>,
    profile: BuildProfile,
}

impl<S: GraphStore> CitationGraphBuilder<S> {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        store: S,
        search: Arc<dyn SearchSource>,
        citations: Arc<dyn CitationSource>,
        open_access: Arc<dyn OpenAccessSource>,
        id_converter: Arc<dyn IdConverter>,
        extractor: Arc<dyn ReferenceExtractor>,
        profile: BuildProfile,
    ) -> Self {
        Self {
            store,
            search,
            citations,
            open_access,
            id_converter,
            extractor,
            profile,
        }
    }

    pub fn store(&self) -> &S {
        &self.store
    }

    /// Run one full build pass. Safe to re-run on a non-empty graph: every
    /// write is an upsert and frontier predicates exclude satisfied entities.
    pub async fn build(&self) -> Result<BuildReport> {
        self.profile.validate()?;

        if !self.store.acquire_build_lock().await? {
            return Err(Error::BuildLockHeld);
        }

        let result = self.build_inner().await;

        if let Err(e) = self.store.release_build_lock().await {
            error!(error = %e, "Failed to release build lock");
        }

        result
    }

    async fn build_inner(&self) -> Result<BuildReport> {
        let mut session = BuildSession::default();
        let mut report = BuildReport::default();

        for spec in &STAGES {
            info!(stage = spec.name, frontier = spec.frontier, "Stage starting");
            let counters = match spec.id {
                StageId::Seed => self.stage_seed(&mut session).await?,
                StageId::Hydrate => self.stage_hydrate(&session).await?,
                StageId::ExpandCitations => self.stage_expand_citations().await?,
                StageId::BackLink => self.stage_back_link().await?,
                StageId::PdfFallback => self.stage_pdf_fallback().await?,
                StageId::GapFill => self.stage_gap_fill().await?,
                StageId::CitationBackfill => self.stage_citation_backfill().await?,
                StageId::OpenAccessBackfill => self.stage_open_access_backfill().await?,
                StageId::AffiliationClustering => self.stage_affiliation_clustering().await?,
                StageId::DerivedQueries => self.stage_derived_queries().await?,
            };
            info!(
                stage = spec.name,
                found = counters.found,
                new = counters.new,
                updated = counters.updated,
                skipped = counters.skipped,
                "Stage complete"
            );
            report.stages.push(StageReport {
                id: spec.id,
                counters,
            });
        }

        report.articles = self.store.article_count().await?;
        report.citations = self.store.citation_count().await?;
        Ok(report)
    }

    /// Resolve a record's identifiers (coalescing as needed), merge its
    /// metadata, and attach affiliations.
    async fn ingest_record(&self, record: &ArticleRecord, source: SourceTag) -> Result<UnitOutcome> {
        let Some(primary) = record.ids.primary() else {
            return Ok(UnitOutcome::Skipped(SkipReason::MalformedRecord));
        };
        let resolved = self.store.resolve(&primary).await?;
        let entity = self.store.attach_identifiers(resolved.id, &record.ids).await?;
        let outcome = self.store.apply_record(entity, record, source).await?;
        if !record.affiliations.is_empty() {
            self.store.add_affiliations(entity, &record.affiliations).await?;
        }
        Ok(UnitOutcome::Ok {
            new: resolved.created,
            updated: !matches!(outcome, MergeOutcome::Unchanged),
        })
    }

    /// Stage 1: broad search for the date window; every hit becomes (or
    /// resolves to) a seed entity. A failing seed search aborts the pass.
    async fn stage_seed(&self, session: &mut BuildSession) -> Result<StageCounters> {
        let mut counters = StageCounters::default();

        let result = with_retry(|| {
            self.search
                .search(&self.profile.broader_search, self.profile.window())
        })
        .await?;
        info!(
            count = result.count,
            returned = result.ids.len(),
            "Broad search complete"
        );

        counters.found = result.ids.len() as u64;
        for pmid in &result.ids {
            let resolved = self.store.resolve(&Identifier::pmid(pmid.clone())).await?;
            self.store.mark_seed(resolved.id).await?;
            counters.record(UnitOutcome::Ok {
                new: resolved.created,
                updated: false,
            });
        }

        session.seed_pmids = result.ids;
        Ok(counters)
    }

    /// Fetch metadata for PMIDs in bounded batches and merge each record.
    /// One failing batch skips only its own units.
    async fn hydrate_pmids(&self, pmids: &[String], counters: &mut StageCounters) -> Result<()> {
        let batches: Vec<Vec<String>> = pmids
            .chunks(self.profile.hydrate_batch)
            .map(|c| c.to_vec())
            .collect();

        let fetched: Vec<(usize, Result<Vec<ArticleRecord>>)> =
            stream::iter(batches.into_iter().map(|batch| async move {
                let size = batch.len();
                let records = with_retry(|| self.search.fetch_by_ids(&batch)).await;
                (size, records)
            }))
            .buffer_unordered(BATCH_CONCURRENCY)
            .collect()
            .await;

        for (size, result) in fetched {
            match result {
                Ok(records) => {
                    for record in &records {
                        let outcome = self.ingest_record(record, SourceTag::PubMed).await?;
                        counters.record(outcome);
                    }
                }
                Err(e) => {
                    warn!(error = %e, batch = size, "Hydration batch failed, skipping");
                    counters.skip_many(size as u64, SkipReason::SourceUnavailable);
                }
            }
        }
        Ok(())
    }

    /// Stage 2: hydrate the seed set from the primary index.
    async fn stage_hydrate(&self, session: &BuildSession) -> Result<StageCounters> {
        let mut counters = StageCounters::default();
        counters.found = session.seed_pmids.len() as u64;
        self.hydrate_pmids(&session.seed_pmids, &mut counters).await?;
        Ok(counters)
    }

    /// Stage 3: one hop outward through the citation index for every article
    /// with a DOI and no outgoing references.
    async fn stage_expand_citations(&self) -> Result<StageCounters> {
        let frontier = self.store.frontier(Frontier::DoisUnreferenced).await?;
        let mut counters = StageCounters::default();
        counters.found = frontier.len() as u64;
        let queried: HashSet<String> = frontier.iter().cloned().collect();

        let fetched: Vec<(String, Result<Option<Work>>)> =
            stream::iter(frontier.into_iter().map(|doi| async move {
                let work = with_retry(|| self.citations.get_by_doi(&doi)).await;
                (doi, work)
            }))
            .buffer_unordered(FETCH_CONCURRENCY)
            .collect()
            .await;

        let mut discovered: HashSet<String> = HashSet::new();
        for (doi, result) in fetched {
            let work = match result {
                Ok(Some(work)) => work,
                Ok(None) => {
                    counters.record(UnitOutcome::Skipped(SkipReason::NoData));
                    continue;
                }
                Err(e) => {
                    warn!(doi, error = %e, "Citation index lookup failed, skipping");
                    counters.record(UnitOutcome::Skipped(SkipReason::SourceUnavailable));
                    continue;
                }
            };

            let resolved = self.store.resolve(&Identifier::doi(doi.clone())).await?;
            let entity = self
                .store
                .attach_identifiers(resolved.id, &work.record.ids)
                .await?;
            let merge = self
                .store
                .apply_record(entity, &work.record, SourceTag::Crossref)
                .await?;

            let mut edges = 0u64;
            for reference in &work.references {
                let Some(primary) = reference.ids.primary() else {
                    continue;
                };
                let target = self.store.resolve(&primary).await?;
                let target_id = self
                    .store
                    .attach_identifiers(target.id, &reference.ids)
                    .await?;
                if has_metadata(reference) {
                    self.store
                        .apply_record(target_id, reference, SourceTag::Crossref)
                        .await?;
                }
                if target.created {
                    counters.new += 1;
                    if let Some(d) = &reference.ids.doi {
                        discovered.insert(d.clone());
                    }
                }
                if self.store.create_citation(entity, target_id).await? {
                    edges += 1;
                }
            }
            debug!(doi, edges, "Citation index references mapped");
            counters.record(UnitOutcome::Ok {
                new: false,
                updated: edges > 0 || !matches!(merge, MergeOutcome::Unchanged),
            });
        }

        let new_sibling_dois = discovered.difference(&queried).count();
        info!(new_sibling_dois, "New sibling articles via citation index");
        Ok(counters)
    }

    /// Stage 4: for articles still unreferenced but holding a PMID, walk the
    /// primary index's link graph and create stub neighbors plus edges.
    async fn stage_back_link(&self) -> Result<StageCounters> {
        let frontier = self.store.frontier(Frontier::PmidsUnreferenced).await?;
        let mut counters = StageCounters::default();
        counters.found = frontier.len() as u64;
        if frontier.is_empty() {
            return Ok(counters);
        }

        let links = match with_retry(|| self.search.fetch_links(&frontier, LinkKind::References))
            .await
        {
            Ok(links) => links,
            Err(e) => {
                warn!(error = %e, "Link graph lookup failed, skipping back-link stage");
                counters.skip_many(frontier.len() as u64, SkipReason::SourceUnavailable);
                return Ok(counters);
            }
        };
        info!(links = links.len(), "Link graph returned citation links");

        for link in &links {
            let from = self.store.resolve(&Identifier::pmid(link.from.clone())).await?;
            let to = self.store.resolve(&Identifier::pmid(link.to.clone())).await?;
            if to.created {
                counters.new += 1;
            }
            if self.store.create_citation(from.id, to.id).await? {
                counters.updated += 1;
            }
        }
        Ok(counters)
    }

    /// Stage 5: for seed articles that still cite nothing, pull the
    /// open-access PDF, extract citation strings, and fuzzy-resolve each one
    /// against the citation index.
    async fn stage_pdf_fallback(&self) -> Result<StageCounters> {
        let unreferenced: HashSet<String> = self
            .store
            .frontier(Frontier::DoisUnreferenced)
            .await?
            .into_iter()
            .collect();
        let seed: HashSet<String> = self
            .store
            .frontier(Frontier::SeedDois)
            .await?
            .into_iter()
            .collect();
        let mut frontier: Vec<String> = unreferenced.intersection(&seed).cloned().collect();
        frontier.sort();

        let mut counters = StageCounters::default();
        counters.found = frontier.len() as u64;

        for doi in frontier {
            let pdf = match with_retry(|| self.open_access.fetch_pdf(&doi)).await {
                Ok(Some(pdf)) => pdf,
                Ok(None) => {
                    counters.record(UnitOutcome::Skipped(SkipReason::NoData));
                    continue;
                }
                Err(e) => {
                    warn!(doi, error = %e, "PDF fetch failed, skipping");
                    counters.record(UnitOutcome::Skipped(SkipReason::SourceUnavailable));
                    continue;
                }
            };

            let refs = match self.extractor.extract_references(&pdf) {
                Ok(refs) => refs,
                Err(e) => {
                    warn!(doi, error = %e, "Reference extraction failed, skipping");
                    counters.record(UnitOutcome::Skipped(SkipReason::MalformedRecord));
                    continue;
                }
            };
            debug!(doi, refs = refs.len(), "Extracted references from PDF");

            let entity = self.store.resolve(&Identifier::doi(doi.clone())).await?.id;
            let mut updated = false;
            for text in &refs {
                let work = match with_retry(|| self.citations.find_by_citation_string(text)).await
                {
                    Ok(Some(work)) => work,
                    Ok(None) => continue,
                    Err(e) => {
                        warn!(error = %e, "Citation string lookup failed, skipping");
                        continue;
                    }
                };
                let Some(primary) = work.record.ids.primary() else {
                    continue;
                };
                let target = self.store.resolve(&primary).await?;
                if target.created {
                    counters.new += 1;
                }
                let target_id = self
                    .store
                    .attach_identifiers(target.id, &work.record.ids)
                    .await?;
                if has_metadata(&work.record) {
                    self.store
                        .apply_record(target_id, &work.record, SourceTag::Crossref)
                        .await?;
                }
                if self.store.create_citation(entity, target_id).await? {
                    updated = true;
                }
            }
            counters.record(UnitOutcome::Ok {
                new: false,
                updated,
            });
        }
        Ok(counters)
    }

    /// Stage 6: fill identifier gaps through the cross-reference service,
    /// then re-hydrate newly identified entities from the primary index.
    async fn stage_gap_fill(&self) -> Result<StageCounters> {
        let mut counters = StageCounters::default();

        let dois_missing_pmid = self.store.frontier(Frontier::DoisMissingPmid).await?;
        let mut hydrate_targets: HashSet<String> = self
            .store
            .frontier(Frontier::PmidsMissingDoi)
            .await?
            .into_iter()
            .collect();
        counters.found = (dois_missing_pmid.len() + hydrate_targets.len()) as u64;

        if !dois_missing_pmid.is_empty() {
            match with_retry(|| self.id_converter.map_ids(&dois_missing_pmid, IdKind::Doi)).await {
                Ok(mapped) => {
                    info!(mapped = mapped.len(), "Identifier cross-reference filled gaps");
                    for (doi, ids) in &mapped {
                        let resolved = self.store.resolve(&Identifier::doi(doi.clone())).await?;
                        self.store.attach_identifiers(resolved.id, ids).await?;
                        counters.updated += 1;
                        if let Some(pmid) = &ids.pmid {
                            hydrate_targets.insert(pmid.clone());
                        }
                    }
                }
                Err(e) => {
                    warn!(error = %e, "Identifier cross-reference failed, skipping");
                    counters.skip_many(dois_missing_pmid.len() as u64, SkipReason::SourceUnavailable);
                }
            }
        }

        let mut pmids: Vec<String> = hydrate_targets.into_iter().collect();
        pmids.sort();
        self.hydrate_pmids(&pmids, &mut counters).await?;
        Ok(counters)
    }

    /// Stage 7: merge citation-index metadata for articles whose cited-by
    /// count is unknown; newly filled stubs are counted apart from updates.
    async fn stage_citation_backfill(&self) -> Result<StageCounters> {
        let frontier = self.store.frontier(Frontier::DoisUnknownCitedBy).await?;
        let mut counters = StageCounters::default();
        counters.found = frontier.len() as u64;

        let fetched: Vec<(String, Result<Option<Work>>)> =
            stream::iter(frontier.into_iter().map(|doi| async move {
                let work = with_retry(|| self.citations.get_by_doi(&doi)).await;
                (doi, work)
            }))
            .buffer_unordered(FETCH_CONCURRENCY)
            .collect()
            .await;

        for (doi, result) in fetched {
            let work = match result {
                Ok(Some(work)) => work,
                Ok(None) => {
                    counters.record(UnitOutcome::Skipped(SkipReason::NoData));
                    continue;
                }
                Err(e) => {
                    warn!(doi, error = %e, "Citation index backfill failed, skipping");
                    counters.record(UnitOutcome::Skipped(SkipReason::SourceUnavailable));
                    continue;
                }
            };

            let resolved = self.store.resolve(&Identifier::doi(doi.clone())).await?;
            let entity = self
                .store
                .attach_identifiers(resolved.id, &work.record.ids)
                .await?;
            match self
                .store
                .apply_record(entity, &work.record, SourceTag::Crossref)
                .await?
            {
                MergeOutcome::FilledStub => counters.new += 1,
                MergeOutcome::Updated => counters.updated += 1,
                MergeOutcome::Unchanged => {}
            }
        }
        Ok(counters)
    }

    /// Stage 8: open-access metadata for remaining stubs, then PDF links for
    /// the seed set.
    async fn stage_open_access_backfill(&self) -> Result<StageCounters> {
        let mut counters = StageCounters::default();
        let mut processed: HashSet<String> = HashSet::new();

        let stubs = self.store.frontier(Frontier::DoiStubs).await?;
        counters.found = stubs.len() as u64;
        for doi in &stubs {
            processed.insert(doi.clone());
            self.oa_merge(doi, &mut counters).await?;
        }

        let seeds = self.store.frontier(Frontier::SeedDois).await?;
        let remaining: Vec<String> = seeds
            .into_iter()
            .filter(|d| !processed.contains(d))
            .collect();
        counters.found += remaining.len() as u64;
        for doi in &remaining {
            self.oa_merge(doi, &mut counters).await?;
        }
        Ok(counters)
    }

    async fn oa_merge(&self, doi: &str, counters: &mut StageCounters) -> Result<()> {
        let oa = match with_retry(|| self.open_access.get_by_doi(doi)).await {
            Ok(Some(oa)) => oa,
            Ok(None) => {
                counters.record(UnitOutcome::Skipped(SkipReason::NoData));
                return Ok(());
            }
            Err(e) => {
                warn!(doi, error = %e, "Open-access lookup failed, skipping");
                counters.record(UnitOutcome::Skipped(SkipReason::SourceUnavailable));
                return Ok(());
            }
        };

        let resolved = self.store.resolve(&Identifier::doi(doi.to_string())).await?;
        let entity = self
            .store
            .attach_identifiers(resolved.id, &oa.record.ids)
            .await?;
        match self
            .store
            .apply_record(entity, &oa.record, SourceTag::Unpaywall)
            .await?
        {
            MergeOutcome::FilledStub => counters.new += 1,
            MergeOutcome::Updated => counters.updated += 1,
            MergeOutcome::Unchanged => {}
        }
        Ok(())
    }

    /// Stage 9: cluster affiliation strings and write SIMILAR_TO edges.
    async fn stage_affiliation_clustering(&self) -> Result<StageCounters> {
        let clusterer = AffiliationClusterer::new(
            &self.store,
            &self.profile.affiliation_stopwords,
            self.profile.similarity_top_k,
        );
        let outcome = clusterer.run().await?;

        let mut counters = StageCounters::default();
        counters.found = outcome.affiliations as u64;
        counters.new = outcome.edges_created;
        Ok(counters)
    }

    /// Stage 10: the externally configured derived queries, in declared
    /// order. A failing query aborts the pass.
    async fn stage_derived_queries(&self) -> Result<StageCounters> {
        let mut counters = StageCounters::default();
        counters.found = self.profile.queries.len() as u64;
        for q in &self.profile.queries {
            self.store.execute_named_query(&q.name, &q.cypher).await?;
            counters.updated += 1;
        }
        Ok(counters)
    }
}

/// Whether a record carries anything beyond identifiers worth merging.
fn has_metadata(record: &ArticleRecord) -> bool {
    record.title.is_some()
        || record.pub_date.is_some()
        || record.pdf_url.is_some()
        || record.license.is_some()
        || record.cited_by_count.is_some()
        || !record.affiliations.is_empty()
}
