//! In-memory `GraphStore` for tests: same resolve/coalesce/merge semantics as
//! the Neo4j store (the pure parts are shared via `merge`), no database.

use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicI64, Ordering};
use std::sync::Mutex;

use async_trait::async_trait;
use chrono::{TimeZone, Utc};
use uuid::Uuid;

use citescope_common::{ArticleIds, ArticleRecord, Error, IdKind, Identifier, Result, SourceTag};

use crate::merge;
use crate::store::{
    AffiliationRow, ArticleSnapshot, Frontier, GraphStore, MergeOutcome, Resolved, SimilarityPair,
};

#[derive(Default)]
struct Inner {
    articles: HashMap<Uuid, ArticleSnapshot>,
    citations: HashSet<(Uuid, Uuid)>,
    /// (affiliation id, owning article, raw string)
    affiliations: Vec<(Uuid, Uuid, String)>,
    similar: HashMap<(Uuid, Uuid), f64>,
    locked: bool,
    named_queries_run: Vec<String>,
}

#[derive(Default)]
pub struct MemoryStore {
    inner: Mutex<Inner>,
    /// Monotonic clock so created_at ordering is deterministic in tests.
    ticks: AtomicI64,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn next_created_at(&self) -> chrono::DateTime<Utc> {
        let tick = self.ticks.fetch_add(1, Ordering::SeqCst);
        Utc.timestamp_millis_opt(1_700_000_000_000 + tick).unwrap()
    }

    fn find_owner(inner: &Inner, identifier: &Identifier) -> Option<Uuid> {
        inner
            .articles
            .values()
            .find(|s| match identifier.kind {
                IdKind::Doi => s.ids.doi.as_deref() == Some(identifier.value.as_str()),
                IdKind::Pmid => s.ids.pmid.as_deref() == Some(identifier.value.as_str()),
                IdKind::Pmcid => s.ids.pmcid.as_deref() == Some(identifier.value.as_str()),
            })
            .map(|s| s.id)
    }

    fn coalesce(inner: &mut Inner, a: Uuid, b: Uuid) -> Result<Uuid> {
        let sa = inner
            .articles
            .get(&a)
            .cloned()
            .ok_or_else(|| Error::GraphWriteConflict(format!("entity {a} vanished")))?;
        let sb = inner
            .articles
            .get(&b)
            .cloned()
            .ok_or_else(|| Error::GraphWriteConflict(format!("entity {b} vanished")))?;

        let (survivor, duplicate) = merge::choose_survivor(&sa, &sb);
        let merged = merge::union_into_survivor(survivor, duplicate);
        let surv = survivor.id;
        let dup = duplicate.id;

        // Re-point citation edges, dropping would-be self-loops.
        let old: Vec<(Uuid, Uuid)> = inner.citations.iter().copied().collect();
        inner.citations.clear();
        for (from, to) in old {
            let from = if from == dup { surv } else { from };
            let to = if to == dup { surv } else { to };
            if from != to {
                inner.citations.insert((from, to));
            }
        }

        // Re-point affiliations, keeping one node per (article, raw string).
        let mut kept_names: HashSet<String> = inner
            .affiliations
            .iter()
            .filter(|(_, article, _)| *article == surv)
            .map(|(_, _, name)| name.clone())
            .collect();
        inner.affiliations.retain(|(_, article, name)| {
            *article != dup || !kept_names.contains(name)
        });
        for (_, article, name) in inner.affiliations.iter_mut() {
            if *article == dup {
                *article = surv;
                kept_names.insert(name.clone());
            }
        }

        inner.articles.remove(&dup);
        inner.articles.insert(surv, merged);
        Ok(surv)
    }

    /// Test hook: all CITES pairs currently in the graph.
    pub fn citation_pairs(&self) -> Vec<(Uuid, Uuid)> {
        let inner = self.inner.lock().unwrap();
        inner.citations.iter().copied().collect()
    }

    /// Test hook: snapshot by any identifier.
    pub fn snapshot_by_identifier(&self, identifier: &Identifier) -> Option<ArticleSnapshot> {
        let inner = self.inner.lock().unwrap();
        Self::find_owner(&inner, identifier).and_then(|id| inner.articles.get(&id).cloned())
    }

    /// Test hook: names of named queries executed, in order.
    pub fn named_queries_run(&self) -> Vec<String> {
        self.inner.lock().unwrap().named_queries_run.clone()
    }

    /// Test hook: number of SIMILAR_TO edges.
    pub fn similarity_edge_count(&self) -> usize {
        self.inner.lock().unwrap().similar.len()
    }
}

#[async_trait]
impl GraphStore for MemoryStore {
    async fn acquire_build_lock(&self) -> Result<bool> {
        let mut inner = self.inner.lock().unwrap();
        if inner.locked {
            return Ok(false);
        }
        inner.locked = true;
        Ok(true)
    }

    async fn release_build_lock(&self) -> Result<()> {
        self.inner.lock().unwrap().locked = false;
        Ok(())
    }

    async fn resolve(&self, identifier: &Identifier) -> Result<Resolved> {
        let mut inner = self.inner.lock().unwrap();
        if let Some(id) = Self::find_owner(&inner, identifier) {
            return Ok(Resolved { id, created: false });
        }
        drop(inner);
        let snapshot =
            ArticleSnapshot::new_stub(Uuid::new_v4(), identifier, self.next_created_at());
        let id = snapshot.id;
        self.inner.lock().unwrap().articles.insert(id, snapshot);
        Ok(Resolved { id, created: true })
    }

    async fn attach_identifiers(&self, entity: Uuid, ids: &ArticleIds) -> Result<Uuid> {
        let mut inner = self.inner.lock().unwrap();
        let mut current = entity;

        for identifier in ids.iter() {
            let snap = inner
                .articles
                .get(&current)
                .cloned()
                .ok_or_else(|| Error::GraphWriteConflict(format!("entity {current} vanished")))?;

            let existing = match identifier.kind {
                IdKind::Doi => snap.ids.doi.as_deref(),
                IdKind::Pmid => snap.ids.pmid.as_deref(),
                IdKind::Pmcid => snap.ids.pmcid.as_deref(),
            };
            if existing.is_some() {
                // First-discovered identifier wins, matching the Neo4j store.
                continue;
            }

            match Self::find_owner(&inner, &identifier) {
                None => {
                    let snap = inner.articles.get_mut(&current).expect("checked above");
                    match identifier.kind {
                        IdKind::Doi => snap.ids.doi = Some(identifier.value.clone()),
                        IdKind::Pmid => snap.ids.pmid = Some(identifier.value.clone()),
                        IdKind::Pmcid => snap.ids.pmcid = Some(identifier.value.clone()),
                    }
                }
                Some(owner) if owner == current => {}
                Some(owner) => {
                    current = Self::coalesce(&mut inner, current, owner)?;
                }
            }
        }

        Ok(current)
    }

    async fn snapshot(&self, entity: Uuid) -> Result<Option<ArticleSnapshot>> {
        Ok(self.inner.lock().unwrap().articles.get(&entity).cloned())
    }

    async fn apply_record(
        &self,
        entity: Uuid,
        record: &ArticleRecord,
        source: SourceTag,
    ) -> Result<MergeOutcome> {
        let mut inner = self.inner.lock().unwrap();
        let snap = inner
            .articles
            .get(&entity)
            .ok_or_else(|| Error::GraphWriteConflict(format!("entity {entity} vanished")))?;
        let (next, outcome) = merge::merged(snap, record, source);
        inner.articles.insert(entity, next);
        Ok(outcome)
    }

    async fn mark_seed(&self, entity: Uuid) -> Result<()> {
        if let Some(snap) = self.inner.lock().unwrap().articles.get_mut(&entity) {
            snap.seed = true;
        }
        Ok(())
    }

    async fn create_citation(&self, from: Uuid, to: Uuid) -> Result<bool> {
        if from == to {
            return Ok(false);
        }
        let mut inner = self.inner.lock().unwrap();
        if !inner.articles.contains_key(&from) || !inner.articles.contains_key(&to) {
            return Err(Error::GraphWriteConflict(format!(
                "citation endpoints missing: {from} -> {to}"
            )));
        }
        Ok(inner.citations.insert((from, to)))
    }

    async fn add_affiliations(&self, entity: Uuid, names: &[String]) -> Result<()> {
        let mut inner = self.inner.lock().unwrap();
        for name in names {
            let name = name.trim();
            if name.is_empty() {
                continue;
            }
            let exists = inner
                .affiliations
                .iter()
                .any(|(_, article, n)| *article == entity && n == name);
            if !exists {
                inner
                    .affiliations
                    .push((Uuid::new_v4(), entity, name.to_string()));
            }
        }
        Ok(())
    }

    async fn frontier(&self, frontier: Frontier) -> Result<Vec<String>> {
        let inner = self.inner.lock().unwrap();
        let has_outgoing: HashSet<Uuid> = inner.citations.iter().map(|(from, _)| *from).collect();

        let mut values: Vec<String> = inner
            .articles
            .values()
            .filter_map(|s| match frontier {
                Frontier::DoisUnreferenced if !has_outgoing.contains(&s.id) => s.ids.doi.clone(),
                Frontier::PmidsUnreferenced if !has_outgoing.contains(&s.id) => s.ids.pmid.clone(),
                Frontier::SeedDois if s.seed => s.ids.doi.clone(),
                Frontier::DoisMissingPmid if s.ids.pmid.is_none() => s.ids.doi.clone(),
                Frontier::PmidsMissingDoi if s.ids.doi.is_none() => s.ids.pmid.clone(),
                Frontier::DoisUnknownCitedBy if s.cited_by_count.is_none() => s.ids.doi.clone(),
                Frontier::DoiStubs if s.stub => s.ids.doi.clone(),
                Frontier::PmidStubs if s.stub => s.ids.pmid.clone(),
                _ => None,
            })
            .collect();
        values.sort();
        Ok(values)
    }

    async fn affiliation_rows(&self) -> Result<Vec<AffiliationRow>> {
        Ok(self
            .inner
            .lock()
            .unwrap()
            .affiliations
            .iter()
            .map(|(id, _, name)| AffiliationRow {
                id: *id,
                name: name.clone(),
            })
            .collect())
    }

    async fn create_similarity_edges(&self, pairs: &[SimilarityPair]) -> Result<u64> {
        let mut inner = self.inner.lock().unwrap();
        let mut created = 0;
        for pair in pairs {
            if pair.a == pair.b {
                continue;
            }
            let key = if pair.a <= pair.b {
                (pair.a, pair.b)
            } else {
                (pair.b, pair.a)
            };
            if inner.similar.insert(key, pair.similarity).is_none() {
                created += 1;
            }
        }
        Ok(created)
    }

    async fn execute_named_query(&self, name: &str, _cypher: &str) -> Result<u64> {
        self.inner
            .lock()
            .unwrap()
            .named_queries_run
            .push(name.to_string());
        Ok(0)
    }

    async fn article_count(&self) -> Result<u64> {
        Ok(self.inner.lock().unwrap().articles.len() as u64)
    }

    async fn citation_count(&self) -> Result<u64> {
        Ok(self.inner.lock().unwrap().citations.len() as u64)
    }
}
