//! Production `GraphStore` backed by Neo4j. Single-statement Cypher writes are
//! atomic; identifier coalescing runs in an explicit transaction so a partial
//! re-point can never be observed.

use async_trait::async_trait;
use chrono::{DateTime, NaiveDate, TimeZone, Utc};
use neo4rs::{query, Query};
use tracing::{debug, info, warn};
use uuid::Uuid;

use citescope_common::{ArticleIds, ArticleRecord, Error, IdKind, Identifier, Result, SourceTag};

use crate::client::GraphClient;
use crate::merge;
use crate::store::{
    AffiliationRow, ArticleSnapshot, FieldSources, Frontier, GraphStore, MergeOutcome, Resolved,
    SimilarityPair,
};

/// Build locks older than this are presumed abandoned by a killed process.
const STALE_LOCK_MS: i64 = 2 * 60 * 60 * 1000;

pub struct Neo4jStore {
    client: GraphClient,
}

impl Neo4jStore {
    pub fn new(client: GraphClient) -> Self {
        Self { client }
    }

    fn gw(e: neo4rs::Error) -> Error {
        Error::GraphWriteConflict(e.to_string())
    }

    fn prop(kind: IdKind) -> &'static str {
        match kind {
            IdKind::Doi => "doi",
            IdKind::Pmid => "pmid",
            IdKind::Pmcid => "pmcid",
        }
    }

    const SNAPSHOT_RETURN: &'static str = "RETURN a.id AS id, a.doi AS doi, a.pmid AS pmid, \
         a.pmcid AS pmcid, a.title AS title, a.pub_date AS pub_date, a.pdf_url AS pdf_url, \
         a.license AS license, a.cited_by_count AS cited_by_count, a.provenance AS provenance, \
         a.title_source AS title_source, a.date_source AS date_source, a.pdf_source AS pdf_source, \
         a.license_source AS license_source, a.cited_by_source AS cited_by_source, \
         a.stub AS stub, a.seed AS seed, a.created_at_ms AS created_at_ms";

    fn parse_snapshot(row: &neo4rs::Row) -> Result<ArticleSnapshot> {
        let id_str: String = row
            .get("id")
            .map_err(|_| Error::GraphWriteConflict("article row lacks id".into()))?;
        let id = Uuid::parse_str(&id_str)
            .map_err(|e| Error::GraphWriteConflict(format!("bad article uuid: {e}")))?;

        let ids = ArticleIds {
            doi: row.get::<String>("doi").ok(),
            pmid: row.get::<String>("pmid").ok(),
            pmcid: row.get::<String>("pmcid").ok(),
        };

        let provenance = row
            .get::<Vec<String>>("provenance")
            .unwrap_or_default()
            .iter()
            .filter_map(|s| SourceTag::parse(s))
            .collect();

        let field_sources = FieldSources {
            title: row.get::<String>("title_source").ok().and_then(|s| SourceTag::parse(&s)),
            pub_date: row.get::<String>("date_source").ok().and_then(|s| SourceTag::parse(&s)),
            pdf_url: row.get::<String>("pdf_source").ok().and_then(|s| SourceTag::parse(&s)),
            license: row
                .get::<String>("license_source")
                .ok()
                .and_then(|s| SourceTag::parse(&s)),
            cited_by_count: row
                .get::<String>("cited_by_source")
                .ok()
                .and_then(|s| SourceTag::parse(&s)),
        };

        let created_at_ms: i64 = row.get("created_at_ms").unwrap_or(0);

        Ok(ArticleSnapshot {
            id,
            ids,
            title: row.get::<String>("title").ok(),
            pub_date: row
                .get::<String>("pub_date")
                .ok()
                .and_then(|d| NaiveDate::parse_from_str(&d, "%Y-%m-%d").ok()),
            pdf_url: row.get::<String>("pdf_url").ok(),
            license: row.get::<String>("license").ok(),
            cited_by_count: row.get::<i64>("cited_by_count").ok(),
            provenance,
            field_sources,
            stub: row.get::<bool>("stub").unwrap_or(true),
            seed: row.get::<bool>("seed").unwrap_or(false),
            created_at: timestamp_from_ms(created_at_ms),
        })
    }

    async fn find_by_identifier(&self, identifier: &Identifier) -> Result<Option<Uuid>> {
        let prop = Self::prop(identifier.kind);
        let q = query(&format!(
            "MATCH (a:Article {{{prop}: $value}}) RETURN a.id AS id LIMIT 1"
        ))
        .param("value", identifier.value.as_str());

        let mut stream = self.client.graph.execute(q).await.map_err(Self::gw)?;
        if let Some(row) = stream.next().await.map_err(Self::gw)? {
            let id_str: String = row.get("id").unwrap_or_default();
            return Ok(Uuid::parse_str(&id_str).ok());
        }
        Ok(None)
    }

    /// Parameters writing every merged metadata field; shared by apply_record
    /// and the coalesce property union.
    fn metadata_params(q: Query, snap: &ArticleSnapshot) -> Query {
        q.param("title", snap.title.clone())
            .param(
                "pub_date",
                snap.pub_date.map(|d| d.format("%Y-%m-%d").to_string()),
            )
            .param("pdf_url", snap.pdf_url.clone())
            .param("license", snap.license.clone())
            .param("cited_by_count", snap.cited_by_count)
            .param(
                "provenance",
                snap.provenance.iter().map(|t| t.to_string()).collect::<Vec<_>>(),
            )
            .param("title_source", snap.field_sources.title.map(|t| t.to_string()))
            .param("date_source", snap.field_sources.pub_date.map(|t| t.to_string()))
            .param("pdf_source", snap.field_sources.pdf_url.map(|t| t.to_string()))
            .param(
                "license_source",
                snap.field_sources.license.map(|t| t.to_string()),
            )
            .param(
                "cited_by_source",
                snap.field_sources.cited_by_count.map(|t| t.to_string()),
            )
            .param("stub", snap.stub)
            .param("seed", snap.seed)
    }

    /// Merge two entities into one survivor inside a single transaction.
    /// Any failure rolls back and is fatal to this unit.
    async fn coalesce(&self, a: Uuid, b: Uuid) -> Result<Uuid> {
        let sa = self
            .snapshot(a)
            .await?
            .ok_or_else(|| Error::GraphWriteConflict(format!("entity {a} vanished mid-coalesce")))?;
        let sb = self
            .snapshot(b)
            .await?
            .ok_or_else(|| Error::GraphWriteConflict(format!("entity {b} vanished mid-coalesce")))?;

        let (survivor, duplicate) = merge::choose_survivor(&sa, &sb);
        let merged = merge::union_into_survivor(survivor, duplicate);
        let surv = survivor.id.to_string();
        let dup = duplicate.id.to_string();

        let queries = vec![
            // drop duplicate-side affiliation nodes whose string the survivor
            // already carries, keeping one node per (article, raw text)
            query(
                "MATCH (d:Article {id: $dup})-[:HAS_AFFILIATION]->(f:Affiliation)
                 MATCH (s:Article {id: $surv})-[:HAS_AFFILIATION]->(g:Affiliation)
                 WHERE g.name = f.name AND g.id <> f.id
                 DETACH DELETE f",
            )
            .param("surv", surv.clone())
            .param("dup", dup.clone()),
            // re-point remaining affiliations
            query(
                "MATCH (d:Article {id: $dup})-[:HAS_AFFILIATION]->(f:Affiliation)
                 MATCH (s:Article {id: $surv})
                 MERGE (s)-[:HAS_AFFILIATION]->(f)
                 SET f.article_id = $surv",
            )
            .param("surv", surv.clone())
            .param("dup", dup.clone()),
            // outgoing citations
            query(
                "MATCH (d:Article {id: $dup})-[:CITES]->(t:Article)
                 MATCH (s:Article {id: $surv})
                 WHERE t.id <> $surv
                 MERGE (s)-[:CITES]->(t)",
            )
            .param("surv", surv.clone())
            .param("dup", dup.clone()),
            // incoming citations
            query(
                "MATCH (f:Article)-[:CITES]->(d:Article {id: $dup})
                 MATCH (s:Article {id: $surv})
                 WHERE f.id <> $surv
                 MERGE (f)-[:CITES]->(s)",
            )
            .param("surv", surv.clone())
            .param("dup", dup.clone()),
            // property union, then remove the duplicate and its edges
            Self::metadata_params(
                query(
                    "MATCH (s:Article {id: $surv}), (d:Article {id: $dup})
                     SET s.doi = $doi, s.pmid = $pmid, s.pmcid = $pmcid,
                         s.title = $title, s.pub_date = $pub_date,
                         s.pdf_url = $pdf_url, s.license = $license,
                         s.cited_by_count = $cited_by_count,
                         s.provenance = $provenance,
                         s.title_source = $title_source, s.date_source = $date_source,
                         s.pdf_source = $pdf_source, s.license_source = $license_source,
                         s.cited_by_source = $cited_by_source,
                         s.stub = $stub, s.seed = $seed,
                         s.created_at_ms = $created_at_ms
                     DETACH DELETE d",
                )
                .param("surv", surv.clone())
                .param("dup", dup.clone())
                .param("doi", merged.ids.doi.clone())
                .param("pmid", merged.ids.pmid.clone())
                .param("pmcid", merged.ids.pmcid.clone())
                .param("created_at_ms", timestamp_to_ms(merged.created_at)),
                &merged,
            ),
        ];

        let mut txn = self.client.graph.start_txn().await.map_err(Self::gw)?;
        if let Err(e) = txn.run_queries(queries).await {
            txn.rollback().await.ok();
            return Err(Error::GraphWriteConflict(format!(
                "coalesce of {dup} into {surv} failed: {e}"
            )));
        }
        txn.commit().await.map_err(Self::gw)?;

        info!(survivor = %surv, duplicate = %dup, "Coalesced duplicate entity");
        Ok(merged.id)
    }
}

fn timestamp_to_ms(dt: DateTime<Utc>) -> i64 {
    dt.timestamp_millis()
}

fn timestamp_from_ms(ms: i64) -> DateTime<Utc> {
    Utc.timestamp_millis_opt(ms).single().unwrap_or_else(Utc::now)
}

#[async_trait]
impl GraphStore for Neo4jStore {
    async fn acquire_build_lock(&self) -> Result<bool> {
        let cutoff = Utc::now().timestamp_millis() - STALE_LOCK_MS;
        self.client
            .graph
            .run(
                query("MATCH (lock:BuildLock) WHERE lock.started_at_ms < $cutoff DELETE lock")
                    .param("cutoff", cutoff),
            )
            .await
            .map_err(Self::gw)?;

        // Atomic check-and-create: only creates when no lock exists.
        let q = query(
            "OPTIONAL MATCH (existing:BuildLock)
             WITH existing WHERE existing IS NULL
             CREATE (lock:BuildLock {started_at_ms: $now})
             RETURN lock IS NOT NULL AS acquired",
        )
        .param("now", Utc::now().timestamp_millis());

        let mut stream = self.client.graph.execute(q).await.map_err(Self::gw)?;
        if let Some(row) = stream.next().await.map_err(Self::gw)? {
            return Ok(row.get("acquired").unwrap_or(false));
        }
        Ok(false)
    }

    async fn release_build_lock(&self) -> Result<()> {
        self.client
            .graph
            .run(query("MATCH (lock:BuildLock) DELETE lock"))
            .await
            .map_err(Self::gw)
    }

    async fn resolve(&self, identifier: &Identifier) -> Result<Resolved> {
        if let Some(id) = self.find_by_identifier(identifier).await? {
            return Ok(Resolved { id, created: false });
        }

        let prop = Self::prop(identifier.kind);
        let new_id = Uuid::new_v4();
        let q = query(&format!(
            "OPTIONAL MATCH (existing:Article {{{prop}: $value}})
             WITH existing WHERE existing IS NULL
             CREATE (a:Article {{id: $id, {prop}: $value, stub: true, seed: false,
                                 provenance: [], created_at_ms: $now}})
             RETURN a.id AS id"
        ))
        .param("value", identifier.value.as_str())
        .param("id", new_id.to_string())
        .param("now", Utc::now().timestamp_millis());

        let mut stream = self.client.graph.execute(q).await.map_err(Self::gw)?;
        if stream.next().await.map_err(Self::gw)?.is_some() {
            debug!(%identifier, id = %new_id, "Created stub entity");
            return Ok(Resolved {
                id: new_id,
                created: true,
            });
        }

        // Lost the create to a concurrent writer; the entity now exists.
        match self.find_by_identifier(identifier).await? {
            Some(id) => Ok(Resolved { id, created: false }),
            None => Err(Error::GraphWriteConflict(format!(
                "resolve of {identifier} neither found nor created an entity"
            ))),
        }
    }

    async fn attach_identifiers(&self, entity: Uuid, ids: &ArticleIds) -> Result<Uuid> {
        let mut current = entity;

        for identifier in ids.iter() {
            let snap = self.snapshot(current).await?.ok_or_else(|| {
                Error::GraphWriteConflict(format!("entity {current} vanished mid-attach"))
            })?;

            let existing = match identifier.kind {
                IdKind::Doi => snap.ids.doi.as_deref(),
                IdKind::Pmid => snap.ids.pmid.as_deref(),
                IdKind::Pmcid => snap.ids.pmcid.as_deref(),
            };
            if let Some(existing) = existing {
                if existing != identifier.value {
                    // First-discovered identifier wins; a disagreeing source is
                    // suspect and must not break the uniqueness invariant.
                    warn!(
                        entity = %current,
                        kept = existing,
                        rejected = identifier.value.as_str(),
                        namespace = %identifier.kind,
                        "Conflicting identifier ignored"
                    );
                }
                continue;
            }

            match self.find_by_identifier(&identifier).await? {
                None => {
                    let prop = Self::prop(identifier.kind);
                    self.client
                        .graph
                        .run(
                            query(&format!(
                                "MATCH (a:Article {{id: $id}}) SET a.{prop} = $value"
                            ))
                            .param("id", current.to_string())
                            .param("value", identifier.value.as_str()),
                        )
                        .await
                        .map_err(Self::gw)?;
                }
                Some(owner) if owner == current => {}
                Some(owner) => {
                    current = self.coalesce(current, owner).await?;
                }
            }
        }

        Ok(current)
    }

    async fn snapshot(&self, entity: Uuid) -> Result<Option<ArticleSnapshot>> {
        let q = query(&format!(
            "MATCH (a:Article {{id: $id}}) {}",
            Self::SNAPSHOT_RETURN
        ))
        .param("id", entity.to_string());

        let mut stream = self.client.graph.execute(q).await.map_err(Self::gw)?;
        match stream.next().await.map_err(Self::gw)? {
            Some(row) => Ok(Some(Self::parse_snapshot(&row)?)),
            None => Ok(None),
        }
    }

    async fn apply_record(
        &self,
        entity: Uuid,
        record: &ArticleRecord,
        source: SourceTag,
    ) -> Result<MergeOutcome> {
        let snap = self.snapshot(entity).await?.ok_or_else(|| {
            Error::GraphWriteConflict(format!("entity {entity} vanished mid-merge"))
        })?;

        let (next, outcome) = merge::merged(&snap, record, source);
        if outcome == MergeOutcome::Unchanged {
            return Ok(outcome);
        }

        let q = Self::metadata_params(
            query(
                "MATCH (a:Article {id: $id})
                 SET a.title = $title, a.pub_date = $pub_date,
                     a.pdf_url = $pdf_url, a.license = $license,
                     a.cited_by_count = $cited_by_count,
                     a.provenance = $provenance,
                     a.title_source = $title_source, a.date_source = $date_source,
                     a.pdf_source = $pdf_source, a.license_source = $license_source,
                     a.cited_by_source = $cited_by_source,
                     a.stub = $stub, a.seed = $seed",
            )
            .param("id", entity.to_string()),
            &next,
        );

        self.client.graph.run(q).await.map_err(Self::gw)?;
        Ok(outcome)
    }

    async fn mark_seed(&self, entity: Uuid) -> Result<()> {
        self.client
            .graph
            .run(
                query("MATCH (a:Article {id: $id}) SET a.seed = true")
                    .param("id", entity.to_string()),
            )
            .await
            .map_err(Self::gw)
    }

    async fn create_citation(&self, from: Uuid, to: Uuid) -> Result<bool> {
        if from == to {
            return Ok(false);
        }

        let q = query(
            "MATCH (a:Article {id: $from}), (b:Article {id: $to})
             MERGE (a)-[r:CITES]->(b)
             ON CREATE SET r.fresh = true
             WITH r, coalesce(r.fresh, false) AS created
             REMOVE r.fresh
             RETURN created",
        )
        .param("from", from.to_string())
        .param("to", to.to_string());

        let mut stream = self.client.graph.execute(q).await.map_err(Self::gw)?;
        if let Some(row) = stream.next().await.map_err(Self::gw)? {
            return Ok(row.get("created").unwrap_or(false));
        }
        // No row means one endpoint is missing — an edge to nowhere is a
        // write conflict, not a silent no-op.
        Err(Error::GraphWriteConflict(format!(
            "citation endpoints missing: {from} -> {to}"
        )))
    }

    async fn add_affiliations(&self, entity: Uuid, names: &[String]) -> Result<()> {
        for name in names {
            let name = name.trim();
            if name.is_empty() {
                continue;
            }
            let q = query(
                "MATCH (a:Article {id: $article})
                 MERGE (f:Affiliation {article_id: $article, name: $name})
                 ON CREATE SET f.id = $id
                 MERGE (a)-[:HAS_AFFILIATION]->(f)",
            )
            .param("article", entity.to_string())
            .param("name", name)
            .param("id", Uuid::new_v4().to_string());

            self.client.graph.run(q).await.map_err(Self::gw)?;
        }
        Ok(())
    }

    async fn frontier(&self, frontier: Frontier) -> Result<Vec<String>> {
        let cypher = match frontier {
            Frontier::DoisUnreferenced => {
                "MATCH (a:Article) WHERE a.doi IS NOT NULL \
                 AND NOT (a)-[:CITES]->(:Article) RETURN a.doi AS value"
            }
            Frontier::PmidsUnreferenced => {
                "MATCH (a:Article) WHERE a.pmid IS NOT NULL \
                 AND NOT (a)-[:CITES]->(:Article) RETURN a.pmid AS value"
            }
            Frontier::SeedDois => {
                "MATCH (a:Article) WHERE a.seed = true AND a.doi IS NOT NULL \
                 RETURN a.doi AS value"
            }
            Frontier::DoisMissingPmid => {
                "MATCH (a:Article) WHERE a.doi IS NOT NULL AND a.pmid IS NULL \
                 RETURN a.doi AS value"
            }
            Frontier::PmidsMissingDoi => {
                "MATCH (a:Article) WHERE a.pmid IS NOT NULL AND a.doi IS NULL \
                 RETURN a.pmid AS value"
            }
            Frontier::DoisUnknownCitedBy => {
                "MATCH (a:Article) WHERE a.doi IS NOT NULL AND a.cited_by_count IS NULL \
                 RETURN a.doi AS value"
            }
            Frontier::DoiStubs => {
                "MATCH (a:Article) WHERE a.stub = true AND a.doi IS NOT NULL \
                 RETURN a.doi AS value"
            }
            Frontier::PmidStubs => {
                "MATCH (a:Article) WHERE a.stub = true AND a.pmid IS NOT NULL \
                 RETURN a.pmid AS value"
            }
        };

        let mut values = Vec::new();
        let mut stream = self.client.graph.execute(query(cypher)).await.map_err(Self::gw)?;
        while let Some(row) = stream.next().await.map_err(Self::gw)? {
            if let Ok(value) = row.get::<String>("value") {
                values.push(value);
            }
        }
        Ok(values)
    }

    async fn affiliation_rows(&self) -> Result<Vec<AffiliationRow>> {
        let q = query("MATCH (f:Affiliation) RETURN f.id AS id, f.name AS name");
        let mut rows = Vec::new();
        let mut stream = self.client.graph.execute(q).await.map_err(Self::gw)?;
        while let Some(row) = stream.next().await.map_err(Self::gw)? {
            let id_str: String = row.get("id").unwrap_or_default();
            let Ok(id) = Uuid::parse_str(&id_str) else { continue };
            let name: String = row.get("name").unwrap_or_default();
            if !name.is_empty() {
                rows.push(AffiliationRow { id, name });
            }
        }
        Ok(rows)
    }

    async fn create_similarity_edges(&self, pairs: &[SimilarityPair]) -> Result<u64> {
        if pairs.is_empty() {
            return Ok(0);
        }

        let edge_data: Vec<neo4rs::BoltType> = pairs
            .iter()
            .map(|p| {
                neo4rs::BoltType::Map(neo4rs::BoltMap::from_iter(vec![
                    (
                        neo4rs::BoltString::from("from"),
                        neo4rs::BoltType::String(neo4rs::BoltString::from(
                            p.a.to_string().as_str(),
                        )),
                    ),
                    (
                        neo4rs::BoltString::from("to"),
                        neo4rs::BoltType::String(neo4rs::BoltString::from(
                            p.b.to_string().as_str(),
                        )),
                    ),
                    (
                        neo4rs::BoltString::from("similarity"),
                        neo4rs::BoltType::Float(neo4rs::BoltFloat::new(p.similarity)),
                    ),
                ]))
            })
            .collect();

        let q = query(
            "UNWIND $edges AS edge
             MATCH (a:Affiliation {id: edge.from}), (b:Affiliation {id: edge.to})
             MERGE (a)-[r:SIMILAR_TO]->(b)
             ON CREATE SET r.fresh = true
             WITH r, coalesce(r.fresh, false) AS created, edge
             SET r.similarity = edge.similarity
             REMOVE r.fresh
             RETURN sum(CASE WHEN created THEN 1 ELSE 0 END) AS created",
        )
        .param("edges", edge_data);

        let mut stream = self.client.graph.execute(q).await.map_err(Self::gw)?;
        if let Some(row) = stream.next().await.map_err(Self::gw)? {
            return Ok(row.get::<i64>("created").unwrap_or(0) as u64);
        }
        Ok(0)
    }

    async fn execute_named_query(&self, name: &str, cypher: &str) -> Result<u64> {
        let mut rows = 0u64;
        let mut stream = self
            .client
            .graph
            .execute(query(cypher))
            .await
            .map_err(|e| Error::GraphWriteConflict(format!("named query '{name}' failed: {e}")))?;
        while stream
            .next()
            .await
            .map_err(|e| Error::GraphWriteConflict(format!("named query '{name}' failed: {e}")))?
            .is_some()
        {
            rows += 1;
        }
        info!(name, rows, "Executed named query");
        Ok(rows)
    }

    async fn article_count(&self) -> Result<u64> {
        let q = query("MATCH (a:Article) RETURN count(a) AS n");
        let mut stream = self.client.graph.execute(q).await.map_err(Self::gw)?;
        if let Some(row) = stream.next().await.map_err(Self::gw)? {
            return Ok(row.get::<i64>("n").unwrap_or(0) as u64);
        }
        Ok(0)
    }

    async fn citation_count(&self) -> Result<u64> {
        let q = query("MATCH (:Article)-[r:CITES]->(:Article) RETURN count(r) AS n");
        let mut stream = self.client.graph.execute(q).await.map_err(Self::gw)?;
        if let Some(row) = stream.next().await.map_err(Self::gw)? {
            return Ok(row.get::<i64>("n").unwrap_or(0) as u64);
        }
        Ok(0)
    }
}
