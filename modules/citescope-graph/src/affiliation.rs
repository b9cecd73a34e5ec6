//! Affiliation clustering: token-weighted tf-idf representations of raw
//! organisation strings, pairwise cosine similarity, and top-K ranked
//! SIMILAR_TO edges. O(N·K) approximate clustering — near-duplicates may form
//! chains rather than cliques; that shape is intentional and relied upon
//! downstream.

use std::collections::{HashMap, HashSet};

use tracing::info;
use uuid::Uuid;

use citescope_common::Result;

use crate::store::{AffiliationRow, GraphStore, SimilarityPair};

/// Batch size for UNWIND edge creation.
const EDGE_BATCH_SIZE: usize = 500;

/// Tokens shorter than this carry no organisational signal.
const MIN_TOKEN_LEN: usize = 2;

/// What one clustering run touched.
#[derive(Debug, Clone, Copy, Default)]
pub struct ClusterOutcome {
    pub affiliations: usize,
    pub edges_created: u64,
}

/// Clusters affiliation strings already present in the graph.
pub struct AffiliationClusterer<'a, S: GraphStore + ?Sized> {
    store: &'a S,
    stopwords: HashSet<String>,
    top_k: usize,
}

impl<'a, S: GraphStore + ?Sized> AffiliationClusterer<'a, S> {
    pub fn new(store: &'a S, stopwords: &[String], top_k: usize) -> Self {
        Self {
            store,
            stopwords: stopwords.iter().map(|w| w.to_lowercase()).collect(),
            top_k,
        }
    }

    /// Fetch all affiliations, rank pairs, and write SIMILAR_TO edges.
    pub async fn run(&self) -> Result<ClusterOutcome> {
        let rows = self.store.affiliation_rows().await?;
        info!(affiliations = rows.len(), "Loaded affiliations for clustering");

        let mut outcome = ClusterOutcome {
            affiliations: rows.len(),
            edges_created: 0,
        };
        if rows.len() < 2 {
            info!("Too few affiliations for similarity edges");
            return Ok(outcome);
        }

        let pairs = rank_similar(&rows, &self.stopwords, self.top_k);
        info!(pairs = pairs.len(), top_k = self.top_k, "Ranked similarity pairs");

        for batch in pairs.chunks(EDGE_BATCH_SIZE) {
            outcome.edges_created += self.store.create_similarity_edges(batch).await?;
        }

        info!(edges = outcome.edges_created, "SIMILAR_TO edges written");
        Ok(outcome)
    }
}

/// Lower-cased alphanumeric tokens minus stopwords.
pub fn tokenize(name: &str, stopwords: &HashSet<String>) -> Vec<String> {
    name.split(|c: char| !c.is_alphanumeric())
        .map(|t| t.to_lowercase())
        .filter(|t| t.len() >= MIN_TOKEN_LEN && !stopwords.contains(t))
        .collect()
}

/// Compute tf-idf weighted documents and return the top-K ranked similar
/// pairs per affiliation, deduplicated as unordered pairs. Self-pairs are
/// never emitted.
pub fn rank_similar(
    rows: &[AffiliationRow],
    stopwords: &HashSet<String>,
    top_k: usize,
) -> Vec<SimilarityPair> {
    let docs: Vec<HashMap<String, f64>> = {
        // term frequencies
        let tfs: Vec<HashMap<String, f64>> = rows
            .iter()
            .map(|r| {
                let mut tf = HashMap::new();
                for token in tokenize(&r.name, stopwords) {
                    *tf.entry(token).or_insert(0.0) += 1.0;
                }
                tf
            })
            .collect();

        // document frequencies
        let mut df: HashMap<&str, usize> = HashMap::new();
        for tf in &tfs {
            for term in tf.keys() {
                *df.entry(term.as_str()).or_insert(0) += 1;
            }
        }

        let n = rows.len() as f64;
        tfs.iter()
            .map(|tf| {
                tf.iter()
                    .map(|(term, count)| {
                        // smoothed idf: a term present in every document still
                        // carries unit weight, so tiny corpora don't degenerate
                        // to zero vectors
                        let idf = 1.0 + (n / df[term.as_str()] as f64).ln();
                        (term.clone(), count * idf)
                    })
                    .collect()
            })
            .collect()
    };

    let mut seen: HashSet<(Uuid, Uuid)> = HashSet::new();
    let mut pairs = Vec::new();

    for (i, row) in rows.iter().enumerate() {
        let mut ranked: Vec<(usize, f64)> = (0..rows.len())
            .filter(|&j| j != i)
            .map(|j| (j, cosine_similarity(&docs[i], &docs[j])))
            .filter(|(_, sim)| *sim > 0.0)
            .collect();
        ranked.sort_by(|a, b| b.1.partial_cmp(&a.1).unwrap_or(std::cmp::Ordering::Equal));
        ranked.truncate(top_k);

        for (j, similarity) in ranked {
            let other = &rows[j];
            if row.id == other.id {
                continue;
            }
            let key = ordered(row.id, other.id);
            if seen.insert(key) {
                pairs.push(SimilarityPair {
                    a: key.0,
                    b: key.1,
                    similarity,
                });
            }
        }
    }

    pairs
}

fn ordered(a: Uuid, b: Uuid) -> (Uuid, Uuid) {
    if a <= b {
        (a, b)
    } else {
        (b, a)
    }
}

fn cosine_similarity(a: &HashMap<String, f64>, b: &HashMap<String, f64>) -> f64 {
    let dot: f64 = a
        .iter()
        .filter_map(|(term, wa)| b.get(term).map(|wb| wa * wb))
        .sum();
    let norm_a: f64 = a.values().map(|w| w * w).sum::<f64>().sqrt();
    let norm_b: f64 = b.values().map(|w| w * w).sum::<f64>().sqrt();
    if norm_a == 0.0 || norm_b == 0.0 {
        return 0.0;
    }
    dot / (norm_a * norm_b)
}
