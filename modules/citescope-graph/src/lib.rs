pub mod affiliation;
pub mod client;
pub mod merge;
pub mod migrate;
pub mod neo4j;
pub mod store;

#[cfg(feature = "test-utils")]
pub mod memory;

pub use affiliation::AffiliationClusterer;
pub use client::GraphClient;
pub use neo4j::Neo4jStore;
pub use store::{
    AffiliationRow, ArticleSnapshot, Frontier, GraphStore, MergeOutcome, Resolved, SimilarityPair,
};
