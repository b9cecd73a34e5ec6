use neo4rs::{ConfigBuilder, Graph};

use citescope_common::{Error, Result};

/// Thin wrapper around neo4rs::Graph providing connection setup.
#[derive(Clone)]
pub struct GraphClient {
    pub(crate) graph: Graph,
}

impl GraphClient {
    /// Connect to Neo4j with the given credentials.
    pub async fn connect(uri: &str, user: &str, password: &str) -> Result<Self> {
        let config = ConfigBuilder::default()
            .uri(uri)
            .user(user)
            .password(password)
            .fetch_size(500)
            .max_connections(10)
            .build()
            .map_err(|e| Error::Config(format!("invalid Neo4j config: {e}")))?;
        let graph = Graph::connect(config)
            .await
            .map_err(|e| Error::GraphWriteConflict(format!("cannot connect to Neo4j: {e}")))?;
        Ok(Self { graph })
    }

    /// Get a reference to the underlying neo4rs Graph.
    pub fn inner(&self) -> &Graph {
        &self.graph
    }
}
