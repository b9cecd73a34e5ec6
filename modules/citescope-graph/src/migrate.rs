use neo4rs::query;
use tracing::{debug, info};

use citescope_common::Result;

use crate::client::GraphClient;

/// Run idempotent schema migrations: constraints and identifier indexes.
pub async fn migrate(client: &GraphClient) -> Result<()> {
    let g = &client.graph;

    info!("Running schema migrations...");

    let statements = [
        // Entity identity
        "CREATE CONSTRAINT article_id IF NOT EXISTS FOR (a:Article) REQUIRE a.id IS UNIQUE",
        "CREATE CONSTRAINT affiliation_id IF NOT EXISTS FOR (f:Affiliation) REQUIRE f.id IS UNIQUE",
        // Identifier lookups back every resolve call and every frontier query.
        "CREATE INDEX article_doi IF NOT EXISTS FOR (a:Article) ON (a.doi)",
        "CREATE INDEX article_pmid IF NOT EXISTS FOR (a:Article) ON (a.pmid)",
        "CREATE INDEX article_pmcid IF NOT EXISTS FOR (a:Article) ON (a.pmcid)",
        "CREATE INDEX affiliation_article IF NOT EXISTS FOR (f:Affiliation) ON (f.article_id)",
    ];

    for statement in &statements {
        run_ignoring_exists(client, statement).await?;
    }

    info!("Schema migrations complete");
    Ok(())
}

/// Older servers reject IF NOT EXISTS variants; treat "already exists" as success.
async fn run_ignoring_exists(client: &GraphClient, statement: &str) -> Result<()> {
    match client.graph.run(query(statement)).await {
        Ok(()) => Ok(()),
        Err(e) if e.to_string().to_lowercase().contains("already exists") => {
            debug!(statement, "schema element already exists");
            Ok(())
        }
        Err(e) => Err(citescope_common::Error::GraphWriteConflict(format!(
            "migration failed: {e}"
        ))),
    }
}
