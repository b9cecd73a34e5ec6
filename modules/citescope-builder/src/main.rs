use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Result;
use clap::Parser;
use tracing::info;
use tracing_subscriber::EnvFilter;

use biblio_client::{
    CrossrefClient, EntrezClient, IdConverterClient, PdfReferenceExtractor, UnpaywallClient,
};
use citescope_builder::CitationGraphBuilder;
use citescope_common::{BuildProfile, Config};
use citescope_graph::{migrate::migrate, GraphClient, Neo4jStore};

#[derive(Parser)]
#[command(name = "citescope", about = "Incremental citation graph builder")]
struct Args {
    /// Path to the YAML build profile (search strings, date window, queries).
    #[arg(long, default_value = "build.yaml")]
    profile: PathBuf,
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let args = Args::parse();

    info!("CiteScope build starting...");

    let config = Config::from_env()?;
    config.log_redacted();

    let profile = BuildProfile::from_file(&args.profile)?;
    info!(
        search = profile.search.as_str(),
        broader_search = profile.broader_search.as_str(),
        earliest = %profile.earliest,
        latest = %profile.latest,
        "Build profile loaded"
    );

    let client =
        GraphClient::connect(&config.neo4j_uri, &config.neo4j_user, &config.neo4j_password)
            .await?;
    migrate(&client).await?;

    let builder = CitationGraphBuilder::new(
        Neo4jStore::new(client),
        Arc::new(EntrezClient::new(
            &config.contact_email,
            config.ncbi_api_key.clone(),
        )),
        Arc::new(CrossrefClient::new(&config.contact_email)),
        Arc::new(UnpaywallClient::new(&config.contact_email)),
        Arc::new(IdConverterClient::new(&config.contact_email)),
        Arc::new(PdfReferenceExtractor::new()),
        profile,
    );

    let report = builder.build().await?;
    println!("{report}");

    Ok(())
}
