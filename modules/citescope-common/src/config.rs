use std::collections::HashSet;
use std::env;
use std::path::Path;

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};
use crate::record::DateWindow;

/// Connection and credential configuration, loaded from environment variables.
#[derive(Debug, Clone)]
pub struct Config {
    // Neo4j
    pub neo4j_uri: String,
    pub neo4j_user: String,
    pub neo4j_password: String,

    // Bibliographic APIs
    /// Contact email sent to Entrez, Crossref and Unpaywall per their
    /// polite-use policies.
    pub contact_email: String,
    /// Optional NCBI API key (raises the Entrez rate limit).
    pub ncbi_api_key: Option<String>,
}

impl Config {
    /// Load configuration from environment variables. Missing required vars
    /// are a `Config` error — fatal before any work starts.
    pub fn from_env() -> Result<Self> {
        Ok(Self {
            neo4j_uri: required_env("NEO4J_URI")?,
            neo4j_user: required_env("NEO4J_USER")?,
            neo4j_password: required_env("NEO4J_PASSWORD")?,
            contact_email: required_env("CONTACT_EMAIL")?,
            ncbi_api_key: env::var("NCBI_API_KEY").ok().filter(|k| !k.is_empty()),
        })
    }

    /// Log the config with secrets redacted.
    pub fn log_redacted(&self) {
        tracing::info!(
            neo4j_uri = self.neo4j_uri.as_str(),
            neo4j_user = self.neo4j_user.as_str(),
            contact_email = self.contact_email.as_str(),
            ncbi_api_key = if self.ncbi_api_key.is_some() { "set" } else { "unset" },
            "Configuration loaded"
        );
    }
}

fn required_env(key: &str) -> Result<String> {
    env::var(key).map_err(|_| Error::Config(format!("{key} environment variable is required")))
}

/// A named Cypher query executed in the terminal derived-query stage.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NamedQuery {
    pub name: String,
    pub cypher: String,
}

/// Query names every build profile must define.
pub const REQUIRED_QUERIES: &[&str] = &["citation-counts"];

/// Organisational boilerplate excluded from affiliation token weighting.
/// Overridable per profile.
const DEFAULT_AFFILIATION_STOPWORDS: &[&str] = &[
    "University",
    "Institute",
    "Department",
    "Research",
    "of",
    "at",
    "is",
    "a",
    "for",
    "Dept",
];

const DEFAULT_HYDRATE_BATCH: usize = 300;
const DEFAULT_SIMILARITY_TOP_K: usize = 20;

/// One build invocation's parameters, loaded from a YAML profile document.
#[derive(Debug, Clone, Deserialize)]
pub struct BuildProfile {
    /// Narrow search string identifying the core corpus.
    pub search: String,
    /// Broad catch-all search string used for the seed stage.
    pub broader_search: String,
    pub earliest: NaiveDate,
    pub latest: NaiveDate,

    #[serde(default = "default_hydrate_batch")]
    pub hydrate_batch: usize,
    #[serde(default = "default_similarity_top_k")]
    pub similarity_top_k: usize,
    #[serde(default = "default_affiliation_stopwords")]
    pub affiliation_stopwords: Vec<String>,

    /// Derived queries run as the terminal build stage, in declared order.
    #[serde(default)]
    pub queries: Vec<NamedQuery>,
}

fn default_hydrate_batch() -> usize {
    DEFAULT_HYDRATE_BATCH
}

fn default_similarity_top_k() -> usize {
    DEFAULT_SIMILARITY_TOP_K
}

fn default_affiliation_stopwords() -> Vec<String> {
    DEFAULT_AFFILIATION_STOPWORDS
        .iter()
        .map(|s| s.to_string())
        .collect()
}

impl BuildProfile {
    pub fn from_yaml(text: &str) -> Result<Self> {
        let profile: BuildProfile = serde_yaml::from_str(text)
            .map_err(|e| Error::Config(format!("invalid build profile: {e}")))?;
        profile.validate()?;
        Ok(profile)
    }

    pub fn from_file(path: &Path) -> Result<Self> {
        let text = std::fs::read_to_string(path)
            .map_err(|e| Error::Config(format!("cannot read {}: {e}", path.display())))?;
        Self::from_yaml(&text)
    }

    pub fn window(&self) -> DateWindow {
        DateWindow {
            earliest: self.earliest,
            latest: self.latest,
        }
    }

    /// Validate required parameters and the named-query map before any work.
    pub fn validate(&self) -> Result<()> {
        if self.search.trim().is_empty() {
            return Err(Error::Config("search must not be empty".into()));
        }
        if self.broader_search.trim().is_empty() {
            return Err(Error::Config("broader_search must not be empty".into()));
        }
        if self.earliest > self.latest {
            return Err(Error::Config(format!(
                "earliest ({}) is after latest ({})",
                self.earliest, self.latest
            )));
        }
        if self.hydrate_batch == 0 {
            return Err(Error::Config("hydrate_batch must be positive".into()));
        }
        if self.similarity_top_k == 0 {
            return Err(Error::Config("similarity_top_k must be positive".into()));
        }

        let mut names = HashSet::new();
        for q in &self.queries {
            if q.name.trim().is_empty() || q.cypher.trim().is_empty() {
                return Err(Error::Config(
                    "named queries need both a name and a cypher body".into(),
                ));
            }
            if !names.insert(q.name.as_str()) {
                return Err(Error::Config(format!("duplicate named query: {}", q.name)));
            }
        }
        for required in REQUIRED_QUERIES {
            if !names.contains(required) {
                return Err(Error::Config(format!(
                    "build profile is missing required query '{required}'"
                )));
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const PROFILE: &str = r#"
search: "machine learning AND sepsis"
broader_search: "sepsis"
earliest: 2019-01-01
latest: 2020-06-01
queries:
  - name: citation-counts
    cypher: "MATCH (a:Article)<-[:CITES]-(b) WITH a, count(b) AS n SET a.within_count = n"
"#;

    #[test]
    fn profile_parses_with_defaults() {
        let p = BuildProfile::from_yaml(PROFILE).unwrap();
        assert_eq!(p.hydrate_batch, 300);
        assert_eq!(p.similarity_top_k, 20);
        assert!(p.affiliation_stopwords.iter().any(|w| w == "University"));
        assert_eq!(
            p.window().earliest,
            NaiveDate::from_ymd_opt(2019, 1, 1).unwrap()
        );
    }

    #[test]
    fn missing_required_query_is_rejected() {
        let text = PROFILE.replace("citation-counts", "something-else");
        let err = BuildProfile::from_yaml(&text).unwrap_err();
        assert!(matches!(err, Error::Config(_)));
    }

    #[test]
    fn inverted_window_is_rejected() {
        let text = PROFILE.replace("2020-06-01", "2018-01-01");
        assert!(BuildProfile::from_yaml(&text).is_err());
    }

    #[test]
    fn duplicate_query_names_are_rejected() {
        let text = format!(
            "{PROFILE}  - name: citation-counts\n    cypher: \"MATCH (n) RETURN n\"\n"
        );
        assert!(BuildProfile::from_yaml(&text).is_err());
    }
}
