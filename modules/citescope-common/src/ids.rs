use serde::{Deserialize, Serialize};

/// The three identifier namespaces an article can be known under.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum IdKind {
    Doi,
    Pmid,
    Pmcid,
}

impl std::fmt::Display for IdKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            IdKind::Doi => write!(f, "doi"),
            IdKind::Pmid => write!(f, "pmid"),
            IdKind::Pmcid => write!(f, "pmcid"),
        }
    }
}

/// A single identifier in one namespace. DOIs are compared case-insensitively,
/// so the value is lower-cased at construction and never anywhere else.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Identifier {
    pub kind: IdKind,
    pub value: String,
}

impl Identifier {
    pub fn new(kind: IdKind, value: impl Into<String>) -> Self {
        let raw: String = value.into();
        let value = match kind {
            IdKind::Doi => normalize_doi(&raw),
            _ => raw.trim().to_string(),
        };
        Self { kind, value }
    }

    pub fn doi(value: impl Into<String>) -> Self {
        Self::new(IdKind::Doi, value)
    }

    pub fn pmid(value: impl Into<String>) -> Self {
        Self::new(IdKind::Pmid, value)
    }

    pub fn pmcid(value: impl Into<String>) -> Self {
        Self::new(IdKind::Pmcid, value)
    }
}

impl std::fmt::Display for Identifier {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}:{}", self.kind, self.value)
    }
}

/// Lower-case the DOI and strip common URL prefixes so that
/// `https://doi.org/10.1/X` and `10.1/x` key the same entity.
pub fn normalize_doi(raw: &str) -> String {
    let trimmed = raw.trim();
    let stripped = trimmed
        .strip_prefix("https://doi.org/")
        .or_else(|| trimmed.strip_prefix("http://doi.org/"))
        .or_else(|| trimmed.strip_prefix("doi:"))
        .unwrap_or(trimmed);
    stripped.to_lowercase()
}

/// The set of identifiers known for one article. Any subset may be present;
/// the resolver guarantees at least one before an entity is created.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ArticleIds {
    pub doi: Option<String>,
    pub pmid: Option<String>,
    pub pmcid: Option<String>,
}

impl ArticleIds {
    pub fn with_doi(mut self, doi: impl Into<String>) -> Self {
        self.doi = Some(normalize_doi(&doi.into()));
        self
    }

    pub fn with_pmid(mut self, pmid: impl Into<String>) -> Self {
        self.pmid = Some(pmid.into().trim().to_string());
        self
    }

    pub fn with_pmcid(mut self, pmcid: impl Into<String>) -> Self {
        self.pmcid = Some(pmcid.into().trim().to_string());
        self
    }

    pub fn is_empty(&self) -> bool {
        self.doi.is_none() && self.pmid.is_none() && self.pmcid.is_none()
    }

    /// The most specific single identifier to resolve by, preferring DOI.
    pub fn primary(&self) -> Option<Identifier> {
        if let Some(doi) = &self.doi {
            return Some(Identifier::doi(doi.clone()));
        }
        if let Some(pmid) = &self.pmid {
            return Some(Identifier::pmid(pmid.clone()));
        }
        self.pmcid.as_ref().map(|p| Identifier::pmcid(p.clone()))
    }

    pub fn iter(&self) -> impl Iterator<Item = Identifier> + '_ {
        self.doi
            .iter()
            .map(|v| Identifier::doi(v.clone()))
            .chain(self.pmid.iter().map(|v| Identifier::pmid(v.clone())))
            .chain(self.pmcid.iter().map(|v| Identifier::pmcid(v.clone())))
    }

    /// Number of populated identifier slots.
    pub fn len(&self) -> usize {
        self.iter().count()
    }
}
