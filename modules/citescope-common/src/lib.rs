pub mod config;
pub mod error;
pub mod ids;
pub mod record;
pub mod sources;

pub use config::{BuildProfile, Config, NamedQuery, REQUIRED_QUERIES};
pub use error::{Error, Result};
pub use ids::{ArticleIds, IdKind, Identifier};
pub use record::{
    ArticleRecord, DateWindow, LinkKind, OaRecord, RefLink, SearchResult, SourceTag, Work,
};
