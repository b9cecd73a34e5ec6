pub mod builder;
pub mod outcome;
pub mod retry;
pub mod stages;

pub use builder::CitationGraphBuilder;
pub use outcome::{BuildReport, SkipReason, StageCounters, StageReport, UnitOutcome};
pub use stages::{StageId, StageSpec, STAGES};
