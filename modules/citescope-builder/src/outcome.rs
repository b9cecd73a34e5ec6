//! Typed per-unit outcomes and their fold into stage counters. Counters are a
//! projection of outcomes — nothing is caught-and-forgotten on the way.

use crate::stages::StageId;

/// Why a unit was skipped rather than processed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SkipReason {
    /// The source stayed unavailable through the bounded retries.
    SourceUnavailable,
    /// The source answered with something the merge engine cannot use.
    MalformedRecord,
    /// The source had nothing for this unit (clean miss, not an error).
    NoData,
}

/// Outcome of processing one frontier unit. Fatal conditions are not a
/// variant: they propagate as errors and abort the pass.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UnitOutcome {
    Ok { new: bool, updated: bool },
    Skipped(SkipReason),
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct StageCounters {
    pub found: u64,
    pub new: u64,
    pub updated: u64,
    pub skipped: u64,
}

impl StageCounters {
    pub fn record(&mut self, outcome: UnitOutcome) {
        match outcome {
            UnitOutcome::Ok { new, updated } => {
                if new {
                    self.new += 1;
                }
                if updated {
                    self.updated += 1;
                }
            }
            UnitOutcome::Skipped(_) => self.skipped += 1,
        }
    }

    /// Skip a whole batch at once (e.g. one failed source call covering
    /// many units).
    pub fn skip_many(&mut self, n: u64, _reason: SkipReason) {
        self.skipped += n;
    }
}

#[derive(Debug, Clone, Copy)]
pub struct StageReport {
    pub id: StageId,
    pub counters: StageCounters,
}

/// Per-stage counters plus end-of-pass graph totals.
#[derive(Debug, Default)]
pub struct BuildReport {
    pub stages: Vec<StageReport>,
    pub articles: u64,
    pub citations: u64,
}

impl std::fmt::Display for BuildReport {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        writeln!(f, "\n=== Citation Graph Build Complete ===")?;
        writeln!(
            f,
            "{:<24} {:>8} {:>8} {:>8} {:>8}",
            "stage", "found", "new", "updated", "skipped"
        )?;
        for stage in &self.stages {
            writeln!(
                f,
                "{:<24} {:>8} {:>8} {:>8} {:>8}",
                stage.id.to_string(),
                stage.counters.found,
                stage.counters.new,
                stage.counters.updated,
                stage.counters.skipped
            )?;
        }
        writeln!(f, "\nArticles in graph:  {}", self.articles)?;
        writeln!(f, "Citation edges:     {}", self.citations)?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn counters_fold_outcomes() {
        let mut c = StageCounters::default();
        c.record(UnitOutcome::Ok {
            new: true,
            updated: true,
        });
        c.record(UnitOutcome::Ok {
            new: false,
            updated: false,
        });
        c.record(UnitOutcome::Skipped(SkipReason::MalformedRecord));
        c.skip_many(3, SkipReason::SourceUnavailable);

        assert_eq!(c.new, 1);
        assert_eq!(c.updated, 1);
        assert_eq!(c.skipped, 4);
    }

    #[test]
    fn report_renders_every_stage_row() {
        let report = BuildReport {
            stages: vec![StageReport {
                id: StageId::Seed,
                counters: StageCounters {
                    found: 10,
                    new: 7,
                    updated: 0,
                    skipped: 3,
                },
            }],
            articles: 7,
            citations: 0,
        };
        let rendered = report.to_string();
        assert!(rendered.contains("seed"));
        assert!(rendered.contains("Articles in graph:  7"));
    }
}
