//! Re-enterable per-record stage loop with periodic checkpoints.
//!
//! "Work remaining" is every record the stage has not completed yet, so a
//! stage can be re-run after a crash or Ctrl-C and only picks up what is
//! missing.

use std::future::Future;
use std::path::Path;

use anyhow::Result;
use indicatif::{ProgressBar, ProgressStyle};
use tracing::{debug, info, warn};

use crate::error::CurateError;
use crate::store::{self, Record};

pub trait Stage {
    type Outcome;

    const NAME: &'static str;

    /// Whether this stage's fields are already set on `record`.
    fn is_done(&self, record: &Record) -> bool;

    /// Copy this stage's fields from an earlier run's copy of the record.
    fn carry_over(&self, record: &mut Record, previous: &Record);

    /// Work out the stage's fields. Must not have side effects on the
    /// record: cancellation drops this future at any await point.
    fn compute(&self, record: &Record) -> impl Future<Output = Self::Outcome>;

    fn apply(&self, record: &mut Record, outcome: Self::Outcome);
}

/// Counts returned after a stage run.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StageReport {
    pub total: usize,
    pub processed: usize,
    pub skipped: usize,
}

/// Bring completed work from the stage's own earlier output into `records`.
/// A previous record only counts if both `id` and `url` still match.
pub fn resume<S: Stage>(stage: &S, records: &mut [Record], previous: Option<Vec<Record>>) -> usize {
    let Some(previous) = previous else {
        return 0;
    };
    let mut resumed = 0;
    for prev in previous {
        match records.get_mut(prev.id) {
            Some(record) if record.url == prev.url && stage.is_done(&prev) => {
                stage.carry_over(record, &prev);
                resumed += 1;
            }
            Some(_) => debug!(id = prev.id, stage = S::NAME, "earlier result no longer matches input"),
            None => {}
        }
    }
    if resumed > 0 {
        info!(stage = S::NAME, resumed, "Resuming from earlier run");
    }
    resumed
}

/// Process every unfinished record in order, one at a time. The full list is
/// saved to `output` after each record whose id is a multiple of `every`,
/// when `shutdown` resolves, and at the end.
pub async fn run_stage<S, F>(
    stage: &S,
    records: &mut [Record],
    output: &Path,
    every: usize,
    shutdown: F,
) -> Result<StageReport>
where
    S: Stage,
    F: Future<Output = ()>,
{
    tokio::pin!(shutdown);

    let total = records.len();
    let pending = records.iter().filter(|r| !stage.is_done(r)).count();
    info!(stage = S::NAME, total, pending, "Stage started");

    let pb = ProgressBar::new(pending as u64);
    pb.set_style(
        ProgressStyle::default_bar()
            .template("[{elapsed_precise}] {bar:40} {pos}/{len} ({per_sec}, eta {eta})")?
            .progress_chars("=> "),
    );

    let mut processed = 0usize;
    let mut skipped = 0usize;

    for i in 0..records.len() {
        if stage.is_done(&records[i]) {
            skipped += 1;
            continue;
        }

        let outcome = tokio::select! {
            outcome = stage.compute(&records[i]) => Some(outcome),
            _ = &mut shutdown => None,
        };
        let Some(outcome) = outcome else {
            pb.finish_and_clear();
            store::save(output, records)?;
            warn!(stage = S::NAME, processed, "Interrupted, checkpoint written");
            return Err(CurateError::Interrupted {
                stage: S::NAME,
                completed: processed,
            }
            .into());
        };

        stage.apply(&mut records[i], outcome);
        processed += 1;
        pb.inc(1);

        if records[i].id % every == 0 {
            store::save(output, records)?;
            debug!(stage = S::NAME, id = records[i].id, "Checkpoint");
        }
    }

    pb.finish_and_clear();
    store::save(output, records)?;
    info!(stage = S::NAME, processed, skipped, "Stage finished");

    Ok(StageReport {
        total,
        processed,
        skipped,
    })
}
