use std::path::PathBuf;

use thiserror::Error;

/// Stage-level failures. Per-record problems never show up here: they
/// degrade the record and the stage keeps going.
#[derive(Error, Debug)]
pub enum CurateError {
    #[error("missing input {}: run `{hint}` first", path.display())]
    MissingInput { path: PathBuf, hint: &'static str },

    #[error("no taxonomy at {}: run `build-taxonomy` first", path.display())]
    MissingTaxonomy { path: PathBuf },

    #[error("taxonomy answer unusable ({reason}); raw output was: {raw_prefix}...")]
    TaxonomyParse { reason: String, raw_prefix: String },

    #[error("inconsistent records: {0}")]
    InconsistentRecords(String),

    #[error("{stage} interrupted after {completed} records; progress was checkpointed")]
    Interrupted { stage: &'static str, completed: usize },
}
