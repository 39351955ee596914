use std::fs;

use anyhow::{Context, Result};
use tracing::info;

use crate::bookmarks;
use crate::config::Paths;
use crate::error::CurateError;
use crate::store::{self, Record};

/// Turn the browser export into `1_raw.json`. Ids are positions among the
/// `http` links, in document order.
pub fn run(paths: &Paths) -> Result<usize> {
    if !paths.input_html.exists() {
        return Err(CurateError::MissingInput {
            path: paths.input_html.clone(),
            hint: "export bookmarks from the browser",
        }
        .into());
    }
    let html = fs::read_to_string(&paths.input_html)
        .with_context(|| format!("read {}", paths.input_html.display()))?;

    let records = records_from_html(&html);
    info!(count = records.len(), "Links collected");
    store::save(&paths.raw, &records)?;
    Ok(records.len())
}

pub fn records_from_html(html: &str) -> Vec<Record> {
    bookmarks::http_anchors(html)
        .into_iter()
        .enumerate()
        .map(|(id, anchor)| Record::new(id, anchor.href, anchor.text))
        .collect()
}
