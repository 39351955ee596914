//! Progress summary over whatever stage files exist in the data directory.

use std::collections::{BTreeMap, BTreeSet};
use std::path::Path;

use anyhow::Result;

use super::taxonomy::{Taxonomy, DOMAIN_MARKER};
use crate::config::Paths;
use crate::store::{self, Record};

#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct FileStats {
    pub records: usize,
    pub statuses: BTreeMap<String, usize>,
    pub tagged: usize,
    pub domain_fallback: usize,
    pub categorized: usize,
    pub categories: usize,
}

impl FileStats {
    pub fn of(records: &[Record]) -> Self {
        let mut stats = FileStats {
            records: records.len(),
            ..Default::default()
        };
        let mut categories = BTreeSet::new();

        for record in records {
            if let Some(status) = record.status {
                *stats.statuses.entry(status.to_string()).or_default() += 1;
            }
            if let Some(tags) = &record.ai_tags {
                stats.tagged += 1;
                if tags.contains(DOMAIN_MARKER) {
                    stats.domain_fallback += 1;
                }
            }
            if let Some(category) = &record.category {
                stats.categorized += 1;
                categories.insert(category.as_str());
            }
        }
        stats.categories = categories.len();
        stats
    }
}

#[derive(Debug)]
pub struct Stats {
    pub files: Vec<(&'static str, Option<FileStats>)>,
    pub taxonomy_categories: Option<usize>,
}

impl Stats {
    pub fn print(&self) {
        for (name, stats) in &self.files {
            let Some(s) = stats else {
                println!("{:<12} not started", name);
                continue;
            };
            println!("{:<12} {} records", name, s.records);
            if !s.statuses.is_empty() {
                let breakdown: Vec<String> =
                    s.statuses.iter().map(|(k, v)| format!("{}={}", k, v)).collect();
                println!("{:<12}   status: {}", "", breakdown.join(", "));
            }
            if s.tagged > 0 {
                println!(
                    "{:<12}   tagged: {} ({} by domain only)",
                    "", s.tagged, s.domain_fallback
                );
            }
            if s.categorized > 0 {
                println!(
                    "{:<12}   categorized: {} into {} categories",
                    "", s.categorized, s.categories
                );
            }
        }
        match self.taxonomy_categories {
            Some(n) => println!("{:<12} {} top-level categories", "taxonomy", n),
            None => println!("{:<12} not built", "taxonomy"),
        }
    }
}

fn file_stats(path: &Path) -> Result<Option<FileStats>> {
    Ok(store::load_previous(path)?.map(|records| FileStats::of(&records)))
}

pub fn run(paths: &Paths) -> Result<Stats> {
    let files = vec![
        ("raw", file_stats(&paths.raw)?),
        ("enriched", file_stats(&paths.enriched)?),
        ("tagged", file_stats(&paths.tagged)?),
        ("categorized", file_stats(&paths.categorized)?),
    ];
    let taxonomy_categories = if paths.taxonomy.exists() {
        Some(Taxonomy::load(&paths.taxonomy)?.iter().count())
    } else {
        None
    };
    Ok(Stats {
        files,
        taxonomy_categories,
    })
}
