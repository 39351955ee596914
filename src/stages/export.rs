//! Netscape bookmark file output, grouped by category and subcategory.

use std::cmp::Ordering;
use std::collections::{BTreeMap, HashMap};
use std::fmt::Write as _;
use std::fs;

use anyhow::{Context, Result};
use tracing::info;

use crate::bookmarks::escape;
use crate::config::Paths;
use crate::store::{self, Record};

/// Categories that always come last, in this order.
const PINNED_LAST: &[&str] = &["Dead Links", "Unsorted Websites", "Websites by Domain"];
const UNCATEGORIZED: &str = "Uncategorized";
const GENERAL: &str = "General";
const UNTITLED: &str = "Untitled";

/// category → subcategory → records (input order kept).
pub type OutputTree<'a> = HashMap<String, BTreeMap<String, Vec<&'a Record>>>;

pub fn build_tree(records: &[Record]) -> OutputTree<'_> {
    let mut tree: OutputTree = HashMap::new();
    for record in records {
        let category = label_or(record.category.as_deref(), UNCATEGORIZED);
        let subcategory = label_or(record.subcategory.as_deref(), GENERAL);
        tree.entry(category)
            .or_default()
            .entry(subcategory)
            .or_default()
            .push(record);
    }
    tree
}

fn label_or(value: Option<&str>, default: &str) -> String {
    match value.map(str::trim) {
        Some(v) if !v.is_empty() => v.to_string(),
        _ => default.to_string(),
    }
}

/// Alphabetical, except the pinned categories which trail in fixed order.
pub fn category_order(a: &str, b: &str) -> Ordering {
    let rank = |name: &str| PINNED_LAST.iter().position(|p| *p == name);
    match (rank(a), rank(b)) {
        (None, None) => a.cmp(b),
        (None, Some(_)) => Ordering::Less,
        (Some(_), None) => Ordering::Greater,
        (Some(x), Some(y)) => x.cmp(&y),
    }
}

pub fn render(tree: &OutputTree) -> String {
    let mut categories: Vec<&String> = tree.keys().collect();
    categories.sort_by(|a, b| category_order(a, b));

    let mut out = String::new();
    out.push_str("<!DOCTYPE NETSCAPE-Bookmark-file-1>\n");
    out.push('\n');
    out.push_str("<META HTTP-EQUIV=\"Content-Type\" CONTENT=\"text/html; charset=UTF-8\">\n");
    out.push_str("<TITLE>AI Bookmarks</TITLE>\n");
    out.push_str("<H1>Bookmarks</H1>\n");
    out.push_str("<DL><p>\n");

    for category in categories {
        let _ = writeln!(out, "    <DT><H3>{}</H3>", escape(category));
        out.push_str("    <DL><p>\n");
        for (subcategory, records) in &tree[category] {
            let _ = writeln!(out, "        <DT><H3>{}</H3>", escape(subcategory));
            out.push_str("        <DL><p>\n");
            for record in records {
                let title = if record.user_title.trim().is_empty() {
                    UNTITLED
                } else {
                    record.user_title.as_str()
                };
                let _ = writeln!(
                    out,
                    "            <DT><A HREF=\"{}\">{}</A>",
                    escape(&record.url),
                    escape(title)
                );
            }
            out.push_str("        </DL><p>\n");
        }
        out.push_str("    </DL><p>\n");
    }
    out.push_str("</DL><p>\n");
    out
}

/// `4_categorized.json` → final bookmark HTML. Returns the bookmark count.
pub fn run(paths: &Paths) -> Result<usize> {
    let records = store::load(&paths.categorized, "categorize")?;
    let tree = build_tree(&records);
    info!(bookmarks = records.len(), categories = tree.len(), "Exporting");

    fs::write(&paths.output_html, render(&tree))
        .with_context(|| format!("write {}", paths.output_html.display()))?;
    Ok(records.len())
}
