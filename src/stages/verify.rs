//! Completeness check between the original export and the final file.

use std::collections::BTreeSet;
use std::fs;
use std::path::Path;

use anyhow::{Context, Result};

use crate::bookmarks::http_anchors;
use crate::error::CurateError;

/// URLs found in one bookmark file.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UrlSet {
    pub total: usize,
    pub unique: BTreeSet<String>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Verification {
    pub original: UrlSet,
    pub curated: UrlSet,
    /// In the original, not in the curated file.
    pub missing: BTreeSet<String>,
    /// In the curated file, not in the original.
    pub added: BTreeSet<String>,
}

impl Verification {
    pub fn is_complete(&self) -> bool {
        self.missing.is_empty()
    }

    pub fn print(&self) {
        println!(
            "Original: {} links ({} unique)",
            self.original.total,
            self.original.unique.len()
        );
        println!(
            "Curated:  {} links ({} unique)",
            self.curated.total,
            self.curated.unique.len()
        );
        if self.is_complete() {
            println!("No links lost: every original link is in the curated file.");
        } else {
            println!("{} links missing from the curated file:", self.missing.len());
            for (i, url) in self.missing.iter().enumerate() {
                println!("  {}. {}", i + 1, url);
            }
        }
        if !self.added.is_empty() {
            println!(
                "{} links appear only in the curated file (formatting differences?):",
                self.added.len()
            );
            for url in &self.added {
                println!("  + {}", url);
            }
        }
    }
}

/// Trailing-slash-insensitive form of a URL.
pub fn normalize_url(url: &str) -> &str {
    let url = url.trim();
    url.strip_suffix('/').unwrap_or(url)
}

pub fn url_set(html: &str) -> UrlSet {
    let anchors = http_anchors(html);
    UrlSet {
        total: anchors.len(),
        unique: anchors
            .iter()
            .map(|a| normalize_url(&a.href).to_string())
            .collect(),
    }
}

pub fn compare(original: UrlSet, curated: UrlSet) -> Verification {
    let missing = original.unique.difference(&curated.unique).cloned().collect();
    let added = curated.unique.difference(&original.unique).cloned().collect();
    Verification {
        original,
        curated,
        missing,
        added,
    }
}

fn read_bookmarks(path: &Path, hint: &'static str) -> Result<UrlSet> {
    if !path.exists() {
        return Err(CurateError::MissingInput {
            path: path.to_path_buf(),
            hint,
        }
        .into());
    }
    let html = fs::read_to_string(path).with_context(|| format!("read {}", path.display()))?;
    Ok(url_set(&html))
}

pub fn run(original: &Path, curated: &Path) -> Result<Verification> {
    let original = read_bookmarks(original, "export bookmarks from the browser")?;
    let curated = read_bookmarks(curated, "export")?;
    Ok(compare(original, curated))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn set(urls: &[&str]) -> UrlSet {
        UrlSet {
            total: urls.len(),
            unique: urls.iter().map(|u| normalize_url(u).to_string()).collect(),
        }
    }

    #[test]
    fn trailing_slash_is_ignored() {
        assert_eq!(normalize_url(" https://a.example/ "), "https://a.example");
        assert_eq!(normalize_url("https://a.example/x"), "https://a.example/x");
    }

    #[test]
    fn reports_both_differences() {
        let original = set(&["https://a.example/", "https://b.example", "https://c.example"]);
        let curated = set(&["https://a.example", "https://c.example/", "https://d.example"]);
        let v = compare(original, curated);

        assert_eq!(v.missing, BTreeSet::from(["https://b.example".to_string()]));
        assert_eq!(v.added, BTreeSet::from(["https://d.example".to_string()]));
        assert!(!v.is_complete());
    }

    #[test]
    fn duplicates_count_toward_total_only() {
        let html = r#"<A HREF="https://a.example/">1</A><A HREF="https://a.example">2</A><A HREF="ftp://x">3</A>"#;
        let s = url_set(html);
        assert_eq!(s.total, 2);
        assert_eq!(s.unique.len(), 1);
    }

    #[test]
    fn compares_files_on_disk() {
        let dir = tempfile::tempdir().unwrap();
        let original = dir.path().join("bookmarks.html");
        let curated = dir.path().join("final.html");
        fs::write(&original, r#"<A HREF="https://a.example/?x=1&amp;y=2">a</A>"#).unwrap();
        fs::write(&curated, r#"<DT><A HREF="https://a.example/?x=1&amp;y=2">a</A>"#).unwrap();

        let v = run(&original, &curated).unwrap();
        assert!(v.is_complete());
        assert!(v.added.is_empty());

        assert!(run(&original, &dir.path().join("absent.html")).is_err());
    }
}
