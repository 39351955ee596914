//! Two-level category tree induced from the tag corpus.

use std::collections::HashMap;
use std::fmt;
use std::fs;
use std::path::Path;
use std::sync::LazyLock;

use anyhow::{Context, Result};
use regex::Regex;
use serde::de::{MapAccess, Visitor};
use serde::ser::SerializeMap;
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use tracing::{error, info, warn};

use crate::bookmarks::truncate_chars;
use crate::config::Settings;
use crate::error::CurateError;
use crate::llm::{ChatModel, ChatOptions};
use crate::store::{self, Record};

pub const DOMAIN_MARKER: &str = "Domain:";
const TAXONOMY_TEMPERATURE: f32 = 0.2;
const RAW_PREFIX_CHARS: usize = 100;

static CODE_FENCE_RE: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"```[a-zA-Z]*").unwrap());

/// Category → subcategories, in the order the model listed them. Matching
/// walks this order, so it is part of the tree's meaning.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct Taxonomy {
    pub categories: Vec<(String, Vec<String>)>,
}

impl Taxonomy {
    pub fn is_empty(&self) -> bool {
        self.categories.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &[String])> {
        self.categories
            .iter()
            .map(|(name, subs)| (name.as_str(), subs.as_slice()))
    }

    pub fn load(path: &Path) -> Result<Self> {
        if !path.exists() {
            return Err(CurateError::MissingTaxonomy {
                path: path.to_path_buf(),
            }
            .into());
        }
        let text = fs::read_to_string(path).with_context(|| format!("read {}", path.display()))?;
        let file: TaxonomyFile =
            serde_json::from_str(&text).with_context(|| format!("parse {}", path.display()))?;
        Ok(file.taxonomy)
    }

    pub fn save(&self, path: &Path) -> Result<()> {
        let text = serde_json::to_string_pretty(&TaxonomyFileRef { taxonomy: self })?;
        fs::write(path, text).with_context(|| format!("write {}", path.display()))
    }

    /// Pretty JSON of the bare tree, as shown to the model.
    pub fn to_prompt_json(&self) -> String {
        serde_json::to_string_pretty(self).unwrap_or_default()
    }
}

#[derive(Deserialize)]
struct TaxonomyFile {
    #[serde(rename = "Taxonomy")]
    taxonomy: Taxonomy,
}

#[derive(Serialize)]
struct TaxonomyFileRef<'a> {
    #[serde(rename = "Taxonomy")]
    taxonomy: &'a Taxonomy,
}

impl Serialize for Taxonomy {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let mut map = serializer.serialize_map(Some(self.categories.len()))?;
        for (name, subs) in &self.categories {
            map.serialize_entry(name, subs)?;
        }
        map.end()
    }
}

impl<'de> Deserialize<'de> for Taxonomy {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        struct TreeVisitor;

        impl<'de> Visitor<'de> for TreeVisitor {
            type Value = Taxonomy;

            fn expecting(&self, f: &mut fmt::Formatter) -> fmt::Result {
                f.write_str("an object mapping category names to lists of subcategories")
            }

            fn visit_map<A: MapAccess<'de>>(self, mut access: A) -> Result<Taxonomy, A::Error> {
                let mut categories: Vec<(String, Vec<String>)> = Vec::new();
                while let Some((name, subs)) = access.next_entry::<String, Vec<String>>()? {
                    match categories.iter_mut().find(|(existing, _)| *existing == name) {
                        Some(entry) => entry.1 = subs,
                        None => categories.push((name, subs)),
                    }
                }
                Ok(Taxonomy { categories })
            }
        }

        deserializer.deserialize_map(TreeVisitor)
    }
}

/// Tag frequencies over records with real tags, most frequent first. Ties
/// keep first-seen order.
pub fn tag_counts(records: &[Record]) -> Vec<(String, usize)> {
    let mut order: Vec<String> = Vec::new();
    let mut counts: HashMap<String, usize> = HashMap::new();

    let tag_lists = records
        .iter()
        .filter_map(|r| r.ai_tags.as_deref())
        .filter(|tags| !tags.contains(DOMAIN_MARKER));
    for tags in tag_lists {
        for tag in tags.split(',').map(str::trim).filter(|t| t.chars().count() > 1) {
            let count = counts.entry(tag.to_string()).or_insert_with(|| {
                order.push(tag.to_string());
                0
            });
            *count += 1;
        }
    }

    let mut ranked: Vec<(String, usize)> = order
        .into_iter()
        .map(|tag| {
            let n = counts[&tag];
            (tag, n)
        })
        .collect();
    ranked.sort_by(|a, b| b.1.cmp(&a.1));
    ranked
}

/// Parse the model's answer, tolerating a markdown code fence around it.
pub fn parse_answer(raw: &str) -> Result<Taxonomy, CurateError> {
    let cleaned = CODE_FENCE_RE.replace_all(raw, "");
    let cleaned = cleaned.trim();
    let parse_error = |reason: String| CurateError::TaxonomyParse {
        reason,
        raw_prefix: truncate_chars(raw, RAW_PREFIX_CHARS),
    };

    let file: TaxonomyFile =
        serde_json::from_str(cleaned).map_err(|e| parse_error(e.to_string()))?;
    if file.taxonomy.is_empty() {
        return Err(parse_error("taxonomy has no categories".to_string()));
    }
    Ok(file.taxonomy)
}

fn taxonomy_prompt(tags: &[&str]) -> String {
    format!(
        r#"[Context]
I have a collection of browser bookmarks tagged with keywords.
These are the most frequent tags in the collection:

{tags}

[Task]
Work out the user's interests and work domains from these tags and design a
hierarchical taxonomy that covers them.

[Requirements]
1. 10-15 high-level categories (level 1).
2. 3-6 distinct subcategories (level 2) for each category.
3. Mutually exclusive and collectively exhaustive.
4. Professional, concise English names.

[Output Format]
Return ONLY a JSON object, with no markdown and no explanation:
{{
    "Taxonomy": {{
        "Category Name 1": ["Subcat A", "Subcat B", "Subcat C"],
        "Category Name 2": ["Subcat X", "Subcat Y"]
    }}
}}"#,
        tags = tags.join(", ")
    )
}

/// `3_tagged.json` → `taxonomy_config.json`. Unless the answer parses into a
/// non-empty tree, no taxonomy file is left behind, so `categorize` cannot
/// run against a tree built from an older tag corpus.
pub async fn run<M: ChatModel>(settings: &Settings, model: M) -> Result<Taxonomy> {
    let paths = settings.paths();
    let built = build(settings, model).await;
    if built.is_err() {
        discard_stale(&paths.taxonomy)?;
    }
    let taxonomy = built?;
    taxonomy.save(&paths.taxonomy)?;

    info!(categories = taxonomy.categories.len(), path = %paths.taxonomy.display(), "Taxonomy saved");
    for (name, subs) in taxonomy.iter() {
        info!("  {} ({} subcategories)", name, subs.len());
    }
    Ok(taxonomy)
}

fn discard_stale(path: &Path) -> Result<()> {
    if path.exists() {
        fs::remove_file(path).with_context(|| format!("remove {}", path.display()))?;
        warn!(path = %path.display(), "Removed taxonomy from an earlier run");
    }
    Ok(())
}

async fn build<M: ChatModel>(settings: &Settings, model: M) -> Result<Taxonomy> {
    let paths = settings.paths();
    let records = store::load(&paths.tagged, "tag")?;

    let counts = tag_counts(&records);
    let total: usize = counts.iter().map(|(_, n)| n).sum();
    info!(total, unique = counts.len(), "Tags aggregated");

    let sample: Vec<&str> = counts
        .iter()
        .take(settings.taxonomy_sample_size)
        .map(|(tag, _)| tag.as_str())
        .collect();
    info!(sample = sample.len(), "Requesting taxonomy from model");

    let options = ChatOptions {
        temperature: Some(TAXONOMY_TEMPERATURE),
    };
    let raw = model
        .complete(&taxonomy_prompt(&sample), &options)
        .await
        .context("Taxonomy request failed")?;

    let taxonomy = parse_answer(&raw).inspect_err(|e| error!("{}", e))?;
    Ok(taxonomy)
}
