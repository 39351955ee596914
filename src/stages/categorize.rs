use std::future::Future;

use anyhow::Result;
use tracing::{debug, warn};

use super::taxonomy::{Taxonomy, DOMAIN_MARKER};
use crate::config::Settings;
use crate::llm::{ChatModel, ChatOptions};
use crate::runner::{self, Stage, StageReport};
use crate::store::{self, Record};

pub const UNSORTED: &str = "Unsorted Websites";
const MISCELLANEOUS: &str = "Miscellaneous";
const GENERAL: &str = "General";
const REVIEW_CATEGORY: &str = "Error";
const REVIEW_SUBCATEGORY: &str = "Manual Review";

/// Where a bookmark ends up. Both parts are always non-empty.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Placement {
    pub category: String,
    pub subcategory: String,
}

impl Placement {
    fn new(category: impl Into<String>, subcategory: impl Into<String>) -> Self {
        Self {
            category: category.into(),
            subcategory: subcategory.into(),
        }
    }
}

pub struct CategorizeStage<M> {
    model: M,
    taxonomy: Taxonomy,
    taxonomy_json: String,
}

impl<M: ChatModel> CategorizeStage<M> {
    pub fn new(model: M, taxonomy: Taxonomy) -> Self {
        let taxonomy_json = taxonomy.to_prompt_json();
        Self {
            model,
            taxonomy,
            taxonomy_json,
        }
    }

    fn prompt(&self, record: &Record, tags: &str) -> String {
        format!(
            r#"Task: Assign this bookmark to the most appropriate Category and Subcategory from the taxonomy below.

[Bookmark]
Title: {title}
Tags: {tags}

[Taxonomy]
{taxonomy}

[Rules]
1. Choose exactly one Category (level 1) and one of its Subcategories (level 2), strictly from the taxonomy.
2. Do not invent new categories.
3. Answer on a single line in the form: Category > Subcategory"#,
            title = record.user_title,
            tags = tags,
            taxonomy = self.taxonomy_json,
        )
    }
}

impl<M: ChatModel> Stage for CategorizeStage<M> {
    type Outcome = Placement;
    const NAME: &'static str = "categorize";

    fn is_done(&self, record: &Record) -> bool {
        record.is_categorized()
    }

    fn carry_over(&self, record: &mut Record, previous: &Record) {
        record.category = previous.category.clone();
        record.subcategory = previous.subcategory.clone();
    }

    async fn compute(&self, record: &Record) -> Placement {
        let tags = record.ai_tags.as_deref().unwrap_or("");

        if let Some(domain) = domain_bucket(tags) {
            return Placement::new(UNSORTED, domain);
        }

        match self
            .model
            .complete(&self.prompt(record, tags), &ChatOptions::default())
            .await
        {
            Ok(answer) => {
                let placement = resolve_answer(&answer, &self.taxonomy);
                debug!(id = record.id, answer = %answer.trim(), category = %placement.category, subcategory = %placement.subcategory, "Categorized");
                placement
            }
            Err(e) => {
                warn!(id = record.id, "Categorization failed, flagged for review: {:#}", e);
                Placement::new(REVIEW_CATEGORY, REVIEW_SUBCATEGORY)
            }
        }
    }

    fn apply(&self, record: &mut Record, outcome: Placement) {
        record.category = Some(outcome.category);
        record.subcategory = Some(outcome.subcategory);
    }
}

/// For domain-fallback tags, the domain that follows the last marker.
fn domain_bucket(tags: &str) -> Option<String> {
    if !tags.contains(DOMAIN_MARKER) {
        return None;
    }
    let domain = tags.rsplit(DOMAIN_MARKER).next().unwrap_or("").trim();
    Some(if domain.is_empty() { GENERAL } else { domain }.to_string())
}

/// Map a free-text model answer onto the tree.
///
/// `Category > Subcategory` is taken as given. Extra levels the model adds
/// (`Science > Physics > Optics`) are dropped, since the tree has only two. A
/// bare token is looked up by substring in tree order: each category name,
/// then that category's subcategories; the first hit wins. Anything else
/// lands in `Miscellaneous`.
pub fn resolve_answer(answer: &str, taxonomy: &Taxonomy) -> Placement {
    let line = answer
        .trim()
        .lines()
        .next()
        .unwrap_or("")
        .replace(['"', '\''], "");
    let line = line.trim();

    match line.split_once('>') {
        Some((category, rest)) => {
            let subcategory = rest.split('>').next().unwrap_or("");
            let (category, subcategory) = (category.trim(), subcategory.trim());
            match (category.is_empty(), subcategory.is_empty()) {
                (false, false) => Placement::new(category, subcategory),
                (false, true) => match_token(category, taxonomy),
                (true, false) => match_token(subcategory, taxonomy),
                (true, true) => Placement::new(MISCELLANEOUS, GENERAL),
            }
        }
        None => match_token(line, taxonomy),
    }
}

fn match_token(token: &str, taxonomy: &Taxonomy) -> Placement {
    if token.is_empty() {
        return Placement::new(MISCELLANEOUS, GENERAL);
    }
    for (category, subcategories) in taxonomy.iter() {
        if category.contains(token) {
            return Placement::new(category, GENERAL);
        }
        if let Some(sub) = subcategories.iter().find(|s| s.contains(token)) {
            return Placement::new(category, sub.as_str());
        }
    }
    Placement::new(MISCELLANEOUS, token)
}

/// `3_tagged.json` + `taxonomy_config.json` → `4_categorized.json`.
pub async fn run<M: ChatModel>(
    settings: &Settings,
    model: M,
    shutdown: impl Future<Output = ()>,
) -> Result<StageReport> {
    let paths = settings.paths();
    let mut records = store::load(&paths.tagged, "tag")?;
    let taxonomy = Taxonomy::load(&paths.taxonomy)?;

    let untagged = records.iter().filter(|r| !r.is_tagged()).count();
    if untagged > 0 {
        warn!(untagged, "Some records have no tags; categorizing them by title only");
    }

    let stage = CategorizeStage::new(model, taxonomy);
    runner::resume(&stage, &mut records, store::load_previous(&paths.categorized)?);
    runner::run_stage(
        &stage,
        &mut records,
        &paths.categorized,
        settings.checkpoint_every,
        shutdown,
    )
    .await
}

#[cfg(test)]
mod tests {
    use std::future::pending;

    use super::*;
    use crate::config::test_settings;
    use crate::error::CurateError;
    use crate::llm::fake::ScriptedModel;
    use crate::stages::taxonomy::parse_answer;

    fn tree(json: &str) -> Taxonomy {
        parse_answer(&format!(r#"{{"Taxonomy": {}}}"#, json)).unwrap()
    }

    fn tagged(id: usize, tags: &str) -> Record {
        let mut r = Record::new(id, format!("https://{}.example", id), format!("Title {}", id));
        r.ai_tags = Some(tags.to_string());
        r
    }

    #[test]
    fn arrow_answers_keep_two_levels() {
        let t = tree(r#"{"Tech": ["AI"]}"#);
        assert_eq!(
            resolve_answer("  \"Tech > AI\"\nBecause it is about AI.", &t),
            Placement::new("Tech", "AI")
        );
        assert_eq!(
            resolve_answer("Science > Physics > Optics", &t),
            Placement::new("Science", "Physics")
        );
        assert_eq!(
            resolve_answer("Tech > > AI", &t),
            Placement::new("Tech", "General")
        );
    }

    #[test]
    fn bare_subcategory_finds_its_category() {
        let t = tree(r#"{"Tech": ["AI", "Web"]}"#);
        assert_eq!(resolve_answer("AI", &t), Placement::new("Tech", "AI"));
    }

    #[test]
    fn bare_category_gets_general() {
        let t = tree(r#"{"Software Engineering": ["Rust"], "Tech": ["AI"]}"#);
        assert_eq!(
            resolve_answer("Engineering", &t),
            Placement::new("Software Engineering", "General")
        );
    }

    #[test]
    fn first_match_in_tree_order_wins() {
        let t = tree(r#"{"Arts": ["Web Design"], "Tech": ["Web"]}"#);
        assert_eq!(resolve_answer("Web", &t), Placement::new("Arts", "Web Design"));
    }

    #[test]
    fn unknown_token_goes_to_miscellaneous() {
        let t = tree(r#"{"Tech": ["AI"]}"#);
        assert_eq!(
            resolve_answer("'Gardening'", &t),
            Placement::new("Miscellaneous", "Gardening")
        );
    }

    #[test]
    fn degenerate_answers_stay_non_empty() {
        let t = tree(r#"{"Tech": ["AI"]}"#);
        assert_eq!(resolve_answer("", &t), Placement::new("Miscellaneous", "General"));
        assert_eq!(resolve_answer(" > ", &t), Placement::new("Miscellaneous", "General"));
        assert_eq!(resolve_answer("> AI", &t), Placement::new("Tech", "AI"));
        assert_eq!(resolve_answer("Tech >", &t), Placement::new("Tech", "General"));
    }

    #[tokio::test]
    async fn domain_fallback_skips_the_model() {
        let model = ScriptedModel::new(Vec::<Option<String>>::new());
        let stage = CategorizeStage::new(&model, tree(r#"{"Tech": ["AI"]}"#));

        assert_eq!(
            stage.compute(&tagged(0, "Domain: example.com")).await,
            Placement::new("Unsorted Websites", "example.com")
        );
        assert_eq!(
            stage.compute(&tagged(1, "Dead Link, Domain: gone.example")).await,
            Placement::new("Unsorted Websites", "gone.example")
        );
        assert_eq!(model.calls(), 0);
    }

    #[tokio::test]
    async fn request_failure_is_flagged_for_review() {
        let model = ScriptedModel::new([None::<String>]);
        let stage = CategorizeStage::new(&model, tree(r#"{"Tech": ["AI"]}"#));
        assert_eq!(
            stage.compute(&tagged(0, "Rust")).await,
            Placement::new("Error", "Manual Review")
        );
    }

    #[tokio::test]
    async fn prompt_shows_the_tree() {
        let model = ScriptedModel::new([Some("Tech > AI")]);
        let stage = CategorizeStage::new(&model, tree(r#"{"Tech": ["AI"]}"#));
        stage.compute(&tagged(0, "Machine Learning")).await;
        let prompt = model.prompts.lock().unwrap()[0].clone();
        assert!(prompt.contains("Tags: Machine Learning"));
        assert!(prompt.contains("\"Tech\""));
        assert!(prompt.contains("Category > Subcategory"));
    }

    #[tokio::test]
    async fn every_record_leaves_with_a_placement() {
        let dir = tempfile::tempdir().unwrap();
        let settings = test_settings(dir.path());
        let paths = settings.paths();
        store::save(
            &paths.tagged,
            &[
                tagged(0, "Machine Learning"),
                tagged(1, "Domain: example.com"),
                tagged(2, "Knitting"),
                tagged(3, "Rust"),
                tagged(4, "Webdev"),
            ],
        )
        .unwrap();
        tree(r#"{"Tech": ["AI", "Web"]}"#).save(&paths.taxonomy).unwrap();

        let model = ScriptedModel::new([Some("Tech > AI"), Some("Crafts"), None, Some("")]);
        let report = run(&settings, &model, pending()).await.unwrap();
        assert_eq!(report.processed, 5);
        assert_eq!(model.calls(), 4);

        let out = store::load(&paths.categorized, "categorize").unwrap();
        let placements: Vec<_> = out
            .iter()
            .map(|r| (r.category.clone().unwrap(), r.subcategory.clone().unwrap()))
            .collect();
        assert_eq!(
            placements,
            vec![
                ("Tech".into(), "AI".into()),
                ("Unsorted Websites".into(), "example.com".into()),
                ("Miscellaneous".into(), "Crafts".into()),
                ("Error".into(), "Manual Review".into()),
                ("Miscellaneous".into(), "General".into()),
            ]
        );
        assert!(out
            .iter()
            .all(|r| !r.category.as_deref().unwrap().is_empty()
                && !r.subcategory.as_deref().unwrap().is_empty()));

        // Nothing left to do on a second run.
        let again = run(&settings, ScriptedModel::new(Vec::<Option<String>>::new()), pending())
            .await
            .unwrap();
        assert_eq!(again.processed, 0);
        assert_eq!(store::load(&paths.categorized, "categorize").unwrap(), out);
    }

    #[tokio::test]
    async fn refuses_to_run_without_taxonomy() {
        let dir = tempfile::tempdir().unwrap();
        let settings = test_settings(dir.path());
        let paths = settings.paths();
        store::save(&paths.tagged, &[tagged(0, "Rust")]).unwrap();

        let model = ScriptedModel::new([Some("Tech > AI")]);
        let err = run(&settings, &model, pending()).await.unwrap_err();
        assert!(matches!(
            err.downcast_ref::<CurateError>(),
            Some(CurateError::MissingTaxonomy { .. })
        ));
        assert_eq!(model.calls(), 0);
        assert!(!paths.categorized.exists());
    }
}
