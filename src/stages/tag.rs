use std::future::Future;

use anyhow::Result;
use tracing::{info, warn};

use crate::bookmarks::domain_of;
use crate::config::Settings;
use crate::llm::{ChatModel, ChatOptions};
use crate::runner::{self, Stage, StageReport};
use crate::store::{self, Record, Status};

/// Titles shorter than this carry too little signal to tag a dead link.
const MIN_DEAD_TITLE_CHARS: usize = 5;
const REFUSAL_MARKERS: &[&str] = &["sorry", "cannot"];

pub struct TagStage<M> {
    model: M,
}

impl<M: ChatModel> TagStage<M> {
    pub fn new(model: M) -> Self {
        Self { model }
    }
}

impl<M: ChatModel> Stage for TagStage<M> {
    type Outcome = String;
    const NAME: &'static str = "tag";

    fn is_done(&self, record: &Record) -> bool {
        record.is_tagged()
    }

    fn carry_over(&self, record: &mut Record, previous: &Record) {
        record.ai_tags = previous.ai_tags.clone();
    }

    async fn compute(&self, record: &Record) -> String {
        let fallback = domain_fallback(&record.url);

        if record.status == Some(Status::Dead)
            && record.user_title.chars().count() < MIN_DEAD_TITLE_CHARS
        {
            return format!("Dead Link, {}", fallback);
        }

        match self
            .model
            .complete(&tag_prompt(record), &ChatOptions::default())
            .await
        {
            Ok(answer) => {
                let tags = accept_tags(&answer).unwrap_or(fallback);
                info!(id = record.id, title = %record.user_title, tags = %tags, "Tagged");
                tags
            }
            Err(e) => {
                warn!(id = record.id, "Tagging failed: {:#}", e);
                fallback
            }
        }
    }

    fn apply(&self, record: &mut Record, outcome: String) {
        record.ai_tags = Some(outcome);
    }
}

pub fn domain_fallback(url: &str) -> String {
    format!("Domain: {}", domain_of(url))
}

/// Clean a model answer; `None` when it is too short or a refusal.
pub fn accept_tags(answer: &str) -> Option<String> {
    let cleaned = answer.trim().replace(['"', '\''], "");
    let lowered = cleaned.to_lowercase();
    if cleaned.chars().count() < 2 || REFUSAL_MARKERS.iter().any(|m| lowered.contains(m)) {
        None
    } else {
        Some(cleaned)
    }
}

fn tag_prompt(record: &Record) -> String {
    let or_na = |field: &Option<String>| field.clone().unwrap_or_else(|| "N/A".to_string());
    format!(
        r#"You are a smart bookmark organizer.

[Task]
Identify what this bookmark is fundamentally about, using the context below.

[Context]
- User's Bookmark Title: {user_title}
- Page Meta Title: {site_title}
- URL: {url}
- SEO Keywords: {keywords}
- Content Summary: {description}

[Rules]
1. Trust the User's Bookmark Title the most. It shows why the user saved the page.
2. Output ONLY the tags, separated by commas.
3. No introductions, explanations or sentences such as "Here are the tags".

[Example Output]
Python, Data Visualization, Matplotlib"#,
        user_title = record.user_title,
        site_title = or_na(&record.site_title),
        url = record.url,
        keywords = or_na(&record.seo_keywords),
        description = or_na(&record.seo_description),
    )
}

/// `2_enriched.json` → `3_tagged.json`.
pub async fn run<M: ChatModel>(
    settings: &Settings,
    model: M,
    shutdown: impl Future<Output = ()>,
) -> Result<StageReport> {
    let paths = settings.paths();
    let mut records = store::load(&paths.enriched, "enrich")?;
    let unenriched = records.iter().filter(|r| !r.is_enriched()).count();
    if unenriched > 0 {
        warn!(unenriched, "Some records were never enriched; tagging them from title and URL only");
    }
    let stage = TagStage::new(model);
    runner::resume(&stage, &mut records, store::load_previous(&paths.tagged)?);
    runner::run_stage(
        &stage,
        &mut records,
        &paths.tagged,
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
    use crate::llm::fake::ScriptedModel;

    #[test]
    fn cleaning_and_rejection() {
        assert_eq!(
            accept_tags("  \"Rust\", 'Async', Tokio \n").as_deref(),
            Some("Rust, Async, Tokio")
        );
        assert_eq!(accept_tags("x"), None);
        assert_eq!(accept_tags("  \"\" "), None);
        assert_eq!(accept_tags("Sorry, I can't help with that"), None);
        assert_eq!(accept_tags("I CANNOT determine tags"), None);
    }

    #[test]
    fn prompt_carries_context() {
        let mut record = Record::new(0, "https://tokio.rs", "tokio docs");
        record.seo_keywords = Some("async, rust".into());
        let prompt = tag_prompt(&record);
        assert!(prompt.contains("User's Bookmark Title: tokio docs"));
        assert!(prompt.contains("Page Meta Title: N/A"));
        assert!(prompt.contains("SEO Keywords: async, rust"));
        assert!(prompt.contains("URL: https://tokio.rs"));
    }

    #[tokio::test]
    async fn dead_link_with_short_title_skips_the_model() {
        let model = ScriptedModel::new(Vec::<Option<String>>::new());
        let stage = TagStage::new(&model);
        let mut record = Record::new(0, "https://gone.example/x", "gone");
        record.status = Some(Status::Dead);

        assert_eq!(stage.compute(&record).await, "Dead Link, Domain: gone.example");
        assert_eq!(model.calls(), 0);
    }

    #[tokio::test]
    async fn dead_link_with_real_title_is_still_tagged() {
        let model = ScriptedModel::new([Some("Recipes, Baking")]);
        let stage = TagStage::new(&model);
        let mut record = Record::new(0, "https://gone.example/x", "Grandma's bread recipe");
        record.status = Some(Status::Dead);

        assert_eq!(stage.compute(&record).await, "Recipes, Baking");
    }

    #[tokio::test]
    async fn failures_fall_back_to_domain() {
        let model = ScriptedModel::new([None, Some("sorry, cannot do that"), Some("-")]);
        let stage = TagStage::new(&model);
        let record = Record::new(0, "https://example.com/page", "Some page");

        for _ in 0..3 {
            assert_eq!(stage.compute(&record).await, "Domain: example.com");
        }
    }

    #[tokio::test]
    async fn stage_tags_untagged_records_only() {
        let dir = tempfile::tempdir().unwrap();
        let settings = test_settings(dir.path());
        let paths = settings.paths();

        let mut records = vec![
            Record::new(0, "https://a.example", "Rust book"),
            Record::new(1, "https://b.example", "Already done"),
        ];
        records[0].status = Some(Status::Alive);
        records[1].status = Some(Status::Alive);
        records[1].ai_tags = Some("Existing".into());
        store::save(&paths.enriched, &records).unwrap();

        let model = ScriptedModel::new([Some("Rust, Programming")]);
        let report = run(&settings, &model, pending()).await.unwrap();
        assert_eq!(report.processed, 1);
        assert_eq!(model.calls(), 1);

        let out = store::load(&paths.tagged, "tag").unwrap();
        assert_eq!(out[0].ai_tags.as_deref(), Some("Rust, Programming"));
        assert_eq!(out[1].ai_tags.as_deref(), Some("Existing"));
    }
}
