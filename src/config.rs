use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{Context, Result};
use config::{Config, Environment, File};
use serde::Deserialize;

const CHROME_USER_AGENT: &str = "Mozilla/5.0 (Macintosh; Intel Mac OS X 10_15_7) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/124.0.0.0 Safari/537.36";

/// Everything a stage needs to know about its environment. Built once in
/// `main` and handed to each stage.
#[derive(Debug, Clone, Deserialize)]
pub struct Settings {
    pub data_dir: PathBuf,
    pub input_html: String,
    pub output_html: String,
    pub model: String,
    pub llm_base_url: String,
    pub llm_api_key: Option<String>,
    pub http_timeout_secs: u64,
    pub inference_timeout_secs: u64,
    pub checkpoint_every: usize,
    pub taxonomy_sample_size: usize,
    pub user_agent: String,
}

impl Settings {
    /// Defaults, then `curator.toml` if present, then `CURATOR_*` env vars.
    pub fn load() -> Result<Self> {
        let settings = Config::builder()
            .set_default("data_dir", ".")?
            .set_default("input_html", "bookmarks.html")?
            .set_default("output_html", "final_bookmarks.html")?
            .set_default("model", "qwen2.5:3b")?
            .set_default("llm_base_url", "http://localhost:11434/v1")?
            .set_default("http_timeout_secs", 15_i64)?
            .set_default("inference_timeout_secs", 300_i64)?
            .set_default("checkpoint_every", 10_i64)?
            .set_default("taxonomy_sample_size", 500_i64)?
            .set_default("user_agent", CHROME_USER_AGENT)?
            .add_source(File::with_name("curator").required(false))
            .add_source(Environment::with_prefix("CURATOR"))
            .build()
            .context("Failed to load settings")?;

        let settings: Settings = settings
            .try_deserialize()
            .context("Invalid settings")?;
        anyhow::ensure!(settings.checkpoint_every > 0, "checkpoint_every must be positive");
        Ok(settings)
    }

    pub fn http_timeout(&self) -> Duration {
        Duration::from_secs(self.http_timeout_secs)
    }

    pub fn inference_timeout(&self) -> Duration {
        Duration::from_secs(self.inference_timeout_secs)
    }

    pub fn paths(&self) -> Paths {
        Paths::new(&self.data_dir, &self.input_html, &self.output_html)
    }
}

/// Stage files inside the data directory.
#[derive(Debug, Clone)]
pub struct Paths {
    pub input_html: PathBuf,
    pub raw: PathBuf,
    pub enriched: PathBuf,
    pub tagged: PathBuf,
    pub taxonomy: PathBuf,
    pub categorized: PathBuf,
    pub output_html: PathBuf,
}

impl Paths {
    pub fn new(dir: &Path, input_html: &str, output_html: &str) -> Self {
        Self {
            input_html: dir.join(input_html),
            raw: dir.join("1_raw.json"),
            enriched: dir.join("2_enriched.json"),
            tagged: dir.join("3_tagged.json"),
            taxonomy: dir.join("taxonomy_config.json"),
            categorized: dir.join("4_categorized.json"),
            output_html: dir.join(output_html),
        }
    }
}

#[cfg(test)]
pub(crate) fn test_settings(dir: &Path) -> Settings {
    Settings {
        data_dir: dir.to_path_buf(),
        input_html: "bookmarks.html".into(),
        output_html: "final_bookmarks.html".into(),
        model: "test-model".into(),
        llm_base_url: "http://localhost:0/v1".into(),
        llm_api_key: None,
        http_timeout_secs: 1,
        inference_timeout_secs: 1,
        checkpoint_every: 10,
        taxonomy_sample_size: 500,
        user_agent: CHROME_USER_AGENT.into(),
    }
}
