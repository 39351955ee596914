use std::future::Future;

use anyhow::Result;
use tracing::{debug, warn};

use crate::config::Settings;
use crate::fetcher::{classify, Enrichment, PageFetcher};
use crate::runner::{self, Stage, StageReport};
use crate::store::{self, Record};

pub struct EnrichStage<F> {
    fetcher: F,
}

impl<F: PageFetcher> EnrichStage<F> {
    pub fn new(fetcher: F) -> Self {
        Self { fetcher }
    }
}

impl<F: PageFetcher> Stage for EnrichStage<F> {
    type Outcome = Enrichment;
    const NAME: &'static str = "enrich";

    fn is_done(&self, record: &Record) -> bool {
        record.is_enriched()
    }

    fn carry_over(&self, record: &mut Record, previous: &Record) {
        record.status = previous.status;
        record.site_title = previous.site_title.clone();
        record.seo_keywords = previous.seo_keywords.clone();
        record.seo_description = previous.seo_description.clone();
        record.error_detail = previous.error_detail.clone();
    }

    async fn compute(&self, record: &Record) -> Enrichment {
        match self.fetcher.fetch(&record.url).await {
            Ok(response) => {
                let enrichment = classify(&response, &record.user_title);
                debug!(id = record.id, http = response.status, status = %enrichment.status, "Fetched");
                enrichment
            }
            Err(e) => {
                warn!(id = record.id, url = %record.url, "Fetch failed: {:#}", e);
                Enrichment::failed(&e)
            }
        }
    }

    fn apply(&self, record: &mut Record, outcome: Enrichment) {
        outcome.apply(record);
    }
}

/// `1_raw.json` → `2_enriched.json`, resuming from an earlier partial run.
pub async fn run<F: PageFetcher>(
    settings: &Settings,
    fetcher: F,
    shutdown: impl Future<Output = ()>,
) -> Result<StageReport> {
    let paths = settings.paths();
    let mut records = store::load(&paths.raw, "ingest")?;
    let stage = EnrichStage::new(fetcher);
    runner::resume(&stage, &mut records, store::load_previous(&paths.enriched)?);
    runner::run_stage(
        &stage,
        &mut records,
        &paths.enriched,
        settings.checkpoint_every,
        shutdown,
    )
    .await
}
