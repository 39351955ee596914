//! Live-site metadata: one browser-like GET per bookmark, classified into a
//! liveness status.

use std::future::Future;
use std::sync::LazyLock;

use anyhow::{Context, Result};
use reqwest::header::{self, HeaderMap, HeaderValue};
use scraper::{Html, Selector};

use crate::bookmarks::truncate_chars;
use crate::config::Settings;
use crate::store::{Record, Status};

const SOFT_404_INDICATORS: &[&str] = &[
    "domain for sale",
    "domain expired",
    "404 not found",
    "page not found",
    "godaddy",
];
const BLOCKED_CODES: &[u16] = &[401, 403, 406, 429, 503];
const META_MAX_CHARS: usize = 800;
const ERROR_DETAIL_MAX_CHARS: usize = 30;

static TITLE_SELECTOR: LazyLock<Selector> = LazyLock::new(|| Selector::parse("title").unwrap());
static KEYWORDS_SELECTOR: LazyLock<Selector> =
    LazyLock::new(|| Selector::parse(r#"meta[name="keywords"]"#).unwrap());
static DESCRIPTION_SELECTOR: LazyLock<Selector> =
    LazyLock::new(|| Selector::parse(r#"meta[name="description"]"#).unwrap());
static OG_DESCRIPTION_SELECTOR: LazyLock<Selector> =
    LazyLock::new(|| Selector::parse(r#"meta[property="og:description"]"#).unwrap());

/// What came back from a GET. The body is only read for 2xx responses.
#[derive(Debug, Clone)]
pub struct PageResponse {
    pub status: u16,
    pub body: Option<String>,
}

pub trait PageFetcher {
    fn fetch(&self, url: &str) -> impl Future<Output = Result<PageResponse>> + Send;
}

impl<T: PageFetcher> PageFetcher for &T {
    fn fetch(&self, url: &str) -> impl Future<Output = Result<PageResponse>> + Send {
        (**self).fetch(url)
    }
}

/// reqwest client dressed up as desktop Chrome. Certificates are not
/// verified: bookmarks point at arbitrary third-party sites.
///
/// Only the HTTP layer looks like Chrome. The TLS handshake is plain rustls,
/// so sites that fingerprint the handshake may still answer 403 and end up
/// `alive_but_blocked`. Bodies are decoded with the charset the response
/// declares, falling back to UTF-8.
pub struct HttpFetcher {
    client: reqwest::Client,
}

impl HttpFetcher {
    pub fn new(settings: &Settings) -> Result<Self> {
        let client = reqwest::Client::builder()
            .user_agent(&settings.user_agent)
            .default_headers(browser_headers())
            .timeout(settings.http_timeout())
            .danger_accept_invalid_certs(true)
            .cookie_store(true)
            .gzip(true)
            .brotli(true)
            .build()
            .context("Failed to create HTTP client")?;
        Ok(Self { client })
    }
}

fn browser_headers() -> HeaderMap {
    let mut headers = HeaderMap::new();
    headers.insert(
        header::ACCEPT,
        HeaderValue::from_static(
            "text/html,application/xhtml+xml,application/xml;q=0.9,image/avif,image/webp,*/*;q=0.8",
        ),
    );
    headers.insert(
        header::ACCEPT_LANGUAGE,
        HeaderValue::from_static("en-US,en;q=0.9"),
    );
    headers.insert(
        header::UPGRADE_INSECURE_REQUESTS,
        HeaderValue::from_static("1"),
    );
    headers.insert(
        "sec-ch-ua",
        HeaderValue::from_static(
            r#""Chromium";v="124", "Google Chrome";v="124", "Not-A.Brand";v="99""#,
        ),
    );
    headers.insert("sec-ch-ua-mobile", HeaderValue::from_static("?0"));
    headers.insert("sec-ch-ua-platform", HeaderValue::from_static(r#""macOS""#));
    headers.insert("sec-fetch-dest", HeaderValue::from_static("document"));
    headers.insert("sec-fetch-mode", HeaderValue::from_static("navigate"));
    headers.insert("sec-fetch-site", HeaderValue::from_static("none"));
    headers.insert("sec-fetch-user", HeaderValue::from_static("?1"));
    headers
}

impl PageFetcher for HttpFetcher {
    async fn fetch(&self, url: &str) -> Result<PageResponse> {
        let response = self.client.get(url).send().await?;
        let status = response.status();
        let body = if status.is_success() {
            Some(response.text().await?)
        } else {
            None
        };
        Ok(PageResponse {
            status: status.as_u16(),
            body,
        })
    }
}

/// Enrichment fields for one record; written back by [`Enrichment::apply`].
#[derive(Debug, Clone, PartialEq)]
pub struct Enrichment {
    pub status: Status,
    pub site_title: Option<String>,
    pub seo_keywords: Option<String>,
    pub seo_description: Option<String>,
    pub error_detail: Option<String>,
}

impl Enrichment {
    fn status(status: Status) -> Self {
        Self {
            status,
            site_title: None,
            seo_keywords: None,
            seo_description: None,
            error_detail: None,
        }
    }

    /// Transport or decode failure.
    pub fn failed(err: &anyhow::Error) -> Self {
        Self {
            error_detail: Some(truncate_chars(&short_cause(err), ERROR_DETAIL_MAX_CHARS)),
            ..Self::status(Status::Error)
        }
    }

    pub fn apply(self, record: &mut Record) {
        record.status = Some(self.status);
        record.site_title = self.site_title;
        record.seo_keywords = self.seo_keywords;
        record.seo_description = self.seo_description;
        record.error_detail = self.error_detail;
    }
}

/// Map an HTTP response to a status. Rules are checked in order.
pub fn classify(response: &PageResponse, user_title: &str) -> Enrichment {
    match response.status {
        404 | 410 => Enrichment::status(Status::Dead),
        code if BLOCKED_CODES.contains(&code) => Enrichment {
            site_title: Some(user_title.to_string()),
            ..Enrichment::status(Status::AliveButBlocked)
        },
        200..=299 => classify_page(response.body.as_deref().unwrap_or("")),
        code => Enrichment::status(Status::Unknown(code)),
    }
}

fn classify_page(body: &str) -> Enrichment {
    let document = Html::parse_document(body);
    let title = document
        .select(&TITLE_SELECTOR)
        .next()
        .map(|el| el.text().collect::<String>().trim().to_string())
        .unwrap_or_default();

    let lowered = title.to_lowercase();
    if SOFT_404_INDICATORS.iter().any(|ind| lowered.contains(ind)) {
        return Enrichment::status(Status::Dead);
    }

    let meta_content = |selector: &Selector| {
        document
            .select(selector)
            .next()
            .map(|el| truncate_chars(el.value().attr("content").unwrap_or(""), META_MAX_CHARS))
    };
    let keywords = meta_content(&KEYWORDS_SELECTOR).unwrap_or_default();
    let description = meta_content(&DESCRIPTION_SELECTOR)
        .or_else(|| meta_content(&OG_DESCRIPTION_SELECTOR))
        .unwrap_or_default();

    Enrichment {
        site_title: Some(title),
        seo_keywords: Some(keywords),
        seo_description: Some(description),
        ..Enrichment::status(Status::Alive)
    }
}

/// The innermost error message, which for reqwest is the informative one
/// ("dns error", "connection refused", ...).
fn short_cause(err: &anyhow::Error) -> String {
    if let Some(req) = err.downcast_ref::<reqwest::Error>() {
        if req.is_timeout() {
            return "timeout".to_string();
        }
    }
    err.chain()
        .last()
        .map(|cause| cause.to_string())
        .unwrap_or_else(|| err.to_string())
}
