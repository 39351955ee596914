//! Helpers shared by the stages that read or write bookmark HTML.

use std::sync::LazyLock;

use scraper::{Html, Selector};
use url::Url;

static ANCHOR_SELECTOR: LazyLock<Selector> =
    LazyLock::new(|| Selector::parse("a[href]").unwrap());

/// An `<a>` element from a bookmark export.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Anchor {
    pub href: String,
    pub text: String,
}

/// All anchors whose `href` starts with `http`, in document order.
pub fn http_anchors(html: &str) -> Vec<Anchor> {
    let document = Html::parse_document(html);
    document
        .select(&ANCHOR_SELECTOR)
        .filter_map(|el| {
            let href = el.value().attr("href")?;
            if !href.starts_with("http") {
                return None;
            }
            Some(Anchor {
                href: href.to_string(),
                text: el.text().collect::<String>().trim().to_string(),
            })
        })
        .collect()
}

/// `host[:port]` of a URL, for domain fallbacks.
pub fn domain_of(url: &str) -> String {
    match Url::parse(url) {
        Ok(parsed) => match (parsed.host_str(), parsed.port()) {
            (Some(host), Some(port)) => format!("{}:{}", host, port),
            (Some(host), None) => host.to_string(),
            (None, _) => "Unknown Domain".to_string(),
        },
        Err(_) => "Invalid URL".to_string(),
    }
}

/// Escape text for embedding in bookmark HTML, attributes included.
pub fn escape(s: &str) -> String {
    let mut out = String::with_capacity(s.len());
    for c in s.chars() {
        match c {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            '"' => out.push_str("&quot;"),
            '\'' => out.push_str("&#x27;"),
            _ => out.push(c),
        }
    }
    out
}

/// First `max` characters of `s`.
pub fn truncate_chars(s: &str, max: usize) -> String {
    s.chars().take(max).collect()
}
