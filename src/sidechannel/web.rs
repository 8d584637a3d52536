//! Web search and link scraping side channel.

use std::sync::{Arc, OnceLock};

use async_trait::async_trait;
use regex::Regex;
use serde::{Deserialize, Serialize};
use strum::{Display, EnumString};
use tracing::{debug, info, warn};

use crate::error::Result;
use crate::prompts::{SCRAPED_CONTENT_INSTRUCTION, WEB_SEARCH_RESULTS_INSTRUCTION};

use super::ResolverOutcome;

const SEARCH_CONTENT_MAX_CHARS: usize = 2_000;
const SCRAPE_CONTENT_MAX_CHARS: usize = 10_000;
const DEFAULT_MAX_RESULTS: usize = 5;

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Display, EnumString)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum SearchMode {
    WebSearch,
    LinkScrape,
}

impl SearchMode {
    fn describe(self) -> &'static str {
        match self {
            Self::WebSearch => "web search",
            Self::LinkScrape => "link scrape",
        }
    }
}

/// A ranked search result.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct SearchHit {
    pub title: String,
    pub link: String,
    pub snippet: String,
}

/// Text extracted from a fetched page.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ScrapedPage {
    pub source: String,
    pub content: String,
}

/// Concrete search backends (search APIs, HTML scraping) live outside this crate.
#[async_trait]
pub trait SearchProvider: Send + Sync {
    async fn search(&self, query: &str, max_results: usize) -> Result<Vec<SearchHit>>;
    async fn scrape(&self, urls: &[String]) -> Result<Vec<ScrapedPage>>;
}

/// What the user's query asks of the web side channel.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct QueryContext {
    pub mode: Option<SearchMode>,
    /// Query with any `#web` / `#URL` marker removed.
    pub query: String,
    pub url: Option<String>,
    pub original_query: String,
}

fn bare_url_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"(?:^|[^#])(https?://\S+)").expect("url detection regex must compile"))
}

fn hash_url_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"#(https?://\S+)").expect("url detection regex must compile"))
}

impl QueryContext {
    fn plain(query: &str) -> Self {
        Self {
            mode: None,
            query: query.to_string(),
            url: None,
            original_query: query.to_string(),
        }
    }

    /// Work out whether `query` needs a search or scrape. `web_requested` is
    /// the caller's explicit web-search toggle.
    pub fn detect(query: &str, web_requested: bool) -> Self {
        let mut ctx = Self::plain(query);

        if let Some(url) = bare_url_re().captures(query).and_then(|c| c.get(1)) {
            let url = url.as_str();
            if url.len() > 15 && url.contains('.') {
                ctx.mode = Some(SearchMode::LinkScrape);
                ctx.url = Some(url.to_string());
                return ctx;
            }
        }

        if let Some(url) = hash_url_re().captures(query).and_then(|c| c.get(1)) {
            let url = url.as_str();
            ctx.mode = Some(SearchMode::LinkScrape);
            ctx.url = Some(url.to_string());
            ctx.query = query.replacen(&format!("#{url}"), "", 1).trim().to_string();
            return ctx;
        }

        if let Some(rest) = query.trim_start().strip_prefix("#web ") {
            ctx.mode = Some(SearchMode::WebSearch);
            ctx.query = rest.trim().to_string();
            return ctx;
        }

        if query.contains("#web") {
            ctx.mode = Some(SearchMode::WebSearch);
            ctx.query = query.replace("#web", "").trim().to_string();
            return ctx;
        }

        if web_requested {
            ctx.mode = Some(SearchMode::WebSearch);
        }
        ctx
    }

    pub fn needs_web(&self) -> bool {
        self.mode.is_some()
    }

    /// User turn to send when the lookup failed.
    pub fn failure_query(&self, error: &str) -> String {
        let mode = self.mode.unwrap_or(SearchMode::WebSearch).describe();
        format!(
            "I tried to perform a {mode} based on the query '{q}' but encountered an error: {error}. Please answer the original query '{q}' without the web results.",
            q = self.original_query
        )
    }
}

/// Runs searches/scrapes through a [`SearchProvider`] and formats the results
/// as a prompt block.
#[derive(Clone)]
pub struct WebSearchResolver {
    provider: Option<Arc<dyn SearchProvider>>,
    max_results: usize,
}

impl WebSearchResolver {
    pub fn new(provider: Arc<dyn SearchProvider>) -> Self {
        Self {
            provider: Some(provider),
            max_results: DEFAULT_MAX_RESULTS,
        }
    }

    /// A resolver with no backend; every lookup reports an error.
    pub fn unconfigured() -> Self {
        Self {
            provider: None,
            max_results: DEFAULT_MAX_RESULTS,
        }
    }

    pub fn with_max_results(mut self, max_results: usize) -> Self {
        self.max_results = max_results.max(1);
        self
    }

    pub fn is_configured(&self) -> bool {
        self.provider.is_some()
    }

    pub async fn resolve(&self, ctx: &QueryContext) -> ResolverOutcome {
        let Some(mode) = ctx.mode else {
            return ResolverOutcome::error("No web search was requested.");
        };
        let Some(provider) = self.provider.as_ref() else {
            warn!("web lookup requested but no search provider is configured");
            return ResolverOutcome::error(
                "No search providers are configured. Please add API keys in settings.",
            );
        };

        let outcome = match mode {
            SearchMode::WebSearch => self.search(provider.as_ref(), ctx).await,
            SearchMode::LinkScrape => match ctx.url.as_deref() {
                Some(url) => scrape(provider.as_ref(), url, &ctx.query).await,
                None => ResolverOutcome::error("URL parameter is required for link_scrape mode."),
            },
        };
        info!(mode = %mode, success = outcome.is_success(), "web side channel resolved");
        outcome
    }

    async fn search(&self, provider: &dyn SearchProvider, ctx: &QueryContext) -> ResolverOutcome {
        let hits = match provider.search(&ctx.query, self.max_results).await {
            Ok(hits) => hits,
            Err(e) => return ResolverOutcome::error(e.to_string()),
        };
        if hits.is_empty() {
            return ResolverOutcome::error("No search results found.");
        }

        let urls: Vec<String> = hits.iter().map(|h| h.link.clone()).collect();
        let pages = match provider.scrape(&urls).await {
            Ok(pages) => pages,
            Err(e) => {
                debug!(error = %e, "scraping search hits failed; using snippets only");
                Vec::new()
            }
        };

        let mut text = String::from("=====WEB_SEARCH_RESULTS=====<results from web search>\nSearch Results:\n");
        for (i, hit) in hits.iter().enumerate() {
            text.push_str(&format!(
                "{}. {}\n   URL: {}\n   Snippet: {}\n\n",
                i + 1,
                hit.title,
                hit.link,
                hit.snippet
            ));
        }
        if !pages.is_empty() {
            text.push_str("Scraped Content:\n");
            for (i, page) in pages.iter().enumerate() {
                text.push_str(&format!(
                    "Document {} from {}:\n{}\n\n",
                    i + 1,
                    page.source,
                    truncate_chars(&page.content, SEARCH_CONTENT_MAX_CHARS)
                ));
            }
        }
        text.push_str("=======================\n\n");
        text.push_str(&format!(
            "Based on the web search results above, please answer: {}",
            ctx.original_query
        ));

        ResolverOutcome::success(text, Some(WEB_SEARCH_RESULTS_INSTRUCTION.to_string()))
    }
}

async fn scrape(provider: &dyn SearchProvider, url: &str, query: &str) -> ResolverOutcome {
    let pages = match provider.scrape(&[url.to_string()]).await {
        Ok(pages) => pages,
        Err(e) => return ResolverOutcome::error(e.to_string()),
    };
    if pages.is_empty() {
        return ResolverOutcome::error(format!("No content could be scraped from the URL: {url}"));
    }

    let mut text = String::from("=====SCRAPED_CONTENT=====<content from the provided URL>\n");
    for page in &pages {
        text.push_str(&format!(
            "Content from {}:\n{}\n\n",
            page.source,
            truncate_chars(&page.content, SCRAPE_CONTENT_MAX_CHARS)
        ));
    }
    text.push_str("=======================\n\n");
    text.push_str(&format!(
        "Based on the scraped content above from {url}, please answer: {query}"
    ));

    ResolverOutcome::success(text, Some(SCRAPED_CONTENT_INSTRUCTION.to_string()))
}

fn truncate_chars(content: &str, max_chars: usize) -> String {
    match content.char_indices().nth(max_chars) {
        Some((cut, _)) => format!("{}... (content truncated)", &content[..cut]),
        None => content.to_string(),
    }
}

impl std::fmt::Debug for WebSearchResolver {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WebSearchResolver")
            .field("configured", &self.is_configured())
            .field("max_results", &self.max_results)
            .finish()
    }
}
