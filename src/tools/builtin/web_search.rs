//! `web_search` tool: search the web or scrape one page on request.

use async_trait::async_trait;

use crate::error::{DasiError, Result};
use crate::sidechannel::{QueryContext, SearchMode, WebSearchResolver};
use crate::tools::arguments::ToolArguments;
use crate::tools::tool::{Tool, ToolExecutionContext};
use crate::tools::types::ToolParameters;

pub const NAME: &str = "web_search";

pub struct WebSearchTool {
    resolver: WebSearchResolver,
    parameters: ToolParameters,
}

impl WebSearchTool {
    pub fn new(resolver: WebSearchResolver) -> Self {
        Self {
            resolver,
            parameters: ToolParameters::object()
                .string("query", "The search query or question to answer", true)
                .string_enum(
                    "mode",
                    "web_search to search the web, link_scrape to read one URL",
                    &["web_search", "link_scrape"],
                    false,
                )
                .string("url", "The URL to scrape (required for link_scrape)", false)
                .build(),
        }
    }

    fn context(args: &ToolArguments) -> Result<QueryContext> {
        let query = args.get_non_empty_str("query")?.to_string();
        let mode = match args.get_str_opt("mode") {
            Some(raw) => raw.parse::<SearchMode>().map_err(|_| {
                DasiError::InvalidArgument(format!(
                    "Invalid mode: {raw}. Must be 'web_search' or 'link_scrape'."
                ))
            })?,
            None => SearchMode::WebSearch,
        };
        let url = args.get_str_opt("url").map(str::to_string);
        if mode == SearchMode::LinkScrape && url.is_none() {
            return Err(DasiError::InvalidArgument(
                "URL parameter is required for link_scrape mode.".into(),
            ));
        }
        Ok(QueryContext {
            mode: Some(mode),
            original_query: query.clone(),
            query,
            url,
        })
    }
}

#[async_trait]
impl Tool for WebSearchTool {
    fn name(&self) -> &str {
        NAME
    }

    fn description(&self) -> &str {
        "Search the web for current information, or read the content of a specific URL"
    }

    fn parameters(&self) -> &ToolParameters {
        &self.parameters
    }

    async fn execute(
        &self,
        args: &ToolArguments,
        _ctx: &ToolExecutionContext,
    ) -> Result<serde_json::Value> {
        let ctx = Self::context(args)?;
        let outcome = self.resolver.resolve(&ctx).await;
        if !outcome.is_success() {
            return Err(DasiError::tool(NAME, outcome.data));
        }
        Ok(serde_json::json!({
            "status": "success",
            "data": outcome.data,
        }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    use crate::sidechannel::{ScrapedPage, SearchHit, SearchProvider};

    struct OneHit;

    #[async_trait]
    impl SearchProvider for OneHit {
        async fn search(&self, query: &str, _max: usize) -> Result<Vec<SearchHit>> {
            Ok(vec![SearchHit {
                title: format!("About {query}"),
                link: "https://example.com".into(),
                snippet: "15°C, cloudy".into(),
            }])
        }

        async fn scrape(&self, _urls: &[String]) -> Result<Vec<ScrapedPage>> {
            Ok(vec![])
        }
    }

    fn tool() -> WebSearchTool {
        WebSearchTool::new(WebSearchResolver::new(Arc::new(OneHit)))
    }

    async fn run(args: serde_json::Value) -> Result<serde_json::Value> {
        tool()
            .execute(&ToolArguments::new(args), &ToolExecutionContext::default())
            .await
    }

    #[tokio::test]
    async fn search_returns_formatted_results() {
        let value = run(serde_json::json!({"query": "weather in Paris"})).await.unwrap();
        let data = value["data"].as_str().unwrap();
        assert!(data.contains("1. About weather in Paris"));
        assert!(data.contains("Snippet: 15°C, cloudy"));
    }

    #[tokio::test]
    async fn empty_query_is_rejected() {
        let err = run(serde_json::json!({"query": "  "})).await.unwrap_err();
        assert!(matches!(err, DasiError::InvalidArgument(_)));
    }

    #[tokio::test]
    async fn link_scrape_requires_url() {
        let err = run(serde_json::json!({"query": "summarize", "mode": "link_scrape"}))
            .await
            .unwrap_err();
        assert!(err.to_string().contains("URL parameter is required"));
    }

    #[tokio::test]
    async fn unknown_mode_is_rejected() {
        let err = run(serde_json::json!({"query": "x", "mode": "images"})).await.unwrap_err();
        assert!(err.to_string().contains("Invalid mode: images"));
    }

    #[tokio::test]
    async fn scrape_failure_is_a_tool_error() {
        let err = run(serde_json::json!({
            "query": "summarize",
            "mode": "link_scrape",
            "url": "https://example.com/post"
        }))
        .await
        .unwrap_err();
        assert!(matches!(err, DasiError::ToolExecution { .. }));
    }
}
