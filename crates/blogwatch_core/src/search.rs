use std::time::Duration;

use anyhow::{Context, Result, bail};
use reqwest::Url;
use reqwest::blocking::Client;
use serde::Deserialize;
use tracing::debug;

use crate::config::{SearchCredentials, SearchSection};

/// One page of blog search results.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SearchPage {
    pub display: usize,
    /// `None` when the payload carried no `items` key at all.
    pub items: Option<Vec<SearchItem>>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
pub struct SearchItem {
    #[serde(default)]
    pub title: String,
    #[serde(default)]
    pub link: String,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub bloggername: String,
    #[serde(default)]
    pub postdate: String,
}

pub trait BlogSearchApi {
    fn search_page(&mut self, query: &str, start: usize, display: usize) -> Result<SearchPage>;
    fn request_count(&self) -> usize;
}

#[derive(Debug, Clone)]
pub struct NaverSearchConfig {
    pub url: String,
    pub user_agent: String,
    pub timeout_ms: u64,
}

impl NaverSearchConfig {
    pub fn from_section(section: &SearchSection) -> Self {
        Self {
            url: section.url.clone(),
            user_agent: section.user_agent.clone(),
            timeout_ms: section.timeout_ms,
        }
    }
}

pub struct NaverSearchClient {
    client: Client,
    config: NaverSearchConfig,
    credentials: SearchCredentials,
    request_count: usize,
}

impl NaverSearchClient {
    pub fn new(config: NaverSearchConfig, credentials: SearchCredentials) -> Result<Self> {
        let client = Client::builder()
            .timeout(Duration::from_millis(config.timeout_ms))
            .build()
            .context("failed to build search HTTP client")?;
        Ok(Self {
            client,
            config,
            credentials,
            request_count: 0,
        })
    }
}

impl BlogSearchApi for NaverSearchClient {
    fn search_page(
        &mut self,
        query: &str,
        start: usize,
        page_size: usize,
    ) -> Result<SearchPage> {
        let url = Url::parse(&self.config.url)
            .with_context(|| format!("invalid search URL: {}", self.config.url))?;
        let params = [
            ("query", query.to_string()),
            ("display", page_size.to_string()),
            ("start", start.to_string()),
            ("sort", "date".to_string()),
        ];

        debug!(query, start, page_size, "requesting blog search page");
        self.request_count += 1;
        let response = self
            .client
            .get(url)
            .header("User-Agent", self.config.user_agent.clone())
            .header("X-Naver-Client-Id", self.credentials.client_id.clone())
            .header("X-Naver-Client-Secret", self.credentials.client_secret.clone())
            .query(&params)
            .send()
            .context("failed to call blog search API")?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().unwrap_or_default();
            bail!("blog search request failed with HTTP {status}: {body}");
        }

        let payload: SearchResponse = response
            .json()
            .context("failed to decode blog search JSON response")?;
        Ok(payload.into_page())
    }

    fn request_count(&self) -> usize {
        self.request_count
    }
}

#[derive(Debug, Deserialize, Default)]
struct SearchResponse {
    #[serde(default)]
    display: usize,
    items: Option<Vec<SearchItem>>,
}

impl SearchResponse {
    fn into_page(self) -> SearchPage {
        SearchPage {
            display: self.display,
            items: self.items,
        }
    }
}
