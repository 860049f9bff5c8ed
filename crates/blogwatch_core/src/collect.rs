use std::sync::OnceLock;

use anyhow::{Context, Result, bail};
use chrono::{Days, NaiveDate};
use regex::Regex;
use serde::Serialize;
use tracing::{info, warn};

use crate::config::ReportConfig;
use crate::search::BlogSearchApi;

const POSTDATE_FORMAT: &str = "%Y%m%d";

/// Inclusive date range covered by one report.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct ReportWindow {
    pub start: NaiveDate,
    pub end: NaiveDate,
}

impl ReportWindow {
    /// Window of `days` days ending the day before `today`.
    pub fn trailing(today: NaiveDate, days: u32) -> Result<Self> {
        if days == 0 {
            bail!("report window must span at least one day");
        }
        let end = today
            .checked_sub_days(Days::new(1))
            .ok_or_else(|| anyhow::anyhow!("date out of range: {today}"))?;
        let start = today
            .checked_sub_days(Days::new(u64::from(days)))
            .ok_or_else(|| anyhow::anyhow!("date out of range: {today}"))?;
        Ok(Self { start, end })
    }

    pub fn contains(&self, date: NaiveDate) -> bool {
        date >= self.start && date <= self.end
    }

    pub fn dates(&self) -> Vec<NaiveDate> {
        self.start
            .iter_days()
            .take_while(|date| *date <= self.end)
            .collect()
    }
}

/// One blog post tagged with the keyword that found it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PostRecord {
    pub category: String,
    pub keyword: String,
    pub date: NaiveDate,
    pub title: String,
    pub url: String,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CollectReport {
    pub records: Vec<PostRecord>,
    pub pages_requested: usize,
}

pub fn collect_posts<A: BlogSearchApi>(
    api: &mut A,
    config: &ReportConfig,
    window: &ReportWindow,
) -> Result<CollectReport> {
    let page_size = config.search.page_size;
    let cursor_cap = config.search.cursor_cap;
    let requests_before = api.request_count();
    let mut records = Vec::new();

    for rule in &config.keywords {
        let query = rule.query();
        let mut keyword_hits = 0usize;
        let mut start = 1usize;

        'pages: while start <= cursor_cap {
            let page = api
                .search_page(&query, start, page_size)
                .with_context(|| format!("search failed for keyword `{}`", rule.term))?;
            let Some(items) = page.items else {
                warn!(keyword = %rule.term, start, "search payload had no items; stopping keyword");
                break;
            };

            for item in items {
                let date = parse_postdate(&item.postdate).with_context(|| {
                    format!("invalid postdate for keyword `{}`: {}", rule.term, item.link)
                })?;
                if date < window.start {
                    break 'pages;
                }
                if date > window.end {
                    continue;
                }
                records.push(PostRecord {
                    category: rule.category.clone(),
                    keyword: rule.term.clone(),
                    date,
                    title: clean_title(&item.title),
                    url: item.link,
                });
                keyword_hits += 1;
            }

            if page.display < page_size || start >= cursor_cap {
                break;
            }
            start += page_size;
        }

        info!(keyword = %rule.term, hits = keyword_hits, "collected keyword");
    }

    Ok(CollectReport {
        records,
        pages_requested: api.request_count().saturating_sub(requests_before),
    })
}

pub fn parse_postdate(value: &str) -> Result<NaiveDate> {
    NaiveDate::parse_from_str(value.trim(), POSTDATE_FORMAT)
        .with_context(|| format!("unparseable postdate `{value}`"))
}

/// Strip markup tags and decode the entities the search API emits.
pub fn clean_title(raw: &str) -> String {
    let stripped = tag_pattern().replace_all(raw, "");
    html_escape::decode_html_entities(&stripped)
        .replace('\u{a0}', " ")
}

fn tag_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| Regex::new(r"<.*?>").expect("static tag regex"))
}
