use std::collections::{BTreeMap, BTreeSet, HashMap};

use chrono::NaiveDate;
use serde::Serialize;

use crate::collect::{PostRecord, ReportWindow};
use crate::config::ReportConfig;
use crate::tokenize::tokenize_title;

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CategoryTotal {
    pub category: String,
    pub count: usize,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CategoryKeywordTotal {
    pub category: String,
    pub keyword: String,
    pub count: usize,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DailyRow {
    pub date: NaiveDate,
    /// Counts aligned with `DailyMatrix::keywords`.
    pub counts: Vec<usize>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DailyMatrix {
    pub keywords: Vec<String>,
    pub rows: Vec<DailyRow>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct WordCount {
    pub word: String,
    pub count: usize,
}

/// Per-category top words laid side by side, padded to equal length.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct FrequencyTable {
    pub categories: Vec<String>,
    /// One column per category, every column `rows` long.
    pub columns: Vec<Vec<WordCount>>,
    pub rows: usize,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ReportTables {
    pub details: Vec<PostRecord>,
    pub category_totals: Vec<CategoryTotal>,
    pub category_keyword_totals: Vec<CategoryKeywordTotal>,
    pub daily: DailyMatrix,
    pub frequencies: FrequencyTable,
}

impl ReportTables {
    pub fn titles_for(&self, category: &str) -> Vec<String> {
        self.details
            .iter()
            .filter(|record| record.category == category)
            .map(|record| record.title.clone())
            .collect()
    }
}

pub fn build_tables(
    records: Vec<PostRecord>,
    config: &ReportConfig,
    window: &ReportWindow,
) -> ReportTables {
    let details = dedupe_by_url(records);
    let category_totals = category_totals(&details);
    let category_keyword_totals = category_keyword_totals(&details, config);
    let daily = daily_keyword_matrix(&details, config, window);
    let frequencies = word_frequencies(&details, config);
    ReportTables {
        details,
        category_totals,
        category_keyword_totals,
        daily,
        frequencies,
    }
}

/// Keep the first record seen for each URL.
pub fn dedupe_by_url(records: Vec<PostRecord>) -> Vec<PostRecord> {
    let mut seen = BTreeSet::new();
    records
        .into_iter()
        .filter(|record| seen.insert(record.url.clone()))
        .collect()
}

pub fn category_totals(details: &[PostRecord]) -> Vec<CategoryTotal> {
    let mut totals: BTreeMap<&str, usize> = BTreeMap::new();
    for record in details {
        *totals.entry(record.category.as_str()).or_default() += 1;
    }
    totals
        .into_iter()
        .map(|(category, count)| CategoryTotal {
            category: category.to_string(),
            count,
        })
        .collect()
}

pub fn category_keyword_totals(
    details: &[PostRecord],
    config: &ReportConfig,
) -> Vec<CategoryKeywordTotal> {
    let mut totals: BTreeMap<(&str, usize), (&str, usize)> = BTreeMap::new();
    for record in details {
        let position = config
            .keyword_position(&record.keyword)
            .unwrap_or(usize::MAX);
        let entry = totals
            .entry((record.category.as_str(), position))
            .or_insert((record.keyword.as_str(), 0));
        entry.1 += 1;
    }
    totals
        .into_iter()
        .map(|((category, _), (keyword, count))| CategoryKeywordTotal {
            category: category.to_string(),
            keyword: keyword.to_string(),
            count,
        })
        .collect()
}

pub fn daily_keyword_matrix(
    details: &[PostRecord],
    config: &ReportConfig,
    window: &ReportWindow,
) -> DailyMatrix {
    let keywords = config.keyword_terms();
    let mut counts: HashMap<(NaiveDate, &str), usize> = HashMap::new();
    for record in details {
        *counts
            .entry((record.date, record.keyword.as_str()))
            .or_default() += 1;
    }
    let rows = window
        .dates()
        .into_iter()
        .map(|date| DailyRow {
            date,
            counts: keywords
                .iter()
                .map(|keyword| {
                    counts
                        .get(&(date, keyword.as_str()))
                        .copied()
                        .unwrap_or(0)
                })
                .collect(),
        })
        .collect();
    DailyMatrix { keywords, rows }
}

pub fn word_frequencies(details: &[PostRecord], config: &ReportConfig) -> FrequencyTable {
    let stop_words = config.stop_word_set();
    let top_n = config.report.top_n;

    let mut columns: Vec<Vec<WordCount>> = config
        .categories
        .iter()
        .map(|category| {
            let titles = details
                .iter()
                .filter(|record| &record.category == category)
                .map(|record| record.title.as_str());
            top_words(titles, &stop_words, top_n)
        })
        .collect();

    let rows = columns.iter().map(Vec::len).max().unwrap_or(0);
    for column in &mut columns {
        column.resize(
            rows,
            WordCount {
                word: String::new(),
                count: 0,
            },
        );
    }

    FrequencyTable {
        categories: config.categories.clone(),
        columns,
        rows,
    }
}

/// Most common tokens, ties broken by first appearance.
fn top_words<'a>(
    titles: impl Iterator<Item = &'a str>,
    stop_words: &BTreeSet<String>,
    top_n: usize,
) -> Vec<WordCount> {
    let mut order: Vec<String> = Vec::new();
    let mut counts: HashMap<String, usize> = HashMap::new();
    for title in titles {
        for token in tokenize_title(title, stop_words) {
            let count = counts.entry(token.clone()).or_insert(0);
            if *count == 0 {
                order.push(token);
            }
            *count += 1;
        }
    }

    let mut ranked: Vec<WordCount> = order
        .into_iter()
        .map(|word| {
            let count = counts.get(&word).copied().unwrap_or(0);
            WordCount { word, count }
        })
        .collect();
    // stable sort keeps first-appearance order among ties
    ranked.sort_by(|left, right| right.count.cmp(&left.count));
    ranked.truncate(top_n);
    ranked
}
