use std::collections::BTreeSet;
use std::env;
use std::fs;
use std::path::Path;

use anyhow::{Context, Result, bail};
use serde::{Deserialize, Serialize};

pub const DEFAULT_USER_AGENT: &str = "blogwatch/0.2";
pub const DEFAULT_CONFIG_RELATIVE_PATH: &str = ".blogwatch/config.toml";
pub const DEFAULT_SEARCH_URL: &str = "https://openapi.naver.com/v1/search/blog.json";
pub const DEFAULT_COMPLETION_URL: &str = "https://api.openai.com/v1/chat/completions";
pub const DEFAULT_WIKI_DOMAIN: &str = "myezl.atlassian.net";

pub const OWN_CATEGORY: &str = "자사";
pub const COMPETITOR_CATEGORY: &str = "경쟁사";

#[derive(Debug, Clone, Deserialize, Serialize, PartialEq)]
pub struct ReportConfig {
    #[serde(default = "default_keywords")]
    pub keywords: Vec<KeywordRule>,
    #[serde(default = "default_categories")]
    pub categories: Vec<String>,
    #[serde(default = "default_stop_words")]
    pub stop_words: Vec<String>,
    #[serde(default)]
    pub search: SearchSection,
    #[serde(default)]
    pub report: ReportSection,
    #[serde(default)]
    pub llm: LlmSection,
    #[serde(default)]
    pub wiki: WikiSection,
}

#[derive(Debug, Clone, Deserialize, Serialize, PartialEq, Eq)]
pub struct KeywordRule {
    pub term: String,
    pub category: String,
}

impl KeywordRule {
    fn new(term: &str, category: &str) -> Self {
        Self {
            term: term.to_string(),
            category: category.to_string(),
        }
    }

    /// Exact-phrase query sent to the search API.
    pub fn query(&self) -> String {
        format!("\"{}\"", self.term)
    }
}

#[derive(Debug, Clone, Deserialize, Serialize, PartialEq, Eq)]
#[serde(default)]
pub struct SearchSection {
    pub url: String,
    pub page_size: usize,
    pub cursor_cap: usize,
    pub timeout_ms: u64,
    pub user_agent: String,
}

impl Default for SearchSection {
    fn default() -> Self {
        Self {
            url: DEFAULT_SEARCH_URL.to_string(),
            page_size: 100,
            cursor_cap: 1000,
            timeout_ms: 30_000,
            user_agent: DEFAULT_USER_AGENT.to_string(),
        }
    }
}

#[derive(Debug, Clone, Deserialize, Serialize, PartialEq, Eq)]
#[serde(default)]
pub struct ReportSection {
    pub window_days: u32,
    pub top_n: usize,
    pub title_prefix: String,
    pub attachment_name: String,
    pub output_dir: String,
}

impl Default for ReportSection {
    fn default() -> Self {
        Self {
            window_days: 7,
            top_n: 20,
            title_prefix: "주간 블로그 모니터링 리포트_".to_string(),
            attachment_name: "blog_detail.csv".to_string(),
            output_dir: ".".to_string(),
        }
    }
}

#[derive(Debug, Clone, Deserialize, Serialize, PartialEq)]
#[serde(default)]
pub struct LlmSection {
    pub url: String,
    pub model: String,
    /// Model whose encoding counts prompt tokens against the budget.
    pub tokenizer_model: String,
    pub temperature: f32,
    pub token_budget: usize,
    pub title_cap: usize,
    pub timeout_ms: u64,
}

impl Default for LlmSection {
    fn default() -> Self {
        Self {
            url: DEFAULT_COMPLETION_URL.to_string(),
            model: "gpt-4.1".to_string(),
            tokenizer_model: "gpt-4o-mini".to_string(),
            temperature: 0.0,
            token_budget: 7_000,
            title_cap: 600,
            timeout_ms: 120_000,
        }
    }
}

#[derive(Debug, Clone, Deserialize, Serialize, PartialEq, Eq)]
#[serde(default)]
pub struct WikiSection {
    pub domain: String,
    pub space_key: String,
    pub parent_page_id: String,
    pub timeout_ms: u64,
}

impl Default for WikiSection {
    fn default() -> Self {
        Self {
            domain: DEFAULT_WIKI_DOMAIN.to_string(),
            space_key: "CSO".to_string(),
            parent_page_id: "661848065".to_string(),
            timeout_ms: 60_000,
        }
    }
}

impl WikiSection {
    /// Content REST root, always ending in a slash.
    pub fn content_url(&self) -> String {
        let domain = self
            .domain
            .trim()
            .trim_start_matches("https://")
            .trim_end_matches('/');
        format!("https://{domain}/wiki/rest/api/content/")
    }
}

impl Default for ReportConfig {
    fn default() -> Self {
        Self {
            keywords: default_keywords(),
            categories: default_categories(),
            stop_words: default_stop_words(),
            search: SearchSection::default(),
            report: ReportSection::default(),
            llm: LlmSection::default(),
            wiki: WikiSection::default(),
        }
    }
}

fn default_keywords() -> Vec<KeywordRule> {
    vec![
        KeywordRule::new("이즐 교통카드", OWN_CATEGORY),
        KeywordRule::new("ezl", OWN_CATEGORY),
        KeywordRule::new("이즐", OWN_CATEGORY),
        KeywordRule::new("캐시비", OWN_CATEGORY),
        KeywordRule::new("이동의즐거움", OWN_CATEGORY),
        KeywordRule::new("티머니", COMPETITOR_CATEGORY),
    ]
}

fn default_categories() -> Vec<String> {
    vec![OWN_CATEGORY.to_string(), COMPETITOR_CATEGORY.to_string()]
}

fn default_stop_words() -> Vec<String> {
    ["이즐", "ezl", "티머니", "캐시비"]
        .iter()
        .map(|word| (*word).to_string())
        .collect()
}

impl ReportConfig {
    /// Keyword terms in configured order.
    pub fn keyword_terms(&self) -> Vec<String> {
        self.keywords.iter().map(|rule| rule.term.clone()).collect()
    }

    pub fn keyword_position(&self, term: &str) -> Option<usize> {
        self.keywords.iter().position(|rule| rule.term == term)
    }

    pub fn stop_word_set(&self) -> BTreeSet<String> {
        self.stop_words
            .iter()
            .map(|word| word.trim().to_lowercase())
            .filter(|word| !word.is_empty())
            .collect()
    }

    /// Apply `BLOGWATCH_*` environment overrides on top of file values.
    pub fn apply_env_overrides(&mut self) -> Result<()> {
        self.apply_overrides(env_override)
    }

    fn apply_overrides(&mut self, lookup: impl Fn(&str) -> Option<String>) -> Result<()> {
        if let Some(value) = lookup("BLOGWATCH_SEARCH_URL") {
            self.search.url = value;
        }
        if let Some(value) = lookup("BLOGWATCH_LLM_MODEL") {
            self.llm.model = value;
        }
        if let Some(value) = lookup("BLOGWATCH_WIKI_DOMAIN") {
            self.wiki.domain = value;
        }
        if let Some(value) = lookup("BLOGWATCH_WIKI_SPACE") {
            self.wiki.space_key = value;
        }
        if let Some(value) = lookup("BLOGWATCH_WIKI_PARENT_ID") {
            self.wiki.parent_page_id = value;
        }
        if let Some(value) = lookup("BLOGWATCH_HTTP_TIMEOUT_MS") {
            let timeout_ms = value.parse::<u64>().with_context(|| {
                format!("BLOGWATCH_HTTP_TIMEOUT_MS must be milliseconds, got `{value}`")
            })?;
            self.search.timeout_ms = timeout_ms;
            self.llm.timeout_ms = timeout_ms;
            self.wiki.timeout_ms = timeout_ms;
        }
        Ok(())
    }

    pub fn validate(&self) -> Result<()> {
        if self.keywords.is_empty() {
            bail!("config must list at least one keyword");
        }
        if self.categories.is_empty() {
            bail!("config must list at least one category");
        }
        let mut seen = BTreeSet::new();
        for rule in &self.keywords {
            if rule.term.trim().is_empty() {
                bail!("keyword term cannot be empty");
            }
            if !seen.insert(rule.term.as_str()) {
                bail!("duplicate keyword term: {}", rule.term);
            }
            if !self.categories.iter().any(|category| category == &rule.category) {
                bail!(
                    "keyword `{}` maps to unknown category `{}`",
                    rule.term,
                    rule.category
                );
            }
        }
        if self.report.top_n == 0 {
            bail!("report.top_n must be greater than zero");
        }
        if self.report.window_days == 0 {
            bail!("report.window_days must be at least 1");
        }
        if self.search.page_size == 0 {
            bail!("search.page_size must be greater than zero");
        }
        Ok(())
    }
}

/// Load and parse a ReportConfig from a TOML file. Returns defaults if the file doesn't exist.
pub fn load_config(config_path: &Path) -> Result<ReportConfig> {
    if !config_path.exists() {
        return Ok(ReportConfig::default());
    }
    let content = fs::read_to_string(config_path)
        .with_context(|| format!("failed to read {}", config_path.display()))?;
    let parsed: ReportConfig = toml::from_str(&content)
        .with_context(|| format!("failed to parse {}", config_path.display()))?;
    Ok(parsed)
}

/// Load, apply env overrides, and validate.
pub fn resolve_config(config_path: &Path) -> Result<ReportConfig> {
    let mut config = load_config(config_path)?;
    config.apply_env_overrides()?;
    config
        .validate()
        .with_context(|| format!("invalid configuration in {}", config_path.display()))?;
    Ok(config)
}

#[derive(Clone)]
pub struct SearchCredentials {
    pub client_id: String,
    pub client_secret: String,
}

#[derive(Clone)]
pub struct WikiCredentials {
    pub user: String,
    pub token: String,
}

impl SearchCredentials {
    pub fn from_env() -> Result<Self> {
        Ok(Self {
            client_id: required_env("NAVER_CLIENT_ID")?,
            client_secret: required_env("NAVER_CLIENT_SECRET")?,
        })
    }
}

impl WikiCredentials {
    pub fn from_env() -> Result<Self> {
        Ok(Self {
            user: required_env("CONFLUENCE_API_USER")?,
            token: required_env("CONFLUENCE_API_TOKEN")?,
        })
    }
}

pub fn completion_api_key_from_env() -> Result<String> {
    required_env("OPENAI_API_KEY")
}

fn required_env(key: &str) -> Result<String> {
    env_override(key).ok_or_else(|| anyhow::anyhow!("missing required environment variable {key}"))
}

fn env_override(key: &str) -> Option<String> {
    env::var(key)
        .ok()
        .map(|value| value.trim().to_string())
        .filter(|value| !value.is_empty())
}

#[cfg(test)]
mod tests {
    use std::collections::BTreeMap;

    use super::*;
    use tempfile::tempdir;

    #[test]
    fn default_config_matches_weekly_report_setup() {
        let config = ReportConfig::default();
        assert_eq!(
            config.keyword_terms(),
            vec!["이즐 교통카드", "ezl", "이즐", "캐시비", "이동의즐거움", "티머니"]
        );
        assert_eq!(config.categories, vec!["자사", "경쟁사"]);
        assert_eq!(config.report.top_n, 20);
        assert_eq!(config.report.window_days, 7);
        assert_eq!(config.search.page_size, 100);
        assert_eq!(config.search.cursor_cap, 1000);
        assert_eq!(config.llm.model, "gpt-4.1");
        assert_eq!(config.wiki.space_key, "CSO");
        config.validate().expect("defaults validate");
    }

    #[test]
    fn keyword_query_is_quoted_phrase() {
        let rule = KeywordRule::new("이즐 교통카드", OWN_CATEGORY);
        assert_eq!(rule.query(), "\"이즐 교통카드\"");
    }

    #[test]
    fn load_config_returns_default_for_missing_file() {
        let config = load_config(Path::new("/nonexistent/config.toml")).expect("load config");
        assert_eq!(config, ReportConfig::default());
    }

    #[test]
    fn load_config_parses_sections() {
        let temp = tempdir().expect("tempdir");
        let config_path = temp.path().join("config.toml");
        fs::write(
            &config_path,
            r#"
categories = ["ours", "theirs"]
stop_words = ["acme"]

[[keywords]]
term = "acme card"
category = "ours"

[[keywords]]
term = "globex"
category = "theirs"

[report]
top_n = 5

[wiki]
domain = "example.atlassian.net"
space_key = "OPS"
"#,
        )
        .expect("write config");

        let config = load_config(&config_path).expect("load config");
        assert_eq!(config.keyword_terms(), vec!["acme card", "globex"]);
        assert_eq!(config.report.top_n, 5);
        assert_eq!(config.report.window_days, 7);
        assert_eq!(config.wiki.space_key, "OPS");
        assert_eq!(config.wiki.parent_page_id, "661848065");
        assert_eq!(
            config.wiki.content_url(),
            "https://example.atlassian.net/wiki/rest/api/content/"
        );
        config.validate().expect("valid");
    }

    fn lookup(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let values: BTreeMap<String, String> = pairs
            .iter()
            .map(|(key, value)| ((*key).to_string(), (*value).to_string()))
            .collect();
        move |key| values.get(key).cloned()
    }

    #[test]
    fn env_overrides_win_over_file_values() {
        let temp = tempdir().expect("tempdir");
        let config_path = temp.path().join("config.toml");
        fs::write(
            &config_path,
            r#"
[search]
url = "https://search.example.org/blog.json"
timeout_ms = 5000

[llm]
model = "gpt-4o"

[wiki]
domain = "file.atlassian.net"
space_key = "FILE"
"#,
        )
        .expect("write config");

        let mut config = load_config(&config_path).expect("load config");
        config
            .apply_overrides(lookup(&[
                ("BLOGWATCH_SEARCH_URL", "http://127.0.0.1:9000/blog.json"),
                ("BLOGWATCH_LLM_MODEL", "gpt-4.1-mini"),
                ("BLOGWATCH_WIKI_DOMAIN", "env.atlassian.net"),
                ("BLOGWATCH_WIKI_SPACE", "ENV"),
                ("BLOGWATCH_WIKI_PARENT_ID", "12345"),
                ("BLOGWATCH_HTTP_TIMEOUT_MS", "2500"),
            ]))
            .expect("overrides");

        assert_eq!(config.search.url, "http://127.0.0.1:9000/blog.json");
        assert_eq!(config.llm.model, "gpt-4.1-mini");
        assert_eq!(config.wiki.domain, "env.atlassian.net");
        assert_eq!(config.wiki.space_key, "ENV");
        assert_eq!(config.wiki.parent_page_id, "12345");
        assert_eq!(config.search.timeout_ms, 2500);
        assert_eq!(config.llm.timeout_ms, 2500);
        assert_eq!(config.wiki.timeout_ms, 2500);
    }

    #[test]
    fn file_and_default_values_survive_without_env() {
        let mut config = ReportConfig {
            wiki: WikiSection {
                space_key: "FILE".to_string(),
                ..WikiSection::default()
            },
            ..ReportConfig::default()
        };
        config.apply_overrides(lookup(&[])).expect("overrides");
        assert_eq!(config.wiki.space_key, "FILE");
        assert_eq!(config.wiki.parent_page_id, "661848065");
        assert_eq!(config.search.url, DEFAULT_SEARCH_URL);
        assert_eq!(config.llm.timeout_ms, 120_000);
    }

    #[test]
    fn unparseable_timeout_override_is_an_error() {
        let mut config = ReportConfig::default();
        let error = config
            .apply_overrides(lookup(&[("BLOGWATCH_HTTP_TIMEOUT_MS", "30s")]))
            .expect_err("must fail");
        assert!(error.to_string().contains("BLOGWATCH_HTTP_TIMEOUT_MS"));
        assert_eq!(config.search.timeout_ms, 30_000);
    }

    #[test]
    fn load_config_returns_error_for_invalid_toml() {
        let temp = tempdir().expect("tempdir");
        let config_path = temp.path().join("config.toml");
        fs::write(&config_path, "[report\ntop_n = 3").expect("write config");
        let error = load_config(&config_path).expect_err("must fail");
        assert!(error.to_string().contains("failed to parse"));
    }

    #[test]
    fn validate_rejects_unknown_category() {
        let mut config = ReportConfig::default();
        config.keywords.push(KeywordRule::new("globex", "partner"));
        let error = config.validate().expect_err("must fail");
        assert!(error.to_string().contains("unknown category"));
    }

    #[test]
    fn validate_rejects_duplicate_keyword() {
        let mut config = ReportConfig::default();
        config.keywords.push(KeywordRule::new("ezl", OWN_CATEGORY));
        let error = config.validate().expect_err("must fail");
        assert!(error.to_string().contains("duplicate keyword"));
    }

    #[test]
    fn stop_words_are_normalized() {
        let mut config = ReportConfig::default();
        config.stop_words = vec![" EZL ".to_string(), String::new()];
        let set = config.stop_word_set();
        assert_eq!(set.len(), 1);
        assert!(set.contains("ezl"));
    }

    #[test]
    fn content_url_tolerates_scheme_and_trailing_slash() {
        let wiki = WikiSection {
            domain: "https://wiki.example.org/".to_string(),
            ..WikiSection::default()
        };
        assert_eq!(
            wiki.content_url(),
            "https://wiki.example.org/wiki/rest/api/content/"
        );
    }
}
