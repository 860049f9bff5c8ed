use std::sync::OnceLock;
use std::time::Duration;

use anyhow::{Context, Result, bail};
use regex::Regex;
use reqwest::blocking::Client;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value, json};
use tiktoken_rs::{CoreBPE, get_bpe_from_model, o200k_base};
use tracing::{debug, info, warn};

use crate::config::LlmSection;

/// Column name the report uses for the category label.
pub const CATEGORY_FIELD: &str = "구분";

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct IssueCount {
    pub category: String,
    pub kind: String,
    pub count: Option<u64>,
}

pub trait CompletionApi {
    fn complete(&mut self, prompt: &str) -> Result<String>;
}

#[derive(Debug, Clone)]
pub struct ClusterLimits {
    pub token_budget: usize,
    pub title_cap: usize,
    /// Length of the reporting window named in the prompt.
    pub window_days: u32,
}

impl ClusterLimits {
    pub fn from_section(section: &LlmSection, window_days: u32) -> Self {
        Self {
            token_budget: section.token_budget,
            title_cap: section.title_cap,
            window_days,
        }
    }
}

/// BPE token counter used to decide prompt truncation.
pub struct TokenCounter {
    bpe: CoreBPE,
}

impl TokenCounter {
    /// Load the encoding for `model`, falling back to `o200k_base` for names
    /// the tokenizer table does not know.
    pub fn for_model(model: &str) -> Result<Self> {
        let lower = model.trim().to_ascii_lowercase();
        let bpe = match get_bpe_from_model(&lower) {
            Ok(bpe) => bpe,
            Err(_) => {
                warn!(model = %model, "unknown tokenizer model; using o200k_base");
                o200k_base().context("failed to load o200k_base encoding")?
            }
        };
        Ok(Self { bpe })
    }

    pub fn count(&self, text: &str) -> usize {
        self.bpe.encode_ordinary(text).len()
    }
}

pub struct OpenAiClient {
    client: Client,
    url: String,
    model: String,
    temperature: f32,
    api_key: String,
}

impl OpenAiClient {
    pub fn new(section: &LlmSection, api_key: String) -> Result<Self> {
        let client = Client::builder()
            .timeout(Duration::from_millis(section.timeout_ms))
            .build()
            .context("failed to build completion HTTP client")?;
        Ok(Self {
            client,
            url: section.url.clone(),
            model: section.model.clone(),
            temperature: section.temperature,
            api_key,
        })
    }
}

impl CompletionApi for OpenAiClient {
    fn complete(&mut self, prompt: &str) -> Result<String> {
        let body = json!({
            "model": self.model,
            "messages": [{"role": "user", "content": prompt}],
            "temperature": self.temperature,
        });

        debug!(model = %self.model, prompt_chars = prompt.chars().count(), "requesting completion");
        let response = self
            .client
            .post(&self.url)
            .bearer_auth(&self.api_key)
            .json(&body)
            .send()
            .context("failed to call completion API")?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().unwrap_or_default();
            bail!("completion request failed with HTTP {status}: {body}");
        }

        let payload: CompletionResponse = response
            .json()
            .context("failed to decode completion JSON response")?;
        payload
            .choices
            .into_iter()
            .next()
            .and_then(|choice| choice.message.content)
            .ok_or_else(|| anyhow::anyhow!("completion response contained no message content"))
    }
}

#[derive(Debug, Deserialize, Default)]
struct CompletionResponse {
    #[serde(default)]
    choices: Vec<CompletionChoice>,
}

#[derive(Debug, Deserialize)]
struct CompletionChoice {
    message: CompletionMessage,
}

#[derive(Debug, Deserialize)]
struct CompletionMessage {
    content: Option<String>,
}

/// Cluster one category's titles into labelled issue counts.
pub fn cluster_issues<A: CompletionApi>(
    api: &mut A,
    label: &str,
    titles: &[String],
    limits: &ClusterLimits,
    counter: &TokenCounter,
) -> Result<Vec<IssueCount>> {
    if titles.is_empty() {
        info!(category = label, "no titles to cluster; skipping completion call");
        return Ok(Vec::new());
    }
    let prompt = build_prompt(titles, label, limits, counter);
    let raw = api
        .complete(&prompt)
        .with_context(|| format!("issue clustering failed for {label}"))?;
    let issues = parse_issue_response(&raw, label)
        .with_context(|| format!("failed to parse issue clusters for {label}"))?;
    info!(category = label, issues = issues.len(), "clustered titles");
    Ok(issues)
}

pub fn build_prompt(
    titles: &[String],
    label: &str,
    limits: &ClusterLimits,
    counter: &TokenCounter,
) -> String {
    let mut block = titles_block(titles);
    let tokens = counter.count(&block);
    if tokens > limits.token_budget {
        let kept = titles.len().min(limits.title_cap);
        warn!(
            category = label,
            titles = titles.len(),
            tokens,
            kept,
            "title list exceeds token budget; truncating"
        );
        block = titles_block(&titles[..kept]);
    }

    let days = limits.window_days;
    format!(
        "아래는 최근 {days}일간 **{label}** 블로그 글 제목 리스트입니다.

{block}

다음 조건을 반드시 지켜주세요.
1) 의미가 유사하거나 반복되는 제목끼리 묶어서, '이슈 유형'을 최대 10개까지 도출하세요.
2) 각 이슈 유형별로 제목 건수를 세서, [\"이슈 유형\", 건수] 형태의 JSON 배열로 출력하세요.
3) 반드시 다음과 같은 필드명만 사용하세요: \"type\" (이슈 유형), \"count\" (건수)
4) 설명, 해설, 추가 코멘트, 예시 등은 절대 포함하지 마세요. 오직 JSON만 반환하세요.

오직 JSON 데이터만 결과로 출력하세요."
    )
}

fn titles_block(titles: &[String]) -> String {
    titles
        .iter()
        .map(|title| format!("- {title}"))
        .collect::<Vec<_>>()
        .join("\n")
}

/// Parse a model reply into issue counts, tolerating code fences, prose
/// around the array, upper-case keys, and renamed fields.
pub fn parse_issue_response(raw: &str, label: &str) -> Result<Vec<IssueCount>> {
    let unfenced = fence_pattern().replace_all(raw.trim(), "");
    let unfenced = unfenced.trim();
    let (Some(open), Some(close)) = (unfenced.find('['), unfenced.rfind(']')) else {
        bail!("model reply contains no JSON array");
    };
    if close < open {
        bail!("model reply contains no JSON array");
    }
    let value: Value = serde_json::from_str(&unfenced[open..=close])
        .context("model reply is not valid JSON")?;
    let Value::Array(elements) = value else {
        bail!("model reply is not a JSON array");
    };

    let rows: Vec<Map<String, Value>> = elements.into_iter().map(normalize_row).collect();
    let columns = ordered_columns(&rows);
    let count_column = pick_count_column(&columns, &rows);
    let type_column = pick_type_column(&columns, &rows, count_column.as_deref());

    Ok(rows
        .iter()
        .map(|row| IssueCount {
            category: label.to_string(),
            kind: type_column
                .as_deref()
                .and_then(|column| row.get(column))
                .map(value_to_text)
                .unwrap_or_default(),
            count: count_column
                .as_deref()
                .and_then(|column| row.get(column))
                .and_then(value_to_count),
        })
        .collect())
}

fn fence_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| Regex::new(r"(?im)^```(?:json)?|```$").expect("static fence regex"))
}

/// Lowercase object keys; positional pairs become `type`/`count`.
fn normalize_row(element: Value) -> Map<String, Value> {
    match element {
        Value::Object(object) => object
            .into_iter()
            .map(|(key, value)| (key.to_lowercase(), value))
            .collect(),
        Value::Array(items) => {
            let mut row = Map::new();
            for item in items {
                let key = if item.is_number() { "count" } else { "type" };
                if !row.contains_key(key) {
                    row.insert(key.to_string(), item);
                }
            }
            row
        }
        other => {
            let mut row = Map::new();
            row.insert("type".to_string(), other);
            row
        }
    }
}

fn ordered_columns(rows: &[Map<String, Value>]) -> Vec<String> {
    let mut columns: Vec<String> = Vec::new();
    for row in rows {
        for key in row.keys() {
            if !columns.contains(key) {
                columns.push(key.clone());
            }
        }
    }
    columns
}

fn column_is_numeric(column: &str, rows: &[Map<String, Value>]) -> bool {
    let mut present = rows.iter().filter_map(|row| row.get(column)).peekable();
    present.peek().is_some() && present.all(Value::is_number)
}

fn pick_count_column(columns: &[String], rows: &[Map<String, Value>]) -> Option<String> {
    if columns.iter().any(|column| column == "count") {
        return Some("count".to_string());
    }
    columns
        .iter()
        .find(|column| column_is_numeric(column, rows))
        .cloned()
}

fn pick_type_column(
    columns: &[String],
    rows: &[Map<String, Value>],
    count_column: Option<&str>,
) -> Option<String> {
    if columns.iter().any(|column| column == "type") {
        return Some("type".to_string());
    }
    columns
        .iter()
        .find(|column| {
            Some(column.as_str()) != count_column
                && column.as_str() != CATEGORY_FIELD
                && !column_is_numeric(column, rows)
        })
        .cloned()
}

fn value_to_text(value: &Value) -> String {
    match value {
        Value::String(text) => text.trim().to_string(),
        Value::Null => String::new(),
        other => other.to_string(),
    }
}

fn value_to_count(value: &Value) -> Option<u64> {
    match value {
        Value::Number(number) => number.as_u64().or_else(|| {
            number
                .as_f64()
                .filter(|float| float.is_finite() && *float >= 0.0)
                .map(|float| float.round() as u64)
        }),
        Value::String(text) => text.trim().trim_end_matches('건').trim().parse().ok(),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct MockCompletion {
        reply: String,
        prompts: Vec<String>,
    }

    impl MockCompletion {
        fn replying(reply: &str) -> Self {
            Self {
                reply: reply.to_string(),
                prompts: Vec::new(),
            }
        }
    }

    impl CompletionApi for MockCompletion {
        fn complete(&mut self, prompt: &str) -> anyhow::Result<String> {
            self.prompts.push(prompt.to_string());
            Ok(self.reply.clone())
        }
    }

    fn limits() -> ClusterLimits {
        ClusterLimits {
            token_budget: 7_000,
            title_cap: 600,
            window_days: 7,
        }
    }

    fn counter() -> TokenCounter {
        TokenCounter::for_model("gpt-4o-mini").expect("o200k encoding")
    }

    fn pairs(issues: &[IssueCount]) -> Vec<(&str, Option<u64>)> {
        issues
            .iter()
            .map(|issue| (issue.kind.as_str(), issue.count))
            .collect()
    }

    #[test]
    fn parses_plain_array() {
        let issues = parse_issue_response(
            r#"[{"type": "충전 오류", "count": 4}, {"type": "분실 신고", "count": 2}]"#,
            "자사",
        )
        .expect("parse");
        assert_eq!(pairs(&issues), vec![("충전 오류", Some(4)), ("분실 신고", Some(2))]);
        assert!(issues.iter().all(|issue| issue.category == "자사"));
    }

    #[test]
    fn strips_code_fences_and_surrounding_prose() {
        let raw = "```json\n결과입니다:\n[{\"type\": \"후기\", \"count\": 3}]\n```";
        let issues = parse_issue_response(raw, "경쟁사").expect("parse");
        assert_eq!(pairs(&issues), vec![("후기", Some(3))]);
    }

    #[test]
    fn uppercase_keys_are_lowercased() {
        let issues =
            parse_issue_response(r#"[{"TYPE": "이벤트", "Count": 5}]"#, "자사").expect("parse");
        assert_eq!(pairs(&issues), vec![("이벤트", Some(5))]);
    }

    #[test]
    fn renamed_fields_fall_back_to_first_text_and_numeric_columns() {
        let raw = r#"[
            {"구분": "자사", "issue": "앱 오류", "건수": 7},
            {"구분": "자사", "issue": "환불", "건수": 1}
        ]"#;
        let issues = parse_issue_response(raw, "자사").expect("parse");
        assert_eq!(pairs(&issues), vec![("앱 오류", Some(7)), ("환불", Some(1))]);
    }

    #[test]
    fn positional_pairs_are_accepted() {
        let issues =
            parse_issue_response(r#"[["충전", 3], ["분실", 1.0]]"#, "자사").expect("parse");
        assert_eq!(pairs(&issues), vec![("충전", Some(3)), ("분실", Some(1))]);
    }

    #[test]
    fn missing_count_is_kept_as_none() {
        let issues = parse_issue_response(r#"[{"type": "기타"}]"#, "자사").expect("parse");
        assert_eq!(pairs(&issues), vec![("기타", None)]);
    }

    #[test]
    fn reply_without_array_is_an_error() {
        let error = parse_issue_response("죄송합니다. 분석할 수 없습니다.", "자사")
            .expect_err("must fail");
        assert!(error.to_string().contains("no JSON array"));
    }

    #[test]
    fn cluster_issues_skips_model_for_empty_titles() {
        let mut api = MockCompletion::replying("[]");
        let issues = cluster_issues(&mut api, "경쟁사", &[], &limits(), &counter()).expect("cluster");
        assert!(issues.is_empty());
        assert!(api.prompts.is_empty());
    }

    #[test]
    fn cluster_issues_sends_titles_as_bullets() {
        let mut api = MockCompletion::replying(r#"[{"type": "후기", "count": 2}]"#);
        let titles = vec!["첫 번째 글".to_string(), "두 번째 글".to_string()];
        let issues = cluster_issues(&mut api, "자사", &titles, &limits(), &counter()).expect("cluster");
        assert_eq!(pairs(&issues), vec![("후기", Some(2))]);
        let prompt = &api.prompts[0];
        assert!(prompt.contains("**자사**"));
        assert!(prompt.contains("- 첫 번째 글\n- 두 번째 글"));
        assert!(prompt.contains("\"type\""));
    }

    #[test]
    fn prompt_truncates_titles_over_budget() {
        let titles: Vec<String> = (0..50).map(|index| format!("제목 {index}")).collect();
        let tight = ClusterLimits {
            token_budget: 10,
            title_cap: 3,
            window_days: 7,
        };
        let prompt = build_prompt(&titles, "자사", &tight, &counter());
        assert!(prompt.contains("- 제목 2\n"));
        assert!(!prompt.contains("- 제목 3"));
    }

    #[test]
    fn prompt_keeps_every_title_at_exact_budget() {
        let counter = counter();
        let titles: Vec<String> = (0..20)
            .map(|index| format!("이즐 교통카드 충전 후기 {index}"))
            .collect();
        let tokens = counter.count(&titles_block(&titles));

        let at_budget = ClusterLimits {
            token_budget: tokens,
            title_cap: 5,
            window_days: 7,
        };
        let prompt = build_prompt(&titles, "자사", &at_budget, &counter);
        assert!(prompt.contains("- 이즐 교통카드 충전 후기 19"));

        let over_budget = ClusterLimits {
            token_budget: tokens - 1,
            ..at_budget
        };
        let prompt = build_prompt(&titles, "자사", &over_budget, &counter);
        assert!(prompt.contains("- 이즐 교통카드 충전 후기 4\n"));
        assert!(!prompt.contains("- 이즐 교통카드 충전 후기 5"));
    }

    #[test]
    fn prompt_names_the_window_length() {
        let titles = vec!["제목".to_string()];
        let fortnight = ClusterLimits {
            window_days: 14,
            ..limits()
        };
        let prompt = build_prompt(&titles, "경쟁사", &fortnight, &counter());
        assert!(prompt.starts_with("아래는 최근 14일간 **경쟁사**"));
    }

    #[test]
    fn token_counter_uses_bpe_counts() {
        let counter = counter();
        assert_eq!(counter.count("hello world"), 2);
        assert_eq!(counter.count(""), 0);
    }
}
