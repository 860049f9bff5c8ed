use std::fmt::Write as _;

use chrono::NaiveDate;

use crate::aggregate::{DailyMatrix, FrequencyTable, ReportTables};
use crate::cluster::{CATEGORY_FIELD, IssueCount};
use crate::collect::{PostRecord, ReportWindow};

pub const DATE_FORMAT: &str = "%Y-%m-%d";
const UTF8_BOM: &str = "\u{feff}";
const DETAIL_HEADERS: [&str; 5] = [CATEGORY_FIELD, "키워드", "날짜", "제목", "URL"];

/// Everything the report body needs besides the aggregate tables.
#[derive(Debug, Clone)]
pub struct ReportContext<'a> {
    pub window: &'a ReportWindow,
    pub keywords: &'a [String],
    pub top_n: usize,
    /// Issue lists per category, in report order.
    pub issues: &'a [(String, Vec<IssueCount>)],
}

pub fn report_title(prefix: &str, date: NaiveDate) -> String {
    format!("{prefix}{}", date.format(DATE_FORMAT))
}

pub fn escape_html(value: &str) -> String {
    html_escape::encode_safe(value).into_owned()
}

/// Bordered HTML table with a header row, matching a dataframe export.
pub fn html_table(headers: &[String], rows: &[Vec<String>]) -> String {
    let mut html = String::from("<table border=\"1\" class=\"dataframe\">\n  <thead>\n");
    html.push_str("    <tr style=\"text-align: right;\">\n");
    for header in headers {
        let _ = writeln!(html, "      <th>{}</th>", escape_html(header));
    }
    html.push_str("    </tr>\n  </thead>\n  <tbody>\n");
    for row in rows {
        html.push_str("    <tr>\n");
        for cell in row {
            let _ = writeln!(html, "      <td>{}</td>", escape_html(cell));
        }
        html.push_str("    </tr>\n");
    }
    html.push_str("  </tbody>\n</table>");
    html
}

fn owned(headers: &[&str]) -> Vec<String> {
    headers.iter().map(|header| (*header).to_string()).collect()
}

pub fn category_totals_html(tables: &ReportTables, window_label: &str) -> String {
    let rows: Vec<Vec<String>> = tables
        .category_totals
        .iter()
        .map(|total| vec![total.category.clone(), total.count.to_string()])
        .collect();
    html_table(&owned(&[CATEGORY_FIELD, window_label]), &rows)
}

pub fn category_keyword_html(tables: &ReportTables, window_label: &str) -> String {
    let rows: Vec<Vec<String>> = tables
        .category_keyword_totals
        .iter()
        .map(|total| {
            vec![
                total.category.clone(),
                total.keyword.clone(),
                total.count.to_string(),
            ]
        })
        .collect();
    html_table(&owned(&[CATEGORY_FIELD, "키워드", window_label]), &rows)
}

pub fn daily_html(matrix: &DailyMatrix) -> String {
    let mut headers = vec!["날짜".to_string()];
    headers.extend(matrix.keywords.iter().cloned());
    let rows: Vec<Vec<String>> = matrix
        .rows
        .iter()
        .map(|row| {
            let mut cells = vec![row.date.format(DATE_FORMAT).to_string()];
            cells.extend(row.counts.iter().map(ToString::to_string));
            cells
        })
        .collect();
    html_table(&headers, &rows)
}

pub fn frequency_html(table: &FrequencyTable) -> String {
    let mut headers = Vec::with_capacity(table.categories.len() * 2);
    for category in &table.categories {
        headers.push(format!("단어({category})"));
        headers.push(format!("건수({category})"));
    }
    let rows: Vec<Vec<String>> = (0..table.rows)
        .map(|index| {
            table
                .columns
                .iter()
                .flat_map(|column| {
                    let entry = &column[index];
                    [entry.word.clone(), entry.count.to_string()]
                })
                .collect()
        })
        .collect();
    html_table(&headers, &rows)
}

pub fn issues_html(issues: &[IssueCount]) -> String {
    let rows: Vec<Vec<String>> = issues
        .iter()
        .map(|issue| {
            vec![
                issue.category.clone(),
                issue.kind.clone(),
                issue.count.map(|count| count.to_string()).unwrap_or_default(),
            ]
        })
        .collect();
    html_table(&owned(&[CATEGORY_FIELD, "이슈 유형", "건수"]), &rows)
}

fn window_label(window: &ReportWindow) -> String {
    format!("최근 {}일", window.dates().len())
}

const CIRCLED_NUMBERS: [&str; 10] = ["①", "②", "③", "④", "⑤", "⑥", "⑦", "⑧", "⑨", "⑩"];

pub fn render_report_body(tables: &ReportTables, context: &ReportContext<'_>) -> String {
    let label = window_label(context.window);
    let mut body = String::new();

    body.push_str("\n<br><h2>📝 참고 사항</h2>\n<ul>\n");
    body.push_str("  <li>본 보고서는 매주 월요일 오전 7시에 자동 발송됩니다.</li>\n");
    let _ = writeln!(
        body,
        "  <li>{} ~ {} 네이버 블로그에 게시된 글을 기준으로 작성되었습니다.</li>",
        context.window.start.format(DATE_FORMAT),
        context.window.end.format(DATE_FORMAT)
    );
    let _ = writeln!(
        body,
        "  <li>분석에 사용된 검색 키워드 : {}</li>",
        escape_html(&context.keywords.join(" , "))
    );
    body.push_str("  <li>동일한 URL은 중복을 제거하여 집계하였습니다.</li>\n</ul>\n");

    let _ = write!(
        body,
        "\n<br><h2>📊 1. 구분별 블로그 언급 건수</h2>\n{}\n",
        category_totals_html(tables, &label)
    );
    let _ = write!(
        body,
        "\n<br><h2>📑 2. 구분 × 키워드별 언급 건수</h2>\n{}\n",
        category_keyword_html(tables, &label)
    );
    let _ = write!(
        body,
        "\n<br><h2>📈 3. 일자별 키워드 트렌드</h2>\n{}\n",
        daily_html(&tables.daily)
    );
    let _ = write!(
        body,
        "\n<br><h2>🗣️ 4. 단어 빈도(Top {})</h2>\n{}\n",
        context.top_n,
        frequency_html(&tables.frequencies)
    );

    body.push_str("\n<br><h2>💡 5. AI 기반 블로그 이슈 유형 정리</h2>\n<ul>\n");
    body.push_str(
        "  <li>GPT로 블로그 글을 분석하여 주요 이슈를 유형별로 정리한 표입니다.</li>\n</ul>\n",
    );
    for (index, (category, issues)) in context.issues.iter().enumerate() {
        let marker = CIRCLED_NUMBERS.get(index).copied().unwrap_or("•");
        let prefix = if index == 0 { "" } else { "<br>" };
        let _ = write!(
            body,
            "{prefix}<h3>{marker} {} TOP 이슈</h3>\n{}\n",
            escape_html(category),
            issues_html(issues)
        );
    }

    body.push_str("\n<br><h2>📥 [Raw Data] 블로그 상세 내역 다운로드</h2>\n");
    body
}

/// Storage-format macro linking to a page attachment.
pub fn attachment_link_macro(filename: &str) -> String {
    format!(
        "<p><ac:link><ri:attachment ri:filename=\"{}\" /></ac:link></p>",
        escape_html(filename)
    )
}

/// Detail rows as UTF-8 CSV with a byte-order mark so spreadsheet tools
/// pick the right encoding.
pub fn render_detail_csv(records: &[PostRecord]) -> String {
    let mut csv = String::from(UTF8_BOM);
    push_csv_row(&mut csv, DETAIL_HEADERS.iter().copied());
    for record in records {
        let date = record.date.format(DATE_FORMAT).to_string();
        push_csv_row(
            &mut csv,
            [
                record.category.as_str(),
                record.keyword.as_str(),
                date.as_str(),
                record.title.as_str(),
                record.url.as_str(),
            ]
            .into_iter(),
        );
    }
    csv
}

fn push_csv_row<'a>(out: &mut String, fields: impl Iterator<Item = &'a str>) {
    let line: Vec<String> = fields.map(csv_field).collect();
    out.push_str(&line.join(","));
    out.push('\n');
}

fn csv_field(value: &str) -> String {
    if value.contains([',', '"', '\n', '\r']) {
        format!("\"{}\"", value.replace('"', "\"\""))
    } else {
        value.to_string()
    }
}

/// Markdown bullets sorted by count, largest first.
pub fn issue_bullets(issues: &[IssueCount]) -> String {
    let mut sorted: Vec<&IssueCount> = issues.iter().collect();
    sorted.sort_by(|left, right| right.count.cmp(&left.count));
    sorted
        .iter()
        .map(|issue| {
            let count = issue
                .count
                .map(|count| count.to_string())
                .unwrap_or_default();
            format!("- **{}** : {count}건", issue.kind)
        })
        .collect::<Vec<_>>()
        .join("\n")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::aggregate::build_tables;
    use crate::config::{COMPETITOR_CATEGORY, OWN_CATEGORY, ReportConfig};

    fn date(value: &str) -> NaiveDate {
        NaiveDate::parse_from_str(value, DATE_FORMAT).expect("date")
    }

    fn record(category: &str, keyword: &str, title: &str, url: &str) -> PostRecord {
        PostRecord {
            category: category.to_string(),
            keyword: keyword.to_string(),
            date: date("2025-10-08"),
            title: title.to_string(),
            url: url.to_string(),
        }
    }

    fn issue(category: &str, kind: &str, count: Option<u64>) -> IssueCount {
        IssueCount {
            category: category.to_string(),
            kind: kind.to_string(),
            count,
        }
    }

    #[test]
    fn report_title_appends_iso_date() {
        assert_eq!(
            report_title("주간 블로그 모니터링 리포트_", date("2025-10-13")),
            "주간 블로그 모니터링 리포트_2025-10-13"
        );
    }

    #[test]
    fn html_table_escapes_cells() {
        let html = html_table(
            &["a".to_string()],
            &[vec!["<b>&\"".to_string()]],
        );
        assert!(html.starts_with("<table border=\"1\" class=\"dataframe\">"));
        assert!(html.contains("<th>a</th>"));
        assert!(html.contains("<td>&lt;b&gt;&amp;&quot;</td>"));
        assert!(html.ends_with("</table>"));
    }

    #[test]
    fn csv_has_bom_header_and_quoting() {
        let csv = render_detail_csv(&[record(
            OWN_CATEGORY,
            "이즐",
            "교통카드, \"후기\"",
            "https://b/1",
        )]);
        let mut lines = csv.lines();
        assert_eq!(lines.next(), Some("\u{feff}구분,키워드,날짜,제목,URL"));
        assert_eq!(
            lines.next(),
            Some("자사,이즐,2025-10-08,\"교통카드, \"\"후기\"\"\",https://b/1")
        );
        assert_eq!(lines.next(), None);
    }

    #[test]
    fn bullets_sorted_by_count_descending() {
        let bullets = issue_bullets(&[
            issue(OWN_CATEGORY, "분실", Some(1)),
            issue(OWN_CATEGORY, "충전", Some(5)),
            issue(OWN_CATEGORY, "기타", None),
        ]);
        assert_eq!(
            bullets,
            "- **충전** : 5건\n- **분실** : 1건\n- **기타** : 건"
        );
    }

    #[test]
    fn attachment_macro_references_filename() {
        assert_eq!(
            attachment_link_macro("blog_detail.csv"),
            "<p><ac:link><ri:attachment ri:filename=\"blog_detail.csv\" /></ac:link></p>"
        );
    }

    #[test]
    fn report_body_contains_all_sections_in_order() {
        let config = ReportConfig::default();
        let window = ReportWindow::trailing(date("2025-10-13"), 7).expect("window");
        let tables = build_tables(
            vec![
                record(OWN_CATEGORY, "이즐", "충전 후기", "u1"),
                record(COMPETITOR_CATEGORY, "티머니", "티머니 카드 분실", "u2"),
            ],
            &config,
            &window,
        );
        let keywords = config.keyword_terms();
        let issues = vec![
            (
                OWN_CATEGORY.to_string(),
                vec![issue(OWN_CATEGORY, "충전", Some(1))],
            ),
            (
                COMPETITOR_CATEGORY.to_string(),
                vec![issue(COMPETITOR_CATEGORY, "분실", Some(1))],
            ),
        ];
        let body = render_report_body(
            &tables,
            &ReportContext {
                window: &window,
                keywords: &keywords,
                top_n: config.report.top_n,
                issues: &issues,
            },
        );

        let markers = [
            "📝 참고 사항",
            "이즐 교통카드 , ezl , 이즐 , 캐시비 , 이동의즐거움 , 티머니",
            "📊 1.",
            "<th>최근 7일</th>",
            "📑 2.",
            "📈 3.",
            "<td>2025-10-06</td>",
            "🗣️ 4. 단어 빈도(Top 20)",
            "<th>단어(자사)</th>",
            "💡 5.",
            "① 자사 TOP 이슈",
            "<br><h3>② 경쟁사 TOP 이슈",
            "📥 [Raw Data]",
        ];
        let mut cursor = 0;
        for marker in markers {
            let found = body[cursor..]
                .find(marker)
                .unwrap_or_else(|| panic!("missing or out of order: {marker}"));
            cursor += found;
        }
    }
}
