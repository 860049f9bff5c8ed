use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use chrono::NaiveDate;
use serde::Serialize;
use tracing::info;

use crate::aggregate::{CategoryTotal, build_tables};
use crate::cluster::{ClusterLimits, CompletionApi, IssueCount, TokenCounter, cluster_issues};
use crate::collect::{ReportWindow, collect_posts};
use crate::config::ReportConfig;
use crate::confluence::{Attachment, PageLocation, WikiPublishApi};
use crate::publish::{PublishReport, PublishRequest, publish_report};
use crate::render::{ReportContext, render_detail_csv, render_report_body, report_title};
use crate::search::BlogSearchApi;

pub const REPORT_HTML_FILENAME: &str = "report.html";

#[derive(Debug, Clone)]
pub struct RunOptions {
    /// Day the report is produced; the window ends the day before.
    pub as_of: NaiveDate,
    pub output_dir: PathBuf,
}

#[derive(Debug, Clone, Serialize)]
pub struct RunReport {
    pub title: String,
    pub window: ReportWindow,
    pub pages_requested: usize,
    pub collected: usize,
    pub deduplicated: usize,
    pub category_totals: Vec<CategoryTotal>,
    pub issues: Vec<(String, Vec<IssueCount>)>,
    pub csv_path: PathBuf,
    pub html_path: PathBuf,
    pub published: Option<PublishReport>,
}

/// Run every stage once. Publishing is skipped when `wiki` is `None`.
pub fn run_report<S, C, W>(
    search: &mut S,
    completion: &mut C,
    wiki: Option<&mut W>,
    config: &ReportConfig,
    options: &RunOptions,
) -> Result<RunReport>
where
    S: BlogSearchApi,
    C: CompletionApi,
    W: WikiPublishApi,
{
    let window = ReportWindow::trailing(options.as_of, config.report.window_days)?;
    info!(start = %window.start, end = %window.end, "collecting blog posts");

    let collected = collect_posts(search, config, &window)?;
    let collected_count = collected.records.len();
    let tables = build_tables(collected.records, config, &window);
    info!(
        collected = collected_count,
        unique = tables.details.len(),
        "aggregated blog posts"
    );

    let limits = ClusterLimits::from_section(&config.llm, config.report.window_days);
    let counter = TokenCounter::for_model(&config.llm.tokenizer_model)?;
    let mut issues = Vec::with_capacity(config.categories.len());
    for category in &config.categories {
        let titles = tables.titles_for(category);
        let clustered = cluster_issues(completion, category, &titles, &limits, &counter)?;
        issues.push((category.clone(), clustered));
    }

    let keywords = config.keyword_terms();
    let body = render_report_body(
        &tables,
        &ReportContext {
            window: &window,
            keywords: &keywords,
            top_n: config.report.top_n,
            issues: &issues,
        },
    );
    let csv = render_detail_csv(&tables.details);
    let title = report_title(&config.report.title_prefix, options.as_of);

    fs::create_dir_all(&options.output_dir)
        .with_context(|| format!("failed to create {}", options.output_dir.display()))?;
    let csv_path = options.output_dir.join(&config.report.attachment_name);
    write_output(&csv_path, &csv)?;
    let html_path = options.output_dir.join(REPORT_HTML_FILENAME);
    write_output(&html_path, &body)?;

    let published = match wiki {
        Some(api) => Some(publish_report(
            api,
            &PublishRequest {
                location: PageLocation::from_section(&config.wiki),
                title: title.clone(),
                body,
                attachment: Attachment {
                    filename: config.report.attachment_name.clone(),
                    content_type: "text/csv".to_string(),
                    bytes: csv.into_bytes(),
                },
            },
        )?),
        None => {
            info!("publishing skipped");
            None
        }
    };

    Ok(RunReport {
        title,
        window,
        pages_requested: collected.pages_requested,
        collected: collected_count,
        deduplicated: tables.details.len(),
        category_totals: tables.category_totals,
        issues,
        csv_path,
        html_path,
        published,
    })
}

fn write_output(path: &Path, content: &str) -> Result<()> {
    fs::write(path, content).with_context(|| format!("failed to write {}", path.display()))?;
    info!(path = %path.display(), bytes = content.len(), "wrote report output");
    Ok(())
}
