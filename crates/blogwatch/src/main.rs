use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use blogwatch_core::cluster::OpenAiClient;
use blogwatch_core::collect::ReportWindow;
use blogwatch_core::config::{
    DEFAULT_CONFIG_RELATIVE_PATH, ReportConfig, SearchCredentials, WikiCredentials,
    completion_api_key_from_env, resolve_config,
};
use blogwatch_core::confluence::ConfluenceClient;
use blogwatch_core::pipeline::{RunOptions, RunReport, run_report};
use blogwatch_core::render::{DATE_FORMAT, issue_bullets, report_title};
use blogwatch_core::search::{NaverSearchClient, NaverSearchConfig};
use chrono::{Local, NaiveDate};
use clap::{Args, CommandFactory, Parser, Subcommand};
use tracing_subscriber::EnvFilter;

#[derive(Debug, Parser)]
#[command(
    name = "blogwatch",
    version,
    about = "Weekly blog mention report: search, aggregate, cluster, publish"
)]
struct Cli {
    #[arg(long, global = true, value_name = "PATH")]
    config: Option<PathBuf>,
    #[arg(long, global = true, help = "Print resolved runtime diagnostics")]
    diagnostics: bool,
    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Debug, Clone)]
struct RuntimeOptions {
    config: Option<PathBuf>,
    diagnostics: bool,
}

impl RuntimeOptions {
    fn from_cli(cli: &Cli) -> Self {
        Self {
            config: cli.config.clone(),
            diagnostics: cli.diagnostics,
        }
    }

    fn config_path(&self) -> PathBuf {
        self.config
            .clone()
            .unwrap_or_else(|| PathBuf::from(DEFAULT_CONFIG_RELATIVE_PATH))
    }
}

#[derive(Debug, Subcommand)]
enum Commands {
    #[command(about = "Collect, aggregate, cluster, and publish the weekly report")]
    Run(RunArgs),
    #[command(about = "Print the resolved configuration without contacting any service")]
    Config(ConfigArgs),
}

#[derive(Debug, Args)]
struct RunArgs {
    #[arg(long, help = "Write the report locally but do not publish it")]
    dry_run: bool,
    #[arg(long, value_name = "YYYY-MM-DD", help = "Produce the report as of this date")]
    as_of: Option<String>,
    #[arg(long, value_name = "PATH", help = "Directory for the CSV and HTML outputs")]
    output_dir: Option<PathBuf>,
    #[arg(long, help = "Print the run summary as JSON")]
    json: bool,
}

#[derive(Debug, Args)]
struct ConfigArgs {
    #[arg(long, value_name = "YYYY-MM-DD", help = "Show the window as of this date")]
    as_of: Option<String>,
}

fn main() -> Result<()> {
    init_tracing();
    let cli = Cli::parse();
    let runtime = RuntimeOptions::from_cli(&cli);

    match cli.command {
        Some(Commands::Run(args)) => run_weekly(&runtime, args),
        Some(Commands::Config(args)) => run_config(&runtime, args),
        None => {
            let mut command = Cli::command();
            command.print_help()?;
            println!();
            Ok(())
        }
    }
}

fn init_tracing() {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with_writer(std::io::stderr)
        .with_target(false)
        .init();
}

fn run_weekly(runtime: &RuntimeOptions, args: RunArgs) -> Result<()> {
    let config = load_runtime_config(runtime)?;
    let as_of = resolve_as_of(args.as_of.as_deref())?;
    let output_dir = args
        .output_dir
        .unwrap_or_else(|| PathBuf::from(&config.report.output_dir));

    let mut search = NaverSearchClient::new(
        NaverSearchConfig::from_section(&config.search),
        SearchCredentials::from_env()?,
    )?;
    let mut completion = OpenAiClient::new(&config.llm, completion_api_key_from_env()?)?;
    let options = RunOptions { as_of, output_dir };

    let report = if args.dry_run {
        run_report(
            &mut search,
            &mut completion,
            None::<&mut ConfluenceClient>,
            &config,
            &options,
        )?
    } else {
        let mut wiki = ConfluenceClient::new(&config.wiki, WikiCredentials::from_env()?)?;
        run_report(&mut search, &mut completion, Some(&mut wiki), &config, &options)?
    };

    if args.json {
        println!("{}", serde_json::to_string_pretty(&report)?);
    } else {
        print_run_report(&report);
    }
    if runtime.diagnostics {
        println!("\n[diagnostics]\n{}", diagnostics(runtime, &config));
    }
    Ok(())
}

fn print_run_report(report: &RunReport) {
    println!("weekly report");
    println!("title: {}", report.title);
    println!(
        "window: {} ~ {}",
        report.window.start.format(DATE_FORMAT),
        report.window.end.format(DATE_FORMAT)
    );
    println!("search.requests: {}", report.pages_requested);
    println!("posts.collected: {}", report.collected);
    println!("posts.unique: {}", report.deduplicated);
    for total in &report.category_totals {
        println!("category.{}: {}", total.category, total.count);
    }
    println!("output.csv: {}", normalize_path(&report.csv_path));
    println!("output.html: {}", normalize_path(&report.html_path));
    match &report.published {
        Some(published) => {
            println!("published.page_id: {}", published.page_id);
            println!("published.attachment: {}", published.attachment_name);
            println!("published.version: {}", published.version);
        }
        None => println!("published: <dry run>"),
    }
    for (category, issues) in &report.issues {
        println!("\n[{category} 이슈 Top]");
        if issues.is_empty() {
            println!("<none>");
        } else {
            println!("{}", issue_bullets(issues));
        }
    }
}

fn run_config(runtime: &RuntimeOptions, args: ConfigArgs) -> Result<()> {
    let config = load_runtime_config(runtime)?;
    let as_of = resolve_as_of(args.as_of.as_deref())?;
    let window = ReportWindow::trailing(as_of, config.report.window_days)?;

    println!("resolved config");
    println!("config_path: {}", normalize_path(&runtime.config_path()));
    println!("title: {}", report_title(&config.report.title_prefix, as_of));
    println!(
        "window: {} ~ {}",
        window.start.format(DATE_FORMAT),
        window.end.format(DATE_FORMAT)
    );
    println!("categories: {}", config.categories.join(", "));
    for rule in &config.keywords {
        println!("keyword.{}: {}", rule.category, rule.term);
    }
    println!("stop_words: {}", config.stop_words.join(", "));
    println!("top_n: {}", config.report.top_n);
    println!("search.url: {}", config.search.url);
    println!("llm.model: {}", config.llm.model);
    println!("wiki.content_url: {}", config.wiki.content_url());
    println!("wiki.space_key: {}", config.wiki.space_key);
    println!("wiki.parent_page_id: {}", config.wiki.parent_page_id);
    if runtime.diagnostics {
        println!("\n[diagnostics]\n{}", diagnostics(runtime, &config));
    }
    Ok(())
}

fn load_runtime_config(runtime: &RuntimeOptions) -> Result<ReportConfig> {
    dotenvy::dotenv().ok();
    let config_path = runtime.config_path();
    if let Some(parent) = config_path.parent().and_then(Path::parent) {
        let project_env = parent.join(".env");
        if project_env.exists() {
            let _ = dotenvy::from_path_override(&project_env);
        }
    }
    resolve_config(&config_path)
}

fn resolve_as_of(value: Option<&str>) -> Result<NaiveDate> {
    match value {
        Some(value) => NaiveDate::parse_from_str(value.trim(), DATE_FORMAT)
            .with_context(|| format!("invalid --as-of date `{value}` (expected YYYY-MM-DD)")),
        None => Ok(Local::now().date_naive()),
    }
}

fn diagnostics(runtime: &RuntimeOptions, config: &ReportConfig) -> String {
    let config_path = runtime.config_path();
    format!(
        "config_path={} ({})\nkeywords={}\nsearch.page_size={}\nsearch.cursor_cap={}\nllm.token_budget={}\nllm.title_cap={}\noutput_dir={}",
        normalize_path(&config_path),
        if config_path.exists() { "found" } else { "defaults" },
        config.keywords.len(),
        config.search.page_size,
        config.search.cursor_cap,
        config.llm.token_budget,
        config.llm.title_cap,
        config.report.output_dir
    )
}

fn normalize_path(path: &Path) -> String {
    path.to_string_lossy().replace('\\', "/")
}
