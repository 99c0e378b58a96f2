//! featurelag — lagging feature counts from the command line
//!
//! # Usage
//!
//! ```bash
//! # One page
//! featurelag count --target safari --reference chrome,firefox \
//!     --start 2023-01-01 --end 2025-01-01 --page-size 20
//!
//! # Show the SQL and parameters only
//! featurelag count --target safari --reference chrome --start 2023-01-01 --end 2025-01-01 --dry-run
//!
//! # Structure of the compiled query template
//! featurelag template
//! ```

use chrono::{DateTime, NaiveDate, Utc};
use clap::{Args, Parser, Subcommand, ValueEnum};
use colored::*;
use featurelag::lagging::{self, LAGGING_FEATURE_COUNT_SKELETON};
use featurelag::prelude::*;
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "featurelag")]
#[command(version)]
#[command(about = "Count web features a browser lags behind on", long_about = None)]
#[command(after_help = "EXAMPLES:
    featurelag count -t safari -r chrome,firefox --start 2023-01-01 --end 2025-01-01
    featurelag count -t safari -r chrome --start 2023-01-01 --end 2025-01-01 --all --format json
    featurelag template")]
struct Cli {
    /// Config file (defaults to the user config directory)
    #[arg(short, long, global = true)]
    config: Option<String>,

    /// Database connection URL
    #[arg(long, env = "FEATURELAG_DATABASE_URL", global = true)]
    database_url: Option<String>,

    /// Verbose output
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Count lagging features per release date
    Count(CountArgs),
    /// Show the compiled query template
    Template,
}

#[derive(Args)]
struct CountArgs {
    /// Browser being evaluated
    #[arg(short, long)]
    target: String,

    /// Reference browsers (repeat or comma-separate)
    #[arg(short, long, value_delimiter = ',', required = true)]
    reference: Vec<String>,

    /// Window start, inclusive (YYYY-MM-DD or RFC 3339)
    #[arg(long, value_parser = parse_timestamp)]
    start: DateTime<Utc>,

    /// Window end, exclusive (YYYY-MM-DD or RFC 3339)
    #[arg(long, value_parser = parse_timestamp)]
    end: DateTime<Utc>,

    /// Rows per page (defaults to the configured page size)
    #[arg(short = 'n', long)]
    page_size: Option<u32>,

    /// Token from a previous page
    #[arg(long)]
    page_token: Option<String>,

    /// Follow page tokens until the last page
    #[arg(long)]
    all: bool,

    /// Don't execute, just show the generated SQL
    #[arg(short, long)]
    dry_run: bool,

    /// Output format
    #[arg(short, long, value_enum, default_value = "table")]
    format: OutputFormat,
}

#[derive(Clone, ValueEnum)]
enum OutputFormat {
    Table,
    Json,
}

fn parse_timestamp(s: &str) -> Result<DateTime<Utc>, String> {
    if let Ok(date) = NaiveDate::parse_from_str(s, "%Y-%m-%d") {
        return date
            .and_hms_opt(0, 0, 0)
            .map(|t| t.and_utc())
            .ok_or_else(|| format!("invalid date '{s}'"));
    }
    DateTime::parse_from_rfc3339(s)
        .map(|t| t.with_timezone(&Utc))
        .map_err(|e| format!("invalid timestamp '{s}': {e}"))
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();

    let default_level = if cli.verbose { "debug" } else { "warn" };
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level)),
        )
        .with_writer(std::io::stderr)
        .init();

    let result = match &cli.command {
        Commands::Count(args) => run_count(&cli, args).await,
        Commands::Template => show_template(),
    };

    if let Err(e) = result {
        eprintln!("{} {}", "Error:".red().bold(), e);
        if let Some(source) = std::error::Error::source(&e) {
            eprintln!("  {} {}", "caused by:".dimmed(), source);
        }
        std::process::exit(if e.is_client_error() { 2 } else { 1 });
    }
}

fn load_config(cli: &Cli) -> LagResult<LagConfig> {
    let mut config = match &cli.config {
        Some(path) => LagConfig::load(path)?,
        None => LagConfig::load_default()?,
    };
    if let Some(url) = &cli.database_url {
        config.database_url = Some(url.clone());
    }
    Ok(config)
}

async fn run_count(cli: &Cli, args: &CountArgs) -> LagResult<()> {
    let config = load_config(cli)?;
    let window = TimeWindow::new(args.start, args.end)?;
    let request = LaggingFeatureCountRequest::new(
        args.target.as_str(),
        args.reference.iter().map(String::as_str),
        window,
        args.page_size.unwrap_or(config.default_page_size),
    )
    .with_page_token(args.page_token.clone());

    if args.dry_run {
        let statement = lagging::build_statement(&request, config.max_page_size)?;
        print_statement(&statement);
        return Ok(());
    }

    let Some(url) = config.database_url.as_deref() else {
        return Err(LagError::Config(
            "no database URL. Use --database-url or set FEATURELAG_DATABASE_URL".into(),
        ));
    };
    if cli.verbose {
        eprintln!("{} {}", "Connecting to:".dimmed(), url);
    }

    let db = PgExecutor::connect(url, config.max_connections).await?;
    let client = LaggingClient::new(db, &config)?;

    if args.all {
        let records = client.list_all_lagging_feature_counts(&request).await?;
        let page = Page {
            records,
            next_page_token: None,
        };
        format_output(&page, &args.format);
    } else {
        let page = client.list_lagging_feature_count(&request).await?;
        format_output(&page, &args.format);
    }
    Ok(())
}

fn print_statement(statement: &Statement) {
    println!("{}", "Generated SQL:".green().bold());
    println!("{}", statement.sql().trim().white());
    println!();
    println!("{}", "Parameters:".cyan());
    for (name, value) in statement.params() {
        println!("  @{} = {}", name, value.to_string().yellow());
    }
}

fn format_output(page: &LaggingFeatureCountPage, format: &OutputFormat) {
    match format {
        OutputFormat::Json => {
            println!("{}", serde_json::to_string_pretty(page).unwrap_or_default());
        }
        OutputFormat::Table => {
            if page.records.is_empty() {
                println!("{}", "(no results)".dimmed());
            } else {
                println!("{}", format!("{:10} │ {}", "release", "count").white().bold());
                println!("{}", format!("{}─┼─{}", "─".repeat(10), "─".repeat(5)).dimmed());
                for metric in &page.records {
                    println!(
                        "{:10} │ {}",
                        metric.release_date.format("%Y-%m-%d"),
                        metric.count.to_string().cyan()
                    );
                }
                println!();
                println!("{} row(s) returned", page.records.len().to_string().cyan());
            }
            if let Some(token) = &page.next_page_token {
                println!("{} {}", "Next page token:".dimmed(), token.yellow());
            }
        }
    }
}

fn show_template() -> LagResult<()> {
    let template = lagging::lagging_feature_count_template()?;

    println!("{}", "Lagging feature count template".cyan().bold());
    println!();
    println!("{}", "Skeleton:".green().bold());
    println!("{}", LAGGING_FEATURE_COUNT_SKELETON.trim().dimmed());
    println!();
    println!("{}", "Structure:".green().bold());
    print!("{}", template.outline());
    Ok(())
}
