//! sqldeps - SQL dependency extraction CLI
//!
//! # Usage
//!
//! ```bash
//! # Extract one file
//! sqldeps extract query.sql --provider-cmd my-extractor
//!
//! # Extract a folder on every core, then match against a live database
//! sqldeps extract queries/ -r -n -1 --match-schema --database-url postgres://localhost/dw
//!
//! # Check a saved profile against a snapshot
//! sqldeps diff profile.json --snapshot snapshot.json
//! ```

use anyhow::{bail, Context, Result};
use clap::{Args, Parser, Subcommand, ValueEnum};
use colored::*;
use sqldeps::cache::Cache;
use sqldeps::config::Config;
use sqldeps::database::{
    connect, validate_profile, Dialect, PgSchemaSource, SchemaSource, StaticSchema,
};
use sqldeps::executor::{Executor, RunReport};
use sqldeps::extractor::CommandExtractor;
use sqldeps::files::find_sql_files;
use sqldeps::profile::Profile;
use sqldeps::schema::{schema_diff, DiffRow, MatchRow, SchemaEntry};
use sqldeps::SqlDepsResult;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "sqldeps")]
#[command(version)]
#[command(about = "Extract SQL table/column dependencies and match them against a database", long_about = None)]
#[command(after_help = "EXAMPLES:
    sqldeps extract query.sql --provider-cmd my-extractor
    sqldeps extract queries/ -r -n -1 --rpm 50 -o deps.json
    sqldeps match deps.json --database-url postgres://localhost/dw --schemas public,sales
    sqldeps cache clear")]
struct Cli {
    /// Config file (default: ./sqldeps.toml)
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    /// Output format
    #[arg(short, long, value_enum, default_value = "json", global = true)]
    format: OutputFormat,

    /// Verbose output
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Clone, Copy, ValueEnum)]
enum OutputFormat {
    Table,
    Json,
}

#[derive(Subcommand)]
enum Commands {
    /// Extract dependencies from a SQL file or folder
    Extract(ExtractArgs),
    /// Expand a saved profile into the database columns it covers
    Match {
        /// Profile JSON written by `extract`
        profile: PathBuf,

        #[command(flatten)]
        schema: SchemaArgs,
    },
    /// Check which references of a saved profile exist in the database
    Diff {
        /// Profile JSON written by `extract`
        profile: PathBuf,

        #[command(flatten)]
        schema: SchemaArgs,
    },
    /// Manage the extraction cache
    Cache {
        #[command(subcommand)]
        action: CacheAction,
    },
}

#[derive(Args)]
struct ExtractArgs {
    /// SQL file or folder
    path: PathBuf,

    /// Descend into subfolders
    #[arg(short, long)]
    recursive: bool,

    /// Worker count, -1 for every core
    #[arg(short = 'n', long, allow_negative_numbers = true)]
    workers: Option<i32>,

    /// Provider calls per minute, 0 to disable
    #[arg(long)]
    rpm: Option<i64>,

    /// Ignore cached results
    #[arg(long)]
    no_cache: bool,

    /// Remove cached results once done
    #[arg(long)]
    clear_cache: bool,

    /// Extraction program (SQL on stdin, profile JSON on stdout)
    #[arg(long, env = "SQLDEPS_PROVIDER_CMD")]
    provider_cmd: Option<String>,

    /// File extensions to pick up in folders
    #[arg(long, value_delimiter = ',')]
    extensions: Vec<String>,

    /// Output file path
    #[arg(short, long)]
    output: Option<PathBuf>,

    /// Match the result against the database schema
    #[arg(long)]
    match_schema: bool,

    #[command(flatten)]
    schema: SchemaArgs,
}

#[derive(Args)]
struct SchemaArgs {
    /// Database connection URL
    #[arg(long, env = "SQLDEPS_DATABASE_URL")]
    database_url: Option<String>,

    /// Schemas to read (default: all)
    #[arg(long, value_delimiter = ',')]
    schemas: Vec<String>,

    /// Database dialect
    #[arg(long)]
    dialect: Option<String>,

    /// Schema snapshot JSON used instead of a live database
    #[arg(long)]
    snapshot: Option<PathBuf>,
}

#[derive(Subcommand)]
enum CacheAction {
    /// Remove cached results
    Clear {
        /// Cache directory
        #[arg(long)]
        cache_dir: Option<PathBuf>,
    },
}

/// Live database or saved snapshot.
enum Source {
    Live(PgSchemaSource),
    Snapshot(StaticSchema),
}

impl SchemaSource for Source {
    async fn fetch_schema(&self, target_schemas: &[String]) -> SqlDepsResult<Vec<SchemaEntry>> {
        match self {
            Source::Live(source) => source.fetch_schema(target_schemas).await,
            Source::Snapshot(source) => source.fetch_schema(target_schemas).await,
        }
    }
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();
    init_tracing(cli.verbose);

    if let Err(e) = run(&cli).await {
        eprintln!("{} {:#}", "Error:".red().bold(), e);
        std::process::exit(1);
    }
}

fn init_tracing(verbose: bool) {
    let default = if verbose { "sqldeps=debug" } else { "sqldeps=info" };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_target(false)
        .init();
}

async fn run(cli: &Cli) -> Result<()> {
    let config = Config::load(cli.config.as_deref())?;

    match &cli.command {
        Commands::Extract(args) => extract(args, &config, cli.format).await,
        Commands::Match { profile, schema } => {
            let profile = read_profile(profile)?;
            let rows = match_against(&profile, schema, &config).await?;
            print_matches(&rows, cli.format, None)
        }
        Commands::Diff { profile, schema } => {
            let profile = read_profile(profile)?;
            let source = open_source(schema, &config).await?;
            let corpus = source.fetch_schema(&target_schemas(schema, &config)).await?;
            let rows = schema_diff(&profile.references(), &corpus);
            print_diff(&rows, cli.format)
        }
        Commands::Cache {
            action: CacheAction::Clear { cache_dir },
        } => {
            let dir = cache_dir.as_ref().unwrap_or(&config.extract.cache_dir);
            if !Cache::new(dir).cleanup() {
                bail!("Failed to clean cache at {}", dir.display());
            }
            println!("{} Cache cleared: {}", "✓".green(), dir.display().to_string().cyan());
            Ok(())
        }
    }
}

async fn extract(args: &ExtractArgs, config: &Config, format: OutputFormat) -> Result<()> {
    let extractor = match &args.provider_cmd {
        Some(cmd) => {
            let mut parts = cmd.split_whitespace();
            let program = parts.next().context("--provider-cmd is empty")?;
            CommandExtractor::new(program).args(parts)
        }
        None => config.extractor().context(
            "No extraction provider. Use --provider-cmd or set [provider] command in sqldeps.toml",
        )?,
    };

    let mut options = config.run_options();
    if let Some(workers) = args.workers {
        options.workers = workers;
    }
    if let Some(rpm) = args.rpm {
        options.rpm = rpm;
    }
    options.use_cache &= !args.no_cache;
    options.clear_cache |= args.clear_cache;

    // worker count is checked before anything runs, even for one file
    let executor = Executor::new(Arc::new(extractor), options)?;
    let files = if args.path.is_file() {
        vec![args.path.clone()]
    } else {
        let recursive = args.recursive || config.extract.recursive;
        let extensions = if args.extensions.is_empty() {
            &config.extract.extensions
        } else {
            &args.extensions
        };
        let files = find_sql_files(&args.path, recursive, Some(extensions.as_slice()))?;
        if files.is_empty() {
            bail!("No SQL files found in {}", args.path.display());
        }
        tracing::info!("Found {} SQL file(s) in {}", files.len(), args.path.display());
        files
    };
    let report = executor.run(&files).await;

    report_failures(&report);
    if report.profiles().next().is_none() {
        bail!("Extraction failed for every file");
    }
    let profile = report.merged();

    if args.match_schema {
        match match_against(&profile, &args.schema, config).await {
            Ok(rows) => return print_matches(&rows, format, args.output.as_deref()),
            // extraction stands on its own when the database is out of reach
            Err(e) => eprintln!("{} {:#}", "⚠ Schema match skipped:".yellow(), e),
        }
    }
    emit(render_profile(&profile, format)?, args.output.as_deref())
}

fn report_failures(report: &RunReport) {
    let mut failures: Vec<_> = report.failures().collect();
    if failures.is_empty() {
        return;
    }
    failures.sort();
    eprintln!("{} {} file(s) failed:", "⚠".yellow(), failures.len());
    for (path, error) in failures {
        eprintln!("  {} {}", path.display().to_string().white(), error.dimmed());
    }
}

fn read_profile(path: &Path) -> Result<Profile> {
    let content =
        std::fs::read_to_string(path).with_context(|| format!("Failed to read {}", path.display()))?;
    serde_json::from_str(&content).with_context(|| format!("Invalid profile in {}", path.display()))
}

fn target_schemas(args: &SchemaArgs, config: &Config) -> Vec<String> {
    if args.schemas.is_empty() {
        config.database.schemas.clone()
    } else {
        args.schemas.clone()
    }
}

async fn open_source(args: &SchemaArgs, config: &Config) -> Result<Source> {
    if let Some(snapshot) = &args.snapshot {
        return Ok(Source::Snapshot(StaticSchema::from_json_file(snapshot)?));
    }

    let dialect = args
        .dialect
        .as_deref()
        .unwrap_or(&config.database.dialect)
        .parse::<Dialect>()?;
    let Some(url) = args.database_url.as_ref().or(config.database.url.as_ref()) else {
        bail!("No schema source. Use --snapshot, --database-url or set [database] url");
    };
    tracing::debug!("Connecting to {}", url);
    Ok(Source::Live(connect(dialect, url).await?))
}

async fn match_against(profile: &Profile, args: &SchemaArgs, config: &Config) -> Result<Vec<MatchRow>> {
    let source = open_source(args, config).await?;
    Ok(validate_profile(profile, &source, &target_schemas(args, config)).await?)
}

fn emit(rendered: String, output: Option<&Path>) -> Result<()> {
    match output {
        Some(path) => {
            std::fs::write(path, &rendered)
                .with_context(|| format!("Failed to write {}", path.display()))?;
            println!("{} Wrote {}", "✓".green(), path.display().to_string().cyan());
        }
        None => println!("{}", rendered),
    }
    Ok(())
}

fn render_profile(profile: &Profile, format: OutputFormat) -> Result<String> {
    Ok(match format {
        OutputFormat::Json => serde_json::to_string_pretty(profile)?,
        OutputFormat::Table => {
            let rows = profile
                .rows()
                .into_iter()
                .map(|row| {
                    vec![
                        row.kind.to_string(),
                        row.reference.schema.unwrap_or_default(),
                        row.reference.table,
                        row.reference.column.as_option().unwrap_or_default().to_string(),
                    ]
                })
                .collect();
            render_table(&["type", "schema", "table", "column"], rows)
        }
    })
}

fn print_matches(rows: &[MatchRow], format: OutputFormat, output: Option<&Path>) -> Result<()> {
    let rendered = match format {
        OutputFormat::Json => serde_json::to_string_pretty(rows)?,
        OutputFormat::Table => render_table(
            &["schema", "table", "column", "data_type", "exact_match"],
            rows.iter()
                .map(|row| {
                    vec![
                        row.schema.clone(),
                        row.table.clone(),
                        row.column.clone().unwrap_or_default(),
                        row.data_type.clone().unwrap_or_default(),
                        row.exact_match.to_string(),
                    ]
                })
                .collect(),
        ),
    };
    emit(rendered, output)
}

fn print_diff(rows: &[DiffRow], format: OutputFormat) -> Result<()> {
    let rendered = match format {
        OutputFormat::Json => serde_json::to_string_pretty(rows)?,
        OutputFormat::Table => render_table(
            &["schema", "table", "column", "match_db"],
            rows.iter()
                .map(|row| {
                    let found = if row.match_db {
                        "yes".green().to_string()
                    } else {
                        "no".red().to_string()
                    };
                    vec![
                        row.reference.schema.clone().unwrap_or_default(),
                        row.reference.table.clone(),
                        row.reference.column.as_option().unwrap_or_default().to_string(),
                        found,
                    ]
                })
                .collect(),
        ),
    };
    emit(rendered, None)
}

fn render_table(headers: &[&str], rows: Vec<Vec<String>>) -> String {
    if rows.is_empty() {
        return "(no results)".dimmed().to_string();
    }

    let mut widths: Vec<usize> = headers.iter().map(|h| h.len()).collect();
    for row in &rows {
        for (width, cell) in widths.iter_mut().zip(row) {
            *width = (*width).max(console_len(cell));
        }
    }

    let pad = |cell: &str, width: usize| {
        format!("{}{}", cell, " ".repeat(width.saturating_sub(console_len(cell))))
    };

    let mut lines = Vec::with_capacity(rows.len() + 3);
    let header: Vec<String> = headers.iter().zip(&widths).map(|(h, w)| pad(*h, *w)).collect();
    lines.push(header.join(" │ ").white().bold().to_string());

    let sep: Vec<String> = widths.iter().map(|w| "─".repeat(*w)).collect();
    lines.push(sep.join("─┼─").dimmed().to_string());

    for row in &rows {
        let cells: Vec<String> = row.iter().zip(&widths).map(|(c, w)| pad(c.as_str(), *w)).collect();
        lines.push(cells.join(" │ "));
    }

    lines.push(String::new());
    lines.push(format!("{} row(s)", rows.len().to_string().cyan()));
    lines.join("\n")
}

/// Display width of a cell, ignoring ANSI color codes.
fn console_len(cell: &str) -> usize {
    let mut len = 0;
    let mut in_escape = false;
    for c in cell.chars() {
        match (in_escape, c) {
            (false, '\x1b') => in_escape = true,
            (true, 'm') => in_escape = false,
            (true, _) => {}
            (false, _) => len += 1,
        }
    }
    len
}
