use std::env;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result, bail};
use clap::{Args, CommandFactory, FromArgMatches, Parser};
use log::debug;
use selflink_core::api::{MediaWikiClient, MediaWikiClientConfig, login_from_env};
use selflink_core::bot::{BotOptions, BotReport, run_selflink, usage_text};
use selflink_core::config::{WikiConfig, load_config, resolve_config_path};
use selflink_core::interaction::TerminalInteraction;
use selflink_core::local::LocalWiki;
use selflink_core::pagegen::{GeneratorOptions, require_generator};

#[derive(Debug, Parser)]
#[command(
    name = "selflink",
    version,
    about = "Find links from wiki pages to themselves and remove them"
)]
struct Cli {
    #[command(flatten)]
    generator: GeneratorArgs,
    #[arg(long, help = "Unlink always but don't prompt for each replacement")]
    always: bool,
    #[arg(long, help = "Show what would change without saving")]
    simulate: bool,
    #[arg(long, value_name = "TEXT", help = "Edit summary")]
    summary: Option<String>,
    #[arg(long, value_name = "PATH", help = "Work on a directory of .wiki files")]
    dir: Option<PathBuf>,
    #[arg(long, value_name = "PATH", help = "Config file (default: selflink.toml)")]
    config: Option<PathBuf>,
    #[arg(long, help = "Print the run report as JSON")]
    json: bool,
}

#[derive(Debug, Args)]
#[command(next_help_heading = "Page selection")]
struct GeneratorArgs {
    #[arg(long = "page", value_name = "TITLE", help = "Work on a single page")]
    pages: Vec<String>,
    #[arg(long, value_name = "PATH", help = "Read page titles from a file")]
    file: Option<PathBuf>,
    #[arg(long = "cat", value_name = "NAME", help = "Work on a category's members")]
    category: Option<String>,
    #[arg(long, help = "Work on all pages")]
    allpages: bool,
    #[arg(
        long = "recentchanges",
        value_name = "TIMESTAMP",
        help = "Work on pages changed since TIMESTAMP"
    )]
    recent_changes: Option<String>,
    #[arg(long, value_name = "QUERY", help = "Work on full text search results")]
    search: Option<String>,
    #[arg(long = "namespace", value_name = "ID", help = "Only pages in namespace ID")]
    namespaces: Vec<i32>,
    #[arg(long, value_name = "N", help = "Stop after N pages")]
    limit: Option<usize>,
}

impl From<GeneratorArgs> for GeneratorOptions {
    fn from(args: GeneratorArgs) -> Self {
        Self {
            pages: args.pages,
            file: args.file,
            category: args.category,
            allpages: args.allpages,
            recent_changes: args.recent_changes,
            search: args.search,
            namespaces: args.namespaces,
            limit: args.limit,
        }
    }
}

fn main() -> Result<()> {
    let matches = Cli::command().after_long_help(usage_text()).get_matches();
    let cli = Cli::from_arg_matches(&matches)?;

    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("warn")).init();

    let generator = GeneratorOptions::from(cli.generator);
    require_generator(&generator)?;

    let cwd = env::current_dir().context("failed to resolve current directory")?;
    let config_path = resolve_config_path(cli.config.as_deref(), &cwd);
    load_env_files(&config_path);
    let config = load_config(&config_path)?;
    debug!("config: {}", normalize_path(&config_path));

    let options = BotOptions {
        always: cli.always,
        simulate: cli.simulate,
        summary: cli.summary.unwrap_or_else(|| config.summary()),
        context: config.context(),
    };

    let mut ui = TerminalInteraction::stdio();
    let report = match &cli.dir {
        Some(dir) => {
            let mut site = LocalWiki::open(dir)?;
            run_selflink(&mut site, &mut ui, &generator, options)?
        }
        None => {
            let mut site = connect(&config, options.simulate)?;
            run_selflink(&mut site, &mut ui, &generator, options)?
        }
    };

    if cli.json {
        println!("{}", serde_json::to_string_pretty(&report)?);
    } else {
        print_report(&report);
    }
    if !report.success {
        bail!("{} page(s) could not be saved", report.errors.len());
    }
    Ok(())
}

fn load_env_files(config_path: &Path) {
    dotenvy::dotenv().ok();
    if let Some(parent) = config_path.parent() {
        let config_env = parent.join(".env");
        if config_env.exists() {
            let _ = dotenvy::from_path_override(&config_env);
        }
    }
}

fn connect(config: &WikiConfig, simulate: bool) -> Result<MediaWikiClient> {
    let mut client = MediaWikiClient::new(MediaWikiClientConfig::from_config(config))?;
    if !simulate {
        login_from_env(&mut client)?;
    }
    Ok(client)
}

fn print_report(report: &BotReport) {
    println!();
    println!("selflink report");
    println!("site: {}", report.site);
    println!("simulate: {}", format_flag(report.simulate));
    println!("requested_pages: {}", report.requested_pages);
    println!("processed: {}", report.processed);
    println!("saved: {}", report.saved);
    println!("unchanged: {}", report.unchanged);
    println!("skipped: {}", report.skipped);
    println!("quit: {}", format_flag(report.quit));
    println!("request_count: {}", report.request_count);
    if !report.errors.is_empty() {
        println!("errors:");
        for error in &report.errors {
            println!("  - {error}");
        }
    }
}

fn normalize_path(path: &Path) -> String {
    path.to_string_lossy().replace('\\', "/")
}

fn format_flag(value: bool) -> &'static str {
    if value { "yes" } else { "no" }
}
