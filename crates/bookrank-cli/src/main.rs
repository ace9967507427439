use std::io::{IsTerminal, Write};
use std::path::{Path, PathBuf};
use std::process::ExitCode;

use bookrank_core::config_file::{self, ConfigFile};
use bookrank_core::models::{AWARDS, find_award};
use bookrank_core::{BookService, CachePayload, Config, FetchCache, FetchResult, StoreBackend};
use chrono::Datelike;
use clap::{Parser, Subcommand};

mod output;

use output::ColorMode;

/// BookRank - bestseller lists, book details and award winners, cached for offline use
#[derive(Parser, Debug)]
#[command(version, about, long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Command,

    /// Path to the persistent cache (SQLite file, or directory for the file backend)
    #[arg(long, global = true)]
    cache_path: Option<PathBuf>,

    /// Persistent cache backend: sqlite or file
    #[arg(long, global = true)]
    cache_backend: Option<String>,

    /// Keep the cache in memory only for this run
    #[arg(long, global = true, conflicts_with = "cache_path")]
    memory_only: bool,

    /// NYT Books API key
    #[arg(long, global = true)]
    nyt_key: Option<String>,

    /// Disable colored output
    #[arg(long, global = true)]
    no_color: bool,

    /// Increase log verbosity (-v info, -vv debug)
    #[arg(short, long, global = true, action = clap::ArgAction::Count)]
    verbose: u8,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Show a bestseller list, or every configured list
    List {
        /// Category id (e.g. hardcover-fiction), or "all"
        #[arg(default_value = "all")]
        category: String,

        /// Bypass cached values and fetch from the source
        #[arg(long)]
        refresh: bool,
    },

    /// Search the bestseller lists by title or author
    Search {
        keyword: String,

        #[arg(long)]
        refresh: bool,
    },

    /// Show book details for an ISBN (Google Books, then Open Library)
    Book {
        isbn: String,

        #[arg(long)]
        refresh: bool,
    },

    /// Show winners of a literary award (lists known awards when omitted)
    Awards {
        award: Option<String>,

        /// First publication year (inclusive)
        #[arg(long, default_value_t = 2020)]
        from: i32,

        /// Last publication year (inclusive, default: current year)
        #[arg(long)]
        to: Option<i32>,

        #[arg(long)]
        refresh: bool,
    },

    /// List the configured bestseller categories
    Categories,

    /// Inspect or clear the cache
    Cache {
        #[command(subcommand)]
        action: CacheAction,
    },

    /// Manage the config file
    Config {
        #[command(subcommand)]
        action: ConfigAction,
    },

    /// Print the offline caching strategy for each resource kind
    Strategies {
        /// Print as JSON
        #[arg(long)]
        json: bool,
    },
}

#[derive(Subcommand, Debug)]
enum CacheAction {
    /// Show tier sizes and the last list update
    Stats,
    /// Remove every cached entry from memory and disk
    Clear,
}

#[derive(Subcommand, Debug)]
enum ConfigAction {
    /// Write the current settings to the platform config file
    Init {
        /// Overwrite an existing file
        #[arg(long)]
        force: bool,
    },
    /// Print the resolved settings (keys redacted)
    Show,
}

/// Exit code when a lookup had nothing to serve.
const EXIT_UNAVAILABLE: u8 = 2;

#[tokio::main]
async fn main() -> anyhow::Result<ExitCode> {
    dotenvy::dotenv().ok();
    let cli = Cli::parse();
    init_tracing(cli.verbose);

    let config = resolve_config(&cli)?;
    tracing::debug!(?config, "resolved config");
    let color = ColorMode(!cli.no_color && std::io::stdout().is_terminal());
    let verbose = cli.verbose > 0;

    match &cli.command {
        Command::Config { action } => return config_command(action, &config),
        Command::Strategies { json } => return strategies(*json, color),
        Command::Categories => {
            let mut out = std::io::stdout().lock();
            for category in &config.categories {
                writeln!(out, "{:<28} {}", category.id, category.name)?;
            }
            return Ok(ExitCode::SUCCESS);
        }
        Command::Awards { award: None, .. } => {
            let mut out = std::io::stdout().lock();
            for award in AWARDS {
                writeln!(out, "{:<22} {}", award.key, award.name)?;
            }
            return Ok(ExitCode::SUCCESS);
        }
        _ => {}
    }

    let cache = bookrank_core::build_fetch_cache::<CachePayload>(
        config.cache_path.as_deref(),
        config.cache_backend,
    );
    let service = BookService::from_config(&config, cache)?;
    let mut out = std::io::stdout().lock();

    let served = match cli.command {
        Command::List { category, refresh } if category == "all" => {
            let all = service.all_categories(refresh).await;
            for (category, result) in &all.lists {
                output::print_book_list(&mut out, &category.name, result, verbose, color)?;
            }
            output::print_latest_update(&mut out, all.latest_update, color)?;
            all.lists.iter().any(|(_, r)| !r.is_unavailable())
        }
        Command::List { category, refresh } => {
            let result = service.books_by_category(&category, refresh).await?;
            let name = service
                .category(&category)
                .map(|c| c.name.clone())
                .unwrap_or(category);
            output::print_book_list(&mut out, &name, &result, verbose, color)?;
            has_value(&result)
        }
        Command::Search { keyword, refresh } => {
            let result = service.search(&keyword, refresh).await?;
            output::print_search_results(&mut out, keyword.trim(), &result, verbose, color)?;
            has_value(&result)
        }
        Command::Book { isbn, refresh } => {
            let result = service.book_details(&isbn, refresh).await?;
            output::print_details(&mut out, isbn.trim(), &result, verbose, color)?;
            has_value(&result)
        }
        Command::Awards {
            award: Some(award),
            from,
            to,
            refresh,
        } => {
            let to = to.unwrap_or_else(|| chrono::Local::now().year());
            let result = service.award_winners(&award, from, to, refresh).await?;
            let name = find_award(&award).map(|a| a.name).unwrap_or(award.as_str());
            output::print_awards(&mut out, name, (from, to), &result, verbose, color)?;
            has_value(&result)
        }
        Command::Cache { action } => {
            let cache = service.cache();
            match action {
                CacheAction::Stats => {
                    output::print_stats(&mut out, &cache.stats(), service.latest_update(), color)?;
                }
                CacheAction::Clear => {
                    clear_cache(cache, config.cache_path.as_deref(), &mut out, color)?;
                }
            }
            true
        }
        Command::Awards { award: None, .. }
        | Command::Categories
        | Command::Config { .. }
        | Command::Strategies { .. } => true,
    };

    if served {
        Ok(ExitCode::SUCCESS)
    } else {
        Ok(ExitCode::from(EXIT_UNAVAILABLE))
    }
}

/// Empty both tiers. Fails when a persistent cache was configured but could
/// not be opened, since then nothing on disk was touched.
fn clear_cache(
    cache: &FetchCache<CachePayload>,
    cache_path: Option<&Path>,
    out: &mut dyn Write,
    color: ColorMode,
) -> anyhow::Result<()> {
    if let Some(path) = cache_path
        && !cache.has_persistence()
    {
        anyhow::bail!(
            "cache at {} could not be opened; nothing on disk was cleared",
            path.display()
        );
    }
    cache.clear()?;
    output::print_cleared(out, cache.stats().backend, color)?;
    Ok(())
}

fn has_value<T>(result: &FetchResult<T>) -> bool {
    !result.is_unavailable()
}

fn init_tracing(verbose: u8) {
    let level = match verbose {
        0 => tracing::Level::WARN,
        1 => tracing::Level::INFO,
        _ => tracing::Level::DEBUG,
    };
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env().add_directive(level.into()))
        .with_writer(std::io::stderr)
        .with_target(false)
        .init();
}

/// Resolve configuration: CLI flags > env vars > config files > defaults.
fn resolve_config(cli: &Cli) -> anyhow::Result<Config> {
    let file = config_file::load_config();
    let mut config = Config::resolve(&file, |name| std::env::var(name).ok())?;

    if let Some(ref name) = cli.cache_backend {
        let backend: StoreBackend = name
            .parse()
            .map_err(|e: String| anyhow::anyhow!("--cache-backend: {}", e))?;
        // A path that was only the old backend's default follows the new backend.
        if config.cache_path == bookrank_core::default_cache_path(config.cache_backend) {
            config.cache_path = bookrank_core::default_cache_path(backend);
        }
        config.cache_backend = backend;
    }
    if let Some(ref path) = cli.cache_path {
        config.cache_path = Some(path.clone());
    }
    if cli.memory_only {
        config.cache_path = None;
    }
    if let Some(ref key) = cli.nyt_key {
        config.nyt_api_key = Some(key.clone());
    }
    Ok(config)
}

fn config_command(action: &ConfigAction, config: &Config) -> anyhow::Result<ExitCode> {
    let mut out = std::io::stdout().lock();
    match action {
        ConfigAction::Init { force } => {
            let path = config_file::config_path()
                .ok_or_else(|| anyhow::anyhow!("could not determine config directory"))?;
            if path.exists() && !*force {
                anyhow::bail!(
                    "Config file already exists at {}. Use --force to overwrite.",
                    path.display()
                );
            }
            let file: ConfigFile = config.to_config_file();
            let written = config_file::save_config(&file)?;
            writeln!(out, "Wrote {}", written.display())?;
        }
        ConfigAction::Show => {
            writeln!(out, "{:#?}", config)?;
            if let Some(path) = config_file::config_path() {
                let state = if path.exists() { "" } else { " (not present)" };
                writeln!(out, "config file: {}{}", path.display(), state)?;
            }
        }
    }
    Ok(ExitCode::SUCCESS)
}

fn strategies(json: bool, color: ColorMode) -> anyhow::Result<ExitCode> {
    let table = bookrank_core::strategy::strategy_table();
    let mut out = std::io::stdout().lock();
    if json {
        writeln!(out, "{}", serde_json::to_string_pretty(&table)?)?;
    } else {
        output::print_strategies(&mut out, &table, color)?;
    }
    Ok(ExitCode::SUCCESS)
}
