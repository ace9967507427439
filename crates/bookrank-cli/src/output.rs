use std::io::Write;

use bookrank_core::strategy::StrategyRule;
use bookrank_core::{AwardBook, Book, BookDetails, CacheStats, FetchError, FetchResult};
use owo_colors::OwoColorize;

/// Whether to use colored output.
#[derive(Debug, Clone, Copy)]
pub struct ColorMode(pub bool);

impl ColorMode {
    pub fn enabled(&self) -> bool {
        self.0
    }
}

fn print_heading(w: &mut dyn Write, title: &str, color: ColorMode) -> std::io::Result<()> {
    let sep = "=".repeat(60);
    if color.enabled() {
        writeln!(w, "{}", sep.bold())?;
        writeln!(w, "{}", title.bold())?;
        writeln!(w, "{}", sep.bold())?;
    } else {
        writeln!(w, "{}", sep)?;
        writeln!(w, "{}", title)?;
        writeln!(w, "{}", sep)?;
    }
    Ok(())
}

/// Print where a result came from. Fresh and cached results print nothing
/// unless `verbose`; degraded and unavailable results always do.
pub fn print_tier<T>(
    w: &mut dyn Write,
    result: &FetchResult<T>,
    verbose: bool,
    color: ColorMode,
) -> std::io::Result<()> {
    match result {
        FetchResult::Fresh(_) | FetchResult::Cached(_) => {
            if verbose {
                let msg = format!("({})", result.tier());
                if color.enabled() {
                    writeln!(w, "{}", msg.dimmed())?;
                } else {
                    writeln!(w, "{}", msg)?;
                }
            }
        }
        FetchResult::Degraded { cause, .. } => {
            let msg = format!("Possibly stale: {}", describe_cause(cause));
            if color.enabled() {
                writeln!(w, "{}", msg.yellow())?;
            } else {
                writeln!(w, "{}", msg)?;
            }
        }
        FetchResult::Unavailable(cause) => {
            if color.enabled() {
                writeln!(w, "{} {}", "Unavailable:".red().bold(), describe_cause(cause))?;
            } else {
                writeln!(w, "Unavailable: {}", describe_cause(cause))?;
            }
        }
    }
    Ok(())
}

fn describe_cause(cause: &FetchError) -> String {
    match cause {
        FetchError::RateLimited { retry_after } => {
            format!("source is rate limited, retry in {}s", retry_after.as_secs().max(1))
        }
        other => other.to_string(),
    }
}

/// Print one bestseller list.
pub fn print_book_list(
    w: &mut dyn Write,
    title: &str,
    result: &FetchResult<Vec<Book>>,
    verbose: bool,
    color: ColorMode,
) -> std::io::Result<()> {
    print_heading(w, title, color)?;
    print_tier(w, result, verbose, color)?;

    let Some(books) = result.value() else {
        writeln!(w)?;
        return Ok(());
    };
    if books.is_empty() {
        writeln!(w, "  (no books)")?;
    }
    for book in books {
        print_book_line(w, book, color)?;
    }
    writeln!(w)?;
    Ok(())
}

fn print_book_line(w: &mut dyn Write, book: &Book, color: ColorMode) -> std::io::Result<()> {
    let movement = match (book.rank_last_week, book.rank) {
        (0, _) => "new".to_string(),
        (last, now) if last > now => format!("up {}", last - now),
        (last, now) if last < now => format!("down {}", now - last),
        _ => "=".to_string(),
    };
    let title = truncate(&book.title, 50);
    if color.enabled() {
        writeln!(
            w,
            "{:>3}. {} {} {}",
            book.rank,
            title.cyan(),
            "by".dimmed(),
            book.author
        )?;
    } else {
        writeln!(w, "{:>3}. {} by {}", book.rank, title, book.author)?;
    }

    let mut meta = format!("{} week(s) on list, {}", book.weeks_on_list, movement);
    if !book.id.is_empty() {
        meta.push_str(&format!(", ISBN {}", book.id));
    }
    if color.enabled() {
        writeln!(w, "     {}", meta.dimmed())?;
    } else {
        writeln!(w, "     {}", meta)?;
    }
    Ok(())
}

/// Print keyword search matches, one line per book with its list.
pub fn print_search_results(
    w: &mut dyn Write,
    keyword: &str,
    result: &FetchResult<Vec<Book>>,
    verbose: bool,
    color: ColorMode,
) -> std::io::Result<()> {
    print_heading(w, &format!("Search: \"{}\"", keyword), color)?;
    print_tier(w, result, verbose, color)?;

    let Some(books) = result.value() else {
        return Ok(());
    };
    if books.is_empty() {
        writeln!(w, "No matching books.")?;
        return Ok(());
    }
    for book in books {
        let line = format!("{} by {}", truncate(&book.title, 50), book.author);
        if color.enabled() {
            writeln!(w, "  {}  {}", line, format!("[{} #{}]", book.category_name, book.rank).dimmed())?;
        } else {
            writeln!(w, "  {}  [{} #{}]", line, book.category_name, book.rank)?;
        }
    }
    writeln!(w)?;
    writeln!(w, "{} match(es)", books.len())?;
    Ok(())
}

/// Print book details for one ISBN.
pub fn print_details(
    w: &mut dyn Write,
    isbn: &str,
    result: &FetchResult<BookDetails>,
    verbose: bool,
    color: ColorMode,
) -> std::io::Result<()> {
    print_heading(w, &format!("ISBN {}", isbn), color)?;
    print_tier(w, result, verbose, color)?;

    let Some(details) = result.value() else {
        return Ok(());
    };

    let mut field = |label: &str, value: &str| -> std::io::Result<()> {
        if color.enabled() {
            writeln!(w, "{} {}", format!("{}:", label).bold(), value)
        } else {
            writeln!(w, "{}: {}", label, value)
        }
    };

    field("Title", &details.title)?;
    if !details.authors.is_empty() {
        field("Authors", &details.authors.join(", "))?;
    }
    if let Some(ref publisher) = details.publisher {
        field("Publisher", publisher)?;
    }
    if let Some(ref date) = details.published_date {
        field("Published", date)?;
    }
    if let Some(pages) = details.page_count {
        field("Pages", &pages.to_string())?;
    }
    if let Some(ref language) = details.language {
        field("Language", language)?;
    }
    if let Some(ref cover) = details.cover_url {
        field("Cover", cover)?;
    }
    if let Some(ref description) = details.description {
        writeln!(w)?;
        writeln!(w, "{}", truncate(description, 600))?;
    }
    Ok(())
}

/// Print award winners, newest first as returned.
pub fn print_awards(
    w: &mut dyn Write,
    award_name: &str,
    years: (i32, i32),
    result: &FetchResult<Vec<AwardBook>>,
    verbose: bool,
    color: ColorMode,
) -> std::io::Result<()> {
    print_heading(w, &format!("{} ({}-{})", award_name, years.0, years.1), color)?;
    print_tier(w, result, verbose, color)?;

    let Some(books) = result.value() else {
        return Ok(());
    };
    if books.is_empty() {
        writeln!(w, "No winners found in this range.")?;
        return Ok(());
    }
    for book in books {
        let year = if book.year > 0 {
            book.year.to_string()
        } else {
            "----".to_string()
        };
        let author = if book.author.is_empty() {
            "unknown author"
        } else {
            book.author.as_str()
        };
        if color.enabled() {
            writeln!(w, "  {}  {} {} {}", year.dimmed(), truncate(&book.title, 50).cyan(), "by".dimmed(), author)?;
        } else {
            writeln!(w, "  {}  {} by {}", year, truncate(&book.title, 50), author)?;
        }
    }
    writeln!(w)?;
    Ok(())
}

/// Print the "last updated" line under the category lists.
pub fn print_latest_update(
    w: &mut dyn Write,
    latest: Option<u64>,
    color: ColorMode,
) -> std::io::Result<()> {
    let msg = match latest {
        Some(ts) => format!("Lists last updated {}", format_timestamp(ts)),
        None => "Lists have not been cached yet".to_string(),
    };
    if color.enabled() {
        writeln!(w, "{}", msg.dimmed())?;
    } else {
        writeln!(w, "{}", msg)?;
    }
    Ok(())
}

/// Print cache counters and tier sizes.
pub fn print_stats(
    w: &mut dyn Write,
    stats: &CacheStats,
    latest: Option<u64>,
    color: ColorMode,
) -> std::io::Result<()> {
    print_heading(w, "CACHE", color)?;
    match (stats.backend, stats.persistent_entries) {
        (Some(backend), Some(n)) => writeln!(w, "  Persistent ({}): {} entries", backend, n)?,
        (Some(backend), None) => writeln!(w, "  Persistent ({}): unreadable", backend)?,
        (None, _) => writeln!(w, "  Persistent: none (memory only)")?,
    }
    writeln!(w, "  Memory: {} entries", stats.memory_entries)?;
    print_latest_update(w, latest, color)?;

    // Counters only cover this process, so they are mostly zero for one-shot commands.
    let counters = format!(
        "hits: {} memory, {} persistent; fetches: {} fresh, {} degraded, {} unavailable",
        stats.memory_hits, stats.persistent_hits, stats.fresh, stats.degraded, stats.unavailable
    );
    if color.enabled() {
        writeln!(w, "  {}", counters.dimmed())?;
    } else {
        writeln!(w, "  {}", counters)?;
    }
    if stats.persist_failures > 0 {
        let msg = format!("Persistent write failures: {}", stats.persist_failures);
        if color.enabled() {
            writeln!(w, "  {}", msg.yellow())?;
        } else {
            writeln!(w, "  {}", msg)?;
        }
    }
    Ok(())
}

/// Confirm a `cache clear`, naming the persistent backend that was emptied.
pub fn print_cleared(
    w: &mut dyn Write,
    backend: Option<&str>,
    color: ColorMode,
) -> std::io::Result<()> {
    let msg = match backend {
        Some(backend) => format!("Cache cleared ({backend})."),
        None => "Memory cache cleared; no persistent cache is configured.".to_string(),
    };
    if color.enabled() {
        writeln!(w, "{}", msg.green())
    } else {
        writeln!(w, "{}", msg)
    }
}

/// Print the per-resource caching strategy table.
pub fn print_strategies(
    w: &mut dyn Write,
    table: &[StrategyRule],
    color: ColorMode,
) -> std::io::Result<()> {
    for rule in table {
        let resource = enum_label(&rule.resource);
        let strategy = enum_label(&rule.strategy);
        if color.enabled() {
            writeln!(w, "  {:<10} {}", resource.bold(), strategy)?;
        } else {
            writeln!(w, "  {:<10} {}", resource, strategy)?;
        }
    }
    Ok(())
}

/// The snake_case name serde gives a unit variant.
fn enum_label<T: serde::Serialize>(value: &T) -> String {
    match serde_json::to_value(value) {
        Ok(serde_json::Value::String(s)) => s,
        _ => String::new(),
    }
}

/// Local time for an epoch-seconds write time.
pub fn format_timestamp(epoch_secs: u64) -> String {
    i64::try_from(epoch_secs)
        .ok()
        .and_then(|secs| chrono::DateTime::from_timestamp(secs, 0))
        .map(|utc| {
            utc.with_timezone(&chrono::Local)
                .format("%Y-%m-%d %H:%M")
                .to_string()
        })
        .unwrap_or_else(|| epoch_secs.to_string())
}

fn truncate(s: &str, max: usize) -> String {
    match s.char_indices().nth(max) {
        Some((idx, _)) => format!("{}...", &s[..idx]),
        None => s.to_string(),
    }
}
