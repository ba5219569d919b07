//! revgraph - print the lane graph of a git repository
//!
//! This is the command-line front-end of the revision graph core.

use std::path::PathBuf;
use std::process::ExitCode;

use revgraph::graph::Revision;
use revgraph::history::{History, HistoryConfig};
use tracing_subscriber::filter::LevelFilter;

fn main() -> ExitCode {
    let args: Vec<String> = std::env::args().collect();

    // Parse simple command line args.
    let mut path = PathBuf::from(".");
    let mut limit: Option<usize> = None;
    let mut json = false;
    let mut use_cache = true;
    let mut verbose = false;
    let mut paths: Vec<String> = Vec::new();

    let mut i = 1;
    while i < args.len() {
        match args[i].as_str() {
            "-n" | "--count" => {
                i += 1;
                match args.get(i).and_then(|n| n.parse().ok()) {
                    Some(n) => limit = Some(n),
                    None => {
                        eprintln!("-n expects a number");
                        return ExitCode::FAILURE;
                    }
                }
            }
            "--json" => json = true,
            "--no-cache" => use_cache = false,
            "-v" | "--verbose" => verbose = true,
            "-h" | "--help" => {
                print_help();
                return ExitCode::SUCCESS;
            }
            "--version" => {
                println!("revgraph v{}", env!("CARGO_PKG_VERSION"));
                return ExitCode::SUCCESS;
            }
            "--" => {
                paths.extend(args[i + 1..].iter().cloned());
                break;
            }
            arg => {
                // Treat as repository path if no flag.
                if !arg.starts_with('-') {
                    path = PathBuf::from(arg);
                } else {
                    eprintln!("Unknown option: {}", arg);
                    return ExitCode::FAILURE;
                }
            }
        }
        i += 1;
    }

    tracing_subscriber::fmt()
        .with_max_level(if verbose {
            LevelFilter::DEBUG
        } else {
            LevelFilter::WARN
        })
        .with_writer(std::io::stderr)
        .init();

    let mut config = HistoryConfig::new(&path).use_cache(use_cache);
    for p in paths {
        config = config.path(p);
    }

    match run(config, limit, json) {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("Error: {}", e);
            ExitCode::FAILURE
        }
    }
}

fn print_help() {
    println!("revgraph - print the lane graph of a git repository");
    println!();
    println!("Usage: revgraph [OPTIONS] [REPOSITORY] [-- PATH...]");
    println!();
    println!("Options:");
    println!("  -n, --count N      Print at most N revisions");
    println!("  --json             Print revisions as JSON lines");
    println!("  --no-cache         Neither read nor write the history cache");
    println!("  -v, --verbose      Log loader progress to stderr");
    println!("  -h, --help         Show this help message");
    println!("  --version          Show version");
    println!();
    println!("Examples:");
    println!("  revgraph                    Graph of the repository in the current directory");
    println!("  revgraph -n 20 ../project   First 20 rows of another repository");
    println!("  revgraph -- src/            Only revisions touching src/");
}

fn run(
    config: HistoryConfig,
    limit: Option<usize>,
    json: bool,
) -> Result<(), Box<dyn std::error::Error>> {
    let use_cache = config.use_cache;
    let history = History::open(config)?;
    let outcome = history.load_blocking()?;
    if outcome.skipped > 0 {
        eprintln!("skipped {} malformed log records", outcome.skipped);
    }

    let rows = history.snapshot().take(limit.unwrap_or(usize::MAX));
    for rev in rows {
        if json {
            println!("{}", to_json(&history, &rev));
        } else {
            println!("{}", format_row(&history, &rev));
        }
    }

    if use_cache && !outcome.from_cache && history.config().paths.is_empty() {
        // a repository without a cache directory is not an error
        if let Err(e) = history.save_cache() {
            tracing::debug!(error = %e, "history cache not written");
        }
    }
    Ok(())
}

fn format_row(history: &History, rev: &Revision) -> String {
    let graph: String = rev.lanes().iter().map(|lane| lane.glyph()).collect();
    let refs: Vec<String> = history
        .refs_for(&rev.id)
        .into_iter()
        .map(|r| r.name)
        .collect();
    let decoration = if refs.is_empty() {
        String::new()
    } else {
        format!(" ({})", refs.join(", "))
    };
    format!(
        "{:<width$} {}{} {}",
        graph,
        rev.id.short(),
        decoration,
        rev.short_log,
        width = graph.chars().count().max(1)
    )
}

fn to_json(history: &History, rev: &Revision) -> serde_json::Value {
    let refs: Vec<serde_json::Value> = history
        .refs_for(&rev.id)
        .into_iter()
        .map(|r| serde_json::json!({ "kind": r.kind.to_string(), "name": r.name }))
        .collect();
    serde_json::json!({
        "id": rev.id.to_string(),
        "parents": rev.parents.iter().map(|p| p.to_string()).collect::<Vec<_>>(),
        "author": rev.author.to_string(),
        "date": rev.author_date.to_rfc3339(),
        "subject": rev.short_log,
        "lanes": rev.lanes(),
        "refs": refs,
    })
}
