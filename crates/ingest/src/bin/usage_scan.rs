//! Scans the local coding-agent logs and prints the priced usage
//! entries as JSON on stdout. Warnings and the scan summary go to
//! stderr so the output stays pipeable.

use std::path::PathBuf;
use std::process::ExitCode;

use ingest::{ScanOutcome, Scanner, SourceSet, default_home};
use tracing::warn;
use usage_core::PricingTable;

struct Args {
    home: Option<PathBuf>,
    pricing: Option<PathBuf>,
    store: Option<PathBuf>,
    incremental: bool,
}

const USAGE: &str = "usage: usage-scan [--home DIR] [--pricing FILE] [--store FILE] [--incremental]

  --home DIR      scan logs under DIR instead of $HOME
  --pricing FILE  load pricing rules from a JSON file instead of the built-ins
  --store FILE    cursor store path (default: ~/.cache/usage-scan/cursors.json)
  --incremental   continue from stored cursors instead of a full rescan
";

fn parse_args() -> Result<Args, String> {
    let mut args = Args {
        home: None,
        pricing: None,
        store: None,
        incremental: false,
    };
    let mut iter = std::env::args().skip(1);
    while let Some(arg) = iter.next() {
        match arg.as_str() {
            "--home" => args.home = Some(expect_value(&arg, iter.next())?),
            "--pricing" => args.pricing = Some(expect_value(&arg, iter.next())?),
            "--store" => args.store = Some(expect_value(&arg, iter.next())?),
            "--incremental" => args.incremental = true,
            "--help" | "-h" => {
                print!("{USAGE}");
                std::process::exit(0);
            }
            other => return Err(format!("unknown argument: {other}")),
        }
    }
    Ok(args)
}

fn expect_value(flag: &str, value: Option<String>) -> Result<PathBuf, String> {
    value
        .map(PathBuf::from)
        .ok_or_else(|| format!("{flag} requires a value"))
}

fn default_store_path() -> PathBuf {
    default_home().join(".cache/usage-scan/cursors.json")
}

fn main() -> ExitCode {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .with_writer(std::io::stderr)
        .init();

    let args = match parse_args() {
        Ok(args) => args,
        Err(message) => {
            eprintln!("{message}");
            eprint!("{USAGE}");
            return ExitCode::FAILURE;
        }
    };

    let pricing = match &args.pricing {
        Some(path) => match PricingTable::load(path) {
            Ok(table) => table,
            Err(err) => {
                eprintln!("failed to load pricing from {}: {err}", path.display());
                return ExitCode::FAILURE;
            }
        },
        None => PricingTable::builtin(),
    };

    let sources = match args.home {
        Some(home) => SourceSet::with_home(home),
        None => SourceSet::from_env(),
    };
    let store_path = args.store.unwrap_or_else(default_store_path);
    let mut scanner = Scanner::new(sources, pricing, store_path);

    let ScanOutcome { entries, stats } = if args.incremental {
        scanner.scan_all_usage_incremental()
    } else {
        scanner.scan_all_usage()
    };

    for issue in &stats.issues {
        warn!(file = %issue.file_path, message = %issue.message, "scan issue");
    }
    match serde_json::to_string_pretty(&entries) {
        Ok(json) => println!("{json}"),
        Err(err) => {
            eprintln!("failed to encode entries: {err}");
            return ExitCode::FAILURE;
        }
    }
    eprintln!(
        "{} entries from {} files ({} skipped, {} duplicates, {} unpriced, {} issues)",
        entries.len(),
        stats.files_scanned,
        stats.files_skipped,
        stats.duplicates,
        stats.unpriced,
        stats.issues.len()
    );
    ExitCode::SUCCESS
}
