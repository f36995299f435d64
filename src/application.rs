//! This module contains the main structure and logic for the whole
//! application: the command line, the search and the watch loop.

use std::io::{self, Write};
use std::process::ExitCode;
use std::time::Duration;

use chrono::Utc;
use clap::{Parser, Subcommand};
use log::{debug, info, trace, LevelFilter};
use regex::Regex;
use simple_logger::SimpleLogger;
use thiserror::Error;
use tokio::sync::watch;
use tokio::time::sleep;

use crate::config::{ConfigError, Settings};
use crate::models::{NormalizedRecord, QueryConfig, Severity};
use crate::state::files::FileSeenSetStore;
use crate::state::{QueryFingerprint, SeenSetStore};
use crate::vulnerabilities::fetchers::nvd::NVDFetcher;
use crate::vulnerabilities::fetchers::{FetchError, Transport};
use crate::watcher::{self, WatchError};
use crate::writers::OutputFormat;

/// The widest search window accepted, about a hundred years.
const MAX_WINDOW_DAYS: i64 = 36_500;
/// Printed when Ctrl-C stops a watch.
const INTERRUPTED_MESSAGE: &str = "\nWatch interrupted by user.";

/// The ways the application can fail.
#[derive(Debug, Error)]
pub enum ApplicationError {
    #[error(transparent)]
    Config(#[from] ConfigError),
    #[error(transparent)]
    Fetch(#[from] FetchError),
    #[error(transparent)]
    Watch(#[from] WatchError),
    #[error("unable to write the output: {0}")]
    Output(#[from] io::Error),
    #[error("unable to start the async runtime: {0}")]
    Runtime(io::Error),
    #[error("CLI arguments haven't been read")]
    NoArguments,
}

/// Represents the application
pub struct Application {
    /// The arguments given on the command line.
    argv: Option<Args>,
}

impl Default for Application {
    fn default() -> Self {
        Self::new()
    }
}

impl Application {
    /// Creates a new application
    pub fn new() -> Self {
        Application { argv: None }
    }

    /// Read argv to get the arguments before running the application
    pub fn read_argv(&mut self) {
        self.argv = Some(Args::parse());
    }

    /// Sends the logs to stderr, at the debug level if `--debug` was
    /// given.
    pub fn init_logging(&self) {
        let debug = self.argv.as_ref().map(|args| args.debug).unwrap_or(false);
        let level = if debug {
            LevelFilter::Debug
        } else {
            LevelFilter::Warn
        };
        if let Err(e) = SimpleLogger::new().with_level(level).init() {
            eprintln!("Unable to initialize the logger: {}", e);
        }
    }

    /// Runs the global application
    /// read_argv() MUST have been called before
    pub fn run(&self) -> ExitCode {
        trace!("Running Application::run()");
        match self.execute() {
            Ok(()) => ExitCode::SUCCESS,
            Err(e) => {
                debug!("{:?}", e);
                if let Err(write_error) = report_error(&e, &mut io::stderr()) {
                    debug!("Unable to report the error: {}", write_error);
                }
                ExitCode::FAILURE
            }
        }
    }

    fn execute(&self) -> Result<(), ApplicationError> {
        let args = self.argv.as_ref().ok_or(ApplicationError::NoArguments)?;
        let settings = Settings::from_environment();
        let fetcher = NVDFetcher::new(settings.api_key.clone())?;
        debug!("Authenticated to the NVD: {}", fetcher.is_authenticated());

        let tk_runtime = tokio::runtime::Builder::new_current_thread()
            .enable_all()
            .build()
            .map_err(ApplicationError::Runtime)?;

        match &args.command {
            Command::Search(search_args) => tk_runtime.block_on(search(&fetcher, search_args)),
            Command::Watch(watch_args) => {
                let mut store = FileSeenSetStore::in_dir(settings.state_dir()?);
                tk_runtime.block_on(watch_query(&fetcher, &mut store, watch_args))
            }
        }
    }
}

/// Writes the one line the user sees when the application fails.
fn report_error(error: &ApplicationError, output: &mut dyn Write) -> io::Result<()> {
    writeln!(output, "Error: {}", error)
}

/// Searches once and writes every matching record.
async fn search<T: Transport>(
    fetcher: &NVDFetcher<T>,
    args: &SearchArgs,
) -> Result<(), ApplicationError> {
    trace!("Running application::search()");
    let query = args.query.to_query();
    let records = watcher::search(fetcher, &query, Utc::now()).await?;
    let format = if args.json {
        OutputFormat::Ndjson
    } else if args.csv {
        OutputFormat::Csv
    } else {
        OutputFormat::Table
    };
    write_records(format, &records)
}

/// Runs watch cycles until `--once` or Ctrl-C.
async fn watch_query<T: Transport, S: SeenSetStore>(
    fetcher: &NVDFetcher<T>,
    store: &mut S,
    args: &WatchArgs,
) -> Result<(), ApplicationError> {
    trace!("Running application::watch_query()");
    let query = args.query.to_query();
    let fingerprint = QueryFingerprint::of(&query);
    debug!("Query fingerprint: {}", fingerprint);
    if let Some(last_run) = store.get_last_run(&fingerprint) {
        info!("Last cycle of this query ran at {}", last_run);
    }

    let format = if args.json {
        OutputFormat::Ndjson
    } else {
        OutputFormat::Table
    };
    let mut interrupted = listen_for_interrupt();
    let mut cycle: u64 = 0;

    loop {
        cycle += 1;
        debug!("Watch cycle {}", cycle);
        let report =
            watcher::run_cycle(fetcher, store, &query, &fingerprint, Utc::now()).await?;
        if report.new_records.is_empty() {
            debug!("No new CVEs found");
        } else {
            write_records(format, &report.new_records)?;
        }

        if args.once {
            return Ok(());
        }
        if *interrupted.borrow() {
            eprintln!("{}", INTERRUPTED_MESSAGE);
            return Ok(());
        }

        debug!("Sleeping for {}s...", args.every.as_secs());
        if wait_or_interrupt(&mut interrupted, args.every).await {
            eprintln!("{}", INTERRUPTED_MESSAGE);
            return Ok(());
        }
    }
}

/// Flips the returned flag to true when Ctrl-C is pressed.
///
/// Once listening, Ctrl-C no longer kills the process: the watch loop
/// checks the flag between two cycles.
fn listen_for_interrupt() -> watch::Receiver<bool> {
    let (sender, receiver) = watch::channel(false);
    tokio::spawn(async move {
        match tokio::signal::ctrl_c().await {
            Ok(()) => {
                debug!("Ctrl-C received");
                sender.send_replace(true);
            }
            Err(e) => debug!("Unable to listen for Ctrl-C: {}", e),
        }
    });
    receiver
}

/// Waits for the period, returns true if interrupted before its end.
async fn wait_or_interrupt(interrupted: &mut watch::Receiver<bool>, period: Duration) -> bool {
    tokio::select! {
        _ = sleep(period) => false,
        Ok(_) = interrupted.wait_for(|flag| *flag) => true,
    }
}

fn write_records(format: OutputFormat, records: &[NormalizedRecord]) -> Result<(), ApplicationError> {
    let stdout = io::stdout();
    let mut output = stdout.lock();
    format.writer().write(records, &mut output)?;
    output.flush()?;
    Ok(())
}

/// Parses an interval such as 30m, 6h or 1d.
pub fn parse_interval(value: &str) -> Result<Duration, String> {
    let regex = Regex::new(r"(?i)^(\d+)(m|h|d)$").map_err(|e| e.to_string())?;
    let captures = regex
        .captures(value.trim())
        .ok_or_else(|| format!("invalid interval '{}', expected e.g. 30m, 6h or 1d", value))?;

    let amount: u64 = captures[1]
        .parse()
        .map_err(|_| format!("interval '{}' is too large", value))?;
    let unit_secs = match captures[2].to_ascii_lowercase().as_str() {
        "m" => 60,
        "h" => 3_600,
        _ => 86_400,
    };
    if amount == 0 {
        return Err("the interval must be greater than zero".to_string());
    }
    amount
        .checked_mul(unit_secs)
        .map(Duration::from_secs)
        .ok_or_else(|| format!("interval '{}' is too large", value))
}

/// Parses a CVSS score, between 0 and 10.
fn parse_score(value: &str) -> Result<f64, String> {
    let score: f64 = value
        .parse()
        .map_err(|_| format!("'{}' is not a number", value))?;
    if !(0.0..=10.0).contains(&score) {
        return Err(format!("the CVSS score must be between 0 and 10, got {}", score));
    }
    Ok(score)
}

/// Represents the CLI arguments accepted by cvewatch
#[derive(Parser, Debug)]
#[command(name = "cvewatch", author, version, about, long_about = None)]
pub struct Args {
    /// Enable debug output
    #[arg(long, global = true)]
    pub debug: bool,
    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Search CVEs once
    Search(SearchArgs),
    /// Watch for new CVEs
    Watch(WatchArgs),
}

/// The arguments describing a query, shared by both commands.
#[derive(clap::Args, Debug)]
pub struct QueryArgs {
    /// Search query (keyword)
    #[arg(value_name = "QUERY")]
    pub query: String,
    /// Days to look back
    #[arg(long, value_name = "DAYS", value_parser = clap::value_parser!(u32).range(..=MAX_WINDOW_DAYS))]
    pub days: u32,
    /// Minimum CVSS score
    #[arg(long = "min-cvss", value_name = "SCORE", value_parser = parse_score)]
    pub min_cvss: Option<f64>,
    /// Filter by severity levels
    #[arg(long, value_name = "SEVERITY", num_args = 1..)]
    pub severity: Vec<Severity>,
}

impl QueryArgs {
    pub fn to_query(&self) -> QueryConfig {
        let severities = (!self.severity.is_empty()).then_some(self.severity.as_slice());
        QueryConfig::new(&self.query, self.days, self.min_cvss, severities)
    }
}

#[derive(clap::Args, Debug)]
pub struct SearchArgs {
    #[command(flatten)]
    pub query: QueryArgs,
    /// Output as NDJSON
    #[arg(long, conflicts_with = "csv")]
    pub json: bool,
    /// Output as CSV
    #[arg(long)]
    pub csv: bool,
}

#[derive(clap::Args, Debug)]
pub struct WatchArgs {
    #[command(flatten)]
    pub query: QueryArgs,
    /// Check interval (e.g., 1h, 6h, 24h)
    #[arg(long, value_name = "INTERVAL", value_parser = parse_interval)]
    pub every: Duration,
    /// Output as NDJSON
    #[arg(long)]
    pub json: bool,
    /// Run one watch cycle and exit
    #[arg(long)]
    pub once: bool,
}
