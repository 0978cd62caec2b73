//! Logging and terminal output.
//!
//! Provides:
//! - `tracing` initialisation (JSON daily-rolling file plus stderr)
//! - Background gzip of rotated log files
//! - Styled status lines and panels for the CLI (console)

use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use console::style;
use flate2::write::GzEncoder;
use flate2::Compression;
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::{layer::SubscriberExt, EnvFilter, Layer};

/// Base name of the rolling log file.
pub const LOG_FILE_NAME: &str = "cardpacks.log";

// ============================================================================
// Logging Initialization
// ============================================================================

/// Default log directory inside the user data directory.
pub fn default_log_dir() -> PathBuf {
    dirs::data_dir()
        .map(|d| d.join("cardpacks").join("logs"))
        .unwrap_or_else(|| PathBuf::from("logs"))
}

/// Initialize the logging system.
///
/// This sets up:
/// 1. A file logger (JSON formatted, daily rolling) in `log_dir`.
/// 2. A stderr logger, so command output on stdout stays clean.
/// 3. Redirects standard `log` crate events to `tracing`.
///
/// `RUST_LOG` overrides the default `info` filter. Returns a `WorkerGuard`
/// which must be kept alive until shutdown so buffered logs get flushed.
pub fn init(log_dir: &Path) -> WorkerGuard {
    if !log_dir.exists() {
        if let Err(e) = fs::create_dir_all(log_dir) {
            eprintln!("Failed to create logs directory: {}", e);
        }
    }

    let file_appender = tracing_appender::rolling::daily(log_dir, LOG_FILE_NAME);
    let (non_blocking, guard) = tracing_appender::non_blocking(file_appender);

    let env_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));

    let file_layer = tracing_subscriber::fmt::layer()
        .with_writer(non_blocking)
        .json()
        .with_file(true)
        .with_line_number(true)
        .with_target(true)
        .with_filter(env_filter.clone());

    let stderr_layer = tracing_subscriber::fmt::layer()
        .with_writer(io::stderr)
        .compact()
        .with_target(false)
        .with_filter(env_filter);

    let subscriber = tracing_subscriber::registry()
        .with(file_layer)
        .with(stderr_layer);
    for failure in install_global(subscriber) {
        eprintln!("{}", failure);
    }

    let rotated_dir = log_dir.to_path_buf();
    std::thread::spawn(move || {
        compress_old_logs(&rotated_dir);
    });

    log::debug!("Logging initialized, writing to {:?}", log_dir.join(LOG_FILE_NAME));
    guard
}

/// Bridge `log` records into tracing, then make `subscriber` the global
/// default. Returns one message per piece that was already installed.
fn install_global<S>(subscriber: S) -> Vec<String>
where
    S: tracing::Subscriber + Send + Sync + 'static,
{
    let mut failures = Vec::new();
    if let Err(e) = tracing_log::LogTracer::init() {
        failures.push(format!("Failed to initialize LogTracer: {}", e));
    }
    if let Err(e) = tracing::subscriber::set_global_default(subscriber) {
        failures.push(format!("Failed to install tracing subscriber: {}", e));
    }
    failures
}

/// Gzip every rotated log file except today's.
fn compress_old_logs(log_dir: &Path) {
    let today_suffix = chrono::Local::now().format("%Y-%m-%d").to_string();
    let prefix = format!("{}.", LOG_FILE_NAME);

    let Ok(entries) = fs::read_dir(log_dir) else {
        return;
    };
    for entry in entries.flatten() {
        let path = entry.path();
        let Some(name) = path.file_name().and_then(|n| n.to_str()) else {
            continue;
        };
        if name.starts_with(&prefix) && !name.ends_with(&today_suffix) && !name.ends_with(".gz") {
            match compress_file(&path) {
                Ok(()) => log::debug!("Compressed old log: {:?}", path),
                Err(e) => log::warn!("Failed to compress old log {:?}: {}", path, e),
            }
        }
    }
}

fn compress_file(path: &Path) -> io::Result<()> {
    let mut gz_name = path
        .file_name()
        .ok_or_else(|| io::Error::new(io::ErrorKind::Other, "No filename"))?
        .to_os_string();
    gz_name.push(".gz");
    let gz_path = path
        .parent()
        .ok_or_else(|| io::Error::new(io::ErrorKind::Other, "No parent directory"))?
        .join(gz_name);

    if gz_path.exists() {
        return Ok(());
    }

    let mut reader = io::BufReader::new(fs::File::open(path)?);
    let mut encoder = GzEncoder::new(fs::File::create(&gz_path)?, Compression::default());
    io::copy(&mut reader, &mut encoder)?;
    encoder.finish()?;

    fs::remove_file(path)
}

// ============================================================================
// Console Output Utilities
// ============================================================================

/// Print a titled panel around `content`.
pub fn print_panel(title: &str, content: &str) {
    let width = content
        .lines()
        .map(console::measure_text_width)
        .chain(std::iter::once(console::measure_text_width(title) + 2))
        .max()
        .unwrap_or(0)
        .clamp(20, 76);

    let title_display = format!(" {} ", title);
    let border_len = (width + 2).saturating_sub(console::measure_text_width(&title_display));
    println!(
        "{}{}{}{}",
        style("╭").cyan(),
        style(&title_display).cyan().bold(),
        style("─".repeat(border_len)).cyan(),
        style("╮").cyan()
    );
    for line in content.lines() {
        let pad = width.saturating_sub(console::measure_text_width(line));
        println!("{} {}{} {}", style("│").cyan(), line, " ".repeat(pad), style("│").cyan());
    }
    println!(
        "{}{}{}",
        style("╰").cyan(),
        style("─".repeat(width + 2)).cyan(),
        style("╯").cyan()
    );
}

pub fn print_success(message: &str) {
    println!("{} {}", style("✔").green(), style(message).green());
}

pub fn print_error(message: &str) {
    eprintln!("{} {}", style("✖").red(), style(message).red().bold());
}

pub fn print_warning(message: &str) {
    eprintln!("{} {}", style("!").yellow(), style(message).yellow().bold());
}

pub fn print_info(message: &str) {
    println!("{} {}", style("i").blue(), style(message).blue());
}

// ============================================================================
// Tests
// ============================================================================
