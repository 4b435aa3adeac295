//! Subscriber setup for the `kbase` binary.
//!
//! `RUST_LOG` takes precedence over `log.level`. Console output goes to stderr
//! so `--json` results on stdout stay machine readable. When `log.dir` is set,
//! three daily-rotated files are written there as well: `app.*.log` (text),
//! `app.*.json` (one JSON object per line) and `errors.*.log` (ERROR only).

use std::path::Path;

use anyhow::Context;
use tracing_appender::non_blocking::WorkerGuard;
use tracing_appender::rolling::{RollingFileAppender, Rotation};
use tracing_subscriber::filter::LevelFilter;
use tracing_subscriber::fmt::time::FormatTime;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{EnvFilter, Layer, Registry};

use kbase_core::config::{expand_path, LogFormat, LogSettings};

type BoxedLayer = Box<dyn Layer<Registry> + Send + Sync>;

const APP_LOG_FILES: usize = 5;
const ERROR_LOG_FILES: usize = 3;

/// Compact time format: HH:MM:SS.mmm
struct CompactTime;

impl FormatTime for CompactTime {
    fn format_time(&self, w: &mut tracing_subscriber::fmt::format::Writer<'_>) -> std::fmt::Result {
        write!(w, "{}", chrono::Local::now().format("%H:%M:%S%.3f"))
    }
}

/// Installs the global subscriber. Later calls are no-ops.
///
/// The returned guards flush the file writers on drop; hold them until exit.
pub fn init(settings: &LogSettings) -> Vec<WorkerGuard> {
    let filter = if std::env::var("RUST_LOG").is_ok() {
        EnvFilter::from_default_env()
    } else {
        EnvFilter::try_new(&settings.level).unwrap_or_else(|e| {
            eprintln!("invalid log.level '{}': {e}; using info", settings.level);
            EnvFilter::new("info")
        })
    };

    let mut layers = vec![console_layer(settings.format)];
    let mut guards = Vec::new();
    if !settings.dir.trim().is_empty() {
        let dir = expand_path(&settings.dir);
        match file_layers(&dir) {
            Ok((files, file_guards)) => {
                layers.extend(files);
                guards = file_guards;
            }
            Err(e) => eprintln!("file logging disabled: {e:#}"),
        }
    }

    let _ = tracing_subscriber::registry().with(layers).with(filter).try_init();
    guards
}

fn console_layer(format: LogFormat) -> BoxedLayer {
    match format {
        LogFormat::Pretty => tracing_subscriber::fmt::layer()
            .with_target(true)
            .with_timer(CompactTime)
            .with_level(true)
            .with_writer(std::io::stderr)
            .boxed(),
        LogFormat::Json => tracing_subscriber::fmt::layer()
            .json()
            .with_current_span(false)
            .with_writer(std::io::stderr)
            .boxed(),
    }
}

fn rolling(dir: &Path, prefix: &str, suffix: &str, keep: usize) -> anyhow::Result<RollingFileAppender> {
    RollingFileAppender::builder()
        .rotation(Rotation::DAILY)
        .filename_prefix(prefix)
        .filename_suffix(suffix)
        .max_log_files(keep)
        .build(dir)
        .with_context(|| format!("creating {prefix}.{suffix} in {}", dir.display()))
}

/// Text, JSON and error-only file layers under `dir`.
fn file_layers(dir: &Path) -> anyhow::Result<(Vec<BoxedLayer>, Vec<WorkerGuard>)> {
    std::fs::create_dir_all(dir).with_context(|| format!("creating log dir {}", dir.display()))?;

    let (text, text_guard) = tracing_appender::non_blocking(rolling(dir, "app", "log", APP_LOG_FILES)?);
    let (json, json_guard) = tracing_appender::non_blocking(rolling(dir, "app", "json", APP_LOG_FILES)?);
    let (errors, errors_guard) =
        tracing_appender::non_blocking(rolling(dir, "errors", "log", ERROR_LOG_FILES)?);

    let layers = vec![
        tracing_subscriber::fmt::layer()
            .with_ansi(false)
            .with_target(true)
            .with_writer(text)
            .boxed(),
        tracing_subscriber::fmt::layer()
            .json()
            .with_current_span(false)
            .with_writer(json)
            .boxed(),
        tracing_subscriber::fmt::layer()
            .with_ansi(false)
            .with_target(true)
            .with_writer(errors)
            .with_filter(LevelFilter::ERROR)
            .boxed(),
    ];
    Ok((layers, vec![text_guard, json_guard, errors_guard]))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;

    fn read_file(dir: &Path, prefix: &str, suffix: &str) -> String {
        let entry = fs::read_dir(dir)
            .unwrap()
            .map(|e| e.unwrap().path())
            .find(|p| {
                let name = p.file_name().unwrap().to_string_lossy().into_owned();
                name.starts_with(prefix) && name.ends_with(suffix)
            })
            .unwrap_or_else(|| panic!("no {prefix}*{suffix} in {}", dir.display()));
        fs::read_to_string(entry).unwrap()
    }

    #[test]
    fn file_layers_split_by_format_and_level() {
        let dir = tempfile::tempdir().unwrap();
        let (layers, guards) = file_layers(dir.path()).unwrap();
        let subscriber = tracing_subscriber::registry().with(layers);
        tracing::subscriber::with_default(subscriber, || {
            tracing::info!(chunks = 3, "ingestion finished");
            tracing::error!(batch = 1, "embedding batch failed");
        });
        drop(guards);

        let text = read_file(dir.path(), "app", ".log");
        assert!(text.contains("ingestion finished"));
        assert!(text.contains("embedding batch failed"));

        let json = read_file(dir.path(), "app", ".json");
        let lines: Vec<serde_json::Value> = json
            .lines()
            .map(|l| serde_json::from_str(l).unwrap())
            .collect();
        assert_eq!(lines.len(), 2);
        assert_eq!(lines[0]["fields"]["message"], "ingestion finished");
        assert_eq!(lines[1]["level"], "ERROR");

        let errors = read_file(dir.path(), "errors", ".log");
        assert!(errors.contains("embedding batch failed"));
        assert!(!errors.contains("ingestion finished"));
    }

    #[test]
    fn unwritable_log_dir_is_reported() {
        let dir = tempfile::tempdir().unwrap();
        let blocker = dir.path().join("file");
        fs::write(&blocker, b"x").unwrap();
        assert!(file_layers(&blocker.join("logs")).is_err());
    }
}
