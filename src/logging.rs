// src/logging.rs

use std::{
    fs,
    path::{Path, PathBuf},
};
use tracing::warn;
use tracing_appender::{
    non_blocking::WorkerGuard,
    rolling::{RollingFileAppender, Rotation},
};
use tracing_subscriber::{fmt, prelude::*, EnvFilter, Layer, Registry};

use crate::config::flag;
use crate::error::{IngestError, Result};

const DEFAULT_LOG_PATH: &str = "logs/tax_bracket_ingest.log";
const DEFAULT_LOG_FILE_NAME: &str = "tax_bracket_ingest.log";
const LAMBDA_LOG_DIR: &str = "/tmp/logs";
const DEFAULT_RETENTION_DAYS: usize = 7;

/// Filter directive when neither `RUST_LOG` nor `LOG_LEVEL` is set. An unset
/// `ENV` counts as `dev`.
fn default_directive(env: Option<&str>) -> &'static str {
    match env.map(|e| e.trim().to_lowercase()) {
        Some(e) if e != "dev" => "info",
        _ => "debug",
    }
}

/// `RUST_LOG`, else `LOG_LEVEL`, else `debug` under `ENV=dev` (the default)
/// and `info` otherwise.
pub fn filter_from<F>(lookup: F) -> EnvFilter
where
    F: Fn(&str) -> Option<String>,
{
    let directive = lookup("RUST_LOG")
        .or_else(|| lookup("LOG_LEVEL"))
        .filter(|d| !d.trim().is_empty())
        .unwrap_or_else(|| default_directive(lookup("ENV").as_deref()).to_string());
    EnvFilter::try_new(&directive).unwrap_or_else(|_| EnvFilter::new("info"))
}

/// Daily-rotated JSON log files.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FileSink {
    pub dir: PathBuf,
    /// File name before the rotation date suffix.
    pub prefix: String,
    /// Rotated files kept on disk.
    pub retention_days: usize,
}

impl FileSink {
    /// Create the directory and open the rolling appender.
    pub fn appender(&self) -> Result<RollingFileAppender> {
        fs::create_dir_all(&self.dir)?;
        RollingFileAppender::builder()
            .rotation(Rotation::DAILY)
            .filename_prefix(self.prefix.clone())
            .max_log_files(self.retention_days.max(1))
            .build(&self.dir)
            .map_err(|e| {
                IngestError::Config(format!(
                    "cannot open log file under {}: {}",
                    self.dir.display(),
                    e
                ))
            })
    }
}

/// File logging settings.
///
/// `LOG_TO_FILE` toggles the sink; unset, it is on everywhere except Lambda
/// (`AWS_LAMBDA_FUNCTION_NAME` set). Under Lambda only `/tmp` is writable, so
/// the file keeps its name from `LOG_PATH` but moves to `/tmp/logs`.
pub fn file_sink_from<F>(lookup: F) -> Option<FileSink>
where
    F: Fn(&str) -> Option<String>,
{
    let in_lambda = lookup("AWS_LAMBDA_FUNCTION_NAME").is_some();
    let enabled = match lookup("LOG_TO_FILE") {
        Some(v) => flag(Some(v.as_str()), false),
        None => !in_lambda,
    };
    if !enabled {
        return None;
    }

    let path = PathBuf::from(
        lookup("LOG_PATH")
            .filter(|p| !p.trim().is_empty())
            .unwrap_or_else(|| DEFAULT_LOG_PATH.to_string()),
    );
    let prefix = path
        .file_name()
        .map(|n| n.to_string_lossy().to_string())
        .unwrap_or_else(|| DEFAULT_LOG_FILE_NAME.to_string());
    let dir = if in_lambda {
        PathBuf::from(LAMBDA_LOG_DIR)
    } else {
        path.parent()
            .filter(|p| !p.as_os_str().is_empty())
            .unwrap_or(Path::new("."))
            .to_path_buf()
    };
    let retention_days = lookup("LOG_RETENTION_DAYS")
        .and_then(|v| v.trim().parse().ok())
        .unwrap_or(DEFAULT_RETENTION_DAYS);

    Some(FileSink {
        dir,
        prefix,
        retention_days,
    })
}

/// Install the global subscriber. Called once, by the binary, which must hold
/// the returned guard until exit so buffered file lines get flushed.
///
/// `LOG_FORMAT=json` switches stdout to one JSON object per line; the file
/// sink always writes JSON.
pub fn init() -> Option<WorkerGuard> {
    let lookup = |name: &str| std::env::var(name).ok();
    let filter = filter_from(lookup);
    let json = lookup("LOG_FORMAT").is_some_and(|f| f.eq_ignore_ascii_case("json"));

    let mut layers: Vec<Box<dyn Layer<Registry> + Send + Sync>> = Vec::new();
    layers.push(if json {
        fmt::layer().json().with_current_span(false).boxed()
    } else {
        fmt::layer()
            .with_span_events(fmt::format::FmtSpan::CLOSE)
            .boxed()
    });

    let mut guard = None;
    let mut sink_error = None;
    if let Some(sink) = file_sink_from(lookup) {
        match sink.appender() {
            Ok(appender) => {
                let (writer, g) = tracing_appender::non_blocking(appender);
                guard = Some(g);
                layers.push(
                    fmt::layer()
                        .json()
                        .with_ansi(false)
                        .with_writer(writer)
                        .boxed(),
                );
            }
            Err(e) => sink_error = Some(e),
        }
    }

    if tracing_subscriber::registry()
        .with(layers)
        .with(filter)
        .try_init()
        .is_err()
    {
        eprintln!("tracing subscriber already installed; keeping it");
    }
    if let Some(e) = sink_error {
        warn!(error = %e, "file logging disabled");
    }
    guard
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;
    use tempfile::tempdir;

    fn lookup(vars: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = vars
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |name| map.get(name).cloned()
    }

    #[test]
    fn test_default_directive() {
        assert_eq!(default_directive(Some("dev")), "debug");
        assert_eq!(default_directive(Some(" DEV ")), "debug");
        assert_eq!(default_directive(Some("prod")), "info");
        assert_eq!(default_directive(None), "debug");
    }

    #[test]
    fn test_filter_precedence() {
        let f = filter_from(lookup(&[("RUST_LOG", "warn"), ("LOG_LEVEL", "trace"), ("ENV", "dev")]));
        assert_eq!(f.to_string(), "warn");

        let f = filter_from(lookup(&[("LOG_LEVEL", "trace"), ("ENV", "dev")]));
        assert_eq!(f.to_string(), "trace");

        let f = filter_from(lookup(&[("ENV", "prod")]));
        assert_eq!(f.to_string(), "info");

        let f = filter_from(lookup(&[]));
        assert_eq!(f.to_string(), "debug");
    }

    #[test]
    fn test_file_sink_defaults() {
        let sink = file_sink_from(lookup(&[])).unwrap();
        assert_eq!(
            sink,
            FileSink {
                dir: PathBuf::from("logs"),
                prefix: "tax_bracket_ingest.log".to_string(),
                retention_days: 7,
            }
        );

        assert!(file_sink_from(lookup(&[("LOG_TO_FILE", "0")])).is_none());
        assert!(file_sink_from(lookup(&[("AWS_LAMBDA_FUNCTION_NAME", "ingest")])).is_none());
    }

    #[test]
    fn test_file_sink_lambda_moves_to_tmp() {
        let sink = file_sink_from(lookup(&[
            ("AWS_LAMBDA_FUNCTION_NAME", "ingest"),
            ("LOG_TO_FILE", "yes"),
            ("LOG_PATH", "/var/log/ingest/run.log"),
            ("LOG_RETENTION_DAYS", "3"),
        ]))
        .unwrap();
        assert_eq!(sink.dir, PathBuf::from("/tmp/logs"));
        assert_eq!(sink.prefix, "run.log");
        assert_eq!(sink.retention_days, 3);
    }

    #[test]
    fn test_file_sink_bad_retention_falls_back() {
        let sink = file_sink_from(lookup(&[("LOG_PATH", "run.log"), ("LOG_RETENTION_DAYS", "a week")]))
            .unwrap();
        assert_eq!(sink.dir, PathBuf::from("."));
        assert_eq!(sink.retention_days, 7);
    }

    #[test]
    fn test_appender_creates_directory() {
        let tmp = tempdir().unwrap();
        let sink = FileSink {
            dir: tmp.path().join("nested/logs"),
            prefix: "ingest.log".to_string(),
            retention_days: 2,
        };
        sink.appender().unwrap();
        assert!(sink.dir.is_dir());
    }
}
