//! Per-source run logs.
//!
//! Every driver receives a [`SourceLog`] instead of writing to a global file.
//! Messages go to `tracing` and to the source's sink, which for production is
//! an append-only `logs/<source>.log` with `timestamp - message` lines read by
//! the log dashboard. Timestamps are wall-clock time in the configured zone.

use anyhow::{Context, Result};
use chrono::Utc;
use chrono_tz::Tz;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use tracing::{error, info, warn};
use tracing_appender::rolling::{self, RollingFileAppender};
use tracing_subscriber::{EnvFilter, fmt, layer::SubscriberExt, util::SubscriberInitExt};

pub const NEWS: &str = "schedule";
pub const ANNOUNCEMENTS: &str = "announcements";
pub const FLOORSHEET: &str = "floorsheet";
pub const INDICES: &str = "live_nepse_index";
pub const EPS: &str = "EPS";
pub const MARKET_STATUS: &str = "market_status";

pub const SOURCES: [&str; 6] = [NEWS, ANNOUNCEMENTS, FLOORSHEET, INDICES, EPS, MARKET_STATUS];

pub fn init_tracing(verbose: u8) {
    let filter = match verbose {
        0 => "nepse_feed=info,warn",
        1 => "nepse_feed=debug,info",
        _ => "trace",
    };

    tracing_subscriber::registry()
        .with(fmt::layer().compact().with_target(false))
        .with(EnvFilter::new(filter))
        .init();
}

/// Destination for one source's log lines.
pub trait LogSink: Send + Sync {
    fn append(&self, line: &str);
}

/// `logs/<source>.log`, never rotated.
pub struct FileSink {
    writer: Mutex<RollingFileAppender>,
}

impl FileSink {
    pub fn open(dir: &Path, source: &str, tz: Tz) -> Result<Self> {
        std::fs::create_dir_all(dir)
            .with_context(|| format!("Could not create log dir {:?}", dir))?;

        let file_name = format!("{}.log", source);
        let fresh = !dir.join(&file_name).exists();
        let mut writer = rolling::never(dir, &file_name);
        if fresh {
            writeln!(writer, "Log file created at {}", timestamp(tz))
                .with_context(|| format!("Could not initialise {}", file_name))?;
        }
        Ok(Self { writer: Mutex::new(writer) })
    }
}

impl LogSink for FileSink {
    fn append(&self, line: &str) {
        if let Ok(mut w) = self.writer.lock() {
            // A failed log write must never take a scrape down with it.
            let _ = writeln!(w, "{}", line);
        }
    }
}

/// Keeps lines in memory; used by tests to assert on driver output.
#[derive(Default, Clone)]
pub struct MemorySink {
    lines: Arc<Mutex<Vec<String>>>,
}

impl MemorySink {
    pub fn lines(&self) -> Vec<String> {
        self.lines.lock().map(|l| l.clone()).unwrap_or_default()
    }

    pub fn contains(&self, needle: &str) -> bool {
        self.lines().iter().any(|l| l.contains(needle))
    }
}

impl LogSink for MemorySink {
    fn append(&self, line: &str) {
        if let Ok(mut l) = self.lines.lock() {
            l.push(line.to_string());
        }
    }
}

#[derive(Clone)]
pub struct SourceLog {
    source: &'static str,
    sink: Arc<dyn LogSink>,
    tz: Tz,
}

impl SourceLog {
    pub fn new(source: &'static str, sink: Arc<dyn LogSink>, tz: Tz) -> Self {
        Self { source, sink, tz }
    }

    pub fn to_file(dir: &Path, source: &'static str, tz: Tz) -> Result<Self> {
        Ok(Self::new(source, Arc::new(FileSink::open(dir, source, tz)?), tz))
    }

    pub fn memory(source: &'static str) -> (Self, MemorySink) {
        let sink = MemorySink::default();
        (Self::new(source, Arc::new(sink.clone()), chrono_tz::Asia::Kathmandu), sink)
    }

    pub fn info(&self, message: impl AsRef<str>) {
        let message = message.as_ref();
        info!(source = self.source, "{}", message);
        self.write(message);
    }

    pub fn warn(&self, message: impl AsRef<str>) {
        let message = message.as_ref();
        warn!(source = self.source, "{}", message);
        self.write(message);
    }

    pub fn error(&self, message: impl AsRef<str>) {
        let message = message.as_ref();
        error!(source = self.source, "{}", message);
        self.write(message);
    }

    fn write(&self, message: &str) {
        self.sink.append(&format!("{} - {}", timestamp(self.tz), message));
    }
}

fn timestamp(tz: Tz) -> String {
    Utc::now().with_timezone(&tz).format("%Y-%m-%d %H:%M:%S").to_string()
}

/// Path of a source's log file, for the read-only viewer.
pub fn log_path(dir: &Path, source: &str) -> Option<PathBuf> {
    SOURCES
        .iter()
        .find(|s| s.eq_ignore_ascii_case(source))
        .map(|s| dir.join(format!("{}.log", s)))
}
