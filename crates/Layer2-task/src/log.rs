//! Task Log System - per-attempt log files
//!
//! Provides:
//! - One log file per execution attempt (`<project>/logs/processing_<ts>_<inst>.log`, ms timestamp)
//! - Structured entries for stdout/stderr/system lines
//! - Bounded tail of recent output for failure messages

use chrono::{DateTime, Local, Utc};
use odmq_foundation::{Error, Result};
use serde::{Deserialize, Serialize};
use std::collections::VecDeque;
use std::path::{Path, PathBuf};
use tokio::fs::{File, OpenOptions};
use tokio::io::{AsyncWriteExt, BufWriter};
use tracing::debug;

/// Default number of output lines kept in memory
const DEFAULT_TAIL_LINES: usize = 5;

/// Log level for task output
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum LogLevel {
    /// Standard output
    Stdout,
    /// Standard error
    Stderr,
    /// System messages (start, stop, etc.)
    System,
}

impl LogLevel {
    pub fn as_str(&self) -> &'static str {
        match self {
            LogLevel::Stdout => "stdout",
            LogLevel::Stderr => "stderr",
            LogLevel::System => "system",
        }
    }

    /// Whether the line came from the external process
    pub fn is_output(&self) -> bool {
        matches!(self, LogLevel::Stdout | LogLevel::Stderr)
    }
}

/// A single log entry
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LogEntry {
    /// Timestamp
    pub timestamp: DateTime<Utc>,

    /// Log level
    pub level: LogLevel,

    /// Log content
    pub content: String,
}

impl LogEntry {
    pub fn new(level: LogLevel, content: impl Into<String>) -> Self {
        Self {
            timestamp: Utc::now(),
            level,
            content: content.into(),
        }
    }

    pub fn stdout(content: impl Into<String>) -> Self {
        Self::new(LogLevel::Stdout, content)
    }

    pub fn stderr(content: impl Into<String>) -> Self {
        Self::new(LogLevel::Stderr, content)
    }

    pub fn system(content: impl Into<String>) -> Self {
        Self::new(LogLevel::System, content)
    }

    /// Line as written to the log file
    pub fn format_line(&self) -> String {
        match self.level {
            LogLevel::Stdout | LogLevel::Stderr => self.content.clone(),
            LogLevel::System => format!(
                "# [{}] {}",
                self.timestamp.format("%Y-%m-%d %H:%M:%S"),
                self.content
            ),
        }
    }
}

/// `<project>/logs/processing_<YYYYmmdd_HHMMSS_mmm>_<inst>.log`
pub fn log_file_path(project: &Path, instance_id: &str) -> PathBuf {
    project.join("logs").join(format!(
        "processing_{}_{}.log",
        Local::now().format("%Y%m%d_%H%M%S_%3f"),
        instance_id
    ))
}

/// Log file for one execution attempt
#[derive(Debug)]
pub struct TaskLog {
    path: PathBuf,
    writer: BufWriter<File>,
    tail: VecDeque<String>,
    max_tail: usize,
    line_count: usize,
}

impl TaskLog {
    /// Create the log file (and its parent directory)
    ///
    /// 기존 파일이 있으면 덮어쓰지 않고 뒤에 이어 쓴다.
    pub async fn create(path: impl Into<PathBuf>) -> Result<Self> {
        let path = path.into();
        if let Some(parent) = path.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        let file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&path)
            .await
            .map_err(|e| {
                Error::Storage(format!("Failed to create log {}: {}", path.display(), e))
            })?;
        debug!("Opened task log {}", path.display());
        Ok(Self {
            path,
            writer: BufWriter::new(file),
            tail: VecDeque::with_capacity(DEFAULT_TAIL_LINES),
            max_tail: DEFAULT_TAIL_LINES,
            line_count: 0,
        })
    }

    pub fn with_tail_lines(mut self, lines: usize) -> Self {
        self.max_tail = lines;
        self
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Append an entry and flush so the file can be tailed live
    pub async fn push(&mut self, entry: &LogEntry) -> Result<()> {
        self.writer.write_all(entry.format_line().as_bytes()).await?;
        self.writer.write_all(b"\n").await?;
        self.writer.flush().await?;

        if entry.level.is_output() {
            self.line_count += 1;
            if self.max_tail > 0 {
                if self.tail.len() >= self.max_tail {
                    self.tail.pop_front();
                }
                self.tail.push_back(entry.content.clone());
            }
        }
        Ok(())
    }

    pub async fn push_system(&mut self, content: impl Into<String>) -> Result<()> {
        self.push(&LogEntry::system(content)).await
    }

    /// Last output lines, oldest first
    pub fn tail(&self) -> Vec<String> {
        self.tail.iter().cloned().collect()
    }

    /// Number of process output lines written
    pub fn line_count(&self) -> usize {
        self.line_count
    }

    pub async fn close(mut self) -> Result<()> {
        self.writer.flush().await?;
        Ok(())
    }
}
