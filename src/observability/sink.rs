//! JSONL trace sink with file rotation.
//!
//! Entries land in `<workspace>/log/observability/trace-<start_ms>.jsonl`.
//! Writes go through a bounded channel to a single background task so the
//! hot path (`Tracer::log`) never blocks on disk; a full channel means the
//! writer is behind the 200ms budget and the entry is dropped.

use std::fs::{self, File, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use tokio::sync::mpsc;
use tracing::warn;

use super::tracer::LogEntry;

const CHANNEL_CAPACITY: usize = 1024;
const MAX_TRACE_FILES: usize = 10;

pub struct TraceSink {
    tx: mpsc::Sender<LogEntry>,
    dropped: Arc<AtomicU64>,
}

impl TraceSink {
    /// Rotate out all but the most recent `MAX_TRACE_FILES - 1` trace files
    /// under `log_dir`, open a fresh one stamped with the current time, and
    /// spawn the background writer task.
    pub fn open(log_dir: impl AsRef<Path>, start_ms: u64) -> std::io::Result<Self> {
        let log_dir = log_dir.as_ref().to_path_buf();
        fs::create_dir_all(&log_dir)?;
        rotate(&log_dir)?;

        let path = log_dir.join(format!("trace-{start_ms}.jsonl"));
        let file = OpenOptions::new().create(true).append(true).open(&path)?;

        let (tx, rx) = mpsc::channel(CHANNEL_CAPACITY);
        let dropped = Arc::new(AtomicU64::new(0));

        tokio::spawn(writer_loop(file, rx));

        Ok(Self { tx, dropped })
    }

    /// Best-effort, non-blocking write. Drops the entry (and swallows the
    /// error) when the writer task is behind; never returns a `Result`
    /// because sink I/O failures must never propagate to caller code.
    pub fn write(&self, entry: LogEntry) {
        if self.tx.try_send(entry).is_err() {
            self.dropped.fetch_add(1, Ordering::Relaxed);
        }
    }

    pub fn dropped_count(&self) -> u64 {
        self.dropped.load(Ordering::Relaxed)
    }
}

async fn writer_loop(mut file: File, mut rx: mpsc::Receiver<LogEntry>) {
    while let Some(entry) = rx.recv().await {
        let line = match serde_json::to_string(&entry) {
            Ok(l) => l,
            Err(e) => {
                warn!(error = %e, "failed to serialize trace entry");
                continue;
            }
        };
        if let Err(e) = writeln!(file, "{line}") {
            warn!(error = %e, "failed to write trace entry");
        }
    }
}

fn rotate(log_dir: &Path) -> std::io::Result<()> {
    let mut files: Vec<PathBuf> = fs::read_dir(log_dir)?
        .filter_map(|e| e.ok())
        .map(|e| e.path())
        .filter(|p| {
            p.file_name()
                .and_then(|n| n.to_str())
                .is_some_and(|n| n.starts_with("trace-") && n.ends_with(".jsonl"))
        })
        .collect();

    files.sort();
    if files.len() < MAX_TRACE_FILES {
        return Ok(());
    }
    let to_remove = files.len() - (MAX_TRACE_FILES - 1);
    for path in files.into_iter().take(to_remove) {
        let _ = fs::remove_file(path);
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn writes_and_rotates() {
        let dir = tempfile::tempdir().unwrap();
        for i in 0..12u64 {
            fs::write(dir.path().join(format!("trace-{i}.jsonl")), "").unwrap();
        }

        let sink = TraceSink::open(dir.path(), 999).unwrap();
        sink.write(LogEntry {
            timestamp: chrono::Utc::now(),
            trace_id: "tr_x".into(),
            span_id: "sp_x".into(),
            parent_span_id: None,
            event_type: super::super::tracer::EventType::Point,
            level: super::super::tracer::Level::Info,
            service: "svc".into(),
            function_name: None,
            payload: serde_json::json!({}),
            duration_ms: None,
            stack_trace: None,
        });

        tokio::time::sleep(std::time::Duration::from_millis(50)).await;

        let remaining: Vec<_> = fs::read_dir(dir.path()).unwrap().collect();
        assert!(remaining.len() <= MAX_TRACE_FILES);
    }
}
