//! JSONL append-only telemetry sink.
//!
//! Storage path: `<base_dir>/{day}/events-{datetime}.jsonl`, one file per day.
//!
//! `emit` only queues the event; a writer task spawned on first use drains
//! the queue in order, so a slow disk never holds up the caller.

use std::path::{Path, PathBuf};
use std::sync::{Arc, OnceLock};

use async_trait::async_trait;
use chrono::{Local, Utc};
use serde_json::Value;
use tokio::fs::{self, OpenOptions};
use tokio::io::AsyncWriteExt;
use tokio::sync::{mpsc, oneshot, Mutex};

use super::{TelemetryEvent, TelemetrySink};

enum Command {
    Write(TelemetryEvent),
    Flush(oneshot::Sender<()>),
}

#[derive(Clone)]
pub struct JsonlTelemetry {
    files: JsonlFiles,
    queue: Arc<OnceLock<mpsc::UnboundedSender<Command>>>,
}

/// The file side, owned by the writer task.
#[derive(Clone)]
struct JsonlFiles {
    base_dir: PathBuf,
    current_file: Arc<Mutex<Option<CurrentFile>>>,
}

struct CurrentFile {
    /// YYYY-MM-DD, used for rotation
    date: String,
    path: PathBuf,
}

impl JsonlTelemetry {
    pub fn new(base_dir: impl AsRef<Path>) -> Self {
        Self {
            files: JsonlFiles {
                base_dir: base_dir.as_ref().to_path_buf(),
                current_file: Arc::new(Mutex::new(None)),
            },
            queue: Arc::new(OnceLock::new()),
        }
    }

    pub fn base_dir(&self) -> &Path {
        &self.files.base_dir
    }

    /// Append one event to today's file, bypassing the queue.
    pub async fn append(&self, event: &TelemetryEvent) -> Result<PathBuf, TelemetryWriteError> {
        self.files.append(event).await
    }

    fn queue(&self) -> &mpsc::UnboundedSender<Command> {
        self.queue.get_or_init(|| {
            let (tx, mut rx) = mpsc::unbounded_channel();
            let files = self.files.clone();
            tokio::spawn(async move {
                while let Some(command) = rx.recv().await {
                    match command {
                        Command::Write(event) => {
                            if let Err(e) = files.append(&event).await {
                                tracing::warn!("[Telemetry] Failed to write event {}: {}", event.event, e);
                            }
                        }
                        Command::Flush(done) => {
                            let _ = done.send(());
                        }
                    }
                }
            });
            tx
        })
    }
}

impl JsonlFiles {
    async fn append(&self, event: &TelemetryEvent) -> Result<PathBuf, TelemetryWriteError> {
        let today = Local::now().format("%Y-%m-%d").to_string();
        let file_path = self.file_for(&today).await?;

        let mut line = serde_json::to_string(event)
            .map_err(|e| TelemetryWriteError::Serialization(e.to_string()))?;
        line.push('\n');

        let mut file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&file_path)
            .await
            .map_err(|e| TelemetryWriteError::Io(e.to_string()))?;
        file.write_all(line.as_bytes())
            .await
            .map_err(|e| TelemetryWriteError::Io(e.to_string()))?;
        file.flush()
            .await
            .map_err(|e| TelemetryWriteError::Io(e.to_string()))?;

        Ok(file_path)
    }

    async fn file_for(&self, date: &str) -> Result<PathBuf, TelemetryWriteError> {
        let mut current = self.current_file.lock().await;
        if let Some(ref cf) = *current {
            if cf.date == date {
                return Ok(cf.path.clone());
            }
        }

        let day_dir = self.base_dir.join(date);
        fs::create_dir_all(&day_dir)
            .await
            .map_err(|e| TelemetryWriteError::Io(format!("Failed to create telemetry dir: {}", e)))?;

        let filename = format!("events-{}.jsonl", Utc::now().format("%Y%m%d-%H%M%S"));
        let path = day_dir.join(filename);
        *current = Some(CurrentFile {
            date: date.to_string(),
            path: path.clone(),
        });
        Ok(path)
    }
}

#[async_trait]
impl TelemetrySink for JsonlTelemetry {
    async fn emit(&self, event: &str, attributes: Value) {
        if self
            .queue()
            .send(Command::Write(TelemetryEvent::new(event, attributes)))
            .is_err()
        {
            tracing::warn!("[Telemetry] Writer stopped; dropping event {}", event);
        }
    }

    /// Wait until every event queued so far has been written.
    async fn flush(&self) {
        let (done, written) = oneshot::channel();
        if self.queue().send(Command::Flush(done)).is_ok() {
            let _ = written.await;
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum TelemetryWriteError {
    #[error("IO error: {0}")]
    Io(String),
    #[error("Serialization error: {0}")]
    Serialization(String),
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use tempfile::TempDir;

    #[tokio::test]
    async fn test_appends_to_daily_file() {
        let temp = TempDir::new().unwrap();
        let sink = JsonlTelemetry::new(temp.path().join("telemetry"));

        let first = sink
            .append(&TelemetryEvent::new("workflow.started", json!({"instanceId": "wf-1"})))
            .await
            .unwrap();
        sink.emit("workflow.completed", json!({"instanceId": "wf-1"})).await;
        sink.flush().await;

        let content = tokio::fs::read_to_string(&first).await.unwrap();
        let events: Vec<TelemetryEvent> = content
            .lines()
            .map(|l| serde_json::from_str(l).unwrap())
            .collect();
        assert_eq!(events.len(), 2);
        assert_eq!(events[0].event, "workflow.started");
        assert_eq!(events[1].attributes["instanceId"], "wf-1");
    }

    #[tokio::test]
    async fn test_emit_queues_without_touching_disk() {
        let temp = TempDir::new().unwrap();
        let dir = temp.path().join("telemetry");
        let sink = JsonlTelemetry::new(&dir);

        // Hold the file lock so the writer cannot make progress.
        let held = sink.files.current_file.lock().await;
        for i in 0..10 {
            sink.emit("step", json!({ "n": i })).await;
        }
        assert!(!dir.exists());
        drop(held);

        sink.flush().await;
        let mut days = tokio::fs::read_dir(&dir).await.unwrap();
        let day = days.next_entry().await.unwrap().unwrap().path();
        let mut files = tokio::fs::read_dir(&day).await.unwrap();
        let file = files.next_entry().await.unwrap().unwrap().path();
        let content = tokio::fs::read_to_string(file).await.unwrap();
        let order: Vec<i64> = content
            .lines()
            .map(|l| serde_json::from_str::<TelemetryEvent>(l).unwrap().attributes["n"].as_i64().unwrap())
            .collect();
        assert_eq!(order, (0..10).collect::<Vec<_>>());
    }

    #[tokio::test]
    async fn test_emit_swallows_io_errors() {
        let temp = TempDir::new().unwrap();
        let blocker = temp.path().join("not-a-dir");
        tokio::fs::write(&blocker, b"x").await.unwrap();

        let sink = JsonlTelemetry::new(&blocker);
        sink.emit("anything", json!({})).await;
        sink.flush().await;
        assert!(sink.append(&TelemetryEvent::new("x", json!({}))).await.is_err());
    }
}
