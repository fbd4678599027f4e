use async_trait::async_trait;
use serde::Serialize;
use serde_json::Value;
use tokio::io::AsyncWriteExt;
use tokio::sync::Mutex;
use tracing::info;

use sgcn_common::{CandidateRecord, TerminalRecord};

use crate::config::SinkKind;
use crate::error::SinkError;

/// Durable destination for finalized records.
#[async_trait]
pub trait TerminalSink: Send + Sync {
    async fn write(&self, record: &TerminalRecord) -> Result<(), SinkError>;
}

/// One JSON line per terminal record, keyed the way the cache stores it.
#[derive(Serialize)]
struct SinkLine<'a> {
    key: String,
    row_id: &'a str,
    value: &'a CandidateRecord,
}

fn to_line(record: &TerminalRecord) -> Result<String, SinkError> {
    let line = SinkLine {
        key: record.sink_key(),
        row_id: &record.row_id,
        value: &record.data,
    };
    Ok(format!("{}\n", serde_json::to_string(&line)?))
}

pub struct StdoutSink;

#[async_trait]
impl TerminalSink for StdoutSink {
    async fn write(&self, record: &TerminalRecord) -> Result<(), SinkError> {
        print!("{}", to_line(record)?);
        Ok(())
    }
}

pub struct NoOpSink;

#[async_trait]
impl TerminalSink for NoOpSink {
    async fn write(&self, _record: &TerminalRecord) -> Result<(), SinkError> {
        Ok(())
    }
}

pub struct FileSink {
    path: String,
    // Serializes appends from concurrent stage-3 invocations
    lock: Mutex<()>,
}

impl FileSink {
    pub async fn new(path: String, cleanup: bool) -> Result<Self, SinkError> {
        info!("Creating file sink at {}", path);
        if cleanup {
            match tokio::fs::remove_file(&path).await {
                Ok(()) => {}
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
                Err(e) => return Err(e.into()),
            }
        }
        Ok(Self {
            path,
            lock: Mutex::new(()),
        })
    }

    pub fn path(&self) -> &str {
        &self.path
    }
}

#[async_trait]
impl TerminalSink for FileSink {
    async fn write(&self, record: &TerminalRecord) -> Result<(), SinkError> {
        let line = to_line(record)?;
        let _guard = self.lock.lock().await;
        let mut file = tokio::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)
            .await?;
        file.write_all(line.as_bytes()).await?;
        file.flush().await?;
        Ok(())
    }
}

pub async fn build_sink(kind: SinkKind, output_path: &str) -> Result<Box<dyn TerminalSink>, SinkError> {
    Ok(match kind {
        SinkKind::Stdout => Box::new(StdoutSink),
        SinkKind::File => Box::new(FileSink::new(output_path.to_owned(), true).await?),
        SinkKind::NoOp => Box::new(NoOpSink),
    })
}

/// Parse a sink file back into `(key, value)` pairs.
pub fn read_lines(contents: &str) -> Result<Vec<(String, Value)>, serde_json::Error> {
    contents
        .lines()
        .filter(|l| !l.trim().is_empty())
        .map(|l| {
            let mut line: serde_json::Map<String, Value> = serde_json::from_str(l)?;
            let key = line
                .remove("key")
                .and_then(|k| k.as_str().map(str::to_owned))
                .unwrap_or_default();
            Ok((key, line.remove("value").unwrap_or(Value::Null)))
        })
        .collect()
}
