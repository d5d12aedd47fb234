use std::collections::HashSet;
use std::fs::{File, OpenOptions};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use chrono::Utc;
use thiserror::Error;
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;

use super::MetricsRecord;

// ─── Errors ──────────────────────────────────────────────────────

/// Any of these means the output is broken; the run cannot continue.
#[derive(Debug, Error)]
pub enum SinkError {
    #[error("cannot create sink file {path}: {source}")]
    Open {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("sink I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("CSV encoding error: {0}")]
    Csv(#[from] csv::Error),

    #[error("sink writer is closed")]
    Closed,

    #[error("sink writer stopped: {0}")]
    Stopped(String),

    #[error("sink writer thread panicked")]
    Panicked,
}

// ─── CSV encoder ─────────────────────────────────────────────────

/// Append-only CSV file whose header grows with the records.
///
/// Columns are kept in first-seen order. A record that carries a field the
/// header does not know yet widens the file: it is rewritten once with the
/// new header and every earlier row padded with empty cells. Cells a record
/// does not have are written empty.
pub struct CsvSink {
    path: PathBuf,
    columns: Vec<String>,
    known: HashSet<String>,
    writer: csv::Writer<File>,
    rows: u64,
}

impl CsvSink {
    /// Create a new file at `path`. Refuses to overwrite an existing one.
    pub fn create(path: impl Into<PathBuf>) -> Result<Self, SinkError> {
        let path = path.into();
        let file = OpenOptions::new()
            .write(true)
            .create_new(true)
            .open(&path)
            .map_err(|source| SinkError::Open {
                path: path.clone(),
                source,
            })?;

        Ok(Self {
            path,
            columns: Vec::new(),
            known: HashSet::new(),
            writer: csv::WriterBuilder::new().from_writer(file),
            rows: 0,
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn append(&mut self, record: &MetricsRecord) -> Result<(), SinkError> {
        let added: Vec<String> = record
            .names()
            .filter(|name| !self.known.contains(*name))
            .map(str::to_owned)
            .collect();

        if !added.is_empty() {
            if self.rows == 0 {
                self.columns.extend(added);
                self.known = self.columns.iter().cloned().collect();
                self.writer.write_record(&self.columns)?;
            } else {
                self.widen(added)?;
            }
        }

        let row: Vec<String> = self
            .columns
            .iter()
            .map(|column| record.get(column).map(|v| v.to_cell()).unwrap_or_default())
            .collect();
        self.writer.write_record(&row)?;
        self.rows += 1;
        Ok(())
    }

    /// Rewrite the file under a wider header.
    fn widen(&mut self, added: Vec<String>) -> Result<(), SinkError> {
        self.writer.flush()?;

        tracing::debug!(
            path = %self.path.display(),
            added = ?added,
            rows = self.rows,
            "widening sink header"
        );

        self.columns.extend(added);
        self.known = self.columns.iter().cloned().collect();
        let width = self.columns.len();

        let staging = self.path.with_extension("csv.partial");
        {
            let mut reader = csv::ReaderBuilder::new()
                .has_headers(true)
                .from_path(&self.path)?;
            let mut rewrite = csv::Writer::from_path(&staging)?;
            rewrite.write_record(&self.columns)?;
            for row in reader.records() {
                let row = row?;
                let mut cells: Vec<&str> = row.iter().collect();
                cells.resize(width, "");
                rewrite.write_record(&cells)?;
            }
            rewrite.flush()?;
        }

        std::fs::rename(&staging, &self.path)?;
        let file = OpenOptions::new().append(true).open(&self.path)?;
        self.writer = csv::WriterBuilder::new().from_writer(file);
        Ok(())
    }

    /// Flush and close. Returns the number of rows written.
    pub fn finish(mut self) -> Result<u64, SinkError> {
        self.writer.flush()?;
        self.writer.get_ref().sync_all()?;
        Ok(self.rows)
    }
}

// ─── Writer task ─────────────────────────────────────────────────

enum SinkCommand {
    /// The writer answers once the row is written or has failed.
    Append(MetricsRecord, oneshot::Sender<Result<(), SinkError>>),
    Close,
}

/// Owns the run's output file.
///
/// A single blocking task holds the [`CsvSink`]; producers reach it through
/// a bounded channel, so appends are serialized, land in the order producers
/// handed them over, and slow disks push back on the producers. The first
/// failed append stops the writer; that record's producer gets the error and
/// everything still queued gets [`SinkError::Closed`].
pub struct SinkWriter {
    path: PathBuf,
    tx: mpsc::Sender<SinkCommand>,
    worker: JoinHandle<Result<u64, SinkError>>,
    written: Arc<AtomicU64>,
}

/// Cloneable producer side of the sink.
#[derive(Clone)]
pub struct SinkHandle {
    tx: mpsc::Sender<SinkCommand>,
    written: Arc<AtomicU64>,
}

impl SinkWriter {
    /// Open `<directory>/<prefix>-<unix millis>.csv` for this run.
    pub fn open(directory: &Path, prefix: &str, capacity: usize) -> Result<Self, SinkError> {
        let name = format!("{prefix}-{}.csv", Utc::now().timestamp_millis());
        Self::open_at(directory.join(name), capacity)
    }

    /// Open a sink at an explicit path.
    pub fn open_at(path: PathBuf, capacity: usize) -> Result<Self, SinkError> {
        let sink = CsvSink::create(&path)?;
        let (tx, mut rx) = mpsc::channel(capacity.max(1));
        let written = Arc::new(AtomicU64::new(0));
        let counter = written.clone();

        let worker = tokio::task::spawn_blocking(move || {
            let mut sink = sink;
            while let Some(command) = rx.blocking_recv() {
                match command {
                    SinkCommand::Append(record, ack) => match sink.append(&record) {
                        Ok(()) => {
                            counter.fetch_add(1, Ordering::Relaxed);
                            let _ = ack.send(Ok(()));
                        }
                        Err(e) => {
                            tracing::error!(
                                path = %sink.path().display(),
                                error = %e,
                                "sink append failed"
                            );
                            let _ = ack.send(Err(SinkError::Stopped(e.to_string())));
                            return Err(e);
                        }
                    },
                    SinkCommand::Close => break,
                }
            }
            sink.finish()
        });

        tracing::info!(path = %path.display(), "sink opened");

        Ok(Self {
            path,
            tx,
            worker,
            written,
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn handle(&self) -> SinkHandle {
        SinkHandle {
            tx: self.tx.clone(),
            written: self.written.clone(),
        }
    }

    /// Drain everything emitted so far, flush, close the file.
    ///
    /// Handles that outlive this call get [`SinkError::Closed`].
    pub async fn close(self) -> Result<u64, SinkError> {
        // A send failure means the worker already stopped; its result says why.
        let _ = self.tx.send(SinkCommand::Close).await;
        drop(self.tx);
        self.worker.await.map_err(|_| SinkError::Panicked)?
    }
}

impl SinkHandle {
    /// Hand a record to the writer and wait until it is written. Waits
    /// while the queue is full.
    pub async fn emit(&self, record: MetricsRecord) -> Result<(), SinkError> {
        let (ack, written) = oneshot::channel();
        self.tx
            .send(SinkCommand::Append(record, ack))
            .await
            .map_err(|_| SinkError::Closed)?;
        // A dropped ack means the writer stopped before reaching this record.
        written.await.map_err(|_| SinkError::Closed)?
    }

    /// Rows durably handed to the encoder so far.
    pub fn records_written(&self) -> u64 {
        self.written.load(Ordering::Relaxed)
    }
}
