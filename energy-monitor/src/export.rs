use std::{
    fs::OpenOptions,
    io::{self, Cursor},
    path::{Path, PathBuf},
    sync::Arc,
};

use axum::body::Bytes;
use energy_client::Reading;
use futures::Stream;
use tokio::{io::AsyncReadExt, sync::Mutex};
use tokio_util::io::ReaderStream;

pub const HEADER: [&str; 5] = ["ts", "power", "current", "voltage", "kwh"];

#[derive(thiserror::Error, Debug)]
pub enum ExportError {
    #[error("export file error: {0}")]
    Io(#[from] io::Error),
    #[error("export csv error: {0}")]
    Csv(#[from] csv::Error),
    #[error("export task failed: {0}")]
    Join(#[from] tokio::task::JoinError),
}

/// Append-only CSV duplicate of every persisted reading.
///
/// Unlike the store this is a raw log: a timestamp written twice appears twice.
#[derive(Clone)]
pub struct ExportMirror {
    path: Arc<PathBuf>,
    // Serializes appends against each other and against export snapshots.
    lock: Arc<Mutex<()>>,
}

fn header_bytes() -> Result<Vec<u8>, ExportError> {
    let mut w = csv::Writer::from_writer(Vec::new());
    w.write_record(HEADER)?;
    w.into_inner().map_err(|e| ExportError::Io(e.into_error()))
}

fn record(reading: &Reading) -> [String; 5] {
    [
        reading.ts_key(),
        reading.power.to_string(),
        reading.current.to_string(),
        reading.voltage.to_string(),
        reading.kwh.to_string(),
    ]
}

/// Append one row, writing the header first if the file is new or empty.
fn append_blocking(path: &Path, row: Option<[String; 5]>) -> Result<(), ExportError> {
    let file = OpenOptions::new().create(true).append(true).open(path)?;
    let is_empty = file.metadata()?.len() == 0;

    let mut w = csv::WriterBuilder::new().has_headers(false).from_writer(file);
    if is_empty {
        w.write_record(HEADER)?;
    }
    if let Some(row) = row {
        w.write_record(&row)?;
    }
    w.flush()?;
    Ok(())
}

impl ExportMirror {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: Arc::new(path.into()),
            lock: Arc::new(Mutex::new(())),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Create the file with its header row if it does not exist yet.
    pub async fn init(&self) -> Result<(), ExportError> {
        let _guard = self.lock.lock().await;
        let path = Arc::clone(&self.path);
        tokio::task::spawn_blocking(move || append_blocking(&path, None)).await?
    }

    pub async fn append(&self, reading: &Reading) -> Result<(), ExportError> {
        let _guard = self.lock.lock().await;
        let path = Arc::clone(&self.path);
        let row = record(reading);
        tokio::task::spawn_blocking(move || append_blocking(&path, Some(row))).await?
    }

    /// Full file contents as a byte stream, unmodified.
    ///
    /// The stream ends at the file length observed when the export started, so
    /// rows appended while it is being read are not cut in half. A file that
    /// does not exist yet exports as just the header row.
    pub async fn export(&self) -> Result<impl Stream<Item = io::Result<Bytes>> + Send + 'static, ExportError> {
        let _guard = self.lock.lock().await;
        let reader: Box<dyn tokio::io::AsyncRead + Send + Unpin> = match tokio::fs::File::open(&*self.path).await {
            Ok(file) => {
                let len = file.metadata().await?.len();
                Box::new(file.take(len))
            }
            Err(e) if e.kind() == io::ErrorKind::NotFound => Box::new(Cursor::new(header_bytes()?)),
            Err(e) => return Err(e.into()),
        };
        Ok(ReaderStream::new(reader))
    }
}
