use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::io;
use tokio::sync::mpsc;
use uuid::Uuid;

use crate::{Error, ExportPermit, ExportRecord, PagedSource, Result, SourceError};

pub const EXPORT_BATCH_SIZE: usize = 1000;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ExportFormat {
    Json,
    Csv,
}

impl ExportFormat {
    pub fn parse(value: &str) -> Option<Self> {
        match value.trim().to_ascii_lowercase().as_str() {
            "json" => Some(ExportFormat::Json),
            "csv" => Some(ExportFormat::Csv),
            _ => None,
        }
    }

    pub fn content_type(&self) -> &'static str {
        match self {
            ExportFormat::Json => "application/json; charset=utf-8",
            ExportFormat::Csv => "text/csv; charset=utf-8",
        }
    }

    pub fn extension(&self) -> &'static str {
        match self {
            ExportFormat::Json => "json",
            ExportFormat::Csv => "csv",
        }
    }
}

/// Destination of an export body.
#[async_trait]
pub trait ExportSink: Send {
    async fn write(&mut self, bytes: &[u8]) -> io::Result<()>;

    /// Push everything written so far to the transport.
    async fn flush(&mut self) -> io::Result<()>;
}

#[async_trait]
impl ExportSink for Vec<u8> {
    async fn write(&mut self, bytes: &[u8]) -> io::Result<()> {
        self.extend_from_slice(bytes);
        Ok(())
    }

    async fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

/// Buffers writes and hands each flushed batch to a bounded channel; the
/// receiving half backs a streaming HTTP body.
pub struct ChannelSink {
    tx: mpsc::Sender<Vec<u8>>,
    buffer: Vec<u8>,
}

impl ChannelSink {
    pub fn new(tx: mpsc::Sender<Vec<u8>>) -> Self {
        Self {
            tx,
            buffer: Vec::new(),
        }
    }

    pub fn channel(capacity: usize) -> (Self, mpsc::Receiver<Vec<u8>>) {
        let (tx, rx) = mpsc::channel(capacity.max(1));
        (Self::new(tx), rx)
    }
}

#[async_trait]
impl ExportSink for ChannelSink {
    async fn write(&mut self, bytes: &[u8]) -> io::Result<()> {
        self.buffer.extend_from_slice(bytes);
        Ok(())
    }

    async fn flush(&mut self) -> io::Result<()> {
        if self.buffer.is_empty() {
            return Ok(());
        }
        let chunk = std::mem::take(&mut self.buffer);
        self.tx
            .send(chunk)
            .await
            .map_err(|_| io::Error::new(io::ErrorKind::BrokenPipe, "export receiver dropped"))
    }
}

/// Pagination metadata echoed at the end of a JSON export.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ExportEnvelope {
    pub offset: usize,
    pub limit: usize,
    pub limit_clamped: bool,
}

#[derive(Debug, Clone, PartialEq)]
pub enum ExportOutcome {
    Completed,
    /// The source failed after the body had started; the message was written
    /// into the body.
    FailedInBand(String),
    /// The client went away before the body was complete.
    Disconnected,
}

#[derive(Debug, Clone, PartialEq)]
pub struct ExportSummary {
    pub export_id: Uuid,
    pub records_written: usize,
    pub outcome: ExportOutcome,
}

enum Encoder {
    Json { first: bool },
    Csv { columns: Vec<String> },
}

impl Encoder {
    fn new(format: ExportFormat, columns: Vec<String>) -> Self {
        match format {
            ExportFormat::Json => Encoder::Json { first: true },
            ExportFormat::Csv => Encoder::Csv { columns },
        }
    }

    fn open(&self) -> io::Result<Vec<u8>> {
        match self {
            Encoder::Json { .. } => Ok(br#"{"records":["#.to_vec()),
            Encoder::Csv { columns } => csv_rows(std::iter::once(columns.clone())),
        }
    }

    fn encode_batch(&mut self, batch: &[ExportRecord]) -> io::Result<Vec<u8>> {
        match self {
            Encoder::Json { first } => {
                let mut out = Vec::with_capacity(batch.len() * 128);
                for record in batch {
                    if !*first {
                        out.push(b',');
                    }
                    *first = false;
                    serde_json::to_writer(&mut out, record)?;
                }
                Ok(out)
            }
            Encoder::Csv { columns } => csv_rows(batch.iter().map(|record| {
                columns
                    .iter()
                    .map(|column| csv_cell(record.get(column)))
                    .collect::<Vec<_>>()
            })),
        }
    }

    fn close(&self, total: usize, envelope: &ExportEnvelope) -> io::Result<Vec<u8>> {
        match self {
            Encoder::Json { .. } => Ok(format!(
                r#"],"total":{},"offset":{},"limit":{},"limit_clamped":{}}}"#,
                total, envelope.offset, envelope.limit, envelope.limit_clamped
            )
            .into_bytes()),
            Encoder::Csv { .. } => Ok(Vec::new()),
        }
    }

    fn close_with_error(&self, message: &str) -> io::Result<Vec<u8>> {
        match self {
            Encoder::Json { .. } => {
                Ok(format!(r#"],"error":{}}}"#, serde_json::to_string(message)?).into_bytes())
            }
            Encoder::Csv { .. } => {
                csv_rows(std::iter::once(vec!["#error".to_string(), message.to_string()]))
            }
        }
    }
}

fn csv_rows<I>(rows: I) -> io::Result<Vec<u8>>
where
    I: IntoIterator<Item = Vec<String>>,
{
    let mut writer = csv::WriterBuilder::new()
        .flexible(true)
        .from_writer(Vec::new());
    for row in rows {
        writer.write_record(&row)?;
    }
    writer.into_inner().map_err(|e| e.into_error())
}

fn csv_cell(value: Option<&serde_json::Value>) -> String {
    match value {
        None | Some(serde_json::Value::Null) => String::new(),
        Some(serde_json::Value::String(s)) => s.clone(),
        Some(other) => other.to_string(),
    }
}

/// Writes a potentially huge result set batch by batch, flushing after every
/// batch so memory stays bounded by the batch size.
///
/// Once the first byte is out the response status is committed, so a source
/// failure is reported inside the body (`"error"` for JSON, a trailing
/// `#error` row for CSV). Consumers must check for it even on a 200.
pub struct StreamingExporter {
    format: ExportFormat,
    envelope: ExportEnvelope,
    batch_size: usize,
    export_id: Uuid,
}

impl StreamingExporter {
    pub fn new(format: ExportFormat, envelope: ExportEnvelope) -> Self {
        Self {
            format,
            envelope,
            batch_size: EXPORT_BATCH_SIZE,
            export_id: Uuid::new_v4(),
        }
    }

    pub fn with_batch_size(mut self, batch_size: usize) -> Self {
        self.batch_size = batch_size.max(1);
        self
    }

    pub fn export_id(&self) -> Uuid {
        self.export_id
    }

    pub fn format(&self) -> ExportFormat {
        self.format
    }

    /// Stream `source` into `sink` while holding `permit`. The permit is
    /// released when this returns, whichever way the export ended.
    pub async fn run<W>(
        &self,
        permit: ExportPermit,
        mut source: Box<dyn PagedSource>,
        sink: &mut W,
    ) -> ExportSummary
    where
        W: ExportSink + ?Sized,
    {
        let _permit = permit;
        let mut records_written = 0;

        let outcome = match self
            .stream(source.as_mut(), sink, &mut records_written)
            .await
        {
            Ok(outcome) => outcome,
            Err(e) => {
                tracing::debug!("Export {} stopped early: {}", self.export_id, e);
                ExportOutcome::Disconnected
            }
        };

        match &outcome {
            ExportOutcome::Completed => tracing::info!(
                "Export {} streamed {} records ({:?})",
                self.export_id,
                records_written,
                self.format
            ),
            ExportOutcome::FailedInBand(msg) => tracing::error!(
                "Export {} failed after {} records: {}",
                self.export_id,
                records_written,
                msg
            ),
            ExportOutcome::Disconnected => tracing::info!(
                "Export {} abandoned by client after {} records",
                self.export_id,
                records_written
            ),
        }

        ExportSummary {
            export_id: self.export_id,
            records_written,
            outcome,
        }
    }

    async fn stream<W>(
        &self,
        source: &mut dyn PagedSource,
        sink: &mut W,
        written: &mut usize,
    ) -> io::Result<ExportOutcome>
    where
        W: ExportSink + ?Sized,
    {
        let mut encoder = Encoder::new(self.format, source.columns());
        sink.write(&encoder.open()?).await?;
        sink.flush().await?;

        loop {
            match source.next_batch(self.batch_size).await {
                Ok(batch) if batch.is_empty() => break,
                Ok(batch) => {
                    sink.write(&encoder.encode_batch(&batch)?).await?;
                    sink.flush().await?;
                    *written += batch.len();
                }
                Err(SourceError::LimitReached) => break,
                Err(SourceError::Failed(msg)) => {
                    sink.write(&encoder.close_with_error(&msg)?).await?;
                    sink.flush().await?;
                    return Ok(ExportOutcome::FailedInBand(msg));
                }
            }
        }

        sink.write(&encoder.close(*written, &self.envelope)?).await?;
        sink.flush().await?;
        Ok(ExportOutcome::Completed)
    }

    /// Render a small export fully in memory. Used below the heavy-export
    /// threshold, where a source failure can still become a proper error status.
    pub async fn render(&self, mut source: Box<dyn PagedSource>) -> Result<Vec<u8>> {
        let mut encoder = Encoder::new(self.format, source.columns());
        let mut body = encoder.open()?;
        let mut total = 0;

        loop {
            match source.next_batch(self.batch_size).await {
                Ok(batch) if batch.is_empty() => break,
                Ok(batch) => {
                    body.extend(encoder.encode_batch(&batch)?);
                    total += batch.len();
                }
                Err(SourceError::LimitReached) => break,
                Err(SourceError::Failed(msg)) => {
                    return Err(Error::Other(anyhow::anyhow!("export source failed: {}", msg)))
                }
            }
        }

        body.extend(encoder.close(total, &self.envelope)?);
        Ok(body)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn record(value: serde_json::Value) -> ExportRecord {
        value.as_object().cloned().unwrap()
    }

    #[test]
    fn test_format_parse() {
        assert_eq!(ExportFormat::parse("CSV"), Some(ExportFormat::Csv));
        assert_eq!(ExportFormat::parse(" json "), Some(ExportFormat::Json));
        assert_eq!(ExportFormat::parse("xml"), None);
    }

    #[test]
    fn test_json_batches_are_comma_separated() {
        let mut encoder = Encoder::new(ExportFormat::Json, vec![]);
        let first = encoder.encode_batch(&[record(json!({"id": 1}))]).unwrap();
        let second = encoder
            .encode_batch(&[record(json!({"id": 2})), record(json!({"id": 3}))])
            .unwrap();
        assert_eq!(String::from_utf8(first).unwrap(), r#"{"id":1}"#);
        assert_eq!(String::from_utf8(second).unwrap(), r#",{"id":2},{"id":3}"#);
    }

    #[test]
    fn test_csv_cells_are_quoted() {
        let mut encoder = Encoder::new(
            ExportFormat::Csv,
            vec!["id".to_string(), "name".to_string(), "score".to_string()],
        );
        let rows = encoder
            .encode_batch(&[record(json!({"id": 1, "name": "Acme, Inc", "score": null}))])
            .unwrap();
        assert_eq!(String::from_utf8(rows).unwrap(), "1,\"Acme, Inc\",\n");
    }

    #[test]
    fn test_json_error_is_escaped() {
        let encoder = Encoder::new(ExportFormat::Json, vec![]);
        let tail = encoder.close_with_error("disk \"gone\"").unwrap();
        assert_eq!(
            String::from_utf8(tail).unwrap(),
            r#"],"error":"disk \"gone\""}"#
        );
    }

    #[tokio::test]
    async fn test_channel_sink_sends_on_flush_only() {
        let (mut sink, mut rx) = ChannelSink::channel(4);
        sink.write(b"ab").await.unwrap();
        sink.write(b"cd").await.unwrap();
        assert!(rx.try_recv().is_err());

        sink.flush().await.unwrap();
        sink.flush().await.unwrap();
        assert_eq!(rx.recv().await.unwrap(), b"abcd".to_vec());
        assert!(rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn test_channel_sink_reports_dropped_receiver() {
        let (mut sink, rx) = ChannelSink::channel(1);
        drop(rx);
        sink.write(b"x").await.unwrap();
        let err = sink.flush().await.unwrap_err();
        assert_eq!(err.kind(), io::ErrorKind::BrokenPipe);
    }
}
