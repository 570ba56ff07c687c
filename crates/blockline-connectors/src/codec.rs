//! File payload codecs: whole-file decompression plus table (de)serialisation.

use std::io::{Cursor, Read};
use std::sync::Arc;

use arrow::compute::concat_batches;
use arrow::datatypes::SchemaRef;
use arrow::record_batch::RecordBatch;
use blockline_types::format::{Compression, FileFormat};
use blockline_types::ConnectorError;
use bytes::Bytes;
use parquet::arrow::arrow_reader::ParquetRecordBatchReaderBuilder;
use parquet::arrow::ArrowWriter;

/// How a file-producing extractor's payloads must be read back as tables.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FileCodec {
    pub format: FileFormat,
    pub compression: Option<Compression>,
}

impl FileCodec {
    #[must_use]
    pub fn new(format: FileFormat, compression: Option<Compression>) -> Self {
        Self {
            format,
            compression,
        }
    }

    /// Decode one file into a single table.
    ///
    /// # Errors
    ///
    /// Returns `Codec` if the bytes cannot be decompressed or parsed.
    pub fn decode(&self, data: &Bytes) -> Result<RecordBatch, ConnectorError> {
        match self.compression {
            Some(codec) => {
                let raw = decompress(codec, data)?;
                decode_table(self.format, &Bytes::from(raw))
            }
            None => decode_table(self.format, data),
        }
    }
}

/// Decompress a whole file.
///
/// # Errors
///
/// Returns `Codec` if the input is not valid for `codec`.
pub fn decompress(codec: Compression, data: &[u8]) -> Result<Vec<u8>, ConnectorError> {
    let mut out = Vec::new();
    let result = match codec {
        Compression::Bzip2 => bzip2::read::MultiBzDecoder::new(data).read_to_end(&mut out),
        Compression::Zstd => zstd::stream::read::Decoder::new(data)
            .and_then(|mut decoder| decoder.read_to_end(&mut out)),
        Compression::Lz4 => lz4_flex::frame::FrameDecoder::new(data).read_to_end(&mut out),
    };
    result.map_err(|e| ConnectorError::codec(format!("{codec} decompression failed: {e}")))?;
    Ok(out)
}

/// Parse one uncompressed file into a single table.
///
/// # Errors
///
/// Returns `Codec` on malformed input or mixed schemas inside the file.
pub fn decode_table(format: FileFormat, data: &Bytes) -> Result<RecordBatch, ConnectorError> {
    let (schema, batches) = match format {
        FileFormat::Parquet => read_parquet(data.clone()),
        FileFormat::Json => read_json(data),
        FileFormat::Csv => read_csv(data),
    }
    .map_err(|e| ConnectorError::codec(format!("failed to decode {format} file: {e}")))?;

    concat_batches(&schema, &batches)
        .map_err(|e| ConnectorError::codec(format!("failed to combine {format} batches: {e}")))
}

type BoxError = Box<dyn std::error::Error + Send + Sync>;
type Decoded = (SchemaRef, Vec<RecordBatch>);

fn read_parquet(data: Bytes) -> Result<Decoded, BoxError> {
    let builder = ParquetRecordBatchReaderBuilder::try_new(data)?;
    let schema = builder.schema().clone();
    let batches = builder.build()?.collect::<Result<Vec<_>, _>>()?;
    Ok((schema, batches))
}

fn read_json(data: &[u8]) -> Result<Decoded, BoxError> {
    let (schema, _) = arrow::json::reader::infer_json_schema_from_seekable(Cursor::new(data), None)?;
    let schema = Arc::new(schema);
    let batches = arrow::json::ReaderBuilder::new(schema.clone())
        .build(Cursor::new(data))?
        .collect::<Result<Vec<_>, _>>()?;
    Ok((schema, batches))
}

fn read_csv(data: &[u8]) -> Result<Decoded, BoxError> {
    let (schema, _) = arrow::csv::reader::Format::default()
        .with_header(true)
        .infer_schema(Cursor::new(data), None)?;
    let schema = Arc::new(schema);
    let batches = arrow::csv::ReaderBuilder::new(schema.clone())
        .with_header(true)
        .build(Cursor::new(data))?
        .collect::<Result<Vec<_>, _>>()?;
    Ok((schema, batches))
}

/// Serialise a table in `format`.
///
/// # Errors
///
/// Returns `Codec` if the writer rejects the table.
pub fn encode_table(format: FileFormat, batch: &RecordBatch) -> Result<Vec<u8>, ConnectorError> {
    let mut buf = Vec::new();
    let result = match format {
        FileFormat::Parquet => write_parquet(batch, &mut buf),
        FileFormat::Json => write_json(batch, &mut buf),
        FileFormat::Csv => write_csv(batch, &mut buf),
    };
    result.map_err(|e| ConnectorError::codec(format!("failed to encode {format} file: {e}")))?;
    Ok(buf)
}

fn write_parquet(batch: &RecordBatch, buf: &mut Vec<u8>) -> Result<(), BoxError> {
    let mut writer = ArrowWriter::try_new(buf, batch.schema(), None)?;
    writer.write(batch)?;
    writer.close()?;
    Ok(())
}

fn write_json(batch: &RecordBatch, buf: &mut Vec<u8>) -> Result<(), BoxError> {
    let mut writer = arrow::json::LineDelimitedWriter::new(buf);
    writer.write(batch)?;
    writer.finish()?;
    Ok(())
}

fn write_csv(batch: &RecordBatch, buf: &mut Vec<u8>) -> Result<(), BoxError> {
    let mut writer = arrow::csv::WriterBuilder::new()
        .with_header(true)
        .build(buf);
    writer.write(batch)?;
    Ok(())
}
