//! Columnar tables and their on-disk codecs.
//!
//! Every table is an Arrow [`RecordBatch`]. Row counting, sizing and slicing
//! are table operations; encoding and decoding go through [`TableCodec`],
//! implemented once by [`ArrowTableCodec`] for every supported content type.

use std::{
    io::{BufReader, Cursor},
    sync::Arc,
};

use arrow::{
    compute::concat_batches,
    csv,
    datatypes::{Schema, SchemaRef},
    error::ArrowError,
    json,
    record_batch::RecordBatch,
};
use bytes::Bytes;
use parquet::{
    arrow::{arrow_reader::ParquetRecordBatchReaderBuilder, ArrowWriter},
    errors::ParquetError,
    file::properties::WriterProperties,
};
use thiserror::Error;

use crate::model::{ContentEncoding, ContentType};

/// Object store transfers of tables and manifests.
pub mod io;

/// Errors raised while encoding or decoding tables.
#[derive(Debug, Error)]
pub enum CodecError {
    /// Arrow kernel or CSV/JSON codec failure.
    #[error("codec arrow error: {0}")]
    Arrow(#[from] ArrowError),
    /// Parquet codec failure.
    #[error("codec parquet error: {0}")]
    Parquet(#[from] ParquetError),
    /// No codec is available for the content type.
    #[error("unsupported content type: {}", .0.as_str())]
    UnsupportedContentType(ContentType),
    /// No codec is available for the content encoding.
    #[error("unsupported content encoding: {}", .0.as_str())]
    UnsupportedContentEncoding(ContentEncoding),
}

/// Encodes and decodes tables for the object store.
pub trait TableCodec: Send + Sync + 'static {
    /// Decode a full file into one table.
    fn decode(
        &self,
        bytes: Bytes,
        content_type: ContentType,
        content_encoding: ContentEncoding,
    ) -> Result<RecordBatch, CodecError>;

    /// Encode a table as one file.
    fn encode(&self, table: &RecordBatch, content_type: ContentType) -> Result<Bytes, CodecError>;
}

/// [`TableCodec`] backed by the Arrow CSV/JSON readers and the Parquet crate.
///
/// ORC and non-identity encodings are not supported.
#[derive(Debug, Clone, Default)]
pub struct ArrowTableCodec {
    writer_properties: Option<WriterProperties>,
}

impl ArrowTableCodec {
    /// Codec with default Parquet writer properties.
    pub fn new() -> Self {
        Self::default()
    }

    /// Override the Parquet writer properties.
    pub fn with_writer_properties(self, writer_properties: WriterProperties) -> Self {
        Self {
            writer_properties: Some(writer_properties),
        }
    }

    fn decode_parquet(bytes: Bytes) -> Result<RecordBatch, CodecError> {
        let builder = ParquetRecordBatchReaderBuilder::try_new(bytes)?;
        let schema = builder.schema().clone();
        let batches = builder.build()?.collect::<Result<Vec<_>, _>>()?;
        Ok(concat_or_empty(&schema, &batches)?)
    }

    fn decode_delimited(bytes: Bytes, delimiter: u8) -> Result<RecordBatch, CodecError> {
        let format = csv::reader::Format::default()
            .with_header(true)
            .with_delimiter(delimiter);
        let (schema, _) = format.infer_schema(Cursor::new(bytes.clone()), None)?;
        let schema = Arc::new(schema);
        let reader = csv::ReaderBuilder::new(schema.clone())
            .with_header(true)
            .with_delimiter(delimiter)
            .build(Cursor::new(bytes))?;
        let batches = reader.collect::<Result<Vec<_>, _>>()?;
        Ok(concat_or_empty(&schema, &batches)?)
    }

    fn decode_json(bytes: Bytes) -> Result<RecordBatch, CodecError> {
        let (schema, _) =
            json::reader::infer_json_schema(BufReader::new(Cursor::new(bytes.clone())), None)?;
        let schema = Arc::new(schema);
        let reader =
            json::ReaderBuilder::new(schema.clone()).build(BufReader::new(Cursor::new(bytes)))?;
        let batches = reader.collect::<Result<Vec<_>, _>>()?;
        Ok(concat_or_empty(&schema, &batches)?)
    }

    fn encode_parquet(&self, table: &RecordBatch) -> Result<Bytes, CodecError> {
        let mut buffer = Vec::new();
        let mut writer =
            ArrowWriter::try_new(&mut buffer, table.schema(), self.writer_properties.clone())?;
        writer.write(table)?;
        writer.close()?;
        Ok(Bytes::from(buffer))
    }

    fn encode_delimited(table: &RecordBatch, delimiter: u8) -> Result<Bytes, CodecError> {
        let mut buffer = Vec::new();
        {
            let mut writer = csv::WriterBuilder::new()
                .with_header(true)
                .with_delimiter(delimiter)
                .build(&mut buffer);
            writer.write(table)?;
        }
        Ok(Bytes::from(buffer))
    }

    fn encode_json(table: &RecordBatch) -> Result<Bytes, CodecError> {
        let mut buffer = Vec::new();
        {
            let mut writer = json::LineDelimitedWriter::new(&mut buffer);
            writer.write(table)?;
            writer.finish()?;
        }
        Ok(Bytes::from(buffer))
    }
}

impl TableCodec for ArrowTableCodec {
    fn decode(
        &self,
        bytes: Bytes,
        content_type: ContentType,
        content_encoding: ContentEncoding,
    ) -> Result<RecordBatch, CodecError> {
        if content_encoding != ContentEncoding::Identity {
            return Err(CodecError::UnsupportedContentEncoding(content_encoding));
        }
        match content_type {
            ContentType::Parquet => Self::decode_parquet(bytes),
            ContentType::Csv => Self::decode_delimited(bytes, b','),
            ContentType::Tsv => Self::decode_delimited(bytes, b'\t'),
            ContentType::Psv => Self::decode_delimited(bytes, b'|'),
            ContentType::Json => Self::decode_json(bytes),
            ContentType::Orc => Err(CodecError::UnsupportedContentType(content_type)),
        }
    }

    fn encode(&self, table: &RecordBatch, content_type: ContentType) -> Result<Bytes, CodecError> {
        match content_type {
            ContentType::Parquet => self.encode_parquet(table),
            ContentType::Csv => Self::encode_delimited(table, b','),
            ContentType::Tsv => Self::encode_delimited(table, b'\t'),
            ContentType::Psv => Self::encode_delimited(table, b'|'),
            ContentType::Json => Self::encode_json(table),
            ContentType::Orc => Err(CodecError::UnsupportedContentType(content_type)),
        }
    }
}

fn concat_or_empty(schema: &SchemaRef, batches: &[RecordBatch]) -> Result<RecordBatch, ArrowError> {
    match batches {
        [] => Ok(RecordBatch::new_empty(schema.clone())),
        [single] => Ok(single.clone()),
        _ => concat_batches(schema, batches),
    }
}

/// Concatenate tables that share a schema.
///
/// Returns `None` for an empty input.
pub fn concat_tables(tables: &[RecordBatch]) -> Result<Option<RecordBatch>, ArrowError> {
    let Some(first) = tables.first() else {
        return Ok(None);
    };
    concat_or_empty(&first.schema(), tables).map(Some)
}

/// In-memory size of a table in bytes.
pub fn table_size(table: &RecordBatch) -> u64 {
    table.get_array_memory_size() as u64
}

/// Split a table into zero-copy slices of at most `max_rows` rows.
///
/// An empty table yields no slices.
pub fn slice_table(table: &RecordBatch, max_rows: usize) -> Vec<RecordBatch> {
    let max_rows = max_rows.max(1);
    let rows = table.num_rows();
    (0..rows)
        .step_by(max_rows)
        .map(|offset| table.slice(offset, max_rows.min(rows - offset)))
        .collect()
}

/// Schema with every field nullable and no metadata.
///
/// Tables read back from different codecs only agree on names and types, so
/// they are normalized to this shape before being concatenated.
pub fn relaxed_schema(schema: &Schema) -> SchemaRef {
    Arc::new(Schema::new(
        schema
            .fields()
            .iter()
            .map(|field| {
                field
                    .as_ref()
                    .clone()
                    .with_nullable(true)
                    .with_metadata(Default::default())
            })
            .collect::<Vec<_>>(),
    ))
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use arrow::{
        array::{Int64Array, StringArray},
        datatypes::{DataType, Field, Schema},
        record_batch::RecordBatch,
    };

    use super::*;

    fn sample() -> RecordBatch {
        let schema = Arc::new(Schema::new(vec![
            Field::new("id", DataType::Int64, false),
            Field::new("name", DataType::Utf8, true),
        ]));
        RecordBatch::try_new(
            schema,
            vec![
                Arc::new(Int64Array::from(vec![1, 2, 3, 4, 5])),
                Arc::new(StringArray::from(vec!["a", "b", "c", "d", "e"])),
            ],
        )
        .expect("batch")
    }

    #[test]
    fn parquet_round_trip_preserves_rows() {
        let codec = ArrowTableCodec::new();
        let table = sample();
        let bytes = codec.encode(&table, ContentType::Parquet).expect("encode");
        let decoded = codec
            .decode(bytes, ContentType::Parquet, ContentEncoding::Identity)
            .expect("decode");
        assert_eq!(decoded.num_rows(), 5);
        assert_eq!(decoded.columns(), table.columns());
    }

    #[test]
    fn tsv_decodes_with_inferred_schema() {
        let codec = ArrowTableCodec::new();
        let bytes = codec.encode(&sample(), ContentType::Tsv).expect("encode");
        assert!(std::str::from_utf8(&bytes).expect("utf8").starts_with("id\tname"));
        let decoded = codec
            .decode(bytes, ContentType::Tsv, ContentEncoding::Identity)
            .expect("decode");
        assert_eq!(decoded.num_rows(), 5);
        assert_eq!(decoded.schema().field(0).data_type(), &DataType::Int64);
    }

    #[test]
    fn unsupported_formats_are_rejected() {
        let codec = ArrowTableCodec::new();
        assert!(matches!(
            codec.encode(&sample(), ContentType::Orc),
            Err(CodecError::UnsupportedContentType(ContentType::Orc))
        ));
        assert!(matches!(
            codec.decode(Bytes::new(), ContentType::Parquet, ContentEncoding::Gzip),
            Err(CodecError::UnsupportedContentEncoding(ContentEncoding::Gzip))
        ));
    }

    #[test]
    fn slices_cover_every_row_once() {
        let slices = slice_table(&sample(), 2);
        let sizes: Vec<usize> = slices.iter().map(RecordBatch::num_rows).collect();
        assert_eq!(sizes, vec![2, 2, 1]);
        assert!(slice_table(&RecordBatch::new_empty(sample().schema()), 2).is_empty());
    }
}
