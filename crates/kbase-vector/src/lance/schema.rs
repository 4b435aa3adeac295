//! Arrow schema of the `chunks` table and conversions to and from record batches.

use std::sync::Arc;

use arrow_array::types::Float32Type;
use arrow_array::{
    Array, ArrayRef, FixedSizeListArray, Float32Array, Int64Array, RecordBatch, StringArray,
};
use arrow_schema::{DataType, Field, Schema, SchemaRef};

use kbase_core::types::{Chunk, ChunkMetadata};
use kbase_core::{Error, Result};

pub(crate) const TABLE_NAME: &str = "chunks";

pub(crate) fn chunk_schema(dimension: usize) -> Result<SchemaRef> {
    let dim = i32::try_from(dimension)
        .map_err(|_| Error::InvalidArgument(format!("dimension {dimension} is too large")))?;
    Ok(Arc::new(Schema::new(vec![
        Field::new("id", DataType::Utf8, false),
        Field::new("seq", DataType::Int64, false),
        Field::new("text", DataType::Utf8, false),
        Field::new("source", DataType::Utf8, false),
        Field::new("category", DataType::Utf8, false),
        Field::new("filename", DataType::Utf8, false),
        Field::new("rel_path", DataType::Utf8, false),
        Field::new("chunk_index", DataType::Int64, false),
        Field::new("total_chunks", DataType::Int64, false),
        Field::new("start_offset", DataType::Int64, false),
        Field::new("end_offset", DataType::Int64, false),
        Field::new(
            "vector",
            DataType::FixedSizeList(Arc::new(Field::new("item", DataType::Float32, true)), dim),
            false,
        ),
    ])))
}

fn to_i64(v: usize) -> i64 {
    i64::try_from(v).unwrap_or(i64::MAX)
}

fn to_usize(v: i64) -> usize {
    usize::try_from(v).unwrap_or(0)
}

fn strings<'a>(chunks: &'a [Chunk], f: impl Fn(&'a Chunk) -> &'a str) -> ArrayRef {
    Arc::new(StringArray::from_iter_values(chunks.iter().map(f)))
}

fn ints(chunks: &[Chunk], f: impl Fn(&Chunk) -> usize) -> ArrayRef {
    Arc::new(Int64Array::from_iter_values(chunks.iter().map(|c| to_i64(f(c)))))
}

/// Builds one batch; `first_seq` is the insertion sequence of `chunks[0]`.
pub(crate) fn to_record_batch(chunks: &[Chunk], first_seq: u64, dimension: usize) -> Result<RecordBatch> {
    let schema = chunk_schema(dimension)?;
    let dim = i32::try_from(dimension).unwrap_or(i32::MAX);
    let seqs = (0..chunks.len() as u64).map(|i| i64::try_from(first_seq + i).unwrap_or(i64::MAX));
    let vectors = FixedSizeListArray::from_iter_primitive::<Float32Type, _, _>(
        chunks
            .iter()
            .map(|c| Some(c.embedding.iter().copied().map(Some).collect::<Vec<_>>())),
        dim,
    );

    RecordBatch::try_new(
        schema,
        vec![
            strings(chunks, |c| c.id.as_str()),
            Arc::new(Int64Array::from_iter_values(seqs)),
            strings(chunks, |c| c.text.as_str()),
            strings(chunks, |c| c.metadata.source.as_str()),
            strings(chunks, |c| c.metadata.category.as_str()),
            strings(chunks, |c| c.metadata.filename.as_str()),
            strings(chunks, |c| c.metadata.rel_path.as_str()),
            ints(chunks, |c| c.metadata.chunk_index),
            ints(chunks, |c| c.metadata.total_chunks),
            ints(chunks, |c| c.metadata.start),
            ints(chunks, |c| c.metadata.end),
            Arc::new(vectors),
        ],
    )
    .map_err(|e| Error::Storage(format!("failed to build record batch: {e}")))
}

fn column<'a, T: 'static>(batch: &'a RecordBatch, name: &str) -> Result<&'a T> {
    batch
        .column_by_name(name)
        .and_then(|c| c.as_any().downcast_ref::<T>())
        .ok_or_else(|| Error::Storage(format!("{TABLE_NAME}.{name} column missing")))
}

/// One search hit as read back from the table.
pub(crate) struct Row {
    pub seq: i64,
    pub distance: f32,
    pub text: String,
    pub metadata: ChunkMetadata,
}

/// Rows of a vector search result batch, which carries the `_distance` column.
pub(crate) fn rows_from_batch(batch: &RecordBatch) -> Result<Vec<Row>> {
    let seq = column::<Int64Array>(batch, "seq")?;
    let distance = column::<Float32Array>(batch, "_distance")?;
    let text = column::<StringArray>(batch, "text")?;
    let source = column::<StringArray>(batch, "source")?;
    let category = column::<StringArray>(batch, "category")?;
    let filename = column::<StringArray>(batch, "filename")?;
    let rel_path = column::<StringArray>(batch, "rel_path")?;
    let chunk_index = column::<Int64Array>(batch, "chunk_index")?;
    let total_chunks = column::<Int64Array>(batch, "total_chunks")?;
    let start = column::<Int64Array>(batch, "start_offset")?;
    let end = column::<Int64Array>(batch, "end_offset")?;

    Ok((0..batch.num_rows())
        .map(|i| Row {
            seq: seq.value(i),
            distance: distance.value(i),
            text: text.value(i).to_string(),
            metadata: ChunkMetadata {
                source: source.value(i).to_string(),
                category: category.value(i).to_string(),
                filename: filename.value(i).to_string(),
                rel_path: rel_path.value(i).to_string(),
                chunk_index: to_usize(chunk_index.value(i)),
                total_chunks: to_usize(total_chunks.value(i)),
                start: to_usize(start.value(i)),
                end: to_usize(end.value(i)),
            },
        })
        .collect())
}
