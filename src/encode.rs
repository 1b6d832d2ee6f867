// Columnar encoding of cached data for the JS runtime boundary

use std::sync::Arc;

use anyhow::{Context, Result};
use arrow::array::{Array, ArrayRef, RecordBatch, StringArray};
use arrow::compute::{cast_with_options, CastOptions};
use arrow::datatypes::{DataType, Field, Schema, TimeUnit};
use arrow::error::ArrowError;
use arrow::ipc::writer::FileWriter;
use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine as _;
use chrono::{NaiveDate, NaiveDateTime};
use log::debug;
use serde::ser::{Serialize, SerializeMap, Serializer};
use serde_json::Value;

use crate::cache::DataValue;
use crate::ir::TYPE_KEY;
use crate::spec::Table;

/// How serialized buffers travel to the rendering runtime.
///
/// The widget path carries binary payloads natively; the document path goes
/// through a JSON HTTP body and needs text-safe encoding.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Transport {
    Binary,
    Base64,
}

/// One serialized data cache entry, ready for transport.
#[derive(Debug, Clone)]
pub enum SerializedData {
    DataFrame(DataPayload),
    /// Original geometry structure, shipped verbatim and never encoded.
    GeoJson(Arc<Value>),
}

#[derive(Debug, Clone)]
pub enum DataPayload {
    Bytes(Vec<u8>),
    Base64(String),
}

impl Serialize for SerializedData {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        match self {
            SerializedData::DataFrame(payload) => {
                let mut map = serializer.serialize_map(Some(2))?;
                map.serialize_entry(TYPE_KEY, "DataFrame")?;
                match payload {
                    DataPayload::Bytes(bytes) => map.serialize_entry("value", bytes)?,
                    DataPayload::Base64(text) => map.serialize_entry("value", text)?,
                }
                map.end()
            }
            SerializedData::GeoJson(value) => value.as_ref().serialize(serializer),
        }
    }
}

/// Serialize one cache entry for the given transport.
pub fn serialize_entry(entry: &DataValue, transport: Transport) -> Result<SerializedData> {
    match entry {
        DataValue::Table(table) => {
            let bytes = encode_table(table)?;
            let payload = match transport {
                Transport::Binary => DataPayload::Bytes(bytes),
                Transport::Base64 => DataPayload::Base64(BASE64.encode(&bytes)),
            };
            Ok(SerializedData::DataFrame(payload))
        }
        DataValue::GeoJson(geojson) => Ok(SerializedData::GeoJson(geojson.shared_value())),
    }
}

/// Encode a table as an uncompressed Arrow IPC file buffer with a narrowed
/// schema: the consuming JS reader supports neither 64-bit logical types
/// nor 64-bit offset buffers, and only detects temporal columns at
/// millisecond resolution.
pub fn encode_table(table: &Table) -> Result<Vec<u8>> {
    let batch = coerce_date_strings(table.batch())?;
    let batch = narrow_batch(&batch)?;
    write_ipc(&batch)
}

/// Best-effort coercion of string columns holding ISO dates to timestamps.
/// Columns with any non-coercible value are left untouched.
fn coerce_date_strings(batch: &RecordBatch) -> Result<RecordBatch> {
    let mut fields: Vec<Field> = Vec::with_capacity(batch.num_columns());
    let mut columns: Vec<ArrayRef> = Vec::with_capacity(batch.num_columns());
    for (field, column) in batch.schema().fields().iter().zip(batch.columns()) {
        let target = DataType::Timestamp(TimeUnit::Millisecond, None);
        if field.data_type() == &DataType::Utf8 && column_holds_dates(column) {
            match strict_cast(column.as_ref(), &target) {
                Ok(coerced) => {
                    fields.push(field.as_ref().clone().with_data_type(target));
                    columns.push(coerced);
                    continue;
                }
                Err(e) => {
                    debug!("date coercion failed for column '{}': {}", field.name(), e);
                }
            }
        }
        fields.push(field.as_ref().clone());
        columns.push(column.clone());
    }
    RecordBatch::try_new(Arc::new(Schema::new(fields)), columns)
        .context("rebuilding batch after date coercion")
}

/// True if every non-null value of a string column is an ISO date or
/// datetime, and at least one value is present.
fn column_holds_dates(column: &ArrayRef) -> bool {
    let Some(strings) = column.as_any().downcast_ref::<StringArray>() else {
        return false;
    };
    let mut seen = false;
    for i in 0..strings.len() {
        if strings.is_null(i) {
            continue;
        }
        let v = strings.value(i);
        if NaiveDate::parse_from_str(v, "%Y-%m-%d").is_err()
            && NaiveDateTime::parse_from_str(v, "%Y-%m-%dT%H:%M:%S").is_err()
        {
            return false;
        }
        seen = true;
    }
    seen
}

/// Rewrite a batch against its narrowed schema. Columns whose cast fails
/// (or whose type has no narrowing rule) pass through unmodified; encoding
/// never fails because of an unrecognized column type.
fn narrow_batch(batch: &RecordBatch) -> Result<RecordBatch> {
    let mut fields: Vec<Field> = Vec::with_capacity(batch.num_columns());
    let mut columns: Vec<ArrayRef> = Vec::with_capacity(batch.num_columns());
    for (field, column) in batch.schema().fields().iter().zip(batch.columns()) {
        let target = narrowed_type(field.data_type());
        if &target != field.data_type() {
            match strict_cast(column.as_ref(), &target) {
                Ok(narrowed) => {
                    fields.push(field.as_ref().clone().with_data_type(target));
                    columns.push(narrowed);
                    continue;
                }
                Err(e) => {
                    debug!(
                        "narrowing cast failed for column '{}' ({} -> {}): {}",
                        field.name(),
                        field.data_type(),
                        target,
                        e
                    );
                }
            }
        }
        fields.push(field.as_ref().clone());
        columns.push(column.clone());
    }
    RecordBatch::try_new(Arc::new(Schema::new(fields)), columns)
        .context("rebuilding batch after schema narrowing")
}

/// Cast with `safe: false`: a safe cast turns out-of-range values into
/// nulls, but a narrowing that cannot represent every value must surface
/// as an error so the column passes through unmodified.
fn strict_cast(column: &dyn Array, to: &DataType) -> Result<ArrayRef, ArrowError> {
    cast_with_options(
        column,
        to,
        &CastOptions {
            safe: false,
            ..Default::default()
        },
    )
}

/// Narrowing rules for a single column type. Types without a rule map to
/// themselves.
fn narrowed_type(data_type: &DataType) -> DataType {
    match data_type {
        DataType::Int64 => DataType::Int32,
        DataType::UInt64 => DataType::UInt32,
        DataType::Float64 => DataType::Float32,
        DataType::LargeUtf8 => DataType::Utf8,
        DataType::LargeBinary => DataType::Binary,
        DataType::Date32 | DataType::Date64 => {
            DataType::Timestamp(TimeUnit::Millisecond, None)
        }
        DataType::Timestamp(_, tz) => DataType::Timestamp(TimeUnit::Millisecond, tz.clone()),
        // The ordered flag lives on the field and is carried through by
        // with_data_type.
        DataType::Dictionary(key, value) => {
            let key = match key.as_ref() {
                DataType::Int64 => DataType::Int32,
                DataType::UInt64 => DataType::UInt32,
                other => other.clone(),
            };
            DataType::Dictionary(Box::new(key), Box::new(narrowed_type(value)))
        }
        other => other.clone(),
    }
}

fn write_ipc(batch: &RecordBatch) -> Result<Vec<u8>> {
    let schema = batch.schema();
    let mut writer =
        FileWriter::try_new(Vec::new(), &schema).context("creating Arrow IPC writer")?;
    writer.write(batch).context("writing Arrow IPC batch")?;
    writer.finish().context("finishing Arrow IPC buffer")?;
    writer.into_inner().context("taking Arrow IPC buffer")
}
