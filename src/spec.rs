// Spec node model: the input side of specification parsing

use std::sync::Arc;

use anyhow::{anyhow, bail, Result};
use arrow::array::{ArrayRef, Float64Array, Int64Array, RecordBatch, StringArray};
use arrow::datatypes::{Field, Schema};
use chrono::{NaiveDate, NaiveDateTime};
use indexmap::IndexMap;
use serde_json::Value;

/// A node of a plot specification before parsing.
///
/// Specifications are open-ended nested structures mixing plain values,
/// tabular data, geometries, dates and grammar function calls. The walker
/// in [`crate::parse`] classifies nodes by matching on this enum.
#[derive(Debug, Clone)]
pub enum SpecNode {
    Null,
    Bool(bool),
    Int(i64),
    Float(f64),
    Str(String),
    Seq(Vec<SpecNode>),
    Map(IndexMap<String, SpecNode>),
    Range(IntRange),
    Table(Table),
    Column(Column),
    GeoJson(GeoJson),
    Date(NaiveDate),
    DateTime(NaiveDateTime),
    FunctionCall(FunctionCall),
    FunctionObject(JsFunction),
    JsCode(String),
}

impl SpecNode {
    /// Build a mapping node from key/value pairs, preserving insertion order.
    pub fn map<K, V, I>(pairs: I) -> SpecNode
    where
        K: Into<String>,
        V: Into<SpecNode>,
        I: IntoIterator<Item = (K, V)>,
    {
        SpecNode::Map(
            pairs
                .into_iter()
                .map(|(k, v)| (k.into(), v.into()))
                .collect(),
        )
    }

    /// Build a sequence node from values.
    pub fn seq<V, I>(items: I) -> SpecNode
    where
        V: Into<SpecNode>,
        I: IntoIterator<Item = V>,
    {
        SpecNode::Seq(items.into_iter().map(Into::into).collect())
    }
}

/// Tag a string as literal JavaScript code. The tagged value is used
/// verbatim by the receiving grammar and never quoted.
pub fn js(txt: &str) -> SpecNode {
    SpecNode::JsCode(txt.to_string())
}

/// An eagerly-expandable integer range, `start..stop` by `step`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IntRange {
    start: i64,
    stop: i64,
    step: i64,
}

impl IntRange {
    pub fn new(start: i64, stop: i64) -> Self {
        Self { start, stop, step: 1 }
    }

    pub fn with_step(start: i64, stop: i64, step: i64) -> Result<Self> {
        if step == 0 {
            bail!("range step must not be zero");
        }
        Ok(Self { start, stop, step })
    }

    /// Expand to the full list of integers.
    pub fn expand(&self) -> Vec<i64> {
        let mut out = Vec::new();
        let mut v = self.start;
        if self.step > 0 {
            while v < self.stop {
                out.push(v);
                v += self.step;
            }
        } else {
            while v > self.stop {
                out.push(v);
                v += self.step;
            }
        }
        out
    }
}

/// A tabular value embedded in a specification.
///
/// Wraps an Arrow [`RecordBatch`] behind an `Arc`: clones share the same
/// underlying object, which is what the data cache keys on. Two tables
/// built from identical contents are still distinct objects.
#[derive(Debug, Clone)]
pub struct Table {
    batch: Arc<RecordBatch>,
}

impl Table {
    pub fn new(batch: RecordBatch) -> Self {
        Self {
            batch: Arc::new(batch),
        }
    }

    pub fn batch(&self) -> &RecordBatch {
        &self.batch
    }

    /// True if both handles point at the same underlying table object.
    pub fn same_object(&self, other: &Table) -> bool {
        Arc::ptr_eq(&self.batch, &other.batch)
    }

    /// Read a table from CSV with headers, inferring i64 / f64 / string
    /// column types. Empty cells become nulls.
    pub fn from_csv<R: std::io::Read>(reader: R) -> Result<Table> {
        let mut rdr = csv::ReaderBuilder::new().has_headers(true).from_reader(reader);
        let headers: Vec<String> = rdr
            .headers()?
            .iter()
            .map(|h| h.trim().to_string())
            .collect();
        if headers.is_empty() {
            bail!("CSV input has no header row");
        }

        let mut columns: Vec<Vec<Option<String>>> = vec![Vec::new(); headers.len()];
        for record in rdr.records() {
            let record = record?;
            for (i, cell) in record.iter().enumerate() {
                if i >= columns.len() {
                    break;
                }
                let cell = cell.trim();
                columns[i].push(if cell.is_empty() {
                    None
                } else {
                    Some(cell.to_string())
                });
            }
        }

        let mut fields = Vec::with_capacity(headers.len());
        let mut arrays: Vec<ArrayRef> = Vec::with_capacity(headers.len());
        for (name, raw) in headers.iter().zip(columns) {
            let array = infer_column(&raw);
            fields.push(Field::new(name, array.data_type().clone(), true));
            arrays.push(array);
        }
        let schema = Arc::new(Schema::new(fields));
        let batch = RecordBatch::try_new(schema, arrays)?;
        Ok(Table::new(batch))
    }
}

impl From<RecordBatch> for Table {
    fn from(batch: RecordBatch) -> Self {
        Table::new(batch)
    }
}

/// Infer the narrowest of i64 / f64 / string for a raw CSV column.
fn infer_column(raw: &[Option<String>]) -> ArrayRef {
    let all_int = raw
        .iter()
        .flatten()
        .all(|v| v.parse::<i64>().is_ok());
    if all_int {
        let values: Int64Array = raw
            .iter()
            .map(|v| v.as_ref().map(|s| s.parse::<i64>().unwrap_or_default()))
            .collect();
        return Arc::new(values);
    }
    let all_float = raw
        .iter()
        .flatten()
        .all(|v| v.parse::<f64>().is_ok());
    if all_float {
        let values: Float64Array = raw
            .iter()
            .map(|v| v.as_ref().map(|s| s.parse::<f64>().unwrap_or_default()))
            .collect();
        return Arc::new(values);
    }
    let values: StringArray = raw.iter().map(|v| v.as_deref()).collect();
    Arc::new(values)
}

/// A single labeled column. The walker converts it to a one-column
/// [`Table`] (with a fresh identity) before caching.
#[derive(Debug, Clone)]
pub struct Column {
    name: String,
    values: ArrayRef,
}

impl Column {
    pub fn new(name: &str, values: ArrayRef) -> Self {
        Self {
            name: name.to_string(),
            values,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn to_table(&self) -> Result<Table> {
        let field = Field::new(&self.name, self.values.data_type().clone(), true);
        let schema = Arc::new(Schema::new(vec![field]));
        let batch = RecordBatch::try_new(schema, vec![self.values.clone()])?;
        Ok(Table::new(batch))
    }
}

/// A GeoJSON `FeatureCollection`, treated as an opaque cacheable blob.
/// The walker never recurses into it; it is shipped verbatim.
#[derive(Debug, Clone)]
pub struct GeoJson {
    value: Arc<Value>,
}

impl GeoJson {
    pub fn new(value: Value) -> Result<Self> {
        match value.get("type").and_then(Value::as_str) {
            Some("FeatureCollection") => Ok(Self {
                value: Arc::new(value),
            }),
            _ => Err(anyhow!(
                "GeoJson value must be an object with type 'FeatureCollection'"
            )),
        }
    }

    /// Wrap a value already known to be a FeatureCollection mapping.
    pub(crate) fn from_value_unchecked(value: Value) -> Self {
        Self {
            value: Arc::new(value),
        }
    }

    pub fn from_str(txt: &str) -> Result<Self> {
        let value: Value = serde_json::from_str(txt)?;
        GeoJson::new(value)
    }

    pub fn value(&self) -> &Value {
        &self.value
    }

    pub(crate) fn shared_value(&self) -> Arc<Value> {
        self.value.clone()
    }

    pub fn same_object(&self, other: &GeoJson) -> bool {
        Arc::ptr_eq(&self.value, &other.value)
    }
}

/// A grammar function call materialized as data: module name, method name
/// and positional arguments. Built by [`crate::jsmodule::JsModule::call`],
/// never executed on this side of the boundary.
#[derive(Debug, Clone)]
pub struct FunctionCall {
    pub module: String,
    pub method: String,
    pub args: Vec<SpecNode>,
}

/// A bare reference to a grammar function (e.g. `Math.abs` passed as a
/// value instead of being called). Built by
/// [`crate::jsmodule::JsModule::method`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct JsFunction {
    pub module: String,
    pub method: String,
}

// Ergonomic conversions so specs read close to their literal form.

impl From<bool> for SpecNode {
    fn from(v: bool) -> Self {
        SpecNode::Bool(v)
    }
}

impl From<i32> for SpecNode {
    fn from(v: i32) -> Self {
        SpecNode::Int(v as i64)
    }
}

impl From<i64> for SpecNode {
    fn from(v: i64) -> Self {
        SpecNode::Int(v)
    }
}

impl From<f64> for SpecNode {
    fn from(v: f64) -> Self {
        SpecNode::Float(v)
    }
}

impl From<&str> for SpecNode {
    fn from(v: &str) -> Self {
        SpecNode::Str(v.to_string())
    }
}

impl From<String> for SpecNode {
    fn from(v: String) -> Self {
        SpecNode::Str(v)
    }
}

impl<T: Into<SpecNode>> From<Vec<T>> for SpecNode {
    fn from(v: Vec<T>) -> Self {
        SpecNode::Seq(v.into_iter().map(Into::into).collect())
    }
}

impl From<IndexMap<String, SpecNode>> for SpecNode {
    fn from(v: IndexMap<String, SpecNode>) -> Self {
        SpecNode::Map(v)
    }
}

impl From<IntRange> for SpecNode {
    fn from(v: IntRange) -> Self {
        SpecNode::Range(v)
    }
}

impl From<Table> for SpecNode {
    fn from(v: Table) -> Self {
        SpecNode::Table(v)
    }
}

impl From<Column> for SpecNode {
    fn from(v: Column) -> Self {
        SpecNode::Column(v)
    }
}

impl From<GeoJson> for SpecNode {
    fn from(v: GeoJson) -> Self {
        SpecNode::GeoJson(v)
    }
}

impl From<NaiveDate> for SpecNode {
    fn from(v: NaiveDate) -> Self {
        SpecNode::Date(v)
    }
}

impl From<NaiveDateTime> for SpecNode {
    fn from(v: NaiveDateTime) -> Self {
        SpecNode::DateTime(v)
    }
}

impl From<FunctionCall> for SpecNode {
    fn from(v: FunctionCall) -> Self {
        SpecNode::FunctionCall(v)
    }
}

impl From<JsFunction> for SpecNode {
    fn from(v: JsFunction) -> Self {
        SpecNode::FunctionObject(v)
    }
}

impl From<Value> for SpecNode {
    fn from(v: Value) -> Self {
        match v {
            Value::Null => SpecNode::Null,
            Value::Bool(b) => SpecNode::Bool(b),
            Value::Number(n) => {
                if let Some(i) = n.as_i64() {
                    SpecNode::Int(i)
                } else {
                    SpecNode::Float(n.as_f64().unwrap_or(f64::NAN))
                }
            }
            Value::String(s) => SpecNode::Str(s),
            Value::Array(items) => {
                SpecNode::Seq(items.into_iter().map(SpecNode::from).collect())
            }
            Value::Object(entries) => SpecNode::Map(
                entries
                    .into_iter()
                    .map(|(k, v)| (k, SpecNode::from(v)))
                    .collect(),
            ),
        }
    }
}
