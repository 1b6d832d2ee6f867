// Intermediate representation produced by the spec walker

use indexmap::IndexMap;
use serde::ser::{Serialize, SerializeMap, Serializer};

/// Discriminant key carried by tagged objects on the wire.
pub const TYPE_KEY: &str = "obsplot-type";

/// A parsed specification node.
///
/// Same shape as the input spec, with tables and geometries replaced by
/// indices into the serialized data array, and dates replaced by tagged ISO
/// strings. Serializes to plain JSON plus tagged objects carrying an
/// `obsplot-type` discriminant (`function`, `function-object`, `js`,
/// `datetime`, `DataFrame-ref`, `GeoJson-ref`).
///
/// The transform is one-directional: re-parsing an already-parsed node is
/// not guaranteed to be a no-op.
#[derive(Debug, Clone, PartialEq)]
pub enum IrNode {
    Null,
    Bool(bool),
    Int(i64),
    Float(f64),
    Str(String),
    Seq(Vec<IrNode>),
    Map(IndexMap<String, IrNode>),
    /// Index into the serialized data array, for a tabular payload.
    DataFrameRef(usize),
    /// Index into the serialized data array, for a geometry payload.
    GeoJsonRef(usize),
    /// ISO-8601 date or datetime string.
    DateTime(String),
    /// A grammar call descriptor with recursively parsed arguments.
    FunctionCall {
        module: String,
        method: String,
        args: Vec<IrNode>,
    },
    /// A bare grammar function reference.
    FunctionObject { module: String, method: String },
    /// Literal JavaScript code, used verbatim by the receiving grammar.
    JsCode(String),
}

impl Serialize for IrNode {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        match self {
            IrNode::Null => serializer.serialize_unit(),
            IrNode::Bool(v) => serializer.serialize_bool(*v),
            IrNode::Int(v) => serializer.serialize_i64(*v),
            IrNode::Float(v) => serializer.serialize_f64(*v),
            IrNode::Str(v) => serializer.serialize_str(v),
            IrNode::Seq(items) => serializer.collect_seq(items),
            IrNode::Map(entries) => serializer.collect_map(entries),
            IrNode::DataFrameRef(index) => {
                let mut map = serializer.serialize_map(Some(2))?;
                map.serialize_entry(TYPE_KEY, "DataFrame-ref")?;
                map.serialize_entry("value", index)?;
                map.end()
            }
            IrNode::GeoJsonRef(index) => {
                let mut map = serializer.serialize_map(Some(2))?;
                map.serialize_entry(TYPE_KEY, "GeoJson-ref")?;
                map.serialize_entry("value", index)?;
                map.end()
            }
            IrNode::DateTime(value) => {
                let mut map = serializer.serialize_map(Some(2))?;
                map.serialize_entry(TYPE_KEY, "datetime")?;
                map.serialize_entry("value", value)?;
                map.end()
            }
            IrNode::FunctionCall {
                module,
                method,
                args,
            } => {
                let mut map = serializer.serialize_map(Some(4))?;
                map.serialize_entry(TYPE_KEY, "function")?;
                map.serialize_entry("module", module)?;
                map.serialize_entry("method", method)?;
                map.serialize_entry("args", args)?;
                map.end()
            }
            IrNode::FunctionObject { module, method } => {
                let mut map = serializer.serialize_map(Some(3))?;
                map.serialize_entry(TYPE_KEY, "function-object")?;
                map.serialize_entry("module", module)?;
                map.serialize_entry("method", method)?;
                map.end()
            }
            IrNode::JsCode(value) => {
                let mut map = serializer.serialize_map(Some(2))?;
                map.serialize_entry(TYPE_KEY, "js")?;
                map.serialize_entry("value", value)?;
                map.end()
            }
        }
    }
}
