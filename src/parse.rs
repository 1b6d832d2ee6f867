// Recursive spec walking: classify every node and rewrite it into the IR

use anyhow::Result;
use indexmap::IndexMap;
use log::debug;
use serde_json::Value;

use crate::cache::{DataCache, DataValue};
use crate::encode::{serialize_entry, SerializedData, Transport};
use crate::ir::IrNode;
use crate::spec::{GeoJson, SpecNode, Table};
use crate::DefaultSpec;

/// One parse session: walks a specification top to bottom, registering
/// tables and geometries in a fresh data cache as it goes.
///
/// A parser must not be shared between render calls; each call constructs
/// its own parser/cache pair.
#[derive(Debug)]
pub struct SpecParser {
    transport: Transport,
    default: DefaultSpec,
    data: DataCache,
    spec: SpecNode,
}

impl SpecParser {
    pub fn new(transport: Transport, default: DefaultSpec) -> Self {
        Self {
            transport,
            default,
            data: DataCache::new(),
            spec: SpecNode::Null,
        }
    }

    pub fn spec(&self) -> &SpecNode {
        &self.spec
    }

    pub fn data(&self) -> &DataCache {
        &self.data
    }

    /// Install the raw caller-supplied spec.
    ///
    /// A bare call to the top-level plotting module is wrapped as
    /// `{marks: [call]}`. When `force_figure` is set (non-interactive
    /// output formats that need a figure wrapper), `figure: true` is
    /// injected into the top-level mapping.
    pub fn set_spec(&mut self, spec: SpecNode, force_figure: bool) {
        let mut spec = match spec {
            SpecNode::FunctionCall(call) if call.module == "Plot" => {
                let mut wrapped = IndexMap::new();
                wrapped.insert(
                    "marks".to_string(),
                    SpecNode::Seq(vec![SpecNode::FunctionCall(call)]),
                );
                SpecNode::Map(wrapped)
            }
            other => other,
        };
        if force_figure {
            if let SpecNode::Map(entries) = &mut spec {
                entries.insert("figure".to_string(), SpecNode::Bool(true));
            }
        }
        self.spec = spec;
    }

    /// Parse the installed spec: merge defaults into the top-level mapping
    /// (caller keys win, shallow only), then walk.
    pub fn parse_spec(&mut self) -> Result<IrNode> {
        let mut spec = self.spec.clone();
        if let SpecNode::Map(entries) = &mut spec {
            for (key, value) in self.default.entries() {
                if !entries.contains_key(key) {
                    entries.insert(key.clone(), value.clone());
                }
            }
        }
        self.parse(&spec)
    }

    /// Recursively classify and rewrite one node. Classification precedence
    /// matters: geometry sniffing runs before generic string/mapping
    /// handling, and unknown values pass through unchanged for the
    /// downstream grammar to deal with.
    pub fn parse(&mut self, node: &SpecNode) -> Result<IrNode> {
        match node {
            SpecNode::Null => Ok(IrNode::Null),
            SpecNode::Seq(items) => {
                let parsed: Result<Vec<IrNode>> =
                    items.iter().map(|item| self.parse(item)).collect();
                Ok(IrNode::Seq(parsed?))
            }
            SpecNode::Str(text) => {
                // A string may itself hold a GeoJSON FeatureCollection.
                if let Some(value) = sniff_geojson(text) {
                    return Ok(self.geojson_ref(&GeoJson::from_value_unchecked(value)));
                }
                Ok(IrNode::Str(text.clone()))
            }
            SpecNode::Map(entries) => {
                if is_feature_collection(entries) {
                    if let Some(value) = map_to_json(entries) {
                        return Ok(self.geojson_ref(&GeoJson::from_value_unchecked(value)));
                    }
                }
                let mut parsed = IndexMap::with_capacity(entries.len());
                for (key, value) in entries {
                    parsed.insert(key.clone(), self.parse(value)?);
                }
                Ok(IrNode::Map(parsed))
            }
            SpecNode::GeoJson(geojson) => Ok(self.geojson_ref(geojson)),
            SpecNode::Range(range) => {
                let items: Vec<SpecNode> =
                    range.expand().into_iter().map(SpecNode::Int).collect();
                self.parse(&SpecNode::Seq(items))
            }
            SpecNode::Table(table) => Ok(self.table_ref(table)),
            SpecNode::Column(column) => {
                let table = column.to_table()?;
                Ok(self.table_ref(&table))
            }
            SpecNode::Date(date) => Ok(IrNode::DateTime(date.format("%Y-%m-%d").to_string())),
            SpecNode::DateTime(datetime) => Ok(IrNode::DateTime(
                datetime.format("%Y-%m-%dT%H:%M:%S%.f").to_string(),
            )),
            SpecNode::FunctionObject(func) => Ok(IrNode::FunctionObject {
                module: func.module.clone(),
                method: func.method.clone(),
            }),
            SpecNode::FunctionCall(call) => {
                // Already in IR shape, but call arguments may hold nested
                // tables or dates.
                let args: Result<Vec<IrNode>> =
                    call.args.iter().map(|arg| self.parse(arg)).collect();
                Ok(IrNode::FunctionCall {
                    module: call.module.clone(),
                    method: call.method.clone(),
                    args: args?,
                })
            }
            SpecNode::JsCode(code) => Ok(IrNode::JsCode(code.clone())),
            SpecNode::Bool(v) => Ok(IrNode::Bool(*v)),
            SpecNode::Int(v) => Ok(IrNode::Int(*v)),
            SpecNode::Float(v) => Ok(IrNode::Float(*v)),
        }
    }

    /// Serialize the data cache, in cache order, one entry per slot.
    pub fn serialize_data(&self) -> Result<Vec<SerializedData>> {
        self.data
            .entries()
            .iter()
            .map(|entry| serialize_entry(entry, self.transport))
            .collect()
    }

    fn table_ref(&mut self, table: &Table) -> IrNode {
        let entry = DataValue::Table(table.clone());
        let index = match self.data.index_of(&entry) {
            Some(index) => index,
            None => self.data.register(entry),
        };
        IrNode::DataFrameRef(index)
    }

    fn geojson_ref(&mut self, geojson: &GeoJson) -> IrNode {
        let entry = DataValue::GeoJson(geojson.clone());
        let index = match self.data.index_of(&entry) {
            Some(index) => index,
            None => self.data.register(entry),
        };
        IrNode::GeoJsonRef(index)
    }
}

/// Detect a GeoJSON FeatureCollection embedded as a raw JSON string.
/// Structural check rather than an exact byte prefix: anything object-like
/// is decoded and classified by its `type` field.
fn sniff_geojson(text: &str) -> Option<Value> {
    if !text.trim_start().starts_with('{') {
        return None;
    }
    let value: Value = serde_json::from_str(text).ok()?;
    match value.get("type").and_then(Value::as_str) {
        Some("FeatureCollection") => {
            debug!("parsed embedded GeoJSON string ({} bytes)", text.len());
            Some(value)
        }
        _ => None,
    }
}

fn is_feature_collection(entries: &IndexMap<String, SpecNode>) -> bool {
    matches!(entries.get("type"), Some(SpecNode::Str(t)) if t == "FeatureCollection")
}

/// Convert a spec mapping to a plain JSON value, verbatim. Returns None if
/// the mapping holds anything that is not plain JSON (a geometry blob
/// never should); the caller then falls back to generic recursive parsing
/// instead of caching, since such a mapping cannot be shipped verbatim.
fn map_to_json(entries: &IndexMap<String, SpecNode>) -> Option<Value> {
    let mut out = serde_json::Map::with_capacity(entries.len());
    for (key, value) in entries {
        out.insert(key.clone(), node_to_json(value)?);
    }
    Some(Value::Object(out))
}

fn node_to_json(node: &SpecNode) -> Option<Value> {
    match node {
        SpecNode::Null => Some(Value::Null),
        SpecNode::Bool(v) => Some(Value::Bool(*v)),
        SpecNode::Int(v) => Some(Value::from(*v)),
        SpecNode::Float(v) => serde_json::Number::from_f64(*v).map(Value::Number),
        SpecNode::Str(v) => Some(Value::String(v.clone())),
        SpecNode::Seq(items) => items
            .iter()
            .map(node_to_json)
            .collect::<Option<Vec<Value>>>()
            .map(Value::Array),
        SpecNode::Map(entries) => map_to_json(entries),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{NaiveDate, NaiveDateTime};
    use serde_json::json;

    use crate::jsmodule::{CallArg, MATH, PLOT};

    fn parser() -> SpecParser {
        SpecParser::new(Transport::Binary, DefaultSpec::new())
    }

    fn make_table() -> Table {
        Table::from_csv("x,y\n1,10\n2,20\n".as_bytes()).unwrap()
    }

    #[test]
    fn test_parse_null_and_scalars() {
        let mut p = parser();
        assert_eq!(p.parse(&SpecNode::Null).unwrap(), IrNode::Null);
        assert_eq!(p.parse(&SpecNode::Int(3)).unwrap(), IrNode::Int(3));
        assert_eq!(
            p.parse(&SpecNode::from("hello")).unwrap(),
            IrNode::Str("hello".to_string())
        );
    }

    #[test]
    fn test_parse_recursive_sequences() {
        let mut p = parser();
        let node = SpecNode::seq([SpecNode::from(1), SpecNode::seq([2, 3])]);
        assert_eq!(
            p.parse(&node).unwrap(),
            IrNode::Seq(vec![
                IrNode::Int(1),
                IrNode::Seq(vec![IrNode::Int(2), IrNode::Int(3)])
            ])
        );
    }

    #[test]
    fn test_parse_range_equals_parse_list() {
        let mut p1 = parser();
        let mut p2 = parser();
        let range = crate::spec::IntRange::with_step(0, 10, 2).unwrap();
        let expanded: Vec<SpecNode> = range.expand().into_iter().map(SpecNode::Int).collect();
        assert_eq!(
            p1.parse(&SpecNode::Range(range)).unwrap(),
            p2.parse(&SpecNode::Seq(expanded)).unwrap()
        );
    }

    #[test]
    fn test_parse_geojson_mapping() {
        // Scenario: a literal mapping with a FeatureCollection type.
        let mut p = parser();
        let node = SpecNode::map([
            ("type", SpecNode::from("FeatureCollection")),
            ("val", SpecNode::seq([1, 2])),
        ]);
        assert_eq!(p.parse(&node).unwrap(), IrNode::GeoJsonRef(0));
        assert_eq!(p.data().len(), 1);
        match &p.data().entries()[0] {
            DataValue::GeoJson(gj) => {
                assert_eq!(
                    gj.value(),
                    &json!({"type": "FeatureCollection", "val": [1, 2]})
                );
            }
            other => panic!("expected geojson entry, got {:?}", other),
        }
    }

    #[test]
    fn test_parse_geojson_string() {
        let mut p = parser();
        let text = r#"{"type": "FeatureCollection", "features": []}"#;
        assert_eq!(
            p.parse(&SpecNode::from(text)).unwrap(),
            IrNode::GeoJsonRef(0)
        );
        // Prefix variant with different whitespace still sniffs.
        let mut p2 = parser();
        let text2 = r#"{ "type": "FeatureCollection", "features": [] }"#;
        assert_eq!(
            p2.parse(&SpecNode::from(text2)).unwrap(),
            IrNode::GeoJsonRef(0)
        );
        // Plain strings stay strings.
        let mut p3 = parser();
        assert_eq!(
            p3.parse(&SpecNode::from("{not json")).unwrap(),
            IrNode::Str("{not json".to_string())
        );
    }

    #[test]
    fn test_feature_collection_with_non_json_values_recurses() {
        // A mapping claiming to be a FeatureCollection but carrying a
        // table cannot be shipped verbatim; it gets generic recursive
        // parsing instead of opaque caching.
        let mut p = parser();
        let node = SpecNode::map([
            ("type", SpecNode::from("FeatureCollection")),
            ("features", SpecNode::Table(make_table())),
        ]);
        let IrNode::Map(entries) = p.parse(&node).unwrap() else {
            panic!("expected mapping")
        };
        assert_eq!(entries["features"], IrNode::DataFrameRef(0));
        assert!(matches!(p.data().entries()[0], DataValue::Table(_)));
    }

    #[test]
    fn test_parse_geojson_reuse_by_identity() {
        let gj = GeoJson::new(json!({"type": "FeatureCollection", "features": []})).unwrap();
        let mut p = parser();
        let node = SpecNode::seq([SpecNode::GeoJson(gj.clone()), SpecNode::GeoJson(gj)]);
        assert_eq!(
            p.parse(&node).unwrap(),
            IrNode::Seq(vec![IrNode::GeoJsonRef(0), IrNode::GeoJsonRef(0)])
        );
        assert_eq!(p.data().len(), 1);
    }

    #[test]
    fn test_parse_table_reuse_by_identity() {
        // Scenario: {"x": df, "y": df2, "z": df} with df reused by reference.
        let df = make_table();
        let df2 = make_table();
        let mut p = parser();
        let node = SpecNode::map([
            ("x", SpecNode::Table(df.clone())),
            ("y", SpecNode::Table(df2)),
            ("z", SpecNode::Table(df)),
        ]);
        let parsed = p.parse(&node).unwrap();
        assert_eq!(p.data().len(), 2);
        let IrNode::Map(entries) = parsed else {
            panic!("expected mapping")
        };
        assert_eq!(entries["x"], IrNode::DataFrameRef(0));
        assert_eq!(entries["y"], IrNode::DataFrameRef(1));
        assert_eq!(entries["z"], IrNode::DataFrameRef(0));
    }

    #[test]
    fn test_parse_column_caches_fresh_table() {
        use arrow::array::{ArrayRef, Int64Array};
        use std::sync::Arc;
        let col = crate::spec::Column::new(
            "v",
            Arc::new(Int64Array::from(vec![1, 2])) as ArrayRef,
        );
        let mut p = parser();
        assert_eq!(
            p.parse(&SpecNode::Column(col)).unwrap(),
            IrNode::DataFrameRef(0)
        );
        assert_eq!(p.data().len(), 1);
    }

    #[test]
    fn test_parse_dates() {
        let mut p = parser();
        let d = NaiveDate::from_ymd_opt(2023, 1, 1).unwrap();
        assert_eq!(
            p.parse(&SpecNode::Date(d)).unwrap(),
            IrNode::DateTime("2023-01-01".to_string())
        );
        let dt: NaiveDateTime = d.and_hms_opt(14, 25, 12).unwrap();
        assert_eq!(
            p.parse(&SpecNode::DateTime(dt)).unwrap(),
            IrNode::DateTime("2023-01-01T14:25:12".to_string())
        );
    }

    #[test]
    fn test_parse_function_object() {
        let mut p = parser();
        let node = SpecNode::from(MATH.method("abs"));
        assert_eq!(
            p.parse(&node).unwrap(),
            IrNode::FunctionObject {
                module: "Math".to_string(),
                method: "abs".to_string(),
            }
        );
    }

    #[test]
    fn test_parse_function_call_args_recursively() {
        let df = make_table();
        let mut p = parser();
        let node = PLOT
            .call("lineY", [CallArg::pos(df)])
            .unwrap();
        let parsed = p.parse(&node).unwrap();
        assert_eq!(
            parsed,
            IrNode::FunctionCall {
                module: "Plot".to_string(),
                method: "lineY".to_string(),
                args: vec![IrNode::DataFrameRef(0)],
            }
        );
        assert_eq!(p.data().len(), 1);
    }

    #[test]
    fn test_js_code_passes_through() {
        let mut p = parser();
        assert_eq!(
            p.parse(&crate::spec::js("d => d.x")).unwrap(),
            IrNode::JsCode("d => d.x".to_string())
        );
    }

    #[test]
    fn test_set_spec_wraps_plot_call_in_marks() {
        let mut p = parser();
        let call = PLOT.call("lineY", [CallArg::pos(vec![1, 2, 3])]).unwrap();
        p.set_spec(call, false);
        let SpecNode::Map(entries) = p.spec() else {
            panic!("expected mapping")
        };
        assert!(entries.contains_key("marks"));
    }

    #[test]
    fn test_set_spec_force_figure() {
        let mut p = parser();
        p.set_spec(SpecNode::map([("width", 100)]), true);
        let SpecNode::Map(entries) = p.spec() else {
            panic!("expected mapping")
        };
        assert!(matches!(entries.get("figure"), Some(SpecNode::Bool(true))));
    }

    #[test]
    fn test_merge_default_caller_wins() {
        // Scenario: defaults {width: 200} against spec {width: 100}.
        let mut default = DefaultSpec::new();
        default.insert("width", 200).unwrap();
        let mut p = SpecParser::new(Transport::Binary, default.clone());
        p.set_spec(SpecNode::map([("width", 100)]), false);
        let parsed = p.parse_spec().unwrap();
        let IrNode::Map(entries) = parsed else {
            panic!("expected mapping")
        };
        assert_eq!(entries["width"], IrNode::Int(100));

        let mut p2 = SpecParser::new(Transport::Binary, default);
        p2.set_spec(SpecNode::Map(IndexMap::new()), false);
        let IrNode::Map(entries) = p2.parse_spec().unwrap() else {
            panic!("expected mapping")
        };
        assert_eq!(entries["width"], IrNode::Int(200));
    }

    #[test]
    fn test_merge_default_is_shallow() {
        let mut default = DefaultSpec::new();
        default
            .insert("style", SpecNode::map([("color", "red")]))
            .unwrap();
        let mut p = SpecParser::new(Transport::Binary, default);
        // Caller's style mapping is kept whole, not merged key by key.
        p.set_spec(
            SpecNode::map([("style", SpecNode::map([("font", "serif")]))]),
            false,
        );
        let IrNode::Map(entries) = p.parse_spec().unwrap() else {
            panic!("expected mapping")
        };
        let IrNode::Map(style) = &entries["style"] else {
            panic!("expected style mapping")
        };
        assert!(style.contains_key("font"));
        assert!(!style.contains_key("color"));
    }

    #[test]
    fn test_serialize_data_matches_cache_order() {
        let df = make_table();
        let gj = GeoJson::new(json!({"type": "FeatureCollection", "features": []})).unwrap();
        let mut p = parser();
        let node = SpecNode::map([
            ("data", SpecNode::Table(df.clone())),
            ("geo", SpecNode::GeoJson(gj)),
            ("again", SpecNode::Table(df)),
        ]);
        p.set_spec(node, false);
        p.parse_spec().unwrap();
        let serialized = p.serialize_data().unwrap();
        assert_eq!(serialized.len(), 2);
        assert!(matches!(serialized[0], SerializedData::DataFrame(_)));
        assert!(matches!(serialized[1], SerializedData::GeoJson(_)));
    }
}
