// Builders for JavaScript grammar calls embedded in specifications

use anyhow::{bail, Result};

use crate::spec::{FunctionCall, JsFunction, SpecNode};

/// The Observable Plot namespace.
pub const PLOT: JsModule = JsModule::new("Plot");
/// The d3 namespace.
pub const D3: JsModule = JsModule::new("d3");
/// The JavaScript Math namespace.
pub const MATH: JsModule = JsModule::new("Math");

/// Handle for a JavaScript namespace (`Plot`, `d3`, `Math`).
///
/// Calls against the handle are never executed here: they are materialized
/// as [`FunctionCall`] descriptors carrying the module name, method name
/// and positional arguments, and resolved by the rendering runtime.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct JsModule {
    name: &'static str,
}

impl JsModule {
    pub const fn new(name: &'static str) -> Self {
        Self { name }
    }

    pub fn name(&self) -> &'static str {
        self.name
    }

    /// Materialize a call to `module.method(args...)` as a spec node.
    ///
    /// Only positional arguments are supported by the grammar runtime.
    /// A named argument is a construction-time error naming the module
    /// and method.
    pub fn call<I>(&self, method: &str, args: I) -> Result<SpecNode>
    where
        I: IntoIterator<Item = CallArg>,
    {
        let mut positional = Vec::new();
        for arg in args {
            match arg {
                CallArg::Positional(value) => positional.push(value),
                CallArg::Named(key, _) => {
                    bail!(
                        "named arguments must not be passed to {}.{}: got '{}'",
                        self.name,
                        method,
                        key
                    );
                }
            }
        }
        Ok(SpecNode::FunctionCall(FunctionCall {
            module: self.name.to_string(),
            method: method.to_string(),
            args: positional,
        }))
    }

    /// A bare reference to `module.method`, used as a value rather than
    /// called (e.g. passing `Math.abs` as a sort comparator).
    pub fn method(&self, name: &str) -> JsFunction {
        JsFunction {
            module: self.name.to_string(),
            method: name.to_string(),
        }
    }
}

/// One argument of a grammar call.
#[derive(Debug, Clone)]
pub enum CallArg {
    Positional(SpecNode),
    Named(String, SpecNode),
}

impl CallArg {
    pub fn pos(value: impl Into<SpecNode>) -> Self {
        CallArg::Positional(value.into())
    }

    pub fn named(key: &str, value: impl Into<SpecNode>) -> Self {
        CallArg::Named(key.to_string(), value.into())
    }
}

/// Known methods of the Plot grammar, generated from the npm package.
pub const PLOT_METHODS: &[&str] = &[
    "Area", "Arrow", "BarX", "BarY", "Cell", "Contour", "Density", "Dot", "Frame", "Geo",
    "Hexgrid", "Image", "Line", "Link", "Mark", "Raster", "Rect", "RuleX", "RuleY", "Text",
    "TickX", "TickY", "Tip", "Vector", "area", "areaX", "areaY", "arrow", "auto", "autoSpec",
    "axisFx", "axisFy", "axisX", "axisY", "barX", "barY", "bin", "binX", "binY", "bollinger",
    "bollingerX", "bollingerY", "boxX", "boxY", "cell", "cellX", "cellY", "centroid", "circle",
    "cluster", "column", "contour", "crosshair", "crosshairX", "crosshairY", "delaunayLink",
    "delaunayMesh", "density", "differenceY", "dodgeX", "dodgeY", "dot", "dotX", "dotY",
    "filter", "find", "formatIsoDate", "formatMonth", "formatNumber", "formatWeekday", "frame",
    "geo", "geoCentroid", "graticule", "gridFx", "gridFy", "gridX", "gridY", "group", "groupX",
    "groupY", "groupZ", "hexagon", "hexbin", "hexgrid", "hull", "identity", "image", "indexOf",
    "initializer", "interpolateNearest", "interpolateNone", "interpolatorBarycentric",
    "interpolatorRandomWalk", "legend", "line", "lineX", "lineY", "linearRegressionX",
    "linearRegressionY", "link", "map", "mapX", "mapY", "marks", "normalize", "normalizeX",
    "normalizeY", "numberInterval", "plot", "pointer", "pointerX", "pointerY", "raster", "rect",
    "rectX", "rectY", "reverse", "ruleX", "ruleY", "scale", "select", "selectFirst",
    "selectLast", "selectMaxX", "selectMaxY", "selectMinX", "selectMinY", "shiftX", "shuffle",
    "sort", "sphere", "spike", "stackX", "stackX1", "stackX2", "stackY", "stackY1", "stackY2",
    "text", "textX", "textY", "tickX", "tickY", "timeInterval", "tip", "transform", "tree",
    "treeLink", "treeNode", "utcInterval", "valueof", "vector", "vectorX", "vectorY", "voronoi",
    "voronoiMesh", "window", "windowX", "windowY",
];
