// Backend dispatch: assemble the transport payload for a rendering backend

use anyhow::{bail, Result};
use serde::Serialize;

use crate::encode::SerializedData;
use crate::ir::IrNode;
use crate::parse::SpecParser;
use crate::spec::SpecNode;
use crate::{RenderOptions, Theme};

/// The wire payload handed to a rendering backend: serialized data buffers
/// plus the parsed IR referencing them by index.
///
/// `data[i]` corresponds exactly to cache index `i`; every `DataFrame-ref`
/// and `GeoJson-ref` in `code` is a valid index into `data`.
#[derive(Debug, Serialize)]
pub struct RenderPayload {
    pub data: Vec<SerializedData>,
    pub code: IrNode,
    pub debug: bool,
    pub theme: Theme,
}

impl RenderPayload {
    /// Run one full parse session over a caller-supplied spec.
    ///
    /// The spec must be a mapping or a call to the top-level plotting
    /// module. A fresh parser and cache are constructed per call.
    pub fn build(spec: SpecNode, options: &RenderOptions) -> Result<Self> {
        let plot_call =
            matches!(&spec, SpecNode::FunctionCall(call) if call.module == "Plot");
        if !plot_call && !matches!(spec, SpecNode::Map(_)) {
            bail!("plot specification must be a mapping or a Plot function call");
        }

        let force_figure = options.format.needs_figure() && !has_figure(&spec);
        let mut parser = SpecParser::new(options.format.transport(), options.default.clone());
        parser.set_spec(spec, force_figure);
        let code = parser.parse_spec()?;
        let data = parser.serialize_data()?;
        Ok(Self {
            data,
            code,
            debug: options.debug,
            theme: options.theme,
        })
    }
}

fn has_figure(spec: &SpecNode) -> bool {
    matches!(spec, SpecNode::Map(entries) if entries.contains_key("figure"))
}
