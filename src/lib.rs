// Library exports for obsplot

pub mod cache;
pub mod encode;
pub mod ir;
pub mod jsmodule;
pub mod parse;
pub mod payload;
pub mod spec;

use anyhow::{bail, Result};
use indexmap::IndexMap;
use serde::{Deserialize, Serialize};

use crate::encode::Transport;
use crate::spec::SpecNode;

/// Top-level spec keys a caller may set as defaults.
pub const ALLOWED_DEFAULTS: &[&str] = &[
    "marginTop",
    "marginRight",
    "marginBottom",
    "marginLeft",
    "margin",
    "width",
    "height",
    "aspectRatio",
    "style",
];

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Default)]
pub enum OutputFormat {
    #[serde(rename = "widget")]
    #[default]
    Widget,
    #[serde(rename = "html")]
    Html,
    #[serde(rename = "svg")]
    Svg,
    #[serde(rename = "png")]
    Png,
}

impl OutputFormat {
    /// Transport used for serialized data buffers: the widget carries
    /// binary natively, everything else goes through a JSON body.
    pub fn transport(&self) -> Transport {
        match self {
            OutputFormat::Widget => Transport::Binary,
            _ => Transport::Base64,
        }
    }

    /// Whether this format needs a figure wrapper around the plot.
    pub fn needs_figure(&self) -> bool {
        matches!(self, OutputFormat::Html | OutputFormat::Png)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum Theme {
    #[default]
    Light,
    Dark,
    Current,
}

/// Default top-level spec values, merged (shallow, caller wins) into every
/// spec that goes through a parser built from these options.
///
/// Only whitelisted keys are accepted; an unknown key is rejected when it
/// is inserted, not when a spec is parsed.
#[derive(Debug, Clone, Default)]
pub struct DefaultSpec {
    entries: IndexMap<String, SpecNode>,
}

impl DefaultSpec {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, key: &str, value: impl Into<SpecNode>) -> Result<()> {
        if !ALLOWED_DEFAULTS.contains(&key) {
            bail!(
                "'{}' is not allowed in default. Allowed values: {:?}",
                key,
                ALLOWED_DEFAULTS
            );
        }
        self.entries.insert(key.to_string(), value.into());
        Ok(())
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn entries(&self) -> impl Iterator<Item = (&String, &SpecNode)> {
        self.entries.iter()
    }
}

/// Options for one rendering backend call.
#[derive(Debug, Clone)]
pub struct RenderOptions {
    pub format: OutputFormat,
    pub theme: Theme,
    pub default: DefaultSpec,
    pub debug: bool,
}

impl Default for RenderOptions {
    fn default() -> Self {
        Self {
            format: OutputFormat::Widget,
            theme: Theme::Light,
            default: DefaultSpec::new(),
            debug: false,
        }
    }
}
