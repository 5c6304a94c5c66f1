//! Recorder configuration
//!
//! Loaded from TOML; every field has a default so an empty file (or no file
//! at all) yields a working recorder that writes JSON lines to stdout.
//!
//! ```toml
//! globals_are_properties = true
//!
//! [export]
//! batch_threshold = 10
//! flush_delay_ms = 100
//!
//! [describe]
//! root_exposure = ["Object", "Math", "JSON"]
//!
//! [sink]
//! kind = "http"
//! endpoint = "http://localhost:8765"
//! ```

use crate::describe::{ExposureFilter, DEFAULT_EXCLUDED};
use crate::export::{ExportConfig, DEFAULT_BATCH_THRESHOLD, MAX_BATCH_THRESHOLD};
use crate::sink::DEFAULT_DELIVERY_QUEUE;
use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Standard globals described on the root object
pub const STANDARD_GLOBALS: &[&str] = &[
    "Infinity",
    "NaN",
    "undefined",
    "eval",
    "isFinite",
    "isNaN",
    "parseFloat",
    "parseInt",
    "decodeURI",
    "decodeURIComponent",
    "encodeURI",
    "encodeURIComponent",
    "Array",
    "ArrayBuffer",
    "Boolean",
    "DataView",
    "Date",
    "Error",
    "EvalError",
    "Float32Array",
    "Float64Array",
    "Function",
    "Int8Array",
    "Int16Array",
    "Int32Array",
    "Map",
    "Number",
    "Object",
    "Proxy",
    "Promise",
    "RangeError",
    "ReferenceError",
    "RegExp",
    "Set",
    "String",
    "Symbol",
    "SyntaxError",
    "TypeError",
    "Uint8Array",
    "Uint8ClampedArray",
    "Uint16Array",
    "Uint32Array",
    "URIError",
    "WeakSet",
    "WeakMap",
    "JSON",
    "Math",
    "Reflect",
];

/// Builtins named by `global` records after the global object, in order
pub const NAMED_BUILTINS: &[&str] = &[
    "Object", "Function", "Boolean", "Error", "Number", "Math", "Date", "String", "RegExp",
    "Array", "JSON",
];

/// Where exported batches go
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize, clap::ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum SinkKind {
    /// JSON lines to stdout or `output`
    #[default]
    Json,
    /// POST to `<endpoint>/facts`
    Http,
    /// HTML report written to `output` on close
    Html,
    /// OpenTelemetry spans via OTLP
    Otlp,
}

/// Flush triggers
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ExportSettings {
    pub batch_threshold: usize,
    pub flush_delay_ms: u64,
}

impl Default for ExportSettings {
    fn default() -> Self {
        Self {
            batch_threshold: DEFAULT_BATCH_THRESHOLD,
            flush_delay_ms: 100,
        }
    }
}

impl ExportSettings {
    pub fn to_export_config(&self) -> ExportConfig {
        ExportConfig {
            batch_threshold: self.batch_threshold,
            flush_delay: Duration::from_millis(self.flush_delay_ms),
        }
    }
}

/// Description filters
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct DescribeSettings {
    /// Allow-list for the root object's own description
    pub root_exposure: Vec<String>,
    /// Property names never described
    pub excluded: Vec<String>,
}

impl Default for DescribeSettings {
    fn default() -> Self {
        Self {
            root_exposure: STANDARD_GLOBALS.iter().map(|s| s.to_string()).collect(),
            excluded: DEFAULT_EXCLUDED.iter().map(|s| s.to_string()).collect(),
        }
    }
}

impl DescribeSettings {
    pub fn root_filter(&self) -> ExposureFilter {
        ExposureFilter::new(self.root_exposure.iter().cloned())
    }
}

/// Sink destination
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SinkSettings {
    pub kind: SinkKind,
    /// Base URL for `http` and `otlp`
    pub endpoint: Option<String>,
    /// Output file for `json` and `html`
    pub output: Option<PathBuf>,
    /// OTLP service name
    pub service_name: String,
    /// Batches the `http` delivery worker queues before rejecting
    pub queue_capacity: usize,
}

impl Default for SinkSettings {
    fn default() -> Self {
        Self {
            kind: SinkKind::Json,
            endpoint: None,
            output: None,
            service_name: "rastro".to_string(),
            queue_capacity: DEFAULT_DELIVERY_QUEUE,
        }
    }
}

/// Complete recorder configuration
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RecorderConfig {
    /// Host semantics flag forwarded as the first record
    pub globals_are_properties: bool,
    pub export: ExportSettings,
    pub describe: DescribeSettings,
    pub sink: SinkSettings,
}

impl Default for RecorderConfig {
    fn default() -> Self {
        Self {
            globals_are_properties: true,
            export: ExportSettings::default(),
            describe: DescribeSettings::default(),
            sink: SinkSettings::default(),
        }
    }
}

impl RecorderConfig {
    /// Load configuration from a TOML file
    pub fn from_toml<P: AsRef<Path>>(path: P) -> Result<Self> {
        let content = fs::read_to_string(path.as_ref()).with_context(|| {
            format!("Failed to read config file: {}", path.as_ref().display())
        })?;
        let config: RecorderConfig =
            toml::from_str(&content).with_context(|| "Failed to parse TOML recorder config")?;
        config.validate()?;
        Ok(config)
    }

    /// Reject settings the pipeline cannot honour
    pub fn validate(&self) -> Result<()> {
        if self.export.batch_threshold == 0 {
            anyhow::bail!("export.batch_threshold must be at least 1");
        }
        if self.export.batch_threshold > MAX_BATCH_THRESHOLD {
            anyhow::bail!(
                "export.batch_threshold must be at most {}, got {}",
                MAX_BATCH_THRESHOLD,
                self.export.batch_threshold
            );
        }
        if self.sink.queue_capacity == 0 {
            anyhow::bail!("sink.queue_capacity must be at least 1");
        }
        if self.sink.kind == SinkKind::Html && self.sink.output.is_none() {
            anyhow::bail!("sink.output is required for the html sink");
        }
        Ok(())
    }
}
