//! CLI argument parsing for Rastro

use crate::config::{RecorderConfig, SinkKind};
use clap::Parser;
use std::path::PathBuf;

#[derive(Parser, Debug)]
#[command(name = "rastro")]
#[command(version)]
#[command(about = "Execution trace recorder: replays a host log into a fact stream", long_about = None)]
pub struct Cli {
    /// Host log to replay (JSON)
    #[arg(value_name = "HOST_LOG")]
    pub host_log: PathBuf,

    /// Recorder configuration file (TOML)
    #[arg(short = 'c', long = "config", value_name = "FILE")]
    pub config: Option<PathBuf>,

    /// Sink for exported batches (overrides the config file)
    #[arg(long = "format", value_enum)]
    pub format: Option<SinkKind>,

    /// Base URL for the http and otlp sinks
    #[arg(long = "endpoint", value_name = "URL")]
    pub endpoint: Option<String>,

    /// Output file for the json and html sinks
    #[arg(short = 'o', long = "output", value_name = "FILE")]
    pub output: Option<PathBuf>,

    /// Size trigger: flush once more than this many records are buffered
    #[arg(long = "batch-threshold", value_name = "N")]
    pub batch_threshold: Option<usize>,

    /// Delay trigger in milliseconds
    #[arg(long = "flush-delay-ms", value_name = "MS")]
    pub flush_delay_ms: Option<u64>,

    /// Print pipeline statistics to stderr when done
    #[arg(long = "stats")]
    pub stats: bool,

    /// Enable debug logging to stderr
    #[arg(long = "debug")]
    pub debug: bool,
}

impl Cli {
    /// Apply command-line overrides on top of `config`
    pub fn apply_overrides(&self, config: &mut RecorderConfig) {
        if let Some(kind) = self.format {
            config.sink.kind = kind;
        }
        if let Some(endpoint) = &self.endpoint {
            config.sink.endpoint = Some(endpoint.clone());
        }
        if let Some(output) = &self.output {
            config.sink.output = Some(output.clone());
        }
        if let Some(threshold) = self.batch_threshold {
            config.export.batch_threshold = threshold;
        }
        if let Some(delay) = self.flush_delay_ms {
            config.export.flush_delay_ms = delay;
        }
    }
}
