use anyhow::{Context, Result};
use clap::Parser;
use rastro::{
    cli::Cli,
    config::{RecorderConfig, SinkKind},
    host_log::{self, HostLog},
    html_output::HtmlSink,
    otlp_exporter::{OtlpConfig, OtlpSink, DEFAULT_OTLP_ENDPOINT},
    sink::{
        BackgroundSink, DeliveryCounters, HttpSink, JsonLinesSink, Sink, DEFAULT_HTTP_BASE,
    },
};
use std::sync::Arc;
use tracing_subscriber::EnvFilter;

/// Initialize tracing subscriber for debug output
fn init_tracing(debug: bool) {
    if debug {
        tracing_subscriber::fmt()
            .with_env_filter(
                EnvFilter::from_default_env().add_directive(tracing::Level::TRACE.into()),
            )
            .with_writer(std::io::stderr)
            .init();
    }
}

/// Build the sink named by the configuration
///
/// Network delivery runs on a worker thread; its counters are returned so
/// `--stats` can report failures the pipeline never sees.
fn build_sink(
    config: &RecorderConfig,
) -> Result<(Box<dyn Sink>, Option<Arc<DeliveryCounters>>)> {
    let settings = &config.sink;
    let mut delivery = None;
    let sink: Box<dyn Sink> = match settings.kind {
        SinkKind::Json => match &settings.output {
            Some(path) => Box::new(
                JsonLinesSink::create(path)
                    .with_context(|| format!("Failed to create output file: {}", path.display()))?,
            ),
            None => Box::new(JsonLinesSink::stdout()),
        },
        SinkKind::Http => {
            let base = settings.endpoint.as_deref().unwrap_or(DEFAULT_HTTP_BASE);
            let http = HttpSink::new(base).context("Failed to build HTTP client")?;
            let worker = BackgroundSink::with_capacity(Box::new(http), settings.queue_capacity)
                .context("Failed to start delivery worker")?;
            delivery = Some(worker.counters());
            Box::new(worker)
        }
        SinkKind::Html => {
            let path = settings
                .output
                .clone()
                .context("--output is required for the html format")?;
            Box::new(HtmlSink::new(path))
        }
        SinkKind::Otlp => Box::new(OtlpSink::new(OtlpConfig {
            endpoint: settings
                .endpoint
                .clone()
                .unwrap_or_else(|| DEFAULT_OTLP_ENDPOINT.to_string()),
            service_name: settings.service_name.clone(),
        })?),
    };
    Ok((sink, delivery))
}

fn main() -> Result<()> {
    let args = Cli::parse();

    // Initialize tracing if --debug flag is set
    init_tracing(args.debug);

    let mut config = match &args.config {
        Some(path) => RecorderConfig::from_toml(path)?,
        None => RecorderConfig::default(),
    };
    args.apply_overrides(&mut config);
    config.validate()?;

    let log = HostLog::from_file(&args.host_log)?;
    let (sink, delivery) = build_sink(&config)?;
    let summary = host_log::replay(&log, &config, sink)?;

    if args.stats {
        let stats = &summary.pipeline;
        eprintln!("hooks replayed:    {}", summary.hooks);
        eprintln!("records submitted: {}", stats.records_submitted);
        eprintln!("batches sent:      {}", stats.batches_sent);
        eprintln!("records sent:      {}", stats.records_sent);
        eprintln!("size flushes:      {}", stats.size_flushes);
        eprintln!("delayed flushes:   {}", stats.delayed_flushes);
        eprintln!("failed batches:    {}", stats.failed_batches);
        eprintln!("dropped records:   {}", stats.dropped_records);
        eprintln!("objects described: {}", summary.describer.objects_described);
        eprintln!("functions described: {}", summary.describer.functions_described);
        if let Some(counters) = delivery {
            let delivered = counters.snapshot();
            eprintln!("worker sent:       {}", delivered.batches_sent);
            eprintln!("worker failed:     {}", delivered.batches_failed);
            eprintln!("queue rejected:    {}", delivered.batches_rejected);
        }
    }

    Ok(())
}
