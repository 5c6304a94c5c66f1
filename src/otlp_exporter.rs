//! OpenTelemetry OTLP sink
//!
//! Exports an execution trace as OpenTelemetry spans via the OTLP protocol.
//!
//! # Architecture
//!
//! - Each session gets a root span, started with the first batch
//! - Each event record becomes a child span with its value references as
//!   attributes
//! - Description records become events on the root span
//! - Spans are exported to an OTLP endpoint (Jaeger, Tempo, etc.)
//!
//! # Example
//!
//! ```bash
//! rastro --format otlp --endpoint http://localhost:4317 session.json
//! ```

use crate::error::SinkError;
use crate::export::Batch;
use crate::sink::Sink;
#[cfg(feature = "otlp")]
use crate::event::{EventRecord, Record};
use anyhow::Result;
#[cfg(feature = "otlp")]
use opentelemetry::{
    trace::{Span, SpanKind, Status, Tracer, TracerProvider as _},
    KeyValue,
};
#[cfg(feature = "otlp")]
use opentelemetry_otlp::WithExportConfig;
#[cfg(feature = "otlp")]
use opentelemetry_sdk::{
    trace::{BatchSpanProcessor, SdkTracerProvider as TracerProvider},
    Resource,
};

/// Default OTLP gRPC endpoint
pub const DEFAULT_OTLP_ENDPOINT: &str = "http://localhost:4317";

/// Configuration for the OTLP sink
#[derive(Debug, Clone)]
pub struct OtlpConfig {
    /// OTLP endpoint URL (e.g., "http://localhost:4317")
    pub endpoint: String,
    /// Service name for traces
    pub service_name: String,
}

/// Sink exporting records as spans
#[cfg(feature = "otlp")]
pub struct OtlpSink {
    runtime: tokio::runtime::Runtime,
    provider: TracerProvider,
    tracer: opentelemetry_sdk::trace::Tracer,
    root_span: Option<opentelemetry_sdk::trace::Span>,
    spans_exported: u64,
}

#[cfg(feature = "otlp")]
impl OtlpSink {
    pub fn new(config: OtlpConfig) -> Result<Self> {
        let runtime = tokio::runtime::Runtime::new()
            .map_err(|e| anyhow::anyhow!("Failed to create Tokio runtime: {}", e))?;

        // The tonic exporter must be built inside the runtime
        let (provider, tracer) = runtime.block_on(async {
            let exporter = opentelemetry_otlp::SpanExporter::builder()
                .with_tonic()
                .with_endpoint(&config.endpoint)
                .build()?;

            let span_processor = BatchSpanProcessor::builder(exporter).build();

            let resource = Resource::builder()
                .with_service_name(config.service_name.clone())
                .with_attributes(vec![KeyValue::new("trace.format", "rastro-facts")])
                .build();

            let provider = TracerProvider::builder()
                .with_span_processor(span_processor)
                .with_resource(resource)
                .build();

            let tracer = provider.tracer("rastro");

            Ok::<_, anyhow::Error>((provider, tracer))
        })?;

        Ok(OtlpSink {
            runtime,
            provider,
            tracer,
            root_span: None,
            spans_exported: 0,
        })
    }

    fn ensure_root_span(&mut self) {
        if self.root_span.is_none() {
            let span = self
                .tracer
                .span_builder("session")
                .with_kind(SpanKind::Server)
                .start(&self.tracer);
            self.root_span = Some(span);
        }
    }

    fn record_event(&mut self, event: &EventRecord) {
        let mut attributes = vec![
            KeyValue::new("step.name", event.step()),
            KeyValue::new("step.iid", event.iid() as i64),
        ];
        for (label, value) in event.values() {
            attributes.push(KeyValue::new(format!("value.{}", label), value.to_string()));
        }

        let mut span = self
            .tracer
            .span_builder(format!("step: {}", event.step()))
            .with_kind(SpanKind::Internal)
            .with_attributes(attributes)
            .start(&self.tracer);

        if matches!(event, EventRecord::Throw { .. } | EventRecord::ScriptExc { .. }) {
            span.set_status(Status::Error {
                description: "exception raised".into(),
            });
        }
        span.end();
        self.spans_exported += 1;
    }

    fn record_description(&mut self, record: &Record) {
        let Some(span) = self.root_span.as_mut() else {
            return;
        };
        match record {
            Record::GlobalsAreProperties { value } => {
                span.set_attribute(KeyValue::new("session.globals_are_properties", *value));
            }
            Record::Global { name, value } => span.add_event(
                format!("global: {}", name),
                vec![KeyValue::new("global.value", value.to_string())],
            ),
            Record::Object(object) => span.add_event(
                format!("object: {}", object.id),
                vec![
                    KeyValue::new("object.id", object.id as i64),
                    KeyValue::new("object.properties", object.properties.len() as i64),
                ],
            ),
            Record::Function(function) => {
                let mut attributes = vec![
                    KeyValue::new("function.id", function.fun_id as i64),
                    KeyValue::new("function.object_id", function.object_id as i64),
                ];
                if let Some(text) = &function.source_text {
                    attributes.push(KeyValue::new("code.function.source", text.clone()));
                }
                span.add_event(format!("function: {}", function.fun_id), attributes);
            }
            Record::FunctionSource { fun_id, text } => span.add_event(
                format!("function source: {}", fun_id),
                vec![KeyValue::new("code.function.source", text.clone())],
            ),
            Record::Exotic { id, label } => span.add_event(
                format!("exotic: {}", id),
                vec![KeyValue::new("exotic.label", label.clone())],
            ),
            Record::End => span.add_event("end", Vec::new()),
            Record::Step(_) => {}
        }
    }

    /// Child spans created so far
    pub fn spans_exported(&self) -> u64 {
        self.spans_exported
    }
}

#[cfg(feature = "otlp")]
impl Sink for OtlpSink {
    fn send_batch(&mut self, batch: &Batch) -> Result<(), SinkError> {
        let _guard = self.runtime.enter();
        self.ensure_root_span();
        for record in &batch.records {
            match record {
                Record::Step(event) => self.record_event(event),
                other => self.record_description(other),
            }
        }
        Ok(())
    }

    fn close(&mut self) -> Result<(), SinkError> {
        let _guard = self.runtime.enter();
        if let Some(mut span) = self.root_span.take() {
            span.set_attribute(KeyValue::new("session.spans", self.spans_exported as i64));
            span.end();
        }
        self.provider.shutdown().map_err(|e| SinkError::Rejected {
            sequence: 0,
            reason: format!("OTLP shutdown failed: {}", e),
        })
    }

    fn name(&self) -> &'static str {
        "otlp"
    }
}

// Stub implementation when OTLP feature is disabled
#[cfg(not(feature = "otlp"))]
pub struct OtlpSink;

#[cfg(not(feature = "otlp"))]
impl OtlpSink {
    pub fn new(_config: OtlpConfig) -> Result<Self> {
        anyhow::bail!("OTLP support not compiled in. Enable the 'otlp' feature.");
    }

    pub fn spans_exported(&self) -> u64 {
        0
    }
}

#[cfg(not(feature = "otlp"))]
impl Sink for OtlpSink {
    fn send_batch(&mut self, batch: &Batch) -> Result<(), SinkError> {
        Err(SinkError::Rejected {
            sequence: batch.sequence,
            reason: "OTLP support not compiled in".to_string(),
        })
    }

    fn name(&self) -> &'static str {
        "otlp"
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_otlp_config_creation() {
        let config = OtlpConfig {
            endpoint: DEFAULT_OTLP_ENDPOINT.to_string(),
            service_name: "test-service".to_string(),
        };

        assert_eq!(config.endpoint, "http://localhost:4317");
        assert_eq!(config.service_name, "test-service");
    }

    #[test]
    #[cfg(not(feature = "otlp"))]
    fn test_otlp_disabled_returns_error() {
        let config = OtlpConfig {
            endpoint: DEFAULT_OTLP_ENDPOINT.to_string(),
            service_name: "test".to_string(),
        };

        assert!(OtlpSink::new(config).is_err());
    }
}
