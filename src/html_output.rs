//! HTML report sink
//!
//! Collects every record of a session and, on close, renders one
//! self-contained document: a globals list, the event trace, object
//! descriptions (anchored `obj<id>`) and function sources (anchored
//! `fun<id>`). Value references in the trace link to their descriptions.

use crate::describe::{ObjectRecord, PropertyDescriptor};
use crate::error::SinkError;
use crate::event::{EventRecord, Record};
use crate::export::Batch;
use crate::function::FunctionRecord;
use crate::sink::Sink;
use crate::value::ValueReference;
use std::collections::BTreeMap;
use std::fs;
use std::path::PathBuf;

/// Accumulated records and their HTML rendering
#[derive(Debug, Default)]
pub struct HtmlOutput {
    globals: Vec<(String, ValueReference)>,
    trace: Vec<EventRecord>,
    objects: Vec<ObjectRecord>,
    exotics: Vec<(u64, String)>,
    functions: BTreeMap<u64, FunctionRecord>,
    globals_are_properties: Option<bool>,
    ended: bool,
}

impl HtmlOutput {
    pub fn new() -> Self {
        Self::default()
    }

    /// Sort a record into its section
    pub fn add_record(&mut self, record: &Record) {
        match record {
            Record::GlobalsAreProperties { value } => self.globals_are_properties = Some(*value),
            Record::Global { name, value } => self.globals.push((name.clone(), value.clone())),
            Record::Step(event) => self.trace.push(event.clone()),
            Record::Object(object) => self.objects.push(object.clone()),
            Record::Function(function) => {
                self.functions.insert(function.fun_id, function.clone());
            }
            Record::FunctionSource { fun_id, text } => {
                if let Some(function) = self.functions.get_mut(fun_id) {
                    function.source_text = Some(text.clone());
                }
            }
            Record::Exotic { id, label } => self.exotics.push((*id, label.clone())),
            Record::End => self.ended = true,
        }
    }

    pub fn event_count(&self) -> usize {
        self.trace.len()
    }

    /// Escape HTML special characters to prevent XSS
    fn escape_html(text: &str) -> String {
        text.replace('&', "&amp;")
            .replace('<', "&lt;")
            .replace('>', "&gt;")
            .replace('"', "&quot;")
            .replace('\'', "&#39;")
    }

    /// Generate embedded CSS styles
    fn generate_styles() -> &'static str {
        r#"
        body {
            font-family: -apple-system, BlinkMacSystemFont, 'Segoe UI', Roboto, sans-serif;
            margin: 20px;
            background-color: #f5f5f5;
        }
        h1, h2 {
            color: #333;
        }
        table {
            border-collapse: collapse;
            background-color: white;
            box-shadow: 0 1px 3px rgba(0,0,0,0.1);
            margin-bottom: 10px;
        }
        th, td {
            border: 1px solid #ddd;
            padding: 4px 8px;
            text-align: left;
        }
        th {
            font-family: monospace;
            background-color: #eef3fa;
        }
        ol.trace li {
            font-family: monospace;
            padding: 2px 0;
        }
        .step {
            color: #0066cc;
            font-weight: bold;
        }
        .string {
            color: #2a7d2a;
        }
        .objref a {
            color: #8a2be2;
        }
        .flags {
            color: #888;
            font-size: 0.85em;
        }
        blockquote {
            font-family: monospace;
            white-space: pre-wrap;
            background-color: white;
            border-left: 3px solid #4a90d9;
            margin: 4px 0 12px 0;
            padding: 6px 10px;
        }
        .footer {
            margin-top: 20px;
            font-size: 0.8em;
            color: #888;
            text-align: center;
        }
        "#
    }

    fn format_reference(value: &ValueReference) -> String {
        match value {
            ValueReference::Undefined => "undefined".to_string(),
            ValueReference::Null => "null".to_string(),
            ValueReference::Boolean { val } | ValueReference::Number { val } => {
                Self::escape_html(val)
            }
            ValueReference::String { val } => format!(
                r#"<span class="string">"{}"</span>"#,
                Self::escape_html(val)
            ),
            ValueReference::Symbol { val } => format!("symbol:{}", Self::escape_html(val)),
            ValueReference::Object { id } => format!(
                r##"<span class="objref">object <a href="#obj{id}">{id}</a></span>"##
            ),
            ValueReference::Function { id, funid } => format!(
                r##"<span class="objref">function <a href="#obj{id}">{id}</a>/<a href="#fun{funid}">{funid}</a></span>"##
            ),
            ValueReference::Exotic { id, label } => format!(
                r##"<span class="objref">exotic {} <a href="#obj{id}">{id}</a></span>"##,
                Self::escape_html(label)
            ),
        }
    }

    fn format_event(event: &EventRecord) -> String {
        let mut parts = vec![format!(
            r#"<span class="step">{}</span> @{}"#,
            event.step(),
            event.iid()
        )];
        match event {
            EventRecord::Declare { name, kind, .. } => {
                parts.push(format!("{} ({:?})", Self::escape_html(name), kind));
            }
            EventRecord::Read { name, .. } | EventRecord::Write { name, .. } => {
                parts.push(Self::escape_html(name));
            }
            EventRecord::GetPre { offset, .. }
            | EventRecord::GetPost { offset, .. }
            | EventRecord::PutPre { offset, .. }
            | EventRecord::PutPost { offset, .. } => {
                parts.push(format!(".{}", Self::escape_html(offset)));
            }
            EventRecord::BinaryPre { op, .. }
            | EventRecord::BinaryPost { op, .. }
            | EventRecord::UnaryPre { op, .. }
            | EventRecord::UnaryPost { op, .. } => {
                parts.push(Self::escape_html(op));
            }
            EventRecord::ScriptEnter { original, .. } => {
                parts.push(Self::escape_html(original));
            }
            _ => {}
        }
        for (label, value) in event.values() {
            parts.push(format!("{}={}", label, Self::format_reference(value)));
        }
        parts.join(" ")
    }

    fn format_property(descriptor: &PropertyDescriptor) -> String {
        let mut text = match descriptor {
            PropertyDescriptor::GetterOnly { getter, .. } => {
                format!("Getter: {}", Self::format_reference(getter))
            }
            PropertyDescriptor::SetterOnly { setter, .. } => {
                format!("Setter: {}", Self::format_reference(setter))
            }
            PropertyDescriptor::Accessor { getter, setter, .. } => format!(
                "Getter: {}, Setter: {}",
                Self::format_reference(getter),
                Self::format_reference(setter)
            ),
            PropertyDescriptor::Data { value, .. } => Self::format_reference(value),
        };

        let mut flags = Vec::new();
        if !descriptor.is_enumerable() {
            flags.push("not enumerable");
        }
        if !descriptor.is_configurable() {
            flags.push("not configurable");
        }
        if matches!(descriptor, PropertyDescriptor::Data { writable: false, .. }) {
            flags.push("not writable");
        }
        if !flags.is_empty() {
            text.push_str(&format!(r#" <span class="flags">({})</span>"#, flags.join(", ")));
        }
        text
    }

    fn render_object(object: &ObjectRecord) -> String {
        let mut html = format!("        <li id=\"obj{}\">\n", object.id);
        html.push_str(&format!("            <h3>object {}</h3>\n", object.id));
        html.push_str("            <table>\n");
        for property in &object.properties {
            html.push_str(&format!(
                "                <tr><th>{}</th><td>{}</td></tr>\n",
                Self::escape_html(&property.name),
                Self::format_property(&property.descriptor)
            ));
        }
        html.push_str("            </table>\n");
        html.push_str("        </li>\n");
        html
    }

    fn render_function(function: &FunctionRecord) -> String {
        let source = function
            .source_text
            .as_deref()
            .map(Self::escape_html)
            .unwrap_or_else(|| "(source unavailable)".to_string());
        format!(
            "        <li id=\"fun{}\">{}\n            <blockquote>{}</blockquote>\n        </li>\n",
            function.fun_id,
            Self::format_reference(&ValueReference::Function {
                id: function.object_id,
                funid: function.fun_id,
            }),
            source
        )
    }

    /// Generate complete HTML document
    pub fn to_html(&self) -> String {
        let mut html = String::new();

        html.push_str("<!DOCTYPE html>\n");
        html.push_str("<html lang=\"en\">\n");

        html.push_str("<head>\n");
        html.push_str("    <meta charset=\"UTF-8\">\n");
        html.push_str("    <title>Rastro Execution Trace</title>\n");
        html.push_str("    <style>");
        html.push_str(Self::generate_styles());
        html.push_str("</style>\n");
        html.push_str("</head>\n");

        html.push_str("<body>\n");
        html.push_str("    <h1>Execution Trace</h1>\n");
        if let Some(value) = self.globals_are_properties {
            html.push_str(&format!(
                "    <p>Globals are properties of the global object: {}</p>\n",
                value
            ));
        }

        html.push_str("    <h2>Globals</h2>\n");
        html.push_str("    <dl id=\"globals\">\n");
        for (name, value) in &self.globals {
            html.push_str(&format!(
                "        <dt>{}</dt><dd>{}</dd>\n",
                Self::escape_html(name),
                Self::format_reference(value)
            ));
        }
        html.push_str("    </dl>\n");

        html.push_str("    <h2>Trace</h2>\n");
        html.push_str("    <ol id=\"trace\" class=\"trace\">\n");
        for event in &self.trace {
            html.push_str(&format!("        <li>{}</li>\n", Self::format_event(event)));
        }
        if self.ended {
            html.push_str("        <li><span class=\"step\">end</span></li>\n");
        }
        html.push_str("    </ol>\n");

        html.push_str("    <h2>Objects</h2>\n");
        html.push_str("    <ul id=\"objects\">\n");
        for object in &self.objects {
            html.push_str(&Self::render_object(object));
        }
        for (id, label) in &self.exotics {
            html.push_str(&format!(
                "        <li id=\"obj{}\">exotic object, type: {}</li>\n",
                id,
                Self::escape_html(label)
            ));
        }
        html.push_str("    </ul>\n");

        html.push_str("    <h2>Functions</h2>\n");
        html.push_str("    <ul id=\"functions\">\n");
        for function in self.functions.values() {
            html.push_str(&Self::render_function(function));
        }
        html.push_str("    </ul>\n");

        html.push_str("    <div class=\"footer\">\n");
        html.push_str("        Generated by Rastro - Execution Trace Recorder\n");
        html.push_str("    </div>\n");

        html.push_str("</body>\n");
        html.push_str("</html>\n");

        html
    }
}

/// Sink rendering the session as an HTML file on close
pub struct HtmlSink {
    output: HtmlOutput,
    path: PathBuf,
}

impl HtmlSink {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            output: HtmlOutput::new(),
            path: path.into(),
        }
    }
}

impl Sink for HtmlSink {
    fn send_batch(&mut self, batch: &Batch) -> Result<(), SinkError> {
        for record in &batch.records {
            self.output.add_record(record);
        }
        Ok(())
    }

    fn close(&mut self) -> Result<(), SinkError> {
        fs::write(&self.path, self.output.to_html())?;
        Ok(())
    }

    fn name(&self) -> &'static str {
        "html"
    }
}
