//! Rastro - execution trace recorder with identity-preserving value descriptions
//!
//! An instrumentation host fires lifecycle hooks (calls, property accesses,
//! variable reads and writes, literals, script boundaries) into a
//! [`recorder::TraceSession`]. Each hook becomes a serializable
//! [`event::Record`] that refers to runtime values through stable surrogate
//! ids. Objects and functions are described structurally exactly once, the
//! first time they are referenced, and records reach a [`sink::Sink`] in
//! order through a size- and delay-triggered [`export::ExportPipeline`].
//!
//! ```no_run
//! use rastro::config::RecorderConfig;
//! use rastro::heap::HeapObject;
//! use rastro::recorder::{Analysis, TraceSession};
//! use rastro::sink::MemorySink;
//! use rastro::value::HostValue;
//!
//! let global = HeapObject::plain();
//! let sink = MemorySink::new();
//! let mut session = TraceSession::start(
//!     &HostValue::object(&global),
//!     &RecorderConfig::default(),
//!     Box::new(sink.clone()),
//! )?;
//! session.conditional(1, &HostValue::Boolean(true));
//! session.end_execution();
//! let stats = session.finish()?;
//! # Ok::<(), rastro::error::TraceError>(())
//! ```

pub mod cli;
pub mod config;
pub mod describe;
pub mod encoder;
pub mod error;
pub mod event;
pub mod export;
pub mod function;
pub mod heap;
pub mod host_log;
pub mod html_output;
pub mod identity;
pub mod otlp_exporter;
pub mod recorder;
pub mod sink;
pub mod source_map;
pub mod value;

pub use error::{Result, TraceError};
pub use recorder::{Analysis, TraceSession};
pub use value::{HostValue, ValueReference};
