//! Host log replay
//!
//! A host log is a recorded instrumentation session in JSON: the scripts
//! that ran (with position tables), a snapshot of the heap, the global
//! object and the ordered hook invocations. Replaying it drives a
//! [`TraceSession`] exactly as a live host would.
//!
//! ```json
//! {
//!   "global": "g",
//!   "scripts": [{"sid": "a.js", "code": "function f(){return 1;}\nf();",
//!                "positions": {"5": [1, 1, 1, 24]}}],
//!   "heap": {
//!     "g": {"kind": "object", "properties": [{"name": "Math", "value": {"type": "ref", "id": "m"}}]},
//!     "m": {"kind": "object"},
//!     "f": {"kind": "function", "source": "function f(){ /* instrumented */ }"}
//!   },
//!   "events": [
//!     {"hook": "scriptEnter", "iid": 1, "instrumented": "a_instr_.js", "original": "a.js"},
//!     {"hook": "literal", "iid": 5, "val": {"type": "ref", "id": "f"}}
//!   ]
//! }
//! ```
//!
//! Every `ref` must name a heap entry; dangling references are rejected at
//! load time, before any record is produced.

use crate::config::RecorderConfig;
use crate::describe::DescriberStats;
use crate::export::PipelineStats;
use crate::heap::HeapObject;
use crate::recorder::{Analysis, TraceSession};
use crate::sink::Sink;
use crate::source_map::{ScriptSource, SourcePosition};
use crate::value::{HostProperty, HostValue, Iid, ObjectRef};
use anyhow::{bail, Context, Result};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};
use std::fs;
use std::path::Path;
use std::rc::Rc;

/// A value as written in a host log
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum LoggedValue {
    #[default]
    Undefined,
    Null,
    Boolean { val: bool },
    Number { val: f64 },
    /// Non-finite numbers, spelled `NaN`, `Infinity` or `-Infinity`
    Special { val: String },
    String { val: String },
    Symbol { val: String },
    /// Reference to a heap entry
    Ref { id: String },
}

/// Kind of heap allocation
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum HeapKind {
    #[default]
    Object,
    Function,
    Exotic,
}

fn default_true() -> bool {
    true
}

/// One own property of a heap entry
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggedProperty {
    pub name: String,
    #[serde(default)]
    pub value: Option<LoggedValue>,
    /// Heap id of the getter function
    #[serde(default)]
    pub get: Option<String>,
    /// Heap id of the setter function
    #[serde(default)]
    pub set: Option<String>,
    #[serde(default = "default_true")]
    pub writable: bool,
    #[serde(default = "default_true")]
    pub enumerable: bool,
    #[serde(default = "default_true")]
    pub configurable: bool,
    /// The host fails to produce this property's descriptor
    #[serde(default)]
    pub unreadable: bool,
}

/// One heap allocation
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct HeapEntry {
    #[serde(default)]
    pub kind: HeapKind,
    /// Type label for exotic values
    #[serde(default)]
    pub label: Option<String>,
    /// Host rendering of a function
    #[serde(default)]
    pub source: Option<String>,
    #[serde(default)]
    pub prototype: Option<String>,
    #[serde(default)]
    pub properties: Vec<LoggedProperty>,
}

/// A script and its position table
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggedScript {
    pub sid: String,
    pub code: String,
    #[serde(default)]
    pub positions: HashMap<Iid, SourcePosition>,
}

impl LoggedScript {
    pub fn to_source(&self) -> ScriptSource {
        ScriptSource {
            code: self.code.clone(),
            positions: self.positions.clone(),
        }
    }
}

/// One hook invocation
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "hook", rename_all = "camelCase", rename_all_fields = "camelCase")]
pub enum HostEvent {
    InvokeFunPre {
        iid: Iid,
        f: LoggedValue,
        #[serde(default)]
        base: LoggedValue,
        #[serde(default)]
        args: LoggedValue,
        #[serde(default)]
        is_constructor: bool,
        #[serde(default)]
        is_method: bool,
    },
    InvokeFun {
        iid: Iid,
        f: LoggedValue,
        #[serde(default)]
        base: LoggedValue,
        #[serde(default)]
        args: LoggedValue,
        #[serde(default)]
        result: LoggedValue,
        #[serde(default)]
        is_constructor: bool,
        #[serde(default)]
        is_method: bool,
    },
    Literal {
        iid: Iid,
        val: LoggedValue,
        #[serde(default)]
        has_getter_setter: bool,
    },
    ForInObject {
        iid: Iid,
        val: LoggedValue,
    },
    Declare {
        iid: Iid,
        name: String,
        #[serde(default)]
        val: LoggedValue,
        #[serde(default)]
        is_argument: bool,
        #[serde(default = "no_argument_index")]
        argument_index: i64,
        #[serde(default)]
        is_catch_param: bool,
    },
    GetFieldPre {
        iid: Iid,
        base: LoggedValue,
        offset: String,
        #[serde(default)]
        is_computed: bool,
        #[serde(default)]
        is_op_assign: bool,
        #[serde(default)]
        is_method_call: bool,
    },
    GetField {
        iid: Iid,
        base: LoggedValue,
        offset: String,
        #[serde(default)]
        val: LoggedValue,
        #[serde(default)]
        is_computed: bool,
        #[serde(default)]
        is_op_assign: bool,
        #[serde(default)]
        is_method_call: bool,
    },
    PutFieldPre {
        iid: Iid,
        base: LoggedValue,
        offset: String,
        #[serde(default)]
        val: LoggedValue,
        #[serde(default)]
        is_computed: bool,
        #[serde(default)]
        is_op_assign: bool,
    },
    PutField {
        iid: Iid,
        base: LoggedValue,
        offset: String,
        #[serde(default)]
        val: LoggedValue,
        #[serde(default)]
        is_computed: bool,
        #[serde(default)]
        is_op_assign: bool,
    },
    Read {
        iid: Iid,
        name: String,
        #[serde(default)]
        val: LoggedValue,
        #[serde(default)]
        is_global: bool,
        #[serde(default)]
        is_script_local: bool,
    },
    Write {
        iid: Iid,
        name: String,
        #[serde(default)]
        val: LoggedValue,
        #[serde(default)]
        lhs: LoggedValue,
        #[serde(default)]
        is_global: bool,
        #[serde(default)]
        is_script_local: bool,
    },
    Return {
        iid: Iid,
        #[serde(default)]
        val: LoggedValue,
    },
    Throw {
        iid: Iid,
        #[serde(default)]
        val: LoggedValue,
    },
    FunctionEnter {
        iid: Iid,
        f: LoggedValue,
        #[serde(default, rename = "this")]
        this_value: LoggedValue,
        #[serde(default)]
        args: LoggedValue,
    },
    FunctionExit {
        iid: Iid,
        #[serde(default)]
        ret: LoggedValue,
        #[serde(default)]
        exc: Option<LoggedValue>,
    },
    ScriptEnter {
        iid: Iid,
        #[serde(default)]
        instrumented: String,
        original: String,
    },
    ScriptExit {
        iid: Iid,
        #[serde(default)]
        exc: Option<LoggedValue>,
    },
    BinaryPre {
        iid: Iid,
        op: String,
        left: LoggedValue,
        right: LoggedValue,
        #[serde(default)]
        is_op_assign: bool,
        #[serde(default)]
        is_switch_comparison: bool,
        #[serde(default)]
        is_computed: bool,
    },
    Binary {
        iid: Iid,
        op: String,
        left: LoggedValue,
        right: LoggedValue,
        #[serde(default)]
        result: LoggedValue,
        #[serde(default)]
        is_op_assign: bool,
        #[serde(default)]
        is_switch_comparison: bool,
        #[serde(default)]
        is_computed: bool,
    },
    UnaryPre {
        iid: Iid,
        op: String,
        left: LoggedValue,
    },
    Unary {
        iid: Iid,
        op: String,
        left: LoggedValue,
        #[serde(default)]
        result: LoggedValue,
    },
    Conditional {
        iid: Iid,
        result: LoggedValue,
    },
    EndExpression {
        iid: Iid,
    },
    EndExecution,
    With {
        iid: Iid,
        val: LoggedValue,
    },
    /// Name a further root value
    IdentifyGlobal {
        name: String,
        value: LoggedValue,
    },
    /// The host went idle; lets the delayed flush fire
    Poll,
}

fn no_argument_index() -> i64 {
    -1
}

impl HostEvent {
    /// Logged values carried by this invocation
    pub fn values(&self) -> Vec<&LoggedValue> {
        match self {
            HostEvent::InvokeFunPre { f, base, args, .. } => vec![f, base, args],
            HostEvent::InvokeFun {
                f,
                base,
                args,
                result,
                ..
            } => vec![f, base, args, result],
            HostEvent::Literal { val, .. }
            | HostEvent::ForInObject { val, .. }
            | HostEvent::Declare { val, .. }
            | HostEvent::Return { val, .. }
            | HostEvent::Throw { val, .. }
            | HostEvent::With { val, .. }
            | HostEvent::IdentifyGlobal { value: val, .. } => vec![val],
            HostEvent::GetFieldPre { base, .. } => vec![base],
            HostEvent::GetField { base, val, .. }
            | HostEvent::PutFieldPre { base, val, .. }
            | HostEvent::PutField { base, val, .. } => vec![base, val],
            HostEvent::Read { val, .. } => vec![val],
            HostEvent::Write { val, lhs, .. } => vec![val, lhs],
            HostEvent::FunctionEnter {
                f, this_value, args, ..
            } => vec![f, this_value, args],
            HostEvent::FunctionExit { ret, exc, .. } => {
                let mut values = vec![ret];
                values.extend(exc.iter());
                values
            }
            HostEvent::ScriptExit { exc, .. } => exc.iter().collect(),
            HostEvent::BinaryPre { left, right, .. } => vec![left, right],
            HostEvent::Binary {
                left,
                right,
                result,
                ..
            } => vec![left, right, result],
            HostEvent::UnaryPre { left, .. } => vec![left],
            HostEvent::Unary { left, result, .. } => vec![left, result],
            HostEvent::Conditional { result, .. } => vec![result],
            HostEvent::ScriptEnter { .. }
            | HostEvent::EndExpression { .. }
            | HostEvent::EndExecution
            | HostEvent::Poll => Vec::new(),
        }
    }
}

/// A complete recorded host session
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HostLog {
    #[serde(default = "default_true")]
    pub globals_are_properties: bool,
    /// Heap id of the global object
    pub global: String,
    #[serde(default)]
    pub scripts: Vec<LoggedScript>,
    #[serde(default)]
    pub heap: BTreeMap<String, HeapEntry>,
    #[serde(default)]
    pub events: Vec<HostEvent>,
}

impl HostLog {
    /// Load and validate a host log from a JSON file
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path_ref = path.as_ref();
        if !path_ref.exists() {
            bail!("Host log not found: {}", path_ref.display());
        }

        let contents = fs::read_to_string(path_ref)
            .with_context(|| format!("Failed to read host log: {}", path_ref.display()))?;
        Self::from_json(&contents)
    }

    pub fn from_json(contents: &str) -> Result<Self> {
        let log: HostLog = serde_json::from_str(contents).context("Invalid host log JSON")?;
        log.validate()?;
        Ok(log)
    }

    /// Check that every heap reference resolves
    pub fn validate(&self) -> Result<()> {
        self.check_ref(&self.global, "global")?;

        for (id, entry) in &self.heap {
            if let Some(proto) = &entry.prototype {
                self.check_ref(proto, &format!("prototype of '{}'", id))?;
            }
            for property in &entry.properties {
                let context = format!("property '{}' of '{}'", property.name, id);
                if let Some(LoggedValue::Ref { id: target }) = &property.value {
                    self.check_ref(target, &context)?;
                }
                for accessor in property.get.iter().chain(property.set.iter()) {
                    self.check_ref(accessor, &context)?;
                    if self.heap[accessor].kind != HeapKind::Function {
                        bail!("Accessor '{}' of {} is not a function", accessor, context);
                    }
                }
            }
        }

        for (index, event) in self.events.iter().enumerate() {
            for value in event.values() {
                if let LoggedValue::Ref { id } = value {
                    self.check_ref(id, &format!("event #{}", index))?;
                }
            }
        }
        Ok(())
    }

    fn check_ref(&self, id: &str, context: &str) -> Result<()> {
        if !self.heap.contains_key(id) {
            bail!("Dangling heap reference '{}' in {}", id, context);
        }
        Ok(())
    }
}

/// Materialized heap of a host log
pub struct Heap {
    objects: HashMap<String, (HeapKind, Rc<HeapObject>)>,
}

impl Heap {
    /// Allocate every entry, then wire properties and prototypes
    pub fn build(log: &HostLog) -> Result<Self> {
        let mut objects = HashMap::with_capacity(log.heap.len());
        for (id, entry) in &log.heap {
            let object = match (entry.kind, &entry.source) {
                (HeapKind::Function, Some(source)) => HeapObject::function(source),
                (HeapKind::Exotic, _) => {
                    HeapObject::exotic(entry.label.as_deref().unwrap_or("exotic"))
                }
                _ => HeapObject::plain(),
            };
            objects.insert(id.clone(), (entry.kind, object));
        }
        let heap = Self { objects };

        for (id, entry) in &log.heap {
            let object = heap.object(id)?;
            if let Some(proto) = &entry.prototype {
                object.set_prototype(Some(heap.object(proto)? as ObjectRef));
            }
            for property in &entry.properties {
                heap.wire_property(&object, property)?;
            }
        }
        Ok(heap)
    }

    fn wire_property(&self, object: &Rc<HeapObject>, property: &LoggedProperty) -> Result<()> {
        if property.unreadable {
            object.poison(&property.name);
            return Ok(());
        }

        let host_property = if property.get.is_some() || property.set.is_some() {
            let get = property
                .get
                .as_deref()
                .map(|id| self.object(id).map(|o| o as ObjectRef))
                .transpose()?;
            let set = property
                .set
                .as_deref()
                .map(|id| self.object(id).map(|o| o as ObjectRef))
                .transpose()?;
            HostProperty::accessor(get, set)
        } else {
            let value = match &property.value {
                Some(value) => self.resolve(value)?,
                None => HostValue::Undefined,
            };
            let data = HostProperty::data(value);
            if property.writable {
                data
            } else {
                data.read_only()
            }
        };

        object.define(
            &property.name,
            host_property.with_flags(property.enumerable, property.configurable),
        );
        Ok(())
    }

    fn object(&self, id: &str) -> Result<Rc<HeapObject>> {
        self.objects
            .get(id)
            .map(|(_, object)| object.clone())
            .with_context(|| format!("Dangling heap reference '{}'", id))
    }

    /// Host value for a logged value
    pub fn resolve(&self, value: &LoggedValue) -> Result<HostValue> {
        Ok(match value {
            LoggedValue::Undefined => HostValue::Undefined,
            LoggedValue::Null => HostValue::Null,
            LoggedValue::Boolean { val } => HostValue::Boolean(*val),
            LoggedValue::Number { val } => HostValue::Number(*val),
            LoggedValue::Special { val } => HostValue::Number(match val.as_str() {
                "NaN" => f64::NAN,
                "Infinity" => f64::INFINITY,
                "-Infinity" => f64::NEG_INFINITY,
                other => bail!("Unknown special number '{}'", other),
            }),
            LoggedValue::String { val } => HostValue::String(val.clone()),
            LoggedValue::Symbol { val } => HostValue::Symbol(val.clone()),
            LoggedValue::Ref { id } => {
                let (kind, object) = self
                    .objects
                    .get(id)
                    .with_context(|| format!("Dangling heap reference '{}'", id))?;
                let object = object.clone() as ObjectRef;
                match kind {
                    HeapKind::Object => HostValue::Object(object),
                    HeapKind::Function => HostValue::Function(object),
                    HeapKind::Exotic => HostValue::Exotic(object),
                }
            }
        })
    }

    fn resolve_optional(&self, value: &Option<LoggedValue>) -> Result<Option<HostValue>> {
        value.as_ref().map(|v| self.resolve(v)).transpose()
    }

    pub fn len(&self) -> usize {
        self.objects.len()
    }

    pub fn is_empty(&self) -> bool {
        self.objects.is_empty()
    }
}

/// Outcome of a replay
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct ReplaySummary {
    pub hooks: usize,
    pub pipeline: PipelineStats,
    #[serde(skip)]
    pub describer: DescriberStats,
}

/// Drive a session through every hook of `log`
///
/// `end_execution` is fired once at the end unless the log already did.
pub fn replay(log: &HostLog, config: &RecorderConfig, sink: Box<dyn Sink>) -> Result<ReplaySummary> {
    let heap = Heap::build(log)?;
    let mut config = config.clone();
    config.globals_are_properties = log.globals_are_properties;

    let global = heap.resolve(&LoggedValue::Ref {
        id: log.global.clone(),
    })?;
    let mut session = TraceSession::start(&global, &config, sink)?;

    for script in &log.scripts {
        session.register_script(script.sid.clone(), script.to_source());
    }

    for event in &log.events {
        dispatch(&mut session, &heap, event)?;
    }
    if !session.has_ended() {
        session.end_execution();
    }

    let describer = session.describer_stats();
    let pipeline = session.finish()?;
    Ok(ReplaySummary {
        hooks: log.events.len(),
        pipeline,
        describer,
    })
}

fn dispatch(session: &mut TraceSession, heap: &Heap, event: &HostEvent) -> Result<()> {
    let v = |value: &LoggedValue| heap.resolve(value);

    match event {
        HostEvent::InvokeFunPre {
            iid,
            f,
            base,
            args,
            is_constructor,
            is_method,
        } => session.invoke_fun_pre(*iid, &v(f)?, &v(base)?, &v(args)?, *is_constructor, *is_method),
        HostEvent::InvokeFun {
            iid,
            f,
            base,
            args,
            result,
            is_constructor,
            is_method,
        } => session.invoke_fun(
            *iid,
            &v(f)?,
            &v(base)?,
            &v(args)?,
            &v(result)?,
            *is_constructor,
            *is_method,
        ),
        HostEvent::Literal {
            iid,
            val,
            has_getter_setter,
        } => session.literal(*iid, &v(val)?, *has_getter_setter),
        HostEvent::ForInObject { iid, val } => session.for_in_object(*iid, &v(val)?),
        HostEvent::Declare {
            iid,
            name,
            val,
            is_argument,
            argument_index,
            is_catch_param,
        } => session.declare(*iid, name, &v(val)?, *is_argument, *argument_index, *is_catch_param),
        HostEvent::GetFieldPre {
            iid,
            base,
            offset,
            is_computed,
            is_op_assign,
            is_method_call,
        } => session.get_field_pre(*iid, &v(base)?, offset, *is_computed, *is_op_assign, *is_method_call),
        HostEvent::GetField {
            iid,
            base,
            offset,
            val,
            is_computed,
            is_op_assign,
            is_method_call,
        } => session.get_field(
            *iid,
            &v(base)?,
            offset,
            &v(val)?,
            *is_computed,
            *is_op_assign,
            *is_method_call,
        ),
        HostEvent::PutFieldPre {
            iid,
            base,
            offset,
            val,
            is_computed,
            is_op_assign,
        } => session.put_field_pre(*iid, &v(base)?, offset, &v(val)?, *is_computed, *is_op_assign),
        HostEvent::PutField {
            iid,
            base,
            offset,
            val,
            is_computed,
            is_op_assign,
        } => session.put_field(*iid, &v(base)?, offset, &v(val)?, *is_computed, *is_op_assign),
        HostEvent::Read {
            iid,
            name,
            val,
            is_global,
            is_script_local,
        } => session.read(*iid, name, &v(val)?, *is_global, *is_script_local),
        HostEvent::Write {
            iid,
            name,
            val,
            lhs,
            is_global,
            is_script_local,
        } => session.write(*iid, name, &v(val)?, &v(lhs)?, *is_global, *is_script_local),
        HostEvent::Return { iid, val } => session.return_value(*iid, &v(val)?),
        HostEvent::Throw { iid, val } => session.throw_value(*iid, &v(val)?),
        HostEvent::FunctionEnter {
            iid,
            f,
            this_value,
            args,
        } => session.function_enter(*iid, &v(f)?, &v(this_value)?, &v(args)?),
        HostEvent::FunctionExit { iid, ret, exc } => {
            let exc = heap.resolve_optional(exc)?;
            session.function_exit(*iid, &v(ret)?, exc.as_ref())
        }
        HostEvent::ScriptEnter {
            iid,
            instrumented,
            original,
        } => session.script_enter(*iid, instrumented, original),
        HostEvent::ScriptExit { iid, exc } => {
            let exc = heap.resolve_optional(exc)?;
            session.script_exit(*iid, exc.as_ref())
        }
        HostEvent::BinaryPre {
            iid,
            op,
            left,
            right,
            is_op_assign,
            is_switch_comparison,
            is_computed,
        } => session.binary_pre(
            *iid,
            op,
            &v(left)?,
            &v(right)?,
            *is_op_assign,
            *is_switch_comparison,
            *is_computed,
        ),
        HostEvent::Binary {
            iid,
            op,
            left,
            right,
            result,
            is_op_assign,
            is_switch_comparison,
            is_computed,
        } => session.binary(
            *iid,
            op,
            &v(left)?,
            &v(right)?,
            &v(result)?,
            *is_op_assign,
            *is_switch_comparison,
            *is_computed,
        ),
        HostEvent::UnaryPre { iid, op, left } => session.unary_pre(*iid, op, &v(left)?),
        HostEvent::Unary {
            iid,
            op,
            left,
            result,
        } => session.unary(*iid, op, &v(left)?, &v(result)?),
        HostEvent::Conditional { iid, result } => session.conditional(*iid, &v(result)?),
        HostEvent::EndExpression { iid } => session.end_expression(*iid),
        HostEvent::EndExecution => session.end_execution(),
        HostEvent::With { iid, val } => session.with(*iid, &v(val)?),
        HostEvent::IdentifyGlobal { name, value } => {
            session.identify_global(name, &v(value)?);
        }
        HostEvent::Poll => {
            session.poll();
        }
    }
    Ok(())
}
